use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value bound into a statement.
///
/// `Json` is rendered as a document literal, everything else follows the
/// native SQL form (`Array` becomes `ARRAY[...]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<SqlValue>),
    Json(Value),
}

impl SqlValue {
    /// Plain adaptation of a JSON value: lists become arrays and maps become documents.
    pub fn from_json(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(items) => SqlValue::Array(items.iter().map(SqlValue::from_json).collect()),
            Value::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    pub fn json(value: Value) -> SqlValue {
        SqlValue::Json(value)
    }

    pub fn text(value: impl Into<String>) -> SqlValue {
        SqlValue::Text(value.into())
    }

    /// Render as an inline SQL literal. Assumes `standard_conforming_strings`.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "true".to_string(),
            SqlValue::Bool(false) => "false".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) if f.is_nan() => "'NaN'::float8".to_string(),
            SqlValue::Float(f) if f.is_infinite() => {
                if *f > 0.0 {
                    "'Infinity'::float8".to_string()
                } else {
                    "'-Infinity'::float8".to_string()
                }
            }
            SqlValue::Float(f) => format!("{:?}", f),
            SqlValue::Text(s) => quote_literal(s),
            SqlValue::Array(items) if items.is_empty() => "'{}'".to_string(),
            SqlValue::Array(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.to_literal()).collect();
                format!("ARRAY[{}]", inner.join(","))
            }
            SqlValue::Json(v) => quote_literal(&v.to_string()),
        }
    }
}

pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A row returned by the backing store, one text cell per column.
pub type TextRow = Vec<Option<String>>;

/// Output of one executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<TextRow>,
    pub rows_affected: u64,
}

impl ResultSet {
    pub fn empty() -> Self {
        ResultSet::default()
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<TextRow>) -> Self {
        let rows_affected = rows.len() as u64;
        ResultSet { columns, rows, rows_affected }
    }

    /// Rows returned, or rows touched for DML.
    pub fn rowcount(&self) -> u64 {
        if self.rows.is_empty() {
            self.rows_affected
        } else {
            self.rows.len() as u64
        }
    }

    pub fn first(&self) -> Option<&TextRow> {
        self.rows.first()
    }

    /// First cell of the first row, if any.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first().and_then(|r| r.first()).and_then(|c| c.as_deref())
    }

    pub fn scalar_i64(&self) -> Option<i64> {
        self.scalar().and_then(|s| s.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literals() {
        assert_eq!(SqlValue::text("O'Brien").to_literal(), "'O''Brien'");
        assert_eq!(SqlValue::from_json(&json!([1, 2])).to_literal(), "ARRAY[1,2]");
        assert_eq!(SqlValue::from_json(&json!([])).to_literal(), "'{}'");
        assert_eq!(SqlValue::json(json!({"a": [1]})).to_literal(), r#"'{"a":[1]}'"#);
        assert_eq!(SqlValue::Float(0.5).to_literal(), "0.5");
        assert_eq!(SqlValue::Float(f64::NAN).to_literal(), "'NaN'::float8");
        assert_eq!(SqlValue::Null.to_literal(), "NULL");
    }

    #[test]
    fn identifiers_escape_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn rowcount_prefers_rows() {
        let rs = ResultSet::with_rows(vec!["x".into()], vec![vec![Some("1".into())]]);
        assert_eq!(rs.rowcount(), 1);
        assert_eq!(rs.scalar_i64(), Some(1));
        let dml = ResultSet { rows_affected: 7, ..ResultSet::empty() };
        assert_eq!(dml.rowcount(), 7);
    }
}
