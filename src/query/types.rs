use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::types::SqlValue;
use crate::query::array_literal::{parse_array, ArrayItem};
use crate::query::ast::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Real,
    Double,
    Boolean,
    Text,
    Json,
    Jsonb,
    Date,
    Time,
    Timestamp,
    Interval,
    Bytea,
    Uuid,
    Other,
}

impl TypeKind {
    fn from_base(name: &str) -> TypeKind {
        let starts = |p: &str| name.starts_with(p);
        match name {
            "smallint" | "int2" | "smallserial" | "serial2" => TypeKind::SmallInt,
            "integer" | "int" | "int4" | "serial" | "serial4" => TypeKind::Integer,
            "bigint" | "int8" | "bigserial" | "serial8" => TypeKind::BigInt,
            "real" | "float4" => TypeKind::Real,
            "double precision" | "float8" => TypeKind::Double,
            "boolean" | "bool" => TypeKind::Boolean,
            "json" => TypeKind::Json,
            "jsonb" => TypeKind::Jsonb,
            "date" => TypeKind::Date,
            "bytea" => TypeKind::Bytea,
            "uuid" => TypeKind::Uuid,
            "text" => TypeKind::Text,
            _ if starts("numeric") || starts("decimal") => TypeKind::Numeric,
            _ if starts("character") || starts("char") || starts("varchar") || starts("text") => TypeKind::Text,
            _ if starts("timestamp") => TypeKind::Timestamp,
            _ if starts("time") => TypeKind::Time,
            _ if starts("interval") => TypeKind::Interval,
            _ => TypeKind::Other,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, TypeKind::SmallInt | TypeKind::Integer | TypeKind::BigInt)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, TypeKind::Numeric | TypeKind::Real | TypeKind::Double)
    }
}

/// Declared type of a column, the single place type-dependent behavior lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    pub kind: TypeKind,
    pub array: bool,
}

impl ColumnType {
    pub fn parse(declared: &str) -> ColumnType {
        let name = declared.trim().to_lowercase();
        let (base, array) = match name.strip_suffix("[]") {
            Some(base) => (base.trim_end().to_string(), true),
            None => (name.clone(), false),
        };
        ColumnType { kind: TypeKind::from_base(&base), name, array }
    }

    pub fn is_jsonb(&self) -> bool {
        self.kind == TypeKind::Jsonb && !self.array
    }

    pub fn is_container(&self) -> bool {
        self.array || self.kind == TypeKind::Jsonb
    }

    /// Scalar numeric column, eligible for avg/min/max statistics.
    pub fn is_numeric(&self) -> bool {
        !self.array && self.kind.is_numeric()
    }

    /// Type of a single array element.
    pub fn element(&self) -> ColumnType {
        if self.array {
            ColumnType::parse(&self.name[..self.name.len() - 2])
        } else {
            self.clone()
        }
    }

    /// Cast appended to the bound value so array operators type-check.
    pub fn cast_suffix(&self, op: Op, indexed: bool) -> Option<String> {
        if self.name == "smallint[]" && matches!(op, Op::Contains | Op::ContainedIn) {
            return Some("::int[]".to_string());
        }
        let needs_cast = matches!(op, Op::Equals | Op::Ne | Op::Contains | Op::ContainedIn);
        if self.array && needs_cast {
            if indexed {
                Some(format!("::{}", self.element().name))
            } else {
                Some(format!("::{}", self.name))
            }
        } else {
            None
        }
    }

    /// Whether `op` can be applied to a value of this type.
    pub fn allows(&self, op: Op) -> bool {
        match op {
            Op::Contains | Op::ContainedIn | Op::NotContains => self.is_container(),
            Op::Overlaps => self.array,
            Op::StartsWith | Op::Like | Op::ILike | Op::Regex => {
                !self.array && matches!(self.kind, TypeKind::Text | TypeKind::Other)
            }
            Op::Mod => !self.array && self.kind.is_numeric(),
            _ => true,
        }
    }

    /// Encode a query value as a parameter of this type.
    pub fn encode(&self, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        if self.is_jsonb() || (self.kind == TypeKind::Json && !self.array) {
            return Ok(SqlValue::Json(value.clone()));
        }
        if self.array {
            let items = value
                .as_array()
                .ok_or_else(|| self.mismatch(value))?;
            let element = self.element();
            return items
                .iter()
                .map(|v| element.encode(v))
                .collect::<Result<Vec<_>>>()
                .map(SqlValue::Array);
        }
        match (self.kind, value) {
            (TypeKind::SmallInt | TypeKind::Integer | TypeKind::BigInt, Value::Number(n)) => n
                .as_i64()
                .map(SqlValue::Int)
                .ok_or_else(|| self.mismatch(value)),
            (TypeKind::Numeric | TypeKind::Real | TypeKind::Double, Value::Number(_)) => {
                Ok(SqlValue::from_json(value))
            }
            (TypeKind::Numeric, Value::String(s)) if s.parse::<f64>().is_ok() => {
                Ok(SqlValue::Text(s.clone()))
            }
            (TypeKind::Boolean, Value::Bool(b)) => Ok(SqlValue::Bool(*b)),
            (
                TypeKind::Text
                | TypeKind::Date
                | TypeKind::Time
                | TypeKind::Timestamp
                | TypeKind::Interval
                | TypeKind::Bytea
                | TypeKind::Uuid
                | TypeKind::Other,
                Value::String(s),
            ) => Ok(SqlValue::Text(s.clone())),
            (TypeKind::Other, _) => Ok(SqlValue::from_json(value)),
            _ => Err(self.mismatch(value)),
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::query(format!("{} is not a valid {} value", value, self.name))
    }

    /// Decode a text-protocol cell of this type.
    pub fn decode(&self, text: &str) -> Value {
        if self.array {
            return match parse_array(text) {
                Ok(items) => self.element().decode_items(&items),
                Err(_) => Value::String(text.to_string()),
            };
        }
        match self.kind {
            TypeKind::SmallInt | TypeKind::Integer | TypeKind::BigInt => text
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(text.to_string())),
            TypeKind::Numeric | TypeKind::Real | TypeKind::Double => decode_number(text),
            TypeKind::Boolean => Value::Bool(text == "t" || text == "true"),
            TypeKind::Json | TypeKind::Jsonb => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
            }
            TypeKind::Timestamp => decode_timestamp(text),
            _ => Value::String(text.to_string()),
        }
    }

    fn decode_items(&self, items: &[ArrayItem]) -> Value {
        Value::Array(
            items
                .iter()
                .map(|item| match item {
                    ArrayItem::Null => Value::Null,
                    ArrayItem::Text(text) => self.decode(text),
                    ArrayItem::Nested(inner) => self.decode_items(inner),
                })
                .collect(),
        )
    }
}

fn decode_number(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

/// Normalize timestamps to ISO 8601; anything chrono cannot read stays as text.
fn decode_timestamp(text: &str) -> Value {
    if let Ok(dt) = chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Value::String(dt.to_rfc3339());
    }
    match chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        Ok(naive) => Value::String(naive.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Err(_) => Value::String(text.to_string()),
    }
}

/// Column name to declared type. Table order lives in the descriptor column lists.
pub type ColumnMap = BTreeMap<String, ColumnType>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_kinds() {
        assert_eq!(ColumnType::parse("smallint").kind, TypeKind::SmallInt);
        assert_eq!(ColumnType::parse("numeric(10,2)").kind, TypeKind::Numeric);
        assert_eq!(ColumnType::parse("character varying").kind, TypeKind::Text);
        assert_eq!(ColumnType::parse("timestamp without time zone").kind, TypeKind::Timestamp);
        let arr = ColumnType::parse("Integer[]");
        assert!(arr.array);
        assert_eq!(arr.name, "integer[]");
        assert_eq!(arr.element().name, "integer");
    }

    #[test]
    fn casts_follow_operator() {
        let small = ColumnType::parse("smallint[]");
        assert_eq!(small.cast_suffix(Op::Contains, false).as_deref(), Some("::int[]"));
        assert_eq!(small.cast_suffix(Op::Equals, false).as_deref(), Some("::smallint[]"));
        assert_eq!(small.cast_suffix(Op::Equals, true).as_deref(), Some("::smallint"));
        let numeric = ColumnType::parse("numeric[]");
        assert_eq!(numeric.cast_suffix(Op::ContainedIn, false).as_deref(), Some("::numeric[]"));
        assert_eq!(numeric.cast_suffix(Op::Lt, false), None);
        assert_eq!(ColumnType::parse("jsonb").cast_suffix(Op::Contains, false), None);
    }

    #[test]
    fn operator_compatibility() {
        let degree = ColumnType::parse("smallint");
        assert!(!degree.allows(Op::Contains));
        assert!(!degree.allows(Op::StartsWith));
        assert!(degree.allows(Op::Mod));
        assert!(!ColumnType::parse("jsonb").allows(Op::Overlaps));
        assert!(ColumnType::parse("text").allows(Op::Regex));
    }

    #[test]
    fn encode_checks_values() {
        let degree = ColumnType::parse("smallint");
        assert_eq!(degree.encode(&json!(5)).unwrap(), SqlValue::Int(5));
        assert!(degree.encode(&json!("5")).is_err());
        assert!(degree.encode(&json!(1.5)).is_err());
        let tags = ColumnType::parse("jsonb");
        assert_eq!(tags.encode(&json!([1, 2])).unwrap(), SqlValue::Json(json!([1, 2])));
        let ints = ColumnType::parse("integer[]");
        assert_eq!(
            ints.encode(&json!([1, 2])).unwrap(),
            SqlValue::Array(vec![SqlValue::Int(1), SqlValue::Int(2)])
        );
        assert!(ints.encode(&json!(1)).is_err());
    }

    #[test]
    fn decode_text_cells() {
        assert_eq!(ColumnType::parse("bigint").decode("42"), json!(42));
        assert_eq!(ColumnType::parse("boolean").decode("t"), json!(true));
        assert_eq!(ColumnType::parse("jsonb").decode("[1, 2]"), json!([1, 2]));
        assert_eq!(ColumnType::parse("integer[]").decode("{1,NULL,3}"), json!([1, null, 3]));
        assert_eq!(ColumnType::parse("text[]").decode(r#"{"a,b",c}"#), json!(["a,b", "c"]));
        assert_eq!(
            ColumnType::parse("timestamp").decode("2020-01-02 03:04:05"),
            json!("2020-01-02T03:04:05")
        );
    }
}
