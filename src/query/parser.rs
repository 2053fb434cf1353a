use serde_json::{Map, Value};

use crate::core::error::{Error, Result};
use crate::query::ast::{KeyPath, Op, PathStep, Query};
use crate::query::types::ColumnMap;

/// Validates a query description against a table's searchable columns and
/// builds the AST.
///
/// Keys of a description are visited in sorted order so the same description
/// always produces the same tree.
pub struct QueryParser<'a> {
    pub table: &'a str,
    pub columns: &'a ColumnMap,
}

impl<'a> QueryParser<'a> {
    pub fn new(table: &'a str, columns: &'a ColumnMap) -> Self {
        QueryParser { table, columns }
    }

    pub fn parse(&self, description: &Value) -> Result<Query> {
        match description {
            Value::Object(map) => self.parse_dict(map, None),
            Value::Null => Ok(Query::And(Vec::new())),
            other => Err(Error::query(format!("Query must be a dictionary, not {}", other))),
        }
    }

    fn parse_dict(&self, map: &Map<String, Value>, outer: Option<&KeyPath>) -> Result<Query> {
        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            if key.is_empty() {
                return Err(Error::query("Error building query: empty key"));
            }
            if key.starts_with('$') {
                clauses.push(self.parse_special(key, value, outer)?);
                continue;
            }
            let path = self.key_path(key)?;
            match value {
                Value::Object(inner) if inner.keys().all(|k| k.starts_with('$')) => {
                    clauses.push(self.parse_dict(inner, Some(&path))?);
                }
                _ => clauses.push(Query::Equals { key: path, value: value.clone() }),
            }
        }
        if clauses.len() == 1 {
            Ok(clauses.remove(0))
        } else {
            Ok(Query::And(clauses))
        }
    }

    /// A clause nested under `$and`, `$or` or `$not`.
    fn parse_clause(&self, value: &Value, outer: Option<&KeyPath>) -> Result<Query> {
        match (value, outer) {
            (Value::Object(map), _) => self.parse_dict(map, outer),
            (_, Some(key)) => Ok(Query::Equals { key: key.clone(), value: value.clone() }),
            (_, None) => Err(Error::query(format!("Error building query: {} is not a dictionary", value))),
        }
    }

    fn parse_special(&self, key: &str, value: &Value, outer: Option<&KeyPath>) -> Result<Query> {
        match key {
            "$or" | "$and" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| Error::query(format!("Error building query: {} requires a list", key)))?;
                let clauses = items
                    .iter()
                    .map(|item| self.parse_clause(item, outer))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(if key == "$or" { Query::Or(clauses) } else { Query::And(clauses) });
            }
            "$not" => return Ok(Query::not(self.parse_clause(value, outer)?)),
            _ => {}
        }

        let op = Op::from_key(key).ok_or_else(|| Error::query(format!("Error building query: {}", key)))?;
        let column = outer
            .ok_or_else(|| Error::query(format!("Error building query: {} must be applied to a column", key)))?
            .clone();

        if let Value::Object(inner) = value {
            if inner.len() == 1 && op != Op::Raw {
                if let Some(expr) = inner.get("$raw") {
                    if op.infix().is_none() {
                        return Err(Error::query(format!("Error building query: {} (in $raw)", key)));
                    }
                    return Ok(Query::Raw { key: column, op, expr: raw_text(expr)? });
                }
            }
        }

        match op {
            Op::Raw => return Ok(Query::Raw { key: column, op: Op::Equals, expr: raw_text(value)? }),
            Op::Exists if !value.is_boolean() => {
                return Err(Error::query(format!("$exists requires true or false, not {}", value)));
            }
            Op::Mod => {
                let valid = matches!(value.as_array().map(|v| v.as_slice()),
                    Some([r, m]) if r.is_i64() && m.as_i64().is_some_and(|m| m != 0));
                if !valid {
                    return Err(Error::query(format!("Error building modulus operation: {}", value)));
                }
            }
            Op::In | Op::Nin if !value.is_array() => {
                return Err(Error::query(format!("{} requires a list, not {}", key, value)));
            }
            Op::StartsWith | Op::Like | Op::ILike | Op::Regex if !value.is_string() => {
                return Err(Error::query(format!("{} requires a string, not {}", key, value)));
            }
            _ => {}
        }
        Ok(Query::Operator { key: column, op, value: value.clone() })
    }

    fn key_path(&self, key: &str) -> Result<KeyPath> {
        let mut parts = key.split('.');
        let column = parts.next().unwrap_or_default();
        let col_type = self
            .columns
            .get(column)
            .ok_or_else(|| Error::query(format!("{} is not a column of {}", column, self.table)))?;
        let path: Vec<PathStep> = parts
            .map(|p| match p.parse::<i64>() {
                Ok(i) if p.bytes().all(|b| b.is_ascii_digit()) => PathStep::Index(i),
                _ => PathStep::Key(p.to_string()),
            })
            .collect();
        if !path.is_empty() && !col_type.is_jsonb() {
            let all_indexes = path.iter().all(|s| matches!(s, PathStep::Index(_)));
            if !col_type.array || !all_indexes {
                return Err(Error::query(format!("Cannot index into {} column {}", col_type.name, key)));
            }
        }
        Ok(KeyPath { column: column.to_string(), path })
    }
}

fn raw_text(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::query(format!("$raw requires a string, not {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::ColumnType;
    use serde_json::json;

    fn columns() -> ColumnMap {
        [("id", "bigint"), ("degree", "smallint"), ("tags", "jsonb"), ("ramps", "integer[]"), ("label", "text")]
            .into_iter()
            .map(|(n, t)| (n.to_string(), ColumnType::parse(t)))
            .collect()
    }

    fn parse(q: Value) -> Result<Query> {
        let cols = columns();
        QueryParser::new("nf_fields", &cols).parse(&q)
    }

    #[test]
    fn operator_maps_push_column_down() {
        let q = parse(json!({"degree": {"$or": [{"$lte": 2}, 7]}})).unwrap();
        assert_eq!(
            q,
            Query::Or(vec![
                Query::Operator { key: KeyPath::column("degree"), op: Op::Lte, value: json!(2) },
                Query::Equals { key: KeyPath::column("degree"), value: json!(7) },
            ])
        );
    }

    #[test]
    fn dotted_paths() {
        let q = parse(json!({"tags.a.0": 1})).unwrap();
        assert_eq!(
            q,
            Query::Equals {
                key: KeyPath {
                    column: "tags".into(),
                    path: vec![PathStep::Key("a".into()), PathStep::Index(0)],
                },
                value: json!(1),
            }
        );
        assert!(parse(json!({"ramps.x": 1})).is_err());
        assert!(parse(json!({"degree.1": 1})).is_err());
    }

    #[test]
    fn raw_under_comparison() {
        let q = parse(json!({"degree": {"$lt": {"$raw": "ramps + 1"}}})).unwrap();
        assert_eq!(q, Query::Raw { key: KeyPath::column("degree"), op: Op::Lt, expr: "ramps + 1".into() });
        assert!(parse(json!({"degree": {"$in": {"$raw": "1"}}})).is_err());
    }

    #[test]
    fn rejects_unknown() {
        let err = parse(json!({"conductor": 5})).unwrap_err();
        assert_eq!(err.context, "conductor is not a column of nf_fields");
        assert!(parse(json!({"degree": {"$eq": 5}})).is_err());
        assert!(parse(json!({"$gte": 5})).is_err());
        assert!(parse(json!({"degree": {"$mod": [1, 0]}})).is_err());
        assert!(parse(json!({"": 1})).is_err());
        assert!(parse(json!([1])).is_err());
    }

    #[test]
    fn empty_descriptions() {
        assert_eq!(parse(json!({})).unwrap(), Query::And(vec![]));
        assert_eq!(parse(json!({"degree": {}})).unwrap(), Query::And(vec![]));
    }
}
