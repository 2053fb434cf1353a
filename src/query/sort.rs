use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::sql::Sql;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        SortKey { column: column.into(), descending: false }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        SortKey { column: column.into(), descending: true }
    }

    /// Accepts `"col"`, `["col", 1]` or `["col", -1]`.
    pub fn from_json(value: &Value) -> Result<SortKey> {
        match value {
            Value::String(col) => Ok(SortKey::asc(col.clone())),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(col), dir] if dir.as_i64() == Some(1) => Ok(SortKey::asc(col.clone())),
                [Value::String(col), dir] if dir.as_i64() == Some(-1) => Ok(SortKey::desc(col.clone())),
                _ => Err(Error::invalid_argument(format!("Invalid sort term {}", value))),
            },
            _ => Err(Error::invalid_argument(format!("Invalid sort term {}", value))),
        }
    }

    pub fn to_json(&self) -> Value {
        if self.descending {
            serde_json::json!([self.column, -1])
        } else {
            Value::String(self.column.clone())
        }
    }

    pub fn to_sql(&self) -> Sql {
        let sql = Sql::identifier(&self.column);
        if self.descending {
            sql.text(" DESC NULLS LAST")
        } else {
            sql
        }
    }
}

pub fn parse_sort(value: &Value) -> Result<Vec<SortKey>> {
    match value {
        Value::Array(terms) => terms.iter().map(SortKey::from_json).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::invalid_argument(format!("Sort must be a list, not {}", other))),
    }
}

pub fn sort_to_json(keys: &[SortKey]) -> Value {
    Value::Array(keys.iter().map(SortKey::to_json).collect())
}

pub fn sort_sql(keys: &[SortKey]) -> Sql {
    Sql::join(", ", keys.iter().map(SortKey::to_sql))
}

/// Table-level ordering facts consulted when no sort is requested.
#[derive(Debug, Clone, Copy)]
pub struct SortDefaults<'a> {
    pub declared: Option<&'a [SortKey]>,
    pub id_ordered: bool,
    pub out_of_order: bool,
}

/// Resolve the sort actually used by a search. An empty result means unsorted.
///
/// An id-ordered table is sorted by id unless the query filters on the
/// primary sort column or the ordering is known to be stale.
pub fn resolve_sort(
    requested: Option<&[SortKey]>,
    defaults: SortDefaults<'_>,
    query_columns: &[String],
    limit: Option<i64>,
    offset: i64,
) -> Vec<SortKey> {
    if let Some(sort) = requested {
        return sort.to_vec();
    }
    match defaults.declared {
        None | Some([]) => {
            let paged = limit.is_some() && !(limit == Some(1) && offset == 0);
            if paged { vec![SortKey::asc("id")] } else { Vec::new() }
        }
        Some(declared) => {
            let primary_queried = query_columns.iter().any(|c| *c == declared[0].column);
            if defaults.id_ordered && !defaults.out_of_order && !primary_queried {
                vec![SortKey::asc("id")]
            } else {
                declared.to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_and_render() {
        let keys = parse_sort(&json!(["degree", ["disc_abs", -1], ["label", 1]])).unwrap();
        assert_eq!(keys, vec![SortKey::asc("degree"), SortKey::desc("disc_abs"), SortKey::asc("label")]);
        assert_eq!(sort_sql(&keys).to_string(), r#""degree", "disc_abs" DESC NULLS LAST, "label""#);
        assert_eq!(sort_to_json(&keys), json!(["degree", ["disc_abs", -1], "label"]));
        assert!(parse_sort(&json!([["degree", 2]])).is_err());
    }

    #[test]
    fn defaults() {
        let declared = vec![SortKey::asc("degree"), SortKey::asc("disc_abs")];
        let ordered = SortDefaults { declared: Some(&declared), id_ordered: true, out_of_order: false };
        assert_eq!(resolve_sort(None, ordered, &[], Some(10), 0), vec![SortKey::asc("id")]);
        assert_eq!(resolve_sort(None, ordered, &["degree".into()], Some(10), 0), declared);
        let stale = SortDefaults { out_of_order: true, ..ordered };
        assert_eq!(resolve_sort(None, stale, &[], None, 0), declared);

        let unsorted = SortDefaults { declared: None, id_ordered: false, out_of_order: false };
        assert_eq!(resolve_sort(None, unsorted, &[], Some(1), 0), vec![]);
        assert_eq!(resolve_sort(None, unsorted, &[], Some(1), 5), vec![SortKey::asc("id")]);
        assert_eq!(resolve_sort(None, unsorted, &[], None, 0), vec![]);
        assert_eq!(resolve_sort(Some(&[]), ordered, &[], Some(10), 0), vec![]);
    }
}
