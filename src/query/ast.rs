use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compiled form of a query description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Equals { key: KeyPath, value: Value },             // null means IS NULL
    Operator { key: KeyPath, op: Op, value: Value },   // {"col": {"$op": value}}
    Raw { key: KeyPath, op: Op, expr: String },        // {"col": {"$raw": "a + b"}}
    And(Vec<Query>),                                   // Dict clauses and $and
    Or(Vec<Query>),                                    // $or
    Not(Box<Query>),                                   // $not
}

/// Column reference, optionally indexed into a structured or array column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath {
    pub column: String,
    pub path: Vec<PathStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStep {
    Key(String),
    Index(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Equals,
    Lte,
    Lt,
    Gte,
    Gt,
    Ne,
    Like,
    ILike,
    Regex,
    In,
    Nin,
    Exists,
    Contains,
    NotContains,
    ContainedIn,
    Overlaps,
    StartsWith,
    Mod,
    Raw,
}

impl Op {
    pub fn from_key(key: &str) -> Option<Op> {
        let op = match key {
            "$lte" => Op::Lte,
            "$lt" => Op::Lt,
            "$gte" => Op::Gte,
            "$gt" => Op::Gt,
            "$ne" => Op::Ne,
            "$like" => Op::Like,
            "$ilike" => Op::ILike,
            "$regex" => Op::Regex,
            "$in" => Op::In,
            "$nin" => Op::Nin,
            "$exists" => Op::Exists,
            "$contains" => Op::Contains,
            "$notcontains" => Op::NotContains,
            "$containedin" => Op::ContainedIn,
            "$overlaps" => Op::Overlaps,
            "$startswith" => Op::StartsWith,
            "$mod" => Op::Mod,
            "$raw" => Op::Raw,
            _ => return None,
        };
        Some(op)
    }

    /// SQL spelling of the binary comparison operators.
    pub fn infix(self) -> Option<&'static str> {
        match self {
            Op::Equals => Some("="),
            Op::Lte => Some("<="),
            Op::Lt => Some("<"),
            Op::Gte => Some(">="),
            Op::Gt => Some(">"),
            Op::Ne => Some("!="),
            Op::Like => Some("LIKE"),
            Op::ILike => Some("ILIKE"),
            Op::Regex => Some("~"),
            _ => None,
        }
    }
}

impl KeyPath {
    pub fn column(name: impl Into<String>) -> Self {
        KeyPath { column: name.into(), path: Vec::new() }
    }

    pub fn is_indexed(&self) -> bool {
        !self.path.is_empty()
    }
}

impl Query {
    pub fn and(clauses: Vec<Query>) -> Query {
        Query::And(clauses)
    }

    pub fn or(clauses: Vec<Query>) -> Query {
        Query::Or(clauses)
    }

    pub fn not(inner: Query) -> Query {
        Query::Not(Box::new(inner))
    }

    /// Base columns referenced anywhere in the query, sorted and deduplicated.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Query::Equals { key, .. } | Query::Operator { key, .. } | Query::Raw { key, .. } => {
                out.push(key.column.clone())
            }
            Query::And(clauses) | Query::Or(clauses) => {
                for clause in clauses {
                    clause.collect_columns(out);
                }
            }
            Query::Not(inner) => inner.collect_columns(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operator_keys() {
        assert_eq!(Op::from_key("$gte"), Some(Op::Gte));
        assert_eq!(Op::from_key("$eq"), None);
        assert_eq!(Op::Regex.infix(), Some("~"));
        assert_eq!(Op::In.infix(), None);
    }

    #[test]
    fn columns_are_collected_once() {
        let q = Query::and(vec![
            Query::Equals { key: KeyPath::column("degree"), value: json!(2) },
            Query::or(vec![
                Query::Equals { key: KeyPath::column("r2"), value: json!(0) },
                Query::not(Query::Equals { key: KeyPath::column("degree"), value: json!(3) }),
            ]),
        ]);
        assert_eq!(q.columns(), vec!["degree".to_string(), "r2".to_string()]);
    }
}
