use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;
use crate::query::ast::{KeyPath, Op, PathStep, Query};
use crate::query::raw::compile_raw;
use crate::query::types::{ColumnMap, ColumnType};

/// Compiles a query AST into a parameterized predicate.
///
/// `Ok(None)` means the query places no constraint on the rows.
pub struct QueryTranslator<'a> {
    pub table: &'a str,
    pub columns: &'a ColumnMap,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(table: &'a str, columns: &'a ColumnMap) -> Self {
        QueryTranslator { table, columns }
    }

    pub fn translate(&self, query: &Query) -> Result<Option<Sql>> {
        self.compile(query, true)
    }

    fn compile(&self, query: &Query, root: bool) -> Result<Option<Sql>> {
        match query {
            Query::Equals { key, value } => self.equals(key, value).map(Some),
            Query::Operator { key, op, value } => self.operator(key, *op, value),
            Query::Raw { key, op, expr } => {
                let comparison = op.infix().unwrap_or("=");
                let expr = compile_raw(expr, self.table, self.columns)?;
                Ok(Some(
                    self.key_sql(key)
                        .text(&format!(" {} (", comparison))
                        .append(expr)
                        .text(")"),
                ))
            }
            Query::And(clauses) => {
                let mut parts = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    if let Some(sql) = self.compile(clause, false)? {
                        parts.push(sql);
                    }
                }
                Ok(match parts.len() {
                    0 => None,
                    1 => parts.pop(),
                    _ if root => Some(Sql::join(" AND ", parts)),
                    _ => Some(Sql::raw("(").append(Sql::join(" AND ", parts)).text(")")),
                })
            }
            Query::Or(clauses) => {
                let mut parts = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    // One unconstrained branch makes the whole disjunction unconstrained
                    match self.compile(clause, false)? {
                        Some(sql) => parts.push(sql),
                        None => return Ok(None),
                    }
                }
                if parts.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Sql::raw("(").append(Sql::join(" OR ", parts)).text(")")))
            }
            Query::Not(inner) => Ok(Some(match self.compile(inner, false)? {
                Some(sql) => Sql::raw("NOT (").append(sql).text(")"),
                None => Sql::placeholder(SqlValue::Bool(false)),
            })),
        }
    }

    fn column_type(&self, key: &KeyPath) -> Result<&ColumnType> {
        self.columns
            .get(&key.column)
            .ok_or_else(|| Error::query(format!("{} is not a column of {}", key.column, self.table)))
    }

    /// Type of the expression `key` denotes: an array element when indexed.
    fn effective_type(&self, key: &KeyPath) -> Result<ColumnType> {
        let col_type = self.column_type(key)?;
        if key.is_indexed() && col_type.array {
            Ok(col_type.element())
        } else {
            Ok(col_type.clone())
        }
    }

    pub fn key_sql(&self, key: &KeyPath) -> Sql {
        let jsonb = self.columns.get(&key.column).is_some_and(|t| t.is_jsonb());
        let mut sql = Sql::identifier(&key.column);
        for step in &key.path {
            let literal = match step {
                PathStep::Key(k) => SqlValue::Text(k.clone()),
                PathStep::Index(i) => SqlValue::Int(*i),
            };
            sql = if jsonb {
                sql.text("->").append(Sql::literal(literal))
            } else {
                sql.text("[").append(Sql::literal(literal)).text("]")
            };
        }
        sql
    }

    fn with_cast(&self, sql: Sql, key: &KeyPath, op: Op) -> Result<Sql> {
        match self.column_type(key)?.cast_suffix(op, key.is_indexed()) {
            Some(cast) => Ok(sql.text(&cast)),
            None => Ok(sql),
        }
    }

    /// Structured columns bind documents, everything else is checked against the type.
    fn encode(&self, key: &KeyPath, value: &Value) -> Result<SqlValue> {
        if self.column_type(key)?.is_jsonb() {
            return Ok(SqlValue::Json(value.clone()));
        }
        self.effective_type(key)?.encode(value)
    }

    fn equals(&self, key: &KeyPath, value: &Value) -> Result<Sql> {
        let col = self.key_sql(key);
        if value.is_null() {
            return Ok(col.text(" IS NULL"));
        }
        let param = self.encode(key, value)?;
        self.with_cast(col.text(" = ").param(param), key, Op::Equals)
    }

    fn operator(&self, key: &KeyPath, op: Op, value: &Value) -> Result<Option<Sql>> {
        let col_type = self.column_type(key)?;
        let effective = self.effective_type(key)?;
        let jsonb = col_type.is_jsonb();
        let target = if jsonb { col_type } else { &effective };
        if !target.allows(op) {
            return Err(Error::query(format!(
                "{} cannot be applied to {} column {}",
                op_name(op),
                target.name,
                key.column
            )));
        }
        let col = self.key_sql(key);

        let sql = match op {
            Op::Exists => {
                let present = value.as_bool().unwrap_or(false);
                return Ok(Some(col.text(if present { " IS NOT NULL" } else { " IS NULL" })));
            }
            Op::Lte | Op::Lt | Op::Gte | Op::Gt | Op::Ne | Op::Like | Op::ILike | Op::Regex => {
                let infix = op.infix().unwrap_or("=");
                let param = self.encode(key, value)?;
                col.text(&format!(" {} ", infix)).param(param)
            }
            Op::In | Op::Nin => {
                let contained = if jsonb {
                    col.text(" <@ ").param(SqlValue::Json(value.clone()))
                } else {
                    let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                    let encoded = items
                        .iter()
                        .map(|v| effective.encode(v))
                        .collect::<Result<Vec<_>>>()?;
                    col.text(" = ANY(").param(SqlValue::Array(encoded)).text(")")
                };
                if op == Op::Nin {
                    Sql::raw("NOT (").append(contained).text(")")
                } else {
                    contained
                }
            }
            Op::Contains | Op::ContainedIn | Op::Overlaps => {
                let param = if jsonb {
                    SqlValue::Json(value.clone())
                } else {
                    let wrapped = match value {
                        Value::Array(_) => value.clone(),
                        other => Value::Array(vec![other.clone()]),
                    };
                    effective.encode(&wrapped)?
                };
                let symbol = match op {
                    Op::Contains => " @> ",
                    Op::ContainedIn => " <@ ",
                    _ => " && ",
                };
                col.text(symbol).param(param)
            }
            Op::NotContains => {
                let items = match value {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                if items.is_empty() {
                    return Ok(None);
                }
                let element = effective.element();
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    parts.push(if jsonb {
                        Sql::raw("NOT ")
                            .append(col.clone())
                            .text(" @> ")
                            .param(SqlValue::Json(item.clone()))
                    } else {
                        Sql::raw("NOT (")
                            .param(element.encode(item)?)
                            .text(" = ANY(")
                            .append(col.clone())
                            .text("))")
                    });
                }
                return Ok(Some(Sql::join(" AND ", parts)));
            }
            Op::StartsWith => {
                let prefix = value.as_str().unwrap_or_default();
                let pattern = format!("{}%", prefix.replace('_', r"\_").replace('%', r"\%"));
                col.text(" LIKE ").param(SqlValue::Text(pattern))
            }
            Op::Mod => {
                let pair = value.as_array().map(Vec::as_slice).unwrap_or_default();
                let (remainder, modulus) = match pair {
                    [r, m] => (r.as_i64().unwrap_or(0), m.as_i64().unwrap_or(0)),
                    _ => (0, 0),
                };
                if modulus == 0 {
                    return Err(Error::query(format!("Error building modulus operation: {}", value)));
                }
                Sql::raw("MOD(")
                    .param(SqlValue::Int(modulus))
                    .text(" + MOD(")
                    .append(col)
                    .text(", ")
                    .param(SqlValue::Int(modulus))
                    .text("), ")
                    .param(SqlValue::Int(modulus))
                    .text(") = ")
                    .param(SqlValue::Int(remainder.rem_euclid(modulus)))
            }
            Op::Equals => return self.equals(key, value).map(Some),
            Op::Raw => {
                let expr = value.as_str().unwrap_or_default();
                return self.compile(&Query::Raw { key: key.clone(), op: Op::Equals, expr: expr.to_string() }, false);
            }
        };
        self.with_cast(sql, key, op).map(Some)
    }
}

fn op_name(op: Op) -> String {
    format!("{:?}", op).to_lowercase()
}
