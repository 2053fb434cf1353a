use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::manager::{ConnectionManager, ExecOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::{ResultSet, SqlValue, TextRow};
use crate::search::table::{SearchTable, TableDescriptor};

/// Stat kinds stored in `{table}_stats`.
pub mod kind {
    pub const TOTAL: &str = "total";
    pub const SPLIT_TOTAL: &str = "split_total";
    pub const DISTINCT: &str = "distinct";
    pub const AVG: &str = "avg";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
}

/// Counts and statistics cache of one search table.
///
/// Count rows are keyed by the sorted column names of a query, the
/// parallel values and a split flag. Stat rows with kind `total` or
/// `split_total` double as a directory of the families materialized by
/// [`StatsEngine::add_stats`], which [`StatsEngine::refresh_stats`] replays.
pub struct StatsEngine<'a> {
    pub(crate) table: &'a SearchTable,
}

impl SearchTable {
    pub fn stats(&self) -> StatsEngine<'_> {
        StatsEngine { table: self }
    }
}

/// Split a query into its sorted keys and the parallel values, as JSON lists.
pub(crate) fn split_query(query: &Value) -> (Value, Value) {
    match query {
        Value::Object(map) if !map.is_empty() => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            let cols = pairs.iter().map(|(k, _)| Value::String((*k).clone())).collect();
            let vals = pairs.iter().map(|(_, v)| (*v).clone()).collect();
            (Value::Array(cols), Value::Array(vals))
        }
        _ => (Value::Array(Vec::new()), Value::Array(Vec::new())),
    }
}

/// Rebuild a query from parallel column and value lists.
pub(crate) fn join_query(cols: &[String], vals: &[Value]) -> Result<Map<String, Value>> {
    if cols.len() != vals.len() {
        return Err(Error::consistency(format!(
            "{} constraint columns but {} values",
            cols.len(),
            vals.len()
        )));
    }
    Ok(cols.iter().cloned().zip(vals.iter().cloned()).collect())
}

pub(crate) fn json_cell(row: &TextRow, i: usize) -> Result<Value> {
    match row.get(i).and_then(|c| c.as_deref()) {
        Some(text) => Ok(serde_json::from_str(text)?),
        None => Ok(Value::Null),
    }
}

pub(crate) fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

pub(crate) fn int_cell(row: &TextRow, i: usize) -> Option<i64> {
    row.get(i).and_then(|c| c.as_deref()).and_then(|s| s.parse().ok())
}

fn is_empty_query(query: &Value) -> bool {
    match query {
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

impl<'a> StatsEngine<'a> {
    pub(crate) fn conn(&self) -> &ConnectionManager {
        &self.table.conn
    }

    pub(crate) fn descriptor(&self) -> TableDescriptor {
        self.table.descriptor()
    }

    /// Whether computed counts are written back.
    pub fn saving(&self) -> bool {
        self.conn().config().record_counts && !self.conn().is_read_only()
    }

    /// Cached number of rows in the table.
    pub fn total(&self) -> i64 {
        self.descriptor().total
    }

    pub(crate) fn counts_table(&self, suffix: &str) -> String {
        format!("{}{}", self.descriptor().counts_table(), suffix)
    }

    pub(crate) fn stats_table(&self, suffix: &str) -> String {
        format!("{}{}", self.descriptor().stats_table(), suffix)
    }

    pub(crate) fn search_table(&self, suffix: &str) -> String {
        format!("{}{}", self.descriptor().name, suffix)
    }

    pub(crate) fn silent(&self, sql: &Sql) -> Result<ResultSet> {
        self.conn().execute_with(sql, ExecOptions::silent())
    }

    /// Write the row total to `meta_tables` and the descriptor.
    pub(crate) fn set_total(&self, total: i64) -> Result<()> {
        let name = self.table.name();
        let updater = Sql::raw("UPDATE ")
            .ident("meta_tables")
            .text(" SET total = ")
            .param(SqlValue::Int(total))
            .text(" WHERE name = ")
            .param(SqlValue::text(name));
        self.silent(&updater)?;
        self.table.update_descriptor(|d| d.total = total);
        Ok(())
    }

    /// The cached count for `query`, or `None` when it has not been recorded.
    pub fn quick_count(&self, query: &Value, split: bool, suffix: &str) -> Result<Option<i64>> {
        if is_empty_query(query) && suffix.is_empty() && !split {
            return Ok(Some(self.total()));
        }
        let (cols, vals) = split_query(query);
        let selecter = Sql::raw("SELECT count FROM ")
            .ident(&self.counts_table(suffix))
            .text(" WHERE cols = ")
            .param(SqlValue::Json(cols))
            .text(" AND values = ")
            .param(SqlValue::Json(vals))
            .text(" AND split = ")
            .param(SqlValue::Bool(split));
        Ok(self.silent(&selecter)?.scalar_i64())
    }

    /// Count rows with `COUNT(*)`, optionally caching the answer.
    pub fn slow_count(&self, query: &Value, record: bool, suffix: &str, extra: bool) -> Result<i64> {
        let selecter = Sql::raw("SELECT COUNT(*) FROM ")
            .ident(&self.search_table(suffix))
            .append(self.table.where_clause(query)?);
        let count = self.conn().execute(&selecter)?.scalar_i64().unwrap_or(0);
        if record && self.saving() {
            self.record_count(query, count, false, suffix, extra)?;
        }
        Ok(count)
    }

    /// Number of rows matching `query`, from the cache when possible.
    pub fn count(&self, query: &Value, record: bool) -> Result<i64> {
        match self.quick_count(query, false, "")? {
            Some(count) => Ok(count),
            None => self.slow_count(query, record, "", true),
        }
    }

    /// Rows per distinct value tuple of `groupby`, ordered by the tuple. Not cached.
    pub fn count_grouped(&self, query: &Value, groupby: &[&str]) -> Result<Vec<(Vec<Value>, i64)>> {
        if groupby.is_empty() {
            return Err(Error::invalid_argument("No grouping columns given"));
        }
        let d = self.descriptor();
        let types = groupby.iter().map(|c| d.column_type(c)).collect::<Result<Vec<_>>>()?;
        let cols = Sql::identifiers(groupby.iter().copied());
        let selecter = Sql::format(
            "SELECT COUNT(*), {} FROM {}",
            [cols.clone(), Sql::identifier(&d.name)],
        )
        .append(self.table.where_clause(query)?)
        .text(" GROUP BY ")
        .append(cols.clone())
        .text(" ORDER BY ")
        .append(cols);
        let rs = self.conn().execute(&selecter)?;
        Ok(rs
            .rows
            .iter()
            .map(|row| {
                let values = types
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| match row.get(i + 1).and_then(|c| c.as_deref()) {
                        Some(text) => ty.decode(text),
                        None => Value::Null,
                    })
                    .collect();
                (values, int_cell(row, 0).unwrap_or(0))
            })
            .collect())
    }

    /// Store a count in the counts table.
    ///
    /// Zero counts are only kept for single-column null queries, and an
    /// existing zero entry is deleted instead. Recording the empty query also
    /// updates the cached total. Writes refused for lack of privilege are
    /// ignored.
    pub fn record_count(&self, query: &Value, count: i64, split: bool, suffix: &str, extra: bool) -> Result<()> {
        if is_empty_query(query) && suffix.is_empty() && !self.conn().is_read_only() {
            self.set_total(count)?;
        }
        if !self.saving() {
            return Ok(());
        }
        let null_query = query.as_object().is_some_and(|m| m.len() == 1 && m.values().all(Value::is_null));
        let (cols, vals) = split_query(query);
        let counts = Sql::identifier(&self.counts_table(suffix));
        let key = Sql::raw(" WHERE cols = ")
            .param(SqlValue::Json(cols.clone()))
            .text(" AND values = ")
            .param(SqlValue::Json(vals.clone()))
            .text(" AND split = ")
            .param(SqlValue::Bool(split));
        let known = if is_empty_query(query) && suffix.is_empty() && !split {
            self.known_total()?
        } else {
            self.quick_count(query, split, suffix)?.is_some()
        };
        let updater = match (known, count == 0 && !null_query) {
            (false, true) => return Ok(()),
            (false, false) => Sql::format(
                "INSERT INTO {} (count, cols, values, split, extra) VALUES (",
                [counts],
            )
            .append(Sql::join(
                ", ",
                [
                    Sql::placeholder(SqlValue::Int(count)),
                    Sql::placeholder(SqlValue::Json(cols)),
                    Sql::placeholder(SqlValue::Json(vals)),
                    Sql::placeholder(SqlValue::Bool(split)),
                    Sql::placeholder(SqlValue::Bool(extra)),
                ],
            ))
            .text(")"),
            (true, true) => Sql::raw("DELETE FROM ").append(counts).append(key),
            (true, false) => Sql::raw("UPDATE ")
                .append(counts)
                .text(" SET count = ")
                .param(SqlValue::Int(count))
                .append(key),
        };
        match self.silent(&updater) {
            Err(err) if err.kind == ErrorKind::Permission => {
                debug!(table = %self.table.name(), "no permission to record counts");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Whether the counts table holds a row for the empty query.
    fn known_total(&self) -> Result<bool> {
        let selecter = Sql::raw("SELECT count FROM ")
            .ident(&self.counts_table(""))
            .text(" WHERE cols = '[]' AND values = '[]' AND split = false");
        Ok(!self.silent(&selecter)?.rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_and_join() {
        let (cols, vals) = split_query(&json!({"galt": 7, "degree": 6}));
        assert_eq!(cols, json!(["degree", "galt"]));
        assert_eq!(vals, json!([6, 7]));
        assert_eq!(split_query(&json!({})), (json!([]), json!([])));
        let joined = join_query(&string_list(&cols), vals.as_array().unwrap()).unwrap();
        assert_eq!(Value::Object(joined), json!({"degree": 6, "galt": 7}));
        assert!(join_query(&["a".to_string()], &[]).is_err());
    }
}
