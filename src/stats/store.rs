use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;
use crate::query::types::TypeKind;
use crate::search::results::compare_values;
use crate::stats::engine::{int_cell, join_query, json_cell, kind, split_query, string_list, StatsEngine};

const INSERT_BATCH: usize = 1000;
const LARGE_FAMILY: usize = 10_000;

/// One materialized family of counts, as recorded in the directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatFamily {
    pub cols: Vec<String>,
    pub constraint: Map<String, Value>,
    pub threshold: Option<i64>,
    pub split: bool,
}

impl StatFamily {
    pub fn new(cols: &[&str]) -> Self {
        StatFamily {
            cols: cols.iter().map(|c| c.to_string()).collect(),
            constraint: Map::new(),
            threshold: None,
            split: false,
        }
    }

    pub fn constraint(mut self, constraint: Map<String, Value>) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn threshold(mut self, threshold: i64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn split(mut self) -> Self {
        self.split = true;
        self
    }
}

/// What [`StatsEngine::status`] reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatsStatus {
    pub families: Vec<StatFamily>,
    pub extra_counts: BTreeMap<Vec<String>, usize>, // Ad hoc counts per column tuple
    pub stats_rows: i64,
    pub counts_rows: i64, // Counts written by add_stats
}

/// A value recorded in place of a query operator map, such as `{"$gte": 3}`.
fn is_operator_value(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.keys().all(|k| k.starts_with('$')))
}

fn cartesian(lists: &[Vec<Value>]) -> Vec<Vec<Value>> {
    lists.iter().fold(vec![Vec::new()], |acc, list| {
        acc.iter()
            .flat_map(|prefix| {
                list.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item.clone());
                    next
                })
            })
            .collect()
    })
}

fn threshold_value(threshold: Option<i64>) -> SqlValue {
    threshold.map_or(SqlValue::Null, SqlValue::Int)
}

impl<'a> StatsEngine<'a> {
    /// Whether a family has been materialized.
    ///
    /// With `at_most` a family stored with a lower threshold also counts.
    pub(crate) fn has_stats(&self, family: &StatFamily, at_most: bool, suffix: &str) -> Result<bool> {
        let (ccols, cvals) = split_query(&Value::Object(family.constraint.clone()));
        let stat = if family.split { kind::SPLIT_TOTAL } else { kind::TOTAL };
        let mut selecter = Sql::raw("SELECT 1 FROM ")
            .ident(&self.stats_table(suffix))
            .text(" WHERE cols = ")
            .param(SqlValue::Json(Value::from(family.cols.clone())))
            .text(" AND stat = ")
            .param(SqlValue::text(stat))
            .text(" AND constraint_cols = ")
            .param(SqlValue::Json(ccols))
            .text(" AND constraint_values = ")
            .param(SqlValue::Json(cvals));
        selecter = match family.threshold {
            None => selecter.text(" AND threshold IS NULL"),
            Some(t) if at_most => selecter
                .text(" AND (threshold IS NULL OR threshold <= ")
                .param(SqlValue::Int(t))
                .text(")"),
            Some(t) => selecter.text(" AND threshold = ").param(SqlValue::Int(t)),
        };
        Ok(!self.silent(&selecter)?.rows.is_empty())
    }

    fn insert_rows(&self, table: &str, cols: &[&str], rows: Vec<Vec<SqlValue>>) -> Result<()> {
        for chunk in rows.chunks(INSERT_BATCH) {
            let tuples = chunk.iter().map(|row| {
                Sql::raw("(")
                    .append(Sql::join(", ", row.iter().cloned().map(Sql::placeholder)))
                    .text(")")
            });
            let inserter = Sql::format(
                "INSERT INTO {} ({}) VALUES {}",
                [
                    Sql::identifier(table),
                    Sql::identifiers(cols.iter().copied()),
                    Sql::join(", ", tuples),
                ],
            );
            self.silent(&inserter)?;
        }
        Ok(())
    }

    /// Materialize counts for every value tuple of `cols` under `constraint`.
    ///
    /// Writes one count row per tuple whose count reaches `threshold`, a
    /// directory entry and, for a single numeric column, its average,
    /// minimum and maximum. With `split` each list value is counted once per
    /// element. Returns false when nothing was written: no row matched, the
    /// family already exists or the connection is read-only.
    pub fn add_stats(
        &self,
        cols: &[&str],
        constraint: Option<&Map<String, Value>>,
        threshold: Option<i64>,
        split: bool,
    ) -> Result<bool> {
        let mut family = StatFamily::new(cols);
        family.constraint = constraint.cloned().unwrap_or_default();
        family.threshold = threshold;
        family.split = split;
        self.add_family(&family, "")
    }

    pub(crate) fn add_family(&self, family: &StatFamily, suffix: &str) -> Result<bool> {
        if self.conn().is_read_only() {
            info!(table = %self.table.name(), "read only mode, not recording stats");
            return Ok(false);
        }
        if family.split && family.threshold.is_some() {
            return Err(Error::invalid_argument("split_list and threshold not simultaneously supported"));
        }
        if family.constraint.keys().any(|k| k.starts_with('$')) {
            return Err(Error::invalid_argument("Top level special keys not allowed"));
        }
        let d = self.descriptor();
        let mut family = family.clone();
        family.cols.sort();
        for col in &family.cols {
            if !d.is_search_col(col) {
                return Err(Error::query(format!("{} is not a search column of {}", col, d.name)));
            }
        }
        if self.has_stats(&family, false, suffix)? {
            info!(table = %d.name, cols = ?family.cols, "statistics already exist");
            return Ok(false);
        }
        let start = Instant::now();
        let constraint = Value::Object(family.constraint.clone());
        let mut allcols: Vec<String> = family.cols.iter().chain(family.constraint.keys()).cloned().collect();
        allcols.sort();
        allcols.dedup();

        let mut predicates: Vec<Sql> = family
            .cols
            .iter()
            .map(|c| Sql::identifier(c).text(" IS NOT NULL"))
            .collect();
        if let Some(predicate) = self.table.compile(&constraint)? {
            predicates.push(predicate);
        }
        let types = family.cols.iter().map(|c| d.column_type(c)).collect::<Result<Vec<_>>>()?;
        let group = Sql::identifiers(family.cols.iter().map(String::as_str));
        let mut selecter = if family.cols.is_empty() {
            Sql::raw("SELECT COUNT(*) FROM ").ident(&self.search_table(suffix))
        } else {
            Sql::format("SELECT {}, COUNT(*) FROM ", [group.clone()]).ident(&self.search_table(suffix))
        };
        if !predicates.is_empty() {
            selecter = selecter.text(" WHERE ").append(Sql::join(" AND ", predicates));
        }
        if !family.cols.is_empty() {
            selecter = selecter.text(" GROUP BY ").append(group);
        }
        if let Some(t) = family.threshold {
            selecter = selecter.text(" HAVING COUNT(*) >= ").append(Sql::literal(SqlValue::Int(t)));
        }
        info!(table = %d.name, cols = ?family.cols, constraint = %constraint, threshold = ?family.threshold, split = family.split, "adding stats");

        let one_numeric = types.len() == 1
            && !types[0].array
            && matches!(
                types[0].kind,
                TypeKind::Numeric | TypeKind::BigInt | TypeKind::Integer | TypeKind::SmallInt | TypeKind::Double
            );
        let rs = self.silent(&selecter)?;
        if rs.rows.is_empty() {
            info!(table = %d.name, elapsed = start.elapsed().as_secs_f64(), "no rows exceeded the threshold");
            return Ok(false);
        }

        let jallcols = Value::from(allcols.clone());
        let mut total: i64 = 0;
        let mut weighted = 0.0;
        let mut extremes: Option<(Value, Value)> = None;
        let mut plain: Vec<(Value, i64)> = Vec::new();
        let mut split_counts: BTreeMap<String, (Value, i64)> = BTreeMap::new();
        for row in &rs.rows {
            let count = int_cell(row, family.cols.len()).unwrap_or(0);
            let colvals: Vec<Value> = types
                .iter()
                .enumerate()
                .map(|(i, ty)| match row.get(i).and_then(|c| c.as_deref()) {
                    Some(text) => ty.decode(text),
                    None => Value::Null,
                })
                .collect();
            let allvals: Vec<Value> = allcols
                .iter()
                .map(|col| match family.cols.iter().position(|c| c == col) {
                    Some(i) => colvals[i].clone(),
                    None => family.constraint.get(col).cloned().unwrap_or(Value::Null),
                })
                .collect();
            if family.split {
                let listed: Vec<Vec<Value>> = allvals
                    .iter()
                    .map(|v| match v {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    })
                    .collect();
                for vals in cartesian(&listed) {
                    let vals = Value::from(vals);
                    total += count;
                    split_counts.entry(vals.to_string()).or_insert((vals, 0)).1 += count;
                }
            } else {
                total += count;
                plain.push((Value::from(allvals), count));
            }
            if one_numeric {
                let v = &colvals[0];
                weighted += v.as_f64().unwrap_or(0.0) * count as f64;
                extremes = Some(match extremes {
                    None => (v.clone(), v.clone()),
                    Some((lo, hi)) => {
                        let lo = if compare_values(v, &lo).is_lt() { v.clone() } else { lo };
                        let hi = if compare_values(v, &hi).is_gt() { v.clone() } else { hi };
                        (lo, hi)
                    }
                });
            }
        }

        let (ccols, cvals) = split_query(&constraint);
        let jcols = Value::from(family.cols.clone());
        let stat_row = |stat: &str, value: SqlValue| {
            vec![
                SqlValue::Json(jcols.clone()),
                SqlValue::text(stat),
                value,
                SqlValue::Json(ccols.clone()),
                SqlValue::Json(cvals.clone()),
                threshold_value(family.threshold),
            ]
        };
        let mut stats = vec![stat_row(
            if family.split { kind::SPLIT_TOTAL } else { kind::TOTAL },
            SqlValue::Int(total),
        )];
        if let (Some((lo, hi)), true) = (extremes, total != 0) {
            stats.push(stat_row(kind::AVG, SqlValue::Float(weighted / total as f64)));
            stats.push(stat_row(kind::MIN, SqlValue::from_json(&lo)));
            stats.push(stat_row(kind::MAX, SqlValue::from_json(&hi)));
        }
        self.conn().transaction(false, || {
            self.insert_rows(
                &self.stats_table(suffix),
                &["cols", "stat", "value", "constraint_cols", "constraint_values", "threshold"],
                stats,
            )?;
            let counts: Vec<Vec<SqlValue>> = if family.split {
                split_counts
                    .into_values()
                    .map(|(vals, count)| {
                        vec![
                            SqlValue::Json(jallcols.clone()),
                            SqlValue::Json(vals),
                            SqlValue::Int(count),
                            SqlValue::Bool(true),
                            SqlValue::Bool(false),
                        ]
                    })
                    .collect()
            } else {
                plain
                    .into_iter()
                    .map(|(vals, count)| {
                        vec![
                            SqlValue::Json(jallcols.clone()),
                            SqlValue::Json(vals),
                            SqlValue::Int(count),
                            SqlValue::Bool(false),
                            SqlValue::Bool(false),
                        ]
                    })
                    .collect()
            };
            if counts.len() > LARGE_FAMILY {
                warn!(
                    table = %self.counts_table(suffix),
                    rows = counts.len(),
                    cols = %jallcols,
                    "many count rows inserted for one family, consider clearing and rebuilding stats"
                );
            }
            self.insert_rows(&self.counts_table(suffix), &["cols", "values", "count", "split", "extra"], counts)
        })?;
        info!(table = %d.name, elapsed = start.elapsed().as_secs_f64(), "added stats");
        Ok(true)
    }

    /// Counts of every value tuple taken by `cols`, materializing them first
    /// when needed. Keys follow the sorted column order and leave out the
    /// constraint columns.
    pub fn column_counts(
        &self,
        cols: &[&str],
        constraint: Option<&Map<String, Value>>,
        threshold: Option<i64>,
        split: bool,
    ) -> Result<Vec<(Vec<Value>, i64)>> {
        let mut family = StatFamily::new(cols);
        family.cols.sort();
        family.constraint = constraint.cloned().unwrap_or_default();
        family.threshold = threshold;
        family.split = split;
        if !self.has_stats(&family, true, "")? {
            self.add_family(&family, "")?;
        }
        let mut allcols: Vec<String> = family.cols.iter().chain(family.constraint.keys()).cloned().collect();
        allcols.sort();
        allcols.dedup();
        let mut selecter = Sql::raw("SELECT values, count FROM ")
            .ident(&self.counts_table(""))
            .text(" WHERE cols = ")
            .param(SqlValue::Json(Value::from(allcols.clone())))
            .text(" AND split = ")
            .param(SqlValue::Bool(split));
        if let Some(t) = threshold {
            selecter = selecter.text(" AND count >= ").append(Sql::literal(SqlValue::Int(t)));
        }
        let rs = self.silent(&selecter)?;
        let kept: Vec<usize> = allcols
            .iter()
            .enumerate()
            .filter(|(_, c)| !family.constraint.contains_key(*c))
            .map(|(i, _)| i)
            .collect();
        let mut out = Vec::new();
        for row in &rs.rows {
            let values = json_cell(row, 0)?;
            let values = values.as_array().cloned().unwrap_or_default();
            let matches_constraint = allcols.iter().zip(&values).all(|(col, v)| match family.constraint.get(col) {
                Some(expected) => expected == v,
                None => !is_operator_value(v),
            });
            if !matches_constraint {
                continue;
            }
            let key = kept.iter().filter_map(|&i| values.get(i).cloned()).collect();
            out.push((key, int_cell(row, 1).unwrap_or(0)));
        }
        Ok(out)
    }

    /// Like [`StatsEngine::column_counts`] for one column, with bare keys.
    pub fn value_counts(&self, col: &str, constraint: Option<&Map<String, Value>>) -> Result<Vec<(Value, i64)>> {
        Ok(self
            .column_counts(&[col], constraint, Some(1), false)?
            .into_iter()
            .map(|(mut key, count)| (key.pop().unwrap_or(Value::Null), count))
            .collect())
    }

    fn quick_extreme(&self, col: &str, constraint: &Value, stat: &str) -> Result<Option<Value>> {
        let (ccols, cvals) = split_query(constraint);
        let selecter = Sql::raw("SELECT value FROM ")
            .ident(&self.stats_table(""))
            .text(" WHERE stat = ")
            .param(SqlValue::text(stat))
            .text(" AND cols = ")
            .param(SqlValue::Json(Value::from(vec![col])))
            .text(" AND threshold IS NULL AND constraint_cols = ")
            .param(SqlValue::Json(ccols))
            .text(" AND constraint_values = ")
            .param(SqlValue::Json(cvals));
        let rs = self.silent(&selecter)?;
        let ty = self.descriptor().column_type(col)?.clone();
        Ok(rs.first().map(|row| match row.first().and_then(|c| c.as_deref()) {
            Some(text) => ty.decode(text),
            None => Value::Null,
        }))
    }

    fn slow_extreme(&self, col: &str, constraint: &Value, stat: &str) -> Result<Value> {
        let d = self.descriptor();
        let ty = d.column_type(col)?.clone();
        let base = Sql::format("SELECT {} FROM {}", [Sql::identifier(col), Sql::identifier(&d.name)])
            .append(self.table.where_clause(constraint)?)
            .text(" ORDER BY ")
            .ident(col);
        let fetch = |sql: Sql| -> Result<Value> {
            let rs = self.conn().execute(&sql)?;
            Ok(rs.scalar().map_or(Value::Null, |text| ty.decode(text)))
        };
        if stat == kind::MIN {
            return fetch(base.text(" LIMIT 1"));
        }
        let found = fetch(base.clone().text(" DESC LIMIT 1"))?;
        if !found.is_null() {
            return Ok(found);
        }
        // Nulls sort first when descending
        fetch(base.text(" DESC NULLS LAST LIMIT 1"))
    }

    fn record_extreme(&self, col: &str, constraint: &Value, value: &Value, stat: &str) -> Result<()> {
        let (ccols, cvals) = split_query(constraint);
        let row = vec![
            SqlValue::Json(Value::from(vec![col])),
            SqlValue::text(stat),
            SqlValue::from_json(value),
            SqlValue::Json(ccols),
            SqlValue::Json(cvals),
        ];
        match self.insert_rows(
            &self.stats_table(""),
            &["cols", "stat", "value", "constraint_cols", "constraint_values"],
            vec![row],
        ) {
            Err(err) if err.kind == ErrorKind::Permission => {
                debug!(table = %self.table.name(), "no permission to record {}", stat);
                Ok(())
            }
            other => other,
        }
    }

    fn extreme(&self, col: &str, constraint: &Value, stat: &str, record: bool) -> Result<Value> {
        let d = self.descriptor();
        if !d.is_search_col(col) {
            return Err(Error::query(format!("{} not a column of {}", col, d.name)));
        }
        if let Some(found) = self.quick_extreme(col, constraint, stat)? {
            return Ok(found);
        }
        let found = self.slow_extreme(col, constraint, stat)?;
        if record && self.saving() && found.is_number() {
            self.record_extreme(col, constraint, &found, stat)?;
        }
        Ok(found)
    }

    /// Largest value of a search column, `Null` when there is none.
    /// For `id` this is the row count.
    pub fn max(&self, col: &str, constraint: &Value, record: bool) -> Result<Value> {
        if col == "id" {
            return Ok(Value::from(self.count(&Value::Object(Map::new()), record)?));
        }
        self.extreme(col, constraint, kind::MAX, record)
    }

    pub fn min(&self, col: &str, constraint: &Value, record: bool) -> Result<Value> {
        self.extreme(col, constraint, kind::MIN, record)
    }

    pub fn quick_count_distinct(&self, cols: &[&str], query: &Value, suffix: &str) -> Result<Option<i64>> {
        let (ccols, cvals) = split_query(query);
        let selecter = Sql::raw("SELECT value FROM ")
            .ident(&self.stats_table(suffix))
            .text(" WHERE stat = ")
            .param(SqlValue::text(kind::DISTINCT))
            .text(" AND cols = ")
            .param(SqlValue::Json(Value::from(cols.to_vec())))
            .text(" AND constraint_cols = ")
            .param(SqlValue::Json(ccols))
            .text(" AND constraint_values = ")
            .param(SqlValue::Json(cvals));
        Ok(self.silent(&selecter)?.scalar_i64())
    }

    /// Number of distinct value tuples taken by `cols` under `query`.
    pub fn count_distinct(&self, cols: &[&str], query: &Value, record: bool) -> Result<i64> {
        if let Some(count) = self.quick_count_distinct(cols, query, "")? {
            return Ok(count);
        }
        let d = self.descriptor();
        let selecter = Sql::format(
            "SELECT COUNT(*) FROM (SELECT DISTINCT {} FROM {}",
            [Sql::identifiers(cols.iter().copied()), Sql::identifier(&d.name)],
        )
        .append(self.table.where_clause(query)?)
        .text(") AS temp");
        let count = self.conn().execute(&selecter)?.scalar_i64().unwrap_or(0);
        if record && self.saving() {
            let (ccols, cvals) = split_query(query);
            let row = vec![
                SqlValue::Int(count),
                SqlValue::Json(Value::from(cols.to_vec())),
                SqlValue::text(kind::DISTINCT),
                SqlValue::Json(ccols),
                SqlValue::Json(cvals),
            ];
            let recorded = self.insert_rows(
                &self.stats_table(""),
                &["value", "cols", "stat", "constraint_cols", "constraint_values"],
                vec![row],
            );
            if let Err(err) = recorded {
                if err.kind != ErrorKind::Permission {
                    return Err(err);
                }
            }
        }
        Ok(count)
    }

    /// Families listed in the directory of the stats table with `suffix`.
    pub fn families(&self, suffix: &str) -> Result<Vec<StatFamily>> {
        let selecter = Sql::raw("SELECT cols, constraint_cols, constraint_values, threshold, stat FROM ")
            .ident(&self.stats_table(suffix))
            .text(" WHERE stat IN (")
            .param(SqlValue::text(kind::TOTAL))
            .text(", ")
            .param(SqlValue::text(kind::SPLIT_TOTAL))
            .text(")");
        let rs = self.silent(&selecter)?;
        rs.rows
            .iter()
            .map(|row| {
                let ccols = string_list(&json_cell(row, 1)?);
                let cvals = json_cell(row, 2)?.as_array().cloned().unwrap_or_default();
                Ok(StatFamily {
                    cols: string_list(&json_cell(row, 0)?),
                    constraint: join_query(&ccols, &cvals)?,
                    threshold: int_cell(row, 3),
                    split: row.get(4).and_then(|c| c.as_deref()) == Some(kind::SPLIT_TOTAL),
                })
            })
            .collect()
    }

    /// Counts recorded from live requests rather than by `add_stats`, grouped by column tuple.
    pub fn extra_counts(&self, suffix: &str) -> Result<BTreeMap<Vec<String>, Vec<(Vec<Value>, i64)>>> {
        let selecter = Sql::raw("SELECT cols, values, count FROM ")
            .ident(&self.counts_table(suffix))
            .text(" WHERE extra = 't'");
        let rs = self.silent(&selecter)?;
        let mut out: BTreeMap<Vec<String>, Vec<(Vec<Value>, i64)>> = BTreeMap::new();
        for row in &rs.rows {
            let cols = string_list(&json_cell(row, 0)?);
            let values = json_cell(row, 1)?.as_array().cloned().unwrap_or_default();
            out.entry(cols).or_default().push((values, int_cell(row, 2).unwrap_or(0)));
        }
        Ok(out)
    }

    /// Recompute every family in the directory and every extra count, into
    /// the tables with `suffix`. With `total` the row total is recounted.
    pub fn refresh_stats(&self, total: bool, suffix: &str) -> Result<()> {
        let name = self.table.name();
        info!(table = %name, suffix, "refreshing statistics");
        let start = Instant::now();
        self.conn().transaction(true, || {
            let families = self.families("")?;
            let extras = self.extra_counts("")?;
            self.silent(&Sql::raw("DELETE FROM ").ident(&self.stats_table(suffix)))?;
            self.silent(&Sql::raw("DELETE FROM ").ident(&self.counts_table(suffix)))?;
            for family in &families {
                self.add_family(family, suffix)?;
            }
            for (cols, entries) in &extras {
                for (values, _) in entries {
                    let query = Value::Object(join_query(cols, values)?);
                    if self.quick_count(&query, false, suffix)?.is_none() {
                        self.slow_count(&query, true, suffix, true)?;
                    }
                }
            }
            if total {
                self.slow_count(&Value::Object(Map::new()), true, suffix, false)?;
            }
            Ok(())
        })?;
        info!(table = %name, elapsed = start.elapsed().as_secs_f64(), "refreshed statistics");
        Ok(())
    }

    pub fn status(&self) -> Result<StatsStatus> {
        let families = self.families("")?;
        let extra_counts = self
            .extra_counts("")?
            .into_iter()
            .map(|(cols, entries)| (cols, entries.len()))
            .collect();
        let counts_rows = self
            .silent(&Sql::raw("SELECT COUNT(*) FROM ").ident(&self.counts_table("")).text(" WHERE extra = false"))?
            .scalar_i64()
            .unwrap_or(0);
        let stats_rows = self
            .silent(&Sql::raw("SELECT COUNT(*) FROM ").ident(&self.stats_table("")))?
            .scalar_i64()
            .unwrap_or(0);
        Ok(StatsStatus { families, extra_counts, stats_rows, counts_rows })
    }

    /// Delete all stats, and all counts unless `keep_extra`.
    pub fn clear_stats(&self, keep_extra: bool, suffix: &str) -> Result<()> {
        self.conn().transaction(true, || {
            self.silent(&Sql::raw("DELETE FROM ").ident(&self.stats_table(suffix)))?;
            let mut deleter = Sql::raw("DELETE FROM ").ident(&self.counts_table(suffix));
            if keep_extra {
                deleter = deleter.text(" WHERE extra IS NOT TRUE");
            }
            self.silent(&deleter)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operator_values_are_recognized() {
        assert!(is_operator_value(&json!({"$gte": 3, "$lte": 5})));
        assert!(!is_operator_value(&json!({"a": 1})));
        assert!(!is_operator_value(&json!([1, 2])));
    }

    #[test]
    fn cartesian_product() {
        let lists = vec![vec![json!(1), json!(2)], vec![json!("a")]];
        assert_eq!(cartesian(&lists), vec![vec![json!(1), json!("a")], vec![json!(2), json!("a")]]);
        assert_eq!(cartesian(&[]), vec![Vec::<Value>::new()]);
    }
}
