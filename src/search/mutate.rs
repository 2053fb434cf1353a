use std::collections::BTreeSet;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::connection::locks::LockScope;
use crate::connection::manager::ExecOptions;
use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::core::types::{quote_ident, SqlValue};
use crate::query::sort::{sort_sql, SortKey};
use crate::search::table::{SearchTable, TableDescriptor};

/// Follow-up work after a data change.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub resort: bool,   // Resequence ids when the table is id-ordered
    pub reindex: bool,  // Drop indexes and primary keys around bulk inserts
    pub restat: bool,   // Regenerate statistics afterwards
    pub commit: bool,   // Commit when the outermost scope ends
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions { resort: true, reindex: false, restat: true, commit: true }
    }
}

/// Whether an upsert touched an existing row or added one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Updated(i64),
    Inserted(i64),
}

impl Upserted {
    pub fn id(self) -> i64 {
        match self {
            Upserted::Updated(id) | Upserted::Inserted(id) => id,
        }
    }
}

fn meta_update(assignments: &str, values: Vec<SqlValue>, name: &str) -> Sql {
    let mut sql = Sql::raw("UPDATE ").ident("meta_tables").text(" SET ").text(assignments).text(" = ");
    if values.len() == 1 {
        sql = sql.append(Sql::placeholder(values.into_iter().next().unwrap_or(SqlValue::Null)));
    } else {
        sql = sql
            .text("(")
            .append(Sql::join(", ", values.into_iter().map(Sql::placeholder)))
            .text(")");
    }
    sql.text(" WHERE name = ").param(SqlValue::text(name))
}

/// `SET "a" = v` or `SET ("a", "b") = (v, w)`.
fn assignments(d: &TableDescriptor, data: &[(&String, &Value)]) -> Result<Sql> {
    let values = data
        .iter()
        .map(|(col, value)| Ok(Sql::placeholder(d.column_type(col)?.encode(value)?)))
        .collect::<Result<Vec<_>>>()?;
    let cols = Sql::identifiers(data.iter().map(|(c, _)| c.as_str()));
    Ok(if data.len() == 1 {
        Sql::format(" SET {} = {}", [cols, Sql::join(", ", values)])
    } else {
        Sql::format(" SET ({}) = ({})", [cols, Sql::join(", ", values)])
    })
}

impl SearchTable {
    /// Mark cached statistics stale.
    pub(crate) fn break_stats(&self) -> Result<()> {
        let d = self.descriptor();
        if d.stats_valid {
            self.conn.execute_with(
                &meta_update("stats_valid", vec![SqlValue::Bool(false)], &d.name),
                ExecOptions::silent(),
            )?;
            self.update_descriptor(|d| d.stats_valid = false);
        }
        Ok(())
    }

    /// Record that ids may no longer follow the declared sort.
    pub(crate) fn break_order(&self) -> Result<()> {
        let d = self.descriptor();
        if !d.out_of_order {
            self.conn.execute_with(
                &meta_update("out_of_order", vec![SqlValue::Bool(true)], &d.name),
                ExecOptions::silent(),
            )?;
            self.update_descriptor(|d| d.out_of_order = true);
        }
        Ok(())
    }

    pub(crate) fn set_ordered(&self) -> Result<()> {
        let name = self.name();
        self.conn.execute_with(
            &meta_update("(id_ordered, out_of_order)", vec![SqlValue::Bool(true), SqlValue::Bool(false)], &name),
            ExecOptions::silent(),
        )?;
        self.update_descriptor(|d| {
            d.id_ordered = true;
            d.out_of_order = false;
        });
        Ok(())
    }

    /// Row total after a write that changed it by `delta`. The cached total is
    /// only adjusted when statistics were valid before the write.
    fn total_after(&self, trusted: bool, delta: i64) -> Result<i64> {
        if trusted {
            return Ok(self.descriptor().total + delta);
        }
        let rs = self.conn.execute(&Sql::raw("SELECT COUNT(*) FROM ").ident(&self.name()))?;
        Ok(rs.scalar_i64().unwrap_or(0))
    }

    pub(crate) fn lock_tables(&self, suffix: &str) -> Vec<String> {
        self.descriptor().data_tables().into_iter().map(|t| format!("{}{}", t, suffix)).collect()
    }

    pub(crate) fn check_locks(&self, suffix: &str, scope: LockScope) -> Result<()> {
        self.conn.check_locks(&self.lock_tables(suffix), scope)
    }

    /// Delete matching rows from the search table and the extras table.
    pub fn delete(&self, query: &Value, options: WriteOptions) -> Result<u64> {
        self.check_locks("", LockScope::Delete)?;
        let d = self.descriptor();
        let mut deleter = Sql::raw("DELETE FROM ").ident(&d.name).append(self.where_clause(query)?);
        if d.has_extras {
            deleter = Sql::format(
                "WITH deleted_ids AS ({} RETURNING id) DELETE FROM {} WHERE id IN (SELECT id FROM deleted_ids)",
                [deleter, Sql::identifier(&d.extras_table())],
            );
        }
        self.conn.transaction(options.commit, || {
            let trusted = self.descriptor().stats_valid;
            let deleted = self.conn.execute(&deleter)?.rows_affected;
            self.break_stats()?;
            let stats = self.stats();
            let total = self.total_after(trusted, -(deleted as i64))?;
            stats.record_count(&Value::Object(Map::new()), total, false, "", false)?;
            if options.restat && stats.saving() {
                stats.refresh_stats(false, "")?;
            }
            info!(table = %d.name, deleted, "deleted rows");
            Ok(deleted)
        })
    }

    /// Set search columns to constant values on every matching row.
    pub fn update(&self, query: &Value, changes: &Map<String, Value>, options: WriteOptions) -> Result<u64> {
        let d = self.descriptor();
        if changes.is_empty() {
            return Err(Error::invalid_argument("No changes provided"));
        }
        for col in changes.keys() {
            if d.is_extra_col(col) {
                return Err(Error::invalid_argument(format!("Updating extra column {} is not supported", col)));
            }
            if !d.is_search_col(col) {
                return Err(Error::query(format!("{} is not a column of {}", col, d.name)));
            }
        }
        let data: Vec<(&String, &Value)> = changes.iter().collect();
        let updater = Sql::raw("UPDATE ")
            .ident(&d.name)
            .append(assignments(&d, &data)?)
            .append(self.where_clause(query)?);
        self.conn.transaction(options.commit, || {
            let updated = self.conn.execute(&updater)?.rows_affected;
            self.break_order()?;
            self.break_stats()?;
            if options.resort {
                self.resort("", None)?;
            }
            if options.restat && self.stats().saving() {
                self.stats().refresh_stats(false, "")?;
            }
            Ok(updated)
        })
    }

    /// Update the single row matching `query`, or insert one with `query`
    /// and `data` combined when none matches.
    pub fn upsert(&self, query: &Map<String, Value>, data: &Map<String, Value>, commit: bool) -> Result<Upserted> {
        if query.is_empty() {
            return Err(Error::invalid_argument("Empty query"));
        }
        if data.is_empty() {
            return Err(Error::invalid_argument("No data provided"));
        }
        if data.contains_key("id") {
            return Err(Error::invalid_argument("Cannot set id"));
        }
        let d = self.descriptor();
        let mut search_data: Vec<(&String, &Value)> = Vec::new();
        let mut extras_data: Vec<(&String, &Value)> = Vec::new();
        for (col, value) in data {
            if d.is_search_col(col) {
                search_data.push((col, value));
            } else if d.is_extra_col(col) {
                extras_data.push((col, value));
            } else {
                return Err(Error::query(format!("{} is not a column of {}", col, d.name)));
            }
        }
        let query_value = Value::Object(query.clone());
        let selecter = Sql::raw("SELECT id FROM ")
            .ident(&d.name)
            .append(self.where_clause(&query_value)?)
            .text(" LIMIT 2");
        self.conn.transaction(commit, || {
            let rs = self.conn.execute(&selecter)?;
            let outcome = match rs.rows.len() {
                0 => {
                    if query.contains_key("id") {
                        return Err(Error::invalid_argument("Cannot specify an id for insertion"));
                    }
                    for (col, value) in query {
                        if !data.contains_key(col) && d.is_search_col(col) {
                            search_data.push((col, value));
                        }
                    }
                    let id = self.max_id("")? + 1;
                    let id_value = Value::from(id);
                    let id_key = "id".to_string();
                    let mut cases = vec![(d.name.clone(), search_data.clone())];
                    if d.has_extras {
                        cases.push((d.extras_table(), extras_data.clone()));
                    }
                    for (table, mut dat) in cases {
                        dat.insert(0, (&id_key, &id_value));
                        let values = dat
                            .iter()
                            .map(|(col, value)| Ok(Sql::placeholder(d.column_type(col)?.encode(value)?)))
                            .collect::<Result<Vec<_>>>()?;
                        let inserter = Sql::format(
                            "INSERT INTO {} ({}) VALUES ({})",
                            [
                                Sql::identifier(&table),
                                Sql::identifiers(dat.iter().map(|(c, _)| c.as_str())),
                                Sql::join(", ", values),
                            ],
                        );
                        self.conn.execute(&inserter)?;
                    }
                    self.break_order()?;
                    let total = self.total_after(d.stats_valid, 1)?;
                    self.stats().record_count(&Value::Object(Map::new()), total, false, "", false)?;
                    Upserted::Inserted(id)
                }
                1 => {
                    let id = rs.scalar_i64().ok_or_else(|| Error::invalid_state("Row without an id"))?;
                    let mut cases = vec![(d.name.clone(), &search_data)];
                    if d.has_extras {
                        cases.push((d.extras_table(), &extras_data));
                    }
                    for (table, dat) in cases {
                        if dat.is_empty() {
                            continue;
                        }
                        let updater = Sql::raw("UPDATE ")
                            .ident(&table)
                            .append(assignments(&d, dat)?)
                            .text(" WHERE id = ")
                            .param(SqlValue::Int(id));
                        self.conn.execute(&updater)?;
                    }
                    let sort_cols: BTreeSet<&str> =
                        d.sort.iter().flatten().map(|k| k.column.as_str()).collect();
                    if data.keys().any(|k| sort_cols.contains(k.as_str())) {
                        self.break_order()?;
                    }
                    Upserted::Updated(id)
                }
                _ => {
                    return Err(Error::invalid_argument(format!(
                        "Query {} does not specify a unique row",
                        query_value
                    )));
                }
            };
            self.break_stats()?;
            Ok(outcome)
        })
    }

    /// Insert rows that all share the same set of columns; returns the new ids.
    pub fn insert_many(&self, rows: &[Map<String, Value>], options: WriteOptions) -> Result<Vec<i64>> {
        self.check_locks("", LockScope::Insert)?;
        let Some(first) = rows.first() else {
            return Err(Error::invalid_argument("No data provided"));
        };
        let d = self.descriptor();
        let keys: BTreeSet<&String> = first.keys().collect();
        let invalid: Vec<&str> = keys
            .iter()
            .filter(|c| !d.is_search_col(c) && !d.is_extra_col(c))
            .map(|c| c.as_str())
            .collect();
        if !invalid.is_empty() {
            return Err(Error::query(format!("Input has invalid columns: {}", invalid.join(", "))));
        }
        if rows.iter().any(|r| r.keys().collect::<BTreeSet<_>>() != keys) {
            return Err(Error::invalid_argument("All dictionaries must have the same set of keys"));
        }
        let search_cols: Vec<&str> = d.search_cols.iter().map(String::as_str).filter(|c| first.contains_key(*c)).collect();
        let extra_cols: Vec<&str> = d.extra_cols.iter().map(String::as_str).filter(|c| first.contains_key(*c)).collect();
        let mut cases = vec![(d.name.clone(), search_cols)];
        if d.has_extras {
            cases.push((d.extras_table(), extra_cols));
        }

        self.conn.transaction(options.commit, || {
            let start = Instant::now();
            let base = self.max_id("")? + 1;
            let ids: Vec<i64> = (0..rows.len() as i64).map(|i| base + i).collect();
            if options.reindex {
                self.drop_pkeys("")?;
                self.drop_indexes(&[], "")?;
            }
            for (table, cols) in &cases {
                let mut tuples = Vec::with_capacity(rows.len());
                for (row, id) in rows.iter().zip(&ids) {
                    let mut values = vec![Sql::placeholder(SqlValue::Int(*id))];
                    for col in cols {
                        let value = row.get(*col).unwrap_or(&Value::Null);
                        values.push(Sql::placeholder(d.column_type(col)?.encode(value)?));
                    }
                    tuples.push(Sql::raw("(").append(Sql::join(", ", values)).text(")"));
                }
                let names = std::iter::once("id").chain(cols.iter().copied());
                let inserter = Sql::format(
                    "INSERT INTO {} ({}) VALUES {}",
                    [Sql::identifier(table), Sql::identifiers(names), Sql::join(", ", tuples)],
                );
                self.conn.execute(&inserter)?;
            }
            info!(
                table = %d.name,
                rows = rows.len(),
                elapsed = start.elapsed().as_secs_f64(),
                "inserted records"
            );
            self.break_order()?;
            let trusted = self.descriptor().stats_valid;
            self.break_stats()?;
            if options.resort {
                self.resort("", None)?;
            }
            if options.reindex {
                self.restore_pkeys("")?;
                self.restore_indexes(&[], "")?;
            }
            let stats = self.stats();
            let total = self.total_after(trusted, rows.len() as i64)?;
            stats.record_count(&Value::Object(Map::new()), total, false, "", false)?;
            if options.restat && stats.saving() {
                stats.refresh_stats(false, "")?;
            }
            Ok(ids)
        })
    }

    /// Resequence ids to follow the sort order, through a temporary sorter table.
    ///
    /// Without a suffix this only runs when the table is id-ordered and out of
    /// order, and marks it ordered afterwards. Returns false when there is no
    /// sort order to follow.
    pub fn resort(&self, suffix: &str, sort: Option<&[SortKey]>) -> Result<bool> {
        let d = self.descriptor();
        let Some(order) = sort.map(<[SortKey]>::to_vec).or_else(|| d.sort.clone()) else {
            warn!(table = %d.name, "resort failed, no sort order given");
            return Ok(false);
        };
        if suffix.is_empty() && !(d.id_ordered && d.out_of_order) {
            if d.id_ordered {
                info!(table = %d.name, "already sorted");
            } else {
                info!(table = %d.name, "table is not id-ordered");
            }
            return Ok(true);
        }
        self.check_locks(suffix, LockScope::All)?;
        let search_table = format!("{}{}", d.name, suffix);
        let sorter = format!("{}{}_sorter", d.name, suffix);
        let sequence = format!("{}_newid_seq", sorter);
        let mut tables = vec![search_table.clone()];
        if d.has_extras {
            tables.push(format!("{}{}", d.extras_table(), suffix));
        }
        self.conn.transaction(true, || {
            let start = Instant::now();
            self.conn.execute(
                &Sql::raw("CREATE TEMP SEQUENCE ").ident(&sequence).text(" MINVALUE 0 START 0 CACHE 10000"),
            )?;
            self.conn.execute(
                &Sql::raw("CREATE TEMP TABLE ")
                    .ident(&sorter)
                    .text(" (oldid bigint, newid bigint NOT NULL DEFAULT nextval(")
                    .param(SqlValue::Text(quote_ident(&sequence)))
                    .text(")) ON COMMIT DROP"),
            )?;
            self.conn.execute(
                &Sql::raw("ALTER SEQUENCE ").ident(&sequence).text(" OWNED BY ").ident(&sorter).text(".newid"),
            )?;
            self.conn.execute(&Sql::format(
                "INSERT INTO {} SELECT id as oldid FROM {} ORDER BY {}",
                [Sql::identifier(&sorter), Sql::identifier(&search_table), sort_sql(&order)],
            ))?;
            self.drop_pkeys(suffix)?;
            for table in &tables {
                let (t, s) = (Sql::identifier(table), Sql::identifier(&sorter));
                self.conn.execute(&Sql::format(
                    "UPDATE {} SET id = {}.newid FROM {} WHERE {}.id = {}.oldid",
                    [t.clone(), s.clone(), s.clone(), t, s],
                ))?;
            }
            self.restore_pkeys(suffix)?;
            if suffix.is_empty() {
                self.set_ordered()?;
            }
            info!(table = %search_table, elapsed = start.elapsed().as_secs_f64(), "resorted");
            Ok(true)
        })
    }
}
