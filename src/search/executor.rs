use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::cursor::NamedCursor;
use crate::connection::manager::ExecOptions;
use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;
use crate::query::sort::{resolve_sort, sort_sql, SortKey};
use crate::search::projection::{Projection, ProjectionPlan};
use crate::search::results::{compare_records, RecordStream, Records, RowDecoder, SearchInfo, SearchResult};
use crate::search::table::{SearchTable, TableDescriptor};

/// Options for [`SearchTable::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub projection: Projection,
    pub limit: Option<i64>,         // None streams every match through a cursor
    pub offset: i64,
    pub sort: Option<Vec<SortKey>>, // None uses the table default; empty means unsorted
    pub one_per: Vec<String>,       // Keep the first row per distinct value of these columns
    pub split_ors: bool,            // Run each branch of a top-level $or separately
    pub info: bool,                 // Report paging information
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            projection: Projection::Search,
            limit: None,
            offset: 0,
            sort: None,
            one_per: Vec::new(),
            split_ors: false,
            info: false,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        SearchOptions::default()
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn one_per(mut self, cols: &[&str]) -> Self {
        self.one_per = cols.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn split_ors(mut self) -> Self {
        self.split_ors = true;
        self
    }

    pub fn with_info(mut self) -> Self {
        self.info = true;
        self
    }
}

pub(crate) fn top_level_keys(query: &Value) -> Vec<String> {
    query.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default()
}

fn is_special(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

/// Break a top-level `$or` into standalone queries sharing the other keys.
///
/// A branch that pins a column to a different literal than the rest of the
/// query can never match and is dropped. Branches are ordered by the value
/// they give the primary sort column.
pub fn split_ors(query: &Value, sort: &[SortKey]) -> Result<Vec<Value>> {
    let mut base = match query {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => return Err(Error::query(format!("Query must be a dictionary, not {}", other))),
    };
    let Some(ors) = base.remove("$or") else {
        return Ok(vec![Value::Object(base)]);
    };
    let branches = ors
        .as_array()
        .ok_or_else(|| Error::query("$or must be a list"))?;
    let mut queries = Vec::with_capacity(branches.len());
    'branches: for branch in branches {
        let branch = branch
            .as_object()
            .ok_or_else(|| Error::query(format!("{} is not a dictionary", branch)))?;
        let mut merged = base.clone();
        for (key, value) in branch {
            match merged.get(key) {
                Some(existing) if existing != value => {
                    if !is_special(existing) && !is_special(value) {
                        continue 'branches;
                    }
                    let both = serde_json::json!({"$and": [value, existing]});
                    merged.insert(key.clone(), both);
                }
                _ => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        queries.push(Value::Object(merged));
    }
    if !sort.is_empty() {
        let empty = Map::new();
        queries.sort_by(|a, b| {
            let (x, y) = (a.as_object().unwrap_or(&empty), b.as_object().unwrap_or(&empty));
            compare_records(x, y, &sort[..1])
        });
    }
    Ok(queries)
}

struct Statement<'a> {
    plan: &'a ProjectionPlan,
    table: Sql,
    sort: &'a [SortKey],
    one_per: &'a [String],
}

impl Statement<'_> {
    fn build(&self, where_: Sql, limit: Option<i64>, offset: i64) -> Sql {
        let mut tail = Sql::default();
        if !self.sort.is_empty() {
            tail = tail.text(" ORDER BY ").append(sort_sql(self.sort));
        }
        if let Some(limit) = limit {
            tail = tail.text(" LIMIT ").param(SqlValue::Int(limit));
            if offset != 0 {
                tail = tail.text(" OFFSET ").param(SqlValue::Int(offset));
            }
        }
        if self.one_per.is_empty() {
            return Sql::format("SELECT {} FROM {}{}{}", [self.plan.select_list(), self.table.clone(), where_, tail]);
        }
        let mut inner: Vec<&str> = Vec::new();
        for col in &self.plan.columns {
            if !inner.contains(&col.base.as_str()) {
                inner.push(&col.base);
            }
        }
        let mut inner_sort: Vec<SortKey> = self.one_per.iter().map(SortKey::asc).collect();
        inner_sort.extend(self.sort.iter().filter(|k| !self.one_per.contains(&k.column)).cloned());
        Sql::format(
            "SELECT {} FROM (SELECT DISTINCT ON ({}) {} FROM {}{} ORDER BY {}) temp{}",
            [
                self.plan.select_list(),
                Sql::identifiers(self.one_per.iter().map(String::as_str)),
                Sql::identifiers(inner),
                self.table.clone(),
                where_,
                sort_sql(&inner_sort),
                tail,
            ],
        )
    }
}

impl SearchTable {
    pub(crate) fn table_clause(d: &TableDescriptor, with_extras: bool) -> Sql {
        if with_extras {
            Sql::format("{} JOIN {} USING (id)", [Sql::identifier(&d.name), Sql::identifier(&d.extras_table())])
        } else {
            Sql::identifier(&d.name)
        }
    }

    /// Search the table.
    ///
    /// With a limit, results are materialized and, when requested, paging
    /// information is reported: the count comes from the counts cache when
    /// present, otherwise from prefetching up to `count_cutoff` rows, in which
    /// case it may be a lower bound. Without a limit, rows stream from a
    /// server-side cursor.
    pub fn search(&self, query: &Value, options: &SearchOptions) -> Result<SearchResult> {
        self.search_page(query, options, true)
    }

    /// One search; `redirect` allows a single move to the last page when
    /// the offset overshoots.
    fn search_page(&self, query: &Value, options: &SearchOptions, redirect: bool) -> Result<SearchResult> {
        if options.offset < 0 {
            return Err(Error::invalid_argument("Offset cannot be negative"));
        }
        if options.limit.is_none() && options.split_ors {
            return Err(Error::invalid_argument("split_ors only supported when a limit is provided"));
        }
        if let Some(limit) = options.limit {
            if limit <= 0 {
                return Err(Error::invalid_argument("Limit must be positive"));
            }
        }
        let d = self.descriptor();
        let mut plan = ProjectionPlan::resolve(&d, &options.projection)?;
        let where_ = self.where_clause(query)?;
        let sort = resolve_sort(
            options.sort.as_deref(),
            d.sort_defaults(),
            &top_level_keys(query),
            options.limit,
            options.offset,
        );
        for col in &options.one_per {
            if !d.is_search_col(col) {
                return Err(Error::query(format!("{} is not a search column of {}", col, d.name)));
            }
        }
        let mut hidden = Vec::new();
        if options.split_ors || !options.one_per.is_empty() {
            for key in &sort {
                if plan.push_hidden(&d, &key.column)? {
                    hidden.push(key.column.clone());
                }
            }
        }
        let statement = Statement {
            plan: &plan,
            table: Self::table_clause(&d, plan.has_extras()),
            sort: &sort,
            one_per: &options.one_per,
        };
        let decoder = RowDecoder::new(plan.clone(), hidden, d.include_nones);

        let Some(limit) = options.limit else {
            let cursor = NamedCursor::open(&self.conn, statement.build(where_, None, options.offset))?;
            let info = if options.info {
                Some(SearchInfo {
                    number: self.count(query)?,
                    exact_count: true,
                    start: options.offset,
                    count: None,
                })
            } else {
                None
            };
            return Ok(SearchResult { records: Records::Stream(RecordStream::new(cursor, decoder)), info });
        };

        let offset = options.offset;
        let mut nres = if options.one_per.is_empty() {
            self.stats().quick_count(query, false, "")?
        } else {
            None
        };
        let mut split = if options.split_ors { split_ors(query, &sort)? } else { Vec::new() };
        if split.len() > 1 && !options.one_per.is_empty() {
            return Err(Error::invalid_argument("split_ors and one_per not compatible"));
        }
        if split.len() <= 1 {
            split.clear();
        }

        let exact_count;
        let results: Vec<Value>;
        // Set when the count is only `offset + fetched rows`
        let mut counted_by_fetch = false;
        if !split.is_empty() {
            let prelimit = match nres {
                None => (limit + offset).max(d.count_cutoff),
                Some(_) => limit + offset,
            };
            let mut exact = true;
            let mut total = 0i64;
            let mut merged = Vec::new();
            for branch in &split {
                let rs = self.conn.execute(&statement.build(self.where_clause(branch)?, Some(prelimit), 0))?;
                if rs.rows.len() as i64 == prelimit && nres.is_none() {
                    exact = false;
                }
                total += rs.rows.len() as i64;
                merged.extend(rs.rows.iter().map(|row| decoder.record(row)));
            }
            merged.sort_by(|a, b| compare_records(a, b, &sort));
            results = merged
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|r| decoder.finish(r))
                .collect();
            if nres.is_none() {
                nres = Some(if exact { total } else { total.min(d.count_cutoff) });
            }
            exact_count = exact;
            debug!(table = %d.name, branches = split.len(), total, "merged split $or");
        } else {
            let prelimit = if nres.is_some() { limit } else { limit.max(d.count_cutoff - offset) };
            let rs = self.conn.execute(&statement.build(where_, Some(prelimit), offset))?;
            let fetched = rs.rows.len() as i64;
            exact_count = match nres {
                Some(_) => true,
                None => {
                    counted_by_fetch = true;
                    nres = Some(offset + fetched);
                    fetched < prelimit
                }
            };
            results = rs.rows.iter().take(limit as usize).map(|row| decoder.decode(row)).collect();
        }

        let number = nres.unwrap_or(0);
        if !options.info {
            return Ok(SearchResult { records: Records::List(results), info: None });
        }
        if redirect && offset > 0 && offset >= number {
            // Past the end: show the last page instead. A count inferred from
            // an empty fetch only bounds the total, so count exactly.
            let total = if counted_by_fetch { self.count(query)? } else { number };
            if total <= 0 {
                return Ok(SearchResult {
                    records: Records::List(Vec::new()),
                    info: Some(SearchInfo { number: 0, exact_count: true, start: 0, count: Some(limit) }),
                });
            }
            let adjusted = SearchOptions { offset: ((total - 1) / limit) * limit, ..options.clone() };
            return self.search_page(query, &adjusted, false);
        }
        Ok(SearchResult {
            records: Records::List(results),
            info: Some(SearchInfo { number, exact_count, start: offset, count: Some(limit) }),
        })
    }

    /// At most one matching row; unsorted unless `sort` is given.
    pub fn lucky(&self, query: &Value, projection: &Projection, offset: i64, sort: &[SortKey]) -> Result<Option<Value>> {
        if offset < 0 {
            return Err(Error::invalid_argument("Offset cannot be negative"));
        }
        let d = self.descriptor();
        let plan = ProjectionPlan::resolve(&d, projection)?;
        let where_ = self.where_clause(query)?;
        let statement = Statement {
            plan: &plan,
            table: Self::table_clause(&d, plan.has_extras()),
            sort,
            one_per: &[],
        };
        let rs = self.conn.execute(&statement.build(where_, Some(1), offset))?;
        let decoder = RowDecoder::new(plan.clone(), Vec::new(), d.include_nones);
        Ok(rs.first().map(|row| decoder.decode(row)))
    }

    /// The row whose label column equals `label`.
    pub fn lookup(&self, label: &str, projection: &Projection) -> Result<Option<Value>> {
        let label_col = self.descriptor().label_column()?.to_string();
        let query = Value::Object(Map::from_iter([(label_col, Value::String(label.to_string()))]));
        self.lucky(&query, projection, 0, &[])
    }

    pub fn exists(&self, query: &Value) -> Result<bool> {
        Ok(self.lucky(query, &Projection::Column("id".into()), 0, &[])?.is_some())
    }

    pub fn label_exists(&self, label: &str) -> Result<bool> {
        Ok(self.lookup(label, &Projection::Column("id".into()))?.is_some())
    }

    /// Distinct values of a search column over matching rows, in order.
    pub fn distinct(&self, col: &str, query: &Value) -> Result<Vec<Value>> {
        let d = self.descriptor();
        if !d.is_search_col(col) && col != "id" {
            return Err(Error::query(format!("{} is not a search column of {}", col, d.name)));
        }
        let ty = d.column_type(col)?.clone();
        let select = Sql::format(
            "SELECT DISTINCT {} FROM {}{} ORDER BY {}",
            [Sql::identifier(col), Sql::identifier(&d.name), self.where_clause(query)?, Sql::identifier(col)],
        );
        let rs = self.conn.execute(&select)?;
        Ok(rs
            .rows
            .iter()
            .map(|row| match row.first().and_then(|c| c.as_deref()) {
                Some(text) => ty.decode(text),
                None => Value::Null,
            })
            .collect())
    }

    /// Largest id in the search table (or a suffixed copy), -1 when empty.
    pub fn max_id(&self, suffix: &str) -> Result<i64> {
        let table = format!("{}{}", self.name(), suffix);
        let rs = self.conn.execute_with(&Sql::raw("SELECT MAX(id) FROM ").ident(&table), ExecOptions::silent())?;
        Ok(rs.scalar_i64().unwrap_or(-1))
    }

    /// Smallest id, 0 when empty.
    pub fn min_id(&self, suffix: &str) -> Result<i64> {
        let table = format!("{}{}", self.name(), suffix);
        let rs = self.conn.execute_with(&Sql::raw("SELECT MIN(id) FROM ").ident(&table), ExecOptions::silent())?;
        Ok(rs.scalar_i64().unwrap_or(0))
    }

    /// Row count, through the counts cache.
    pub fn count(&self, query: &Value) -> Result<i64> {
        self.stats().count(query, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_ors_merges_and_drops() {
        let query = json!({"degree": 2, "$or": [{"r2": 0}, {"degree": 3}, {"degree": {"$gt": 1}}, {"r2": 1}]});
        let split = split_ors(&query, &[SortKey::desc("r2")]).unwrap();
        assert_eq!(split.len(), 3);
        assert_eq!(split[0], json!({"degree": 2, "r2": 1}));
        assert_eq!(split[1], json!({"degree": 2, "r2": 0}));
        assert_eq!(split[2], json!({"degree": {"$and": [{"$gt": 1}, 2]}}));
        assert_eq!(split_ors(&json!({"a": 1}), &[]).unwrap(), vec![json!({"a": 1})]);
        assert!(split_ors(&json!({"$or": 5}), &[]).is_err());
    }
}
