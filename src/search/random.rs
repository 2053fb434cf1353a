use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng, SeedableRng};
use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::cursor::NamedCursor;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;
use crate::search::executor::SearchOptions;
use crate::search::projection::{Projection, ProjectionPlan};
use crate::search::results::{RecordStream, Records, RowDecoder};
use crate::search::table::SearchTable;

/// How [`SearchTable::random_sample`] picks rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Random pages; fastest, but rows cluster.
    System,
    /// Each row kept independently with the given probability.
    Bernoulli,
    /// Fetch every match and choose a subset client-side.
    Choice,
}

impl SampleMode {
    pub fn parse(name: &str) -> Result<SampleMode> {
        match name.to_ascii_lowercase().as_str() {
            "system" => Ok(SampleMode::System),
            "bernoulli" => Ok(SampleMode::Bernoulli),
            "choice" => Ok(SampleMode::Choice),
            other => Err(Error::invalid_argument(format!("Unknown sample mode {}", other))),
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            SampleMode::System => "SYSTEM",
            SampleMode::Bernoulli => "BERNOULLI",
            SampleMode::Choice => "CHOICE",
        }
    }
}

fn is_empty_query(query: &Value) -> bool {
    match query {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn unsorted(projection: Projection) -> SearchOptions {
    SearchOptions { projection, sort: Some(Vec::new()), ..SearchOptions::default() }
}

impl SearchTable {
    /// One matching row chosen uniformly at random, or `None` when nothing matches.
    ///
    /// With a constraint, a cached count gives a random offset; otherwise the
    /// matching ids are listed once and their number recorded. Without one,
    /// ids are probed in `[min_id, max_id]`, which is only approximately
    /// uniform once deletions leave gaps.
    pub fn random(&self, query: &Value, projection: &Projection) -> Result<Option<Value>> {
        let mut rng = thread_rng();
        if !is_empty_query(query) {
            return match self.stats().quick_count(query, false, "")? {
                None => {
                    let pick = if *projection == Projection::Label { Projection::Label } else { Projection::Column("id".into()) };
                    let found = self.search(query, &unsorted(pick))?.records.into_vec()?;
                    self.stats().record_count(query, found.len() as i64, false, "", true)?;
                    let Some(choice) = found.choose(&mut rng).cloned() else {
                        return Ok(None);
                    };
                    if *projection == Projection::Label {
                        return Ok(Some(choice));
                    }
                    let by_id = Value::Object(Map::from_iter([("id".to_string(), choice)]));
                    self.lucky(&by_id, projection, 0, &[])
                }
                // A stale cache may hold a negative count
                Some(count) if count <= 0 => Ok(None),
                Some(count) => self.lucky(query, projection, rng.gen_range(0..count), &[]),
            };
        }
        let max_id = self.max_id("")?;
        if max_id < 0 {
            return Ok(None);
        }
        let min_id = self.min_id("")?;
        if min_id > max_id {
            return Ok(None);
        }
        let attempts = self.conn.config().random_attempts;
        for _ in 0..attempts {
            // The id may be missing after deletions
            let id = rng.gen_range(min_id..=max_id);
            let by_id = Value::Object(Map::from_iter([("id".to_string(), Value::from(id))]));
            if let Some(found) = self.lucky(&by_id, projection, 0, &[])? {
                return Ok(Some(found));
            }
        }
        Err(Error::new(
            ErrorKind::Consistency,
            format!("Random selection failed after {} attempts on {}", attempts, self.name()),
        ))
    }

    /// Choose a value of `column` uniformly first, then a random row with it.
    pub fn random_by(&self, column: &str, query: &Value, projection: &Projection) -> Result<Option<Value>> {
        let values = self.distinct(column, query)?;
        let Some(value) = values.choose(&mut thread_rng()).cloned() else {
            return Ok(None);
        };
        let mut narrowed = query.as_object().cloned().unwrap_or_default();
        narrowed.insert(column.to_string(), value);
        self.random(&Value::Object(narrowed), projection)
    }

    /// Roughly `ratio` of the matching rows.
    ///
    /// `None` picks Bernoulli sampling for large result sets and client-side
    /// choice otherwise. In the page and row sampling modes the constraint
    /// is applied after sampling, and extra columns are not available.
    pub fn random_sample(
        &self,
        ratio: f64,
        query: &Value,
        projection: &Projection,
        mode: Option<SampleMode>,
        repeatable: Option<u64>,
    ) -> Result<Records> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::invalid_argument("Ratio must be a positive number between 0 and 1"));
        }
        let mode = match mode {
            Some(mode) => mode,
            None if self.count(query)? > self.descriptor().count_cutoff => SampleMode::Bernoulli,
            None => SampleMode::Choice,
        };
        if ratio == 1.0 {
            return Ok(self.search(query, &unsorted(projection.clone()))?.records);
        }
        if mode == SampleMode::Choice {
            let mut results = self.search(query, &unsorted(projection.clone()))?.records.into_vec()?;
            let count = (results.len() as f64 * ratio) as usize;
            match repeatable {
                Some(seed) => results.shuffle(&mut StdRng::seed_from_u64(seed)),
                None => results.shuffle(&mut thread_rng()),
            }
            results.truncate(count);
            return Ok(Records::List(results));
        }

        let d = self.descriptor();
        let plan = ProjectionPlan::resolve(&d, projection)?;
        if plan.has_extras() {
            return Err(Error::invalid_argument(
                "You cannot use the system or bernoulli modes with extra columns",
            ));
        }
        let mut select = Sql::format(
            "SELECT {} FROM {} TABLESAMPLE ",
            [plan.select_list(), Sql::identifier(&d.name)],
        )
        .text(mode.keyword())
        .text("(")
        .param(SqlValue::Float(100.0 * ratio))
        .text(")");
        if let Some(seed) = repeatable {
            select = select.text(" REPEATABLE (").param(SqlValue::Int(seed as i64)).text(")");
        }
        select = select.append(self.where_clause(query)?);
        debug!(table = %d.name, mode = mode.keyword(), ratio, "sampling");
        let cursor = NamedCursor::open(&self.conn, select)?;
        Ok(Records::Stream(RecordStream::new(cursor, RowDecoder::new(plan, Vec::new(), d.include_nones))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn modes() {
        assert_eq!(SampleMode::parse("Bernoulli").unwrap(), SampleMode::Bernoulli);
        assert!(SampleMode::parse("reservoir").is_err());
        assert!(is_empty_query(&json!({})));
        assert!(!is_empty_query(&json!({"degree": 2})));
    }
}
