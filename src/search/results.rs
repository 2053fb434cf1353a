use std::cmp::Ordering;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::connection::cursor::NamedCursor;
use crate::core::error::Result;
use crate::core::types::TextRow;
use crate::query::sort::SortKey;
use crate::search::projection::ProjectionPlan;

/// Paging facts about a bounded search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchInfo {
    pub number: i64,        // Matching rows, or a lower bound when not exact
    pub exact_count: bool,
    pub start: i64,         // Offset actually used
    pub count: Option<i64>, // Page size
}

/// Turns text rows into records following a projection.
#[derive(Debug, Clone)]
pub struct RowDecoder {
    plan: ProjectionPlan,
    hidden: Vec<String>,
    include_nones: bool,
}

impl RowDecoder {
    pub fn new(plan: ProjectionPlan, hidden: Vec<String>, include_nones: bool) -> Self {
        RowDecoder { plan, hidden, include_nones }
    }

    /// Full record including sort-only columns.
    pub fn record(&self, row: &TextRow) -> Map<String, Value> {
        let mut record = Map::new();
        for (selected, cell) in self.plan.columns.iter().zip(row) {
            let value = match cell {
                Some(text) => selected.ty.decode(text),
                None => Value::Null,
            };
            if value.is_null() && !self.include_nones && !self.plan.bare {
                continue;
            }
            record.insert(selected.key.clone(), value);
        }
        record
    }

    /// Final output: a bare value or a record without sort-only columns.
    pub fn finish(&self, mut record: Map<String, Value>) -> Value {
        if self.plan.bare {
            return self
                .plan
                .columns
                .first()
                .and_then(|c| record.remove(&c.key))
                .unwrap_or(Value::Null);
        }
        for col in &self.hidden {
            record.remove(col);
        }
        Value::Object(record)
    }

    pub fn decode(&self, row: &TextRow) -> Value {
        self.finish(self.record(row))
    }
}

/// Rows streamed from a server-side cursor.
pub struct RecordStream {
    cursor: NamedCursor,
    decoder: RowDecoder,
}

impl RecordStream {
    pub(crate) fn new(cursor: NamedCursor, decoder: RowDecoder) -> Self {
        RecordStream { cursor, decoder }
    }
}

impl Iterator for RecordStream {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next().map(|row| row.map(|r| self.decoder.decode(&r)))
    }
}

/// Output of a search: materialized for bounded searches, streamed otherwise.
pub enum Records {
    List(Vec<Value>),
    Stream(RecordStream),
}

impl Records {
    /// Collect everything, draining a stream.
    pub fn into_vec(self) -> Result<Vec<Value>> {
        match self {
            Records::List(rows) => Ok(rows),
            Records::Stream(stream) => stream.collect(),
        }
    }
}

pub struct SearchResult {
    pub records: Records,
    pub info: Option<SearchInfo>,
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// Total order on decoded values, nulls last.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (u, v) in x.iter().zip(y) {
                let ord = compare_values(u, v);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Compare two records by a sort specification.
pub fn compare_records(a: &Map<String, Value>, b: &Map<String, Value>, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let x = a.get(&key.column).unwrap_or(&Value::Null);
        let y = b.get(&key.column).unwrap_or(&Value::Null);
        let mut ord = compare_values(x, y);
        // Descending keys still put nulls last
        if key.descending && !x.is_null() && !y.is_null() {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}


impl std::fmt::Debug for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchResult").field("info", &self.info).finish_non_exhaustive()
    }
}
