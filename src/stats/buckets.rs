use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::core::error::{Error, Result};
use crate::query::types::ColumnType;
use crate::stats::engine::StatsEngine;
use crate::stats::store::StatFamily;

fn singleton(col: &str, text: &str, ty: &ColumnType) -> Result<Value> {
    let value = ty.decode(text.trim());
    if ty.is_numeric() && !value.is_number() {
        return Err(Error::invalid_argument(format!("Invalid bucket bound {} for {}", text, col)));
    }
    Ok(value)
}

/// Parse one bucket: `"a"` is a single value, `"a-"` means at least `a`
/// and `"a-b"` the closed interval. A leading `-` is a sign.
pub fn parse_bucket(col: &str, bucket: &str, ty: &ColumnType) -> Result<Option<Value>> {
    if bucket.is_empty() {
        return Ok(None);
    }
    if let Some(lower) = bucket.strip_suffix('-') {
        return Ok(Some(json!({"$gte": singleton(col, lower, ty)?})));
    }
    let (sign, body) = match bucket.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", bucket),
    };
    match body.split_once('-') {
        None => Ok(Some(singleton(col, bucket, ty)?)),
        Some((a, b)) => {
            let a = singleton(col, &format!("{}{}", sign, a), ty)?;
            let b = singleton(col, b, ty)?;
            Ok(Some(json!({"$gte": a, "$lte": b})))
        }
    }
}

/// Every combination of one bucket per column, merged into `constraint`.
pub fn bucket_constraints(
    buckets: &BTreeMap<String, Vec<String>>,
    types: &BTreeMap<String, ColumnType>,
    constraint: &Map<String, Value>,
) -> Result<Vec<Map<String, Value>>> {
    let mut combos = vec![constraint.clone()];
    for (col, divisions) in buckets {
        let ty = types
            .get(col)
            .ok_or_else(|| Error::query(format!("{} is not a column", col)))?;
        let parsed = divisions
            .iter()
            .filter_map(|b| parse_bucket(col, b, ty).transpose())
            .collect::<Result<Vec<_>>>()?;
        combos = combos
            .into_iter()
            .flat_map(|base| {
                parsed.iter().map(move |value| {
                    let mut next = base.clone();
                    next.insert(col.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    Ok(combos)
}

impl<'a> StatsEngine<'a> {
    /// Add count families on `cols` with rows grouped by the given buckets.
    ///
    /// Bucketed columns act as constraints, so they are dropped from `cols`.
    pub fn add_bucketed_counts(
        &self,
        cols: &[&str],
        buckets: &BTreeMap<String, Vec<String>>,
        constraint: &Map<String, Value>,
    ) -> Result<()> {
        let d = self.descriptor();
        let kept: Vec<&str> = cols.iter().copied().filter(|c| !buckets.contains_key(*c)).collect();
        for bucketed in bucket_constraints(buckets, &d.search_types, constraint)? {
            self.add_family(&StatFamily::new(&kept).constraint(bucketed), "")?;
        }
        Ok(())
    }
}
