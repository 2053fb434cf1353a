use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::query::types::ColumnType;
use crate::search::table::TableDescriptor;

/// Which columns a search returns.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    /// Just the label column, as bare values.
    Label,
    /// Every search column.
    Search,
    /// Search and extra columns.
    #[default]
    All,
    /// `id` followed by search and extra columns.
    WithId,
    /// One column, returned as bare values.
    Column(String),
    /// The listed columns; `col[a:b]` slices array columns.
    Columns(Vec<String>),
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    /// Accepts `0`-`3`, a column name, a list of names, or a map of
    /// names to booleans (all true to include, all false to exclude).
    pub fn from_json(value: &Value) -> Result<Projection> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Projection::Label),
                Some(1) => Ok(Projection::Search),
                Some(2) => Ok(Projection::All),
                Some(3) => Ok(Projection::WithId),
                _ => Err(Error::invalid_argument(format!("Invalid projection {}", n))),
            },
            Value::String(col) => Ok(Projection::Column(col.clone())),
            Value::Array(cols) => cols
                .iter()
                .map(|c| {
                    c.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Error::invalid_argument(format!("Invalid projection column {}", c)))
                })
                .collect::<Result<Vec<_>>>()
                .map(Projection::Columns),
            Value::Object(map) => {
                let mut include = Vec::new();
                let mut exclude = Vec::new();
                for (col, keep) in map {
                    let keep = match keep {
                        Value::Bool(b) => *b,
                        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                        _ => return Err(Error::invalid_argument(format!("Invalid projection value {}", keep))),
                    };
                    if keep { include.push(col.clone()) } else { exclude.push(col.clone()) }
                }
                match (include.is_empty(), exclude.is_empty()) {
                    (false, false) => Err(Error::invalid_argument("You cannot both include and exclude.")),
                    (true, true) => Err(Error::invalid_argument("You must specify at least one key.")),
                    (false, true) => Ok(Projection::Include(include)),
                    (true, false) => Ok(Projection::Exclude(exclude)),
                }
            }
            _ => Err(Error::invalid_argument(format!("Invalid projection {}", value))),
        }
    }

    /// Results are bare values rather than records.
    pub fn is_bare(&self) -> bool {
        matches!(self, Projection::Label | Projection::Column(_))
    }
}

/// One selected column: its output key, the SQL that reads it and the type
/// used to decode it.
#[derive(Debug, Clone)]
pub struct Selected {
    pub key: String,
    pub base: String,
    pub expr: Sql,
    pub ty: ColumnType,
    pub extra: bool,
}

/// A projection resolved against a table descriptor.
#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    pub columns: Vec<Selected>,
    pub bare: bool,
}

fn slice_pattern() -> &'static Regex {
    static SLICE: OnceLock<Regex> = OnceLock::new();
    SLICE.get_or_init(|| Regex::new(r"^\[(\d*)(?::(\d*))?\]").expect("static regex"))
}

/// Translate zero-based `[a:b]` slices to PostgreSQL's one-based inclusive form.
fn slice_sql(col: &str, knife: &str, ty: &ColumnType) -> Result<(Sql, ColumnType)> {
    let mut rest: String = knife.chars().filter(|c| !c.is_whitespace()).collect();
    let mut sql = Sql::identifier(col);
    let mut all_single = true;
    while !rest.is_empty() {
        let caps = slice_pattern()
            .captures(&rest)
            .ok_or_else(|| Error::invalid_argument(format!("{} must be numeric, brackets and colons", knife)))?;
        let start = match &caps[1] {
            "" => String::new(),
            s => (s.parse::<i64>().map_err(|_| Error::invalid_argument(format!("Invalid slice {}", knife)))? + 1)
                .to_string(),
        };
        match caps.get(2) {
            Some(end) => {
                all_single = false;
                sql = sql.text(&format!("[{}:{}]", start, end.as_str()));
            }
            None => sql = sql.text(&format!("[{}]", start)),
        }
        let consumed = caps.get(0).map_or(rest.len(), |m| m.end());
        rest = rest[consumed..].to_string();
    }
    let ty = if all_single { ty.element() } else { ty.clone() };
    Ok((sql, ty))
}

impl ProjectionPlan {
    pub fn resolve(d: &TableDescriptor, projection: &Projection) -> Result<ProjectionPlan> {
        let (search, extra, include_id): (Vec<String>, Vec<String>, bool) = match projection {
            Projection::Label => (vec![d.label_column()?.to_string()], Vec::new(), false),
            Projection::Search => (d.search_cols.clone(), Vec::new(), false),
            Projection::All => (d.search_cols.clone(), d.extra_cols.clone(), false),
            Projection::WithId => (d.search_cols.clone(), d.extra_cols.clone(), true),
            Projection::Include(cols) | Projection::Exclude(cols) => {
                let including = matches!(projection, Projection::Include(_));
                let include_id = including && cols.iter().any(|c| c == "id");
                let unknown: Vec<&str> = cols
                    .iter()
                    .map(String::as_str)
                    .filter(|c| *c != "id" && !d.is_search_col(c) && !d.is_extra_col(c))
                    .collect();
                if !unknown.is_empty() {
                    return Err(Error::query(format!("{} not column of {}", unknown.join(", "), d.name)));
                }
                let pick = |all: &[String]| -> Vec<String> {
                    all.iter().filter(|c| cols.contains(c) == including).cloned().collect()
                };
                (pick(&d.search_cols), pick(&d.extra_cols), include_id)
            }
            Projection::Column(col) => Self::listed(d, std::slice::from_ref(col))?,
            Projection::Columns(cols) => {
                if cols.is_empty() {
                    return Err(Error::invalid_argument("You must specify at least one key."));
                }
                Self::listed(d, cols)?
            }
        };
        let mut columns = Vec::with_capacity(search.len() + extra.len() + 1);
        if include_id {
            columns.push(Self::select(d, "id", false)?);
        }
        for col in &search {
            columns.push(Self::select(d, col, false)?);
        }
        for col in &extra {
            columns.push(Self::select(d, col, true)?);
        }
        Ok(ProjectionPlan { columns, bare: projection.is_bare() })
    }

    fn listed(d: &TableDescriptor, cols: &[String]) -> Result<(Vec<String>, Vec<String>, bool)> {
        let mut search = Vec::new();
        let mut extra = Vec::new();
        let mut include_id = false;
        for col in cols {
            let base = col.split('[').next().unwrap_or(col);
            if d.is_search_col(base) {
                search.push(col.clone());
            } else if d.is_extra_col(base) {
                extra.push(col.clone());
            } else if col == "id" {
                include_id = true;
            } else {
                return Err(Error::query(format!("{} not column of {}", col, d.name)));
            }
        }
        Ok((search, extra, include_id))
    }

    fn select(d: &TableDescriptor, key: &str, extra: bool) -> Result<Selected> {
        let (base, knife) = match key.find('[') {
            Some(i) => (&key[..i], &key[i..]),
            None => (key, ""),
        };
        let base_type = d.column_type(base)?;
        let (expr, ty) = if knife.is_empty() {
            (Sql::identifier(base), base_type.clone())
        } else {
            slice_sql(base, knife, base_type)?
        };
        Ok(Selected { key: key.to_string(), base: base.to_string(), expr, ty, extra })
    }

    pub fn has_extras(&self) -> bool {
        self.columns.iter().any(|c| c.extra)
    }

    pub fn contains(&self, base: &str) -> bool {
        self.columns.iter().any(|c| c.key == base)
    }

    /// Add a plain column needed only for sorting; returns whether it was added.
    pub fn push_hidden(&mut self, d: &TableDescriptor, col: &str) -> Result<bool> {
        if self.contains(col) {
            return Ok(false);
        }
        let extra = d.is_extra_col(col);
        self.columns.push(Self::select(d, col, extra)?);
        Ok(true)
    }

    pub fn select_list(&self) -> Sql {
        Sql::join(", ", self.columns.iter().map(|c| c.expr.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> TableDescriptor {
        let row = vec![
            Some("nf_fields".to_string()),
            Some("label".to_string()),
            None,
            None,
            Some("f".to_string()),
            Some("f".to_string()),
            Some("t".to_string()),
            Some("t".to_string()),
            Some("0".to_string()),
            Some("f".to_string()),
        ];
        let search = [("id", "bigint"), ("label", "text"), ("degree", "smallint"), ("ramps", "integer[]")];
        let extras = [("id", "bigint"), ("zk", "jsonb")];
        let owned = |cols: &[(&str, &str)]| cols.iter().map(|(c, t)| (c.to_string(), t.to_string())).collect();
        TableDescriptor::from_meta(&row, owned(&search), owned(&extras), 1000).unwrap()
    }

    fn keys(plan: &ProjectionPlan) -> Vec<&str> {
        plan.columns.iter().map(|c| c.key.as_str()).collect()
    }

    #[test]
    fn numbered_projections() {
        let d = descriptor();
        let label = ProjectionPlan::resolve(&d, &Projection::from_json(&json!(0)).unwrap()).unwrap();
        assert_eq!(keys(&label), vec!["label"]);
        assert!(label.bare);
        let search = ProjectionPlan::resolve(&d, &Projection::Search).unwrap();
        assert_eq!(keys(&search), vec!["label", "degree", "ramps"]);
        assert!(!search.has_extras());
        let all = ProjectionPlan::resolve(&d, &Projection::WithId).unwrap();
        assert_eq!(keys(&all), vec!["id", "label", "degree", "ramps", "zk"]);
        assert!(all.has_extras());
    }

    #[test]
    fn include_and_exclude() {
        let d = descriptor();
        let inc = Projection::from_json(&json!({"degree": true, "id": 1, "zk": true})).unwrap();
        assert_eq!(keys(&ProjectionPlan::resolve(&d, &inc).unwrap()), vec!["id", "degree", "zk"]);
        let exc = Projection::from_json(&json!({"ramps": false, "zk": 0})).unwrap();
        assert_eq!(keys(&ProjectionPlan::resolve(&d, &exc).unwrap()), vec!["label", "degree"]);
        assert!(Projection::from_json(&json!({"a": true, "b": false})).is_err());
        let unknown = Projection::Include(vec!["nope".into()]);
        assert!(ProjectionPlan::resolve(&d, &unknown).is_err());
    }

    #[test]
    fn listed_columns_and_slices() {
        let d = descriptor();
        let plan = ProjectionPlan::resolve(&d, &Projection::from_json(&json!(["zk", "id", "ramps[1:3]"])).unwrap())
            .unwrap();
        assert_eq!(keys(&plan), vec!["id", "ramps[1:3]", "zk"]);
        assert_eq!(plan.select_list().to_string(), r#""id", "ramps"[2:3], "zk""#);
        assert!(plan.columns[1].ty.array);
        let single = ProjectionPlan::resolve(&d, &Projection::Column("ramps[0]".into())).unwrap();
        assert_eq!(single.select_list().to_string(), r#""ramps"[1]"#);
        assert!(!single.columns[0].ty.array);
        assert!(ProjectionPlan::resolve(&d, &Projection::Column("ramps[1;drop]".into())).is_err());
        assert!(ProjectionPlan::resolve(&d, &Projection::Column("nope".into())).is_err());
    }
}
