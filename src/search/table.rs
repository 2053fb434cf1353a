use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::connection::manager::{ConnectionListener, ConnectionManager, ExecOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::{SqlValue, TextRow};
use crate::query::cache::{CacheStats, QueryCache};
use crate::query::parser::QueryParser;
use crate::query::sort::{parse_sort, SortDefaults, SortKey};
use crate::query::translator::QueryTranslator;
use crate::query::types::{ColumnMap, ColumnType};

/// Columns of `meta_tables` read when loading a descriptor, in this order.
pub(crate) const META_TABLE_COLUMNS: &[&str] = &[
    "name",
    "label_col",
    "sort",
    "count_cutoff",
    "id_ordered",
    "out_of_order",
    "has_extras",
    "stats_valid",
    "total",
    "include_nones",
];

/// Everything known about one logical table: its columns split between the
/// search table and the extras table, plus the flags kept in `meta_tables`.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub search_cols: Vec<String>,   // table order, id excluded
    pub extra_cols: Vec<String>,
    pub col_type: ColumnMap,        // every column, id included
    pub search_types: ColumnMap,    // id and search columns; queries may only touch these
    pub label_col: Option<String>,
    pub sort: Option<Vec<SortKey>>,
    pub count_cutoff: i64,
    pub id_ordered: bool,
    pub out_of_order: bool,
    pub has_extras: bool,
    pub stats_valid: bool,
    pub total: i64,
    pub include_nones: bool,
}

fn cell(row: &TextRow, i: usize) -> Option<&str> {
    row.get(i).and_then(|c| c.as_deref())
}

fn flag(row: &TextRow, i: usize) -> bool {
    matches!(cell(row, i), Some("t") | Some("true"))
}

impl TableDescriptor {
    /// Build from a `meta_tables` row and the column lists of the search and
    /// extras tables as reported by the catalog.
    pub fn from_meta(
        row: &TextRow,
        search: Vec<(String, String)>,
        extras: Vec<(String, String)>,
        default_cutoff: i64,
    ) -> Result<TableDescriptor> {
        let name = cell(row, 0)
            .ok_or_else(|| Error::new(ErrorKind::Parse, "meta_tables row without a name".into()))?
            .to_string();
        let sort = match cell(row, 2) {
            Some(text) => {
                let keys = parse_sort(&serde_json::from_str(text)?)?;
                if keys.is_empty() { None } else { Some(keys) }
            }
            None => None,
        };
        let mut descriptor = TableDescriptor {
            name,
            search_cols: Vec::new(),
            extra_cols: Vec::new(),
            col_type: ColumnMap::new(),
            search_types: ColumnMap::new(),
            label_col: cell(row, 1).map(str::to_string),
            sort,
            count_cutoff: cell(row, 3).and_then(|c| c.parse().ok()).unwrap_or(default_cutoff),
            id_ordered: flag(row, 4),
            out_of_order: flag(row, 5),
            has_extras: flag(row, 6),
            stats_valid: flag(row, 7),
            total: cell(row, 8).and_then(|c| c.parse().ok()).unwrap_or(0),
            include_nones: flag(row, 9),
        };
        descriptor.set_columns(search, extras);
        Ok(descriptor)
    }

    pub(crate) fn set_columns(&mut self, search: Vec<(String, String)>, extras: Vec<(String, String)>) {
        self.search_cols.clear();
        self.extra_cols.clear();
        self.col_type.clear();
        self.search_types.clear();
        for (col, ty) in search {
            let ty = ColumnType::parse(&ty);
            if col != "id" {
                self.search_cols.push(col.clone());
            }
            self.search_types.insert(col.clone(), ty.clone());
            self.col_type.insert(col, ty);
        }
        for (col, ty) in extras {
            if col == "id" {
                continue;
            }
            self.extra_cols.push(col.clone());
            self.col_type.insert(col, ColumnType::parse(&ty));
        }
    }

    pub fn extras_table(&self) -> String {
        format!("{}_extras", self.name)
    }

    pub fn counts_table(&self) -> String {
        format!("{}_counts", self.name)
    }

    pub fn stats_table(&self) -> String {
        format!("{}_stats", self.name)
    }

    /// The search table and, when present, its extras table.
    pub fn data_tables(&self) -> Vec<String> {
        let mut tables = vec![self.name.clone()];
        if self.has_extras {
            tables.push(self.extras_table());
        }
        tables
    }

    /// Every table owned by this descriptor.
    pub fn all_tables(&self) -> Vec<String> {
        let mut tables = self.data_tables();
        tables.push(self.counts_table());
        tables.push(self.stats_table());
        tables
    }

    pub fn is_search_col(&self, col: &str) -> bool {
        self.search_cols.iter().any(|c| c == col)
    }

    pub fn is_extra_col(&self, col: &str) -> bool {
        self.extra_cols.iter().any(|c| c == col)
    }

    pub fn column_type(&self, col: &str) -> Result<&ColumnType> {
        self.col_type
            .get(col)
            .ok_or_else(|| Error::query(format!("{} is not a column of {}", col, self.name)))
    }

    pub fn sort_defaults(&self) -> SortDefaults<'_> {
        SortDefaults {
            declared: self.sort.as_deref(),
            id_ordered: self.id_ordered,
            out_of_order: self.out_of_order,
        }
    }

    pub fn label_column(&self) -> Result<&str> {
        self.label_col
            .as_deref()
            .ok_or_else(|| Error::invalid_state(format!("No label column for {}", self.name)))
    }
}

/// Per-table facade: searches, counts, statistics and mutations all start here.
///
/// Holds the connection manager it was built with and memoizes compiled
/// predicates until the descriptor changes or the connection is replaced.
pub struct SearchTable {
    pub(crate) conn: Arc<ConnectionManager>,
    descriptor: RwLock<TableDescriptor>,
    cache: QueryCache,
}

impl SearchTable {
    pub fn new(conn: Arc<ConnectionManager>, descriptor: TableDescriptor) -> Arc<SearchTable> {
        let cache = QueryCache::new(conn.config().compiled_cache_size);
        let table = Arc::new(SearchTable { conn, descriptor: RwLock::new(descriptor), cache });
        let listener: Weak<dyn ConnectionListener> = Arc::downgrade(&table) as Weak<dyn ConnectionListener>;
        table.conn.register(listener);
        table
    }

    /// Read the descriptor of `name` from `meta_tables` and the catalog.
    pub fn load(conn: &Arc<ConnectionManager>, name: &str) -> Result<TableDescriptor> {
        let select = Sql::format(
            "SELECT {} FROM {} WHERE name = ",
            [Sql::identifiers(META_TABLE_COLUMNS.iter().copied()), Sql::identifier("meta_tables")],
        )
        .param(SqlValue::text(name));
        let rs = conn.execute_with(&select, ExecOptions::silent())?;
        let row = rs
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{} is not in meta_tables", name)))?;
        Self::describe(conn, &row)
    }

    pub(crate) fn describe(conn: &ConnectionManager, row: &TextRow) -> Result<TableDescriptor> {
        let name = cell(row, 0).unwrap_or_default();
        let search = conn.column_types(name)?;
        let extras = if flag(row, 6) {
            conn.column_types(&format!("{}_extras", name))?
        } else {
            Vec::new()
        };
        TableDescriptor::from_meta(row, search, extras, conn.config().count_cutoff)
    }

    pub fn conn(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    pub fn name(&self) -> String {
        self.descriptor.read().name.clone()
    }

    /// A snapshot of the current descriptor.
    pub fn descriptor(&self) -> TableDescriptor {
        self.descriptor.read().clone()
    }

    pub(crate) fn update_descriptor(&self, f: impl FnOnce(&mut TableDescriptor)) {
        f(&mut self.descriptor.write());
        self.cache.clear();
    }

    /// Re-read the descriptor after a schema change or a reload swap.
    pub fn refresh(&self) -> Result<()> {
        let fresh = Self::load(&self.conn, &self.name())?;
        self.replace_descriptor(fresh);
        Ok(())
    }

    pub(crate) fn replace_descriptor(&self, descriptor: TableDescriptor) {
        *self.descriptor.write() = descriptor;
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Compile a query description to a WHERE predicate; `None` means no constraint.
    pub fn compile(&self, query: &Value) -> Result<Option<Sql>> {
        let key = QueryCache::key(query);
        if let Some(compiled) = self.cache.get(&key) {
            return Ok(compiled);
        }
        let compiled = {
            let d = self.descriptor.read();
            let parsed = QueryParser::new(&d.name, &d.search_types).parse(query)?;
            QueryTranslator::new(&d.name, &d.search_types).translate(&parsed)?
        };
        self.cache.put(key, compiled.clone());
        Ok(compiled)
    }

    /// `" WHERE ..."`, or nothing for an empty query.
    pub(crate) fn where_clause(&self, query: &Value) -> Result<Sql> {
        Ok(match self.compile(query)? {
            Some(predicate) => Sql::raw(" WHERE ").append(predicate),
            None => Sql::default(),
        })
    }
}

impl ConnectionListener for SearchTable {
    fn on_reconnect(&self, generation: u64) {
        self.cache.clear();
        debug!(table = %self.descriptor.read().name, generation, "cleared compiled queries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_row(values: &[Option<&str>]) -> TextRow {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn descriptor_from_meta() {
        let row = meta_row(&[
            Some("nf_fields"),
            Some("label"),
            Some(r#"["degree", ["disc_abs", -1]]"#),
            None,
            Some("t"),
            Some("f"),
            Some("t"),
            Some("t"),
            Some("120"),
            Some("f"),
        ]);
        let search = vec![
            ("id".to_string(), "bigint".to_string()),
            ("label".to_string(), "text".to_string()),
            ("degree".to_string(), "smallint".to_string()),
        ];
        let extras = vec![("id".to_string(), "bigint".to_string()), ("zk".to_string(), "jsonb".to_string())];
        let d = TableDescriptor::from_meta(&row, search, extras, 1000).unwrap();
        assert_eq!(d.search_cols, vec!["label", "degree"]);
        assert_eq!(d.extra_cols, vec!["zk"]);
        assert!(d.search_types.contains_key("id"));
        assert!(!d.search_types.contains_key("zk"));
        assert_eq!(d.sort.as_ref().map(|s| s.len()), Some(2));
        assert_eq!(d.count_cutoff, 1000);
        assert!(d.id_ordered && d.has_extras && !d.out_of_order);
        assert_eq!(d.total, 120);
        assert_eq!(
            d.all_tables(),
            vec!["nf_fields", "nf_fields_extras", "nf_fields_counts", "nf_fields_stats"]
        );
        assert_eq!(d.label_column().unwrap(), "label");
        assert!(d.column_type("nope").is_err());
    }
}

impl std::fmt::Debug for SearchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchTable").finish_non_exhaustive()
    }
}
