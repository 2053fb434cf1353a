use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::info;

use crate::connection::locks::LockScope;
use crate::connection::manager::ExecOptions;
use crate::core::database::Database;
use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;
use crate::query::sort::{sort_to_json, SortKey};
use crate::query::types::ColumnMap;
use crate::schema::catalog::{MetaCatalog, MetaKind};
use crate::schema::whitelist::check_type;
use crate::search::table::{SearchTable, TableDescriptor};

pub(crate) const COUNTS_COLUMNS: &[(&str, &str)] = &[
    ("cols", "jsonb"),
    ("values", "jsonb"),
    ("count", "bigint"),
    ("extra", "boolean"),
    ("split", "boolean DEFAULT FALSE"),
];

pub(crate) const STATS_COLUMNS: &[(&str, &str)] = &[
    ("cols", "jsonb"),
    ("stat", "text COLLATE \"C\""),
    ("value", "numeric"),
    ("constraint_cols", "jsonb"),
    ("constraint_values", "jsonb"),
    ("threshold", "integer"),
];

/// Suffixes of the tables paired with a search table.
pub const TABLE_SUFFIXES: [&str; 4] = ["", "_extras", "_counts", "_stats"];

/// Description of a table to create.
///
/// Columns are grouped by declared type; without an explicit order they
/// appear in the order the groups were added. An `id bigint` column is
/// prepended unless one is listed.
#[derive(Debug, Clone, Default)]
pub struct NewTable {
    pub name: String,
    pub search_columns: Vec<(String, Vec<String>)>,
    pub extra_columns: Option<Vec<(String, Vec<String>)>>,
    pub label_col: Option<String>,
    pub sort: Option<Vec<SortKey>>,
    pub id_ordered: Option<bool>,     // Defaults to whether a sort is given
    pub search_order: Option<Vec<String>>,
    pub extra_order: Option<Vec<String>>,
}

impl NewTable {
    pub fn new(name: &str) -> Self {
        NewTable { name: name.to_string(), ..Default::default() }
    }

    pub fn search(mut self, declared_type: &str, columns: &[&str]) -> Self {
        self.search_columns
            .push((declared_type.to_string(), columns.iter().map(|c| c.to_string()).collect()));
        self
    }

    pub fn extra(mut self, declared_type: &str, columns: &[&str]) -> Self {
        self.extra_columns
            .get_or_insert_with(Vec::new)
            .push((declared_type.to_string(), columns.iter().map(|c| c.to_string()).collect()));
        self
    }

    pub fn label(mut self, column: &str) -> Self {
        self.label_col = Some(column.to_string());
        self
    }

    pub fn sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn id_ordered(mut self, ordered: bool) -> Self {
        self.id_ordered = Some(ordered);
        self
    }

    pub fn search_order(mut self, order: &[&str]) -> Self {
        self.search_order = Some(order.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn extra_order(mut self, order: &[&str]) -> Self {
        self.extra_order = Some(order.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// Flatten type groups into ordered (column, type) pairs, id first.
fn process_columns(groups: &[(String, Vec<String>)], order: Option<&[String]>) -> Result<Vec<(String, String)>> {
    let mut listed: Vec<(String, String)> = Vec::new();
    let mut seen = BTreeSet::new();
    for (declared, cols) in groups {
        check_type(declared)?;
        for col in cols {
            if !seen.insert(col.clone()) {
                return Err(Error::invalid_argument(format!("Column {} repeated", col)));
            }
            listed.push((col.clone(), declared.clone()));
        }
    }
    if let Some(order) = order {
        if let Some(unknown) = order.iter().find(|c| !seen.contains(*c)) {
            return Err(Error::invalid_argument(format!("Column {} does not exist", unknown)));
        }
        if order.len() != seen.len() {
            return Err(Error::invalid_argument("Must include all columns"));
        }
        listed.sort_by_key(|(col, _)| order.iter().position(|c| c == col));
    }
    if !seen.contains("id") {
        listed.insert(0, ("id".to_string(), "bigint".to_string()));
    }
    Ok(listed)
}

pub(crate) fn column_defs<S: AsRef<str>>(columns: &[(S, S)]) -> Sql {
    // Types are whitelisted before they reach this point
    Sql::join(
        ", ",
        columns.iter().map(|(col, ty)| Sql::identifier(col.as_ref()).text(" ").text(ty.as_ref())),
    )
}

/// Regroup a live table's columns into single-column type groups.
fn regroup(cols: &[String], types: &ColumnMap) -> Vec<(String, Vec<String>)> {
    cols.iter()
        .filter_map(|col| types.get(col).map(|ty| (ty.name.clone(), vec![col.clone()])))
        .collect()
}

/// Creates, drops and renames search tables and their metadata.
pub struct SchemaManager<'a> {
    db: &'a Database,
}

impl<'a> SchemaManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        SchemaManager { db }
    }

    pub fn catalog(&self) -> MetaCatalog<'a> {
        MetaCatalog::new(self.db.conn())
    }

    /// Bootstrap the three metadata directories and their histories.
    pub fn create_meta_tables(&self) -> Result<Vec<String>> {
        self.catalog().create_tables()
    }

    fn run_silent(&self, sql: &Sql) -> Result<()> {
        self.db.conn().execute_with(sql, ExecOptions::silent())?;
        Ok(())
    }

    /// Create a search table together with its counts and stats tables and,
    /// when extra columns are given, its extras table.
    ///
    /// Every name and type is validated before any statement is issued.
    pub fn create_table(&self, spec: NewTable) -> Result<Arc<SearchTable>> {
        let start = Instant::now();
        let name = spec.name.as_str();
        if self.db.has_table(name) {
            return Err(Error::invalid_argument(format!("{} already exists", name)));
        }
        if !name.contains('_') {
            return Err(Error::invalid_argument(
                "Table name must contain an underscore; the first part names the section",
            ));
        }
        let search = process_columns(&spec.search_columns, spec.search_order.as_deref())?;
        let extras = match &spec.extra_columns {
            Some(groups) => Some(process_columns(groups, spec.extra_order.as_deref())?),
            None => None,
        };
        let search_names: BTreeSet<&str> = search.iter().map(|(c, _)| c.as_str()).collect();
        if let Some(label) = &spec.label_col {
            if !search_names.contains(label.as_str()) {
                return Err(Error::invalid_argument("label_col must be a search column"));
            }
        }
        for key in spec.sort.iter().flatten() {
            if !search_names.contains(key.column.as_str()) {
                return Err(Error::invalid_argument(format!("Column {} does not exist", key.column)));
            }
        }
        let sort = spec.sort.clone().filter(|s| !s.is_empty());
        let id_ordered = spec.id_ordered.unwrap_or(sort.is_some());
        let has_extras = extras.is_some();
        let conn = self.db.conn();

        conn.transaction(true, || {
            conn.execute(&Sql::format("CREATE TABLE {} ({})", [Sql::identifier(name), column_defs(&search)]))?;
            if let Some(extras) = &extras {
                conn.execute(&Sql::format(
                    "CREATE TABLE {} ({})",
                    [Sql::identifier(&format!("{}_extras", name)), column_defs(extras)],
                ))?;
            }
            for (suffix, columns) in [("_counts", COUNTS_COLUMNS), ("_stats", STATS_COLUMNS)] {
                conn.execute(&Sql::format(
                    "CREATE TABLE {} ({})",
                    [Sql::identifier(&format!("{}{}", name, suffix)), column_defs(columns)],
                ))?;
            }
            let inserter = Sql::raw(
                "INSERT INTO meta_tables (name, sort, id_ordered, out_of_order, has_extras, label_col, total, stats_valid, important, include_nones) VALUES (",
            )
            .append(Sql::join(
                ", ",
                [
                    SqlValue::text(name),
                    sort.as_deref().map_or(SqlValue::Null, |s| SqlValue::Json(sort_to_json(s))),
                    SqlValue::Bool(id_ordered),
                    SqlValue::Bool(!id_ordered),
                    SqlValue::Bool(has_extras),
                    spec.label_col.clone().map_or(SqlValue::Null, SqlValue::Text),
                    SqlValue::Int(0),
                    SqlValue::Bool(true),
                    SqlValue::Bool(false),
                    SqlValue::Bool(false),
                ]
                .into_iter()
                .map(Sql::placeholder),
            ))
            .text(")");
            self.run_silent(&inserter)
        })?;

        let mut descriptor = TableDescriptor {
            name: name.to_string(),
            search_cols: Vec::new(),
            extra_cols: Vec::new(),
            col_type: ColumnMap::new(),
            search_types: ColumnMap::new(),
            label_col: spec.label_col.clone(),
            sort,
            count_cutoff: conn.config().count_cutoff,
            id_ordered,
            out_of_order: !id_ordered,
            has_extras,
            stats_valid: true,
            total: 0,
            include_nones: false,
        };
        descriptor.set_columns(search, extras.unwrap_or_default());
        let table = SearchTable::new(Arc::clone(conn), descriptor);
        self.db.register(Arc::clone(&table));
        info!(table = name, elapsed = start.elapsed().as_secs_f64(), "created table");
        Ok(table)
    }

    /// Copy the schema of `existing` (columns, label, sort and ordering)
    /// without its data, indexes or statistics.
    pub fn create_table_like(&self, new_name: &str, existing: &str) -> Result<Arc<SearchTable>> {
        let d = self.db.table(existing)?.descriptor();
        let mut spec = NewTable::new(new_name);
        spec.search_columns = regroup(&d.search_cols, &d.col_type);
        spec.search_order = Some(d.search_cols.clone());
        if d.has_extras {
            spec.extra_columns = Some(regroup(&d.extra_cols, &d.col_type));
            spec.extra_order = Some(d.extra_cols.clone());
        }
        spec.label_col = d.label_col.clone();
        spec.sort = d.sort.clone();
        spec.id_ordered = Some(d.id_ordered);
        self.create_table(spec)
    }

    pub fn is_important(&self, name: &str) -> Result<bool> {
        let selecter = Sql::raw("SELECT important FROM meta_tables WHERE name = ").param(SqlValue::text(name));
        let rs = self.db.conn().execute_with(&selecter, ExecOptions::silent())?;
        Ok(matches!(rs.scalar(), Some("t") | Some("true")))
    }

    /// Drop a table, its paired tables, backups and metadata.
    ///
    /// Tables marked important are refused until the flag is cleared with
    /// [`SearchTable::set_importance`].
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let table = self.db.table(name)?;
        if self.is_important(name)? {
            return Err(Error::invalid_state(format!(
                "{} is marked important; clear the flag with set_importance before dropping it",
                name
            )));
        }
        let d = table.descriptor();
        let conn = self.db.conn();
        conn.check_locks(&d.all_tables(), LockScope::All)?;
        conn.transaction(true, || {
            table.cleanup_from_reload(0)?;
            for kind in [MetaKind::Indexes, MetaKind::Constraints, MetaKind::Tables] {
                let deleter = Sql::raw("DELETE FROM ")
                    .ident(kind.table())
                    .text(" WHERE ")
                    .ident(kind.key())
                    .text(" = ")
                    .param(SqlValue::text(name));
                self.run_silent(&deleter)?;
            }
            for tbl in d.all_tables() {
                conn.execute(&Sql::raw("DROP TABLE ").ident(&tbl))?;
                info!(table = %tbl, "dropped");
            }
            Ok(())
        })?;
        self.db.unregister(name);
        Ok(())
    }

    /// Rename a table along with its paired tables, backups, shadow tables,
    /// recorded indexes and constraints, and metadata rows.
    pub fn rename_table(&self, old_name: &str, new_name: &str) -> Result<()> {
        if old_name == new_name {
            return Err(Error::invalid_argument("The new name must differ from the old one"));
        }
        if self.db.has_table(new_name) {
            return Err(Error::invalid_argument(format!("{} already exists", new_name)));
        }
        if !new_name.contains('_') {
            return Err(Error::invalid_argument("Table name must contain an underscore"));
        }
        let table = self.db.table(old_name)?;
        let d = table.descriptor();
        let conn = self.db.conn();
        conn.check_locks(&d.all_tables(), LockScope::All)?;
        let start = Instant::now();
        let backups = table.next_backup_number()?;
        conn.transaction(true, || {
            for kind in [MetaKind::Indexes, MetaKind::Constraints] {
                let name_col = if kind == MetaKind::Indexes { "index_name" } else { "constraint_name" };
                for meta in [kind.table().to_string(), kind.history()] {
                    let selecter = Sql::raw("SELECT DISTINCT ")
                        .ident(name_col)
                        .text(" FROM ")
                        .ident(&meta)
                        .text(" WHERE table_name = ")
                        .param(SqlValue::text(old_name));
                    let names: Vec<String> = conn
                        .execute_with(&selecter, ExecOptions::silent())?
                        .rows
                        .into_iter()
                        .filter_map(|r| r.into_iter().next().flatten())
                        .collect();
                    for old_index in names {
                        let new_index = old_index.replace(old_name, new_name);
                        let updater = Sql::format(
                            "UPDATE {} SET ({}, table_name) = (",
                            [Sql::identifier(&meta), Sql::identifier(name_col)],
                        )
                        .param(SqlValue::text(new_index.as_str()))
                        .text(", ")
                        .param(SqlValue::text(new_name))
                        .text(") WHERE ")
                        .ident(name_col)
                        .text(" = ")
                        .param(SqlValue::text(old_index.as_str()))
                        .text(" AND table_name = ")
                        .param(SqlValue::text(old_name));
                        self.run_silent(&updater)?;
                        if meta != kind.table() || new_index == old_index {
                            continue;
                        }
                        if kind == MetaKind::Indexes {
                            if conn.index_exists(&old_index, None)? {
                                conn.execute(&Sql::format(
                                    "ALTER INDEX {} RENAME TO {}",
                                    [Sql::identifier(&old_index), Sql::identifier(&new_index)],
                                ))?;
                            }
                        } else if let Some(owner) = conn.constraint_table(&old_index)? {
                            conn.execute(&Sql::format(
                                "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                                [Sql::identifier(&owner), Sql::identifier(&old_index), Sql::identifier(&new_index)],
                            ))?;
                        }
                    }
                }
            }
            for meta in [MetaKind::Tables.table().to_string(), MetaKind::Tables.history()] {
                let updater = Sql::raw("UPDATE ")
                    .ident(&meta)
                    .text(" SET name = ")
                    .param(SqlValue::text(new_name))
                    .text(" WHERE name = ")
                    .param(SqlValue::text(old_name));
                self.run_silent(&updater)?;
            }

            let mut pairs: Vec<(String, String)> = Vec::new();
            for ext in TABLE_SUFFIXES {
                pairs.push((format!("{}{}", old_name, ext), format!("{}{}", new_name, ext)));
                for n in 1..backups {
                    pairs.push((format!("{}{}_old{}", old_name, ext, n), format!("{}{}_old{}", new_name, ext, n)));
                }
                pairs.push((format!("{}{}_tmp", old_name, ext), format!("{}{}_tmp", new_name, ext)));
            }
            for (from, to) in pairs {
                if !conn.table_exists(&from)? {
                    continue;
                }
                conn.execute(&Sql::format("ALTER TABLE {} RENAME TO {}", [Sql::identifier(&from), Sql::identifier(&to)]))?;
                // Keep primary keys and counts indexes following the table name
                for index in conn.list_indexes(&to)? {
                    if !index.starts_with(&from) {
                        continue;
                    }
                    let renamed = format!("{}{}", to, &index[from.len()..]);
                    if let Some(owner) = conn.constraint_table(&index)? {
                        conn.execute(&Sql::format(
                            "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                            [Sql::identifier(&owner), Sql::identifier(&index), Sql::identifier(&renamed)],
                        ))?;
                    } else {
                        conn.execute(&Sql::format(
                            "ALTER INDEX {} RENAME TO {}",
                            [Sql::identifier(&index), Sql::identifier(&renamed)],
                        ))?;
                    }
                }
                info!(from = %from, to = %to, "renamed");
            }
            Ok(())
        })?;
        self.db.unregister(old_name);
        table.update_descriptor(|d| d.name = new_name.to_string());
        self.db.register(table);
        info!(from = old_name, to = new_name, elapsed = start.elapsed().as_secs_f64(), "renamed table");
        Ok(())
    }
}

/// Per-table schema changes recorded in `meta_tables`.
impl SearchTable {
    fn set_meta(&self, column: &str, value: SqlValue) -> Result<()> {
        let updater = Sql::raw("UPDATE meta_tables SET ")
            .ident(column)
            .text(" = ")
            .param(value)
            .text(" WHERE name = ")
            .param(SqlValue::text(self.name()));
        self.conn.execute_with(&updater, ExecOptions::silent())?;
        Ok(())
    }

    /// Important tables cannot be dropped.
    pub fn set_importance(&self, important: bool) -> Result<()> {
        self.set_meta("important", SqlValue::Bool(important))
    }

    pub fn set_label(&self, label_col: Option<&str>) -> Result<()> {
        if let Some(col) = label_col {
            if !self.descriptor().is_search_col(col) {
                return Err(Error::invalid_argument(format!("{} is not a search column", col)));
            }
        }
        self.set_meta("label_col", label_col.map_or(SqlValue::Null, SqlValue::text))?;
        self.update_descriptor(|d| d.label_col = label_col.map(str::to_string));
        Ok(())
    }

    pub fn set_description(&self, description: &str) -> Result<()> {
        self.set_meta("table_description", SqlValue::text(description))
    }

    /// Merge one column's description into `col_description`.
    pub fn set_column_description(&self, column: &str, description: &str) -> Result<()> {
        let d = self.descriptor();
        if column != "id" && !d.col_type.contains_key(column) {
            return Err(Error::query(format!("{} is not a column of {}", column, d.name)));
        }
        let mut entry = serde_json::Map::new();
        entry.insert(column.to_string(), Value::String(description.to_string()));
        let updater = Sql::raw("UPDATE meta_tables SET col_description = COALESCE(col_description, '{}'::jsonb) || ")
            .param(SqlValue::Json(Value::Object(entry)))
            .text("::jsonb WHERE name = ")
            .param(SqlValue::text(d.name.as_str()));
        self.conn.execute_with(&updater, ExecOptions::silent())?;
        Ok(())
    }

    /// Change the default sort order, resorting ids when the table is
    /// id-ordered, and build an index for it if none matches.
    pub fn set_sort(&self, sort: Option<Vec<SortKey>>, resort: bool) -> Result<()> {
        let d = self.descriptor();
        let sort = sort.filter(|s| !s.is_empty());
        for key in sort.iter().flatten() {
            if !d.is_search_col(&key.column) {
                return Err(Error::query(format!("{} is not a search column of {}", key.column, d.name)));
            }
        }
        self.conn.transaction(true, || {
            self.set_meta("sort", sort.as_deref().map_or(SqlValue::Null, |s| SqlValue::Json(sort_to_json(s))))?;
            self.update_descriptor(|d| d.sort = sort.clone());
            self.break_order()?;
            if resort {
                self.resort("", None)?;
            }
            if let Some(keys) = &sort {
                let columns: Vec<String> = keys.iter().map(|k| k.column.clone()).collect();
                if !self.list_indexes()?.iter().any(|index| index.columns == columns) {
                    let names: Vec<&str> = columns.iter().map(String::as_str).collect();
                    let modifiers = keys
                        .iter()
                        .map(|k| if k.descending { vec!["DESC".to_string(), "NULLS LAST".to_string()] } else { Vec::new() })
                        .collect();
                    self.create_index(crate::schema::index::NewIndex::new(&names).modifiers(modifiers))?;
                }
            }
            Ok(())
        })
    }

    /// Add a column of a whitelisted type to the search or extras table.
    pub fn add_column(&self, name: &str, declared_type: &str, extra: bool) -> Result<()> {
        let d = self.descriptor();
        if d.is_search_col(name) || d.is_extra_col(name) || name == "id" {
            return Err(Error::invalid_argument(format!("{} already has column {}", d.name, name)));
        }
        check_type(declared_type)?;
        let table = if extra {
            if !d.has_extras {
                return Err(Error::invalid_state(format!("{} has no extras table", d.name)));
            }
            d.extras_table()
        } else {
            d.name.clone()
        };
        let modifier = Sql::format("ALTER TABLE {} ADD COLUMN {} ", [Sql::identifier(&table), Sql::identifier(name)])
            .text(declared_type);
        self.conn.execute(&modifier)?;
        let column_type = crate::query::types::ColumnType::parse(declared_type);
        self.update_descriptor(|d| {
            if extra {
                d.extra_cols.push(name.to_string());
            } else {
                d.search_cols.push(name.to_string());
                d.search_types.insert(name.to_string(), column_type.clone());
            }
            d.col_type.insert(name.to_string(), column_type);
        });
        info!(table = %table, column = name, declared_type, "added column");
        Ok(())
    }

    /// Drop a column; a search column also loses its recorded indexes,
    /// constraints, counts and stats.
    pub fn drop_column(&self, name: &str) -> Result<()> {
        let d = self.descriptor();
        if d.sort.iter().flatten().any(|k| k.column == name) {
            return Err(Error::invalid_argument(format!(
                "Sorting for {} depends on {}; change the default sort order with set_sort first",
                d.name, name
            )));
        }
        if d.label_col.as_deref() == Some(name) {
            return Err(Error::invalid_argument(format!(
                "{} is the label column of {}; change it with set_label first",
                name, d.name
            )));
        }
        let search = d.is_search_col(name);
        if !search && !d.is_extra_col(name) {
            return Err(Error::query(format!("{} is not a column of {}", name, d.name)));
        }
        self.check_locks("", LockScope::All)?;
        let jname = SqlValue::Json(Value::from(name));
        self.conn.transaction(true, || {
            let table = if search {
                for kind in [MetaKind::Indexes, MetaKind::Constraints] {
                    let deleter = Sql::raw("DELETE FROM ")
                        .ident(kind.table())
                        .text(" WHERE table_name = ")
                        .param(SqlValue::text(d.name.as_str()))
                        .text(" AND columns @> ")
                        .param(jname.clone());
                    self.conn.execute_with(&deleter, ExecOptions::silent())?;
                }
                self.conn.execute(
                    &Sql::raw("DELETE FROM ").ident(&d.counts_table()).text(" WHERE cols @> ").param(jname.clone()),
                )?;
                self.conn.execute(
                    &Sql::raw("DELETE FROM ")
                        .ident(&d.stats_table())
                        .text(" WHERE cols @> ")
                        .param(jname.clone())
                        .text(" OR constraint_cols @> ")
                        .param(jname.clone()),
                )?;
                d.name.clone()
            } else {
                d.extras_table()
            };
            self.conn.execute(&Sql::format(
                "ALTER TABLE {} DROP COLUMN {}",
                [Sql::identifier(&table), Sql::identifier(name)],
            ))?;
            Ok(())
        })?;
        self.update_descriptor(|d| {
            d.search_cols.retain(|c| c != name);
            d.extra_cols.retain(|c| c != name);
            d.search_types.remove(name);
            d.col_type.remove(name);
        });
        info!(table = %d.name, column = name, "dropped column");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(pairs: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        pairs
            .iter()
            .map(|(ty, cols)| (ty.to_string(), cols.iter().map(|c| c.to_string()).collect()))
            .collect()
    }

    #[test]
    fn columns_are_flattened_with_id_first() {
        let cols = process_columns(&groups(&[("smallint", &["degree", "r2"]), ("text", &["label"])]), None).unwrap();
        let names: Vec<&str> = cols.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["id", "degree", "r2", "label"]);

        let order = vec!["label".to_string(), "r2".to_string(), "degree".to_string()];
        let cols = process_columns(&groups(&[("smallint", &["degree", "r2"]), ("text", &["label"])]), Some(&order)).unwrap();
        assert_eq!(cols[1], ("label".to_string(), "text".to_string()));
        assert_eq!(
            column_defs(&cols[..2]).render(),
            r#""id" bigint, "label" text"#
        );
    }

    #[test]
    fn column_groups_are_validated() {
        assert!(process_columns(&groups(&[("smallint", &["a"]), ("text", &["a"])]), None).is_err());
        assert!(process_columns(&groups(&[("int; DROP TABLE x", &["a"])]), None).is_err());
        let partial = vec!["a".to_string()];
        assert!(process_columns(&groups(&[("smallint", &["a", "b"])]), Some(&partial)).is_err());
    }
}
