use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::connection::locks::LockScope;
use crate::connection::manager::ExecOptions;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::{quote_ident, SqlValue};
use crate::reload::file_format::{check_header, delimiter_clause, DataFile};
use crate::schema::catalog::{MetaCatalog, MetaKind};
use crate::schema::manager::{column_defs, COUNTS_COLUMNS, STATS_COLUMNS, TABLE_SUFFIXES};
use crate::schema::whitelist::check_type;
use crate::search::mutate::WriteOptions;
use crate::search::table::SearchTable;

/// Suffix of the shadow tables a reload loads into.
pub const TMP: &str = "_tmp";

fn backup_suffix(n: u32) -> String {
    format!("_old{}", n)
}

/// The files describing one table: data for the search and extras tables,
/// optional counts and stats, and optional metadata rows.
#[derive(Debug, Clone, Default)]
pub struct ReloadFiles {
    pub search: PathBuf,
    pub extras: Option<PathBuf>,
    pub counts: Option<PathBuf>,
    pub stats: Option<PathBuf>,
    pub indexes: Option<PathBuf>,
    pub constraints: Option<PathBuf>,
    pub meta: Option<PathBuf>,
}

impl ReloadFiles {
    pub fn new(search: impl Into<PathBuf>) -> Self {
        ReloadFiles { search: search.into(), ..Default::default() }
    }

    pub fn extras(mut self, path: impl Into<PathBuf>) -> Self {
        self.extras = Some(path.into());
        self
    }

    pub fn counts(mut self, path: impl Into<PathBuf>) -> Self {
        self.counts = Some(path.into());
        self
    }

    pub fn stats(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats = Some(path.into());
        self
    }

    pub fn indexes(mut self, path: impl Into<PathBuf>) -> Self {
        self.indexes = Some(path.into());
        self
    }

    pub fn constraints(mut self, path: impl Into<PathBuf>) -> Self {
        self.constraints = Some(path.into());
        self
    }

    pub fn meta(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta = Some(path.into());
        self
    }

    /// Every conventional file name for `table` inside `folder`:
    /// `{table}.txt`, `{table}_extras.txt` and so on.
    pub fn in_folder(folder: &Path, table: &str) -> Self {
        let file = |ext: &str| Some(folder.join(format!("{}{}.txt", table, ext)));
        ReloadFiles {
            search: folder.join(format!("{}.txt", table)),
            extras: file("_extras"),
            counts: file("_counts"),
            stats: file("_stats"),
            indexes: file("_indexes"),
            constraints: file("_constraints"),
            meta: file("_meta"),
        }
    }

    /// Like [`ReloadFiles::in_folder`], keeping only the files that exist.
    pub fn existing_in(folder: &Path, table: &str) -> Self {
        let keep = |path: Option<PathBuf>| path.filter(|p| p.is_file());
        let all = Self::in_folder(folder, table);
        ReloadFiles {
            search: all.search,
            extras: keep(all.extras),
            counts: keep(all.counts),
            stats: keep(all.stats),
            indexes: keep(all.indexes),
            constraints: keep(all.constraints),
            meta: keep(all.meta),
        }
    }
}

/// Options for [`SearchTable::reload`].
#[derive(Debug, Clone)]
pub struct ReloadOptions {
    pub resort: Option<bool>,  // Defaults to resorting when the files carry no ids
    pub reindex: bool,         // Rebuild recorded indexes and constraints on the shadow tables
    pub restat: Option<bool>,  // Defaults to refreshing when a counts or stats file is missing
    pub final_swap: bool,
    pub adjust_schema: bool,   // Create shadow tables from the file headers
    pub sep: Option<char>,
}

impl Default for ReloadOptions {
    fn default() -> Self {
        ReloadOptions { resort: None, reindex: true, restat: None, final_swap: true, adjust_schema: false, sep: None }
    }
}

/// What a reload touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub tables: Vec<String>,
    pub backup_number: Option<u32>,  // None until the shadow tables are swapped in
    pub ordered: bool,
}

/// Options for [`SearchTable::copy_to`].
#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub columns: Option<Vec<String>>,
    pub query: Option<Value>,
    pub include_id: bool,
    pub sep: Option<char>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions { columns: None, query: None, include_id: true, sep: None }
    }
}

struct Load<'p> {
    table: String,
    columns: Vec<String>,
    header: bool,
    path: &'p Path,
}

impl SearchTable {
    fn separator(&self, sep: Option<char>) -> char {
        sep.unwrap_or(self.conn.config().copy_separator)
    }

    fn check_file_input(&self, extras: Option<&Path>) -> Result<()> {
        match (extras.is_some(), self.descriptor().has_extras) {
            (true, false) => Err(Error::invalid_argument(format!("{} has no extras table", self.name()))),
            (false, true) => Err(Error::invalid_argument("Must provide a file for the extras table")),
            _ => Ok(()),
        }
    }

    /// Smallest `N` such that no paired table has an `_oldN` backup.
    pub fn next_backup_number(&self) -> Result<u32> {
        let name = self.name();
        let mut n = 1;
        for ext in TABLE_SUFFIXES {
            while self.conn.table_exists(&format!("{}{}{}", name, ext, backup_suffix(n)))? {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Paired tables that currently have a shadow copy.
    pub fn shadow_tables(&self) -> Result<Vec<String>> {
        let name = self.name();
        let mut tables = Vec::new();
        for ext in TABLE_SUFFIXES {
            let table = format!("{}{}", name, ext);
            if self.conn.table_exists(&format!("{}{}", table, TMP))? {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    fn largest_id(&self, table: &str) -> Result<i64> {
        let rs = self.conn.execute_with(&Sql::raw("SELECT MAX(id) FROM ").ident(table), ExecOptions::silent())?;
        Ok(rs.scalar_i64().unwrap_or(-1))
    }

    /// Copy one file into `target`. Data files carry a header, which is
    /// checked against `columns`; when it has no id column, fresh ids
    /// continue after the largest one present. Returns whether ids were
    /// assigned and the number of rows copied.
    fn copy_file(&self, path: &Path, target: &str, columns: &[String], header: bool, sep: char) -> Result<(bool, u64)> {
        let file = DataFile::read(path, sep, header)?;
        let names = if header {
            let expected: BTreeSet<String> = columns.iter().cloned().collect();
            let table_columns = self.conn.column_types(target)?;
            check_header(file.header.as_deref().unwrap_or_default(), &table_columns, &expected, true)?
        } else {
            columns.to_vec()
        };
        let addid = header && !names.iter().any(|n| n == "id");
        let sequence = format!("{}_seq", target);
        self.conn.transaction(true, || {
            if addid {
                let start = SqlValue::Int(self.largest_id(target)? + 1);
                self.conn.execute(
                    &Sql::raw("CREATE SEQUENCE ")
                        .ident(&sequence)
                        .text(" START WITH ")
                        .param(start.clone())
                        .text(" MINVALUE ")
                        .param(start)
                        .text(" CACHE 10000"),
                )?;
                self.conn.execute(
                    &Sql::raw("ALTER TABLE ")
                        .ident(target)
                        .text(" ALTER COLUMN id SET DEFAULT nextval(")
                        .param(SqlValue::Text(quote_ident(&sequence)))
                        .text(")"),
                )?;
            }
            let copier = Sql::format(
                "COPY {} ({}) FROM STDIN",
                [Sql::identifier(target), Sql::identifiers(names.iter().map(String::as_str))],
            )
            .append(delimiter_clause(sep));
            let copied = self.conn.copy_in(&copier, &file.body)?;
            if addid {
                self.conn.execute(&Sql::raw("ALTER TABLE ").ident(target).text(" ALTER COLUMN id DROP DEFAULT"))?;
                self.conn.execute(&Sql::raw("DROP SEQUENCE ").ident(&sequence))?;
            }
            Ok((addid, copied))
        })
    }

    /// Create `target` with the columns named in the header of `path`,
    /// adding `id bigint` when missing. Returns the non-id column names.
    fn create_from_header(&self, path: &Path, target: &str, sep: char) -> Result<Vec<String>> {
        if self.conn.table_exists(target)? {
            return Err(Error::invalid_state(format!(
                "Table {} already exists; run cleanup_from_reload to delete it and proceed",
                target
            )));
        }
        let mut columns = DataFile::read_header(path, sep)?;
        for (_, declared) in &columns {
            check_type(declared)?;
        }
        let names = columns.iter().map(|(n, _)| n.clone()).filter(|n| n != "id").collect();
        if !columns.iter().any(|(n, t)| n == "id" && t == "bigint") {
            columns.insert(0, ("id".to_string(), "bigint".to_string()));
        }
        self.conn.execute(&Sql::format("CREATE TABLE {} ({})", [Sql::identifier(target), column_defs(&columns)]))?;
        Ok(names)
    }

    /// Whether the `meta_tables` row in `path` asks for an id-ordered table
    /// whose ids follow its sort.
    fn meta_file_ordered(&self, path: &Path, sep: char) -> Result<bool> {
        let lines = DataFile::read(path, sep, false)?.lines(sep);
        let [line] = lines.as_slice() else {
            return Err(Error::invalid_argument(format!("{} must contain exactly one line", path.display())));
        };
        let column = |name: &str| {
            MetaKind::Tables
                .column_names()
                .iter()
                .position(|c| *c == name)
                .and_then(|i| line.get(i))
                .map(String::as_str)
        };
        if column("name") != Some(self.name().as_str()) {
            return Err(Error::invalid_argument(format!(
                "The name in {} does not match the table {}",
                path.display(),
                self.name()
            )));
        }
        let flag = |name: &str| match column(name) {
            Some("t") => Ok(true),
            Some("f") => Ok(false),
            other => Err(Error::invalid_argument(format!(
                "{} in {} must be 't' or 'f', not {:?}",
                name,
                path.display(),
                other
            ))),
        };
        Ok(flag("id_ordered")? && !flag("out_of_order")?)
    }

    /// Replace the contents of this table with the given files.
    ///
    /// The files are loaded into `_tmp` shadow tables, which get primary
    /// keys, indexes, constraints, sorted ids and statistics before being
    /// swapped in. Each phase commits on its own, so a failure leaves the
    /// live tables untouched and the shadow tables in place until
    /// [`SearchTable::drop_tmp`] or [`SearchTable::cleanup_from_reload`].
    pub fn reload(&self, files: &ReloadFiles, options: ReloadOptions) -> Result<ReloadOutcome> {
        self.check_file_input(files.extras.as_deref())?;
        let d = self.descriptor();
        let sep = self.separator(options.sep);
        let saving = self.stats().saving();
        let restat = options.restat.unwrap_or(files.counts.is_none() || files.stats.is_none());
        let start = Instant::now();
        info!(table = %d.name, "reloading");

        let fixed = |columns: &[(&str, &str)]| columns.iter().map(|(c, _)| c.to_string()).collect::<Vec<_>>();
        let mut loads = vec![Load { table: d.name.clone(), columns: d.search_cols.clone(), header: true, path: &files.search }];
        if let Some(path) = &files.extras {
            loads.push(Load { table: d.extras_table(), columns: d.extra_cols.clone(), header: true, path });
        }
        if saving {
            if let Some(path) = &files.counts {
                loads.push(Load { table: d.counts_table(), columns: fixed(COUNTS_COLUMNS), header: false, path });
            }
            if let Some(path) = &files.stats {
                loads.push(Load { table: d.stats_table(), columns: fixed(STATS_COLUMNS), header: false, path });
            }
        }

        // Shadow tables are committed first so they survive a failed load
        self.conn.transaction(true, || {
            for load in &mut loads {
                let tmp = format!("{}{}", load.table, TMP);
                if options.adjust_schema && load.header {
                    load.columns = self.create_from_header(load.path, &tmp, sep)?;
                } else {
                    self.conn.clone_table(&load.table, &tmp)?;
                }
            }
            Ok(())
        })?;

        let added_id = self.conn.transaction(true, || {
            let mut added_id = None;
            let mut rows = Vec::new();
            for load in &loads {
                let now = Instant::now();
                let tmp = format!("{}{}", load.table, TMP);
                let (addid, copied) = self.copy_file(load.path, &tmp, &load.columns, load.header, sep)?;
                if load.header {
                    if added_id.is_some_and(|previous| previous != addid) {
                        return Err(Error::consistency("Mismatch on search and extras files containing id"));
                    }
                    added_id = Some(addid);
                    rows.push(copied);
                }
                info!(table = %tmp, rows = copied, elapsed = now.elapsed().as_secs_f64(), path = %load.path.display(), "loaded data");
            }
            if let [search_rows, extra_rows] = rows[..] {
                if search_rows != extra_rows {
                    return Err(Error::consistency(format!(
                        "Different number of rows in the search file ({}) and the extras file ({})",
                        search_rows, extra_rows
                    )));
                }
            }
            Ok(added_id.unwrap_or(false))
        })?;
        let mut tables: Vec<String> = loads.iter().map(|l| l.table.clone()).collect();

        self.restore_pkeys(TMP)?;
        let catalog = MetaCatalog::new(&self.conn);
        if let Some(path) = &files.indexes {
            catalog.reload(MetaKind::Indexes, path, &d.name, sep)?;
        }
        if let Some(path) = &files.constraints {
            catalog.reload(MetaKind::Constraints, path, &d.name, sep)?;
        }
        if options.reindex {
            self.restore_indexes(&[], TMP)?;
        }

        let resort = options.resort.unwrap_or(added_id)
            && match &files.meta {
                Some(path) => self.meta_file_ordered(path, sep)?,
                None => d.id_ordered,
            };
        let ordered = resort && self.resort(TMP, None)?;

        if restat && saving {
            for table in [d.counts_table(), d.stats_table()] {
                let tmp = format!("{}{}", table, TMP);
                if !self.conn.table_exists(&tmp)? {
                    self.conn.clone_table(&table, &tmp)?;
                }
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
            if files.counts.is_none() || files.stats.is_none() {
                self.stats().refresh_stats(true, TMP)?;
            }
        }
        if saving && (files.counts.is_some() || restat) {
            self.create_counts_indexes(TMP, true)?;
        }

        let backup_number = if options.final_swap {
            Some(self.swap_in_shadow(&tables, files.meta.as_deref(), ordered, sep)?)
        } else {
            if files.meta.is_some() {
                warn!(table = %d.name, "final swap not requested; pass the meta file to reload_final_swap");
            }
            None
        };
        info!(table = %d.name, elapsed = start.elapsed().as_secs_f64(), "reloaded");
        Ok(ReloadOutcome { tables, backup_number, ordered })
    }

    /// Swap the shadow copies of `tables` (default: every paired table with
    /// one) in for the live tables, keeping the live ones as the next
    /// backup. Returns the backup number.
    pub fn reload_final_swap(&self, tables: Option<&[String]>, metafile: Option<&Path>) -> Result<u32> {
        let tables = match tables {
            Some(tables) => tables.to_vec(),
            None => self.shadow_tables()?,
        };
        self.swap_in_shadow(&tables, metafile, false, self.separator(None))
    }

    pub(crate) fn swap_in_shadow(&self, tables: &[String], metafile: Option<&Path>, ordered: bool, sep: char) -> Result<u32> {
        if tables.is_empty() {
            return Err(Error::invalid_state(format!("No shadow tables to swap in for {}", self.name())));
        }
        self.conn.check_locks(tables, LockScope::All)?;
        let start = Instant::now();
        let backup = self.next_backup_number()?;
        let old = backup_suffix(backup);
        let name = self.name();
        self.conn.transaction(true, || {
            self.conn.swap(tables, "", &old)?;
            self.conn.swap(tables, TMP, "")?;
            if let Some(path) = metafile {
                MetaCatalog::new(&self.conn).reload(MetaKind::Tables, path, &name, sep)?;
            }
            if ordered {
                self.set_ordered()?;
            }
            self.refresh()?;
            let stats = self.stats();
            if stats.saving() {
                stats.slow_count(&Value::Object(Map::new()), true, "", false)?;
            }
            Ok(())
        })?;
        info!(table = %name, backup, ?tables, elapsed = start.elapsed().as_secs_f64(), "swapped in reloaded tables");
        Ok(backup)
    }

    /// Drop the shadow tables of an unfinished reload.
    pub fn drop_tmp(&self) -> Result<Vec<String>> {
        let shadows: Vec<String> = self.shadow_tables()?.into_iter().map(|t| format!("{}{}", t, TMP)).collect();
        self.conn.transaction(true, || {
            for table in &shadows {
                self.conn.drop_table_if_exists(table)?;
                info!(table = %table, "dropped shadow table");
            }
            Ok(())
        })?;
        Ok(shadows)
    }

    /// Exchange the live tables with backup `backup_number` (default: the
    /// most recent). Reverting twice with the same number is a no-op.
    pub fn reload_revert(&self, backup_number: Option<u32>) -> Result<u32> {
        let name = self.name();
        if self.conn.table_exists(&format!("{}{}", name, TMP))? {
            return Err(Error::invalid_state(format!(
                "A reload of {} did not complete; call drop_tmp before reverting",
                name
            )));
        }
        let n = match backup_number {
            None => match self.next_backup_number()? - 1 {
                0 => return Err(Error::invalid_state(format!("No backups of {} to revert to", name))),
                n => n,
            },
            Some(n) => {
                if !self.conn.table_exists(&format!("{}{}", name, backup_suffix(n)))? {
                    return Err(Error::new(ErrorKind::NotFound, format!("Backup {} of {} does not exist", n, name)));
                }
                n
            }
        };
        let old = backup_suffix(n);
        let mut tables = Vec::new();
        for ext in TABLE_SUFFIXES {
            let table = format!("{}{}", name, ext);
            if self.conn.table_exists(&format!("{}{}", table, old))? {
                tables.push(table);
            }
        }
        self.conn.check_locks(&tables, LockScope::All)?;
        self.conn.transaction(true, || {
            self.conn.swap(&tables, "", TMP)?;
            self.conn.swap(&tables, &old, "")?;
            self.conn.swap(&tables, TMP, &old)?;
            self.refresh()
        })?;
        info!(table = %name, backup = n, "swapped live tables with backup");
        Ok(n)
    }

    /// Drop shadow tables and backups, keeping the `keep_old` most recent
    /// backups renumbered from 1.
    pub fn cleanup_from_reload(&self, keep_old: u32) -> Result<()> {
        let name = self.name();
        let mut to_remove = Vec::new();
        let mut to_renumber = Vec::new();
        for ext in TABLE_SUFFIXES {
            let head = format!("{}{}", name, ext);
            let tmp = format!("{}{}", head, TMP);
            if self.conn.table_exists(&tmp)? {
                to_remove.push(tmp);
            }
            let mut backups = Vec::new();
            let mut n = 1;
            while self.conn.table_exists(&format!("{}{}", head, backup_suffix(n)))? {
                backups.push(n);
                n += 1;
            }
            let keep = (keep_old as usize).min(backups.len());
            let kept = backups.split_off(backups.len() - keep);
            for (new, old) in (1..).zip(kept) {
                if new != old {
                    to_renumber.push((head.clone(), old, new));
                }
            }
            to_remove.extend(backups.into_iter().map(|n| format!("{}{}", head, backup_suffix(n))));
        }
        self.conn.transaction(true, || {
            for table in &to_remove {
                self.conn.execute(&Sql::raw("DROP TABLE ").ident(table))?;
                info!(table = %table, "dropped");
            }
            for (head, old, new) in &to_renumber {
                self.conn.swap(std::slice::from_ref(head), &backup_suffix(*old), &backup_suffix(*new))?;
                info!(table = %head, from = old, to = new, "renumbered backup");
            }
            Ok(())
        })
    }

    /// Append rows from files to the live tables. Returns the number of rows added.
    pub fn copy_from(&self, search: &Path, extras: Option<&Path>, options: WriteOptions) -> Result<u64> {
        self.check_file_input(extras)?;
        let d = self.descriptor();
        let sep = self.separator(None);
        self.conn.transaction(options.commit, || {
            if options.reindex {
                self.drop_indexes(&[], "")?;
            }
            let now = Instant::now();
            let (search_addid, search_rows) = self.copy_file(search, &d.name, &d.search_cols, true, sep)?;
            if let Some(extras) = extras {
                let (extra_addid, extra_rows) = self.copy_file(extras, &d.extras_table(), &d.extra_cols, true, sep)?;
                if search_rows != extra_rows {
                    return Err(Error::consistency(format!(
                        "Different number of rows in the search file ({}) and the extras file ({})",
                        search_rows, extra_rows
                    )));
                }
                if search_addid != extra_addid {
                    return Err(Error::consistency("Mismatch on search and extras files containing id"));
                }
            }
            info!(table = %d.name, rows = search_rows, elapsed = now.elapsed().as_secs_f64(), "appended data");
            self.break_order()?;
            if d.id_ordered && options.resort {
                self.resort("", None)?;
            }
            if options.reindex {
                self.restore_indexes(&[], "")?;
            }
            self.break_stats()?;
            let stats = self.stats();
            if stats.saving() {
                if options.restat {
                    stats.refresh_stats(false, "")?;
                }
                let total = stats.total() + search_rows as i64;
                stats.record_count(&Value::Object(Map::new()), total, false, "", false)?;
            }
            Ok(search_rows)
        })
    }

    fn dump(&self, table: &str, columns: &[String], header: bool, query: Option<&Value>, path: &Path, sep: char) -> Result<()> {
        let now = Instant::now();
        let header = if header {
            let types = self.conn.column_types(table)?;
            let declared = columns
                .iter()
                .map(|col| {
                    types
                        .iter()
                        .find(|(n, _)| n == col)
                        .map(|(n, t)| (n.clone(), t.clone()))
                        .ok_or_else(|| Error::query(format!("{} is not a column of {}", col, table)))
                })
                .collect::<Result<Vec<_>>>()?;
            Some(declared)
        } else {
            None
        };
        let cols = Sql::identifiers(columns.iter().map(String::as_str));
        let copier = match query {
            Some(query) => {
                let selecter = Sql::format("SELECT {} FROM {}", [cols, Sql::identifier(table)]).append(self.where_clause(query)?);
                Sql::format("COPY ({}) TO STDOUT", [selecter])
            }
            None => Sql::format("COPY {} ({}) TO STDOUT", [Sql::identifier(table), cols]),
        }
        .append(delimiter_clause(sep));
        let data = self.conn.copy_out(&copier)?;
        DataFile::write(path, header.as_deref(), &data, sep)?;
        info!(table, path = %path.display(), elapsed = now.elapsed().as_secs_f64(), "exported");
        Ok(())
    }

    /// Write the live tables, and the metadata rows for this table, to files
    /// that [`SearchTable::reload`] accepts.
    pub fn copy_to(&self, files: &ReloadFiles, options: &DumpOptions) -> Result<()> {
        self.check_file_input(files.extras.as_deref())?;
        let d = self.descriptor();
        let sep = self.separator(options.sep);
        let wanted = |col: &String| options.columns.as_ref().is_none_or(|cols| cols.contains(col));
        let mut search_cols: Vec<String> = d.search_cols.iter().filter(|c| wanted(c)).cloned().collect();
        let mut extra_cols: Vec<String> = d.extra_cols.iter().filter(|c| wanted(c)).cloned().collect();
        if let Some(columns) = &options.columns {
            if let Some(unknown) = columns.iter().find(|c| !d.is_search_col(c) && !d.is_extra_col(c)) {
                return Err(Error::invalid_argument(format!("Invalid column {}", unknown)));
            }
        }
        if options.include_id {
            search_cols.insert(0, "id".to_string());
            extra_cols.insert(0, "id".to_string());
        }
        if options.query.is_some() && files.extras.is_some() {
            return Err(Error::invalid_argument("A query can only restrict the search table export"));
        }
        let start = Instant::now();
        self.dump(&d.name, &search_cols, true, options.query.as_ref(), &files.search, sep)?;
        if let Some(path) = &files.extras {
            self.dump(&d.extras_table(), &extra_cols, true, None, path, sep)?;
        }
        if self.stats().saving() {
            let fixed = |columns: &[(&str, &str)]| columns.iter().map(|(c, _)| c.to_string()).collect::<Vec<_>>();
            if let Some(path) = &files.counts {
                self.dump(&d.counts_table(), &fixed(COUNTS_COLUMNS), false, None, path, sep)?;
            }
            if let Some(path) = &files.stats {
                self.dump(&d.stats_table(), &fixed(STATS_COLUMNS), false, None, path, sep)?;
            }
        }
        let catalog = MetaCatalog::new(&self.conn);
        for (kind, path) in [
            (MetaKind::Indexes, &files.indexes),
            (MetaKind::Constraints, &files.constraints),
            (MetaKind::Tables, &files.meta),
        ] {
            if let Some(path) = path {
                catalog.copy_to(kind, path, &d.name, sep)?;
            }
        }
        info!(table = %d.name, elapsed = start.elapsed().as_secs_f64(), "exported table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_layout() {
        let files = ReloadFiles::in_folder(Path::new("/data"), "nf_fields");
        assert_eq!(files.search, Path::new("/data/nf_fields.txt"));
        assert_eq!(files.extras.as_deref(), Some(Path::new("/data/nf_fields_extras.txt")));
        assert_eq!(files.meta.as_deref(), Some(Path::new("/data/nf_fields_meta.txt")));

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nf_fields.txt"), "").unwrap();
        std::fs::write(dir.path().join("nf_fields_counts.txt"), "").unwrap();
        let found = ReloadFiles::existing_in(dir.path(), "nf_fields");
        assert!(found.counts.is_some());
        assert!(found.extras.is_none() && found.stats.is_none() && found.meta.is_none());
    }

    #[test]
    fn reload_defaults() {
        let options = ReloadOptions::default();
        assert!(options.reindex && options.final_swap && !options.adjust_schema);
        assert_eq!(backup_suffix(3), "_old3");
        assert!(DumpOptions::default().include_id);
    }
}
