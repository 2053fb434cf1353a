use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::connection::manager::{ConnectionManager, ExecOptions};
use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;
use crate::reload::file_format::{delimiter_clause, DataFile};
use crate::schema::manager::column_defs;

/// One of the three metadata directories, each with a `_hist` twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    Tables,
    Indexes,
    Constraints,
}

const META_TABLES: &[(&str, &str)] = &[
    ("name", "text"),
    ("sort", "jsonb"),
    ("count_cutoff", "smallint"),
    ("id_ordered", "boolean"),
    ("out_of_order", "boolean"),
    ("has_extras", "boolean"),
    ("stats_valid", "boolean"),
    ("label_col", "text"),
    ("total", "bigint"),
    ("important", "boolean"),
    ("include_nones", "boolean"),
    ("table_description", "text"),
    ("col_description", "jsonb"),
];

const META_INDEXES: &[(&str, &str)] = &[
    ("index_name", "text"),
    ("table_name", "text"),
    ("type", "text"),
    ("columns", "jsonb"),
    ("modifiers", "jsonb"),
    ("storage_params", "jsonb"),
];

const META_CONSTRAINTS: &[(&str, &str)] = &[
    ("constraint_name", "text"),
    ("table_name", "text"),
    ("type", "text"),
    ("columns", "jsonb"),
    ("check_func", "text"),
];

impl MetaKind {
    pub const ALL: [MetaKind; 3] = [MetaKind::Tables, MetaKind::Indexes, MetaKind::Constraints];

    pub fn table(self) -> &'static str {
        match self {
            MetaKind::Tables => "meta_tables",
            MetaKind::Indexes => "meta_indexes",
            MetaKind::Constraints => "meta_constraints",
        }
    }

    pub fn history(self) -> String {
        format!("{}_hist", self.table())
    }

    /// The column naming the search table a row belongs to.
    pub fn key(self) -> &'static str {
        match self {
            MetaKind::Tables => "name",
            MetaKind::Indexes | MetaKind::Constraints => "table_name",
        }
    }

    pub fn columns(self) -> &'static [(&'static str, &'static str)] {
        match self {
            MetaKind::Tables => META_TABLES,
            MetaKind::Indexes => META_INDEXES,
            MetaKind::Constraints => META_CONSTRAINTS,
        }
    }

    pub fn column_names(self) -> Vec<&'static str> {
        self.columns().iter().map(|(c, _)| *c).collect()
    }

    fn key_position(self) -> usize {
        self.columns().iter().position(|(c, _)| *c == self.key()).unwrap_or(0)
    }
}

/// Versioned access to the metadata directories.
///
/// Every reload of a directory's rows for one table appends the new rows
/// to the history table under the next version number, so earlier states
/// can be restored with [`MetaCatalog::revert`].
pub struct MetaCatalog<'a> {
    conn: &'a ConnectionManager,
}

impl<'a> MetaCatalog<'a> {
    pub fn new(conn: &'a ConnectionManager) -> Self {
        MetaCatalog { conn }
    }

    fn key_filter(kind: MetaKind, table: &str) -> Sql {
        Sql::raw(" WHERE ").ident(kind.key()).text(" = ").param(SqlValue::text(table))
    }

    /// Create any missing directory and history table.
    pub fn create_tables(&self) -> Result<Vec<String>> {
        let mut created = Vec::new();
        self.conn.transaction(true, || {
            for kind in MetaKind::ALL {
                if !self.conn.table_exists(kind.table())? {
                    let creator = Sql::format("CREATE TABLE {} ({})", [Sql::identifier(kind.table()), column_defs(kind.columns())]);
                    self.conn.execute(&creator)?;
                    created.push(kind.table().to_string());
                }
                let history = kind.history();
                if !self.conn.table_exists(&history)? {
                    let mut columns = kind.columns().to_vec();
                    columns.push(("version", "integer"));
                    let creator = Sql::format("CREATE TABLE {} ({})", [Sql::identifier(&history), column_defs(&columns)]);
                    self.conn.execute(&creator)?;
                    created.push(history);
                }
            }
            Ok(())
        })?;
        if !created.is_empty() {
            info!(tables = ?created, "created metadata tables");
        }
        Ok(created)
    }

    /// Latest history version for `table`, or -1 when it has none.
    pub fn current_version(&self, kind: MetaKind, table: &str) -> Result<i64> {
        let selecter = Sql::raw("SELECT MAX(version) FROM ")
            .ident(&kind.history())
            .append(Self::key_filter(kind, table));
        Ok(self.conn.execute_with(&selecter, ExecOptions::silent())?.scalar_i64().unwrap_or(-1))
    }

    fn snapshot(&self, kind: MetaKind, table: &str, version: i64) -> Result<()> {
        let cols = Sql::identifiers(kind.column_names());
        let inserter = Sql::format(
            "INSERT INTO {} ({}, version) SELECT {}, ",
            [Sql::identifier(&kind.history()), cols.clone(), cols],
        )
        .param(SqlValue::Int(version))
        .text(" FROM ")
        .ident(kind.table())
        .append(Self::key_filter(kind, table));
        self.conn.execute_with(&inserter, ExecOptions::silent())?;
        Ok(())
    }

    /// Replace the rows for `table` with the contents of a delimited file and
    /// record them as a new history version.
    pub fn reload(&self, kind: MetaKind, path: &Path, table: &str, sep: char) -> Result<i64> {
        let file = DataFile::read(path, sep, false)?;
        let lines = file.lines(sep);
        let position = kind.key_position();
        for line in &lines {
            if line.get(position).map(String::as_str) != Some(table) {
                return Err(Error::invalid_argument(format!(
                    "Column {} of {} does not match the table {}",
                    position,
                    path.display(),
                    table
                )));
            }
        }
        let start = Instant::now();
        let version = self.conn.transaction(true, || {
            let deleter = Sql::raw("DELETE FROM ").ident(kind.table()).append(Self::key_filter(kind, table));
            self.conn.execute_with(&deleter, ExecOptions::silent())?;
            if !lines.is_empty() {
                let copier = Sql::format(
                    "COPY {} ({}) FROM STDIN",
                    [Sql::identifier(kind.table()), Sql::identifiers(kind.column_names())],
                )
                .append(delimiter_clause(sep));
                self.conn.copy_in(&copier, &file.body)?;
            }
            let version = self.current_version(kind, table)? + 1;
            self.snapshot(kind, table, version)?;
            Ok(version)
        })?;
        info!(meta = kind.table(), table, version, elapsed = start.elapsed().as_secs_f64(), "reloaded metadata");
        Ok(version)
    }

    /// Restore the rows of `version` (default: the one before the latest)
    /// and record them as a new version.
    pub fn revert(&self, kind: MetaKind, table: &str, version: Option<i64>) -> Result<i64> {
        let current = self.current_version(kind, table)?;
        if current == -1 {
            return Err(Error::invalid_state(format!("No {} history to revert for {}", kind.table(), table)));
        }
        let version = version.unwrap_or_else(|| (current - 1).max(0));
        if version < 0 || version > current {
            return Err(Error::invalid_argument(format!("Version {} of {} does not exist", version, kind.table())));
        }
        let cols = Sql::identifiers(kind.column_names());
        self.conn.transaction(true, || {
            let deleter = Sql::raw("DELETE FROM ").ident(kind.table()).append(Self::key_filter(kind, table));
            self.conn.execute_with(&deleter, ExecOptions::silent())?;
            let restorer = Sql::format(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                [Sql::identifier(kind.table()), cols.clone(), cols.clone(), Sql::identifier(&kind.history())],
            )
            .append(Self::key_filter(kind, table))
            .text(" AND version = ")
            .param(SqlValue::Int(version));
            self.conn.execute_with(&restorer, ExecOptions::silent())?;
            self.snapshot(kind, table, current + 1)
        })?;
        info!(meta = kind.table(), table, version, "reverted metadata");
        Ok(current + 1)
    }

    /// Write the rows for `table` to a delimited file without a header.
    pub fn copy_to(&self, kind: MetaKind, path: &Path, table: &str, sep: char) -> Result<()> {
        let selecter = Sql::format(
            "SELECT {} FROM {}",
            [Sql::identifiers(kind.column_names()), Sql::identifier(kind.table())],
        )
        .append(Self::key_filter(kind, table));
        let copier = Sql::format("COPY ({}) TO STDOUT", [selecter]).append(delimiter_clause(sep));
        let data = self.conn.copy_out(&copier)?;
        DataFile::write(path, None, &data, sep)
    }

    /// Raw rows for `table`, columns in directory order.
    pub fn rows(&self, kind: MetaKind, table: &str) -> Result<Vec<Vec<Option<String>>>> {
        let selecter = Sql::format(
            "SELECT {} FROM {}",
            [Sql::identifiers(kind.column_names()), Sql::identifier(kind.table())],
        )
        .append(Self::key_filter(kind, table));
        Ok(self.conn.execute_with(&selecter, ExecOptions::silent())?.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_shapes() {
        assert_eq!(MetaKind::Tables.key(), "name");
        assert_eq!(MetaKind::Indexes.key_position(), 1);
        assert_eq!(MetaKind::Constraints.history(), "meta_constraints_hist");
        assert_eq!(
            column_defs(&MetaKind::Constraints.columns()[..2]).render(),
            r#""constraint_name" text, "table_name" text"#
        );
    }
}
