use crate::connection::manager::{ConnectionManager, ExecOptions};
use crate::core::error::Result;
use crate::core::sql::Sql;
use crate::core::types::SqlValue;

fn text(s: &str) -> SqlValue {
    SqlValue::text(s)
}

impl ConnectionManager {
    fn first_column(&self, sql: Sql) -> Result<Vec<String>> {
        let rs = self.execute_with(&sql, ExecOptions::silent())?;
        Ok(rs.rows.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect())
    }

    fn any_row(&self, sql: Sql) -> Result<bool> {
        Ok(self.execute_with(&sql, ExecOptions::silent())?.rowcount() > 0)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        self.any_row(Sql::raw("SELECT 1 FROM pg_tables WHERE tablename = ").param(text(name)))
    }

    /// Any relation: table, index, sequence or view.
    pub fn relation_exists(&self, name: &str) -> Result<bool> {
        self.any_row(Sql::raw("SELECT 1 FROM pg_class WHERE relname = ").param(text(name)))
    }

    pub fn index_exists(&self, index: &str, table: Option<&str>) -> Result<bool> {
        match table {
            Some(table) => self.any_row(
                Sql::raw("SELECT 1 FROM pg_indexes WHERE indexname = ")
                    .param(text(index))
                    .text(" AND tablename = ")
                    .param(text(table)),
            ),
            None => Ok(self.index_table(index)?.is_some()),
        }
    }

    /// The table an index is built on.
    pub fn index_table(&self, index: &str) -> Result<Option<String>> {
        let tables =
            self.first_column(Sql::raw("SELECT tablename FROM pg_indexes WHERE indexname = ").param(text(index)))?;
        Ok(tables.into_iter().next())
    }

    pub fn constraint_exists(&self, constraint: &str, table: Option<&str>) -> Result<bool> {
        match table {
            Some(table) => self.any_row(
                Sql::raw("SELECT 1 FROM information_schema.table_constraints WHERE table_name = ")
                    .param(text(table))
                    .text(" AND constraint_name = ")
                    .param(text(constraint)),
            ),
            None => Ok(self.constraint_table(constraint)?.is_some()),
        }
    }

    pub fn constraint_table(&self, constraint: &str) -> Result<Option<String>> {
        let tables = self.first_column(
            Sql::raw("SELECT table_name FROM information_schema.table_constraints WHERE constraint_name = ")
                .param(text(constraint)),
        )?;
        Ok(tables.into_iter().next())
    }

    pub fn list_indexes(&self, table: &str) -> Result<Vec<String>> {
        self.first_column(Sql::raw("SELECT indexname FROM pg_indexes WHERE tablename = ").param(text(table)))
    }

    pub fn list_constraints(&self, table: &str) -> Result<Vec<String>> {
        self.first_column(
            Sql::raw(
                "SELECT con.conname FROM pg_catalog.pg_constraint con \
                 INNER JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid \
                 INNER JOIN pg_catalog.pg_namespace nsp ON nsp.oid = connamespace \
                 WHERE rel.relname = ",
            )
            .param(text(table)),
        )
    }

    /// (column, declared type) in table order.
    pub fn column_types(&self, table: &str) -> Result<Vec<(String, String)>> {
        let rs = self.execute_with(
            &Sql::raw(
                "SELECT column_name, udt_name::regtype FROM information_schema.columns \
                 WHERE table_name = ",
            )
            .param(text(table))
            .text(" ORDER BY ordinal_position"),
            ExecOptions::silent(),
        )?;
        Ok(rs
            .rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                Some((cells.next().flatten()?, cells.next().flatten()?))
            })
            .collect())
    }
}
