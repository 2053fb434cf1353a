use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::backend::postgres::PostgresConnector;
use crate::connection::manager::{ConnectionManager, ExecOptions};
use crate::connection::session::Connector;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::schema::manager::SchemaManager;
use crate::search::table::{SearchTable, META_TABLE_COLUMNS};

/// Entry point: one connection and the registry of search tables known to it.
///
/// Tables are looked up by name. The registry is filled from `meta_tables`
/// when the database is opened and kept current by [`SchemaManager`].
pub struct Database {
    conn: Arc<ConnectionManager>,
    tables: RwLock<BTreeMap<String, Arc<SearchTable>>>,
}

impl Database {
    pub fn connect(config: Config) -> Result<Database> {
        let connector = PostgresConnector::new(config.clone());
        Self::with_connector(Box::new(connector), config)
    }

    pub fn with_connector(connector: Box<dyn Connector>, config: Config) -> Result<Database> {
        let conn = ConnectionManager::new(connector, config)?;
        let db = Database { conn, tables: RwLock::new(BTreeMap::new()) };
        db.refresh_tables()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    pub fn schema(&self) -> SchemaManager<'_> {
        SchemaManager::new(self)
    }

    pub fn table(&self, name: &str) -> Result<Arc<SearchTable>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("No table named {}", name)))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn tables(&self) -> Vec<Arc<SearchTable>> {
        self.tables.read().values().cloned().collect()
    }

    pub(crate) fn register(&self, table: Arc<SearchTable>) {
        self.tables.write().insert(table.name(), table);
    }

    pub(crate) fn unregister(&self, name: &str) -> Option<Arc<SearchTable>> {
        self.tables.write().remove(name)
    }

    /// Rebuild the registry from `meta_tables`. A database without the
    /// metadata tables has no search tables yet.
    pub fn refresh_tables(&self) -> Result<usize> {
        if !self.conn.table_exists("meta_tables")? {
            self.tables.write().clear();
            return Ok(0);
        }
        let selecter = Sql::format(
            "SELECT {} FROM {} ORDER BY name",
            [Sql::identifiers(META_TABLE_COLUMNS.iter().copied()), Sql::identifier("meta_tables")],
        );
        let rows = self.conn.execute_with(&selecter, ExecOptions::silent())?.rows;
        let mut fresh = BTreeMap::new();
        for row in &rows {
            let descriptor = SearchTable::describe(&self.conn, row)?;
            let name = descriptor.name.clone();
            // Keep existing handles so callers holding them see the refresh
            let table = match self.tables.read().get(&name) {
                Some(existing) => {
                    existing.replace_descriptor(descriptor);
                    Arc::clone(existing)
                }
                None => SearchTable::new(Arc::clone(&self.conn), descriptor),
            };
            fresh.insert(name, table);
        }
        let count = fresh.len();
        *self.tables.write() = fresh;
        info!(tables = count, "loaded table registry");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::ScriptedBackend;

    #[test]
    fn empty_database_has_no_tables() {
        let backend = ScriptedBackend::new();
        let db = Database::with_connector(Box::new(backend.clone()), Config::default()).unwrap();
        assert!(db.table_names().is_empty());
        assert_eq!(db.table("nf_fields").unwrap_err().kind, ErrorKind::NotFound);
        assert!(backend.statements().iter().any(|s| s.contains("pg_tables")));
    }
}
