use crate::connection::manager::{ConnectionManager, ExecOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;

const ALL_LOCKS: &[&str] = &[
    "AccessShareLock",
    "RowShareLock",
    "RowExclusiveLock",
    "ShareUpdateExclusiveLock",
    "ShareLock",
    "ShareRowExclusiveLock",
    "ExclusiveLock",
    "AccessExclusiveLock",
];

const WRITE_CONFLICTS: &[&str] = &["ShareLock", "ShareRowExclusiveLock", "ExclusiveLock", "AccessExclusiveLock"];

const INDEX_CONFLICTS: &[&str] = &[
    "RowExclusiveLock",
    "ShareUpdateExclusiveLock",
    "ShareRowExclusiveLock",
    "ExclusiveLock",
    "AccessExclusiveLock",
];

/// The operation about to run, which decides the lock modes it conflicts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Update,
    Delete,
    Insert,
    Index,
    All,
}

impl LockScope {
    pub fn parse(name: &str) -> Result<LockScope> {
        match name {
            "update" => Ok(LockScope::Update),
            "delete" => Ok(LockScope::Delete),
            "insert" => Ok(LockScope::Insert),
            "index" => Ok(LockScope::Index),
            "all" => Ok(LockScope::All),
            other => Err(Error::invalid_argument(format!("Invalid lock type {}", other))),
        }
    }

    pub fn modes(self) -> &'static [&'static str] {
        match self {
            LockScope::Update | LockScope::Delete | LockScope::Insert => WRITE_CONFLICTS,
            LockScope::Index => INDEX_CONFLICTS,
            LockScope::All => ALL_LOCKS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub table: String,
    pub mode: String,
    pub pid: i32,
    pub age: String,
}

impl ConnectionManager {
    /// Granted locks on `tables` held by other sessions that conflict with `scope`.
    pub fn table_locks(&self, tables: &[String], scope: LockScope) -> Result<Vec<LockInfo>> {
        let query = Sql::raw(
            "SELECT t.relname, l.mode, l.pid, age(clock_timestamp(), a.backend_start) \
             FROM pg_locks l \
             JOIN pg_stat_all_tables t ON l.relation = t.relid \
             JOIN pg_stat_activity a ON l.pid = a.pid \
             WHERE l.granted AND t.schemaname <> 'pg_toast'::name AND t.schemaname <> 'pg_catalog'::name \
             AND t.relname = ANY(",
        )
        .param(SqlValue::Array(tables.iter().map(|t| SqlValue::text(t.as_str())).collect()))
        .text(")");
        let rs = self.execute_with(&query, ExecOptions::silent())?;
        let own_pid = self.backend_pid();
        let modes = scope.modes();
        Ok(rs
            .rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                let table = cells.next().flatten()?;
                let mode = cells.next().flatten()?;
                let pid = cells.next().flatten()?.parse().ok()?;
                let age = cells.next().flatten().unwrap_or_default();
                Some(LockInfo { table, mode, pid, age })
            })
            .filter(|lock| lock.pid != own_pid && modes.contains(&lock.mode.as_str()))
            .filter(|lock| tables.contains(&lock.table))
            .collect())
    }

    /// Fail fast when another session holds a conflicting lock.
    pub fn check_locks(&self, tables: &[String], scope: LockScope) -> Result<()> {
        let locks = self.table_locks(tables, scope)?;
        if locks.is_empty() {
            return Ok(());
        }
        let held: Vec<String> = locks
            .iter()
            .map(|l| format!("{} on {} (pid {})", l.mode, l.table, l.pid))
            .collect();
        Err(Error::new(
            ErrorKind::Concurrency,
            format!("Tables are locked: {}", held.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes() {
        assert_eq!(LockScope::parse("index").unwrap(), LockScope::Index);
        assert!(LockScope::parse("select").is_err());
        assert!(LockScope::Delete.modes().contains(&"ShareLock"));
        assert!(!LockScope::Delete.modes().contains(&"RowExclusiveLock"));
        assert!(LockScope::Index.modes().contains(&"RowExclusiveLock"));
        assert_eq!(LockScope::All.modes().len(), 8);
    }
}
