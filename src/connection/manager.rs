use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::delay_commit::DelayCommit;
use crate::connection::session::{Connector, Session};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::ResultSet;

/// Facades that cache state derived from the live session.
pub trait ConnectionListener: Send + Sync {
    fn on_reconnect(&self, generation: u64);
}

/// Per-statement execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    pub commit: Option<bool>,   // None: commit unless inside a delay-commit scope
    pub silent: bool,           // Skip slow-query logging
    pub buffered: bool,         // Feeds a named cursor; never commits
}

impl ExecOptions {
    pub fn commit(commit: bool) -> Self {
        ExecOptions { commit: Some(commit), ..Default::default() }
    }

    pub fn silent() -> Self {
        ExecOptions { silent: true, ..Default::default() }
    }

    pub fn buffered() -> Self {
        ExecOptions { buffered: true, ..Default::default() }
    }
}

/// Owns the single session, reconnects it on failure and tracks the
/// delay-commit depth shared by every facade.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    session: Mutex<Box<dyn Session>>,
    depth: AtomicUsize,
    generation: AtomicU64,
    read_only: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn ConnectionListener>>>,
    config: Config,
}

enum Failure {
    Closed(Error),
    Open(Error),
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>, config: Config) -> Result<Arc<Self>> {
        let session = connector.connect()?;
        let manager = Arc::new(ConnectionManager {
            connector,
            session: Mutex::new(session),
            depth: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            read_only: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            config,
        });
        manager.detect_read_only()?;
        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True on a hot standby; statistics are never written there.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn detect_read_only(&self) -> Result<()> {
        let rs = self.execute_with(&Sql::raw("SELECT pg_is_in_recovery()"), ExecOptions::silent())?;
        let read_only = rs.scalar() == Some("t");
        if read_only {
            info!("connected to a read-only replica");
        }
        self.read_only.store(read_only, Ordering::SeqCst);
        Ok(())
    }

    pub fn register(&self, listener: Weak<dyn ConnectionListener>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub(crate) fn enter(&self) -> usize {
        self.depth.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn leave(&self) -> usize {
        let previous = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Suppress commits until the returned guard is finished or dropped.
    pub fn delay_commit(&self, final_commit: bool) -> DelayCommit<'_> {
        DelayCommit::new(self, final_commit)
    }

    /// Run `f` as one transaction: committed at depth zero, rolled back on error.
    pub fn transaction<T>(&self, final_commit: bool, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.delay_commit(final_commit);
        let value = f()?;
        guard.finish()?;
        Ok(value)
    }

    pub fn execute(&self, sql: &Sql) -> Result<ResultSet> {
        self.execute_with(sql, ExecOptions::default())
    }

    pub fn execute_with(&self, sql: &Sql, options: ExecOptions) -> Result<ResultSet> {
        if options.buffered && options.commit == Some(true) {
            return Err(Error::invalid_argument("Buffered statements cannot commit"));
        }
        let statement = sql.render();
        self.run(&statement, options, false)
    }

    fn run(&self, statement: &str, options: ExecOptions, reissued: bool) -> Result<ResultSet> {
        let commit = if options.buffered {
            false
        } else {
            options.commit.unwrap_or_else(|| self.depth() == 0)
        };
        let start = Instant::now();
        let outcome = {
            let mut session = self.session.lock();
            match session.execute(statement) {
                Ok(rs) if commit => session.commit().map(|_| rs).map_err(Failure::Open),
                Ok(rs) => Ok(rs),
                Err(err) if session.is_closed() || err.is_connection() => Err(Failure::Closed(err)),
                Err(err) => {
                    if let Err(rollback_err) = session.rollback() {
                        warn!(error = %rollback_err, "rollback after failed statement failed");
                    }
                    Err(Failure::Open(err))
                }
            }
        };
        match outcome {
            Ok(rs) => {
                let elapsed = start.elapsed().as_secs_f64();
                if !options.silent && elapsed > self.config.slow_cutoff {
                    info!(target: "relstore::slow", elapsed, statement, "slow query");
                }
                debug!(statement, rows = rs.rowcount(), "executed");
                Ok(rs)
            }
            Err(Failure::Open(err)) => Err(err.with_statement(statement)),
            Err(Failure::Closed(err)) => {
                warn!(error = %err, "connection lost, reconnecting");
                self.reset_connection()?;
                // A statement inside an uncommitted sequence is not replayed
                if !reissued && (options.commit == Some(true) || self.depth() == 0) {
                    self.run(statement, options, true)
                } else {
                    Err(Error::new(ErrorKind::Connection, err.context).with_statement(statement))
                }
            }
        }
    }

    /// Feed bulk data to a `COPY ... FROM STDIN` statement.
    pub fn copy_in(&self, sql: &Sql, data: &[u8]) -> Result<u64> {
        let statement = sql.render();
        let commit = self.depth() == 0;
        let mut session = self.session.lock();
        let result = session.copy_in(&statement, data).and_then(|n| {
            if commit {
                session.commit()?;
            }
            Ok(n)
        });
        if result.is_err() && !session.is_closed() {
            if let Err(rollback_err) = session.rollback() {
                warn!(error = %rollback_err, "rollback after failed copy failed");
            }
        }
        result.map_err(|e| e.with_statement(statement))
    }

    pub fn copy_out(&self, sql: &Sql) -> Result<Vec<u8>> {
        let statement = sql.render();
        let mut session = self.session.lock();
        session.copy_out(&statement).map_err(|e| e.with_statement(statement))
    }

    pub fn commit(&self) -> Result<()> {
        self.session.lock().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.session.lock().rollback()
    }

    pub fn backend_pid(&self) -> i32 {
        self.session.lock().backend_pid()
    }

    /// Replace the session and tell every live facade.
    pub fn reset_connection(&self) -> Result<()> {
        let fresh = self.connector.connect()?;
        *self.session.lock() = fresh;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let listeners: Vec<Arc<dyn ConnectionListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_reconnect(generation);
        }
        info!(generation, "connection re-established");
        Ok(())
    }
}
