use std::collections::VecDeque;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::connection::manager::{ConnectionManager, ExecOptions};
use crate::core::error::Result;
use crate::core::sql::Sql;
use crate::core::types::TextRow;

/// Server-side cursor read in batches.
///
/// The cursor is closed, and its transaction committed at depth zero, when
/// it is exhausted or dropped.
pub struct NamedCursor {
    conn: Arc<ConnectionManager>,
    name: String,
    batch: usize,
    buffer: VecDeque<TextRow>,
    columns: Vec<String>,
    exhausted: bool,
    closed: bool,
}

impl NamedCursor {
    pub fn open(conn: &Arc<ConnectionManager>, query: Sql) -> Result<Self> {
        let name = format!("cur_{}", Uuid::new_v4().simple());
        let declare = Sql::raw("DECLARE ")
            .ident(&name)
            .text(" NO SCROLL CURSOR WITH HOLD FOR ")
            .append(query);
        conn.execute_with(&declare, ExecOptions::buffered())?;
        Ok(NamedCursor {
            conn: Arc::clone(conn),
            name,
            batch: conn.config().cursor_batch.max(1),
            buffer: VecDeque::new(),
            columns: Vec::new(),
            exhausted: false,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column names, known after the first fetch.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn fetch(&mut self) -> Result<()> {
        let fetch = Sql::raw(format!("FETCH FORWARD {} FROM ", self.batch)).ident(&self.name);
        let rs = self.conn.execute_with(&fetch, ExecOptions { silent: true, ..ExecOptions::buffered() })?;
        if self.columns.is_empty() {
            self.columns = rs.columns;
        }
        if rs.rows.len() < self.batch {
            self.exhausted = true;
        }
        self.buffer.extend(rs.rows);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.conn.execute_with(&Sql::raw("CLOSE ").ident(&self.name), ExecOptions::silent())?;
        Ok(())
    }
}

impl Iterator for NamedCursor {
    type Item = Result<TextRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(Ok(row));
            }
            if self.exhausted || self.closed {
                return match self.close() {
                    Ok(()) => None,
                    Err(err) => Some(Err(err)),
                };
            }
            if let Err(err) = self.fetch() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
    }
}

impl Drop for NamedCursor {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(cursor = %self.name, error = %err, "failed to close cursor");
        }
    }
}
