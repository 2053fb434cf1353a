use tracing::warn;

use crate::connection::manager::ConnectionManager;
use crate::core::error::Result;

/// Nestable commit suppression.
///
/// While any guard is alive, statements run without committing. Finishing
/// the outermost guard commits; dropping a guard without finishing it (an
/// error unwound past it) rolls the session back.
pub struct DelayCommit<'a> {
    conn: &'a ConnectionManager,
    final_commit: bool,
    finished: bool,
}

impl<'a> DelayCommit<'a> {
    pub(crate) fn new(conn: &'a ConnectionManager, final_commit: bool) -> Self {
        conn.enter();
        DelayCommit { conn, final_commit, finished: false }
    }

    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        let depth = self.conn.leave();
        if depth == 0 && self.final_commit {
            self.conn.commit()?;
        }
        Ok(())
    }
}

impl Drop for DelayCommit<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.conn.leave();
        if let Err(err) = self.conn.rollback() {
            warn!(error = %err, "rollback on abandoned transaction failed");
        }
    }
}
