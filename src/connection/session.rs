use crate::core::error::Result;
use crate::core::types::ResultSet;

/// One live session with the backing store.
///
/// Statements arrive fully rendered. A session runs in explicit transaction
/// mode: nothing is durable until [`Session::commit`].
pub trait Session: Send {
    fn execute(&mut self, statement: &str) -> Result<ResultSet>;

    /// Run a `COPY ... FROM STDIN` statement feeding it `data`; returns rows copied.
    fn copy_in(&mut self, statement: &str, data: &[u8]) -> Result<u64>;

    /// Run a `COPY ... TO STDOUT` statement and collect its output.
    fn copy_out(&mut self, statement: &str) -> Result<Vec<u8>>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Backend process id, used to ignore our own locks.
    fn backend_pid(&self) -> i32;
}

/// Opens sessions; called once at startup and again after a dropped connection.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Session>>;
}
