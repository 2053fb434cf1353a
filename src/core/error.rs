use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,   // Unwhitelisted type, index kind, modifier or parameter
    Query,           // Unknown column, bad operator, rejected $raw expression
    Concurrency,     // Conflicting lock held by another session
    Connection,      // Session closed or unreachable
    Consistency,     // Paired files disagree, random retries exhausted
    Database,        // Driver error on an open session
    Permission,      // Insufficient privilege on the backing store
    NotFound,
    InvalidArgument,
    InvalidState,
    Io,
    Parse,
}

#[derive(Debug, thiserror::Error)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    pub statement: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context, statement: None }
    }

    pub fn configuration(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Configuration, context.into())
    }

    pub fn query(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Query, context.into())
    }

    pub fn consistency(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Consistency, context.into())
    }

    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, context.into())
    }

    pub fn invalid_state(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidState, context.into())
    }

    /// Attach the statement that was being executed.
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    pub fn is_connection(&self) -> bool {
        self.kind == ErrorKind::Connection
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)?;
        if let Some(statement) = &self.statement {
            write!(f, " (statement: {})", statement)?;
        }
        Ok(())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Parse, err.to_string())
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        let kind = if err.is_closed() {
            ErrorKind::Connection
        } else if err.code() == Some(&tokio_postgres::error::SqlState::INSUFFICIENT_PRIVILEGE) {
            ErrorKind::Permission
        } else {
            ErrorKind::Database
        };
        let context = match err.as_db_error() {
            Some(db) => format!("{}: {}", db.code().code(), db.message()),
            None => err.to_string(),
        };
        Error::new(kind, context)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_statement() {
        let err = Error::query("degree is not a column of nf_fields")
            .with_statement("SELECT 1");
        assert_eq!(
            err.to_string(),
            "Query: degree is not a column of nf_fields (statement: SELECT 1)"
        );
        assert!(!err.is_connection());
    }
}
