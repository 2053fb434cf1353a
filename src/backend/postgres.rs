use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::connection::session::{Connector, Session};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::ResultSet;

/// Opens PostgreSQL sessions from a [`Config`].
pub struct PostgresConnector {
    config: Config,
}

impl PostgresConnector {
    pub fn new(config: Config) -> Self {
        PostgresConnector { config }
    }
}

impl Connector for PostgresConnector {
    fn connect(&self) -> Result<Box<dyn Session>> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::new(ErrorKind::Connection, format!("failed to start runtime: {}", e)))?;
        let dsn = self.config.connection_string();
        let (client, connection) = runtime.block_on(tokio_postgres::connect(&dsn, NoTls))?;
        runtime.spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection terminated");
            }
        });
        let mut session = PostgresSession { runtime, client, in_transaction: false, pid: 0 };
        session.setup()?;
        debug!(host = %self.config.host, dbname = %self.config.dbname, pid = session.pid, "connected");
        Ok(Box::new(session))
    }
}

/// A blocking session over `tokio-postgres`, driven by its own
/// current-thread runtime. Must not be used from inside another runtime.
///
/// Statements are sent over the simple query protocol with parameters
/// already inlined, so every value arrives as text.
pub struct PostgresSession {
    runtime: Runtime,
    client: Client,
    in_transaction: bool,
    pid: i32,
}

impl PostgresSession {
    fn setup(&mut self) -> Result<()> {
        let client = &self.client;
        self.runtime
            .block_on(client.batch_execute("SET standard_conforming_strings = on"))?;
        let rows = self.runtime.block_on(client.simple_query("SELECT pg_backend_pid()"))?;
        self.pid = rows
            .iter()
            .find_map(|m| match m {
                SimpleQueryMessage::Row(row) => row.get(0).and_then(|p| p.parse().ok()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.runtime.block_on(self.client.batch_execute("BEGIN"))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn finish(&mut self, command: &str) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.runtime.block_on(self.client.batch_execute(command))?;
        }
        Ok(())
    }
}

impl Session for PostgresSession {
    fn execute(&mut self, statement: &str) -> Result<ResultSet> {
        self.begin()?;
        let messages = self.runtime.block_on(self.client.simple_query(statement))?;
        let mut rs = ResultSet::empty();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(columns) => {
                    rs.columns = columns.iter().map(|c| c.name().to_string()).collect();
                }
                SimpleQueryMessage::Row(row) => {
                    if rs.columns.is_empty() {
                        rs.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    rs.rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
                }
                SimpleQueryMessage::CommandComplete(n) => rs.rows_affected = n,
                _ => {}
            }
        }
        Ok(rs)
    }

    fn copy_in(&mut self, statement: &str, data: &[u8]) -> Result<u64> {
        self.begin()?;
        let client = &self.client;
        let rows = self.runtime.block_on(async {
            let sink = client.copy_in::<_, Bytes>(statement).await?;
            let mut sink = std::pin::pin!(sink);
            sink.send(Bytes::copy_from_slice(data)).await?;
            sink.as_mut().finish().await
        })?;
        Ok(rows)
    }

    fn copy_out(&mut self, statement: &str) -> Result<Vec<u8>> {
        self.begin()?;
        let client = &self.client;
        let data = self.runtime.block_on(async {
            let stream = client.copy_out(statement).await?;
            let mut stream = std::pin::pin!(stream);
            let mut out = Vec::new();
            while let Some(chunk) = stream.next().await {
                out.extend_from_slice(&chunk?);
            }
            Ok::<_, tokio_postgres::Error>(out)
        })?;
        Ok(data)
    }

    fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK")
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    fn backend_pid(&self) -> i32 {
        self.pid
    }
}
