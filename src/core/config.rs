use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Connection
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,

    // Execution
    pub slow_cutoff: f64,                // Seconds before a statement is logged as slow
    pub cursor_batch: usize,             // Rows per FETCH from a named cursor

    // Search and statistics
    pub record_counts: bool,             // Cache live counts in the counts table
    pub count_cutoff: i64,               // Prefetch cap for inexact counts
    pub compiled_cache_size: usize,      // Compiled predicates kept per table
    pub random_attempts: usize,          // Id probes before random() gives up

    // Bulk files
    pub copy_separator: char,

    // Schema
    pub check_functions: Vec<String>,    // Functions allowed in CHECK constraints
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: None,

            slow_cutoff: 0.1,
            cursor_batch: 1000,

            record_counts: true,
            count_cutoff: 1000,
            compiled_cache_size: 512,
            random_attempts: 100,

            copy_separator: '|',

            check_functions: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults overridden by the standard libpq environment variables.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(host) = std::env::var("PGHOST") {
            config.host = host;
        }
        if let Some(port) = std::env::var("PGPORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(dbname) = std::env::var("PGDATABASE") {
            config.dbname = dbname;
        }
        if let Ok(user) = std::env::var("PGUSER") {
            config.user = user;
        }
        if let Ok(password) = std::env::var("PGPASSWORD") {
            config.password = Some(password);
        }
        config
    }

    pub fn connection_string(&self) -> String {
        let mut dsn = format!(
            "host={} port={} dbname={} user={}",
            self.host, self.port, self.dbname, self.user
        );
        if let Some(password) = &self.password {
            dsn.push_str(&format!(" password={}", password));
        }
        dsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"dbname": "lmfdb", "slow_cutoff": 0.5}"#).unwrap();
        assert_eq!(config.dbname, "lmfdb");
        assert_eq!(config.slow_cutoff, 0.5);
        assert_eq!(config.port, 5432);
        assert_eq!(config.copy_separator, '|');
        assert_eq!(
            config.connection_string(),
            "host=localhost port=5432 dbname=lmfdb user=postgres"
        );
    }
}
