pub mod types;
pub mod sql;
pub mod database;
pub mod config;
pub mod error;
