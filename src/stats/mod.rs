pub mod buckets;
pub mod engine;
pub mod store;

pub use engine::StatsEngine;
pub use store::{StatFamily, StatsStatus};
