pub mod table;
pub mod executor;
pub mod projection;
pub mod results;
pub mod random;
pub mod mutate;
