pub mod whitelist;
pub mod catalog;
pub mod relations;
pub mod index;
pub mod manager;
