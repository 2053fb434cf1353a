pub mod ast;
pub mod parser;
pub mod types;
pub mod array_literal;
pub mod raw;
pub mod translator;
pub mod cache;
pub mod sort;
