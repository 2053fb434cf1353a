pub mod file_format;
pub mod engine;
pub mod all;
