pub mod db;
pub mod error;
pub mod import;
pub mod parser;
pub mod persist;
pub mod reader;
pub mod server;
pub mod settings;
