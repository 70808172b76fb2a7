pub mod config;
pub mod error;
pub mod key;
pub mod types;
