pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod init;
pub mod llm;
pub mod models;
pub mod registries;
pub mod services;
pub mod store;
pub mod utils;

pub use error::TaleforgeError;
