//! Core types, configuration, and error taxonomy shared by all Sibyl crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::SibylConfig;
pub use error::{Result, SibylError};
