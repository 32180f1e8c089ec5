//! Pubmerge core — publication list, record shapes, configuration.

pub mod config;
pub mod error;
pub mod models;

pub use config::{AppConfig, NetworkConfig, SourcesConfig};
pub use error::{CoreError, Result};
pub use models::*;
