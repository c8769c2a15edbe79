//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use sunalite_core::config;
//!
//! let cfg = config::load_config(None).expect("config");
//! println!("Model: {}", cfg.agent.model);
//! ```

pub mod loader;
pub mod schema;

use std::path::PathBuf;
use thiserror::Error;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::Config;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
