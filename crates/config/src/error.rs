//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid KDL syntax: {0}")]
    Syntax(#[from] ::kdl::KdlError),

    #[error("Invalid '{section}' section: {message}")]
    Section { section: String, message: String },
}
