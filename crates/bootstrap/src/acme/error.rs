//! Bootstrap error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

use super::issuer::IssuerError;

/// Errors that end a bootstrap run
///
/// Each variant corresponds to one failure class with its own exit code,
/// so scripts wrapping the tool can tell "port busy" from "ACME said no".
#[derive(Error, Debug)]
pub enum AcmeError {
    /// Port could not be cleared, directories could not be created, or
    /// existing state could not be read. Raised before any network call.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Challenge responder failed to start: {0}")]
    ResponderStartup(String),

    /// Propagated verbatim from the issuer
    #[error("Certificate issuance failed: {0}")]
    Issuance(#[source] IssuerError),

    #[error("Failed to write {path:?}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render service topology: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("Interrupted before completion")]
    Cancelled,
}

impl AcmeError {
    /// Process exit code for this failure class
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Precondition(_) => 2,
            Self::ResponderStartup(_) => 3,
            Self::Issuance(_) => 4,
            Self::Artifact { .. } | Self::Render(_) => 5,
            Self::Cancelled => 130,
        }
    }
}
