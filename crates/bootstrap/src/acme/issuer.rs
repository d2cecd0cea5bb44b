//! External certificate issuer.
//!
//! The ACME exchange itself is delegated to certbot, run as a one-shot
//! container that shares the letsencrypt directory and the challenge
//! webroot with the host. certbot owns its own retry and timeout policy, so
//! nothing here imposes one. The container is named so an interrupted run
//! can remove it even when only the docker client was killed.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use tlsinit_common::{ContactEmail, Domain, StepOutcome};

use crate::runtime::{ContainerRuntime, DockerCli, RuntimeError};

/// Where certbot expects its configuration inside the container
const LETSENCRYPT_MOUNT: &str = "/etc/letsencrypt";

/// Where certbot writes challenge files inside the container
pub const WEBROOT_MOUNT: &str = "/var/www/certbot";

/// Name of the certbot container unless configured otherwise
pub const DEFAULT_ISSUER_CONTAINER: &str = "tlsinit-acme-issuer";

/// Issuer errors
#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("Failed to launch issuer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid issuer path {path:?}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The issuer ran and refused; `output` is its own diagnostic text
    #[error("issuer exited with {status}: {output}")]
    Rejected { status: String, output: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A single certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub domain: Domain,
    pub email: ContactEmail,
    /// Host directory served under `/.well-known/acme-challenge/`
    pub webroot: PathBuf,
    /// Replace an existing certificate even if it is not due for renewal
    pub force_renew: bool,
}

/// Something that can obtain a certificate for a domain over HTTP-01
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Perform the ACME exchange. On success the bundle exists under the
    /// issuer's `live/<domain>/` directory.
    async fn issue(&self, request: &IssueRequest) -> Result<(), IssuerError>;

    /// Tear down an issuance whose `issue` future was dropped.
    ///
    /// Issuers that do all their work inside `issue` have nothing to do.
    async fn abort(&self) -> Result<StepOutcome, IssuerError> {
        Ok(StepOutcome::AlreadyDone)
    }
}

/// certbot in a throwaway container
#[derive(Debug, Clone)]
pub struct CertbotIssuer {
    docker_binary: String,
    image: String,
    letsencrypt_dir: PathBuf,
    container_name: String,
    staging: bool,
    key_type: String,
}

impl CertbotIssuer {
    pub fn new(
        docker_binary: impl Into<String>,
        image: impl Into<String>,
        letsencrypt_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            docker_binary: docker_binary.into(),
            image: image.into(),
            letsencrypt_dir: letsencrypt_dir.into(),
            container_name: DEFAULT_ISSUER_CONTAINER.to_string(),
            staging: false,
            key_type: "ecdsa".to_string(),
        }
    }

    /// Use the ACME staging directory (untrusted certificates, generous
    /// rate limits)
    pub fn with_staging(mut self, staging: bool) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_key_type(mut self, key_type: impl Into<String>) -> Self {
        self.key_type = key_type.into();
        self
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    fn runtime(&self) -> DockerCli {
        DockerCli::new(self.docker_binary.clone())
    }

    /// Arguments passed to the docker client
    pub fn command_args(&self, request: &IssueRequest) -> Result<Vec<String>, IssuerError> {
        let letsencrypt = absolute(&self.letsencrypt_dir)?;
        let webroot = absolute(&request.webroot)?;

        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            self.container_name.clone(),
            "-v".into(),
            format!("{}:{}", letsencrypt.display(), LETSENCRYPT_MOUNT),
            "-v".into(),
            format!("{}:{}", webroot.display(), WEBROOT_MOUNT),
            self.image.clone(),
            "certonly".into(),
            "--webroot".into(),
            "-w".into(),
            WEBROOT_MOUNT.into(),
            "-d".into(),
            request.domain.to_string(),
            "--email".into(),
            request.email.to_string(),
            "--agree-tos".into(),
            "--no-eff-email".into(),
            "--non-interactive".into(),
            "--key-type".into(),
            self.key_type.clone(),
        ];

        if request.force_renew {
            args.push("--force-renewal".to_string());
        }
        if self.staging {
            args.push("--staging".to_string());
        }
        Ok(args)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, IssuerError> {
    std::path::absolute(path).map_err(|source| IssuerError::Path {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl CertificateIssuer for CertbotIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<(), IssuerError> {
        let args = self.command_args(request)?;

        info!(
            domain = %request.domain,
            force_renew = request.force_renew,
            staging = self.staging,
            "Requesting certificate from ACME server (this can take a while)"
        );
        debug!(args = ?args, "Running certbot");

        // A leftover from a killed run would hold the name
        if let Err(e) = self.runtime().stop(&self.container_name).await {
            warn!(container = %self.container_name, error = %e, "Failed to remove stale issuer container");
        }

        let output = Command::new(&self.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| IssuerError::Spawn {
                program: self.docker_binary.clone(),
                source,
            })?;

        if output.status.success() {
            info!(domain = %request.domain, "Certificate issued");
            return Ok(());
        }

        // certbot reports most failures on stderr, some only on stdout
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let text = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };

        Err(IssuerError::Rejected {
            status: output.status.to_string(),
            output: text,
        })
    }

    async fn abort(&self) -> Result<StepOutcome, IssuerError> {
        let outcome = self.runtime().stop(&self.container_name).await?;
        if outcome == StepOutcome::Done {
            info!(container = %self.container_name, "Removed interrupted issuer container");
        }
        Ok(outcome)
    }
}
