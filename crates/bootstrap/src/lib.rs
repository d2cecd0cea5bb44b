//! tlsinit bootstrap library
//!
//! Obtains a Let's Encrypt certificate for a single domain over ACME
//! HTTP-01 and generates the reverse-proxy configuration and service
//! topology that use it.
//!
//! - **Inspection**: detect an existing certificate and its expiry
//! - **Port guard**: stop containers known to hold port 80
//! - **Challenge responder**: temporary HTTP server for the challenge window
//! - **Issuance**: certbot in a one-shot container
//! - **Templating**: deterministic nginx and docker compose output, replaced atomically
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tlsinit_bootstrap::{Bootstrap, CertbotIssuer, DockerCli};
//! use tlsinit_common::{ContactEmail, Domain};
//! use tlsinit_config::Config;
//!
//! let config = Config::default();
//! let issuer = CertbotIssuer::new("docker", "certbot/certbot", "./certbot/conf");
//! let bootstrap = Bootstrap::from_config(&config, Arc::new(DockerCli::default()), Arc::new(issuer))?;
//!
//! let outcome = bootstrap
//!     .run(&Domain::parse("chemi.vn")?, &ContactEmail::parse("admin@chemi.vn")?)
//!     .await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod artifacts;
pub mod confirm;
pub mod port_guard;
pub mod runtime;
pub mod signals;
pub mod templates;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Certificate acquisition
pub use acme::{
    AcmeError, Bootstrap, BootstrapOutcome, CertbotIssuer, CertificateInspector, CertificateIssuer,
    CertificateState, ChallengeResponder, IssueRequest, IssuerError, Stage,
};

// Artifacts
pub use artifacts::{write_atomic, write_atomic_with, ArtifactPaths, ArtifactSet};
pub use templates::{render, RenderedArtifacts, TemplateSettings};

// Runtime
pub use port_guard::{PortGuard, PortGuardReport};
pub use runtime::{ContainerRuntime, DockerCli};

// Confirmation
pub use confirm::{AssumeNo, AssumeYes, Confirm, StdinConfirm};
