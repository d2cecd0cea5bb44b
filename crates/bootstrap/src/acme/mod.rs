//! ACME HTTP-01 certificate acquisition
//!
//! # Architecture
//!
//! - [`CertificateInspector`] - Reads the state of an existing certificate bundle
//! - [`ChallengeResponder`] - Serves the challenge webroot on port 80 for the
//!   duration of the exchange
//! - [`CertificateIssuer`] - Performs the ACME exchange ([`CertbotIssuer`] in production)
//! - [`Bootstrap`] - Runs the whole flow and regenerates the proxy configuration
//!
//! # Challenge Flow
//!
//! 1. [`CertificateInspector`] reports whether a bundle already exists
//! 2. An existing bundle is only replaced after operator confirmation
//! 3. The port guard stops anything known to hold port 80
//! 4. [`ChallengeResponder`] starts and is probed until it accepts connections
//! 5. The issuer writes tokens into the shared webroot and the ACME server
//!    fetches them from `/.well-known/acme-challenge/<token>`
//! 6. The responder is stopped, whatever the outcome
//! 7. On success the proxy configuration and service topology are rewritten

mod challenge;
mod error;
mod issuer;
mod orchestrator;
mod storage;

pub use challenge::{
    extract_token, ChallengeResponder, ContainerResponder, EmbeddedResponder, ResponderBackend,
    ResponderError, ResponderState, ACME_CHALLENGE_PREFIX,
};
pub use error::AcmeError;
pub use issuer::{CertbotIssuer, CertificateIssuer, IssueRequest, IssuerError, WEBROOT_MOUNT};
pub use orchestrator::{Bootstrap, BootstrapOutcome, Stage};
pub use storage::{BundlePaths, CertificateInspector, CertificateState};
