//! Bootstrap orchestration
//!
//! Drives one certificate acquisition from start to finish:
//!
//! ```text
//! init -> inspecting -> (confirming) -> clearing_port -> responder_up
//!      -> issuing -> responder_down -> templating -> done
//! ```
//!
//! Any step may move the run to `failed`. Once the responder has been asked
//! to start, it is stopped again on every path out of the issuance window,
//! including issuer failure and cancellation. A cancelled issuance is also
//! aborted on the issuer's side.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tlsinit_common::{ContactEmail, Domain};
use tlsinit_config::{Config, ResponderMode};

use super::challenge::{ChallengeResponder, ContainerResponder, EmbeddedResponder, ResponderBackend};
use super::error::AcmeError;
use super::issuer::{CertificateIssuer, IssueRequest};
use super::storage::{CertificateInspector, CertificateState};
use crate::artifacts::{ensure_dir, ArtifactPaths, ArtifactSet};
use crate::confirm::{AssumeNo, Confirm};
use crate::port_guard::PortGuard;
use crate::runtime::ContainerRuntime;
use crate::templates::{self, TemplateSettings};

/// Position in the bootstrap state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Inspecting,
    Confirming,
    ClearingPort,
    ResponderUp,
    Issuing,
    ResponderDown,
    Templating,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Inspecting => "inspecting",
            Self::Confirming => "confirming",
            Self::ClearingPort => "clearing_port",
            Self::ResponderUp => "responder_up",
            Self::Issuing => "issuing",
            Self::ResponderDown => "responder_down",
            Self::Templating => "templating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a successful run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A certificate already existed and re-issuance was not confirmed
    Skipped {
        domain: Domain,
        state: CertificateState,
    },
    /// A certificate was issued and the configuration regenerated
    Issued {
        domain: Domain,
        artifacts: ArtifactPaths,
    },
}

/// One-shot certificate bootstrap
pub struct Bootstrap {
    inspector: CertificateInspector,
    port_guard: PortGuard,
    responder: ChallengeResponder,
    issuer: Arc<dyn CertificateIssuer>,
    confirm: Arc<dyn Confirm>,
    templates: TemplateSettings,
    artifacts: ArtifactSet,
    webroot: PathBuf,
    cancel: CancellationToken,
    stage: Mutex<Stage>,
    failed_at: Mutex<Option<Stage>>,
}

impl Bootstrap {
    pub fn new(
        inspector: CertificateInspector,
        port_guard: PortGuard,
        responder: ChallengeResponder,
        issuer: Arc<dyn CertificateIssuer>,
        templates: TemplateSettings,
        artifacts: ArtifactSet,
        webroot: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inspector,
            port_guard,
            responder,
            issuer,
            confirm: Arc::new(AssumeNo),
            templates,
            artifacts,
            webroot: webroot.into(),
            cancel: CancellationToken::new(),
            stage: Mutex::new(Stage::Init),
            failed_at: Mutex::new(None),
        }
    }

    /// Assemble a bootstrap from configuration
    pub fn from_config(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        issuer: Arc<dyn CertificateIssuer>,
    ) -> Result<Self, AcmeError> {
        let bind: SocketAddr = config.responder.bind.parse().map_err(|e| {
            AcmeError::Precondition(format!(
                "invalid responder bind address '{}': {}",
                config.responder.bind, e
            ))
        })?;

        let backend: Arc<dyn ResponderBackend> = match config.responder.mode {
            ResponderMode::Container => Arc::new(ContainerResponder::new(
                Arc::clone(&runtime),
                config.responder.name.clone(),
                config.responder.image.clone(),
                bind,
                config.paths.state_dir.clone(),
            )),
            ResponderMode::Embedded => Arc::new(EmbeddedResponder::new(bind)),
        };

        Ok(Self::new(
            CertificateInspector::new(
                config.paths.letsencrypt_dir.clone(),
                config.issuer.renew_before_days,
            ),
            PortGuard::from_config(runtime, &config.port_guard),
            ChallengeResponder::new(backend, config.responder.readiness_timeout()),
            issuer,
            TemplateSettings::from_config(config),
            ArtifactSet::new(ArtifactPaths {
                proxy_config: config.paths.proxy_config.clone(),
                service_topology: config.paths.service_topology.clone(),
            }),
            config.paths.webroot.clone(),
        ))
    }

    /// How to ask before replacing an existing certificate
    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Token that interrupts the run when cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock()
    }

    /// Stage the last run failed in, if it failed
    pub fn failed_at(&self) -> Option<Stage> {
        *self.failed_at.lock()
    }

    pub fn inspector(&self) -> &CertificateInspector {
        &self.inspector
    }

    pub fn responder(&self) -> &ChallengeResponder {
        &self.responder
    }

    fn enter(&self, stage: Stage, domain: &Domain) {
        *self.stage.lock() = stage;
        info!(stage = ?stage, domain = %domain, "Bootstrap stage");
    }

    /// Run `fut` unless the run is cancelled first
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, AcmeError>>,
    ) -> Result<T, AcmeError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AcmeError::Cancelled),
            result = fut => result,
        }
    }

    /// Obtain a certificate for `domain` and regenerate the configuration.
    ///
    /// An existing certificate is only replaced after confirmation; without
    /// it the run ends as [`BootstrapOutcome::Skipped`] having changed
    /// nothing.
    pub async fn run(
        &self,
        domain: &Domain,
        email: &ContactEmail,
    ) -> Result<BootstrapOutcome, AcmeError> {
        let start = Instant::now();
        *self.failed_at.lock() = None;
        self.enter(Stage::Init, domain);

        let result = self.execute(domain, email).await;
        let last = self.stage();

        match &result {
            Ok(outcome) => {
                self.enter(Stage::Done, domain);
                info!(
                    domain = %domain,
                    skipped = matches!(outcome, BootstrapOutcome::Skipped { .. }),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Bootstrap finished"
                );
            }
            Err(e) => {
                *self.failed_at.lock() = Some(last);
                *self.stage.lock() = Stage::Failed;
                error!(
                    stage = ?last,
                    domain = %domain,
                    error = %e,
                    "Bootstrap failed"
                );
            }
        }
        result
    }

    async fn execute(
        &self,
        domain: &Domain,
        email: &ContactEmail,
    ) -> Result<BootstrapOutcome, AcmeError> {
        self.enter(Stage::Inspecting, domain);
        let state = self.inspector.inspect(domain)?;
        debug!(domain = %domain, state = ?state, "Certificate state");

        let force_renew = state.is_present();
        if force_renew {
            self.enter(Stage::Confirming, domain);
            let prompt = match state.expires() {
                Some(expires) => format!(
                    "A certificate for {domain} already exists (expires {}). Request a new one?",
                    expires.format("%Y-%m-%d")
                ),
                None => format!("A certificate for {domain} already exists. Request a new one?"),
            };

            let confirmed = self
                .cancellable(async { Ok(self.confirm.confirm(&prompt).await) })
                .await?;
            if !confirmed {
                info!(domain = %domain, "Certificate already present, skipping issuance");
                return Ok(BootstrapOutcome::Skipped {
                    domain: domain.clone(),
                    state,
                });
            }
        }

        if self.cancel.is_cancelled() {
            return Err(AcmeError::Cancelled);
        }

        // Missing directories are a precondition of the challenge window
        self.enter(Stage::ClearingPort, domain);
        for dir in [self.inspector.base_path().to_path_buf(), self.webroot.clone()] {
            ensure_dir(&dir)?;
        }
        self.cancellable(self.port_guard.clear()).await?;

        self.issuance_window(domain, email, force_renew).await?;

        self.enter(Stage::Templating, domain);
        let rendered = templates::render(domain, &self.templates)?;
        self.artifacts.commit(&rendered)?;

        Ok(BootstrapOutcome::Issued {
            domain: domain.clone(),
            artifacts: self.artifacts.paths().clone(),
        })
    }

    /// Start the responder, run the issuer, and stop the responder no
    /// matter how the first two ended
    async fn issuance_window(
        &self,
        domain: &Domain,
        email: &ContactEmail,
        force_renew: bool,
    ) -> Result<(), AcmeError> {
        let result = async {
            self.enter(Stage::ResponderUp, domain);
            self.cancellable(self.responder.start(&self.webroot)).await?;

            self.enter(Stage::Issuing, domain);
            let request = IssueRequest {
                domain: domain.clone(),
                email: email.clone(),
                webroot: self.webroot.clone(),
                force_renew,
            };
            self.cancellable(async {
                self.issuer
                    .issue(&request)
                    .await
                    .map_err(AcmeError::Issuance)
            })
            .await
        }
        .await;

        let reached = self.stage();
        if reached == Stage::Issuing && matches!(result, Err(AcmeError::Cancelled)) {
            // The abandoned issuer may still be running outside this process
            match self.issuer.abort().await {
                Ok(outcome) => debug!(domain = %domain, outcome = ?outcome, "Issuer aborted"),
                Err(e) => warn!(domain = %domain, error = %e, "Failed to abort issuer"),
            }
        }

        self.enter(Stage::ResponderDown, domain);
        self.responder.stop().await;

        if result.is_err() {
            // Failures are reported against the step that failed, not cleanup
            *self.stage.lock() = reached;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ClearingPort.to_string(), "clearing_port");
        assert_eq!(Stage::ResponderDown.as_str(), "responder_down");
        assert!(Stage::Done.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Issuing.is_terminal());
    }
}
