//! HTTP-01 challenge responder
//!
//! While a certificate is being requested, something has to answer on the
//! challenge port and serve `/.well-known/acme-challenge/<token>` out of the
//! shared webroot. [`ChallengeResponder`] owns that window: it starts a
//! backend, waits until it answers over HTTP, and tears it down
//! again. Two backends exist:
//!
//! - [`ContainerResponder`] - a throwaway nginx container
//! - [`EmbeddedResponder`] - an in-process axum server

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, trace, warn};

use tlsinit_common::StepOutcome;

use super::error::AcmeError;
use super::issuer::WEBROOT_MOUNT;
use crate::runtime::{ContainerRuntime, ContainerSpec, PortMapping, RuntimeError, VolumeMount};
use crate::templates::{render_challenge_config, RESPONDER_BODY};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// How often readiness is probed while starting
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound for a single readiness request
const READINESS_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the stock nginx image reads its server block from
const NGINX_SERVER_CONF: &str = "/etc/nginx/conf.d/default.conf";

/// Extract the token from a challenge request path
pub fn extract_token(path: &str) -> Option<&str> {
    path.strip_prefix(ACME_CHALLENGE_PREFIX)
        .filter(|token| !token.is_empty() && !token.contains('/'))
}

/// Responder backend errors
#[derive(Error, Debug)]
pub enum ResponderError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// A way of serving the challenge webroot on the challenge port
#[async_trait]
pub trait ResponderBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Start serving `webroot`. Returns the address to probe for readiness.
    async fn launch(&self, webroot: &Path) -> Result<SocketAddr, ResponderError>;

    /// Stop serving. Stopping something that is not running is
    /// [`StepOutcome::AlreadyDone`].
    async fn shutdown(&self) -> Result<StepOutcome, ResponderError>;

    async fn is_running(&self) -> Result<bool, ResponderError>;
}

/// Lifecycle controller for the challenge responder
pub struct ChallengeResponder {
    backend: Arc<dyn ResponderBackend>,
    readiness_timeout: Duration,
    state: Mutex<ResponderState>,
}

impl ChallengeResponder {
    pub fn new(backend: Arc<dyn ResponderBackend>, readiness_timeout: Duration) -> Self {
        Self {
            backend,
            readiness_timeout,
            state: Mutex::new(ResponderState::Stopped),
        }
    }

    pub fn state(&self) -> ResponderState {
        *self.state.lock()
    }

    fn set_state(&self, state: ResponderState) {
        let mut current = self.state.lock();
        trace!(from = ?*current, to = ?state, "Responder state transition");
        *current = state;
    }

    /// Start the responder and wait until it serves requests.
    ///
    /// On failure the backend has already been torn down again.
    pub async fn start(&self, webroot: &Path) -> Result<SocketAddr, AcmeError> {
        self.set_state(ResponderState::Starting);
        info!(
            backend = self.backend.name(),
            webroot = %webroot.display(),
            "Starting challenge responder"
        );

        let result = match self.backend.launch(webroot).await {
            Ok(addr) => self.wait_ready(addr).await.map(|()| addr),
            Err(e) => Err(AcmeError::ResponderStartup(e.to_string())),
        };

        match result {
            Ok(addr) => {
                self.set_state(ResponderState::Running);
                info!(backend = self.backend.name(), addr = %addr, "Challenge responder ready");
                Ok(addr)
            }
            Err(e) => {
                error!(backend = self.backend.name(), error = %e, "Challenge responder failed to start");
                self.stop().await;
                Err(e)
            }
        }
    }

    /// Poll `GET /` until the responder answers with its fixed body.
    ///
    /// A published container port accepts TCP before nginx inside is up,
    /// so only an HTTP answer counts as ready.
    async fn wait_ready(&self, addr: SocketAddr) -> Result<(), AcmeError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(READINESS_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AcmeError::ResponderStartup(format!("readiness probe: {e}")))?;
        let url = format!("http://{addr}/");

        let probe = async {
            loop {
                match probe_once(&client, &url).await {
                    Ok(()) => return,
                    Err(reason) => trace!(url = %url, reason = %reason, "Responder not serving yet"),
                }
                tokio::time::sleep(READINESS_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(self.readiness_timeout, probe)
            .await
            .map_err(|_| {
                AcmeError::ResponderStartup(format!(
                    "not serving on {} after {:?}",
                    addr, self.readiness_timeout
                ))
            })
    }

    /// Stop the responder.
    ///
    /// Safe to call in any state, any number of times. Errors are logged,
    /// never returned, so cleanup cannot replace the failure that caused it.
    pub async fn stop(&self) {
        self.set_state(ResponderState::Stopping);

        match self.backend.shutdown().await {
            Ok(StepOutcome::Done) => {
                info!(backend = self.backend.name(), "Challenge responder stopped")
            }
            Ok(StepOutcome::AlreadyDone) => {
                debug!(backend = self.backend.name(), "Challenge responder was not running")
            }
            Err(e) => warn!(
                backend = self.backend.name(),
                error = %e,
                "Failed to stop challenge responder"
            ),
        }

        self.set_state(ResponderState::Stopped);
    }

    pub async fn is_running(&self) -> Result<bool, AcmeError> {
        self.backend
            .is_running()
            .await
            .map_err(|e| AcmeError::Precondition(e.to_string()))
    }
}

async fn probe_once(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    let body = response.text().await.map_err(|e| e.to_string())?;

    if status == reqwest::StatusCode::OK && body.trim() == RESPONDER_BODY {
        Ok(())
    } else {
        Err(format!("unexpected answer {status}: {:?}", body.trim()))
    }
}

/// Probe target for a bind address; wildcard binds are probed on loopback
fn probe_addr(bind: SocketAddr) -> SocketAddr {
    let ip = match bind.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, bind.port())
}

/// nginx in a throwaway container
pub struct ContainerResponder {
    runtime: Arc<dyn ContainerRuntime>,
    name: String,
    image: String,
    bind: SocketAddr,
    state_dir: PathBuf,
}

impl ContainerResponder {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        name: impl Into<String>,
        image: impl Into<String>,
        bind: SocketAddr,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            name: name.into(),
            image: image.into(),
            bind,
            state_dir: state_dir.into(),
        }
    }

    fn io_error(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> ResponderError {
        let context = context.into();
        move |source| ResponderError::Io { context, source }
    }

    /// Write the server block the container mounts
    fn write_server_config(&self) -> Result<PathBuf, ResponderError> {
        let state_dir = std::path::absolute(&self.state_dir)
            .map_err(Self::io_error(format!("Invalid state dir {:?}", self.state_dir)))?;
        std::fs::create_dir_all(&state_dir)
            .map_err(Self::io_error(format!("Failed to create {:?}", state_dir)))?;

        let path = state_dir.join("challenge.conf");
        std::fs::write(&path, render_challenge_config())
            .map_err(Self::io_error(format!("Failed to write {:?}", path)))?;
        Ok(path)
    }
}

#[async_trait]
impl ResponderBackend for ContainerResponder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn launch(&self, webroot: &Path) -> Result<SocketAddr, ResponderError> {
        let conf = self.write_server_config()?;
        let webroot = std::path::absolute(webroot)
            .map_err(Self::io_error(format!("Invalid webroot {:?}", webroot)))?;

        // A leftover from an interrupted run would hold the name and port
        if self.runtime.stop(&self.name).await? == StepOutcome::Done {
            debug!(container = %self.name, "Removed stale responder container");
        }

        let spec = ContainerSpec {
            name: self.name.clone(),
            image: self.image.clone(),
            ports: vec![PortMapping {
                host: self.bind.port(),
                container: 80,
            }],
            volumes: vec![
                // The issuer writes tokens here while the responder serves them
                VolumeMount::read_write(webroot, WEBROOT_MOUNT),
                VolumeMount::read_only(conf, NGINX_SERVER_CONF),
            ],
        };
        self.runtime.run(&spec).await?;

        Ok(probe_addr(self.bind))
    }

    async fn shutdown(&self) -> Result<StepOutcome, ResponderError> {
        Ok(self.runtime.stop(&self.name).await?)
    }

    async fn is_running(&self) -> Result<bool, ResponderError> {
        Ok(self.runtime.is_running(&self.name).await?)
    }
}

struct ServerTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// In-process HTTP server, for hosts without a container runtime
pub struct EmbeddedResponder {
    bind: SocketAddr,
    server: Mutex<Option<ServerTask>>,
}

impl EmbeddedResponder {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            server: Mutex::new(None),
        }
    }

    fn router(webroot: &Path) -> Router {
        let challenges = webroot.join(".well-known").join("acme-challenge");
        Router::new()
            .nest_service(
                ACME_CHALLENGE_PREFIX.trim_end_matches('/'),
                ServeDir::new(challenges),
            )
            .fallback(|| async { RESPONDER_BODY })
    }
}

#[async_trait]
impl ResponderBackend for EmbeddedResponder {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn launch(&self, webroot: &Path) -> Result<SocketAddr, ResponderError> {
        // Replace a previous server rather than leaking it
        self.shutdown().await?;

        let listener = TcpListener::bind(self.bind).await.map_err(|source| {
            ResponderError::Io {
                context: format!("Failed to bind {}", self.bind),
                source,
            }
        })?;
        let local = listener.local_addr().map_err(|source| ResponderError::Io {
            context: "Failed to read bound address".to_string(),
            source,
        })?;

        let app = Self::router(webroot);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    token.cancelled().await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Embedded challenge responder failed");
            }
            debug!("Embedded challenge responder stopped");
        });

        *self.server.lock() = Some(ServerTask { cancel, task });
        debug!(addr = %local, "Embedded challenge responder listening");
        Ok(probe_addr(local))
    }

    async fn shutdown(&self) -> Result<StepOutcome, ResponderError> {
        let Some(server) = self.server.lock().take() else {
            return Ok(StepOutcome::AlreadyDone);
        };

        server.cancel.cancel();
        if let Err(e) = server.task.await {
            warn!(error = %e, "Embedded challenge responder task ended abnormally");
        }
        Ok(StepOutcome::Done)
    }

    async fn is_running(&self) -> Result<bool, ResponderError> {
        Ok(self
            .server
            .lock()
            .as_ref()
            .is_some_and(|server| !server.task.is_finished()))
    }
}
