//! Clears the challenge port before the responder starts.
//!
//! Anything known to bind the port is stopped through the container
//! runtime. Stopping a container that is not there is a no-op. Once
//! something was actually stopped the guard waits a short grace period so
//! the kernel releases the socket, then optionally confirms the port is
//! bindable.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use tlsinit_common::StepOutcome;
use tlsinit_config::PortGuardConfig;

use crate::acme::AcmeError;
use crate::runtime::ContainerRuntime;

/// What the guard did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortGuardReport {
    /// Containers that were running and have been stopped
    pub stopped: Vec<String>,
    /// Containers that were not present
    pub absent: Vec<String>,
}

impl PortGuardReport {
    pub fn outcome(&self) -> StepOutcome {
        if self.stopped.is_empty() {
            StepOutcome::AlreadyDone
        } else {
            StepOutcome::Done
        }
    }
}

pub struct PortGuard {
    runtime: Arc<dyn ContainerRuntime>,
    containers: Vec<String>,
    port: u16,
    grace_period: Duration,
    verify_port_free: bool,
}

impl PortGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, containers: Vec<String>, port: u16) -> Self {
        Self {
            runtime,
            containers,
            port,
            grace_period: Duration::from_secs(3),
            verify_port_free: true,
        }
    }

    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &PortGuardConfig) -> Self {
        Self::new(runtime, config.containers.clone(), config.port)
            .with_grace_period(config.grace_period())
            .with_port_check(config.verify_port_free)
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Probe the port with a test bind after stopping containers
    pub fn with_port_check(mut self, enabled: bool) -> Self {
        self.verify_port_free = enabled;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop every known blocker and make sure the port is free.
    ///
    /// A blocker that cannot be stopped, or a port that is still bound
    /// afterwards, is a precondition failure.
    pub async fn clear(&self) -> Result<PortGuardReport, AcmeError> {
        let mut report = PortGuardReport::default();

        for name in &self.containers {
            let outcome = self.runtime.stop(name).await.map_err(|e| {
                AcmeError::Precondition(format!(
                    "cannot stop '{}' holding port {}: {}",
                    name, self.port, e
                ))
            })?;

            match outcome {
                StepOutcome::Done => report.stopped.push(name.clone()),
                StepOutcome::AlreadyDone => report.absent.push(name.clone()),
            }
        }

        if !report.stopped.is_empty() && !self.grace_period.is_zero() {
            debug!(
                grace_period = ?self.grace_period,
                "Waiting for the port to be released"
            );
            tokio::time::sleep(self.grace_period).await;
        }

        if self.verify_port_free {
            self.check_port_free().await?;
        }

        info!(
            port = self.port,
            stopped = ?report.stopped,
            outcome = %report.outcome(),
            "Challenge port cleared"
        );
        Ok(report)
    }

    async fn check_port_free(&self) -> Result<(), AcmeError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));

        match TcpListener::bind(addr).await {
            Ok(listener) => {
                drop(listener);
                debug!(port = self.port, "Port is free");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => Err(AcmeError::Precondition(format!(
                "port {} is still in use by a process this tool does not manage",
                self.port
            ))),
            // Privileged ports need root for the probe but not for the
            // container runtime; the responder's readiness check decides
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                debug!(port = self.port, "Not allowed to probe port, skipping check");
                Ok(())
            }
            Err(e) => {
                warn!(port = self.port, error = %e, "Port probe inconclusive");
                Ok(())
            }
        }
    }
}
