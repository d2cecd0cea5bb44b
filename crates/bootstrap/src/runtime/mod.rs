//! Container runtime abstraction.
//!
//! The bootstrapper only needs three operations from a container runtime:
//! stop a named container (idempotently), start a detached one, and ask
//! whether one is running. [`DockerCli`] implements them by shelling out to
//! the `docker` binary; tests substitute an in-memory fake.

mod docker;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tlsinit_common::StepOutcome;

pub use docker::DockerCli;

/// Container runtime errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected runtime output: {0}")]
    UnexpectedOutput(String),
}

/// A published port mapping (`host:container`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// A bind mount into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container)?;
        if self.read_only {
            f.write_str(":ro")?;
        }
        Ok(())
    }
}

/// Everything needed to start a detached container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
}

/// Handle to a started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Operations the bootstrapper needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Stop and remove a container. A container that does not exist is
    /// [`StepOutcome::AlreadyDone`], never an error.
    async fn stop(&self, name: &str) -> Result<StepOutcome, RuntimeError>;

    /// Start a detached container
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Whether a container with this name is currently running
    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;
}
