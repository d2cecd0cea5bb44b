//! Docker CLI runtime.

use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, trace};

use tlsinit_common::StepOutcome;

use super::{ContainerHandle, ContainerRuntime, ContainerSpec, RuntimeError};

/// Container runtime backed by the `docker` command-line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a docker subcommand and collect its output.
    ///
    /// The child is killed if the returned future is dropped, so a cancelled
    /// bootstrap does not leave a dangling client behind.
    async fn exec(&self, args: &[String]) -> Result<Output, RuntimeError> {
        trace!(binary = %self.binary, args = ?args, "Running container runtime command");

        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: self.binary.clone(),
                source,
            })
    }

    fn failure(&self, args: &[String], output: &Output) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: format!("{} {}", self.binary, args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Inspect a single field of a container, `None` if it does not exist
    async fn inspect(&self, name: &str, format: &str) -> Result<Option<String>, RuntimeError> {
        let args = vec![
            "container".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            format.to_string(),
            name.to_string(),
        ];
        let output = self.exec(&args).await?;

        if output.status.success() {
            return Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ));
        }
        if is_not_found(&output) {
            return Ok(None);
        }
        Err(self.failure(&args, &output))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Docker reports missing containers as "No such container" or
/// "No such object" depending on the subcommand
fn is_not_found(output: &Output) -> bool {
    String::from_utf8_lossy(&output.stderr).contains("No such")
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn stop(&self, name: &str) -> Result<StepOutcome, RuntimeError> {
        if self.inspect(name, "{{.Id}}").await?.is_none() {
            debug!(container = %name, "Container not present, nothing to stop");
            return Ok(StepOutcome::AlreadyDone);
        }

        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        let output = self.exec(&args).await?;

        if output.status.success() {
            info!(container = %name, "Stopped and removed container");
            Ok(StepOutcome::Done)
        } else if is_not_found(&output) {
            debug!(container = %name, "Container disappeared before removal");
            Ok(StepOutcome::AlreadyDone)
        } else {
            Err(self.failure(&args, &output))
        }
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        for port in &spec.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", port.host, port.container));
        }
        for volume in &spec.volumes {
            args.push("-v".to_string());
            args.push(volume.to_string());
        }
        args.push(spec.image.clone());

        let output = self.exec(&args).await?;
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::UnexpectedOutput(format!(
                "'{}' started without reporting a container id",
                spec.name
            )));
        }

        info!(container = %spec.name, image = %spec.image, id = %id, "Started container");
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        let running = self
            .inspect(name, "{{.State.Running}}")
            .await?
            .is_some_and(|state| state == "true");
        trace!(container = %name, running, "Checked container state");
        Ok(running)
    }
}
