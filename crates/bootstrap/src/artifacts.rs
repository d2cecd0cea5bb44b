//! Atomic artifact replacement.
//!
//! Every generated file is written to a temporary file in its destination
//! directory, synced, and renamed over the previous version. Readers see
//! either the old file or the new one, never a truncated mix. The
//! replacement keeps the permissions of the file it replaces; new files are
//! created world-readable.

use std::fs::Permissions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use tlsinit_common::StepOutcome;

use crate::acme::AcmeError;
use crate::templates::RenderedArtifacts;

/// Destination of the generated artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub proxy_config: PathBuf,
    pub service_topology: PathBuf,
}

/// Create a directory (and parents) unless it already exists
pub fn ensure_dir(path: &Path) -> Result<StepOutcome, AcmeError> {
    if path.is_dir() {
        return Ok(StepOutcome::AlreadyDone);
    }
    std::fs::create_dir_all(path).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            AcmeError::Precondition(format!("Permission denied creating {}", path.display()))
        } else {
            AcmeError::Precondition(format!("Failed to create {}: {}", path.display(), e))
        }
    })?;
    debug!(path = %path.display(), "Created directory");
    Ok(StepOutcome::Done)
}

/// Directory a temporary sibling of `path` must live in for the rename to
/// stay on one filesystem
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn artifact_error(path: &Path) -> impl FnOnce(io::Error) -> AcmeError + '_ {
    move |source| AcmeError::Artifact {
        path: path.to_path_buf(),
        source,
    }
}

/// Permissions a replacement for `path` should carry
fn target_permissions(path: &Path) -> io::Result<Option<Permissions>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.permissions())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(new_file_permissions()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn new_file_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<Permissions> {
    None
}

/// Write content into a synced temporary file next to `path`
fn stage<F>(path: &Path, write: F) -> Result<NamedTempFile, AcmeError>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).map_err(artifact_error(path))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(artifact_error(path))?;
    // Temporary files are created owner-only
    if let Some(perms) = target_permissions(path).map_err(artifact_error(path))? {
        tmp.as_file()
            .set_permissions(perms)
            .map_err(artifact_error(path))?;
    }
    write(tmp.as_file_mut()).map_err(artifact_error(path))?;
    tmp.as_file_mut().flush().map_err(artifact_error(path))?;
    tmp.as_file().sync_all().map_err(artifact_error(path))?;
    Ok(tmp)
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), AcmeError> {
    tmp.persist(path).map_err(|e| AcmeError::Artifact {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Atomically replace `path` with `bytes`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AcmeError> {
    write_atomic_with(path, |out| out.write_all(bytes))
}

/// Atomically replace `path` with whatever `write` produces.
///
/// If `write` fails the previous file is left untouched and the temporary
/// file is removed.
pub fn write_atomic_with<F>(path: &Path, write: F) -> Result<(), AcmeError>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let tmp = stage(path, write)?;
    persist(tmp, path)?;
    debug!(path = %path.display(), "Replaced file");
    Ok(())
}

/// The pair of generated artifacts, replaced together
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    paths: ArtifactPaths,
}

impl ArtifactSet {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Replace both artifacts.
    ///
    /// Both are fully staged before either is renamed, so a failure while
    /// writing leaves both previous files in place.
    pub fn commit(&self, artifacts: &RenderedArtifacts) -> Result<(), AcmeError> {
        let proxy = stage(&self.paths.proxy_config, |out| {
            out.write_all(artifacts.proxy_config.as_bytes())
        })?;
        let topology = stage(&self.paths.service_topology, |out| {
            out.write_all(artifacts.service_topology.as_bytes())
        })?;

        persist(proxy, &self.paths.proxy_config)?;
        persist(topology, &self.paths.service_topology)?;

        info!(
            proxy_config = %self.paths.proxy_config.display(),
            service_topology = %self.paths.service_topology.display(),
            "Wrote generated configuration"
        );
        Ok(())
    }
}
