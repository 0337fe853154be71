//! On-disk program artifact replacement with a single rollback backup.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::relay_error::RelayError;

/// Fetched artifacts shorter than this are treated as corrupt or empty.
pub const MIN_ARTIFACT_BYTES: usize = 20;
const STAGED_SUFFIX: &str = ".new";
const BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeArtifactPaths {
    pub current: PathBuf,
    pub staged: PathBuf,
    pub backup: PathBuf,
}

impl CodeArtifactPaths {
    pub fn for_artifact(current: impl Into<PathBuf>) -> Self {
        let current = current.into();
        Self {
            staged: with_suffix(&current, STAGED_SUFFIX),
            backup: with_suffix(&current, BACKUP_SUFFIX),
            current,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

pub fn validate_artifact(bytes: &[u8]) -> Result<(), RelayError> {
    if bytes.len() < MIN_ARTIFACT_BYTES {
        return Err(RelayError::InvalidArtifact(format!(
            "downloaded content too small ({} bytes, need at least {MIN_ARTIFACT_BYTES})",
            bytes.len()
        )));
    }
    Ok(())
}

/// Stages `bytes` next to the current artifact and rotates it into place.
pub fn install_artifact(paths: &CodeArtifactPaths, bytes: &[u8]) -> Result<(), RelayError> {
    std::fs::write(&paths.staged, bytes).map_err(|error| {
        RelayError::Replace(format!(
            "failed to write staged artifact {}: {error}",
            paths.staged.display()
        ))
    })?;
    if let Err(error) = copy_permissions(&paths.current, &paths.staged) {
        let _ = std::fs::remove_file(&paths.staged);
        return Err(RelayError::Replace(format!(
            "failed to copy permissions onto {}: {error}",
            paths.staged.display()
        )));
    }
    rotate_artifact(paths)
}

pub fn rotate_artifact(paths: &CodeArtifactPaths) -> Result<(), RelayError> {
    rotate_artifact_with(paths, |from, to| std::fs::rename(from, to))
}

/// Backup rotation with an injectable rename step.
///
/// Removes any stale backup, moves current to backup, then staged to current.
/// If a step fails while a backup exists and no current artifact does, the
/// backup is restored before the error is returned.
pub fn rotate_artifact_with<F>(paths: &CodeArtifactPaths, mut rename: F) -> Result<(), RelayError>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let Err(error) = try_rotate(paths, &mut rename) else {
        return Ok(());
    };

    let mut detail = error.to_string();
    if paths.backup.exists() && !paths.current.exists() {
        match std::fs::rename(&paths.backup, &paths.current) {
            Ok(()) => {
                tracing::warn!(
                    artifact = %paths.current.display(),
                    "artifact rotation failed; restored backup"
                );
                detail.push_str(" (rolled back to previous artifact)");
            }
            Err(rollback_error) => {
                tracing::error!(
                    artifact = %paths.current.display(),
                    %rollback_error,
                    "artifact rollback failed"
                );
                detail.push_str(&format!(" (rollback failed: {rollback_error})"));
            }
        }
    }
    if paths.staged.exists() {
        let _ = std::fs::remove_file(&paths.staged);
    }
    Err(RelayError::Replace(detail))
}

fn try_rotate<F>(paths: &CodeArtifactPaths, rename: &mut F) -> io::Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    if paths.backup.exists() {
        std::fs::remove_file(&paths.backup)?;
    }
    rename(&paths.current, &paths.backup)?;
    rename(&paths.staged, &paths.current)
}

#[cfg(unix)]
fn copy_permissions(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::metadata(from) {
        Ok(metadata) => std::fs::set_permissions(to, metadata.permissions()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(not(unix))]
fn copy_permissions(_from: &Path, _to: &Path) -> io::Result<()> {
    Ok(())
}
