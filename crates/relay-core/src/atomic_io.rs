use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

const STAGING_MARKER: &str = ".tmp-";

/// A fully written temporary file that has not yet been renamed over its
/// destination.
#[derive(Debug)]
pub struct StagedWrite {
    temp_path: PathBuf,
    destination: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Renames the staged file over the destination.
    pub fn commit(self) -> Result<()> {
        std::fs::rename(&self.temp_path, &self.destination).with_context(|| {
            format!(
                "failed to rename temporary file {} to {}",
                self.temp_path.display(),
                self.destination.display()
            )
        })
    }
}

/// Writes text using a temp file + rename so readers never observe partial data.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    stage_bytes_atomic(path, content.as_bytes())?.commit()
}

/// Writes `content` to a hidden sibling of `path` and returns the pending rename.
pub fn stage_bytes_atomic(path: &Path, content: &[u8]) -> Result<StagedWrite> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.exists() && path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = parent_or_current(path);
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        "{}{}-{}",
        staging_prefix(path),
        std::process::id(),
        current_unix_timestamp_ms()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    Ok(StagedWrite {
        temp_path,
        destination: path.to_path_buf(),
    })
}

/// Deletes staging files left behind by an interrupted write to `path`.
///
/// Returns the number of files removed.
pub fn remove_stale_staged_writes(path: &Path) -> Result<usize> {
    let parent_dir = parent_or_current(path);
    if !parent_dir.exists() {
        return Ok(0);
    }
    let prefix = staging_prefix(path);
    let mut removed = 0_usize;
    let entries = std::fs::read_dir(parent_dir)
        .with_context(|| format!("failed to list {}", parent_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", parent_dir.display()))?;
        let is_staged = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix.as_str()));
        if is_staged && entry.path().is_file() {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("failed to remove {}", entry.path().display()))?;
            removed = removed.saturating_add(1);
        }
    }
    Ok(removed)
}

fn parent_or_current(path: &Path) -> &Path {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn staging_prefix(path: &Path) -> String {
    format!(
        ".{}{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("document"),
        STAGING_MARKER
    )
}
