use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const DEFAULT_LOG_ROTATION_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_LOG_ROTATION_MAX_FILES: usize = 5;
pub const LOG_ROTATION_MAX_BYTES_ENV: &str = "RELAY_LOG_ROTATION_MAX_BYTES";
pub const LOG_ROTATION_MAX_FILES_ENV: &str = "RELAY_LOG_ROTATION_MAX_FILES";

/// Size-based rotation limits for the local relay log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_LOG_ROTATION_MAX_BYTES,
            max_files: DEFAULT_LOG_ROTATION_MAX_FILES,
        }
    }
}

impl LogRotationPolicy {
    /// Build policy from env vars, keeping defaults for missing or invalid values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_bytes: positive_setting(lookup(LOG_ROTATION_MAX_BYTES_ENV))
                .unwrap_or(defaults.max_bytes),
            max_files: positive_setting(lookup(LOG_ROTATION_MAX_FILES_ENV))
                .unwrap_or(defaults.max_files),
        }
    }

    pub fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

fn positive_setting<T>(raw: Option<String>) -> Option<T>
where
    T: std::str::FromStr + Default + PartialOrd,
{
    raw?.trim().parse::<T>().ok().filter(|value| *value > T::default())
}

/// Append one line to `path`, rotating first when the line would push the file
/// past `policy.max_bytes`.
pub fn append_line_with_rotation(path: &Path, line: &str, policy: LogRotationPolicy) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    if policy.is_enabled() && path.exists() {
        let current_size = std::fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let incoming_size = line.len().saturating_add(1).try_into().unwrap_or(u64::MAX);
        if current_size > 0 && current_size.saturating_add(incoming_size) > policy.max_bytes {
            rotate_log_file(path, policy)?;
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

pub fn rotated_backup_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), index))
}

/// Shifts `path` -> `path.1` -> `path.2` ..., dropping the oldest backup so at
/// most `max_files` files (live log included) remain.
fn rotate_log_file(path: &Path, policy: LogRotationPolicy) -> Result<()> {
    let backups = policy.max_files.saturating_sub(1);
    if backups == 0 {
        return std::fs::remove_file(path)
            .with_context(|| format!("failed to rotate {}", path.display()));
    }

    let oldest = rotated_backup_path(path, backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest)
            .with_context(|| format!("failed to drop rotated log {}", oldest.display()))?;
    }
    for index in (1..backups).rev() {
        let source = rotated_backup_path(path, index);
        if source.exists() {
            rename_log(&source, &rotated_backup_path(path, index + 1))?;
        }
    }
    rename_log(path, &rotated_backup_path(path, 1))
}

fn rename_log(source: &Path, destination: &Path) -> Result<()> {
    std::fs::rename(source, destination).with_context(|| {
        format!(
            "failed to rotate {} to {}",
            source.display(),
            destination.display()
        )
    })
}
