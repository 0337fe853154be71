//! Remote config refresh and program artifact upgrade.
//!
//! Both paths follow the same shape: fetch, validate, then apply through an
//! atomic file operation. A failure at any step leaves the previous on-disk
//! state and the live config untouched.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::code_artifact::{install_artifact, validate_artifact, CodeArtifactPaths};
use crate::config_store::{canonical_document, ConfigStore, OperationalConfigDocument};
use crate::relay_error::RelayError;
use crate::relay_log::RelayLog;
use crate::remote_fetcher::RemoteFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTrigger {
    Manual { requested_by: Option<i64> },
    Scheduled,
}

impl UpdateTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual { .. } => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdateOutcome {
    Applied,
    /// Scheduled refresh found nothing new; nothing was written.
    Unchanged,
}

pub struct UpdateManager {
    store: Arc<ConfigStore>,
    fetcher: Arc<dyn RemoteFetcher>,
    log: RelayLog,
    host_name: String,
    artifact: CodeArtifactPaths,
    fetch_timeout: Duration,
}

impl UpdateManager {
    pub fn new(
        store: Arc<ConfigStore>,
        fetcher: Arc<dyn RemoteFetcher>,
        log: RelayLog,
        host_name: impl Into<String>,
        artifact: CodeArtifactPaths,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            log,
            host_name: host_name.into(),
            artifact,
            fetch_timeout,
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn artifact_paths(&self) -> &CodeArtifactPaths {
        &self.artifact
    }

    /// Fetches the remote config document and applies it.
    ///
    /// Scheduled refreshes skip the write when the result would be
    /// canonically identical to the on-disk document. Every outcome is logged.
    pub async fn apply_remote_config(
        &self,
        trigger: UpdateTrigger,
    ) -> Result<ConfigUpdateOutcome, RelayError> {
        let result = self.fetch_and_apply_config(trigger).await;
        match (&result, trigger) {
            (Ok(ConfigUpdateOutcome::Applied), UpdateTrigger::Manual { requested_by }) => {
                self.log
                    .info(&format!(
                        "🔄 Config updated via /update by {} on host {}",
                        sender_label(requested_by),
                        self.host_name
                    ))
                    .await;
            }
            (Ok(ConfigUpdateOutcome::Applied), UpdateTrigger::Scheduled) => {
                self.log
                    .info(&format!(
                        "🔄 Auto-applied new config on host {}",
                        self.host_name
                    ))
                    .await;
            }
            (Ok(ConfigUpdateOutcome::Unchanged), _) => {
                tracing::info!(
                    trigger = trigger.as_str(),
                    host = %self.host_name,
                    "remote config unchanged"
                );
            }
            (Err(error), UpdateTrigger::Manual { .. }) => {
                self.log
                    .warn(&format!(
                        "❌ Config update failed on host {} ({}): {error}",
                        self.host_name,
                        error.kind()
                    ))
                    .await;
            }
            (Err(error), UpdateTrigger::Scheduled) => {
                self.log
                    .warn(&format!(
                        "❌ Auto-config check failed on host {} ({}): {error}",
                        self.host_name,
                        error.kind()
                    ))
                    .await;
            }
        }
        result
    }

    /// Persists the remote document laid over the local one rather than the
    /// fetched document verbatim, so keys the remote omits (credentials
    /// included) survive. A scheduled refresh whose remote is a subset of
    /// the local document is therefore `Unchanged`.
    async fn fetch_and_apply_config(
        &self,
        trigger: UpdateTrigger,
    ) -> Result<ConfigUpdateOutcome, RelayError> {
        let url = self.store.snapshot().remote_config_url.clone().ok_or_else(|| {
            RelayError::Config("config_raw_url not configured".to_string())
        })?;
        let text = self.fetcher.fetch_text(&url, self.fetch_timeout).await?;
        let remote = serde_json::from_str::<Value>(&text)
            .map_err(|error| RelayError::Parse(error.to_string()))?;
        let parsed = OperationalConfigDocument::from_value(remote.clone())?;

        let local = match self.store.read_on_disk_document() {
            Ok(local) => local,
            Err(error) => {
                tracing::warn!(%error, "local config document unreadable; applying remote as new");
                Value::Object(Map::new())
            }
        };
        let document = overlay_document(&local, &remote)?;
        if trigger == UpdateTrigger::Scheduled
            && canonical_document(&document) == canonical_document(&local)
        {
            return Ok(ConfigUpdateOutcome::Unchanged);
        }

        let merged = self.store.snapshot().merged_with(&parsed)?;
        self.store.replace_operational_config(&document, merged)?;
        tracing::info!(trigger = trigger.as_str(), url = %url, "applied remote config");
        Ok(ConfigUpdateOutcome::Applied)
    }

    /// Downloads the artifact at `url` and rotates it over the running one.
    ///
    /// The caller restarts the process on success.
    pub async fn apply_remote_code(&self, url: &str) -> Result<(), RelayError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RelayError::Config("bot_raw_url not configured".to_string()));
        }
        let bytes = self.fetcher.fetch_bytes(url, self.fetch_timeout).await?;
        validate_artifact(&bytes)?;
        install_artifact(&self.artifact, &bytes)?;
        tracing::info!(
            artifact = %self.artifact.current.display(),
            bytes = bytes.len(),
            "installed upgraded artifact"
        );
        Ok(())
    }
}

pub(crate) fn sender_label(sender_id: Option<i64>) -> String {
    sender_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Top-level keys of `remote` written over `local`; `null` values are skipped
/// so the persisted document matches what the live merge applied.
fn overlay_document(local: &Value, remote: &Value) -> Result<Value, RelayError> {
    let Value::Object(remote_fields) = remote else {
        return Err(RelayError::Parse(
            "config document must be a JSON object".to_string(),
        ));
    };
    let mut merged = match local {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    for (key, value) in remote_fields {
        if !value.is_null() {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::Object(merged))
}
