//! Combined log sink: local diagnostics plus a best-effort log-channel mirror.

use std::path::PathBuf;
use std::sync::Arc;

use relay_core::{append_line_with_rotation, utc_timestamp_label, LogRotationPolicy};

use crate::chat_platform::ChatPlatform;
use crate::config_store::ConfigHandle;

pub const DEFAULT_LOCAL_LOG_FILE: &str = "forward_relay_local.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayLogLevel {
    Info,
    Warn,
}

impl RelayLogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
        }
    }
}

#[derive(Clone)]
/// Writes every relay event locally, then mirrors it to the current
/// `log_channel`. Nothing in here returns an error to the caller.
pub struct RelayLog {
    platform: Arc<dyn ChatPlatform>,
    config: ConfigHandle,
    local_log_path: Option<PathBuf>,
    rotation: LogRotationPolicy,
}

impl RelayLog {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        config: ConfigHandle,
        local_log_path: Option<PathBuf>,
        rotation: LogRotationPolicy,
    ) -> Self {
        Self {
            platform,
            config,
            local_log_path,
            rotation,
        }
    }

    pub fn local_log_path(&self) -> Option<&PathBuf> {
        self.local_log_path.as_ref()
    }

    pub async fn info(&self, text: &str) {
        self.emit(RelayLogLevel::Info, text).await;
    }

    pub async fn warn(&self, text: &str) {
        self.emit(RelayLogLevel::Warn, text).await;
    }

    pub async fn emit(&self, level: RelayLogLevel, text: &str) {
        let line = format!("[{}] {text}", utc_timestamp_label());
        self.write_local(level, &line);

        let log_channel = self.config.snapshot().log_channel.clone();
        if let Err(error) = self.platform.send_message(&log_channel, &line).await {
            tracing::warn!(
                channel = %log_channel,
                %error,
                "failed to push log to log_channel"
            );
        }
    }

    fn write_local(&self, level: RelayLogLevel, line: &str) {
        match level {
            RelayLogLevel::Info => tracing::info!("{line}"),
            RelayLogLevel::Warn => tracing::warn!("{line}"),
        }
        let Some(path) = self.local_log_path.as_deref() else {
            return;
        };
        let record = format!("{} | {line}", level.as_str());
        if let Err(error) = append_line_with_rotation(path, &record, self.rotation) {
            tracing::warn!(
                path = %path.display(),
                error = %format!("{error:#}"),
                "failed to append local relay log"
            );
        }
    }
}

impl std::fmt::Debug for RelayLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLog")
            .field("local_log_path", &self.local_log_path)
            .field("rotation", &self.rotation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::config_store::ChannelId;
    use crate::test_support::{test_config, RecordingPlatform};

    #[tokio::test]
    async fn functional_emit_writes_local_file_and_mirrors_to_log_channel() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("relay.log");
        let platform = Arc::new(RecordingPlatform::new());
        let log = RelayLog::new(
            platform.clone(),
            ConfigHandle::new(test_config(3)),
            Some(path.clone()),
            LogRotationPolicy::default(),
        );

        log.info("Relay started on host alpha").await;

        let raw = std::fs::read_to_string(&path).expect("read log");
        assert!(raw.starts_with("INFO | ["));
        assert!(raw.contains("Relay started on host alpha"));
        let sent = platform.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChannelId::Numeric(-1003));
        assert!(sent[0].1.ends_with("Relay started on host alpha"));
    }

    #[tokio::test]
    async fn regression_log_channel_failure_is_swallowed() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("relay.log");
        let platform = Arc::new(RecordingPlatform::new().with_failing_sends());
        let log = RelayLog::new(
            platform.clone(),
            ConfigHandle::new(test_config(3)),
            Some(path.clone()),
            LogRotationPolicy::default(),
        );

        log.warn("mirror will fail").await;

        assert!(platform.sent_messages().is_empty());
        let raw = std::fs::read_to_string(&path).expect("read log");
        assert!(raw.contains("WARN | "));
        assert!(raw.contains("mirror will fail"));
    }
}
