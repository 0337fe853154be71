use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::CliRestartStrategy;

const DEFAULT_POLL_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 45_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_non_blank(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "forward-relay",
    about = "Forwards new posts from a source channel to a target channel",
    version
)]
pub struct Cli {
    #[arg(
        long = "config-dir",
        env = "RELAY_CONFIG_DIR",
        default_value = ".",
        help = "Directory holding local_config.json and config.json"
    )]
    pub config_dir: PathBuf,

    #[arg(
        long = "host-name",
        env = "RELAY_HOST_NAME",
        value_parser = parse_non_blank,
        help = "Host name written to local_config.json on first run instead of prompting"
    )]
    pub host_name: Option<String>,

    #[arg(
        long = "log-file",
        env = "RELAY_LOG_FILE",
        help = "Local relay log path (defaults to forward_relay_local.log in the config dir)"
    )]
    pub log_file: Option<PathBuf>,

    #[arg(
        long = "telegram-api-base",
        env = "RELAY_TELEGRAM_API_BASE",
        default_value = relay_runtime::DEFAULT_TELEGRAM_API_BASE,
        help = "Base URL of the Telegram Bot API"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "poll-timeout-seconds",
        env = "RELAY_POLL_TIMEOUT_SECONDS",
        default_value_t = DEFAULT_POLL_TIMEOUT_SECONDS,
        value_parser = parse_positive_u64,
        help = "Long-poll timeout passed to getUpdates"
    )]
    pub poll_timeout_seconds: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "RELAY_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Timeout for non-polling Bot API requests"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "artifact-path",
        env = "RELAY_ARTIFACT_PATH",
        help = "Program artifact replaced by /upgrade (defaults to the running executable)"
    )]
    pub artifact_path: Option<PathBuf>,

    #[arg(
        long = "restart-strategy",
        env = "RELAY_RESTART_STRATEGY",
        value_enum,
        default_value = "exec",
        help = "How the relay restarts after a successful /upgrade"
    )]
    pub restart_strategy: CliRestartStrategy,

    #[arg(
        long = "shutdown-grace-ms",
        env = "RELAY_SHUTDOWN_GRACE_MS",
        default_value_t = DEFAULT_SHUTDOWN_GRACE_MS,
        value_parser = parse_positive_u64,
        help = "Time in-flight forwards get to finish on shutdown before they are aborted"
    )]
    pub shutdown_grace_ms: u64,
}

impl Cli {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn local_log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.config_dir.join(relay_runtime::DEFAULT_LOCAL_LOG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn unit_defaults_resolve_paths_and_timeouts() {
        let cli = Cli::try_parse_from(["forward-relay", "--config-dir", "/etc/relay"])
            .expect("parse defaults");
        assert_eq!(cli.config_dir, PathBuf::from("/etc/relay"));
        assert_eq!(
            cli.local_log_path(),
            PathBuf::from("/etc/relay/forward_relay_local.log")
        );
        assert_eq!(cli.poll_timeout_seconds, DEFAULT_POLL_TIMEOUT_SECONDS);
        assert_eq!(cli.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(cli.restart_strategy, CliRestartStrategy::Exec);
        assert!(cli.artifact_path.is_none());
    }

    #[test]
    fn functional_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "forward-relay",
            "--host-name",
            " edge-1 ",
            "--log-file",
            "/var/log/relay.log",
            "--restart-strategy",
            "supervisor",
            "--request-timeout-ms",
            "2500",
        ])
        .expect("parse flags");
        assert_eq!(cli.host_name.as_deref(), Some("edge-1"));
        assert_eq!(cli.local_log_path(), PathBuf::from("/var/log/relay.log"));
        assert_eq!(cli.restart_strategy, CliRestartStrategy::Supervisor);
        assert_eq!(cli.request_timeout(), Duration::from_millis(2_500));
        assert_eq!(
            relay_runtime::RestartStrategy::from(cli.restart_strategy),
            relay_runtime::RestartStrategy::Supervisor
        );
    }

    #[test]
    fn regression_zero_timeouts_and_blank_host_are_rejected() {
        assert!(
            Cli::try_parse_from(["forward-relay", "--poll-timeout-seconds", "0"]).is_err()
        );
        assert!(Cli::try_parse_from(["forward-relay", "--shutdown-grace-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["forward-relay", "--host-name", "  "]).is_err());
    }
}
