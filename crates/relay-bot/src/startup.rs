use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use relay_cli::Cli;
use relay_core::LogRotationPolicy;
use relay_runtime::{
    load_local_identity, restarter_for, run_relay, ConfigPaths, ConfigStore, HttpRemoteFetcher,
    OperationalConfig, ProcessRestarter, RelayError, RelayRuntimeConfig, RelayServices,
    ShutdownSignal, TelegramBotApiClient, TokioSleeper,
};

/// Loads both config documents, wires the Telegram transport, and runs the
/// relay until it is stopped.
pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let paths = ConfigPaths::new(&cli.config_dir);
    let identity = {
        let stdin = std::io::stdin();
        load_local_identity(
            &paths,
            cli.host_name.as_deref(),
            stdin.lock(),
            std::io::stdout(),
        )?
    };
    let store = Arc::new(ConfigStore::open(paths).context("failed to load operational config")?);
    let bot_token = require_bot_token(&store.snapshot())?;

    let platform = Arc::new(TelegramBotApiClient::new(
        &cli.telegram_api_base,
        &bot_token,
        cli.request_timeout(),
        cli.poll_timeout_seconds,
    )?);
    let fetcher = Arc::new(HttpRemoteFetcher::new()?);
    let restarter: Arc<dyn ProcessRestarter> = Arc::from(restarter_for(
        cli.restart_strategy.into(),
        std::env::args_os().skip(1).collect(),
    ));
    let services = RelayServices {
        platform,
        fetcher,
        sleeper: Arc::new(TokioSleeper),
        restarter,
    };

    let artifact_path = resolve_artifact_path(cli.artifact_path.clone())?;
    let mut runtime_config = RelayRuntimeConfig::new(identity.host_name, artifact_path);
    runtime_config.local_log_path = Some(cli.local_log_path());
    runtime_config.log_rotation = LogRotationPolicy::from_env();
    runtime_config.shutdown_grace = cli.shutdown_grace();

    let shutdown = ShutdownSignal::new();
    spawn_ctrl_c_listener(shutdown.clone());

    let summary = run_relay(store, services, runtime_config, shutdown).await;
    tracing::info!(
        delivered = summary.delivered,
        permanently_failed = summary.permanently_failed,
        "forward relay exited"
    );
    Ok(())
}

fn require_bot_token(config: &OperationalConfig) -> Result<String, RelayError> {
    config.bot_token.clone().ok_or_else(|| {
        RelayError::Config(
            "bot_token missing in config.json; the telegram bot api transport needs it"
                .to_string(),
        )
    })
}

fn resolve_artifact_path(configured: Option<PathBuf>) -> Result<PathBuf> {
    match configured {
        Some(path) => Ok(path),
        None => std::env::current_exe().context("failed to resolve the running executable"),
    }
}

fn spawn_ctrl_c_listener(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("ctrl-c received; shutting down");
                shutdown.request();
            }
            Err(error) => tracing::warn!(%error, "failed to listen for ctrl-c"),
        }
    });
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use relay_runtime::OperationalConfigDocument;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn config(bot_token: Option<&str>) -> OperationalConfig {
        let mut document = json!({
            "api_id": 1,
            "api_hash": "hash",
            "source_channel": -1,
            "target_channel": -2,
            "log_channel": -3,
        });
        if let Some(token) = bot_token {
            document["bot_token"] = json!(token);
        }
        let document = OperationalConfigDocument::from_value(document).expect("document");
        OperationalConfig::from_document(&document).expect("config")
    }

    #[test]
    fn unit_require_bot_token_reports_config_error() {
        assert_eq!(require_bot_token(&config(Some("abc"))).expect("token"), "abc");
        let error = require_bot_token(&config(None)).expect_err("missing token");
        assert_eq!(error.kind(), "config_error");
    }

    #[test]
    fn unit_resolve_artifact_path_prefers_flag() {
        let path = PathBuf::from("/opt/relay/forward-relay");
        assert_eq!(
            resolve_artifact_path(Some(path.clone())).expect("path"),
            path
        );
        assert!(resolve_artifact_path(None).expect("current exe").is_absolute());
    }

    #[tokio::test]
    async fn regression_missing_operational_config_fails_startup() {
        let temp = tempdir().expect("tempdir");
        let config_dir = temp.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "forward-relay",
            "--config-dir",
            config_dir.as_str(),
            "--host-name",
            "edge-1",
        ])
        .expect("cli");

        let error = run_cli(cli).await.expect_err("config.json is missing");

        assert!(format!("{error:#}").contains("config.json not found"));
        let identity =
            std::fs::read_to_string(temp.path().join("local_config.json")).expect("identity");
        assert!(identity.contains("edge-1"));
    }
}
