//! Top-level event loop: poll, route, and shut down cleanly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_core::LogRotationPolicy;
use tokio::task::JoinSet;

use crate::backoff::{rate_limit_delay, Sleeper};
use crate::chat_platform::{ChatPlatform, InboundMessage};
use crate::code_artifact::CodeArtifactPaths;
use crate::command_router::{CommandRouter, RelayCommand};
use crate::config_store::{ConfigHandle, ConfigStore};
use crate::forward_pipeline::{ForwardContext, ForwardOutcome, ForwardPipeline};
use crate::process_restart::ProcessRestarter;
use crate::relay_error::DeliveryError;
use crate::relay_log::RelayLog;
use crate::remote_fetcher::{RemoteFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::scheduler_runtime::start_config_refresh_scheduler;
use crate::shutdown::ShutdownSignal;
use crate::update_manager::UpdateManager;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// External capabilities the relay is wired against.
#[derive(Clone)]
pub struct RelayServices {
    pub platform: Arc<dyn ChatPlatform>,
    pub fetcher: Arc<dyn RemoteFetcher>,
    pub sleeper: Arc<dyn Sleeper>,
    pub restarter: Arc<dyn ProcessRestarter>,
}

#[derive(Debug, Clone)]
pub struct RelayRuntimeConfig {
    pub host_name: String,
    pub local_log_path: Option<PathBuf>,
    pub log_rotation: LogRotationPolicy,
    pub artifact_path: PathBuf,
    pub shutdown_grace: Duration,
    pub poll_error_backoff: Duration,
    pub fetch_timeout: Duration,
}

impl RelayRuntimeConfig {
    pub fn new(host_name: impl Into<String>, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            host_name: host_name.into(),
            local_log_path: None,
            log_rotation: LogRotationPolicy::default(),
            artifact_path: artifact_path.into(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            poll_error_backoff: DEFAULT_POLL_ERROR_BACKOFF,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub delivered: usize,
    pub permanently_failed: usize,
    pub commands_handled: usize,
}

impl RelaySummary {
    fn record_forwards(&mut self, outcomes: Vec<ForwardOutcome>) {
        for outcome in outcomes {
            if outcome.is_delivered() {
                self.delivered = self.delivered.saturating_add(1);
            } else {
                self.permanently_failed = self.permanently_failed.saturating_add(1);
            }
        }
    }

    fn record_command(&mut self, handled: Option<RelayCommand>) {
        if handled.is_some() {
            self.commands_handled = self.commands_handled.saturating_add(1);
        }
    }
}

/// Runs the relay until `shutdown` is requested (by `/stop` or the caller).
///
/// On exit the scheduler is stopped, in-flight forwards get
/// `shutdown_grace` to finish, and anything still running is aborted.
pub async fn run_relay(
    store: Arc<ConfigStore>,
    services: RelayServices,
    config: RelayRuntimeConfig,
    shutdown: ShutdownSignal,
) -> RelaySummary {
    let live = store.handle();
    let log = RelayLog::new(
        services.platform.clone(),
        live.clone(),
        config.local_log_path.clone(),
        config.log_rotation,
    );
    let updates = Arc::new(UpdateManager::new(
        store.clone(),
        services.fetcher.clone(),
        log.clone(),
        config.host_name.clone(),
        CodeArtifactPaths::for_artifact(config.artifact_path.clone()),
        config.fetch_timeout,
    ));
    let router = Arc::new(CommandRouter::new(
        services.platform.clone(),
        live.clone(),
        updates.clone(),
        services.restarter.clone(),
        log.clone(),
        shutdown.clone(),
        config.host_name.clone(),
    ));
    let mut pipeline = ForwardPipeline::new(ForwardContext {
        platform: services.platform.clone(),
        config: live.clone(),
        log: log.clone(),
        sleeper: services.sleeper.clone(),
        host_name: config.host_name.clone(),
    });
    let mut commands: JoinSet<Option<RelayCommand>> = JoinSet::new();
    let mut summary = RelaySummary::default();

    log.info(&format!("🟢 Relay started on host {}", config.host_name))
        .await;
    let mut scheduler =
        start_config_refresh_scheduler(updates, services.sleeper.clone(), log.clone());

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            polled = services.platform.poll_messages() => match polled {
                Ok(batch) => {
                    for message in batch {
                        route_message(message, &live, &mut pipeline, &mut commands, &router);
                    }
                }
                Err(error) => {
                    let delay = match &error {
                        DeliveryError::RateLimited { retry_after_seconds } => {
                            rate_limit_delay(*retry_after_seconds)
                        }
                        DeliveryError::Failed { .. } => config.poll_error_backoff,
                    };
                    tracing::warn!(%error, delay_ms = duration_millis(delay), "polling for updates failed");
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            },
        }
        summary.record_forwards(pipeline.reap_finished());
        while let Some(joined) = commands.try_join_next() {
            summary.record_command(command_result(joined));
        }
    }

    tracing::info!(
        in_flight = pipeline.in_flight(),
        host = %config.host_name,
        "relay shutting down"
    );
    scheduler.shutdown().await;
    summary.record_forwards(pipeline.shutdown(config.shutdown_grace).await);
    let drained = tokio::time::timeout(config.shutdown_grace, async {
        let mut handled = Vec::new();
        while let Some(joined) = commands.join_next().await {
            handled.push(command_result(joined));
        }
        handled
    })
    .await;
    match drained {
        Ok(handled) => {
            for command in handled {
                summary.record_command(command);
            }
        }
        Err(_) => {
            tracing::warn!("aborting command handlers still running after shutdown grace");
            commands.abort_all();
            while commands.join_next().await.is_some() {}
        }
    }
    tracing::info!(
        delivered = summary.delivered,
        permanently_failed = summary.permanently_failed,
        commands = summary.commands_handled,
        "relay stopped"
    );
    summary
}

fn route_message(
    message: InboundMessage,
    live: &ConfigHandle,
    pipeline: &mut ForwardPipeline,
    commands: &mut JoinSet<Option<RelayCommand>>,
    router: &Arc<CommandRouter>,
) {
    let is_command = message
        .text
        .as_deref()
        .and_then(RelayCommand::parse)
        .is_some();
    let from_source = message.is_from(&live.snapshot().source_channel);
    if is_command {
        let router = router.clone();
        let command_message = message.clone();
        commands.spawn(async move { router.handle(&command_message).await });
    }
    if from_source {
        pipeline.dispatch(message);
    }
}

fn duration_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn command_result(
    joined: Result<Option<RelayCommand>, tokio::task::JoinError>,
) -> Option<RelayCommand> {
    match joined {
        Ok(handled) => handled,
        Err(error) => {
            if !error.is_cancelled() {
                tracing::error!(%error, "command handler panicked");
            }
            None
        }
    }
}
