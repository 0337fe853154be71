//! Background loop that periodically refreshes the operational config.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::backoff::Sleeper;
use crate::relay_log::RelayLog;
use crate::update_manager::{ConfigUpdateOutcome, UpdateManager, UpdateTrigger};

/// Pause after a refresh task dies unexpectedly, so a persistent bug cannot
/// spin the loop.
pub const SCHEDULER_FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct ConfigRefreshSchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ConfigRefreshSchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signals the loop and waits for it to exit.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawns the refresh loop.
///
/// The interval is read from the live config at the top of every cycle, so a
/// changed `auto_update_hours` takes effect one cycle after it is applied.
pub fn start_config_refresh_scheduler(
    manager: Arc<UpdateManager>,
    sleeper: Arc<dyn Sleeper>,
    log: RelayLog,
) -> ConfigRefreshSchedulerHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        run_config_refresh_loop(manager, sleeper, log, shutdown_rx).await;
    });
    ConfigRefreshSchedulerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}

async fn run_config_refresh_loop(
    manager: Arc<UpdateManager>,
    sleeper: Arc<dyn Sleeper>,
    log: RelayLog,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let interval = manager.store().snapshot().auto_update_interval();
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = sleeper.sleep(interval) => {}
        }

        if manager.store().snapshot().remote_config_url.is_none() {
            tracing::debug!("config_raw_url not set; skipping scheduled refresh");
            continue;
        }

        let refresh_manager = manager.clone();
        let mut refresh = tokio::spawn(async move {
            refresh_manager
                .apply_remote_config(UpdateTrigger::Scheduled)
                .await
        });
        let joined = tokio::select! {
            _ = &mut shutdown_rx => {
                refresh.abort();
                let _ = refresh.await;
                break;
            }
            joined = &mut refresh => joined,
        };

        match joined {
            Ok(Ok(ConfigUpdateOutcome::Applied)) => {
                tracing::debug!("scheduled refresh applied");
            }
            Ok(Ok(ConfigUpdateOutcome::Unchanged)) => {}
            Ok(Err(error)) => {
                tracing::debug!(kind = error.kind(), "scheduled refresh failed");
            }
            Err(error) => {
                log.warn(&format!("Config refresh task failed: {error}"))
                    .await;
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = sleeper.sleep(SCHEDULER_FAILURE_COOLDOWN) => {}
                }
            }
        }
    }
    tracing::debug!("config refresh scheduler stopped");
}
