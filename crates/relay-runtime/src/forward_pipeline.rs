//! Per-message forwarding with bounded retry, supervised as one task set.
//!
//! Every source message gets its own task so a slow or rate-limited delivery
//! never holds up the event loop. The [`ForwardPipeline`] owns those tasks in a
//! [`JoinSet`], which lets the runtime report in-flight counts and lets
//! shutdown (and tests) wait for quiescence instead of guessing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::backoff::{generic_backoff_delay, rate_limit_delay, Sleeper};
use crate::chat_platform::{ChatPlatform, InboundMessage};
use crate::config_store::ConfigHandle;
use crate::relay_error::DeliveryError;
use crate::relay_log::RelayLog;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ephemeral per-message retry state.
pub struct ForwardAttempt {
    pub message_id: i64,
    pub attempt_count: u32,
    pub last_error: Option<DeliveryError>,
}

impl ForwardAttempt {
    fn new(message_id: i64) -> Self {
        Self {
            message_id,
            attempt_count: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    Delivered {
        message_id: i64,
        attempts: u32,
    },
    PermanentlyFailed {
        message_id: i64,
        attempts: u32,
        last_error: Option<DeliveryError>,
    },
}

impl ForwardOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Clone)]
/// Collaborators shared by every forwarding task.
pub struct ForwardContext {
    pub platform: Arc<dyn ChatPlatform>,
    pub config: ConfigHandle,
    pub log: RelayLog,
    pub sleeper: Arc<dyn Sleeper>,
    pub host_name: String,
}

/// Delivers `message` to the target channel, retrying up to `max_retry` times.
///
/// The retry ceiling and target are read once when the task starts; a config
/// swap mid-retry only affects later messages.
pub async fn forward_with_retry(context: &ForwardContext, message: &InboundMessage) -> ForwardOutcome {
    let config = context.config.snapshot();
    let max_retry = config.max_retry.max(1);
    let mut state = ForwardAttempt::new(message.message_id);

    for attempt in 1..=max_retry {
        state.attempt_count = attempt;
        let error = match context
            .platform
            .forward_message(&config.target_channel, message)
            .await
        {
            Ok(()) => {
                tracing::debug!(message_id = state.message_id, attempt, "forward delivered");
                context
                    .log
                    .info(&format!(
                        "✅ Message Sent\nSource: {} | Target: {}\nMessage ID: {}\nHost: {}",
                        config.source_channel,
                        config.target_channel,
                        state.message_id,
                        context.host_name
                    ))
                    .await;
                return ForwardOutcome::Delivered {
                    message_id: state.message_id,
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        let delay = match &error {
            DeliveryError::RateLimited {
                retry_after_seconds,
            } => {
                context
                    .log
                    .warn(&format!(
                        "❌ FloodWait on attempt {attempt} for msg {}: wait {retry_after_seconds}s",
                        state.message_id
                    ))
                    .await;
                rate_limit_delay(*retry_after_seconds)
            }
            DeliveryError::Failed { .. } => {
                context
                    .log
                    .warn(&format!(
                        "❌ Forward attempt {attempt} failed for msg {}: {error}",
                        state.message_id
                    ))
                    .await;
                generic_backoff_delay(attempt)
            }
        };
        state.last_error = Some(error);
        if attempt < max_retry {
            context.sleeper.sleep(delay).await;
        }
    }

    context
        .log
        .warn(&format!(
            "❌ Message permanently failed after {} attempts. Message ID: {}\nHost: {}",
            state.attempt_count, state.message_id, context.host_name
        ))
        .await;
    ForwardOutcome::PermanentlyFailed {
        message_id: state.message_id,
        attempts: state.attempt_count,
        last_error: state.last_error,
    }
}

/// Supervised set of in-flight forwarding tasks.
pub struct ForwardPipeline {
    context: ForwardContext,
    tasks: JoinSet<ForwardOutcome>,
}

impl ForwardPipeline {
    pub fn new(context: ForwardContext) -> Self {
        Self {
            context,
            tasks: JoinSet::new(),
        }
    }

    /// Spawns an independent forwarding task and returns immediately.
    pub fn dispatch(&mut self, message: InboundMessage) {
        let context = self.context.clone();
        tracing::debug!(message_id = message.message_id, "dispatching forward task");
        self.tasks
            .spawn(async move { forward_with_retry(&context, &message).await });
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Collects outcomes of tasks that already finished without waiting.
    pub fn reap_finished(&mut self) -> Vec<ForwardOutcome> {
        let mut outcomes = Vec::new();
        while let Some(result) = self.tasks.try_join_next() {
            if let Some(outcome) = outcome_from_join(result) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Waits for every in-flight task to finish.
    pub async fn drain(&mut self) -> Vec<ForwardOutcome> {
        let mut outcomes = Vec::new();
        while let Some(result) = self.tasks.join_next().await {
            if let Some(outcome) = outcome_from_join(result) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Drains within `grace`, then aborts whatever is still running.
    pub async fn shutdown(&mut self, grace: Duration) -> Vec<ForwardOutcome> {
        let deadline = tokio::time::Instant::now() + grace;
        let mut outcomes = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(result)) => {
                    if let Some(outcome) = outcome_from_join(result) {
                        outcomes.push(outcome);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let aborted = self.tasks.len();
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    tracing::warn!(aborted, "aborted in-flight forwards after shutdown grace");
                    break;
                }
            }
        }
        outcomes
    }
}

fn outcome_from_join(
    result: Result<ForwardOutcome, tokio::task::JoinError>,
) -> Option<ForwardOutcome> {
    match result {
        Ok(outcome) => Some(outcome),
        Err(error) if error.is_cancelled() => None,
        Err(error) => {
            tracing::error!(%error, "forward task panicked");
            None
        }
    }
}
