//! Suspension capability and the delay rules used between forward attempts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

const MAX_BACKOFF_EXPONENT: u32 = 16;

#[async_trait]
/// Suspends the calling task; injected so tests can observe waits.
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Wait after a generic delivery failure on `attempt` (1-based): `2^attempt` seconds.
pub fn generic_backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2_u64.saturating_pow(attempt.min(MAX_BACKOFF_EXPONENT)))
}

/// Wait after a rate-limit signal: the mandated wait plus one second.
pub fn rate_limit_delay(retry_after_seconds: u64) -> Duration {
    Duration::from_secs(retry_after_seconds.saturating_add(1))
}

#[derive(Debug, Default)]
/// Sleeper that returns immediately and remembers every requested duration.
///
/// With [`RecordingSleeper::blocking_after`] the sleeper parks forever once
/// the given number of sleeps has completed, which lets loop tests stop at a
/// known iteration.
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
    block_after: Option<usize>,
    recorded: Notify,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocking_after(completed_sleeps: usize) -> Self {
        Self {
            block_after: Some(completed_sleeps),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Resolves once at least `count` sleeps have been requested.
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.recorded.notified();
            if self.calls().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let requested = match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(duration);
                calls.len()
            }
            Err(_) => 0,
        };
        self.recorded.notify_waiters();
        if self
            .block_after
            .is_some_and(|completed| requested > completed)
        {
            std::future::pending::<()>().await;
        }
    }
}
