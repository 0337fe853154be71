//! Runtime for the forward relay.
//!
//! Owns the operational config store, the retrying forward pipeline, remote
//! config and artifact updates, the refresh scheduler, admin commands and the
//! event loop that ties them to a chat platform.

pub mod backoff;
pub mod chat_platform;
pub mod code_artifact;
pub mod command_router;
pub mod config_store;
pub mod forward_pipeline;
pub mod process_restart;
pub mod relay_error;
pub mod relay_log;
pub mod relay_runtime;
pub mod remote_fetcher;
pub mod scheduler_runtime;
pub mod shutdown;
pub mod telegram_api_client;
pub mod update_manager;

#[cfg(test)]
mod test_support;

pub use backoff::{
    generic_backoff_delay, rate_limit_delay, RecordingSleeper, Sleeper, TokioSleeper,
};
pub use chat_platform::{ChatPlatform, InboundMessage};
pub use code_artifact::{
    install_artifact, rotate_artifact, rotate_artifact_with, validate_artifact,
    CodeArtifactPaths, MIN_ARTIFACT_BYTES,
};
pub use command_router::{authorize, render_video_list, CommandRouter, RelayCommand};
pub use config_store::{
    canonical_document, load_local_identity, load_operational_config, ChannelId, ConfigHandle,
    ConfigPaths, ConfigStore, LocalIdentity, OperationalConfig, OperationalConfigDocument,
};
pub use forward_pipeline::{
    forward_with_retry, ForwardAttempt, ForwardContext, ForwardOutcome, ForwardPipeline,
};
pub use process_restart::{
    restarter_for, ExecRestarter, ProcessRestarter, RestartStrategy, SupervisorExitRestarter,
    SUPERVISOR_RESTART_EXIT_CODE,
};
pub use relay_error::{DeliveryError, RelayError};
pub use relay_log::{RelayLog, RelayLogLevel, DEFAULT_LOCAL_LOG_FILE};
pub use relay_runtime::{
    run_relay, RelayRuntimeConfig, RelayServices, RelaySummary, DEFAULT_POLL_ERROR_BACKOFF,
    DEFAULT_SHUTDOWN_GRACE,
};
pub use remote_fetcher::{HttpRemoteFetcher, RemoteFetcher, DEFAULT_FETCH_TIMEOUT};
pub use scheduler_runtime::{
    start_config_refresh_scheduler, ConfigRefreshSchedulerHandle, SCHEDULER_FAILURE_COOLDOWN,
};
pub use shutdown::ShutdownSignal;
pub use telegram_api_client::{TelegramBotApiClient, DEFAULT_TELEGRAM_API_BASE};
pub use update_manager::{ConfigUpdateOutcome, UpdateManager, UpdateTrigger};
