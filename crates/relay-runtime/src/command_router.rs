//! Text command dispatch with the admin allow-list gate.

use std::sync::Arc;

use crate::chat_platform::{ChatPlatform, InboundMessage};
use crate::config_store::{ConfigHandle, OperationalConfig, STATIC_TEXT_ABOUT, STATIC_TEXT_START};
use crate::process_restart::ProcessRestarter;
use crate::relay_error::RelayError;
use crate::relay_log::RelayLog;
use crate::shutdown::ShutdownSignal;
use crate::update_manager::{sender_label, UpdateManager, UpdateTrigger};

const NOT_AUTHORIZED_REPLY: &str = "❌ Not authorized.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayCommand {
    Start,
    About,
    Ping,
    Hosts,
    Videos,
    Update,
    Upgrade,
    Stop,
}

impl RelayCommand {
    pub const ALL: [RelayCommand; 8] = [
        Self::Start,
        Self::About,
        Self::Ping,
        Self::Hosts,
        Self::Videos,
        Self::Update,
        Self::Upgrade,
        Self::Stop,
    ];

    /// Exact, case-sensitive match of the whole message text.
    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.name() == text)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "/start",
            Self::About => "/about",
            Self::Ping => "/ping",
            Self::Hosts => "/hosts",
            Self::Videos => "/videos",
            Self::Update => "/update",
            Self::Upgrade => "/upgrade",
            Self::Stop => "/stop",
        }
    }

    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Update | Self::Upgrade | Self::Stop)
    }
}

/// Fails with [`RelayError::Authorization`] when a privileged command comes
/// from a sender outside a non-empty admin list.
pub fn authorize(
    config: &OperationalConfig,
    command: RelayCommand,
    sender_id: Option<i64>,
) -> Result<(), RelayError> {
    if !command.is_privileged() || config.is_admin(sender_id) {
        return Ok(());
    }
    Err(RelayError::Authorization {
        sender: sender_label(sender_id),
        command: command.name().to_string(),
    })
}

pub fn render_video_list(links: &[String]) -> String {
    if links.is_empty() {
        return "No videos configured.".to_string();
    }
    let lines = links
        .iter()
        .enumerate()
        .map(|(index, link)| format!("{}. {link}", index + 1))
        .collect::<Vec<_>>();
    format!("🎬 Videos:\n{}", lines.join("\n"))
}

pub struct CommandRouter {
    platform: Arc<dyn ChatPlatform>,
    config: ConfigHandle,
    updates: Arc<UpdateManager>,
    restarter: Arc<dyn ProcessRestarter>,
    log: RelayLog,
    shutdown: ShutdownSignal,
    host_name: String,
}

impl CommandRouter {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        config: ConfigHandle,
        updates: Arc<UpdateManager>,
        restarter: Arc<dyn ProcessRestarter>,
        log: RelayLog,
        shutdown: ShutdownSignal,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            config,
            updates,
            restarter,
            log,
            shutdown,
            host_name: host_name.into(),
        }
    }

    /// Runs the command carried by `message`, if any. Errors end up as
    /// replies; nothing is propagated.
    pub async fn handle(&self, message: &InboundMessage) -> Option<RelayCommand> {
        let command = RelayCommand::parse(message.text.as_deref()?)?;
        let config = self.config.snapshot();
        if let Err(error) = authorize(&config, command, message.sender_id) {
            tracing::warn!(%error, "rejected privileged command");
            self.respond(message, NOT_AUTHORIZED_REPLY).await;
            return Some(command);
        }

        match command {
            RelayCommand::Start => {
                self.respond(message, config.static_text(STATIC_TEXT_START))
                    .await;
            }
            RelayCommand::About => {
                self.respond(message, config.static_text(STATIC_TEXT_ABOUT))
                    .await;
            }
            RelayCommand::Ping => {
                self.respond(message, &format!("Pong! Host: {} ✅", self.host_name))
                    .await;
            }
            RelayCommand::Hosts => {
                self.respond(message, &format!("Host: {} 🟢", self.host_name))
                    .await;
            }
            RelayCommand::Videos => {
                self.respond(message, &render_video_list(&config.link_list))
                    .await;
            }
            RelayCommand::Update => self.run_update(message, &config).await,
            RelayCommand::Upgrade => self.run_upgrade(message, &config).await,
            RelayCommand::Stop => self.run_stop(message).await,
        }
        Some(command)
    }

    async fn run_update(&self, message: &InboundMessage, config: &OperationalConfig) {
        if config.remote_config_url.is_none() {
            self.respond(message, "❌ config_raw_url not configured.")
                .await;
            return;
        }
        self.respond(message, "🔄 Fetching config...").await;
        let trigger = UpdateTrigger::Manual {
            requested_by: message.sender_id,
        };
        match self.updates.apply_remote_config(trigger).await {
            Ok(_) => self.respond(message, "✅ Config updated and applied.").await,
            Err(error) => {
                self.respond(message, &format!("❌ Update failed: {error}"))
                    .await
            }
        }
    }

    async fn run_upgrade(&self, message: &InboundMessage, config: &OperationalConfig) {
        let Some(url) = config.remote_code_url.as_deref() else {
            self.respond(message, "❌ bot_raw_url not configured.").await;
            return;
        };
        self.respond(message, "🔄 Fetching new relay build...").await;
        self.log
            .info(&format!(
                "🔄 Upgrade requested by {} on {}",
                sender_label(message.sender_id),
                self.host_name
            ))
            .await;

        let result = match self.updates.apply_remote_code(url).await {
            Ok(()) => {
                self.respond(
                    message,
                    "✅ Relay upgraded. Restarting process to apply changes...",
                )
                .await;
                self.log.info("🔄 Restarting process after upgrade...").await;
                self.restarter
                    .restart(&self.updates.artifact_paths().current)
            }
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            let text = format!("❌ Upgrade failed: {error}");
            self.respond(message, &text).await;
            self.log.warn(&text).await;
        }
    }

    async fn run_stop(&self, message: &InboundMessage) {
        self.respond(message, "🛑 Shutting down gracefully...").await;
        self.log
            .info(&format!(
                "Shutdown requested by {} on host {}",
                sender_label(message.sender_id),
                self.host_name
            ))
            .await;
        self.shutdown.request();
    }

    async fn respond(&self, message: &InboundMessage, text: &str) {
        if let Err(error) = self.platform.reply(message, text).await {
            tracing::warn!(
                message_id = message.message_id,
                %error,
                "failed to reply to command"
            );
        }
    }
}
