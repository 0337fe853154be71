//! Local identity and operational config documents.
//!
//! Both documents live as JSON files in one config directory. The operational
//! config is validated once at load and held behind an `ArcSwap` so every task
//! reads a complete document; replacements go to disk through a staged write
//! and rename before the in-memory swap.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use relay_core::{remove_stale_staged_writes, write_text_atomic};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::relay_error::RelayError;

pub const LOCAL_IDENTITY_FILE: &str = "local_config.json";
pub const OPERATIONAL_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_HOST_NAME: &str = "host";
pub const DEFAULT_SESSION_NAME: &str = "forward_session";
pub const DEFAULT_AUTO_UPDATE_HOURS: f64 = 3.0;
/// One year; longer refresh intervals are rejected.
pub const MAX_AUTO_UPDATE_HOURS: f64 = 24.0 * 365.0;
pub const DEFAULT_MAX_RETRY: u32 = 3;
pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome! This bot forwards messages.";
pub const DEFAULT_ABOUT_MESSAGE: &str = "Forward Bot";
pub const STATIC_TEXT_START: &str = "start";
pub const STATIC_TEXT_ABOUT: &str = "about";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
/// Chat identifier as written in the config: a numeric id or an `@handle`.
pub enum ChannelId {
    Numeric(i64),
    Handle(String),
}

impl ChannelId {
    /// Returns true when an inbound chat (`id`, optional `username`) is this channel.
    pub fn matches_chat(&self, chat_id: i64, username: Option<&str>) -> bool {
        match self {
            Self::Numeric(value) => *value == chat_id,
            Self::Handle(handle) => {
                let handle = handle.trim();
                if let Ok(numeric) = handle.parse::<i64>() {
                    return numeric == chat_id;
                }
                let wanted = handle.trim_start_matches('@');
                username
                    .map(|name| name.trim_start_matches('@'))
                    .is_some_and(|name| !wanted.is_empty() && name.eq_ignore_ascii_case(wanted))
            }
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Self::Handle(handle) if handle.trim().is_empty())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Handle(handle) => f.write_str(handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Machine-local identity document.
pub struct LocalIdentity {
    pub host_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
/// Raw operational config document; every field is optional so the same
/// shape serves startup validation and field-level merges.
pub struct OperationalConfigDocument {
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub api_id: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub api_hash: Option<String>,
    pub bot_token: Option<String>,
    pub session_name: Option<String>,
    pub source_channel: Option<ChannelId>,
    pub target_channel: Option<ChannelId>,
    pub log_channel: Option<ChannelId>,
    pub config_raw_url: Option<String>,
    pub bot_raw_url: Option<String>,
    pub auto_update_hours: Option<f64>,
    pub admin_user_ids: Option<Vec<i64>>,
    pub youtube_links: Option<Vec<String>>,
    pub max_retry: Option<u32>,
    pub welcome_message: Option<String>,
    pub about_message: Option<String>,
}

impl OperationalConfigDocument {
    pub fn from_value(value: Value) -> Result<Self, RelayError> {
        serde_json::from_value(value).map_err(|error| RelayError::Parse(error.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Validated operational config shared by the pipeline and command handlers.
pub struct OperationalConfig {
    pub api_id: String,
    pub api_hash: String,
    pub bot_token: Option<String>,
    pub session_name: String,
    pub source_channel: ChannelId,
    pub target_channel: ChannelId,
    pub log_channel: ChannelId,
    pub remote_config_url: Option<String>,
    pub remote_code_url: Option<String>,
    pub auto_update_hours: f64,
    pub admin_ids: BTreeSet<i64>,
    pub max_retry: u32,
    pub static_texts: BTreeMap<String, String>,
    pub link_list: Vec<String>,
}

impl OperationalConfig {
    /// Builds a config from a full document, failing on missing required fields.
    pub fn from_document(document: &OperationalConfigDocument) -> Result<Self, RelayError> {
        let api_id = non_blank(document.api_id.as_deref());
        let api_hash = non_blank(document.api_hash.as_deref());
        let (Some(api_id), Some(api_hash)) = (api_id, api_hash) else {
            return Err(RelayError::Config(
                "api_id / api_hash missing in config.json".to_string(),
            ));
        };
        let (Some(source_channel), Some(target_channel), Some(log_channel)) = (
            document.source_channel.clone(),
            document.target_channel.clone(),
            document.log_channel.clone(),
        ) else {
            return Err(RelayError::Config(
                "source_channel / target_channel / log_channel must be set in config.json"
                    .to_string(),
            ));
        };

        let mut static_texts = BTreeMap::new();
        static_texts.insert(
            STATIC_TEXT_START.to_string(),
            document
                .welcome_message
                .clone()
                .unwrap_or_else(|| DEFAULT_WELCOME_MESSAGE.to_string()),
        );
        static_texts.insert(
            STATIC_TEXT_ABOUT.to_string(),
            document
                .about_message
                .clone()
                .unwrap_or_else(|| DEFAULT_ABOUT_MESSAGE.to_string()),
        );

        let config = Self {
            api_id,
            api_hash,
            bot_token: non_blank(document.bot_token.as_deref()),
            session_name: non_blank(document.session_name.as_deref())
                .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            source_channel,
            target_channel,
            log_channel,
            remote_config_url: non_blank(document.config_raw_url.as_deref()),
            remote_code_url: non_blank(document.bot_raw_url.as_deref()),
            auto_update_hours: document
                .auto_update_hours
                .unwrap_or(DEFAULT_AUTO_UPDATE_HOURS),
            admin_ids: document
                .admin_user_ids
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            max_retry: document.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
            static_texts,
            link_list: document.youtube_links.clone().unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Applies the fields present in `document` over this config; absent
    /// fields keep their current values.
    pub fn merged_with(&self, document: &OperationalConfigDocument) -> Result<Self, RelayError> {
        let mut merged = self.clone();
        if let Some(value) = non_blank(document.api_id.as_deref()) {
            merged.api_id = value;
        }
        if let Some(value) = non_blank(document.api_hash.as_deref()) {
            merged.api_hash = value;
        }
        if let Some(value) = non_blank(document.bot_token.as_deref()) {
            merged.bot_token = Some(value);
        }
        if let Some(value) = non_blank(document.session_name.as_deref()) {
            merged.session_name = value;
        }
        if let Some(value) = &document.source_channel {
            merged.source_channel = value.clone();
        }
        if let Some(value) = &document.target_channel {
            merged.target_channel = value.clone();
        }
        if let Some(value) = &document.log_channel {
            merged.log_channel = value.clone();
        }
        if let Some(value) = non_blank(document.config_raw_url.as_deref()) {
            merged.remote_config_url = Some(value);
        }
        if let Some(value) = non_blank(document.bot_raw_url.as_deref()) {
            merged.remote_code_url = Some(value);
        }
        if let Some(value) = document.auto_update_hours {
            merged.auto_update_hours = value;
        }
        if let Some(value) = &document.admin_user_ids {
            merged.admin_ids = value.iter().copied().collect();
        }
        if let Some(value) = &document.youtube_links {
            merged.link_list = value.clone();
        }
        if let Some(value) = document.max_retry {
            merged.max_retry = value;
        }
        if let Some(value) = &document.welcome_message {
            merged
                .static_texts
                .insert(STATIC_TEXT_START.to_string(), value.clone());
        }
        if let Some(value) = &document.about_message {
            merged
                .static_texts
                .insert(STATIC_TEXT_ABOUT.to_string(), value.clone());
        }
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.source_channel.is_blank()
            || self.target_channel.is_blank()
            || self.log_channel.is_blank()
        {
            return Err(RelayError::Config(
                "source_channel / target_channel / log_channel cannot be empty".to_string(),
            ));
        }
        if self.max_retry == 0 {
            return Err(RelayError::Config(
                "max_retry must be at least 1".to_string(),
            ));
        }
        if !self.auto_update_hours.is_finite()
            || self.auto_update_hours <= 0.0
            || self.auto_update_hours > MAX_AUTO_UPDATE_HOURS
        {
            return Err(RelayError::Config(format!(
                "auto_update_hours must be in (0, {MAX_AUTO_UPDATE_HOURS}], got {}",
                self.auto_update_hours
            )));
        }
        Ok(())
    }

    pub fn auto_update_interval(&self) -> Duration {
        let hours = self.auto_update_hours.clamp(0.0, MAX_AUTO_UPDATE_HOURS);
        Duration::try_from_secs_f64(hours * 3_600.0)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_AUTO_UPDATE_HOURS * 3_600.0))
    }

    /// Empty admin list means every sender may run privileged commands.
    pub fn is_admin(&self, sender_id: Option<i64>) -> bool {
        if self.admin_ids.is_empty() {
            return true;
        }
        sender_id.is_some_and(|id| self.admin_ids.contains(&id))
    }

    pub fn static_text(&self, name: &str) -> &str {
        self.static_texts
            .get(name)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Clone)]
/// Shared, swappable reference to the live operational config.
pub struct ConfigHandle {
    current: Arc<ArcSwap<OperationalConfig>>,
}

impl ConfigHandle {
    pub fn new(config: OperationalConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<OperationalConfig> {
        self.current.load_full()
    }

    fn replace(&self, config: OperationalConfig) {
        self.current.store(Arc::new(config));
    }
}

impl fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("current", &self.snapshot())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Locations of the two config documents inside one directory.
pub struct ConfigPaths {
    pub dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn local_identity_path(&self) -> PathBuf {
        self.dir.join(LOCAL_IDENTITY_FILE)
    }

    pub fn operational_config_path(&self) -> PathBuf {
        self.dir.join(OPERATIONAL_CONFIG_FILE)
    }
}

/// Loads the local identity, creating it on first run.
///
/// `bootstrap_host_name` skips the prompt; otherwise the host name is read
/// from `input` and an empty answer falls back to [`DEFAULT_HOST_NAME`].
pub fn load_local_identity<R, W>(
    paths: &ConfigPaths,
    bootstrap_host_name: Option<&str>,
    mut input: R,
    mut prompt: W,
) -> Result<LocalIdentity>
where
    R: BufRead,
    W: Write,
{
    let path = paths.local_identity_path();
    if !path.exists() {
        let host_name = match non_blank(bootstrap_host_name) {
            Some(host_name) => host_name,
            None => {
                write!(prompt, "Enter host name (for this machine): ")
                    .context("failed to write host name prompt")?;
                prompt.flush().context("failed to flush host name prompt")?;
                let mut line = String::new();
                input
                    .read_line(&mut line)
                    .context("failed to read host name")?;
                non_blank(Some(line.as_str())).unwrap_or_else(|| DEFAULT_HOST_NAME.to_string())
            }
        };
        let identity = LocalIdentity { host_name };
        let mut encoded =
            serde_json::to_string_pretty(&identity).context("failed to encode local identity")?;
        encoded.push('\n');
        write_text_atomic(&path, &encoded)?;
        tracing::info!(
            path = %path.display(),
            host = %identity.host_name,
            "created local identity"
        );
        return Ok(identity);
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let host_name = value
        .get("host_name")
        .and_then(Value::as_str)
        .and_then(|name| non_blank(Some(name)))
        .unwrap_or_else(|| DEFAULT_HOST_NAME.to_string());
    Ok(LocalIdentity { host_name })
}

/// Loads and validates the operational config. Any error here is fatal for
/// startup.
pub fn load_operational_config(paths: &ConfigPaths) -> Result<OperationalConfig, RelayError> {
    let path = paths.operational_config_path();
    if !path.exists() {
        return Err(RelayError::Config(format!(
            "{} not found; create it and restart",
            path.display()
        )));
    }
    let value = read_document(&path)?;
    let document = OperationalConfigDocument::from_value(value)?;
    OperationalConfig::from_document(&document)
}

fn read_document(path: &Path) -> Result<Value, RelayError> {
    let raw = std::fs::read_to_string(path).map_err(|error| {
        RelayError::Config(format!("failed to read {}: {error}", path.display()))
    })?;
    serde_json::from_str::<Value>(&raw)
        .map_err(|error| RelayError::Parse(format!("{}: {error}", path.display())))
}

/// Owner of the on-disk operational document and its live in-memory copy.
#[derive(Debug)]
pub struct ConfigStore {
    paths: ConfigPaths,
    live: ConfigHandle,
}

impl ConfigStore {
    pub fn new(paths: ConfigPaths, initial: OperationalConfig) -> Self {
        Self {
            paths,
            live: ConfigHandle::new(initial),
        }
    }

    /// Loads the operational config and clears staging files left by an
    /// interrupted replace.
    pub fn open(paths: ConfigPaths) -> Result<Self, RelayError> {
        let config = load_operational_config(&paths)?;
        match remove_stale_staged_writes(&paths.operational_config_path()) {
            Ok(0) => {}
            Ok(removed) => tracing::warn!(removed, "removed stale config staging files"),
            Err(error) => tracing::warn!(%error, "failed to clean config staging files"),
        }
        Ok(Self::new(paths, config))
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn handle(&self) -> ConfigHandle {
        self.live.clone()
    }

    pub fn snapshot(&self) -> Arc<OperationalConfig> {
        self.live.snapshot()
    }

    /// Current on-disk document, for canonical comparison.
    pub fn read_on_disk_document(&self) -> Result<Value, RelayError> {
        read_document(&self.paths.operational_config_path())
    }

    /// Persists `document` with a staged write + rename, then swaps in `applied`.
    pub fn replace_operational_config(
        &self,
        document: &Value,
        applied: OperationalConfig,
    ) -> Result<(), RelayError> {
        applied.validate()?;
        let mut encoded = serde_json::to_string_pretty(document)
            .map_err(|error| RelayError::Parse(error.to_string()))?;
        encoded.push('\n');
        write_text_atomic(&self.paths.operational_config_path(), &encoded).map_err(|error| {
            RelayError::Config(format!("failed to persist config document: {error:#}"))
        })?;
        self.live.replace(applied);
        Ok(())
    }
}

/// Serialization with object keys in sorted order, so documents that differ
/// only in key order compare equal.
pub fn canonical_document(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let ordered = map
                    .iter()
                    .map(|(key, item)| (key.clone(), sorted(item)))
                    .collect::<BTreeMap<_, _>>();
                Value::Object(ordered.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn deserialize_optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Integer(i64),
        Text(String),
    }

    Ok(
        Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
            Scalar::Integer(value) => value.to_string(),
            Scalar::Text(value) => value,
        }),
    )
}
