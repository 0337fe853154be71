use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::chat_platform::{ChatPlatform, InboundMessage};
use crate::config_store::{
    ChannelId, ConfigPaths, ConfigStore, OperationalConfig, OperationalConfigDocument,
};
use crate::process_restart::ProcessRestarter;
use crate::relay_error::{DeliveryError, RelayError};
use crate::remote_fetcher::RemoteFetcher;

pub(crate) const SOURCE_CHAT_ID: i64 = -1001;
pub(crate) const TARGET_CHAT_ID: i64 = -1002;
pub(crate) const LOG_CHAT_ID: i64 = -1003;

pub(crate) fn test_document(max_retry: u32) -> Value {
    json!({
        "api_id": 12345,
        "api_hash": "hash",
        "bot_token": "token",
        "source_channel": SOURCE_CHAT_ID,
        "target_channel": TARGET_CHAT_ID,
        "log_channel": LOG_CHAT_ID,
        "max_retry": max_retry,
    })
}

pub(crate) fn test_config(max_retry: u32) -> OperationalConfig {
    let document =
        OperationalConfigDocument::from_value(test_document(max_retry)).expect("test document");
    OperationalConfig::from_document(&document).expect("test config")
}

/// Writes the test document with `overrides` applied into `dir` and opens it.
pub(crate) fn open_test_store(dir: &Path, overrides: Value) -> Arc<ConfigStore> {
    let mut document = test_document(3);
    if let (Some(fields), Value::Object(extra)) = (document.as_object_mut(), overrides) {
        fields.extend(extra);
    }
    let paths = ConfigPaths::new(dir);
    std::fs::write(paths.operational_config_path(), document.to_string()).expect("seed config");
    Arc::new(ConfigStore::open(paths).expect("open store"))
}

pub(crate) fn source_message(message_id: i64) -> InboundMessage {
    InboundMessage {
        chat_id: SOURCE_CHAT_ID,
        chat_username: None,
        message_id,
        sender_id: None,
        text: Some(format!("post {message_id}")),
    }
}

pub(crate) fn command_message(message_id: i64, sender_id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        chat_id: sender_id,
        chat_username: None,
        message_id,
        sender_id: Some(sender_id),
        text: Some(text.to_string()),
    }
}

/// In-memory chat platform with scripted forward results.
#[derive(Default)]
pub(crate) struct RecordingPlatform {
    inbound: Mutex<VecDeque<Vec<InboundMessage>>>,
    forward_script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    forwards: Mutex<Vec<(ChannelId, i64)>>,
    sent: Mutex<Vec<(ChannelId, String)>>,
    replies: Mutex<Vec<(i64, String)>>,
    fail_sends: bool,
}

impl RecordingPlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub(crate) fn with_forward_results(
        self,
        results: impl IntoIterator<Item = Result<(), DeliveryError>>,
    ) -> Self {
        self.forward_script
            .lock()
            .expect("forward script lock")
            .extend(results);
        self
    }

    pub(crate) fn push_inbound(&self, batch: Vec<InboundMessage>) {
        self.inbound.lock().expect("inbound lock").push_back(batch);
    }

    pub(crate) fn forwards(&self) -> Vec<(ChannelId, i64)> {
        self.forwards.lock().expect("forwards lock").clone()
    }

    pub(crate) fn sent_messages(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub(crate) fn sent_containing(&self, needle: &str) -> usize {
        self.sent_messages()
            .iter()
            .filter(|(_, text)| text.contains(needle))
            .count()
    }

    pub(crate) fn replies(&self) -> Vec<(i64, String)> {
        self.replies.lock().expect("replies lock").clone()
    }

    pub(crate) fn reply_texts(&self) -> Vec<String> {
        self.replies().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn poll_messages(&self) -> Result<Vec<InboundMessage>, DeliveryError> {
        let next = self.inbound.lock().expect("inbound lock").pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => std::future::pending().await,
        }
    }

    async fn forward_message(
        &self,
        destination: &ChannelId,
        message: &InboundMessage,
    ) -> Result<(), DeliveryError> {
        self.forwards
            .lock()
            .expect("forwards lock")
            .push((destination.clone(), message.message_id));
        self.forward_script
            .lock()
            .expect("forward script lock")
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn send_message(&self, destination: &ChannelId, text: &str) -> Result<(), DeliveryError> {
        if self.fail_sends {
            return Err(DeliveryError::failed("transport_error", "log channel offline"));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((destination.clone(), text.to_string()));
        Ok(())
    }

    async fn reply(&self, origin: &InboundMessage, text: &str) -> Result<(), DeliveryError> {
        self.replies
            .lock()
            .expect("replies lock")
            .push((origin.message_id, text.to_string()));
        Ok(())
    }
}

/// Fetcher serving canned bodies per URL; unknown URLs answer HTTP 404.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    fetch_count: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.set_body(url, body);
        self
    }

    pub(crate) fn set_body(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .expect("bodies lock")
            .insert(url.to_string(), body.into());
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetcher for ScriptedFetcher {
    async fn fetch_bytes(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, RelayError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .lock()
            .expect("bodies lock")
            .get(url)
            .cloned()
            .ok_or_else(|| RelayError::Fetch {
                url: url.to_string(),
                status: Some(404),
                detail: "HTTP 404".to_string(),
            })
    }
}

#[derive(Default)]
pub(crate) struct RecordingRestarter {
    restarts: Mutex<Vec<PathBuf>>,
}

impl RecordingRestarter {
    pub(crate) fn restarts(&self) -> Vec<PathBuf> {
        self.restarts.lock().expect("restarts lock").clone()
    }
}

impl ProcessRestarter for RecordingRestarter {
    fn restart(&self, artifact: &Path) -> Result<(), RelayError> {
        self.restarts
            .lock()
            .expect("restarts lock")
            .push(artifact.to_path_buf());
        Ok(())
    }
}
