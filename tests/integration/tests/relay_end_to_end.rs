use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use httpmock::prelude::*;
use relay_runtime::{
    run_relay, ConfigPaths, ConfigStore, HttpRemoteFetcher, ProcessRestarter, RelayError,
    RelayRuntimeConfig, RelayServices, ShutdownSignal, TelegramBotApiClient, TokioSleeper,
};
use serde_json::{json, Value};
use tempfile::tempdir;

const TOKEN: &str = "relay-token";
const SOURCE_CHAT: i64 = -1001;
const ADMIN: i64 = 7;

#[derive(Default)]
struct RecordingRestarter {
    restarts: Mutex<Vec<PathBuf>>,
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

fn bot_path(method: &str) -> String {
    format!("/bot{TOKEN}/{method}")
}

fn admin_command(update_id: i64, message_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": message_id,
            "from": {"id": ADMIN, "is_bot": false, "first_name": "Admin"},
            "chat": {"id": ADMIN, "type": "private"},
            "text": text,
        }
    })
}

fn write_operational_config(dir: &Path, server: &MockServer) {
    let document = json!({
        "api_id": 12345,
        "api_hash": "hash",
        "bot_token": TOKEN,
        "source_channel": SOURCE_CHAT,
        "target_channel": -1002,
        "log_channel": -1003,
        "admin_user_ids": [ADMIN],
        "config_raw_url": server.url("/remote/config.json"),
        "bot_raw_url": server.url("/remote/forward-relay"),
    });
    std::fs::write(
        ConfigPaths::new(dir).operational_config_path(),
        document.to_string(),
    )
    .expect("write config");
}

fn services(server: &MockServer, restarter: Arc<RecordingRestarter>) -> RelayServices {
    let platform = TelegramBotApiClient::new(&server.base_url(), TOKEN, Duration::from_secs(5), 0)
        .expect("telegram client");
    RelayServices {
        platform: Arc::new(platform),
        fetcher: Arc::new(HttpRemoteFetcher::new().expect("fetcher")),
        sleeper: Arc::new(TokioSleeper),
        restarter,
    }
}

fn mock_idle_polls(server: &MockServer, offset: i64) {
    server.mock(|when, then| {
        when.method(POST)
            .path(bot_path("getUpdates"))
            .body_includes(format!("\"offset\":{offset}"));
        then.status(200)
            .delay(Duration::from_millis(100))
            .json_body(json!({"ok": true, "result": []}));
    });
}

#[tokio::test]
async fn integration_relay_forwards_post_and_applies_update_over_http() {
    let server = MockServer::start();
    let temp = tempdir().expect("tempdir");
    write_operational_config(temp.path(), &server);

    server.mock(|when, then| {
        when.method(POST)
            .path(bot_path("getUpdates"))
            .body_includes("\"offset\":0");
        then.status(200).json_body(json!({
            "ok": true,
            "result": [
                {
                    "update_id": 1,
                    "channel_post": {
                        "message_id": 10,
                        "chat": {"id": SOURCE_CHAT, "type": "channel"},
                        "text": "fresh post",
                    }
                },
                admin_command(2, 11, "/update"),
            ]
        }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path(bot_path("getUpdates"))
            .body_includes("\"offset\":3");
        then.status(200)
            .delay(Duration::from_millis(200))
            .json_body(json!({"ok": true, "result": [admin_command(3, 12, "/stop")]}));
    });
    mock_idle_polls(&server, 4);
    let forward = server.mock(|when, then| {
        when.method(POST)
            .path(bot_path("forwardMessage"))
            .body_includes("\"from_chat_id\":-1001")
            .body_includes("\"message_id\":10");
        then.status(200)
            .json_body(json!({"ok": true, "result": {"message_id": 500}}));
    });
    let send = server.mock(|when, then| {
        when.method(POST).path(bot_path("sendMessage"));
        then.status(200)
            .json_body(json!({"ok": true, "result": {"message_id": 501}}));
    });
    let remote_config = server.mock(|when, then| {
        when.method(GET).path("/remote/config.json");
        then.status(200).body(r#"{"max_retry": 5, "youtube_links": ["https://youtu.be/x"]}"#);
    });

    let store = Arc::new(ConfigStore::open(ConfigPaths::new(temp.path())).expect("open store"));
    let mut config = RelayRuntimeConfig::new("edge-1", temp.path().join("forward-relay"));
    config.local_log_path = Some(temp.path().join("forward_relay_local.log"));
    let restarter = Arc::new(RecordingRestarter::default());

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        run_relay(
            store.clone(),
            services(&server, restarter.clone()),
            config,
            ShutdownSignal::new(),
        ),
    )
    .await
    .expect("relay should stop after /stop");

    forward.assert_hits(1);
    remote_config.assert_hits(1);
    assert!(send.hits() >= 4);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.commands_handled, 2);
    assert_eq!(store.snapshot().max_retry, 5);
    let persisted: Value = serde_json::from_str(
        &std::fs::read_to_string(temp.path().join("config.json")).expect("read config"),
    )
    .expect("persisted json");
    assert_eq!(persisted["max_retry"], json!(5));
    assert_eq!(persisted["api_hash"], json!("hash"));
    let local_log =
        std::fs::read_to_string(temp.path().join("forward_relay_local.log")).expect("local log");
    assert!(local_log.contains("Relay started on host edge-1"));
    assert!(local_log.contains("Message ID: 10"));
    assert!(restarter.restarts.lock().expect("restarts lock").is_empty());
}

#[tokio::test]
async fn integration_upgrade_replaces_artifact_and_requests_restart() {
    let server = MockServer::start();
    let temp = tempdir().expect("tempdir");
    write_operational_config(temp.path(), &server);
    let artifact = temp.path().join("forward-relay");
    std::fs::write(&artifact, b"running relay build").expect("seed artifact");

    server.mock(|when, then| {
        when.method(POST)
            .path(bot_path("getUpdates"))
            .body_includes("\"offset\":0");
        then.status(200).json_body(json!({
            "ok": true,
            "result": [admin_command(1, 20, "/upgrade")]
        }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path(bot_path("getUpdates"))
            .body_includes("\"offset\":2");
        then.status(200)
            .delay(Duration::from_millis(200))
            .json_body(json!({"ok": true, "result": [admin_command(2, 21, "/stop")]}));
    });
    mock_idle_polls(&server, 3);
    server.mock(|when, then| {
        when.method(POST).path(bot_path("sendMessage"));
        then.status(200)
            .json_body(json!({"ok": true, "result": {"message_id": 600}}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/remote/forward-relay");
        then.status(200).body("#!/bin/sh\necho upgraded relay build\n");
    });

    let store = Arc::new(ConfigStore::open(ConfigPaths::new(temp.path())).expect("open store"));
    let config = RelayRuntimeConfig::new("edge-1", artifact.clone());
    let restarter = Arc::new(RecordingRestarter::default());

    tokio::time::timeout(
        Duration::from_secs(10),
        run_relay(
            store,
            services(&server, restarter.clone()),
            config,
            ShutdownSignal::new(),
        ),
    )
    .await
    .expect("relay should stop after /stop");

    assert_eq!(
        std::fs::read_to_string(&artifact).expect("artifact"),
        "#!/bin/sh\necho upgraded relay build\n"
    );
    assert_eq!(
        std::fs::read(temp.path().join("forward-relay.bak")).expect("backup"),
        b"running relay build"
    );
    assert_eq!(
        restarter.restarts.lock().expect("restarts lock").clone(),
        vec![artifact]
    );
}
