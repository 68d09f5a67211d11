//! Integration tests for the sysdeck gateway

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sysdeck::activity::ActivityLog;
use sysdeck::collector::{Reading, Sample};
use sysdeck::config::{PortConfig, Settings, SettingsStore};
use sysdeck::core::{
    Clock, HistoryStore, LiveBroadcaster, ManualClock, RetentionPolicy, SubscriberKind,
};
use sysdeck::gateway::{EndpointKind, GatewayConfig, GatewayState, Services, TransportGateway};
use sysdeck::GatewayError;
use tempfile::TempDir;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message};

#[cfg(feature = "client")]
use sysdeck::{
    client::{GatewayClient, PushClient, ReconnectPolicy},
    error::ClientError,
    PushEvent,
};

const TOKEN: &str = "test-token";
const T0: i64 = 1_700_000_000_000;

type PushStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Harness {
    gateway: Arc<TransportGateway>,
    store: Arc<HistoryStore>,
    broadcaster: Arc<LiveBroadcaster>,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl Harness {
    async fn new(ports: PortConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(T0);
        let store = Arc::new(HistoryStore::new(
            dir.path().join("history.db"),
            RetentionPolicy::default(),
            clock.clone(),
        ));
        store.init().await.unwrap();

        let broadcaster = Arc::new(LiveBroadcaster::default());
        let services = Services {
            store: store.clone(),
            broadcaster: broadcaster.clone(),
            settings: Arc::new(SettingsStore::load(dir.path().join("settings.json"))),
            activity: Arc::new(ActivityLog::new()),
        };
        let gateway = TransportGateway::new(GatewayConfig::new(ports, TOKEN), services);

        Self {
            gateway,
            store,
            broadcaster,
            clock,
            _dir: dir,
        }
    }

    async fn started() -> Self {
        let harness = Self::new(PortConfig::ephemeral()).await;
        harness.gateway.enable().await.expect("Failed to enable gateway");
        harness
    }

    async fn addr(&self, kind: EndpointKind) -> SocketAddr {
        self.gateway
            .status()
            .await
            .addr(kind)
            .expect("endpoint not listening")
    }

    async fn api(&self, path: &str) -> String {
        format!("http://{}{}", self.addr(EndpointKind::Api).await, path)
    }

    /// Store samples spaced past the fresh-tier interval.
    async fn seed(&self, count: usize) -> Vec<Sample> {
        let mut stored = Vec::new();
        for i in 0..count {
            let sample = Sample::new(
                self.clock.now_millis(),
                Reading {
                    cpu: 10.0 + i as f64,
                    ram: 50.0,
                    disk: 70.0,
                    network_throughput: 2.0,
                    battery_percent: None,
                    temperature: None,
                },
            );
            if let sysdeck::Admission::Stored(s) = self.store.record_sample(&sample).await.unwrap() {
                stored.push(s);
            }
            self.clock.advance(Duration::from_secs(10));
        }
        stored
    }

    async fn wait_for_remote(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.broadcaster.count(SubscriberKind::Remote) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber count never reached");
    }

    async fn wait_for_state(&self, state: GatewayState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.gateway.state().await != state {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("gateway never reached the expected state");
    }
}

/// A port that was free a moment ago.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn connect_push(addr: SocketAddr, token: Option<&str>) -> Result<PushStream, tungstenite::Error> {
    let mut request = format!("ws://{addr}/").into_client_request()?;
    if let Some(token) = token {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_str(token).unwrap());
    }
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(stream, _)| stream)
}

async fn next_json(stream: &mut PushStream) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("stream error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// True once the stream closes or errors.
async fn closes(stream: &mut PushStream) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false)
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::started().await;

    let response = reqwest::get(harness.api("/health").await)
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());
    assert!(body["hostname"].as_str().is_some());

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_settings_require_token() {
    let harness = Harness::started().await;
    let client = reqwest::Client::new();
    let url = harness.api("/api/get-settings").await;

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let response = client
        .get(&url)
        .header("X-Api-Token", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let response = client
        .get(&url)
        .header("X-Api-Token", TOKEN)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let settings: Settings = serde_json::from_value(body["data"].clone()).unwrap();
    assert_eq!(settings, Settings::default());

    let response = client
        .get(&url)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_history_range_and_extent() {
    let harness = Harness::started().await;
    let stored = harness.seed(4).await;
    assert_eq!(stored.len(), 4);
    let client = reqwest::Client::new();

    let body: Value = client
        .get(harness.api("/api/history").await)
        .query(&[
            ("startTime", stored[1].timestamp.to_string()),
            ("endTime", stored[2].timestamp.to_string()),
        ])
        .header("X-Api-Token", TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["timestamp"], stored[1].timestamp);
    assert_eq!(records[1]["cpu"], stored[2].cpu);
    assert!(records[0]["time"].as_str().unwrap().ends_with('Z'));
    assert!(records[0]["battery"].is_null());

    let body: Value = client
        .get(harness.api("/api/history/range").await)
        .header("X-Api-Token", TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["count"], 4);
    assert_eq!(body["data"]["oldest"], stored[0].timestamp);
    assert_eq!(body["data"]["newest"], stored[3].timestamp);

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_malformed_history_query_uses_defaults() {
    let harness = Harness::started().await;
    let stored = harness.seed(3).await;

    // Default window is the last hour before now, which covers every seed.
    let response = reqwest::Client::new()
        .get(harness.api("/api/history?startTime=yesterday&endTime=").await)
        .header("X-Api-Token", TOKEN)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), stored.len());

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_unreadable_history_query_uses_defaults() {
    let harness = Harness::started().await;
    let stored = harness.seed(3).await;
    let client = reqwest::Client::new();

    for query in ["startTime=1&startTime=2", "bucketMs=5&bucketMs=6"] {
        let response = client
            .get(harness.api(&format!("/api/history?{query}")).await)
            .header("X-Api-Token", TOKEN)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success(), "{query}: {}", response.status());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"].as_array().unwrap().len(), stored.len());
    }

    // The smallest representable end time still yields an envelope.
    let response = client
        .get(harness.api("/api/history?endTime=-9223372036854775808").await)
        .header("X-Api-Token", TOKEN)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["data"].as_array().unwrap().is_empty());

    let response = client
        .get(harness.api("/api/history/summary?endTime=-9223372036854775808").await)
        .header("X-Api-Token", TOKEN)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_unauthenticated_requests_do_not_mutate() {
    let harness = Harness::started().await;
    let mut local = harness.broadcaster.subscribe(SubscriberKind::Local);
    let client = reqwest::Client::new();

    for token in [None, Some("wrong")] {
        let requests = [
            ("/api/update-settings", json!({"theme": "dark"})),
            ("/api/toggle-web-access", json!({"enabled": false})),
            ("/api/toggle-auto-start", json!({"enabled": true})),
        ];
        for (path, body) in requests {
            let mut request = client.post(harness.api(path).await).json(&body);
            if let Some(token) = token {
                request = request.header("X-Api-Token", token);
            }
            let response = request.send().await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED, "{path}");
        }
    }

    // Give a wrongly spawned teardown time to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.gateway.state().await, GatewayState::Listening);
    assert_eq!(harness.gateway.services().settings.get(), Settings::default());
    assert!(local.try_recv().is_none());

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_push_accepts_header_token() {
    let harness = Harness::started().await;
    harness
        .broadcaster
        .publish_stats(Sample::new(T0, Reading::default()));

    let addr = harness.addr(EndpointKind::Push).await;
    let mut request = format!("ws://{addr}/").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("X-Api-Token", HeaderValue::from_static(TOKEN));
    let (mut stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("header token refused");

    let initial = next_json(&mut stream).await;
    assert_eq!(initial["data"]["timestamp"], T0);
    harness.wait_for_remote(1).await;

    let mut request = format!("ws://{addr}/").into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {TOKEN}")).unwrap(),
    );
    assert!(tokio_tungstenite::connect_async(request).await.is_ok());

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_push_rejects_missing_token() {
    let harness = Harness::started().await;
    let addr = harness.addr(EndpointKind::Push).await;

    match connect_push(addr, None).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connection without token was accepted"),
    }
    match connect_push(addr, Some("not-the-token")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 401),
        _ => panic!("connection with wrong token was accepted"),
    }
    assert_eq!(harness.broadcaster.len(), 0);

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_push_sends_snapshot_then_updates() {
    let harness = Harness::started().await;
    let first = Sample::new(T0, Reading::default());
    harness.broadcaster.publish_stats(first);

    let mut stream = connect_push(harness.addr(EndpointKind::Push).await, Some(TOKEN))
        .await
        .expect("authorized connection refused");

    let initial = next_json(&mut stream).await;
    assert_eq!(initial["type"], "detailed-stats-update");
    assert_eq!(initial["data"]["timestamp"], T0);

    harness.wait_for_remote(1).await;
    harness
        .broadcaster
        .publish_stats(Sample::new(T0 + 1_000, Reading::default()));
    let update = next_json(&mut stream).await;
    assert_eq!(update["data"]["timestamp"], T0 + 1_000);

    stream
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let pong = next_json(&mut stream).await;
    assert_eq!(pong["type"], "pong");

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_update_settings_is_pushed() {
    let harness = Harness::started().await;
    let mut stream = connect_push(harness.addr(EndpointKind::Push).await, Some(TOKEN))
        .await
        .unwrap();
    harness.wait_for_remote(1).await;

    let response = reqwest::Client::new()
        .post(harness.api("/api/update-settings").await)
        .header("X-Api-Token", TOKEN)
        .json(&json!({"theme": "dark", "worldClocks": ["Europe/Berlin"]}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["theme"], "dark");

    let theme = next_json(&mut stream).await;
    assert_eq!(theme["type"], "theme-changed");
    assert_eq!(theme["data"]["theme"], "dark");
    let settings = next_json(&mut stream).await;
    assert_eq!(settings["type"], "settings-updated");
    assert_eq!(settings["data"]["worldClocks"], json!(["Europe/Berlin"]));

    let response = reqwest::Client::new()
        .post(harness.api("/api/update-settings").await)
        .header("X-Api-Token", TOKEN)
        .json(&json!({"worldClocks": ["Nowhere/Special"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_disable_closes_all_subscribers() {
    let harness = Harness::started().await;
    let push = harness.addr(EndpointKind::Push).await;
    let api = harness.addr(EndpointKind::Api).await;

    let mut a = connect_push(push, Some(TOKEN)).await.unwrap();
    let mut b = connect_push(push, Some(TOKEN)).await.unwrap();
    harness.wait_for_remote(2).await;

    assert!(harness.gateway.disable().await);
    assert_eq!(harness.gateway.state().await, GatewayState::Disabled);
    assert_eq!(harness.broadcaster.count(SubscriberKind::Remote), 0);
    assert!(closes(&mut a).await);
    assert!(closes(&mut b).await);

    // Publishing with no remote subscribers is a no-op.
    let report = harness
        .broadcaster
        .publish_stats(Sample::new(T0, Reading::default()));
    assert_eq!(report.delivered, 0);

    assert!(tokio::net::TcpStream::connect(api).await.is_err());
    assert!(!harness.gateway.disable().await);
}

#[tokio::test]
async fn test_toggle_web_access_off_through_api() {
    let harness = Harness::started().await;

    let response = reqwest::Client::new()
        .post(harness.api("/api/toggle-web-access").await)
        .header("X-Api-Token", TOKEN)
        .json(&json!({"enabled": false}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.gateway.state().await != GatewayState::Disabled {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("gateway never disabled");
    assert!(!harness.gateway.services().settings.get().web_access_enabled);
}

#[tokio::test]
async fn test_toggle_auto_start() {
    let harness = Harness::started().await;

    let response = reqwest::Client::new()
        .post(harness.api("/api/toggle-auto-start").await)
        .header("X-Api-Token", TOKEN)
        .json(&json!({"enabled": true}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert!(harness.gateway.services().settings.get().auto_start);

    let response = reqwest::Client::new()
        .post(harness.api("/api/toggle-auto-start").await)
        .header("X-Api-Token", TOKEN)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_enable_is_idempotent() {
    let harness = Harness::started().await;
    let before = harness.addr(EndpointKind::Api).await;

    let status = harness.gateway.enable().await.unwrap();
    assert_eq!(status.state, GatewayState::Listening);
    assert_eq!(status.addr(EndpointKind::Api), Some(before));

    harness.gateway.disable().await;
    let status = harness.gateway.enable().await.unwrap();
    assert_eq!(status.state, GatewayState::Listening);
    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_port_in_use_leaves_other_endpoints_up() {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = blocker.local_addr().unwrap().port();

    let harness = Harness::new(PortConfig {
        push_port: taken,
        ..PortConfig::ephemeral()
    })
    .await;
    let status = harness.gateway.enable().await.unwrap();

    assert_eq!(status.state, GatewayState::Listening);
    assert!(status.addr(EndpointKind::Push).is_none());
    assert!(status.addr(EndpointKind::Api).is_some());
    assert!(status.addr(EndpointKind::Static).is_some());
    let push = status
        .endpoints
        .iter()
        .find(|e| e.kind == EndpointKind::Push)
        .unwrap();
    assert!(push.error.as_deref().unwrap().contains("already in use"));

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_no_endpoints_returns_to_disabled() {
    let blockers = [
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap(),
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap(),
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap(),
    ];
    let port = |i: usize| blockers[i].local_addr().unwrap().port();

    let harness = Harness::new(PortConfig {
        host: "127.0.0.1".to_string(),
        static_port: port(0),
        push_port: port(1),
        api_port: port(2),
    })
    .await;

    let err = harness.gateway.enable().await.unwrap_err();
    assert!(matches!(err, GatewayError::NoEndpoints));
    assert_eq!(harness.gateway.state().await, GatewayState::Disabled);
}

#[tokio::test]
async fn test_static_endpoint_serves_without_token() {
    let harness = Harness::started().await;
    let url = format!("http://{}/", harness.addr(EndpointKind::Static).await);

    let response = reqwest::get(url).await.unwrap();
    assert!(response.status().is_success());
    assert!(response.text().await.unwrap().contains("sysdeck"));

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_cors_headers() {
    let harness = Harness::started().await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            harness.api("/api/get-settings").await,
        )
        .header("Origin", "http://localhost:47800")
        .header("Access-Control-Request-Method", "GET")
        .header("Access-Control-Request-Headers", "x-api-token")
        .send()
        .await
        .expect("Failed to send request");

    assert!(
        response.status().is_success(),
        "Preflight failed: {}",
        response.status()
    );
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));

    harness.gateway.disable().await;
}

#[tokio::test]
async fn test_set_web_access_drives_gateway() {
    let harness = Harness::new(PortConfig::ephemeral()).await;
    let mut local = harness.broadcaster.subscribe(SubscriberKind::Local);

    let settings = harness.gateway.set_web_access(true).await.unwrap();
    assert!(settings.web_access_enabled);
    assert_eq!(harness.gateway.state().await, GatewayState::Listening);
    let frame = local.try_recv().expect("settings were not announced");
    assert!(frame.contains("settings-updated"));

    let settings = harness.gateway.set_web_access(false).await.unwrap();
    assert!(!settings.web_access_enabled);
    harness.wait_for_state(GatewayState::Disabled).await;
    assert!(!harness.gateway.services().settings.get().web_access_enabled);
}

#[tokio::test]
async fn test_toggle_web_access_on_keeps_listening() {
    let harness = Harness::started().await;

    let response = reqwest::Client::new()
        .post(harness.api("/api/toggle-web-access").await)
        .header("X-Api-Token", TOKEN)
        .json(&json!({"enabled": true}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["enabled"], true);
    assert_eq!(harness.gateway.state().await, GatewayState::Listening);
    assert!(harness.gateway.services().settings.get().web_access_enabled);

    harness.gateway.disable().await;
}

#[cfg(feature = "client")]
#[tokio::test]
async fn test_gateway_client_calls_api() {
    let harness = Harness::started().await;
    let stored = harness.seed(2).await;
    let base = harness.api("").await;

    let client = GatewayClient::new(base.as_str(), TOKEN).unwrap();
    let health = client.health().await.unwrap();
    assert_eq!(health.status, "ok");

    let extent = client.history_extent().await.unwrap();
    assert_eq!(extent.count, 2);
    assert_eq!(extent.newest, Some(stored[1].timestamp));

    let records = client
        .history(Some(stored[0].timestamp), Some(stored[1].timestamp), None)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    assert_eq!(client.get_settings().await.unwrap(), Settings::default());
    let updated = client
        .update_settings(&json!({"showTemperature": false}))
        .await
        .unwrap();
    assert!(!updated.show_temperature);

    let intruder = GatewayClient::new(base.as_str(), "nope").unwrap();
    assert!(matches!(
        intruder.get_settings().await,
        Err(ClientError::Unauthorized)
    ));

    harness.gateway.disable().await;
}

#[cfg(feature = "client")]
async fn expect_stats(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PushEvent>, timestamp: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if matches!(event, PushEvent::DetailedStatsUpdate(s) if s.timestamp == timestamp) {
                return;
            }
        }
        panic!("push client stopped");
    })
    .await
    .expect("stats update never arrived");
}

#[cfg(feature = "client")]
#[tokio::test]
async fn test_push_client_reconnects_after_restart() {
    let push_port = free_port().await;
    let harness = Harness::new(PortConfig {
        push_port,
        ..PortConfig::ephemeral()
    })
    .await;
    harness.gateway.enable().await.unwrap();

    let client = PushClient::new(
        format!("ws://127.0.0.1:{push_port}/"),
        TOKEN,
        ReconnectPolicy {
            max_attempts: Some(100),
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
        },
    );
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let follower = tokio::spawn(async move {
        client
            .run(move |event| {
                let _ = tx.send(event);
            })
            .await
    });

    harness.wait_for_remote(1).await;
    harness
        .broadcaster
        .publish_stats(Sample::new(T0, Reading::default()));
    expect_stats(&mut rx, T0).await;

    assert!(harness.gateway.disable().await);
    harness.gateway.enable().await.unwrap();
    harness.wait_for_remote(1).await;

    harness
        .broadcaster
        .publish_stats(Sample::new(T0 + 5_000, Reading::default()));
    expect_stats(&mut rx, T0 + 5_000).await;

    follower.abort();
    harness.gateway.disable().await;
}
