//! Client façade against a real in-process socket server and a mock HTTP
//! fallback.

#[path = "../../schemalink-websocket/tests/common/mod.rs"]
mod common;

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::TestServer;
use schemalink_client::{
    ClientConfig, ConnectionEvent, EventKind, ReconnectConfig, SchemaLinkClient, SelectorConfig,
    TransportError, TransportMode, TransportType, WebSocketConfig,
};
use schemalink_transport_traits::Frame;

fn websocket(url: impl Into<String>) -> WebSocketConfig {
    WebSocketConfig::client(url)
        .with_role("planner")
        .with_connect_timeout(Duration::from_secs(1))
        .with_request_timeout(Duration::from_secs(2))
        .with_reconnect_config(ReconnectConfig::disabled())
}

fn primary_only(server: &TestServer) -> ClientConfig {
    ClientConfig::new(server.url(), "http://127.0.0.1:1")
        .with_mode(TransportMode::PrimaryOnly)
        .with_websocket(websocket(server.url()))
}

/// A local address nothing listens on
fn dead_ws_url() -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

async fn request_methods(server: &TestServer) -> Vec<String> {
    // Requests are recorded before they are answered
    server
        .drain_frames()
        .await
        .into_iter()
        .filter_map(|frame| match frame {
            Frame::Request { method, .. } => Some(method),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_schema_change_evicts_cached_schema() {
    let server = TestServer::start().await;
    let schema_events = Arc::new(AtomicUsize::new(0));
    let client = SchemaLinkClient::builder(primary_only(&server))
        .on(EventKind::SchemaChanged, {
            let schema_events = schema_events.clone();
            move |_| {
                schema_events.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let databases = client.discover_databases().await.unwrap();
    assert_eq!(databases["method"], json!("discover_databases"));

    let schema = client.get_table_schema("fin", "accounts").await.unwrap();
    assert_eq!(
        schema["params"],
        json!({"database": "fin", "table": "accounts"})
    );
    client.get_table_schema("hr", "staff").await.unwrap();

    // Served from cache
    assert_eq!(client.get_table_schema("fin", "accounts").await.unwrap(), schema);
    assert_eq!(
        request_methods(&server).await,
        vec!["discover_databases", "get_table_schema", "get_table_schema"]
    );
    assert_eq!(client.cache_stats().hits, 1);

    let mut events = client.subscribe_server_events();
    server.push(&Frame::event("schema_changed", json!({"database": "fin"})));
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, EventKind::SchemaChanged);
    assert_eq!(schema_events.load(Ordering::SeqCst), 1);
    assert_eq!(client.cache_stats().invalidations, 1);

    // Evicted: the next read goes back to the server
    assert_eq!(client.get_table_schema("fin", "accounts").await.unwrap(), schema);
    // Unrelated database untouched
    client.get_table_schema("hr", "staff").await.unwrap();
    client.discover_databases().await.unwrap();

    assert_eq!(request_methods(&server).await, vec!["get_table_schema"]);
    let stats = client.cache_stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.current_entries, 3);
}

#[tokio::test]
async fn test_table_event_spares_other_tables() {
    let server = TestServer::start().await;
    let client = SchemaLinkClient::new(primary_only(&server)).unwrap();
    client.connect().await.unwrap();

    client.get_table_schema("fin", "accounts").await.unwrap();
    client.get_table_schema("fin", "ledger").await.unwrap();
    request_methods(&server).await;

    let mut events = client.subscribe_server_events();
    server.push(&Frame::event(
        "cache_invalidate",
        json!({"database_name": "fin", "table_name": "ledger"}),
    ));
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    client.get_table_schema("fin", "accounts").await.unwrap();
    client.get_table_schema("fin", "ledger").await.unwrap();
    assert_eq!(request_methods(&server).await, vec!["get_table_schema"]);
}

#[tokio::test]
async fn test_schema_change_evicts_positional_call() {
    let server = TestServer::start().await;
    let client = SchemaLinkClient::new(primary_only(&server)).unwrap();
    client.connect().await.unwrap();

    let params = json!(["fin", "accounts"]);
    client.call("get_table_schema", params.clone()).await.unwrap();
    client.call("get_table_schema", params.clone()).await.unwrap();
    assert_eq!(request_methods(&server).await, vec!["get_table_schema"]);

    let mut events = client.subscribe_server_events();
    server.push(&Frame::event("schema_changed", json!({"database": "fin"})));
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.cache_stats().invalidations, 1);

    client.call("get_table_schema", params).await.unwrap();
    assert_eq!(request_methods(&server).await, vec!["get_table_schema"]);
}

#[tokio::test]
async fn test_concurrent_identical_calls_share_one_request() {
    let server = TestServer::start().await;
    let client = SchemaLinkClient::new(primary_only(&server)).unwrap();
    client.connect().await.unwrap();
    request_methods(&server).await;

    let params = json!({"delay_ms": 200, "database": "fin"});
    let (a, b) = tokio::join!(
        client.call("slow", params.clone()),
        client.call("slow", params.clone())
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(request_methods(&server).await, vec!["slow"]);
    assert_eq!(client.dedup_stats().deduplicated, 1);
}

#[tokio::test]
async fn test_remote_error_is_not_cached() {
    let server = TestServer::start().await;
    let client = SchemaLinkClient::new(primary_only(&server)).unwrap();
    client.connect().await.unwrap();
    request_methods(&server).await;

    for _ in 0..2 {
        let err = client.call("explode", json!({})).await.unwrap_err();
        assert_eq!(err, TransportError::remote("boom", "ValueError"));
    }
    assert_eq!(request_methods(&server).await, vec!["explode", "explode"]);
    assert_eq!(client.selector_stats().primary_failures, 0);
}

#[tokio::test]
async fn test_execution_results_are_not_cached() {
    let server = TestServer::start().await;
    let client = SchemaLinkClient::new(primary_only(&server)).unwrap();
    client.connect().await.unwrap();
    request_methods(&server).await;

    client.execute_query("fin", "SELECT 1").await.unwrap();
    client.execute_query("fin", "SELECT 1").await.unwrap();
    assert_eq!(
        request_methods(&server).await,
        vec!["execute_query", "execute_query"]
    );
    assert_eq!(client.cache_stats().current_entries, 0);
}

async fn fallback_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tools/get_table_schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"via": "http"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_unreachable_primary_fails_over() {
    let http = fallback_server().await;
    let ws_url = dead_ws_url();
    let config = ClientConfig::new(ws_url.clone(), http.uri())
        .with_websocket(websocket(ws_url))
        .with_selector(SelectorConfig::new(2, Duration::from_secs(60)));
    let client = SchemaLinkClient::new(config).unwrap();

    // Hybrid mode tolerates a primary that cannot connect
    client.connect().await.unwrap();

    for table in ["a", "b", "c"] {
        let value: Value = client.get_table_schema("fin", table).await.unwrap();
        assert_eq!(value, json!({"via": "http"}));
    }

    let stats = client.selector_stats();
    // Third call skipped the primary entirely
    assert_eq!(stats.primary_calls, 2);
    assert_eq!(stats.switches, 2);
    assert_eq!(stats.fallback_calls, 3);
    assert!(stats.fallback_active);

    let health = client.health().await;
    assert_eq!(health.primary, Some(false));
    assert_eq!(health.fallback, Some(true));
    assert_eq!(health.active, TransportType::Http);
    assert!(health.is_serviceable());
}

#[tokio::test]
async fn test_primary_only_connect_failure_is_returned() {
    let ws_url = dead_ws_url();
    let config = ClientConfig::new(ws_url.clone(), "http://127.0.0.1:1")
        .with_mode(TransportMode::PrimaryOnly)
        .with_websocket(websocket(ws_url));
    let client = SchemaLinkClient::new(config).unwrap();

    assert!(client.connect().await.is_err());
    assert!(matches!(
        client.discover_databases().await.unwrap_err(),
        TransportError::NotConnected(_) | TransportError::CircuitOpen { .. }
    ));
}

#[tokio::test]
async fn test_reconnect_exhaustion_forces_fallback() {
    let http = fallback_server().await;
    let server = TestServer::start().await;
    let config = ClientConfig::new(server.url(), http.uri()).with_websocket(
        websocket(server.url()).with_reconnect_config(
            ReconnectConfig::bounded(1)
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(100)),
        ),
    );
    let client = SchemaLinkClient::new(config).unwrap();
    let mut events = client.subscribe_connection_events();
    client.connect().await.unwrap();

    let schema = client.get_table_schema("fin", "accounts").await.unwrap();
    assert_eq!(schema["method"], json!("get_table_schema"));

    // Server goes away for good
    drop(server);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ConnectionEvent::ReconnectExhausted { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .unwrap();

    let primary_calls = client.selector_stats().primary_calls;
    let value = client.get_table_schema("fin", "ledger").await.unwrap();
    assert_eq!(value, json!({"via": "http"}));

    let stats = client.selector_stats();
    assert!(stats.forced_fallback);
    assert_eq!(stats.primary_calls, primary_calls);
    assert_eq!(client.health().await.active, TransportType::Http);
}
