//! Integration test: serve the gateway router on a free port backed by a scripted
//! client and exercise every route over HTTP.

mod support;

use gowa::client::PairingEvent;
use gowa::config::Config;
use gowa::gateway::{self, GatewayState};
use gowa::GatewaySession;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use support::{ScriptedClient, PAIRED_JID};

async fn spawn_gateway(client: Arc<ScriptedClient>) -> String {
    let session = Arc::new(GatewaySession::with_client(client, 100, Duration::from_secs(5)));
    let mut config = Config::default();
    config.session.qr_wait_secs = 5;
    let app = gateway::router(GatewayState::new(config, session));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

async fn get(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.expect("request");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("parse JSON"))
}

async fn post(url: &str, body: Option<Value>) -> (u16, Value) {
    let client = reqwest::Client::new();
    let req = client.post(url);
    let req = match body {
        Some(body) => req.json(&body),
        None => req,
    };
    let resp = req.send().await.expect("request");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("parse JSON"))
}

#[tokio::test]
async fn health_reports_service() {
    let base = spawn_gateway(Arc::new(ScriptedClient::default())).await;
    let (status, json) = get(&format!("{}/health", base)).await;
    assert_eq!(status, 200);
    assert_eq!(json, json!({ "status": "ok", "service": "gowa" }));
}

#[tokio::test]
async fn status_reflects_client_state() {
    let base = spawn_gateway(Arc::new(ScriptedClient::paired())).await;
    let (_, json) = get(&format!("{}/status", base)).await;
    assert_eq!(json, json!({ "connected": false, "jid": "" }));

    let base = spawn_gateway(Arc::new(ScriptedClient::online())).await;
    let (_, json) = get(&format!("{}/status", base)).await;
    assert_eq!(json, json!({ "connected": true, "jid": PAIRED_JID }));
}

#[tokio::test]
async fn qr_returns_first_code_as_png() {
    let client = Arc::new(ScriptedClient::fresh(vec![
        PairingEvent::Code("ABC123".to_string()),
        PairingEvent::Code("DEF456".to_string()),
    ]));
    let base = spawn_gateway(client).await;

    let (status, json) = get(&format!("{}/qr", base)).await;
    assert_eq!(status, 200);
    assert_eq!(json["qr_code"], "ABC123");
    let image = json["qr_image"].as_str().expect("qr_image string");
    assert!(image.starts_with("iVBORw0KGgo"), "expected base64 PNG");
}

#[tokio::test]
async fn qr_with_stored_identity_reports_connected() {
    let base = spawn_gateway(Arc::new(ScriptedClient::paired())).await;
    let (status, json) = get(&format!("{}/qr", base)).await;
    assert_eq!(status, 200);
    assert_eq!(json, json!({ "status": "connected" }));
}

#[tokio::test]
async fn qr_when_connected_is_rejected() {
    let base = spawn_gateway(Arc::new(ScriptedClient::online())).await;
    let (status, json) = get(&format!("{}/qr", base)).await;
    assert_eq!(status, 400);
    assert_eq!(json["error"], "Already connected");
}

#[tokio::test]
async fn qr_connect_failure_is_500() {
    let client = Arc::new(ScriptedClient::paired());
    client
        .fail_connect
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let base = spawn_gateway(client).await;
    let (status, json) = get(&format!("{}/qr", base)).await;
    assert_eq!(status, 500);
    assert!(json["error"].as_str().unwrap_or_default().starts_with("failed to connect"));
}

#[tokio::test]
async fn send_validates_then_dispatches() {
    let offline = spawn_gateway(Arc::new(ScriptedClient::paired())).await;
    let (status, json) = post(
        &format!("{}/send", offline),
        Some(json!({ "phone": "+1 555-0100", "message": "hi" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(json["error"], "Not connected");

    let client = Arc::new(ScriptedClient::online());
    let base = spawn_gateway(client.clone()).await;
    let url = format!("{}/send", base);

    let (status, json) = post(&url, Some(json!({ "phone": "15550100" }))).await;
    assert_eq!(status, 400);
    assert_eq!(json["error"], "Phone and message are required");

    let (status, json) = post(&url, None).await;
    assert_eq!(status, 400);
    assert_eq!(json["error"], "Invalid request body");

    let (status, json) = post(
        &url,
        Some(json!({ "phone": "+1 555-0100", "message": "hi" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json, json!({ "status": "sent", "message_id": "MSG-1" }));
    assert_eq!(client.sent.lock().unwrap()[0].0.user, "15550100");
}

#[tokio::test]
async fn send_failure_is_500() {
    let client = Arc::new(ScriptedClient::online());
    client
        .fail_send
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let base = spawn_gateway(client).await;
    let (status, json) = post(
        &format!("{}/send", base),
        Some(json!({ "phone": "0", "message": "hi" })),
    )
    .await;
    assert_eq!(status, 500);
    assert!(json["error"].as_str().unwrap_or_default().starts_with("failed to send message"));
}

#[tokio::test]
async fn handler_panic_is_500_and_server_keeps_serving() {
    let client = Arc::new(ScriptedClient::online());
    client
        .panic_on_send
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let base = spawn_gateway(client).await;
    let (status, json) = post(
        &format!("{}/send", base),
        Some(json!({ "phone": "15550100", "message": "hi" })),
    )
    .await;
    assert_eq!(status, 500);
    assert_eq!(json["error"], "Internal server error");

    let (status, _) = get(&format!("{}/health", base)).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn logout_requires_connection_then_succeeds() {
    let offline = spawn_gateway(Arc::new(ScriptedClient::paired())).await;
    let (status, json) = post(&format!("{}/logout", offline), None).await;
    assert_eq!(status, 400);
    assert_eq!(json["error"], "Not connected");

    let base = spawn_gateway(Arc::new(ScriptedClient::online())).await;
    let (status, json) = post(&format!("{}/logout", base), None).await;
    assert_eq!(status, 200);
    assert_eq!(json, json!({ "status": "logged out" }));

    let (_, json) = get(&format!("{}/status", base)).await;
    assert_eq!(json, json!({ "connected": false, "jid": "" }));
}
