//! Webhook Endpoint Tests
//!
//! Drives the axum router over a real socket: the verification handshake,
//! signed deliveries, and the rejections that must leave the ledger untouched.

mod common;

use std::net::SocketAddr;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use pagebot::webhook::{self, signature, WebhookConfig, SIGNATURE_HEADER, WEBHOOK_PATH};

use common::{comment_delivery, Harness};

const SECRET: &str = "app-secret";
const TOKEN: &str = "verify-me";

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(harness: &Harness, app_secret: Option<&str>) -> Self {
        let config = WebhookConfig {
            verify_token: TOKEN.to_string(),
            app_secret: app_secret.map(str::to_string),
        };
        let app = webhook::router(harness.orchestrator.clone(), config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(webhook::serve(listener, app, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            stop: Some(stop),
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

async fn post_delivery(
    server: &TestServer,
    body: &str,
    signature: Option<String>,
) -> reqwest::Response {
    let client = reqwest::Client::new();
    let mut request = client
        .post(server.url(WEBHOOK_PATH))
        .header("content-type", "application/json")
        .body(body.to_string());
    if let Some(signature) = signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }
    request.send().await.unwrap()
}

fn signed(body: &str) -> String {
    signature::sign(body.as_bytes(), SECRET)
}

#[tokio::test]
async fn test_verification_echoes_challenge() {
    let harness = Harness::replying("hi");
    let server = TestServer::start(&harness, Some(SECRET)).await;

    let response = reqwest::get(server.url(&format!(
        "{WEBHOOK_PATH}?hub.mode=subscribe&hub.verify_token={TOKEN}&hub.challenge=12345"
    )))
    .await
    .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "12345");

    server.shutdown().await;
}

#[tokio::test]
async fn test_verification_rejects_wrong_token() {
    let harness = Harness::replying("hi");
    let server = TestServer::start(&harness, Some(SECRET)).await;

    let response = reqwest::get(server.url(&format!(
        "{WEBHOOK_PATH}?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345"
    )))
    .await
    .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = reqwest::get(server.url(&format!(
        "{WEBHOOK_PATH}?hub.mode=unsubscribe&hub.verify_token={TOKEN}&hub.challenge=1"
    )))
    .await
    .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    server.shutdown().await;
}

#[tokio::test]
async fn test_signed_delivery_is_processed() {
    let harness = Harness::replying("We open at 11.");
    let server = TestServer::start(&harness, Some(SECRET)).await;

    let body = comment_delivery("c-1", "U1", "When do you open?").to_string();
    let response = post_delivery(&server, &body, Some(signed(&body))).await;

    assert_eq!(response.status().as_u16(), 200);
    let reply: Value = response.json().await.unwrap();
    assert_eq!(reply, json!({ "status": "accepted" }));

    let record = harness.ledger.get("c-1").unwrap().unwrap();
    assert!(record.replied);
    assert_eq!(record.reply_text.as_deref(), Some("We open at 11."));
    assert_eq!(harness.dispatcher.calls(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_bad_signature_leaves_ledger_untouched() {
    let harness = Harness::replying("hi");
    let server = TestServer::start(&harness, Some(SECRET)).await;

    let body = comment_delivery("c-2", "U1", "hello").to_string();
    let forged = signature::sign(body.as_bytes(), "someone-else");

    let response = post_delivery(&server, &body, Some(forged)).await;
    assert_eq!(response.status().as_u16(), 403);
    let response = post_delivery(&server, &body, None).await;
    assert_eq!(response.status().as_u16(), 403);

    assert!(harness.ledger.recent(10).unwrap().is_empty());
    assert_eq!(harness.generator.calls(), 0);
    assert_eq!(harness.dispatcher.calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let harness = Harness::replying("hi");
    let server = TestServer::start(&harness, Some(SECRET)).await;

    let body = "{not json";
    let response = post_delivery(&server, body, Some(signed(body))).await;
    assert_eq!(response.status().as_u16(), 400);

    let body = r#"{"object":"page","entry":"nope"}"#;
    let response = post_delivery(&server, body, Some(signed(body))).await;
    assert_eq!(response.status().as_u16(), 400);

    assert!(harness.ledger.recent(10).unwrap().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_unsigned_delivery_accepted_without_secret() {
    let harness = Harness::replying("Hello!");
    let server = TestServer::start(&harness, None).await;

    let body = comment_delivery("c-3", "U1", "hey").to_string();
    let response = post_delivery(&server, &body, None).await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(harness.ledger.exists("c-3").unwrap());

    // Redelivery is acknowledged but never replied to twice
    let response = post_delivery(&server, &body, None).await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(harness.dispatcher.calls(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_item_still_acknowledged() {
    let harness = Harness::replying("Thanks!");
    let server = TestServer::start(&harness, Some(SECRET)).await;

    let mut payload = comment_delivery("c-4", "U1", "nice");
    payload["entry"][0]["changes"]
        .as_array_mut()
        .unwrap()
        .push(json!({
            "field": "feed",
            "value": { "item": "comment", "verb": "add", "message": 7 }
        }));
    let body = payload.to_string();

    let response = post_delivery(&server, &body, Some(signed(&body))).await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(harness.ledger.exists("c-4").unwrap());
    assert_eq!(harness.ledger.recent(10).unwrap().len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_health_reports_service() {
    let harness = Harness::replying("hi");
    let server = TestServer::start(&harness, None).await;

    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "pagebot");

    server.shutdown().await;
}
