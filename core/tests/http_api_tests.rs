/// HTTP API integration tests
/// Each test serves the API on an ephemeral port and talks raw HTTP/1.1
mod common;

use async_trait::async_trait;
use common::team;
use goalleader_core::ai::{AiError, PromptRequest, PromptService, ASSISTANT_FALLBACK};
use goalleader_core::http_api::{serve, AppState};
use goalleader_core::store::{DocumentStore, MemoryStore, PRESENCE};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Echoes the prompt, or fails when built with `None`
struct StubPrompt(Option<&'static str>);

#[async_trait]
impl PromptService for StubPrompt {
    async fn generate(&self, request: PromptRequest) -> Result<String, AiError> {
        match self.0 {
            Some(reply) if request.json_output => Ok(reply.to_string()),
            Some(_) => Ok(format!("You said: {}", request.prompt)),
            None => Err(AiError::EmptyResponse),
        }
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}

const MARKETING_JSON: &str = r#"{"blogTitle":"Goals that stick","blogOutline":"1. Why\n2. How","socialMediaPost":"Set goals that stick!","emailSubject":"Your goals, sorted"}"#;

async fn start(prompt: StubPrompt) -> SocketAddr {
    start_on(MemoryStore::new(), prompt).await
}

async fn start_on(store: MemoryStore, prompt: StubPrompt) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(Arc::new(store), team(), Arc::new(prompt), "test");
    tokio::spawn(serve(listener, state));
    addr
}

async fn request(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> (u16, String, Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = body.unwrap_or("");
    let req = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        addr,
        body.len(),
        body
    );
    stream.write_all(req.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    let json = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, head.to_string(), json)
}

#[tokio::test]
async fn test_chat_rejects_non_string_message() {
    let addr = start(StubPrompt(Some("ok"))).await;

    let (status, _, body) = request(addr, "POST", "/api/chat", Some(r#"{"message":123}"#)).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Message must be a string" }));

    let (status, _, body) = request(addr, "POST", "/api/chat", Some(r#"{}"#)).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Message must be a string" }));

    let (status, _, body) = request(addr, "POST", "/api/chat", Some("{not json")).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({ "error": "Invalid JSON body" }));
}

#[tokio::test]
async fn test_chat_answers_and_falls_back() {
    let addr = start(StubPrompt(Some("ok"))).await;
    let (status, _, body) = request(addr, "POST", "/api/chat", Some(r#"{"message":"plan my week"}"#)).await;
    assert_eq!(status, 200);
    assert_eq!(body["output"], "You said: plan my week");

    let addr = start(StubPrompt(None)).await;
    let (status, _, body) = request(addr, "POST", "/api/chat", Some(r#"{"message":"hi"}"#)).await;
    assert_eq!(status, 200);
    assert_eq!(body["output"], ASSISTANT_FALLBACK);

    let (_, _, diag) = request(addr, "GET", "/api/chat", None).await;
    assert_eq!(diag["usage"][0]["flow"], "chat");
    assert_eq!(diag["usage"][0]["fallbacks"], 1);
}

#[tokio::test]
async fn test_chat_diagnostics() {
    let addr = start(StubPrompt(Some("ok"))).await;
    let (status, head, body) = request(addr, "GET", "/api/chat", None).await;
    assert_eq!(status, 200);
    assert!(head.to_ascii_lowercase().contains("access-control-allow-origin: *"));
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["connectivity"]["promptService"], "configured");
    assert_eq!(body["connectivity"]["store"], "ok");
    assert_eq!(body["flags"]["aiConfigured"], true);
    assert_eq!(body["flags"]["model"], "stub-model");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_options_preflight() {
    let addr = start(StubPrompt(Some("ok"))).await;
    let (status, head, _) = request(addr, "OPTIONS", "/api/chat", None).await;
    assert_eq!(status, 204);
    assert!(head
        .to_ascii_lowercase()
        .contains("access-control-allow-methods"));
}

#[tokio::test]
async fn test_message_endpoints() {
    let addr = start(StubPrompt(Some("ok"))).await;

    let (status, _, body) = request(
        addr,
        "POST",
        "/api/messages",
        Some(r#"{"from":"bob","to":"alice","content":"hello"}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"]["type"], "text");
    assert_eq!(body["message"]["recipientId"], "alice");
    assert!(body["message"].get("readStatus").is_none());
    let id = body["message"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = request(addr, "GET", "/api/conversations/bob?user=alice", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);

    let (_, _, body) = request(addr, "GET", "/api/contacts?user=alice", None).await;
    let contacts = body["contacts"].as_array().unwrap();
    assert_eq!(contacts.len(), 2);
    let bob = contacts.iter().find(|c| c["id"] == "bob").unwrap();
    assert_eq!(bob["lastMessage"], "hello");
    assert_eq!(bob["unreadCount"], 1);

    // Outsiders cannot touch the message
    let path = format!("/api/messages/{}?user=carol", id);
    let (status, _, body) = request(addr, "DELETE", &path, None).await;
    assert_eq!(status, 403);
    assert_eq!(body["context"]["path"], format!("messages/{}", id));

    let path = format!("/api/messages/{}?user=alice", id);
    let (status, _, _) = request(addr, "DELETE", &path, None).await;
    assert_eq!(status, 200);
    let (_, _, body) = request(addr, "GET", "/api/conversations/bob?user=alice", None).await;
    assert!(body["messages"].as_array().unwrap().is_empty());
    let (_, _, body) = request(addr, "GET", "/api/conversations/alice?user=bob", None).await;
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_message_validation() {
    let addr = start(StubPrompt(Some("ok"))).await;

    let (status, _, _) = request(
        addr,
        "POST",
        "/api/messages",
        Some(r#"{"from":"bob","to":"bob","content":"me"}"#),
    )
    .await;
    assert_eq!(status, 400);

    let (status, _, _) = request(
        addr,
        "POST",
        "/api/messages",
        Some(r#"{"from":"bob","to":"alice","content":"   "}"#),
    )
    .await;
    assert_eq!(status, 400);

    // The sender must be a team member too
    let (status, _, body) = request(
        addr,
        "POST",
        "/api/messages",
        Some(r#"{"from":"mallory","to":"alice","content":"hi"}"#),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "unknown user");
    let (_, _, body) = request(addr, "GET", "/api/conversations/mallory?user=alice", None).await;
    assert!(body["messages"].as_array().unwrap().is_empty());

    let (status, _, _) = request(addr, "GET", "/api/contacts", None).await;
    assert_eq!(status, 400);
    let (status, _, _) = request(addr, "GET", "/api/contacts?user=mallory", None).await;
    assert_eq!(status, 404);
    let (status, _, _) = request(addr, "GET", "/api/nothing", None).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_marketing_and_review() {
    let addr = start(StubPrompt(Some(MARKETING_JSON))).await;

    let (status, _, body) = request(addr, "POST", "/api/marketing", Some(r#"{"topic":"goal setting"}"#)).await;
    assert_eq!(status, 200);
    assert_eq!(body["blogTitle"], "Goals that stick");

    let (_, _, body) = request(addr, "GET", "/api/suggestions", None).await;
    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["status"], "pending");
    let id = suggestions[0]["id"].as_str().unwrap().to_string();

    let path = format!("/api/suggestions/{}/review", id);
    let review = r#"{"reviewer":"patrick","approve":true}"#;
    let (status, _, body) = request(addr, "POST", &path, Some(review)).await;
    assert_eq!(status, 200);
    assert_eq!(body["suggestion"]["status"], "approved");
    assert_eq!(body["suggestion"]["reviewedBy"], "patrick");

    let (status, _, _) = request(addr, "POST", &path, Some(review)).await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_marketing_fallback_is_not_stored() {
    let addr = start(StubPrompt(None)).await;
    let (status, _, body) = request(addr, "POST", "/api/marketing", Some(r#"{"topic":"x"}"#)).await;
    assert_eq!(status, 200);
    assert_eq!(body["blogTitle"], "Content generation unavailable");

    let (_, _, body) = request(addr, "GET", "/api/suggestions", None).await;
    assert!(body["suggestions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_events_stream_new_messages() {
    let addr = start(StubPrompt(Some("ok"))).await;

    let mut sse = TcpStream::connect(addr).await.unwrap();
    sse.write_all(format!("GET /events HTTP/1.1\r\nHost: {}\r\n\r\n", addr).as_bytes())
        .await
        .unwrap();

    let mut seen = String::new();
    let mut buf = [0u8; 4096];

    // Wait for the stream to open before producing an event
    while !seen.contains(": connected") {
        let n = tokio::time::timeout(Duration::from_secs(5), sse.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }

    request(
        addr,
        "POST",
        "/api/messages",
        Some(r#"{"from":"alice","to":"carol","content":"standup?"}"#),
    )
    .await;

    while !seen.contains("standup?") {
        let n = tokio::time::timeout(Duration::from_secs(5), sse.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(seen.contains("\"type\":\"new_message\""));
    assert!(seen.to_ascii_lowercase().contains("content-type: text/event-stream"));
}

#[tokio::test]
async fn test_concurrent_reviews_decide_once() {
    let addr = start(StubPrompt(Some(MARKETING_JSON))).await;
    request(addr, "POST", "/api/marketing", Some(r#"{"topic":"goal setting"}"#)).await;
    let (_, _, body) = request(addr, "GET", "/api/suggestions", None).await;
    let id = body["suggestions"][0]["id"].as_str().unwrap().to_string();

    let path = format!("/api/suggestions/{}/review", id);
    let approve = r#"{"reviewer":"patrick","approve":true}"#;
    let reject = r#"{"reviewer":"liam","approve":false}"#;
    let (a, b) = tokio::join!(
        request(addr, "POST", &path, Some(approve)),
        request(addr, "POST", &path, Some(reject)),
    );
    let mut statuses = vec![a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);
}

#[tokio::test]
async fn test_contacts_show_presence() {
    let store = MemoryStore::new();
    store
        .set(PRESENCE, "bob", json!({ "online": false, "lastSeen": "2024-03-01T09:41:00Z" }))
        .unwrap();
    store
        .set(PRESENCE, "carol", json!({ "online": true, "lastSeen": "2024-03-01T10:00:00Z" }))
        .unwrap();
    let addr = start_on(store, StubPrompt(Some("ok"))).await;

    let (status, _, body) = request(addr, "GET", "/api/contacts?user=alice", None).await;
    assert_eq!(status, 200);
    let contacts = body["contacts"].as_array().unwrap();
    let status_of = |id: &str| {
        contacts
            .iter()
            .find(|c| c["id"] == id)
            .map(|c| c["status"].clone())
            .unwrap()
    };
    assert_eq!(status_of("bob"), "last seen 09:41");
    assert_eq!(status_of("carol"), "online");
}
