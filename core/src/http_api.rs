/// Dashboard HTTP API + SSE
///
/// Endpoints:
///   POST   /api/chat                     body: {"message":"..."}
///   GET    /api/chat                     diagnostics
///   POST   /api/marketing                body: {"topic":"...","audience"?,"tone"?}
///   GET    /api/suggestions
///   POST   /api/suggestions/:id/review   body: {"reviewer":"...","approve":bool}
///   GET    /api/contacts                 ?user=ID
///   GET    /api/conversations/:peer_id   ?user=ID
///   POST   /api/messages                 body: {"from","to","content","type"?}
///   DELETE /api/messages/:id             ?user=ID
///   GET    /events                       SSE stream of ServerEvent JSON
use crate::ai::{
    chat_assistant, generate_marketing_content, FlowStats, MarketingBrief, PromptService,
    ASSISTANT_FALLBACK,
};
use crate::config::Config;
use crate::contact_directory::{ContactDirectory, PresenceRecord, Roster};
use crate::error::{GoalError, Result};
use crate::events::ServerEvent;
use crate::message_store::{ChatError, MessageDraft, MessageStore};
use crate::models::{ContentSuggestion, MarketingContent, MessageType};
use crate::store::{
    AccessRules, AuthorizedStore, DocumentStore, Query, StoreError, TeamRules, PRESENCE,
    SUGGESTIONS,
};
use crate::utils::telemetry::Telemetry;
use futures_util::stream::{unfold, StreamExt};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// ─── Type alias ──────────────────────────────────────────────────────────────

type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, Infallible>;
type Resp = Response<BoxBody>;

// ─── Shared state ────────────────────────────────────────────────────────────

/// Services shared by every connection
#[derive(Clone)]
pub struct AppState {
    /// Unauthenticated backend; requests go through `session()`
    pub store: Arc<dyn DocumentStore>,
    pub rules: Arc<dyn AccessRules>,
    pub roster: Roster,
    pub prompt: Arc<dyn PromptService>,
    pub telemetry: Telemetry,
    pub stats: FlowStats,
    pub environment: String,
    /// Serializes suggestion reviews so each is decided once
    review_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        roster: Roster,
        prompt: Arc<dyn PromptService>,
        environment: &str,
    ) -> Self {
        Self {
            store,
            rules: Arc::new(TeamRules),
            roster,
            prompt,
            telemetry: Telemetry::new("http_api".to_string()),
            stats: FlowStats::new(),
            environment: environment.to_string(),
            review_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.open_store()?,
            config.load_roster()?,
            config.prompt_service()?,
            &config.environment,
        ))
    }

    /// Message operations performed as `user`
    fn session(&self, user: &str) -> MessageStore {
        let store = AuthorizedStore::new(
            self.store.clone(),
            Some(user.to_string()),
            self.rules.clone(),
        );
        MessageStore::new(Arc::new(store), user)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cors_headers(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

fn empty_resp() -> Resp {
    Response::new(Full::new(bytes::Bytes::new()).boxed())
}

fn json_resp(status: StatusCode, value: &Value) -> Resp {
    cors_headers(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(bytes::Bytes::from(serde_json::to_vec(value).unwrap_or_default())).boxed())
        .unwrap_or_else(|_| empty_resp())
}

fn json_ok(value: Value) -> Resp {
    json_resp(StatusCode::OK, &value)
}

fn json_err(status: StatusCode, msg: &str) -> Resp {
    json_resp(status, &json!({ "error": msg }))
}

fn sse_resp(rx: tokio::sync::broadcast::Receiver<ServerEvent>) -> Resp {
    // Comment frame first so the client knows the stream is live
    let initial = bytes::Bytes::from(": connected\n\n");
    let first = futures_util::stream::once(async move {
        Ok::<Frame<bytes::Bytes>, Infallible>(Frame::data(initial))
    });

    let events = unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    let frame = Frame::data(bytes::Bytes::from(format!("data: {}\n\n", json)));
                    return Some((Ok::<_, Infallible>(frame), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("SSE client lagged {} events", n);
                    continue;
                }
                Err(_) => return None,
            }
        }
    });

    cors_headers(Response::builder())
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(BodyExt::boxed(StreamBody::new(first.chain(events))))
        .unwrap_or_else(|_| empty_resp())
}

/// Map a chat failure to a response, reporting store errors to telemetry
fn chat_error_resp(err: ChatError, telemetry: &Telemetry) -> Resp {
    match err {
        ChatError::EmptyMessage | ChatError::SelfMessage => {
            json_err(StatusCode::BAD_REQUEST, &err.to_string())
        }
        ChatError::MessageNotFound(_) => json_err(StatusCode::NOT_FOUND, &err.to_string()),
        ChatError::NotParticipant(_) => json_err(StatusCode::FORBIDDEN, &err.to_string()),
        ChatError::Store(e) => {
            telemetry.store_error(&e);
            match &e {
                StoreError::PermissionDenied(ctx) => json_resp(
                    StatusCode::FORBIDDEN,
                    &json!({ "error": e.to_string(), "context": ctx }),
                ),
                StoreError::NotFound(_) => json_err(StatusCode::NOT_FOUND, &e.to_string()),
                _ => json_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            }
        }
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Serve connections from `listener` until the task is dropped
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let state = Arc::new(state);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Connection from {}", peer);
                let io = TokioIo::new(stream);
                let state = state.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(handle(req, state).await) }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        // Client disconnects are normal for SSE
                        if !e.is_incomplete_message() {
                            error!("HTTP connection error: {:?}", e);
                        }
                    }
                });
            }
            Err(e) => error!("HTTP accept error: {}", e),
        }
    }
}

pub async fn start_http_api(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .map_err(GoalError::Io)?;
    info!("GoalLeader API started on http://{}", config.listen_addr);
    info!(
        "   Assistant: {} ({})",
        state.prompt.model(),
        if state.prompt.is_configured() { "configured" } else { "no API key" }
    );
    serve(listener, state).await
}

// ─── Router ──────────────────────────────────────────────────────────────────

async fn handle(req: Request<hyper::body::Incoming>, state: Arc<AppState>) -> Resp {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    // CORS preflight
    if method == Method::OPTIONS {
        return cors_headers(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(bytes::Bytes::new()).boxed())
            .unwrap_or_else(|_| empty_resp());
    }

    match (method.clone(), path.as_str()) {
        (Method::POST, "/api/chat") => post_chat(req, &state).await,
        (Method::GET, "/api/chat") => get_chat_diagnostics(&state).await,
        (Method::POST, "/api/marketing") => post_marketing(req, &state).await,
        (Method::GET, "/api/suggestions") => get_suggestions(&state),
        (Method::GET, "/api/contacts") => get_contacts(&query, &state),
        (Method::POST, "/api/messages") => post_message(req, &state).await,
        (Method::GET, "/events") => sse_resp(state.telemetry.subscribe()),
        _ => {
            // Dynamic segments
            if method == Method::GET && path.starts_with("/api/conversations/") {
                let peer_id = decode_segment(path.trim_start_matches("/api/conversations/"));
                return get_conversation(&peer_id, &query, &state);
            }
            if method == Method::DELETE && path.starts_with("/api/messages/") {
                let id = decode_segment(path.trim_start_matches("/api/messages/"));
                return delete_message(&id, &query, &state);
            }
            if method == Method::POST && path.starts_with("/api/suggestions/") {
                if let Some(id) = path
                    .trim_start_matches("/api/suggestions/")
                    .strip_suffix("/review")
                {
                    return post_review(req, &decode_segment(id), &state).await;
                }
            }
            json_err(StatusCode::NOT_FOUND, "not found")
        }
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn post_chat(req: Request<hyper::body::Incoming>, state: &AppState) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return internal_chat_error(&e),
    };
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return json_err(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };
    let Some(message) = value.get("message").and_then(Value::as_str).map(str::to_string) else {
        return json_err(StatusCode::BAD_REQUEST, "Message must be a string");
    };

    let started = Instant::now();
    let prompt = state.prompt.clone();
    let flow = tokio::spawn(async move { chat_assistant(prompt.as_ref(), &message).await });
    match flow.await {
        Ok(output) => {
            state
                .stats
                .record("chat", started.elapsed(), output == ASSISTANT_FALLBACK)
                .await;
            json_ok(json!({ "output": output }))
        }
        Err(e) => internal_chat_error(&e.to_string()),
    }
}

fn internal_chat_error(details: &str) -> Resp {
    error!("Chat request failed: {}", details);
    json_resp(
        StatusCode::INTERNAL_SERVER_ERROR,
        &json!({ "error": "Failed to process chat message", "details": details }),
    )
}

async fn get_chat_diagnostics(state: &AppState) -> Resp {
    let (status, store) = match state.store.query(&Query::collection(PRESENCE)) {
        Ok(_) => ("ok", "ok".to_string()),
        Err(e) => ("degraded", format!("error: {}", e)),
    };
    let usage = state.stats.snapshot().await;
    let prompt_service = if state.prompt.is_configured() {
        "configured"
    } else {
        "not_configured"
    };
    json_ok(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": state.environment,
        "connectivity": {
            "promptService": prompt_service,
            "store": store,
        },
        "flags": {
            "aiConfigured": state.prompt.is_configured(),
            "model": state.prompt.model(),
        },
        "usage": usage,
    }))
}

async fn post_marketing(req: Request<hyper::body::Incoming>, state: &AppState) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let brief: MarketingBrief = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(_) => return json_err(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    let started = Instant::now();
    let content = generate_marketing_content(state.prompt.as_ref(), &brief).await;
    let fell_back = content == MarketingContent::fallback();
    state.stats.record("marketing", started.elapsed(), fell_back).await;

    if !fell_back {
        let suggestion = ContentSuggestion::new(content.clone());
        let stored = serde_json::to_value(&suggestion)
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))
            .and_then(|v| state.store.set(SUGGESTIONS, &suggestion.id, v));
        if let Err(e) = stored {
            state.telemetry.store_error(&e);
        }
    }
    json_ok(json!(content))
}

fn get_suggestions(state: &AppState) -> Resp {
    let docs = match state.store.query(&Query::collection(SUGGESTIONS)) {
        Ok(d) => d,
        Err(e) => return json_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    let mut suggestions: Vec<ContentSuggestion> =
        docs.iter().filter_map(|d| d.decode().ok()).collect();
    suggestions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    json_ok(json!({ "suggestions": suggestions }))
}

#[derive(Deserialize)]
struct ReviewRequest {
    reviewer: String,
    approve: bool,
}

async fn post_review(req: Request<hyper::body::Incoming>, id: &str, state: &AppState) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let r: ReviewRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return json_err(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    let _review = state.review_lock.lock().await;
    let mut suggestion: ContentSuggestion = match state.store.get(SUGGESTIONS, id) {
        Ok(Some(doc)) => match doc.decode() {
            Ok(s) => s,
            Err(e) => return json_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        Ok(None) => return json_err(StatusCode::NOT_FOUND, "suggestion not found"),
        Err(e) => return json_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    if !suggestion.review(&r.reviewer, r.approve) {
        return json_err(StatusCode::CONFLICT, "suggestion was already reviewed");
    }
    let stored = serde_json::to_value(&suggestion)
        .map_err(|e| StoreError::InvalidDocument(e.to_string()))
        .and_then(|v| state.store.set(SUGGESTIONS, id, v));
    match stored {
        Ok(_) => json_ok(json!({ "suggestion": suggestion })),
        Err(e) => {
            state.telemetry.store_error(&e);
            json_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// `user` query parameter, checked against the roster
fn roster_user(query: &str, state: &AppState) -> std::result::Result<String, Resp> {
    let Some(user) = query_param(query, "user") else {
        return Err(json_err(StatusCode::BAD_REQUEST, "user is required"));
    };
    if state.roster.get(&user).is_none() {
        return Err(json_err(StatusCode::NOT_FOUND, "unknown user"));
    }
    Ok(user)
}

fn get_contacts(query: &str, state: &AppState) -> Resp {
    let user = match roster_user(query, state) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let mut directory = ContactDirectory::new(state.roster.clone());
    if let Ok(docs) = state.store.query(&Query::collection(PRESENCE)) {
        for doc in docs {
            match doc.decode::<PresenceRecord>() {
                Ok(record) => directory.set_presence(&doc.id, record.presence()),
                Err(e) => warn!("Skipping malformed presence {}: {}", doc.id, e),
            }
        }
    }
    match state.session(&user).inbox() {
        Ok(messages) => {
            for m in &messages {
                directory.record_message(m, &user, None);
            }
        }
        Err(e) => return chat_error_resp(e, &state.telemetry),
    }
    json_ok(json!({ "contacts": directory.list_contacts(&user) }))
}

fn get_conversation(peer_id: &str, query: &str, state: &AppState) -> Resp {
    let user = match roster_user(query, state) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    match state.session(&user).history(peer_id) {
        Ok(messages) => {
            let visible: Vec<_> = messages
                .into_iter()
                .filter(|m| !m.is_deleted_for(&user))
                .collect();
            json_ok(json!({ "messages": visible }))
        }
        Err(e) => chat_error_resp(e, &state.telemetry),
    }
}

#[derive(Deserialize)]
struct SendRequest {
    from: String,
    to: String,
    content: String,
    #[serde(default, rename = "type")]
    kind: Option<MessageType>,
}

async fn post_message(req: Request<hyper::body::Incoming>, state: &AppState) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let r: SendRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return json_err(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };
    if state.roster.get(&r.from).is_none() {
        return json_err(StatusCode::NOT_FOUND, "unknown user");
    }
    if state.roster.get(&r.to).is_none() {
        return json_err(StatusCode::NOT_FOUND, "unknown recipient");
    }

    let mut draft = MessageDraft::text(r.content);
    if let Some(kind) = r.kind {
        draft.kind = kind;
    }
    match state.session(&r.from).send(&r.to, draft) {
        Ok(message) => {
            state.telemetry.emit(ServerEvent::NewMessage {
                message: message.clone(),
            });
            json_ok(json!({ "message": message }))
        }
        Err(e) => chat_error_resp(e, &state.telemetry),
    }
}

fn delete_message(id: &str, query: &str, state: &AppState) -> Resp {
    let user = match roster_user(query, state) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    match state.session(&user).delete(id) {
        Ok(()) => {
            state.telemetry.emit(ServerEvent::MessageDeleted {
                message_id: id.to_string(),
                by: user,
            });
            json_ok(json!({ "deleted": true }))
        }
        Err(e) => chat_error_resp(e, &state.telemetry),
    }
}

// ─── Utilities ────────────────────────────────────────────────────────────────

async fn read_body(req: Request<hyper::body::Incoming>) -> std::result::Result<bytes::Bytes, String> {
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| e.to_string())
}

fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| decode_segment(v))
    })
}
