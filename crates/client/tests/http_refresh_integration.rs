use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use parlance_client::api::{HttpMessagingApi, MessagingApi};
use parlance_client::auth::AuthSession;
use parlance_client::error::ClientError;
use parlance_client::refresh::RefreshCoordinator;
use parlance_common::protocol::rest::SendMessageRequest;
use parlance_common::types::{AuthToken, MessageType, UserRef};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Barrier;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

const CONVERSATION: Uuid = Uuid::from_u128(0xc0);
const ME: Uuid = Uuid::from_u128(1);

/// Fake messaging backend. Only `valid` is accepted as a bearer token; the
/// refresh endpoint swaps it for `fresh` when given refresh token `r1`.
struct FakeBackend {
    valid: Mutex<String>,
    refresh_calls: AtomicUsize,
    stale_barrier: Option<Barrier>,
    last_query: Mutex<Option<HashMap<String, String>>>,
    marked_read: Mutex<Vec<Uuid>>,
}

impl FakeBackend {
    fn new(valid: &str) -> Self {
        Self {
            valid: Mutex::new(valid.to_string()),
            refresh_calls: AtomicUsize::new(0),
            stale_barrier: None,
            last_query: Mutex::new(None),
            marked_read: Mutex::new(Vec::new()),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.valid.lock().unwrap());
        headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(expected.as_str())
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "statusCode": 401, "message": "Unauthorized" })))
        .into_response()
}

async fn refresh(State(backend): State<Arc<FakeBackend>>, Json(body): Json<Value>) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    match body["refreshToken"].as_str() {
        Some("r1") => {
            *backend.valid.lock().unwrap() = "fresh".into();
            Json(json!({ "accessToken": "fresh", "refreshToken": "r2" })).into_response()
        }
        Some("no-access") => Json(json!({ "refreshToken": "r9" })).into_response(),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid refresh token" })))
            .into_response(),
    }
}

async fn unread(State(backend): State<Arc<FakeBackend>>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        if let Some(barrier) = &backend.stale_barrier {
            barrier.wait().await;
        }
        return unauthorized();
    }
    Json(json!({ "count": 3 })).into_response()
}

async fn send(
    State(backend): State<Arc<FakeBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    if body["content"].as_str().unwrap_or_default().is_empty() {
        let error = json!({
            "statusCode": 400,
            "message": ["content should not be empty"],
            "error": "Bad Request"
        });
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }
    Json(json!({
        "id": Uuid::new_v4(),
        "conversationId": CONVERSATION,
        "sender": { "id": ME, "username": "me" },
        "receiver": { "id": body["receiverId"], "username": "peer" },
        "content": body["content"],
        "messageType": body["messageType"],
        "createdAt": "2026-03-01T12:00:00Z",
        "updatedAt": "2026-03-01T12:00:00Z"
    }))
    .into_response()
}

async fn messages(
    State(backend): State<Arc<FakeBackend>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    *backend.last_query.lock().unwrap() = Some(query);
    Json(json!({ "messages": [], "page": page, "hasMore": false })).into_response()
}

async fn mark_read(
    State(backend): State<Arc<FakeBackend>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    backend.marked_read.lock().unwrap().push(id);
    StatusCode::OK.into_response()
}

async fn start(backend: Arc<FakeBackend>) -> (Url, JoinHandle<()>) {
    let app = Router::new()
        .route("/api/auth/refresh", post(refresh))
        .route("/api/messaging/unread-count", get(unread))
        .route("/api/messaging/send", post(send))
        .route("/api/messaging/messages", get(messages))
        .route("/api/messaging/conversations/{id}/read", patch(mark_read))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake backend should run");
    });
    let base = Url::parse(&format!("http://{addr}/api")).expect("base url should parse");
    (base, task)
}

fn signed_in(access: &str, refresh: &str) -> AuthSession {
    let session = AuthSession::new();
    session.login(UserRef::new(ME, "me"), AuthToken::new(access), Some(refresh.into()));
    session
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    let backend = Arc::new(FakeBackend::new("valid"));
    let (base, server) = start(backend.clone()).await;
    let session = signed_in("stale", "r1");
    let api = HttpMessagingApi::new(base, session.clone(), RefreshCoordinator::default());

    let count = api.unread_count().await.expect("retry after refresh should succeed");

    assert_eq!(count, 3);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.current_token(), Some(AuthToken::new("fresh")));
    assert_eq!(session.refresh_token().as_deref(), Some("r2"));
    server.abort();
}

#[tokio::test]
async fn concurrent_unauthorized_calls_share_one_refresh() {
    let backend = Arc::new(FakeBackend {
        stale_barrier: Some(Barrier::new(5)),
        ..FakeBackend::new("valid")
    });
    let (base, server) = start(backend.clone()).await;
    let api = HttpMessagingApi::new(base, signed_in("stale", "r1"), RefreshCoordinator::default());

    let results = tokio::join!(
        api.unread_count(),
        api.unread_count(),
        api.unread_count(),
        api.unread_count(),
        api.unread_count(),
    );

    for result in [results.0, results.1, results.2, results.3, results.4] {
        assert_eq!(result.expect("every caller should succeed"), 3);
    }
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.refresher().epoch(), 1);
    server.abort();
}

#[tokio::test]
async fn valid_token_never_refreshes() {
    let backend = Arc::new(FakeBackend::new("valid"));
    let (base, server) = start(backend.clone()).await;
    let api = HttpMessagingApi::new(base, signed_in("valid", "r1"), RefreshCoordinator::default());

    let page = api.messages(CONVERSATION, 2, 20).await.expect("history should load");
    api.mark_conversation_read(CONVERSATION).await.expect("empty body is fine");

    assert_eq!(page.page, 2);
    let query = backend.last_query.lock().unwrap().clone().expect("query recorded");
    assert_eq!(query["conversationId"], CONVERSATION.to_string());
    assert_eq!(query["limit"], "20");
    assert_eq!(backend.marked_read.lock().unwrap().as_slice(), [CONVERSATION]);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
    server.abort();
}

#[tokio::test]
async fn error_message_is_extracted_from_body() {
    let backend = Arc::new(FakeBackend::new("valid"));
    let (base, server) = start(backend).await;
    let api = HttpMessagingApi::new(base, signed_in("valid", "r1"), RefreshCoordinator::default());

    let err = api
        .send_message(SendMessageRequest {
            receiver_id: Uuid::new_v4(),
            content: String::new(),
            message_type: MessageType::Text,
            metadata: None,
        })
        .await
        .expect_err("empty content should be refused");

    assert_eq!(err, ClientError::request(Some(400), "content should not be empty"));
    server.abort();
}

#[tokio::test]
async fn send_returns_the_persisted_message() {
    let backend = Arc::new(FakeBackend::new("valid"));
    let (base, server) = start(backend).await;
    let api = HttpMessagingApi::new(base, signed_in("valid", "r1"), RefreshCoordinator::default());
    let peer = Uuid::new_v4();

    let message = api
        .send_message(SendMessageRequest {
            receiver_id: peer,
            content: "hola".into(),
            message_type: MessageType::WordShare,
            metadata: Some(json!({ "wordId": "w-1" })),
        })
        .await
        .expect("send should succeed");

    assert_eq!(message.conversation_id, CONVERSATION);
    assert_eq!(message.receiver.id, peer);
    assert_eq!(message.message_type, MessageType::WordShare);
    server.abort();
}

#[tokio::test]
async fn denied_refresh_fails_with_rejection() {
    let backend = Arc::new(FakeBackend::new("valid"));
    let (base, server) = start(backend).await;
    let api = HttpMessagingApi::new(base, signed_in("stale", "bogus"), RefreshCoordinator::default());

    let err = api.unread_count().await.expect_err("refresh should be denied");

    assert!(matches!(err, ClientError::RefreshRejected(_)), "got {err:?}");
    assert!(!api.refresher().is_refreshing());
    server.abort();
}

#[tokio::test]
async fn refresh_without_access_token_is_a_validation_error() {
    let backend = Arc::new(FakeBackend::new("valid"));
    let (base, server) = start(backend).await;
    let api =
        HttpMessagingApi::new(base, signed_in("stale", "no-access"), RefreshCoordinator::default());

    let err = api.unread_count().await.expect_err("refresh payload has no token");

    assert!(matches!(err, ClientError::Validation(_)), "got {err:?}");
    server.abort();
}

#[tokio::test]
async fn slow_refresh_times_out() {
    let backend = Arc::new(FakeBackend::new("valid"));
    let (base, server) = start(backend).await;
    let api = HttpMessagingApi::new(
        base,
        signed_in("stale", "r1"),
        RefreshCoordinator::new(Duration::from_millis(50)),
    );

    let err = api.unread_count().await.expect_err("refresh takes 200ms");

    assert_eq!(err, ClientError::RefreshTimeout { after: Duration::from_millis(50) });
    server.abort();
}
