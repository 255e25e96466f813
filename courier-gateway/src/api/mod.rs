//! HTTP API.
//!
//! Every response is a JSON object with a `success` flag. Routes below
//! `/api` require the `x-api-key` header when an API key is configured.

mod callback;
mod client;
mod sessions;

use crate::config::GatewayConfig;
use crate::error::{ApiError, ApiResult};
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use courier::session::SessionManager;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session lifecycle manager.
    pub manager: SessionManager,
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    /// Create handler state.
    #[must_use]
    pub fn new(manager: SessionManager, config: GatewayConfig) -> Self {
        Self {
            manager,
            config: Arc::new(config),
        }
    }
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    let auth = middleware::from_fn_with_state(state.clone(), require_api_key);

    let api = Router::new()
        .route("/api/startSession/{id}", get(sessions::start_session))
        .route("/api/sessionStatus/{id}", get(sessions::session_status))
        .route("/api/sessionQr/{id}", get(sessions::session_qr))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/terminateSession/{id}", get(sessions::terminate_session))
        .route(
            "/api/terminateInactiveSessions",
            get(sessions::terminate_inactive_sessions),
        )
        .route("/api/terminateAllSessions", get(sessions::terminate_all_sessions))
        .route("/api/getSessionInfo/{id}", get(client::get_session_info))
        .route("/api/sendMessage/{id}", post(client::send_message))
        .route("/api/isRegisteredUser/{id}", post(client::is_registered_user))
        .route("/api/createGroup/{id}", post(client::create_group))
        .route("/api/setStatus/{id}", post(client::set_status))
        .route("/api/getContacts/{id}", get(client::get_contacts))
        .route("/api/getChats/{id}", get(client::get_chats))
        .route("/api/getProfilePicUrl/{id}", post(client::get_profile_pic_url))
        .route_layer(auth.clone());

    let mut app = Router::new().route("/ping", get(ping)).merge(api);

    if state.config.webhook.enable_local_callback_example {
        app = app.merge(
            Router::new()
                .route("/localCallbackExample", post(callback::local_callback_example))
                .route_layer(auth),
        );
    }

    app.with_state(state)
}

/// Reject requests without the configured API key.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    if let Some(expected) = &state.config.server.api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected.as_str()) {
            warn!(path = %request.uri().path(), "rejected request with invalid API key");
            return Err(ApiError::forbidden("Invalid API key"));
        }
    }
    Ok(next.run(request).await)
}

async fn ping() -> Json<Value> {
    Json(json!({ "success": true, "message": "pong" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use courier::events::ClientEvent;
    use courier::memory::MemoryClientFactory;
    use courier::session::ManagerConfig;
    use courier::status::SessionStatus;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        manager: SessionManager,
        factory: MemoryClientFactory,
    }

    fn harness(factory: MemoryClientFactory, config: GatewayConfig) -> Harness {
        let manager_config = ManagerConfig::default()
            .with_persist_credentials(false)
            .with_ready_timeout(Duration::from_secs(2));
        let manager = SessionManager::with_config(factory.clone(), manager_config);
        let app = router(AppState::new(manager.clone(), config));
        Harness {
            app,
            manager,
            factory,
        }
    }

    fn keyed_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.server.api_key = Some("secret".to_string());
        config
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(API_KEY_HEADER, "secret");
        let body = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn ready(h: &Harness, id: &str) {
        h.manager
            .create(id)
            .await
            .unwrap()
            .readiness
            .wait()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ping_needs_no_key() {
        let h = harness(MemoryClientFactory::new(), keyed_config());
        let request = axum::http::Request::builder()
            .uri("/ping")
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_key_enforced() {
        let h = harness(MemoryClientFactory::new(), keyed_config());
        let request = axum::http::Request::builder()
            .uri("/api/sessions")
            .header(API_KEY_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let (status, body) = send(&h.app, Method::GET, "/api/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"], json!([]));
    }

    #[tokio::test]
    async fn test_start_session() {
        let h = harness(MemoryClientFactory::auto_ready(), keyed_config());

        let (status, body) = send(&h.app, Method::GET, "/api/startSession/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Session initiated successfully");

        let (status, body) = send(&h.app, Method::GET, "/api/startSession/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Session already exists");
        assert_eq!(h.factory.created_count("alice"), 1);
    }

    #[tokio::test]
    async fn test_invalid_id() {
        let h = harness(MemoryClientFactory::new(), keyed_config());
        let (status, body) = send(&h.app, Method::GET, "/api/startSession/bad%20id", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_status_and_qr() {
        let h = harness(
            MemoryClientFactory::with_script(vec![ClientEvent::Qr {
                code: "2@abc".to_string(),
            }]),
            keyed_config(),
        );
        let (status, _) = send(&h.app, Method::GET, "/api/sessionStatus/alice", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.manager.create("alice").await.unwrap();
        let handle = h
            .manager
            .registry()
            .lookup(&"alice".parse().unwrap())
            .await
            .unwrap();
        let mut rx = handle.subscribe_status();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| *s == SessionStatus::QrRequired),
        )
        .await
        .unwrap()
        .unwrap();

        let (status, body) = send(&h.app, Method::GET, "/api/sessionStatus/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "QR_REQUIRED");

        let (status, body) = send(&h.app, Method::GET, "/api/sessionQr/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["qr"], "2@abc");

        let (status, _) = send(&h.app, Method::GET, "/api/getChats/alice", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_send_message() {
        let h = harness(MemoryClientFactory::auto_ready(), keyed_config());
        ready(&h, "alice").await;

        let (status, body) = send(
            &h.app,
            Method::POST,
            "/api/sendMessage/alice",
            Some(json!({ "chatId": "123@c.us", "contentType": "string", "content": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"]["to"], "123@c.us");

        let (status, body) = send(
            &h.app,
            Method::POST,
            "/api/sendMessage/alice",
            Some(json!({ "chatId": "123@c.us", "contentType": "Location", "content": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body["message"],
            "contentType invalid, must be string, MessageMedia, MessageMediaFromURL"
        );

        let (status, _) = send(
            &h.app,
            Method::POST,
            "/api/sendMessage/alice",
            Some(json!({ "chatId": "123@c.us", "contentType": "MessageMedia", "content": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_capabilities() {
        let h = harness(MemoryClientFactory::auto_ready(), keyed_config());
        ready(&h, "alice").await;

        let (status, body) = send(
            &h.app,
            Method::POST,
            "/api/isRegisteredUser/alice",
            Some(json!({ "id": "123@c.us" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);

        let (_, body) = send(&h.app, Method::GET, "/api/getContacts/alice", None).await;
        assert_eq!(body["contacts"], json!([]));

        let (_, body) = send(&h.app, Method::GET, "/api/getSessionInfo/alice", None).await;
        assert_eq!(body["sessionInfo"]["platform"], "memory");

        let client = h.factory.client("alice").unwrap();
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_terminate_session() {
        let h = harness(MemoryClientFactory::auto_ready(), keyed_config());
        ready(&h, "alice").await;

        let (status, body) = send(&h.app, Method::GET, "/api/terminateSession/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["loggedOut"], true);
        assert_eq!(body["message"], "Logged out successfully");

        let (status, _) = send(&h.app, Method::GET, "/api/terminateSession/alice", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_terminate_inactive_keeps_ready() {
        let h = harness(MemoryClientFactory::auto_ready(), keyed_config());
        ready(&h, "alice").await;
        ready(&h, "bob").await;
        h.factory.client("bob").unwrap().set_connected(false);

        let (status, body) =
            send(&h.app, Method::GET, "/api/terminateInactiveSessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], json!(["bob"]));

        let (_, body) = send(&h.app, Method::GET, "/api/terminateAllSessions", None).await;
        assert_eq!(body["deleted"], json!(["alice"]));
        assert!(h.manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_local_callback_example() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = keyed_config();
        config.webhook.enable_local_callback_example = true;
        config.sessions.path = dir.path().to_path_buf();
        let h = harness(MemoryClientFactory::new(), config);

        let payload = json!({ "sessionId": "alice", "dataType": "ready", "data": null });
        let (status, body) =
            send(&h.app, Method::POST, "/localCallbackExample", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let log = tokio::fs::read_to_string(dir.path().join("message_log.txt"))
            .await
            .unwrap();
        let logged: Value = serde_json::from_str(log.trim_end()).unwrap();
        assert_eq!(logged, payload);
    }

    #[tokio::test]
    async fn test_local_callback_disabled_by_default() {
        let h = harness(MemoryClientFactory::new(), keyed_config());
        let (status, _) = send(&h.app, Method::POST, "/localCallbackExample", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
