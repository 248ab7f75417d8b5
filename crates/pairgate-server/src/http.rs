//! HTTP request handlers
//!
//! Includes static file serving and the pairing endpoint.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pairgate_auth::ResponseSink;
use pairgate_core::{SessionId, SessionIdMode};
use pairgate_web::{Assets, DASHBOARD};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, error, info};

use crate::state::AppState;

const PHONE_REQUIRED: &str = "Phone number is required";
const PHONE_AND_SESSION_REQUIRED: &str = "Phone number and session ID are required";
const ALREADY_LINKED: &str = "Session is already linked";

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/pair", get(pair_handler));

    // Static files
    let router = match state.config.pages_dir.clone() {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(static_handler),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).with_state(state)
}

/// Serve the dashboard page
async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    if let Some(dir) = &state.config.pages_dir {
        return match tokio::fs::read_to_string(dir.join(DASHBOARD)).await {
            Ok(page) => Html(page).into_response(),
            Err(e) => {
                debug!("No dashboard in {:?}: {}", dir, e);
                (StatusCode::NOT_FOUND, "Not found").into_response()
            }
        };
    }

    match Assets::get(DASHBOARD) {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Serve embedded assets with proper content types
async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    debug!("Serving asset: {}", path);

    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string();

            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime)],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

// ============================================================================
// Pairing
// ============================================================================

/// Query parameters of `/pair`
#[derive(Debug, Deserialize)]
pub struct PairQuery {
    /// Phone number in any notation
    code: Option<String>,
    /// Caller-chosen session ID
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// Start a linking attempt and return its pairing code
///
/// Only one request at a time runs the code-delivery leg; the rest of the
/// attempt continues in the background after the response is sent.
async fn pair_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PairQuery>,
) -> Response {
    let config = &state.config;

    let (phone, session_id) = match config.session_id_mode {
        SessionIdMode::Generated => {
            let Some(phone) = non_empty(&query.code) else {
                return message(StatusCode::IM_A_TEAPOT, PHONE_REQUIRED);
            };
            (phone, SessionId::generate(&config.session_prefix))
        }
        SessionIdMode::CallerSupplied => {
            let (Some(phone), Some(raw_id)) = (non_empty(&query.code), non_empty(&query.session_id))
            else {
                return message(StatusCode::IM_A_TEAPOT, PHONE_AND_SESSION_REQUIRED);
            };
            match SessionId::parse(raw_id) {
                Ok(id) => (phone, id),
                Err(e) => return message(StatusCode::BAD_REQUEST, &e.to_string()),
            }
        }
    };

    let (sink, mut reply) = ResponseSink::channel();
    let result = {
        let _guard = state.pair_lock.lock().await;
        debug!("Pairing lock acquired for {}", session_id);
        state
            .controller
            .begin(Some(phone), session_id.clone(), Some(sink))
            .await
    };

    if let Err(e) = result {
        error!("Pairing failed for {}: {}", session_id, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "server Error" })),
        )
            .into_response();
    }

    match reply.try_recv() {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(_) => {
            info!("No code for {}, session already linked", session_id);
            (
                StatusCode::CONFLICT,
                Json(json!({ "message": ALREADY_LINKED, "sessionId": session_id })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pairgate_auth::{LifecycleController, LifecycleSettings, MemorySessionStore};
    use pairgate_client::{MockCall, MockConnector};
    use pairgate_core::{Config, ReconnectPolicy};
    use pairgate_publish::RelayPublisher;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    fn app(connector: MockConnector, config: Config) -> (Router, TempDir) {
        let root = tempdir().unwrap();
        let settings = LifecycleSettings {
            auth_root: root.path().to_path_buf(),
            code_request_delay: Duration::ZERO,
            publish_delay: Duration::ZERO,
            marker: config.marker.clone(),
            reconnect: ReconnectPolicy::unlimited(),
        };
        let controller = LifecycleController::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(connector),
            Arc::new(RelayPublisher::new("http://127.0.0.1:9/paste").unwrap()),
            settings,
        );
        let state = Arc::new(AppState::new(config, controller));
        (create_router(state), root)
    }

    fn caller_supplied() -> Config {
        Config::new().with_session_ids(SessionIdMode::CallerSupplied, "Naxor~")
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_missing_phone() {
        let (router, _root) = app(MockConnector::new(), Config::new());
        let (status, body) = get(router.clone(), "/pair").await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(body, json!({"message": "Phone number is required"}));

        let (status, _) = get(router, "/pair?code=").await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_missing_session_id_when_required() {
        let (router, _root) = app(MockConnector::new(), caller_supplied());
        let (status, body) = get(router.clone(), "/pair?code=15551234567").await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(body, json!({"message": "Phone number and session ID are required"}));

        let (status, _) = get(router, "/pair?sessionId=abc").await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_invalid_session_id() {
        let connector = MockConnector::new();
        let (router, _root) = app(connector.clone(), caller_supplied());
        let (status, body) = get(router, "/pair?code=1&sessionId=..").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
        assert!(connector.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pair_returns_formatted_code() {
        let connector = MockConnector::new();
        let (router, _root) = app(connector.clone(), Config::new());

        let (status, body) = get(router, "/pair?code=%2B1%20%28555%29%20123-4567").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], "ABCD-1234-WXYZ");
        let session_id = body["sessionId"].as_str().unwrap();
        assert!(session_id.starts_with("Naxor~"));
        assert_eq!(connector.pairing_requests(), vec!["15551234567".to_string()]);
    }

    #[tokio::test]
    async fn test_pair_with_caller_session_id() {
        let (router, _root) = app(MockConnector::new(), caller_supplied());
        let (status, body) = get(router, "/pair?code=15551234567&sessionId=mine").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"code": "ABCD-1234-WXYZ", "sessionId": "mine"}));
    }

    #[tokio::test]
    async fn test_already_linked() {
        let connector = MockConnector::new().with_registered(true);
        let (router, _root) = app(connector, caller_supplied());
        let (status, body) = get(router, "/pair?code=15551234567&sessionId=linked").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body,
            json!({"message": "Session is already linked", "sessionId": "linked"})
        );
    }

    #[tokio::test]
    async fn test_failure_is_500_and_releases_lock() {
        let (router, _root) = app(MockConnector::new().failing_connect(), Config::new());

        for _ in 0..2 {
            let (status, body) = get(router.clone(), "/pair?code=123").await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, json!({"error": "server Error"}));
        }
    }

    #[tokio::test]
    async fn test_concurrent_pairs_are_serialized() {
        let connector = MockConnector::new().with_code_delay(Duration::from_millis(100));
        let (router, _root) = app(connector.clone(), Config::new());

        let (a, b) = tokio::join!(
            get(router.clone(), "/pair?code=111"),
            get(router.clone(), "/pair?code=222"),
        );
        assert_eq!(a.0, StatusCode::OK);
        assert_eq!(b.0, StatusCode::OK);

        let legs: Vec<(bool, SessionId)> = connector
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::RequestPairingCode { session_id, .. } => Some((true, session_id)),
                MockCall::CodeIssued { session_id } => Some((false, session_id)),
                _ => None,
            })
            .collect();

        assert_eq!(legs.len(), 4);
        assert!(legs[0].0 && !legs[1].0 && legs[2].0 && !legs[3].0);
        assert_eq!(legs[0].1, legs[1].1);
        assert_eq!(legs[2].1, legs[3].1);
        assert_ne!(legs[0].1, legs[2].1);
    }

    #[tokio::test]
    async fn test_health_and_dashboard() {
        let (router, _root) = app(MockConnector::new(), Config::new());

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));

        let response = router
            .oneshot(Request::builder().uri("/style.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
    }

    #[tokio::test]
    async fn test_pages_dir_override() {
        let pages = tempdir().unwrap();
        std::fs::write(pages.path().join("dashboard.html"), "<p>custom</p>").unwrap();
        std::fs::write(pages.path().join("extra.txt"), "hello").unwrap();
        let config = Config::new().with_pages_dir(Some(pages.path().to_path_buf()));
        let (router, _root) = app(MockConnector::new(), config);

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<p>custom</p>");

        let response = router
            .oneshot(Request::builder().uri("/extra.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
