//! HTTP gateway client
//!
//! The messaging library runs in a sidecar process. Each session is created
//! on the gateway with its stored auth state; pairing codes and outbound
//! messages are plain JSON requests, and events are fetched by long polling
//! `GET /sessions/{id}/events?after=<seq>`.

use async_trait::async_trait;
use pairgate_core::{
    AuthState, ClientEvent, ConnectionState, ConnectionUpdate, DisconnectReason, SessionId,
};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ClientConnector, ClientError, ClientResult, Connection, LinkClient, EVENT_CHANNEL_CAPACITY};

/// Browser identity announced to the messaging network
const BROWSER: [&str; 3] = ["Mac OS", "Safari", "14.4.1"];

/// Gateway connection options
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Base URL, e.g. `http://127.0.0.1:8787`
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Timeout for ordinary requests
    pub request_timeout: Duration,
    /// How long the gateway may hold an event poll open
    pub poll_timeout: Duration,
}

impl GatewayOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            request_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(25),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest<'a> {
    session_id: &'a str,
    auth: &'a AuthState,
    browser: [&'static str; 3],
    mark_online_on_connect: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    #[serde(default)]
    registered: bool,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PairingCodeRequest<'a> {
    phone_number: &'a str,
}

#[derive(Debug, Deserialize)]
struct PairingCodeResponse {
    code: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    jid: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    seq: u64,
    event: WireEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "creds.update")]
    CredsUpdate { auth: AuthState },
    #[serde(rename = "connection.update", rename_all = "camelCase")]
    ConnectionUpdate {
        connection: Option<ConnectionState>,
        last_disconnect: Option<WireDisconnect>,
        user_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDisconnect {
    status_code: Option<u16>,
}

impl WireEvent {
    fn into_client_event(self) -> ClientEvent {
        match self {
            WireEvent::CredsUpdate { auth } => ClientEvent::CredsUpdate(auth),
            WireEvent::ConnectionUpdate {
                connection,
                last_disconnect,
                user_id,
            } => ClientEvent::Connection(ConnectionUpdate {
                connection,
                last_disconnect: last_disconnect
                    .and_then(|d| d.status_code)
                    .map(DisconnectReason),
                user_id,
            }),
        }
    }
}

/// Shared HTTP plumbing for connector and clients
#[derive(Debug, Clone)]
struct GatewayHttp {
    http: Client,
    options: Arc<GatewayOptions>,
}

impl GatewayHttp {
    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = Url::parse(&self.options.base_url)
            .map_err(|e| ClientError::Other(format!("invalid gateway URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Other("gateway URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.options.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Gateway {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn poll_events(&self, session_id: &str, after: u64) -> ClientResult<Vec<EventEnvelope>> {
        let url = self.endpoint(&["sessions", session_id, "events"])?;
        let wait = self.options.poll_timeout.as_secs().to_string();
        let request = self
            .http
            .get(url)
            .query(&[("after", after.to_string()), ("timeout", wait)])
            .timeout(self.options.poll_timeout + self.options.request_timeout);
        Ok(self.send(request).await?.json().await?)
    }
}

/// Builds [`GatewayClient`]s against one gateway
pub struct GatewayConnector {
    gateway: GatewayHttp,
}

impl GatewayConnector {
    pub fn new(options: GatewayOptions) -> ClientResult<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            gateway: GatewayHttp {
                http,
                options: Arc::new(options),
            },
        })
    }
}

#[async_trait]
impl ClientConnector for GatewayConnector {
    async fn connect(&self, session_id: &SessionId, auth: AuthState) -> ClientResult<Connection> {
        let url = self.gateway.endpoint(&["sessions"])?;
        let body = CreateSessionRequest {
            session_id: session_id.as_str(),
            auth: &auth,
            browser: BROWSER,
            mark_online_on_connect: true,
        };
        let request = self
            .gateway
            .http
            .post(url)
            .timeout(self.gateway.options.request_timeout)
            .json(&body);
        let created: CreateSessionResponse = self.gateway.send(request).await?.json().await?;

        debug!(
            "Gateway session {} created (registered: {})",
            session_id, created.registered
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let self_id = Arc::new(RwLock::new(created.user_id.or_else(|| {
            auth.account_id().map(str::to_string)
        })));

        let poller = tokio::spawn(run_poller(
            self.gateway.clone(),
            session_id.to_string(),
            tx,
            self_id.clone(),
        ));

        let client = GatewayClient {
            gateway: self.gateway.clone(),
            session_id: session_id.to_string(),
            registered: created.registered,
            self_id,
            poller: Mutex::new(Some(poller)),
        };

        Ok(Connection {
            client: Arc::new(client),
            events: rx,
        })
    }
}

/// Forward gateway events into the connection's channel until it closes
async fn run_poller(
    gateway: GatewayHttp,
    session_id: String,
    tx: mpsc::Sender<ClientEvent>,
    self_id: Arc<RwLock<Option<String>>>,
) {
    let mut after = 0u64;
    loop {
        let batch = match gateway.poll_events(&session_id, after).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Event poll for {} failed: {}", session_id, e);
                let lost = ConnectionUpdate::closed(Some(DisconnectReason::CONNECTION_LOST));
                let _ = tx.send(ClientEvent::Connection(lost)).await;
                return;
            }
        };

        for envelope in batch {
            if envelope.seq <= after {
                continue;
            }
            after = envelope.seq;

            let event = envelope.event.into_client_event();
            let mut closed = false;
            if let ClientEvent::Connection(update) = &event {
                if let Some(id) = &update.user_id {
                    if let Ok(mut guard) = self_id.write() {
                        *guard = Some(id.clone());
                    }
                }
                closed = update.connection == Some(ConnectionState::Close);
            }

            if tx.send(event).await.is_err() {
                debug!("Event receiver for {} dropped, stopping poller", session_id);
                return;
            }
            if closed {
                return;
            }
        }
    }
}

/// Protocol client backed by a gateway session
pub struct GatewayClient {
    gateway: GatewayHttp,
    session_id: String,
    registered: bool,
    self_id: Arc<RwLock<Option<String>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl LinkClient for GatewayClient {
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn self_id(&self) -> Option<String> {
        self.self_id.read().ok().and_then(|g| g.clone())
    }

    async fn request_pairing_code(&self, phone_digits: &str) -> ClientResult<String> {
        let url = self
            .gateway
            .endpoint(&["sessions", &self.session_id, "pairing-code"])?;
        let request = self
            .gateway
            .http
            .post(url)
            .timeout(self.gateway.options.request_timeout)
            .json(&PairingCodeRequest {
                phone_number: phone_digits,
            });
        let response: PairingCodeResponse = self.gateway.send(request).await?.json().await?;
        response
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ClientError::PairingRejected("gateway returned no code".to_string()))
    }

    async fn send_text(&self, jid: &str, text: &str) -> ClientResult<()> {
        let url = self
            .gateway
            .endpoint(&["sessions", &self.session_id, "messages"])?;
        let request = self
            .gateway
            .http
            .post(url)
            .timeout(self.gateway.options.request_timeout)
            .json(&SendMessageRequest { jid, text });
        self.gateway.send(request).await?;
        Ok(())
    }

    async fn end(&self, reason: Option<DisconnectReason>) {
        if let Some(poller) = self.poller.lock().ok().and_then(|mut g| g.take()) {
            poller.abort();
        }

        let url = match self.gateway.endpoint(&["sessions", &self.session_id]) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot end gateway session {}: {}", self.session_id, e);
                return;
            }
        };
        let request = self
            .gateway
            .http
            .delete(url)
            .timeout(self.gateway.options.request_timeout);
        match self.gateway.send(request).await {
            Ok(_) => info!(
                "Ended gateway session {} ({})",
                self.session_id,
                reason.map(|r| r.to_string()).unwrap_or_else(|| "no reason".to_string())
            ),
            Err(e) => warn!("Failed to end gateway session {}: {}", self.session_id, e),
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().ok().and_then(|p| p.take()) {
            poller.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        routing::{delete, get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn spawn_gateway() -> String {
        let app = Router::new()
            .route(
                "/sessions",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["browser"][1], "Safari");
                    assert_eq!(body["markOnlineOnConnect"], true);
                    Json(json!({"registered": false}))
                }),
            )
            .route(
                "/sessions/:id/pairing-code",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["phoneNumber"], "15551234567");
                    Json(json!({"code": "ABCD1234"}))
                }),
            )
            .route(
                "/sessions/:id/events",
                get(
                    |Path(_id): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                        if q.get("after").map(String::as_str) == Some("0") {
                            Json(json!([
                                {"seq": 1, "event": {"type": "creds.update",
                                    "auth": {"creds": {"registered": false}, "keys": {}}}},
                                {"seq": 2, "event": {"type": "connection.update",
                                    "connection": "close",
                                    "lastDisconnect": {"statusCode": 515}}}
                            ]))
                        } else {
                            Json(json!([]))
                        }
                    },
                ),
            )
            .route("/sessions/:id", delete(|| async { "" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_gateway_round_trip() {
        let base = spawn_gateway().await;
        let connector = GatewayConnector::new(GatewayOptions::new(base)).unwrap();
        let id = SessionId::parse("Naxor~0011223344556677").unwrap();

        let Connection { client, mut events } =
            connector.connect(&id, AuthState::default()).await.unwrap();
        assert!(!client.is_registered());
        assert_eq!(client.self_id(), None);

        let code = client.request_pairing_code("15551234567").await.unwrap();
        assert_eq!(code, "ABCD1234");

        let first = events.recv().await.unwrap();
        assert!(matches!(first, ClientEvent::CredsUpdate(_)));

        let second = events.recv().await.unwrap();
        assert_eq!(
            second,
            ClientEvent::Connection(ConnectionUpdate::closed(Some(
                DisconnectReason::RESTART_REQUIRED
            )))
        );

        // Poller stops after a close
        assert!(events.recv().await.is_none());

        client.end(None).await;
    }

    #[tokio::test]
    async fn test_unreachable_gateway_fails_connect() {
        let connector =
            GatewayConnector::new(GatewayOptions::new("http://127.0.0.1:1")).unwrap();
        let id = SessionId::parse("offline").unwrap();
        let result = connector.connect(&id, AuthState::default()).await;
        assert!(matches!(result, Err(ClientError::Http(_))));
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let gateway = GatewayHttp {
            http: Client::new(),
            options: Arc::new(GatewayOptions::new("http://gw.local/api/")),
        };
        let url = gateway.endpoint(&["sessions", "a b", "events"]).unwrap();
        assert_eq!(url.as_str(), "http://gw.local/api/sessions/a%20b/events");
    }
}
