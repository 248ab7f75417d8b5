//! Pairing-and-session lifecycle
//!
//! One linking attempt moves through:
//!
//! ```text
//! RequestingCode -> AwaitingLink -> Open (publishing) -> Closed
//!        ^                                                 |
//!        +------------- reconnect (transient reason) ------+
//! ```
//!
//! 1. `begin` loads any stored record, builds a protocol client and, if the
//!    credentials are not yet registered, requests a pairing code and hands
//!    it to the caller's [`ResponseSink`]
//! 2. A task per attempt consumes the client's events in order: credential
//!    updates are written locally and then to the [`SessionStore`]; an open
//!    connection starts a publish task that waits, then hands the latest
//!    local creds to the [`CredentialPublisher`]; a close stops that task,
//!    deletes the stored record and applies the reconnect policy
//! 3. Reconnects build a fresh attempt for the same session ID with no phone
//!    number and no sink
//!
//! Attempts are tracked per session ID, so any number of sessions can be in
//! flight at once.

use pairgate_client::{ClientConnector, ClientError, Connection, LinkClient};
use pairgate_core::{
    format_pairing_code, normalize_phone, AuthState, ClientEvent, Config, ConnectionState,
    DisconnectReason, ReconnectPolicy, SessionId,
};
use pairgate_publish::CredentialPublisher;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth_dir::AuthDir;
use crate::storage::{SessionStore, StorageError};

/// Lifecycle errors surfaced to the caller of `begin`
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid phone number: {0:?}")]
    InvalidPhone(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Tunables for the lifecycle controller
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Root of per-session auth directories
    pub auth_root: PathBuf,
    /// Wait before requesting a pairing code
    pub code_request_delay: Duration,
    /// Wait after the connection opens before publishing
    pub publish_delay: Duration,
    /// Prefix of the message that delivers the published pointer
    pub marker: String,
    pub reconnect: ReconnectPolicy,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auth_root: config.auth_dir.clone(),
            code_request_delay: config.code_request_delay,
            publish_delay: config.publish_delay,
            marker: config.marker.clone(),
            reconnect: config.reconnect,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the HTTP caller receives once a code is produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingReply {
    pub code: String,
    pub session_id: SessionId,
}

/// One-shot response slot for the code-delivery leg
///
/// Delivering consumes the sender, so at most one reply is ever written.
#[derive(Debug)]
pub struct ResponseSink {
    tx: Option<oneshot::Sender<PairingReply>>,
}

impl ResponseSink {
    pub fn channel() -> (Self, oneshot::Receiver<PairingReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Whether a reply has already been written
    pub fn is_used(&self) -> bool {
        self.tx.is_none()
    }

    /// Write the reply if none has been written yet
    pub fn deliver(&mut self, reply: PairingReply) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}

/// Phase of a linking attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    RequestingCode,
    AwaitingLink,
    Open,
    Closed,
}

/// Controller-owned state of one attempt
struct Attempt {
    generation: u64,
    phase: AttemptPhase,
    client: Arc<dyn LinkClient>,
    /// Consecutive reconnects since the last open connection
    reconnects: u32,
    task: Option<JoinHandle<()>>,
    /// Publish leg started by the last open connection
    publish: Option<JoinHandle<()>>,
}

impl Attempt {
    /// Stop the event task and any publish in flight
    fn abort_tasks(&mut self) {
        for task in [self.task.take(), self.publish.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

/// Drives linking attempts end to end
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    connector: Arc<dyn ClientConnector>,
    publisher: Arc<dyn CredentialPublisher>,
    settings: LifecycleSettings,
    attempts: RwLock<HashMap<SessionId, Attempt>>,
    next_generation: AtomicU64,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn ClientConnector>,
        publisher: Arc<dyn CredentialPublisher>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                connector,
                publisher,
                settings,
                attempts: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start (or restart) a linking attempt
    ///
    /// Returns once the code-delivery leg is done; the rest of the lifecycle
    /// continues in the background.
    pub async fn begin(
        &self,
        phone: Option<&str>,
        session_id: SessionId,
        sink: Option<ResponseSink>,
    ) -> LinkResult<()> {
        self.inner.start(phone, session_id, sink, 0).await
    }

    /// Current phase of a session's attempt
    pub async fn phase(&self, session_id: &SessionId) -> Option<AttemptPhase> {
        self.inner
            .attempts
            .read()
            .await
            .get(session_id)
            .map(|a| a.phase)
    }

    /// Sessions with a tracked attempt
    pub async fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.inner.attempts.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// End every live client and stop all attempt tasks
    pub async fn shutdown(&self) {
        let attempts: Vec<_> = self.inner.attempts.write().await.drain().collect();
        for (session_id, mut attempt) in attempts {
            attempt.abort_tasks();
            if attempt.phase != AttemptPhase::Closed {
                attempt.client.end(None).await;
            }
            debug!("Stopped attempt for {}", session_id);
        }
    }
}

impl Inner {
    async fn start(
        self: &Arc<Self>,
        phone: Option<&str>,
        session_id: SessionId,
        mut sink: Option<ResponseSink>,
        reconnects: u32,
    ) -> LinkResult<()> {
        let digits = match phone {
            Some(raw) => {
                let digits = normalize_phone(raw);
                if digits.is_empty() {
                    return Err(LinkError::InvalidPhone(raw.to_string()));
                }
                Some(digits)
            }
            None => None,
        };

        let auth_dir = AuthDir::new(&self.settings.auth_root, &session_id);
        auth_dir.ensure().await?;
        debug!("Auth state for {} in {:?}", session_id, auth_dir.path());

        let mut auth = auth_dir.load().await?;
        if let Some(stored) = self.store.get(&session_id).await? {
            debug!("Resuming stored session {}", session_id);
            auth = stored;
        }

        let Connection { client, events } = self.connector.connect(&session_id, auth).await?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.register(&session_id, generation, client.clone(), reconnects)
            .await;

        let task = tokio::spawn(Arc::clone(self).run_attempt(
            session_id.clone(),
            generation,
            client.clone(),
            events,
        ));
        {
            let mut attempts = self.attempts.write().await;
            match attempts.get_mut(&session_id) {
                Some(attempt) if attempt.generation == generation => attempt.task = Some(task),
                _ => task.abort(),
            }
        }

        if client.is_registered() {
            info!("Session {} is already registered, resuming", session_id);
        } else if let Some(digits) = digits {
            if let Err(e) = self
                .deliver_code(&session_id, client.as_ref(), &digits, sink.as_mut())
                .await
            {
                self.discard(&session_id, generation).await;
                return Err(e);
            }
        } else {
            debug!("No phone number for {}, skipping pairing code", session_id);
        }

        self.advance(&session_id, generation, AttemptPhase::RequestingCode, AttemptPhase::AwaitingLink)
            .await;
        Ok(())
    }

    async fn deliver_code(
        &self,
        session_id: &SessionId,
        client: &dyn LinkClient,
        digits: &str,
        sink: Option<&mut ResponseSink>,
    ) -> LinkResult<()> {
        tokio::time::sleep(self.settings.code_request_delay).await;

        let raw = client.request_pairing_code(digits).await?;
        let reply = PairingReply {
            code: format_pairing_code(&raw),
            session_id: session_id.clone(),
        };
        info!("Pairing code issued for {}", session_id);

        match sink {
            Some(sink) if !sink.is_used() => {
                if !sink.deliver(reply) {
                    debug!("Caller for {} went away before the code arrived", session_id);
                }
            }
            _ => debug!("Response for {} already sent", session_id),
        }
        Ok(())
    }

    /// Track a new attempt, ending whatever attempt held this ID before
    async fn register(
        &self,
        session_id: &SessionId,
        generation: u64,
        client: Arc<dyn LinkClient>,
        reconnects: u32,
    ) {
        let attempt = Attempt {
            generation,
            phase: AttemptPhase::RequestingCode,
            client,
            reconnects,
            task: None,
            publish: None,
        };
        let previous = self
            .attempts
            .write()
            .await
            .insert(session_id.clone(), attempt);

        if let Some(mut previous) = previous {
            previous.abort_tasks();
            if previous.phase != AttemptPhase::Closed {
                warn!("Replacing live attempt for {}", session_id);
                previous
                    .client
                    .end(Some(DisconnectReason::CONNECTION_REPLACED))
                    .await;
            }
        }
    }

    async fn is_current(&self, session_id: &SessionId, generation: u64) -> bool {
        self.attempts
            .read()
            .await
            .get(session_id)
            .is_some_and(|a| a.generation == generation)
    }

    /// Move from `from` to `to` if the attempt is still current and in `from`
    async fn advance(
        &self,
        session_id: &SessionId,
        generation: u64,
        from: AttemptPhase,
        to: AttemptPhase,
    ) {
        let mut attempts = self.attempts.write().await;
        if let Some(attempt) = attempts.get_mut(session_id) {
            if attempt.generation == generation && attempt.phase == from {
                attempt.phase = to;
            }
        }
    }

    /// Mark the attempt closed and stop its publish leg
    async fn mark_closed(&self, session_id: &SessionId, generation: u64) {
        let mut attempts = self.attempts.write().await;
        if let Some(attempt) = attempts.get_mut(session_id) {
            if attempt.generation == generation {
                attempt.phase = AttemptPhase::Closed;
                if let Some(publish) = attempt.publish.take() {
                    debug!("Cancelling publish for {}", session_id);
                    publish.abort();
                }
            }
        }
    }

    async fn reconnects(&self, session_id: &SessionId, generation: u64) -> u32 {
        self.attempts
            .read()
            .await
            .get(session_id)
            .filter(|a| a.generation == generation)
            .map_or(0, |a| a.reconnects)
    }

    /// Forget an attempt if it is still the current one
    async fn remove_if_current(&self, session_id: &SessionId, generation: u64) -> Option<Attempt> {
        let mut attempts = self.attempts.write().await;
        if attempts
            .get(session_id)
            .is_some_and(|a| a.generation == generation)
        {
            attempts.remove(session_id)
        } else {
            None
        }
    }

    /// Tear down an attempt whose code leg failed
    async fn discard(&self, session_id: &SessionId, generation: u64) {
        if let Some(mut attempt) = self.remove_if_current(session_id, generation).await {
            attempt.abort_tasks();
            attempt.client.end(None).await;
        }
    }

    async fn run_attempt(
        self: Arc<Self>,
        session_id: SessionId,
        generation: u64,
        client: Arc<dyn LinkClient>,
        mut events: mpsc::Receiver<ClientEvent>,
    ) {
        let auth_dir = AuthDir::new(&self.settings.auth_root, &session_id);

        while let Some(event) = events.recv().await {
            if !self.is_current(&session_id, generation).await {
                debug!("Dropping event for replaced attempt {}", session_id);
                return;
            }

            match event {
                ClientEvent::CredsUpdate(state) => {
                    self.persist_creds(&session_id, &auth_dir, &state).await;
                }
                ClientEvent::Connection(update) => match update.connection {
                    Some(ConnectionState::Open) => {
                        self.on_open(&session_id, generation, &client).await;
                    }
                    Some(ConnectionState::Close) => {
                        self.on_close(&session_id, generation, client, update.last_disconnect)
                            .await;
                        return;
                    }
                    Some(ConnectionState::Connecting) => {
                        debug!("Session {} connecting", session_id);
                    }
                    None => {}
                },
            }
        }

        if self.is_current(&session_id, generation).await {
            warn!("Event stream for {} ended without a close", session_id);
            self.on_close(&session_id, generation, client, None).await;
        }
    }

    /// Write refreshed creds locally, then upsert the stored record
    async fn persist_creds(&self, session_id: &SessionId, auth_dir: &AuthDir, state: &AuthState) {
        if let Err(e) = auth_dir.save(state).await {
            error!("Failed to write local creds for {}: {}", session_id, e);
        }
        match self.store.save(session_id, state).await {
            Ok(()) => debug!("Stored creds for {}", session_id),
            Err(e) => error!("Failed to store session {}: {}", session_id, e),
        }
    }

    /// Start the publish leg; events keep flowing while it waits
    async fn on_open(
        self: &Arc<Self>,
        session_id: &SessionId,
        generation: u64,
        client: &Arc<dyn LinkClient>,
    ) {
        info!("Connected successfully ({})", session_id);
        let publish = tokio::spawn(Arc::clone(self).publish_linked(session_id.clone(), client.clone()));

        let mut attempts = self.attempts.write().await;
        match attempts.get_mut(session_id) {
            Some(attempt) if attempt.generation == generation => {
                attempt.phase = AttemptPhase::Open;
                attempt.reconnects = 0;
                if let Some(previous) = attempt.publish.replace(publish) {
                    previous.abort();
                }
            }
            _ => publish.abort(),
        }
    }

    /// Wait for creds to settle, publish them and send the pointer home
    async fn publish_linked(self: Arc<Self>, session_id: SessionId, client: Arc<dyn LinkClient>) {
        tokio::time::sleep(self.settings.publish_delay).await;

        let auth_dir = AuthDir::new(&self.settings.auth_root, &session_id);
        let (auth, creds_file) = match (auth_dir.load().await, auth_dir.read_creds().await) {
            (Ok(auth), Ok(Some(creds_file))) => (auth, creds_file),
            (Ok(_), Ok(None)) => {
                error!("No creds written for {}, nothing to publish", session_id);
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Cannot read creds for {}: {}", session_id, e);
                return;
            }
        };

        let pointer = match self.publisher.publish(&session_id, &auth, &creds_file).await {
            Ok(pointer) => pointer,
            Err(e) => {
                error!(
                    "Publishing via {} failed for {}: {}",
                    self.publisher.name(),
                    session_id,
                    e
                );
                return;
            }
        };

        let Some(jid) = client
            .self_id()
            .or_else(|| auth.account_id().map(str::to_string))
        else {
            warn!("No own account ID for {}, pointer not delivered", session_id);
            return;
        };

        match client
            .send_text(&jid, &pointer.message_text(&self.settings.marker))
            .await
        {
            Ok(()) => info!("[Session] Session online ({})", session_id),
            Err(e) => error!("Failed to deliver pointer for {}: {}", session_id, e),
        }
    }

    async fn on_close(
        self: &Arc<Self>,
        session_id: &SessionId,
        generation: u64,
        client: Arc<dyn LinkClient>,
        reason: Option<DisconnectReason>,
    ) {
        self.mark_closed(session_id, generation).await;
        let label = reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!("Connection closed for {}. Reason: {}", session_id, label);

        if let Err(e) = self.store.delete(session_id).await {
            error!("Failed to delete session {}: {}", session_id, e);
        }

        let policy = self.settings.reconnect;
        if reason.is_some_and(|r| r.is_transient()) {
            let attempt = self.reconnects(session_id, generation).await;
            if policy.allows(attempt) {
                info!(
                    "Connection lost, reconnecting {} (attempt {})",
                    session_id,
                    attempt + 1
                );
                self.schedule_reconnect(session_id.clone(), generation, attempt);
                return;
            }
            warn!(
                "Giving up on {} after {} reconnect attempts",
                session_id, attempt
            );
        }

        info!("Disconnected {}! Reason: {}", session_id, label);
        client.end(reason).await;
        if reason == Some(DisconnectReason::LOGGED_OUT) {
            // Logged-out creds can never reconnect
            let auth_dir = AuthDir::new(&self.settings.auth_root, session_id);
            if let Err(e) = auth_dir.remove().await {
                error!("Failed to remove auth state for {}: {}", session_id, e);
            }
        }
        self.remove_if_current(session_id, generation).await;
    }

    /// Restart the attempt after backoff unless something replaced it meanwhile
    fn schedule_reconnect(self: &Arc<Self>, session_id: SessionId, generation: u64, attempt: u32) {
        let inner = Arc::clone(self);
        let delay = self.settings.reconnect.backoff(attempt);
        let reconnect: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            tokio::time::sleep(delay).await;
            if !inner.is_current(&session_id, generation).await {
                debug!("Attempt for {} replaced, skipping reconnect", session_id);
                return;
            }
            if let Err(e) = inner.start(None, session_id.clone(), None, attempt + 1).await {
                error!("Reconnect failed for {}: {}", session_id, e);
                inner.remove_if_current(&session_id, generation).await;
            }
        });
        tokio::spawn(reconnect);
    }
}
