//! Scriptable in-process protocol client
//!
//! Records every call and lets tests inject events into a session's live
//! connection. Cloning a [`MockConnector`] shares its state, so a test can
//! keep one handle while the controller owns another.

use async_trait::async_trait;
use pairgate_core::{AuthState, ClientEvent, DisconnectReason, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{ClientConnector, ClientError, ClientResult, Connection, LinkClient, EVENT_CHANNEL_CAPACITY};

/// A call observed by the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect {
        session_id: SessionId,
        auth: AuthState,
    },
    RequestPairingCode {
        session_id: SessionId,
        phone: String,
    },
    /// Emitted once the (possibly delayed) code has been produced
    CodeIssued {
        session_id: SessionId,
    },
    SendText {
        session_id: SessionId,
        jid: String,
        text: String,
    },
    End {
        session_id: SessionId,
        reason: Option<DisconnectReason>,
    },
}

#[derive(Debug, Clone)]
struct Behavior {
    registered: Option<bool>,
    code: String,
    code_delay: Duration,
    fail_connect: bool,
    fail_code: bool,
    self_id: Option<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            registered: None,
            code: "ABCD1234WXYZ".to_string(),
            code_delay: Duration::ZERO,
            fail_connect: false,
            fail_code: false,
            self_id: Some("15551234567@s.whatsapp.net".to_string()),
        }
    }
}

#[derive(Default)]
struct Shared {
    behavior: Mutex<Behavior>,
    calls: Mutex<Vec<MockCall>>,
    senders: Mutex<HashMap<SessionId, mpsc::Sender<ClientEvent>>>,
}

impl Shared {
    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn behavior(&self) -> Behavior {
        self.behavior.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

/// Connector handing out [`MockClient`]s
#[derive(Clone, Default)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(self, f: impl FnOnce(&mut Behavior)) -> Self {
        if let Ok(mut behavior) = self.shared.behavior.lock() {
            f(&mut behavior);
        }
        self
    }

    /// Raw code returned by `request_pairing_code`
    pub fn with_code(self, code: &str) -> Self {
        let code = code.to_string();
        self.update(|b| b.code = code)
    }

    /// Force the registered flag instead of deriving it from auth state
    pub fn with_registered(self, registered: bool) -> Self {
        self.update(|b| b.registered = Some(registered))
    }

    /// Delay before a pairing code is produced
    pub fn with_code_delay(self, delay: Duration) -> Self {
        self.update(|b| b.code_delay = delay)
    }

    pub fn with_self_id(self, id: Option<&str>) -> Self {
        let id = id.map(str::to_string);
        self.update(|b| b.self_id = id)
    }

    pub fn failing_connect(self) -> Self {
        self.update(|b| b.fail_connect = true)
    }

    pub fn failing_pairing(self) -> Self {
        self.update(|b| b.fail_code = true)
    }

    /// All recorded calls, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of connections built for a session
    pub fn connect_count(&self, session_id: &SessionId) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Connect { session_id: s, .. } if s == session_id))
            .count()
    }

    /// Phone numbers passed to `request_pairing_code`
    pub fn pairing_requests(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::RequestPairingCode { phone, .. } => Some(phone),
                _ => None,
            })
            .collect()
    }

    /// `(jid, text)` pairs sent through any client
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::SendText { jid, text, .. } => Some((jid, text)),
                _ => None,
            })
            .collect()
    }

    /// Whether `end` was called for a session
    pub fn was_ended(&self, session_id: &SessionId) -> bool {
        self.calls()
            .iter()
            .any(|c| matches!(c, MockCall::End { session_id: s, .. } if s == session_id))
    }

    /// Event sender of the session's most recent connection
    ///
    /// Holding on to it keeps a handle to that connection after a newer one
    /// replaces it.
    pub fn event_sender(&self, session_id: &SessionId) -> Option<mpsc::Sender<ClientEvent>> {
        self.shared
            .senders
            .lock()
            .ok()
            .and_then(|s| s.get(session_id).cloned())
    }

    /// Push an event into the session's most recent connection
    ///
    /// Returns false if there is no live receiver.
    pub async fn emit(&self, session_id: &SessionId, event: ClientEvent) -> bool {
        match self.event_sender(session_id) {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ClientConnector for MockConnector {
    async fn connect(&self, session_id: &SessionId, auth: AuthState) -> ClientResult<Connection> {
        self.shared.record(MockCall::Connect {
            session_id: session_id.clone(),
            auth: auth.clone(),
        });

        let behavior = self.shared.behavior();
        if behavior.fail_connect {
            return Err(ClientError::Other("mock connect failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        if let Ok(mut senders) = self.shared.senders.lock() {
            senders.insert(session_id.clone(), tx);
        }

        let client = MockClient {
            shared: self.shared.clone(),
            session_id: session_id.clone(),
            registered: behavior.registered.unwrap_or_else(|| auth.is_registered()),
        };
        Ok(Connection {
            client: Arc::new(client),
            events: rx,
        })
    }
}

/// Client produced by [`MockConnector`]
pub struct MockClient {
    shared: Arc<Shared>,
    session_id: SessionId,
    registered: bool,
}

#[async_trait]
impl LinkClient for MockClient {
    fn is_registered(&self) -> bool {
        self.registered
    }

    fn self_id(&self) -> Option<String> {
        self.shared.behavior().self_id
    }

    async fn request_pairing_code(&self, phone_digits: &str) -> ClientResult<String> {
        self.shared.record(MockCall::RequestPairingCode {
            session_id: self.session_id.clone(),
            phone: phone_digits.to_string(),
        });

        let behavior = self.shared.behavior();
        if !behavior.code_delay.is_zero() {
            tokio::time::sleep(behavior.code_delay).await;
        }
        if behavior.fail_code {
            return Err(ClientError::PairingRejected("mock rejection".to_string()));
        }

        self.shared.record(MockCall::CodeIssued {
            session_id: self.session_id.clone(),
        });
        Ok(behavior.code)
    }

    async fn send_text(&self, jid: &str, text: &str) -> ClientResult<()> {
        self.shared.record(MockCall::SendText {
            session_id: self.session_id.clone(),
            jid: jid.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn end(&self, reason: Option<DisconnectReason>) {
        self.shared.record(MockCall::End {
            session_id: self.session_id.clone(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairgate_core::ConnectionUpdate;

    #[tokio::test]
    async fn test_mock_records_and_emits() {
        let connector = MockConnector::new().with_code("WXYZ0000");
        let id = SessionId::parse("mock-1").unwrap();

        let Connection { client, mut events } =
            connector.connect(&id, AuthState::default()).await.unwrap();
        assert!(!client.is_registered());
        assert_eq!(client.request_pairing_code("123").await.unwrap(), "WXYZ0000");

        let update = ClientEvent::Connection(ConnectionUpdate::open("me@s.whatsapp.net"));
        assert!(connector.emit(&id, update.clone()).await);
        assert_eq!(events.recv().await.unwrap(), update);

        assert_eq!(connector.connect_count(&id), 1);
        assert_eq!(connector.pairing_requests(), vec!["123".to_string()]);
    }

    #[tokio::test]
    async fn test_emit_without_connection() {
        let connector = MockConnector::new();
        let id = SessionId::parse("nobody").unwrap();
        let event = ClientEvent::Connection(ConnectionUpdate::closed(None));
        assert!(!connector.emit(&id, event).await);
    }
}
