//! In-memory messaging client.
//!
//! [`MemoryClient`] never talks to a network. It replays a scripted event
//! sequence on initialization and answers capability requests with canned
//! data, which makes it useful for tests and for running the gateway
//! without an external client.

use crate::client::{
    AuthStrategy, ClientFactory, ClientRequest, DestroyOptions, InitContext, MessageContent,
    MessagingClient,
};
use crate::error::{AdapterError, AdapterResult};
use crate::events::{ClientEvent, EventSender};
use crate::id::SessionId;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// How [`MemoryClient::destroy`] behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DestroyBehavior {
    /// Succeed immediately.
    #[default]
    Succeed,
    /// Fail with a request error.
    Fail,
    /// Never complete.
    Hang,
}

#[derive(Debug, Default)]
struct State {
    events: Option<EventSender>,
    initialized: bool,
    connected: bool,
    logout_calls: usize,
    destroy_calls: usize,
    purged: bool,
    requests: Vec<ClientRequest>,
}

/// A client living entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryClient {
    script: Vec<ClientEvent>,
    fail_logout: bool,
    destroy_behavior: DestroyBehavior,
    state: Mutex<State>,
}

impl MemoryClient {
    /// Create a client that emits nothing on its own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client that emits `script` as soon as it is initialized.
    #[must_use]
    pub fn with_script(script: Vec<ClientEvent>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Make every logout fail.
    #[must_use]
    pub const fn with_failing_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    /// Set how destroy behaves.
    #[must_use]
    pub const fn with_destroy_behavior(mut self, behavior: DestroyBehavior) -> Self {
        self.destroy_behavior = behavior;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an event as if the external service produced it.
    ///
    /// Returns `false` if the client is not initialized or already torn down.
    pub fn emit(&self, event: ClientEvent) -> bool {
        let mut state = self.state();
        match &event {
            ClientEvent::Ready => state.connected = true,
            ClientEvent::AuthFailure { .. } | ClientEvent::Disconnected { .. } => {
                state.connected = false;
            }
            _ => {}
        }
        state.events.as_ref().is_some_and(|tx| tx.emit(event))
    }

    /// Flip the connection flag without emitting an event.
    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    /// Number of logout attempts.
    #[must_use]
    pub fn logout_calls(&self) -> usize {
        self.state().logout_calls
    }

    /// Number of destroy calls.
    #[must_use]
    pub fn destroy_calls(&self) -> usize {
        self.state().destroy_calls
    }

    /// Whether the last destroy asked for credential removal.
    #[must_use]
    pub fn purged(&self) -> bool {
        self.state().purged
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ClientRequest> {
        self.state().requests.clone()
    }
}

#[async_trait]
impl MessagingClient for MemoryClient {
    async fn initialize(&self, ctx: InitContext) -> AdapterResult<()> {
        {
            let mut state = self.state();
            if state.destroy_calls > 0 {
                return Err(AdapterError::Closed);
            }
            state.initialized = true;
            state.events = Some(ctx.events);
        }
        debug!(session_id = %ctx.session_id, events = self.script.len(), "memory client initialized");
        for event in &self.script {
            self.emit(event.clone());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn inspect(&self) -> Value {
        let state = self.state();
        if state.initialized {
            json!({ "page": { "connected": state.connected } })
        } else {
            Value::Null
        }
    }

    async fn logout(&self) -> AdapterResult<()> {
        let mut state = self.state();
        state.logout_calls += 1;
        if self.fail_logout {
            return Err(AdapterError::request("logout rejected"));
        }
        state.connected = false;
        Ok(())
    }

    async fn destroy(&self, options: DestroyOptions) -> AdapterResult<()> {
        {
            let mut state = self.state();
            state.destroy_calls += 1;
            state.purged = options.purge_credentials;
            state.connected = false;
            state.events = None;
        }
        match self.destroy_behavior {
            DestroyBehavior::Succeed => Ok(()),
            DestroyBehavior::Fail => Err(AdapterError::request("destroy rejected")),
            DestroyBehavior::Hang => std::future::pending().await,
        }
    }

    async fn call(&self, request: ClientRequest) -> AdapterResult<Value> {
        let mut state = self.state();
        if state.destroy_calls > 0 {
            return Err(AdapterError::Closed);
        }
        let response = match &request {
            ClientRequest::Info => json!({ "pushname": "courier", "platform": "memory" }),
            ClientRequest::SendMessage {
                chat_id, content, ..
            } => {
                let kind = match content {
                    MessageContent::Text { .. } => "chat",
                    MessageContent::Media(_) | MessageContent::MediaFromUrl { .. } => "media",
                };
                json!({
                    "id": uuid::Uuid::new_v4().to_string(),
                    "to": chat_id,
                    "type": kind,
                })
            }
            ClientRequest::IsRegisteredUser { id } => json!(!id.is_empty()),
            ClientRequest::CreateGroup { name, participants } => json!({
                "gid": format!("{}@g.us", uuid::Uuid::new_v4().simple()),
                "title": name,
                "participants": participants,
            }),
            ClientRequest::SetStatus { .. } => json!(true),
            ClientRequest::GetContacts | ClientRequest::GetChats => json!([]),
            ClientRequest::GetProfilePicUrl { .. } => Value::Null,
        };
        state.requests.push(request);
        Ok(response)
    }
}

#[derive(Debug)]
struct Tracked {
    created: usize,
    latest: Arc<MemoryClient>,
}

/// Builds [`MemoryClient`]s.
///
/// Unless tracking is turned off, the latest client of each session id is
/// kept reachable for inspection, together with a creation count.
#[derive(Debug, Clone)]
pub struct MemoryClientFactory {
    script: Vec<ClientEvent>,
    fail_logout: bool,
    destroy_behavior: HashMap<String, DestroyBehavior>,
    track: bool,
    clients: Arc<Mutex<HashMap<SessionId, Tracked>>>,
}

impl Default for MemoryClientFactory {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            fail_logout: false,
            destroy_behavior: HashMap::new(),
            track: true,
            clients: Arc::default(),
        }
    }
}

impl MemoryClientFactory {
    /// Create a factory whose clients emit nothing on their own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose clients replay `script` on initialization.
    #[must_use]
    pub fn with_script(script: Vec<ClientEvent>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Factory whose clients become ready without a QR scan.
    #[must_use]
    pub fn auto_ready() -> Self {
        Self::with_script(vec![ClientEvent::Authenticated, ClientEvent::Ready])
    }

    /// Make every client's logout fail.
    #[must_use]
    pub const fn with_failing_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    /// Make destroy of the clients for `id` fail.
    #[must_use]
    pub fn with_failing_destroy(mut self, id: &str) -> Self {
        self.destroy_behavior.insert(id.to_string(), DestroyBehavior::Fail);
        self
    }

    /// Make destroy of the clients for `id` never complete.
    #[must_use]
    pub fn with_hanging_destroy(mut self, id: &str) -> Self {
        self.destroy_behavior.insert(id.to_string(), DestroyBehavior::Hang);
        self
    }

    /// Keep no references to created clients.
    #[must_use]
    pub fn without_tracking(mut self) -> Self {
        self.track = false;
        self
    }

    fn tracked(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Tracked>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recently created client for `id`.
    #[must_use]
    pub fn client(&self, id: &str) -> Option<Arc<MemoryClient>> {
        let id = SessionId::parse(id).ok()?;
        self.tracked().get(&id).map(|t| Arc::clone(&t.latest))
    }

    /// Number of clients created for `id`.
    #[must_use]
    pub fn created_count(&self, id: &str) -> usize {
        SessionId::parse(id)
            .ok()
            .and_then(|id| self.tracked().get(&id).map(|t| t.created))
            .unwrap_or_default()
    }
}

impl ClientFactory for MemoryClientFactory {
    fn create(
        &self,
        id: &SessionId,
        _auth: &AuthStrategy,
    ) -> AdapterResult<Arc<dyn MessagingClient>> {
        let behavior = self
            .destroy_behavior
            .get(id.as_str())
            .copied()
            .unwrap_or_default();
        let mut client = MemoryClient::with_script(self.script.clone()).with_destroy_behavior(behavior);
        if self.fail_logout {
            client = client.with_failing_logout();
        }
        let client = Arc::new(client);
        if self.track {
            let mut tracked = self.tracked();
            match tracked.get_mut(id) {
                Some(entry) => {
                    entry.created += 1;
                    entry.latest = Arc::clone(&client);
                }
                None => {
                    tracked.insert(
                        id.clone(),
                        Tracked {
                            created: 1,
                            latest: Arc::clone(&client),
                        },
                    );
                }
            }
        }
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    fn ctx(id: &str) -> (InitContext, tokio::sync::mpsc::UnboundedReceiver<ClientEvent>) {
        let id = SessionId::parse(id).unwrap();
        let (events, rx) = event_channel(id.clone());
        let ctx = InitContext {
            session_id: id,
            auth: AuthStrategy::None,
            events,
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_script_replayed_on_initialize() {
        let client = MemoryClient::with_script(vec![ClientEvent::Ready]);
        assert!(client.inspect().is_null());

        let (ctx, mut rx) = ctx("alice");
        client.initialize(ctx).await.unwrap();
        assert_eq!(rx.recv().await, Some(ClientEvent::Ready));
        assert!(client.is_connected());
        assert_eq!(client.inspect()["page"]["connected"], true);
    }

    #[tokio::test]
    async fn test_destroy_closes_events() {
        let client = MemoryClient::new();
        let (ctx, mut rx) = ctx("alice");
        client.initialize(ctx).await.unwrap();

        client
            .destroy(DestroyOptions {
                purge_credentials: true,
            })
            .await
            .unwrap();
        assert!(client.purged());
        assert!(rx.recv().await.is_none());
        assert!(!client.emit(ClientEvent::Ready));
        assert!(matches!(
            client.call(ClientRequest::GetChats).await,
            Err(AdapterError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_failing_logout() {
        let client = MemoryClient::new().with_failing_logout();
        assert!(client.logout().await.is_err());
        assert_eq!(client.logout_calls(), 1);
    }

    #[tokio::test]
    async fn test_send_message_records_request() {
        let client = MemoryClient::new();
        let response = client
            .call(ClientRequest::SendMessage {
                chat_id: "123@c.us".to_string(),
                content: MessageContent::Text {
                    body: "hi".to_string(),
                },
                options: Value::Null,
            })
            .await
            .unwrap();
        assert_eq!(response["to"], "123@c.us");
        assert_eq!(response["type"], "chat");
        assert_eq!(client.requests().len(), 1);
    }

    #[test]
    fn test_factory_tracks_clients() {
        let factory = MemoryClientFactory::new();
        let id = SessionId::parse("alice").unwrap();
        factory.create(&id, &AuthStrategy::None).unwrap();
        let latest = factory.create(&id, &AuthStrategy::None).unwrap();
        assert_eq!(factory.created_count("alice"), 2);
        assert_eq!(factory.created_count("bob"), 0);

        // Only the newest client stays referenced.
        let tracked = factory.client("alice").unwrap();
        assert!(std::ptr::addr_eq(Arc::as_ptr(&tracked), Arc::as_ptr(&latest)));
        assert_eq!(Arc::strong_count(&tracked), 3);
    }

    #[test]
    fn test_untracked_factory_keeps_nothing() {
        let factory = MemoryClientFactory::auto_ready().without_tracking();
        let id = SessionId::parse("alice").unwrap();
        let client = factory.create(&id, &AuthStrategy::None).unwrap();
        assert_eq!(Arc::strong_count(&client), 1);
        assert!(factory.client("alice").is_none());
        assert_eq!(factory.created_count("alice"), 0);
    }

    #[tokio::test]
    async fn test_destroy_behaviors() {
        let client = MemoryClient::new().with_destroy_behavior(DestroyBehavior::Fail);
        assert!(client.destroy(DestroyOptions::default()).await.is_err());
        assert_eq!(client.destroy_calls(), 1);

        let client = MemoryClient::new().with_destroy_behavior(DestroyBehavior::Hang);
        let hung = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            client.destroy(DestroyOptions::default()),
        )
        .await;
        assert!(hung.is_err());
        assert_eq!(client.destroy_calls(), 1);
    }
}
