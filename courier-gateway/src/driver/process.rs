//! Process-backed messaging client.
//!
//! Each session runs its own bridge process. The bridge reads requests from
//! stdin and writes responses and events to stdout, one JSON document per
//! line:
//!
//! ```text
//! -> {"id":1,"method":"getChats","params":null}
//! <- {"id":1,"result":[...]}
//! <- {"id":2,"error":"not found"}
//! <- {"event":"qr","qr":"2@..."}
//! <- {"event":"ready"}
//! ```
//!
//! The bridge learns its session from `COURIER_SESSION_ID` and, when
//! credentials are persisted, where to keep them from `COURIER_SESSION_DIR`.

use async_trait::async_trait;
use courier::client::{
    AuthStrategy, ClientFactory, ClientRequest, DestroyOptions, InitContext, MessagingClient,
};
use courier::error::{AdapterError, AdapterResult};
use courier::events::{ClientEvent, EventSender};
use courier::id::SessionId;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Environment variable carrying the session id to the bridge.
pub const ENV_SESSION_ID: &str = "COURIER_SESSION_ID";

/// Environment variable carrying the credential directory to the bridge.
pub const ENV_SESSION_DIR: &str = "COURIER_SESSION_DIR";

/// How long the bridge gets to exit on its own during destroy.
const EXIT_GRACE: Duration = Duration::from_secs(3);

/// Bridge launch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Bridge executable.
    pub command: String,
    /// Arguments passed to the bridge.
    pub args: Vec<String>,
    /// Deadline for each request.
    pub request_timeout: Duration,
}

impl ProcessConfig {
    /// Create a config for `command` with default timeout.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Add an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// A line written by the bridge.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeLine {
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event(BridgeEvent),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        qr: String,
    },
    PageReady,
    Authenticated,
    Ready,
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Message {
        #[serde(default)]
        data: Value,
    },
}

type Reply = Result<Value, String>;

/// State shared with the stdout reader task.
#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    closing: AtomicBool,
    bootstrap: Mutex<Value>,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, id: u64, reply: Reply) {
        match self.pending().remove(&id) {
            // The caller may have timed out meanwhile.
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(id, "response for unknown request"),
        }
    }

    fn fail_pending(&self) {
        self.pending().clear();
    }

    fn on_event(&self, event: BridgeEvent, events: &EventSender) {
        let event = match event {
            BridgeEvent::PageReady => {
                *self.bootstrap.lock().unwrap_or_else(PoisonError::into_inner) =
                    json!({ "page": { "ready": true } });
                return;
            }
            BridgeEvent::Qr { qr } => ClientEvent::Qr { code: qr },
            BridgeEvent::Authenticated => ClientEvent::Authenticated,
            BridgeEvent::Ready => {
                self.connected.store(true, Ordering::SeqCst);
                ClientEvent::Ready
            }
            BridgeEvent::AuthFailure { reason } => {
                self.connected.store(false, Ordering::SeqCst);
                ClientEvent::AuthFailure { reason }
            }
            BridgeEvent::Disconnected { reason } => {
                self.connected.store(false, Ordering::SeqCst);
                ClientEvent::Disconnected { reason }
            }
            BridgeEvent::Message { data } => ClientEvent::Message { payload: data },
        };
        events.emit(event);
    }
}

async fn read_loop<R>(shared: Arc<Shared>, stdout: R, events: EventSender)
where
    R: AsyncBufRead + Unpin,
{
    let session_id = events.session_id().clone();
    let mut lines = stdout.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str::<BridgeLine>(&line) {
                Ok(BridgeLine::Response { id, result, error }) => {
                    shared.resolve(id, error.map_or(Ok(result), Err));
                }
                Ok(BridgeLine::Event(event)) => shared.on_event(event, &events),
                Err(e) => warn!(session_id = %session_id, error = %e, "unparseable bridge output"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to read bridge output");
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.fail_pending();
    if !shared.closing.load(Ordering::SeqCst) {
        warn!(session_id = %session_id, "bridge exited");
        events.emit(ClientEvent::Disconnected {
            reason: "bridge exited".to_string(),
        });
    }
}

/// Messaging client driving a bridge process.
#[derive(Debug)]
pub struct ProcessClient {
    session_id: SessionId,
    auth: AuthStrategy,
    config: ProcessConfig,
    shared: Arc<Shared>,
    /// Held for the whole of start-up and shutdown so they never interleave.
    lifecycle: tokio::sync::Mutex<()>,
    child: tokio::sync::Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessClient {
    /// Create a client. The bridge is started by `initialize`.
    #[must_use]
    pub fn new(session_id: SessionId, auth: AuthStrategy, config: ProcessConfig) -> Self {
        Self {
            session_id,
            auth,
            config,
            shared: Arc::new(Shared::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            child: tokio::sync::Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    async fn request(&self, method: &str, params: Value) -> AdapterResult<Value> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);

        let line = json!({ "id": id, "method": method, "params": params });
        if let Err(e) = self.write_line(&line).await {
            self.shared.pending().remove(&id);
            return Err(e);
        }

        match timeout(self.config.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(AdapterError::request(message)),
            Ok(Err(_)) => Err(AdapterError::Closed),
            Err(_) => {
                self.shared.pending().remove(&id);
                Err(AdapterError::Timeout(self.config.request_timeout))
            }
        }
    }

    async fn write_line(&self, line: &Value) -> AdapterResult<()> {
        let mut bytes = serde_json::to_vec(line)?;
        bytes.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(AdapterError::Closed)?;
        stdin.write_all(&bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn stop_bridge(&self) -> AdapterResult<()> {
        self.shared.closing.store(true, Ordering::SeqCst);
        let _lifecycle = self.lifecycle.lock().await;

        if self.stdin.lock().await.is_some() {
            let grace = self.config.request_timeout.min(EXIT_GRACE);
            match timeout(grace, self.request("destroy", Value::Null)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(session_id = %self.session_id, error = %e, "bridge rejected destroy"),
                Err(_) => debug!(session_id = %self.session_id, "bridge did not acknowledge destroy"),
            }
        }
        // Closing stdin tells the bridge to exit.
        drop(self.stdin.lock().await.take());

        if let Some(mut child) = self.child.lock().await.take() {
            match timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(session_id = %self.session_id, %status, "bridge exited"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(session_id = %self.session_id, "bridge did not exit, killing it");
                    child.kill().await?;
                }
            }
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.fail_pending();
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for ProcessClient {
    async fn initialize(&self, ctx: InitContext) -> AdapterResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env(ENV_SESSION_ID, self.session_id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = self.auth.data_dir() {
            tokio::fs::create_dir_all(dir).await?;
            command.env(ENV_SESSION_DIR, dir);
        }

        let mut child = command.spawn().map_err(|e| {
            AdapterError::unavailable(format!("failed to start {}: {e}", self.config.command))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::unavailable("bridge stdout not captured"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::unavailable("bridge stdin not captured"))?;
        info!(session_id = %self.session_id, pid = ?child.id(), "bridge started");

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            BufReader::new(stdout),
            ctx.events,
        ));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn inspect(&self) -> Value {
        self.shared
            .bootstrap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn logout(&self) -> AdapterResult<()> {
        self.request("logout", Value::Null).await?;
        self.shared.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self, options: DestroyOptions) -> AdapterResult<()> {
        self.stop_bridge().await?;

        if options.purge_credentials {
            if let Some(dir) = self.auth.data_dir() {
                match tokio::fs::remove_dir_all(dir).await {
                    Ok(()) => debug!(session_id = %self.session_id, dir = %dir.display(), "credentials removed"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    async fn call(&self, request: ClientRequest) -> AdapterResult<Value> {
        let method = request.method();
        let mut value = serde_json::to_value(&request)?;
        let params = value
            .get_mut("params")
            .map_or(Value::Null, Value::take);
        self.request(method, params).await
    }
}

/// Builds one [`ProcessClient`] per session.
#[derive(Debug, Clone)]
pub struct ProcessClientFactory {
    config: ProcessConfig,
}

impl ProcessClientFactory {
    /// Create a factory launching bridges with `config`.
    #[must_use]
    pub const fn new(config: ProcessConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for ProcessClientFactory {
    fn create(
        &self,
        id: &SessionId,
        auth: &AuthStrategy,
    ) -> AdapterResult<Arc<dyn MessagingClient>> {
        if self.config.command.trim().is_empty() {
            return Err(AdapterError::unavailable("no bridge command configured"));
        }
        Ok(Arc::new(ProcessClient::new(
            id.clone(),
            auth.clone(),
            self.config.clone(),
        )))
    }
}
