//! Connection manager.
//!
//! [`DdpClient`] is the handle collaborators hold. It shares the
//! [`Session`] with a background tokio task that owns the socket: the task
//! feeds socket events and inbound frames into the session and carries out
//! the [`Effect`]s it returns, in order, on a single write path. Reads of
//! the mirror and outbound requests go through the shared session directly.
//!
//! Opening a socket runs alongside the command loop, so a teardown or a new
//! connect abandons a handshake that is still in flight. An open that does
//! not finish within [`SessionOptions::connect_timeout`] counts as a close.
//!
//! Dropping the handle shuts the task down, closing the socket with a normal
//! closure.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::collection::Document;
use super::method::MethodOutcome;
use super::session::{Effect, Session, SessionOptions};
use super::{ConnectionStatus, DdpError};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

type StatusCallback = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;
type ReadyCallback = Arc<dyn Fn() + Send + Sync>;
type CollectionCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
type MethodCallback = Arc<dyn Fn(&MethodOutcome) + Send + Sync>;

/// A WebSocket handshake in flight.
type PendingOpen = Pin<Box<dyn Future<Output = Result<(WsWriter, WsReader)>> + Send>>;

/// Requests from the handle to the connection task.
#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect,
    RejectConfiguration(String),
    Send(String),
    Shutdown,
}

/// Registered collaborator callbacks.
#[derive(Default)]
struct Observers {
    status: Mutex<Vec<StatusCallback>>,
    ready: Mutex<Vec<ReadyCallback>>,
    collection: Mutex<Vec<CollectionCallback>>,
    method: Mutex<Vec<MethodCallback>>,
}

impl Observers {
    /// Callbacks run on a snapshot of the list, so they may register more
    /// callbacks; those first fire on the next notification.
    fn notify(&self, effect: &Effect) {
        match effect {
            Effect::StatusChanged(status) => {
                for callback in snapshot(&self.status) {
                    callback(status);
                }
            }
            Effect::Initialized => {
                for callback in snapshot(&self.ready) {
                    callback();
                }
            }
            Effect::CollectionChanged { collection, id } => {
                for callback in snapshot(&self.collection) {
                    callback(collection, id);
                }
            }
            Effect::MethodResult(outcome) => {
                for callback in snapshot(&self.method) {
                    callback(outcome);
                }
            }
            _ => {}
        }
    }
}

fn snapshot<T: ?Sized>(callbacks: &Mutex<Vec<Arc<T>>>) -> Vec<Arc<T>> {
    lock(callbacks).iter().map(Arc::clone).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a DDP connection.
///
/// Must be created inside a tokio runtime.
pub struct DdpClient {
    session: Arc<Mutex<Session>>,
    command_tx: mpsc::UnboundedSender<Command>,
    observers: Arc<Observers>,
}

impl std::fmt::Debug for DdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdpClient")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl DdpClient {
    /// Spawn the connection task. Nothing is opened until [`connect`](Self::connect).
    pub fn new(options: SessionOptions) -> Self {
        let session = Arc::new(Mutex::new(Session::new(options)));
        let observers = Arc::new(Observers::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();

        let task = ConnectionTask {
            session: Arc::clone(&session),
            observers: Arc::clone(&observers),
            writer: None,
            reader: None,
            opening: None,
            sleeper: None,
            reconnect_tx,
        };
        tokio::spawn(task.run(command_rx, reconnect_rx));

        Self {
            session,
            command_tx,
            observers,
        }
    }

    /// Connect (or reconnect) to `address`.
    ///
    /// An unusable address puts the client in [`ConnectionStatus::BadConfig`].
    pub fn connect(&self, address: &str) -> Result<(), DdpError> {
        self.command(Command::Connect(address.to_string()))
    }

    /// Close the socket and forget all state. The client can connect again.
    pub fn disconnect(&self) -> Result<(), DdpError> {
        self.command(Command::Disconnect)
    }

    /// Refuse the current configuration: close and stay in
    /// [`ConnectionStatus::BadConfig`] until the next [`connect`](Self::connect).
    pub fn reject_configuration(&self, reason: &str) -> Result<(), DdpError> {
        self.command(Command::RejectConfiguration(reason.to_string()))
    }

    /// Subscribe to a publication. Returns the subscription id.
    pub fn subscribe(&self, name: &str, params: Vec<Value>) -> Result<String, DdpError> {
        let (sub, frame) = lock(&self.session).subscribe(name, params)?;
        self.command(Command::Send(frame))?;
        Ok(sub.id)
    }

    /// Cancel a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &str) -> Result<(), DdpError> {
        let frame = lock(&self.session).unsubscribe(id)?;
        match frame {
            Some(frame) => self.command(Command::Send(frame)),
            None => Ok(()),
        }
    }

    /// Call a remote method. Returns the call id; the outcome arrives
    /// through [`on_method_result`](Self::on_method_result).
    pub fn invoke_method(&self, method: &str, params: Vec<Value>) -> Result<u64, DdpError> {
        let (id, frame) = lock(&self.session).invoke(method, params)?;
        self.command(Command::Send(frame))?;
        Ok(id)
    }

    /// Snapshot of one mirrored document.
    pub fn get_document(&self, collection: &str, id: &str) -> Option<Document> {
        lock(&self.session).store().get(collection, id).cloned()
    }

    /// Snapshot of a mirrored collection, ordered by id.
    pub fn list_documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.session)
            .store()
            .list(collection)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        lock(&self.session).status().clone()
    }

    /// Whether the required subscriptions have all been ready.
    pub fn is_initialized(&self) -> bool {
        lock(&self.session).is_initialized()
    }

    /// Run `f` against the session while holding its lock.
    pub fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&lock(&self.session))
    }

    /// Called on every status change.
    pub fn on_status_change(&self, callback: impl Fn(&ConnectionStatus) + Send + Sync + 'static) {
        lock(&self.observers.status).push(Arc::new(callback));
    }

    /// Called once per connection when the required subscriptions are ready.
    pub fn on_ready_transition(&self, callback: impl Fn() + Send + Sync + 'static) {
        lock(&self.observers.ready).push(Arc::new(callback));
    }

    /// Called with `(collection, id)` for each document change after
    /// initialization.
    pub fn on_collection_change(&self, callback: impl Fn(&str, &str) + Send + Sync + 'static) {
        lock(&self.observers.collection).push(Arc::new(callback));
    }

    /// Called when a method call is answered.
    pub fn on_method_result(&self, callback: impl Fn(&MethodOutcome) + Send + Sync + 'static) {
        lock(&self.observers.method).push(Arc::new(callback));
    }

    /// Stop the connection task.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    fn command(&self, command: Command) -> Result<(), DdpError> {
        self.command_tx.send(command).map_err(|_| DdpError::Closed)
    }
}

impl Drop for DdpClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the background task.
struct ConnectionTask {
    session: Arc<Mutex<Session>>,
    observers: Arc<Observers>,
    writer: Option<WsWriter>,
    reader: Option<WsReader>,
    opening: Option<PendingOpen>,
    sleeper: Option<JoinHandle<()>>,
    reconnect_tx: mpsc::UnboundedSender<u64>,
}

impl ConnectionTask {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut reconnect_rx: mpsc::UnboundedReceiver<u64>,
    ) {
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        self.stop().await;
                        break;
                    };
                    match command {
                        Command::Connect(address) => {
                            let effects = self.session().connect(&address);
                            self.execute(effects).await;
                        }
                        Command::Disconnect => {
                            let effects = self.session().teardown();
                            self.execute(effects).await;
                        }
                        Command::RejectConfiguration(reason) => {
                            let effects = self.session().reject_configuration(&reason);
                            self.execute(effects).await;
                        }
                        Command::Send(frame) => {
                            self.execute(vec![Effect::Send(frame)]).await;
                        }
                        Command::Shutdown => {
                            log::info!("[DdpClient] Shutdown requested, closing connection");
                            self.stop().await;
                            break;
                        }
                    }
                }

                opened = next_open(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(opened).await;
                }

                message = next_message(&mut self.reader) => {
                    self.on_message(message).await;
                }

                Some(generation) = reconnect_rx.recv() => {
                    let effects = self.session().reconnect_due(generation);
                    self.execute(effects).await;
                }
            }
        }
        log::debug!("[DdpClient] Connection task exited");
    }

    async fn stop(&mut self) {
        let effects = self.session().teardown();
        self.execute(effects).await;
    }

    async fn on_opened(&mut self, opened: Result<(WsWriter, WsReader)>) {
        let effects = match opened {
            Ok((writer, reader)) => {
                log::info!("[DdpClient] WebSocket connected");
                self.writer = Some(writer);
                self.reader = Some(reader);
                self.session().on_open()
            }
            Err(e) => {
                let error = DdpError::Transport(format!("{e:#}"));
                log::warn!("[DdpClient] {}", error);
                self.session().on_close(&error.to_string())
            }
        };
        self.execute(effects).await;
    }

    async fn on_message(&mut self, message: Option<Result<WsMessage>>) {
        match message {
            Some(Ok(WsMessage::Ping(data))) => {
                if let Some(writer) = self.writer.as_mut() {
                    if let Err(e) = writer.send_pong(data).await {
                        log::debug!("[DdpClient] Failed to answer transport ping: {}", e);
                    }
                }
            }
            Some(Ok(WsMessage::Binary(data))) => {
                log::trace!("[DdpClient] Ignoring {} byte binary frame", data.len());
            }
            other => {
                let effects = self.apply_message(other);
                self.execute(effects).await;
            }
        }
    }

    fn apply_message(&mut self, message: Option<Result<WsMessage>>) -> Vec<Effect> {
        match message {
            Some(Ok(WsMessage::Text(text))) => self.session().handle_frame(&text),
            Some(Ok(WsMessage::Close { code, reason })) => {
                log::info!("[DdpClient] Connection closed by server ({})", code);
                self.drop_socket();
                self.session().on_close(&format!("code {code} {reason}"))
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Binary(_))) => Vec::new(),
            Some(Err(e)) => {
                log::warn!("[DdpClient] WebSocket error: {}", e);
                self.drop_socket();
                self.session().on_close(&e.to_string())
            }
            None => {
                log::info!("[DdpClient] WebSocket stream ended");
                self.drop_socket();
                self.session().on_close("stream ended")
            }
        }
    }

    /// Carry out effects in order, including those produced along the way.
    async fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Open(url) => {
                    let timeout = self.session().options().connect_timeout;
                    self.opening = Some(Box::pin(open_socket(url, timeout)));
                }
                Effect::Send(frame) => {
                    let Some(writer) = self.writer.as_mut() else {
                        log::debug!("[DdpClient] No socket, dropping outbound frame");
                        continue;
                    };
                    if let Err(e) = writer.send_text(&frame).await {
                        log::warn!("[DdpClient] Failed to send frame: {}", e);
                        self.drop_socket();
                        queue.extend(self.session().on_close(&e.to_string()));
                    }
                }
                Effect::Close(code) => {
                    if self.opening.take().is_some() {
                        log::debug!("[DdpClient] Abandoning WebSocket open");
                    }
                    if let Some(mut writer) = self.writer.take() {
                        if let Err(e) = writer.close_with(code).await {
                            log::debug!("[DdpClient] Close handshake failed: {}", e);
                        }
                    }
                    self.reader = None;
                }
                Effect::ScheduleReconnect(armed) => {
                    self.abort_sleeper();
                    let reconnect_tx = self.reconnect_tx.clone();
                    self.sleeper = Some(tokio::spawn(async move {
                        tokio::time::sleep(armed.delay).await;
                        let _ = reconnect_tx.send(armed.generation);
                    }));
                }
                Effect::CancelReconnect => self.abort_sleeper(),
                notification => self.observers.notify(&notification),
            }
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    fn drop_socket(&mut self) {
        self.writer = None;
        self.reader = None;
    }

    fn abort_sleeper(&mut self) {
        if let Some(sleeper) = self.sleeper.take() {
            sleeper.abort();
        }
    }
}

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.abort_sleeper();
    }
}

/// Open a socket, failing after `timeout`.
async fn open_socket(url: String, timeout: Duration) -> Result<(WsWriter, WsReader)> {
    tokio::time::timeout(timeout, ws::connect(&url))
        .await
        .with_context(|| format!("WebSocket open timed out after {}ms", timeout.as_millis()))?
}

/// Outcome of the handshake in flight, or never when none is.
async fn next_open(opening: &mut Option<PendingOpen>) -> Result<(WsWriter, WsReader)> {
    match opening {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

/// Next transport message, or never when no socket is open.
async fn next_message(reader: &mut Option<WsReader>) -> Option<Result<WsMessage>> {
    match reader {
        Some(reader) => reader.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_status(rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>) -> ConnectionStatus {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("status change within timeout")
            .expect("status channel open")
    }

    /// Accepts TCP connections and never answers the WebSocket upgrade.
    async fn stalled_server() -> (String, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("ws://127.0.0.1:{}/websocket", listener.local_addr().unwrap().port());
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (address, server)
    }

    fn watch_status(client: &DdpClient) -> mpsc::UnboundedReceiver<ConnectionStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on_status_change(move |status| {
            let _ = tx.send(status.clone());
        });
        rx
    }

    #[tokio::test]
    async fn test_disconnect_abandons_stalled_open() {
        let (address, server) = stalled_server().await;
        let client = DdpClient::new(SessionOptions::default());
        let mut rx = watch_status(&client);

        client.connect(&address).unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.disconnect().unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.with_session(|s| s.pending_reconnect().is_none()));

        server.abort();
    }

    #[tokio::test]
    async fn test_stalled_open_times_out_and_schedules_reconnect() {
        let (address, server) = stalled_server().await;
        let client = DdpClient::new(SessionOptions {
            connect_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_secs(60),
            ..SessionOptions::default()
        });
        let mut rx = watch_status(&client);

        client.connect(&address).unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);
        assert!(client.with_session(|s| s.pending_reconnect().is_some()));

        server.abort();
    }

    #[tokio::test]
    async fn test_new_connect_replaces_stalled_open() {
        let (address, server) = stalled_server().await;
        let client = DdpClient::new(SessionOptions::default());
        let mut rx = watch_status(&client);

        client.connect(&address).unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);

        client.connect("not a url").unwrap();
        assert!(matches!(next_status(&mut rx).await, ConnectionStatus::BadConfig(_)));

        server.abort();
    }

    #[tokio::test]
    async fn test_callback_can_register_callbacks() {
        let client = Arc::new(DdpClient::new(SessionOptions::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&client);
        client.on_status_change(move |_| {
            let tx = tx.clone();
            inner.on_status_change(move |status| {
                let _ = tx.send(status.clone());
            });
        });

        // First change only registers the inner callback.
        client.connect("http://not-a-socket").unwrap();
        client.connect("ws://127.0.0.1:1/websocket").unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_invalid_address_reports_bad_config() {
        let client = DdpClient::new(SessionOptions::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on_status_change(move |status| {
            let _ = tx.send(status.clone());
        });

        client.connect("http://not-a-socket").unwrap();
        assert!(matches!(next_status(&mut rx).await, ConnectionStatus::BadConfig(_)));
        assert!(matches!(client.status(), ConnectionStatus::BadConfig(_)));
    }

    #[tokio::test]
    async fn test_outbound_calls_fail_when_disconnected() {
        let client = DdpClient::new(SessionOptions::default());
        assert_eq!(client.invoke_method("m", Vec::new()), Err(DdpError::NotConnected));
        assert_eq!(client.subscribe("rooms", Vec::new()), Err(DdpError::NotConnected));
        assert!(client.list_documents("rooms").is_empty());
        assert!(client.get_document("rooms", "r1").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_schedules_reconnect() {
        let client = DdpClient::new(SessionOptions::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on_status_change(move |status| {
            let _ = tx.send(status.clone());
        });

        client.connect("ws://127.0.0.1:1/websocket").unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);
        assert!(client.with_session(|s| s.pending_reconnect().is_some()));

        client.disconnect().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.with_session(|s| s.pending_reconnect().is_some()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reconnect cancelled");
    }
}
