//! Protocol state machine.
//!
//! [`Session`] owns every piece of per-client state (status, subscriptions,
//! collection mirror, method counter, initialization latch, reconnect
//! schedule) and reacts to three kinds of input: socket lifecycle events,
//! inbound text frames and collaborator requests. It never touches the
//! socket; each input returns the [`Effect`]s the connection task must carry
//! out, which keeps the whole protocol testable without a server.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect(valid)──► Connecting ──open──► Connected
//!      ▲                               │                   │
//!      └──────────── close (arm reconnect if enabled) ─────┘
//!
//! any ──connect(invalid) / nosub 403 / failed──► BadConfig (no reconnect)
//! ```

// Rust guideline compliant 2026-02

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;

use super::collection::CollectionStore;
use super::gate::InitializationGate;
use super::method::{MethodInvoker, MethodOutcome};
use super::protocol::{decode, Decoded, DdpMessage, ErrorPayload, Fields};
use super::reconnect::{ArmedReconnect, ReconnectTimer};
use super::subscription::{Subscription, SubscriptionRegistry};
use super::{ConnectionStatus, DdpError};
use crate::config::is_valid_ws_url;
use crate::constants::{CONNECT_TIMEOUT, NORMAL_CLOSURE, RECONNECT_DELAY};

/// A subscription issued automatically after every handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSubscription {
    /// Publication name.
    pub name: String,
    /// Publication arguments.
    pub params: Vec<Value>,
}

/// Behaviour knobs for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Re-open the socket after it closes.
    pub auto_reconnect: bool,
    /// Delay before re-opening.
    pub reconnect_delay: Duration,
    /// Give up on a socket open after this long.
    pub connect_timeout: Duration,
    /// Publication names that must all be ready before the session counts
    /// as initialized.
    pub required: BTreeSet<String>,
    /// Subscriptions issued right after each handshake.
    pub bootstrap: Vec<BootstrapSubscription>,
    /// Log every inbound and outbound frame.
    pub debug_messages: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay: RECONNECT_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
            required: BTreeSet::new(),
            bootstrap: Vec::new(),
            debug_messages: false,
        }
    }
}

/// Work the connection task must perform on behalf of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a socket to this address.
    Open(String),
    /// Write a text frame.
    Send(String),
    /// Close the socket with this code.
    Close(u16),
    /// Start a sleeper for this reconnect, dropping any older one.
    ScheduleReconnect(ArmedReconnect),
    /// Drop the pending sleeper.
    CancelReconnect,
    /// Tell collaborators the status changed.
    StatusChanged(ConnectionStatus),
    /// The required subscriptions just became ready.
    Initialized,
    /// A mirrored document changed after initialization.
    CollectionChanged {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },
    /// A method call was answered.
    MethodResult(MethodOutcome),
}

/// The client's protocol state.
#[derive(Debug)]
pub struct Session {
    options: SessionOptions,
    status: ConnectionStatus,
    address: Option<String>,
    server_session: Option<String>,
    registry: SubscriptionRegistry,
    store: CollectionStore,
    invoker: MethodInvoker,
    gate: InitializationGate,
    timer: ReconnectTimer,
    stopped: bool,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            status: ConnectionStatus::Disconnected,
            address: None,
            server_session: None,
            registry: SubscriptionRegistry::new(),
            store: CollectionStore::new(),
            invoker: MethodInvoker::new(),
            gate: InitializationGate::new(),
            timer: ReconnectTimer::new(),
            stopped: false,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start (or restart) connecting to `address`.
    pub fn connect(&mut self, address: &str) -> Vec<Effect> {
        self.address = Some(address.trim().to_string());
        self.stopped = false;
        self.start()
    }

    fn start(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cancel_reconnect(&mut effects);

        if self.status.has_socket() {
            effects.push(Effect::Close(NORMAL_CLOSURE));
            self.discard_subscriptions();
        }

        match self.address.clone() {
            Some(url) if is_valid_ws_url(&url) => {
                log::info!("[Ddp] Connecting to {}", url);
                self.set_status(ConnectionStatus::Connecting, &mut effects);
                effects.push(Effect::Open(url));
            }
            _ => {
                log::error!("[Ddp] WS URL is not defined or invalid");
                self.set_status(
                    ConnectionStatus::BadConfig("WS URL is not defined or invalid".to_string()),
                    &mut effects,
                );
            }
        }
        effects
    }

    /// The socket opened: handshake and bootstrap subscriptions.
    pub fn on_open(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.status != ConnectionStatus::Connecting {
            log::debug!("[Ddp] Ignoring socket open while {}", self.status);
            return effects;
        }

        // Fresh connection: the server replays every document and call ids
        // only need to be unique per connection.
        self.discard_subscriptions();
        self.store.clear();
        self.invoker.reset();
        self.server_session = None;

        self.set_status(ConnectionStatus::Connected, &mut effects);
        log::debug!("[Ddp] Connection opened");
        self.push_send(&DdpMessage::connect(), &mut effects);

        for bootstrap in self.options.bootstrap.clone() {
            let (sub, message) = self.registry.subscribe(&bootstrap.name, bootstrap.params);
            log::debug!("[Ddp] Subscribing to {} ({})", sub.name, sub.id);
            self.push_send(&message, &mut effects);
        }
        effects
    }

    /// The socket closed or failed to open.
    pub fn on_close(&mut self, reason: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.discard_subscriptions();

        if self.stopped {
            return effects;
        }
        if let ConnectionStatus::BadConfig(_) = self.status {
            log::debug!("[Ddp] Connection closed ({}), staying in bad config", reason);
            return effects;
        }

        log::info!("[Ddp] Connection closed: {}", reason);
        self.set_status(ConnectionStatus::Disconnected, &mut effects);

        if self.options.auto_reconnect {
            let armed = self.timer.arm(self.options.reconnect_delay);
            log::info!("[Ddp] Reconnecting in {}s", armed.delay.as_secs());
            effects.push(Effect::ScheduleReconnect(armed));
        }
        effects
    }

    /// A reconnect sleeper woke up.
    pub fn reconnect_due(&mut self, generation: u64) -> Vec<Effect> {
        if self.stopped || !self.timer.fire(generation) {
            log::trace!("[Ddp] Ignoring stale reconnect {}", generation);
            return Vec::new();
        }
        self.start()
    }

    /// Put the session in [`ConnectionStatus::BadConfig`] without retrying.
    pub fn reject_configuration(&mut self, reason: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cancel_reconnect(&mut effects);
        if self.status.has_socket() {
            effects.push(Effect::Close(NORMAL_CLOSURE));
            self.discard_subscriptions();
        }
        log::error!("[Ddp] Configuration rejected: {}", reason);
        self.set_status(ConnectionStatus::BadConfig(reason.to_string()), &mut effects);
        effects
    }

    /// Explicit stop: close, forget everything, never reschedule.
    pub fn teardown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.stopped = true;
        self.cancel_reconnect(&mut effects);
        if self.status.has_socket() {
            effects.push(Effect::Close(NORMAL_CLOSURE));
        }
        self.discard_subscriptions();
        self.store.clear();
        self.invoker.reset();
        self.server_session = None;
        self.set_status(ConnectionStatus::Disconnected, &mut effects);
        effects
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Decode and apply one inbound text frame.
    pub fn handle_frame(&mut self, text: &str) -> Vec<Effect> {
        if self.options.debug_messages {
            log::debug!("[Ddp] Message received: {}", text);
        }
        match decode(text) {
            Decoded::Message(message) => self.dispatch(message),
            Decoded::Raw(raw) => {
                log::trace!("[Ddp] Ignoring opaque frame: {}", raw);
                Vec::new()
            }
        }
    }

    /// Route a decoded message to its handler.
    pub fn dispatch(&mut self, message: DdpMessage) -> Vec<Effect> {
        match message {
            DdpMessage::Ping { id } => self.on_ping(id),
            DdpMessage::Connected { session } => self.on_connected(session),
            DdpMessage::Failed { version } => self.on_failed(&version),
            DdpMessage::Nosub { id, error } => self.on_nosub(&id, error),
            DdpMessage::Added {
                collection,
                id,
                fields,
            } => self.on_added(collection, id, fields),
            DdpMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => self.on_changed(collection, id, fields, &cleared),
            DdpMessage::Removed { collection, id } => self.on_removed(collection, id),
            DdpMessage::Ready { subs } => self.on_ready(&subs),
            DdpMessage::Result { id, result, error } => self.on_result(&id, result, error),
            DdpMessage::Updated { methods } => {
                log::trace!("[Ddp] Writes visible for calls {:?}", methods);
                Vec::new()
            }
            DdpMessage::Error {
                reason,
                offending_message,
            } => {
                log::warn!(
                    "[Ddp] Server rejected a message: {} ({:?})",
                    reason,
                    offending_message
                );
                Vec::new()
            }
            outbound @ (DdpMessage::Connect { .. }
            | DdpMessage::Pong { .. }
            | DdpMessage::Sub { .. }
            | DdpMessage::Unsub { .. }
            | DdpMessage::Method { .. }) => {
                log::trace!("[Ddp] Ignoring client-only message kind {}", outbound.kind());
                Vec::new()
            }
        }
    }

    fn on_ping(&mut self, id: Option<Value>) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.push_send(&DdpMessage::pong(id), &mut effects);
        effects
    }

    fn on_connected(&mut self, session: String) -> Vec<Effect> {
        log::info!("[Ddp] Handshake accepted (session {})", session);
        self.server_session = Some(session);
        Vec::new()
    }

    fn on_failed(&mut self, version: &str) -> Vec<Effect> {
        self.reject_configuration(&format!("Server requires protocol version {version}"))
    }

    fn on_nosub(&mut self, id: &str, error: Option<ErrorPayload>) -> Vec<Effect> {
        let sub = self.registry.remove(id);
        match error {
            Some(error) if error.is_authorization_failure() => {
                log::debug!("[Ddp] Subscription failed: {}", error.describe());
                let mut effects = Vec::new();
                self.cancel_reconnect(&mut effects);
                self.set_status(
                    ConnectionStatus::BadConfig("API key invalid".to_string()),
                    &mut effects,
                );
                effects
            }
            Some(error) => {
                let rejected = DdpError::SubscriptionRejected {
                    id: id.to_string(),
                    reason: error.describe(),
                };
                log::warn!("[Ddp] {}", rejected);
                Vec::new()
            }
            None => {
                log::debug!(
                    "[Ddp] Subscription {} ended by server ({:?})",
                    id,
                    sub.map(|s| s.name)
                );
                Vec::new()
            }
        }
    }

    fn on_added(&mut self, collection: String, id: String, fields: Fields) -> Vec<Effect> {
        self.store.apply_added(&collection, &id, fields);
        self.collection_changed(collection, id)
    }

    fn on_changed(
        &mut self,
        collection: String,
        id: String,
        fields: Fields,
        cleared: &[String],
    ) -> Vec<Effect> {
        if self.store.apply_changed(&collection, &id, fields, cleared) {
            self.collection_changed(collection, id)
        } else {
            Vec::new()
        }
    }

    fn on_removed(&mut self, collection: String, id: String) -> Vec<Effect> {
        if self.store.apply_removed(&collection, &id) {
            self.collection_changed(collection, id)
        } else {
            Vec::new()
        }
    }

    fn collection_changed(&self, collection: String, id: String) -> Vec<Effect> {
        if self.gate.is_initialized() {
            vec![Effect::CollectionChanged { collection, id }]
        } else {
            Vec::new()
        }
    }

    fn on_ready(&mut self, subs: &[String]) -> Vec<Effect> {
        log::debug!("[Ddp] Subscription ready: {:?}", subs);
        self.registry.mark_ready(subs);
        if self.gate.evaluate(&self.registry, &self.options.required) {
            log::info!("[Ddp] Required subscriptions ready");
            vec![Effect::Initialized]
        } else {
            Vec::new()
        }
    }

    fn on_result(
        &mut self,
        id: &str,
        result: Option<Value>,
        error: Option<ErrorPayload>,
    ) -> Vec<Effect> {
        let outcome = self.invoker.complete(id, result, error);
        if let Err(error) = &outcome.outcome {
            log::warn!(
                "[Ddp] Method {} ({:?}) failed: {}",
                outcome.id,
                outcome.method,
                error.describe()
            );
        }
        vec![Effect::MethodResult(outcome)]
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Register a subscription and return it with the frame to send.
    pub fn subscribe(
        &mut self,
        name: &str,
        params: Vec<Value>,
    ) -> Result<(Subscription, String), DdpError> {
        self.ensure_connected()?;
        let (sub, message) = self.registry.subscribe(name, params);
        Ok((sub, self.encode(&message)))
    }

    /// Drop a subscription and return the frame to send, if it was known.
    pub fn unsubscribe(&mut self, id: &str) -> Result<Option<String>, DdpError> {
        self.ensure_connected()?;
        Ok(self
            .registry
            .unsubscribe(id)
            .map(|message| self.encode(&message)))
    }

    /// Stamp a method call and return its id with the frame to send.
    pub fn invoke(&mut self, method: &str, params: Vec<Value>) -> Result<(u64, String), DdpError> {
        self.ensure_connected()?;
        let (id, message) = self.invoker.invoke(method, params);
        Ok((id, self.encode(&message)))
    }

    fn ensure_connected(&self) -> Result<(), DdpError> {
        if self.status.is_connected() {
            Ok(())
        } else {
            Err(DdpError::NotConnected)
        }
    }

    // ------------------------------------------------------------------
    // Helpers and accessors
    // ------------------------------------------------------------------

    fn encode(&self, message: &DdpMessage) -> String {
        let frame = message.encode();
        if self.options.debug_messages {
            log::debug!("[Ddp] Message sent: {}", frame);
        }
        frame
    }

    fn push_send(&self, message: &DdpMessage, effects: &mut Vec<Effect>) {
        effects.push(Effect::Send(self.encode(message)));
    }

    fn set_status(&mut self, status: ConnectionStatus, effects: &mut Vec<Effect>) {
        if self.status != status {
            self.status = status.clone();
            effects.push(Effect::StatusChanged(status));
        }
    }

    fn cancel_reconnect(&mut self, effects: &mut Vec<Effect>) {
        if self.timer.cancel() {
            effects.push(Effect::CancelReconnect);
        }
    }

    fn discard_subscriptions(&mut self) {
        self.registry.clear();
        self.gate.reset();
    }

    /// Current status.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Address of the last connect request.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Session id assigned by the server for the current connection.
    pub fn server_session(&self) -> Option<&str> {
        self.server_session.as_deref()
    }

    /// Whether the required subscriptions have all been ready.
    pub fn is_initialized(&self) -> bool {
        self.gate.is_initialized()
    }

    /// Collection mirror.
    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    /// Live subscriptions.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Method call bookkeeping.
    pub fn invoker(&self) -> &MethodInvoker {
        &self.invoker
    }

    /// Pending reconnect, if any.
    pub fn pending_reconnect(&self) -> Option<ArmedReconnect> {
        self.timer.armed()
    }

    /// Options the session was built with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}
