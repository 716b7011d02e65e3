//! DDP client core.
//!
//! A persistent publish/subscribe client over one WebSocket: it issues
//! method calls, subscribes to publications and folds `added` / `changed` /
//! `removed` diffs into a local mirror of each collection.
//!
//! # Architecture
//!
//! ```text
//! DdpClient (handle)                         connection task
//!     │  subscribe / invoke_method               │
//!     │  ── lock Session, encode ──► Command ──► │ ── WsWriter ──► server
//!     │                                          │
//!     │  get_document / list_documents           │ ◄── WsReader ── server
//!     │  ── lock Session, read                   │  decode → Session::handle_frame
//!     │                                          │  → effects (send, close,
//!     │  on_status_change / on_ready_transition  │     reconnect, notify)
//!     │  ◄──────────── callbacks ─────────────── │
//! ```
//!
//! [`session::Session`] is the whole protocol state machine and performs no
//! I/O; [`client`] runs its effects against the socket.

// Rust guideline compliant 2026-02

pub mod client;
pub mod collection;
pub mod gate;
pub mod method;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod subscription;

/// Connection status reported to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No socket, none being opened.
    #[default]
    Disconnected,
    /// Socket open in progress.
    Connecting,
    /// Socket open and handshake sent.
    Connected,
    /// Address, credential or protocol version refused; waits for a new
    /// explicit connect.
    BadConfig(String),
}

impl ConnectionStatus {
    /// Whether frames can be sent.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a socket is open or opening.
    pub fn has_socket(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::BadConfig(reason) => write!(f, "bad config: {reason}"),
        }
    }
}

/// Errors surfaced by the DDP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdpError {
    /// Socket-level failure.
    Transport(String),
    /// Frame could not be decoded.
    Decode(String),
    /// The server refused a subscription.
    SubscriptionRejected {
        /// Subscription id.
        id: String,
        /// Server-provided reason.
        reason: String,
    },
    /// Address or credential is unusable.
    Configuration(String),
    /// Outbound call attempted without a connected socket.
    NotConnected,
    /// The connection task has stopped.
    Closed,
}

impl std::fmt::Display for DdpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Decode(msg) => write!(f, "Decode error: {msg}"),
            Self::SubscriptionRejected { id, reason } => {
                write!(f, "Subscription {id} rejected: {reason}")
            }
            Self::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::Closed => write!(f, "Client closed"),
        }
    }
}

impl std::error::Error for DdpError {}

// Re-exports
pub use client::DdpClient;
pub use collection::{CollectionStore, Document};
pub use gate::InitializationGate;
pub use method::{MethodInvoker, MethodOutcome, PendingCall};
pub use protocol::{decode, Decoded, DdpMessage, ErrorPayload, Fields};
pub use reconnect::{ArmedReconnect, ReconnectTimer};
pub use session::{BootstrapSubscription, Effect, Session, SessionOptions};
pub use subscription::{Subscription, SubscriptionRegistry};
