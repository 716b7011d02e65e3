//! CueGO DDP client.
//!
//! This crate keeps a persistent WebSocket connection to a CueGO server
//! speaking DDP, mirrors the user's workspaces locally and exposes the
//! workspace controls (status changes, next-cue triggers).
//!
//! # Architecture
//!
//! - **Session** - Pure protocol state machine: status, subscriptions,
//!   collection mirror, method ids, initialization latch, reconnect schedule
//! - **DdpClient** - Handle plus background task that runs the session's
//!   effects against the socket
//! - **CueGo** - Workspace vocabulary on top of the client
//!
//! # Modules
//!
//! - [`ddp`] - Protocol, state machine and connection manager
//! - [`cuego`] - CueGO workspaces
//! - [`config`] - Configuration loading/saving
//! - [`ws`] - WebSocket transport

// Rust guideline compliant 2026-02

// Library modules
pub mod config;
pub mod constants;
pub mod cuego;
pub mod ddp;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use cuego::{CueGo, WorkspaceStatus};
pub use ddp::{ConnectionStatus, DdpClient, DdpError, Session, SessionOptions};
