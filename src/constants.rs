//! Application-wide constants for cuego-ddp.
//!
//! Protocol constants, timing and the CueGO names the client relies on are
//! grouped here so the state machine and the CueGO layer agree on them.

// Rust guideline compliant 2026-02

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// Protocol version requested in the `connect` handshake.
pub const PROTOCOL_VERSION: &str = "1";

/// Protocol versions offered in the `connect` handshake, most preferred first.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1", "pre2", "pre1"];

/// WebSocket close code sent on an explicit teardown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// `nosub` error code meaning the credential was refused.
pub const AUTHORIZATION_FAILURE: &str = "403";

/// Length of generated subscription ids.
pub const SUBSCRIPTION_ID_LEN: usize = 17;

// ============================================================================
// Timing
// ============================================================================

/// Delay before a reconnect attempt after the socket closes.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Longest wait for the WebSocket handshake before the open counts as failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// CueGO
// ============================================================================

/// Subscription that must be ready before the workspace mirror is usable.
pub const WORKSPACES_SUBSCRIPTION: &str = "ws.user.workspaces";

/// Collection holding workspace documents.
pub const WORKSPACES_COLLECTION: &str = "workspaces";

/// Method that changes a workspace status.
pub const CHANGE_STATUS_METHOD: &str = "workspaces.changeStatus";

/// Method that fires the next cue in a workspace.
pub const TRIGGER_NEXT_METHOD: &str = "workspaces.trigger.next";

// ============================================================================
// Validation
// ============================================================================

/// Accepted target address: `ws[s]://host[:port][/path]`.
pub const WS_URL_PATTERN: &str = r"^wss?://([\da-z.-]+)(:\d{1,5})?(?:/(.*))?$";

/// Accepted credential shape.
pub const API_KEY_PATTERN: &str = r"^[a-zA-Z0-9]{1,32}$";
