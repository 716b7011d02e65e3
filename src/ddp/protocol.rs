//! Wire messages of the DDP protocol.
//!
//! Every frame is one JSON object whose `msg` field names the kind. The kind
//! set is closed: a frame that is not JSON, has no `msg`, names an unknown
//! kind, or carries fields that do not fit its kind decodes to
//! [`Decoded::Raw`] and the dispatcher ignores it.
//!
//! # Wire Format
//!
//! ```text
//! {"msg":"connect","version":"1","support":["1","pre2","pre1"]}
//! {"msg":"sub","id":"k3Fq...","name":"ws.user.workspaces","params":["key"]}
//! {"msg":"added","collection":"workspaces","id":"w1","fields":{"name":"Main"}}
//! {"msg":"ready","subs":["k3Fq..."]}
//! {"msg":"method","method":"workspaces.trigger.next","params":["w1"],"id":"1"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::DdpError;
use crate::constants::{AUTHORIZATION_FAILURE, PROTOCOL_VERSION, SUPPORTED_VERSIONS};

/// Field map of a document diff.
pub type Fields = Map<String, Value>;

/// Error object carried by `nosub` and `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code; servers send it either as a string or as a number.
    pub error: Value,
    /// Short machine-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error class name reported by the server.
    #[serde(default, rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ErrorPayload {
    /// The error code as text, whatever its JSON type.
    pub fn code(&self) -> String {
        match &self.error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the server refused the credential.
    pub fn is_authorization_failure(&self) -> bool {
        self.code() == AUTHORIZATION_FAILURE
    }

    /// Best available description for logs and status text.
    pub fn describe(&self) -> String {
        self.reason
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| format!("error {}", self.code()))
    }
}

/// A protocol message, tagged by its `msg` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum DdpMessage {
    /// Client handshake.
    Connect {
        /// Requested protocol version.
        version: String,
        /// Versions the client can speak.
        support: Vec<String>,
    },
    /// Handshake accepted.
    Connected {
        /// Server-assigned session id.
        session: String,
    },
    /// Handshake refused; the server proposes another version.
    Failed {
        /// Version the server would accept.
        version: String,
    },
    /// Heartbeat request.
    Ping {
        /// Optional id to echo in the reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    /// Heartbeat reply.
    Pong {
        /// Id of the ping being answered.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    /// Subscribe request.
    Sub {
        /// Client-generated subscription id.
        id: String,
        /// Publication name.
        name: String,
        /// Publication arguments.
        #[serde(default)]
        params: Vec<Value>,
    },
    /// Subscription refused or ended by the server.
    Nosub {
        /// Subscription id.
        id: String,
        /// Why the subscription was refused, if it was.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
    /// Unsubscribe request.
    Unsub {
        /// Subscription id.
        id: String,
    },
    /// Document added to a collection.
    Added {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Initial fields.
        #[serde(default)]
        fields: Fields,
    },
    /// Document fields changed.
    Changed {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Fields to overwrite.
        #[serde(default)]
        fields: Fields,
        /// Fields to unset.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cleared: Vec<String>,
    },
    /// Document removed from a collection.
    Removed {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },
    /// Subscriptions whose initial data set is complete.
    Ready {
        /// Subscription ids.
        subs: Vec<String>,
    },
    /// Remote procedure call.
    Method {
        /// Method name.
        method: String,
        /// Positional arguments.
        #[serde(default)]
        params: Vec<Value>,
        /// Client-generated call id.
        id: String,
    },
    /// Outcome of a method call.
    Result {
        /// Call id.
        id: String,
        /// Return value on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
    /// Writes of the listed method calls are reflected in the data.
    Updated {
        /// Call ids.
        methods: Vec<String>,
    },
    /// The server could not process a message we sent.
    Error {
        /// Why the message was rejected.
        reason: String,
        /// The message the server choked on.
        #[serde(default, rename = "offendingMessage", skip_serializing_if = "Option::is_none")]
        offending_message: Option<Value>,
    },
}

impl DdpMessage {
    /// Handshake message offering [`SUPPORTED_VERSIONS`].
    pub fn connect() -> Self {
        Self::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: SUPPORTED_VERSIONS.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    /// Heartbeat reply echoing a ping id.
    pub fn pong(id: Option<Value>) -> Self {
        Self::Pong { id }
    }

    /// The `msg` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Connected { .. } => "connected",
            Self::Failed { .. } => "failed",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Sub { .. } => "sub",
            Self::Nosub { .. } => "nosub",
            Self::Unsub { .. } => "unsub",
            Self::Added { .. } => "added",
            Self::Changed { .. } => "changed",
            Self::Removed { .. } => "removed",
            Self::Ready { .. } => "ready",
            Self::Method { .. } => "method",
            Self::Result { .. } => "result",
            Self::Updated { .. } => "updated",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("DdpMessage always serializes to JSON")
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed message of a known kind.
    Message(DdpMessage),
    /// Anything else, passed through untouched.
    Raw(String),
}

/// Decode one text frame.
///
/// Never fails: malformed input comes back as [`Decoded::Raw`].
pub fn decode(text: &str) -> Decoded {
    match serde_json::from_str::<DdpMessage>(text) {
        Ok(message) => Decoded::Message(message),
        Err(e) => {
            log::trace!("[Ddp] {} in frame: {}", DdpError::Decode(e.to_string()), text);
            Decoded::Raw(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_value(value: Value) -> Decoded {
        decode(&value.to_string())
    }

    #[test]
    fn test_connect_handshake_shape() {
        let encoded: Value = serde_json::from_str(&DdpMessage::connect().encode()).unwrap();
        assert_eq!(
            encoded,
            json!({"msg": "connect", "version": "1", "support": ["1", "pre2", "pre1"]})
        );
    }

    #[test]
    fn test_pong_without_id_omits_field() {
        let encoded: Value = serde_json::from_str(&DdpMessage::pong(None).encode()).unwrap();
        assert_eq!(encoded, json!({"msg": "pong"}));
    }

    #[test]
    fn test_pong_echoes_ping_id() {
        let encoded: Value =
            serde_json::from_str(&DdpMessage::pong(Some(json!("p1"))).encode()).unwrap();
        assert_eq!(encoded, json!({"msg": "pong", "id": "p1"}));
    }

    #[test]
    fn test_method_shape_uses_string_id() {
        let msg = DdpMessage::Method {
            method: "workspaces.trigger.next".to_string(),
            params: vec![json!("w1")],
            id: "7".to_string(),
        };
        let encoded: Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(
            encoded,
            json!({"msg": "method", "method": "workspaces.trigger.next", "params": ["w1"], "id": "7"})
        );
    }

    #[test]
    fn test_decode_ping_with_and_without_id() {
        assert_eq!(
            decode(r#"{"msg":"ping"}"#),
            Decoded::Message(DdpMessage::Ping { id: None })
        );
        assert_eq!(
            decode(r#"{"msg":"ping","id":"abc"}"#),
            Decoded::Message(DdpMessage::Ping { id: Some(json!("abc")) })
        );
    }

    #[test]
    fn test_decode_added_keeps_nested_fields() {
        let decoded = decode_value(json!({
            "msg": "added",
            "collection": "rooms",
            "id": "r1",
            "fields": {"name": "Lobby", "meta": {"seats": 4}, "tags": ["a", "b"]}
        }));
        let Decoded::Message(DdpMessage::Added { collection, id, fields }) = decoded else {
            panic!("expected added, got {decoded:?}");
        };
        assert_eq!(collection, "rooms");
        assert_eq!(id, "r1");
        assert_eq!(fields["meta"]["seats"], 4);
        assert_eq!(fields["tags"][1], "b");
    }

    #[test]
    fn test_decode_changed_defaults_missing_parts() {
        let decoded = decode_value(json!({"msg": "changed", "collection": "rooms", "id": "r1"}));
        assert_eq!(
            decoded,
            Decoded::Message(DdpMessage::Changed {
                collection: "rooms".to_string(),
                id: "r1".to_string(),
                fields: Fields::new(),
                cleared: Vec::new(),
            })
        );
    }

    #[test]
    fn test_decode_nosub_numeric_and_string_codes() {
        for code in [json!("403"), json!(403)] {
            let decoded = decode_value(json!({
                "msg": "nosub",
                "id": "s1",
                "error": {"error": code, "reason": "Invalid API key"}
            }));
            let Decoded::Message(DdpMessage::Nosub { error: Some(error), .. }) = decoded else {
                panic!("expected nosub with error, got {decoded:?}");
            };
            assert!(error.is_authorization_failure());
            assert_eq!(error.describe(), "Invalid API key");
        }
    }

    #[test]
    fn test_decode_ready_and_result() {
        assert_eq!(
            decode(r#"{"msg":"ready","subs":["a","b"]}"#),
            Decoded::Message(DdpMessage::Ready {
                subs: vec!["a".to_string(), "b".to_string()]
            })
        );
        let decoded = decode(r#"{"msg":"result","id":"3","error":{"error":500,"message":"boom"}}"#);
        let Decoded::Message(DdpMessage::Result { id, result, error }) = decoded else {
            panic!("expected result");
        };
        assert_eq!(id, "3");
        assert!(result.is_none());
        assert_eq!(error.map(|e| e.describe()), Some("boom".to_string()));
    }

    #[test]
    fn test_decode_server_error_kind() {
        let decoded = decode(r#"{"msg":"error","reason":"Bad request","offendingMessage":{"msg":"x"}}"#);
        assert!(matches!(
            decoded,
            Decoded::Message(DdpMessage::Error { ref reason, .. }) if reason == "Bad request"
        ));
    }

    // Tolerant decoding: these frames are passed through as raw text, never
    // surfaced as errors.
    #[test]
    fn test_decode_non_json_is_raw() {
        assert_eq!(decode("hello there"), Decoded::Raw("hello there".to_string()));
    }

    #[test]
    fn test_decode_unknown_kind_is_raw() {
        let text = r#"{"msg":"teleport","id":"x"}"#;
        assert_eq!(decode(text), Decoded::Raw(text.to_string()));
    }

    #[test]
    fn test_decode_missing_required_field_is_raw() {
        let text = r#"{"msg":"added","collection":"rooms"}"#;
        assert_eq!(decode(text), Decoded::Raw(text.to_string()));
    }

    #[test]
    fn test_decode_json_without_msg_is_raw() {
        let text = r#"{"server_id":"0"}"#;
        assert_eq!(decode(text), Decoded::Raw(text.to_string()));
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let msg = DdpMessage::Unsub { id: "s1".to_string() };
        let encoded: Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(encoded["msg"], msg.kind());
    }
}
