//! Remote method calls.
//!
//! Call ids are a per-connection counter starting at 1 and sent as decimal
//! strings. Outstanding calls are remembered so a `result` can be matched
//! back to the method that produced it.

use std::collections::BTreeMap;

use serde_json::Value;

use super::protocol::{DdpMessage, ErrorPayload};

/// A call that has been sent and not yet answered.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    /// Call id.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Arguments the method was called with.
    pub params: Vec<Value>,
}

/// Outcome of a call, delivered when its `result` arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodOutcome {
    /// Call id as sent on the wire.
    pub id: String,
    /// Method name, when the call was still pending.
    pub method: Option<String>,
    /// `Ok(value)` on success, `Err(payload)` when the server raised.
    pub outcome: Result<Option<Value>, ErrorPayload>,
}

/// Stamps outbound calls with increasing ids.
#[derive(Debug, Default)]
pub struct MethodInvoker {
    last_id: u64,
    pending: BTreeMap<u64, PendingCall>,
}

impl MethodInvoker {
    /// Create an invoker whose first call gets id 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and build the `method` message.
    pub fn invoke(&mut self, method: &str, params: Vec<Value>) -> (u64, DdpMessage) {
        self.last_id += 1;
        let id = self.last_id;
        self.pending.insert(
            id,
            PendingCall {
                id,
                method: method.to_string(),
                params: params.clone(),
            },
        );
        let message = DdpMessage::Method {
            method: method.to_string(),
            params,
            id: id.to_string(),
        };
        (id, message)
    }

    /// Match a `result` to its pending call.
    pub fn complete(
        &mut self,
        id: &str,
        result: Option<Value>,
        error: Option<ErrorPayload>,
    ) -> MethodOutcome {
        let call = id.parse::<u64>().ok().and_then(|n| self.pending.remove(&n));
        if call.is_none() {
            log::debug!("[Ddp] result for unknown call {}", id);
        }
        MethodOutcome {
            id: id.to_string(),
            method: call.map(|c| c.method),
            outcome: match error {
                Some(error) => Err(error),
                None => Ok(result),
            },
        }
    }

    /// Id of the most recent call (0 before the first).
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Calls still waiting for a result, oldest first.
    pub fn pending(&self) -> Vec<&PendingCall> {
        self.pending.values().collect()
    }

    /// Restart numbering and forget outstanding calls.
    pub fn reset(&mut self) {
        self.last_id = 0;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_increase_by_one() {
        let mut invoker = MethodInvoker::new();
        let ids: Vec<u64> = (0..5)
            .map(|_| invoker.invoke("workspaces.trigger.next", vec![json!("w1")]).0)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(invoker.last_id(), 5);
    }

    #[test]
    fn test_message_carries_string_id() {
        let mut invoker = MethodInvoker::new();
        let (id, message) =
            invoker.invoke("workspaces.changeStatus", vec![json!("live"), json!("w1")]);
        assert_eq!(id, 1);
        assert_eq!(
            message,
            DdpMessage::Method {
                method: "workspaces.changeStatus".to_string(),
                params: vec![json!("live"), json!("w1")],
                id: "1".to_string(),
            }
        );
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut invoker = MethodInvoker::new();
        invoker.invoke("a", Vec::new());
        invoker.invoke("b", Vec::new());
        invoker.reset();

        assert!(invoker.pending().is_empty());
        assert_eq!(invoker.invoke("c", Vec::new()).0, 1);
    }

    #[test]
    fn test_complete_matches_pending_call() {
        let mut invoker = MethodInvoker::new();
        invoker.invoke("first", Vec::new());
        invoker.invoke("second", Vec::new());

        let outcome = invoker.complete("2", Some(json!({"ok": true})), None);
        assert_eq!(outcome.method.as_deref(), Some("second"));
        assert_eq!(outcome.outcome, Ok(Some(json!({"ok": true}))));

        let remaining: Vec<u64> = invoker.pending().iter().map(|c| c.id).collect();
        assert_eq!(remaining, vec![1]);
    }

    #[test]
    fn test_complete_error_and_unknown_id() {
        let mut invoker = MethodInvoker::new();
        invoker.invoke("first", Vec::new());

        let error = ErrorPayload {
            error: json!(500),
            reason: None,
            message: Some("boom".to_string()),
            error_type: None,
        };
        let outcome = invoker.complete("1", None, Some(error.clone()));
        assert_eq!(outcome.outcome, Err(error));

        let stray = invoker.complete("not-a-number", None, None);
        assert!(stray.method.is_none());
        assert_eq!(stray.outcome, Ok(None));
    }
}
