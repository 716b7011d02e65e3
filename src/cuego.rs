//! CueGO workspace control on top of the DDP client.
//!
//! CueGO publishes the user's workspaces through `ws.user.workspaces`,
//! authenticated by the API key passed as its only argument. The workspace
//! mirror is usable once that subscription is ready.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::json;

use crate::config::Config;
use crate::constants::{
    CHANGE_STATUS_METHOD, TRIGGER_NEXT_METHOD, WORKSPACES_COLLECTION, WORKSPACES_SUBSCRIPTION,
};
use crate::ddp::{
    BootstrapSubscription, CollectionStore, DdpClient, DdpError, Document, SessionOptions,
};

/// Broadcast status of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceStatus {
    /// Off air.
    Clear,
    /// Going live.
    Connecting,
    /// On air.
    Live,
}

impl WorkspaceStatus {
    /// Every status, in display order.
    pub const ALL: [Self; 3] = [Self::Clear, Self::Connecting, Self::Live];

    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Connecting => "connecting",
            Self::Live => "live",
        }
    }

    /// Human label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::Connecting => "Connecting",
            Self::Live => "Live",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown workspace status '{s}' (expected clear, connecting or live)"))
    }
}

/// One entry of a selection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceOption {
    /// Value to submit.
    pub id: String,
    /// Text to show.
    pub label: String,
}

impl ChoiceOption {
    fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
        }
    }
}

/// Session options for a CueGO connection authenticated by `api_key`.
pub fn session_options(config: &Config) -> SessionOptions {
    SessionOptions {
        required: BTreeSet::from([WORKSPACES_SUBSCRIPTION.to_string()]),
        bootstrap: vec![BootstrapSubscription {
            name: WORKSPACES_SUBSCRIPTION.to_string(),
            params: vec![json!(config.api_key)],
        }],
        ..config.session_options()
    }
}

/// Workspace selection list, led by a placeholder entry.
pub fn workspace_options(store: &CollectionStore) -> Vec<ChoiceOption> {
    std::iter::once(ChoiceOption::new("", "Select a workspace"))
        .chain(store.list(WORKSPACES_COLLECTION).into_iter().map(|workspace| {
            ChoiceOption::new(workspace.id(), workspace_name(workspace))
        }))
        .collect()
}

/// Workspace status selection list.
pub fn status_options() -> Vec<ChoiceOption> {
    WorkspaceStatus::ALL
        .into_iter()
        .map(|status| ChoiceOption::new(status.as_str(), status.label()))
        .collect()
}

/// Whether workspace `id` currently has `status`. False for unknown ids.
pub fn workspace_has_status(store: &CollectionStore, id: &str, status: WorkspaceStatus) -> bool {
    store
        .get(WORKSPACES_COLLECTION, id)
        .and_then(|workspace| workspace.get_str("status"))
        .is_some_and(|current| current == status.as_str())
}

/// Display name of a workspace, falling back to its id.
pub fn workspace_name(workspace: &Document) -> &str {
    workspace.get_str("name").unwrap_or_else(|| workspace.id())
}

/// A CueGO connection.
#[derive(Debug)]
pub struct CueGo {
    client: DdpClient,
}

impl CueGo {
    /// Create a client for `config`. Nothing is opened until [`start`](Self::start).
    pub fn new(config: &Config) -> Self {
        Self {
            client: DdpClient::new(session_options(config)),
        }
    }

    /// Validate the API key and connect.
    ///
    /// An invalid key puts the client in `BadConfig` and is returned as an
    /// error; an invalid address is reported through the status only.
    pub fn start(&self, config: &Config) -> Result<(), DdpError> {
        if let Err(e) = config.validate_api_key() {
            self.client.reject_configuration("API key invalid")?;
            return Err(e);
        }
        self.client.connect(config.url.trim())
    }

    /// Disconnect, keeping the client reusable.
    pub fn stop(&self) -> Result<(), DdpError> {
        self.client.disconnect()
    }

    /// Underlying DDP client, for callbacks and status.
    pub fn client(&self) -> &DdpClient {
        &self.client
    }

    /// All mirrored workspaces, ordered by id.
    pub fn workspaces(&self) -> Vec<Document> {
        self.client.list_documents(WORKSPACES_COLLECTION)
    }

    /// One workspace by id.
    pub fn workspace(&self, id: &str) -> Option<Document> {
        self.client.get_document(WORKSPACES_COLLECTION, id)
    }

    /// See [`workspace_options`].
    pub fn workspace_options(&self) -> Vec<ChoiceOption> {
        self.client.with_session(|session| workspace_options(session.store()))
    }

    /// See [`status_options`].
    pub fn status_options(&self) -> Vec<ChoiceOption> {
        status_options()
    }

    /// See [`workspace_has_status`].
    pub fn workspace_has_status(&self, id: &str, status: WorkspaceStatus) -> bool {
        self.client
            .with_session(|session| workspace_has_status(session.store(), id, status))
    }

    /// Ask the server to change a workspace status. Returns the call id.
    pub fn set_workspace_status(&self, id: &str, status: WorkspaceStatus) -> Result<u64, DdpError> {
        log::debug!("[CueGo] Setting workspace {} to {}", id, status);
        self.client
            .invoke_method(CHANGE_STATUS_METHOD, vec![json!(status.as_str()), json!(id)])
    }

    /// Fire the next cue of a workspace. Returns the call id.
    pub fn trigger_next_cue(&self, id: &str) -> Result<u64, DdpError> {
        log::debug!("[CueGo] Triggering next cue in workspace {}", id);
        self.client.invoke_method(TRIGGER_NEXT_METHOD, vec![json!(id)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddp::{Effect, Session};
    use serde_json::Value;

    fn config() -> Config {
        Config {
            url: "ws://localhost:3000/websocket".to_string(),
            api_key: "key123".to_string(),
            ..Config::default()
        }
    }

    fn session_with_workspaces() -> Session {
        let config = config();
        let mut session = Session::new(session_options(&config));
        session.connect(&config.url);
        session.on_open();
        for frame in [
            json!({"msg": "added", "collection": "workspaces", "id": "w2", "fields": {"name": "Studio B", "status": "live"}}),
            json!({"msg": "added", "collection": "workspaces", "id": "w1", "fields": {"name": "Studio A", "status": "clear"}}),
        ] {
            session.handle_frame(&frame.to_string());
        }
        session
    }

    #[test]
    fn test_session_options_bootstrap_workspaces() {
        let options = session_options(&config());
        assert!(options.required.contains(WORKSPACES_SUBSCRIPTION));
        assert_eq!(
            options.bootstrap,
            vec![BootstrapSubscription {
                name: "ws.user.workspaces".to_string(),
                params: vec![json!("key123")],
            }]
        );
    }

    #[test]
    fn test_open_subscribes_with_api_key() {
        let config = config();
        let mut session = Session::new(session_options(&config));
        session.connect(&config.url);
        let frames: Vec<Value> = session
            .on_open()
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Send(frame) => Some(serde_json::from_str(&frame).unwrap()),
                _ => None,
            })
            .collect();
        assert_eq!(frames[1]["name"], "ws.user.workspaces");
        assert_eq!(frames[1]["params"], json!(["key123"]));
    }

    #[test]
    fn test_workspace_options() {
        let session = session_with_workspaces();
        assert_eq!(
            workspace_options(session.store()),
            vec![
                ChoiceOption::new("", "Select a workspace"),
                ChoiceOption::new("w1", "Studio A"),
                ChoiceOption::new("w2", "Studio B"),
            ]
        );
    }

    #[test]
    fn test_workspace_options_empty_store() {
        assert_eq!(
            workspace_options(&CollectionStore::new()),
            vec![ChoiceOption::new("", "Select a workspace")]
        );
    }

    #[test]
    fn test_status_options() {
        let ids: Vec<String> = status_options().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["clear", "connecting", "live"]);
    }

    #[test]
    fn test_workspace_has_status_follows_changes() {
        let mut session = session_with_workspaces();
        assert!(workspace_has_status(session.store(), "w1", WorkspaceStatus::Clear));
        assert!(!workspace_has_status(session.store(), "w1", WorkspaceStatus::Live));

        session.handle_frame(
            &json!({"msg": "changed", "collection": "workspaces", "id": "w1", "fields": {"status": "live"}})
                .to_string(),
        );
        assert!(workspace_has_status(session.store(), "w1", WorkspaceStatus::Live));
        assert!(!workspace_has_status(session.store(), "missing", WorkspaceStatus::Live));
    }

    #[test]
    fn test_workspace_status_parse() {
        assert_eq!("live".parse::<WorkspaceStatus>(), Ok(WorkspaceStatus::Live));
        assert!("LIVE".parse::<WorkspaceStatus>().is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_api_key() {
        let config = Config {
            api_key: "not a key!".to_string(),
            ..config()
        };
        let cuego = CueGo::new(&config);
        assert_eq!(
            cuego.start(&config),
            Err(DdpError::Configuration("API key invalid".to_string()))
        );
        assert!(cuego.set_workspace_status("w1", WorkspaceStatus::Live).is_err());
    }
}
