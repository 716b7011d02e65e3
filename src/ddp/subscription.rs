//! Outbound subscriptions and their readiness.

use std::collections::{BTreeSet, HashMap, HashSet};

use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use super::protocol::DdpMessage;
use crate::constants::SUBSCRIPTION_ID_LEN;

/// A subscription issued by this client.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Client-generated id, unique for the registry's lifetime.
    pub id: String,
    /// Publication name.
    pub name: String,
    /// Publication arguments.
    pub params: Vec<Value>,
    /// Set once the server reports the initial data set complete.
    pub ready: bool,
}

/// Registry of live subscriptions for one connection.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
    /// Every id handed out since the last reset, including unsubscribed ones,
    /// so a late `ready` or `nosub` for a dropped id can never match a newer
    /// subscription. Bounded by one connection: the session clears the
    /// registry on every socket close and teardown.
    issued: HashSet<String>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new not-ready subscription and build its `sub` message.
    pub fn subscribe(&mut self, name: &str, params: Vec<Value>) -> (Subscription, DdpMessage) {
        let id = self.fresh_id();
        let subscription = Subscription {
            id: id.clone(),
            name: name.to_string(),
            params: params.clone(),
            ready: false,
        };
        self.subscriptions.insert(id.clone(), subscription.clone());

        let message = DdpMessage::Sub {
            id,
            name: name.to_string(),
            params,
        };
        (subscription, message)
    }

    fn fresh_id(&mut self) -> String {
        let mut rng = rand::rng();
        loop {
            let id: String = (&mut rng)
                .sample_iter(Alphanumeric)
                .take(SUBSCRIPTION_ID_LEN)
                .map(char::from)
                .collect();
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Forget a subscription and build its `unsub` message.
    ///
    /// Returns `None` for an unknown id.
    pub fn unsubscribe(&mut self, id: &str) -> Option<DdpMessage> {
        self.subscriptions.remove(id).map(|sub| DdpMessage::Unsub { id: sub.id })
    }

    /// Forget a subscription without telling the server (it already knows).
    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        self.subscriptions.remove(id)
    }

    /// Mark every known id as ready. Unknown ids are ignored.
    ///
    /// Returns how many subscriptions became ready.
    pub fn mark_ready<S: AsRef<str>>(&mut self, ids: &[S]) -> usize {
        let mut newly_ready = 0;
        for id in ids {
            match self.subscriptions.get_mut(id.as_ref()) {
                Some(sub) if !sub.ready => {
                    sub.ready = true;
                    newly_ready += 1;
                }
                Some(_) => {}
                None => log::debug!("[Ddp] ready for unknown subscription {}", id.as_ref()),
            }
        }
        newly_ready
    }

    /// True when every required name has at least one subscription and all
    /// subscriptions carrying that name are ready.
    pub fn is_required_set_ready(&self, required: &BTreeSet<String>) -> bool {
        required.iter().all(|name| {
            let mut named = self
                .subscriptions
                .values()
                .filter(|sub| &sub.name == name)
                .peekable();
            named.peek().is_some() && named.all(|sub| sub.ready)
        })
    }

    /// Subscription by id.
    pub fn get(&self, id: &str) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    /// Live subscriptions to one publication.
    pub fn subscriptions_named(&self, name: &str) -> Vec<&Subscription> {
        self.subscriptions
            .values()
            .filter(|sub| sub.name == name)
            .collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no subscription is live.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Number of ids handed out since the last reset.
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    /// Discard every subscription and the issued-id history.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.issued.clear();
    }
}
