//! One-shot "required subscriptions are ready" latch.

use std::collections::BTreeSet;

use super::subscription::SubscriptionRegistry;

/// Flips to initialized the first time the required set is ready.
#[derive(Debug, Default)]
pub struct InitializationGate {
    initialized: bool,
}

impl InitializationGate {
    /// Create an un-latched gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch if the required set just became ready.
    ///
    /// Returns `true` only on the call that latches.
    pub fn evaluate(&mut self, registry: &SubscriptionRegistry, required: &BTreeSet<String>) -> bool {
        if self.initialized || !registry.is_required_set_ready(required) {
            return false;
        }
        self.initialized = true;
        true
    }

    /// Whether the gate has latched.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Re-arm for a new connection.
    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> BTreeSet<String> {
        BTreeSet::from(["rooms".to_string()])
    }

    #[test]
    fn test_latches_once() {
        let mut registry = SubscriptionRegistry::new();
        let mut gate = InitializationGate::new();
        let (sub, _) = registry.subscribe("rooms", Vec::new());

        assert!(!gate.evaluate(&registry, &required()));
        assert!(!gate.is_initialized());

        registry.mark_ready(&[sub.id]);
        assert!(gate.evaluate(&registry, &required()));
        assert!(gate.is_initialized());

        // Already latched: no second transition.
        assert!(!gate.evaluate(&registry, &required()));
        assert!(gate.is_initialized());
    }

    #[test]
    fn test_stays_latched_after_registry_changes() {
        let mut registry = SubscriptionRegistry::new();
        let mut gate = InitializationGate::new();
        let (sub, _) = registry.subscribe("rooms", Vec::new());
        registry.mark_ready(&[sub.id]);
        gate.evaluate(&registry, &required());

        registry.subscribe("rooms", Vec::new());
        assert!(!gate.evaluate(&registry, &required()));
        assert!(gate.is_initialized());
    }

    #[test]
    fn test_reset_rearms() {
        let mut registry = SubscriptionRegistry::new();
        let mut gate = InitializationGate::new();
        let (sub, _) = registry.subscribe("rooms", Vec::new());
        registry.mark_ready(&[sub.id]);
        gate.evaluate(&registry, &required());

        gate.reset();
        registry.clear();
        assert!(!gate.is_initialized());

        let (again, _) = registry.subscribe("rooms", Vec::new());
        registry.mark_ready(&[again.id]);
        assert!(gate.evaluate(&registry, &required()));
    }
}
