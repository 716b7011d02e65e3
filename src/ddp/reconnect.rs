//! Single-shot reconnect schedule.
//!
//! The schedule itself is plain state: arming hands out a generation number
//! and the connection task spawns a sleeper that reports back with it. A
//! report is honoured only if its generation is still the armed one, so
//! re-arming or cancelling makes any older sleeper harmless even if it
//! already woke up. Tests drive it without real delays.

use std::time::Duration;

/// A pending reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedReconnect {
    /// Generation to hand back when the delay elapses.
    pub generation: u64,
    /// How long to wait.
    pub delay: Duration,
}

/// At most one armed reconnect at a time.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    generation: u64,
    armed: Option<ArmedReconnect>,
}

impl ReconnectTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `delay`, superseding whatever was armed.
    pub fn arm(&mut self, delay: Duration) -> ArmedReconnect {
        self.generation += 1;
        let armed = ArmedReconnect {
            generation: self.generation,
            delay,
        };
        self.armed = Some(armed);
        armed
    }

    /// Disarm. Returns whether something was armed.
    pub fn cancel(&mut self) -> bool {
        self.armed.take().is_some()
    }

    /// A sleeper reports its delay elapsed.
    ///
    /// Returns `true` (and disarms) only for the current generation.
    pub fn fire(&mut self, generation: u64) -> bool {
        match self.armed {
            Some(armed) if armed.generation == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// The currently armed reconnect, if any.
    pub fn armed(&self) -> Option<ArmedReconnect> {
        self.armed
    }

    /// Whether a reconnect is armed.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(5);

    #[test]
    fn test_arm_then_fire() {
        let mut timer = ReconnectTimer::new();
        let armed = timer.arm(DELAY);
        assert_eq!(armed.delay, DELAY);
        assert!(timer.is_armed());

        assert!(timer.fire(armed.generation));
        assert!(!timer.is_armed());
        // Firing twice does nothing.
        assert!(!timer.fire(armed.generation));
    }

    #[test]
    fn test_rearm_supersedes_previous() {
        let mut timer = ReconnectTimer::new();
        let first = timer.arm(DELAY);
        let second = timer.arm(DELAY);

        assert_ne!(first.generation, second.generation);
        assert_eq!(timer.armed(), Some(second));
        assert!(!timer.fire(first.generation));
        assert!(timer.is_armed());
        assert!(timer.fire(second.generation));
    }

    #[test]
    fn test_cancel_disarms() {
        let mut timer = ReconnectTimer::new();
        let armed = timer.arm(DELAY);
        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.fire(armed.generation));
    }
}
