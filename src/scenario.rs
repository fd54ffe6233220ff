//! Per-scenario state machine gating mapping eligibility.
//!
//! Each scenario name has its own compare-and-swap cell rather than a single
//! store-wide lock, so concurrent requests against different scenarios never
//! contend with each other (§5).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// The state every scenario starts in.
pub const STARTED: &str = "Started";

#[derive(Default)]
pub struct ScenarioEngine {
    states: DashMap<String, String>,
}

impl ScenarioEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, or `"Started"` if the scenario has never been touched.
    pub fn state_of(&self, name: &str) -> String {
        self.states
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| STARTED.to_string())
    }

    /// Atomically advance `name` from `from` to `to`. Returns whether the
    /// transition applied (it's a no-op, not an error, if the scenario had
    /// already moved on). The `required_state` check and the write happen
    /// inside the same per-key critical section, so concurrent transitions
    /// on the same scenario serialize rather than race.
    pub fn transition(&self, name: &str, from: &str, to: &str) -> bool {
        match self.states.entry(name.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get() == from {
                    existing.insert(to.to_string());
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                if from == STARTED {
                    slot.insert(to.to_string());
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn set_state(&self, name: &str, state: impl Into<String>) {
        self.states.insert(name.to_string(), state.into());
    }

    pub fn reset(&self) {
        self.states.clear();
    }

    pub fn list(&self) -> std::collections::HashMap<String, String> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_scenario_starts_at_started() {
        let engine = ScenarioEngine::new();
        assert_eq!(engine.state_of("checkout"), STARTED);
    }

    #[test]
    fn transition_from_wrong_state_is_a_noop() {
        let engine = ScenarioEngine::new();
        assert!(!engine.transition("checkout", "Paid", "Shipped"));
        assert_eq!(engine.state_of("checkout"), STARTED);
    }

    #[test]
    fn transition_advances_state_exactly_once() {
        let engine = ScenarioEngine::new();
        assert!(engine.transition("checkout", STARTED, "Paid"));
        assert_eq!(engine.state_of("checkout"), "Paid");
        assert!(engine.transition("checkout", "Paid", "Shipped"));
        assert_eq!(engine.state_of("checkout"), "Shipped");
    }

    #[test]
    fn reset_clears_all_scenario_state() {
        let engine = ScenarioEngine::new();
        engine.transition("checkout", STARTED, "Paid");
        engine.reset();
        assert_eq!(engine.state_of("checkout"), STARTED);
    }
}
