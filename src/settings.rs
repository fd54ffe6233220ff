//! Server-wide settings: everything `GET /__admin/settings` reports and
//! `PUT /__admin/settings` can change at runtime.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Request log ring capacity; `None` means unbounded (§4.8).
    #[serde(default = "default_log_capacity")]
    pub request_log_capacity: Option<usize>,

    /// Added to every response after its own per-mapping delay (§4.10).
    #[serde(default)]
    pub global_delay_ms: u64,

    /// Minimum score required to win a match outright (§4.6). The admin
    /// "find unmatched requests" tooling ignores this and scores everything.
    #[serde(default = "default_perfect_threshold")]
    pub perfect_threshold: f64,

    /// When set, the mock surface itself accepts the best-scoring mapping
    /// even below `perfect_threshold` rather than falling back to 404.
    #[serde(default)]
    pub allow_partial_mapping: bool,

    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    #[serde(default = "default_true")]
    pub case_insensitive_headers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_log_capacity: default_log_capacity(),
            global_delay_ms: 0,
            perfect_threshold: default_perfect_threshold(),
            allow_partial_mapping: false,
            default_content_type: default_content_type(),
            case_insensitive_headers: true,
        }
    }
}

impl Settings {
    pub fn global_delay(&self) -> Option<std::time::Duration> {
        if self.global_delay_ms > 0 {
            Some(std::time::Duration::from_millis(self.global_delay_ms))
        } else {
            None
        }
    }

    pub fn match_config(&self) -> crate::matching::MatchConfig {
        crate::matching::MatchConfig {
            perfect_threshold: self.perfect_threshold,
            allow_partial_matches: self.allow_partial_mapping,
        }
    }
}

fn default_log_capacity() -> Option<usize> {
    Some(crate::reqlog::DEFAULT_CAPACITY)
}

fn default_perfect_threshold() -> f64 {
    1.0
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_use_a_perfect_threshold_of_one() {
        let settings = Settings::default();
        assert_eq!(settings.perfect_threshold, 1.0);
        assert!(!settings.allow_partial_mapping);
    }

    #[test]
    fn zero_global_delay_resolves_to_none() {
        let settings = Settings::default();
        assert_eq!(settings.global_delay(), None);
    }
}
