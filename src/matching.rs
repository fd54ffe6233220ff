//! The matching algorithm: turns a request plus a mapping snapshot into a
//! winner (or a diagnostic list of near-misses).

use crate::mapping::Mapping;
use crate::model::RequestMessage;
use crate::scenario::ScenarioEngine;
use crate::store::MappingSnapshot;
use std::sync::Arc;
use uuid::Uuid;

/// A mapping that scored above zero but didn't win, kept for `/__admin`
/// diagnostics and for the request log's `partial_match_candidates` field.
#[derive(Debug, Clone)]
pub struct PartialCandidate {
    pub mapping_id: Uuid,
    pub title: Option<String>,
    pub score: f64,
}

/// How many near-misses to retain when nothing wins (§4.8).
const MAX_DIAGNOSTIC_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    /// Minimum score, out of 1.0, required to win outright.
    pub perfect_threshold: f64,
    /// When set, the threshold above is ignored and the best-scoring
    /// candidate wins even if it's an imperfect match (used by the admin
    /// "find unmatched requests" tooling, not by the live mock surface).
    pub allow_partial_matches: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            perfect_threshold: 1.0,
            allow_partial_matches: false,
        }
    }
}

pub struct MatchOutcome {
    pub winner: Option<Arc<Mapping>>,
    /// Every mapping that scored above zero, sorted best-first. Truncate to
    /// [`MAX_DIAGNOSTIC_CANDIDATES`] before logging a miss.
    pub partial_candidates: Vec<PartialCandidate>,
}

impl MatchOutcome {
    pub fn top_candidates(&self) -> &[PartialCandidate] {
        let end = self.partial_candidates.len().min(MAX_DIAGNOSTIC_CANDIDATES);
        &self.partial_candidates[..end]
    }
}

/// Run the matching algorithm against one snapshot of the store.
///
/// 1. Filter out mappings whose scenario clause isn't eligible in the
///    current scenario state.
/// 2. Score every remaining mapping's match tree against the request.
/// 3. Discard anything scoring below the threshold (normally a perfect 1.0).
/// 4. Sort survivors by `(priority asc, score desc, insertion_index asc)` and
///    take the first as the winner.
pub fn run_matching(
    snapshot: &MappingSnapshot,
    scenarios: &ScenarioEngine,
    request: &RequestMessage,
    config: MatchConfig,
) -> MatchOutcome {
    let mut scored: Vec<(Arc<Mapping>, u64, f64)> = Vec::new();

    for entry in snapshot.iter() {
        let mapping = &entry.mapping;
        if let Some(clause) = &mapping.scenario {
            if let Some(required) = &clause.required_state {
                let current = scenarios.state_of(&clause.name);
                if &current != required {
                    continue;
                }
            }
        }
        let score = mapping.tree.score(request);
        if score > 0.0 {
            scored.push((mapping.clone(), entry.insertion_index, score));
        }
    }

    let mut partial_candidates: Vec<PartialCandidate> = scored
        .iter()
        .map(|(mapping, _, score)| PartialCandidate {
            mapping_id: mapping.id,
            title: mapping.title.clone(),
            score: *score,
        })
        .collect();
    partial_candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

    let threshold = if config.allow_partial_matches {
        f64::MIN_POSITIVE
    } else {
        config.perfect_threshold
    };

    let mut survivors: Vec<_> = scored.into_iter().filter(|(_, _, s)| *s >= threshold).collect();
    survivors.sort_by(|a, b| {
        a.0.priority
            .cmp(&b.0.priority)
            .then_with(|| b.2.partial_cmp(&a.2).unwrap())
            .then_with(|| a.1.cmp(&b.1))
    });

    let winner = survivors.into_iter().next().map(|(mapping, _, _)| mapping);

    MatchOutcome {
        winner,
        partial_candidates,
    }
}

/// Apply a winning mapping's scenario transition, if it has one. Called once
/// the winner has been chosen but before the response is logged, so this
/// request matches against the old state while the next one sees the new
/// state (§4.5).
pub fn apply_scenario_transition(mapping: &Mapping, scenarios: &ScenarioEngine) {
    if let Some(clause) = &mapping.scenario {
        if let Some(new_state) = &clause.new_state {
            let from = clause
                .required_state
                .clone()
                .unwrap_or_else(|| scenarios.state_of(&clause.name));
            scenarios.transition(&clause.name, &from, new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::OrderedMultiMap;
    use crate::mapping::Mapping;
    use crate::matcher::{Case, MatchTree, Matcher, Target};
    use crate::model::RequestMessage;
    use crate::store::MappingStore;

    fn request(path: &str) -> RequestMessage {
        RequestMessage::new(
            format!("http://x{path}"),
            path.to_string(),
            "GET".into(),
            OrderedMultiMap::new(true),
            OrderedMultiMap::new(false),
            Vec::new(),
            "127.0.0.1".into(),
        )
    }

    #[test]
    fn winner_is_the_unique_perfect_match() {
        let store = MappingStore::new();
        let mapping = Mapping::builder().with_path_equal_to("/foo").build();
        store.add(mapping.clone()).unwrap();

        let scenarios = ScenarioEngine::new();
        let outcome = run_matching(&store.snapshot(), &scenarios, &request("/foo"), MatchConfig::default());
        assert_eq!(outcome.winner.unwrap().id, mapping.id);
    }

    #[test]
    fn lower_priority_number_wins_ties() {
        let store = MappingStore::new();
        let low = Mapping::builder().with_path_equal_to("/foo").with_priority(5).build();
        let high = Mapping::builder().with_path_equal_to("/foo").with_priority(1).build();
        store.add(low).unwrap();
        let high_id = high.id;
        store.add(high).unwrap();

        let scenarios = ScenarioEngine::new();
        let outcome = run_matching(&store.snapshot(), &scenarios, &request("/foo"), MatchConfig::default());
        assert_eq!(outcome.winner.unwrap().id, high_id);
    }

    #[test]
    fn insertion_order_breaks_equal_priority_ties() {
        let store = MappingStore::new();
        let first = Mapping::builder().with_path_equal_to("/foo").build();
        let first_id = first.id;
        store.add(first).unwrap();
        store.add(Mapping::builder().with_path_equal_to("/foo").build()).unwrap();

        let scenarios = ScenarioEngine::new();
        let outcome = run_matching(&store.snapshot(), &scenarios, &request("/foo"), MatchConfig::default());
        assert_eq!(outcome.winner.unwrap().id, first_id);
    }

    #[test]
    fn ineligible_scenario_state_excludes_the_mapping() {
        let store = MappingStore::new();
        let mapping = Mapping::builder()
            .with_path_equal_to("/foo")
            .with_scenario(crate::mapping::ScenarioClause {
                name: "checkout".into(),
                required_state: Some("Paid".into()),
                new_state: None,
            })
            .build();
        store.add(mapping).unwrap();

        let scenarios = ScenarioEngine::new();
        let outcome = run_matching(&store.snapshot(), &scenarios, &request("/foo"), MatchConfig::default());
        assert!(outcome.winner.is_none());
    }

    #[test]
    fn below_threshold_matches_surface_as_partial_candidates_only() {
        let store = MappingStore::new();
        let mapping = Mapping::builder()
            .with_matcher(MatchTree::Leaf(Matcher::exact(Target::Path, Case::Sensitive, "/foo".into())))
            .with_matcher(MatchTree::Leaf(Matcher::exact(Target::Method, Case::Insensitive, "POST".into())))
            .build();
        store.add(mapping.clone()).unwrap();

        let scenarios = ScenarioEngine::new();
        let outcome = run_matching(&store.snapshot(), &scenarios, &request("/foo"), MatchConfig::default());
        assert!(outcome.winner.is_none());
        assert_eq!(outcome.partial_candidates.len(), 1);
        assert_eq!(outcome.partial_candidates[0].mapping_id, mapping.id);
    }

    #[test]
    fn scenario_transition_advances_after_winner_is_chosen() {
        let scenarios = ScenarioEngine::new();
        let mapping = Mapping::builder()
            .with_scenario(crate::mapping::ScenarioClause {
                name: "checkout".into(),
                required_state: None,
                new_state: Some("Paid".into()),
            })
            .build();
        apply_scenario_transition(&mapping, &scenarios);
        assert_eq!(scenarios.state_of("checkout"), "Paid");
    }
}
