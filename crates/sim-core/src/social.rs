//! Relations between agents (directed trust, symmetric familiarity) and
//! player reputation with agents and factions, including the faction ripple.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub trust: f64,
    pub familiarity: f64,
    pub last_interaction_hours: f64,
}

impl Default for Relation {
    fn default() -> Self {
        Self {
            trust: 0.0,
            familiarity: 0.0,
            last_interaction_hours: 0.0,
        }
    }
}

/// Relations are first-class records keyed by the directed (from, to) pair;
/// agents themselves hold only ids.
#[derive(Debug, Default, Clone)]
pub struct RelationGraph {
    edges: BTreeMap<(String, String), Relation>,
}

impl RelationGraph {
    /// Directed trust `from → to` in [−1, 1]; 0 for strangers.
    pub fn trust(&self, from: &str, to: &str) -> f64 {
        self.edges
            .get(&(from.to_string(), to.to_string()))
            .map(|edge| edge.trust)
            .unwrap_or(0.0)
    }

    /// Familiarity is symmetric: both directions carry the same value.
    pub fn familiarity(&self, a: &str, b: &str) -> f64 {
        self.edges
            .get(&(a.to_string(), b.to_string()))
            .map(|edge| edge.familiarity)
            .unwrap_or(0.0)
    }

    pub fn adjust_trust(&mut self, from: &str, to: &str, delta: f64, now_hours: f64) {
        let edge = self
            .edges
            .entry((from.to_string(), to.to_string()))
            .or_default();
        edge.trust = (edge.trust + delta).clamp(-1.0, 1.0);
        edge.last_interaction_hours = now_hours;
    }

    /// Record an interaction: familiarity rises on both directed edges so it
    /// stays symmetric even though trust is not.
    pub fn record_contact(&mut self, a: &str, b: &str, familiarity_gain: f64, now_hours: f64) {
        for (from, to) in [(a, b), (b, a)] {
            let edge = self
                .edges
                .entry((from.to_string(), to.to_string()))
                .or_default();
            edge.familiarity = (edge.familiarity + familiarity_gain).clamp(0.0, 1.0);
            edge.last_interaction_hours = now_hours;
        }
    }

    /// Partners of an agent with their trust, most trusted first. The gossip
    /// step weights partner choice by this.
    pub fn partners_by_trust(&self, agent_id: &str) -> Vec<(String, f64)> {
        let mut partners: Vec<(String, f64)> = self
            .edges
            .iter()
            .filter_map(|((from, to), edge)| {
                if from == agent_id {
                    Some((to.clone(), edge.trust))
                } else {
                    None
                }
            })
            .collect();
        partners.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        partners
    }

    pub fn relations_of(&self, agent_id: &str) -> Vec<(String, Relation)> {
        self.edges
            .iter()
            .filter_map(|((from, to), edge)| {
                if from == agent_id {
                    Some((to.clone(), edge.clone()))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// Player reputation ledger. Values always stay in [−1, 1]; faction changes
/// ripple to enemy factions with the opposite sign.
#[derive(Debug, Default, Clone)]
pub struct ReputationLedger {
    agent_rep: BTreeMap<(String, String), f64>,
    faction_rep: BTreeMap<(String, String), f64>,
}

impl ReputationLedger {
    pub fn agent_reputation(&self, player_id: &str, agent_id: &str) -> f64 {
        self.agent_rep
            .get(&(player_id.to_string(), agent_id.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn faction_reputation(&self, player_id: &str, faction_id: &str) -> f64 {
        self.faction_rep
            .get(&(player_id.to_string(), faction_id.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn adjust_agent_reputation(&mut self, player_id: &str, agent_id: &str, delta: f64) -> f64 {
        let slot = self
            .agent_rep
            .entry((player_id.to_string(), agent_id.to_string()))
            .or_insert(0.0);
        *slot = (*slot + delta).clamp(-1.0, 1.0);
        *slot
    }

    /// Apply a faction reputation change and ripple `−eta · delta` into each
    /// of the named enemy factions. Every touched value stays clamped.
    pub fn adjust_faction_reputation(
        &mut self,
        player_id: &str,
        faction_id: &str,
        delta: f64,
        enemies: &[String],
        eta: f64,
    ) -> f64 {
        let slot = self
            .faction_rep
            .entry((player_id.to_string(), faction_id.to_string()))
            .or_insert(0.0);
        *slot = (*slot + delta).clamp(-1.0, 1.0);
        let result = *slot;

        for enemy in enemies {
            if enemy == faction_id {
                continue;
            }
            let enemy_slot = self
                .faction_rep
                .entry((player_id.to_string(), enemy.clone()))
                .or_insert(0.0);
            *enemy_slot = (*enemy_slot - eta * delta).clamp(-1.0, 1.0);
        }
        result
    }

    pub fn factions_for_player(&self, player_id: &str) -> Vec<(String, f64)> {
        self.faction_rep
            .iter()
            .filter_map(|((player, faction), value)| {
                if player == player_id {
                    Some((faction.clone(), *value))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn all_values_in_bounds(&self) -> bool {
        self.agent_rep
            .values()
            .chain(self.faction_rep.values())
            .all(|value| (-1.0..=1.0).contains(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_is_directed_familiarity_is_symmetric() {
        let mut graph = RelationGraph::default();
        graph.adjust_trust("vera", "marcus", 0.4, 1.0);
        graph.record_contact("vera", "marcus", 0.1, 1.0);

        assert_eq!(graph.trust("vera", "marcus"), 0.4);
        assert_eq!(graph.trust("marcus", "vera"), 0.0);
        assert_eq!(
            graph.familiarity("vera", "marcus"),
            graph.familiarity("marcus", "vera")
        );
    }

    #[test]
    fn trust_clamps_at_unit_bounds() {
        let mut graph = RelationGraph::default();
        for _ in 0..20 {
            graph.adjust_trust("vera", "marcus", 0.3, 0.0);
        }
        assert_eq!(graph.trust("vera", "marcus"), 1.0);
        for _ in 0..40 {
            graph.adjust_trust("vera", "marcus", -0.3, 0.0);
        }
        assert_eq!(graph.trust("vera", "marcus"), -1.0);
    }

    #[test]
    fn faction_ripple_pushes_enemies_the_other_way() {
        let mut ledger = ReputationLedger::default();
        let enemies = vec!["outcasts".to_string()];
        ledger.adjust_faction_reputation("p1", "guards", 0.2, &enemies, 0.5);

        assert!((ledger.faction_reputation("p1", "guards") - 0.2).abs() < 1e-12);
        assert!((ledger.faction_reputation("p1", "outcasts") + 0.1).abs() < 1e-12);
    }

    #[test]
    fn ripple_preserves_bounds_under_repeated_updates() {
        let mut ledger = ReputationLedger::default();
        let enemies = vec!["outcasts".to_string(), "raiders".to_string()];
        for _ in 0..100 {
            ledger.adjust_faction_reputation("p1", "guards", 0.15, &enemies, 0.5);
        }
        assert!(ledger.all_values_in_bounds());
        assert_eq!(ledger.faction_reputation("p1", "guards"), 1.0);
        assert_eq!(ledger.faction_reputation("p1", "outcasts"), -1.0);
    }

    #[test]
    fn partners_are_ordered_by_trust() {
        let mut graph = RelationGraph::default();
        graph.adjust_trust("vera", "marcus", 0.2, 0.0);
        graph.adjust_trust("vera", "edda", 0.8, 0.0);
        let partners = graph.partners_by_trust("vera");
        assert_eq!(partners[0].0, "edda");
        assert_eq!(partners[1].0, "marcus");
    }
}
