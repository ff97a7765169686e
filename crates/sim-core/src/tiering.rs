//! Tier classification bounds per-tick work. Active agents run the full
//! pipeline every tick; the quieter the agent, the rarer its updates.
//!
//! Thresholds are expressed in simulated time so classification stays
//! deterministic under replay. Slipped agents lose nothing: vitals decay is
//! computed from each agent's own last-processed timestamp, so a late update
//! covers the whole elapsed span.

use std::collections::{BTreeMap, BTreeSet};

use contracts::agent::Tier;
use contracts::SimConfig;

#[derive(Debug, Clone)]
struct ActivityState {
    tier: Tier,
    last_interaction_hours: Option<f64>,
    registered_at_hours: f64,
    last_processed_hours: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub active: usize,
    pub nearby: usize,
    pub idle: usize,
    pub dormant: usize,
}

impl TierCounts {
    /// Upper bound on cognition-bearing updates per tick implied by the
    /// cadence policy.
    pub fn cognition_budget(&self, ticks_per_hour: u64) -> f64 {
        self.active as f64
            + self.nearby as f64 / 2.0
            + self.idle as f64 / 8.0
            + self.dormant as f64 / ticks_per_hour.max(1) as f64
    }
}

#[derive(Debug, Default, Clone)]
pub struct TieringSystem {
    states: BTreeMap<String, ActivityState>,
}

impl TieringSystem {
    pub fn register(&mut self, agent_id: &str, now_hours: f64) {
        self.states.insert(
            agent_id.to_string(),
            ActivityState {
                tier: Tier::Idle,
                last_interaction_hours: None,
                registered_at_hours: now_hours,
                last_processed_hours: now_hours,
            },
        );
    }

    pub fn unregister(&mut self, agent_id: &str) {
        self.states.remove(agent_id);
    }

    pub fn record_interaction(&mut self, agent_id: &str, now_hours: f64) {
        if let Some(state) = self.states.get_mut(agent_id) {
            state.last_interaction_hours = Some(now_hours);
            state.tier = Tier::Active;
        }
    }

    pub fn tier_of(&self, agent_id: &str) -> Option<Tier> {
        self.states.get(agent_id).map(|state| state.tier)
    }

    /// Reclassify every agent. O(agents); runs once per tick.
    pub fn classify_all<F>(
        &mut self,
        now_hours: f64,
        config: &SimConfig,
        in_conversation: &BTreeSet<String>,
        player_zones: &BTreeSet<String>,
        zone_of: F,
    ) where
        F: Fn(&str) -> Option<String>,
    {
        let active_window_hours = config.active_window_secs / 3600.0;
        let dormant_after_hours = config.dormant_after_secs / 3600.0;

        for (agent_id, state) in &mut self.states {
            let since_interaction = state
                .last_interaction_hours
                .map(|at| now_hours - at)
                .unwrap_or(now_hours - state.registered_at_hours);

            state.tier = if in_conversation.contains(agent_id)
                || since_interaction <= active_window_hours
            {
                Tier::Active
            } else if zone_of(agent_id)
                .map(|zone| player_zones.contains(&zone))
                .unwrap_or(false)
            {
                Tier::Nearby
            } else if since_interaction <= dormant_after_hours {
                Tier::Idle
            } else {
                Tier::Dormant
            };
        }
    }

    /// Agents due for work this tick under the cadence policy, in id order.
    /// Active: every tick. Nearby: every 2nd. Idle: every 8th. Dormant: once
    /// per simulated hour.
    pub fn due_this_tick(&self, tick: u64, ticks_per_hour: u64) -> Vec<(String, Tier)> {
        let dormant_every = ticks_per_hour.max(1);
        self.states
            .iter()
            .filter_map(|(agent_id, state)| {
                let due = match state.tier {
                    Tier::Active => true,
                    Tier::Nearby => tick % 2 == 0,
                    Tier::Idle => tick % 8 == 0,
                    Tier::Dormant => tick % dormant_every == 0,
                };
                if due {
                    Some((agent_id.clone(), state.tier))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Simulated hours since this agent was last processed; advances the
    /// bookmark. Vitals decay over exactly this span, so slipped ticks are
    /// made up on the next update.
    pub fn take_elapsed(&mut self, agent_id: &str, now_hours: f64) -> f64 {
        match self.states.get_mut(agent_id) {
            Some(state) => {
                let elapsed = (now_hours - state.last_processed_hours).max(0.0);
                state.last_processed_hours = now_hours;
                elapsed
            }
            None => 0.0,
        }
    }

    pub fn counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for state in self.states.values() {
            match state.tier {
                Tier::Active => counts.active += 1,
                Tier::Nearby => counts.nearby += 1,
                Tier::Idle => counts.idle += 1,
                Tier::Dormant => counts.dormant += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimConfig {
        SimConfig::default()
    }

    #[test]
    fn fresh_agents_start_idle_then_sink_to_dormant() {
        let mut tiers = TieringSystem::default();
        tiers.register("vera", 0.0);
        let empty = BTreeSet::new();

        tiers.classify_all(0.1, &config(), &empty, &empty, |_| None);
        assert_eq!(tiers.tier_of("vera"), Some(Tier::Idle));

        // Half an hour of silence crosses the dormant threshold.
        tiers.classify_all(0.6, &config(), &empty, &empty, |_| None);
        assert_eq!(tiers.tier_of("vera"), Some(Tier::Dormant));
    }

    #[test]
    fn interaction_promotes_to_active_within_the_window() {
        let mut tiers = TieringSystem::default();
        tiers.register("vera", 0.0);
        tiers.record_interaction("vera", 5.0);
        let empty = BTreeSet::new();

        // 30 simulated seconds later: still inside the 60 s window.
        tiers.classify_all(5.0 + 30.0 / 3600.0, &config(), &empty, &empty, |_| None);
        assert_eq!(tiers.tier_of("vera"), Some(Tier::Active));

        // Two minutes later: window expired, no players around.
        tiers.classify_all(5.0 + 120.0 / 3600.0, &config(), &empty, &empty, |_| None);
        assert_eq!(tiers.tier_of("vera"), Some(Tier::Idle));
    }

    #[test]
    fn same_zone_as_player_means_nearby() {
        let mut tiers = TieringSystem::default();
        tiers.register("vera", 0.0);
        let empty = BTreeSet::new();
        let mut player_zones = BTreeSet::new();
        player_zones.insert("gates".to_string());

        tiers.classify_all(1.0, &config(), &empty, &player_zones, |_| {
            Some("gates".to_string())
        });
        assert_eq!(tiers.tier_of("vera"), Some(Tier::Nearby));
    }

    #[test]
    fn conversation_forces_active() {
        let mut tiers = TieringSystem::default();
        tiers.register("vera", 0.0);
        let mut talking = BTreeSet::new();
        talking.insert("vera".to_string());
        let empty = BTreeSet::new();

        tiers.classify_all(100.0, &config(), &talking, &empty, |_| None);
        assert_eq!(tiers.tier_of("vera"), Some(Tier::Active));
    }

    #[test]
    fn cadence_follows_tier() {
        let mut tiers = TieringSystem::default();
        tiers.register("vera", 0.0);
        let empty = BTreeSet::new();
        tiers.classify_all(1.0, &config(), &empty, &empty, |_| None); // Idle

        // Idle agents are due only on multiples of 8.
        assert!(tiers.due_this_tick(8, 1).iter().any(|(id, _)| id == "vera"));
        assert!(!tiers.due_this_tick(9, 1).iter().any(|(id, _)| id == "vera"));
    }

    #[test]
    fn elapsed_accumulates_across_slipped_ticks() {
        let mut tiers = TieringSystem::default();
        tiers.register("vera", 0.0);
        assert_eq!(tiers.take_elapsed("vera", 3.0), 3.0);
        assert_eq!(tiers.take_elapsed("vera", 3.0), 0.0);
        assert_eq!(tiers.take_elapsed("vera", 10.0), 7.0);
    }

    #[test]
    fn cognition_budget_matches_policy_shape() {
        let counts = TierCounts {
            active: 4,
            nearby: 8,
            idle: 16,
            dormant: 10,
        };
        let budget = counts.cognition_budget(5);
        assert!((budget - (4.0 + 4.0 + 2.0 + 2.0)).abs() < 1e-12);
    }
}
