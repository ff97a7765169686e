//! v1 cross-boundary contracts for the simulation kernel, API, and persistence.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod events;
pub mod faction;
pub mod frames;
pub mod memory;
pub mod serde_u64_string;

/// Persisted schema version, stored in the `meta` table. Forward-only.
pub const SCHEMA_VERSION: i64 = 1;
pub const HOURS_PER_DAY: f64 = 24.0;

/// Subject key for a player, as stored on memories, rumors, and reputation.
pub fn player_subject(player_id: &str) -> String {
    format!("player:{player_id}")
}

/// Subject key for an agent.
pub fn agent_subject(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldTime {
    pub day: u64,
    pub hour: u8,
    pub minute: u8,
    pub total_hours: f64,
}

impl WorldTime {
    pub fn from_total_hours(total_hours: f64) -> Self {
        let total = total_hours.max(0.0);
        let day = (total / HOURS_PER_DAY) as u64;
        let hour_of_day = total - day as f64 * HOURS_PER_DAY;
        let hour = hour_of_day as u8;
        let minute = ((hour_of_day - f64::from(hour)) * 60.0) as u8;
        Self {
            day,
            hour,
            minute: minute.min(59),
            total_hours: total,
        }
    }

    /// Advance by a non-negative number of simulated hours.
    pub fn advance(&mut self, delta_hours: f64) {
        *self = Self::from_total_hours(self.total_hours + delta_hours.max(0.0));
    }
}

impl fmt::Display for WorldTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "day {} {:02}:{:02}", self.day, self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AgentUnknown,
    AgentUninitialized,
    OracleTimeout,
    OracleMalformed,
    StoreUnavailable,
    TierBudgetExceeded,
    InvalidArgument,
    GroupClosed,
    RateLimited,
}

impl ErrorKind {
    pub fn retryable(self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::RateLimited)
    }
}

/// Caller-facing error payload. The HTTP/WS boundary wraps this as
/// `{"error": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: Some(kind.retryable()),
        }
    }

    pub fn agent_unknown(agent_id: &str) -> Self {
        Self::new(
            ErrorKind::AgentUnknown,
            format!("no agent with id {agent_id}"),
        )
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn group_closed(group_id: &str) -> Self {
        Self::new(
            ErrorKind::GroupClosed,
            format!("conversation group {group_id} is closed"),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Runtime configuration for the simulation service. Every tunable named by
/// the component specs lives here; components receive the whole struct and
/// read what they need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    #[serde(with = "serde_u64_string")]
    pub seed: u64,
    /// Simulated hours advanced by one tick.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// Wall seconds between autorun ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: f64,
    #[serde(default = "default_decay_lambda")]
    pub decay_lambda_per_hour: f64,
    #[serde(default = "default_reinforce_alpha")]
    pub reinforce_alpha: f64,
    #[serde(default = "default_forget_threshold")]
    pub forget_threshold: f64,
    #[serde(default = "default_delete_threshold")]
    pub delete_threshold: f64,
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,
    #[serde(default = "default_rumor_limit")]
    pub rumor_limit: usize,
    #[serde(default = "default_share_top_m")]
    pub share_top_m: usize,
    #[serde(default = "default_share_trust_factor")]
    pub share_trust_factor: f64,
    #[serde(default = "default_topic_limit")]
    pub topic_limit_per_utterance: usize,
    #[serde(default = "default_faction_ripple")]
    pub faction_ripple: f64,
    #[serde(default = "default_enemy_ripple_eta")]
    pub enemy_ripple_eta: f64,
    #[serde(default = "default_relation_drift_half_life_hours")]
    pub relation_drift_half_life_hours: f64,
    #[serde(default = "default_gossip_chance")]
    pub gossip_chance: f64,
    #[serde(default = "default_nearby_radius")]
    pub nearby_radius: f64,
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    #[serde(default = "default_group_idle_timeout_secs")]
    pub group_idle_timeout_secs: f64,
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: f64,
    #[serde(default = "default_dormant_after_secs")]
    pub dormant_after_secs: f64,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_tick_wall_budget_ms")]
    pub tick_wall_budget_ms: u64,
    #[serde(default = "default_event_ring_capacity")]
    pub event_ring_capacity: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_write_behind_window_secs")]
    pub write_behind_window_secs: f64,
    #[serde(default = "default_cognize_timeout_secs")]
    pub cognize_timeout_secs: u64,
    #[serde(default = "default_synthesize_timeout_secs")]
    pub synthesize_timeout_secs: u64,
    #[serde(default = "default_transcribe_timeout_secs")]
    pub transcribe_timeout_secs: u64,
    #[serde(default = "default_quest_expiry_hours")]
    pub quest_expiry_hours: f64,
    #[serde(default = "default_urgency_event_threshold")]
    pub urgency_event_threshold: f64,
}

impl SimConfig {
    /// Ticks that make up one simulated hour at the configured scale,
    /// rounded to at least one. Drives the dormant-tier heartbeat cadence.
    pub fn ticks_per_hour(&self) -> u64 {
        if self.time_scale <= 0.0 {
            return 1;
        }
        (1.0 / self.time_scale).round().max(1.0) as u64
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            time_scale: default_time_scale(),
            tick_interval_secs: default_tick_interval_secs(),
            decay_lambda_per_hour: default_decay_lambda(),
            reinforce_alpha: default_reinforce_alpha(),
            forget_threshold: default_forget_threshold(),
            delete_threshold: default_delete_threshold(),
            retrieval_limit: default_retrieval_limit(),
            rumor_limit: default_rumor_limit(),
            share_top_m: default_share_top_m(),
            share_trust_factor: default_share_trust_factor(),
            topic_limit_per_utterance: default_topic_limit(),
            faction_ripple: default_faction_ripple(),
            enemy_ripple_eta: default_enemy_ripple_eta(),
            relation_drift_half_life_hours: default_relation_drift_half_life_hours(),
            gossip_chance: default_gossip_chance(),
            nearby_radius: default_nearby_radius(),
            max_group_size: default_max_group_size(),
            group_idle_timeout_secs: default_group_idle_timeout_secs(),
            active_window_secs: default_active_window_secs(),
            dormant_after_secs: default_dormant_after_secs(),
            worker_threads: default_worker_threads(),
            tick_wall_budget_ms: default_tick_wall_budget_ms(),
            event_ring_capacity: default_event_ring_capacity(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            write_behind_window_secs: default_write_behind_window_secs(),
            cognize_timeout_secs: default_cognize_timeout_secs(),
            synthesize_timeout_secs: default_synthesize_timeout_secs(),
            transcribe_timeout_secs: default_transcribe_timeout_secs(),
            quest_expiry_hours: default_quest_expiry_hours(),
            urgency_event_threshold: default_urgency_event_threshold(),
        }
    }
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_tick_interval_secs() -> f64 {
    60.0
}

fn default_decay_lambda() -> f64 {
    0.02
}

fn default_reinforce_alpha() -> f64 {
    0.3
}

fn default_forget_threshold() -> f64 {
    0.05
}

fn default_delete_threshold() -> f64 {
    0.01
}

fn default_retrieval_limit() -> usize {
    8
}

fn default_rumor_limit() -> usize {
    3
}

fn default_share_top_m() -> usize {
    3
}

fn default_share_trust_factor() -> f64 {
    0.7
}

fn default_topic_limit() -> usize {
    3
}

fn default_faction_ripple() -> f64 {
    0.25
}

fn default_enemy_ripple_eta() -> f64 {
    0.5
}

fn default_relation_drift_half_life_hours() -> f64 {
    48.0
}

fn default_gossip_chance() -> f64 {
    0.05
}

fn default_nearby_radius() -> f64 {
    500.0
}

fn default_max_group_size() -> usize {
    6
}

fn default_group_idle_timeout_secs() -> f64 {
    600.0
}

fn default_active_window_secs() -> f64 {
    60.0
}

fn default_dormant_after_secs() -> f64 {
    1800.0
}

fn default_worker_threads() -> usize {
    let available = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(1);
    available.saturating_sub(1).clamp(1, 32)
}

fn default_tick_wall_budget_ms() -> u64 {
    250
}

fn default_event_ring_capacity() -> usize {
    1000
}

fn default_cache_capacity() -> usize {
    5000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_write_behind_window_secs() -> f64 {
    2.0
}

fn default_cognize_timeout_secs() -> u64 {
    15
}

fn default_synthesize_timeout_secs() -> u64 {
    30
}

fn default_transcribe_timeout_secs() -> u64 {
    20
}

fn default_quest_expiry_hours() -> f64 {
    168.0
}

fn default_urgency_event_threshold() -> f64 {
    0.85
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trip_serialization_preserves_values() {
        for seed in [1_u64, 7, 1337, 42_4242] {
            let mut cfg = SimConfig::default();
            cfg.seed = seed;
            cfg.time_scale = 0.5 + (seed % 4) as f64;
            cfg.retrieval_limit = 4 + (seed % 8) as usize;
            cfg.gossip_chance = 0.01 * (seed % 10) as f64;

            let json = serde_json::to_string(&cfg).expect("serialize config");
            let decoded: SimConfig = serde_json::from_str(&json).expect("deserialize config");
            assert_eq!(cfg, decoded);
        }
    }

    #[test]
    fn default_configuration_has_sane_core_parameters() {
        let cfg = SimConfig::default();

        assert!(cfg.time_scale > 0.0);
        assert!(cfg.decay_lambda_per_hour > 0.0);
        assert!(cfg.reinforce_alpha > 0.0 && cfg.reinforce_alpha < 1.0);
        assert!(cfg.forget_threshold > cfg.delete_threshold);
        assert!(cfg.retrieval_limit > 0);
        assert!(cfg.worker_threads >= 1 && cfg.worker_threads <= 32);
        assert!(cfg.max_group_size >= 1);
        assert!(cfg.event_ring_capacity > 0);
        assert!(cfg.cache_capacity > 0);
    }

    #[test]
    fn world_time_rolls_days_at_24_hours() {
        let mut time = WorldTime::default();
        time.advance(25.5);
        assert_eq!(time.day, 1);
        assert_eq!(time.hour, 1);
        assert_eq!(time.minute, 30);

        let before = time.total_hours;
        time.advance(-3.0);
        assert_eq!(time.total_hours, before, "time never moves backwards");
    }
}
