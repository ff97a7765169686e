//! Memory and rumor records as exchanged between kernel, store, and API.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Family,
    Goal,
    Fear,
    Event,
    Secret,
    Preference,
    Origin,
    Profession,
    Crime,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 9] = [
        MemoryCategory::Family,
        MemoryCategory::Goal,
        MemoryCategory::Fear,
        MemoryCategory::Event,
        MemoryCategory::Secret,
        MemoryCategory::Preference,
        MemoryCategory::Origin,
        MemoryCategory::Profession,
        MemoryCategory::Crime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::Goal => "goal",
            Self::Fear => "fear",
            Self::Event => "event",
            Self::Secret => "secret",
            Self::Preference => "preference",
            Self::Origin => "origin",
            Self::Profession => "profession",
            Self::Crime => "crime",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value.trim().to_lowercase())
    }
}

/// Whether the owner witnessed the memory or heard it from another agent.
/// Secondhand memories never upgrade to firsthand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemorySource {
    Firsthand,
    Secondhand { from: String },
}

impl MemorySource {
    pub fn is_secondhand(&self) -> bool {
        matches!(self, Self::Secondhand { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub owner: String,
    /// Subject key: `player:<id>` or `agent:<id>`.
    pub subject: String,
    pub category: MemoryCategory,
    pub content: String,
    pub strength: f64,
    pub emotional_weight: f64,
    pub created_at_hours: f64,
    pub last_referenced_at_hours: f64,
    pub ref_count: u32,
    pub source: MemorySource,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl MemoryRecord {
    /// Retrieval rank: strong, emotionally loaded memories surface first.
    pub fn retrieval_score(&self) -> f64 {
        self.strength * (1.0 + 0.5 * self.emotional_weight)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RumorRecord {
    pub rumor_id: String,
    /// Subject key of who the rumor is about.
    pub about: String,
    pub content: String,
    pub created_by: String,
    pub strength: f64,
    pub truthfulness: f64,
    /// Agents that have heard this rumor.
    #[serde(default)]
    pub spread: BTreeSet<String>,
    pub created_at_hours: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_round_trip() {
        for category in MemoryCategory::ALL {
            assert_eq!(MemoryCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn retrieval_score_prefers_emotional_weight_at_equal_strength() {
        let base = MemoryRecord {
            memory_id: "mem_1".to_string(),
            owner: "vera".to_string(),
            subject: "player:p1".to_string(),
            category: MemoryCategory::Event,
            content: "raiders at the gate".to_string(),
            strength: 0.6,
            emotional_weight: 0.2,
            created_at_hours: 0.0,
            last_referenced_at_hours: 0.0,
            ref_count: 0,
            source: MemorySource::Firsthand,
            keywords: Vec::new(),
        };
        let loaded = MemoryRecord {
            emotional_weight: 0.9,
            ..base.clone()
        };
        assert!(loaded.retrieval_score() > base.retrieval_score());
    }
}
