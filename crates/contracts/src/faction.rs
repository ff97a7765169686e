//! Faction, territory, trade-route, battle, and quest contracts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationLabel {
    Allied,
    Friendly,
    Neutral,
    Unfriendly,
    Hostile,
}

impl RelationLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.6 {
            Self::Allied
        } else if score >= 0.2 {
            Self::Friendly
        } else if score > -0.2 {
            Self::Neutral
        } else if score > -0.6 {
            Self::Unfriendly
        } else {
            Self::Hostile
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FactionRelation {
    pub score: f64,
    pub label: RelationLabel,
}

impl FactionRelation {
    pub fn from_score(score: f64) -> Self {
        let score = score.clamp(-1.0, 1.0);
        Self {
            score,
            label: RelationLabel::from_score(score),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactionState {
    pub faction_id: String,
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    /// Aggregate fighting strength, reduced by battle casualties.
    pub strength: f64,
    /// Pooled resources, accrued by trade.
    pub resources: f64,
    #[serde(default)]
    pub relations: BTreeMap<String, FactionRelation>,
}

impl FactionState {
    /// Factions this one regards as enemies (label Unfriendly or worse).
    pub fn enemies(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().filter_map(|(other, relation)| {
            if relation.score <= -0.2 {
                Some(other.as_str())
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Territory {
    pub territory_id: String,
    pub name: String,
    pub controlling_faction: String,
    pub control_strength: f64,
    pub strategic_value: f64,
    pub contested: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Active,
    Disrupted,
    Retired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRoute {
    pub route_id: String,
    pub from_location: String,
    pub to_location: String,
    pub from_agent: String,
    pub to_agent: String,
    #[serde(default)]
    pub goods: Vec<String>,
    pub profit_margin: f64,
    pub risk_level: f64,
    pub status: RouteStatus,
    pub total_trades: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trade_day: Option<u64>,
    pub established_at_hours: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    InProgress,
    AttackerWon,
    DefenderWon,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BattleCasualties {
    pub attacker: f64,
    pub defender: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Battle {
    pub battle_id: String,
    pub territory: String,
    pub attacker: String,
    pub defender: String,
    pub attacker_strength: f64,
    pub defender_strength: f64,
    pub status: BattleStatus,
    pub casualties: BattleCasualties,
    pub started_at_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at_hours: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactionEventKind {
    Skirmish,
    TradeDeal,
    Betrayal,
    AllianceFormed,
}

impl FactionEventKind {
    /// Deterministic relation-score delta applied between the two factions.
    pub fn score_delta(self) -> f64 {
        match self {
            Self::Skirmish => -0.15,
            Self::TradeDeal => 0.10,
            Self::Betrayal => -0.40,
            Self::AllianceFormed => 0.50,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "skirmish" => Some(Self::Skirmish),
            "trade_deal" => Some(Self::TradeDeal),
            "betrayal" => Some(Self::Betrayal),
            "alliance_formed" => Some(Self::AllianceFormed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestKind {
    Fetch,
    Protect,
    Investigate,
    Revenge,
    Trade,
    Rescue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestDifficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Available,
    Accepted,
    Completed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestRewards {
    pub gold: i64,
    pub reputation: f64,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quest {
    pub quest_id: String,
    pub giver: String,
    pub kind: QuestKind,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_player: Option<String>,
    #[serde(default)]
    pub objectives: Vec<String>,
    pub rewards: QuestRewards,
    pub difficulty: QuestDifficulty,
    pub status: QuestStatus,
    pub created_at_hours: f64,
    pub expires_at_hours: f64,
    /// Memory ids that inspired this quest.
    #[serde(default)]
    pub context_memories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_labels_follow_score_thresholds() {
        assert_eq!(RelationLabel::from_score(0.8), RelationLabel::Allied);
        assert_eq!(RelationLabel::from_score(0.3), RelationLabel::Friendly);
        assert_eq!(RelationLabel::from_score(0.0), RelationLabel::Neutral);
        assert_eq!(RelationLabel::from_score(-0.3), RelationLabel::Unfriendly);
        assert_eq!(RelationLabel::from_score(-0.9), RelationLabel::Hostile);
    }

    #[test]
    fn faction_event_deltas_are_signed_as_expected() {
        assert!(FactionEventKind::Skirmish.score_delta() < 0.0);
        assert!(FactionEventKind::TradeDeal.score_delta() > 0.0);
        assert!(FactionEventKind::Betrayal.score_delta() < FactionEventKind::Skirmish.score_delta());
        assert!(FactionEventKind::AllianceFormed.score_delta() > 0.0);
    }

    #[test]
    fn enemies_are_unfriendly_or_worse() {
        let mut faction = FactionState {
            faction_id: "guards".to_string(),
            name: "City Guards".to_string(),
            values: Vec::new(),
            strength: 1.0,
            resources: 0.0,
            relations: BTreeMap::new(),
        };
        faction
            .relations
            .insert("outcasts".to_string(), FactionRelation::from_score(-0.5));
        faction
            .relations
            .insert("traders".to_string(), FactionRelation::from_score(0.4));

        let enemies: Vec<&str> = faction.enemies().collect();
        assert_eq!(enemies, vec!["outcasts"]);
    }
}
