//! Agent-facing contracts: personality, vitals, mood, goals, and snapshots.

use serde::{Deserialize, Serialize};

pub const TRAIT_MIN: f64 = 0.05;
pub const TRAIT_MAX: f64 = 0.95;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TraitKind {
    Curiosity,
    Empathy,
    Aggression,
    Paranoia,
    Discipline,
    Romanticism,
    Opportunism,
    Loyalty,
}

impl TraitKind {
    pub const ALL: [TraitKind; 8] = [
        TraitKind::Curiosity,
        TraitKind::Empathy,
        TraitKind::Aggression,
        TraitKind::Paranoia,
        TraitKind::Discipline,
        TraitKind::Romanticism,
        TraitKind::Opportunism,
        TraitKind::Loyalty,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Curiosity => "curiosity",
            Self::Empathy => "empathy",
            Self::Aggression => "aggression",
            Self::Paranoia => "paranoia",
            Self::Discipline => "discipline",
            Self::Romanticism => "romanticism",
            Self::Opportunism => "opportunism",
            Self::Loyalty => "loyalty",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "curiosity" => Some(Self::Curiosity),
            "empathy" => Some(Self::Empathy),
            "aggression" => Some(Self::Aggression),
            "paranoia" | "anxiety" => Some(Self::Paranoia),
            "discipline" => Some(Self::Discipline),
            "romanticism" => Some(Self::Romanticism),
            "opportunism" => Some(Self::Opportunism),
            "loyalty" => Some(Self::Loyalty),
            _ => None,
        }
    }
}

/// Eight continuous traits, each held inside `[TRAIT_MIN, TRAIT_MAX]` by the
/// soft-clamp in the kernel. The contract type carries values only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Personality {
    pub curiosity: f64,
    pub empathy: f64,
    pub aggression: f64,
    pub paranoia: f64,
    pub discipline: f64,
    pub romanticism: f64,
    pub opportunism: f64,
    pub loyalty: f64,
}

impl Personality {
    pub fn get(&self, kind: TraitKind) -> f64 {
        match kind {
            TraitKind::Curiosity => self.curiosity,
            TraitKind::Empathy => self.empathy,
            TraitKind::Aggression => self.aggression,
            TraitKind::Paranoia => self.paranoia,
            TraitKind::Discipline => self.discipline,
            TraitKind::Romanticism => self.romanticism,
            TraitKind::Opportunism => self.opportunism,
            TraitKind::Loyalty => self.loyalty,
        }
    }

    pub fn set(&mut self, kind: TraitKind, value: f64) {
        let slot = match kind {
            TraitKind::Curiosity => &mut self.curiosity,
            TraitKind::Empathy => &mut self.empathy,
            TraitKind::Aggression => &mut self.aggression,
            TraitKind::Paranoia => &mut self.paranoia,
            TraitKind::Discipline => &mut self.discipline,
            TraitKind::Romanticism => &mut self.romanticism,
            TraitKind::Opportunism => &mut self.opportunism,
            TraitKind::Loyalty => &mut self.loyalty,
        };
        *slot = value;
    }
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            curiosity: 0.5,
            empathy: 0.5,
            aggression: 0.5,
            paranoia: 0.5,
            discipline: 0.5,
            romanticism: 0.5,
            opportunism: 0.5,
            loyalty: 0.5,
        }
    }
}

/// Hunger and fatigue grow toward 1.0 between ticks; 0.0 is sated / rested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Vitals {
    pub hunger: f64,
    pub fatigue: f64,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            hunger: 0.2,
            fatigue: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MoodLabel {
    Calm,
    Happy,
    Wary,
    Paranoid,
    Fearful,
    Aggressive,
}

impl MoodLabel {
    /// Derive the label from the arousal/valence plane.
    pub fn from_axes(arousal: f64, valence: f64) -> Self {
        if arousal > 0.7 {
            if valence < 0.3 {
                Self::Fearful
            } else if valence < 0.5 {
                Self::Paranoid
            } else {
                Self::Aggressive
            }
        } else if valence > 0.7 {
            Self::Happy
        } else if valence < 0.3 {
            Self::Wary
        } else {
            Self::Calm
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calm => "calm",
            Self::Happy => "happy",
            Self::Wary => "wary",
            Self::Paranoid => "paranoid",
            Self::Fearful => "fearful",
            Self::Aggressive => "aggressive",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Mood {
    pub label: MoodLabel,
    pub arousal: f64,
    pub valence: f64,
}

impl Default for Mood {
    fn default() -> Self {
        Self {
            label: MoodLabel::Calm,
            arousal: 0.5,
            valence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub goal_id: String,
    pub label: String,
    pub progress: f64,
    pub status: GoalStatus,
    pub created_at_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abandon_reason: Option<String>,
}

/// One entry of the append-only personality audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeltaLogEntry {
    pub trait_kind: TraitKind,
    pub from: f64,
    pub to: f64,
    pub delta: f64,
    pub reason: String,
    pub at_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub zone: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Active,
    Nearby,
    Idle,
    Dormant,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Nearby => "nearby",
            Self::Idle => "idle",
            Self::Dormant => "dormant",
        }
    }
}

/// Immutable identity fields chosen at init.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub agent_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_fingerprint: Option<String>,
}

/// Full point-in-time view of one agent, as returned by status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSnapshot {
    pub profile: AgentProfile,
    pub personality: Personality,
    pub vitals: Vitals,
    pub mood: Mood,
    pub goals: Vec<Goal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    pub tier: Tier,
    pub memory_count: usize,
    pub last_interaction_hours: Option<f64>,
}
