//! Cognitive frames: the structured output of one Brain pass, and the group
//! conversation turn shapes.

use serde::{Deserialize, Serialize};

use crate::memory::MemoryCategory;

pub const MAX_TRUST_DELTA: f64 = 0.2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Investigate,
    Guard,
    Trade,
    Assist,
    Flee,
    Attack,
    Socialize,
    Ignore,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Investigate => "investigate",
            Self::Guard => "guard",
            Self::Trade => "trade",
            Self::Assist => "assist",
            Self::Flee => "flee",
            Self::Attack => "attack",
            Self::Socialize => "socialize",
            Self::Ignore => "ignore",
        }
    }

    /// Loose parse for provider output; providers capitalize inconsistently.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "investigate" => Some(Self::Investigate),
            "guard" => Some(Self::Guard),
            "trade" => Some(Self::Trade),
            "assist" | "help" => Some(Self::Assist),
            "flee" => Some(Self::Flee),
            "attack" => Some(Self::Attack),
            "socialize" => Some(Self::Socialize),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MoodShift {
    pub arousal_delta: f64,
    pub valence_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedTopic {
    pub category: MemoryCategory,
    pub content: String,
    pub emotional_weight: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// The validated result of one cognition pass: hidden reflection, spoken
/// dialogue, an action intent, and the emotional/relational deltas to apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CognitiveFrame {
    pub reflection: String,
    pub dialogue: String,
    pub intent: Intent,
    pub mood_shift: MoodShift,
    pub urgency: f64,
    pub trust_delta: f64,
    pub emotional_weight: f64,
    #[serde(default)]
    pub extracted_topics: Vec<ExtractedTopic>,
}

impl CognitiveFrame {
    /// Clamp every bounded field into its contract range and substitute the
    /// silent dialogue marker for an empty line.
    pub fn sanitized(mut self) -> Self {
        if self.dialogue.trim().is_empty() {
            self.dialogue = "...".to_string();
        }
        self.urgency = self.urgency.clamp(0.0, 1.0);
        self.trust_delta = self.trust_delta.clamp(-MAX_TRUST_DELTA, MAX_TRUST_DELTA);
        self.emotional_weight = self.emotional_weight.clamp(0.0, 1.0);
        self.mood_shift.arousal_delta = self.mood_shift.arousal_delta.clamp(-1.0, 1.0);
        self.mood_shift.valence_delta = self.mood_shift.valence_delta.clamp(-1.0, 1.0);
        for topic in &mut self.extracted_topics {
            topic.emotional_weight = topic.emotional_weight.clamp(0.0, 1.0);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Timeout,
    Malformed,
    Unavailable,
}

/// Result of one Oracle cognition call. A fallback still carries a usable
/// frame so the interactive request can succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CognizeOutcome {
    Ok { frame: CognitiveFrame },
    Fallback {
        reason: FallbackReason,
        frame: CognitiveFrame,
    },
}

impl CognizeOutcome {
    pub fn frame(&self) -> &CognitiveFrame {
        match self {
            Self::Ok { frame } | Self::Fallback { frame, .. } => frame,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    DirectReply,
    Agreement,
    Disagreement,
    Elaboration,
    Interruption,
    Redirect,
    Silent,
}

impl ResponseType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "direct_reply" | "reply" => Some(Self::DirectReply),
            "agreement" | "agree" => Some(Self::Agreement),
            "disagreement" | "disagree" => Some(Self::Disagreement),
            "elaboration" | "elaborate" => Some(Self::Elaboration),
            "interruption" | "interrupt" => Some(Self::Interruption),
            "redirect" => Some(Self::Redirect),
            "silent" => Some(Self::Silent),
            _ => None,
        }
    }
}

/// A turn proposed by the group orchestrator, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupTurn {
    pub speaker: String,
    pub response_type: ResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addressed_to: Option<String>,
    pub dialogue: String,
}

/// One finalized speaker line in a group response, in delivery order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeakerLine {
    pub speaker: String,
    pub response_type: ResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addressed_to: Option<String>,
    pub dialogue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    pub mood: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_bounds_every_field() {
        let frame = CognitiveFrame {
            reflection: "thinking".to_string(),
            dialogue: "   ".to_string(),
            intent: Intent::Guard,
            mood_shift: MoodShift {
                arousal_delta: 4.0,
                valence_delta: -4.0,
            },
            urgency: 7.5,
            trust_delta: -0.9,
            emotional_weight: 3.0,
            extracted_topics: Vec::new(),
        }
        .sanitized();

        assert_eq!(frame.dialogue, "...");
        assert_eq!(frame.urgency, 1.0);
        assert_eq!(frame.trust_delta, -MAX_TRUST_DELTA);
        assert_eq!(frame.emotional_weight, 1.0);
        assert_eq!(frame.mood_shift.arousal_delta, 1.0);
        assert_eq!(frame.mood_shift.valence_delta, -1.0);
    }

    #[test]
    fn intent_parse_is_case_insensitive() {
        assert_eq!(Intent::parse("Investigate"), Some(Intent::Investigate));
        assert_eq!(Intent::parse(" GUARD "), Some(Intent::Guard));
        assert_eq!(Intent::parse("dance"), None);
    }
}
