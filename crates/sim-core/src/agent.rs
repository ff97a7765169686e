//! Per-agent mutable state and the mutation primitives that enforce its
//! invariants: soft-clamped personality, monotonic vitals, bounded mood.

use contracts::agent::{
    AgentProfile, DeltaLogEntry, Goal, GoalStatus, Mood, MoodLabel, Personality, TraitKind,
    Vitals, TRAIT_MAX, TRAIT_MIN,
};
use contracts::frames::CognitiveFrame;

/// Saturating update for personality traits. The raw sum is pushed through a
/// sigmoid centered on 0.5 and rescaled into `[TRAIT_MIN, TRAIT_MAX]`, so no
/// history of deltas can escape the band.
pub fn soft_clamp(value: f64) -> f64 {
    let x = (value - 0.5) * 10.0;
    let sigmoid = 1.0 / (1.0 + (-x).exp());
    TRAIT_MIN + (TRAIT_MAX - TRAIT_MIN) * sigmoid
}

#[derive(Debug, Clone)]
pub struct AgentState {
    pub profile: AgentProfile,
    pub personality: Personality,
    pub vitals: Vitals,
    pub mood: Mood,
    pub goals: Vec<Goal>,
    pub delta_log: Vec<DeltaLogEntry>,
    pub last_interaction_hours: Option<f64>,
    pub interaction_count: u64,
    next_goal_seq: u64,
}

impl AgentState {
    pub fn new(profile: AgentProfile, personality: Personality) -> Self {
        let mut personality = personality;
        for kind in TraitKind::ALL {
            let value = personality.get(kind);
            if !(TRAIT_MIN..=TRAIT_MAX).contains(&value) {
                personality.set(kind, soft_clamp(value));
            }
        }
        Self {
            profile,
            personality,
            vitals: Vitals::default(),
            mood: Mood::default(),
            goals: Vec::new(),
            delta_log: Vec::new(),
            last_interaction_hours: None,
            interaction_count: 0,
            next_goal_seq: 1,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.profile.agent_id
    }

    /// Apply one trait delta through the soft clamp and append the audit
    /// entry. Returns the entry that was logged.
    pub fn apply_trait_delta(
        &mut self,
        kind: TraitKind,
        delta: f64,
        reason: &str,
        at_hours: f64,
    ) -> DeltaLogEntry {
        let from = self.personality.get(kind);
        let to = soft_clamp(from + delta);
        self.personality.set(kind, to);
        let entry = DeltaLogEntry {
            trait_kind: kind,
            from,
            to,
            delta,
            reason: reason.to_string(),
            at_hours,
        };
        self.delta_log.push(entry.clone());
        entry
    }

    /// Hunger saturates after four unfed hours, fatigue after six.
    pub fn apply_vital_decay(&mut self, delta_hours: f64) {
        let dh = delta_hours.max(0.0);
        self.vitals.hunger = (self.vitals.hunger + dh / 4.0).min(1.0);
        self.vitals.fatigue = (self.vitals.fatigue + dh / 6.0).min(1.0);
    }

    /// Fold a cognition frame's emotional shift into the mood plane and
    /// re-derive the label.
    pub fn apply_action(&mut self, frame: &CognitiveFrame) {
        self.mood.arousal = (self.mood.arousal + frame.mood_shift.arousal_delta).clamp(0.0, 1.0);
        self.mood.valence = (self.mood.valence + frame.mood_shift.valence_delta).clamp(0.0, 1.0);
        self.mood.label = MoodLabel::from_axes(self.mood.arousal, self.mood.valence);
    }

    pub fn record_interaction(&mut self, at_hours: f64) {
        self.last_interaction_hours = Some(at_hours);
        self.interaction_count += 1;
    }

    pub fn set_goal(&mut self, label: &str, at_hours: f64) -> &Goal {
        let goal = Goal {
            goal_id: format!("{}_goal_{}", self.profile.agent_id, self.next_goal_seq),
            label: label.to_string(),
            progress: 0.0,
            status: GoalStatus::Active,
            created_at_hours: at_hours,
            abandon_reason: None,
        };
        self.next_goal_seq += 1;
        self.goals.push(goal);
        self.goals.last().expect("goal just pushed")
    }

    /// Advance a goal; completion happens at progress 1.0. Returns the new
    /// status, or None for an unknown goal id.
    pub fn progress_goal(&mut self, goal_id: &str, delta: f64) -> Option<GoalStatus> {
        let goal = self
            .goals
            .iter_mut()
            .find(|goal| goal.goal_id == goal_id && goal.status == GoalStatus::Active)?;
        goal.progress = (goal.progress + delta).clamp(0.0, 1.0);
        if goal.progress >= 1.0 {
            goal.status = GoalStatus::Completed;
        }
        Some(goal.status)
    }

    pub fn abandon_goal(&mut self, goal_id: &str, reason: &str) -> bool {
        match self
            .goals
            .iter_mut()
            .find(|goal| goal.goal_id == goal_id && goal.status == GoalStatus::Active)
        {
            Some(goal) => {
                goal.status = GoalStatus::Abandoned;
                goal.abandon_reason = Some(reason.to_string());
                true
            }
            None => false,
        }
    }

    pub fn active_goals(&self) -> impl Iterator<Item = &Goal> {
        self.goals
            .iter()
            .filter(|goal| goal.status == GoalStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::frames::{Intent, MoodShift};

    fn test_agent() -> AgentState {
        AgentState::new(
            AgentProfile {
                agent_id: "vera".to_string(),
                role: "gate guard".to_string(),
                faction: Some("guards".to_string()),
                voice_fingerprint: None,
            },
            Personality::default(),
        )
    }

    fn frame_with_shift(arousal: f64, valence: f64) -> CognitiveFrame {
        CognitiveFrame {
            reflection: String::new(),
            dialogue: "hm".to_string(),
            intent: Intent::Guard,
            mood_shift: MoodShift {
                arousal_delta: arousal,
                valence_delta: valence,
            },
            urgency: 0.5,
            trust_delta: 0.0,
            emotional_weight: 0.5,
            extracted_topics: Vec::new(),
        }
    }

    #[test]
    fn soft_clamp_never_leaves_the_band() {
        for raw in [-100.0, -1.0, 0.0, 0.05, 0.5, 0.95, 1.0, 5.0, 100.0] {
            let clamped = soft_clamp(raw);
            assert!(
                (TRAIT_MIN..=TRAIT_MAX).contains(&clamped),
                "soft_clamp({raw}) = {clamped}"
            );
        }
    }

    #[test]
    fn hammering_a_trait_upward_saturates_monotonically() {
        let mut agent = test_agent();
        let mut previous = agent.personality.empathy;
        for i in 0..1000 {
            agent.apply_trait_delta(TraitKind::Empathy, 0.5, "stress test", i as f64);
            let current = agent.personality.empathy;
            assert!(current >= previous, "trait regressed at step {i}");
            assert!(current <= TRAIT_MAX);
            previous = current;
        }
        assert!(agent.personality.empathy > 0.94);
        assert_eq!(agent.delta_log.len(), 1000);
    }

    #[test]
    fn delta_log_records_from_and_to() {
        let mut agent = test_agent();
        let entry = agent.apply_trait_delta(TraitKind::Paranoia, 0.1, "threatened", 3.0);
        assert_eq!(entry.from, 0.5);
        assert_eq!(entry.to, soft_clamp(0.6));
        assert_eq!(entry.reason, "threatened");
    }

    #[test]
    fn vitals_rise_and_cap_at_one() {
        let mut agent = test_agent();
        agent.apply_vital_decay(2.0);
        assert!((agent.vitals.hunger - 0.7).abs() < 1e-9);
        assert!((agent.vitals.fatigue - (0.3 + 2.0 / 6.0)).abs() < 1e-9);

        agent.apply_vital_decay(100.0);
        assert_eq!(agent.vitals.hunger, 1.0);
        assert_eq!(agent.vitals.fatigue, 1.0);
    }

    #[test]
    fn mood_shift_is_bounded_and_relabeled() {
        let mut agent = test_agent();
        agent.apply_action(&frame_with_shift(5.0, -5.0));
        assert_eq!(agent.mood.arousal, 1.0);
        assert_eq!(agent.mood.valence, 0.0);
        assert_eq!(agent.mood.label, MoodLabel::Fearful);
    }

    #[test]
    fn goal_lifecycle_set_progress_abandon() {
        let mut agent = test_agent();
        let goal_id = agent.set_goal("patrol the wall", 0.0).goal_id.clone();

        assert_eq!(
            agent.progress_goal(&goal_id, 0.4),
            Some(GoalStatus::Active)
        );
        assert_eq!(
            agent.progress_goal(&goal_id, 0.7),
            Some(GoalStatus::Completed)
        );
        // A completed goal can no longer be progressed or abandoned.
        assert_eq!(agent.progress_goal(&goal_id, 0.1), None);
        assert!(!agent.abandon_goal(&goal_id, "done anyway"));

        let other = agent.set_goal("find the smuggler", 1.0).goal_id.clone();
        assert!(agent.abandon_goal(&other, "lost the trail"));
        assert_eq!(agent.active_goals().count(), 0);
    }
}
