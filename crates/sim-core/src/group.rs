//! Multi-agent conversation groups: lifecycle, salience ranking for turn
//! selection, validation of orchestrated turns, and group tension.

use std::collections::{BTreeMap, BTreeSet};

use contracts::frames::{GroupTurn, ResponseType};
use serde::{Deserialize, Serialize};

const INTEREST_WEIGHT: f64 = 0.5;
const TENSION_WEIGHT: f64 = 0.5;
const RECENT_SPEAKER_PENALTY: f64 = 0.4;
/// A speaker who took one of the last N turns is penalized in the ranking.
const RECENT_TURN_WINDOW: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    /// `player:<id>` for the player, otherwise an agent id.
    pub speaker: String,
    pub content: String,
    pub response_type: ResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub at_hours: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub statements: u32,
    pub last_spoke_turn: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationGroup {
    pub group_id: String,
    pub player_id: String,
    pub player_name: String,
    pub location: String,
    pub participants: BTreeMap<String, Participant>,
    pub history: Vec<ConversationMessage>,
    pub tension: f64,
    pub created_at_hours: f64,
    pub last_activity_hours: f64,
    turn_counter: u64,
}

impl ConversationGroup {
    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Last few lines for prompt context, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[ConversationMessage] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }
}

/// Per-agent inputs to the salience score, supplied by the caller from the
/// relation graph and memory engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SalienceInputs {
    pub familiarity: f64,
    pub interest: f64,
    pub paranoia: f64,
}

#[derive(Debug, Default, Clone)]
pub struct GroupOrchestrator {
    groups: BTreeMap<String, ConversationGroup>,
    next_seq: u64,
}

impl GroupOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a group. `npc_ids` must already be resolved (explicit list or a
    /// proximity query) and non-empty; the cap is enforced here.
    pub fn start(
        &mut self,
        player_id: &str,
        player_name: &str,
        npc_ids: Vec<String>,
        location: &str,
        max_size: usize,
        now_hours: f64,
    ) -> Result<&ConversationGroup, String> {
        let mut participants = BTreeMap::new();
        for npc_id in npc_ids.into_iter().take(max_size.max(1)) {
            participants.insert(npc_id, Participant::default());
        }
        if participants.is_empty() {
            return Err("a conversation needs at least one NPC".to_string());
        }

        self.next_seq += 1;
        let group_id = format!("conv_{:04}", self.next_seq);
        let group = ConversationGroup {
            group_id: group_id.clone(),
            player_id: player_id.to_string(),
            player_name: player_name.to_string(),
            location: location.to_string(),
            participants,
            history: Vec::new(),
            tension: 0.0,
            created_at_hours: now_hours,
            last_activity_hours: now_hours,
            turn_counter: 0,
        };
        self.groups.insert(group_id.clone(), group);
        Ok(self.groups.get(&group_id).expect("group just inserted"))
    }

    pub fn get(&self, group_id: &str) -> Option<&ConversationGroup> {
        self.groups.get(group_id)
    }

    pub fn record_player_message(
        &mut self,
        group_id: &str,
        text: &str,
        target: Option<&str>,
        now_hours: f64,
    ) -> Result<(), String> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| format!("unknown group {group_id}"))?;
        group.turn_counter += 1;
        group.last_activity_hours = now_hours;
        group.history.push(ConversationMessage {
            speaker: format!("player:{}", group.player_id),
            content: text.to_string(),
            response_type: ResponseType::DirectReply,
            target: target.map(str::to_string),
            at_hours: now_hours,
        });
        Ok(())
    }

    /// Salience ranking for the next turn:
    /// `familiarity + w1·interest + w2·tension·paranoia − w3·recently_spoke`,
    /// highest first, ties broken by agent id for determinism.
    pub fn salience_ranking(
        &self,
        group_id: &str,
        inputs: &BTreeMap<String, SalienceInputs>,
    ) -> Vec<(String, f64)> {
        let Some(group) = self.groups.get(group_id) else {
            return Vec::new();
        };

        let mut ranking: Vec<(String, f64)> = group
            .participants
            .iter()
            .map(|(agent_id, participant)| {
                let input = inputs.get(agent_id).copied().unwrap_or_default();
                let recently_spoke = participant
                    .last_spoke_turn
                    .map(|turn| {
                        group.turn_counter.saturating_sub(turn) < RECENT_TURN_WINDOW as u64
                    })
                    .unwrap_or(false);
                let score = input.familiarity
                    + INTEREST_WEIGHT * input.interest
                    + TENSION_WEIGHT * group.tension * input.paranoia
                    - if recently_spoke {
                        RECENT_SPEAKER_PENALTY
                    } else {
                        0.0
                    };
                (agent_id.clone(), score)
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranking
    }

    /// Validate an orchestrated turn order: silent entries are dropped,
    /// unknown speakers are dropped, and each speaker appears at most once.
    pub fn validate_turns(&self, group_id: &str, proposed: Vec<GroupTurn>) -> Vec<GroupTurn> {
        let Some(group) = self.groups.get(group_id) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        proposed
            .into_iter()
            .filter(|turn| {
                turn.response_type != ResponseType::Silent
                    && group.participants.contains_key(&turn.speaker)
                    && seen.insert(turn.speaker.clone())
            })
            .collect()
    }

    /// Record one finalized speaker line and update the speaker's state.
    pub fn record_agent_line(
        &mut self,
        group_id: &str,
        turn: &GroupTurn,
        now_hours: f64,
    ) -> Result<(), String> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| format!("unknown group {group_id}"))?;
        let turn_counter = group.turn_counter;
        let participant = group
            .participants
            .get_mut(&turn.speaker)
            .ok_or_else(|| format!("{} is not in group {group_id}", turn.speaker))?;
        participant.statements += 1;
        participant.last_spoke_turn = Some(turn_counter);
        group.last_activity_hours = now_hours;
        group.history.push(ConversationMessage {
            speaker: turn.speaker.clone(),
            content: turn.dialogue.clone(),
            response_type: turn.response_type,
            target: turn.addressed_to.clone(),
            at_hours: now_hours,
        });
        Ok(())
    }

    /// Fold one message's response mix into group tension:
    /// `tension ← clamp(tension + 0.15·(disagreements + interruptions)
    ///  − 0.05·agreements)`.
    pub fn update_tension(&mut self, group_id: &str, turns: &[GroupTurn]) -> Option<f64> {
        let group = self.groups.get_mut(group_id)?;
        let heated = turns
            .iter()
            .filter(|turn| {
                matches!(
                    turn.response_type,
                    ResponseType::Disagreement | ResponseType::Interruption
                )
            })
            .count() as f64;
        let calming = turns
            .iter()
            .filter(|turn| turn.response_type == ResponseType::Agreement)
            .count() as f64;
        group.tension = (group.tension + 0.15 * heated - 0.05 * calming).clamp(0.0, 1.0);
        Some(group.tension)
    }

    pub fn add_agent(
        &mut self,
        group_id: &str,
        agent_id: &str,
        max_size: usize,
        now_hours: f64,
    ) -> Result<(), String> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| format!("unknown group {group_id}"))?;
        if group.participants.len() >= max_size {
            return Err(format!("group {group_id} is full"));
        }
        group
            .participants
            .entry(agent_id.to_string())
            .or_default();
        group.last_activity_hours = now_hours;
        Ok(())
    }

    /// Remove an agent mid-conversation. Removing the last NPC ends the
    /// group; the finished group is returned in that case.
    pub fn remove_agent(
        &mut self,
        group_id: &str,
        agent_id: &str,
        now_hours: f64,
    ) -> Result<Option<ConversationGroup>, String> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| format!("unknown group {group_id}"))?;
        if group.participants.remove(agent_id).is_none() {
            return Err(format!("{agent_id} is not in group {group_id}"));
        }
        group.last_activity_hours = now_hours;
        if group.participants.is_empty() {
            return Ok(self.groups.remove(group_id));
        }
        Ok(None)
    }

    pub fn end(&mut self, group_id: &str) -> Option<ConversationGroup> {
        self.groups.remove(group_id)
    }

    /// End groups idle past the timeout; returns what was removed.
    pub fn expire_idle(&mut self, now_hours: f64, timeout_secs: f64) -> Vec<ConversationGroup> {
        let timeout_hours = timeout_secs / 3600.0;
        let expired: Vec<String> = self
            .groups
            .values()
            .filter(|group| now_hours - group.last_activity_hours > timeout_hours)
            .map(|group| group.group_id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|group_id| self.groups.remove(&group_id))
            .collect()
    }

    /// Agents currently in any conversation; feeds tier classification.
    pub fn agents_in_conversations(&self) -> BTreeSet<String> {
        self.groups
            .values()
            .flat_map(|group| group.participants.keys().cloned())
            .collect()
    }

    pub fn groups_for_player(&self, player_id: &str) -> Vec<&ConversationGroup> {
        self.groups
            .values()
            .filter(|group| group.player_id == player_id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, response_type: ResponseType) -> GroupTurn {
        GroupTurn {
            speaker: speaker.to_string(),
            response_type,
            addressed_to: None,
            dialogue: format!("{speaker} says something"),
        }
    }

    fn orchestrator_with_group() -> (GroupOrchestrator, String) {
        let mut orchestrator = GroupOrchestrator::new();
        let group_id = orchestrator
            .start(
                "p1",
                "Traveler",
                vec!["marcus".to_string(), "vera".to_string()],
                "gates",
                6,
                0.0,
            )
            .expect("group starts")
            .group_id
            .clone();
        (orchestrator, group_id)
    }

    #[test]
    fn a_group_needs_at_least_one_npc() {
        let mut orchestrator = GroupOrchestrator::new();
        assert!(orchestrator
            .start("p1", "Traveler", Vec::new(), "gates", 6, 0.0)
            .is_err());
    }

    #[test]
    fn validation_drops_silent_unknown_and_duplicate_speakers() {
        let (orchestrator, group_id) = orchestrator_with_group();
        let validated = orchestrator.validate_turns(
            &group_id,
            vec![
                turn("vera", ResponseType::DirectReply),
                turn("vera", ResponseType::Elaboration),
                turn("marcus", ResponseType::Silent),
                turn("stranger", ResponseType::DirectReply),
            ],
        );
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].speaker, "vera");
    }

    #[test]
    fn tension_rises_on_disagreement_and_falls_on_agreement() {
        let (mut orchestrator, group_id) = orchestrator_with_group();
        let heated = orchestrator
            .update_tension(
                &group_id,
                &[
                    turn("vera", ResponseType::Disagreement),
                    turn("marcus", ResponseType::Interruption),
                ],
            )
            .expect("group exists");
        assert!((heated - 0.3).abs() < 1e-12);

        let calmer = orchestrator
            .update_tension(&group_id, &[turn("vera", ResponseType::Agreement)])
            .expect("group exists");
        assert!((calmer - 0.25).abs() < 1e-12);
    }

    #[test]
    fn tension_is_clamped_to_unit_interval() {
        let (mut orchestrator, group_id) = orchestrator_with_group();
        for _ in 0..20 {
            orchestrator.update_tension(
                &group_id,
                &[
                    turn("vera", ResponseType::Disagreement),
                    turn("marcus", ResponseType::Disagreement),
                ],
            );
        }
        assert_eq!(
            orchestrator.get(&group_id).expect("group").tension,
            1.0
        );
    }

    #[test]
    fn recent_speakers_are_penalized_in_salience() {
        let (mut orchestrator, group_id) = orchestrator_with_group();
        orchestrator
            .record_player_message(&group_id, "hello", None, 0.1)
            .expect("recorded");
        orchestrator
            .record_agent_line(&group_id, &turn("vera", ResponseType::DirectReply), 0.1)
            .expect("recorded");

        let mut inputs = BTreeMap::new();
        inputs.insert("vera".to_string(), SalienceInputs::default());
        inputs.insert("marcus".to_string(), SalienceInputs::default());
        let ranking = orchestrator.salience_ranking(&group_id, &inputs);
        assert_eq!(ranking[0].0, "marcus", "vera just spoke");
        assert!(ranking[0].1 > ranking[1].1);
    }

    #[test]
    fn removing_the_last_npc_ends_the_group() {
        let (mut orchestrator, group_id) = orchestrator_with_group();
        assert!(orchestrator
            .remove_agent(&group_id, "vera", 1.0)
            .expect("removed")
            .is_none());
        let ended = orchestrator
            .remove_agent(&group_id, "marcus", 1.0)
            .expect("removed");
        assert!(ended.is_some());
        assert!(orchestrator.get(&group_id).is_none());
    }

    #[test]
    fn idle_groups_expire_after_the_timeout() {
        let (mut orchestrator, group_id) = orchestrator_with_group();
        assert!(orchestrator.expire_idle(0.1, 600.0).is_empty());
        let expired = orchestrator.expire_idle(0.2, 600.0);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].group_id, group_id);
    }
}
