//! Double-pass cognition. Pass one assembles prompt context under the
//! service lock; the Oracle call happens with the lock released; pass two
//! validates the frame and commits every effect before the response returns.

use contracts::agent::TraitKind;
use contracts::events::WorldEventKind;
use contracts::frames::{
    CognitiveFrame, CognizeOutcome, GroupTurn, Intent, MoodShift, ResponseType, SpeakerLine,
};
use contracts::memory::MemorySource;
use contracts::ApiError;
use serde_json::json;

use sim_core::group::SalienceInputs;
use sim_core::topics;

use crate::oracle::{CognizeRequest, GroupCognizeRequest, MemoryNote, RankedParticipant};
use crate::ServiceCore;

/// Everything one interaction produced, returned to the boundary after all
/// effects committed.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub frame: CognitiveFrame,
    pub fallback: bool,
    pub reputation: f64,
    pub faction_reputation: Option<(String, f64)>,
    pub cited_memories: Vec<String>,
}

impl ServiceCore {
    /// Pass one: gather personality, vitals, mood, the strongest memories and
    /// rumors about this player, faction stance, and goals. The cited memory
    /// ids come back so pass two can reinforce exactly what the prompt used.
    pub fn assemble_cognition(
        &mut self,
        agent_id: &str,
        player_id: &str,
        utterance: &str,
        prior_lines: Vec<String>,
    ) -> Result<CognizeRequest, ApiError> {
        let config = self.config().clone();
        let subject = contracts::player_subject(player_id);
        let agent = match self.world.agent(agent_id) {
            Some(agent) => agent,
            None => return Err(self.missing_agent_error(agent_id)),
        };

        let memories: Vec<MemoryNote> = self
            .world
            .memory
            .retrieve(
                agent_id,
                &subject,
                config.forget_threshold,
                config.retrieval_limit,
            )
            .into_iter()
            .map(|memory| MemoryNote {
                memory_id: memory.memory_id.clone(),
                category: memory.category,
                content: memory.content.clone(),
                strength: memory.strength,
                secondhand_from: match &memory.source {
                    MemorySource::Secondhand { from } => Some(from.clone()),
                    MemorySource::Firsthand => None,
                },
            })
            .collect();
        let rumors: Vec<String> = self
            .world
            .memory
            .rumors_about(&subject, Some(agent_id), config.rumor_limit)
            .into_iter()
            .map(|rumor| rumor.content.clone())
            .collect();

        let faction_stance = agent.profile.faction.as_ref().map(|faction_id| {
            let reputation = self
                .world
                .reputation
                .faction_reputation(player_id, faction_id);
            format!("{faction_id} regards this player at {reputation:+.2}")
        });
        let goals = agent
            .active_goals()
            .map(|goal| goal.label.clone())
            .collect();

        Ok(CognizeRequest {
            agent_id: agent_id.to_string(),
            role: agent.profile.role.clone(),
            personality: agent.personality.clone(),
            vitals: agent.vitals,
            mood: agent.mood,
            memories,
            rumors,
            faction_stance,
            goals,
            player_id: player_id.to_string(),
            utterance: utterance.to_string(),
            prior_lines,
        })
    }

    /// Pass two: commit every effect of a validated outcome, in order. Mood
    /// first, then memory reinforcement and insertion, then reputation and
    /// its faction ripple, then the urgency event. A fallback frame carries
    /// no trust delta and no topics, so the later steps reduce to no-ops.
    pub fn apply_cognition_effects(
        &mut self,
        agent_id: &str,
        player_id: &str,
        outcome: &CognizeOutcome,
        cited: &[String],
        utterance: &str,
    ) -> Result<ActionReport, ApiError> {
        let config = self.config().clone();
        let now = self.world.now_hours();
        let frame = outcome.frame().clone();
        let fallback = outcome.is_fallback();
        let subject = contracts::player_subject(player_id);

        if !self.world.has_agent(agent_id) {
            return Err(self.missing_agent_error(agent_id));
        }
        self.world.record_player(player_id, player_id);
        self.world.record_interaction(agent_id);

        // (a) Mood, plus the personality drift this exchange caused. Each
        // trait that moves gets exactly one delta-log entry.
        let mut delta_entries = Vec::new();
        {
            let agent = self.world.agent_mut(agent_id).expect("agent checked above");
            agent.apply_action(&frame);
            if frame.trust_delta > 0.0 {
                delta_entries.push(agent.apply_trait_delta(
                    TraitKind::Empathy,
                    frame.trust_delta / 4.0,
                    "warm exchange with a player",
                    now,
                ));
            } else if frame.trust_delta < 0.0 {
                delta_entries.push(agent.apply_trait_delta(
                    TraitKind::Paranoia,
                    -frame.trust_delta / 4.0,
                    "unsettling exchange with a player",
                    now,
                ));
            }
            if frame.urgency >= config.urgency_event_threshold {
                delta_entries.push(agent.apply_trait_delta(
                    TraitKind::Aggression,
                    0.01,
                    "high-urgency encounter",
                    now,
                ));
            }
        }
        if !delta_entries.is_empty() {
            if let Some(store) = self.store.as_mut() {
                if let Err(err) = store.append_delta_log(agent_id, &delta_entries) {
                    self.note_store_error("append_delta_log", err);
                }
            }
        }

        // (b) Reinforce what the prompt cited, then insert what was learned.
        let mut reinforced = Vec::new();
        for memory_id in cited {
            if let Some(strength) =
                self.world
                    .memory
                    .reinforce(memory_id, config.reinforce_alpha, now)
            {
                reinforced.push((memory_id.clone(), strength));
            }
        }
        if !reinforced.is_empty() {
            if let Some(store) = self.store.as_mut() {
                if let Err(err) = store.bulk_update_strength(&reinforced) {
                    self.note_store_error("bulk_update_strength", err);
                }
            }
        }

        let topics = if frame.extracted_topics.is_empty() && !fallback {
            topics::extract_topics(utterance, config.topic_limit_per_utterance)
        } else {
            frame.extracted_topics.clone()
        };
        for topic in &topics {
            let memory_id = self.world.memory.insert(agent_id, &subject, topic, now);
            if let Some(record) = self.world.memory.get(&memory_id).cloned() {
                if let Some(store) = self.store.as_mut() {
                    if let Err(err) = store.insert_memory(&record) {
                        self.note_store_error("insert_memory", err);
                    }
                }
            }
        }

        // (c) Direct reputation, (d) faction ripple.
        let reputation =
            self.world
                .reputation
                .adjust_agent_reputation(player_id, agent_id, frame.trust_delta);
        if let Some(store) = self.store.as_mut() {
            if let Err(err) =
                store.put_reputation(player_id, &contracts::agent_subject(agent_id), reputation)
            {
                self.note_store_error("put_reputation", err);
            }
        }
        let faction_reputation = if frame.trust_delta != 0.0 {
            let faction = self
                .world
                .agent(agent_id)
                .and_then(|agent| agent.profile.faction.clone());
            match faction {
                Some(faction_id) => {
                    let enemies = self.world.factions.enemies_of(&faction_id);
                    let value = self.world.reputation.adjust_faction_reputation(
                        player_id,
                        &faction_id,
                        config.faction_ripple * frame.trust_delta,
                        &enemies,
                        config.enemy_ripple_eta,
                    );
                    if let Some(store) = self.store.as_mut() {
                        if let Err(err) = store.put_reputation(player_id, &faction_id, value) {
                            self.note_store_error("put_reputation", err);
                        }
                    }
                    Some((faction_id, value))
                }
                None => None,
            }
        } else {
            None
        };

        // (e) Urgent interactions surface in the world log.
        if frame.urgency >= config.urgency_event_threshold {
            self.world.emit(
                WorldEventKind::InteractionUrgent,
                format!("{agent_id} flagged an urgent exchange with {player_id}"),
                vec![agent_id.to_string()],
                Some(json!({ "intent": frame.intent.as_str(), "urgency": frame.urgency })),
            );
        }

        // A strong impression starts a rumor other agents can pick up.
        if frame.trust_delta.abs() >= 0.05 {
            let content = if frame.trust_delta > 0.0 {
                format!("{player_id} did right by {agent_id}. Seems trustworthy.")
            } else {
                format!("Watch out for {player_id}. {agent_id} doesn't trust them.")
            };
            let rumor_id =
                self.world
                    .memory
                    .create_rumor(&subject, &content, agent_id, 0.9, now);
            if let Some(rumor) = self.world.memory.rumors_about(&subject, None, 50)
                .into_iter()
                .find(|rumor| rumor.rumor_id == rumor_id)
                .cloned()
            {
                if let Some(store) = self.store.as_mut() {
                    if let Err(err) = store.put_rumor(&rumor) {
                        self.note_store_error("put_rumor", err);
                    }
                }
            }
        }

        // Hot agent state rides the write-behind queue.
        let (vitals, mood) = {
            let agent = self.world.agent(agent_id).expect("agent checked above");
            (agent.vitals, agent.mood)
        };
        self.write_behind.queue(agent_id, vitals, mood);
        self.flush_write_behind(false);
        self.cache.invalidate(&format!("agent:{agent_id}"));

        Ok(ActionReport {
            frame,
            fallback,
            reputation,
            faction_reputation,
            cited_memories: cited.to_vec(),
        })
    }

    // -----------------------------------------------------------------------
    // Group conversations
    // -----------------------------------------------------------------------

    pub fn start_conversation(
        &mut self,
        player_id: &str,
        player_name: &str,
        npc_ids: Option<Vec<String>>,
        location: &str,
    ) -> Result<sim_core::group::ConversationGroup, ApiError> {
        let config = self.config().clone();
        let participants = match npc_ids {
            Some(ids) => {
                for agent_id in &ids {
                    if !self.world.has_agent(agent_id) {
                        return Err(self.missing_agent_error(agent_id));
                    }
                }
                ids
            }
            None => {
                let nearby = self.world.npcs_near_player(player_id);
                if nearby.is_empty() {
                    // No location data: fall back to any known agents.
                    self.world
                        .agent_ids()
                        .into_iter()
                        .take(config.max_group_size)
                        .collect()
                } else {
                    nearby
                }
            }
        };

        self.world.record_player(player_id, player_name);
        let now = self.world.now_hours();
        let group = self
            .world
            .groups
            .start(
                player_id,
                player_name,
                participants,
                location,
                config.max_group_size,
                now,
            )
            .map_err(ApiError::invalid_argument)?
            .clone();
        self.world.emit(
            WorldEventKind::ConversationStarted,
            format!("{player_name} started a conversation at {location}"),
            group.participant_ids(),
            Some(json!({ "group_id": group.group_id })),
        );
        Ok(group)
    }

    /// Build the orchestration request for one player message: salience
    /// ranking from familiarity, topical interest, and tension-scaled
    /// paranoia.
    pub fn assemble_group_cognition(
        &mut self,
        group_id: &str,
        utterance: &str,
        target: Option<&str>,
    ) -> Result<GroupCognizeRequest, ApiError> {
        let now = self.world.now_hours();
        let group = self
            .world
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| ApiError::group_closed(group_id))?;
        self.world
            .groups
            .record_player_message(group_id, utterance, target, now)
            .map_err(|_| ApiError::group_closed(group_id))?;

        let mut inputs = std::collections::BTreeMap::new();
        for agent_id in group.participant_ids() {
            let Some(agent) = self.world.agent(&agent_id) else {
                continue;
            };
            let interest = topics::extract_topics(utterance, 3)
                .iter()
                .map(|topic| topic.emotional_weight)
                .fold(0.0_f64, f64::max);
            inputs.insert(
                agent_id.clone(),
                SalienceInputs {
                    familiarity: self
                        .world
                        .relations
                        .familiarity(&agent_id, &contracts::player_subject(&group.player_id)),
                    interest,
                    paranoia: agent.personality.paranoia,
                },
            );
        }
        let ranking = self.world.groups.salience_ranking(group_id, &inputs);

        let ranked = ranking
            .into_iter()
            .filter_map(|(agent_id, salience)| {
                self.world.agent(&agent_id).map(|agent| RankedParticipant {
                    agent_id: agent_id.clone(),
                    role: agent.profile.role.clone(),
                    mood: agent.mood.label.as_str().to_string(),
                    salience,
                    paranoia: agent.personality.paranoia,
                    aggression: agent.personality.aggression,
                    empathy: agent.personality.empathy,
                })
            })
            .collect();

        let group = self
            .world
            .groups
            .get(group_id)
            .expect("group checked above");
        let recent_history = group
            .recent_history(5)
            .iter()
            .map(|message| format!("{}: {}", message.speaker, message.content))
            .collect();
        Ok(GroupCognizeRequest {
            group_id: group_id.to_string(),
            location: group.location.clone(),
            tension: group.tension,
            ranking: ranked,
            recent_history,
            player_name: group.player_name.clone(),
            utterance: utterance.to_string(),
            target: target.map(str::to_string),
        })
    }

    /// Validate the orchestrated order and commit per-speaker effects in it.
    /// Every speaker runs the standard interaction effects against the
    /// player's message; later speakers' frames carry the earlier lines.
    pub fn apply_group_turns(
        &mut self,
        group_id: &str,
        proposed: Vec<GroupTurn>,
        player_id: &str,
        utterance: &str,
    ) -> Result<(Vec<SpeakerLine>, f64), ApiError> {
        let turns = self.world.groups.validate_turns(group_id, proposed);
        let now = self.world.now_hours();

        let mut lines = Vec::new();
        for turn in &turns {
            let outcome = CognizeOutcome::Ok {
                frame: frame_for_turn(turn),
            };
            let report =
                self.apply_cognition_effects(&turn.speaker, player_id, &outcome, &[], utterance)?;
            self.world
                .groups
                .record_agent_line(group_id, turn, now)
                .map_err(|_| ApiError::group_closed(group_id))?;
            lines.push(SpeakerLine {
                speaker: turn.speaker.clone(),
                response_type: turn.response_type,
                addressed_to: turn.addressed_to.clone(),
                dialogue: turn.dialogue.clone(),
                reflection: Some(report.frame.reflection.clone()),
                mood: self
                    .world
                    .agent(&turn.speaker)
                    .map(|agent| agent.mood.label.as_str().to_string())
                    .unwrap_or_else(|| "calm".to_string()),
            });
        }

        let tension = self
            .world
            .groups
            .update_tension(group_id, &turns)
            .ok_or_else(|| ApiError::group_closed(group_id))?;
        Ok((lines, tension))
    }

    pub fn end_conversation(&mut self, group_id: &str) -> Result<(), ApiError> {
        let group = self
            .world
            .groups
            .end(group_id)
            .ok_or_else(|| ApiError::group_closed(group_id))?;
        self.world.emit(
            WorldEventKind::ConversationEnded,
            format!("conversation {group_id} ended"),
            group.participant_ids(),
            None,
        );
        Ok(())
    }

    pub fn add_npc_to_conversation(
        &mut self,
        group_id: &str,
        agent_id: &str,
    ) -> Result<(), ApiError> {
        if !self.world.has_agent(agent_id) {
            return Err(self.missing_agent_error(agent_id));
        }
        let max = self.config().max_group_size;
        let now = self.world.now_hours();
        self.world
            .groups
            .add_agent(group_id, agent_id, max, now)
            .map_err(|err| {
                if err.contains("unknown group") {
                    ApiError::group_closed(group_id)
                } else {
                    ApiError::invalid_argument(err)
                }
            })
    }

    pub fn remove_npc_from_conversation(
        &mut self,
        group_id: &str,
        agent_id: &str,
    ) -> Result<(), ApiError> {
        let now = self.world.now_hours();
        let ended = self
            .world
            .groups
            .remove_agent(group_id, agent_id, now)
            .map_err(|err| {
                if err.contains("unknown group") {
                    ApiError::group_closed(group_id)
                } else {
                    ApiError::invalid_argument(err)
                }
            })?;
        if let Some(group) = ended {
            self.world.emit(
                WorldEventKind::ConversationEnded,
                format!("conversation {} ended with its last NPC", group.group_id),
                Vec::new(),
                None,
            );
        }
        Ok(())
    }

}

/// Deterministic per-speaker frame for a validated group turn. Dialogue came
/// from the orchestrator; the effect deltas follow the response type.
fn frame_for_turn(turn: &GroupTurn) -> CognitiveFrame {
    let (trust_delta, arousal_delta) = match turn.response_type {
        ResponseType::Agreement => (0.02, -0.02),
        ResponseType::DirectReply | ResponseType::Elaboration => (0.01, 0.0),
        ResponseType::Disagreement => (-0.02, 0.1),
        ResponseType::Interruption => (-0.01, 0.1),
        ResponseType::Redirect | ResponseType::Silent => (0.0, 0.0),
    };
    CognitiveFrame {
        reflection: format!("{} weighs the exchange", turn.speaker),
        dialogue: turn.dialogue.clone(),
        intent: Intent::Socialize,
        mood_shift: MoodShift {
            arousal_delta,
            valence_delta: trust_delta,
        },
        urgency: 0.3,
        trust_delta,
        emotional_weight: 0.4,
        extracted_topics: Vec::new(),
    }
    .sanitized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{OracleClient, ScriptedMode, ScriptedOracle};
    use crate::persistence::SqliteStore;
    use contracts::{ErrorKind, SimConfig};

    fn core_with_agents() -> ServiceCore {
        let mut core = ServiceCore::new(
            SimConfig::default(),
            Some(SqliteStore::open_in_memory().expect("store opens")),
        );
        core.init_agent("vera", "gate guard", None, Some("guards".to_string()), None)
            .expect("init vera");
        core.init_agent("marcus", "merchant", None, Some("traders".to_string()), None)
            .expect("init marcus");
        core
    }

    #[tokio::test]
    async fn interaction_leaves_a_strong_memory() {
        let mut core = core_with_agents();
        let oracle = OracleClient::Scripted(ScriptedOracle::heuristic());
        let config = core.config().clone();

        let request = core
            .assemble_cognition("vera", "p1", "hello, my family died to raiders", Vec::new())
            .expect("assemble");
        let cited: Vec<String> = request
            .memories
            .iter()
            .map(|note| note.memory_id.clone())
            .collect();
        let outcome = oracle.cognize(&request, &config).await;
        let report = core
            .apply_cognition_effects(
                "vera",
                "p1",
                &outcome,
                &cited,
                "hello, my family died to raiders",
            )
            .expect("effects");

        assert!(!report.frame.dialogue.is_empty());
        let memories = core.memories_about("vera", "p1").expect("memories");
        assert!(!memories.is_empty());
        assert!(memories.iter().any(|memory| memory.strength >= 0.9));
    }

    #[tokio::test]
    async fn oracle_outage_still_succeeds_with_no_reputation_change() {
        let mut core = core_with_agents();
        let oracle = OracleClient::Scripted(ScriptedOracle::with_mode(ScriptedMode::AlwaysTimeout));
        let config = core.config().clone();

        let request = core
            .assemble_cognition("vera", "p1", "hello", Vec::new())
            .expect("assemble");
        let outcome = oracle.cognize(&request, &config).await;
        let report = core
            .apply_cognition_effects("vera", "p1", &outcome, &[], "hello")
            .expect("effects");

        assert!(report.fallback);
        assert_eq!(report.frame.dialogue, "...");
        assert_eq!(report.frame.trust_delta, 0.0);
        assert_eq!(report.reputation, 0.0);
        assert!(report.faction_reputation.is_none());
    }

    #[tokio::test]
    async fn group_message_yields_unique_ordered_speakers() {
        let mut core = core_with_agents();
        let oracle = OracleClient::Scripted(ScriptedOracle::heuristic());
        let config = core.config().clone();

        let group = core
            .start_conversation(
                "p1",
                "Traveler",
                Some(vec!["marcus".to_string(), "vera".to_string()]),
                "gates",
            )
            .expect("group starts");
        let request = core
            .assemble_group_cognition(&group.group_id, "there are raiders to the east", None)
            .expect("assemble");
        let turns = oracle.cognize_group(&request, &config).await;
        let (lines, tension) = core
            .apply_group_turns(
                &group.group_id,
                turns,
                "p1",
                "there are raiders to the east",
            )
            .expect("turns apply");

        assert!(!lines.is_empty() && lines.len() <= 2);
        let mut speakers: Vec<&str> = lines.iter().map(|line| line.speaker.as_str()).collect();
        speakers.sort_unstable();
        speakers.dedup();
        assert_eq!(speakers.len(), lines.len(), "each speaker at most once");
        if lines
            .iter()
            .any(|line| line.response_type == ResponseType::Disagreement)
        {
            assert!(tension > 0.0);
        }
    }

    #[test]
    fn conversation_ops_on_a_closed_group_say_so() {
        let mut core = core_with_agents();
        let group = core
            .start_conversation("p1", "Traveler", Some(vec!["vera".to_string()]), "gates")
            .expect("group starts");
        core.end_conversation(&group.group_id).expect("ends");

        let err = core
            .assemble_group_cognition(&group.group_id, "anyone there?", None)
            .expect_err("closed");
        assert_eq!(err.kind, ErrorKind::GroupClosed);
    }
}
