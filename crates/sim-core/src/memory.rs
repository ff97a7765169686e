//! Memory lifecycle: insertion with topic dedupe, exponential decay swept
//! once per tick, reinforcement on retrieval, gossip sharing, and rumors.

use std::collections::BTreeMap;

use contracts::frames::ExtractedTopic;
use contracts::memory::{MemoryRecord, MemorySource, RumorRecord};

/// Result of one decay sweep: the bulk strength updates to persist and the
/// ids that dropped below the deletion threshold and were removed.
#[derive(Debug, Default, Clone)]
pub struct DecayOutcome {
    pub updated: Vec<(String, f64)>,
    pub deleted: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryEngine {
    memories: BTreeMap<String, MemoryRecord>,
    rumors: BTreeMap<String, RumorRecord>,
    next_memory_seq: u64,
    next_rumor_seq: u64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a firsthand memory extracted from an interaction. A repeat of
    /// the same (owner, subject, category, content) reinforces the existing
    /// record back to full strength instead of duplicating it.
    pub fn insert(
        &mut self,
        owner: &str,
        subject: &str,
        topic: &ExtractedTopic,
        now_hours: f64,
    ) -> String {
        if let Some(existing) = self.memories.values_mut().find(|memory| {
            memory.owner == owner
                && memory.subject == subject
                && memory.category == topic.category
                && memory.content == topic.content
                && !memory.source.is_secondhand()
        }) {
            existing.strength = 1.0;
            existing.ref_count += 1;
            existing.last_referenced_at_hours = now_hours;
            return existing.memory_id.clone();
        }

        self.next_memory_seq += 1;
        let memory_id = format!("mem_{:06}", self.next_memory_seq);
        self.memories.insert(
            memory_id.clone(),
            MemoryRecord {
                memory_id: memory_id.clone(),
                owner: owner.to_string(),
                subject: subject.to_string(),
                category: topic.category,
                content: topic.content.clone(),
                strength: 1.0,
                emotional_weight: topic.emotional_weight,
                created_at_hours: now_hours,
                last_referenced_at_hours: now_hours,
                ref_count: 0,
                source: MemorySource::Firsthand,
                keywords: topic.keywords.clone(),
            },
        );
        memory_id
    }

    /// One sweep of the exponential decay law
    /// `s ← s · exp(−λ · Δh · (1 − w))` over every memory and rumor.
    /// Records below `delete_threshold` are removed; the caller persists the
    /// surviving strengths as a single bulk store operation.
    pub fn decay_sweep(
        &mut self,
        delta_hours: f64,
        lambda_per_hour: f64,
        delete_threshold: f64,
    ) -> DecayOutcome {
        let mut outcome = DecayOutcome::default();
        if delta_hours <= 0.0 {
            return outcome;
        }

        for memory in self.memories.values_mut() {
            let rate = lambda_per_hour * delta_hours * (1.0 - memory.emotional_weight);
            memory.strength *= (-rate).exp();
            if memory.strength < delete_threshold {
                outcome.deleted.push(memory.memory_id.clone());
            } else {
                outcome
                    .updated
                    .push((memory.memory_id.clone(), memory.strength));
            }
        }
        for memory_id in &outcome.deleted {
            self.memories.remove(memory_id);
        }

        let mut dead_rumors = Vec::new();
        for rumor in self.rumors.values_mut() {
            rumor.strength *= (-lambda_per_hour * delta_hours).exp();
            if rumor.strength < delete_threshold {
                dead_rumors.push(rumor.rumor_id.clone());
            }
        }
        for rumor_id in dead_rumors {
            self.rumors.remove(&rumor_id);
        }

        outcome
    }

    /// Reinforce a memory that was cited in prompt context:
    /// `s ← min(1, s + α·(1−s))`, bump ref count and recency.
    pub fn reinforce(&mut self, memory_id: &str, alpha: f64, now_hours: f64) -> Option<f64> {
        let memory = self.memories.get_mut(memory_id)?;
        memory.strength = (memory.strength + alpha * (1.0 - memory.strength)).min(1.0);
        memory.ref_count += 1;
        memory.last_referenced_at_hours = now_hours;
        Some(memory.strength)
    }

    /// Memories an owner holds about a subject, strongest retrieval score
    /// first, forgotten records (below `forget_threshold`) excluded.
    pub fn retrieve(
        &self,
        owner: &str,
        subject: &str,
        forget_threshold: f64,
        limit: usize,
    ) -> Vec<&MemoryRecord> {
        let mut found: Vec<&MemoryRecord> = self
            .memories
            .values()
            .filter(|memory| {
                memory.owner == owner
                    && memory.subject == subject
                    && memory.strength >= forget_threshold
            })
            .collect();
        found.sort_by(|a, b| {
            b.retrieval_score()
                .partial_cmp(&a.retrieval_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        found.truncate(limit);
        found
    }

    /// All surviving memories an owner holds, newest first. Used by status
    /// and inspection endpoints.
    pub fn memories_of(&self, owner: &str, forget_threshold: f64) -> Vec<&MemoryRecord> {
        let mut found: Vec<&MemoryRecord> = self
            .memories
            .values()
            .filter(|memory| memory.owner == owner && memory.strength >= forget_threshold)
            .collect();
        found.sort_by(|a, b| {
            b.created_at_hours
                .partial_cmp(&a.created_at_hours)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        found
    }

    pub fn get(&self, memory_id: &str) -> Option<&MemoryRecord> {
        self.memories.get(memory_id)
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn count_for(&self, owner: &str) -> usize {
        self.memories
            .values()
            .filter(|memory| memory.owner == owner)
            .count()
    }

    /// Gossip share: copy the sender's top-M strongest firsthand memories
    /// about `subject` into the receiver as secondhand records with
    /// `strength = orig · trust · share_factor`. Secondhand strength can
    /// never exceed the source strength. Already-heard content is skipped.
    pub fn share(
        &mut self,
        from: &str,
        to: &str,
        subject: &str,
        trust_to_from: f64,
        share_factor: f64,
        top_m: usize,
        now_hours: f64,
    ) -> Vec<String> {
        let trust = trust_to_from.clamp(0.0, 1.0);
        let candidates: Vec<(String, f64)> = {
            let mut strongest: Vec<&MemoryRecord> = self
                .memories
                .values()
                .filter(|memory| {
                    memory.owner == from
                        && memory.subject == subject
                        && !memory.source.is_secondhand()
                })
                .collect();
            strongest.sort_by(|a, b| {
                b.strength
                    .partial_cmp(&a.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.memory_id.cmp(&b.memory_id))
            });
            strongest
                .into_iter()
                .take(top_m)
                .map(|memory| (memory.memory_id.clone(), memory.strength))
                .collect()
        };

        let mut shared = Vec::new();
        for (source_id, source_strength) in candidates {
            let Some(original) = self.memories.get(&source_id).cloned() else {
                continue;
            };
            let already_heard = self.memories.values().any(|memory| {
                memory.owner == to
                    && memory.subject == subject
                    && memory.content == original.content
                    && matches!(&memory.source, MemorySource::Secondhand { from: teller } if teller == from)
            });
            if already_heard {
                continue;
            }

            self.next_memory_seq += 1;
            let memory_id = format!("mem_{:06}", self.next_memory_seq);
            self.memories.insert(
                memory_id.clone(),
                MemoryRecord {
                    memory_id: memory_id.clone(),
                    owner: to.to_string(),
                    subject: subject.to_string(),
                    category: original.category,
                    content: original.content,
                    strength: source_strength * trust * share_factor,
                    emotional_weight: original.emotional_weight * 0.8,
                    created_at_hours: now_hours,
                    last_referenced_at_hours: now_hours,
                    ref_count: 0,
                    source: MemorySource::Secondhand {
                        from: from.to_string(),
                    },
                    keywords: original.keywords,
                },
            );
            shared.push(memory_id);
        }
        shared
    }

    // -----------------------------------------------------------------------
    // Rumors
    // -----------------------------------------------------------------------

    pub fn create_rumor(
        &mut self,
        about: &str,
        content: &str,
        created_by: &str,
        truthfulness: f64,
        now_hours: f64,
    ) -> String {
        self.next_rumor_seq += 1;
        let rumor_id = format!("rumor_{:04}", self.next_rumor_seq);
        let mut spread = std::collections::BTreeSet::new();
        spread.insert(created_by.to_string());
        self.rumors.insert(
            rumor_id.clone(),
            RumorRecord {
                rumor_id: rumor_id.clone(),
                about: about.to_string(),
                content: content.to_string(),
                created_by: created_by.to_string(),
                strength: 1.0,
                truthfulness: truthfulness.clamp(0.0, 1.0),
                spread,
                created_at_hours: now_hours,
            },
        );
        rumor_id
    }

    /// Mark an agent as having heard a rumor. Returns false if the rumor is
    /// gone or the agent already knew it.
    pub fn hear_rumor(&mut self, rumor_id: &str, agent_id: &str) -> bool {
        match self.rumors.get_mut(rumor_id) {
            Some(rumor) => rumor.spread.insert(agent_id.to_string()),
            None => false,
        }
    }

    /// Every rumor the sender knows spreads to the receiver. Returns how many
    /// were new to the receiver.
    pub fn spread_all_rumors(&mut self, from: &str, to: &str) -> usize {
        let known: Vec<String> = self
            .rumors
            .values()
            .filter(|rumor| rumor.spread.contains(from))
            .map(|rumor| rumor.rumor_id.clone())
            .collect();
        known
            .into_iter()
            .filter(|rumor_id| self.hear_rumor(rumor_id, to))
            .count()
    }

    /// Rumors about a subject, optionally only those a given agent has heard,
    /// strongest first.
    pub fn rumors_about(
        &self,
        subject: &str,
        known_to: Option<&str>,
        limit: usize,
    ) -> Vec<&RumorRecord> {
        let mut found: Vec<&RumorRecord> = self
            .rumors
            .values()
            .filter(|rumor| {
                rumor.about == subject
                    && known_to.map_or(true, |agent| rumor.spread.contains(agent))
            })
            .collect();
        found.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.rumor_id.cmp(&b.rumor_id))
        });
        found.truncate(limit);
        found
    }

    pub fn rumor_count(&self) -> usize {
        self.rumors.len()
    }
}
