//! Memory-driven quest generation and the quest state machine.

use std::collections::BTreeMap;

use contracts::faction::{Quest, QuestDifficulty, QuestKind, QuestRewards, QuestStatus};
use contracts::memory::{MemoryCategory, MemoryRecord};

use crate::rng::DeterministicRng;

const ITEMS: &[&str] = &[
    "supplies", "medicine", "weapons", "gold", "documents", "artifact", "tools", "food", "water",
];
const LOCATIONS: &[&str] = &[
    "the northern pass",
    "the old ruins",
    "the docks",
    "the forest edge",
    "the abandoned mine",
    "the merchant district",
];
const THREATS: &[&str] = &[
    "bandits",
    "wild beasts",
    "raiders",
    "unknown assailants",
    "a rival faction",
];

#[derive(Debug, Default, Clone)]
pub struct QuestBook {
    quests: BTreeMap<String, Quest>,
    next_seq: u64,
}

impl QuestBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a quest from what the giver remembers about a player. The
    /// strongest held memory steers the quest kind; its id is recorded as
    /// context so the quest text can be traced back.
    pub fn generate(
        &mut self,
        giver: &str,
        target_player: Option<&str>,
        memories: &[&MemoryRecord],
        now_hours: f64,
        expiry_hours: f64,
        rng: &mut DeterministicRng,
    ) -> Quest {
        let kind = kind_from_memories(memories, rng);
        let item = pick(ITEMS, rng);
        let location = pick(LOCATIONS, rng);
        let threat = pick(THREATS, rng);

        let (title, description) = quest_text(kind, item, location, threat, rng);
        let description = match memories.first() {
            Some(memory) => format!(
                "{description} I haven't forgotten what you told me about {}.",
                memory.category.as_str()
            ),
            None => description,
        };

        let difficulty = *rng
            .pick(&[
                QuestDifficulty::Easy,
                QuestDifficulty::Medium,
                QuestDifficulty::Hard,
            ])
            .expect("non-empty difficulty table");

        self.next_seq += 1;
        let quest = Quest {
            quest_id: format!("quest_{:04}", self.next_seq),
            giver: giver.to_string(),
            kind,
            title,
            description,
            target_player: target_player.map(str::to_string),
            objectives: objectives_for(kind, item, location),
            rewards: rewards_for(difficulty),
            difficulty,
            status: QuestStatus::Available,
            created_at_hours: now_hours,
            expires_at_hours: now_hours + expiry_hours,
            context_memories: memories
                .iter()
                .take(3)
                .map(|memory| memory.memory_id.clone())
                .collect(),
        };
        self.quests.insert(quest.quest_id.clone(), quest.clone());
        quest
    }

    pub fn accept(&mut self, quest_id: &str, now_hours: f64) -> Result<&Quest, String> {
        let quest = self
            .quests
            .get_mut(quest_id)
            .ok_or_else(|| format!("unknown quest {quest_id}"))?;
        if quest.status != QuestStatus::Available {
            return Err(format!("quest {quest_id} is not available"));
        }
        if quest.expires_at_hours <= now_hours {
            quest.status = QuestStatus::Expired;
            return Err(format!("quest {quest_id} has expired"));
        }
        quest.status = QuestStatus::Accepted;
        Ok(quest)
    }

    pub fn complete(&mut self, quest_id: &str) -> Result<QuestRewards, String> {
        let quest = self
            .quests
            .get_mut(quest_id)
            .ok_or_else(|| format!("unknown quest {quest_id}"))?;
        if quest.status != QuestStatus::Accepted {
            return Err(format!("quest {quest_id} was never accepted"));
        }
        quest.status = QuestStatus::Completed;
        Ok(quest.rewards.clone())
    }

    /// Expire overdue available/accepted quests; returns the ids flipped.
    pub fn expire_sweep(&mut self, now_hours: f64) -> Vec<String> {
        let mut expired = Vec::new();
        for quest in self.quests.values_mut() {
            if matches!(quest.status, QuestStatus::Available | QuestStatus::Accepted)
                && quest.expires_at_hours <= now_hours
            {
                quest.status = QuestStatus::Expired;
                expired.push(quest.quest_id.clone());
            }
        }
        expired
    }

    pub fn get(&self, quest_id: &str) -> Option<&Quest> {
        self.quests.get(quest_id)
    }

    pub fn available(&self, giver: Option<&str>, player: Option<&str>) -> Vec<&Quest> {
        self.quests
            .values()
            .filter(|quest| {
                quest.status == QuestStatus::Available
                    && giver.map_or(true, |g| quest.giver == g)
                    && player.map_or(true, |p| {
                        quest.target_player.as_deref().map_or(true, |t| t == p)
                    })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }
}

fn pick<'a>(table: &[&'a str], rng: &mut DeterministicRng) -> &'a str {
    rng.pick(table).copied().unwrap_or("something")
}

fn kind_from_memories(memories: &[&MemoryRecord], rng: &mut DeterministicRng) -> QuestKind {
    for memory in memories {
        let kind = match memory.category {
            MemoryCategory::Crime => Some(QuestKind::Revenge),
            MemoryCategory::Fear => Some(QuestKind::Protect),
            MemoryCategory::Family => Some(QuestKind::Rescue),
            MemoryCategory::Secret => Some(QuestKind::Investigate),
            MemoryCategory::Goal => Some(QuestKind::Fetch),
            MemoryCategory::Profession | MemoryCategory::Preference => Some(QuestKind::Trade),
            _ => None,
        };
        if let Some(kind) = kind {
            return kind;
        }
    }
    *rng.pick(&[
        QuestKind::Fetch,
        QuestKind::Protect,
        QuestKind::Investigate,
        QuestKind::Trade,
    ])
    .expect("non-empty kind table")
}

fn quest_text(
    kind: QuestKind,
    item: &str,
    location: &str,
    threat: &str,
    rng: &mut DeterministicRng,
) -> (String, String) {
    match kind {
        QuestKind::Fetch => (
            format!("Retrieve the {item}"),
            format!("I need someone to retrieve {item} from {location}. It's important to me."),
        ),
        QuestKind::Protect => (
            format!("Defend against {threat}"),
            format!("Something dangerous lurks near {location}. I need someone capable to handle {threat}."),
        ),
        QuestKind::Investigate => (
            format!("Uncover the truth at {location}"),
            format!("Strange things are happening at {location}. Look into it discreetly."),
        ),
        QuestKind::Revenge => (
            "Settle the score".to_string(),
            format!("Someone wronged me, and I want justice. Find {threat} and make them pay."),
        ),
        QuestKind::Trade => {
            let recipient = pick(&["my contact", "a trusted ally", "the quartermaster"], rng);
            (
                format!("Deliver {item}"),
                format!("I have {item} that needs to reach {recipient} safely. Interested?"),
            )
        }
        QuestKind::Rescue => (
            format!("Rescue mission to {location}"),
            format!("Someone I care about is trapped in {location}. Please help."),
        ),
    }
}

fn objectives_for(kind: QuestKind, item: &str, location: &str) -> Vec<String> {
    match kind {
        QuestKind::Fetch => vec![
            format!("Travel to {location}"),
            format!("Recover the {item}"),
            "Return to the quest giver".to_string(),
        ],
        QuestKind::Protect => vec![
            format!("Hold position at {location}"),
            "Drive off the threat".to_string(),
        ],
        QuestKind::Investigate => vec![
            format!("Search {location} for clues"),
            "Report what you find".to_string(),
        ],
        QuestKind::Revenge => vec![
            "Track down the culprit".to_string(),
            "Deliver justice".to_string(),
        ],
        QuestKind::Trade => vec![
            format!("Carry the {item} to its destination"),
            "Collect payment".to_string(),
        ],
        QuestKind::Rescue => vec![
            format!("Reach {location}"),
            "Bring them home alive".to_string(),
        ],
    }
}

fn rewards_for(difficulty: QuestDifficulty) -> QuestRewards {
    match difficulty {
        QuestDifficulty::Easy => QuestRewards {
            gold: 50,
            reputation: 0.05,
            items: Vec::new(),
        },
        QuestDifficulty::Medium => QuestRewards {
            gold: 100,
            reputation: 0.1,
            items: Vec::new(),
        },
        QuestDifficulty::Hard => QuestRewards {
            gold: 200,
            reputation: 0.2,
            items: vec!["rare component".to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::memory::MemorySource;

    fn memory(category: MemoryCategory) -> MemoryRecord {
        MemoryRecord {
            memory_id: "mem_000001".to_string(),
            owner: "vera".to_string(),
            subject: "player:p1".to_string(),
            category,
            content: "something they said".to_string(),
            strength: 0.9,
            emotional_weight: 0.8,
            created_at_hours: 0.0,
            last_referenced_at_hours: 0.0,
            ref_count: 0,
            source: MemorySource::Firsthand,
            keywords: Vec::new(),
        }
    }

    #[test]
    fn crime_memories_produce_revenge_quests() {
        let mut book = QuestBook::new();
        let mut rng = DeterministicRng::new(1);
        let held = memory(MemoryCategory::Crime);
        let quest = book.generate("vera", Some("p1"), &[&held], 0.0, 168.0, &mut rng);
        assert_eq!(quest.kind, QuestKind::Revenge);
        assert_eq!(quest.context_memories, vec!["mem_000001".to_string()]);
        assert_eq!(quest.status, QuestStatus::Available);
    }

    #[test]
    fn lifecycle_accept_then_complete() {
        let mut book = QuestBook::new();
        let mut rng = DeterministicRng::new(2);
        let quest = book.generate("vera", Some("p1"), &[], 0.0, 168.0, &mut rng);

        assert!(book.complete(&quest.quest_id).is_err(), "must accept first");
        book.accept(&quest.quest_id, 1.0).expect("accepts");
        let rewards = book.complete(&quest.quest_id).expect("completes");
        assert!(rewards.gold > 0);
        assert!(book.accept(&quest.quest_id, 2.0).is_err(), "no re-accept");
    }

    #[test]
    fn expiry_sweep_flips_overdue_quests() {
        let mut book = QuestBook::new();
        let mut rng = DeterministicRng::new(3);
        let quest = book.generate("vera", None, &[], 0.0, 24.0, &mut rng);

        assert!(book.expire_sweep(12.0).is_empty());
        let expired = book.expire_sweep(24.0);
        assert_eq!(expired, vec![quest.quest_id.clone()]);
        assert_eq!(
            book.get(&quest.quest_id).expect("quest").status,
            QuestStatus::Expired
        );
        assert!(book.accept(&quest.quest_id, 25.0).is_err());
    }

    #[test]
    fn available_filters_by_giver_and_player() {
        let mut book = QuestBook::new();
        let mut rng = DeterministicRng::new(4);
        book.generate("vera", Some("p1"), &[], 0.0, 168.0, &mut rng);
        book.generate("marcus", Some("p2"), &[], 0.0, 168.0, &mut rng);

        assert_eq!(book.available(Some("vera"), None).len(), 1);
        assert_eq!(book.available(None, Some("p2")).len(), 1);
        assert_eq!(book.available(None, None).len(), 2);
    }
}
