//! Keyword-indicator topic extraction. A player utterance is scanned against
//! nine category tables; each match becomes a memory candidate whose
//! emotional weight starts at the category base and rises slightly with
//! extra keyword hits.

use contracts::frames::ExtractedTopic;
use contracts::memory::MemoryCategory;

struct CategoryIndicators {
    category: MemoryCategory,
    base_weight: f64,
    keywords: &'static [&'static str],
}

const INDICATORS: &[CategoryIndicators] = &[
    CategoryIndicators {
        category: MemoryCategory::Family,
        base_weight: 0.9,
        keywords: &[
            "family", "father", "mother", "brother", "sister", "son", "daughter", "wife",
            "husband", "parents", "children", "killed", "died", "lost",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Goal,
        base_weight: 0.7,
        keywords: &[
            "want to", "need to", "looking for", "searching", "find", "seeking", "goal",
            "mission", "quest", "dream",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Fear,
        base_weight: 0.8,
        keywords: &[
            "afraid", "fear", "scared", "terrified", "nightmare", "dread", "worry", "anxious",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Event,
        base_weight: 0.75,
        keywords: &[
            "happened", "attacked", "survived", "escaped", "witnessed", "saw", "remember when",
            "last year", "last month", "yesterday", "raiders",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Preference,
        base_weight: 0.5,
        keywords: &[
            "like", "love", "hate", "prefer", "favorite", "enjoy", "despise",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Secret,
        base_weight: 0.95,
        keywords: &[
            "secret",
            "don't tell",
            "between us",
            "confidential",
            "trust you",
            "never told anyone",
            "no one knows",
            "dark past",
            "hidden",
            "changed my ways",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Origin,
        base_weight: 0.6,
        keywords: &[
            "from", "hometown", "village", "city", "born", "grew up", "raised", "northern",
            "southern", "eastern", "western",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Profession,
        base_weight: 0.5,
        keywords: &[
            "work", "job", "trade", "merchant", "soldier", "farmer", "hunter", "blacksmith",
            "healer", "captain", "guard", "knight",
        ],
    },
    CategoryIndicators {
        category: MemoryCategory::Crime,
        base_weight: 0.9,
        keywords: &[
            "robbed", "stole", "murdered", "crime", "criminal", "outlaw", "bandit", "thief",
            "guilty",
        ],
    },
];

/// Extract up to `limit` category-tagged topics from an utterance, strongest
/// emotional weight first.
pub fn extract_topics(utterance: &str, limit: usize) -> Vec<ExtractedTopic> {
    let lowered = utterance.to_lowercase();
    let mut topics = Vec::new();

    for table in INDICATORS {
        let matched: Vec<String> = table
            .keywords
            .iter()
            .filter(|keyword| lowered.contains(*keyword))
            .map(|keyword| (*keyword).to_string())
            .collect();
        if matched.is_empty() {
            continue;
        }
        let weight = (table.base_weight + matched.len() as f64 * 0.05).min(1.0);
        topics.push(ExtractedTopic {
            category: table.category,
            content: utterance.to_string(),
            emotional_weight: weight,
            keywords: matched,
        });
    }

    topics.sort_by(|a, b| {
        b.emotional_weight
            .partial_cmp(&a.emotional_weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
    });
    topics.truncate(limit);
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nothing_from_small_talk() {
        assert!(extract_topics("nice weather today", 3).is_empty());
    }

    #[test]
    fn secrets_outrank_preferences() {
        let topics = extract_topics(
            "I like the docks, but keep this secret: no one knows I was a thief",
            3,
        );
        assert!(topics.len() >= 2);
        assert_eq!(topics[0].category, MemoryCategory::Secret);
        assert!(topics
            .iter()
            .any(|topic| topic.category == MemoryCategory::Preference));
    }

    #[test]
    fn weight_grows_with_keyword_hits_but_caps() {
        let one_hit = extract_topics("my father is waiting", 3);
        let many_hits =
            extract_topics("my father and mother and brother and sister died", 3);
        let single = one_hit
            .iter()
            .find(|t| t.category == MemoryCategory::Family)
            .expect("family topic");
        let multi = many_hits
            .iter()
            .find(|t| t.category == MemoryCategory::Family)
            .expect("family topic");
        assert!(multi.emotional_weight > single.emotional_weight);
        assert!(multi.emotional_weight <= 1.0);
    }

    #[test]
    fn limit_is_honored() {
        let topics = extract_topics(
            "I'm afraid my family secret is that I stole from the guard captain \
             I work for, and I want to find a way out",
            2,
        );
        assert_eq!(topics.len(), 2);
    }
}
