use std::collections::BTreeSet;

use contracts::agent::{Position, Tier, TraitKind, TRAIT_MAX, TRAIT_MIN};
use contracts::frames::{ExtractedTopic, GroupTurn, ResponseType};
use contracts::memory::MemoryCategory;
use contracts::SimConfig;
use proptest::prelude::*;
use sim_core::agent::soft_clamp;
use sim_core::memory::MemoryEngine;
use sim_core::social::ReputationLedger;
use sim_core::world::SimWorld;
use proptest::collection::vec as prop_vec;

fn base_config() -> SimConfig {
    SimConfig::default()
}

fn topic(category: MemoryCategory, content: &str, weight: f64) -> ExtractedTopic {
    ExtractedTopic {
        category,
        content: content.to_string(),
        emotional_weight: weight,
        keywords: Vec::new(),
    }
}

proptest! {
    // Every history of trait deltas leaves every persisted value in band.
    #[test]
    fn property_1_trait_values_stay_in_band(
        deltas in prop_vec(-2.0_f64..2.0, 1..200),
    ) {
        let mut world = SimWorld::new(base_config());
        world
            .init_agent("vera", "guard", None, None, None)
            .expect("init");
        for (index, delta) in deltas.iter().enumerate() {
            let kind = TraitKind::ALL[index % TraitKind::ALL.len()];
            let agent = world.agent_mut("vera").expect("agent");
            agent.apply_trait_delta(kind, *delta, "fuzz", index as f64);
        }
        let agent = world.agent("vera").expect("agent");
        for kind in TraitKind::ALL {
            let value = agent.personality.get(kind);
            prop_assert!((TRAIT_MIN..=TRAIT_MAX).contains(&value));
        }
    }

    // Decay sweeps with positive elapsed time strictly reduce strength for
    // any memory whose emotional weight leaves room to decay.
    #[test]
    fn property_2_decay_is_strictly_decreasing(
        weight in 0.0_f64..0.99,
        hours in 0.5_f64..72.0,
    ) {
        let mut engine = MemoryEngine::new();
        let id = engine.insert(
            "vera",
            "player:p1",
            &topic(MemoryCategory::Event, "something happened", weight),
            0.0,
        );
        let mut previous = engine.get(&id).expect("memory").strength;
        for _ in 0..5 {
            engine.decay_sweep(hours, 0.02, 0.0);
            let Some(memory) = engine.get(&id) else { break };
            prop_assert!(memory.strength < previous);
            previous = memory.strength;
        }
    }

    // Delta-log entries reconstruct: to == soft_clamp(from + delta).
    #[test]
    fn property_3_delta_log_is_exact(
        deltas in prop_vec(-1.0_f64..1.0, 1..50),
    ) {
        let mut world = SimWorld::new(base_config());
        world
            .init_agent("vera", "guard", None, None, None)
            .expect("init");
        for (index, delta) in deltas.iter().enumerate() {
            let agent = world.agent_mut("vera").expect("agent");
            agent.apply_trait_delta(TraitKind::Loyalty, *delta, "fuzz", index as f64);
        }
        let agent = world.agent("vera").expect("agent");
        prop_assert_eq!(agent.delta_log.len(), deltas.len());
        for entry in &agent.delta_log {
            prop_assert!((entry.to - soft_clamp(entry.from + entry.delta)).abs() < 1e-12);
        }
    }

    // Secondhand strength never exceeds the source memory's strength,
    // whatever the trust level.
    #[test]
    fn property_5_secondhand_is_weaker(
        trust in 0.0_f64..1.0,
        decay_hours in 0.0_f64..200.0,
    ) {
        let mut engine = MemoryEngine::new();
        let original = engine.insert(
            "vera",
            "player:p1",
            &topic(MemoryCategory::Crime, "admitted a theft", 0.6),
            0.0,
        );
        engine.decay_sweep(decay_hours, 0.02, 0.0);
        let source_strength = engine.get(&original).expect("memory").strength;

        let shared = engine.share("vera", "marcus", "player:p1", trust, 0.7, 3, 1.0);
        for memory_id in shared {
            let copy = engine.get(&memory_id).expect("shared memory");
            prop_assert!(copy.strength <= source_strength + 1e-12);
        }
    }

    // Reputation stays in [-1, 1] under any mix of direct and rippled
    // faction updates.
    #[test]
    fn property_7_reputation_bounds_survive_ripple(
        updates in prop_vec((-0.5_f64..0.5, 0_usize..3), 1..100),
    ) {
        let factions = ["guards", "traders", "outcasts"];
        let mut ledger = ReputationLedger::default();
        for (delta, which) in updates {
            let faction = factions[which % factions.len()];
            let enemies: Vec<String> = factions
                .iter()
                .filter(|other| **other != faction)
                .map(|other| other.to_string())
                .collect();
            ledger.adjust_faction_reputation("p1", faction, delta, &enemies, 0.5);
            ledger.adjust_agent_reputation("p1", "vera", delta);
        }
        prop_assert!(ledger.all_values_in_bounds());
    }

    // Validated group turns: unique speakers, all current participants,
    // never silent.
    #[test]
    fn property_8_group_turns_are_validated(
        speaker_picks in prop_vec(0_usize..6, 1..12),
    ) {
        let mut world = SimWorld::new(base_config());
        for npc_id in ["vera", "marcus", "edda"] {
            world.init_agent(npc_id, "villager", None, None, None).expect("init");
        }
        let group_id = world
            .groups
            .start(
                "p1",
                "Traveler",
                vec!["vera".to_string(), "marcus".to_string()],
                "gates",
                6,
                0.0,
            )
            .expect("group")
            .group_id
            .clone();

        let names = ["vera", "marcus", "edda", "ghost", "vera", "marcus"];
        let kinds = [
            ResponseType::DirectReply,
            ResponseType::Agreement,
            ResponseType::Disagreement,
            ResponseType::Silent,
            ResponseType::Elaboration,
            ResponseType::Interruption,
        ];
        let proposed: Vec<GroupTurn> = speaker_picks
            .iter()
            .map(|pick| GroupTurn {
                speaker: names[pick % names.len()].to_string(),
                response_type: kinds[pick % kinds.len()],
                addressed_to: None,
                dialogue: "line".to_string(),
            })
            .collect();

        let validated = world.groups.validate_turns(&group_id, proposed);
        let mut seen = BTreeSet::new();
        for turn in &validated {
            prop_assert!(turn.response_type != ResponseType::Silent);
            prop_assert!(["vera", "marcus"].contains(&turn.speaker.as_str()));
            prop_assert!(seen.insert(turn.speaker.clone()));
        }
    }
}

// Retrieval hides forgotten memories even while they are still stored.
#[test]
fn property_4_retrieval_never_returns_forgotten_memories() {
    let mut engine = MemoryEngine::new();
    for index in 0..20 {
        engine.insert(
            "vera",
            "player:p1",
            &topic(
                MemoryCategory::Event,
                &format!("event number {index}"),
                (index as f64) / 40.0,
            ),
            0.0,
        );
    }
    for _ in 0..12 {
        engine.decay_sweep(24.0, 0.02, 0.01);
    }
    let visible = engine.retrieve("vera", "player:p1", 0.05, 50);
    assert!(visible.iter().all(|memory| memory.strength >= 0.05));
}

// Same seed, same inputs: byte-identical event logs and equal replay hashes.
#[test]
fn property_9_replay_is_deterministic() {
    let run = || {
        let mut config = base_config();
        config.seed = 777;
        config.gossip_chance = 1.0;
        let mut world = SimWorld::new(config);
        for npc_id in ["vera", "marcus", "edda"] {
            world
                .init_agent(npc_id, "villager", None, Some("citizens".to_string()), None)
                .expect("init");
            world.update_agent_location(
                npc_id,
                Position {
                    x: 10.0,
                    y: 10.0,
                    z: 0.0,
                    zone: "gates".to_string(),
                },
            );
        }
        world.update_player_location(
            "p1",
            Position {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                zone: "gates".to_string(),
            },
        );
        world.record_interaction("vera");
        for _ in 0..24 {
            world.tick(1.0);
        }
        (
            world.replay_hash(),
            world
                .recent_events(usize::MAX)
                .into_iter()
                .map(|event| serde_json::to_string(&event).expect("serialize"))
                .collect::<Vec<_>>(),
        )
    };

    let (hash_a, log_a) = run();
    let (hash_b, log_b) = run();
    assert_eq!(hash_a, hash_b);
    assert_eq!(log_a, log_b);
}

// The number of agents due per tick respects the tier cadence budget.
#[test]
fn property_10_tier_cadence_bounds_work_per_tick() {
    let mut config = base_config();
    config.gossip_chance = 0.0;
    let mut world = SimWorld::new(config);
    for index in 0..40 {
        world
            .init_agent(&format!("npc_{index:02}"), "villager", None, None, None)
            .expect("init");
    }
    // Interact with a handful so the population spreads across tiers.
    for index in 0..5 {
        world.record_interaction(&format!("npc_{index:02}"));
    }

    for _ in 0..32 {
        let report = world.tick(1.0);
        let counts = report.tier_counts;
        let ticks_per_hour = world.config().ticks_per_hour();
        let budget = counts.cognition_budget(ticks_per_hour);
        // Per-tick processed work can exceed the long-run average on cadence
        // ticks, but never the whole population, and the average respects
        // the budget shape.
        assert!(report.agents_processed as usize <= world.agent_count());
        assert!(budget <= world.agent_count() as f64);
    }
}

// Gossip through the world pipeline: secondhand copies appear with capped
// strength once agents trust each other.
#[test]
fn scenario_gossip_share_cap() {
    let mut config = base_config();
    config.seed = 42;
    let mut world = SimWorld::new(config);
    world
        .init_agent("vera", "guard", None, None, None)
        .expect("init");
    world
        .init_agent("marcus", "merchant", None, None, None)
        .expect("init");

    let memory_id = world.memory.insert(
        "vera",
        "player:p1",
        &topic(MemoryCategory::Crime, "seen stealing supplies", 0.8),
        0.0,
    );
    // Decay the memory to roughly 0.8.
    while world.memory.get(&memory_id).expect("memory").strength > 0.8 {
        world.memory.decay_sweep(6.0, 0.02, 0.01);
    }
    let source_strength = world.memory.get(&memory_id).expect("memory").strength;
    world.relations.adjust_trust("marcus", "vera", 0.5, 0.0);

    let shared = world
        .memory
        .share("vera", "marcus", "player:p1", 0.5, 0.7, 3, 1.0);
    assert_eq!(shared.len(), 1);
    let copy = world.memory.get(&shared[0]).expect("copy");
    assert!(copy.strength <= source_strength * 0.5 * 0.7 + 1e-12);
    assert!(copy.source.is_secondhand());
}

// Quests generated during ticks expire on schedule and stop being available.
#[test]
fn scenario_quest_expiry_through_ticks() {
    let mut config = base_config();
    config.quest_expiry_hours = 10.0;
    let mut world = SimWorld::new(config);
    world
        .init_agent("vera", "guard", None, None, None)
        .expect("init");
    let mut rng = world.agent_rng("quests");
    let quest = world
        .quests
        .generate("vera", Some("p1"), &[], world.now_hours(), 10.0, &mut rng);
    assert_eq!(world.quests.available(Some("vera"), None).len(), 1);

    for _ in 0..11 {
        world.tick(1.0);
    }
    assert!(world.quests.available(Some("vera"), None).is_empty());
    assert_eq!(
        world.quests.get(&quest.quest_id).expect("quest").status,
        contracts::faction::QuestStatus::Expired
    );
}

// Dormant agents still accumulate vitals pressure over skipped ticks.
#[test]
fn scenario_slipped_vitals_catch_up() {
    let mut config = base_config();
    config.gossip_chance = 0.0;
    let mut world = SimWorld::new(config);
    world
        .init_agent("vera", "guard", None, None, None)
        .expect("init");

    for _ in 0..30 {
        world.tick(1.0);
    }
    let agent = world.agent("vera").expect("agent");
    // 30 simulated hours with no food or rest saturates both vitals, no
    // matter how many individual ticks actually touched the agent.
    assert_eq!(agent.vitals.hunger, 1.0);
    assert_eq!(agent.vitals.fatigue, 1.0);
}

// Tier classification reacts to conversations and player proximity.
#[test]
fn scenario_tiers_follow_player_presence() {
    let mut world = SimWorld::new(base_config());
    world
        .init_agent("vera", "guard", None, None, None)
        .expect("init");
    world.update_agent_location(
        "vera",
        Position {
            x: 5.0,
            y: 5.0,
            z: 0.0,
            zone: "gates".to_string(),
        },
    );
    world.update_player_location(
        "p1",
        Position {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            zone: "gates".to_string(),
        },
    );

    world.tick(1.0);
    assert_eq!(world.tier_of("vera"), Some(Tier::Nearby));

    // The player leaves the zone; silence eventually sinks the agent.
    world.update_player_location(
        "p1",
        Position {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            zone: "docks".to_string(),
        },
    );
    world.tick(1.0);
    assert_eq!(world.tier_of("vera"), Some(Tier::Dormant));
}
