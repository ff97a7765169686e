//! Service facade over the simulation kernel: durable store, hot cache,
//! write-behind queue, and the operations the HTTP/WS boundary dispatches.

use std::time::Duration;

use contracts::agent::{AgentSnapshot, Personality, Position};
use contracts::events::{WorldEvent, WorldEventKind};
use contracts::faction::{FactionEventKind, Quest};
use contracts::memory::MemoryRecord;
use contracts::{ApiError, ErrorKind, SimConfig};
use serde_json::{json, Value};

use sim_core::world::TickReport;
use sim_core::SimWorld;

pub mod brain;
pub mod cache;
pub mod oracle;
pub mod persistence;
pub mod server;

use cache::LruTtlCache;
use persistence::{SqliteStore, StoreError, WriteBehindQueue};

pub use server::serve;

/// Everything behind the service lock: the live world, its durable copy, and
/// the read cache. One writer at a time; the boundary holds the lock only
/// for assembly and effects, never across provider calls.
#[derive(Debug)]
pub struct ServiceCore {
    pub world: SimWorld,
    store: Option<SqliteStore>,
    cache: LruTtlCache<Value>,
    write_behind: WriteBehindQueue,
    last_store_error: Option<String>,
    persisted_event_seq: u64,
}

impl ServiceCore {
    pub fn new(config: SimConfig, store: Option<SqliteStore>) -> Self {
        let cache = LruTtlCache::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        );
        let write_behind = WriteBehindQueue::new(config.write_behind_window_secs);
        Self {
            world: SimWorld::new(config),
            store,
            cache,
            write_behind,
            last_store_error: None,
            persisted_event_seq: 0,
        }
    }

    pub fn config(&self) -> &SimConfig {
        self.world.config()
    }

    pub fn last_store_error(&self) -> Option<&str> {
        self.last_store_error.as_deref()
    }

    /// Record a store failure without failing the in-memory operation; reads
    /// keep serving from cache/world state while writes queue up.
    fn note_store_error(&mut self, context: &str, err: StoreError) {
        tracing::warn!(context, error = %err, "store write degraded");
        self.last_store_error = Some(err.to_string());
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub fn init_agent(
        &mut self,
        agent_id: &str,
        role: &str,
        personality: Option<Personality>,
        faction: Option<String>,
        voice_fingerprint: Option<String>,
    ) -> Result<AgentSnapshot, ApiError> {
        if agent_id.trim().is_empty() {
            return Err(ApiError::invalid_argument("npc_id must not be empty"));
        }
        self.world
            .init_agent(agent_id, role, personality, faction, voice_fingerprint)
            .map_err(ApiError::invalid_argument)?;

        let zone = self.world.proximity.zone_of(agent_id).map(str::to_string);
        let now = self.world.now_hours();
        if let Some(store) = self.store.as_mut() {
            let agent = self.world.agent(agent_id).expect("agent just created");
            if let Err(err) = store.put_agent(agent, zone.as_deref(), now) {
                // Creation is a durable write; surface unavailability.
                self.world.shutdown_agent(agent_id);
                return Err(ApiError::new(ErrorKind::StoreUnavailable, err.to_string()));
            }
        }
        self.cache.invalidate(&format!("agent:{agent_id}"));
        Ok(self.world.snapshot(agent_id).expect("agent just created"))
    }

    pub fn shutdown_agent(&mut self, agent_id: &str) -> Result<(), ApiError> {
        if !self.world.shutdown_agent(agent_id) {
            return Err(ApiError::agent_unknown(agent_id));
        }
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.delete_agent(agent_id) {
                self.note_store_error("delete_agent", err);
            }
        }
        self.cache.invalidate(&format!("agent:{agent_id}"));
        Ok(())
    }

    /// Agent snapshot via the read cache; misses rebuild from the live world
    /// and populate.
    pub fn agent_snapshot(&mut self, agent_id: &str) -> Result<AgentSnapshot, ApiError> {
        let key = format!("agent:{agent_id}");
        if let Some(value) = self.cache.get(&key) {
            if let Ok(snapshot) = serde_json::from_value::<AgentSnapshot>(value) {
                return Ok(snapshot);
            }
        }
        let snapshot = self.require_snapshot(agent_id)?;
        if let Ok(value) = serde_json::to_value(&snapshot) {
            self.cache.put(&key, value);
        }
        Ok(snapshot)
    }

    fn require_snapshot(&self, agent_id: &str) -> Result<AgentSnapshot, ApiError> {
        match self.world.snapshot(agent_id) {
            Some(snapshot) => Ok(snapshot),
            None => Err(self.missing_agent_error(agent_id)),
        }
    }

    /// Unknown everywhere → 404; present in the durable store but not in the
    /// live world → 409 with a hint to re-init.
    fn missing_agent_error(&self, agent_id: &str) -> ApiError {
        let persisted = self
            .store
            .as_ref()
            .and_then(|store| store.agent_exists(agent_id).ok())
            .unwrap_or(false);
        if persisted {
            ApiError::new(
                ErrorKind::AgentUninitialized,
                format!("{agent_id} exists but is not initialized; POST /npc/init first"),
            )
        } else {
            ApiError::agent_unknown(agent_id)
        }
    }

    pub fn list_agents(
        &self,
        filter: Option<&str>,
        cursor: usize,
        page_size: usize,
    ) -> (Vec<AgentSnapshot>, Option<usize>) {
        self.world.list_agents(filter, cursor, page_size)
    }

    pub fn memories_about(
        &mut self,
        agent_id: &str,
        player_id: &str,
    ) -> Result<Vec<MemoryRecord>, ApiError> {
        if !self.world.has_agent(agent_id) {
            return Err(self.missing_agent_error(agent_id));
        }
        let subject = contracts::player_subject(player_id);
        let config = self.world.config();
        let found = self
            .world
            .memory
            .retrieve(
                agent_id,
                &subject,
                config.forget_threshold,
                config.retrieval_limit,
            )
            .into_iter()
            .cloned()
            .collect();
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // Memory maintenance
    // -----------------------------------------------------------------------

    /// Manual decay sweep (`POST /memory/decay?hours=H`): one bulk pass over
    /// every memory, persisted as a single strength update plus one deletion.
    pub fn decay_memories(&mut self, hours: f64) -> Result<(usize, usize), ApiError> {
        if hours <= 0.0 {
            return Err(ApiError::invalid_argument("hours must be positive"));
        }
        let config = self.world.config().clone();
        let outcome = self.world.memory.decay_sweep(
            hours,
            config.decay_lambda_per_hour,
            config.delete_threshold,
        );
        self.persist_decay(&outcome);
        self.cache.invalidate_prefix("memories:");
        Ok((outcome.updated.len(), outcome.deleted.len()))
    }

    fn persist_decay(&mut self, outcome: &sim_core::memory::DecayOutcome) {
        let delete_threshold = self.world.config().delete_threshold;
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.bulk_update_strength(&outcome.updated) {
                self.note_store_error("bulk_update_strength", err);
                return;
            }
            if let Err(err) = store.delete_below(delete_threshold) {
                self.note_store_error("delete_below", err);
            }
        }
    }

    pub fn gossip(&mut self, from: &str, to: &str) -> Result<usize, ApiError> {
        for agent_id in [from, to] {
            if !self.world.has_agent(agent_id) {
                return Err(self.missing_agent_error(agent_id));
            }
        }
        if from == to {
            return Err(ApiError::invalid_argument("an agent cannot gossip alone"));
        }

        let now = self.world.now_hours();
        let config = self.world.config().clone();
        let trust = self.world.relations.trust(to, from).max(0.0);
        let subjects: Vec<String> = self
            .world
            .memory
            .memories_of(from, config.forget_threshold)
            .into_iter()
            .filter(|memory| memory.subject.starts_with("player:"))
            .map(|memory| memory.subject.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut shared_total = 0;
        for subject in subjects {
            let shared = self.world.memory.share(
                from,
                to,
                &subject,
                trust,
                config.share_trust_factor,
                config.share_top_m,
                now,
            );
            for memory_id in &shared {
                if let Some(record) = self.world.memory.get(memory_id).cloned() {
                    if let Some(store) = self.store.as_mut() {
                        if let Err(err) = store.insert_memory(&record) {
                            self.note_store_error("insert_memory", err);
                        }
                    }
                }
            }
            shared_total += shared.len();
        }
        shared_total += self.world.memory.spread_all_rumors(from, to);

        if shared_total > 0 {
            self.world.relations.record_contact(from, to, 0.05, now);
            self.world.emit(
                WorldEventKind::GossipExchanged,
                format!("{from} shared what they know with {to}"),
                vec![from.to_string(), to.to_string()],
                None,
            );
        }
        Ok(shared_total)
    }

    // -----------------------------------------------------------------------
    // World clock
    // -----------------------------------------------------------------------

    /// One tick of the world pipeline plus persistence of its outcome.
    pub fn tick(&mut self, delta_hours: Option<f64>) -> TickReport {
        let delta = delta_hours.unwrap_or(self.world.config().time_scale);
        let report = self.world.tick(delta);
        self.persist_decay(&report.decay);
        self.flush_write_behind(true);
        self.persist_new_events();
        self.cache.clear();
        report
    }

    /// Advance simulated time by `hours` in whole-tick steps.
    pub fn advance(&mut self, hours: f64) -> Result<Vec<TickReport>, ApiError> {
        if hours <= 0.0 {
            return Err(ApiError::invalid_argument("hours must be positive"));
        }
        let step = self.world.config().time_scale.max(1e-6);
        let mut reports = Vec::new();
        let mut remaining = hours;
        while remaining > 1e-9 {
            let this_step = step.min(remaining);
            reports.push(self.tick(Some(this_step)));
            remaining -= this_step;
        }
        Ok(reports)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<WorldEvent> {
        self.world.recent_events(limit)
    }

    fn persist_new_events(&mut self) {
        let events: Vec<WorldEvent> = self
            .world
            .recent_events(usize::MAX)
            .into_iter()
            .filter(|event| event.seq > self.persisted_event_seq)
            .collect();
        for event in events {
            if let Some(store) = self.store.as_mut() {
                if let Err(err) = store.append_world_event(&event) {
                    self.note_store_error("append_world_event", err);
                    break;
                }
            }
            self.persisted_event_seq = event.seq;
        }
    }

    /// Queue hot agent state and flush when the coalescing window closed.
    fn flush_write_behind(&mut self, force: bool) {
        if !force && !self.write_behind.due() {
            return;
        }
        if self.write_behind.is_empty() {
            return;
        }
        let updates = self.write_behind.drain();
        let now = self.world.now_hours();
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.update_agent_vitals_mood(&updates, now) {
                self.note_store_error("update_agent_vitals_mood", err);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Locations
    // -----------------------------------------------------------------------

    pub fn update_location(
        &mut self,
        entity_kind: &str,
        entity_id: &str,
        position: Position,
    ) -> Result<(), ApiError> {
        match entity_kind {
            "npc" => {
                if !self.world.update_agent_location(entity_id, position) {
                    return Err(self.missing_agent_error(entity_id));
                }
                self.cache.invalidate(&format!("agent:{entity_id}"));
                Ok(())
            }
            "player" => {
                self.world.update_player_location(entity_id, position);
                Ok(())
            }
            other => Err(ApiError::invalid_argument(format!(
                "entity kind must be npc or player, got {other}"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Quests
    // -----------------------------------------------------------------------

    pub fn generate_quest(
        &mut self,
        agent_id: &str,
        player_id: Option<&str>,
    ) -> Result<Quest, ApiError> {
        if !self.world.has_agent(agent_id) {
            return Err(self.missing_agent_error(agent_id));
        }
        let config = self.world.config().clone();
        let now = self.world.now_hours();
        let memories: Vec<MemoryRecord> = match player_id {
            Some(player_id) => self
                .world
                .memory
                .retrieve(
                    agent_id,
                    &contracts::player_subject(player_id),
                    config.forget_threshold,
                    config.retrieval_limit,
                )
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let memory_refs: Vec<&MemoryRecord> = memories.iter().collect();
        let mut rng = self.world.agent_rng(&format!("{agent_id}:quests:{now}"));
        let quest = self.world.quests.generate(
            agent_id,
            player_id,
            &memory_refs,
            now,
            config.quest_expiry_hours,
            &mut rng,
        );

        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.put_quest(&quest) {
                self.note_store_error("put_quest", err);
            }
        }
        self.world.emit(
            WorldEventKind::QuestGenerated,
            format!("{agent_id} posted \"{}\"", quest.title),
            vec![agent_id.to_string()],
            Some(json!({ "quest_id": quest.quest_id })),
        );
        Ok(quest)
    }

    pub fn accept_quest(&mut self, quest_id: &str, player_id: &str) -> Result<Quest, ApiError> {
        let now = self.world.now_hours();
        let quest = self
            .world
            .quests
            .accept(quest_id, now)
            .map_err(ApiError::invalid_argument)?
            .clone();
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.put_quest(&quest) {
                self.note_store_error("put_quest", err);
            }
        }
        self.world.emit(
            WorldEventKind::QuestAccepted,
            format!("{player_id} accepted \"{}\"", quest.title),
            vec![quest.giver.clone()],
            Some(json!({ "quest_id": quest.quest_id })),
        );
        Ok(quest)
    }

    pub fn complete_quest(&mut self, quest_id: &str) -> Result<Quest, ApiError> {
        let rewards = self
            .world
            .quests
            .complete(quest_id)
            .map_err(ApiError::invalid_argument)?;
        let quest = self
            .world
            .quests
            .get(quest_id)
            .expect("quest just completed")
            .clone();

        // Completing a quest for an agent raises standing with its giver.
        if let Some(player_id) = quest.target_player.as_deref() {
            let value = self
                .world
                .reputation
                .adjust_agent_reputation(player_id, &quest.giver, rewards.reputation);
            if let Some(store) = self.store.as_mut() {
                if let Err(err) =
                    store.put_reputation(player_id, &contracts::agent_subject(&quest.giver), value)
                {
                    self.note_store_error("put_reputation", err);
                }
            }
        }
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.put_quest(&quest) {
                self.note_store_error("put_quest", err);
            }
        }
        self.world.emit(
            WorldEventKind::QuestCompleted,
            format!("\"{}\" was completed", quest.title),
            vec![quest.giver.clone()],
            Some(json!({ "quest_id": quest.quest_id, "gold": rewards.gold })),
        );
        Ok(quest)
    }

    // -----------------------------------------------------------------------
    // Factions
    // -----------------------------------------------------------------------

    pub fn trigger_faction_event(
        &mut self,
        kind: FactionEventKind,
        faction_a: &str,
        faction_b: &str,
    ) -> Result<f64, ApiError> {
        let effect = self
            .world
            .factions
            .trigger_event(kind, faction_a, faction_b)
            .ok_or_else(|| {
                ApiError::invalid_argument(format!(
                    "factions {faction_a} and {faction_b} cannot hold this event"
                ))
            })?;
        let score = match &effect {
            sim_core::faction::FactionEffect::RelationShifted { score, .. } => *score,
            _ => 0.0,
        };
        self.world.emit(
            WorldEventKind::FactionEvent,
            format!("{faction_a} and {faction_b}: {kind:?}"),
            vec![faction_a.to_string(), faction_b.to_string()],
            Some(json!({ "score": score })),
        );
        self.persist_faction(faction_a);
        self.persist_faction(faction_b);
        Ok(score)
    }

    fn persist_faction(&mut self, faction_id: &str) {
        if let Some(faction) = self.world.factions.faction(faction_id).cloned() {
            if let Some(store) = self.store.as_mut() {
                if let Err(err) = store.put_faction(&faction) {
                    self.note_store_error("put_faction", err);
                }
            }
        }
    }

    pub fn begin_battle(&mut self, territory: &str, attacker: &str) -> Result<Value, ApiError> {
        let now = self.world.now_hours();
        let mut rng = self.world.agent_rng(&format!("battles:{territory}:{now}"));
        let battle = self
            .world
            .factions
            .begin_battle(territory, attacker, now, &mut rng)
            .map_err(ApiError::invalid_argument)?;
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.put_battle(&battle) {
                self.note_store_error("put_battle", err);
            }
        }
        self.world.emit(
            WorldEventKind::BattleStarted,
            format!("{attacker} moved on {territory}"),
            vec![attacker.to_string(), battle.defender.clone()],
            Some(json!({ "battle_id": battle.battle_id })),
        );
        Ok(serde_json::to_value(&battle).unwrap_or_default())
    }

    pub fn resolve_battle(&mut self, battle_id: &str) -> Result<Value, ApiError> {
        let now = self.world.now_hours();
        let mut rng = self.world.agent_rng(&format!("battles:{battle_id}:{now}"));
        let effect = self
            .world
            .factions
            .resolve_battle(battle_id, now, &mut rng)
            .map_err(ApiError::invalid_argument)?;
        let battle = self
            .world
            .factions
            .battle(battle_id)
            .cloned()
            .expect("battle just resolved");
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.put_battle(&battle) {
                self.note_store_error("put_battle", err);
            }
        }
        if let sim_core::faction::FactionEffect::BattleResolved {
            winner,
            territory,
            territory_changed,
            ..
        } = &effect
        {
            self.world.emit(
                WorldEventKind::BattleResolved,
                format!("{winner} won the battle for {territory}"),
                vec![winner.clone()],
                Some(json!({ "battle_id": battle_id })),
            );
            if *territory_changed {
                self.world.emit(
                    WorldEventKind::TerritoryCaptured,
                    format!("{winner} now controls {territory}"),
                    vec![winner.clone()],
                    None,
                );
            }
        }
        Ok(serde_json::to_value(&battle).unwrap_or_default())
    }

    pub fn establish_route(
        &mut self,
        from_agent: &str,
        to_agent: &str,
        from_location: Option<&str>,
        to_location: Option<&str>,
    ) -> Result<Value, ApiError> {
        for agent_id in [from_agent, to_agent] {
            if !self.world.has_agent(agent_id) {
                return Err(self.missing_agent_error(agent_id));
            }
        }
        let now = self.world.now_hours();
        let mut rng = self
            .world
            .agent_rng(&format!("routes:{from_agent}:{to_agent}:{now}"));
        let route = self.world.factions.establish_route(
            from_agent,
            to_agent,
            from_location.unwrap_or("market"),
            to_location.unwrap_or("docks"),
            now,
            &mut rng,
        );
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.put_route(&route) {
                self.note_store_error("put_route", err);
            }
        }
        self.world.emit(
            WorldEventKind::RouteEstablished,
            format!(
                "{from_agent} and {to_agent} opened a route {} -> {}",
                route.from_location, route.to_location
            ),
            vec![from_agent.to_string(), to_agent.to_string()],
            Some(json!({ "route_id": route.route_id })),
        );
        Ok(serde_json::to_value(&route).unwrap_or_default())
    }

    pub fn execute_trade(&mut self, route_id: &str) -> Result<Value, ApiError> {
        let day = self.world.time().day;
        let now = self.world.now_hours();
        let mut rng = self.world.agent_rng(&format!("trade:{route_id}:{now}"));
        let outcome = self
            .world
            .factions
            .execute_trade(route_id, day, &mut rng)
            .map_err(ApiError::invalid_argument)?;
        let route = self
            .world
            .factions
            .route(route_id)
            .cloned()
            .expect("route just traded");
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.put_route(&route) {
                self.note_store_error("put_route", err);
            }
        }
        let kind = if outcome.success {
            WorldEventKind::TradeCompleted
        } else {
            WorldEventKind::TradeDisrupted
        };
        self.world.emit(
            kind,
            format!(
                "trade on {route_id}: {}",
                if outcome.success { "success" } else { "failed" }
            ),
            vec![route.from_agent.clone(), route.to_agent.clone()],
            Some(json!({ "gold": outcome.gold, "disrupted": outcome.disrupted })),
        );
        Ok(json!({
            "route_id": route_id,
            "success": outcome.success,
            "gold_earned": outcome.gold,
            "disrupted": outcome.disrupted,
        }))
    }

    pub fn set_route_status(&mut self, route_id: &str, action: &str) -> Result<bool, ApiError> {
        let changed = match action {
            "disrupt" => self.world.factions.disrupt_route(route_id),
            "restore" => self.world.factions.restore_route(route_id),
            "retire" => self.world.factions.retire_route(route_id),
            other => {
                return Err(ApiError::invalid_argument(format!(
                    "unknown route action {other}"
                )))
            }
        };
        if changed {
            if let Some(route) = self.world.factions.route(route_id).cloned() {
                if let Some(store) = self.store.as_mut() {
                    if let Err(err) = store.put_route(&route) {
                        self.note_store_error("put_route", err);
                    }
                }
                let kind = match action {
                    "restore" => WorldEventKind::RouteRestored,
                    _ => WorldEventKind::TradeDisrupted,
                };
                self.world.emit(
                    kind,
                    format!("route {route_id} {action}ed"),
                    Vec::new(),
                    None,
                );
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> ServiceCore {
        ServiceCore::new(
            SimConfig::default(),
            Some(SqliteStore::open_in_memory().expect("store opens")),
        )
    }

    #[test]
    fn init_and_snapshot_round_trip() {
        let mut core = core();
        let snapshot = core
            .init_agent("vera", "gate guard", None, Some("guards".to_string()), None)
            .expect("init");
        assert_eq!(snapshot.profile.agent_id, "vera");

        let cached = core.agent_snapshot("vera").expect("snapshot");
        assert_eq!(cached.profile.role, "gate guard");
    }

    #[test]
    fn unknown_agent_is_a_404_kind() {
        let mut core = core();
        let err = core.agent_snapshot("nobody").expect_err("missing");
        assert_eq!(err.kind, ErrorKind::AgentUnknown);
    }

    #[test]
    fn decay_endpoint_validates_hours() {
        let mut core = core();
        assert!(core.decay_memories(-1.0).is_err());
        assert!(core.decay_memories(24.0).is_ok());
    }

    #[test]
    fn quest_lifecycle_emits_events() {
        let mut core = core();
        core.init_agent("vera", "guard", None, None, None).expect("init");
        let quest = core.generate_quest("vera", Some("p1")).expect("quest");
        core.accept_quest(&quest.quest_id, "p1").expect("accept");
        core.complete_quest(&quest.quest_id).expect("complete");

        let kinds: Vec<_> = core
            .recent_events(50)
            .into_iter()
            .map(|event| event.kind)
            .collect();
        assert!(kinds.contains(&WorldEventKind::QuestGenerated));
        assert!(kinds.contains(&WorldEventKind::QuestAccepted));
        assert!(kinds.contains(&WorldEventKind::QuestCompleted));
    }

    #[test]
    fn advance_splits_into_time_scale_ticks() {
        let mut core = core();
        let reports = core.advance(3.0).expect("advance");
        assert_eq!(reports.len(), 3);
        assert!((core.world.now_hours() - 3.0).abs() < 1e-9);
    }
}
