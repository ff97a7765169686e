//! SQLite persistence: durable copies of agents, memories, social state, and
//! the world-event log, with bulk sweeps, a write-behind queue for hot
//! vitals/mood updates, and retry-with-backoff on transient failures.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use contracts::agent::{DeltaLogEntry, Mood, Vitals};
use contracts::events::WorldEvent;
use contracts::faction::{Battle, FactionState, Quest, Territory, TradeRoute};
use contracts::memory::{MemoryCategory, MemoryRecord, RumorRecord};
use contracts::SCHEMA_VERSION;
use rusqlite::{params, Connection, OptionalExtension};

use sim_core::agent::AgentState;

/// Retry policy for transient failures: exponential backoff from 100 ms,
/// capped at 5 s, five attempts, then the error surfaces as unavailable.
const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: u32 = 5;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    Unavailable { attempts: u32, last: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::Unavailable { attempts, last } => {
                write!(f, "store unavailable after {attempts} attempts: {last}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::DatabaseBusy
                || code.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                faction TEXT,
                voice_fingerprint TEXT,
                zone TEXT,
                personality_json TEXT NOT NULL,
                vitals_json TEXT NOT NULL,
                mood_json TEXT NOT NULL,
                goals_json TEXT NOT NULL,
                updated_at_hours REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS delta_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                trait_kind TEXT NOT NULL,
                from_value REAL NOT NULL,
                to_value REAL NOT NULL,
                delta REAL NOT NULL,
                reason TEXT NOT NULL,
                at_hours REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memories (
                memory_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                subject TEXT NOT NULL,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                strength REAL NOT NULL,
                emotional_weight REAL NOT NULL,
                created_at_hours REAL NOT NULL,
                last_referenced_at_hours REAL NOT NULL,
                ref_count INTEGER NOT NULL,
                source_json TEXT NOT NULL,
                keywords_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rumors (
                rumor_id TEXT PRIMARY KEY,
                about TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reputation (
                player_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (player_id, subject)
            );

            CREATE TABLE IF NOT EXISTS factions (
                faction_id TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS territories (
                territory_id TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trade_routes (
                route_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS battles (
                battle_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS quests (
                quest_id TEXT PRIMARY KEY,
                giver TEXT NOT NULL,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS world_events (
                seq INTEGER PRIMARY KEY,
                payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_agents_zone ON agents(zone);
            CREATE INDEX IF NOT EXISTS idx_delta_log_agent ON delta_log(agent_id, at_hours);
            CREATE INDEX IF NOT EXISTS idx_memories_owner_subject ON memories(owner, subject);
            CREATE INDEX IF NOT EXISTS idx_memories_owner_ref ON memories(owner, last_referenced_at_hours);
            CREATE INDEX IF NOT EXISTS idx_memories_subject ON memories(subject);
            CREATE INDEX IF NOT EXISTS idx_rumors_about ON rumors(about);
            CREATE INDEX IF NOT EXISTS idx_quests_giver_status ON quests(giver, status);
            ",
        )?;

        let version: Option<i64> = self
            .conn
            .query_row("SELECT version FROM meta WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        match version {
            None => {
                self.conn.execute(
                    "INSERT INTO meta (id, version) VALUES (1, ?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(found) if found > SCHEMA_VERSION => {
                return Err(StoreError::Unavailable {
                    attempts: 0,
                    last: format!("schema version {found} is newer than supported {SCHEMA_VERSION}"),
                });
            }
            Some(_) => {
                // Forward-only: older versions would migrate here.
                self.conn.execute(
                    "UPDATE meta SET version = ?1 WHERE id = 1",
                    params![SCHEMA_VERSION],
                )?;
            }
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT version FROM meta WHERE id = 1", [], |row| row.get(0))?)
    }

    /// Run an operation with exponential backoff on busy/locked errors.
    fn with_retries<T>(
        &mut self,
        mut op: impl FnMut(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let mut delay = RETRY_BASE;
        let mut last = String::new();
        for attempt in 0..RETRY_ATTEMPTS {
            match op(&mut self.conn) {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) => {
                    last = err.to_string();
                    tracing::warn!(attempt, error = %last, "transient store failure, backing off");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(RETRY_CAP);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Unavailable {
            attempts: RETRY_ATTEMPTS,
            last,
        })
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub fn put_agent(&mut self, agent: &AgentState, zone: Option<&str>, now_hours: f64) -> Result<(), StoreError> {
        let personality = serde_json::to_string(&agent.personality)?;
        let vitals = serde_json::to_string(&agent.vitals)?;
        let mood = serde_json::to_string(&agent.mood)?;
        let goals = serde_json::to_string(&agent.goals)?;
        let profile = agent.profile.clone();
        let zone = zone.map(str::to_string);
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO agents (
                    agent_id, role, faction, voice_fingerprint, zone,
                    personality_json, vitals_json, mood_json, goals_json, updated_at_hours
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(agent_id) DO UPDATE SET
                    role = excluded.role,
                    faction = excluded.faction,
                    voice_fingerprint = excluded.voice_fingerprint,
                    zone = excluded.zone,
                    personality_json = excluded.personality_json,
                    vitals_json = excluded.vitals_json,
                    mood_json = excluded.mood_json,
                    goals_json = excluded.goals_json,
                    updated_at_hours = excluded.updated_at_hours",
                params![
                    profile.agent_id,
                    profile.role,
                    profile.faction,
                    profile.voice_fingerprint,
                    zone,
                    personality,
                    vitals,
                    mood,
                    goals,
                    now_hours,
                ],
            )
            .map(|_| ())
        })
    }

    /// Coalesced hot-path update from the write-behind queue.
    pub fn update_agent_vitals_mood(
        &mut self,
        updates: &[(String, Vitals, Mood)],
        now_hours: f64,
    ) -> Result<(), StoreError> {
        let mut rows = Vec::with_capacity(updates.len());
        for (agent_id, vitals, mood) in updates {
            rows.push((
                agent_id.clone(),
                serde_json::to_string(vitals)?,
                serde_json::to_string(mood)?,
            ));
        }
        self.with_retries(move |conn| {
            let tx = conn.transaction()?;
            for (agent_id, vitals, mood) in &rows {
                tx.execute(
                    "UPDATE agents
                     SET vitals_json = ?2, mood_json = ?3, updated_at_hours = ?4
                     WHERE agent_id = ?1",
                    params![agent_id, vitals, mood, now_hours],
                )?;
            }
            tx.commit()
        })
    }

    pub fn agent_exists(&self, agent_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_agent(&mut self, agent_id: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        self.with_retries(move |conn| {
            conn.execute("DELETE FROM agents WHERE agent_id = ?1", params![agent_id])
                .map(|_| ())
        })
    }

    pub fn append_delta_log(
        &mut self,
        agent_id: &str,
        entries: &[DeltaLogEntry],
    ) -> Result<(), StoreError> {
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            rows.push((
                serde_json::to_string(&entry.trait_kind)?
                    .trim_matches('"')
                    .to_string(),
                entry.from,
                entry.to,
                entry.delta,
                entry.reason.clone(),
                entry.at_hours,
            ));
        }
        let agent_id = agent_id.to_string();
        self.with_retries(move |conn| {
            let tx = conn.transaction()?;
            for (trait_kind, from, to, delta, reason, at_hours) in &rows {
                tx.execute(
                    "INSERT INTO delta_log (agent_id, trait_kind, from_value, to_value, delta, reason, at_hours)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![agent_id, trait_kind, from, to, delta, reason, at_hours],
                )?;
            }
            tx.commit()
        })
    }

    pub fn delta_log_count(&self, agent_id: &str) -> Result<u64, StoreError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM delta_log WHERE agent_id = ?1",
            params![agent_id],
            |row| row.get::<_, i64>(0),
        )? as u64)
    }

    // -----------------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------------

    pub fn insert_memory(&mut self, memory: &MemoryRecord) -> Result<(), StoreError> {
        let source = serde_json::to_string(&memory.source)?;
        let keywords = serde_json::to_string(&memory.keywords)?;
        let memory = memory.clone();
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO memories (
                    memory_id, owner, subject, category, content, strength,
                    emotional_weight, created_at_hours, last_referenced_at_hours,
                    ref_count, source_json, keywords_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(memory_id) DO UPDATE SET
                    strength = excluded.strength,
                    last_referenced_at_hours = excluded.last_referenced_at_hours,
                    ref_count = excluded.ref_count",
                params![
                    memory.memory_id,
                    memory.owner,
                    memory.subject,
                    memory.category.as_str(),
                    memory.content,
                    memory.strength,
                    memory.emotional_weight,
                    memory.created_at_hours,
                    memory.last_referenced_at_hours,
                    memory.ref_count,
                    source,
                    keywords,
                ],
            )
            .map(|_| ())
        })
    }

    pub fn query_memories(
        &self,
        owner: &str,
        subject: Option<&str>,
        min_strength: Option<f64>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let sql = "SELECT memory_id, owner, subject, category, content, strength,
                          emotional_weight, created_at_hours, last_referenced_at_hours,
                          ref_count, source_json, keywords_json
                   FROM memories
                   WHERE owner = ?1
                     AND (?2 = '' OR subject = ?2)
                     AND strength >= ?3
                   ORDER BY strength DESC, memory_id ASC
                   LIMIT ?4";

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(
            params![
                owner,
                subject.unwrap_or(""),
                min_strength.unwrap_or(0.0),
                limit as i64
            ],
            row_to_memory,
        )?;

        let mut memories = Vec::new();
        for row in rows {
            memories.push(row??);
        }
        Ok(memories)
    }

    /// One transaction per decay sweep, however many memories moved.
    pub fn bulk_update_strength(&mut self, updates: &[(String, f64)]) -> Result<(), StoreError> {
        let updates = updates.to_vec();
        self.with_retries(move |conn| {
            let tx = conn.transaction()?;
            for (memory_id, strength) in &updates {
                tx.execute(
                    "UPDATE memories SET strength = ?2 WHERE memory_id = ?1",
                    params![memory_id, strength],
                )?;
            }
            tx.commit()
        })
    }

    /// Remove every memory weaker than the threshold; returns rows deleted.
    pub fn delete_below(&mut self, threshold: f64) -> Result<usize, StoreError> {
        self.with_retries(move |conn| {
            conn.execute(
                "DELETE FROM memories WHERE strength < ?1",
                params![threshold],
            )
        })
    }

    pub fn put_rumor(&mut self, rumor: &RumorRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(rumor)?;
        let rumor_id = rumor.rumor_id.clone();
        let about = rumor.about.clone();
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO rumors (rumor_id, about, payload_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(rumor_id) DO UPDATE SET payload_json = excluded.payload_json",
                params![rumor_id, about, payload],
            )
            .map(|_| ())
        })
    }

    // -----------------------------------------------------------------------
    // Reputation, factions, territories, routes, battles, quests
    // -----------------------------------------------------------------------

    pub fn put_reputation(
        &mut self,
        player_id: &str,
        subject: &str,
        value: f64,
    ) -> Result<(), StoreError> {
        let player_id = player_id.to_string();
        let subject = subject.to_string();
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO reputation (player_id, subject, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(player_id, subject) DO UPDATE SET value = excluded.value",
                params![player_id, subject, value],
            )
            .map(|_| ())
        })
    }

    pub fn put_faction(&mut self, faction: &FactionState) -> Result<(), StoreError> {
        self.put_payload("factions", "faction_id", &faction.faction_id, faction)
    }

    pub fn get_faction(&self, faction_id: &str) -> Result<Option<FactionState>, StoreError> {
        self.get_payload("factions", "faction_id", faction_id)
    }

    pub fn put_territory(&mut self, territory: &Territory) -> Result<(), StoreError> {
        self.put_payload(
            "territories",
            "territory_id",
            &territory.territory_id,
            territory,
        )
    }

    pub fn get_territory(&self, territory_id: &str) -> Result<Option<Territory>, StoreError> {
        self.get_payload("territories", "territory_id", territory_id)
    }

    pub fn put_route(&mut self, route: &TradeRoute) -> Result<(), StoreError> {
        let payload = serde_json::to_string(route)?;
        let route_id = route.route_id.clone();
        let status = format!("{:?}", route.status).to_lowercase();
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO trade_routes (route_id, status, payload_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(route_id) DO UPDATE SET
                    status = excluded.status, payload_json = excluded.payload_json",
                params![route_id, status, payload],
            )
            .map(|_| ())
        })
    }

    pub fn put_battle(&mut self, battle: &Battle) -> Result<(), StoreError> {
        let payload = serde_json::to_string(battle)?;
        let battle_id = battle.battle_id.clone();
        let status = format!("{:?}", battle.status).to_lowercase();
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO battles (battle_id, status, payload_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(battle_id) DO UPDATE SET
                    status = excluded.status, payload_json = excluded.payload_json",
                params![battle_id, status, payload],
            )
            .map(|_| ())
        })
    }

    pub fn put_quest(&mut self, quest: &Quest) -> Result<(), StoreError> {
        let payload = serde_json::to_string(quest)?;
        let quest_id = quest.quest_id.clone();
        let giver = quest.giver.clone();
        let status = format!("{:?}", quest.status).to_lowercase();
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT INTO quests (quest_id, giver, status, payload_json) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(quest_id) DO UPDATE SET
                    status = excluded.status, payload_json = excluded.payload_json",
                params![quest_id, giver, status, payload],
            )
            .map(|_| ())
        })
    }

    fn put_payload<T: serde::Serialize>(
        &mut self,
        table: &str,
        key_column: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        let key = key.to_string();
        let sql = format!(
            "INSERT INTO {table} ({key_column}, payload_json) VALUES (?1, ?2)
             ON CONFLICT({key_column}) DO UPDATE SET payload_json = excluded.payload_json"
        );
        self.with_retries(move |conn| conn.execute(&sql, params![key, payload]).map(|_| ()))
    }

    fn get_payload<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        key_column: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let sql = format!("SELECT payload_json FROM {table} WHERE {key_column} = ?1");
        let payload: Option<String> = self
            .conn
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()?;
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // World events
    // -----------------------------------------------------------------------

    pub fn append_world_event(&mut self, event: &WorldEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event)?;
        let seq = event.seq as i64;
        self.with_retries(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO world_events (seq, payload_json) VALUES (?1, ?2)",
                params![seq, payload],
            )
            .map(|_| ())
        })
    }

    pub fn list_world_events(&self, limit: usize) -> Result<Vec<WorldEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM world_events ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for row in rows {
            events.push(serde_json::from_str::<WorldEvent>(&row?)?);
        }
        events.reverse();
        Ok(events)
    }
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<MemoryRecord, StoreError>> {
    let category: String = row.get(3)?;
    let source_json: String = row.get(10)?;
    let keywords_json: String = row.get(11)?;
    Ok((|| {
        Ok(MemoryRecord {
            memory_id: row.get(0)?,
            owner: row.get(1)?,
            subject: row.get(2)?,
            category: MemoryCategory::parse(&category).unwrap_or(MemoryCategory::Event),
            content: row.get(4)?,
            strength: row.get(5)?,
            emotional_weight: row.get(6)?,
            created_at_hours: row.get(7)?,
            last_referenced_at_hours: row.get(8)?,
            ref_count: row.get(9)?,
            source: serde_json::from_str(&source_json)?,
            keywords: serde_json::from_str(&keywords_json)?,
        })
    })())
}

/// Coalescing queue for hot vitals/mood writes. The newest state per agent
/// wins; the queue drains on a window deadline or on demand.
#[derive(Debug)]
pub struct WriteBehindQueue {
    pending: BTreeMap<String, (Vitals, Mood)>,
    window: Duration,
    last_flush: Instant,
}

impl WriteBehindQueue {
    pub fn new(window_secs: f64) -> Self {
        Self {
            pending: BTreeMap::new(),
            window: Duration::from_secs_f64(window_secs.max(0.0)),
            last_flush: Instant::now(),
        }
    }

    pub fn queue(&mut self, agent_id: &str, vitals: Vitals, mood: Mood) {
        self.pending.insert(agent_id.to_string(), (vitals, mood));
    }

    pub fn due(&self) -> bool {
        !self.pending.is_empty() && self.last_flush.elapsed() >= self.window
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> Vec<(String, Vitals, Mood)> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(agent_id, (vitals, mood))| (agent_id, vitals, mood))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::agent::{AgentProfile, Personality};
    use contracts::events::WorldEventKind;
    use contracts::memory::MemorySource;
    use contracts::WorldTime;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store opens")
    }

    fn sample_memory(id: &str, strength: f64) -> MemoryRecord {
        MemoryRecord {
            memory_id: id.to_string(),
            owner: "vera".to_string(),
            subject: "player:p1".to_string(),
            category: MemoryCategory::Event,
            content: "raiders to the east".to_string(),
            strength,
            emotional_weight: 0.6,
            created_at_hours: 1.0,
            last_referenced_at_hours: 1.0,
            ref_count: 0,
            source: MemorySource::Firsthand,
            keywords: vec!["raiders".to_string()],
        }
    }

    #[test]
    fn migration_writes_the_schema_version() {
        let store = store();
        assert_eq!(store.schema_version().expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn agent_round_trip_and_vitals_update() {
        let mut store = store();
        let agent = AgentState::new(
            AgentProfile {
                agent_id: "vera".to_string(),
                role: "guard".to_string(),
                faction: Some("guards".to_string()),
                voice_fingerprint: None,
            },
            Personality::default(),
        );
        store.put_agent(&agent, Some("gates"), 0.0).expect("put");
        assert!(store.agent_exists("vera").expect("exists"));

        let updates = vec![(
            "vera".to_string(),
            Vitals {
                hunger: 0.9,
                fatigue: 0.4,
            },
            Mood::default(),
        )];
        store
            .update_agent_vitals_mood(&updates, 2.0)
            .expect("update");
    }

    #[test]
    fn memory_query_respects_filters_and_order() {
        let mut store = store();
        store.insert_memory(&sample_memory("mem_1", 0.9)).expect("insert");
        store.insert_memory(&sample_memory("mem_2", 0.3)).expect("insert");
        store
            .insert_memory(&{
                let mut other = sample_memory("mem_3", 0.8);
                other.subject = "player:p2".to_string();
                other
            })
            .expect("insert");

        let found = store
            .query_memories("vera", Some("player:p1"), Some(0.5), 10)
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].memory_id, "mem_1");

        let all = store
            .query_memories("vera", None, None, 10)
            .expect("query");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].memory_id, "mem_1", "strongest first");
    }

    #[test]
    fn bulk_update_and_delete_below() {
        let mut store = store();
        store.insert_memory(&sample_memory("mem_1", 1.0)).expect("insert");
        store.insert_memory(&sample_memory("mem_2", 1.0)).expect("insert");

        store
            .bulk_update_strength(&[
                ("mem_1".to_string(), 0.5),
                ("mem_2".to_string(), 0.005),
            ])
            .expect("bulk update");
        let deleted = store.delete_below(0.01).expect("delete");
        assert_eq!(deleted, 1);

        let left = store.query_memories("vera", None, None, 10).expect("query");
        assert_eq!(left.len(), 1);
        assert!((left[0].strength - 0.5).abs() < 1e-12);
    }

    #[test]
    fn world_events_persist_in_sequence_order() {
        let mut store = store();
        for seq in [3_u64, 1, 2] {
            let event = WorldEvent::new(
                seq,
                seq,
                WorldTime::default(),
                WorldEventKind::TickCompleted,
                format!("tick {seq}"),
            );
            store.append_world_event(&event).expect("append");
        }
        let events = store.list_world_events(10).expect("list");
        let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn write_behind_coalesces_per_agent() {
        let mut queue = WriteBehindQueue::new(0.0);
        queue.queue("vera", Vitals { hunger: 0.1, fatigue: 0.1 }, Mood::default());
        queue.queue("vera", Vitals { hunger: 0.7, fatigue: 0.2 }, Mood::default());
        queue.queue("marcus", Vitals::default(), Mood::default());

        assert_eq!(queue.len(), 2, "latest write per agent wins");
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        let vera = drained
            .iter()
            .find(|(agent_id, _, _)| agent_id == "vera")
            .expect("vera update");
        assert!((vera.1.hunger - 0.7).abs() < 1e-12);
        assert!(queue.is_empty());
    }
}
