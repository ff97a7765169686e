//! World-event log entries. The kernel appends these to a bounded ring; the
//! API streams them and persists them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::WorldTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorldEventKind {
    WorldStarted,
    WorldStopped,
    TickCompleted,
    AgentInitialized,
    AgentShutdown,
    InteractionUrgent,
    GossipExchanged,
    MemorySweep,
    QuestGenerated,
    QuestAccepted,
    QuestCompleted,
    QuestExpired,
    BattleStarted,
    BattleResolved,
    TerritoryCaptured,
    TradeCompleted,
    TradeDisrupted,
    RouteEstablished,
    RouteRestored,
    FactionEvent,
    FactionRelationShifted,
    ConversationStarted,
    ConversationEnded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldEvent {
    pub event_id: String,
    /// Monotonic sequence across the whole run; the replay hash folds it in.
    pub seq: u64,
    pub tick: u64,
    pub at: WorldTime,
    pub kind: WorldEventKind,
    pub summary: String,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl WorldEvent {
    pub fn new(
        seq: u64,
        tick: u64,
        at: WorldTime,
        kind: WorldEventKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            event_id: format!("evt_{seq:08}"),
            seq,
            tick,
            at,
            kind,
            summary: summary.into(),
            actors: Vec::new(),
            details: None,
        }
    }

    pub fn with_actors(mut self, actors: Vec<String>) -> Self {
        self.actors = actors;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_zero_padded_by_sequence() {
        let event = WorldEvent::new(
            7,
            1,
            WorldTime::default(),
            WorldEventKind::TickCompleted,
            "tick",
        );
        assert_eq!(event.event_id, "evt_00000007");
    }
}
