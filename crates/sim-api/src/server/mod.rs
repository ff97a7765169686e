use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use contracts::agent::{Personality, Position};
use contracts::events::{WorldEvent, WorldEventKind};
use contracts::faction::FactionEventKind;
use contracts::{ApiError, ErrorKind, SimConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};

use crate::oracle::OracleClient;
use crate::persistence::{SqliteStore, StoreError};
use crate::ServiceCore;

const DEFAULT_SQLITE_PATH: &str = "npc_world.sqlite";
const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 1000;
const DEFAULT_EVENT_LIMIT: usize = 20;

include!("error.rs");
include!("state.rs");
include!("util.rs");
include!("routes/npc.rs");
include!("routes/world.rs");
include!("routes/faction.rs");
include!("routes/conversation.rs");
include!("routes/voice.rs");
include!("routes/stream.rs");

/// Open the store, build the container, and serve until shutdown.
pub async fn serve(addr: SocketAddr, config: SimConfig) -> Result<(), ServerError> {
    let sqlite_path = std::env::var("NPC_SQLITE_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
    let store = SqliteStore::open(&sqlite_path)?;
    let core = ServiceCore::new(config, Some(store));
    let state = AppState::new(core, OracleClient::from_env());
    let app = router(state);

    tracing::info!(%addr, sqlite = %sqlite_path, "simulation service listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/npc/init", post(init_npc))
        .route("/npc/action", post(npc_action))
        .route("/npc/status/{npc_id}", get(npc_status))
        .route("/npc/list", get(npc_list))
        .route("/npc/memories/{npc_id}/{player_id}", get(npc_memories))
        .route("/npc/relationships/{npc_id}", get(npc_relationships))
        .route("/memory/decay", post(memory_decay))
        .route("/memory/share/{from}/{to}", post(memory_share))
        .route("/memory/status", get(memory_status))
        .route("/gossip/{from}/{to}", post(memory_share))
        .route("/world/start", post(world_start))
        .route("/world/stop", post(world_stop))
        .route("/world/tick", post(world_tick))
        .route("/world/advance/{hours}", post(world_advance))
        .route("/world/status", get(world_status))
        .route("/world/events", get(world_events))
        .route("/factions", get(factions_list))
        .route("/faction/event", post(faction_event))
        .route("/territory/control", get(territory_control))
        .route("/territory/{territory}/battle", post(territory_battle))
        .route("/battle/{battle_id}/resolve", post(battle_resolve))
        .route("/battle/history", get(battle_history))
        .route("/traderoutes", get(traderoutes_list))
        .route("/traderoute/establish", post(traderoute_establish))
        .route("/traderoute/execute/{route_id}", post(traderoute_execute))
        .route("/traderoute/disrupt/{route_id}", post(traderoute_disrupt))
        .route("/traderoute/restore/{route_id}", post(traderoute_restore))
        .route("/quest/generate/{npc_id}", post(quest_generate))
        .route("/quest/available", get(quest_available))
        .route("/quest/accept/{quest_id}", post(quest_accept))
        .route("/quest/complete/{quest_id}", post(quest_complete))
        .route("/conversation/start", post(conversation_start))
        .route("/conversation/message", post(conversation_message))
        .route("/conversation/end", post(conversation_end))
        .route("/conversation/add-npc", post(conversation_add_npc))
        .route("/conversation/remove-npc", post(conversation_remove_npc))
        .route(
            "/conversation/location/{entity_kind}/{entity_id}",
            post(conversation_location),
        )
        .route("/conversation/nearby/{player_id}", get(conversation_nearby))
        .route("/voice/generate/{npc_id}", post(voice_generate))
        .route("/speech/transcribe", post(speech_transcribe))
        .route("/ws/game", get(ws_game))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests;
