#[derive(Debug, Deserialize)]
struct InitNpcRequest {
    npc_id: String,
    #[serde(default = "default_role")]
    role: String,
    faction: Option<String>,
    voice_fingerprint: Option<String>,
    personality: Option<Personality>,
}

fn default_role() -> String {
    "frontier dweller".to_string()
}

async fn init_npc(
    State(state): State<AppState>,
    Json(request): Json<InitNpcRequest>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let snapshot = core.init_agent(
        &request.npc_id,
        &request.role,
        request.personality,
        request.faction,
        request.voice_fingerprint,
    )?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "initialized", "npc": snapshot })))
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    npc_id: String,
    player_id: String,
    player_name: Option<String>,
    action: String,
}

/// Interactive cognition. The oracle call runs with the service lock
/// released; every effect commits before the response is produced, and a
/// provider failure still returns a usable fallback frame.
async fn npc_action(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<Value>, HttpApiError> {
    if request.action.trim().is_empty() {
        return Err(HttpApiError::invalid("action must not be empty"));
    }

    let (cognize_request, cited, config) = {
        let mut core = state.core.lock().await;
        core.world.record_player(
            &request.player_id,
            request.player_name.as_deref().unwrap_or(&request.player_id),
        );
        let cognize_request = core.assemble_cognition(
            &request.npc_id,
            &request.player_id,
            &request.action,
            Vec::new(),
        )?;
        let cited: Vec<String> = cognize_request
            .memories
            .iter()
            .map(|note| note.memory_id.clone())
            .collect();
        (cognize_request, cited, core.config().clone())
    };

    let outcome = state.oracle.cognize(&cognize_request, &config).await;

    let body = {
        let mut core = state.core.lock().await;
        let report = core.apply_cognition_effects(
            &request.npc_id,
            &request.player_id,
            &outcome,
            &cited,
            &request.action,
        )?;
        broadcast_new_events(&state, &core);
        let mood = core
            .world
            .agent(&request.npc_id)
            .map(|agent| agent.mood.label.as_str().to_string());
        action_response_body(&request.npc_id, &request.player_id, &report, mood.as_deref())
    };

    Ok(Json(body))
}

async fn npc_status(
    Path(npc_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let snapshot = core.agent_snapshot(&npc_id)?;
    Ok(Json(json!({ "npc": snapshot })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    filter: Option<String>,
    cursor: Option<usize>,
    page_size: Option<usize>,
}

async fn npc_list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let (agents, next_cursor) = core.list_agents(
        query.filter.as_deref(),
        query.cursor.unwrap_or(0),
        clamp_page_size(query.page_size),
    );
    Ok(Json(json!({
        "count": agents.len(),
        "npcs": agents,
        "next_cursor": next_cursor,
    })))
}

async fn npc_memories(
    Path((npc_id, player_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let memories = core.memories_about(&npc_id, &player_id)?;
    Ok(Json(json!({
        "npc_id": npc_id,
        "player_id": player_id,
        "count": memories.len(),
        "memories": memories,
    })))
}

async fn npc_relationships(
    Path(npc_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    if !core.world.has_agent(&npc_id) {
        return Err(ApiError::agent_unknown(&npc_id).into());
    }
    let relations: Vec<Value> = core
        .world
        .relations
        .relations_of(&npc_id)
        .into_iter()
        .map(|(other, relation)| {
            json!({
                "with": other,
                "trust": relation.trust,
                "familiarity": relation.familiarity,
                "last_interaction_hours": relation.last_interaction_hours,
            })
        })
        .collect();
    Ok(Json(json!({ "npc_id": npc_id, "relationships": relations })))
}

#[derive(Debug, Deserialize)]
struct DecayQuery {
    hours: Option<f64>,
}

async fn memory_decay(
    State(state): State<AppState>,
    Query(query): Query<DecayQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let hours = query.hours.unwrap_or(24.0);
    let mut core = state.core.lock().await;
    let (updated, deleted) = core.decay_memories(hours)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({
        "hours": hours,
        "memories_decayed": updated,
        "memories_forgotten": deleted,
    })))
}

async fn memory_share(
    Path((from, to)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let shared = core.gossip(&from, &to)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "from": from, "to": to, "shared": shared })))
}

#[derive(Debug, Deserialize)]
struct MemoryStatusQuery {
    npc_id: Option<String>,
    player_id: Option<String>,
}

async fn memory_status(
    State(state): State<AppState>,
    Query(query): Query<MemoryStatusQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let forget_threshold = core.config().forget_threshold;
    let Some(npc_id) = query.npc_id else {
        return Err(HttpApiError::invalid("npc_id is required"));
    };
    if !core.world.has_agent(&npc_id) {
        return Err(ApiError::agent_unknown(&npc_id).into());
    }

    let subject_filter = query.player_id.map(|player_id| contracts::player_subject(&player_id));
    let memories: Vec<Value> = core
        .world
        .memory
        .memories_of(&npc_id, 0.0)
        .into_iter()
        .filter(|memory| {
            subject_filter
                .as_ref()
                .map_or(true, |subject| &memory.subject == subject)
        })
        .map(|memory| {
            let status = if memory.strength > 0.8 {
                "vivid"
            } else if memory.strength > 0.5 {
                "clear"
            } else if memory.strength >= forget_threshold {
                "fading"
            } else {
                "dim"
            };
            json!({
                "memory_id": memory.memory_id,
                "subject": memory.subject,
                "category": memory.category.as_str(),
                "strength": memory.strength,
                "emotional_weight": memory.emotional_weight,
                "status": status,
                "ref_count": memory.ref_count,
            })
        })
        .collect();
    Ok(Json(json!({ "npc_id": npc_id, "total": memories.len(), "memories": memories })))
}
