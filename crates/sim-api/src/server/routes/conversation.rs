#[derive(Debug, Deserialize)]
struct ConversationStartRequest {
    player_id: String,
    #[serde(default = "default_player_name")]
    player_name: String,
    npc_ids: Option<Vec<String>>,
    location: Option<String>,
}

fn default_player_name() -> String {
    "Stranger".to_string()
}

async fn conversation_start(
    State(state): State<AppState>,
    Json(request): Json<ConversationStartRequest>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let group = core.start_conversation(
        &request.player_id,
        &request.player_name,
        request.npc_ids,
        request.location.as_deref().unwrap_or("unknown"),
    )?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({
        "status": "started",
        "group_id": group.group_id,
        "participants": group.participant_ids(),
        "location": group.location,
    })))
}

#[derive(Debug, Deserialize)]
struct ConversationMessageRequest {
    group_id: String,
    message: String,
    target_npc: Option<String>,
}

/// One player message into a group: salience-seeded orchestration via the
/// oracle (lock released), then validated turns and per-speaker effects in
/// the returned order.
async fn conversation_message(
    State(state): State<AppState>,
    Json(request): Json<ConversationMessageRequest>,
) -> Result<Json<Value>, HttpApiError> {
    if request.message.trim().is_empty() {
        return Err(HttpApiError::invalid("message must not be empty"));
    }

    let (group_request, player_id, config) = {
        let mut core = state.core.lock().await;
        let group_request = core.assemble_group_cognition(
            &request.group_id,
            &request.message,
            request.target_npc.as_deref(),
        )?;
        let player_id = core
            .world
            .groups
            .get(&request.group_id)
            .map(|group| group.player_id.clone())
            .ok_or_else(|| ApiError::group_closed(&request.group_id))?;
        (group_request, player_id, core.config().clone())
    };

    let turns = state.oracle.cognize_group(&group_request, &config).await;

    let body = {
        let mut core = state.core.lock().await;
        let (lines, tension) =
            core.apply_group_turns(&request.group_id, turns, &player_id, &request.message)?;
        broadcast_new_events(&state, &core);
        json!({
            "group_id": request.group_id,
            "responses": lines,
            "tension": tension,
        })
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct ConversationEndRequest {
    group_id: String,
}

async fn conversation_end(
    State(state): State<AppState>,
    Json(request): Json<ConversationEndRequest>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    core.end_conversation(&request.group_id)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "ended", "group_id": request.group_id })))
}

#[derive(Debug, Deserialize)]
struct ConversationNpcRequest {
    group_id: String,
    npc_id: String,
}

async fn conversation_add_npc(
    State(state): State<AppState>,
    Json(request): Json<ConversationNpcRequest>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    core.add_npc_to_conversation(&request.group_id, &request.npc_id)?;
    Ok(Json(json!({
        "status": "added",
        "group_id": request.group_id,
        "npc_id": request.npc_id,
    })))
}

async fn conversation_remove_npc(
    State(state): State<AppState>,
    Json(request): Json<ConversationNpcRequest>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    core.remove_npc_from_conversation(&request.group_id, &request.npc_id)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({
        "status": "removed",
        "group_id": request.group_id,
        "npc_id": request.npc_id,
    })))
}

async fn conversation_location(
    Path((entity_kind, entity_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(body): Json<PositionBody>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    core.update_location(&entity_kind, &entity_id, body.into_position())?;
    Ok(Json(json!({
        "status": "updated",
        "entity_kind": entity_kind,
        "entity_id": entity_id,
    })))
}

async fn conversation_nearby(
    Path(player_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let nearby = core.world.npcs_near_player(&player_id);
    Ok(Json(json!({ "player_id": player_id, "nearby": nearby })))
}
