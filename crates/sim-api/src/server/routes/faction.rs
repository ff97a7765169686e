async fn factions_list(State(state): State<AppState>) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let factions: Vec<Value> = core
        .world
        .factions
        .factions()
        .map(|faction| serde_json::to_value(faction).unwrap_or_default())
        .collect();
    Ok(Json(json!({ "factions": factions })))
}

#[derive(Debug, Deserialize)]
struct FactionEventQuery {
    event_type: String,
    faction1: String,
    faction2: String,
}

async fn faction_event(
    State(state): State<AppState>,
    Query(query): Query<FactionEventQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let Some(kind) = FactionEventKind::parse(&query.event_type) else {
        return Err(HttpApiError::invalid(format!(
            "unknown event_type {}; expected skirmish|trade_deal|betrayal|alliance_formed",
            query.event_type
        )));
    };
    let mut core = state.core.lock().await;
    let score = core.trigger_faction_event(kind, &query.faction1, &query.faction2)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({
        "event_type": query.event_type,
        "faction1": query.faction1,
        "faction2": query.faction2,
        "score": score,
    })))
}

async fn territory_control(State(state): State<AppState>) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let territories: Vec<Value> = core
        .world
        .factions
        .territories()
        .map(|territory| serde_json::to_value(territory).unwrap_or_default())
        .collect();
    Ok(Json(json!({ "territories": territories })))
}

#[derive(Debug, Deserialize)]
struct BattleQuery {
    attacker: String,
}

async fn territory_battle(
    Path(territory): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<BattleQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let battle = core.begin_battle(&territory, &query.attacker)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "battle_started", "battle": battle })))
}

async fn battle_resolve(
    Path(battle_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let battle = core.resolve_battle(&battle_id)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "resolved", "battle": battle })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn battle_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let mut battles: Vec<Value> = core
        .world
        .factions
        .battles()
        .map(|battle| serde_json::to_value(battle).unwrap_or_default())
        .collect();
    battles.reverse();
    battles.truncate(query.limit.unwrap_or(10));
    Ok(Json(json!({ "battles": battles })))
}

async fn traderoutes_list(State(state): State<AppState>) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let routes: Vec<Value> = core
        .world
        .factions
        .routes()
        .map(|route| serde_json::to_value(route).unwrap_or_default())
        .collect();
    Ok(Json(json!({ "routes": routes })))
}

#[derive(Debug, Deserialize)]
struct EstablishRouteRequest {
    from_npc: String,
    to_npc: String,
    from_location: Option<String>,
    to_location: Option<String>,
}

async fn traderoute_establish(
    State(state): State<AppState>,
    Json(request): Json<EstablishRouteRequest>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let route = core.establish_route(
        &request.from_npc,
        &request.to_npc,
        request.from_location.as_deref(),
        request.to_location.as_deref(),
    )?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "established", "route": route })))
}

async fn traderoute_execute(
    Path(route_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let outcome = core.execute_trade(&route_id)?;
    broadcast_new_events(&state, &core);
    Ok(Json(outcome))
}

async fn traderoute_disrupt(
    Path(route_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let changed = core.set_route_status(&route_id, "disrupt")?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "route_id": route_id, "disrupted": changed })))
}

async fn traderoute_restore(
    Path(route_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let changed = core.set_route_status(&route_id, "restore")?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "route_id": route_id, "restored": changed })))
}

#[derive(Debug, Deserialize)]
struct QuestGenerateQuery {
    player_id: Option<String>,
}

async fn quest_generate(
    Path(npc_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<QuestGenerateQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let quest = core.generate_quest(&npc_id, query.player_id.as_deref())?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "generated", "quest": quest })))
}

#[derive(Debug, Deserialize)]
struct QuestAvailableQuery {
    npc_id: Option<String>,
    player_id: Option<String>,
}

async fn quest_available(
    State(state): State<AppState>,
    Query(query): Query<QuestAvailableQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let quests: Vec<Value> = core
        .world
        .quests
        .available(query.npc_id.as_deref(), query.player_id.as_deref())
        .into_iter()
        .map(|quest| serde_json::to_value(quest).unwrap_or_default())
        .collect();
    Ok(Json(json!({ "count": quests.len(), "quests": quests })))
}

#[derive(Debug, Deserialize)]
struct QuestAcceptQuery {
    player_id: String,
}

async fn quest_accept(
    Path(quest_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<QuestAcceptQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let quest = core.accept_quest(&quest_id, &query.player_id)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "accepted", "quest": quest })))
}

async fn quest_complete(
    Path(quest_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let quest = core.complete_quest(&quest_id)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({ "status": "completed", "quest": quest })))
}
