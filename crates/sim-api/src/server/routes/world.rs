#[derive(Debug, Deserialize)]
struct WorldStartQuery {
    time_scale: Option<f64>,
    tick_interval: Option<f64>,
}

async fn world_start(
    State(state): State<AppState>,
    Query(query): Query<WorldStartQuery>,
) -> Result<Json<Value>, HttpApiError> {
    if state.autorun_running.load(Ordering::Acquire) {
        let core = state.core.lock().await;
        return Ok(Json(json!({
            "status": "already_running",
            "world_time": core.world.time(),
        })));
    }

    let (time_scale, tick_interval) = {
        let mut core = state.core.lock().await;
        let config = core.config();
        let time_scale = query.time_scale.unwrap_or(config.time_scale);
        let tick_interval = query.tick_interval.unwrap_or(config.tick_interval_secs);
        if time_scale <= 0.0 || tick_interval <= 0.0 {
            return Err(HttpApiError::invalid(
                "time_scale and tick_interval must be positive",
            ));
        }
        core.world.emit(
            WorldEventKind::WorldStarted,
            format!("world clock started at {time_scale}h per tick"),
            Vec::new(),
            None,
        );
        broadcast_new_events(&state, &core);
        (time_scale, tick_interval)
    };

    spawn_autorun(state.clone(), time_scale, tick_interval);
    Ok(Json(json!({
        "status": "started",
        "time_scale": time_scale,
        "tick_interval": tick_interval,
    })))
}

async fn world_stop(State(state): State<AppState>) -> Result<Json<Value>, HttpApiError> {
    if !state.autorun_running.swap(false, Ordering::AcqRel) {
        return Ok(Json(json!({ "status": "not_running" })));
    }
    let mut core = state.core.lock().await;
    core.world.emit(
        WorldEventKind::WorldStopped,
        "world clock stopped".to_string(),
        Vec::new(),
        None,
    );
    broadcast_new_events(&state, &core);
    Ok(Json(json!({
        "status": "stopped",
        "world_time": core.world.time(),
        "tick": core.world.current_tick(),
    })))
}

async fn world_tick(State(state): State<AppState>) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let report = core.tick(None);
    broadcast_new_events(&state, &core);
    Ok(Json(json!({
        "status": "tick_complete",
        "tick": report.tick,
        "advanced_hours": report.advanced_hours,
        "agents_processed": report.agents_processed,
        "agents_slipped": report.agents_slipped,
        "gossip_exchanges": report.gossip_exchanges,
        "quests_expired": report.quests_expired,
        "world_time": core.world.time(),
    })))
}

async fn world_advance(
    Path(hours): Path<f64>,
    State(state): State<AppState>,
) -> Result<Json<Value>, HttpApiError> {
    let mut core = state.core.lock().await;
    let reports = core.advance(hours)?;
    broadcast_new_events(&state, &core);
    Ok(Json(json!({
        "status": "advanced",
        "hours": hours,
        "ticks": reports.len(),
        "world_time": core.world.time(),
    })))
}

async fn world_status(State(state): State<AppState>) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let counts = core.world.tier_counts();
    Ok(Json(json!({
        "running": state.autorun_running.load(Ordering::Acquire),
        "world_time": core.world.time(),
        "tick": core.world.current_tick(),
        "agents": core.world.agent_count(),
        "tiers": {
            "active": counts.active,
            "nearby": counts.nearby,
            "idle": counts.idle,
            "dormant": counts.dormant,
        },
        "budget_exceeded_count": core.world.budget_exceeded_count(),
        "replay_hash": format!("{:016x}", core.world.replay_hash()),
        "last_store_error": core.last_store_error(),
    })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn world_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, HttpApiError> {
    let core = state.core.lock().await;
    let events = core.recent_events(query.limit.unwrap_or(DEFAULT_EVENT_LIMIT));
    Ok(Json(json!({
        "total": events.len(),
        "world_time": core.world.time(),
        "events": events,
    })))
}
