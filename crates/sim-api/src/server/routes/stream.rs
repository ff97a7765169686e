#[derive(Debug, Deserialize)]
struct WsQuery {
    player_id: String,
    player_name: Option<String>,
}

async fn ws_game(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let player_name = query
        .player_name
        .unwrap_or_else(|| format!("Player_{}", &query.player_id));
    ws.on_upgrade(move |socket| game_socket(socket, state, query.player_id, player_name))
}

/// One connection task owns the socket. Client frames dispatch into the core
/// exactly like their HTTP counterparts; subscribed connections also receive
/// the world-event broadcast. Every response echoes the client's request_id.
async fn game_socket(mut socket: WebSocket, state: AppState, player_id: String, player_name: String) {
    {
        let mut core = state.core.lock().await;
        core.world.record_player(&player_id, &player_name);
    }
    let mut events_rx = state.events_tx.subscribe();
    let mut subscribed = false;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let frames = handle_game_frame(
                            &state,
                            &player_id,
                            &player_name,
                            text.as_str(),
                            &mut subscribed,
                        )
                        .await;
                        if send_frames(&mut socket, frames).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        if subscribed {
                            let frame = json!({ "type": "world_event", "event": event });
                            if send_frames(&mut socket, vec![frame]).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let frame = json!({
                            "type": "error",
                            "error": {
                                "kind": "stream_lagged",
                                "message": format!("skipped {skipped} world events"),
                            },
                        });
                        if send_frames(&mut socket, vec![frame]).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn send_frames(socket: &mut WebSocket, frames: Vec<Value>) -> Result<(), axum::Error> {
    for frame in frames {
        let payload = serde_json::to_string(&frame).map_err(axum::Error::new)?;
        socket.send(Message::Text(payload.into())).await?;
    }
    Ok(())
}

fn ws_error(message: impl Into<String>, request_id: Option<&Value>) -> Value {
    let mut frame = json!({
        "type": "error",
        "error": { "kind": "invalid_argument", "message": message.into() },
    });
    attach_request_id(&mut frame, request_id);
    frame
}

fn ws_api_error(error: ApiError, request_id: Option<&Value>) -> Value {
    let mut frame = json!({ "type": "error", "error": error });
    attach_request_id(&mut frame, request_id);
    frame
}

fn attach_request_id(frame: &mut Value, request_id: Option<&Value>) {
    if let (Some(object), Some(request_id)) = (frame.as_object_mut(), request_id) {
        object.insert("request_id".to_string(), request_id.clone());
    }
}

async fn handle_game_frame(
    state: &AppState,
    player_id: &str,
    player_name: &str,
    raw: &str,
    subscribed: &mut bool,
) -> Vec<Value> {
    let message: Value = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(err) => return vec![ws_error(format!("frame is not JSON: {err}"), None)],
    };
    let request_id = message.get("request_id").cloned();
    let request_id = request_id.as_ref();
    let message_type = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    let mut frames = match message_type.as_str() {
        "ping" => vec![json!({ "type": "pong" })],
        "subscribe_events" => {
            *subscribed = true;
            vec![json!({ "type": "subscribed" })]
        }
        "npc_action" => ws_npc_action(state, player_id, player_name, &message).await,
        "npc_status" => {
            let Some(npc_id) = message.get("npc_id").and_then(Value::as_str) else {
                return vec![ws_error("npc_id required", request_id)];
            };
            let mut core = state.core.lock().await;
            match core.agent_snapshot(npc_id) {
                Ok(snapshot) => vec![json!({ "type": "npc_status_response", "npc": snapshot })],
                Err(err) => vec![ws_api_error(err, request_id)],
            }
        }
        "voice_generate" => ws_voice_generate(state, &message).await,
        "speech_transcribe" => ws_transcribe(state, &message).await,
        "get_factions" => {
            let core = state.core.lock().await;
            let factions: Vec<Value> = core
                .world
                .factions
                .factions()
                .map(|faction| serde_json::to_value(faction).unwrap_or_default())
                .collect();
            vec![json!({ "type": "factions", "factions": factions })]
        }
        "get_world_events" => {
            let limit = message
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_EVENT_LIMIT as u64) as usize;
            let core = state.core.lock().await;
            vec![json!({
                "type": "world_events",
                "events": core.recent_events(limit),
            })]
        }
        "start_conversation" => {
            let npc_ids = message.get("npc_ids").and_then(Value::as_array).map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            });
            let location = message
                .get("location")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let mut core = state.core.lock().await;
            match core.start_conversation(player_id, player_name, npc_ids, location) {
                Ok(group) => {
                    broadcast_new_events(state, &core);
                    vec![json!({
                        "type": "conversation_started",
                        "group_id": group.group_id,
                        "participants": group.participant_ids(),
                    })]
                }
                Err(err) => vec![ws_api_error(err, request_id)],
            }
        }
        "conversation_message" => ws_conversation_message(state, &message).await,
        "end_conversation" => {
            let Some(group_id) = message.get("group_id").and_then(Value::as_str) else {
                return vec![ws_error("group_id required", request_id)];
            };
            let mut core = state.core.lock().await;
            match core.end_conversation(group_id) {
                Ok(()) => {
                    broadcast_new_events(state, &core);
                    vec![json!({ "type": "conversation_ended", "group_id": group_id })]
                }
                Err(err) => vec![ws_api_error(err, request_id)],
            }
        }
        "add_npc" | "remove_npc" => {
            let (Some(group_id), Some(npc_id)) = (
                message.get("group_id").and_then(Value::as_str),
                message.get("npc_id").and_then(Value::as_str),
            ) else {
                return vec![ws_error("group_id and npc_id required", request_id)];
            };
            let mut core = state.core.lock().await;
            let result = if message_type == "add_npc" {
                core.add_npc_to_conversation(group_id, npc_id)
            } else {
                core.remove_npc_from_conversation(group_id, npc_id)
            };
            match result {
                Ok(()) => vec![json!({
                    "type": "conversation_updated",
                    "group_id": group_id,
                    "npc_id": npc_id,
                    "action": message_type,
                })],
                Err(err) => vec![ws_api_error(err, request_id)],
            }
        }
        "update_location" => {
            let entity_kind = message
                .get("entity_type")
                .and_then(Value::as_str)
                .unwrap_or("player");
            let entity_id = message
                .get("entity_id")
                .and_then(Value::as_str)
                .unwrap_or(player_id);
            let position = Position {
                x: message.get("x").and_then(Value::as_f64).unwrap_or(0.0),
                y: message.get("y").and_then(Value::as_f64).unwrap_or(0.0),
                z: message.get("z").and_then(Value::as_f64).unwrap_or(0.0),
                zone: message
                    .get("zone")
                    .and_then(Value::as_str)
                    .unwrap_or("default")
                    .to_string(),
            };
            let mut core = state.core.lock().await;
            match core.update_location(entity_kind, entity_id, position) {
                Ok(()) => vec![json!({
                    "type": "location_updated",
                    "entity_id": entity_id,
                })],
                Err(err) => vec![ws_api_error(err, request_id)],
            }
        }
        "get_nearby_npcs" => {
            let core = state.core.lock().await;
            vec![json!({
                "type": "nearby_npcs",
                "nearby": core.world.npcs_near_player(player_id),
            })]
        }
        other => vec![ws_error(format!("unknown frame type {other}"), request_id)],
    };

    for frame in &mut frames {
        attach_request_id(frame, request_id);
    }
    frames
}

async fn ws_npc_action(
    state: &AppState,
    player_id: &str,
    player_name: &str,
    message: &Value,
) -> Vec<Value> {
    let request_id = message.get("request_id");
    let (Some(npc_id), Some(action)) = (
        message.get("npc_id").and_then(Value::as_str),
        message.get("action").and_then(Value::as_str),
    ) else {
        return vec![ws_error("npc_id and action required", request_id)];
    };

    let assembled = {
        let mut core = state.core.lock().await;
        core.world.record_player(player_id, player_name);
        match core.assemble_cognition(npc_id, player_id, action, Vec::new()) {
            Ok(request) => {
                let cited: Vec<String> = request
                    .memories
                    .iter()
                    .map(|note| note.memory_id.clone())
                    .collect();
                Ok((request, cited, core.config().clone()))
            }
            Err(err) => Err(err),
        }
    };
    let (request, cited, config) = match assembled {
        Ok(assembled) => assembled,
        Err(err) => return vec![ws_api_error(err, request_id)],
    };

    let outcome = state.oracle.cognize(&request, &config).await;

    let mut core = state.core.lock().await;
    match core.apply_cognition_effects(npc_id, player_id, &outcome, &cited, action) {
        Ok(report) => {
            broadcast_new_events(state, &core);
            let mood = core
                .world
                .agent(npc_id)
                .map(|agent| agent.mood.label.as_str().to_string());
            let mut body = action_response_body(npc_id, player_id, &report, mood.as_deref());
            if let Some(object) = body.as_object_mut() {
                object.insert("type".to_string(), json!("npc_response"));
            }
            vec![body]
        }
        Err(err) => vec![ws_api_error(err, request_id)],
    }
}

/// Voice over WS: ordered `voice_chunk` frames, each carrying at most 16 KiB
/// of audio before encoding, closed by `voice_complete`.
async fn ws_voice_generate(state: &AppState, message: &Value) -> Vec<Value> {
    let request_id = message.get("request_id");
    let (Some(npc_id), Some(text)) = (
        message.get("npc_id").and_then(Value::as_str),
        message.get("text").and_then(Value::as_str),
    ) else {
        return vec![ws_error("npc_id and text required", request_id)];
    };

    let prepared = {
        let mut core = state.core.lock().await;
        match core.agent_snapshot(npc_id) {
            Ok(snapshot) => Ok((
                snapshot
                    .profile
                    .voice_fingerprint
                    .unwrap_or_else(|| "alloy".to_string()),
                snapshot.mood,
                core.config().clone(),
            )),
            Err(err) => Err(err),
        }
    };
    let (voice, mood, config) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return vec![ws_api_error(err, request_id)],
    };

    match state.oracle.synthesize(&voice, text, &mood, &config).await {
        Ok(chunks) => {
            let total = chunks.len();
            let mut frames: Vec<Value> = chunks
                .iter()
                .enumerate()
                .map(|(index, chunk)| {
                    json!({
                        "type": "voice_chunk",
                        "npc_id": npc_id,
                        "chunk_index": index,
                        "chunk_count": total,
                        "audio_base64":
                            base64::engine::general_purpose::STANDARD.encode(chunk),
                    })
                })
                .collect();
            frames.push(json!({
                "type": "voice_complete",
                "npc_id": npc_id,
                "chunk_count": total,
            }));
            frames
        }
        Err(err) => vec![ws_error(err.to_string(), request_id)],
    }
}

async fn ws_transcribe(state: &AppState, message: &Value) -> Vec<Value> {
    let request_id = message.get("request_id");
    let Some(audio_base64) = message.get("audio_base64").and_then(Value::as_str) else {
        return vec![ws_error("audio_base64 required", request_id)];
    };
    let audio = match base64::engine::general_purpose::STANDARD.decode(audio_base64.as_bytes()) {
        Ok(audio) => audio,
        Err(err) => return vec![ws_error(format!("invalid base64: {err}"), request_id)],
    };
    let language = message.get("language").and_then(Value::as_str);

    let config = {
        let core = state.core.lock().await;
        core.config().clone()
    };
    match state.oracle.transcribe(audio, language, &config).await {
        Ok(text) => vec![json!({ "type": "transcription", "text": text })],
        Err(err) => vec![ws_error(err.to_string(), request_id)],
    }
}

async fn ws_conversation_message(state: &AppState, message: &Value) -> Vec<Value> {
    let request_id = message.get("request_id");
    let (Some(group_id), Some(text)) = (
        message.get("group_id").and_then(Value::as_str),
        message.get("message").and_then(Value::as_str),
    ) else {
        return vec![ws_error("group_id and message required", request_id)];
    };
    let target = message.get("target_npc").and_then(Value::as_str);

    let assembled = {
        let mut core = state.core.lock().await;
        let player_id = core
            .world
            .groups
            .get(group_id)
            .map(|group| group.player_id.clone());
        match (
            player_id,
            core.assemble_group_cognition(group_id, text, target),
        ) {
            (Some(player_id), Ok(request)) => Ok((request, player_id, core.config().clone())),
            (_, Err(err)) => Err(err),
            (None, _) => Err(ApiError::group_closed(group_id)),
        }
    };
    let (request, player_id, config) = match assembled {
        Ok(assembled) => assembled,
        Err(err) => return vec![ws_api_error(err, request_id)],
    };

    let turns = state.oracle.cognize_group(&request, &config).await;

    let mut core = state.core.lock().await;
    match core.apply_group_turns(group_id, turns, &player_id, text) {
        Ok((lines, tension)) => {
            broadcast_new_events(state, &core);
            vec![json!({
                "type": "conversation_responses",
                "group_id": group_id,
                "responses": lines,
                "tension": tension,
            })]
        }
        Err(err) => vec![ws_api_error(err, request_id)],
    }
}
