#[derive(Debug, Deserialize)]
struct VoiceRequest {
    text: String,
}

/// Synthesize speech for an agent. Audio comes back as ordered base64
/// chunks, each at most 16 KiB of raw audio.
async fn voice_generate(
    Path(npc_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<VoiceRequest>,
) -> Result<Json<Value>, HttpApiError> {
    if request.text.trim().is_empty() {
        return Err(HttpApiError::invalid("text must not be empty"));
    }

    let (voice, mood, config) = {
        let mut core = state.core.lock().await;
        let snapshot = core.agent_snapshot(&npc_id)?;
        (
            snapshot
                .profile
                .voice_fingerprint
                .unwrap_or_else(|| "alloy".to_string()),
            snapshot.mood,
            core.config().clone(),
        )
    };

    let chunks = state
        .oracle
        .synthesize(&voice, &request.text, &mood, &config)
        .await
        .map_err(oracle_error_to_api)?;

    let encoded: Vec<String> = chunks
        .iter()
        .map(|chunk| base64::engine::general_purpose::STANDARD.encode(chunk))
        .collect();
    Ok(Json(json!({
        "npc_id": npc_id,
        "voice": voice,
        "chunk_count": encoded.len(),
        "encoding": "base64",
        "chunks": encoded,
    })))
}

#[derive(Debug, Deserialize)]
struct TranscribeRequest {
    audio_base64: String,
    language: Option<String>,
}

async fn speech_transcribe(
    State(state): State<AppState>,
    Json(request): Json<TranscribeRequest>,
) -> Result<Json<Value>, HttpApiError> {
    let audio = base64::engine::general_purpose::STANDARD
        .decode(request.audio_base64.as_bytes())
        .map_err(|err| HttpApiError::invalid(format!("audio_base64 is not valid base64: {err}")))?;
    if audio.is_empty() {
        return Err(HttpApiError::invalid("audio payload is empty"));
    }

    let config = {
        let core = state.core.lock().await;
        core.config().clone()
    };
    let text = state
        .oracle
        .transcribe(audio, request.language.as_deref(), &config)
        .await
        .map_err(oracle_error_to_api)?;
    Ok(Json(json!({ "text": text })))
}

fn oracle_error_to_api(err: crate::oracle::OracleError) -> HttpApiError {
    let kind = match err {
        crate::oracle::OracleError::Timeout => ErrorKind::OracleTimeout,
        crate::oracle::OracleError::Malformed(_) => ErrorKind::OracleMalformed,
        crate::oracle::OracleError::RateLimited => ErrorKind::RateLimited,
        crate::oracle::OracleError::Provider(_) => ErrorKind::OracleTimeout,
    };
    let status = match kind {
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::BAD_GATEWAY,
    };
    HttpApiError {
        status,
        error: ApiError::new(kind, err.to_string()),
    }
}
