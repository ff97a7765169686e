fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET,POST,OPTIONS,PUT,PATCH,DELETE"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("3600"),
    );
}

fn clamp_page_size(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}

#[derive(Debug, Deserialize)]
struct PositionBody {
    x: f64,
    y: f64,
    z: Option<f64>,
    zone: Option<String>,
}

impl PositionBody {
    fn into_position(self) -> Position {
        Position {
            x: self.x,
            y: self.y,
            z: self.z.unwrap_or(0.0),
            zone: self.zone.unwrap_or_else(|| "default".to_string()),
        }
    }
}

/// Build the response body for one interaction, shared by HTTP and WS.
fn action_response_body(
    npc_id: &str,
    player_id: &str,
    report: &crate::brain::ActionReport,
    mood: Option<&str>,
) -> Value {
    json!({
        "npc_id": npc_id,
        "player_id": player_id,
        "dialogue": report.frame.dialogue,
        "intent": report.frame.intent.as_str(),
        "internal_reflection": report.frame.reflection,
        "urgency": report.frame.urgency,
        "trust_delta": report.frame.trust_delta,
        "fallback": report.fallback,
        "reputation": report.reputation,
        "faction_reputation": report
            .faction_reputation
            .as_ref()
            .map(|(faction, value)| json!({ "faction": faction, "value": value })),
        "mood": mood,
        "memories_referenced": report.cited_memories.len(),
    })
}
