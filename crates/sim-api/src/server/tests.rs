use super::*;

use base64::Engine as _;

use crate::oracle::{ScriptedMode, ScriptedOracle};

fn test_state_with(oracle: OracleClient) -> AppState {
    let core = ServiceCore::new(
        SimConfig::default(),
        Some(SqliteStore::open_in_memory().expect("store opens")),
    );
    AppState::new(core, oracle)
}

fn test_state() -> AppState {
    test_state_with(OracleClient::Scripted(ScriptedOracle::heuristic()))
}

async fn init(state: &AppState, npc_id: &str, role: &str) {
    init_npc(
        State(state.clone()),
        Json(InitNpcRequest {
            npc_id: npc_id.to_string(),
            role: role.to_string(),
            faction: Some("guards".to_string()),
            voice_fingerprint: None,
            personality: None,
        }),
    )
    .await
    .expect("init succeeds");
}

#[tokio::test]
async fn init_and_greet_leaves_a_strong_memory() {
    let state = test_state();
    init(&state, "vera", "gate guard").await;

    let Json(body) = npc_action(
        State(state.clone()),
        Json(ActionRequest {
            npc_id: "vera".to_string(),
            player_id: "p1".to_string(),
            player_name: None,
            action: "hello, I am looking for work".to_string(),
        }),
    )
    .await
    .expect("action succeeds");

    assert!(!body["dialogue"].as_str().expect("dialogue").is_empty());
    let intent = body["intent"].as_str().expect("intent");
    assert!(contracts::frames::Intent::parse(intent).is_some());

    let Json(memories) = npc_memories(
        Path(("vera".to_string(), "p1".to_string())),
        State(state.clone()),
    )
    .await
    .expect("memories");
    let records = memories["memories"].as_array().expect("array");
    assert!(!records.is_empty());
    assert!(records
        .iter()
        .any(|memory| memory["strength"].as_f64().expect("strength") >= 0.9));
}

#[tokio::test]
async fn action_on_unknown_agent_is_404() {
    let state = test_state();
    let err = npc_action(
        State(state.clone()),
        Json(ActionRequest {
            npc_id: "nobody".to_string(),
            player_id: "p1".to_string(),
            player_name: None,
            action: "hello".to_string(),
        }),
    )
    .await
    .expect_err("unknown agent");
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oracle_outage_still_returns_a_frame() {
    let state = test_state_with(OracleClient::Scripted(ScriptedOracle::with_mode(
        ScriptedMode::AlwaysTimeout,
    )));
    init(&state, "vera", "gate guard").await;

    let Json(body) = npc_action(
        State(state.clone()),
        Json(ActionRequest {
            npc_id: "vera".to_string(),
            player_id: "p1".to_string(),
            player_name: None,
            action: "hello".to_string(),
        }),
    )
    .await
    .expect("still succeeds");

    assert_eq!(body["dialogue"].as_str(), Some("..."));
    assert_eq!(body["trust_delta"].as_f64(), Some(0.0));
    assert_eq!(body["reputation"].as_f64(), Some(0.0));
    assert_eq!(body["fallback"].as_bool(), Some(true));
}

#[tokio::test]
async fn repeated_decay_is_strictly_decreasing_and_weight_sensitive() {
    let state = test_state();
    init(&state, "vera", "gate guard").await;

    // One light and one heavy memory from a single utterance.
    npc_action(
        State(state.clone()),
        Json(ActionRequest {
            npc_id: "vera".to_string(),
            player_id: "p1".to_string(),
            player_name: None,
            action: "I like quiet roads, but I am afraid of what waits in the dark".to_string(),
        }),
    )
    .await
    .expect("action succeeds");

    let strengths = |body: &Value| -> Vec<(String, f64)> {
        body["memories"]
            .as_array()
            .expect("array")
            .iter()
            .map(|memory| {
                (
                    memory["category"].as_str().expect("category").to_string(),
                    memory["strength"].as_f64().expect("strength"),
                )
            })
            .collect()
    };

    let mut previous: Option<Vec<(String, f64)>> = None;
    for _ in 0..4 {
        memory_decay(
            State(state.clone()),
            Query(DecayQuery { hours: Some(24.0) }),
        )
        .await
        .expect("decay succeeds");

        let Json(body) = npc_memories(
            Path(("vera".to_string(), "p1".to_string())),
            State(state.clone()),
        )
        .await
        .expect("memories");
        let current = strengths(&body);
        if let Some(previous) = &previous {
            for ((_, before), (_, after)) in previous.iter().zip(current.iter()) {
                assert!(after < before, "decay must strictly decrease strength");
            }
        }
        previous = Some(current);
    }

    let last = previous.expect("measured");
    let light = last
        .iter()
        .find(|(category, _)| category == "preference")
        .map(|(_, strength)| *strength);
    let heavy = last
        .iter()
        .find(|(category, _)| category == "fear")
        .map(|(_, strength)| *strength);
    if let (Some(light), Some(heavy)) = (light, heavy) {
        assert!(light < 0.5, "low-weight memory fades: {light}");
        assert!(heavy > 0.7, "high-weight memory persists: {heavy}");
    }
}

#[tokio::test]
async fn group_message_returns_ordered_unique_speakers() {
    let state = test_state();
    init(&state, "marcus", "merchant").await;
    init(&state, "vera", "gate guard").await;

    let Json(started) = conversation_start(
        State(state.clone()),
        Json(ConversationStartRequest {
            player_id: "p1".to_string(),
            player_name: "Traveler".to_string(),
            npc_ids: Some(vec!["marcus".to_string(), "vera".to_string()]),
            location: Some("gates".to_string()),
        }),
    )
    .await
    .expect("group starts");
    let group_id = started["group_id"].as_str().expect("group id").to_string();

    let Json(body) = conversation_message(
        State(state.clone()),
        Json(ConversationMessageRequest {
            group_id: group_id.clone(),
            message: "there are raiders to the east".to_string(),
            target_npc: None,
        }),
    )
    .await
    .expect("message succeeds");

    let responses = body["responses"].as_array().expect("responses");
    assert!(!responses.is_empty() && responses.len() <= 2);
    let mut speakers: Vec<&str> = responses
        .iter()
        .map(|line| line["speaker"].as_str().expect("speaker"))
        .collect();
    let total = speakers.len();
    speakers.sort_unstable();
    speakers.dedup();
    assert_eq!(speakers.len(), total, "each speaker appears at most once");

    let any_disagreement = responses
        .iter()
        .any(|line| line["response_type"].as_str() == Some("disagreement"));
    if any_disagreement {
        assert!(body["tension"].as_f64().expect("tension") > 0.0);
    }

    // The group is shared state: ending it over the same core works.
    conversation_end(
        State(state.clone()),
        Json(ConversationEndRequest {
            group_id: group_id.clone(),
        }),
    )
    .await
    .expect("ends");
    let err = conversation_message(
        State(state.clone()),
        Json(ConversationMessageRequest {
            group_id,
            message: "anyone?".to_string(),
            target_npc: None,
        }),
    )
    .await
    .expect_err("closed group");
    assert_eq!(err.status, StatusCode::GONE);
}

#[tokio::test]
async fn stopping_the_world_appends_no_further_tick_events() {
    let state = test_state();
    init(&state, "vera", "gate guard").await;

    world_tick(State(state.clone())).await.expect("tick");
    world_stop(State(state.clone())).await.expect("stop");

    let Json(before) = world_events(
        State(state.clone()),
        Query(EventsQuery { limit: Some(1000) }),
    )
    .await
    .expect("events");
    let count_before = before["events"].as_array().expect("events").len();

    // No autorun is running; waiting must not generate tick events.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let Json(after) = world_events(
        State(state.clone()),
        Query(EventsQuery { limit: Some(1000) }),
    )
    .await
    .expect("events");
    let tick_events_after: usize = after["events"]
        .as_array()
        .expect("events")
        .iter()
        .filter(|event| event["kind"].as_str() == Some("tick_completed"))
        .count();
    let tick_events_before: usize = before["events"]
        .as_array()
        .expect("events")
        .iter()
        .filter(|event| event["kind"].as_str() == Some("tick_completed"))
        .count();
    assert_eq!(tick_events_before, tick_events_after);
    assert_eq!(
        count_before,
        after["events"].as_array().expect("events").len()
    );
}

#[tokio::test]
async fn voice_chunks_are_bounded_and_ordered() {
    let state = test_state();
    init(&state, "vera", "gate guard").await;

    let Json(body) = voice_generate(
        Path("vera".to_string()),
        State(state.clone()),
        Json(VoiceRequest {
            text: "halt, who goes there? state your business at the gates".to_string(),
        }),
    )
    .await
    .expect("voice");

    let chunks = body["chunks"].as_array().expect("chunks");
    assert_eq!(chunks.len() as u64, body["chunk_count"].as_u64().expect("count"));
    for chunk in chunks {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(chunk.as_str().expect("chunk"))
            .expect("valid base64");
        assert!(decoded.len() <= crate::oracle::AUDIO_CHUNK_BYTES);
    }
}

#[test]
fn page_size_is_clamped() {
    assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
    assert_eq!(clamp_page_size(Some(0)), 1);
    assert_eq!(clamp_page_size(Some(10_000)), MAX_PAGE_SIZE);
}
