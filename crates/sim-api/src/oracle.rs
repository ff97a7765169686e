//! The Oracle fronts every external provider: cognition (LLM), speech
//! synthesis, and transcription. All provider I/O, timeouts, retries, and
//! fallback logic live here; the Brain never talks to a provider directly.

use std::fmt;
use std::time::Duration;

use contracts::agent::{Mood, MoodLabel, Personality, Vitals};
use contracts::frames::{
    CognitiveFrame, CognizeOutcome, ExtractedTopic, FallbackReason, GroupTurn, Intent, MoodShift,
    ResponseType,
};
use contracts::memory::MemoryCategory;
use contracts::SimConfig;
use serde_json::{json, Value};

use sim_core::rng::hash_str;
use sim_core::topics;

/// Audio chunks on the wire never exceed 16 KiB.
pub const AUDIO_CHUNK_BYTES: usize = 16 * 1024;

const RATE_LIMIT_RETRIES: u32 = 3;
const RATE_LIMIT_BASE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum OracleError {
    Timeout,
    Malformed(String),
    RateLimited,
    Provider(String),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "oracle call timed out"),
            Self::Malformed(detail) => write!(f, "oracle returned malformed output: {detail}"),
            Self::RateLimited => write!(f, "oracle rate limited"),
            Self::Provider(detail) => write!(f, "oracle provider error: {detail}"),
        }
    }
}

impl std::error::Error for OracleError {}

/// One memory the prompt cites; the Brain reinforces these afterwards.
#[derive(Debug, Clone)]
pub struct MemoryNote {
    pub memory_id: String,
    pub category: MemoryCategory,
    pub content: String,
    pub strength: f64,
    pub secondhand_from: Option<String>,
}

impl MemoryNote {
    fn clarity(&self) -> &'static str {
        if self.strength > 0.8 {
            "vividly"
        } else if self.strength > 0.5 {
            "clearly"
        } else {
            "vaguely"
        }
    }
}

/// Context assembled by the Brain for one cognition pass.
#[derive(Debug, Clone)]
pub struct CognizeRequest {
    pub agent_id: String,
    pub role: String,
    pub personality: Personality,
    pub vitals: Vitals,
    pub mood: Mood,
    pub memories: Vec<MemoryNote>,
    pub rumors: Vec<String>,
    pub faction_stance: Option<String>,
    pub goals: Vec<String>,
    pub player_id: String,
    pub utterance: String,
    /// Lines already spoken this group message, so later speakers react.
    pub prior_lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RankedParticipant {
    pub agent_id: String,
    pub role: String,
    pub mood: String,
    pub salience: f64,
    pub paranoia: f64,
    pub aggression: f64,
    pub empathy: f64,
}

/// Context for one group-orchestration pass.
#[derive(Debug, Clone)]
pub struct GroupCognizeRequest {
    pub group_id: String,
    pub location: String,
    pub tension: f64,
    pub ranking: Vec<RankedParticipant>,
    pub recent_history: Vec<String>,
    pub player_name: String,
    pub utterance: String,
    pub target: Option<String>,
}

/// Provider selection. The scripted variant is fully deterministic and keeps
/// the service usable without credentials; tests stub failure modes with it.
#[derive(Debug)]
pub enum OracleClient {
    Http(HttpOracle),
    Scripted(ScriptedOracle),
}

impl OracleClient {
    pub fn from_env() -> Self {
        match std::env::var("ORACLE_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Self::Http(HttpOracle::new(
                key,
                std::env::var("ORACLE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                std::env::var("ORACLE_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            )),
            _ => Self::Scripted(ScriptedOracle::heuristic()),
        }
    }

    /// One cognition pass. Never fails: timeouts, rate-limit exhaustion, and
    /// malformed output all degrade to a fallback frame derived from the
    /// agent's current mood, with zero trust delta.
    pub async fn cognize(&self, request: &CognizeRequest, config: &SimConfig) -> CognizeOutcome {
        let deadline = Duration::from_secs(config.cognize_timeout_secs);
        let raw = match self {
            Self::Http(oracle) => {
                tokio::time::timeout(deadline, oracle.chat(&build_cognize_prompt(request)))
                    .await
                    .map_err(|_| OracleError::Timeout)
                    .and_then(|inner| inner)
            }
            Self::Scripted(oracle) => oracle.cognize_raw(request),
        };

        match raw.and_then(|text| parse_cognitive_frame(&text, config)) {
            Ok(frame) => CognizeOutcome::Ok {
                frame: frame.sanitized(),
            },
            Err(err) => {
                let reason = match &err {
                    OracleError::Timeout => FallbackReason::Timeout,
                    OracleError::Malformed(_) => FallbackReason::Malformed,
                    _ => FallbackReason::Unavailable,
                };
                tracing::warn!(agent = %request.agent_id, error = %err, "cognition fell back");
                CognizeOutcome::Fallback {
                    reason,
                    frame: fallback_frame(&request.mood),
                }
            }
        }
    }

    /// Group turn selection. Falls back to the salience leader giving a
    /// direct reply, so a conversation never stalls on provider trouble.
    pub async fn cognize_group(
        &self,
        request: &GroupCognizeRequest,
        config: &SimConfig,
    ) -> Vec<GroupTurn> {
        let deadline = Duration::from_secs(config.cognize_timeout_secs);
        let raw = match self {
            Self::Http(oracle) => {
                tokio::time::timeout(deadline, oracle.chat(&build_group_prompt(request)))
                    .await
                    .map_err(|_| OracleError::Timeout)
                    .and_then(|inner| inner)
            }
            Self::Scripted(oracle) => oracle.cognize_group_raw(request),
        };

        match raw.and_then(|text| parse_group_turns(&text)) {
            Ok(turns) if !turns.is_empty() => turns,
            Ok(_) | Err(_) => fallback_group_turns(request),
        }
    }

    /// Text-to-speech. Errors surface to the caller (voice is not an
    /// interactive-conversation path).
    pub async fn synthesize(
        &self,
        voice: &str,
        text: &str,
        mood: &Mood,
        config: &SimConfig,
    ) -> Result<Vec<Vec<u8>>, OracleError> {
        let deadline = Duration::from_secs(config.synthesize_timeout_secs);
        let audio = match self {
            Self::Http(oracle) => tokio::time::timeout(deadline, oracle.speech(voice, text))
                .await
                .map_err(|_| OracleError::Timeout)??,
            Self::Scripted(oracle) => oracle.synthesize_raw(voice, text, mood)?,
        };
        Ok(chunk_audio(audio))
    }

    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        language: Option<&str>,
        config: &SimConfig,
    ) -> Result<String, OracleError> {
        let deadline = Duration::from_secs(config.transcribe_timeout_secs);
        match self {
            Self::Http(oracle) => tokio::time::timeout(deadline, oracle.transcription(audio, language))
                .await
                .map_err(|_| OracleError::Timeout)?,
            Self::Scripted(oracle) => oracle.transcribe_raw(&audio),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP provider (OpenAI-compatible endpoints)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HttpOracle {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpOracle {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    /// Chat completion with exponential backoff on HTTP 429.
    async fn chat(&self, prompt: &(String, String)) -> Result<String, OracleError> {
        let (system, user) = prompt;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0.7,
            "response_format": { "type": "json_object" },
        });

        let mut delay = RATE_LIMIT_BASE;
        for attempt in 0..=RATE_LIMIT_RETRIES {
            let response = self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
                .map_err(|err| OracleError::Provider(err.to_string()))?;

            if response.status().as_u16() == 429 {
                if attempt == RATE_LIMIT_RETRIES {
                    return Err(OracleError::RateLimited);
                }
                tracing::warn!(attempt, "provider rate limited, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                continue;
            }
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(OracleError::Provider(format!("{status}: {text}")));
            }

            let payload: Value = response
                .json()
                .await
                .map_err(|err| OracleError::Malformed(err.to_string()))?;
            return payload["choices"][0]["message"]["content"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| OracleError::Malformed("missing message content".to_string()));
        }
        Err(OracleError::RateLimited)
    }

    async fn speech(&self, voice: &str, text: &str) -> Result<Vec<u8>, OracleError> {
        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": "tts-1",
                "voice": voice,
                "input": text,
            }))
            .send()
            .await
            .map_err(|err| OracleError::Provider(err.to_string()))?;
        if response.status().as_u16() == 429 {
            return Err(OracleError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(OracleError::Provider(response.status().to_string()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| OracleError::Provider(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn transcription(
        &self,
        audio: Vec<u8>,
        language: Option<&str>,
    ) -> Result<String, OracleError> {
        let mut form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio).file_name("audio.wav"),
            );
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|err| OracleError::Provider(err.to_string()))?;
        if response.status().as_u16() == 429 {
            return Err(OracleError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(OracleError::Provider(response.status().to_string()));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| OracleError::Malformed(err.to_string()))?;
        payload["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| OracleError::Malformed("missing transcription text".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// Deterministic provider behavior for keyless runs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedMode {
    /// Produce plausible frames from keyword heuristics.
    Heuristic,
    /// Simulate a provider that times out on every call.
    AlwaysTimeout,
    /// Simulate a provider that returns unparseable output.
    AlwaysMalformed,
}

#[derive(Debug)]
pub struct ScriptedOracle {
    mode: ScriptedMode,
}

impl ScriptedOracle {
    pub fn heuristic() -> Self {
        Self {
            mode: ScriptedMode::Heuristic,
        }
    }

    pub fn with_mode(mode: ScriptedMode) -> Self {
        Self { mode }
    }

    fn cognize_raw(&self, request: &CognizeRequest) -> Result<String, OracleError> {
        match self.mode {
            ScriptedMode::AlwaysTimeout => return Err(OracleError::Timeout),
            ScriptedMode::AlwaysMalformed => return Ok("no json here".to_string()),
            ScriptedMode::Heuristic => {}
        }

        let lowered = request.utterance.to_lowercase();
        let threat = ["raider", "attack", "weapon", "kill", "bandit", "danger"]
            .iter()
            .any(|word| lowered.contains(word));
        let friendly = ["hello", "hi", "please", "thank", "friend", "greet"]
            .iter()
            .any(|word| lowered.contains(word));
        let trade = ["trade", "buy", "sell", "price", "goods"]
            .iter()
            .any(|word| lowered.contains(word));

        let intent = if threat {
            Intent::Guard
        } else if trade {
            Intent::Trade
        } else if friendly {
            Intent::Socialize
        } else if request.personality.paranoia > 0.65 {
            Intent::Investigate
        } else {
            Intent::Socialize
        };
        let trust_delta = if threat {
            -0.05
        } else if friendly {
            0.05
        } else {
            0.01
        };
        let urgency = if threat { 0.9 } else { 0.3 };
        let remembered = request
            .memories
            .first()
            .map(|note| format!(" I {} remember what they told me.", note.clarity()))
            .unwrap_or_default();
        let dialogue = if threat {
            format!("Keep your distance. The {} has seen worse than you.", request.role)
        } else if trade {
            "Goods for coin, fair and square. What are you after?".to_string()
        } else {
            "Well met, stranger. Quiet day on the frontier.".to_string()
        };

        let topics = topics::extract_topics(&request.utterance, 3);
        let payload = json!({
            "internal_reflection": format!(
                "{} sizes up the stranger.{remembered}", request.agent_id
            ),
            "intent": intent.as_str(),
            "dialogue": dialogue,
            "urgency": urgency,
            "trust_mod": trust_delta,
            "mood_shift": {
                "arousal_delta": if threat { 0.2 } else { -0.05 },
                "valence_delta": if friendly { 0.1 } else if threat { -0.1 } else { 0.0 },
            },
            "emotional_weight": topics
                .iter()
                .map(|topic| topic.emotional_weight)
                .fold(0.3_f64, f64::max),
            "extracted_topics": topics
                .iter()
                .map(|topic| json!({
                    "category": topic.category.as_str(),
                    "content": topic.content,
                    "emotional_weight": topic.emotional_weight,
                }))
                .collect::<Vec<_>>(),
        });
        Ok(payload.to_string())
    }

    fn cognize_group_raw(&self, request: &GroupCognizeRequest) -> Result<String, OracleError> {
        match self.mode {
            ScriptedMode::AlwaysTimeout => return Err(OracleError::Timeout),
            ScriptedMode::AlwaysMalformed => return Ok("not json".to_string()),
            ScriptedMode::Heuristic => {}
        }

        let lowered = request.utterance.to_lowercase();
        let threat = ["raider", "attack", "danger", "bandit"]
            .iter()
            .any(|word| lowered.contains(word));

        let lead = request.target_or_leader();
        let lead_id = lead.map(|candidate| candidate.agent_id.clone());
        let mut speakers = Vec::new();
        if let Some(lead) = lead {
            speakers.push(json!({
                "npc_id": lead.agent_id,
                "response_type": "direct_reply",
                "target_id": "player",
                "dialogue": if threat {
                    format!("Raiders, you say? The {} takes the east road seriously.", lead.role)
                } else {
                    format!("The {} hears you out.", lead.role)
                },
            }));
        }
        let second = request
            .ranking
            .iter()
            .find(|candidate| Some(&candidate.agent_id) != lead_id.as_ref());
        if let Some(second) = second {
            let response_type = if threat && second.aggression > 0.5 {
                "disagreement"
            } else if second.empathy > 0.6 {
                "agreement"
            } else {
                "elaboration"
            };
            speakers.push(json!({
                "npc_id": second.agent_id,
                "response_type": response_type,
                "target_id": lead_id,
                "dialogue": match response_type {
                    "disagreement" => "That's not how I heard it.",
                    "agreement" => "They're right, listen to them.",
                    _ => "There's more to it than that.",
                },
            }));
        }

        Ok(json!({ "next_speakers": speakers }).to_string())
    }

    fn synthesize_raw(
        &self,
        voice: &str,
        text: &str,
        _mood: &Mood,
    ) -> Result<Vec<u8>, OracleError> {
        if self.mode == ScriptedMode::AlwaysTimeout {
            return Err(OracleError::Timeout);
        }
        // Deterministic placeholder waveform: enough bytes to exercise
        // chunking without a real TTS provider.
        let seed = hash_str(voice) ^ hash_str(text);
        let length = (text.len() * 256).max(1024);
        let mut audio = Vec::with_capacity(length);
        let mut state = seed;
        for _ in 0..length {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            audio.push((state >> 33) as u8);
        }
        Ok(audio)
    }

    fn transcribe_raw(&self, audio: &[u8]) -> Result<String, OracleError> {
        if self.mode == ScriptedMode::AlwaysTimeout {
            return Err(OracleError::Timeout);
        }
        Ok(format!("[heard {} bytes of speech]", audio.len()))
    }
}

impl GroupCognizeRequest {
    fn target_or_leader(&self) -> Option<&RankedParticipant> {
        self.target
            .as_deref()
            .and_then(|target| {
                self.ranking
                    .iter()
                    .find(|candidate| candidate.agent_id == target)
            })
            .or_else(|| self.ranking.first())
    }
}

// ---------------------------------------------------------------------------
// Prompt assembly and parsing
// ---------------------------------------------------------------------------

fn build_cognize_prompt(request: &CognizeRequest) -> (String, String) {
    let system = format!(
        "You are {agent}, an NPC ({role}) on a dangerous frontier. Resources \
         are scarce, trust is rare.\n\
         PERSONALITY (0-1): curiosity {curiosity:.2}, empathy {empathy:.2}, \
         aggression {aggression:.2}, paranoia {paranoia:.2}, discipline \
         {discipline:.2}, romanticism {romanticism:.2}, opportunism \
         {opportunism:.2}, loyalty {loyalty:.2}.\n\
         Respond with STRICT JSON only: {{\"internal_reflection\": string, \
         \"intent\": one of investigate|guard|trade|assist|flee|attack|socialize|ignore, \
         \"dialogue\": string, \"urgency\": 0.0-1.0, \"trust_mod\": -0.2..0.2, \
         \"mood_shift\": {{\"arousal_delta\": -1..1, \"valence_delta\": -1..1}}, \
         \"emotional_weight\": 0.0-1.0, \
         \"extracted_topics\": [{{\"category\": string, \"content\": string}}]}}",
        agent = request.agent_id,
        role = request.role,
        curiosity = request.personality.curiosity,
        empathy = request.personality.empathy,
        aggression = request.personality.aggression,
        paranoia = request.personality.paranoia,
        discipline = request.personality.discipline,
        romanticism = request.personality.romanticism,
        opportunism = request.personality.opportunism,
        loyalty = request.personality.loyalty,
    );

    let mut user = String::new();
    user.push_str(&format!(
        "YOUR STATE:\n- Vitals: hunger {:.1}, fatigue {:.1}\n- Mood: {} (arousal {:.1}, valence {:.1})\n",
        request.vitals.hunger,
        request.vitals.fatigue,
        request.mood.label.as_str(),
        request.mood.arousal,
        request.mood.valence,
    ));
    if let Some(stance) = &request.faction_stance {
        user.push_str(&format!("- Faction stance: {stance}\n"));
    }
    if !request.goals.is_empty() {
        user.push_str(&format!("- Goals: {}\n", request.goals.join("; ")));
    }

    user.push_str("\nYOU REMEMBER ABOUT THIS PLAYER:\n");
    if request.memories.is_empty() {
        user.push_str("- nothing yet\n");
    }
    for note in &request.memories {
        match &note.secondhand_from {
            Some(teller) => user.push_str(&format!(
                "- [{}] {} told you: \"{}\"\n",
                note.category.as_str(),
                teller,
                note.content
            )),
            None => user.push_str(&format!(
                "- [{}] you {} remember: \"{}\"\n",
                note.category.as_str(),
                note.clarity(),
                note.content
            )),
        }
    }
    if !request.rumors.is_empty() {
        user.push_str("\nRUMORS YOU HAVE HEARD ABOUT THEM:\n");
        for rumor in &request.rumors {
            user.push_str(&format!("- {rumor}\n"));
        }
    }
    if !request.prior_lines.is_empty() {
        user.push_str("\nSAID MOMENTS AGO IN THIS CONVERSATION:\n");
        for line in &request.prior_lines {
            user.push_str(&format!("- {line}\n"));
        }
    }
    user.push_str(&format!(
        "\nPLAYER {} SAYS: \"{}\"\n\nRespond with your cognitive frame as JSON.",
        request.player_id, request.utterance
    ));

    (system, user)
}

fn build_group_prompt(request: &GroupCognizeRequest) -> (String, String) {
    let system = "You orchestrate a group conversation between NPCs on a \
                  frontier. Decide which NPCs speak next and how. Respond \
                  with STRICT JSON only: {\"next_speakers\": [{\"npc_id\": \
                  string, \"response_type\": direct_reply|agreement|\
                  disagreement|elaboration|interruption|redirect|silent, \
                  \"target_id\": string or null, \"dialogue\": string}]}. \
                  Each NPC may appear at most once, ordered by who speaks \
                  first."
        .to_string();

    let ranking = request
        .ranking
        .iter()
        .map(|candidate| {
            format!(
                "- {} ({}), mood {}, salience {:.2}, paranoia {:.2}, aggression {:.2}, empathy {:.2}",
                candidate.agent_id,
                candidate.role,
                candidate.mood,
                candidate.salience,
                candidate.paranoia,
                candidate.aggression,
                candidate.empathy,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let history = if request.recent_history.is_empty() {
        "- (conversation just started)".to_string()
    } else {
        request
            .recent_history
            .iter()
            .map(|line| format!("- {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user = format!(
        "LOCATION: {}\nTENSION: {:.2}\n\nPARTICIPANTS (ranked by salience):\n{}\n\n\
         RECENT HISTORY:\n{}\n\nPLAYER {} SAYS{}: \"{}\"\n\nChoose 1-3 speakers.",
        request.location,
        request.tension,
        ranking,
        history,
        request.player_name,
        request
            .target
            .as_deref()
            .map(|target| format!(" (to {target})"))
            .unwrap_or_default(),
        request.utterance,
    );

    (system, user)
}

/// Pull the first JSON object out of a provider reply, tolerating markdown
/// fences and prose around it.
fn extract_json(raw: &str) -> Result<Value, OracleError> {
    let trimmed = raw.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => return Err(OracleError::Malformed("no JSON object found".to_string())),
    };
    serde_json::from_str(candidate).map_err(|err| OracleError::Malformed(err.to_string()))
}

fn parse_cognitive_frame(raw: &str, config: &SimConfig) -> Result<CognitiveFrame, OracleError> {
    let value = extract_json(raw)?;

    let intent_text = value["intent"]
        .as_str()
        .ok_or_else(|| OracleError::Malformed("missing intent".to_string()))?;
    let intent = Intent::parse(intent_text)
        .ok_or_else(|| OracleError::Malformed(format!("unknown intent {intent_text}")))?;

    let dialogue = value["dialogue"].as_str().unwrap_or("").to_string();
    let reflection = value["internal_reflection"]
        .as_str()
        .or_else(|| value["reflection"].as_str())
        .unwrap_or("")
        .to_string();
    let urgency = value["urgency"].as_f64().unwrap_or(0.5);
    let trust_delta = value["trust_mod"]
        .as_f64()
        .or_else(|| value["trust_delta"].as_f64())
        .unwrap_or(0.0);
    let mood_shift = MoodShift {
        arousal_delta: value["mood_shift"]["arousal_delta"].as_f64().unwrap_or(0.0),
        valence_delta: value["mood_shift"]["valence_delta"].as_f64().unwrap_or(0.0),
    };
    let emotional_weight = value["emotional_weight"].as_f64().unwrap_or(0.5);

    let mut extracted_topics = Vec::new();
    if let Some(entries) = value["extracted_topics"].as_array() {
        for entry in entries.iter().take(config.topic_limit_per_utterance) {
            let Some(category) = entry["category"]
                .as_str()
                .and_then(MemoryCategory::parse)
            else {
                continue;
            };
            let Some(content) = entry["content"].as_str() else {
                continue;
            };
            extracted_topics.push(ExtractedTopic {
                category,
                content: content.to_string(),
                emotional_weight: entry["emotional_weight"]
                    .as_f64()
                    .unwrap_or(emotional_weight),
                keywords: Vec::new(),
            });
        }
    }

    Ok(CognitiveFrame {
        reflection,
        dialogue,
        intent,
        mood_shift,
        urgency,
        trust_delta,
        emotional_weight,
        extracted_topics,
    })
}

fn parse_group_turns(raw: &str) -> Result<Vec<GroupTurn>, OracleError> {
    let value = extract_json(raw)?;
    let speakers = value["next_speakers"]
        .as_array()
        .ok_or_else(|| OracleError::Malformed("missing next_speakers".to_string()))?;

    let mut turns = Vec::new();
    for speaker in speakers {
        let Some(agent_id) = speaker["npc_id"].as_str() else {
            continue;
        };
        let Some(response_type) = speaker["response_type"]
            .as_str()
            .and_then(ResponseType::parse)
        else {
            continue;
        };
        turns.push(GroupTurn {
            speaker: agent_id.to_string(),
            response_type,
            addressed_to: speaker["target_id"].as_str().map(str::to_string),
            dialogue: speaker["dialogue"].as_str().unwrap_or("...").to_string(),
        });
    }
    Ok(turns)
}

/// The frame an interactive request falls back to: mood-appropriate guarded
/// silence, no trust movement.
pub fn fallback_frame(mood: &Mood) -> CognitiveFrame {
    let intent = match mood.label {
        MoodLabel::Fearful => Intent::Flee,
        MoodLabel::Aggressive => Intent::Guard,
        MoodLabel::Happy => Intent::Socialize,
        _ => Intent::Guard,
    };
    CognitiveFrame {
        reflection: "Something is off; better to stay guarded.".to_string(),
        dialogue: "...".to_string(),
        intent,
        mood_shift: MoodShift::default(),
        urgency: 0.5,
        trust_delta: 0.0,
        emotional_weight: 0.0,
        extracted_topics: Vec::new(),
    }
    .sanitized()
}

fn fallback_group_turns(request: &GroupCognizeRequest) -> Vec<GroupTurn> {
    request
        .target_or_leader()
        .map(|leader| {
            vec![GroupTurn {
                speaker: leader.agent_id.clone(),
                response_type: ResponseType::DirectReply,
                addressed_to: Some("player".to_string()),
                dialogue: "...".to_string(),
            }]
        })
        .unwrap_or_default()
}

fn chunk_audio(audio: Vec<u8>) -> Vec<Vec<u8>> {
    audio
        .chunks(AUDIO_CHUNK_BYTES)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(utterance: &str) -> CognizeRequest {
        CognizeRequest {
            agent_id: "vera".to_string(),
            role: "gate guard".to_string(),
            personality: Personality::default(),
            vitals: Vitals::default(),
            mood: Mood::default(),
            memories: Vec::new(),
            rumors: Vec::new(),
            faction_stance: None,
            goals: Vec::new(),
            player_id: "p1".to_string(),
            utterance: utterance.to_string(),
            prior_lines: Vec::new(),
        }
    }

    fn config() -> SimConfig {
        SimConfig::default()
    }

    #[tokio::test]
    async fn heuristic_cognize_produces_valid_frames() {
        let oracle = OracleClient::Scripted(ScriptedOracle::heuristic());
        let outcome = oracle.cognize(&request("hello there"), &config()).await;
        assert!(!outcome.is_fallback());
        let frame = outcome.frame();
        assert!(!frame.dialogue.is_empty());
        assert!(frame.trust_delta.abs() <= 0.2);
        assert!((0.0..=1.0).contains(&frame.urgency));
    }

    #[tokio::test]
    async fn timeout_mode_falls_back_with_zero_trust() {
        let oracle =
            OracleClient::Scripted(ScriptedOracle::with_mode(ScriptedMode::AlwaysTimeout));
        let outcome = oracle.cognize(&request("hello"), &config()).await;
        assert!(outcome.is_fallback());
        let frame = outcome.frame();
        assert_eq!(frame.dialogue, "...");
        assert_eq!(frame.trust_delta, 0.0);
    }

    #[tokio::test]
    async fn malformed_mode_falls_back_too() {
        let oracle =
            OracleClient::Scripted(ScriptedOracle::with_mode(ScriptedMode::AlwaysMalformed));
        let outcome = oracle.cognize(&request("hello"), &config()).await;
        match outcome {
            CognizeOutcome::Fallback { reason, .. } => {
                assert_eq!(reason, FallbackReason::Malformed)
            }
            CognizeOutcome::Ok { .. } => panic!("expected fallback"),
        }
    }

    #[test]
    fn parse_tolerates_fenced_json() {
        let raw = "```json\n{\"intent\": \"guard\", \"dialogue\": \"halt\", \
                   \"urgency\": 0.4}\n```";
        let frame = parse_cognitive_frame(raw, &config()).expect("parses");
        assert_eq!(frame.intent, Intent::Guard);
        assert_eq!(frame.dialogue, "halt");
    }

    #[test]
    fn parse_rejects_unknown_intents() {
        let raw = r#"{"intent": "moonwalk", "dialogue": "hi"}"#;
        assert!(parse_cognitive_frame(raw, &config()).is_err());
    }

    #[tokio::test]
    async fn synthesize_chunks_stay_under_the_wire_limit() {
        let oracle = OracleClient::Scripted(ScriptedOracle::heuristic());
        let long_text = "a".repeat(200);
        let chunks = oracle
            .synthesize("voice_a", &long_text, &Mood::default(), &config())
            .await
            .expect("synthesizes");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|chunk| chunk.len() <= AUDIO_CHUNK_BYTES));
    }

    #[tokio::test]
    async fn group_turns_use_known_speakers() {
        let oracle = OracleClient::Scripted(ScriptedOracle::heuristic());
        let request = GroupCognizeRequest {
            group_id: "conv_0001".to_string(),
            location: "gates".to_string(),
            tension: 0.0,
            ranking: vec![
                RankedParticipant {
                    agent_id: "marcus".to_string(),
                    role: "merchant".to_string(),
                    mood: "calm".to_string(),
                    salience: 0.9,
                    paranoia: 0.4,
                    aggression: 0.7,
                    empathy: 0.3,
                },
                RankedParticipant {
                    agent_id: "vera".to_string(),
                    role: "guard".to_string(),
                    mood: "calm".to_string(),
                    salience: 0.7,
                    paranoia: 0.6,
                    aggression: 0.6,
                    empathy: 0.4,
                },
            ],
            recent_history: Vec::new(),
            player_name: "Traveler".to_string(),
            utterance: "there are raiders to the east".to_string(),
            target: None,
        };
        let turns = oracle.cognize_group(&request, &config()).await;
        assert!(!turns.is_empty() && turns.len() <= 2);
        assert_eq!(turns[0].response_type, ResponseType::DirectReply);
    }
}
