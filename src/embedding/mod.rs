// src/embedding/mod.rs
// Embedding Service (C2): text/media -> vector with keyed rotation and
// cooldown, plus the dual-query generator the retrieval pipeline (C4) relies
// on. Grounded on memory::features::embedding::EmbeddingManager's batching
// idiom (retry loop around a backend client) and crate::cooldown/crate::retry
// for the key-rotation/backoff machinery already shared with C3.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cooldown::{CooldownReason, CooldownRegistry};
use crate::error::{EngineError, Result};
use crate::llm::{GenerationOptions, Message as LlmMessage, Part};
use crate::retry::with_timeout;

/// Transport to the remote embedding API (out-of-scope collaborator, spec §1;
/// this trait is the seam this crate owns). One call, one key.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str, api_key: &str) -> anyhow::Result<Vec<f32>>;
}

/// Reqwest-backed embedding transport for an OpenAI-compatible embeddings
/// endpoint, mirroring llm::dispatch::HttpChatProvider's request/response
/// idiom one level down (single vector in, single vector out).
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl HttpEmbeddingBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), model: model.into(), timeout }
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed(&self, text: &str, api_key: &str) -> anyhow::Result<Vec<f32>> {
        let send = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send();

        let response = with_timeout(self.timeout, async { Ok(send.await?) }, "embedding call").await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            anyhow::bail!("embedding provider error {}: {}", status.as_u16(), body);
        }

        let json: serde_json::Value = serde_json::from_str(&body)?;
        let vector = json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("embedding response missing data[0].embedding"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        Ok(vector)
    }
}

/// The pair of queries the retrieval pipeline (C4) needs per turn.
#[derive(Debug, Clone, Default)]
pub struct SearchQueries {
    pub direct: String,
    pub narrative: String,
}

pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    cooldowns: Arc<CooldownRegistry>,
    daily_cooldown_secs: i64,
    temporary_cooldown_secs: i64,
    max_attempts: usize,
}

impl EmbeddingService {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        cooldowns: Arc<CooldownRegistry>,
        daily_cooldown_secs: i64,
        temporary_cooldown_secs: i64,
        max_attempts: usize,
    ) -> Self {
        Self { backend, cooldowns, daily_cooldown_secs, temporary_cooldown_secs, max_attempts }
    }

    /// `generateEmbedding` (spec §4.2): rotate through `keys` in input order,
    /// skipping any currently in cooldown. Quota errors mark the key cold and
    /// move on; non-quota errors surface immediately; exhausting every key
    /// raises a distinguishable `AllKeysExhausted`.
    pub async fn generate_embedding(&self, text: &str, keys: &[String]) -> Result<Vec<f32>> {
        if keys.is_empty() {
            return Err(EngineError::invalid_input("no embedding keys configured"));
        }

        for key in keys {
            if self.cooldowns.is_cooling_down(key) {
                continue;
            }

            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.backend.embed(text, key).await {
                    Ok(vector) => return Ok(vector),
                    Err(e) => {
                        let msg = e.to_string().to_lowercase();
                        if is_quota_error(&msg) {
                            self.cooldowns.mark(key, CooldownReason::DailyQuota, self.daily_cooldown_secs);
                            break;
                        }
                        if is_rate_limit_error(&msg) {
                            self.cooldowns.mark(key, CooldownReason::Temporary, self.temporary_cooldown_secs);
                            break;
                        }
                        if attempt >= self.max_attempts {
                            return Err(EngineError::internal(format!("embedding call failed: {e}")));
                        }
                        warn!(attempt, "embedding call failed, retrying: {}", e);
                    }
                }
            }
        }

        Err(EngineError::AllKeysExhausted {
            model: "embedding".to_string(),
            keys_status: self.cooldowns.status_for(keys),
        })
    }

    /// `generateSearchQuery` (spec §4.4): ask the auxiliary model for two
    /// distinct queries labelled `DIRETA:`/`NARRATIVA:`. Falls back to using
    /// the whole output as the direct query if parsing fails. Routed through
    /// the shared dispatcher (C3) so the auxiliary model shares cooldown/retry
    /// bookkeeping with the main generation path (spec §9 shared-state note).
    pub async fn generate_search_query(
        &self,
        dispatcher: &crate::llm::dispatch::Dispatcher,
        context_text: &str,
        options: GenerationOptions,
    ) -> Result<SearchQueries> {
        let prompt = format!(
            "Given the following roleplay context, produce exactly two lines.\n\
             The first line starts with \"DIRETA:\" followed by keywords for concrete \
             scene elements (present characters, locations, the player's explicit question).\n\
             The second line starts with \"NARRATIVA:\" followed by keywords about lore, \
             foreshadowing, and connections relevant to the scene.\n\n\
             Context:\n{context_text}"
        );

        let response = dispatcher.dispatch(vec![LlmMessage::user_text(prompt)], String::new(), options).await?;
        Ok(parse_search_queries(&response.text))
    }

    /// `describeMediaForRAG` (spec §4.2): generate an indexable textual
    /// description of an image or PDF for message-embedding enrichment.
    pub async fn describe_media_for_rag(
        &self,
        dispatcher: &crate::llm::dispatch::Dispatcher,
        base64: &str,
        mime_type: &str,
        options: GenerationOptions,
    ) -> Result<String> {
        let history = vec![LlmMessage {
            role: crate::llm::TurnRole::User,
            parts: vec![
                Part::Text {
                    text: "Describe this attachment factually in 2-3 sentences, for later semantic search. \
                           Note concrete subjects, setting, and any visible text.".to_string(),
                },
                Part::InlineData { mime_type: mime_type.to_string(), base64: base64.to_string() },
            ],
        }];

        let response = dispatcher.dispatch(history, String::new(), options).await?;
        Ok(response.text)
    }
}

fn is_quota_error(msg: &str) -> bool {
    msg.contains("daily") || msg.contains("quota") || msg.contains("exceeded")
}

fn is_rate_limit_error(msg: &str) -> bool {
    msg.contains("429") || msg.contains("rate limit") || msg.contains("rate-limit")
}

fn parse_search_queries(output: &str) -> SearchQueries {
    let direct_re = Regex::new(r"(?i)^\s*DIRETA:\s*(.*)$").unwrap();
    let narrative_re = Regex::new(r"(?i)^\s*NARRATIVA:\s*(.*)$").unwrap();

    let mut direct = None;
    let mut narrative = None;

    for line in output.lines() {
        if let Some(caps) = direct_re.captures(line) {
            direct = Some(caps[1].trim().to_string());
        } else if let Some(caps) = narrative_re.captures(line) {
            narrative = Some(caps[1].trim().to_string());
        }
    }

    match (direct, narrative) {
        (Some(d), Some(n)) => SearchQueries { direct: d, narrative: n },
        (Some(d), None) => SearchQueries { direct: d, narrative: String::new() },
        _ => {
            debug!("generate_search_query: parsing failed, using whole output as direct query");
            SearchQueries { direct: output.trim().to_string(), narrative: String::new() }
        }
    }
}

/// Does the player message contain a question marker (spec §4.4): `{ ... }`,
/// a trailing `?`, or an interrogative opener.
pub fn has_question_marker(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.contains('{') && trimmed.contains('}') {
        return true;
    }
    if trimmed.ends_with('?') {
        return true;
    }
    const INTERROGATIVES: &[&str] = &[
        "quem", "o que", "qual", "quando", "onde", "por que", "porque", "como",
        "who", "what", "which", "when", "where", "why", "how",
    ];
    let lower = trimmed.to_lowercase();
    INTERROGATIVES.iter().any(|w| lower.starts_with(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direta_and_narrativa_lines() {
        let out = "DIRETA: Marte, geologia\nNARRATIVA: presságios sobre o planeta vermelho";
        let q = parse_search_queries(out);
        assert_eq!(q.direct, "Marte, geologia");
        assert_eq!(q.narrative, "presságios sobre o planeta vermelho");
    }

    #[test]
    fn falls_back_to_whole_output_when_unparseable() {
        let out = "just some free text with no labels";
        let q = parse_search_queries(out);
        assert_eq!(q.direct, out);
        assert_eq!(q.narrative, "");
    }

    #[test]
    fn detects_question_markers() {
        assert!(has_question_marker("Qual é a cor do céu?"));
        assert!(has_question_marker("Me fale sobre {a montanha}"));
        assert!(has_question_marker("Como funciona a magia aqui"));
        assert!(!has_question_marker("Eu ando até a vila."));
    }
}
