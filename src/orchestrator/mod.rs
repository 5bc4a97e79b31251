// src/orchestrator/mod.rs
// Tool-Calling Orchestrator (C6): the bounded tool-using loop that drives the
// final user-visible response, plus persistence and the per-chat auto-repair
// cooldown. Grounded on advisory::tool_loops::gemini::ask_with_tools_gemini's
// shape (bounded rounds, append model turn + function turn verbatim, forced
// no-tools final call), generalized from a fixed read-only tool set to the
// mutating vocabulary in spec §4.6 (insert_fact/insert_concept/roll_dice/
// edit_memory/delete_memories).

pub mod dice;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat_store::ChatMetadataStore;
use crate::embedding::EmbeddingService;
use crate::error::{EngineError, Result};
use crate::llm::dispatch::Dispatcher;
use crate::llm::{GenerationOptions, Message as LlmMessage, Part, TurnRole};
use crate::model::{Collection, Message, Role};
use crate::store::VectorStore;
use crate::utils::get_timestamp;

use dice::roll;

const MAX_ITERATIONS: usize = 5;

/// One fact/concept inserted by the model during the turn, echoed back in the
/// wire contract's `newVectorMemory` (spec §6).
#[derive(Debug, Clone)]
pub struct InsertedMemory {
    pub message_id: Uuid,
    pub collection: Collection,
    pub text: String,
}

/// A deletion the model requested but that has not executed yet (spec §4.6,
/// testable scenario 4): surfaced to the client, executed only on confirmation.
#[derive(Debug, Clone)]
pub struct PendingDeletion {
    pub message_id: Uuid,
    pub text: String,
    pub category: Collection,
}

#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub model_response: String,
    pub new_vector_memory: Vec<InsertedMemory>,
    pub pending_deletions: Vec<PendingDeletion>,
}

pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    store: Arc<VectorStore>,
    embeddings: Arc<EmbeddingService>,
    chats: Arc<ChatMetadataStore>,
    zero_vector_epsilon: f32,
    repair_throttle: Duration,
    auto_repair_cooldown_secs: i64,
    last_repair: parking_lot::RwLock<HashMap<String, i64>>,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<VectorStore>,
        embeddings: Arc<EmbeddingService>,
        chats: Arc<ChatMetadataStore>,
        zero_vector_epsilon: f32,
        repair_throttle: Duration,
        auto_repair_cooldown_secs: i64,
    ) -> Self {
        Self {
            dispatcher,
            store,
            embeddings,
            chats,
            zero_vector_epsilon,
            repair_throttle,
            auto_repair_cooldown_secs,
            last_repair: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Runs one generation turn: the bounded tool loop (spec §4.6 steps 1-6),
    /// the forced-text fallback, and persistence of the final answer.
    /// `history` is the caller-assembled context (recent `historico` + RAG
    /// media injection + the current user turn, per spec §4.6); the user turn
    /// itself must already be persisted by the caller before this is invoked
    /// (spec §5 ordering: user message persisted before retrieval).
    pub async fn generate(
        &self,
        chat_id: &str,
        history: Vec<LlmMessage>,
        system_instruction: String,
        options: GenerationOptions,
        embedding_keys: &[String],
        user_text: &str,
    ) -> Result<GenerateOutcome> {
        self.maybe_trigger_auto_repair(chat_id, embedding_keys);

        let mut inserted = Vec::new();
        let mut pending_deletions = Vec::new();
        let final_text = self.run_loop(chat_id, history, system_instruction, options, embedding_keys, &mut inserted, &mut pending_deletions).await?;

        self.persist(chat_id, &final_text, user_text).await?;

        Ok(GenerateOutcome {
            model_response: final_text,
            new_vector_memory: inserted,
            pending_deletions,
        })
    }

    async fn run_loop(
        &self,
        chat_id: &str,
        mut history: Vec<LlmMessage>,
        system_instruction: String,
        mut options: GenerationOptions,
        embedding_keys: &[String],
        inserted: &mut Vec<InsertedMemory>,
        pending_deletions: &mut Vec<PendingDeletion>,
    ) -> Result<String> {
        let mut tentative_final: Option<String> = None;

        for iteration in 0..MAX_ITERATIONS {
            debug!(iteration, "orchestrator loop iteration");
            let response = self.dispatcher.dispatch(history.clone(), system_instruction.clone(), options.clone()).await?;

            if response.function_calls.is_empty() {
                if is_blank_or_punctuation(&response.text) {
                    return self.force_text_response(history, system_instruction, options).await;
                }
                return Ok(response.text);
            }

            if response.has_substantive_text() {
                tentative_final = Some(response.text.clone());
            }

            history.push(LlmMessage { role: TurnRole::Model, parts: response.parts.clone() });

            let mut needs_followup = false;
            let mut result_parts = Vec::new();

            for call in &response.function_calls {
                let (result, requires_followup) = self
                    .execute_tool(chat_id, &call.name, &call.arguments, embedding_keys, inserted, pending_deletions)
                    .await;
                needs_followup |= requires_followup;
                result_parts.push(Part::FunctionResponse { id: call.id.clone(), name: call.name.clone(), response: result });
            }
            history.push(LlmMessage { role: TurnRole::Function, parts: result_parts });

            if let Some(final_text) = tentative_final.take() {
                if !needs_followup {
                    return Ok(final_text);
                }
                tentative_final = Some(final_text);
            }
        }

        match tentative_final {
            Some(final_text) if !is_blank_or_punctuation(&final_text) => Ok(final_text),
            _ => self.force_text_response(history, system_instruction, options).await,
        }
    }

    /// Forced-text fallback (spec §4.6): re-invoke C3 once more with tools
    /// disabled to force a text response when the loop's natural output was
    /// empty or punctuation-only.
    async fn force_text_response(&self, mut history: Vec<LlmMessage>, system_instruction: String, mut options: GenerationOptions) -> Result<String> {
        options.tools.clear();
        history.push(LlmMessage::user_text("Please answer in plain text."));
        match self.dispatcher.dispatch(history, system_instruction, options).await {
            Ok(response) => Ok(response.text),
            Err(e) => {
                warn!("orchestrator: forced text fallback also failed: {}", e);
                Ok(String::new())
            }
        }
    }

    /// Executes one tool call, returning its JSON result for the function
    /// response part and whether it requires a follow-up narration (only
    /// `roll_dice`, spec §4.6 step 5).
    async fn execute_tool(
        &self,
        chat_id: &str,
        name: &str,
        arguments: &serde_json::Value,
        embedding_keys: &[String],
        inserted: &mut Vec<InsertedMemory>,
        pending_deletions: &mut Vec<PendingDeletion>,
    ) -> (serde_json::Value, bool) {
        let result = match name {
            "insert_fact" => self.insert_memory(chat_id, Collection::Fatos, arguments, embedding_keys, inserted).await,
            "insert_concept" => self.insert_memory(chat_id, Collection::Conceitos, arguments, embedding_keys, inserted).await,
            "roll_dice" => return (self.tool_roll_dice(chat_id, arguments).await, true),
            "edit_memory" => self.edit_memory(chat_id, arguments, embedding_keys).await,
            "delete_memories" => self.delete_memories(chat_id, arguments, pending_deletions).await,
            other => Err(EngineError::invalid_input(format!("unknown tool: {other}"))),
        };

        match result {
            Ok(value) => (value, false),
            Err(e) => (serde_json::json!({ "error": e.to_string() }), false),
        }
    }

    async fn insert_memory(
        &self,
        chat_id: &str,
        collection: Collection,
        arguments: &serde_json::Value,
        embedding_keys: &[String],
        inserted: &mut Vec<InsertedMemory>,
    ) -> Result<serde_json::Value> {
        let text = arguments.get("text").and_then(|v| v.as_str()).ok_or_else(|| EngineError::invalid_input("text is required"))?;

        let mut message = Message::new(chat_id, collection, Role::Document, text);
        message.kind = Some(match collection {
            Collection::Fatos => "fact".to_string(),
            Collection::Conceitos => "concept".to_string(),
            Collection::Historico => "dialogue".to_string(),
        });

        match self.embeddings.generate_embedding(text, embedding_keys).await {
            Ok(vector) => message.embedding = Some(vector),
            Err(e) => warn!("insert_memory: embedding failed, storing zero vector for {}: {}", message.id, e),
        }

        self.store.insert_record(&message).await.map_err(EngineError::from)?;
        inserted.push(InsertedMemory { message_id: message.id, collection, text: text.to_string() });

        Ok(serde_json::json!({ "status": "inserted", "message_id": message.id.to_string() }))
    }

    async fn tool_roll_dice(&self, chat_id: &str, arguments: &serde_json::Value) -> serde_json::Value {
        let count = arguments.get("count").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
        let die_type = arguments.get("type").and_then(|v| v.as_str()).unwrap_or("20");
        let modifier = arguments.get("modifier").and_then(|v| v.as_i64()).unwrap_or(0) as i32;

        let outcome = roll(count, die_type, modifier, &mut rand::thread_rng());

        let mut message = Message::new(chat_id, Collection::Historico, Role::Model, &outcome.display);
        message.kind = Some("dice_roll".to_string());
        if let Err(e) = self.store.insert_record(&message).await {
            warn!("roll_dice: failed to persist roll for chat {}: {}", chat_id, e);
        }

        serde_json::json!({ "display": outcome.display, "total": outcome.total, "rolls": outcome.rolls })
    }

    async fn edit_memory(&self, chat_id: &str, arguments: &serde_json::Value, embedding_keys: &[String]) -> Result<serde_json::Value> {
        let message_id = parse_uuid(arguments, "messageid")?;
        let new_text = arguments.get("new_text").and_then(|v| v.as_str()).ok_or_else(|| EngineError::invalid_input("new_text is required"))?;

        let (_, mut message) = self
            .store
            .find_message(chat_id, message_id)
            .await
            .map_err(EngineError::from)?
            .ok_or_else(|| EngineError::not_found(format!("message {message_id} not found")))?;

        message.content = new_text.to_string();
        match self.embeddings.generate_embedding(new_text, embedding_keys).await {
            Ok(vector) => message.embedding = Some(vector),
            Err(e) => warn!("edit_memory: re-embedding failed, keeping stale vector for {}: {}", message_id, e),
        }

        self.store.update_record(&message).await.map_err(EngineError::from)?;
        Ok(serde_json::json!({ "status": "edited", "message_id": message_id.to_string() }))
    }

    async fn delete_memories(
        &self,
        chat_id: &str,
        arguments: &serde_json::Value,
        pending_deletions: &mut Vec<PendingDeletion>,
    ) -> Result<serde_json::Value> {
        let ids = arguments
            .get("messageids")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EngineError::invalid_input("messageids is required"))?;

        let mut markers = Vec::new();
        for id_value in ids {
            let id_str = id_value.as_str().ok_or_else(|| EngineError::invalid_input("messageids must be strings"))?;
            let message_id = Uuid::parse_str(id_str).map_err(|_| EngineError::invalid_input("invalid message id"))?;

            if let Some((collection, message)) = self.store.find_message(chat_id, message_id).await.map_err(EngineError::from)? {
                let marker = PendingDeletion { message_id, text: message.content.clone(), category: collection };
                markers.push(serde_json::json!({
                    "messageid": message_id.to_string(),
                    "text": marker.text,
                    "category": collection.as_str(),
                }));
                pending_deletions.push(marker);
            }
        }

        Ok(serde_json::json!({ "status": "pending_confirmation", "candidates": markers }))
    }

    /// Final text is stored as a `model` turn; title auto-set from the first
    /// non-trivial user message; `updatedAt` refreshed (spec §4.6).
    async fn persist(&self, chat_id: &str, final_text: &str, user_text: &str) -> Result<()> {
        let response_text = if is_blank_or_punctuation(final_text) {
            "I'm sorry, something went wrong generating a response."
        } else {
            final_text
        };

        let mut model_turn = Message::new(chat_id, Collection::Historico, Role::Model, response_text);
        model_turn.kind = Some("dialogue".to_string());
        self.store.insert_record(&model_turn).await.map_err(EngineError::from)?;

        if let Ok(metadata) = self.chats.get(chat_id).await {
            if metadata.title.trim().is_empty() && is_non_trivial(user_text) {
                let _ = self.chats.update_title(chat_id, auto_title(user_text)).await;
            } else {
                let _ = self.chats.touch(chat_id).await;
            }
        }

        Ok(())
    }

    /// Per-turn auto-repair cooldown (spec §4.6): fires at most once every
    /// `auto_repair_cooldown_secs` per chat, in the background, for `fatos`
    /// and `conceitos` only (never `historico`, which is too large).
    fn maybe_trigger_auto_repair(&self, chat_id: &str, embedding_keys: &[String]) {
        let now = get_timestamp();
        {
            let guard = self.last_repair.read();
            if let Some(&last) = guard.get(chat_id) {
                if now - last < self.auto_repair_cooldown_secs {
                    return;
                }
            }
        }
        self.last_repair.write().insert(chat_id.to_string(), now);

        let store = self.store.clone();
        let embeddings = self.embeddings.clone();
        let chat_id = chat_id.to_string();
        let epsilon = self.zero_vector_epsilon;
        let throttle = self.repair_throttle;
        let keys = embedding_keys.to_vec();

        tokio::spawn(async move {
            for collection in [Collection::Fatos, Collection::Conceitos] {
                let keys = keys.clone();
                let embeddings = embeddings.clone();
                let result = store
                    .repair_zero_embeddings(&chat_id, collection, epsilon, throttle, move |text| {
                        let embeddings = embeddings.clone();
                        let keys = keys.clone();
                        async move { embeddings.generate_embedding(&text, &keys).await.map_err(|e| anyhow::anyhow!(e)) }
                    })
                    .await;

                match result {
                    Ok(count) if count > 0 => info!("auto-repair: fixed {} zero vectors in {:?} for chat {}", count, collection, chat_id),
                    Ok(_) => {}
                    Err(e) => warn!("auto-repair failed for {:?} in chat {}: {}", collection, chat_id, e),
                }
            }
        });
    }
}

fn parse_uuid(arguments: &serde_json::Value, field: &str) -> Result<Uuid> {
    let raw = arguments.get(field).and_then(|v| v.as_str()).ok_or_else(|| EngineError::invalid_input(format!("{field} is required")))?;
    Uuid::parse_str(raw).map_err(|_| EngineError::invalid_input(format!("invalid {field}")))
}

fn is_blank_or_punctuation(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.chars().all(|c| !c.is_alphanumeric())
}

fn is_non_trivial(text: &str) -> bool {
    text.trim().len() > 3
}

fn auto_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > 60 {
        format!("{}...", trimmed.chars().take(60).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_or_punctuation_only_is_detected() {
        assert!(is_blank_or_punctuation(""));
        assert!(is_blank_or_punctuation("..."));
        assert!(is_blank_or_punctuation("   "));
        assert!(!is_blank_or_punctuation("ok."));
    }

    #[test]
    fn auto_title_truncates_long_messages() {
        let long = "a".repeat(100);
        let title = auto_title(&long);
        assert!(title.ends_with("..."));
        assert!(title.len() < long.len());
    }

    #[test]
    fn non_trivial_rejects_short_messages() {
        assert!(!is_non_trivial("hi"));
        assert!(is_non_trivial("hello there"));
    }
}
