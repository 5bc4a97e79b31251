// Exercises the orchestrator's mutating tool vocabulary against a live
// Qdrant instance, the same QDRANT_URL-env-var idiom the teacher's own
// integration tests use: spec §8 testable scenario 3 (a roll_dice call is
// persisted to historico with the "NdX+M = total { rolls }" display format,
// without a follow-up model round trip contributing text of its own, only
// the forced/ narration turn) and scenario 4 (delete_memories surfaces a
// pending-confirmation marker rather than deleting immediately).

use async_trait::async_trait;
use memoria_core::chat_store::ChatMetadataStore;
use memoria_core::cooldown::CooldownRegistry;
use memoria_core::embedding::{EmbeddingBackend, EmbeddingService};
use memoria_core::llm::dispatch::Dispatcher;
use memoria_core::llm::{ChatResponse, FunctionCallRequest, GenerationOptions, LlmProvider, Message as LlmMessage, Part, TokenUsage};
use memoria_core::model::{Collection, Message, Role};
use memoria_core::orchestrator::Orchestrator;
use memoria_core::store::VectorStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct NoopEmbeddingBackend;

#[async_trait]
impl EmbeddingBackend for NoopEmbeddingBackend {
    async fn embed(&self, _text: &str, _api_key: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.1; 8])
    }
}

/// Calls `roll_dice` on its first turn, then returns plain text with no
/// further tool calls on the follow-up turn.
struct RollsOnceProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for RollsOnceProvider {
    fn name(&self) -> &'static str {
        "rolls-once"
    }

    async fn chat(&self, _history: Vec<LlmMessage>, _system: String, _options: &GenerationOptions) -> anyhow::Result<ChatResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            let args = serde_json::json!({ "count": 1, "type": "20", "modifier": 2 });
            Ok(ChatResponse {
                text: String::new(),
                function_calls: vec![FunctionCallRequest { id: "call-1".to_string(), name: "roll_dice".to_string(), arguments: args.clone() }],
                parts: vec![Part::FunctionCall { id: "call-1".to_string(), name: "roll_dice".to_string(), arguments: args }],
                thought_signature: None,
                tokens: TokenUsage::default(),
            })
        } else {
            Ok(ChatResponse {
                text: "You roll a d20 and add a +2 bonus.".to_string(),
                function_calls: vec![],
                parts: vec![],
                thought_signature: None,
                tokens: TokenUsage::default(),
            })
        }
    }
}

/// Calls `delete_memories` for one message id, then narrates.
struct RequestsDeletionProvider {
    message_id: Uuid,
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for RequestsDeletionProvider {
    fn name(&self) -> &'static str {
        "requests-deletion"
    }

    async fn chat(&self, _history: Vec<LlmMessage>, _system: String, _options: &GenerationOptions) -> anyhow::Result<ChatResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            let args = serde_json::json!({ "messageids": [self.message_id.to_string()] });
            Ok(ChatResponse {
                text: String::new(),
                function_calls: vec![FunctionCallRequest { id: "call-1".to_string(), name: "delete_memories".to_string(), arguments: args.clone() }],
                parts: vec![Part::FunctionCall { id: "call-1".to_string(), name: "delete_memories".to_string(), arguments: args }],
                thought_signature: None,
                tokens: TokenUsage::default(),
            })
        } else {
            Ok(ChatResponse {
                text: "I've flagged that memory for removal, pending your confirmation.".to_string(),
                function_calls: vec![],
                parts: vec![],
                thought_signature: None,
                tokens: TokenUsage::default(),
            })
        }
    }
}

async fn connected_store() -> Arc<VectorStore> {
    let url = std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string());
    Arc::new(VectorStore::connect(&url, 8).await.expect("failed to connect to Qdrant"))
}

fn orchestrator(provider: Arc<dyn LlmProvider>, store: Arc<VectorStore>, chats_root: &std::path::Path) -> Orchestrator {
    let embeddings = Arc::new(EmbeddingService::new(Arc::new(NoopEmbeddingBackend), Arc::new(CooldownRegistry::new()), 86_400, 60, 1));
    let dispatcher = Arc::new(Dispatcher::new(provider, Arc::new(CooldownRegistry::new()), memoria_core::config::generation::GenerationConfig { backoff_base_secs: 0, max_attempts_chat: 1, ..Default::default() }));
    let chats = Arc::new(ChatMetadataStore::new(chats_root.to_path_buf()));

    Orchestrator::new(dispatcher, store, embeddings, chats, 1e-3, Duration::from_millis(0), 300)
}

fn options() -> GenerationOptions {
    GenerationOptions { model_name: "test-model".to_string(), temperature: 0.7, tools: vec![], api_keys: vec!["k".to_string()] }
}

#[tokio::test]
async fn roll_dice_call_is_persisted_with_the_expected_display_format() {
    let store = connected_store().await;
    let chat_id = format!("test-dice-{}", Uuid::new_v4());
    store.initialize_collections(&chat_id).await.expect("failed to initialize collections");

    let chats_dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(RollsOnceProvider { calls: AtomicUsize::new(0) });
    let orchestrator = orchestrator(provider, store.clone(), chats_dir.path());

    let history = vec![LlmMessage::user_text("roll a d20+2")];
    let outcome = orchestrator
        .generate(&chat_id, history, "sys".to_string(), options(), &["embed-key".to_string()], "roll a d20+2")
        .await
        .expect("generate failed");

    assert_eq!(outcome.model_response, "You roll a d20 and add a +2 bonus.");

    let records = store.get_all_records(&chat_id, Collection::Historico).await.expect("failed to read historico");
    let dice_record = records.iter().find(|m| m.kind.as_deref() == Some("dice_roll")).expect("no dice_roll record persisted");

    let re = regex::Regex::new(r"^1d20\+2 = \d+ \{ \d+ \}$").unwrap();
    assert!(re.is_match(&dice_record.content), "{}", dice_record.content);
    assert_eq!(dice_record.role, Role::Model);
}

#[tokio::test]
async fn delete_memories_surfaces_a_pending_confirmation_instead_of_deleting() {
    let store = connected_store().await;
    let chat_id = format!("test-delete-{}", Uuid::new_v4());
    store.initialize_collections(&chat_id).await.expect("failed to initialize collections");

    let mut target = Message::new(&chat_id, Collection::Fatos, Role::Document, "the castle has a secret passage");
    target.embedding = Some(vec![0.2; 8]);
    store.insert_record(&target).await.expect("failed to insert target fact");

    let chats_dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(RequestsDeletionProvider { message_id: target.id, calls: AtomicUsize::new(0) });
    let orchestrator = orchestrator(provider, store.clone(), chats_dir.path());

    let history = vec![LlmMessage::user_text("forget about the secret passage")];
    let outcome = orchestrator
        .generate(&chat_id, history, "sys".to_string(), options(), &["embed-key".to_string()], "forget about the secret passage")
        .await
        .expect("generate failed");

    assert_eq!(outcome.pending_deletions.len(), 1);
    assert_eq!(outcome.pending_deletions[0].message_id, target.id);
    assert_eq!(outcome.pending_deletions[0].category, Collection::Fatos);

    // Nothing is actually deleted yet: the fact is still present.
    let (collection, _) = store.find_message(&chat_id, target.id).await.expect("find_message failed").expect("fact was deleted, expected pending confirmation only");
    assert_eq!(collection, Collection::Fatos);
}
