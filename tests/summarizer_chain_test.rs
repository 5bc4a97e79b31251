// Exercises the agentic summarizer's model-chain fallback (spec §4.5): the
// first models in the chain fail, the summarizer advances to the next
// without surfacing the intermediate errors, and only degrades to the raw
// memories text if every model in the chain fails.

use async_trait::async_trait;
use memoria_core::cooldown::CooldownRegistry;
use memoria_core::llm::dispatch::Dispatcher;
use memoria_core::llm::{ChatResponse, GenerationOptions, LlmProvider, Message, TokenUsage};
use memoria_core::retrieval::RetrievalPipeline;
use memoria_core::store::VectorStore;
use memoria_core::summarizer::Summarizer;
use std::sync::Arc;

/// Fails for every model name in `fail_models`, otherwise returns `reply`.
struct ChainProvider {
    fail_models: Vec<&'static str>,
    reply: &'static str,
}

#[async_trait]
impl LlmProvider for ChainProvider {
    fn name(&self) -> &'static str {
        "chain-provider"
    }

    async fn chat(&self, _history: Vec<Message>, _system: String, options: &GenerationOptions) -> anyhow::Result<ChatResponse> {
        if self.fail_models.contains(&options.model_name.as_str()) {
            anyhow::bail!("simulated failure for {}", options.model_name);
        }
        Ok(ChatResponse {
            text: self.reply.to_string(),
            function_calls: vec![],
            parts: vec![],
            thought_signature: None,
            tokens: TokenUsage::default(),
        })
    }
}

fn model_chain(names: &[&str]) -> Vec<GenerationOptions> {
    names
        .iter()
        .map(|n| GenerationOptions { model_name: n.to_string(), temperature: 0.3, tools: vec![], api_keys: vec!["k".to_string()] })
        .collect()
}

async fn retrieval_pipeline() -> Arc<RetrievalPipeline> {
    // Constructing the Qdrant channel does not perform a network round trip
    // (spec §9: the contract is exercised once a call is actually made); the
    // scenarios below never reach a tool call, so no live Qdrant is required.
    let store = Arc::new(VectorStore::connect("http://localhost:6334", 8).await.unwrap());
    let embeddings = Arc::new(memoria_core::embedding::EmbeddingService::new(
        Arc::new(NoopEmbeddingBackend),
        Arc::new(CooldownRegistry::new()),
        86_400,
        60,
        1,
    ));
    Arc::new(RetrievalPipeline::new(store, embeddings, memoria_core::config::retrieval::RetrievalConfig::default()))
}

struct NoopEmbeddingBackend;

#[async_trait]
impl memoria_core::embedding::EmbeddingBackend for NoopEmbeddingBackend {
    async fn embed(&self, _text: &str, _api_key: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.0; 8])
    }
}

#[tokio::test]
async fn advances_past_failing_models_to_a_working_one() {
    let provider = Arc::new(ChainProvider { fail_models: vec!["pro-high", "pro-low"], reply: "Mars is a red, dusty world." });
    let dispatcher = Arc::new(Dispatcher::new(provider, Arc::new(CooldownRegistry::new()), memoria_core::config::generation::GenerationConfig { backoff_base_secs: 0, max_attempts_chat: 1, ..Default::default() }));

    let summarizer = Summarizer::new(dispatcher, retrieval_pipeline().await, vec!["embed-key".to_string()]);
    let chain = model_chain(&["pro-high", "pro-low", "flash"]);

    let briefing = summarizer.summarize("chat-1", "tell me about mars", "Mars: red planet, iron oxide surface.", "", &chain).await;
    assert_eq!(briefing, "Mars is a red, dusty world.");
}

#[tokio::test]
async fn degrades_to_raw_memories_when_every_model_in_the_chain_fails() {
    let provider = Arc::new(ChainProvider { fail_models: vec!["pro-high", "pro-low", "flash"], reply: "unused" });
    let dispatcher = Arc::new(Dispatcher::new(provider, Arc::new(CooldownRegistry::new()), memoria_core::config::generation::GenerationConfig { backoff_base_secs: 0, max_attempts_chat: 1, ..Default::default() }));

    let summarizer = Summarizer::new(dispatcher, retrieval_pipeline().await, vec!["embed-key".to_string()]);
    let chain = model_chain(&["pro-high", "pro-low", "flash"]);

    let raw_memories = "Mars: red planet, iron oxide surface.";
    let briefing = summarizer.summarize("chat-1", "tell me about mars", raw_memories, "", &chain).await;
    assert_eq!(briefing, raw_memories);
}
