// Exercises the dispatch-level key/model cooldown semantics end to end
// (spec §8 testable scenario 6): once every key configured for one model is
// cooling down, a request for that model raises `all_keys_exhausted` with a
// per-key status breakdown, while a different model sharing the same keys is
// unaffected because the cooldown registry keys off `(key, model)`, not the
// raw key alone.

use async_trait::async_trait;
use memoria_core::cooldown::CooldownRegistry;
use memoria_core::error::EngineError;
use memoria_core::llm::dispatch::Dispatcher;
use memoria_core::llm::{ChatResponse, GenerationOptions, LlmProvider, Message, TokenUsage};
use std::sync::Arc;

/// Always fails with a daily-quota signature for one model name, succeeds
/// for any other.
struct QuotaForOneModel {
    cold_model: &'static str,
}

#[async_trait]
impl LlmProvider for QuotaForOneModel {
    fn name(&self) -> &'static str {
        "quota-for-one-model"
    }

    async fn chat(&self, _history: Vec<Message>, _system: String, options: &GenerationOptions) -> anyhow::Result<ChatResponse> {
        if options.model_name == self.cold_model {
            anyhow::bail!("daily quota exceeded for this key");
        }
        Ok(ChatResponse {
            text: "ok".to_string(),
            function_calls: vec![],
            parts: vec![],
            thought_signature: None,
            tokens: TokenUsage::default(),
        })
    }
}

fn options_for(model: &str, keys: Vec<String>) -> GenerationOptions {
    GenerationOptions { model_name: model.to_string(), temperature: 0.7, tools: vec![], api_keys: keys }
}

#[tokio::test]
async fn exhausted_model_does_not_block_a_sibling_model_sharing_keys() {
    let cooldowns = Arc::new(CooldownRegistry::new());
    let mut config = memoria_core::config::generation::GenerationConfig::default();
    config.backoff_base_secs = 0;
    config.max_attempts_chat = 1;

    let provider = Arc::new(QuotaForOneModel { cold_model: "heavy-model" });
    let dispatcher = Dispatcher::new(provider, cooldowns.clone(), config);

    let keys = vec!["shared-key".to_string()];

    // First call against the cold model hits the provider, fails on the
    // quota signature and marks "shared-key|heavy-model" cooling down.
    let first_heavy = dispatcher.dispatch(vec![Message::user_text("hi")], "sys".into(), options_for("heavy-model", keys.clone())).await;
    assert!(first_heavy.is_err());
    assert!(cooldowns.is_cooling_down("shared-key|heavy-model"));

    // A second call for the same model is short-circuited before the
    // provider is ever invoked, and reports every key as exhausted.
    let second_heavy = dispatcher.dispatch(vec![Message::user_text("hi")], "sys".into(), options_for("heavy-model", keys.clone())).await;
    match second_heavy {
        Err(EngineError::AllKeysExhausted { model, keys_status }) => {
            assert_eq!(model, "heavy-model");
            assert_eq!(keys_status.len(), 1);
            assert!(keys_status[0].cooldown_remaining_secs > 0);
        }
        other => panic!("expected all_keys_exhausted for heavy-model, got {other:?}"),
    }

    // Same key, different model: the cooldown is scoped to (key, model), so
    // this request is unaffected and succeeds on its first attempt.
    let light = dispatcher.dispatch(vec![Message::user_text("hi")], "sys".into(), options_for("light-model", keys)).await;
    assert_eq!(light.unwrap().text, "ok");
}

#[tokio::test]
async fn repeated_calls_against_a_cold_model_keep_failing_without_re_attempting_the_call() {
    let cooldowns = Arc::new(CooldownRegistry::new());
    let mut config = memoria_core::config::generation::GenerationConfig::default();
    config.backoff_base_secs = 0;
    config.max_attempts_chat = 1;

    let provider = Arc::new(QuotaForOneModel { cold_model: "heavy-model" });
    let dispatcher = Dispatcher::new(provider, cooldowns, config);
    let keys = vec!["k1".to_string()];

    // Prime the cooldown with one real attempt against the provider.
    let primer = dispatcher.dispatch(vec![Message::user_text("hi")], "sys".into(), options_for("heavy-model", keys.clone())).await;
    assert!(primer.is_err());

    // Every subsequent call is rejected before reaching the provider.
    for _ in 0..3 {
        let result = dispatcher.dispatch(vec![Message::user_text("hi")], "sys".into(), options_for("heavy-model", keys.clone())).await;
        assert!(matches!(result, Err(EngineError::AllKeysExhausted { .. })));
    }
}
