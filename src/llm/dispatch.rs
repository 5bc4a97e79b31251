// src/llm/dispatch.rs
// Concrete provider adapters plus the cooldown/retry-aware Dispatcher that
// drives them. Grounded on llm::provider::mod::LlmProvider (trait shape) and
// utils::rate_limiter/timeout (retry/timeout idiom, generalized in
// crate::retry). The four ProviderKind variants share one HTTP client and
// pick their wire shape via llm::adapters.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::generation::{GenerationConfig, ProviderKind};
use crate::cooldown::{CooldownReason, CooldownRegistry};
use crate::error::{EngineError, Result};
use crate::retry::{with_timeout, RetryDecision};

use super::adapters;
use super::{ChatResponse, FunctionCallRequest, GenerationOptions, LlmProvider, Message, Part, TokenUsage};

/// An HTTP-backed provider for one of the non-native-SDK kinds (spec §4.3:
/// OpenAI-compatible router/local-proxy/Cerebras, or a native tool-calling
/// vendor). The "plain native provider (direct vector+chat API)" variant is
/// expected to be supplied by the embedding/generation model API collaborator
/// (out of scope, spec §1); this adapter covers everything this crate owns.
pub struct HttpChatProvider {
    client: reqwest::Client,
    base_url: String,
    kind: ProviderKind,
    timeout: Duration,
}

impl HttpChatProvider {
    pub fn new(base_url: impl Into<String>, kind: ProviderKind, timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), kind, timeout }
    }

    fn endpoint(&self) -> String {
        match self.kind {
            ProviderKind::OpenAiCompatible | ProviderKind::LocalProxy => {
                format!("{}/v1/chat/completions", self.base_url)
            }
            ProviderKind::NativeToolCalling => format!("{}/v1/messages", self.base_url),
            ProviderKind::Native => format!("{}/v1/generate", self.base_url),
        }
    }

    fn build_body(&self, history: &[Message], system: &str, options: &GenerationOptions) -> Value {
        match self.kind {
            ProviderKind::OpenAiCompatible | ProviderKind::LocalProxy => {
                let mut messages = vec![serde_json::json!({ "role": "system", "content": system })];
                messages.extend(adapters::history_to_openai(history));
                let mut body = serde_json::json!({
                    "model": options.model_name,
                    "messages": messages,
                    "temperature": options.temperature,
                });
                if !options.tools.is_empty() {
                    body["tools"] = serde_json::json!(adapters::tools_to_openai(&options.tools));
                }
                body
            }
            ProviderKind::NativeToolCalling => {
                let mut body = serde_json::json!({
                    "model": options.model_name,
                    "system": system,
                    "messages": adapters::history_to_native_tool_calling(history),
                    "temperature": options.temperature,
                });
                if !options.tools.is_empty() {
                    body["tools"] = serde_json::json!(adapters::tools_to_native_tool_calling(&options.tools));
                }
                body
            }
            ProviderKind::Native => serde_json::json!({
                "model": options.model_name,
                "system_instruction": system,
                "contents": adapters::history_to_native_tool_calling(history),
            }),
        }
    }

    fn parse_response(&self, body: Value) -> anyhow::Result<ChatResponse> {
        match self.kind {
            ProviderKind::OpenAiCompatible | ProviderKind::LocalProxy => parse_openai_response(body),
            ProviderKind::NativeToolCalling | ProviderKind::Native => parse_native_tool_calling_response(body),
        }
    }
}

fn parse_openai_response(body: Value) -> anyhow::Result<ChatResponse> {
    let choice = body["choices"].get(0).ok_or_else(|| anyhow::anyhow!("no choices in response"))?;
    let message = &choice["message"];
    let text = message["content"].as_str().unwrap_or_default().to_string();

    let function_calls = message["tool_calls"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let id = tc["id"].as_str()?.to_string();
            let name = tc["function"]["name"].as_str()?.to_string();
            let arguments: Value = tc["function"]["arguments"]
                .as_str()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Value::Null);
            Some(FunctionCallRequest { id, name, arguments })
        })
        .collect::<Vec<_>>();

    let mut parts = vec![Part::Text { text: text.clone() }];
    for fc in &function_calls {
        parts.push(Part::FunctionCall { id: fc.id.clone(), name: fc.name.clone(), arguments: fc.arguments.clone() });
    }

    let usage = &body["usage"];
    Ok(ChatResponse {
        text,
        function_calls,
        parts,
        thought_signature: None,
        tokens: TokenUsage {
            input: usage["prompt_tokens"].as_i64().unwrap_or(0),
            output: usage["completion_tokens"].as_i64().unwrap_or(0),
            reasoning: usage["reasoning_tokens"].as_i64().unwrap_or(0),
        },
    })
}

fn parse_native_tool_calling_response(body: Value) -> anyhow::Result<ChatResponse> {
    let blocks = body["content"].as_array().cloned().unwrap_or_default();
    let mut text = String::new();
    let mut function_calls = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                let t = block["text"].as_str().unwrap_or_default().to_string();
                text.push_str(&t);
                parts.push(Part::Text { text: t });
            }
            Some("tool_use") => {
                let id = block["id"].as_str().unwrap_or_default().to_string();
                let name = block["name"].as_str().unwrap_or_default().to_string();
                let arguments = block["input"].clone();
                function_calls.push(FunctionCallRequest { id: id.clone(), name: name.clone(), arguments: arguments.clone() });
                parts.push(Part::FunctionCall { id, name, arguments });
            }
            _ => {}
        }
    }

    let usage = &body["usage"];
    Ok(ChatResponse {
        text,
        function_calls,
        parts,
        thought_signature: body["thought_signature"].as_str().map(String::from),
        tokens: TokenUsage {
            input: usage["input_tokens"].as_i64().unwrap_or(0),
            output: usage["output_tokens"].as_i64().unwrap_or(0),
            reasoning: 0,
        },
    })
}

#[async_trait]
impl LlmProvider for HttpChatProvider {
    fn name(&self) -> &'static str {
        match self.kind {
            ProviderKind::Native => "native",
            ProviderKind::OpenAiCompatible => "openai-compatible",
            ProviderKind::LocalProxy => "local-proxy",
            ProviderKind::NativeToolCalling => "native-tool-calling",
        }
    }

    async fn chat(
        &self,
        history: Vec<Message>,
        system_instruction: String,
        options: &GenerationOptions,
    ) -> anyhow::Result<ChatResponse> {
        let body = self.build_body(&history, &system_instruction, options);
        let api_key = options.api_keys.first().cloned().unwrap_or_default();

        let send = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send();

        let response = with_timeout(self.timeout, async { Ok(send.await?) }, "llm chat call").await?;

        let status = response.status();
        let text_body = response.text().await?;

        if !status.is_success() {
            anyhow::bail!("provider error {}: {}", status.as_u16(), text_body);
        }

        let json: Value = serde_json::from_str(&text_body)?;
        self.parse_response(json)
    }
}

/// Drives a provider through retry/backoff/cooldown per spec §4.3: daily-quota
/// cooldown is 24h, temporary rate limits sleep 2s and retry the same key, and
/// exponential backoff otherwise (base 2s, factor 2, max 5 attempts chat).
pub struct Dispatcher {
    provider: Arc<dyn LlmProvider>,
    cooldowns: Arc<CooldownRegistry>,
    config: GenerationConfig,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn LlmProvider>, cooldowns: Arc<CooldownRegistry>, config: GenerationConfig) -> Self {
        Self { provider, cooldowns, config }
    }

    fn cooldown_key(key: &str, model: &str) -> String {
        format!("{key}|{model}")
    }

    /// Dispatches a chat call, rotating through `options.api_keys`, skipping
    /// any currently in cooldown for this model, retrying tool-unsupported
    /// failures once without tools.
    pub async fn dispatch(
        &self,
        history: Vec<Message>,
        system_instruction: String,
        mut options: GenerationOptions,
    ) -> Result<ChatResponse> {
        let model = options.model_name.clone();
        let candidates: Vec<String> = options
            .api_keys
            .iter()
            .map(|k| Self::cooldown_key(k, &model))
            .collect();

        let Some(available) = self.cooldowns.first_available(&candidates) else {
            return Err(EngineError::AllKeysExhausted {
                model: model.clone(),
                keys_status: self.cooldowns.status_for(&candidates),
            });
        };

        let chosen_key = options
            .api_keys
            .iter()
            .find(|k| Self::cooldown_key(k, &model) == available)
            .cloned()
            .unwrap_or_default();
        options.api_keys = vec![chosen_key.clone()];
        let cooldown_key = Self::cooldown_key(&chosen_key, &model);

        let attempted_without_tools = std::sync::atomic::AtomicBool::new(false);
        let provider = self.provider.clone();
        let history_for_retry = history.clone();
        let system_for_retry = system_instruction.clone();

        let result = crate::retry::retry_operation(
            || {
                let provider = provider.clone();
                let mut opts = options.clone();
                if attempted_without_tools.load(std::sync::atomic::Ordering::SeqCst) {
                    opts.tools.clear();
                }
                let history = history_for_retry.clone();
                let system = system_for_retry.clone();
                async move { provider.chat(history, system, &opts).await }
            },
            |err| {
                let msg = err.to_string();
                let status = crate::llm::adapters::extract_status_from_error(&msg).unwrap_or(0);
                if crate::llm::adapters::is_tool_unsupported_error(status, &msg) && !attempted_without_tools.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    return RetryDecision::RetryAfter(0);
                }
                if msg.contains("daily") || msg.contains("quota") {
                    self.cooldowns.mark(&cooldown_key, CooldownReason::DailyQuota, self.config.daily_cooldown_secs);
                    return RetryDecision::Fail;
                }
                if msg.contains("429") || msg.to_lowercase().contains("rate limit") {
                    return RetryDecision::RetryAfter(self.config.temporary_retry_delay_secs);
                }
                RetryDecision::Retry
            },
            self.config.max_attempts_chat as u32,
            self.config.backoff_base_secs,
            self.config.backoff_factor,
        )
        .await;

        result.map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl LlmProvider for AlwaysFails {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn chat(&self, _h: Vec<Message>, _s: String, _o: &GenerationOptions) -> anyhow::Result<ChatResponse> {
            anyhow::bail!("daily quota exceeded")
        }
    }

    #[tokio::test]
    async fn all_keys_exhausted_when_single_key_hits_daily_quota() {
        let cooldowns = Arc::new(CooldownRegistry::new());
        let mut config = GenerationConfig::default();
        config.backoff_base_secs = 0;
        config.max_attempts_chat = 1;

        let dispatcher = Dispatcher::new(Arc::new(AlwaysFails), cooldowns.clone(), config);
        let options = GenerationOptions {
            model_name: "m".into(),
            temperature: 0.7,
            tools: vec![],
            api_keys: vec!["k1".into()],
        };

        let first = dispatcher.dispatch(vec![Message::user_text("hi")], "sys".into(), options.clone()).await;
        assert!(first.is_err());
        assert!(cooldowns.is_cooling_down("k1|m"));

        let second = dispatcher.dispatch(vec![Message::user_text("hi")], "sys".into(), options).await;
        match second {
            Err(EngineError::AllKeysExhausted { .. }) => {}
            other => panic!("expected all_keys_exhausted, got {other:?}"),
        }
    }
}
