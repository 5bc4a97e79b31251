// src/llm/mod.rs
// LLM Provider Dispatch (C3): one unified chat-completion contract over
// several remote APIs. Grounded on llm::provider::mod's Message/Response/
// ToolResponse shapes and LlmProvider trait, generalized from a
// Gemini3-specific provider to the four ProviderKind adapters named in
// SPEC_FULL/spec §4.3 (native, OpenAI-compatible, local-proxy, native
// tool-calling), sharing one cooldown registry (C9) instead of none.

pub mod adapters;
pub mod dispatch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn in the unified history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
    Function,
}

/// A piece of a turn: plain text, a requested function call, or a function's
/// response being fed back, or inline media. Preserving this as a sequence
/// (rather than collapsing to a string) lets C3 echo interleaved tool-call
/// parts verbatim into history, per spec §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    FunctionCall { id: String, name: String, arguments: Value },
    FunctionResponse { id: String, name: String, response: Value },
    InlineData { mime_type: String, base64: String },
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: TurnRole::User, parts: vec![Part::Text { text: text.into() }] }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Model, parts: vec![Part::Text { text: text.into() }] }
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_calls(&self) -> Vec<(&str, &str, &Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { id, name, arguments } => Some((id.as_str(), name.as_str(), arguments)),
                _ => None,
            })
            .collect()
    }
}

/// A declared tool (spec §4.6's vocabulary, shaped per-provider by convertToolsToNative).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: i64,
    pub output: i64,
    pub reasoning: i64,
}

/// Unified response shape (spec §4.3): text plus any requested function calls,
/// plus the verbatim parts sequence for echoing into history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub function_calls: Vec<FunctionCallRequest>,
    pub parts: Vec<Part>,
    pub thought_signature: Option<String>,
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }

    /// "substantive text" per spec §4.6 step 3.
    pub fn has_substantive_text(&self) -> bool {
        self.text.trim().len() > 10 && self.text.trim() != "..."
    }
}

/// generationOptions (spec §4.3): model + sampling + tool + key envelope.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model_name: String,
    pub temperature: f32,
    pub tools: Vec<ToolDeclaration>,
    pub api_keys: Vec<String>,
}

/// Universal LLM provider interface. No stream() method (whole-response
/// semantics is a hard Non-goal).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat(
        &self,
        history: Vec<Message>,
        system_instruction: String,
        options: &GenerationOptions,
    ) -> anyhow::Result<ChatResponse>;
}
