// src/summarizer/mod.rs
// Agentic Context Summarizer (C5): a bounded tool-using LLM loop that
// compresses retrieved fragments into a prose briefing, with model-chain
// fallback. Grounded on advisory::tool_loops::gemini::ask_with_tools_gemini's
// shape (fixed-round loop, append model turn + tool-result turn, forced
// no-tools final call when the round budget is hit), generalized from "any of
// N read-only tools" to the spec's single `search_memories` tool and from a
// single-provider loop to one retried across a model chain.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::dispatch::Dispatcher;
use crate::llm::{GenerationOptions, Message as LlmMessage, Part, ToolDeclaration, TurnRole};
use crate::retrieval::RetrievalPipeline;

const MAX_ITERATIONS: usize = 4;
const SEARCH_K_PER_COLLECTION: usize = 10;

fn search_memories_tool() -> ToolDeclaration {
    ToolDeclaration {
        name: "search_memories".to_string(),
        description: "Search this chat's fact and concept memories for additional context.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string", "description": "Free-text search query" } },
            "required": ["query"],
        }),
    }
}

pub struct Summarizer {
    dispatcher: Arc<Dispatcher>,
    retrieval: Arc<RetrievalPipeline>,
    embedding_keys: Vec<String>,
}

impl Summarizer {
    pub fn new(dispatcher: Arc<Dispatcher>, retrieval: Arc<RetrievalPipeline>, embedding_keys: Vec<String>) -> Self {
        Self { dispatcher, retrieval, embedding_keys }
    }

    /// Tries each entry in `model_chain` in order (spec §4.5: "pro-high"
    /// through "pro-low" to "flash"). On any error with the current model
    /// (exceptions, empty output, iteration-limit total failure), advances to
    /// the next. Degrades to the raw memories text only when every model fails.
    pub async fn summarize(
        &self,
        chat_id: &str,
        original_query: &str,
        initial_memories: &str,
        eternal_memories: &str,
        model_chain: &[GenerationOptions],
    ) -> String {
        for options in model_chain {
            match self.run_loop(chat_id, original_query, initial_memories, eternal_memories, options.clone()).await {
                Ok(briefing) => return briefing,
                Err(e) => warn!("summarizer model {} failed: {}, advancing chain", options.model_name, e),
            }
        }

        warn!("summarizer: all models in chain failed, degrading to raw memories");
        initial_memories.to_string()
    }

    async fn run_loop(
        &self,
        chat_id: &str,
        original_query: &str,
        initial_memories: &str,
        eternal_memories: &str,
        mut options: GenerationOptions,
    ) -> anyhow::Result<String> {
        let system_instruction = system_prompt();
        let mut history = vec![LlmMessage::user_text(user_prompt(original_query, initial_memories, eternal_memories))];
        options.tools = vec![search_memories_tool()];

        for iteration in 0..MAX_ITERATIONS {
            debug!(iteration, "summarizer loop iteration");
            let response = self.dispatcher.dispatch(history.clone(), system_instruction.clone(), options.clone()).await?;

            if response.function_calls.is_empty() {
                if response.text.trim().is_empty() {
                    anyhow::bail!("summarizer returned empty text with no tool calls");
                }
                return Ok(response.text);
            }

            history.push(LlmMessage { role: TurnRole::Model, parts: response.parts.clone() });

            let mut result_parts = Vec::new();
            for call in &response.function_calls {
                let query = call.arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
                let result = self
                    .retrieval
                    .search_memories(chat_id, query, &self.embedding_keys, SEARCH_K_PER_COLLECTION)
                    .await
                    .map(|text| serde_json::json!({ "result": text }))
                    .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));

                result_parts.push(Part::FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response: result,
                });
            }
            history.push(LlmMessage { role: TurnRole::Function, parts: result_parts });
        }

        // Iteration bound reached without a final text: one more request
        // without tools, explicitly asking for the briefing now.
        options.tools.clear();
        history.push(LlmMessage::user_text("Produce the briefing now, in prose, with no further tool calls."));
        let response = self.dispatcher.dispatch(history, system_instruction, options).await?;

        if response.text.trim().is_empty() {
            anyhow::bail!("summarizer forced-final call returned empty text");
        }
        Ok(response.text)
    }
}

fn system_prompt() -> String {
    "You are a memory summarizer for a role-playing chat. Produce flowing prose, no lists, \
     that is purely informational and never prescriptive of narrative choices. If something is \
     unknown or unclear in the retrieved memories, say so explicitly rather than inventing \
     details. You may call search_memories to fill gaps before answering."
        .to_string()
}

fn user_prompt(original_query: &str, initial_memories: &str, eternal_memories: &str) -> String {
    format!(
        "Original query: {original_query}\n\n\
         Initial retrieved memories:\n{initial_memories}\n\n\
         Memories that must never be omitted:\n{eternal_memories}\n\n\
         Write a briefing synthesizing the above."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_declaration_exposes_query_parameter() {
        let tool = search_memories_tool();
        assert_eq!(tool.name, "search_memories");
        assert_eq!(tool.parameters["required"][0], "query");
    }

    #[test]
    fn user_prompt_includes_all_sections() {
        let prompt = user_prompt("what is mars?", "mars is red", "always remember the prophecy");
        assert!(prompt.contains("what is mars?"));
        assert!(prompt.contains("mars is red"));
        assert!(prompt.contains("always remember the prophecy"));
    }
}
