// src/llm/adapters.rs
// Per-provider request/response adapters (spec §4.3): convertHistoryToNative
// and convertToolsToNative for each ProviderKind. Grounded on
// config::generation::ProviderKind and the unified Message/Part shapes in
// llm::mod; the wire formats below mirror the OpenAI-compatible chat
// completions shape and a generic native tool-calling shape named in spec §6.

use serde_json::{json, Value};

use super::{Message, Part, ToolDeclaration, TurnRole};

/// OpenAI-compatible `messages` array: user/model -> user/assistant,
/// `function`-role turns become `tool` messages with JSON-serialized content,
/// `Part::InlineData` becomes an image content block.
pub fn history_to_openai(history: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len());

    for (idx, turn) in history.iter().enumerate() {
        match turn.role {
            TurnRole::User => {
                let content = openai_content_blocks(turn);
                out.push(json!({ "role": "user", "content": content }));
            }
            TurnRole::Model => {
                let text = turn.text();
                let tool_calls: Vec<Value> = turn
                    .function_calls()
                    .into_iter()
                    .map(|(id, name, args)| {
                        json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": args.to_string() },
                        })
                    })
                    .collect();

                let mut msg = json!({ "role": "assistant", "content": text });
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = json!(tool_calls);
                }
                out.push(msg);
            }
            TurnRole::Function => {
                for part in &turn.parts {
                    if let Part::FunctionResponse { id, response, .. } = part {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": id,
                            "content": response.to_string(),
                        }));
                    }
                }
                // Placeholder guard: the first turn must be a user turn for
                // some OpenAI-compatible backends; callers should never hand
                // us a function turn at index 0, but degrade gracefully.
                if idx == 0 {
                    out.insert(0, json!({ "role": "user", "content": "" }));
                }
            }
        }
    }

    out
}

fn openai_content_blocks(turn: &Message) -> Value {
    let has_media = turn.parts.iter().any(|p| matches!(p, Part::InlineData { .. }));
    if !has_media {
        return json!(turn.text());
    }

    let mut blocks = Vec::new();
    for part in &turn.parts {
        match part {
            Part::Text { text } => blocks.push(json!({ "type": "text", "text": text })),
            Part::InlineData { mime_type, base64 } => blocks.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:{mime_type};base64,{base64}") },
            })),
            _ => {}
        }
    }
    json!(blocks)
}

pub fn tools_to_openai(tools: &[ToolDeclaration]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                },
            })
        })
        .collect()
}

/// Native tool-calling vendor shape: `tool_use`/`tool_result` blocks with
/// stable ids, deduplicated, and a synthetic leading user turn if the first
/// turn isn't one.
pub fn history_to_native_tool_calling(history: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len() + 1);
    let mut seen_tool_result_ids = std::collections::HashSet::new();

    if history.first().map(|m| m.role) != Some(TurnRole::User) {
        out.push(json!({ "role": "user", "content": [{ "type": "text", "text": "" }] }));
    }

    for turn in history {
        let role = match turn.role {
            TurnRole::User | TurnRole::Function => "user",
            TurnRole::Model => "assistant",
        };

        let mut blocks = Vec::new();
        for part in &turn.parts {
            match part {
                Part::Text { text } => blocks.push(json!({ "type": "text", "text": text })),
                Part::FunctionCall { id, name, arguments } => blocks.push(json!({
                    "type": "tool_use", "id": id, "name": name, "input": arguments,
                })),
                Part::FunctionResponse { id, response, .. } => {
                    if seen_tool_result_ids.insert(id.clone()) {
                        blocks.push(json!({
                            "type": "tool_result", "tool_use_id": id, "content": response.to_string(),
                        }));
                    }
                }
                Part::InlineData { mime_type, base64 } => blocks.push(json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": mime_type, "data": base64 },
                })),
            }
        }

        out.push(json!({ "role": role, "content": blocks }));
    }

    out
}

pub fn tools_to_native_tool_calling(tools: &[ToolDeclaration]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
        .collect()
}

/// Substring table for tool-unsupported detection (spec §9 Open Questions:
/// "implementers should maintain a small table of provider-specific error
/// signatures"). Checked against a lowercased error body/status line.
pub fn is_tool_unsupported_error(status: u16, body: &str) -> bool {
    if status != 400 && status != 404 {
        return false;
    }
    let lower = body.to_lowercase();
    lower.contains("tool") || lower.contains("function") || lower.contains("does not support")
}

/// Recovers the HTTP status `HttpChatProvider::chat` embeds in its
/// `anyhow::Error` message ("provider error {status}: {body}"), so the
/// dispatcher's retry classifier can gate on the real status instead of
/// guessing one.
pub fn extract_status_from_error(msg: &str) -> Option<u16> {
    let after = msg.strip_prefix("provider error ")?;
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod status_extraction_tests {
    use super::extract_status_from_error;

    #[test]
    fn extracts_status_from_provider_error_message() {
        assert_eq!(extract_status_from_error("provider error 404: model not found"), Some(404));
        assert_eq!(extract_status_from_error("provider error 400: tool use not supported"), Some(400));
        assert_eq!(extract_status_from_error("timeout"), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_turn_deserializes_into_tool_message() {
        let history = vec![
            Message::user_text("hi"),
            Message {
                role: TurnRole::Function,
                parts: vec![Part::FunctionResponse {
                    id: "call1".into(),
                    name: "roll_dice".into(),
                    response: json!({"total": 7}),
                }],
            },
        ];
        let converted = history_to_openai(&history);
        assert_eq!(converted[1]["role"], "tool");
        assert_eq!(converted[1]["tool_call_id"], "call1");
    }

    #[test]
    fn tool_result_dedup_in_native_tool_calling() {
        let turn = Message {
            role: TurnRole::Function,
            parts: vec![
                Part::FunctionResponse { id: "a".into(), name: "x".into(), response: json!(1) },
                Part::FunctionResponse { id: "a".into(), name: "x".into(), response: json!(1) },
            ],
        };
        let converted = history_to_native_tool_calling(&[Message::user_text("hi"), turn]);
        let content = converted[1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
    }

    #[test]
    fn detects_tool_unsupported_signature() {
        assert!(is_tool_unsupported_error(400, "Function calling is not supported for this model"));
        assert!(!is_tool_unsupported_error(500, "internal error"));
    }
}
