//! The polymorphic Completion Request (§3, §9 design note "Polymorphic request"): text and chat
//! requests are a sum type behind a shared capability trait, not a class hierarchy. The HTTP
//! layer picks the variant at parse time; everything downstream of intake only ever sees
//! [`CompletionRequest`] and the [`CompletionRequestLike`] accessors.

use serde::{Deserialize, Serialize};

/// Crude token estimate used throughout the simulator in place of a real tokenizer: ~4 bytes per
/// token, floor of one token for any non-empty text. Mirrors the estimator a teacher scheduler
/// implementation used for admission planning before a real tokenizer was wired up.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        0
    } else {
        std::cmp::max(1, (text.len() / 4) as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolDef {
    #[serde(rename = "type", default = "default_tool_type")]
    pub kind: String,
    pub function: ToolFunctionDef,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
    #[serde(default)]
    pub do_remote_prefill: bool,
    #[serde(default)]
    pub do_remote_decode: bool,
}

impl ChatCompletionRequest {
    /// `max_completion_tokens` is the modern field; `max_tokens` is accepted as an alias.
    pub fn declared_max_completion_tokens(&self) -> Option<u32> {
        self.max_completion_tokens.or(self.max_tokens)
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.as_deref())
    }

    fn all_content_for_token_estimate(&self) -> String {
        self.messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextCompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    #[serde(default)]
    pub do_remote_prefill: bool,
    #[serde(default)]
    pub do_remote_decode: bool,
}

impl TextCompletionRequest {
    pub fn declared_max_completion_tokens(&self) -> Option<u32> {
        self.max_tokens
    }
}

#[derive(Debug, Clone)]
pub enum CompletionRequest {
    Chat(ChatCompletionRequest),
    Text(TextCompletionRequest),
}

/// Shared operations over either request variant (§9 design note).
pub trait CompletionRequestLike {
    fn model(&self) -> &str;
    fn prompt_tokens(&self) -> u32;
    fn declared_max_completion_tokens(&self) -> Option<u32>;
    fn stream(&self) -> bool;
    fn include_usage(&self) -> bool;
    fn do_remote_prefill(&self) -> bool;
    fn do_remote_decode(&self) -> bool;
    fn tools(&self) -> &[ToolDef];
    fn tool_choice(&self) -> ToolChoice;

    /// `max_completion_tokens` if declared, else the remaining context budget.
    fn effective_max_completion_tokens(&self, max_model_len: u32) -> u32 {
        self.declared_max_completion_tokens()
            .unwrap_or_else(|| max_model_len.saturating_sub(self.prompt_tokens()))
    }
}

impl CompletionRequestLike for CompletionRequest {
    fn model(&self) -> &str {
        match self {
            CompletionRequest::Chat(r) => &r.model,
            CompletionRequest::Text(r) => &r.model,
        }
    }

    fn prompt_tokens(&self) -> u32 {
        match self {
            CompletionRequest::Chat(r) => estimate_tokens(&r.all_content_for_token_estimate()),
            CompletionRequest::Text(r) => estimate_tokens(&r.prompt),
        }
    }

    fn declared_max_completion_tokens(&self) -> Option<u32> {
        match self {
            CompletionRequest::Chat(r) => r.declared_max_completion_tokens(),
            CompletionRequest::Text(r) => r.declared_max_completion_tokens(),
        }
    }

    fn stream(&self) -> bool {
        match self {
            CompletionRequest::Chat(r) => r.stream,
            CompletionRequest::Text(r) => r.stream,
        }
    }

    fn include_usage(&self) -> bool {
        match self {
            CompletionRequest::Chat(r) => {
                r.stream_options.as_ref().is_some_and(|o| o.include_usage)
            }
            CompletionRequest::Text(r) => {
                r.stream_options.as_ref().is_some_and(|o| o.include_usage)
            }
        }
    }

    fn do_remote_prefill(&self) -> bool {
        match self {
            CompletionRequest::Chat(r) => r.do_remote_prefill,
            CompletionRequest::Text(r) => r.do_remote_prefill,
        }
    }

    fn do_remote_decode(&self) -> bool {
        match self {
            CompletionRequest::Chat(r) => r.do_remote_decode,
            CompletionRequest::Text(r) => r.do_remote_decode,
        }
    }

    fn tools(&self) -> &[ToolDef] {
        match self {
            CompletionRequest::Chat(r) => &r.tools,
            CompletionRequest::Text(_) => &[],
        }
    }

    fn tool_choice(&self) -> ToolChoice {
        match self {
            CompletionRequest::Chat(r) => r.tool_choice,
            CompletionRequest::Text(_) => ToolChoice::None,
        }
    }
}

/// Token count attributed to a request for the batching cap (§3 "Processing Tokens Charge").
/// Note this is deliberately *not* `effective_max_completion_tokens`: an undeclared max falls
/// back to the full context window, not the remaining budget.
pub fn charge_for(req: &CompletionRequest, max_model_len: u32) -> i64 {
    match req.declared_max_completion_tokens() {
        Some(m) => req.prompt_tokens() as i64 + m as i64,
        None => max_model_len as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(messages: Vec<(&str, &str)>, max_completion_tokens: Option<u32>) -> CompletionRequest {
        CompletionRequest::Chat(ChatCompletionRequest {
            model: "m".to_string(),
            messages: messages
                .into_iter()
                .map(|(role, content)| ChatMessage {
                    role: role.to_string(),
                    content: Some(content.to_string()),
                })
                .collect(),
            max_tokens: None,
            max_completion_tokens,
            stream: false,
            stream_options: None,
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            do_remote_prefill: false,
            do_remote_decode: false,
        })
    }

    #[test]
    fn charge_uses_declared_max_when_present() {
        let req = chat(vec![("user", "hello")], Some(80));
        let charge = charge_for(&req, 2000);
        assert_eq!(charge, req.prompt_tokens() as i64 + 80);
    }

    #[test]
    fn charge_falls_back_to_max_model_len() {
        let req = chat(vec![("user", "hello")], None);
        assert_eq!(charge_for(&req, 2000), 2000);
    }

    #[test]
    fn effective_max_completion_tokens_uses_remaining_budget() {
        let req = chat(vec![("user", "x".repeat(360).as_str())], None);
        let remaining = req.effective_max_completion_tokens(100);
        assert_eq!(remaining, 100u32.saturating_sub(req.prompt_tokens()));
    }

    #[test]
    fn last_user_message_skips_assistant_turns() {
        let req = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![
                ChatMessage { role: "user".to_string(), content: Some("first".to_string()) },
                ChatMessage { role: "assistant".to_string(), content: Some("reply".to_string()) },
                ChatMessage { role: "user".to_string(), content: Some("second".to_string()) },
            ],
            max_tokens: None,
            max_completion_tokens: None,
            stream: false,
            stream_options: None,
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            do_remote_prefill: false,
            do_remote_decode: false,
        };
        assert_eq!(req.last_user_message(), Some("second"));
    }
}
