//! Response Generator (C7): turns an admitted request into either a token list or a tool-call
//! list, never both, and reports exactly the number of tokens actually produced.

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use sim_common::config::Mode;

use crate::request::{CompletionRequest, CompletionRequestLike, ToolChoice};
use crate::rng::with_rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    RemoteDecode,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::RemoteDecode => "remote_decode",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallOut {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub enum GeneratedContent {
    Text {
        tokens: Vec<String>,
        finish_reason: FinishReason,
    },
    ToolCalls {
        calls: Vec<ToolCallOut>,
        finish_reason: FinishReason,
    },
}

impl GeneratedContent {
    pub fn completion_tokens(&self) -> u32 {
        match self {
            GeneratedContent::Text { tokens, .. } => tokens.len() as u32,
            GeneratedContent::ToolCalls { calls, .. } => calls
                .iter()
                .map(|c| crate::request::estimate_tokens(&c.arguments) + 1)
                .sum(),
        }
    }

    pub fn finish_reason(&self) -> FinishReason {
        match self {
            GeneratedContent::Text { finish_reason, .. } => *finish_reason,
            GeneratedContent::ToolCalls { finish_reason, .. } => *finish_reason,
        }
    }
}

const RANDOM_SENTENCES: &[&str] = &[
    "The quick brown fox jumps over the lazy dog.",
    "A synthetic response is standing in for a real generation.",
    "Load testing benefits from predictable latency more than clever prose.",
    "Every token emitted here is sampled from a fixed sentence bank.",
    "The scheduler admitted this request after checking capacity.",
    "Streaming responses are paced token by token to mimic real decode latency.",
    "This server never actually runs a model; it only pretends to.",
    "Capacity accounting and queueing are the parts under test, not fluency.",
    "Adapters can be loaded and unloaded without restarting the process.",
    "Prometheus gauges track how many requests are running or waiting.",
    "Context windows are enforced before a request ever reaches the queue.",
    "The arbiter scans the waiting queue once every ten milliseconds.",
];

/// Produces the content for an admitted request: a tool-call list when the request calls for
/// one, otherwise plain text per the configured [`Mode`].
pub fn generate(req: &CompletionRequest, mode: Mode, max_model_len: u32) -> GeneratedContent {
    if should_generate_tool_calls(req) {
        return generate_tool_calls(req);
    }
    match mode {
        Mode::Echo => generate_echo(req),
        Mode::Random => generate_random(req, max_model_len),
    }
}

fn should_generate_tool_calls(req: &CompletionRequest) -> bool {
    if !matches!(req, CompletionRequest::Chat(_)) {
        return false;
    }
    if req.tools().is_empty() {
        return false;
    }
    match req.tool_choice() {
        ToolChoice::None => false,
        ToolChoice::Required => true,
        ToolChoice::Auto => with_rng(|rng| rng.gen_bool(0.5)),
    }
}

fn generate_tool_calls(req: &CompletionRequest) -> GeneratedContent {
    let tools = req.tools();
    let chosen = with_rng(|rng| tools.choose(rng)).expect("caller checked tools is non-empty");
    let call = ToolCallOut {
        id: format!("call_{}", Uuid::new_v4()),
        name: chosen.function.name.clone(),
        arguments: "{}".to_string(),
    };
    GeneratedContent::ToolCalls {
        calls: vec![call],
        finish_reason: FinishReason::ToolCalls,
    }
}

fn generate_echo(req: &CompletionRequest) -> GeneratedContent {
    let source = match req {
        CompletionRequest::Chat(c) => c.last_user_message().unwrap_or("").to_string(),
        CompletionRequest::Text(t) => t.prompt.clone(),
    };
    let words: Vec<&str> = source.split_whitespace().collect();
    let cap = req.declared_max_completion_tokens().unwrap_or(u32::MAX) as usize;
    let truncated = words.len() > cap;
    let tokens: Vec<String> = words
        .into_iter()
        .take(cap)
        .map(String::from)
        .collect();
    let finish_reason = if truncated {
        FinishReason::Length
    } else {
        FinishReason::Stop
    };
    GeneratedContent::Text { tokens, finish_reason }
}

fn generate_random(req: &CompletionRequest, max_model_len: u32) -> GeneratedContent {
    let declared = req.declared_max_completion_tokens();
    let upper_bound = declared
        .unwrap_or_else(|| max_model_len.saturating_sub(req.prompt_tokens()))
        .max(1);
    let target = if upper_bound == 1 {
        1
    } else {
        with_rng(|rng| rng.gen_range(1..=upper_bound))
    };

    let mut tokens: Vec<String> = Vec::with_capacity(target as usize);
    while (tokens.len() as u32) < target {
        let sentence = with_rng(|rng| *RANDOM_SENTENCES.choose(rng).unwrap());
        tokens.extend(sentence.split_whitespace().map(String::from));
    }
    tokens.truncate(target as usize);

    let finish_reason = match declared {
        Some(m) if tokens.len() as u32 >= m => FinishReason::Length,
        _ => FinishReason::Stop,
    };
    GeneratedContent::Text { tokens, finish_reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ChatCompletionRequest, ChatMessage, StreamOptions};

    fn chat_req(content: &str, max_completion_tokens: Option<u32>) -> CompletionRequest {
        CompletionRequest::Chat(ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: Some(content.to_string()) }],
            max_tokens: None,
            max_completion_tokens,
            stream: false,
            stream_options: Some(StreamOptions { include_usage: false }),
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            do_remote_prefill: false,
            do_remote_decode: false,
        })
    }

    #[test]
    fn echo_round_trips_last_user_message_with_ample_budget() {
        crate::rng::init(Some(1));
        let req = chat_req("hello there friend", Some(50));
        let content = generate(&req, Mode::Echo, 4096);
        match content {
            GeneratedContent::Text { tokens, finish_reason } => {
                assert_eq!(tokens.join(" "), "hello there friend");
                assert_eq!(finish_reason.as_str(), "stop");
            }
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn echo_truncates_and_reports_length() {
        crate::rng::init(Some(1));
        let req = chat_req("one two three four five", Some(2));
        let content = generate(&req, Mode::Echo, 4096);
        match content {
            GeneratedContent::Text { tokens, finish_reason } => {
                assert_eq!(tokens, vec!["one".to_string(), "two".to_string()]);
                assert_eq!(finish_reason.as_str(), "length");
            }
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn random_completion_tokens_matches_reported_usage() {
        crate::rng::init(Some(7));
        let req = chat_req("hello", Some(5));
        let content = generate(&req, Mode::Random, 4096);
        assert_eq!(content.completion_tokens(), 5);
        assert_eq!(content.finish_reason().as_str(), "length");
    }
}
