//! Response Emitter (C8): serializes a generated response, sleeping for the configured pacing
//! before unary bodies and between streamed chunks. Never sleeps before flushing a chunk that
//! is already ready — flush, then sleep, so per-chunk timing stays observable to a caller
//! timing the wire (§9 design note).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use uuid::Uuid;

use sim_common::Config;

use crate::context::{RequestKind, StreamFrame};
use crate::generator::{FinishReason, GeneratedContent};
use crate::request::{CompletionRequest, CompletionRequestLike};

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Display model name (§4.8): the LoRA name for LoRA requests, else the first served alias.
pub fn display_model<'a>(config: &'a Config, lora_name: Option<&'a str>) -> &'a str {
    lora_name.unwrap_or_else(|| config.display_model())
}

fn effective_finish_reason(req: &CompletionRequest, content: &GeneratedContent) -> FinishReason {
    if req.do_remote_decode() {
        FinishReason::RemoteDecode
    } else {
        content.finish_reason()
    }
}

fn time_to_first_token_ms(config: &Config, req: &CompletionRequest) -> u64 {
    if req.do_remote_prefill() {
        config.kv_cache_transfer_latency_ms
    } else {
        config.time_to_first_token_ms
    }
}

fn usage_json(prompt_tokens: u32, completion_tokens: u32) -> serde_json::Value {
    serde_json::json!({
        "prompt_tokens": prompt_tokens,
        "completion_tokens": completion_tokens,
        "total_tokens": prompt_tokens + completion_tokens,
    })
}

fn message_json(content: &GeneratedContent) -> serde_json::Value {
    match content {
        GeneratedContent::Text { tokens, .. } => serde_json::json!({
            "role": "assistant",
            "content": tokens.join(" "),
        }),
        GeneratedContent::ToolCalls { calls, .. } => serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": calls.iter().map(|c| serde_json::json!({
                "id": c.id,
                "type": "function",
                "function": {"name": c.name, "arguments": c.arguments},
            })).collect::<Vec<_>>(),
        }),
    }
}

fn unary_choice_json(
    kind: RequestKind,
    content: &GeneratedContent,
    finish_reason: FinishReason,
) -> serde_json::Value {
    match kind {
        RequestKind::Chat => serde_json::json!({
            "index": 0,
            "finish_reason": finish_reason.as_str(),
            "message": message_json(content),
        }),
        RequestKind::Text => {
            let text = match content {
                GeneratedContent::Text { tokens, .. } => tokens.join(" "),
                GeneratedContent::ToolCalls { .. } => String::new(),
            };
            serde_json::json!({
                "index": 0,
                "finish_reason": finish_reason.as_str(),
                "text": text,
            })
        }
    }
}

fn attach_remote_decode_fields(envelope: &mut serde_json::Value) {
    envelope["do_remote_decode"] = serde_json::json!(true);
    envelope["do_remote_prefill"] = serde_json::json!(false);
    envelope["remote_block_ids"] = serde_json::json!(["DUMMY_ID"]);
    envelope["remote_engine_id"] = serde_json::json!("DUMMY_ID");
    envelope["remote_host"] = serde_json::json!("DUMMY");
    envelope["remote_port"] = serde_json::json!(1234);
}

fn object_type(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Chat => "chat.completion",
        RequestKind::Text => "text_completion",
    }
}

fn chunk_object_type(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Chat => "chat.completion.chunk",
        RequestKind::Text => "text_completion",
    }
}

/// Unary path (§4.8): sleeps for the full time-to-first-token-plus-decode latency, then returns
/// the complete response envelope. The sleep happens here, before the caller ever writes a
/// byte, so the HTTP body is only produced once pacing has elapsed.
pub async fn emit_unary(
    config: &Config,
    display_model: &str,
    kind: RequestKind,
    req: &CompletionRequest,
    content: GeneratedContent,
    prompt_tokens: u32,
) -> serde_json::Value {
    let completion_tokens = content.completion_tokens();
    let ttft = time_to_first_token_ms(config, req);
    let decode_tail = (completion_tokens.saturating_sub(1) as u64)
        .saturating_mul(config.inter_token_latency_ms);
    tokio::time::sleep(Duration::from_millis(ttft + decode_tail)).await;

    let finish_reason = effective_finish_reason(req, &content);
    let mut envelope = serde_json::json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": object_type(kind),
        "created": unix_seconds(),
        "model": display_model,
        "choices": [unary_choice_json(kind, &content, finish_reason)],
        "usage": usage_json(prompt_tokens, completion_tokens),
    });
    if req.do_remote_decode() {
        attach_remote_decode_fields(&mut envelope);
    }
    envelope
}

/// Streaming path (§4.8): sleeps for time-to-first-token, flushes a delta chunk per token
/// sleeping `inter_token_latency` between each, then a terminal chunk with the finish reason and
/// (only if requested) a usage-only chunk, then [`StreamFrame::Done`].
pub async fn emit_stream(
    config: &Config,
    display_model: &str,
    kind: RequestKind,
    req: &CompletionRequest,
    content: GeneratedContent,
    prompt_tokens: u32,
    frames: &mpsc::Sender<StreamFrame>,
) {
    let id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = unix_seconds();
    let completion_tokens = content.completion_tokens();

    tokio::time::sleep(Duration::from_millis(time_to_first_token_ms(config, req))).await;

    let per_token_chunks = match &content {
        GeneratedContent::Text { tokens, .. } => tokens
            .iter()
            .map(|t| text_delta_chunk(kind, &id, created, display_model, t))
            .collect::<Vec<_>>(),
        GeneratedContent::ToolCalls { calls, .. } => calls
            .iter()
            .enumerate()
            .map(|(i, c)| tool_call_delta_chunk(&id, created, display_model, i, c))
            .collect::<Vec<_>>(),
    };

    let n = per_token_chunks.len();
    for (i, chunk) in per_token_chunks.into_iter().enumerate() {
        if frames.send(StreamFrame::Chunk(chunk)).await.is_err() {
            return;
        }
        if i + 1 < n {
            tokio::time::sleep(Duration::from_millis(config.inter_token_latency_ms)).await;
        }
    }

    let finish_reason = effective_finish_reason(req, &content);
    let final_chunk = terminal_chunk(kind, &id, created, display_model, finish_reason);
    if frames.send(StreamFrame::Chunk(final_chunk)).await.is_err() {
        return;
    }

    if req.include_usage() {
        let usage_chunk = usage_only_chunk(kind, &id, created, display_model, prompt_tokens, completion_tokens);
        if frames.send(StreamFrame::Chunk(usage_chunk)).await.is_err() {
            return;
        }
    }

    let _ = frames.send(StreamFrame::Done).await;
}

fn text_delta_chunk(kind: RequestKind, id: &str, created: u64, model: &str, token: &str) -> serde_json::Value {
    let choice = match kind {
        RequestKind::Chat => serde_json::json!({
            "index": 0,
            "delta": {"content": format!("{token} ")},
            "finish_reason": null,
        }),
        RequestKind::Text => serde_json::json!({
            "index": 0,
            "text": format!("{token} "),
            "finish_reason": null,
        }),
    };
    serde_json::json!({
        "id": id,
        "object": chunk_object_type(kind),
        "created": created,
        "model": model,
        "choices": [choice],
    })
}

fn tool_call_delta_chunk(
    id: &str,
    created: u64,
    model: &str,
    index: usize,
    call: &crate::generator::ToolCallOut,
) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "object": chunk_object_type(RequestKind::Chat),
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": {"tool_calls": [{
                "index": index,
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments},
            }]},
            "finish_reason": null,
        }],
    })
}

fn terminal_chunk(kind: RequestKind, id: &str, created: u64, model: &str, finish_reason: FinishReason) -> serde_json::Value {
    let choice = match kind {
        RequestKind::Chat => serde_json::json!({
            "index": 0,
            "delta": {},
            "finish_reason": finish_reason.as_str(),
        }),
        RequestKind::Text => serde_json::json!({
            "index": 0,
            "text": "",
            "finish_reason": finish_reason.as_str(),
        }),
    };
    serde_json::json!({
        "id": id,
        "object": chunk_object_type(kind),
        "created": created,
        "model": model,
        "choices": [choice],
    })
}

fn usage_only_chunk(
    kind: RequestKind,
    id: &str,
    created: u64,
    model: &str,
    prompt_tokens: u32,
    completion_tokens: u32,
) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "object": chunk_object_type(kind),
        "created": created,
        "model": model,
        "choices": [],
        "usage": usage_json(prompt_tokens, completion_tokens),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{FinishReason, GeneratedContent};
    use crate::request::{ChatCompletionRequest, ChatMessage, ToolChoice};
    use std::time::Instant;

    fn chat_req(do_remote_decode: bool) -> CompletionRequest {
        CompletionRequest::Chat(ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: Some("hi".to_string()) }],
            max_tokens: None,
            max_completion_tokens: Some(3),
            stream: false,
            stream_options: None,
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            do_remote_prefill: false,
            do_remote_decode,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn unary_sleeps_for_ttft_plus_decode_tail() {
        let config = Config { time_to_first_token_ms: 500, inter_token_latency_ms: 100, ..Config::default() };
        let req = chat_req(false);
        let content = GeneratedContent::Text {
            tokens: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            finish_reason: FinishReason::Stop,
        };
        let start = Instant::now();
        let handle = tokio::spawn(async move {
            emit_unary(&config, "m", RequestKind::Chat, &req, content, 5).await
        });
        tokio::time::advance(Duration::from_millis(699)).await;
        assert!(!handle.is_finished());
        tokio::time::advance(Duration::from_millis(2)).await;
        let value = handle.await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(0)); // paused clock; just reaches here
        assert_eq!(value["usage"]["completion_tokens"], 3);
        assert_eq!(value["usage"]["total_tokens"], 8);
    }

    #[tokio::test]
    async fn remote_decode_overrides_finish_reason_and_adds_sentinels() {
        let config = Config { time_to_first_token_ms: 0, inter_token_latency_ms: 0, ..Config::default() };
        let req = chat_req(true);
        let content = GeneratedContent::Text { tokens: vec!["hi".to_string()], finish_reason: FinishReason::Stop };
        let value = emit_unary(&config, "m", RequestKind::Chat, &req, content, 2).await;
        assert_eq!(value["choices"][0]["finish_reason"], "remote_decode");
        assert_eq!(value["remote_block_ids"][0], "DUMMY_ID");
        assert_eq!(value["remote_host"], "DUMMY");
        assert_eq!(value["remote_port"], 1234);
    }

    #[tokio::test]
    async fn stream_omits_usage_unless_requested() {
        let config = Config { time_to_first_token_ms: 0, inter_token_latency_ms: 0, ..Config::default() };
        let req = chat_req(false);
        let content = GeneratedContent::Text { tokens: vec!["a".to_string()], finish_reason: FinishReason::Stop };
        let (tx, mut rx) = mpsc::channel(8);
        emit_stream(&config, "m", RequestKind::Chat, &req, content, 1, &tx).await;
        drop(tx);
        let mut saw_usage = false;
        let mut saw_done = false;
        while let Some(frame) = rx.recv().await {
            match frame {
                StreamFrame::Chunk(v) => {
                    if v.get("usage").is_some() {
                        saw_usage = true;
                    }
                }
                StreamFrame::Error(_) => panic!("emit_stream never produces an error frame itself"),
                StreamFrame::Done => saw_done = true,
            }
        }
        assert!(!saw_usage);
        assert!(saw_done);
    }
}
