//! Worker Pool (C6): a fixed number of long-lived tasks — one per admission slot, matching
//! `max_num_seqs` — each looping on the shared dispatch channel. §5 fixes the task count
//! ("max_num_seqs + 2 long-lived tasks: one arbiter, one per worker, plus the HTTP server's
//! acceptor(s)"), so the pool is sized once at startup rather than spawned per request; a
//! [`tokio::sync::mpsc::Receiver`] only has one consumer, so workers share it behind a
//! [`tokio::sync::Mutex`] and take turns pulling the next context off it. The
//! [`crate::admission::AdmissionGuard`] carried on the context is dropped at the end of each
//! worker's processing step regardless of how it exits, so capacity and LoRA bookkeeping stay
//! correct on every path, including a generation error.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use sim_common::{Config, Mode, SimError};

use crate::capacity::CapacityAccountant;
use crate::context::{RequestContext, RequestKind, ResponseSink, StreamFrame};
use crate::emitter;
use crate::generator::{self, GeneratedContent};
use crate::ingress::IngressDepth;
use crate::lora::LoraRegistry;
use crate::request::{CompletionRequest, CompletionRequestLike};

pub struct WorkerPool;

impl WorkerPool {
    /// Spawns `config.max_num_seqs` worker tasks sharing one dispatch receiver. Returns
    /// immediately; each task runs until the channel closes, which happens once the arbiter (its
    /// only sender) shuts down.
    pub fn spawn(
        config: Arc<Config>,
        accountant: Arc<CapacityAccountant>,
        lora: Arc<LoraRegistry>,
        dispatch_rx: mpsc::Receiver<RequestContext>,
        ingress_depth: IngressDepth,
    ) {
        let dispatch_rx = Arc::new(Mutex::new(dispatch_rx));
        let worker_count = config.max_num_seqs.max(1);

        for id in 0..worker_count {
            let config = config.clone();
            let accountant = accountant.clone();
            let lora = lora.clone();
            let ingress_depth = ingress_depth.clone();
            let dispatch_rx = dispatch_rx.clone();

            tokio::spawn(async move {
                loop {
                    let ctx = {
                        let mut rx = dispatch_rx.lock().await;
                        rx.recv().await
                    };
                    match ctx {
                        Some(ctx) => process(&config, &accountant, &lora, &ingress_depth, ctx).await,
                        None => break,
                    }
                }
                tracing::debug!(target: "worker", worker_id = id, "dispatch channel closed, worker stopping");
            });
        }
    }
}

async fn process(
    config: &Config,
    accountant: &CapacityAccountant,
    lora: &LoraRegistry,
    ingress_depth: &IngressDepth,
    mut ctx: RequestContext,
) {
    if let Some(name) = ctx.lora_name.clone() {
        if let Some(guard) = ctx.admission.as_mut() {
            guard.attach_lora(name);
        }
    }

    let model = config.display_model();
    sim_obs::set_running_requests(model, accountant.running());
    sim_obs::set_waiting_requests(model, ingress_depth.get());
    sim_obs::set_kv_cache_usage_percent(model, accountant.usage_percent());
    sim_obs::set_lora_info(&lora.running_names(), 0, config.lora_modules.len());

    let prompt_tokens = ctx.request.prompt_tokens();
    let content = match run_generation(ctx.kind, &ctx.request, config.mode, config.max_model_len) {
        Ok(content) => content,
        Err(err) => {
            tracing::error!(target: "worker", error = %err, "generation failed for an admitted request");
            respond_with_error(ctx.sink, err).await;
            sim_obs::set_running_requests(model, accountant.running());
            return;
        }
    };
    let display = emitter::display_model(config, ctx.lora_name.as_deref());

    match ctx.sink {
        ResponseSink::Unary(tx) => {
            let envelope = emitter::emit_unary(config, display, ctx.kind, &ctx.request, content, prompt_tokens).await;
            let _ = tx.send(Ok(envelope));
        }
        ResponseSink::Stream { frames, ready } => {
            let _ = ready.send(());
            emitter::emit_stream(config, display, ctx.kind, &ctx.request, content, prompt_tokens, &frames).await;
        }
    }

    sim_obs::set_running_requests(model, accountant.running());

    // `ctx.admission` drops here, releasing capacity and decref-ing any attached LoRA name
    // regardless of which sink arm ran (§7) — including the early return above.
}

/// Runs the response generator behind `catch_unwind`, turning a panic into the same
/// `InternalGenerationError` a real backend failure would produce (§7) instead of tearing down
/// the worker task and leaking the caller's reply channel. `generate` should never actually
/// panic against a request that passed intake validation; this exists so a latent bug there
/// degrades a single request to a 400 rather than the whole worker.
fn run_generation(
    kind: RequestKind,
    req: &CompletionRequest,
    mode: Mode,
    max_model_len: u32,
) -> Result<GeneratedContent, SimError> {
    std::panic::catch_unwind(AssertUnwindSafe(|| generator::generate(req, mode, max_model_len)))
        .map_err(|payload| classify_panic(kind, &*payload))
}

fn classify_panic(kind: RequestKind, payload: &(dyn Any + Send)) -> SimError {
    let cause = panic_message(payload);
    match kind {
        RequestKind::Chat => SimError::chat_generation(cause),
        RequestKind::Text => SimError::text_generation(cause),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "generation panicked".to_string())
}

/// Delivers a generation failure to whichever sink the request was waiting on: a unary caller
/// gets `Err(err)` on its oneshot, a streaming caller gets an error frame followed by `Done` so
/// the SSE connection still terminates instead of hanging open.
async fn respond_with_error(sink: ResponseSink, err: SimError) {
    match sink {
        ResponseSink::Unary(tx) => {
            let _ = tx.send(Err(err));
        }
        ResponseSink::Stream { frames, ready } => {
            let _ = ready.send(());
            let _ = frames.send(StreamFrame::Error(err)).await;
            let _ = frames.send(StreamFrame::Done).await;
        }
    }
}
