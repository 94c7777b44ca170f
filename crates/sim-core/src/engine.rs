//! Wires C1–C6 together: the capacity accountant, the LoRA registry, the ingress/dispatch
//! channels, the queue arbiter, and the worker pool. This is the one object the HTTP layer
//! (out of scope here — see `sim-api`) needs to hold: it owns everything else.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use sim_common::{Config, SimError};

use crate::capacity::CapacityAccountant;
use crate::context::{RequestContext, RequestKind, ResponseSink, StreamFrame};
use crate::ingress::IngressDepth;
use crate::intake;
use crate::lora::LoraRegistry;
use crate::queue::Arbiter;
use crate::request::CompletionRequest;
use crate::worker::WorkerPool;

/// Ingress channel capacity (§5: "bounded (e.g., 1000)").
const INGRESS_CAPACITY: usize = 1000;

pub struct Engine {
    config: Arc<Config>,
    accountant: Arc<CapacityAccountant>,
    lora: Arc<LoraRegistry>,
    ingress_tx: mpsc::Sender<RequestContext>,
    ingress_depth: IngressDepth,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Spins up the arbiter and the worker pool and returns a handle shared by every HTTP
    /// handler. `rng::init` must be called by the caller before the first request arrives.
    pub fn start(config: Config) -> Arc<Self> {
        let config = Arc::new(config);
        let accountant = Arc::new(CapacityAccountant::new(
            config.max_num_seqs,
            config.max_num_batched_tokens,
        ));
        let lora = Arc::new(LoraRegistry::new(
            config.lora_modules.iter().map(|m| m.name.clone()),
        ));

        let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_CAPACITY);
        let dispatch_capacity = config.max_num_seqs.max(1) as usize;
        let (dispatch_tx, dispatch_rx) = mpsc::channel(dispatch_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingress_depth = IngressDepth::new();

        Arbiter::spawn(
            config.clone(),
            accountant.clone(),
            lora.clone(),
            ingress_rx,
            ingress_depth.clone(),
            dispatch_tx,
            shutdown_rx,
        );
        WorkerPool::spawn(
            config.clone(),
            accountant.clone(),
            lora.clone(),
            dispatch_rx,
            ingress_depth.clone(),
        );

        Arc::new(Self {
            config,
            accountant,
            lora,
            ingress_tx,
            ingress_depth,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lora(&self) -> &LoraRegistry {
        &self.lora
    }

    pub fn accountant(&self) -> &CapacityAccountant {
        &self.accountant
    }

    pub fn waiting_estimate(&self) -> i64 {
        self.ingress_depth.get()
    }

    /// Cancels the arbiter and worker pool; in-flight requests finish their current sleep (§5
    /// "Cancellation").
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Runs intake validation (§4.4 steps 2–6) and, if the request passes, admits it onto the
    /// ingress channel and blocks until a worker has produced (or failed to produce) a response.
    pub async fn submit_unary(
        &self,
        request: CompletionRequest,
        kind: RequestKind,
    ) -> Result<serde_json::Value, SimError> {
        let lora_name = self.validate(&request)?;
        let (tx, rx) = oneshot::channel();
        let ctx = RequestContext::new(request, kind, lora_name, ResponseSink::Unary(tx));
        self.enqueue(ctx).await;
        rx.await.unwrap_or(Err(SimError::ResponseSerializationError))
    }

    /// As [`Self::submit_unary`] but for the streaming path (§4.8). Returns a `ready` signal the
    /// caller should await before starting to read `frames`, so response headers are not sent
    /// before a worker has actually picked up the request, plus the channel of emitted frames.
    pub async fn submit_stream(
        &self,
        request: CompletionRequest,
        kind: RequestKind,
    ) -> Result<(oneshot::Receiver<()>, mpsc::Receiver<StreamFrame>), SimError> {
        let lora_name = self.validate(&request)?;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (frames_tx, frames_rx) = mpsc::channel(8);
        let ctx = RequestContext::new(
            request,
            kind,
            lora_name,
            ResponseSink::Stream { frames: frames_tx, ready: ready_tx },
        );
        self.enqueue(ctx).await;
        Ok((ready_rx, frames_rx))
    }

    fn validate(&self, request: &CompletionRequest) -> Result<Option<String>, SimError> {
        intake::validate(request, &self.config, &self.lora, &self.accountant)
    }

    async fn enqueue(&self, ctx: RequestContext) {
        self.ingress_depth.incr();
        if self.ingress_tx.send(ctx).await.is_err() {
            self.ingress_depth.decr();
            tracing::error!(target: "engine", "ingress channel closed, dropping request");
        }
    }
}
