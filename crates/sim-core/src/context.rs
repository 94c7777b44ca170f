//! Request Context (§3): the envelope carrying a parsed request from intake through the queue,
//! the worker pool, and emission, plus whatever the HTTP layer needs to eventually produce
//! bytes on the wire.

use sim_common::SimError;
use tokio::sync::{mpsc, oneshot};

use crate::admission::AdmissionGuard;
use crate::request::CompletionRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Chat,
    Text,
}

/// One SSE frame as produced by the emitter; the HTTP layer is responsible for turning this
/// into a wire-format `data: ...` line.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Chunk(serde_json::Value),
    /// Sent in place of further chunks when generation fails after the stream has already been
    /// handed to the caller; always followed by `Done` so the SSE connection still closes.
    Error(SimError),
    Done,
}

/// How the worker hands the finished (or failed) response back to the suspended HTTP handler.
pub enum ResponseSink {
    Unary(oneshot::Sender<Result<serde_json::Value, SimError>>),
    Stream {
        frames: mpsc::Sender<StreamFrame>,
        /// Fired once the worker has taken ownership of the request and is ready to start
        /// pacing tokens; the handler awaits this before handing the frame stream to axum so
        /// that response headers are not sent before a worker actually picked up the request.
        ready: oneshot::Sender<()>,
    },
}

pub struct RequestContext {
    pub request: CompletionRequest,
    pub kind: RequestKind,
    /// Set by intake when the request's model resolved to a loaded LoRA adapter rather than a
    /// served base-model alias.
    pub lora_name: Option<String>,
    pub sink: ResponseSink,
    /// Populated by the arbiter at admission time; `None` while the context still sits in the
    /// waiting queue.
    pub admission: Option<AdmissionGuard>,
}

impl RequestContext {
    pub fn new(
        request: CompletionRequest,
        kind: RequestKind,
        lora_name: Option<String>,
        sink: ResponseSink,
    ) -> Self {
        Self {
            request,
            kind,
            lora_name,
            sink,
            admission: None,
        }
    }
}
