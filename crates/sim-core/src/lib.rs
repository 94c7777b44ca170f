//! The admission-and-dispatch pipeline: capacity accounting, the LoRA registry, request intake
//! validation, the queue arbiter, the worker pool, synthetic response generation, and response
//! emission. `sim-api` is the only other crate that should need to reach into here; it talks to
//! the pipeline exclusively through [`Engine`].

pub mod admission;
pub mod capacity;
pub mod context;
pub mod emitter;
pub mod engine;
pub mod generator;
pub mod ingress;
pub mod intake;
pub mod lora;
pub mod queue;
pub mod request;
pub mod rng;
pub mod worker;

pub use capacity::CapacityAccountant;
pub use context::{RequestContext, RequestKind, ResponseSink, StreamFrame};
pub use engine::Engine;
pub use generator::{FinishReason, GeneratedContent, ToolCallOut};
pub use lora::LoraRegistry;
pub use request::{
    ChatCompletionRequest, ChatMessage, CompletionRequest, CompletionRequestLike,
    StreamOptions, TextCompletionRequest, ToolChoice, ToolDef, ToolFunctionDef,
};
