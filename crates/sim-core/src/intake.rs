//! Request Intake (C4): the validation steps an HTTP handler runs before a request is ever
//! allowed to occupy a queue slot. JSON (de)serialization and JSON-Schema validation of tool
//! definitions are treated as shallow external collaborators (§1 scope) — this module calls
//! straight through to `jsonschema` rather than reimplementing a validator.

use sim_common::{Config, SimError};

use crate::capacity::CapacityAccountant;
use crate::lora::LoraRegistry;
use crate::request::{charge_for, CompletionRequest, CompletionRequestLike, ToolDef};

/// Step 3: the requested model must be either a served alias or a currently-loaded LoRA.
/// Returns the LoRA name when the request targets one, so callers can thread it onto the
/// [`crate::context::RequestContext`].
pub fn resolve_model(
    model: &str,
    config: &Config,
    lora: &LoraRegistry,
) -> Result<Option<String>, SimError> {
    if config.is_known_base_model(model) {
        return Ok(None);
    }
    if lora.is_loaded(model) {
        return Ok(Some(model.to_string()));
    }
    Err(SimError::UnknownModel(model.to_string()))
}

/// Step 2: each declared tool's `parameters` must itself be a structurally valid JSON Schema
/// document. A no-op for text requests and for chat requests that declare no tools.
pub fn validate_tool_schemas(tools: &[ToolDef]) -> Result<(), SimError> {
    for tool in tools {
        jsonschema::validator_for(&tool.function.parameters)
            .map_err(|e| SimError::ToolSchemaError(e.to_string()))?;
    }
    Ok(())
}

/// Step 4: streaming is incompatible with a remote-decode (disaggregated prefill) request.
pub fn validate_streaming_remote_decode(req: &CompletionRequest) -> Result<(), SimError> {
    if req.stream() && req.do_remote_decode() {
        return Err(SimError::InvalidRequest(
            "Prefill does not support streaming".to_string(),
        ));
    }
    Ok(())
}

/// Step 5: `prompt_tokens + effective_max_completion_tokens <= max_model_len`.
pub fn validate_context_window(req: &CompletionRequest, max_model_len: u32) -> Result<(), SimError> {
    let prompt_tokens = req.prompt_tokens();
    let completion_tokens = req.effective_max_completion_tokens(max_model_len);
    let total = prompt_tokens + completion_tokens;
    if total > max_model_len {
        return Err(SimError::InvalidRequest(format!(
            "This model's maximum context length is {max_model_len} tokens. However, you requested {total} tokens ({prompt_tokens} in the messages, {completion_tokens} in the completion). Please reduce the length of the messages or completion"
        )));
    }
    Ok(())
}

/// Step 6: if a batched-token cap is configured, a request whose charge alone exceeds it can
/// never be admitted and must be rejected up front rather than left to starve in the queue.
pub fn validate_batch_cap(
    req: &CompletionRequest,
    max_model_len: u32,
    accountant: &CapacityAccountant,
) -> Result<(), SimError> {
    let charge = charge_for(req, max_model_len);
    if accountant.exceeds_batch_cap(charge) {
        return Err(SimError::InvalidRequest(format!(
            "This request requires {charge} batched tokens, which exceeds max_num_batched_tokens of {}",
            accountant.max_num_batched_tokens()
        )));
    }
    Ok(())
}

/// Runs every intake validation step in spec order (§4.4 steps 2–6) and, on success, returns the
/// LoRA name the request resolved to (`None` for a served base-model alias). Called synchronously
/// before a request ever occupies a queue slot, so none of these failures touch capacity.
pub fn validate(
    req: &CompletionRequest,
    config: &Config,
    lora: &LoraRegistry,
    accountant: &CapacityAccountant,
) -> Result<Option<String>, SimError> {
    validate_tool_schemas(req.tools())?;
    let lora_name = resolve_model(req.model(), config, lora)?;
    validate_streaming_remote_decode(req)?;
    validate_context_window(req, config.max_model_len)?;
    validate_batch_cap(req, config.max_model_len, accountant)?;
    Ok(lora_name)
}
