//! Legacy text completions, carried over the native chat endpoint as a single
//! user message.

use super::chat::{
    created_at, finish_reason, response_model, sampling_options, usage, SYSTEM_FINGERPRINT,
};
use super::native_types::{self, ChatRequest, ChatResponse};
use super::openai_types::{Completion, CompletionChoice, CompletionRequest, TextCompletionObject};

pub fn completion_id() -> String {
    format!("cmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Wrap the prompt into a one-message native chat request.
pub fn to_native(req: &CompletionRequest) -> ChatRequest {
    let options = sampling_options(
        req.temperature,
        req.top_p,
        req.max_tokens,
        req.seed,
        req.stop.clone(),
        req.frequency_penalty,
        req.presence_penalty,
    );

    ChatRequest {
        model: req.model.clone(),
        messages: vec![native_types::Message {
            role: "user".to_string(),
            content: req.prompt.clone(),
            images: None,
            tool_calls: None,
        }],
        stream: req.stream.unwrap_or(false),
        format: None,
        options,
        tools: None,
    }
}

/// Flatten the native assistant reply into `choices[0].text`.
pub fn from_native(resp: &ChatResponse, id: &str, fallback_model: &str) -> Completion {
    Completion {
        id: id.to_string(),
        object: TextCompletionObject::TextCompletion,
        created: created_at(resp),
        model: response_model(resp, fallback_model),
        system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
        choices: vec![CompletionChoice {
            text: resp.message.content.clone(),
            index: 0,
            logprobs: None,
            finish_reason: Some(finish_reason(resp.done_reason.as_deref(), false).to_string()),
        }],
        usage: usage(resp),
    }
}
