//! State machine for reshaping native streamed chat events into OpenAI chunks.
//!
//! The [`StreamTranslator`] takes native events one at a time and emits the
//! chunks to send for each. A streamed reply ends with exactly one terminating
//! chunk: empty delta, non-null `finish_reason`.

use serde::Serialize;

use super::chat::{created_at, finish_reason, SYSTEM_FINGERPRINT};
use super::native_types::ChatResponse;
use super::openai_types::{
    ChatCompletionChunk, ChatCompletionChunkObject, ChatToolCallFunction, ChunkChoice, ChunkDelta,
    ChunkToolCall, CompletionChoice, CompletionChunk, TextCompletionObject,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Chat,
    Completion,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamChunk {
    Chat(ChatCompletionChunk),
    Completion(CompletionChunk),
}

impl StreamChunk {
    pub fn finish_reason(&self) -> Option<&str> {
        match self {
            Self::Chat(c) => c.choices.first().and_then(|ch| ch.finish_reason.as_deref()),
            Self::Completion(c) => c.choices.first().and_then(|ch| ch.finish_reason.as_deref()),
        }
    }
}

/// Translates native stream events into OpenAI chunks.
///
/// Usage:
///   let mut translator = StreamTranslator::new(StreamKind::Chat, id, "llama3");
///   for event in native_events {
///       for chunk in translator.process_event(&event) {
///           // send chunk as an SSE `data:` line
///       }
///   }
///   if let Some(last) = translator.finish() { /* send */ }
#[derive(Debug)]
pub struct StreamTranslator {
    kind: StreamKind,
    id: String,
    model: String,
    created: Option<i64>,
    role_sent: bool,
    tool_call_count: u32,
    finished: bool,
}

impl StreamTranslator {
    pub fn new(kind: StreamKind, id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            model: model.into(),
            created: None,
            role_sent: false,
            tool_call_count: 0,
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Process one native event, returning the chunks it produces.
    pub fn process_event(&mut self, event: &ChatResponse) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }

        if self.created.is_none() {
            self.created = Some(created_at(event));
        }
        if !event.model.is_empty() {
            self.model.clone_from(&event.model);
        }

        let mut chunks = Vec::new();

        // Indices run across the whole stream; clients merge deltas by index.
        let base = self.tool_call_count;
        let tool_calls = event
            .message
            .tool_calls
            .as_ref()
            .filter(|calls| !calls.is_empty())
            .map(|calls| {
                calls
                    .iter()
                    .enumerate()
                    .map(|(i, call)| ChunkToolCall {
                        index: base + i as u32,
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: call.function.name.clone(),
                            arguments: call.function.arguments.to_string(),
                        },
                    })
                    .collect::<Vec<_>>()
            });

        if let Some(calls) = &tool_calls {
            self.tool_call_count += calls.len() as u32;
        }

        if !event.message.content.is_empty() || tool_calls.is_some() {
            chunks.push(self.content_chunk(&event.message.content, tool_calls));
        }

        if event.done {
            let reason = finish_reason(event.done_reason.as_deref(), self.tool_call_count > 0);
            chunks.push(self.terminating_chunk(reason));
        }

        chunks
    }

    /// Close the stream if the native side never sent its final event.
    pub fn finish(&mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        let reason = finish_reason(None, self.tool_call_count > 0);
        Some(self.terminating_chunk(reason))
    }

    fn content_chunk(
        &mut self,
        content: &str,
        tool_calls: Option<Vec<ChunkToolCall>>,
    ) -> StreamChunk {
        match self.kind {
            StreamKind::Chat => {
                let role = if self.role_sent {
                    None
                } else {
                    self.role_sent = true;
                    Some("assistant".to_string())
                };
                let delta = ChunkDelta {
                    role,
                    content: Some(content.to_string()).filter(|c| !c.is_empty()),
                    tool_calls,
                };
                StreamChunk::Chat(self.chat_chunk(delta, None))
            }
            StreamKind::Completion => StreamChunk::Completion(self.completion_chunk(content, None)),
        }
    }

    fn terminating_chunk(&mut self, reason: &str) -> StreamChunk {
        self.finished = true;
        match self.kind {
            StreamKind::Chat => StreamChunk::Chat(
                self.chat_chunk(ChunkDelta::default(), Some(reason.to_string())),
            ),
            StreamKind::Completion => {
                StreamChunk::Completion(self.completion_chunk("", Some(reason.to_string())))
            }
        }
    }

    fn chat_chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatCompletionChunkObject::ChatCompletionChunk,
            created: self.created.unwrap_or_default(),
            model: self.model.clone(),
            system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    fn completion_chunk(&self, text: &str, finish_reason: Option<String>) -> CompletionChunk {
        CompletionChunk {
            id: self.id.clone(),
            object: TextCompletionObject::TextCompletion,
            created: self.created.unwrap_or_default(),
            model: self.model.clone(),
            system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
            choices: vec![CompletionChoice {
                text: text.to_string(),
                index: 0,
                logprobs: None,
                finish_reason,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::native_types::{self, Message};

    fn event(content: &str, done: bool) -> ChatResponse {
        ChatResponse {
            model: "llama3".to_string(),
            created_at: None,
            message: Message {
                role: "assistant".to_string(),
                content: content.to_string(),
                ..Default::default()
            },
            done,
            done_reason: done.then(|| "stop".to_string()),
            prompt_eval_count: None,
            eval_count: None,
        }
    }

    fn chat(chunk: &StreamChunk) -> &ChatCompletionChunk {
        match chunk {
            StreamChunk::Chat(c) => c,
            StreamChunk::Completion(_) => panic!("Expected chat chunk"),
        }
    }

    #[test]
    fn test_simple_chat_stream() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-1", "requested");

        let first = translator.process_event(&event("Hel", false));
        assert_eq!(first.len(), 1);
        let c = chat(&first[0]);
        assert_eq!(c.object, ChatCompletionChunkObject::ChatCompletionChunk);
        assert_eq!(c.model, "llama3");
        assert_eq!(c.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(c.choices[0].delta.content.as_deref(), Some("Hel"));
        assert!(c.choices[0].finish_reason.is_none());

        let second = translator.process_event(&event("lo!", false));
        assert_eq!(second.len(), 1);
        assert!(chat(&second[0]).choices[0].delta.role.is_none());

        let last = translator.process_event(&event("", true));
        assert_eq!(last.len(), 1);
        let c = chat(&last[0]);
        assert!(c.choices[0].delta.is_empty());
        assert_eq!(c.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(translator.is_finished());

        for chunk in first.iter().chain(&second).chain(&last) {
            assert_eq!(chat(chunk).id, "chatcmpl-1");
        }
    }

    #[test]
    fn test_empty_events_produce_nothing() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-2", "m");
        assert!(translator.process_event(&event("", false)).is_empty());
    }

    #[test]
    fn test_final_event_with_content_splits() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-3", "m");
        let mut last = event("bye", true);
        last.done_reason = Some("length".to_string());

        let chunks = translator.process_event(&last);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chat(&chunks[0]).choices[0].delta.content.as_deref(), Some("bye"));
        assert!(chunks[0].finish_reason().is_none());
        assert!(chat(&chunks[1]).choices[0].delta.is_empty());
        assert_eq!(chunks[1].finish_reason(), Some("length"));
    }

    #[test]
    fn test_events_after_finish_are_ignored() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-4", "m");
        let _ = translator.process_event(&event("", true));

        assert!(translator.process_event(&event("late", false)).is_empty());
        assert!(translator.finish().is_none());
    }

    #[test]
    fn test_finish_without_final_event() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-5", "m");
        let _ = translator.process_event(&event("partial", false));

        let last = translator.finish().unwrap();
        assert_eq!(last.finish_reason(), Some("stop"));
        assert!(translator.finish().is_none());
    }

    #[test]
    fn test_tool_call_stream() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-6", "m");
        let mut ev = event("", false);
        ev.message.tool_calls = Some(vec![native_types::ToolCall {
            function: native_types::ToolCallFunction {
                name: "search".to_string(),
                arguments: serde_json::json!({"q": "rust"}),
            },
        }]);

        let chunks = translator.process_event(&ev);
        assert_eq!(chunks.len(), 1);
        let calls = chat(&chunks[0]).choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[0].function.name, "search");

        let last = translator.process_event(&event("", true));
        assert_eq!(last[0].finish_reason(), Some("tool_calls"));
    }

    #[test]
    fn test_tool_call_indices_span_events() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-7", "m");
        let call = |name: &str| {
            let mut ev = event("", false);
            ev.message.tool_calls = Some(vec![native_types::ToolCall {
                function: native_types::ToolCallFunction {
                    name: name.to_string(),
                    arguments: serde_json::json!({}),
                },
            }]);
            ev
        };

        let first = translator.process_event(&call("first"));
        let second = translator.process_event(&call("second"));

        let a = &chat(&first[0]).choices[0].delta.tool_calls.as_ref().unwrap()[0];
        let b = &chat(&second[0]).choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_ne!(a.id, b.id);
        assert_eq!(b.function.name, "second");
    }

    #[test]
    fn test_completion_stream() {
        let mut translator = StreamTranslator::new(StreamKind::Completion, "cmpl-1", "m");

        let chunks = translator.process_event(&event("Once", false));
        let json = serde_json::to_value(&chunks[0]).unwrap();
        assert_eq!(json["object"], "text_completion");
        assert_eq!(json["choices"][0]["text"], "Once");
        assert!(json["choices"][0]["finish_reason"].is_null());

        let last = translator.process_event(&event("", true));
        let json = serde_json::to_value(&last[0]).unwrap();
        assert_eq!(json["choices"][0]["text"], "");
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_chunk_serializes_discriminator() {
        let mut translator = StreamTranslator::new(StreamKind::Chat, "chatcmpl-7", "m");
        let chunks = translator.process_event(&event("Hi", false));
        let json = serde_json::to_value(&chunks[0]).unwrap();

        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["id"], "chatcmpl-7");
        assert_eq!(json["choices"][0]["delta"]["content"], "Hi");
    }
}
