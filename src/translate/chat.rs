//! Translate chat completion requests into native chat requests and native
//! chat replies back into `ChatCompletion`s.
//!
//! Both directions are pure: the caller supplies the response id so that a
//! non-streamed reply and every chunk of a streamed one can share it.

use super::native_types::{self, ChatRequest, ChatResponse, Options};
use super::openai_types::{
    ChatCompletion, ChatCompletionObject, ChatCompletionRequest, ChatContent, ChatMessage,
    ChatToolCall, ChatToolCallFunction, Choice, ChoiceMessage, ContentPart, StopSequences, Usage,
};
use crate::error::{Result, ShimError};

pub const SYSTEM_FINGERPRINT: &str = "fp_native";

/// Fresh id for a chat completion and all of its chunks.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Translate a chat completion request into a native chat request.
///
/// # Errors
/// Returns `ShimError::InvalidRequest` for an empty message list, image parts
/// that are not base64 data URIs, or tool call arguments that are not JSON.
pub fn to_native(req: &ChatCompletionRequest) -> Result<ChatRequest> {
    if req.messages.is_empty() {
        return Err(ShimError::invalid_request("messages must not be empty"));
    }

    let messages = req
        .messages
        .iter()
        .map(translate_message)
        .collect::<Result<Vec<_>>>()?;

    let format = req
        .response_format
        .as_ref()
        .filter(|f| f.format_type == "json_object")
        .map(|_| "json".to_string());

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| native_types::Tool {
                tool_type: t.tool_type.clone(),
                function: native_types::ToolFunction {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                },
            })
            .collect()
    });

    let options = sampling_options(
        req.temperature,
        req.top_p,
        req.max_tokens,
        req.seed,
        req.stop.clone(),
        req.frequency_penalty,
        req.presence_penalty,
    );

    Ok(ChatRequest {
        model: req.model.clone(),
        messages,
        stream: req.stream.unwrap_or(false),
        format,
        options,
        tools,
    })
}

/// Collect the sampling parameters shared by chat and text completions.
pub(crate) fn sampling_options(
    temperature: Option<f64>,
    top_p: Option<f64>,
    max_tokens: Option<u64>,
    seed: Option<i64>,
    stop: Option<StopSequences>,
    frequency_penalty: Option<f64>,
    presence_penalty: Option<f64>,
) -> Option<Options> {
    let options = Options {
        temperature,
        top_p,
        num_predict: max_tokens,
        seed,
        stop: stop.map(StopSequences::into_vec),
        frequency_penalty,
        presence_penalty,
    };

    if options.is_empty() {
        None
    } else {
        Some(options)
    }
}

fn translate_message(msg: &ChatMessage) -> Result<native_types::Message> {
    let mut texts: Vec<&str> = Vec::new();
    let mut images: Vec<String> = Vec::new();

    match &msg.content {
        Some(ChatContent::Text(text)) => texts.push(text),
        Some(ChatContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => texts.push(text),
                    ContentPart::ImageUrl { image_url } => {
                        images.push(decode_data_uri(&image_url.url)?);
                    }
                }
            }
        }
        None => {}
    }

    let tool_calls = msg
        .tool_calls
        .as_ref()
        .map(|calls| calls.iter().map(translate_tool_call).collect::<Result<Vec<_>>>())
        .transpose()?;

    Ok(native_types::Message {
        role: msg.role.clone(),
        content: texts.join("\n"),
        images: if images.is_empty() { None } else { Some(images) },
        tool_calls,
    })
}

/// Strip the `data:<mime>;base64,` prefix; the native side takes raw base64.
fn decode_data_uri(url: &str) -> Result<String> {
    url.strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, data)| data.to_string())
        .filter(|data| !data.is_empty())
        .ok_or_else(|| ShimError::invalid_request("invalid image input"))
}

fn translate_tool_call(call: &ChatToolCall) -> Result<native_types::ToolCall> {
    let arguments = serde_json::from_str(&call.function.arguments).map_err(|e| {
        ShimError::invalid_request(format!(
            "invalid arguments for tool call '{}': {}",
            call.function.name, e
        ))
    })?;

    Ok(native_types::ToolCall {
        function: native_types::ToolCallFunction {
            name: call.function.name.clone(),
            arguments,
        },
    })
}

/// Translate a native chat reply into a `ChatCompletion` with a single choice.
pub fn from_native(resp: &ChatResponse, id: &str, fallback_model: &str) -> ChatCompletion {
    let tool_calls = resp
        .message
        .tool_calls
        .as_ref()
        .filter(|calls| !calls.is_empty())
        .map(|calls| calls.iter().map(tool_call_from_native).collect::<Vec<_>>());

    let finish_reason = finish_reason(resp.done_reason.as_deref(), tool_calls.is_some());

    ChatCompletion {
        id: id.to_string(),
        object: ChatCompletionObject::ChatCompletion,
        created: created_at(resp),
        model: response_model(resp, fallback_model),
        system_fingerprint: SYSTEM_FINGERPRINT.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: resp.message.content.clone(),
                tool_calls,
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: usage(resp),
    }
}

fn tool_call_from_native(call: &native_types::ToolCall) -> ChatToolCall {
    ChatToolCall {
        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        call_type: "function".to_string(),
        function: ChatToolCallFunction {
            name: call.function.name.clone(),
            arguments: call.function.arguments.to_string(),
        },
    }
}

/// Map the native completion signal onto an OpenAI `finish_reason`.
pub fn finish_reason(done_reason: Option<&str>, has_tool_calls: bool) -> &'static str {
    match done_reason {
        Some("length") => "length",
        _ if has_tool_calls => "tool_calls",
        _ => "stop",
    }
}

/// Unix seconds of the native creation time; 0 when the native side sent none.
pub(crate) fn created_at(resp: &ChatResponse) -> i64 {
    resp.created_at.map(|t| t.timestamp()).unwrap_or_default()
}

pub(crate) fn response_model(resp: &ChatResponse, fallback: &str) -> String {
    if resp.model.is_empty() {
        fallback.to_string()
    } else {
        resp.model.clone()
    }
}

pub(crate) fn usage(resp: &ChatResponse) -> Usage {
    Usage::new(
        resp.prompt_eval_count.unwrap_or(0),
        resp.eval_count.unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::{ImageUrlDetail, ResponseFormat};
    use chrono::{TimeZone, Utc};

    fn user(content: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Text(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "test-model".to_string(),
            messages,
            stream: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            seed: None,
            stop: None,
            frequency_penalty: None,
            presence_penalty: None,
            response_format: None,
            tools: None,
            user: None,
        }
    }

    fn reply(content: &str) -> ChatResponse {
        ChatResponse {
            model: "test-model".to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2024, 6, 17, 13, 45, 0).unwrap()),
            message: native_types::Message {
                role: "assistant".to_string(),
                content: content.to_string(),
                images: None,
                tool_calls: None,
            },
            done: true,
            done_reason: Some("stop".to_string()),
            prompt_eval_count: Some(7),
            eval_count: Some(3),
        }
    }

    #[test]
    fn test_simple_request() {
        let native = to_native(&request(vec![user("Hello")])).unwrap();

        assert_eq!(native.model, "test-model");
        assert_eq!(native.messages.len(), 1);
        assert_eq!(native.messages[0].role, "user");
        assert_eq!(native.messages[0].content, "Hello");
        assert!(!native.stream);
        assert!(native.options.is_none());
        assert!(native.format.is_none());
    }

    #[test]
    fn test_empty_messages_rejected() {
        let err = to_native(&request(Vec::new())).unwrap_err();
        assert!(matches!(err, ShimError::InvalidRequest { .. }));
    }

    #[test]
    fn test_sampling_options_mapped() {
        let mut req = request(vec![user("Hi")]);
        req.temperature = Some(0.5);
        req.top_p = Some(0.9);
        req.max_tokens = Some(64);
        req.seed = Some(42);
        req.stop = Some(StopSequences::One("\n".to_string()));
        req.stream = Some(true);
        req.response_format = Some(ResponseFormat {
            format_type: "json_object".to_string(),
        });

        let native = to_native(&req).unwrap();
        let options = native.options.unwrap();

        assert!(native.stream);
        assert_eq!(native.format.as_deref(), Some("json"));
        assert_eq!(options.temperature, Some(0.5));
        assert_eq!(options.top_p, Some(0.9));
        assert_eq!(options.num_predict, Some(64));
        assert_eq!(options.seed, Some(42));
        assert_eq!(options.stop, Some(vec!["\n".to_string()]));
    }

    #[test]
    fn test_multipart_content_with_image() {
        let msg = ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Parts(vec![
                ContentPart::Text {
                    text: "What is this?".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: "data:image/png;base64,iVBORw0KGgo=".to_string(),
                        detail: None,
                    },
                },
            ])),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };

        let native = to_native(&request(vec![msg])).unwrap();

        assert_eq!(native.messages[0].content, "What is this?");
        assert_eq!(
            native.messages[0].images,
            Some(vec!["iVBORw0KGgo=".to_string()])
        );
    }

    #[test]
    fn test_remote_image_rejected() {
        let msg = ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: "https://example.com/cat.png".to_string(),
                    detail: None,
                },
            }])),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };

        let err = to_native(&request(vec![msg])).unwrap_err();
        assert_eq!(err.to_string(), "invalid image input");
    }

    #[test]
    fn test_assistant_tool_call_arguments_parsed() {
        let msg = ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![ChatToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: "get_weather".to_string(),
                    arguments: "{\"city\":\"London\"}".to_string(),
                },
            }]),
            tool_call_id: None,
            name: None,
        };

        let native = to_native(&request(vec![user("Weather?"), msg])).unwrap();
        let calls = native.messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments["city"], "London");
    }

    #[test]
    fn test_simple_response() {
        let completion = from_native(&reply("Hello!"), "chatcmpl-1", "fallback");

        assert_eq!(completion.object, ChatCompletionObject::ChatCompletion);
        assert_eq!(completion.id, "chatcmpl-1");
        assert_eq!(completion.model, "test-model");
        assert_eq!(completion.created, 1_718_631_900);
        assert_eq!(completion.choices.len(), 1);
        assert_eq!(completion.choices[0].message.role, "assistant");
        assert_eq!(completion.choices[0].message.content, "Hello!");
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.usage, Usage::new(7, 3));
        assert_eq!(completion.usage.total_tokens, 10);
    }

    #[test]
    fn test_response_without_metadata_uses_defaults() {
        let resp = ChatResponse {
            message: native_types::Message {
                role: "assistant".to_string(),
                content: "Hi".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let completion = from_native(&resp, "chatcmpl-2", "requested-model");
        assert_eq!(completion.model, "requested-model");
        assert_eq!(completion.created, 0);
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_tool_call_response() {
        let mut resp = reply("");
        resp.message.tool_calls = Some(vec![native_types::ToolCall {
            function: native_types::ToolCallFunction {
                name: "get_weather".to_string(),
                arguments: serde_json::json!({"city": "London"}),
            },
        }]);

        let completion = from_native(&resp, "chatcmpl-3", "m");
        let calls = completion.choices[0].message.tool_calls.as_ref().unwrap();

        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(calls[0].call_type, "function");
        assert!(calls[0].id.starts_with("call_"));
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["city"], "London");
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(finish_reason(Some("stop"), false), "stop");
        assert_eq!(finish_reason(Some("length"), false), "length");
        assert_eq!(finish_reason(Some("length"), true), "length");
        assert_eq!(finish_reason(None, true), "tool_calls");
        assert_eq!(finish_reason(None, false), "stop");
    }
}
