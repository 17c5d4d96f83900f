//! Interception points that put an OpenAI-shaped surface on native endpoints.
//!
//! Each middleware parses the inbound body against the OpenAI schema, swaps in
//! the equivalent native request, lets the wrapped native handler run, and then
//! reshapes whatever the handler produced. Streamed native replies (NDJSON) are
//! reshaped line by line into SSE chunks as the bytes arrive.
//!
//! ```ignore
//! Router::new().route(
//!     "/v1/chat/completions",
//!     post(native_chat).layer(middleware::from_fn(chat_middleware)),
//! )
//! ```

use std::convert::Infallible;

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, ShimError};
use crate::translate::native_types::{
    ChatResponse, EmbeddingResponse, ErrorBody, ListResponse, ShowRequest, ShowResponse,
};
use crate::translate::openai_types::{
    ChatCompletion, ChatCompletionRequest, Completion, CompletionRequest, EmbeddingList,
    EmbeddingRequest, EncodingFormat, ErrorResponse, ListCompletion, Model,
};
use crate::translate::streaming::{StreamChunk, StreamKind, StreamTranslator};
use crate::translate::{chat, completion, embedding, models};

/// Upper bound for inbound bodies and buffered native replies.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Reshapes a successful native reply for one capability.
pub trait Converter: Send + 'static {
    type Output: Serialize;

    /// Convert a complete native body.
    fn convert(&self, native_body: &[u8]) -> Result<Self::Output>;

    /// Translator for incremental native events, when the caller asked to stream.
    fn stream(&self) -> Option<StreamTranslator> {
        None
    }
}

struct ChatConverter {
    id: String,
    model: String,
    stream: bool,
}

impl Converter for ChatConverter {
    type Output = ChatCompletion;

    fn convert(&self, native_body: &[u8]) -> Result<ChatCompletion> {
        let resp: ChatResponse = parse_native(native_body)?;
        Ok(chat::from_native(&resp, &self.id, &self.model))
    }

    fn stream(&self) -> Option<StreamTranslator> {
        self.stream
            .then(|| StreamTranslator::new(StreamKind::Chat, self.id.clone(), self.model.clone()))
    }
}

struct CompletionConverter {
    id: String,
    model: String,
    stream: bool,
}

impl Converter for CompletionConverter {
    type Output = Completion;

    fn convert(&self, native_body: &[u8]) -> Result<Completion> {
        let resp: ChatResponse = parse_native(native_body)?;
        Ok(completion::from_native(&resp, &self.id, &self.model))
    }

    fn stream(&self) -> Option<StreamTranslator> {
        self.stream.then(|| {
            StreamTranslator::new(StreamKind::Completion, self.id.clone(), self.model.clone())
        })
    }
}

struct EmbeddingConverter {
    model: String,
    expected: usize,
    format: EncodingFormat,
}

impl Converter for EmbeddingConverter {
    type Output = EmbeddingList;

    fn convert(&self, native_body: &[u8]) -> Result<EmbeddingList> {
        let resp: EmbeddingResponse = parse_native(native_body)?;
        embedding::from_native(resp, self.expected, &self.model, self.format)
    }
}

struct ListConverter;

impl Converter for ListConverter {
    type Output = ListCompletion;

    fn convert(&self, native_body: &[u8]) -> Result<ListCompletion> {
        let resp: ListResponse = parse_native(native_body)?;
        Ok(models::list_from_native(&resp))
    }
}

struct RetrieveConverter {
    model: String,
}

impl Converter for RetrieveConverter {
    type Output = Model;

    fn convert(&self, native_body: &[u8]) -> Result<Model> {
        let resp: ShowResponse = parse_native(native_body)?;
        Ok(models::retrieve_from_native(&resp, &self.model))
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub async fn chat_middleware(req: Request, next: Next) -> Response {
    intercept(req, next, |body| {
        let req: ChatCompletionRequest = parse_inbound(body)?;
        let native = chat::to_native(&req)?;

        info!(
            model = %req.model,
            messages = req.messages.len(),
            stream = native.stream,
            "Chat completion"
        );

        let converter = ChatConverter {
            id: chat::completion_id(),
            model: req.model,
            stream: native.stream,
        };
        Ok((Some(serde_json::to_vec(&native)?), converter))
    })
    .await
}

pub async fn completions_middleware(req: Request, next: Next) -> Response {
    intercept(req, next, |body| {
        let req: CompletionRequest = parse_inbound(body)?;
        let native = completion::to_native(&req);

        info!(model = %req.model, stream = native.stream, "Text completion");

        let converter = CompletionConverter {
            id: completion::completion_id(),
            model: req.model,
            stream: native.stream,
        };
        Ok((Some(serde_json::to_vec(&native)?), converter))
    })
    .await
}

pub async fn embeddings_middleware(req: Request, next: Next) -> Response {
    intercept(req, next, |body| {
        let req: EmbeddingRequest = parse_inbound(body)?;
        let (native, expected) = embedding::to_native(&req)?;

        info!(model = %req.model, inputs = expected, "Embeddings");

        let converter = EmbeddingConverter {
            model: req.model,
            expected,
            format: req.encoding_format,
        };
        Ok((Some(serde_json::to_vec(&native)?), converter))
    })
    .await
}

pub async fn list_middleware(req: Request, next: Next) -> Response {
    intercept(req, next, |_| Ok((None, ListConverter))).await
}

/// Wraps the native show endpoint; the model name comes from the `:model` path segment.
pub async fn retrieve_middleware(Path(model): Path<String>, req: Request, next: Next) -> Response {
    intercept(req, next, move |_| {
        let native = ShowRequest {
            model: model.clone(),
        };
        Ok((Some(serde_json::to_vec(&native)?), RetrieveConverter { model }))
    })
    .await
}

// ---------------------------------------------------------------------------
// Shared scaffolding
// ---------------------------------------------------------------------------

/// Native request body to substitute (`None` keeps the inbound body) and the
/// converter for the native reply.
pub type Rewrite<C> = (Option<Vec<u8>>, C);

/// Run `rewrite` on the inbound body, call the native handler, reshape its reply.
///
/// A `rewrite` failure short-circuits with an error response; the native
/// handler is not called.
pub async fn intercept<C, F>(req: Request, next: Next, rewrite: F) -> Response
where
    C: Converter,
    F: FnOnce(&Bytes) -> Result<Rewrite<C>> + Send,
{
    let (mut parts, body) = req.into_parts();

    let inbound = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            return ShimError::invalid_request(format!("failed to read request body: {e}"))
                .into_response();
        }
    };

    let (native_body, converter) = match rewrite(&inbound) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %parts.uri.path(), error = %e, "Rejected before native call");
            return e.into_response();
        }
    };

    let body = match native_body {
        Some(native) => {
            parts.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(native.len()));
            Body::from(native)
        }
        None => Body::from(inbound),
    };

    let response = next.run(Request::from_parts(parts, body)).await;
    reshape(response, converter).await
}

async fn reshape<C: Converter>(response: Response, converter: C) -> Response {
    let (parts, body) = response.into_parts();
    let status = parts.status;

    if !status.is_success() {
        let bytes = to_bytes(body, MAX_BODY_BYTES).await.unwrap_or_default();
        let err = native_error(status, &bytes);
        warn!(status = status.as_u16(), error = %err.error, "Native endpoint failed");
        return (status, Json(err)).into_response();
    }

    if let Some(translator) = converter.stream() {
        return Sse::new(translate_stream(body, translator))
            .keep_alive(KeepAlive::default())
            .into_response();
    }

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            return ShimError::conversion(format!("failed to read native response: {e}"))
                .into_response();
        }
    };

    match converter.convert(&bytes) {
        Ok(out) => (status, Json(out)).into_response(),
        Err(e) => {
            warn!(error = %e, "Native response could not be converted");
            e.into_response()
        }
    }
}

/// Reshape a native error body, falling back to its raw text or the status reason.
pub fn native_error(status: StatusCode, body: &[u8]) -> ErrorResponse {
    if let Ok(err) = serde_json::from_slice::<ErrorBody>(body) {
        return ErrorResponse::new(err.error);
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        ErrorResponse::new(status.canonical_reason().unwrap_or("native endpoint error"))
    } else {
        ErrorResponse::new(text)
    }
}

fn parse_inbound<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ShimError::invalid_request(format!("invalid request body: {e}")))
}

fn parse_native<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ShimError::conversion(format!("unreadable native response: {e}")))
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

enum Line {
    Chunks(Vec<StreamChunk>),
    Error(ErrorResponse),
    Skip,
}

fn translate_line(line: &[u8], translator: &mut StreamTranslator) -> Line {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Line::Skip;
    }

    if let Ok(err) = serde_json::from_str::<ErrorBody>(text) {
        return Line::Error(ErrorResponse::new(err.error));
    }

    match serde_json::from_str::<ChatResponse>(text) {
        Ok(event) => Line::Chunks(translator.process_event(&event)),
        Err(e) => {
            debug!(error = %e, "Skipping unparseable native event");
            Line::Skip
        }
    }
}

fn sse_event<T: Serialize>(value: &T) -> Option<Event> {
    serde_json::to_string(value)
        .ok()
        .map(|json| Event::default().data(json))
}

/// Reshape a native NDJSON body into SSE events, ending with `[DONE]`.
///
/// Native bytes are consumed only as fast as the caller reads; dropping the
/// returned stream drops the native body with it.
pub fn translate_stream(
    body: Body,
    mut translator: StreamTranslator,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut data = body.into_data_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut failed = false;

        'read: while let Some(chunk) = data.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Native stream broke off");
                    let err = ErrorResponse::new(format!("native stream interrupted: {e}"));
                    if let Some(event) = sse_event(&err) {
                        yield Ok(event);
                    }
                    failed = true;
                    break;
                }
            };

            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match translate_line(&line, &mut translator) {
                    Line::Chunks(chunks) => {
                        for chunk in &chunks {
                            if let Some(event) = sse_event(chunk) {
                                yield Ok(event);
                            }
                        }
                    }
                    Line::Error(err) => {
                        if let Some(event) = sse_event(&err) {
                            yield Ok(event);
                        }
                        failed = true;
                        break 'read;
                    }
                    Line::Skip => {}
                }
            }

            if buffer.len() > MAX_BODY_BYTES {
                warn!(buffered = buffer.len(), "Native stream line exceeds size limit");
                let err = ErrorResponse::new(format!(
                    "native stream line exceeds {MAX_BODY_BYTES} bytes"
                ));
                if let Some(event) = sse_event(&err) {
                    yield Ok(event);
                }
                failed = true;
                break;
            }
        }

        if !failed && !buffer.is_empty() {
            match translate_line(&buffer, &mut translator) {
                Line::Chunks(chunks) => {
                    for chunk in &chunks {
                        if let Some(event) = sse_event(chunk) {
                            yield Ok(event);
                        }
                    }
                }
                Line::Error(err) => {
                    if let Some(event) = sse_event(&err) {
                        yield Ok(event);
                    }
                    failed = true;
                }
                Line::Skip => {}
            }
        }

        if !failed {
            if let Some(last) = translator.finish() {
                if let Some(event) = sse_event(&last) {
                    yield Ok(event);
                }
            }
        }

        debug!(id = translator.id(), "Stream completed");
        yield Ok(Event::default().data("[DONE]"));
    }
}
