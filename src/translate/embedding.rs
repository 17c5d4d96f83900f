//! Single and batch embeddings.
//!
//! The native endpoint answers with either one vector or a batch; both are
//! normalized into an ordered list whose length must match the input.

use base64::Engine;

use super::native_types::{self, EmbeddingResponse};
use super::openai_types::{
    Embedding, EmbeddingInput, EmbeddingList, EmbeddingObject, EmbeddingRequest, EmbeddingVector,
    EncodingFormat, ListObject,
};
use crate::error::{Result, ShimError};

/// Translate an embedding request, returning the native request and the
/// number of vectors the native reply must contain.
///
/// # Errors
/// Returns `ShimError::InvalidRequest` for an empty string, an empty list, or
/// a requested `dimensions`.
pub fn to_native(req: &EmbeddingRequest) -> Result<(native_types::EmbeddingRequest, usize)> {
    if let Some(dimensions) = req.dimensions {
        return Err(ShimError::invalid_request(format!(
            "dimensions is not supported (requested {dimensions})"
        )));
    }

    match &req.input {
        EmbeddingInput::Single(text) => {
            if text.is_empty() {
                return Err(ShimError::invalid_request("invalid input: empty string"));
            }
            Ok((
                native_types::EmbeddingRequest {
                    model: req.model.clone(),
                    prompt: Some(text.clone()),
                    prompt_batch: None,
                },
                1,
            ))
        }
        EmbeddingInput::Batch(texts) => {
            if texts.is_empty() {
                return Err(ShimError::invalid_request("invalid input: empty list"));
            }
            Ok((
                native_types::EmbeddingRequest {
                    model: req.model.clone(),
                    prompt: None,
                    prompt_batch: Some(texts.clone()),
                },
                texts.len(),
            ))
        }
    }
}

/// Normalize the native reply into an `EmbeddingList`.
///
/// # Errors
/// Returns `ShimError::Conversion` when the native side returned a different
/// number of vectors than were requested.
pub fn from_native(
    resp: EmbeddingResponse,
    expected: usize,
    model: &str,
    format: EncodingFormat,
) -> Result<EmbeddingList> {
    let vectors = match (resp.embedding_batch, resp.embedding) {
        (Some(batch), _) if !batch.is_empty() => batch,
        (_, Some(single)) if !single.is_empty() => vec![single],
        _ => Vec::new(),
    };

    if vectors.len() != expected {
        return Err(ShimError::conversion(format!(
            "native endpoint returned {} embeddings for {} inputs",
            vectors.len(),
            expected
        )));
    }

    let data = vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| Embedding {
            object: EmbeddingObject::Embedding,
            index,
            embedding: encode(embedding, format),
        })
        .collect();

    Ok(EmbeddingList {
        object: ListObject::List,
        data,
        model: model.to_string(),
    })
}

fn encode(vector: Vec<f64>, format: EncodingFormat) -> EmbeddingVector {
    match format {
        EncodingFormat::Float => EmbeddingVector::Float(vector),
        EncodingFormat::Base64 => {
            let bytes: Vec<u8> = vector
                .iter()
                .flat_map(|v| (*v as f32).to_le_bytes())
                .collect();
            EmbeddingVector::Base64(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}
