//! Model catalog and single-model descriptors.

use chrono::{DateTime, Utc};

use super::native_types::{ListResponse, ShowResponse};
use super::openai_types::{ListCompletion, ListObject, Model, ModelObject};

const DEFAULT_OWNER: &str = "library";

/// Map the native catalog into a model list, keeping the native order.
pub fn list_from_native(resp: &ListResponse) -> ListCompletion {
    let data = resp
        .models
        .iter()
        .map(|m| Model {
            id: m.name.clone(),
            object: ModelObject::Model,
            created: unix_seconds(m.modified_at),
            owned_by: owner(&m.name),
        })
        .collect();

    ListCompletion {
        object: ListObject::List,
        data,
    }
}

/// Build the descriptor for `requested`, the name taken from the request path.
/// The native payload may not carry a name at all, so it is never consulted for the id.
pub fn retrieve_from_native(resp: &ShowResponse, requested: &str) -> Model {
    Model {
        id: requested.to_string(),
        object: ModelObject::Model,
        created: unix_seconds(resp.modified_at),
        owned_by: owner(requested),
    }
}

fn unix_seconds(t: Option<DateTime<Utc>>) -> i64 {
    t.map(|t| t.timestamp()).unwrap_or_default()
}

/// Namespace of a model name such as `registry.example.com/acme/llama:7b`.
fn owner(name: &str) -> String {
    let without_tag = match name.rsplit_once(':') {
        Some((base, tag)) if !tag.contains('/') => base,
        _ => name,
    };

    let mut segments = without_tag.rsplit('/');
    segments.next();
    segments
        .next()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_OWNER)
        .to_string()
}
