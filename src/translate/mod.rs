//! API translation between the OpenAI schema and the native model server schema.
//!
//! The core of the shim: one converter per capability, each a set of pure
//! functions over in-memory values (no I/O, no shared state).

pub mod chat;
pub mod completion;
pub mod embedding;
pub mod models;
pub mod native_types;
pub mod openai_types;
pub mod streaming;
