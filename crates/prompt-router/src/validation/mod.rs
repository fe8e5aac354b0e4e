//! Request payload validation.

pub mod schema;

pub use schema::{PromptRequest, SchemaValidator};
