//! Scribe graphql - generated query surface and HTTP server.

pub mod entity_query;
pub mod server;

pub use entity_query::build_schema;
pub use server::{serve_with_shutdown, ServerConfig};
