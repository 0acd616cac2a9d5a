//! HTTP API: routes and handlers.
//!
//! The orchestrator layer stays thin: parse input, check credentials,
//! dispatch to the query service or the ingest queue, translate errors to
//! status codes. Business logic lives in the components, not here.

/// Request handlers.
pub mod handlers;
/// Route table.
pub mod routes;
