// Library root: re-exports all modules so the CLI and integration tests can
// access the crate's public API.

pub mod aggregate;
pub mod config;
pub mod form;
pub mod ingest;
pub mod normalize;
pub mod opponent;
pub mod pipeline;
pub mod projector;
pub mod table;
