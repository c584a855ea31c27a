//! Source implementations.

pub mod ndjson;
