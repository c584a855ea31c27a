//! Network primitives.

pub mod client;
