//! Component implementations.
//!
//! The pieces of the OpenTSDB shipping pipeline: the point encoder, the batching HTTP destination, and the event source
//! used by the standalone binary.
#![deny(missing_docs)]

pub mod destinations;
pub mod encoders;
pub mod sources;
