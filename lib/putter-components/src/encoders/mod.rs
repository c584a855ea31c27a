//! Encoder implementations.

pub mod opentsdb;
