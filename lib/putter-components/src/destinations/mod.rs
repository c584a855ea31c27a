//! Destination implementations.

pub mod opentsdb;
