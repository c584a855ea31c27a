//! I/O primitives for shipping payloads: compression and HTTP transport.
#![deny(missing_docs)]

pub mod compression;
pub mod net;
