//! Common helpers shared by the putter crates.
#![deny(missing_docs)]

pub mod deser;
pub mod task;
