//! Application bootstrap primitives.
//!
//! Provides what a putter host needs before it starts shipping: logging initialization and fatal error reporting.
#![deny(missing_docs)]

pub mod logging;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration};
}
