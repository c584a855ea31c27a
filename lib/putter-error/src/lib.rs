//! Error primitives shared across the workspace.
//!
//! Most fallible paths in the shipper only need to report what went wrong and carry some context upwards, so they use
//! [`GenericError`]. Paths where callers branch on the failure (decoding, configuration) define their own typed errors
//! with `snafu` and convert into [`GenericError`] at the edges.
#![deny(missing_docs)]

use std::fmt::Display;

/// A type-erased error.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments (same order as `std::format!`), or a value implementing
/// `Debug` and `Display`. When given an existing `std::error::Error`, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

// Wraps `anyhow::Context` so the extension methods don't collide with `snafu::ResultExt` in modules using both.
/// Extension trait for attaching context to fallible results.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with context that is only built if an error occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prepended_to_chain() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("connection refused"));
        let err = result.error_context("Failed to flush batch.").unwrap_err();

        assert_eq!(err.to_string(), "Failed to flush batch.");
        assert_eq!(err.root_cause().to_string(), "connection refused");
    }

    #[test]
    fn lazy_context_only_evaluated_on_error() {
        let result: Result<u32, std::io::Error> = Ok(7);
        let value = result
            .with_error_context(|| -> String { panic!("context should not be built") })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn macro_formats_arguments() {
        let err = generic_error!("queue capacity must be non-zero, got {}", 0);
        assert_eq!(err.to_string(), "queue capacity must be non-zero, got 0");
    }
}
