//! Logging.

use putter_error::GenericError;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

mod layer;
use self::layer::build_formatting_layer;

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Events are filtered by `log_level` and written to standard error, either as JSON or in the pipe-delimited human
/// format depending on `log_format_json`. Events emitted through the `log` crate are captured as well.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), GenericError> {
    tracing_subscriber::registry()
        .with(config.log_level.as_env_filter())
        .with(build_formatting_layer(config, std::io::stderr))
        .try_init()?;

    Ok(())
}
