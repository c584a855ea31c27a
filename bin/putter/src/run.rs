use std::path::Path;

use futures::{future, StreamExt as _};
use putter_components::{
    destinations::opentsdb::{OpenTsdbConfiguration, OpenTsdbOutput, Shipper},
    encoders::opentsdb::{OpenTsdbEncoder, OpenTsdbEncoderConfiguration},
    sources::ndjson::ndjson_events,
};
use putter_config::{ConfigurationLoader, GenericConfiguration};
use putter_error::{ErrorContext as _, GenericError};
use tokio::io::{stdin, BufReader};
use tracing::{info, warn};

const ENV_PREFIX: &str = "PUTTER";

/// Loads the configuration file, if present, with environment variables layered on top.
pub fn load_configuration(path: &Path) -> Result<GenericConfiguration, GenericError> {
    let configuration = ConfigurationLoader::default()
        .try_from_yaml(path)
        .from_environment(ENV_PREFIX)
        .error_context("Environment variables could not be read.")?
        .into_generic();

    Ok(configuration)
}

/// Ships events read from standard input until input ends or SIGINT is received.
pub async fn run(configuration: GenericConfiguration) -> Result<(), GenericError> {
    info!(process_id = std::process::id(), "putter starting...");

    let encoder_config = OpenTsdbEncoderConfiguration::from_configuration(&configuration)
        .error_context("Failed to load encoder configuration.")?;
    let encoder = OpenTsdbEncoder::from_configuration(encoder_config).error_context("Invalid encoder configuration.")?;

    let shipper_config = OpenTsdbConfiguration::from_configuration(&configuration)
        .error_context("Failed to load OpenTSDB destination configuration.")?;
    let shipper = Shipper::from_config(shipper_config).error_context("Failed to create OpenTSDB destination.")?;

    let events = ndjson_events(BufReader::new(stdin())).take_until(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down..."),
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGINT. Shipping until input ends.");
                future::pending::<()>().await;
            }
        }
    });

    OpenTsdbOutput::new(encoder, shipper).run(events).await
}
