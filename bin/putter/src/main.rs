//! Standalone OpenTSDB shipper.
//!
//! Reads events as newline-delimited JSON from standard input, encodes them into OpenTSDB data points, and ships them
//! in batches to an OpenTSDB server until input ends or the process is interrupted.

#![deny(missing_docs)]

use clap::Parser as _;
use putter_app::prelude::*;
use putter_error::GenericError;
use tracing::{error, info};

mod config;
use self::config::Cli;

mod run;
use self::run::{load_configuration, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = match load_configuration(&cli.config) {
        Ok(configuration) => configuration,
        Err(e) => fatal_and_exit(format!("failed to load configuration: {}", e)),
    };

    let logging_config = match LoggingConfiguration::from_configuration(&configuration) {
        Ok(logging_config) => logging_config,
        Err(e) => fatal_and_exit(format!("failed to load logging configuration: {}", e)),
    };
    if let Err(e) = initialize_logging(&logging_config) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    match run(configuration).await {
        Ok(()) => info!("putter stopped."),
        Err(e) => exit_with_error(e),
    }
}

fn exit_with_error(e: GenericError) -> ! {
    error!("{:?}", e);
    std::process::exit(1);
}
