use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments.
#[derive(Clone, Debug, Parser)]
#[command(about)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// A missing file is not an error: every setting can also be given through `PUTTER_`-prefixed environment
    /// variables, such as `PUTTER_URL` or `PUTTER_ENCODER_METRIC`.
    #[arg(short, long, default_value = "/etc/putter/putter.yaml")]
    pub config: PathBuf,
}
