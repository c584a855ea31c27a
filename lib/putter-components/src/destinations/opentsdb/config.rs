use std::{num::NonZeroUsize, time::Duration};

use putter_config::GenericConfiguration;
use putter_error::GenericError;
use serde::Deserialize;

const fn default_log_msg_ch_size() -> usize {
    10_000
}

const fn default_tsdb_writing_size() -> usize {
    20
}

fn default_tsdb_writer_count() -> usize {
    available_parallelism()
}

const fn default_tsdb_write_timeout_secs() -> u64 {
    5
}

fn default_url() -> String {
    "127.0.0.1:4242".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    60
}

const fn default_requeue_delay_ms() -> u64 {
    5000
}

const fn default_idle_connection_reset_secs() -> u64 {
    300
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// OpenTSDB destination configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct OpenTsdbConfiguration {
    /// Capacity of the ingestion queue, in fragments.
    ///
    /// Producers wait while the queue is full.
    ///
    /// Defaults to 10000.
    #[serde(default = "default_log_msg_ch_size", alias = "LogMsgChSize")]
    pub log_msg_ch_size: usize,

    /// Maximum number of fragments per request.
    ///
    /// Defaults to 20.
    #[serde(default = "default_tsdb_writing_size", alias = "TsdbWritingSize")]
    pub tsdb_writing_size: usize,

    /// Number of concurrent writers.
    ///
    /// Zero means one writer per available CPU, which is also the default.
    #[serde(default = "default_tsdb_writer_count", alias = "TsdbWriterCount")]
    pub tsdb_writer_count: usize,

    /// Maximum age of a batch before it is sent, in seconds.
    ///
    /// Defaults to 5 seconds.
    #[serde(
        default = "default_tsdb_write_timeout_secs",
        rename = "tsdb_write_timeout",
        alias = "TsdbWriteTimeout"
    )]
    pub tsdb_write_timeout_secs: u64,

    /// Base URL of the OpenTSDB server.
    ///
    /// The scheme defaults to `http` and the host to `localhost`; the path is always `/api/put`.
    ///
    /// Defaults to `127.0.0.1:4242`.
    #[serde(default = "default_url", alias = "Url")]
    pub url: String,

    /// Overall timeout for a single request, in seconds.
    ///
    /// Defaults to 60 seconds.
    #[serde(default = "default_request_timeout_secs", rename = "request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay between fragments when a failed batch is put back on the queue, in milliseconds.
    ///
    /// Defaults to 5000 milliseconds.
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,

    /// Interval after which pooled connections are discarded, in seconds.
    ///
    /// Zero disables resetting. Defaults to 300 seconds.
    #[serde(default = "default_idle_connection_reset_secs", rename = "idle_connection_reset")]
    pub idle_connection_reset_secs: u64,
}

impl OpenTsdbConfiguration {
    /// Creates a new `OpenTsdbConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized, an error will be returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Returns the number of writers to run.
    pub fn writer_count(&self) -> usize {
        if self.tsdb_writer_count == 0 {
            available_parallelism()
        } else {
            self.tsdb_writer_count
        }
    }

    /// Returns the maximum age of a batch.
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.tsdb_write_timeout_secs)
    }

    /// Returns the per-request timeout.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the delay between requeued fragments.
    pub const fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    /// Returns the connection reset interval.
    pub const fn idle_connection_reset(&self) -> Duration {
        Duration::from_secs(self.idle_connection_reset_secs)
    }
}

impl Default for OpenTsdbConfiguration {
    fn default() -> Self {
        Self {
            log_msg_ch_size: default_log_msg_ch_size(),
            tsdb_writing_size: default_tsdb_writing_size(),
            tsdb_writer_count: default_tsdb_writer_count(),
            tsdb_write_timeout_secs: default_tsdb_write_timeout_secs(),
            url: default_url(),
            request_timeout_secs: default_request_timeout_secs(),
            requeue_delay_ms: default_requeue_delay_ms(),
            idle_connection_reset_secs: default_idle_connection_reset_secs(),
        }
    }
}
