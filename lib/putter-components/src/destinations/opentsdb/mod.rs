//! OpenTSDB destination.
//!
//! Fragments are pushed onto a bounded ingestion queue and drained by a pool of writers. Each writer accumulates
//! fragments into a batch and sends it to the server's `/api/put` endpoint as a gzip-compressed JSON array once the
//! batch is full or has aged past the write timeout. A batch is delivered when the server answers `204 No Content`;
//! anything else puts its fragments back at the tail of the queue, so delivery is at-least-once.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use http::{Request, Response, Uri};
use http_body::Body;
use http_body_util::Full;
use putter_common::task::JoinSetExt as _;
use putter_error::GenericError;
use putter_io::net::client::http::{HttpClient, ResetHttpClient};
use snafu::{ResultExt as _, Snafu};
use tokio::{
    pin,
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tower::{BoxError, Service};
use tracing::{debug, error, info};

use crate::encoders::opentsdb::{Event, Fragment, OpenTsdbEncoder};

mod config;
pub use self::config::OpenTsdbConfiguration;

mod endpoint;
pub use self::endpoint::{resolve_put_endpoint, EndpointError};

mod request;

mod telemetry;
use self::telemetry::ShipperTelemetry;

mod worker;
use self::worker::Writer;

/// An error from the OpenTSDB destination.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ShipperError {
    /// The configuration is not usable.
    #[snafu(display("Invalid OpenTSDB destination configuration: {}", reason))]
    InvalidConfiguration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The configured URL could not be resolved.
    #[snafu(display("Invalid OpenTSDB endpoint: {}", source))]
    Endpoint {
        /// Error source.
        source: EndpointError,
    },

    /// The HTTP client could not be built.
    #[snafu(display("Failed to build HTTP client."))]
    Client {
        /// Error source.
        source: GenericError,
    },

    /// The destination has stopped and no longer accepts fragments.
    #[snafu(display("OpenTSDB destination has stopped."))]
    Stopped,
}

/// OpenTSDB destination, configured but not yet running.
pub struct Shipper<S> {
    config: OpenTsdbConfiguration,
    endpoint: Uri,
    service: S,
    telemetry: ShipperTelemetry,
}

impl Shipper<ResetHttpClient<Full<Bytes>>> {
    /// Creates a new `Shipper` sending requests with the default HTTP client.
    ///
    /// The client applies the configured request timeout and discards its pooled connections every
    /// `idle_connection_reset` seconds.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid or the HTTP client cannot be built, an error will be returned.
    pub fn from_config(config: OpenTsdbConfiguration) -> Result<Self, ShipperError> {
        let telemetry = ShipperTelemetry::register();
        let client_builder = HttpClient::builder()
            .with_request_timeout(config.request_timeout())
            .with_bytes_sent_counter(telemetry.bytes_sent().clone());
        let client = ResetHttpClient::new(client_builder, config.idle_connection_reset()).context(Client)?;

        Self::build(config, client, telemetry)
    }
}

impl<S, B> Shipper<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    /// Creates a new `Shipper` sending requests through the given service.
    ///
    /// Each writer gets its own clone of `service`.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error will be returned.
    pub fn with_service(config: OpenTsdbConfiguration, service: S) -> Result<Self, ShipperError> {
        Self::build(config, service, ShipperTelemetry::register())
    }

    fn build(config: OpenTsdbConfiguration, service: S, telemetry: ShipperTelemetry) -> Result<Self, ShipperError> {
        if config.log_msg_ch_size == 0 {
            return InvalidConfiguration {
                reason: "log_msg_ch_size must be greater than zero",
            }
            .fail();
        }
        if config.tsdb_writing_size == 0 {
            return InvalidConfiguration {
                reason: "tsdb_writing_size must be greater than zero",
            }
            .fail();
        }

        let endpoint = resolve_put_endpoint(&config.url).context(Endpoint)?;
        let endpoint = endpoint.as_str().parse::<Uri>().map_err(|e| ShipperError::InvalidConfiguration {
            reason: format!("endpoint '{}' is not a valid URI: {}", endpoint, e),
        })?;

        Ok(Self {
            config,
            endpoint,
            service,
            telemetry,
        })
    }

    /// Returns the resolved put endpoint.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// Creates the ingestion queue and spawns the writers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> ShipperHandle {
        let Self {
            config,
            endpoint,
            service,
            telemetry,
        } = self;

        let (queue_tx, queue_rx) = mpsc::channel(config.log_msg_ch_size);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let writer_count = config.writer_count();
        let mut writers = JoinSet::new();
        for id in 0..writer_count {
            let writer = Writer {
                id,
                queue: Arc::clone(&queue_rx),
                requeue_tx: queue_tx.downgrade(),
                service: service.clone(),
                endpoint: endpoint.clone(),
                writing_size: config.tsdb_writing_size,
                write_timeout: config.write_timeout(),
                requeue_delay: config.requeue_delay(),
                telemetry: telemetry.clone(),
            };
            writers.spawn_traced_named(format!("opentsdb-writer-{}", id), writer.run());
        }

        info!(
            endpoint = %endpoint,
            writers = writer_count,
            queue_capacity = config.log_msg_ch_size,
            batch_size = config.tsdb_writing_size,
            "OpenTSDB destination started."
        );

        ShipperHandle {
            queue_tx,
            writers,
            telemetry,
        }
    }
}

/// Handle to a running OpenTSDB destination.
pub struct ShipperHandle {
    queue_tx: mpsc::Sender<Fragment>,
    writers: JoinSet<()>,
    telemetry: ShipperTelemetry,
}

impl ShipperHandle {
    /// Pushes a fragment onto the ingestion queue, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// If every writer has exited, an error will be returned.
    pub async fn enqueue(&self, fragment: Fragment) -> Result<(), ShipperError> {
        self.queue_tx.send(fragment).await.map_err(|_| ShipperError::Stopped)
    }

    /// Stops the destination.
    ///
    /// Fragments already queued are still sent. Batches left incomplete once the queue is empty are abandoned, as are
    /// pending requeues. Returns once every writer has exited.
    pub async fn stop(self) {
        let Self {
            queue_tx, mut writers, ..
        } = self;

        debug!("Closing ingestion queue and waiting for writers to drain it.");
        drop(queue_tx);

        while let Some(result) = writers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Writer task failed to run to completion.");
            }
        }

        info!("OpenTSDB destination stopped.");
    }
}

/// OpenTSDB output: encodes events and ships the resulting fragments.
pub struct OpenTsdbOutput<S> {
    encoder: OpenTsdbEncoder,
    shipper: Shipper<S>,
}

impl<S, B> OpenTsdbOutput<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    /// Creates a new `OpenTsdbOutput`.
    pub fn new(encoder: OpenTsdbEncoder, shipper: Shipper<S>) -> Self {
        Self { encoder, shipper }
    }

    /// Runs the output until `events` ends, then stops the destination.
    ///
    /// Events that fail to decode are logged and skipped. Enqueueing waits while the ingestion queue is full.
    ///
    /// # Errors
    ///
    /// If the destination stops while events are still being processed, an error will be returned.
    pub async fn run<St>(self, events: St) -> Result<(), GenericError>
    where
        St: Stream,
        St::Item: Event,
    {
        let Self { encoder, shipper } = self;
        let handle = shipper.start();

        pin!(events);
        let mut result = Ok(());
        'events: while let Some(event) = events.next().await {
            handle.telemetry.events_received().increment(1);

            let fragments = match encoder.encode(&event) {
                Ok(fragments) => fragments,
                Err(e) => {
                    error!(error = %e, "Failed to encode event. Skipping.");
                    handle.telemetry.events_dropped_decode().increment(1);
                    continue;
                }
            };

            for fragment in fragments {
                if let Err(e) = handle.enqueue(fragment).await {
                    result = Err(e.into());
                    break 'events;
                }
            }
        }

        debug!("Event stream finished. Stopping OpenTSDB destination.");
        handle.stop().await;

        result
    }
}
