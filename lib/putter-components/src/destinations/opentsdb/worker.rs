use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{future, FutureExt as _};
use http::{Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::{BodyExt as _, Full};
use putter_common::task::JoinSetExt as _;
use putter_error::{generic_error, GenericError};
use tokio::{
    select,
    sync::{mpsc, Mutex},
    task::JoinSet,
    time::{sleep, sleep_until, Instant},
};
use tower::{BoxError, Service, ServiceExt as _};
use tracing::{debug, error, warn};

use super::{request::build_put_request, telemetry::ShipperTelemetry};
use crate::encoders::opentsdb::Fragment;

/// Receiving side of the ingestion queue, shared by all writers.
pub(super) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Fragment>>>;

enum Step {
    Continue,
    Closed,
}

/// A single writer draining the ingestion queue into batches.
pub(super) struct Writer<S> {
    pub id: usize,
    pub queue: SharedReceiver,
    pub requeue_tx: mpsc::WeakSender<Fragment>,
    pub service: S,
    pub endpoint: Uri,
    pub writing_size: usize,
    pub write_timeout: Duration,
    pub requeue_delay: Duration,
    pub telemetry: ShipperTelemetry,
}

impl<S, B> Writer<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: Body + Send,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    pub async fn run(mut self) {
        debug!(writer = self.id, "Writer started.");

        let mut batch = Vec::with_capacity(self.writing_size);
        let mut last_flush = Instant::now();
        let mut requeues = JoinSet::new();

        loop {
            let step = AssertUnwindSafe(self.step(&mut batch, &mut last_flush, &mut requeues))
                .catch_unwind()
                .await;

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Closed) => break,
                Err(panic) => {
                    error!(
                        writer = self.id,
                        panic = panic_message(panic.as_ref()),
                        "Writer iteration panicked. Continuing."
                    );
                }
            }

            while let Some(result) = requeues.try_join_next() {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(writer = self.id, error = %e, "Requeue task panicked.");
                    }
                }
            }
        }

        if !batch.is_empty() {
            warn!(
                writer = self.id,
                fragments = batch.len(),
                "Queue closed with a partial batch pending. Abandoning fragments."
            );
            self.telemetry.fragments_abandoned().increment(batch.len() as u64);
        }

        if !requeues.is_empty() {
            warn!(
                writer = self.id,
                tasks = requeues.len(),
                "Aborting pending requeue tasks."
            );
        }
        requeues.shutdown().await;

        debug!(writer = self.id, "Writer stopped.");
    }

    async fn step(
        &mut self, batch: &mut Vec<Fragment>, last_flush: &mut Instant, requeues: &mut JoinSet<()>,
    ) -> Step {
        let queue = Arc::clone(&self.queue);
        let batch_deadline = last_flush
            .checked_add(self.write_timeout)
            .filter(|_| !batch.is_empty());

        select! {
            maybe_fragment = async move { queue.lock().await.recv().await } => match maybe_fragment {
                Some(fragment) => {
                    batch.push(fragment);
                    if batch.len() >= self.writing_size || last_flush.elapsed() > self.write_timeout {
                        self.flush(batch, requeues).await;
                        *last_flush = Instant::now();
                    }
                    Step::Continue
                }
                None => Step::Closed,
            },

            // Idle queue: don't let a partial batch age past the write timeout.
            _ = sleep_until_deadline(batch_deadline) => {
                self.flush(batch, requeues).await;
                *last_flush = Instant::now();
                Step::Continue
            }
        }
    }

    async fn flush(&mut self, batch: &mut Vec<Fragment>, requeues: &mut JoinSet<()>) {
        if batch.is_empty() {
            return;
        }

        let fragments = std::mem::replace(batch, Vec::with_capacity(self.writing_size));
        let result = match AssertUnwindSafe(self.send(&fragments)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(generic_error!("Request panicked: {}", panic_message(panic.as_ref()))),
        };

        match result {
            Ok(()) => {
                debug!(writer = self.id, fragments = fragments.len(), "Sent batch.");
                self.telemetry.batches_sent().increment(1);
                self.telemetry.fragments_sent().increment(fragments.len() as u64);
            }
            Err(e) => {
                error!(
                    writer = self.id,
                    fragments = fragments.len(),
                    error = %e,
                    "Failed to send batch. Requeueing fragments."
                );
                self.telemetry.batches_failed().increment(1);

                requeues.spawn_traced_named(
                    format!("opentsdb-requeue-{}", self.id),
                    requeue(
                        fragments,
                        self.requeue_tx.clone(),
                        self.requeue_delay,
                        self.telemetry.clone(),
                    ),
                );
            }
        }
    }

    async fn send(&mut self, fragments: &[Fragment]) -> Result<(), GenericError> {
        let request = build_put_request(&self.endpoint, fragments).await?;

        let response = self
            .service
            .ready()
            .await
            .map_err(transport_error)?
            .call(request)
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let body = match response.into_body().collect().await {
            Ok(body) => String::from_utf8_lossy(&body.to_bytes()).into_owned(),
            Err(e) => format!("<failed to read response body: {}>", e),
        };

        Err(generic_error!("Received unexpected response status {}. Body: {}", status, body))
    }
}

/// Puts the fragments of a failed batch back on the ingestion queue, one at a time.
///
/// Fragments go to the tail of the queue, waiting `delay` between each. Once the queue has been closed, the remaining
/// fragments are abandoned.
pub(super) async fn requeue(
    fragments: Vec<Fragment>, queue: mpsc::WeakSender<Fragment>, delay: Duration, telemetry: ShipperTelemetry,
) {
    let total = fragments.len();
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i > 0 {
            sleep(delay).await;
        }

        let sent = match queue.upgrade() {
            Some(tx) => tx.send(fragment).await.is_ok(),
            None => false,
        };
        if !sent {
            let remaining = total - i;
            warn!(fragments = remaining, "Queue closed before requeue completed. Abandoning fragments.");
            telemetry.fragments_abandoned().increment(remaining as u64);
            return;
        }

        telemetry.fragments_requeued().increment(1);
    }

    debug!(fragments = total, "Requeued failed batch.");
}

/// Waits until `deadline`, or forever when there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn transport_error<E: Into<BoxError>>(e: E) -> GenericError {
    let e: BoxError = e.into();
    generic_error!(e)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use tower::service_fn;

    use super::*;
    use crate::destinations::opentsdb::request::tests::decode_body;

    #[tokio::test(start_paused = true)]
    async fn requeue_pushes_every_fragment_with_delay() {
        let (tx, mut rx) = mpsc::channel(16);
        let fragments: Vec<Fragment> = (0..3).map(|i| Fragment::from(format!("{{\"n\":{}}}", i))).collect();

        let start = Instant::now();
        requeue(
            fragments.clone(),
            tx.downgrade(),
            Duration::from_millis(100),
            ShipperTelemetry::register(),
        )
        .await;

        assert!(start.elapsed() >= Duration::from_millis(200));
        for expected in fragments {
            assert_eq!(rx.recv().await.unwrap(), expected);
        }
        assert!(rx.try_recv().is_err());
        drop(tx);
    }

    #[tokio::test]
    async fn requeue_stops_once_queue_closed() {
        let (tx, mut rx) = mpsc::channel::<Fragment>(16);
        let weak = tx.downgrade();
        drop(tx);

        requeue(
            vec![Fragment::from_static(b"{}")],
            weak,
            Duration::ZERO,
            ShipperTelemetry::register(),
        )
        .await;
        assert!(rx.recv().await.is_none());
    }

    fn assert_send<T: Send + 'static>(_: &T) {}

    #[test]
    fn writer_future_is_spawnable() {
        let service = service_fn(|_: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
        });

        let (tx, rx) = mpsc::channel(1);
        let writer = Writer {
            id: 0,
            queue: Arc::new(Mutex::new(rx)),
            requeue_tx: tx.downgrade(),
            service,
            endpoint: "http://tsdb/api/put".parse().unwrap(),
            writing_size: 1,
            write_timeout: Duration::from_secs(1),
            requeue_delay: Duration::ZERO,
            telemetry: ShipperTelemetry::register(),
        };

        let run = writer.run();
        assert_send(&run);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_deadline_never_fires() {
        let start = Instant::now();
        let woke = tokio::time::timeout(Duration::from_secs(3600), sleep_until_deadline(None)).await;
        assert!(woke.is_err());
        assert!(start.elapsed() >= Duration::from_secs(3600));

        sleep_until_deadline(Some(Instant::now() + Duration::from_secs(1))).await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let service = service_fn(move |req: Request<Full<Bytes>>| {
            let calls = Arc::clone(&calls2);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let body = req.into_body().collect().await.unwrap().to_bytes();
                assert_eq!(decode_body(&body).await.as_array().unwrap().len(), 1);

                let status = if calls.load(Ordering::SeqCst) == 1 {
                    StatusCode::OK
                } else {
                    StatusCode::NO_CONTENT
                };
                let response = Response::builder()
                    .status(status)
                    .body(Full::new(Bytes::from_static(b"nope")))
                    .unwrap();
                Ok::<_, Infallible>(response)
            }
        });

        let (tx, rx) = mpsc::channel(1);
        let mut writer = Writer {
            id: 0,
            queue: Arc::new(Mutex::new(rx)),
            requeue_tx: tx.downgrade(),
            service,
            endpoint: "http://tsdb/api/put".parse().unwrap(),
            writing_size: 1,
            write_timeout: Duration::from_secs(1),
            requeue_delay: Duration::ZERO,
            telemetry: ShipperTelemetry::register(),
        };

        let fragments = [Fragment::from_static(b"{}")];
        let err = writer.send(&fragments).await.unwrap_err();
        assert!(err.to_string().contains("200 OK"));
        assert!(err.to_string().contains("nope"));

        writer.send(&fragments).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
