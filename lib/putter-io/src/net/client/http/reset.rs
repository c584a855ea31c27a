use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use http::Request;
use hyper::body::Body;
use putter_error::GenericError;
use tokio::time::Instant;
use tower::{BoxError, Service, ServiceExt as _};
use tracing::debug;

use super::{HttpClient, HttpClientBuilder};

type Rebuild<S> = Arc<dyn Fn() -> Result<S, GenericError> + Send + Sync>;

struct ResetState<S> {
    client: S,
    last_reset: Instant,
}

/// A client wrapper that periodically replaces the inner client with a freshly built one.
///
/// Replacing the client drops its connection pool, so idle connections never outlive the reset interval. Clones share
/// one inner client and one reset clock: a reset performed through any clone is seen by all of them. Requests already
/// in flight on the old client finish normally.
///
/// An interval of zero disables resetting.
pub struct ResetClient<S> {
    rebuild: Rebuild<S>,
    reset_interval: Duration,
    state: Arc<Mutex<ResetState<S>>>,
}

/// An HTTP client whose connection pool is periodically discarded.
pub type ResetHttpClient<B> = ResetClient<HttpClient<B>>;

impl<S> ResetClient<S> {
    /// Creates a new `ResetClient` that builds its clients with `rebuild`.
    ///
    /// # Errors
    ///
    /// If the initial client cannot be built, an error will be returned.
    pub fn from_fn<F>(reset_interval: Duration, rebuild: F) -> Result<Self, GenericError>
    where
        F: Fn() -> Result<S, GenericError> + Send + Sync + 'static,
    {
        let client = rebuild()?;

        Ok(Self {
            rebuild: Arc::new(rebuild),
            reset_interval,
            state: Arc::new(Mutex::new(ResetState {
                client,
                last_reset: Instant::now(),
            })),
        })
    }
}

impl<B> ResetClient<HttpClient<B>>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    /// Creates a new `ResetHttpClient` from the given builder.
    ///
    /// # Errors
    ///
    /// If the initial client cannot be built, an error will be returned.
    pub fn new(builder: HttpClientBuilder, reset_interval: Duration) -> Result<Self, GenericError> {
        Self::from_fn(reset_interval, move || builder.build())
    }
}

impl<S: Clone> ResetClient<S> {
    /// Returns the current client, replacing it first if the reset interval has elapsed.
    fn current_client(&self) -> Result<S, GenericError> {
        // The state is only ever swapped wholesale, so a poisoned lock still holds a usable client.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if !self.reset_interval.is_zero() && state.last_reset.elapsed() >= self.reset_interval {
            state.client = (self.rebuild)()?;
            state.last_reset = Instant::now();
            debug!(reset_interval = ?self.reset_interval, "Reset HTTP client and dropped idle connections.");
        }

        Ok(state.client.clone())
    }
}

impl<S> Clone for ResetClient<S> {
    fn clone(&self) -> Self {
        Self {
            rebuild: Arc::clone(&self.rebuild),
            reset_interval: self.reset_interval,
            state: Arc::clone(&self.state),
        }
    }
}

impl<S, B> Service<Request<B>> for ResetClient<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is driven on the selected client inside `call`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let client = match self.current_client() {
            Ok(client) => client,
            Err(e) => return Box::pin(async move { Err(e.into()) }),
        };

        Box::pin(async move { client.oneshot(req).await.map_err(Into::into) })
    }
}
