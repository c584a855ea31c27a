use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use http::{Request, Response};
use hyper::body::{Body, Incoming};
use hyper_util::{
    client::legacy::Builder,
    rt::{TokioExecutor, TokioTimer},
};
use metrics::Counter;
use putter_error::GenericError;
use tower::{timeout::TimeoutLayer, util::BoxCloneService, BoxError, Service, ServiceBuilder, ServiceExt as _};

use super::conn::HttpsCapableConnectorBuilder;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(45);
const POOL_MAX_IDLE_PER_HOST: usize = 5;

type BoxedClient<B> = BoxCloneService<Request<B>, Response<Incoming>, BoxError>;

/// A pooled HTTP/HTTPS client.
///
/// Clones share the same connection pool.
#[derive(Clone)]
pub struct HttpClient<B = ()> {
    inner: BoxedClient<B>,
}

impl HttpClient<()> {
    /// Returns a builder with the default settings.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }
}

impl<B> Service<Request<B>> for HttpClient<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Incoming>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        self.inner.call(req)
    }
}

/// Builder for [`HttpClient`].
///
/// Clients speak HTTP/1.1 and HTTP/2 (negotiated through ALPN for HTTPS) and keep at most
/// five idle connections per host for 45 seconds. Connecting times out after 30 seconds.
#[derive(Clone)]
pub struct HttpClientBuilder {
    connector: HttpsCapableConnectorBuilder,
    request_timeout: Option<Duration>,
}

impl HttpClientBuilder {
    /// Sets the overall timeout for a request, up to and including the response head.
    ///
    /// Defaults to 60 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the counter tracking bytes written to connections.
    pub fn with_bytes_sent_counter(mut self, counter: Counter) -> Self {
        self.connector = self.connector.with_bytes_sent_counter(counter);
        self
    }

    /// Builds a client with a fresh, empty connection pool.
    ///
    /// # Errors
    ///
    /// If the TLS configuration cannot be built, an error will be returned.
    pub fn build<B>(&self) -> Result<HttpClient<B>, GenericError>
    where
        B: Body + Send + Unpin + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let connector = self.connector.clone().build()?;

        let mut pool = Builder::new(TokioExecutor::new());
        pool.pool_timer(TokioTimer::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST);
        let client = pool.build(connector);

        let inner = ServiceBuilder::new()
            .option_layer(self.request_timeout.map(TimeoutLayer::new))
            .service(client.map_err(BoxError::from))
            .boxed_clone();

        Ok(HttpClient { inner })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            connector: HttpsCapableConnectorBuilder::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}
