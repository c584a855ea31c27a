use std::{
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use http::Uri;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::{
    client::legacy::connect::{Connected, Connection, HttpConnector},
    rt::TokioIo,
};
use metrics::Counter;
use pin_project::pin_project;
use putter_error::{generic_error, GenericError};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tower::{BoxError, Service};
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection that supports both HTTP and HTTPS.
#[pin_project]
pub struct HttpsCapableConnection {
    #[pin]
    inner: MaybeHttpsStream<TokioIo<TcpStream>>,
    bytes_sent: Option<Counter>,
}

impl HttpsCapableConnection {
    fn track_sent(bytes_sent: &Option<Counter>, result: Poll<io::Result<usize>>) -> Poll<io::Result<usize>> {
        if let (Some(counter), Poll::Ready(Ok(n))) = (bytes_sent, &result) {
            counter.increment(*n as u64);
        }
        result
    }
}

impl Connection for HttpsCapableConnection {
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}

impl hyper::rt::Read for HttpsCapableConnection {
    fn poll_read(
        self: Pin<&mut Self>, cx: &mut Context<'_>, buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(self.project().inner, cx, buf)
    }
}

impl hyper::rt::Write for HttpsCapableConnection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        Self::track_sent(this.bytes_sent, hyper::rt::Write::poll_write(this.inner, cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(self.project().inner, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(self.project().inner, cx)
    }

    fn is_write_vectored(&self) -> bool {
        hyper::rt::Write::is_write_vectored(&self.inner)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        Self::track_sent(this.bytes_sent, hyper::rt::Write::poll_write_vectored(this.inner, cx, bufs))
    }
}

/// A connector that supports HTTP or HTTPS.
#[derive(Clone)]
pub struct HttpsCapableConnector {
    inner: HttpsConnector<HttpConnector>,
    bytes_sent: Option<Counter>,
}

impl Service<Uri> for HttpsCapableConnector {
    type Response = HttpsCapableConnection;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<HttpsCapableConnection, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let inner = self.inner.call(dst);
        let bytes_sent = self.bytes_sent.clone();
        Box::pin(async move { inner.await.map(|inner| HttpsCapableConnection { inner, bytes_sent }) })
    }
}

/// A builder for `HttpsCapableConnector`.
///
/// Connecting to the remote host times out after 30 seconds.
#[derive(Clone, Default)]
pub struct HttpsCapableConnectorBuilder {
    bytes_sent: Option<Counter>,
}

impl HttpsCapableConnectorBuilder {
    /// Sets a counter that gets incremented with the number of bytes sent over the connection.
    ///
    /// Counts headers and body as written to the socket, not TLS framing.
    pub fn with_bytes_sent_counter(mut self, counter: Counter) -> Self {
        self.bytes_sent = Some(counter);
        self
    }

    /// Builds the connector.
    ///
    /// # Errors
    ///
    /// If the TLS configuration cannot be created, an error will be returned.
    pub fn build(self) -> Result<HttpsCapableConnector, GenericError> {
        // `enforce_http` must be off, or the HTTPS wrapper can never see `https` URIs.
        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
        http_connector.enforce_http(false);

        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config(build_tls_config()?)
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(http_connector);

        Ok(HttpsCapableConnector {
            inner: https_connector,
            bytes_sent: self.bytes_sent,
        })
    }
}

fn build_tls_config() -> Result<ClientConfig, GenericError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| generic_error!("Failed to select TLS protocol versions: {}", e))?
        .with_root_certificates(load_platform_root_certificates())
        .with_no_client_auth();

    Ok(config)
}

/// Loads the platform's root certificates.
///
/// Never fails: certificates that cannot be loaded are logged and skipped, and with none available the store is left
/// empty so that only HTTPS handshakes fail.
fn load_platform_root_certificates() -> RootCertStore {
    let mut store = RootCertStore::empty();

    let result = rustls_native_certs::load_native_certs();
    for error in &result.errors {
        warn!(error = %error, "Failed to load certificates from platform's native certificate store.");
    }

    let (added, failed) = store.add_parsable_certificates(result.certs);
    if added == 0 {
        warn!("No platform root certificates available. HTTPS endpoints will be unreachable.");
    } else {
        debug!(added, failed, "Loaded platform root certificates.");
    }

    store
}
