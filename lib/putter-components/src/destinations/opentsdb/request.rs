use bytes::Bytes;
use http::{
    header::{CONTENT_ENCODING, CONTENT_TYPE},
    HeaderValue, Method, Request, Uri,
};
use http_body_util::Full;
use putter_error::{ErrorContext as _, GenericError};
use putter_io::compression::{compress_chunks, CompressionScheme};

use crate::encoders::opentsdb::Fragment;

static CONTENT_TYPE_JSON: HeaderValue = HeaderValue::from_static("application/json");

/// Builds the put request for a batch of fragments.
///
/// The body is the gzip-compressed JSON array of the fragments, in batch order.
pub(super) async fn build_put_request(endpoint: &Uri, fragments: &[Fragment]) -> Result<Request<Full<Bytes>>, GenericError> {
    // Materialized before awaiting so the future stays `Send`.
    let mut chunks: Vec<&[u8]> = Vec::with_capacity(fragments.len() * 2 + 1);
    chunks.push(&b"["[..]);
    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 {
            chunks.push(&b","[..]);
        }
        chunks.push(&fragment[..]);
    }
    chunks.push(&b"]"[..]);

    let scheme = CompressionScheme::gzip_default();
    let body = compress_chunks(scheme, chunks)
        .await
        .error_context("Failed to compress request body.")?;

    Request::builder()
        .method(Method::POST)
        .uri(endpoint.clone())
        .header(CONTENT_TYPE, CONTENT_TYPE_JSON.clone())
        .header(CONTENT_ENCODING, scheme.content_encoding())
        .body(Full::new(Bytes::from(body)))
        .error_context("Failed to build request.")
}

#[cfg(test)]
pub(super) mod tests {
    use async_compression::tokio::bufread::GzipDecoder;
    use serde_json::Value;
    use tokio::io::AsyncReadExt as _;

    use super::*;

    /// Decompresses a request body and parses it as JSON.
    pub async fn decode_body(body: &[u8]) -> Value {
        let mut decoder = GzipDecoder::new(body);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).await.unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[tokio::test]
    async fn body_is_gzipped_json_array() {
        use http_body_util::BodyExt as _;

        let endpoint: Uri = "http://127.0.0.1:4242/api/put".parse().unwrap();
        let fragments = vec![
            Fragment::from_static(br#"{"metric":"a","value":1,"tags":{},"timestamp":1}"#),
            Fragment::from_static(br#"{"metric":"b","value":2,"tags":{},"timestamp":1}"#),
        ];

        let request = build_put_request(&endpoint, &fragments).await.unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), &endpoint);
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(request.headers()[CONTENT_ENCODING], "gzip");

        let body = request.into_body().collect().await.unwrap().to_bytes();
        let points = decode_body(&body).await;
        let points = points.as_array().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["metric"], "a");
        assert_eq!(points[1]["metric"], "b");
    }

    #[tokio::test]
    async fn single_fragment_has_no_separator() {
        use http_body_util::BodyExt as _;

        let endpoint: Uri = "http://tsdb/api/put".parse().unwrap();
        let fragments = vec![Fragment::from_static(br#"{"metric":"a"}"#)];

        let request = build_put_request(&endpoint, &fragments).await.unwrap();
        let body = request.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(decode_body(&body).await, serde_json::json!([{"metric": "a"}]));
    }
}
