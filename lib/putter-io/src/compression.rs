//! Compression for request bodies.

use std::io;

use async_compression::{tokio::write::GzipEncoder, Level};
use http::HeaderValue;
use tokio::io::AsyncWriteExt as _;

static CONTENT_ENCODING_GZIP: HeaderValue = HeaderValue::from_static("gzip");

/// Compression schemes for request bodies.
#[derive(Copy, Clone, Debug)]
pub enum CompressionScheme {
    /// Gzip, at the given level.
    Gzip(Level),
}

impl CompressionScheme {
    /// Gzip compression, using the default compression level (6).
    pub const fn gzip_default() -> Self {
        Self::Gzip(Level::Default)
    }

    /// Returns the `Content-Encoding` value advertising this scheme.
    pub fn content_encoding(&self) -> HeaderValue {
        match self {
            Self::Gzip(_) => CONTENT_ENCODING_GZIP.clone(),
        }
    }
}

/// Compresses the given chunks, in order, into a single in-memory buffer.
///
/// # Errors
///
/// If the encoder fails to write or finalize the stream, an error will be returned.
pub async fn compress_chunks<'a, I>(scheme: CompressionScheme, chunks: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    match scheme {
        CompressionScheme::Gzip(level) => {
            let mut encoder = GzipEncoder::with_quality(Vec::new(), level);
            for chunk in chunks {
                encoder.write_all(chunk).await?;
            }
            encoder.shutdown().await?;
            Ok(encoder.into_inner())
        }
    }
}

#[cfg(test)]
mod tests {
    use async_compression::tokio::bufread::GzipDecoder;
    use tokio::io::AsyncReadExt as _;

    use super::*;

    async fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut decoder = GzipDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn gzip_round_trip_preserves_chunk_order() {
        let chunks: [&[u8]; 5] = [b"[", br#"{"metric":"a"}"#, b",", br#"{"metric":"b"}"#, b"]"];
        let compressed = compress_chunks(CompressionScheme::gzip_default(), chunks).await.unwrap();

        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&compressed).await, br#"[{"metric":"a"},{"metric":"b"}]"#.to_vec());
    }

    #[tokio::test]
    async fn repetitive_input_shrinks() {
        let input = [b'x'; 4096];
        let compressed = compress_chunks(CompressionScheme::gzip_default(), [&input[..]]).await.unwrap();

        assert!(compressed.len() < input.len());
        assert_eq!(gunzip(&compressed).await, input.to_vec());
    }

    #[test]
    fn gzip_advertises_content_encoding() {
        assert_eq!(CompressionScheme::gzip_default().content_encoding(), "gzip");
    }
}
