use snafu::{ResultExt as _, Snafu};
use url::Url;

const PUT_PATH: &str = "/api/put";

/// Error type for invalid endpoints.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum EndpointError {
    /// The endpoint could not be parsed as a URL.
    #[snafu(display("Failed to parse endpoint '{}': {}", endpoint, source))]
    Parse {
        /// Error source.
        source: url::ParseError,

        /// Endpoint as configured.
        endpoint: String,
    },

    /// The endpoint uses a scheme other than HTTP or HTTPS.
    #[snafu(display("Unsupported scheme '{}' in endpoint '{}'.", scheme, endpoint))]
    UnsupportedScheme {
        /// Scheme of the endpoint.
        scheme: String,

        /// Endpoint as configured.
        endpoint: String,
    },
}

/// Resolves a configured base URL into the full put endpoint.
///
/// A missing scheme defaults to `http`, a missing host (`:4242`) to `localhost`, and whatever path, query, or fragment
/// was given is replaced by `/api/put`.
pub fn resolve_put_endpoint(raw_endpoint: &str) -> Result<Url, EndpointError> {
    let raw_endpoint = raw_endpoint.trim();

    let (scheme, authority_and_rest) = match raw_endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", raw_endpoint),
    };

    let normalized = if authority_and_rest.starts_with(':') {
        format!("{}://localhost{}", scheme, authority_and_rest)
    } else {
        format!("{}://{}", scheme, authority_and_rest)
    };

    let mut endpoint = Url::parse(&normalized).context(Parse {
        endpoint: raw_endpoint.to_string(),
    })?;

    if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
        return Err(EndpointError::UnsupportedScheme {
            scheme: endpoint.scheme().to_string(),
            endpoint: raw_endpoint.to_string(),
        });
    }

    endpoint.set_path(PUT_PATH);
    endpoint.set_query(None);
    endpoint.set_fragment(None);

    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(raw: &str) -> String {
        resolve_put_endpoint(raw).unwrap().to_string()
    }

    #[test]
    fn adds_missing_scheme() {
        assert_eq!(resolve("127.0.0.1:4242"), "http://127.0.0.1:4242/api/put");
        assert_eq!(resolve("tsdb.internal"), "http://tsdb.internal/api/put");
    }

    #[test]
    fn adds_missing_host() {
        assert_eq!(resolve(":4242"), "http://localhost:4242/api/put");
        assert_eq!(resolve("https://:4243"), "https://localhost:4243/api/put");
    }

    #[test]
    fn replaces_path_and_query() {
        assert_eq!(resolve("http://tsdb:4242/foo/bar?x=1#y"), "http://tsdb:4242/api/put");
        assert_eq!(resolve("https://tsdb.example.com"), "https://tsdb.example.com/api/put");
    }

    #[test]
    fn rejects_invalid_endpoints() {
        assert!(matches!(resolve_put_endpoint("http://"), Err(EndpointError::Parse { .. })));
        assert!(matches!(
            resolve_put_endpoint("ftp://tsdb:21"),
            Err(EndpointError::UnsupportedScheme { .. })
        ));
    }
}
