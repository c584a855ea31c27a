//! Basic HTTP client.

mod client;
pub use self::client::{HttpClient, HttpClientBuilder};

mod conn;
pub use self::conn::{HttpsCapableConnection, HttpsCapableConnector, HttpsCapableConnectorBuilder};

mod reset;
pub use self::reset::{ResetClient, ResetHttpClient};
