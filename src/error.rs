//! Errors raised while building a proxy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend pool is empty")]
    EmptyPool,

    #[error("failed to parse url {url}: {source}")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {scheme:?} in backend url {url}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("backend url {0} has no host")]
    MissingHost(String),
}
