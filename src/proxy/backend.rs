//! Backend server management
//!
//! This module holds the fixed pool of backend origins and the round-robin
//! cursor used to pick one for each forwarded request.

use crate::config::Resource;
use crate::error::ProxyError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// A backend origin requests can be forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Parsed origin URL (e.g., "http://localhost:3000")
    pub url: Url,

    /// Optional backend name for logging
    pub name: Option<String>,
}

impl Backend {
    /// Parse a destination URL into a backend.
    ///
    /// Only plain `http` origins with a host are accepted.
    pub fn parse(raw: &str, name: Option<String>) -> Result<Self, ProxyError> {
        let url = Url::parse(raw).map_err(|source| ProxyError::InvalidBackendUrl {
            url: raw.to_string(),
            source,
        })?;

        if url.scheme() != "http" {
            return Err(ProxyError::UnsupportedScheme {
                url: raw.to_string(),
                scheme: url.scheme().to_string(),
            });
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(ProxyError::MissingHost(raw.to_string()));
        }

        Ok(Self { url, name })
    }

    /// Build a backend from a configured resource.
    pub fn from_resource(resource: &Resource) -> Result<Self, ProxyError> {
        let name = Some(resource.name.clone()).filter(|n| !n.is_empty());
        Self::parse(&resource.destination_url, name)
    }

    /// Get a display name for the backend (name or URL)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.url.as_str())
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// `host[:port]`, as sent in the `Host` header.
    pub fn authority(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    /// Address to open a TCP connection to.
    pub fn socket_addr(&self) -> String {
        let host = self.host();
        // IPv6 literals keep their brackets in host_str
        format!("{}:{}", host, self.port())
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Immutable pool of backends with a shared round-robin cursor.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Backend>,
    cursor: AtomicUsize,
}

impl BackendPool {
    /// Create a pool. Fails if `backends` is empty.
    pub fn new(backends: Vec<Backend>) -> Result<Self, ProxyError> {
        if backends.is_empty() {
            return Err(ProxyError::EmptyPool);
        }

        Ok(Self {
            backends,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Parse every configured resource; the first invalid URL aborts construction.
    pub fn from_resources(resources: &[Resource]) -> Result<Self, ProxyError> {
        let backends = resources
            .iter()
            .map(Backend::from_resource)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(backends)
    }

    /// Select the next backend using round-robin.
    ///
    /// The k-th call process-wide returns backend `k mod len`.
    pub fn next_backend(&self) -> &Backend {
        let len = self.backends.len();
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);

        &self.backends[index]
    }

    /// Position the next selection will return.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
