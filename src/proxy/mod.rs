//! Reverse proxy functionality
//!
//! [`Proxy`] ties together the backend pool, the per-client rate limiter, the
//! idle client reaper and the forwarder. Each inbound request is either
//! rejected with a 429 or forwarded to exactly one backend, chosen round-robin.

pub mod backend;
pub mod forwarder;
pub mod limiter;
pub mod reaper;

pub use backend::{Backend, BackendPool};
pub use forwarder::{Forwarder, RelayOutcome};
pub use limiter::{client_identity, ClientRegistry, LimiterSettings, TokenBucket};
pub use reaper::Reaper;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::AsyncWrite;

use crate::config::Config;
use crate::error::ProxyError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;

/// Body of the 429 response.
pub const RATE_LIMIT_MESSAGE: &str = "rate limit exceeded";

/// Tunables for the rate limiter and reaper.
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub limiter: LimiterSettings,
    /// Clients idle longer than this are evicted.
    pub idle_timeout: Duration,
    /// Time between reaper sweeps.
    pub sweep_interval: Duration,
}

impl ProxySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.client_duration.saturating_mul(60)),
            ..Self::default()
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            limiter: LimiterSettings::default(),
            idle_timeout: Duration::from_secs(crate::config::DEFAULT_CLIENT_DURATION * 60),
            sweep_interval: reaper::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// How a request left the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Rate limited or unidentifiable client; a 429 was written.
    Rejected,
    /// The backend response was streamed back.
    Forwarded { status: u16 },
    /// The backend could not be reached; a 502 was written.
    BadGateway,
}

#[derive(Debug)]
pub struct Proxy {
    pool: BackendPool,
    clients: Arc<ClientRegistry>,
    forwarder: Forwarder,
    reaper: Reaper,
}

impl Proxy {
    /// Build a proxy from configuration and start its reaper.
    ///
    /// Any invalid destination URL fails the whole construction.
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let pool = BackendPool::from_resources(&config.resources)?;
        Ok(Self::with_settings(pool, ProxySettings::from_config(config)))
    }

    /// Build a proxy over an existing pool. Must run inside a tokio runtime.
    pub fn with_settings(pool: BackendPool, settings: ProxySettings) -> Self {
        let clients = Arc::new(ClientRegistry::new(settings.limiter));
        let reaper = Reaper::spawn(
            Arc::clone(&clients),
            settings.idle_timeout,
            settings.sweep_interval,
        );

        tracing::info!(
            backends = pool.len(),
            idle_timeout_secs = settings.idle_timeout.as_secs(),
            "Proxy initialised"
        );

        Self {
            pool,
            clients,
            forwarder: Forwarder::new(),
            reaper,
        }
    }

    /// Rate-limit check for a remote address; unparsable addresses are denied.
    pub fn allow(&self, remote_addr: &str) -> bool {
        match client_identity(remote_addr) {
            Some(ip) => self.clients.allow(&ip),
            None => false,
        }
    }

    pub fn next_backend(&self) -> &Backend {
        self.pool.next_backend()
    }

    /// Handle one request from `remote_addr`, writing the response into `client`.
    pub async fn handle<W>(&self, request: &Request, remote_addr: &str, client: &mut W) -> Result<Disposition>
    where
        W: AsyncWrite + Unpin,
    {
        let identity = client_identity(remote_addr);
        let allowed = identity.as_deref().is_some_and(|ip| self.clients.allow(ip));

        let Some(ip) = identity.filter(|_| allowed) else {
            tracing::info!(
                client = remote_addr,
                method = request.method.as_str(),
                path = %request.path,
                "Rate limit exceeded"
            );

            let mut response = Response::rate_limited();
            if !request.keep_alive() {
                response = response.closing();
            }
            ResponseWriter::new(&response).write_to_stream(client).await?;
            return Ok(Disposition::Rejected);
        };

        let backend = self.pool.next_backend();
        tracing::info!(
            backend = backend.display_name(),
            client = %ip,
            method = request.method.as_str(),
            path = %request.path,
            "proxying request to {}",
            backend
        );

        match self.forwarder.relay(backend, request, &ip, client).await? {
            RelayOutcome::Relayed { status, .. } => Ok(Disposition::Forwarded { status }),
            RelayOutcome::BadGateway => Ok(Disposition::BadGateway),
        }
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    /// Stop the reaper. In-flight requests are unaffected.
    pub async fn shutdown(&self) {
        self.reaper.shutdown().await;
    }
}
