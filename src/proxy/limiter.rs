//! Per-client rate limiting
//!
//! Every client IP gets its own token bucket. Buckets refill lazily from the
//! time elapsed since the last check, so idle clients cost nothing until their
//! next request. Entries are only ever removed by [`ClientRegistry::evict_idle`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Burst size granted to a newly seen client.
pub const DEFAULT_CAPACITY: u32 = 4;

/// Tokens restored per second.
pub const DEFAULT_REFILL_PER_SECOND: f64 = 2.0;

/// Bucket parameters applied to every client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            refill_per_second: DEFAULT_REFILL_PER_SECOND,
        }
    }
}

/// A token bucket that starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(settings: LimiterSettings, now: Instant) -> Self {
        Self {
            capacity: f64::from(settings.capacity),
            refill_per_second: settings.refill_per_second,
            tokens: f64::from(settings.capacity),
            last_refill: now,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`, fractional part included.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        // Instants from before the last refill add nothing
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }
}

#[derive(Debug)]
struct Client {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Map of client IP to its limiter state.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    settings: LimiterSettings,
    clients: Mutex<HashMap<String, Client>>,
}

impl ClientRegistry {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `ip` may issue a request now.
    pub fn allow(&self, ip: &str) -> bool {
        self.allow_at(ip, Instant::now())
    }

    /// Whether `ip` may issue a request at `now`.
    ///
    /// `last_seen` is refreshed whether or not a token is granted.
    pub fn allow_at(&self, ip: &str, now: Instant) -> bool {
        let mut clients = self.clients.lock();

        let client = clients.entry(ip.to_string()).or_insert_with(|| Client {
            bucket: TokenBucket::new(self.settings, now),
            last_seen: now,
        });

        client.last_seen = now;
        client.bucket.try_acquire(now)
    }

    /// Drop clients idle for longer than `idle`. Returns how many were removed.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), idle)
    }

    pub fn evict_idle_at(&self, now: Instant, idle: Duration) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();

        clients.retain(|_, client| now.saturating_duration_since(client.last_seen) <= idle);

        before - clients.len()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.clients.lock().contains_key(ip)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

/// Strip the port from a `host:port` or `[v6]:port` remote address.
///
/// Returns `None` when the address has no parsable port.
pub fn client_identity(remote_addr: &str) -> Option<String> {
    let (host, port) = if let Some(rest) = remote_addr.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        (host, port)
    } else {
        let (host, port) = remote_addr.rsplit_once(':')?;
        if host.contains(':') {
            // Unbracketed IPv6
            return None;
        }
        (host, port)
    };

    if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(host.to_string())
}
