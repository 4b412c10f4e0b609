use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ServerConfig;
use crate::history::{MemoryMessageLog, MessageLog};
use crate::identity::{IdentityStore, MemoryIdentityStore};
use crate::rate_limit::IpRateLimiter;
use crate::rooms::EchoPolicy;
use crate::router::{MessageRouter, RoutingPolicy};

pub type IpConnectionCounts = Arc<Mutex<HashMap<IpAddr, usize>>>;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub config: Arc<ServerConfig>,
    /// Throttles `auth` envelopes per client address.
    pub auth_limiter: Arc<IpRateLimiter>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub ws_per_ip: IpConnectionCounts,
}

impl AppState {
    /// State backed by the in-memory identity store and message log.
    pub fn new(config: ServerConfig) -> Self {
        let identity: Arc<dyn IdentityStore> = Arc::new(MemoryIdentityStore::new());
        let log: Arc<dyn MessageLog> = Arc::new(MemoryMessageLog::with_capacity(
            config.history.max_messages_per_room,
        ));
        Self::with_stores(config, identity, log)
    }

    pub fn with_stores(
        config: ServerConfig,
        identity: Arc<dyn IdentityStore>,
        log: Arc<dyn MessageLog>,
    ) -> Self {
        let policy = RoutingPolicy {
            echo: if config.rooms.echo_to_sender {
                EchoPolicy::IncludeSender
            } else {
                EchoPolicy::ExcludeSender
            },
            error_replies: config.protocol.error_replies,
        };
        let auth_limiter = IpRateLimiter::new(
            config.limits.auth_attempts_burst as f64,
            config.limits.auth_attempts_per_sec,
        );
        Self {
            router: Arc::new(MessageRouter::new(identity, log, policy)),
            config: Arc::new(config),
            auth_limiter: Arc::new(auth_limiter),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            ws_per_ip: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Counts one live connection for as long as it is held.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

fn lock_counts(counts: &IpConnectionCounts) -> MutexGuard<'_, HashMap<IpAddr, usize>> {
    counts
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Reserves one of the per-address connection slots.
pub struct IpConnectionGuard {
    ip: IpAddr,
    counts: IpConnectionCounts,
}

impl IpConnectionGuard {
    /// Returns `None` when `ip` already holds `max` connections.
    pub fn try_acquire(ip: IpAddr, counts: IpConnectionCounts, max: usize) -> Option<Self> {
        {
            let mut map = lock_counts(&counts);
            let current = map.entry(ip).or_insert(0);
            if *current >= max {
                return None;
            }
            *current += 1;
        }
        Some(Self { ip, counts })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        let mut map = lock_counts(&self.counts);
        if let Some(current) = map.get_mut(&self.ip) {
            *current = current.saturating_sub(1);
            if *current == 0 {
                map.remove(&self.ip);
            }
        }
    }
}
