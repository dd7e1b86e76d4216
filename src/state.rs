//! Shared application state
//!
//! One [`AppState`] is created at startup and shared by every handler. It
//! owns the configuration, the session registry, the completion backend,
//! and the relay connection accounting used by the connection-limit
//! middleware.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::core::completion::{CompletionBackend, OpenAiCompletion};
use crate::core::session::SessionStore;

/// Why a relay connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The global relay connection limit has been reached
    GlobalLimitReached,
    /// This client IP has too many open relay connections
    PerIpLimitReached,
}

/// Application state shared across all handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub sessions: SessionStore,
    pub completion: Arc<dyn CompletionBackend>,
    active_connections: AtomicUsize,
    connections_per_ip: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Build state with the completion backend derived from configuration.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let backend = Arc::new(OpenAiCompletion::new(
            config.completion_api_key.clone().unwrap_or_default(),
            config.completion_base_url.clone(),
            config.completion_model.clone(),
        ));
        Self::with_backend(config, backend)
    }

    /// Build state around an externally supplied backend. Used by tests to
    /// script completion responses.
    pub fn with_backend(config: ServerConfig, completion: Arc<dyn CompletionBackend>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionStore::new(),
            completion,
            active_connections: AtomicUsize::new(0),
            connections_per_ip: DashMap::new(),
        })
    }

    /// Reserve a relay connection slot for the given client IP.
    ///
    /// The caller must pair a successful acquire with exactly one
    /// [`release_connection`](Self::release_connection) at teardown.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_relay_connections
            && self.active_connections.load(Ordering::Acquire) >= max
        {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        {
            let mut per_ip = self.connections_per_ip.entry(ip).or_insert(0);
            if *per_ip >= self.config.max_connections_per_ip {
                return Err(ConnectionLimitError::PerIpLimitReached);
            }
            *per_ip += 1;
        }

        self.active_connections.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Release a previously acquired relay connection slot.
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });

        let emptied = match self.connections_per_ip.get_mut(&ip) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(1);
                *entry == 0
            }
            None => false,
        };
        if emptied {
            self.connections_per_ip.remove_if(&ip, |_, count| *count == 0);
        }
    }

    pub fn active_relay_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }
}
