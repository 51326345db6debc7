//! Network reachability checks consulted before each batch send

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkReachability {
    NotReachable,
    ViaCarrier,
    ViaLocalArea,
}

impl NetworkReachability {
    pub fn is_reachable(self) -> bool {
        !matches!(self, NetworkReachability::NotReachable)
    }

    fn to_u8(self) -> u8 {
        match self {
            NetworkReachability::NotReachable => 0,
            NetworkReachability::ViaCarrier => 1,
            NetworkReachability::ViaLocalArea => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => NetworkReachability::NotReachable,
            1 => NetworkReachability::ViaCarrier,
            _ => NetworkReachability::ViaLocalArea,
        }
    }
}

#[async_trait]
pub trait Reachability: Send + Sync {
    async fn status(&self) -> NetworkReachability;
}

/// Reachability state pushed in by the host application.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct ReachabilityHandle {
    state: Arc<AtomicU8>,
}

impl ReachabilityHandle {
    pub fn new(initial: NetworkReachability) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(initial.to_u8())),
        }
    }

    /// Record the latest status reported by the host
    pub fn set(&self, status: NetworkReachability) {
        self.state.store(status.to_u8(), Ordering::Release);
    }

    /// Last recorded status
    pub fn get(&self) -> NetworkReachability {
        NetworkReachability::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl Default for ReachabilityHandle {
    fn default() -> Self {
        Self::new(NetworkReachability::ViaLocalArea)
    }
}

#[async_trait]
impl Reachability for ReachabilityHandle {
    async fn status(&self) -> NetworkReachability {
        self.get()
    }
}

/// Probes the collector by opening (and dropping) a TCP connection
#[derive(Debug, Clone)]
pub struct ConnectProbe {
    addr: String,
    timeout: Duration,
}

impl ConnectProbe {
    /// Probe `addr` (`host:port`), giving up after `timeout`
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Derive `host:port` from a collector base URL
    pub fn for_url(base_url: &str, timeout: Duration) -> Option<Self> {
        let url = reqwest::Url::parse(base_url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{}:{}", host, port), timeout))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Reachability for ConnectProbe {
    async fn status(&self) -> NetworkReachability {
        match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => NetworkReachability::ViaLocalArea,
            Ok(Err(e)) => {
                debug!("Collector {} not reachable: {}", self.addr, e);
                NetworkReachability::NotReachable
            }
            Err(_) => {
                debug!("Reachability probe to {} timed out", self.addr);
                NetworkReachability::NotReachable
            }
        }
    }
}
