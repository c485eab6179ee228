//! FTP Data-Channel Manager: PASV listeners and PORT
//! targets, tracked in a table keyed by local port so a session only
//! ever needs to carry a port id, not a socket.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Active,
    Passive,
}

/// One allocated data channel. Passive holds a listener until first
/// use; active holds a target address and connects lazily.
pub enum Endpoint {
    Passive(TcpListener),
    Active(SocketAddr),
}

pub struct DataSession {
    pub port: u16,
    endpoint: tokio::sync::Mutex<Option<Endpoint>>,
    pub in_progress: AtomicBool,
    pub abort: AtomicBool,
    pub bytes_transferred: AtomicU64,
}

/// Table of live data sessions keyed by local port (passive
/// allocations; active sessions are keyed by the ephemeral port chosen
/// for the not-yet-opened outbound connection's bookkeeping slot).
#[derive(Default)]
pub struct DataChannelManager {
    by_port: DashMap<u16, Arc<DataSession>>,
}

impl DataChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a listening socket on an ephemeral port, backlog 1
    /// (`TcpListener::bind` already uses the OS default backlog;
    /// acceptance is single-shot via `getSocket`, which is the
    /// semantic that matters here).
    pub async fn allocate_passive(
        &self,
        bind_addr: IpAddr,
    ) -> Result<(Arc<DataSession>, SocketAddr), EngineError> {
        let listener = TcpListener::bind((bind_addr, 0)).await?;
        let local = listener.local_addr()?;
        let ds = Arc::new(DataSession {
            port: local.port(),
            endpoint: tokio::sync::Mutex::new(Some(Endpoint::Passive(listener))),
            in_progress: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            bytes_transferred: AtomicU64::new(0),
        });
        self.by_port.insert(local.port(), ds.clone());
        Ok((ds, local))
    }

    /// Records the client's advertised address for a future PORT/EPRT
    /// connection; the connect itself is deferred to `get_socket`.
    pub fn allocate_active(&self, client_addr: SocketAddr) -> Arc<DataSession> {
        // Active sessions don't occupy a real listening port; a
        // synthetic key (the client's own port) is enough to let
        // `release` find and drop this entry later.
        let key = client_addr.port();
        let ds = Arc::new(DataSession {
            port: key,
            endpoint: tokio::sync::Mutex::new(Some(Endpoint::Active(client_addr))),
            in_progress: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            bytes_transferred: AtomicU64::new(0),
        });
        self.by_port.insert(key, ds.clone());
        ds
    }

    /// Accepts (passive) or connects (active) and returns a ready
    /// socket with linger disabled.
    pub async fn get_socket(&self, ds: &DataSession) -> Result<TcpStream, EngineError> {
        let mut slot = ds.endpoint.lock().await;
        let endpoint = slot.take().ok_or(EngineError::DataChannelUnavailable)?;
        let stream = match endpoint {
            Endpoint::Passive(listener) => {
                let (stream, _) = listener
                    .accept()
                    .await
                    .map_err(|_| EngineError::DataChannelUnavailable)?;
                stream
            }
            Endpoint::Active(addr) => TcpStream::connect(addr)
                .await
                .map_err(|_| EngineError::DataChannelUnavailable)?,
        };
        stream.set_linger(None).ok();
        Ok(stream)
    }

    /// Closes and removes a data session, releasing its port.
    pub fn release(&self, ds: &DataSession) {
        self.by_port.remove(&ds.port);
    }

    pub fn has_port(&self, port: u16) -> bool {
        self.by_port.contains_key(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passive_allocate_then_release_frees_port() {
        let mgr = DataChannelManager::new();
        let (ds, addr) = mgr.allocate_passive("127.0.0.1".parse().unwrap()).await.unwrap();
        assert_eq!(ds.port, addr.port());
        assert!(mgr.by_port.contains_key(&ds.port));
        mgr.release(&ds);
        assert!(!mgr.by_port.contains_key(&ds.port));
    }
}
