//! NFS Session Table + File-Id Cache: sessions interned
//! by the authenticator's session key, one table per auth type, plus
//! the `fileId -> relativePath` cache that lets handles stay opaque.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use tracing::info;

use crate::auth::{ClientInfo, NfsAuthenticator, RpcCredential, SessionKey};
use crate::error::EngineError;
use crate::nfs::file_cache::OpenFileCache;
use crate::share::{ShareTable, TreeConnection};
use crate::vfs::VfsPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    Null,
    Unix,
}

fn auth_kind(cred: &RpcCredential) -> AuthKind {
    match cred {
        RpcCredential::Null => AuthKind::Null,
        RpcCredential::Unix { .. } => AuthKind::Unix,
    }
}

/// Active search slot table for READDIR-style cookies.
pub struct SearchSlots {
    slots: RwLock<Vec<Option<crate::vfs::SearchHandle>>>,
}

impl SearchSlots {
    pub const DEFAULT: usize = 32;
    pub const MAX: usize = 256;

    pub fn new() -> Self {
        SearchSlots { slots: RwLock::new(Vec::with_capacity(Self::DEFAULT)) }
    }

    pub fn insert(&self, handle: crate::vfs::SearchHandle) -> Result<usize, EngineError> {
        let mut slots = self.slots.write().unwrap();
        if let Some(free) = slots.iter().position(|s| s.is_none()) {
            slots[free] = Some(handle);
            return Ok(free);
        }
        if slots.len() >= Self::MAX {
            return Err(EngineError::OutOfCapacity);
        }
        slots.push(Some(handle));
        Ok(slots.len() - 1)
    }

    pub fn take(&self, id: usize) -> Option<crate::vfs::SearchHandle> {
        let mut slots = self.slots.write().unwrap();
        slots.get_mut(id).and_then(|s| s.take())
    }
}

impl Default for SearchSlots {
    fn default() -> Self {
        Self::new()
    }
}

/// One interned NFS session.
pub struct NfsSession {
    pub key: SessionKey,
    pub kind: AuthKind,
    pub remote_addr: SocketAddr,
    pub client: ClientInfo,
    pub open_files: Arc<OpenFileCache>,
    pub file_id_cache: DashMap<u64, VfsPath>,
    pub tree_cache: DashMap<String, TreeConnection>,
    pub searches: SearchSlots,
    pub next_file_id: AtomicU64,
    last_access: RwLock<Instant>,
}

impl NfsSession {
    pub fn touch(&self) {
        *self.last_access.write().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_access.read().unwrap().elapsed()
    }

    pub fn allocate_file_id(&self, path: &VfsPath) -> u64 {
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        self.file_id_cache.insert(id, path.clone());
        id
    }

    pub async fn get_tree(
        &self,
        shares: &ShareTable,
        share_name: &str,
    ) -> Result<TreeConnection, EngineError> {
        if let Some(tc) = self.tree_cache.get(share_name) {
            return Ok(tc.clone());
        }
        let tc = shares.connect(share_name, self.client.clone())?;
        self.tree_cache.insert(share_name.to_owned(), tc.clone());
        Ok(tc)
    }
}

/// Two tables (one per auth type), keyed by the session key the
/// authenticator minted.
#[derive(Default)]
pub struct NfsSessionTable {
    null_sessions: DashMap<SessionKey, Arc<NfsSession>>,
    unix_sessions: DashMap<SessionKey, Arc<NfsSession>>,
    io_timer: std::time::Duration,
    close_timer: std::time::Duration,
}

impl NfsSessionTable {
    pub fn new(io_timer: std::time::Duration, close_timer: std::time::Duration) -> Self {
        NfsSessionTable {
            null_sessions: DashMap::new(),
            unix_sessions: DashMap::new(),
            io_timer,
            close_timer,
        }
    }

    fn table(&self, kind: AuthKind) -> &DashMap<SessionKey, Arc<NfsSession>> {
        match kind {
            AuthKind::Null => &self.null_sessions,
            AuthKind::Unix => &self.unix_sessions,
        }
    }

    /// Locates or allocates a session for `cred`.
    pub async fn find_or_create(
        &self,
        cred: &RpcCredential,
        remote_addr: SocketAddr,
        authenticator: &dyn NfsAuthenticator,
    ) -> Result<Arc<NfsSession>, EngineError> {
        let kind = auth_kind(cred);
        let key = authenticator.authenticate_rpc_client(cred).await.ok_or(EngineError::NotLoggedOn)?;
        if let Some(existing) = self.table(kind).get(&key) {
            existing.touch();
            return Ok(existing.clone());
        }
        let client = authenticator.get_rpc_client_information(key).await;
        let session = Arc::new(NfsSession {
            key,
            kind,
            remote_addr,
            client,
            open_files: OpenFileCache::new(self.io_timer, self.close_timer),
            file_id_cache: DashMap::new(),
            tree_cache: DashMap::new(),
            searches: SearchSlots::new(),
            next_file_id: AtomicU64::new(1),
            last_access: RwLock::new(Instant::now()),
        });
        self.table(kind).insert(key, session.clone());
        info!(?kind, ?key, "interned new NFS session");
        Ok(session)
    }

    /// Removes every session from `remote_addr`.
    pub fn remove_by_socket(&self, remote_addr: SocketAddr) {
        for table in [&self.null_sessions, &self.unix_sessions] {
            table.retain(|_, s| s.remote_addr != remote_addr);
        }
    }

    /// Removes one session by its key.
    pub fn remove_by_key(&self, kind: AuthKind, key: SessionKey) {
        self.table(kind).remove(&key);
    }

    pub fn len(&self) -> usize {
        self.null_sessions.len() + self.unix_sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};

    struct FixedAuth(SessionKey);

    #[async_trait]
    impl NfsAuthenticator for FixedAuth {
        async fn authenticate_rpc_client(&self, _cred: &RpcCredential) -> Option<SessionKey> {
            Some(self.0)
        }
        async fn get_rpc_client_information(&self, _key: SessionKey) -> ClientInfo {
            ClientInfo {
                user_name: "u".into(),
                uid: 0,
                gid: 0,
                remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 111),
            }
        }
        async fn set_current_user(&self, _info: &ClientInfo) {}
    }

    #[tokio::test]
    async fn find_or_create_interns_once() {
        let table = NfsSessionTable::new(std::time::Duration::from_secs(5), std::time::Duration::from_secs(30));
        let auth = FixedAuth(SessionKey(7));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2049);
        let s1 = table.find_or_create(&RpcCredential::Null, addr, &auth).await.unwrap();
        let s2 = table.find_or_create(&RpcCredential::Null, addr, &auth).await.unwrap();
        assert_eq!(s1.key, s2.key);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn remove_by_socket_drops_matching_sessions() {
        let table = NfsSessionTable::new(std::time::Duration::from_secs(5), std::time::Duration::from_secs(30));
        let auth = FixedAuth(SessionKey(1));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2049);
        table.find_or_create(&RpcCredential::Null, addr, &auth).await.unwrap();
        table.remove_by_socket(addr);
        assert_eq!(table.len(), 0);
    }
}
