//! NFS Open-File Cache with Idle Reaper: keeps
//! `NetworkFile`s open across RPCs, closing them after I/O quiescence
//! but retaining the cache entry briefly so a follow-up READ/WRITE
//! reopens rather than re-walking the tree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::auth::{ClientInfo, NfsAuthenticator};
use crate::error::EngineError;
use crate::share::TreeConnection;
use crate::vfs::{NetworkFile, VfsPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Open,
    Closed,
}

struct CacheEntry {
    net_file: Option<NetworkFile>,
    tree: TreeConnection,
    path: VfsPath,
    state: EntryState,
    expires_at: Instant,
}

/// Per-session cache, `fileId -> entry`. Shared with the
/// background reaper via `Arc`; `Mutex` rather than `DashMap` because
/// the reaper needs to walk-and-mutate the whole map atomically per
/// sweep.
pub struct OpenFileCache {
    entries: Mutex<HashMap<u64, CacheEntry>>,
    io_timer: Duration,
    close_timer: Duration,
}

impl OpenFileCache {
    pub fn new(io_timer: Duration, close_timer: Duration) -> Arc<Self> {
        Arc::new(OpenFileCache { entries: Mutex::new(HashMap::new()), io_timer, close_timer })
    }

    /// Returns an open `NetworkFile` for `file_id`, opening it via the
    /// driver if the cache doesn't have it or it was closed.
    pub async fn find_or_open(
        &self,
        file_id: u64,
        tree: &TreeConnection,
        path: &VfsPath,
    ) -> Result<NetworkFile, EngineError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&file_id) {
            entry.expires_at = Instant::now() + self.io_timer;
            if let Some(nf) = &entry.net_file {
                if entry.state == EntryState::Open {
                    return Ok(nf.clone());
                }
            }
            let nf = tree.disk().open_file(tree, path, crate::vfs::OpenMode::ReadWrite).await?;
            entry.net_file = Some(nf.clone());
            entry.state = EntryState::Open;
            return Ok(nf);
        }
        let nf = tree.disk().open_file(tree, path, crate::vfs::OpenMode::ReadWrite).await?;
        entries.insert(
            file_id,
            CacheEntry {
                net_file: Some(nf.clone()),
                tree: tree.clone(),
                path: path.clone(),
                state: EntryState::Open,
                expires_at: Instant::now() + self.io_timer,
            },
        );
        Ok(nf)
    }

    /// Refreshes the idle timer after an I/O operation on `file_id`.
    pub async fn touch(&self, file_id: u64) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&file_id) {
            entry.expires_at = Instant::now() + self.io_timer;
        }
    }

    /// One reaper sweep: runs every `io_timer / 2`.
    async fn sweep(&self, authenticator: &dyn NfsAuthenticator, client: &ClientInfo) {
        let now = Instant::now();
        let mut to_finalize: Vec<(u64, TreeConnection, NetworkFile)> = Vec::new();
        {
            let mut entries = self.entries.lock().await;
            let expired: Vec<u64> = entries
                .iter()
                .filter(|(_, e)| e.expires_at < now)
                .map(|(id, _)| *id)
                .collect();
            for id in expired {
                let entry = entries.get_mut(&id).unwrap();
                match entry.state {
                    EntryState::Open => {
                        if let Some(nf) = entry.net_file.take() {
                            to_finalize.push((id, entry.tree.clone(), nf));
                        }
                        entry.state = EntryState::Closed;
                        entry.expires_at = now + self.close_timer;
                    }
                    EntryState::Closed => {
                        entries.remove(&id);
                    }
                }
            }
        }
        for (id, tree, nf) in to_finalize {
            authenticator.set_current_user(client).await;
            if let Err(e) = tree.disk().close_file(&tree, nf).await {
                warn!(file_id = id, error = %e, "idle reaper close failed");
            } else {
                trace!(file_id = id, "idle reaper closed file");
            }
        }
    }

    /// Spawns the background reaper task, waking every `io_timer / 2`
    /// for the lifetime of `cache`.
    pub fn spawn_reaper(
        cache: Arc<Self>,
        authenticator: Arc<dyn NfsAuthenticator>,
        client: ClientInfo,
    ) -> tokio::task::JoinHandle<()> {
        let period = cache.io_timer / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                cache.sweep(authenticator.as_ref(), &client).await;
            }
        })
    }

    pub async fn remove_all(&self) -> Vec<(TreeConnection, NetworkFile)> {
        let mut entries = self.entries.lock().await;
        entries
            .drain()
            .filter_map(|(_, e)| e.net_file.map(|nf| (e.tree, nf)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RpcCredential;
    use crate::share::{AccessGate, ShareTable, SharedDevice};
    use crate::vfs::testing::MemoryDisk;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;

    struct NoopAuth;

    #[async_trait]
    impl NfsAuthenticator for NoopAuth {
        async fn authenticate_rpc_client(&self, _cred: &RpcCredential) -> Option<crate::auth::SessionKey> {
            Some(crate::auth::SessionKey(1))
        }
        async fn get_rpc_client_information(&self, _key: crate::auth::SessionKey) -> ClientInfo {
            test_client()
        }
        async fn set_current_user(&self, _info: &ClientInfo) {}
    }

    fn test_client() -> ClientInfo {
        ClientInfo {
            user_name: "nfs".into(),
            uid: 0,
            gid: 0,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2049),
        }
    }

    fn test_tree() -> TreeConnection {
        let mut table = ShareTable::new();
        table.add(SharedDevice::new("home", Arc::new(MemoryDisk::new())).with_access(AccessGate::allow_all()));
        table.connect("home", test_client()).unwrap()
    }

    #[tokio::test]
    async fn reopens_after_idle_close_then_removes_after_retention() {
        let tree = test_tree();
        let path = VfsPath::root().join("a.txt");
        tree.disk().create_file(&tree, &path, Default::default()).await.unwrap();
        let attr = tree.disk().get_file_information(&tree, &path).await.unwrap();

        let cache = OpenFileCache::new(Duration::from_millis(5), Duration::from_millis(10));
        cache.find_or_open(attr.fileid, &tree, &path).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.sweep(&NoopAuth, &test_client()).await;

        // Still retained (Closed) — a subsequent find_or_open reopens.
        let reopened = cache.find_or_open(attr.fileid, &tree, &path).await.unwrap();
        assert_eq!(reopened.file_id, attr.fileid);

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.sweep(&NoopAuth, &test_client()).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        cache.sweep(&NoopAuth, &test_client()).await;
        let entries = cache.entries.lock().await;
        assert!(!entries.contains_key(&attr.fileid));
    }
}
