//! Shared-device registry, tree connections and the access-control
//! gate.

pub mod access;
pub mod device;
pub mod tree;

pub use access::AccessGate;
pub use device::SharedDevice;
pub use tree::{TreeConnection, TreeId};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::auth::ClientInfo;
use crate::error::EngineError;

/// The server's configured share list, and the `TreeId` allocator every
/// protocol engine mints tree connections from.
pub struct ShareTable {
    shares: HashMap<String, Arc<SharedDevice>>,
    next_tree_id: AtomicU32,
}

impl ShareTable {
    pub fn new() -> Self {
        ShareTable { shares: HashMap::new(), next_tree_id: AtomicU32::new(1) }
    }

    pub fn add(&mut self, device: SharedDevice) {
        self.shares.insert(device.name.clone(), Arc::new(device));
    }

    pub fn get(&self, name: &str) -> Option<Arc<SharedDevice>> {
        self.shares.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shares.keys().map(String::as_str)
    }

    /// Attaches `client` to the named share, enforcing the share's
    /// connect-time host policy.
    pub fn connect(&self, name: &str, client: ClientInfo) -> Result<TreeConnection, EngineError> {
        let device = self.shares.get(name).ok_or(EngineError::NotFound)?.clone();
        if !device.permits_connect(&client) {
            return Err(EngineError::AccessDenied);
        }
        let id = TreeId(self.next_tree_id.fetch_add(1, Ordering::Relaxed));
        Ok(TreeConnection::new(id, device, client))
    }
}

impl Default for ShareTable {
    fn default() -> Self {
        Self::new()
    }
}
