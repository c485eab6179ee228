//! A tree connection: one session's attachment to one `SharedDevice`,
//! the unit of identity threaded through every `DiskInterface` call so
//! a driver can recover "which session, which share" without a second
//! capability call.

use std::sync::Arc;

use crate::auth::ClientInfo;
use crate::share::device::SharedDevice;

/// Monotonic per-server tree-connect id (SMB calls this the Tree ID;
/// FTP and NFS sessions only ever hold exactly one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub u32);

/// A session's attachment to a [`SharedDevice`]. Cheap to clone — holds
/// only `Arc`s and the identity of the connecting client.
#[derive(Clone)]
pub struct TreeConnection {
    pub id: TreeId,
    pub device: Arc<SharedDevice>,
    pub client: ClientInfo,
}

impl TreeConnection {
    pub fn new(id: TreeId, device: Arc<SharedDevice>, client: ClientInfo) -> Self {
        TreeConnection { id, device, client }
    }

    pub fn disk(&self) -> &dyn crate::vfs::DiskInterface {
        self.device.disk.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.device.read_only
    }
}
