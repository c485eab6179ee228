//! A configured share: the name clients connect to, the driver that
//! backs it, and the access policy gating every call onto it.

use std::sync::Arc;

use crate::auth::ClientInfo;
use crate::share::access::AccessGate;
use crate::vfs::DiskInterface;

/// One entry from the server's share list.
/// Long-lived: created at startup, referenced by every `TreeConnection`
/// that attaches to it.
pub struct SharedDevice {
    pub name: String,
    pub comment: String,
    pub disk: Arc<dyn DiskInterface>,
    pub access: AccessGate,
    pub read_only: bool,
}

impl SharedDevice {
    pub fn new(name: impl Into<String>, disk: Arc<dyn DiskInterface>) -> Self {
        SharedDevice {
            name: name.into(),
            comment: String::new(),
            disk,
            access: AccessGate::allow_all(),
            read_only: false,
        }
    }

    pub fn with_access(mut self, access: AccessGate) -> Self {
        self.access = access;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Whether `client` may attach to this share at all (tree-connect
    /// time gate, coarser than the per-call `AccessGate` checks made
    /// once attached).
    pub fn permits_connect(&self, client: &ClientInfo) -> bool {
        self.access.host_allowed(&client.remote_addr.ip())
    }
}
