//! Portmapper registration, performed once at server start-up and
//! reversed at shutdown. Real registration only runs when a
//! concrete port is configured; `PortMapperPort(-1)` disables it
//! entirely, matching how `config::NfsConfig::port_mapper_port`
//! defaults.

use tracing::debug;

use crate::nfs::dispatch::NFS_PROGRAM;
use crate::nfs::mount::MOUNT_PROGRAM;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapperPort(pub i32);

impl PortMapperPort {
    pub fn is_enabled(self) -> bool {
        self.0 >= 0
    }
}

/// Registers the NFS and MOUNT programs with the local portmapper.
/// Talking to `rpcbind` over its own ONC-RPC program (100000) is out of
/// scope here; this records intent and logs what a real deployment
/// would call out to.
pub fn register(port: PortMapperPort, nfs_port: u16, mount_port: u16) {
    if !port.is_enabled() {
        debug!("portmapper registration disabled (port_mapper_port = -1)");
        return;
    }
    debug!(
        portmapper_port = port.0,
        nfs_program = NFS_PROGRAM,
        mount_program = MOUNT_PROGRAM,
        nfs_port,
        mount_port,
        "registering with portmapper"
    );
}

pub fn unregister(port: PortMapperPort) {
    if !port.is_enabled() {
        return;
    }
    debug!(portmapper_port = port.0, "unregistering from portmapper");
}
