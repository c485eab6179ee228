//! `MOUNT` protocol (RFC 1813 §5): a sibling RPC program (100005) that
//! hands a client its first file handle for a share. Procedure numbers
//! and status codes follow RFC 1813 §5.2, wired directly into
//! [`MountProgram`] rather than left as a callback interface.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use crate::nfs::handle::{share_id_for_name, FileHandle, HandleType};
use crate::nfs::rpc::{self, AcceptStat};
use crate::nfs::xdr::{Reader, Writer};
use crate::share::ShareTable;

pub const MOUNT_PROGRAM: u32 = 100005;
pub const MOUNT_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStat3 {
    Ok = 0,
    NoEnt = 2,
    Acces = 13,
    NotDir = 20,
}

/// One outstanding mount, recorded so `DUMP`/`UMNTALL` can report and
/// tear them down (RFC 1813 §5.2.2/§5.2.4).
#[derive(Debug, Clone)]
struct MountEntry {
    hostname: String,
    directory: String,
}

#[derive(Default)]
pub struct MountProgram {
    entries: RwLock<Vec<MountEntry>>,
}

impl MountProgram {
    pub fn new() -> Arc<Self> {
        Arc::new(MountProgram::default())
    }

    pub async fn handle_call(
        &self,
        shares: &ShareTable,
        raw: &[u8],
        remote_addr: SocketAddr,
    ) -> Vec<u8> {
        let (header, args_offset) = match rpc::parse_call_header(raw) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        if header.prog != MOUNT_PROGRAM || header.vers != MOUNT_VERSION {
            return rpc::build_accept_error_reply(header.xid, AcceptStat::ProgMismatch, MOUNT_VERSION, MOUNT_VERSION);
        }
        let args = &raw[args_offset..];
        let body = match header.proc {
            0 => Writer::new().into_bytes(),
            1 => self.mnt(shares, args, remote_addr),
            2 => self.dump(),
            3 => {
                self.umnt(args, remote_addr);
                Vec::new()
            }
            4 => {
                self.umntall(remote_addr);
                Vec::new()
            }
            5 => self.export(shares),
            _ => return rpc::build_accept_error_reply(header.xid, AcceptStat::ProcUnavail, 0, 0),
        };
        let mut out = rpc::build_success_header(header.xid);
        out.extend(body);
        out
    }

    fn mnt(&self, shares: &ShareTable, args: &[u8], remote_addr: SocketAddr) -> Vec<u8> {
        let mut r = Reader::new(args);
        let dirpath = r.string().unwrap_or_default();
        let share_name = dirpath.trim_start_matches('/').to_owned();
        let mut w = Writer::new();
        if shares.get(&share_name).is_none() {
            w.u32(MountStat3::NoEnt as u32);
            return w.into_bytes();
        }
        self.entries.write().unwrap().push(MountEntry {
            hostname: remote_addr.ip().to_string(),
            directory: share_name.clone(),
        });
        let handle = FileHandle {
            handle_type: HandleType::Share,
            share_id: share_id_for_name(&share_name),
            dir_id: 0,
            file_id: 0,
        };
        w.u32(MountStat3::Ok as u32);
        w.opaque_var(&handle.pack());
        w.u32(0); // zero-length auth-flavors list (AUTH_NULL implied)
        w.into_bytes()
    }

    fn umnt(&self, args: &[u8], remote_addr: SocketAddr) {
        let mut r = Reader::new(args);
        let dirpath = r.string().unwrap_or_default();
        let share_name = dirpath.trim_start_matches('/');
        let host = remote_addr.ip().to_string();
        self.entries.write().unwrap().retain(|e| !(e.hostname == host && e.directory == share_name));
    }

    fn umntall(&self, remote_addr: SocketAddr) {
        let host = remote_addr.ip().to_string();
        self.entries.write().unwrap().retain(|e| e.hostname != host);
    }

    fn dump(&self) -> Vec<u8> {
        let mut w = Writer::new();
        for entry in self.entries.read().unwrap().iter() {
            w.bool(true);
            w.opaque_var(entry.hostname.as_bytes());
            w.opaque_var(entry.directory.as_bytes());
        }
        w.bool(false);
        w.into_bytes()
    }

    fn export(&self, shares: &ShareTable) -> Vec<u8> {
        let mut w = Writer::new();
        for name in shares.names() {
            w.bool(true);
            w.opaque_var(name.as_bytes());
            w.bool(false); // no client-group restriction list modeled
        }
        w.bool(false);
        w.into_bytes()
    }
}
