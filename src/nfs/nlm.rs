//! Network Lock Manager (program 100021): advisory byte-range locks
//! over files named by NFS file handle. The monitor half lives in
//! [`crate::nfs::nsm`], wired as a separate RPC program per RFC.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::nfs::rpc::{self, AcceptStat};
use crate::nfs::xdr::{Reader, Writer};

pub const NLM_PROGRAM: u32 = 100021;
pub const NLM_VERSION: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStat {
    Granted = 0,
    Denied = 1,
    DeniedNolocks = 2,
    Blocked = 3,
    DeniedGracePeriod = 4,
}

#[derive(Debug, Clone)]
struct Lock {
    owner: Vec<u8>,
    exclusive: bool,
    offset: u64,
    len: u64,
}

fn overlaps(a: &Lock, b_offset: u64, b_len: u64) -> bool {
    let a_end = a.offset.saturating_add(a.len.max(1));
    let b_end = b_offset.saturating_add(b_len.max(1));
    a.offset < b_end && b_offset < a_end
}

/// One file's lock list, keyed by the opaque NFS handle bytes.
#[derive(Default)]
pub struct LockManager {
    locks: RwLock<HashMap<Vec<u8>, Vec<Lock>>>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager::default()
    }

    pub fn handle_call(&self, raw: &[u8]) -> Vec<u8> {
        let (header, args_offset) = match rpc::parse_call_header(raw) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        if header.prog != NLM_PROGRAM || header.vers != NLM_VERSION {
            return rpc::build_accept_error_reply(header.xid, AcceptStat::ProgMismatch, NLM_VERSION, NLM_VERSION);
        }
        let args = &raw[args_offset..];
        let body = match header.proc {
            0 => Writer::new().into_bytes(),
            1 => self.test(args),
            2 => self.lock(args),
            3 => self.cancel(args),
            4 => self.unlock(args),
            _ => return rpc::build_accept_error_reply(header.xid, AcceptStat::ProcUnavail, 0, 0),
        };
        let mut out = rpc::build_success_header(header.xid);
        out.extend(body);
        out
    }

    fn parse_lock_args(r: &mut Reader) -> Option<(Vec<u8>, Vec<u8>, bool, Vec<u8>, u64, u64)> {
        let cookie = r.opaque_var().ok()?.to_vec();
        let _block = r.u32().ok()? != 0;
        let exclusive = r.u32().ok()? != 0;
        let fh = r.opaque_var().ok()?.to_vec();
        let owner = r.opaque_var().ok()?.to_vec();
        let _pid = r.u32().ok()?;
        let offset = r.u64().ok()?;
        let len = r.u64().ok()?;
        Some((cookie, fh, exclusive, owner, offset, len))
    }

    fn test(&self, args: &[u8]) -> Vec<u8> {
        let mut r = Reader::new(args);
        let Some((cookie, fh, exclusive, _owner, offset, len)) = Self::parse_lock_args(&mut r) else {
            return reply(&[], LockStat::Denied);
        };
        let locks = self.locks.read().unwrap();
        let conflict = locks.get(&fh).and_then(|list| {
            list.iter().find(|l| (l.exclusive || exclusive) && overlaps(l, offset, len))
        });
        match conflict {
            None => reply(&cookie, LockStat::Granted),
            Some(_) => reply(&cookie, LockStat::Denied),
        }
    }

    fn lock(&self, args: &[u8]) -> Vec<u8> {
        let mut r = Reader::new(args);
        let Some((cookie, fh, exclusive, owner, offset, len)) = Self::parse_lock_args(&mut r) else {
            return reply(&[], LockStat::Denied);
        };
        let mut locks = self.locks.write().unwrap();
        let list = locks.entry(fh).or_default();
        let conflict = list.iter().any(|l| (l.exclusive || exclusive) && overlaps(l, offset, len));
        if conflict {
            return reply(&cookie, LockStat::Denied);
        }
        list.push(Lock { owner, exclusive, offset, len });
        reply(&cookie, LockStat::Granted)
    }

    fn unlock(&self, args: &[u8]) -> Vec<u8> {
        let mut r = Reader::new(args);
        let Some((cookie, fh, _exclusive, _owner, offset, len)) = Self::parse_lock_args(&mut r) else {
            return reply(&[], LockStat::Denied);
        };
        if let Some(list) = self.locks.write().unwrap().get_mut(&fh) {
            list.retain(|l| !(l.offset == offset && l.len == len));
        }
        reply(&cookie, LockStat::Granted)
    }

    fn cancel(&self, args: &[u8]) -> Vec<u8> {
        // A pending blocking request was never queued (this dispatcher
        // never returns Blocked), so cancel always succeeds trivially.
        let mut r = Reader::new(args);
        let cookie = r.opaque_var().map(|c| c.to_vec()).unwrap_or_default();
        reply(&cookie, LockStat::Granted)
    }
}

fn reply(cookie: &[u8], stat: LockStat) -> Vec<u8> {
    let mut w = Writer::new();
    w.opaque_var(cookie);
    w.u32(stat as u32);
    w.into_bytes()
}
