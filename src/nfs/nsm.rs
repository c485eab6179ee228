//! Network Status Monitor (program 100024): tracks which hosts NLM has
//! asked to be notified about on reboot (`SM_MON`/`SM_UNMON`) and the
//! local state counter bumped on `SM_NOTIFY` (XNFS §11), kept as state
//! on one struct rather than a callback per procedure.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::nfs::rpc::{self, AcceptStat};
use crate::nfs::xdr::{Reader, Writer};

pub const NSM_PROGRAM: u32 = 100024;
pub const NSM_VERSION: u32 = 1;

#[derive(Debug, Clone)]
struct Watcher {
    program: u32,
    version: u32,
    proc: u32,
}

#[derive(Default)]
pub struct StatusMonitor {
    state: RwLock<u32>,
    watchers: RwLock<HashMap<String, Watcher>>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        StatusMonitor { state: RwLock::new(1), watchers: RwLock::new(HashMap::new()) }
    }

    pub fn handle_call(&self, raw: &[u8]) -> Vec<u8> {
        let (header, args_offset) = match rpc::parse_call_header(raw) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        if header.prog != NSM_PROGRAM || header.vers != NSM_VERSION {
            return rpc::build_accept_error_reply(header.xid, AcceptStat::ProgMismatch, NSM_VERSION, NSM_VERSION);
        }
        let args = &raw[args_offset..];
        let body = match header.proc {
            0 => Writer::new().into_bytes(),
            1 => self.stat(args),
            2 => self.monitor(args),
            3 => self.unmonitor(args),
            4 => self.unmonitor_all(args),
            6 => {
                self.simulate_crash();
                Vec::new()
            }
            _ => return rpc::build_accept_error_reply(header.xid, AcceptStat::ProcUnavail, 0, 0),
        };
        let mut out = rpc::build_success_header(header.xid);
        out.extend(body);
        out
    }

    fn stat(&self, args: &[u8]) -> Vec<u8> {
        let mut r = Reader::new(args);
        let _host = r.string().unwrap_or_default();
        let mut w = Writer::new();
        w.bool(true); // SM_OK, monitoring available
        w.u32(*self.state.read().unwrap());
        w.into_bytes()
    }

    fn monitor(&self, args: &[u8]) -> Vec<u8> {
        let mut r = Reader::new(args);
        let host = r.string().unwrap_or_default();
        let watcher_name = r.string().unwrap_or_default();
        let program = r.u32().unwrap_or(0);
        let version = r.u32().unwrap_or(0);
        let proc = r.u32().unwrap_or(0);
        self.watchers.write().unwrap().insert(host, Watcher { program, version, proc });
        let _ = watcher_name;
        let mut w = Writer::new();
        w.u32(0); // stat_res: resok
        w.u32(*self.state.read().unwrap());
        w.into_bytes()
    }

    fn unmonitor(&self, args: &[u8]) -> Vec<u8> {
        let mut r = Reader::new(args);
        let host = r.string().unwrap_or_default();
        self.watchers.write().unwrap().remove(&host);
        let mut w = Writer::new();
        w.u32(*self.state.read().unwrap());
        w.into_bytes()
    }

    fn unmonitor_all(&self, _args: &[u8]) -> Vec<u8> {
        self.watchers.write().unwrap().clear();
        let mut w = Writer::new();
        w.u32(*self.state.read().unwrap());
        w.into_bytes()
    }

    /// Bumps the local state counter, as a real NSM would on reboot
    /// before replaying `SM_NOTIFY` to every registered watcher. The
    /// notify callback itself needs an RPC client to each watcher's
    /// `(program, version, proc)`, out of scope for this dispatcher.
    fn simulate_crash(&self) {
        let mut state = self.state.write().unwrap();
        *state = state.wrapping_add(2); // NSM state counters stay even while up
    }
}
