//! SMB Virtual-Circuit List: bounded by a per-dialect
//! maximum, `0` meaning a single VC. A `HashMap` behind a lock with
//! `AtomicU32`-style monotonic id allocation, the same pattern
//! [`crate::share::ShareTable`] uses for its own table.

use std::collections::HashMap;

use crate::auth::ClientInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VcId(pub u16);

#[derive(Debug, Clone)]
pub struct VirtualCircuit {
    pub id: VcId,
    pub client: ClientInfo,
}

#[derive(Debug)]
pub struct VcList {
    max: usize,
    next_id: u16,
    circuits: HashMap<VcId, VirtualCircuit>,
}

impl VcList {
    /// `max == 0` behaves as a single-VC limit.
    pub fn new(max: usize) -> Self {
        VcList { max: max.max(1), next_id: 0, circuits: HashMap::new() }
    }

    pub fn add(&mut self, client: ClientInfo) -> Result<VcId, InvalidId> {
        if self.circuits.len() >= self.max {
            return Err(InvalidId);
        }
        let id = VcId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.circuits.insert(id, VirtualCircuit { id, client });
        Ok(id)
    }

    /// Finds a VC, re-installing its client info as the session's
    /// current identity for subsequent authorization checks (spec
    /// §4.I).
    pub fn find(&self, id: VcId) -> Option<&VirtualCircuit> {
        self.circuits.get(&id)
    }

    pub fn remove(&mut self, id: VcId) -> Option<VirtualCircuit> {
        self.circuits.remove(&id)
    }

    pub fn clear(&mut self) {
        self.circuits.clear();
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Transfers this list's circuits verbatim into a fresh list,
    /// leaving `self` empty.
    pub fn transfer_into(&mut self, target: &mut VcList) {
        for (id, vc) in self.circuits.drain() {
            target.circuits.insert(id, vc);
        }
        target.next_id = target.next_id.max(self.next_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidId;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn client() -> ClientInfo {
        ClientInfo {
            user_name: "alice".into(),
            uid: 1000,
            gid: 1000,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 445),
        }
    }

    #[test]
    fn overflow_returns_invalid_id() {
        let mut list = VcList::new(1);
        list.add(client()).unwrap();
        assert_eq!(list.add(client()), Err(InvalidId));
    }

    #[test]
    fn transfer_moves_circuits_and_empties_source() {
        let mut old = VcList::new(4);
        old.add(client()).unwrap();
        let mut fresh = VcList::new(4);
        old.transfer_into(&mut fresh);
        assert!(old.is_empty());
        assert_eq!(fresh.len(), 1);
    }
}
