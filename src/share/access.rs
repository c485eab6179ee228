//! Access-Control Gate: host allow/deny lists and read-only
//! enforcement, checked before a `DiskInterface` call is allowed to
//! mutate a share.

use std::net::IpAddr;

/// Host-based allow/deny policy for a single share. `None` fields mean
/// "no restriction"; when both lists are set, deny wins.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    allow: Option<Vec<IpAddr>>,
    deny: Option<Vec<IpAddr>>,
}

impl AccessGate {
    pub fn allow_all() -> Self {
        AccessGate { allow: None, deny: None }
    }

    pub fn with_allow(mut self, hosts: Vec<IpAddr>) -> Self {
        self.allow = Some(hosts);
        self
    }

    pub fn with_deny(mut self, hosts: Vec<IpAddr>) -> Self {
        self.deny = Some(hosts);
        self
    }

    pub fn host_allowed(&self, addr: &IpAddr) -> bool {
        if let Some(deny) = &self.deny {
            if deny.contains(addr) {
                return false;
            }
        }
        match &self.allow {
            Some(allow) => allow.contains(addr),
            None => true,
        }
    }
}

/// Write-operation gate: a share marked read-only rejects every
/// mutating `DiskInterface` call before it reaches the driver, mapped
/// to `EngineError::AccessDenied`.
pub fn require_writable(read_only: bool) -> Result<(), crate::error::EngineError> {
    if read_only {
        Err(crate::error::EngineError::AccessDenied)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_wins_over_allow() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let gate = AccessGate::allow_all().with_allow(vec![ip]).with_deny(vec![ip]);
        assert!(!gate.host_allowed(&ip));
    }

    #[test]
    fn allow_list_restricts() {
        let allowed: IpAddr = "10.0.0.1".parse().unwrap();
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        let gate = AccessGate::allow_all().with_allow(vec![allowed]);
        assert!(gate.host_allowed(&allowed));
        assert!(!gate.host_allowed(&other));
    }
}
