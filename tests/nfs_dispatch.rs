//! End-to-end coverage of the NFS RPC dispatch boundary: program/version
//! validation and a CREATE+LOOKUP round trip through a real `Dispatcher`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};

use sharefs::auth::{ClientInfo, NfsAuthenticator, RpcCredential, SessionKey};
use sharefs::nfs::dispatch::{Dispatcher, NFS_PROGRAM};
use sharefs::nfs::handle::{share_id_for_name, FileHandle, HandleType, HANDLE_LEN};
use sharefs::nfs::session::NfsSessionTable;
use sharefs::share::{ShareTable, SharedDevice};
use sharefs::vfs::testing::MemoryDisk;

struct OpenAuth;

#[async_trait]
impl NfsAuthenticator for OpenAuth {
    async fn authenticate_rpc_client(&self, _cred: &RpcCredential) -> Option<SessionKey> {
        Some(SessionKey(1))
    }

    async fn get_rpc_client_information(&self, _key: SessionKey) -> ClientInfo {
        ClientInfo {
            user_name: "tester".into(),
            uid: 0,
            gid: 0,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0),
        }
    }

    async fn set_current_user(&self, _info: &ClientInfo) {}
}

fn remote() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 51234)
}

fn dispatcher() -> Dispatcher {
    let mut shares = ShareTable::new();
    shares.add(SharedDevice::new("default", Arc::new(MemoryDisk::new())));
    Dispatcher {
        shares: Arc::new(shares),
        sessions: Arc::new(NfsSessionTable::new(Duration::from_secs(30), Duration::from_secs(60))),
        authenticator: Arc::new(OpenAuth),
        version_high: 3,
    }
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn push_opaque_string(out: &mut Vec<u8>, s: &str) {
    push_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
    let pad = (4 - s.len() % 4) % 4;
    out.extend(std::iter::repeat(0u8).take(pad));
}

/// Builds a raw `CALL` body with AUTH_NULL credentials + verifier.
fn call_header(xid: u32, prog: u32, vers: u32, proc: u32) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, xid);
    push_u32(&mut out, 0); // CALL
    push_u32(&mut out, 2); // rpcvers
    push_u32(&mut out, prog);
    push_u32(&mut out, vers);
    push_u32(&mut out, proc);
    push_u32(&mut out, 0); // cred flavor AUTH_NULL
    push_u32(&mut out, 0); // cred len
    push_u32(&mut out, 0); // verf flavor AUTH_NULL
    push_u32(&mut out, 0); // verf len
    out
}

fn root_handle() -> [u8; HANDLE_LEN] {
    FileHandle { handle_type: HandleType::Share, share_id: share_id_for_name("default"), dir_id: 0, file_id: 0 }
        .pack()
}

#[tokio::test]
async fn unsupported_version_returns_prog_mismatch() {
    let d = dispatcher();
    let req = call_header(7, NFS_PROGRAM, 99, 0);
    let reply = d.handle_call(&req, remote()).await;

    assert_eq!(BigEndian::read_u32(&reply[0..4]), 7); // xid echoed
    assert_eq!(BigEndian::read_u32(&reply[8..12]), 0); // MSG_ACCEPTED
    assert_eq!(BigEndian::read_u32(&reply[20..24]), 2); // PROG_MISMATCH
    assert_eq!(BigEndian::read_u32(&reply[24..28]), 3); // low
    assert_eq!(BigEndian::read_u32(&reply[28..32]), 3); // high (only v3 enabled)
}

#[tokio::test]
async fn unknown_program_returns_prog_unavail() {
    let d = dispatcher();
    let req = call_header(1, 100099, 3, 0);
    let reply = d.handle_call(&req, remote()).await;

    assert_eq!(BigEndian::read_u32(&reply[20..24]), 1); // PROG_UNAVAIL
}

#[tokio::test]
async fn create_then_lookup_round_trips_the_same_child() {
    let d = dispatcher();

    let mut create_req = call_header(10, NFS_PROGRAM, 3, 8); // CREATE
    create_req.extend_from_slice(&root_handle());
    push_opaque_string(&mut create_req, "hello.txt");
    let create_reply = d.handle_call(&create_req, remote()).await;
    assert_eq!(BigEndian::read_u32(&create_reply[20..24]), 0); // accepted
    assert_eq!(BigEndian::read_u32(&create_reply[24..28]), 0); // NFS3_OK

    let mut lookup_req = call_header(11, NFS_PROGRAM, 3, 3); // LOOKUP
    lookup_req.extend_from_slice(&root_handle());
    push_opaque_string(&mut lookup_req, "hello.txt");
    let lookup_reply = d.handle_call(&lookup_req, remote()).await;
    assert_eq!(BigEndian::read_u32(&lookup_reply[24..28]), 0); // NFS3_OK

    let missing_req = {
        let mut r = call_header(12, NFS_PROGRAM, 3, 3);
        r.extend_from_slice(&root_handle());
        push_opaque_string(&mut r, "missing.txt");
        r
    };
    let missing_reply = d.handle_call(&missing_req, remote()).await;
    assert_eq!(BigEndian::read_u32(&missing_reply[24..28]), 2); // NFS3ERR_NOENT
}
