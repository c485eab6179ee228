//! ONC-RPC wire types (RFC 1057) and TCP fragment framing: just enough
//! to drive NFSv3 dispatch, not a full XDR/NFS3 type dump.

use byteorder::{BigEndian, ByteOrder};

use crate::auth::RpcCredential;
use crate::error::EngineError;

pub const LAST_FRAGMENT_BIT: u32 = 0x8000_0000;

/// Reads one RPC record from a TCP byte stream, following the
/// `last-fragment` bit convention (RFC 1057 §10). Returns the
/// assembled message and how many bytes of `buf` were consumed, or
/// `None` if `buf` doesn't yet hold a complete record.
pub fn read_tcp_record(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, EngineError> {
    let mut offset = 0;
    let mut message = Vec::new();
    loop {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let header = BigEndian::read_u32(&buf[offset..offset + 4]);
        let last = header & LAST_FRAGMENT_BIT != 0;
        let len = (header & !LAST_FRAGMENT_BIT) as usize;
        if buf.len() < offset + 4 + len {
            return Ok(None);
        }
        message.extend_from_slice(&buf[offset + 4..offset + 4 + len]);
        offset += 4 + len;
        if last {
            return Ok(Some((message, offset)));
        }
    }
}

/// Frames a reply for TCP: a single fragment with the last-fragment
/// bit set. Replies here are never split across multiple fragments.
pub fn frame_tcp_record(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    let header = LAST_FRAGMENT_BIT | (payload.len() as u32);
    let mut hdr_bytes = [0u8; 4];
    BigEndian::write_u32(&mut hdr_bytes, header);
    out.extend_from_slice(&hdr_bytes);
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Call = 0,
    Reply = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStat {
    Success = 0,
    ProgUnavail = 1,
    ProgMismatch = 2,
    ProcUnavail = 3,
    GarbageArgs = 4,
    SystemErr = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectStat {
    RpcMismatch = 0,
    AuthError = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStat {
    Ok = 0,
    BadCred = 1,
    RejectedCred = 2,
    BadVerf = 3,
    RejectedVerf = 4,
    TooWeak = 5,
}

/// A parsed RPC call header, up to (but not including) the
/// procedure-specific arguments.
#[derive(Debug, Clone)]
pub struct CallHeader {
    pub xid: u32,
    pub rpc_version: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: RpcCredential,
}

/// Parses a call header off the front of `body`, returning the header
/// and the offset where procedure arguments begin.
pub fn parse_call_header(body: &[u8]) -> Result<(CallHeader, usize), EngineError> {
    if body.len() < 24 {
        return Err(EngineError::ProtocolViolation("RPC call header truncated".into()));
    }
    let xid = BigEndian::read_u32(&body[0..4]);
    let msg_type = BigEndian::read_u32(&body[4..8]);
    if msg_type != MsgType::Call as u32 {
        return Err(EngineError::ProtocolViolation("expected CALL message".into()));
    }
    let rpc_version = BigEndian::read_u32(&body[8..12]);
    let prog = BigEndian::read_u32(&body[12..16]);
    let vers = BigEndian::read_u32(&body[16..20]);
    let proc = BigEndian::read_u32(&body[20..24]);

    let mut offset = 24;
    let (cred, consumed) = parse_opaque_auth(&body[offset..])?;
    offset += consumed;
    let (_verf, consumed) = parse_opaque_auth(&body[offset..])?;
    offset += consumed;

    Ok((CallHeader { xid, rpc_version, prog, vers, proc, cred }, offset))
}

/// Parses an `opaque_auth` (flavor + variable-length body), returning
/// a decoded [`RpcCredential`] for `AUTH_NULL`/`AUTH_UNIX` and the
/// number of bytes consumed including XDR padding.
fn parse_opaque_auth(buf: &[u8]) -> Result<(RpcCredential, usize), EngineError> {
    if buf.len() < 8 {
        return Err(EngineError::ProtocolViolation("opaque_auth truncated".into()));
    }
    let flavor = BigEndian::read_u32(&buf[0..4]);
    let len = BigEndian::read_u32(&buf[4..8]) as usize;
    let padded = (len + 3) & !3;
    if buf.len() < 8 + padded {
        return Err(EngineError::ProtocolViolation("opaque_auth body truncated".into()));
    }
    let body = &buf[8..8 + len];
    let cred = match flavor {
        0 => RpcCredential::Null,
        1 => parse_auth_unix(body)?,
        _ => RpcCredential::Null,
    };
    Ok((cred, 8 + padded))
}

fn parse_auth_unix(body: &[u8]) -> Result<RpcCredential, EngineError> {
    if body.len() < 8 {
        return Err(EngineError::ProtocolViolation("AUTH_UNIX truncated".into()));
    }
    let _stamp = BigEndian::read_u32(&body[0..4]);
    let name_len = BigEndian::read_u32(&body[4..8]) as usize;
    let name_padded = (name_len + 3) & !3;
    let mut offset = 8;
    if body.len() < offset + name_padded {
        return Err(EngineError::ProtocolViolation("AUTH_UNIX machine name truncated".into()));
    }
    let machine_name = String::from_utf8_lossy(&body[offset..offset + name_len]).into_owned();
    offset += name_padded;
    if body.len() < offset + 12 {
        return Err(EngineError::ProtocolViolation("AUTH_UNIX ids truncated".into()));
    }
    let uid = BigEndian::read_u32(&body[offset..offset + 4]);
    let gid = BigEndian::read_u32(&body[offset + 4..offset + 8]);
    Ok(RpcCredential::Unix { uid, gid, machine_name })
}

/// Builds a `PROG_UNAVAIL`/`PROG_MISMATCH`/`PROC_UNAVAIL`/`GARBAGE_ARGS`
/// rejection reply for `xid`.
pub fn build_accept_error_reply(xid: u32, stat: AcceptStat, low: u32, high: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    push_u32(&mut out, xid);
    push_u32(&mut out, MsgType::Reply as u32);
    push_u32(&mut out, 0); // MSG_ACCEPTED
    // Empty verifier.
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u32(&mut out, stat as u32);
    if stat == AcceptStat::ProgMismatch {
        push_u32(&mut out, low);
        push_u32(&mut out, high);
    }
    out
}

/// Builds an `AUTH_BAD_CRED`-style rejection reply.
pub fn build_auth_error_reply(xid: u32, auth_stat: AuthStat) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    push_u32(&mut out, xid);
    push_u32(&mut out, MsgType::Reply as u32);
    push_u32(&mut out, 1); // MSG_DENIED
    push_u32(&mut out, RejectStat::AuthError as u32);
    push_u32(&mut out, auth_stat as u32);
    out
}

/// Builds a successful accept reply header; the caller appends the
/// procedure-specific result after this prefix.
pub fn build_success_header(xid: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(24);
    push_u32(&mut out, xid);
    push_u32(&mut out, MsgType::Reply as u32);
    push_u32(&mut out, 0); // MSG_ACCEPTED
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u32(&mut out, AcceptStat::Success as u32);
    out
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    let mut bytes = [0u8; 4];
    BigEndian::write_u32(&mut bytes, v);
    out.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_and_reads_single_fragment_record() {
        let payload = b"hello nfs";
        let framed = frame_tcp_record(payload);
        let (msg, consumed) = read_tcp_record(&framed).unwrap().unwrap();
        assert_eq!(msg, payload);
        assert_eq!(consumed, framed.len());
    }

    #[test]
    fn incomplete_record_returns_none() {
        let payload = b"hello nfs";
        let framed = frame_tcp_record(payload);
        assert!(read_tcp_record(&framed[..framed.len() - 2]).unwrap().is_none());
    }

    #[test]
    fn parses_auth_null_call_header() {
        let mut body = Vec::new();
        push_u32(&mut body, 42); // xid
        push_u32(&mut body, 0); // CALL
        push_u32(&mut body, 2); // rpc version
        push_u32(&mut body, 100003); // prog
        push_u32(&mut body, 3); // vers
        push_u32(&mut body, 1); // proc (GETATTR)
        push_u32(&mut body, 0); // auth flavor NULL
        push_u32(&mut body, 0); // auth len
        push_u32(&mut body, 0); // verf flavor NULL
        push_u32(&mut body, 0); // verf len
        let (header, offset) = parse_call_header(&body).unwrap();
        assert_eq!(header.xid, 42);
        assert_eq!(header.prog, 100003);
        assert_eq!(header.proc, 1);
        assert_eq!(header.cred, RpcCredential::Null);
        assert_eq!(offset, body.len());
    }
}
