//! The Authenticator capability: credential validation and
//! per-call user-context plugins, external to this crate's core but
//! given concrete trait shapes here so the session engines have
//! something to call through.

use std::net::SocketAddr;

use async_trait::async_trait;

/// Client identity handed to FTP's `authenticateUser` and used to seed
/// an NFS/SMB session's `ClientInfo`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub user_name: String,
    pub uid: u32,
    pub gid: u32,
    pub remote_addr: SocketAddr,
}

/// FTP-side authenticator: validate a `USER`/`PASS` pair against a
/// session's pending identity.
#[async_trait]
pub trait FtpAuthenticator: Send + Sync {
    async fn authenticate_user(&self, client: &ClientInfo, password: &str) -> bool;
}

/// Opaque session key minted by `authenticate_rpc_client`, later handed
/// back to `get_rpc_client_information` and stashed on the NFS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(pub u64);

/// The RPC credential an inbound NFS call carried, as distinguished by
/// the session table's `(authType, authIdentifier)` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcCredential {
    Null,
    Unix { uid: u32, gid: u32, machine_name: String },
}

/// NFS-side authenticator.
#[async_trait]
pub trait NfsAuthenticator: Send + Sync {
    /// Validates `cred`, returning a session key on success. Failure is
    /// reported to the dispatcher as `AUTH_BAD_CRED` for
    /// any procedure other than NULL.
    async fn authenticate_rpc_client(&self, cred: &RpcCredential) -> Option<SessionKey>;

    async fn get_rpc_client_information(&self, key: SessionKey) -> ClientInfo;

    /// Sets the OS/process user context for the duration of a single
    /// filesystem call.
    async fn set_current_user(&self, info: &ClientInfo);
}

/// SMB-side authenticator. The SPNEGO/NTLM exchange itself belongs to
/// the (out-of-scope) SMB parser; the session engine only needs to
/// install the resulting identity.
#[async_trait]
pub trait SmbAuthenticator: Send + Sync {
    async fn set_current_user(&self, info: &ClientInfo);
}
