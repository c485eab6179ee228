//! SMB Session Engine: the per-connection state machine
//! from NetBIOS session setup through dialect negotiation to the
//! steady-state request loop, modeled the way [`crate::ftp::session`]
//! drives its own per-connection loop — one reader task per session,
//! handing command execution off to dispatch.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::auth::{ClientInfo, SmbAuthenticator};
use crate::config::SmbConfig;
use crate::error::EngineError;
use crate::share::{ShareTable, TreeConnection};
use crate::smb::async_queue::{AsyncResponseQueue, PipelineState};
use crate::smb::netbios;
use crate::smb::parser::{DialectHandler, HandlerOutcome, NegotiateContext, RawRequest};
use crate::smb::status::NtStatus;
use crate::smb::vc::VcList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NetBiosSessRequest,
    Negotiate,
    SessSetup,
    Session,
    Hangup,
}

/// Builds a fresh [`DialectHandler`] once negotiation has picked a
/// dialect name. An external collaborator, mirroring how
/// [`crate::vfs::DiskInterface`] instances are supplied per share.
pub trait DialectHandlerFactory: Send + Sync {
    fn create(&self, dialect: &str) -> Option<Box<dyn DialectHandler>>;
}

/// Registry of active sessions, keyed by `(remoteAddress, userName)` so
/// the engine can enforce "disconnecting duplicates" and
/// locate a disconnected session for SMB3 persistent-handoff by cookie.
#[derive(Default)]
pub struct SessionRegistry {
    by_identity: Mutex<HashMap<(SocketAddr, String), Arc<SmbSession>>>,
    by_cookie: Mutex<HashMap<u64, Arc<SmbSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionRegistry::default())
    }

    /// Closes any existing session bound to `(addr, user)` ("disconnecting
    /// duplicates"), unless `addr` is on the load-balancer/terminal-server
    /// allow-list.
    pub async fn bind(
        &self,
        addr: SocketAddr,
        user: &str,
        session: Arc<SmbSession>,
        coexist_hosts: &[IpAddr],
    ) {
        if coexist_hosts.contains(&addr.ip()) {
            return;
        }
        let mut table = self.by_identity.lock().await;
        if let Some(old) = table.insert((addr, user.to_owned()), session) {
            old.mark_hangup().await;
        }
    }

    pub async fn park_for_handoff(&self, cookie: u64, session: Arc<SmbSession>) {
        self.by_cookie.lock().await.insert(cookie, session);
    }

    pub async fn take_for_handoff(&self, cookie: u64) -> Option<Arc<SmbSession>> {
        self.by_cookie.lock().await.remove(&cookie)
    }
}

/// One established SMB session.
pub struct SmbSession {
    pub client: Mutex<ClientInfo>,
    pub vcs: Mutex<VcList>,
    pub queue: AsyncResponseQueue,
    state: Mutex<SessionState>,
}

impl SmbSession {
    fn new(client: ClientInfo, max_vcs: usize) -> Self {
        SmbSession {
            client: Mutex::new(client),
            vcs: Mutex::new(VcList::new(max_vcs)),
            queue: AsyncResponseQueue::new(),
            state: Mutex::new(SessionState::NetBiosSessRequest),
        }
    }

    async fn mark_hangup(&self) {
        *self.state.lock().await = SessionState::Hangup;
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }
}

struct PipelineFlag(bool);
impl PipelineState for PipelineFlag {
    fn has_unread_bytes(&self) -> bool {
        self.0
    }
}

/// Drives one TCP connection through the session state machine until
/// hangup.
pub struct SmbConnection {
    socket: TcpStream,
    remote_addr: SocketAddr,
    config: SmbConfig,
    shares: Arc<ShareTable>,
    authenticator: Arc<dyn SmbAuthenticator>,
    handler_factory: Arc<dyn DialectHandlerFactory>,
    registry: Arc<SessionRegistry>,
    session: Arc<SmbSession>,
    handler: Option<Box<dyn DialectHandler>>,
    tree: Option<TreeConnection>,
    read_buf: Vec<u8>,
}

impl SmbConnection {
    pub fn new(
        socket: TcpStream,
        remote_addr: SocketAddr,
        config: SmbConfig,
        shares: Arc<ShareTable>,
        authenticator: Arc<dyn SmbAuthenticator>,
        handler_factory: Arc<dyn DialectHandlerFactory>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let max_vcs = config.max_virtual_circuits.max(1) as usize;
        SmbConnection {
            socket,
            remote_addr,
            config,
            shares,
            authenticator,
            handler_factory,
            registry,
            session: Arc::new(SmbSession::new(
                ClientInfo { user_name: String::new(), uid: 0, gid: 0, remote_addr },
                max_vcs,
            )),
            handler: None,
            tree: None,
            read_buf: Vec::with_capacity(4096),
        }
    }

    #[instrument(skip(self), fields(remote = %self.remote_addr))]
    pub async fn run(mut self) {
        let timeout = Duration::from_secs(self.config.read_timeout_secs);
        loop {
            let frame = match self.next_frame(timeout).await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "SMB session ending");
                    break;
                }
            };
            if self.session.state().await == SessionState::Hangup {
                break;
            }
            if let Err(e) = self.process_frame(frame).await {
                if e.is_fatal() {
                    break;
                }
            }
        }
        self.session.mark_hangup().await;
    }

    async fn next_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, EngineError> {
        loop {
            if self.config.use_netbios {
                if let Some((kind, body, consumed)) = netbios::read_packet(&self.read_buf)? {
                    self.read_buf.drain(..consumed);
                    if kind == netbios::SessionPacketType::Message as u8 {
                        return Ok(Some(body));
                    }
                    continue;
                }
            } else if self.read_buf.len() >= 4 {
                let len = u32::from_be_bytes([0, self.read_buf[1], self.read_buf[2], self.read_buf[3]]) as usize;
                if self.read_buf.len() >= 4 + len {
                    let body = self.read_buf[4..4 + len].to_vec();
                    self.read_buf.drain(..4 + len);
                    return Ok(Some(body));
                }
            }
            let mut chunk = [0u8; 8192];
            let n = match tokio::time::timeout(timeout, self.socket.read(&mut chunk)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(EngineError::Io(e)),
                Err(_) => return Err(EngineError::SocketTimeout),
            };
            if n == 0 {
                return Ok(None);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        let framed = if self.config.use_netbios {
            netbios::frame_message(payload)
        } else {
            let mut out = Vec::with_capacity(4 + payload.len());
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            out[0] = 0;
            out.extend_from_slice(payload);
            out
        };
        self.socket.write_all(&framed).await.map_err(EngineError::Io)
    }

    async fn process_frame(&mut self, frame: Vec<u8>) -> Result<(), EngineError> {
        let state = self.session.state().await;
        match state {
            SessionState::NetBiosSessRequest if self.config.use_netbios => {
                self.handle_netbios_session_request(&frame).await
            }
            _ => self.handle_smb_request(&frame).await,
        }
    }

    async fn handle_netbios_session_request(&mut self, frame: &[u8]) -> Result<(), EngineError> {
        let req = netbios::parse_session_request(frame)?;
        debug!(called = %req.called_name, calling = %req.calling_name, "NetBIOS session request");
        self.write_frame(&netbios::session_positive_response()).await?;
        *self.session.state.lock().await = SessionState::Negotiate;
        Ok(())
    }

    async fn handle_smb_request(&mut self, frame: &[u8]) -> Result<(), EngineError> {
        let req = RawRequest { command: 0, body: frame.to_vec(), more_compound: false };
        let state = self.session.state().await;

        if state == SessionState::NetBiosSessRequest || state == SessionState::Negotiate {
            return self.negotiate(&req).await;
        }

        let Some(handler) = self.handler.as_ref() else {
            return self.reply_unsupported(&req).await;
        };
        let client = self.session.client.lock().await.clone();
        let outcome = handler.handle(&req, self.tree.as_ref(), &client).await;
        if state == SessionState::SessSetup {
            self.complete_session_setup(&req).await?;
        }
        match outcome {
            HandlerOutcome::Response(bytes) => {
                let bytes = handler.response_pre_send(bytes);
                self.write_frame(&bytes).await?;
                self.flush_async_queue().await?;
            }
            HandlerOutcome::Async(bytes) => {
                let pending = PipelineFlag(!self.read_buf.is_empty());
                if let Some(send_now) = self.session.queue.offer(bytes, &pending) {
                    self.write_frame(&send_now).await?;
                }
            }
            HandlerOutcome::Error(status) => {
                let bytes = handler.build_error_response(&req, status);
                self.write_frame(&bytes).await?;
            }
        }
        Ok(())
    }

    async fn flush_async_queue(&mut self) -> Result<(), EngineError> {
        for bytes in self.session.queue.drain() {
            self.write_frame(&bytes).await?;
        }
        Ok(())
    }

    async fn reply_unsupported(&mut self, _req: &RawRequest) -> Result<(), EngineError> {
        // Unknown commands produce SRV_NOT_SUPPORTED.
        let mut status_bytes = Vec::with_capacity(4);
        status_bytes.extend_from_slice(&NtStatus::SRV_NOT_SUPPORTED.0.to_le_bytes());
        self.write_frame(&status_bytes).await
    }

    async fn negotiate(&mut self, req: &RawRequest) -> Result<(), EngineError> {
        let ctx = NegotiateContext { offered_dialects: parse_offered_dialects(&req.body), client_guid: [0; 16] };
        let Some(dialect) = crate::smb::parser::negotiate_dialect(&ctx.offered_dialects, &self.config.enabled_dialects)
        else {
            warn!("no common SMB dialect, hanging up");
            self.session.mark_hangup().await;
            return Err(EngineError::ProtocolViolation("no common SMB dialect".into()));
        };
        let Some(mut handler) = self.handler_factory.create(dialect) else {
            return Err(EngineError::Fatal(format!("no handler for dialect {dialect}")));
        };
        handler.post_negotiate(&ctx).await?;
        let response = handler.pack_negotiate_response(&ctx);
        self.handler = Some(handler);
        self.write_frame(&response).await?;
        *self.session.state.lock().await = SessionState::SessSetup;
        Ok(())
    }

    /// Adopts the identity carried by the first post-negotiate request
    /// and registers it, disconnecting any prior session already bound
    /// to this `(address, user)` pair. Authentication itself is the
    /// dialect handler's concern; this only has to pick up the result.
    async fn complete_session_setup(&mut self, req: &RawRequest) -> Result<(), EngineError> {
        let user_name = parse_session_setup_username(&req.body);
        let client = {
            let mut client = self.session.client.lock().await;
            client.user_name = user_name;
            client.clone()
        };
        self.authenticator.set_current_user(&client).await;
        let coexist_hosts: Vec<IpAddr> = self
            .config
            .load_balancer_hosts
            .iter()
            .chain(self.config.terminal_server_hosts.iter())
            .copied()
            .collect();
        self.registry
            .bind(self.remote_addr, &client.user_name, self.session.clone(), &coexist_hosts)
            .await;
        *self.session.state.lock().await = SessionState::Session;
        Ok(())
    }

    pub async fn attach_tree(&mut self, share_name: &str) -> Result<(), EngineError> {
        let client = self.session.client.lock().await.clone();
        let tree = self.shares.connect(share_name, client)?;
        self.tree = Some(tree);
        Ok(())
    }
}

/// Extracts the dialect-string list from a bare `SMB2 NEGOTIATE`-style
/// body: a count byte followed by that many null-terminated ASCII
/// dialect tags. The real wire format (SMB1 vs SMB2 negotiate) is a
/// parser concern external to this core; this is the minimal
/// shape the engine needs to drive dialect selection.
fn parse_offered_dialects(body: &[u8]) -> Vec<String> {
    body.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Extracts the account-name field from a bare `SESSION_SETUP`-style
/// body: a null-terminated UTF-8 string. The real NTLM/SPNEGO blob is a
/// parser concern external to this core, same as `parse_offered_dialects`.
fn parse_session_setup_username(body: &[u8]) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::{TcpListener, TcpStream};

    struct StubAuthenticator;

    #[async_trait::async_trait]
    impl SmbAuthenticator for StubAuthenticator {
        async fn set_current_user(&self, _info: &ClientInfo) {}
    }

    struct StubHandler;

    #[async_trait::async_trait]
    impl DialectHandler for StubHandler {
        fn dialect_name(&self) -> &'static str {
            "STUB"
        }

        async fn post_negotiate(&mut self, _ctx: &NegotiateContext) -> Result<(), EngineError> {
            Ok(())
        }

        fn pack_negotiate_response(&self, _ctx: &NegotiateContext) -> Vec<u8> {
            b"negotiated".to_vec()
        }

        fn build_error_response(&self, _original: &RawRequest, status: NtStatus) -> Vec<u8> {
            status.0.to_le_bytes().to_vec()
        }

        async fn handle(
            &self,
            _req: &RawRequest,
            _tree: Option<&TreeConnection>,
            _client: &ClientInfo,
        ) -> HandlerOutcome {
            HandlerOutcome::Response(b"ok".to_vec())
        }
    }

    struct StubHandlerFactory;

    impl DialectHandlerFactory for StubHandlerFactory {
        fn create(&self, _dialect: &str) -> Option<Box<dyn DialectHandler>> {
            Some(Box::new(StubHandler))
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    fn new_connection(remote_addr: SocketAddr, registry: Arc<SessionRegistry>, socket: TcpStream) -> SmbConnection {
        SmbConnection::new(
            socket,
            remote_addr,
            SmbConfig { use_netbios: false, ..SmbConfig::default() },
            Arc::new(ShareTable::new()),
            Arc::new(StubAuthenticator),
            Arc::new(StubHandlerFactory),
            registry,
        )
    }

    #[tokio::test]
    async fn session_setup_completion_adopts_identity_and_binds_registry() {
        let registry = SessionRegistry::new();
        let addr = alice().remote_addr;
        let (socket, _peer) = connected_pair().await;
        let mut conn = new_connection(addr, registry, socket);

        let negotiate = RawRequest { command: 0, body: b"SMB2_002\0".to_vec(), more_compound: false };
        conn.negotiate(&negotiate).await.unwrap();
        assert_eq!(conn.session.state().await, SessionState::SessSetup);

        conn.handle_smb_request(b"alice\0").await.unwrap();
        assert_eq!(conn.session.state().await, SessionState::Session);
        assert_eq!(conn.session.client.lock().await.user_name, "alice");
    }

    #[tokio::test]
    async fn second_session_setup_from_same_address_disconnects_the_first() {
        let registry = SessionRegistry::new();
        let addr = alice().remote_addr;

        let (socket_a, _peer_a) = connected_pair().await;
        let mut first = new_connection(addr, registry.clone(), socket_a);
        first.negotiate(&RawRequest { command: 0, body: b"SMB2_002\0".to_vec(), more_compound: false }).await.unwrap();
        first.handle_smb_request(b"alice\0").await.unwrap();
        let first_session = first.session.clone();
        assert_eq!(first_session.state().await, SessionState::Session);

        let (socket_b, _peer_b) = connected_pair().await;
        let mut second = new_connection(addr, registry, socket_b);
        second.negotiate(&RawRequest { command: 0, body: b"SMB2_002\0".to_vec(), more_compound: false }).await.unwrap();
        second.handle_smb_request(b"alice\0").await.unwrap();

        assert_eq!(first_session.state().await, SessionState::Hangup);
        assert_eq!(second.session.state().await, SessionState::Session);
    }

    #[test]
    fn parses_null_separated_dialect_tags() {
        let body = b"SMB2_002\0SMB2_1\0SMB3_0\0";
        let dialects = parse_offered_dialects(body);
        assert_eq!(dialects, vec!["SMB2_002", "SMB2_1", "SMB3_0"]);
    }

    fn alice() -> ClientInfo {
        ClientInfo {
            user_name: "alice".into(),
            uid: 0,
            gid: 0,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 51000),
        }
    }

    #[tokio::test]
    async fn second_login_from_same_address_disconnects_the_first() {
        let registry = SessionRegistry::new();
        let addr = alice().remote_addr;
        let first = Arc::new(SmbSession::new(alice(), 1));
        registry.bind(addr, "alice", first.clone(), &[]).await;
        assert_eq!(first.state().await, SessionState::NetBiosSessRequest);

        let second = Arc::new(SmbSession::new(alice(), 1));
        registry.bind(addr, "alice", second.clone(), &[]).await;

        assert_eq!(first.state().await, SessionState::Hangup);
        assert_eq!(second.state().await, SessionState::NetBiosSessRequest);
    }

    #[tokio::test]
    async fn coexist_allow_list_exempts_the_address() {
        let registry = SessionRegistry::new();
        let addr = alice().remote_addr;
        let first = Arc::new(SmbSession::new(alice(), 1));
        registry.bind(addr, "alice", first.clone(), &[]).await;

        let second = Arc::new(SmbSession::new(alice(), 1));
        registry.bind(addr, "alice", second.clone(), &[addr.ip()]).await;

        assert_eq!(first.state().await, SessionState::NetBiosSessRequest);
        assert_eq!(second.state().await, SessionState::NetBiosSessRequest);
    }
}
