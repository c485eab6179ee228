//! FTP Session Engine: one OS task per control connection,
//! the command loop, login state machine, and FTPS upgrade. File
//! transfers run inline on the session's own task; abort is polled
//! between blocks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use crate::auth::{ClientInfo, FtpAuthenticator};
use crate::error::EngineError;
use crate::ftp::commands::{self, Verb};
use crate::ftp::data::{DataChannelManager, DataSession, Mode};
use crate::ftp::path::FtpPath;
use crate::ftp::response::{self, Code};
use crate::ftp::tls::{HandshakeStatus, TlsEngine};
use crate::pool::{BufferPool, GrowingBuffer};
use crate::share::{ShareTable, TreeConnection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Unauth,
    UserPending(String),
    Authed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtLevel {
    Clear,
    Private,
}

/// Commands allowed before authentication.
pub fn allowed_before_login(verb: &Verb) -> bool {
    matches!(
        verb,
        Verb::User(_)
            | Verb::Pass(_)
            | Verb::Quit
            | Verb::Feat
            | Verb::Auth(_)
            | Verb::Pbsz(_)
            | Verb::Prot(_)
            | Verb::Noop
            | Verb::Syst
    )
}

pub struct FtpSession {
    pub remote_addr: SocketAddr,
    pub login: LoginState,
    pub cwd: FtpPath,
    pub binary: bool,
    pub restart_pos: u64,
    pub rename_from: Option<FtpPath>,
    pub tree_cache: HashMap<String, TreeConnection>,
    pub utf8: bool,
    pub tls: Option<TlsEngine>,
    pub prot_pbsz_set: bool,
    pub prot_level: ProtLevel,
    pub data: Option<(Arc<DataSession>, Mode)>,
    pub command_queue: std::collections::VecDeque<String>,

    pub shares: Arc<ShareTable>,
    pub authenticator: Arc<dyn FtpAuthenticator>,
    pub data_manager: Arc<DataChannelManager>,
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    pub pool: Arc<BufferPool>,

    socket: TcpStream,
    buf: GrowingBuffer,
}

impl FtpSession {
    pub fn new(
        socket: TcpStream,
        remote_addr: SocketAddr,
        shares: Arc<ShareTable>,
        authenticator: Arc<dyn FtpAuthenticator>,
        data_manager: Arc<DataChannelManager>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
        pool: Arc<BufferPool>,
    ) -> Self {
        FtpSession {
            remote_addr,
            login: LoginState::Unauth,
            cwd: FtpPath::root(),
            binary: true,
            restart_pos: 0,
            rename_from: None,
            tree_cache: HashMap::new(),
            utf8: false,
            tls: None,
            prot_pbsz_set: false,
            prot_level: ProtLevel::Clear,
            data: None,
            command_queue: std::collections::VecDeque::new(),
            shares,
            authenticator,
            data_manager,
            tls_config,
            pool,
            socket,
            buf: GrowingBuffer::new(),
        }
    }

    pub fn is_authed(&self) -> bool {
        matches!(self.login, LoginState::Authed(_))
    }

    pub fn client_info(&self) -> ClientInfo {
        let user_name = match &self.login {
            LoginState::Authed(u) | LoginState::UserPending(u) => u.clone(),
            LoginState::Unauth => String::new(),
        };
        ClientInfo { user_name, uid: 0, gid: 0, remote_addr: self.remote_addr }
    }

    #[instrument(skip(self), fields(remote = %self.remote_addr))]
    pub async fn run(mut self) {
        info!("ftp session started");
        loop {
            let line = match self.next_command_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "control channel error");
                    break;
                }
            };
            let verb = match commands::parse(&line) {
                Some(v) => v,
                None => {
                    self.reply_plain(response::single(Code::CMD_NOT_IMPL, "Unknown command")).await;
                    continue;
                }
            };
            if matches!(verb, Verb::Quit) {
                self.reply_plain(response::single(Code::CLOSING, "Goodbye")).await;
                break;
            }
            if !self.is_authed() && !allowed_before_login(&verb) {
                self.reply_plain(response::single(Code::NOT_LOGGED_IN, "Not logged in")).await;
                continue;
            }
            if let Err(e) = commands::dispatch(&mut self, verb).await {
                debug!(error = %e, "command handler error");
                if e.is_fatal() {
                    break;
                }
            }
        }
        self.close_session().await;
        info!("ftp session ended");
    }

    /// Reads a CRLF/LF-terminated line, running it through the TLS
    /// engine's unwrap loop when a handshake is active or finished,
    /// queueing any already-buffered extra commands first.
    async fn next_command_line(&mut self) -> Result<Option<String>, EngineError> {
        if let Some(line) = self.command_queue.pop_front() {
            return Ok(Some(line));
        }
        loop {
            if let Some(pos) = find_newline(self.buf.filled()) {
                let line = String::from_utf8_lossy(&self.buf.filled()[..pos]).trim_end().to_owned();
                self.buf.consume(pos + 1);
                return Ok(Some(line));
            }
            if self.buf.is_at_cap() {
                // Oversize command: drain and drop silently.
                let mut sink = [0u8; 4096];
                loop {
                    let n = self.socket.read(&mut sink).await?;
                    if n == 0 || sink[..n].contains(&b'\n') {
                        break;
                    }
                }
                self.buf = GrowingBuffer::new();
                continue;
            }
            let spare = self.buf.spare_capacity().ok_or(EngineError::ProtocolViolation(
                "command buffer exhausted".into(),
            ))?;
            let n = self.socket.read(spare).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.mark_filled(n);
        }
    }

    /// Writes a reply, wrapping it in TLS ciphertext when a handshake
    /// has completed and a TLS session is active.
    pub async fn reply_plain(&mut self, text: String) {
        if let Err(e) = self.write_raw(text.as_bytes()).await {
            warn!(error = %e, "failed to write control reply");
        }
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        if let Some(tls) = self.tls.as_mut() {
            if tls.status() == HandshakeStatus::NotHandshaking {
                let ciphertext = tls.wrap_write(bytes)?;
                self.socket.write_all(&ciphertext).await?;
                return Ok(());
            }
        }
        self.socket.write_all(bytes).await?;
        Ok(())
    }

    /// Drives the FTPS handshake state machine to completion:
    /// loop `{NEED_UNWRAP, NEED_WRAP, NEED_TASK}` until `NOT_HANDSHAKING`.
    pub async fn drive_tls_handshake(&mut self) -> Result<(), EngineError> {
        loop {
            let status = match self.tls.as_ref() {
                Some(tls) => tls.status(),
                None => return Ok(()),
            };
            match status {
                HandshakeStatus::NotHandshaking | HandshakeStatus::Finished => return Ok(()),
                HandshakeStatus::NeedWrap => {
                    let out = self.tls.as_mut().unwrap().drain_handshake_output()?;
                    if !out.is_empty() {
                        self.socket.write_all(&out).await?;
                    }
                }
                HandshakeStatus::NeedUnwrap => {
                    let mut buf = [0u8; 4096];
                    let n = self.socket.read(&mut buf).await?;
                    if n == 0 {
                        return Err(EngineError::SocketClosed);
                    }
                    self.tls.as_mut().unwrap().unwrap_read(&buf[..n])?;
                }
                HandshakeStatus::NeedTask => {
                    // rustls runs its internal tasks synchronously inside
                    // process_new_packets; nothing extra to pump here.
                }
            }
        }
    }

    pub async fn get_tree(&mut self, share_name: &str) -> Result<TreeConnection, EngineError> {
        if let Some(tc) = self.tree_cache.get(share_name) {
            return Ok(tc.clone());
        }
        let client = self.client_info();
        let tc = self.shares.connect(share_name, client)?;
        self.tree_cache.insert(share_name.to_owned(), tc.clone());
        Ok(tc)
    }

    /// Polls the control socket for a queued ABOR without blocking.
    /// File transfer loops call this between blocks, since the command
    /// that started the transfer won't return (and so can't observe
    /// `Verb::Abor` through the normal dispatch loop) until the
    /// transfer itself ends. Any other line read ahead of that point is
    /// queued for the next `next_command_line` call rather than lost.
    pub fn poll_for_abort(&mut self) -> Result<bool, EngineError> {
        loop {
            if let Some(pos) = find_newline(self.buf.filled()) {
                let line = String::from_utf8_lossy(&self.buf.filled()[..pos]).trim_end().to_owned();
                self.buf.consume(pos + 1);
                if matches!(commands::parse(&line), Some(Verb::Abor)) {
                    return Ok(true);
                }
                self.command_queue.push_back(line);
                continue;
            }
            let spare = match self.buf.spare_capacity() {
                Some(s) => s,
                None => return Ok(false),
            };
            match self.socket.try_read(spare) {
                Ok(0) => return Err(EngineError::SocketClosed),
                Ok(n) => {
                    self.buf.mark_filled(n);
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Ends any in-flight transaction on the session. Transactions here are simply
    /// the `(data session, abort flag)` pair, reset unconditionally.
    pub fn end_transaction(&mut self) {
        if let Some((ds, _)) = self.data.take() {
            self.data_manager.release(&ds);
        }
    }

    /// Idempotent teardown: releases the data
    /// channel and every cached tree connection exactly once.
    pub async fn close_session(&mut self) {
        self.end_transaction();
        self.tree_cache.clear();
    }
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn every_verb() -> Vec<Verb> {
        vec![
            Verb::User("u".into()),
            Verb::Pass("p".into()),
            Verb::Quit,
            Verb::Type('I'),
            Verb::Port(SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 2121)),
            Verb::Eprt(SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 2121)),
            Verb::Pasv,
            Verb::Epsv,
            Verb::Rest(0),
            Verb::Retr("a".into()),
            Verb::Stor("a".into()),
            Verb::Appe("a".into()),
            Verb::List(None),
            Verb::Nlst(None),
            Verb::Mlsd(None),
            Verb::Mlst(None),
            Verb::Cwd("a".into()),
            Verb::Cdup,
            Verb::Pwd,
            Verb::Mkd("a".into()),
            Verb::Rmd("a".into()),
            Verb::Dele("a".into()),
            Verb::Rnfr("a".into()),
            Verb::Rnto("a".into()),
            Verb::Size("a".into()),
            Verb::Mdtm("a".into()),
            Verb::Syst,
            Verb::Stat,
            Verb::Help,
            Verb::Noop,
            Verb::Feat,
            Verb::Opts("a".into()),
            Verb::Abor,
            Verb::Auth("TLS".into()),
            Verb::Pbsz(0),
            Verb::Prot('P'),
            Verb::Ccc,
            Verb::Site("a".into()),
            Verb::Stru('F'),
            Verb::Mode('S'),
            Verb::Allo,
        ]
    }

    /// Property 3: for every verb, `allowed_before_login` agrees exactly
    /// with the fixed allow-list of nine verbs usable pre-authentication.
    #[test]
    fn only_the_pre_auth_allow_list_bypasses_login_gating() {
        for verb in every_verb() {
            let allowed = allowed_before_login(&verb);
            let expected = matches!(
                verb,
                Verb::User(_)
                    | Verb::Pass(_)
                    | Verb::Quit
                    | Verb::Feat
                    | Verb::Auth(_)
                    | Verb::Pbsz(_)
                    | Verb::Prot(_)
                    | Verb::Noop
                    | Verb::Syst
            );
            assert_eq!(allowed, expected, "mismatch for {verb:?}");
        }
    }

    #[test]
    fn rejects_verbs_outside_the_allow_list() {
        assert!(!allowed_before_login(&Verb::Retr("secret.txt".into())));
        assert!(!allowed_before_login(&Verb::Stor("upload.bin".into())));
        assert!(!allowed_before_login(&Verb::Pwd));
        assert!(!allowed_before_login(&Verb::List(None)));
    }
}
