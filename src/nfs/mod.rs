//! NFSv3-over-ONC-RPC server: session table, open-file
//! cache, file-handle format, and the NFS/MOUNT/NLM/NSM RPC programs
//! sharing one TCP/UDP front end.

pub mod dispatch;
pub mod file_cache;
pub mod handle;
pub mod mount;
pub mod nlm;
pub mod nsm;
pub mod portmap;
pub mod rpc;
pub mod session;
pub mod xdr;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, instrument, warn};

use crate::auth::NfsAuthenticator;
use crate::config::NfsConfig;
use crate::pool::BufferPool;
use crate::share::ShareTable;

use dispatch::Dispatcher;
use mount::MountProgram;
use nlm::LockManager;
use nsm::StatusMonitor;
use portmap::PortMapperPort;
use session::NfsSessionTable;

/// The RPC programs (NFS, MOUNT, NLM, NSM) multiplexed over the same
/// sockets.
pub struct NfsServer {
    pub dispatcher: Dispatcher,
    pub mount: Arc<MountProgram>,
    pub lock_manager: LockManager,
    pub status_monitor: StatusMonitor,
    pub shares: Arc<ShareTable>,
}

impl NfsServer {
    pub fn new(
        config: &NfsConfig,
        shares: Arc<ShareTable>,
        authenticator: Arc<dyn NfsAuthenticator>,
        pool: Arc<BufferPool>,
    ) -> Self {
        let sessions = Arc::new(NfsSessionTable::new(
            Duration::from_secs(config.io_timer_secs),
            Duration::from_secs(config.close_timer_secs),
        ));
        NfsServer {
            dispatcher: Dispatcher {
                shares: shares.clone(),
                sessions,
                authenticator,
                pool,
                version_high: 3,
            },
            mount: MountProgram::new(),
            lock_manager: LockManager::new(),
            status_monitor: StatusMonitor::new(),
            shares,
        }
    }

    /// Routes one assembled RPC message by its program number, spec
    /// §4.H step 1 ("look up the program id in the registered-program
    /// table; PROG_UNAVAIL if absent").
    async fn route(&self, raw: &[u8], remote_addr: SocketAddr) -> Vec<u8> {
        let prog = peek_prog(raw);
        match prog {
            Some(dispatch::NFS_PROGRAM) => self.dispatcher.handle_call(raw, remote_addr).await,
            Some(mount::MOUNT_PROGRAM) => self.mount.handle_call(&self.shares, raw, remote_addr).await,
            Some(nlm::NLM_PROGRAM) => self.lock_manager.handle_call(raw),
            Some(nsm::NSM_PROGRAM) => self.status_monitor.handle_call(raw),
            _ => rpc::build_accept_error_reply(peek_xid(raw), rpc::AcceptStat::ProgUnavail, 0, 0),
        }
    }
}

fn peek_prog(raw: &[u8]) -> Option<u32> {
    rpc::parse_call_header(raw).ok().map(|(h, _)| h.prog)
}

fn peek_xid(raw: &[u8]) -> u32 {
    rpc::parse_call_header(raw).map(|(h, _)| h.xid).unwrap_or(0)
}

/// Accepts NFS/MOUNT/NLM/NSM traffic on one TCP listener and one UDP
/// socket for the lifetime of the server.
#[instrument(skip_all)]
pub async fn serve(
    tcp_listener: TcpListener,
    udp_socket: UdpSocket,
    server: Arc<NfsServer>,
    port_mapper_port: PortMapperPort,
) -> std::io::Result<()> {
    portmap::register(port_mapper_port, 2049, 2049);

    let udp_server = server.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, remote_addr) = match udp_socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "NFS UDP recv failed");
                    continue;
                }
            };
            let reply = udp_server.route(&buf[..n], remote_addr).await;
            if let Err(e) = udp_socket.send_to(&reply, remote_addr).await {
                warn!(error = %e, "NFS UDP send failed");
            }
        }
    });

    loop {
        let (socket, remote_addr) = tcp_listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_tcp_connection(socket, remote_addr, server.clone()).await {
                debug!(%remote_addr, error = %e, "NFS TCP connection ended");
            }
            server.dispatcher.sessions.remove_by_socket(remote_addr);
        });
    }
}

async fn serve_tcp_connection(
    mut socket: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    server: Arc<NfsServer>,
) -> std::io::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut buf = Vec::with_capacity(4096);
    let mut read_chunk = [0u8; 4096];
    loop {
        match rpc::read_tcp_record(&buf) {
            Ok(Some((message, consumed))) => {
                buf.drain(..consumed);
                let reply = server.route(&message, remote_addr).await;
                socket.write_all(&rpc::frame_tcp_record(&reply)).await?;
                continue;
            }
            Ok(None) => {}
            Err(_) => return Ok(()),
        }
        let n = socket.read(&mut read_chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&read_chunk[..n]);
    }
}
