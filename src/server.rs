//! Top-level wiring: the shared share table, packet pool, and the
//! three protocol front ends, started together from one [`Config`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, UdpSocket};
use tracing::info;

use crate::auth::{ClientInfo, FtpAuthenticator, NfsAuthenticator, RpcCredential, SessionKey, SmbAuthenticator};
use crate::config::Config;
use crate::nfs::portmap::PortMapperPort;
use crate::pool::BufferPool;
use crate::share::ShareTable;
use crate::smb::parser::{DialectHandler, HandlerOutcome, NegotiateContext, RawRequest};
use crate::smb::session::DialectHandlerFactory;
use crate::smb::status::NtStatus;
use crate::vfs::testing::MemoryDisk;

/// Reference authenticator that admits every identity it's offered.
/// Real deployments supply their own `FtpAuthenticator`/
/// `NfsAuthenticator`/`SmbAuthenticator`; this one exists so the binary
/// is runnable out of the box without any credential check at all.
struct OpenAuthenticator;

#[async_trait]
impl FtpAuthenticator for OpenAuthenticator {
    async fn authenticate_user(&self, _client: &ClientInfo, _password: &str) -> bool {
        true
    }
}

#[async_trait]
impl NfsAuthenticator for OpenAuthenticator {
    async fn authenticate_rpc_client(&self, cred: &RpcCredential) -> Option<SessionKey> {
        let key = match cred {
            RpcCredential::Null => 0,
            RpcCredential::Unix { uid, gid, .. } => (*uid as u64) << 32 | *gid as u64,
        };
        Some(SessionKey(key))
    }

    async fn get_rpc_client_information(&self, key: SessionKey) -> ClientInfo {
        ClientInfo {
            user_name: String::new(),
            uid: (key.0 >> 32) as u32,
            gid: key.0 as u32,
            remote_addr: "0.0.0.0:0".parse().expect("static socket addr"),
        }
    }

    async fn set_current_user(&self, _info: &ClientInfo) {}
}

#[async_trait]
impl SmbAuthenticator for OpenAuthenticator {
    async fn set_current_user(&self, _info: &ClientInfo) {}
}

/// Stand-in [`DialectHandler`] used until a real SMB wire parser is
/// plugged in. It
/// negotiates successfully but answers every command with
/// `SRV_NOT_SUPPORTED`, which is enough to exercise the session state
/// machine end to end.
struct NullDialectHandler {
    dialect: &'static str,
}

#[async_trait]
impl DialectHandler for NullDialectHandler {
    fn dialect_name(&self) -> &'static str {
        self.dialect
    }

    async fn post_negotiate(&mut self, _ctx: &NegotiateContext) -> Result<(), crate::error::EngineError> {
        Ok(())
    }

    fn pack_negotiate_response(&self, _ctx: &NegotiateContext) -> Vec<u8> {
        self.dialect.as_bytes().to_vec()
    }

    fn build_error_response(&self, _original: &RawRequest, status: NtStatus) -> Vec<u8> {
        status.0.to_le_bytes().to_vec()
    }

    async fn handle(
        &self,
        _req: &RawRequest,
        _tree: Option<&crate::share::TreeConnection>,
        _client: &ClientInfo,
    ) -> HandlerOutcome {
        HandlerOutcome::Error(NtStatus::SRV_NOT_SUPPORTED)
    }
}

struct NullHandlerFactory;

impl DialectHandlerFactory for NullHandlerFactory {
    fn create(&self, dialect: &str) -> Option<Box<dyn DialectHandler>> {
        let dialect = match dialect {
            "SMB2_002" => "SMB2_002",
            "SMB2_1" => "SMB2_1",
            "SMB3_0" => "SMB3_0",
            "SMB3_0_2" => "SMB3_0_2",
            "SMB3_1_1" => "SMB3_1_1",
            _ => return None,
        };
        Some(Box::new(NullDialectHandler { dialect }))
    }
}

/// Loads a `rustls::ServerConfig` from the PEM cert/key paths in
/// `FtpConfig`, or `None` if FTPS isn't enabled.
fn load_tls_config(ftp: &crate::config::FtpConfig) -> std::io::Result<Option<Arc<rustls::ServerConfig>>> {
    if !ftp.ftps_enabled {
        return Ok(None);
    }
    let cert_path = ftp.tls_cert_path.as_ref().expect("ftps_enabled requires tls_cert_path");
    let key_path = ftp.tls_key_path.as_ref().expect("ftps_enabled requires tls_key_path");

    let cert_file = std::fs::File::open(cert_path)?;
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()?;

    let key_file = std::fs::File::open(key_path)?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))?
        .ok_or_else(|| std::io::Error::other("no private key found in tls_key_path"))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(std::io::Error::other)?;
    Ok(Some(Arc::new(config)))
}

/// Builds a share table with one reference in-memory share. Real
/// deployments register their own `DiskInterface` drivers per share
///; this keeps the binary runnable without one.
fn default_shares() -> ShareTable {
    let mut shares = ShareTable::new();
    shares.add(crate::share::SharedDevice::new("default", Arc::new(MemoryDisk::new())));
    shares
}

/// Starts every enabled protocol front end and blocks until one of
/// them exits with an error.
pub async fn run(config: Config) -> std::io::Result<()> {
    let pool = Arc::new(BufferPool::new(
        config.pool.buffer_size,
        config.pool.buffer_count,
        config.pool.dynamic_budget,
    ));
    let shares = Arc::new(default_shares());
    let authenticator: Arc<OpenAuthenticator> = Arc::new(OpenAuthenticator);

    let mut tasks = Vec::new();

    if config.ftp.enabled {
        let listener = TcpListener::bind(("0.0.0.0", config.ftp.port)).await?;
        let tls_config = load_tls_config(&config.ftp)?;
        let shares = shares.clone();
        let authenticator: Arc<dyn FtpAuthenticator> = authenticator.clone();
        let pool = pool.clone();
        info!(port = config.ftp.port, "FTP listening");
        tasks.push(tokio::spawn(async move {
            crate::ftp::serve(listener, shares, authenticator, tls_config, pool).await
        }));
    }

    if config.nfs.enabled {
        let tcp_listener = TcpListener::bind(("0.0.0.0", config.nfs.tcp_port)).await?;
        let udp_socket = UdpSocket::bind(("0.0.0.0", config.nfs.udp_port)).await?;
        let nfs_authenticator: Arc<dyn NfsAuthenticator> = authenticator.clone();
        let server = Arc::new(crate::nfs::NfsServer::new(&config.nfs, shares.clone(), nfs_authenticator, pool.clone()));
        let port_mapper_port = PortMapperPort(config.nfs.port_mapper_port);
        info!(port = config.nfs.tcp_port, "NFS listening");
        tasks.push(tokio::spawn(async move {
            crate::nfs::serve(tcp_listener, udp_socket, server, port_mapper_port).await
        }));
    }

    if config.smb.enabled {
        let port = if config.smb.use_netbios { config.smb.netbios_port } else { config.smb.port };
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let smb_authenticator: Arc<dyn SmbAuthenticator> = authenticator.clone();
        let handler_factory: Arc<dyn DialectHandlerFactory> = Arc::new(NullHandlerFactory);
        let smb_config = config.smb.clone();
        let shares = shares.clone();
        info!(port, "SMB listening");
        tasks.push(tokio::spawn(async move {
            crate::smb::serve(listener, smb_config, shares, smb_authenticator, handler_factory).await
        }));
    }

    for task in tasks {
        task.await.expect("protocol engine task panicked")?;
    }
    Ok(())
}
