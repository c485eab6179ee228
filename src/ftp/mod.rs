//! FTP protocol engine: data-channel manager, session
//! engine, command dispatch, FTPS TLS, and the virtual FTP path.

pub mod commands;
pub mod data;
pub mod path;
pub mod response;
pub mod session;
pub mod tls;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::auth::FtpAuthenticator;
use crate::pool::BufferPool;
use crate::share::ShareTable;

/// Accepts connections forever, spawning one [`session::FtpSession`]
/// task per client.
pub async fn serve(
    listener: TcpListener,
    shares: Arc<ShareTable>,
    authenticator: Arc<dyn FtpAuthenticator>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    pool: Arc<BufferPool>,
) -> std::io::Result<()> {
    let data_manager = Arc::new(data::DataChannelManager::new());
    loop {
        let (socket, remote_addr) = listener.accept().await?;
        if let Err(e) = socket.set_nodelay(true) {
            error!(error = %e, "failed to set TCP_NODELAY on FTP control socket");
        }
        let session = session::FtpSession::new(
            socket,
            remote_addr,
            shares.clone(),
            authenticator.clone(),
            data_manager.clone(),
            tls_config.clone(),
            pool.clone(),
        );
        tokio::spawn(async move {
            session.run().await;
        });
        info!(%remote_addr, "accepted FTP control connection");
    }
}
