//! SMB/SMB2/SMB3 file server: virtual-circuit
//! bookkeeping, the per-connection session engine, change-notification
//! fan-out, and the async response queue, all built around an external
//! [`parser::DialectHandler`] collaborator the same way the NFS/FTP
//! engines sit on `vfs::DiskInterface`.

pub mod async_queue;
pub mod netbios;
pub mod notify;
pub mod parser;
pub mod session;
pub mod status;
pub mod vc;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, instrument};

use crate::auth::SmbAuthenticator;
use crate::config::SmbConfig;
use crate::share::ShareTable;

use session::{DialectHandlerFactory, SessionRegistry, SmbConnection};

/// Accepts SMB connections for the lifetime of the server, spawning
/// one [`SmbConnection`] task per socket.
#[instrument(skip_all)]
pub async fn serve(
    listener: TcpListener,
    config: SmbConfig,
    shares: Arc<ShareTable>,
    authenticator: Arc<dyn SmbAuthenticator>,
    handler_factory: Arc<dyn DialectHandlerFactory>,
) -> std::io::Result<()> {
    let registry = SessionRegistry::new();
    loop {
        let (socket, remote_addr) = listener.accept().await?;
        let conn = SmbConnection::new(
            socket,
            remote_addr,
            config.clone(),
            shares.clone(),
            authenticator.clone(),
            handler_factory.clone(),
            registry.clone(),
        );
        tokio::spawn(async move {
            conn.run().await;
            debug!(%remote_addr, "SMB session closed");
        });
    }
}
