//! Property 1: a PORT/PASV after an existing allocation releases the
//! previous listener/socket before creating a new one.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use sharefs::auth::{ClientInfo, FtpAuthenticator};
use sharefs::ftp::commands::{self, Verb};
use sharefs::ftp::data::DataChannelManager;
use sharefs::ftp::session::FtpSession;
use sharefs::pool::BufferPool;
use sharefs::share::ShareTable;

struct OpenAuth;

#[async_trait]
impl FtpAuthenticator for OpenAuth {
    async fn authenticate_user(&self, _client: &ClientInfo, _password: &str) -> bool {
        true
    }
}

async fn connected_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (server, client)
}

#[tokio::test]
async fn repeated_pasv_releases_the_previous_listener_port() {
    let (server_sock, _client_sock) = connected_pair().await;
    let data_manager = Arc::new(DataChannelManager::new());
    let mut session = FtpSession::new(
        server_sock,
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000),
        Arc::new(ShareTable::new()),
        Arc::new(OpenAuth),
        data_manager.clone(),
        None,
        Arc::new(BufferPool::new(64 * 1024, 4, 1024 * 1024)),
    );

    commands::dispatch(&mut session, Verb::Pasv).await.unwrap();
    let first = session.data.clone().expect("first PASV must allocate a data session");

    commands::dispatch(&mut session, Verb::Pasv).await.unwrap();
    let second = session.data.clone().expect("second PASV must allocate a data session");

    assert_ne!(first.0.port, second.0.port, "a fresh PASV must pick a fresh ephemeral port");
    assert!(
        !data_manager.has_port(first.0.port),
        "the first data session's port must be released once the second PASV runs"
    );
    assert!(data_manager.has_port(second.0.port));
}

/// Property 11: calling `close_session` a second time is a no-op, not a
/// double-release of the data channel or tree cache.
#[tokio::test]
async fn closing_the_session_twice_does_not_double_release() {
    let (server_sock, _client_sock) = connected_pair().await;
    let data_manager = Arc::new(DataChannelManager::new());
    let mut session = FtpSession::new(
        server_sock,
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40001),
        Arc::new(ShareTable::new()),
        Arc::new(OpenAuth),
        data_manager.clone(),
        None,
        Arc::new(BufferPool::new(64 * 1024, 4, 1024 * 1024)),
    );

    commands::dispatch(&mut session, Verb::Pasv).await.unwrap();
    let allocated = session.data.clone().expect("PASV must allocate a data session");
    assert!(data_manager.has_port(allocated.0.port));

    session.close_session().await;
    assert!(session.data.is_none());
    assert!(!data_manager.has_port(allocated.0.port));

    session.close_session().await;
    assert!(session.data.is_none());
    assert!(!data_manager.has_port(allocated.0.port));
}
