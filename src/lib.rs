//! sharefs - a multi-protocol (FTP/NFS/SMB) network file server, built
//! around a shared filesystem capability and per-protocol session
//! engines.

pub mod auth;
pub mod config;
pub mod error;
pub mod pool;
pub mod share;
pub mod vfs;

pub mod ftp;
pub mod nfs;
pub mod smb;

pub mod server;
