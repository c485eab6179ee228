//! Engine-internal error taxonomy, mapped to per-protocol wire statuses
//! at each engine's dispatch boundary.

use std::io;

/// Errors raised by the session engines and the layers they sit on
/// top of (`vfs`, `share`, `auth`). Protocol front-ends translate these
/// into their own wire status at the point a request finishes.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not logged on")]
    NotLoggedOn,

    #[error("access denied")]
    AccessDenied,

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("disk full")]
    DiskFull,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("transfer aborted")]
    TransferAborted,

    #[error("data channel unavailable")]
    DataChannelUnavailable,

    #[error("socket timeout")]
    SocketTimeout,

    #[error("socket closed")]
    SocketClosed,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("program unavailable")]
    ProgramUnavailable,

    #[error("version mismatch: low={low} high={high}")]
    VersionMismatch { low: u32, high: u32 },

    #[error("session limit reached")]
    SessionLimit,

    #[error("out of buffer capacity")]
    OutOfCapacity,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// True for errors that §7 classifies as always ending the session
    /// (as opposed to being mapped to a response and continuing).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::SocketClosed | EngineError::SocketTimeout | EngineError::Fatal(_)
        )
    }
}

/// Errors surfaced from the `vfs::DiskInterface` capability. Kept
/// separate from [`EngineError`] because disk drivers are an external
/// collaborator (§1) with their own narrower vocabulary; dispatch code
/// converts via `From`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiskError {
    #[error("not owner")]
    Permission,
    #[error("no such file or directory")]
    NotFound,
    #[error("I/O error")]
    Io,
    #[error("access denied")]
    Access,
    #[error("file exists")]
    Exists,
    #[error("not a directory")]
    NotDir,
    #[error("is a directory")]
    IsDir,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("file too large")]
    FileTooLarge,
    #[error("no space left on device")]
    NoSpace,
    #[error("read-only filesystem")]
    ReadOnlyFs,
    #[error("name too long")]
    NameTooLong,
    #[error("directory not empty")]
    NotEmpty,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("stale file handle")]
    StaleHandle,
    #[error("bad file handle")]
    BadHandle,
    #[error("operation not supported")]
    NotSupported,
    #[error("server fault")]
    ServerFault,
}

impl From<DiskError> for EngineError {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::Permission | DiskError::Access => EngineError::AccessDenied,
            DiskError::NotFound | DiskError::StaleHandle | DiskError::BadHandle => {
                EngineError::NotFound
            }
            DiskError::Exists => EngineError::AlreadyExists,
            DiskError::NoSpace | DiskError::QuotaExceeded => EngineError::QuotaExceeded,
            DiskError::ReadOnlyFs => EngineError::AccessDenied,
            DiskError::InvalidArgument
            | DiskError::NotDir
            | DiskError::IsDir
            | DiskError::NameTooLong
            | DiskError::FileTooLarge
            | DiskError::NotEmpty => EngineError::InvalidArgument(e.to_string()),
            DiskError::NotSupported => EngineError::InvalidArgument(e.to_string()),
            DiskError::Io | DiskError::ServerFault => EngineError::Fatal(e.to_string()),
        }
    }
}
