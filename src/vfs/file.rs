//! Attribute and timestamp types shared by every [`super::DiskInterface`]
//! method, adapted from the NFSv3 `fattr3`/`sattr3` shape (RFC 1813
//! §3.3.1/3.3.2).

/// File type, independent of any single protocol's type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Regular,
    Directory,
    BlockDevice,
    CharacterDevice,
    Symlink,
    Socket,
    Fifo,
}

/// File attributes as returned by `get_file_information`.
#[derive(Debug, Clone)]
pub struct Attr {
    pub file_type: Type,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub used: u64,
    pub device: Option<Device>,
    pub fsid: u64,
    pub fileid: u64,
    pub atime: Time,
    pub mtime: Time,
    pub ctime: Time,
}

impl Attr {
    pub fn is_dir(&self) -> bool {
        matches!(self.file_type, Type::Directory)
    }
}

/// Timestamp used throughout `vfs` and the protocol engines.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Time {
    pub seconds: i64,
    pub nanos: u32,
}

impl Time {
    pub fn now() -> Self {
        let d = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Time { seconds: d.as_secs() as i64, nanos: d.subsec_nanos() }
    }

    pub fn zero() -> Self {
        Time { seconds: 0, nanos: 0 }
    }
}

/// Major/minor device pair, used for `mknod`-style special files.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Device {
    pub major: u32,
    pub minor: u32,
}

/// Strategy for updating a timestamp via `set_file_information`.
#[derive(Debug, Clone, Copy)]
pub enum SetTime {
    DontChange,
    ServerCurrent,
    ClientProvided(Time),
}

/// Attribute modification requested by `SETATTR`-shaped operations.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SetTime>,
    pub mtime: Option<SetTime>,
}

impl Default for SetTime {
    fn default() -> Self {
        SetTime::DontChange
    }
}
