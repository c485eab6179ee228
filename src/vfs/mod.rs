//! The `DiskInterface` capability: the boundary between the
//! protocol engines and a filesystem driver. Drivers are an external
//! collaborator — this module only defines the trait, the shared value
//! types that cross it, and (under `testing`) a fixture implementation
//! used by the test suite.

pub mod file;
pub mod testing;

use std::path::PathBuf;

use async_trait::async_trait;

pub use file::{Attr, Device, SetAttr, SetTime, Time, Type};

/// Result alias used throughout the `vfs` module.
pub type DiskResult<T> = std::result::Result<T, crate::error::DiskError>;

/// Maximum length of a name passed into a [`DiskInterface`] method.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a path passed into a [`DiskInterface`] method.
pub const MAX_PATH_LEN: usize = 1024;

/// A backslash-delimited path within a share, as used on the wire by
/// FTP (after translation from the forward-slash virtual namespace)
/// and SMB, and reconstructed by NFS from its file-id cache (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VfsPath(pub String);

impl VfsPath {
    pub fn root() -> Self {
        VfsPath(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, name: &str) -> Self {
        if self.0.is_empty() {
            VfsPath(name.to_owned())
        } else {
            VfsPath(format!("{}\\{}", self.0, name))
        }
    }

    /// Splits off the final path component, mirroring the "strip the
    /// filename and compare the parent" rule used by SMB notify
    /// matching.
    pub fn parent_and_name(&self) -> (VfsPath, Option<&str>) {
        match self.0.rsplit_once('\\') {
            Some((parent, name)) => (VfsPath(parent.to_owned()), Some(name)),
            None if self.0.is_empty() => (VfsPath::root(), None),
            None => (VfsPath::root(), Some(self.0.as_str())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether a path names nothing, a file, or a directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathStatus {
    NotExist,
    FileExists,
    DirectoryExists,
}

/// Mode requested of [`DiskInterface::open_file`]/`create_file`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// STOR-style: create or truncate.
    Truncate,
    /// APPE-style: create if absent, otherwise open existing for append.
    CreateOrAppend,
}

/// A driver-owned handle to an open file or directory, returned by
/// `open_file`/`create_file` and threaded back through `read_file`,
/// `write_file` and `close_file`. The `file_id` is what NFS's open-file
/// cache (§3, §4.G) and file-id cache key on.
#[derive(Debug, Clone)]
pub struct NetworkFile {
    pub file_id: u64,
    pub path: VfsPath,
    pub created_this_call: bool,
}

/// Opaque cursor returned by [`DiskInterface::start_search`] and
/// advanced by subsequent driver-specific iteration (the protocol
/// engines drive this themselves for LIST/READDIR/FIND_FIRST2-style
/// operations; this capability only needs to vend and resume one).
#[derive(Debug, Clone)]
pub struct SearchHandle {
    pub id: u64,
    pub path: VfsPath,
    pub pattern: String,
}

/// One entry produced while iterating a [`SearchHandle`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub attr: file::Attr,
}

/// Attribute fields a caller may update via `set_file_information`.
#[derive(Debug, Clone, Default)]
pub struct SetFileInfo {
    pub attr: Option<SetAttr>,
    pub delete_on_close: Option<bool>,
}

/// The capability every protocol engine drives filesystem operations
/// through. One instance per [`crate::share::SharedDevice`].
///
/// Paths are share-relative, backslash-delimited. A `tree` (the requesting session's [`crate::share::TreeConnection`])
/// is threaded through so a driver that needs per-session identity
/// (e.g. to set the OS user context before a syscall, as the NFS engine
/// does via the authenticator's `set_current_user`) has it without a
/// separate capability call.
#[async_trait]
pub trait DiskInterface: Send + Sync {
    async fn file_exists(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
    ) -> DiskResult<PathStatus>;

    async fn open_file(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
        mode: OpenMode,
    ) -> DiskResult<NetworkFile>;

    async fn create_file(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
        attr: SetAttr,
    ) -> DiskResult<NetworkFile>;

    async fn create_directory(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
    ) -> DiskResult<()>;

    async fn delete_file(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
    ) -> DiskResult<()>;

    async fn delete_directory(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
    ) -> DiskResult<()>;

    async fn rename_file(
        &self,
        tree: &crate::share::TreeConnection,
        from: &VfsPath,
        to: &VfsPath,
    ) -> DiskResult<()>;

    async fn read_file(
        &self,
        tree: &crate::share::TreeConnection,
        file: &NetworkFile,
        buf: &mut [u8],
        file_pos: u64,
    ) -> DiskResult<usize>;

    async fn write_file(
        &self,
        tree: &crate::share::TreeConnection,
        file: &NetworkFile,
        buf: &[u8],
        file_pos: u64,
    ) -> DiskResult<usize>;

    async fn close_file(
        &self,
        tree: &crate::share::TreeConnection,
        file: NetworkFile,
    ) -> DiskResult<()>;

    async fn start_search(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
        pattern: &str,
    ) -> DiskResult<SearchHandle>;

    /// Advances a search started by `start_search`, returning up to
    /// `max_entries` entries. An empty, non-final result means the
    /// caller should call again; `Ok((entries, true))` marks EOF.
    async fn read_search(
        &self,
        tree: &crate::share::TreeConnection,
        search: &mut SearchHandle,
        max_entries: usize,
    ) -> DiskResult<(Vec<DirEntry>, bool)>;

    async fn get_file_information(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
    ) -> DiskResult<file::Attr>;

    async fn set_file_information(
        &self,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
        info: SetFileInfo,
    ) -> DiskResult<()>;

    /// Absolute host path backing `path`, if the driver is host-backed.
    /// Used only for diagnostics; engines never assume it exists.
    fn host_path_hint(&self, _path: &VfsPath) -> Option<PathBuf> {
        None
    }
}

/// Optional capability: presence toggles the stable `unique` fact in
/// FTP `MLST`. A driver that can't cheaply produce a stable
/// per-file identifier simply doesn't implement this.
pub trait FileIdInterface: Send + Sync {
    fn file_id(&self, path: &VfsPath) -> Option<u64>;
}
