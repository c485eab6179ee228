//! An in-memory [`DiskInterface`] fixture. Used by the test suite and
//! as the reference share backend `server::run` wires up out of the
//! box; real drivers are an external collaborator a
//! deployment plugs in by registering its own `SharedDevice`s instead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    Attr, DirEntry, DiskInterface, DiskResult, NetworkFile, OpenMode, PathStatus, SearchHandle,
    SetAttr, SetFileInfo, SetTime, Time, Type, VfsPath,
};
use crate::error::DiskError;
use crate::share::TreeConnection;

enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, VfsPath>),
}

struct Entry {
    node: Node,
    attr: Attr,
}

/// A filesystem that lives entirely in memory, keyed by share-relative
/// [`VfsPath`]. Good enough to drive the FTP/NFS/SMB session engines'
/// tests without touching the real filesystem.
pub struct MemoryDisk {
    entries: Mutex<BTreeMap<VfsPath, Entry>>,
    next_file_id: AtomicU64,
    next_search_id: AtomicU64,
}

impl Default for MemoryDisk {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            VfsPath::root(),
            Entry {
                node: Node::Dir(BTreeMap::new()),
                attr: Self::make_attr(Type::Directory, 0, 0o755),
            },
        );
        MemoryDisk {
            entries: Mutex::new(entries),
            next_file_id: AtomicU64::new(1),
            next_search_id: AtomicU64::new(1),
        }
    }
}

impl MemoryDisk {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_attr(file_type: Type, fileid: u64, mode: u32) -> Attr {
        let now = Time::now();
        Attr {
            file_type,
            mode,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            used: 0,
            device: None,
            fsid: 1,
            fileid,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Convenience for tests: seed a file directly.
    pub fn seed_file(&self, path: &VfsPath, data: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap();
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        let mut attr = Self::make_attr(Type::Regular, id, 0o644);
        attr.size = data.len() as u64;
        attr.used = attr.size;
        Self::link_parent(&mut entries, path);
        entries.insert(path.clone(), Entry { node: Node::File(data), attr });
    }

    pub fn seed_dir(&self, path: &VfsPath) {
        let mut entries = self.entries.lock().unwrap();
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        Self::link_parent(&mut entries, path);
        entries.insert(
            path.clone(),
            Entry { node: Node::Dir(BTreeMap::new()), attr: Self::make_attr(Type::Directory, id, 0o755) },
        );
    }

    fn link_parent(entries: &mut BTreeMap<VfsPath, Entry>, path: &VfsPath) {
        let (parent, name) = path.parent_and_name();
        let Some(name) = name else { return };
        if let Some(Entry { node: Node::Dir(children), .. }) = entries.get_mut(&parent) {
            children.insert(name.to_owned(), path.clone());
        }
    }
}

#[async_trait]
impl DiskInterface for MemoryDisk {
    async fn file_exists(&self, _tree: &TreeConnection, path: &VfsPath) -> DiskResult<PathStatus> {
        let entries = self.entries.lock().unwrap();
        Ok(match entries.get(path) {
            None => PathStatus::NotExist,
            Some(Entry { node: Node::Dir(_), .. }) => PathStatus::DirectoryExists,
            Some(Entry { node: Node::File(_), .. }) => PathStatus::FileExists,
        })
    }

    async fn open_file(
        &self,
        _tree: &TreeConnection,
        path: &VfsPath,
        mode: OpenMode,
    ) -> DiskResult<NetworkFile> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(path) {
            Some(Entry { node: Node::File(_), attr }) => {
                Ok(NetworkFile { file_id: attr.fileid, path: path.clone(), created_this_call: false })
            }
            Some(Entry { node: Node::Dir(_), .. }) => Err(DiskError::IsDir),
            None if mode == OpenMode::CreateOrAppend => {
                drop(entries);
                self.create_file(_tree, path, SetAttr::default()).await
            }
            None => Err(DiskError::NotFound),
        }
    }

    async fn create_file(
        &self,
        _tree: &TreeConnection,
        path: &VfsPath,
        _attr: SetAttr,
    ) -> DiskResult<NetworkFile> {
        let mut entries = self.entries.lock().unwrap();
        let (parent, name) = path.parent_and_name();
        if name.is_none() {
            return Err(DiskError::InvalidArgument);
        }
        match entries.get(&parent) {
            Some(Entry { node: Node::Dir(_), .. }) => {}
            Some(_) => return Err(DiskError::NotDir),
            None => return Err(DiskError::NotFound),
        }
        let existed = entries.contains_key(path);
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        Self::link_parent(&mut entries, path);
        entries.insert(
            path.clone(),
            Entry { node: Node::File(Vec::new()), attr: Self::make_attr(Type::Regular, id, 0o644) },
        );
        Ok(NetworkFile { file_id: id, path: path.clone(), created_this_call: !existed })
    }

    async fn create_directory(&self, _tree: &TreeConnection, path: &VfsPath) -> DiskResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(path) {
            return Err(DiskError::Exists);
        }
        let (parent, name) = path.parent_and_name();
        if name.is_none() {
            return Err(DiskError::InvalidArgument);
        }
        match entries.get(&parent) {
            Some(Entry { node: Node::Dir(_), .. }) => {}
            Some(_) => return Err(DiskError::NotDir),
            None => return Err(DiskError::NotFound),
        }
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        Self::link_parent(&mut entries, path);
        entries.insert(
            path.clone(),
            Entry { node: Node::Dir(BTreeMap::new()), attr: Self::make_attr(Type::Directory, id, 0o755) },
        );
        Ok(())
    }

    async fn delete_file(&self, _tree: &TreeConnection, path: &VfsPath) -> DiskResult<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(path) {
            Some(Entry { node: Node::File(_), .. }) => {}
            Some(_) => return Err(DiskError::IsDir),
            None => return Err(DiskError::NotFound),
        }
        entries.remove(path);
        let (parent, name) = path.parent_and_name();
        if let (Some(Entry { node: Node::Dir(children), .. }), Some(name)) =
            (entries.get_mut(&parent), name)
        {
            children.remove(name);
        }
        Ok(())
    }

    async fn delete_directory(&self, _tree: &TreeConnection, path: &VfsPath) -> DiskResult<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(path) {
            Some(Entry { node: Node::Dir(children), .. }) => {
                if !children.is_empty() {
                    return Err(DiskError::NotEmpty);
                }
            }
            Some(_) => return Err(DiskError::NotDir),
            None => return Err(DiskError::NotFound),
        }
        entries.remove(path);
        let (parent, name) = path.parent_and_name();
        if let (Some(Entry { node: Node::Dir(children), .. }), Some(name)) =
            (entries.get_mut(&parent), name)
        {
            children.remove(name);
        }
        Ok(())
    }

    async fn rename_file(&self, _tree: &TreeConnection, from: &VfsPath, to: &VfsPath) -> DiskResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(from) {
            return Err(DiskError::NotFound);
        }
        // A rename that only changes case targets the same key under a
        // case-insensitive namespace; treat it as a move, not a collision.
        let case_only_self = from.0.eq_ignore_ascii_case(&to.0) && from.0 != to.0;
        if entries.contains_key(to) && !case_only_self {
            return Err(DiskError::Exists);
        }
        let entry = entries.remove(from).unwrap();
        let (from_parent, from_name) = from.parent_and_name();
        if let (Some(Entry { node: Node::Dir(children), .. }), Some(name)) =
            (entries.get_mut(&from_parent), from_name)
        {
            children.remove(name);
        }
        entries.insert(to.clone(), entry);
        Self::link_parent(&mut entries, to);
        Ok(())
    }

    async fn read_file(
        &self,
        _tree: &TreeConnection,
        file: &NetworkFile,
        buf: &mut [u8],
        file_pos: u64,
    ) -> DiskResult<usize> {
        let entries = self.entries.lock().unwrap();
        match entries.get(&file.path) {
            Some(Entry { node: Node::File(data), .. }) => {
                let pos = file_pos as usize;
                if pos >= data.len() {
                    return Ok(0);
                }
                let n = std::cmp::min(buf.len(), data.len() - pos);
                buf[..n].copy_from_slice(&data[pos..pos + n]);
                Ok(n)
            }
            Some(_) => Err(DiskError::IsDir),
            None => Err(DiskError::StaleHandle),
        }
    }

    async fn write_file(
        &self,
        _tree: &TreeConnection,
        file: &NetworkFile,
        buf: &[u8],
        file_pos: u64,
    ) -> DiskResult<usize> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&file.path) {
            Some(Entry { node: Node::File(data), attr }) => {
                let pos = file_pos as usize;
                if data.len() < pos + buf.len() {
                    data.resize(pos + buf.len(), 0);
                }
                data[pos..pos + buf.len()].copy_from_slice(buf);
                attr.size = data.len() as u64;
                attr.used = attr.size;
                attr.mtime = Time::now();
                Ok(buf.len())
            }
            Some(_) => Err(DiskError::IsDir),
            None => Err(DiskError::StaleHandle),
        }
    }

    async fn close_file(&self, _tree: &TreeConnection, _file: NetworkFile) -> DiskResult<()> {
        Ok(())
    }

    async fn start_search(
        &self,
        _tree: &TreeConnection,
        path: &VfsPath,
        pattern: &str,
    ) -> DiskResult<SearchHandle> {
        let entries = self.entries.lock().unwrap();
        if !matches!(entries.get(path), Some(Entry { node: Node::Dir(_), .. })) {
            return Err(DiskError::NotDir);
        }
        let id = self.next_search_id.fetch_add(1, Ordering::Relaxed);
        Ok(SearchHandle { id, path: path.clone(), pattern: pattern.to_owned() })
    }

    async fn read_search(
        &self,
        _tree: &TreeConnection,
        search: &mut SearchHandle,
        max_entries: usize,
    ) -> DiskResult<(Vec<DirEntry>, bool)> {
        let entries = self.entries.lock().unwrap();
        let Some(Entry { node: Node::Dir(children), .. }) = entries.get(&search.path) else {
            return Err(DiskError::StaleHandle);
        };
        let matches_pattern = |name: &str| search.pattern == "*" || search.pattern == name;
        let mut out = Vec::new();
        for (name, child_path) in children.iter() {
            if !matches_pattern(name) {
                continue;
            }
            if let Some(Entry { attr, .. }) = entries.get(child_path) {
                out.push(DirEntry { name: name.clone(), attr: attr.clone() });
            }
            if out.len() == max_entries {
                return Ok((out, false));
            }
        }
        Ok((out, true))
    }

    async fn get_file_information(&self, _tree: &TreeConnection, path: &VfsPath) -> DiskResult<Attr> {
        let entries = self.entries.lock().unwrap();
        entries.get(path).map(|e| e.attr.clone()).ok_or(DiskError::NotFound)
    }

    async fn set_file_information(
        &self,
        _tree: &TreeConnection,
        path: &VfsPath,
        info: SetFileInfo,
    ) -> DiskResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(path).ok_or(DiskError::NotFound)?;
        if let Some(attr) = info.attr {
            if let Some(mode) = attr.mode {
                entry.attr.mode = mode;
            }
            if let Some(uid) = attr.uid {
                entry.attr.uid = uid;
            }
            if let Some(gid) = attr.gid {
                entry.attr.gid = gid;
            }
            if let Some(size) = attr.size {
                if let Node::File(data) = &mut entry.node {
                    data.resize(size as usize, 0);
                }
                entry.attr.size = size;
                entry.attr.used = size;
            }
            match attr.mtime {
                Some(SetTime::ServerCurrent) => entry.attr.mtime = Time::now(),
                Some(SetTime::ClientProvided(t)) => entry.attr.mtime = t,
                _ => {}
            }
        }
        Ok(())
    }
}
