//! NFS Dispatcher: program/version validation, session
//! lookup, and per-procedure handling for the NFS3 program. UDP and
//! TCP both funnel through [`Dispatcher::handle_call`]; framing is the
//! caller's job (`rpc::read_tcp_record` for TCP, one packet per
//! datagram for UDP).

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::NfsAuthenticator;
use crate::error::EngineError;
use crate::nfs::handle::{share_id_for_name, FileHandle, HandleType};
use crate::nfs::rpc::{self, AcceptStat, AuthStat};
use crate::nfs::session::{NfsSession, NfsSessionTable};
use crate::nfs::xdr::{Reader, Writer};
use crate::pool::BufferPool;
use crate::share::ShareTable;
use crate::vfs::{PathStatus, SetAttr, SetFileInfo, SetTime, Time, VfsPath};

pub const NFS_PROGRAM: u32 = 100003;
pub const NFS_VERSION_LOW: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nfsstat3 {
    Ok = 0,
    Perm = 1,
    NoEnt = 2,
    Io = 5,
    Acces = 13,
    Exist = 17,
    NotDir = 20,
    IsDir = 21,
    Inval = 22,
    NoSpc = 28,
    NotEmpty = 66,
    Stale = 70,
    BadHandle = 10001,
    ServerFault = 10006,
}

impl From<EngineError> for Nfsstat3 {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidArgument(_) => Nfsstat3::Inval,
            EngineError::NotLoggedOn => Nfsstat3::Acces,
            EngineError::AccessDenied => Nfsstat3::Acces,
            EngineError::NotFound => Nfsstat3::NoEnt,
            EngineError::AlreadyExists => Nfsstat3::Exist,
            EngineError::DiskFull | EngineError::QuotaExceeded => Nfsstat3::NoSpc,
            _ => Nfsstat3::ServerFault,
        }
    }
}

pub struct Dispatcher {
    pub shares: Arc<ShareTable>,
    pub sessions: Arc<NfsSessionTable>,
    pub authenticator: Arc<dyn NfsAuthenticator>,
    pub pool: Arc<BufferPool>,
    /// Highest NFS version advertised to `PROG_MISMATCH` replies; only
    /// version 3 is actually processed.
    pub version_high: u32,
}

impl Dispatcher {
    /// Handles one fully-assembled RPC message, returning the reply
    /// bytes (unframed; the caller frames for TCP or sends as-is for
    /// UDP).
    pub async fn handle_call(&self, raw: &[u8], remote_addr: SocketAddr) -> Vec<u8> {
        let (header, args_offset) = match rpc::parse_call_header(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed RPC call");
                return Vec::new();
            }
        };
        if header.prog != NFS_PROGRAM {
            return rpc::build_accept_error_reply(header.xid, AcceptStat::ProgUnavail, 0, 0);
        }
        if header.vers < NFS_VERSION_LOW || header.vers > self.version_high {
            return rpc::build_accept_error_reply(
                header.xid,
                AcceptStat::ProgMismatch,
                NFS_VERSION_LOW,
                self.version_high,
            );
        }
        if header.vers != 3 {
            // Dispatch point only: no NFSv4 procedure
            // implementations exist behind this version.
            return rpc::build_accept_error_reply(header.xid, AcceptStat::ProcUnavail, 0, 0);
        }

        if header.proc == 0 {
            let mut out = rpc::build_success_header(header.xid);
            out.extend(Writer::new().into_bytes());
            return out;
        }

        let session = match self
            .sessions
            .find_or_create(&header.cred, remote_addr, self.authenticator.as_ref())
            .await
        {
            Ok(s) => s,
            Err(_) => return rpc::build_auth_error_reply(header.xid, AuthStat::BadCred),
        };

        let args = &raw[args_offset..];
        let result = self.dispatch_proc(&session, header.proc, args).await;
        let (stat, body) = match result {
            Ok(body) => (Nfsstat3::Ok, body),
            Err(e) => {
                debug!(proc = header.proc, error = %e, "NFS procedure failed");
                (Nfsstat3::from(e), Vec::new())
            }
        };
        let mut out = rpc::build_success_header(header.xid);
        let mut w = Writer::new();
        w.u32(stat as u32);
        out.extend(w.into_bytes());
        out.extend(body);
        out
    }

    async fn dispatch_proc(
        &self,
        session: &NfsSession,
        proc: u32,
        args: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        session.touch();
        match proc {
            1 => self.getattr(session, args).await,
            2 => self.setattr(session, args).await,
            3 => self.lookup(session, args).await,
            4 => self.access(session, args).await,
            6 => self.read(session, args).await,
            7 => self.write(session, args).await,
            8 => self.create(session, args).await,
            9 => self.mkdir(session, args).await,
            12 => self.remove(session, args).await,
            13 => self.rmdir(session, args).await,
            14 => self.rename(session, args).await,
            16 => self.readdir(session, args).await,
            17 => self.readdirplus(session, args).await,
            _ => Err(EngineError::InvalidArgument(format!("unsupported NFS3 procedure {proc}"))),
        }
    }

    /// Resolves an on-wire handle to `(tree, path)`, looking the
    /// directory/file id up in the session's file-id cache.
    async fn resolve_handle(
        &self,
        session: &NfsSession,
        wire: &[u8],
    ) -> Result<(crate::share::TreeConnection, VfsPath, FileHandle), EngineError> {
        let handle = FileHandle::unpack(wire)
            .ok_or_else(|| EngineError::ProtocolViolation("bad file handle".into()))?;
        let share_name = self
            .shares
            .names()
            .find(|n| share_id_for_name(n) == handle.share_id)
            .map(str::to_owned)
            .ok_or(EngineError::NotFound)?;
        let tree = session.get_tree(&self.shares, &share_name).await?;
        let path = match handle.handle_type {
            HandleType::Share => VfsPath::root(),
            HandleType::Dir | HandleType::File => session
                .file_id_cache
                .get(&(handle.file_id as u64))
                .map(|p| p.clone())
                .ok_or(EngineError::NotFound)?,
        };
        Ok((tree, path, handle))
    }

    fn handle_for(&self, session: &NfsSession, share: &str, path: &VfsPath, is_dir: bool) -> FileHandle {
        let file_id = session.allocate_file_id(path);
        FileHandle {
            handle_type: if path.is_root() {
                HandleType::Share
            } else if is_dir {
                HandleType::Dir
            } else {
                HandleType::File
            },
            share_id: share_id_for_name(share),
            dir_id: 0,
            file_id: file_id as u32,
        }
    }

    async fn getattr(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?;
        let (tree, path, _) = self.resolve_handle(session, wire).await?;
        let attr = tree.disk().get_file_information(&tree, &path).await?;
        let mut w = Writer::new();
        write_fattr3(&mut w, &attr);
        Ok(w.into_bytes())
    }

    async fn setattr(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let mode = if r.u32()? != 0 { Some(r.u32()?) } else { None };
        let uid = if r.u32()? != 0 { Some(r.u32()?) } else { None };
        let gid = if r.u32()? != 0 { Some(r.u32()?) } else { None };
        let size = if r.u32()? != 0 { Some(r.u64()?) } else { None };
        let atime = set_time(&mut r)?;
        let mtime = set_time(&mut r)?;
        // sattrguard3 (compare-and-swap on ctime) follows; this engine
        // always applies the update unconditionally.
        let (tree, path, _) = self.resolve_handle(session, &wire).await?;
        let info = SetFileInfo {
            attr: Some(SetAttr { mode, uid, gid, size, atime, mtime }),
            delete_on_close: None,
        };
        tree.disk().set_file_information(&tree, &path, info).await?;
        let attr = tree.disk().get_file_information(&tree, &path).await?;
        let mut w = Writer::new();
        write_fattr3(&mut w, &attr);
        Ok(w.into_bytes())
    }

    async fn access(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let requested = r.u32()?;
        let (tree, path, _) = self.resolve_handle(session, &wire).await?;
        let attr = tree.disk().get_file_information(&tree, &path).await?;
        // ACCESS3_MODIFY | ACCESS3_EXTEND | ACCESS3_DELETE.
        let write_bits: u32 = 0x0004 | 0x0008 | 0x0010;
        let allowed = if tree.is_read_only() { !write_bits } else { u32::MAX };
        let granted = requested & allowed;
        let mut w = Writer::new();
        write_fattr3(&mut w, &attr);
        w.u32(granted);
        Ok(w.into_bytes())
    }

    async fn lookup(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let dir_wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let name = r.string()?;
        let (tree, dir_path, dir_handle) = self.resolve_handle(session, &dir_wire).await?;
        let child_path = dir_path.join(&name);
        let status = tree.disk().file_exists(&tree, &child_path).await?;
        if status == PathStatus::NotExist {
            return Err(EngineError::NotFound);
        }
        let share = self
            .shares
            .names()
            .find(|n| share_id_for_name(n) == dir_handle.share_id)
            .unwrap_or_default()
            .to_owned();
        let handle = self.handle_for(session, &share, &child_path, status == PathStatus::DirectoryExists);
        let attr = tree.disk().get_file_information(&tree, &child_path).await?;
        let mut w = Writer::new();
        w.opaque_fixed(&handle.pack());
        write_fattr3(&mut w, &attr);
        Ok(w.into_bytes())
    }

    async fn read(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let offset = r.u64()?;
        let count = r.u32()? as usize;
        let (tree, path, handle) = self.resolve_handle(session, &wire).await?;
        let net_file = session.open_files.find_or_open(handle.file_id as u64, &tree, &path).await?;
        let mut pooled = self.pool.allocate(count).await?;
        let n = tree.disk().read_file(&tree, &net_file, pooled.as_mut_slice(), offset).await?;
        session.open_files.touch(handle.file_id as u64).await;
        let attr = tree.disk().get_file_information(&tree, &path).await?;
        let eof = offset + n as u64 >= attr.size;
        let mut w = Writer::new();
        write_fattr3(&mut w, &attr);
        w.u32(n as u32);
        w.bool(eof);
        w.opaque_var(&pooled.as_slice()[..n]);
        self.pool.release(pooled);
        Ok(w.into_bytes())
    }

    async fn write(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let offset = r.u64()?;
        let _count = r.u32()?;
        let _stable = r.u32()?;
        let data = r.opaque_var()?.to_vec();
        let (tree, path, handle) = self.resolve_handle(session, &wire).await?;
        let net_file = session.open_files.find_or_open(handle.file_id as u64, &tree, &path).await?;
        let n = tree.disk().write_file(&tree, &net_file, &data, offset).await?;
        session.open_files.touch(handle.file_id as u64).await;
        let attr = tree.disk().get_file_information(&tree, &path).await?;
        let mut w = Writer::new();
        write_fattr3(&mut w, &attr);
        w.u32(n as u32);
        w.u32(2); // FILE_SYNC
        Ok(w.into_bytes())
    }

    async fn create(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let dir_wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let name = r.string()?;
        let (tree, dir_path, dir_handle) = self.resolve_handle(session, &dir_wire).await?;
        let path = dir_path.join(&name);
        tree.disk().create_file(&tree, &path, SetAttr::default()).await?;
        let share = self
            .shares
            .names()
            .find(|n| share_id_for_name(n) == dir_handle.share_id)
            .unwrap_or_default()
            .to_owned();
        let handle = self.handle_for(session, &share, &path, false);
        let attr = tree.disk().get_file_information(&tree, &path).await?;
        let mut w = Writer::new();
        w.opaque_fixed(&handle.pack());
        write_fattr3(&mut w, &attr);
        Ok(w.into_bytes())
    }

    async fn mkdir(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let dir_wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let name = r.string()?;
        let (tree, dir_path, dir_handle) = self.resolve_handle(session, &dir_wire).await?;
        let path = dir_path.join(&name);
        tree.disk().create_directory(&tree, &path).await?;
        let share = self
            .shares
            .names()
            .find(|n| share_id_for_name(n) == dir_handle.share_id)
            .unwrap_or_default()
            .to_owned();
        let handle = self.handle_for(session, &share, &path, true);
        let attr = tree.disk().get_file_information(&tree, &path).await?;
        let mut w = Writer::new();
        w.opaque_fixed(&handle.pack());
        write_fattr3(&mut w, &attr);
        Ok(w.into_bytes())
    }

    async fn remove(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let dir_wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let name = r.string()?;
        let (tree, dir_path, _) = self.resolve_handle(session, &dir_wire).await?;
        let path = dir_path.join(&name);
        tree.disk().delete_file(&tree, &path).await?;
        Ok(Writer::new().into_bytes())
    }

    async fn rmdir(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let dir_wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let name = r.string()?;
        let (tree, dir_path, _) = self.resolve_handle(session, &dir_wire).await?;
        let path = dir_path.join(&name);
        tree.disk().delete_directory(&tree, &path).await?;
        Ok(Writer::new().into_bytes())
    }

    async fn rename(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let from_dir_wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let from_name = r.string()?;
        let to_dir_wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let to_name = r.string()?;
        let (from_tree, from_dir, from_handle) = self.resolve_handle(session, &from_dir_wire).await?;
        let (_, to_dir, to_handle) = self.resolve_handle(session, &to_dir_wire).await?;
        if from_handle.share_id != to_handle.share_id {
            return Err(EngineError::InvalidArgument("cross-device rename".into()));
        }
        let from_path = from_dir.join(&from_name);
        let to_path = to_dir.join(&to_name);
        from_tree.disk().rename_file(&from_tree, &from_path, &to_path).await?;
        Ok(Writer::new().into_bytes())
    }

    async fn readdir(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let cookie = r.u64()?;
        let _cookie_verf = r.opaque_fixed(8)?;
        let count = r.u32()? as usize;
        let (tree, path, _) = self.resolve_handle(session, &wire).await?;
        let dir_attr = tree.disk().get_file_information(&tree, &path).await?;

        let mut search = self.resume_or_start_search(session, &tree, &path, cookie).await?;
        let max_entries = (count / 64).clamp(8, 512);
        let (entries, eof) = tree.disk().read_search(&tree, &mut search, max_entries).await?;
        let next_cookie = self.park_search_unless_eof(session, search, eof)?;

        let mut w = Writer::new();
        write_fattr3(&mut w, &dir_attr);
        w.opaque_fixed(&[0u8; 8]);
        for e in &entries {
            w.bool(true);
            w.u64(e.attr.fileid);
            w.opaque_var(e.name.as_bytes());
            w.u64(next_cookie.unwrap_or(0));
        }
        w.bool(false);
        w.bool(eof);
        Ok(w.into_bytes())
    }

    async fn readdirplus(&self, session: &NfsSession, args: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut r = Reader::new(args);
        let wire = r.opaque_fixed(crate::nfs::handle::HANDLE_LEN)?.to_vec();
        let cookie = r.u64()?;
        let _cookie_verf = r.opaque_fixed(8)?;
        let _dir_count = r.u32()?;
        let max_count = r.u32()? as usize;
        let (tree, dir_path, dir_handle) = self.resolve_handle(session, &wire).await?;
        let dir_attr = tree.disk().get_file_information(&tree, &dir_path).await?;
        let share = self
            .shares
            .names()
            .find(|n| share_id_for_name(n) == dir_handle.share_id)
            .unwrap_or_default()
            .to_owned();

        let mut search = self.resume_or_start_search(session, &tree, &dir_path, cookie).await?;
        let max_entries = (max_count / 128).clamp(8, 256);
        let (entries, eof) = tree.disk().read_search(&tree, &mut search, max_entries).await?;
        let next_cookie = self.park_search_unless_eof(session, search, eof)?;

        let mut w = Writer::new();
        write_fattr3(&mut w, &dir_attr);
        w.opaque_fixed(&[0u8; 8]);
        for e in &entries {
            w.bool(true);
            w.u64(e.attr.fileid);
            w.opaque_var(e.name.as_bytes());
            w.u64(next_cookie.unwrap_or(0));
            w.bool(true);
            write_fattr3(&mut w, &e.attr);
            let child_path = dir_path.join(&e.name);
            let child_handle = self.handle_for(session, &share, &child_path, e.attr.is_dir());
            w.bool(true);
            w.opaque_var(&child_handle.pack());
        }
        w.bool(false);
        w.bool(eof);
        Ok(w.into_bytes())
    }

    /// Cookie `0` starts a fresh walk; any other value names a search
    /// slot parked by a previous READDIR[PLUS] call on this session.
    async fn resume_or_start_search(
        &self,
        session: &NfsSession,
        tree: &crate::share::TreeConnection,
        path: &VfsPath,
        cookie: u64,
    ) -> Result<crate::vfs::SearchHandle, EngineError> {
        if cookie == 0 {
            Ok(tree.disk().start_search(tree, path, "*").await?)
        } else {
            session
                .searches
                .take((cookie - 1) as usize)
                .ok_or_else(|| EngineError::InvalidArgument("stale readdir cookie".into()))
        }
    }

    /// Parks a not-yet-exhausted search back into the session's search
    /// slots and returns the wire cookie the client should send next;
    /// `None` once the walk is done, matching `eof`.
    fn park_search_unless_eof(
        &self,
        session: &NfsSession,
        search: crate::vfs::SearchHandle,
        eof: bool,
    ) -> Result<Option<u64>, EngineError> {
        if eof {
            Ok(None)
        } else {
            Ok(Some(session.searches.insert(search)? as u64 + 1))
        }
    }
}

fn set_time(r: &mut Reader) -> Result<Option<SetTime>, EngineError> {
    match r.u32()? {
        1 => Ok(Some(SetTime::ServerCurrent)),
        2 => {
            let seconds = r.u32()? as i64;
            let nanos = r.u32()?;
            Ok(Some(SetTime::ClientProvided(Time { seconds, nanos })))
        }
        _ => Ok(None),
    }
}

fn write_fattr3(w: &mut Writer, attr: &crate::vfs::file::Attr) {
    let ftype = match attr.file_type {
        crate::vfs::Type::Regular => 1,
        crate::vfs::Type::Directory => 2,
        crate::vfs::Type::BlockDevice => 3,
        crate::vfs::Type::CharacterDevice => 4,
        crate::vfs::Type::Symlink => 5,
        crate::vfs::Type::Socket => 6,
        crate::vfs::Type::Fifo => 7,
    };
    w.u32(ftype);
    w.u32(attr.mode);
    w.u32(attr.nlink);
    w.u32(attr.uid);
    w.u32(attr.gid);
    w.u64(attr.size);
    w.u64(attr.used);
    w.u32(attr.device.map(|d| d.major).unwrap_or(0));
    w.u32(attr.device.map(|d| d.minor).unwrap_or(0));
    w.u64(attr.fsid);
    w.u64(attr.fileid);
    w.u32(attr.atime.seconds as u32);
    w.u32(attr.atime.nanos);
    w.u32(attr.mtime.seconds as u32);
    w.u32(attr.mtime.nanos);
    w.u32(attr.ctime.seconds as u32);
    w.u32(attr.ctime.nanos);
}
