//! SMB Change-Notification Handler: per-share instance
//! tracking outstanding `NotifyRequest`s and dispatching filesystem
//! events to the ones that match.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::vfs::VfsPath;

pub type FilterMask = u32;

pub const FILE_NOTIFY_CHANGE_FILE_NAME: FilterMask = 0x0000_0001;
pub const FILE_NOTIFY_CHANGE_DIR_NAME: FilterMask = 0x0000_0002;
pub const FILE_NOTIFY_CHANGE_ATTRIBUTES: FilterMask = 0x0000_0004;
pub const FILE_NOTIFY_CHANGE_SIZE: FilterMask = 0x0000_0008;
pub const FILE_NOTIFY_CHANGE_LAST_WRITE: FilterMask = 0x0000_0010;
pub const FILE_NOTIFY_CHANGE_LAST_ACCESS: FilterMask = 0x0000_0020;
pub const FILE_NOTIFY_CHANGE_CREATION: FilterMask = 0x0000_0040;
pub const FILE_NOTIFY_CHANGE_SECURITY: FilterMask = 0x0000_0100;

const RE_ARM_EXPIRY: Duration = Duration::from_secs(10);
const DEFAULT_MAX_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub filter: FilterMask,
    pub path: VfsPath,
    pub is_dir: bool,
}

struct NotifyRequest {
    id: u64,
    filter: FilterMask,
    watch_path: VfsPath,
    watch_tree: bool,
    completed: bool,
    expires_at: Option<Instant>,
    buffered_events: Vec<ChangeEvent>,
    notify_enum: bool,
    reply_tx: mpsc::UnboundedSender<NotifyOutcome>,
}

#[derive(Debug, Clone)]
pub enum NotifyOutcome {
    Events(Vec<ChangeEvent>),
    /// Buffer overflowed; the client should do a full re-read instead
    /// of trusting the event list.
    EnumRequired,
}

fn matches(event: &ChangeEvent, req: &NotifyRequest) -> bool {
    if event.filter & req.filter == 0 {
        return false;
    }
    if req.watch_path == event.path && event.is_dir {
        return true;
    }
    if req.watch_tree && under_tree(&req.watch_path, &event.path) {
        return true;
    }
    let (parent, _name) = event.path.parent_and_name();
    parent.as_str().eq_ignore_ascii_case(req.watch_path.as_str())
}

fn under_tree(root: &VfsPath, path: &VfsPath) -> bool {
    let root_s = root.as_str();
    let path_s = path.as_str();
    if root_s.is_empty() {
        return true;
    }
    path_s.len() > root_s.len()
        && path_s.starts_with(root_s)
        && path_s.as_bytes()[root_s.len()] == b'\\'
}

/// One share's notify state. Owns the request list and the
/// rolling `globalMask`; events are matched synchronously on the
/// calling thread, whichever task happens to call `dispatch`.
pub struct NotifyHandler {
    requests: Vec<NotifyRequest>,
    global_mask: FilterMask,
    next_id: u64,
}

impl NotifyHandler {
    pub fn new() -> Self {
        NotifyHandler { requests: Vec::new(), global_mask: 0, next_id: 1 }
    }

    pub fn register(
        &mut self,
        filter: FilterMask,
        watch_path: VfsPath,
        watch_tree: bool,
        reply_tx: mpsc::UnboundedSender<NotifyOutcome>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.requests.push(NotifyRequest {
            id,
            filter,
            watch_path,
            watch_tree,
            completed: false,
            expires_at: None,
            buffered_events: Vec::new(),
            notify_enum: false,
            reply_tx,
        });
        self.global_mask |= filter;
        id
    }

    /// Re-arms a completed request, flushing anything buffered while
    /// it was waiting for the client.
    pub fn rearm(&mut self, id: u64) {
        if let Some(req) = self.requests.iter_mut().find(|r| r.id == id) {
            req.completed = false;
            req.expires_at = None;
            if req.notify_enum {
                req.notify_enum = false;
                let _ = req.reply_tx.send(NotifyOutcome::EnumRequired);
            } else if !req.buffered_events.is_empty() {
                let events = std::mem::take(&mut req.buffered_events);
                let _ = req.reply_tx.send(NotifyOutcome::Events(events));
            }
        }
    }

    fn ingest(&mut self, event: ChangeEvent, max_queue: usize) {
        if event.filter & self.global_mask == 0 {
            return;
        }
        self.expire_requests();
        for req in self.requests.iter_mut() {
            if !matches(&event, req) {
                continue;
            }
            if !req.completed {
                req.completed = true;
                req.expires_at = Some(Instant::now() + RE_ARM_EXPIRY);
                let _ = req.reply_tx.send(NotifyOutcome::Events(vec![event.clone()]));
            } else {
                req.buffered_events.push(event.clone());
                if req.buffered_events.len() >= max_queue {
                    req.buffered_events.clear();
                    req.notify_enum = true;
                }
            }
        }
        self.recompute_global_mask();
    }

    fn expire_requests(&mut self) {
        let now = Instant::now();
        self.requests.retain(|r| !(r.completed && r.expires_at.map(|e| e < now).unwrap_or(false)));
    }

    fn recompute_global_mask(&mut self) {
        self.global_mask = self.requests.iter().map(|r| r.filter).fold(0, |acc, f| acc | f);
    }

    pub fn notify_file_changed(&mut self, path: VfsPath, is_dir: bool) {
        self.ingest(ChangeEvent { filter: FILE_NOTIFY_CHANGE_FILE_NAME, path, is_dir }, DEFAULT_MAX_QUEUE);
    }

    pub fn notify_rename(&mut self, path: VfsPath, is_dir: bool) {
        let filter = if is_dir { FILE_NOTIFY_CHANGE_DIR_NAME } else { FILE_NOTIFY_CHANGE_FILE_NAME };
        self.ingest(ChangeEvent { filter, path, is_dir }, DEFAULT_MAX_QUEUE);
    }

    pub fn notify_attributes_changed(&mut self, path: VfsPath, is_dir: bool) {
        self.ingest(ChangeEvent { filter: FILE_NOTIFY_CHANGE_ATTRIBUTES, path, is_dir }, DEFAULT_MAX_QUEUE);
    }

    pub fn notify_file_size_changed(&mut self, path: VfsPath, is_dir: bool) {
        self.ingest(ChangeEvent { filter: FILE_NOTIFY_CHANGE_SIZE, path, is_dir }, DEFAULT_MAX_QUEUE);
    }

    pub fn notify_last_write_time_changed(&mut self, path: VfsPath, is_dir: bool) {
        self.ingest(ChangeEvent { filter: FILE_NOTIFY_CHANGE_LAST_WRITE, path, is_dir }, DEFAULT_MAX_QUEUE);
    }

    pub fn notify_last_access_time_changed(&mut self, path: VfsPath, is_dir: bool) {
        self.ingest(ChangeEvent { filter: FILE_NOTIFY_CHANGE_LAST_ACCESS, path, is_dir }, DEFAULT_MAX_QUEUE);
    }

    pub fn notify_creation_time_changed(&mut self, path: VfsPath, is_dir: bool) {
        self.ingest(ChangeEvent { filter: FILE_NOTIFY_CHANGE_CREATION, path, is_dir }, DEFAULT_MAX_QUEUE);
    }

    pub fn notify_security_descriptor_changed(&mut self, path: VfsPath, is_dir: bool) {
        self.ingest(ChangeEvent { filter: FILE_NOTIFY_CHANGE_SECURITY, path, is_dir }, DEFAULT_MAX_QUEUE);
    }
}

impl Default for NotifyHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> VfsPath {
        VfsPath(p.to_string())
    }

    #[test]
    fn exact_dir_match_completes_request() {
        let mut handler = NotifyHandler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler.register(FILE_NOTIFY_CHANGE_FILE_NAME, path("docs"), false, tx);
        handler.notify_file_changed(path("docs"), true);
        assert!(matches!(rx.try_recv().unwrap(), NotifyOutcome::Events(_)));
    }

    #[test]
    fn watch_tree_matches_descendant() {
        let mut handler = NotifyHandler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler.register(FILE_NOTIFY_CHANGE_FILE_NAME, path("docs"), true, tx);
        handler.notify_file_changed(path("docs\\a\\b.txt"), false);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn parent_dir_match_for_file_in_watched_directory() {
        let mut handler = NotifyHandler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler.register(FILE_NOTIFY_CHANGE_FILE_NAME, path("DOCS"), false, tx);
        handler.notify_file_changed(path("docs\\a.txt"), false);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn buffer_overflow_sets_enum_marker() {
        let mut handler = NotifyHandler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler.register(FILE_NOTIFY_CHANGE_FILE_NAME, path("docs"), false, tx);
        handler.notify_file_changed(path("docs"), true); // completes
        let _ = rx.try_recv();
        for _ in 0..DEFAULT_MAX_QUEUE {
            handler.notify_file_changed(path("docs"), true);
        }
        let req = &handler.requests[0];
        assert!(req.notify_enum);
        assert!(req.buffered_events.is_empty());
    }

    #[test]
    fn rearm_flushes_buffered_events() {
        let mut handler = NotifyHandler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = handler.register(FILE_NOTIFY_CHANGE_FILE_NAME, path("docs"), false, tx);
        handler.notify_file_changed(path("docs"), true);
        let _ = rx.try_recv();
        handler.notify_file_changed(path("docs"), true);
        handler.rearm(id);
        assert!(matches!(rx.try_recv().unwrap(), NotifyOutcome::Events(_)));
    }
}
