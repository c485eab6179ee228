//! The FTP Path triple: a forward-slash virtual namespace
//! over the share list, mapped onto a backslash-delimited path within
//! exactly one share once the CWD descends into it.

use crate::vfs::VfsPath;

/// `(ftpPath, shareName?, sharePath)`. When `share_name` is `None` only
/// root/virtual-listing operations are valid — the client is looking at
/// the list of shares, not inside any one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpPath {
    ftp_path: String,
    share_name: Option<String>,
    share_path: VfsPath,
}

impl FtpPath {
    pub fn root() -> Self {
        FtpPath { ftp_path: "/".to_owned(), share_name: None, share_path: VfsPath::root() }
    }

    pub fn share_name(&self) -> Option<&str> {
        self.share_name.as_deref()
    }

    pub fn share_path(&self) -> &VfsPath {
        &self.share_path
    }

    pub fn ftp_path(&self) -> &str {
        &self.ftp_path
    }

    pub fn is_virtual_root(&self) -> bool {
        self.share_name.is_none()
    }

    /// Descends into a share by name, landing at that share's root.
    pub fn enter_share(share_name: &str) -> Self {
        FtpPath {
            ftp_path: format!("/{}", share_name),
            share_name: Some(share_name.to_owned()),
            share_path: VfsPath::root(),
        }
    }

    /// Resolves a client-supplied argument (possibly absolute,
    /// possibly relative) against this CWD, without touching the
    /// filesystem. Returns the new `FtpPath`; directory navigation
    /// mutates this tuple's components together, never just one.
    pub fn resolve(&self, arg: &str, known_shares: &[String]) -> FtpPath {
        let absolute = arg.starts_with('/');
        let joined;
        let raw: &str = if absolute {
            arg.trim_start_matches('/')
        } else {
            joined = format!("{}/{}", self.virtual_suffix(), arg);
            joined.trim_start_matches('/')
        };
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty() && *s != ".").collect();

        let mut stack: Vec<String> = Vec::new();
        for seg in segments {
            if seg == ".." {
                stack.pop();
            } else {
                stack.push(seg.to_owned());
            }
        }

        if stack.is_empty() {
            return FtpPath::root();
        }
        let share_name = stack[0].clone();
        if !known_shares.iter().any(|s| s.eq_ignore_ascii_case(&share_name)) {
            return FtpPath::root();
        }
        let mut share_path = VfsPath::root();
        for part in &stack[1..] {
            share_path = share_path.join(part);
        }
        let ftp_path = format!("/{}", stack.join("/"));
        FtpPath { ftp_path, share_name: Some(share_name), share_path }
    }

    fn virtual_suffix(&self) -> String {
        self.ftp_path.trim_start_matches('/').to_owned()
    }

    pub fn parent(&self) -> FtpPath {
        self.resolve("..", &[self.share_name.clone().unwrap_or_default()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_virtual() {
        let p = FtpPath::root();
        assert!(p.is_virtual_root());
        assert_eq!(p.ftp_path(), "/");
    }

    #[test]
    fn enters_share_and_descends() {
        let shares = vec!["home".to_owned()];
        let p = FtpPath::root().resolve("/home", &shares);
        assert_eq!(p.share_name(), Some("home"));
        assert!(p.share_path().is_root());

        let p2 = p.resolve("docs", &shares);
        assert_eq!(p2.share_path().as_str(), "docs");
    }

    #[test]
    fn dotdot_walks_up() {
        let shares = vec!["home".to_owned()];
        let p = FtpPath::root().resolve("/home/docs/sub", &shares);
        let up = p.resolve("..", &shares);
        assert_eq!(up.share_path().as_str(), "docs");
    }

    #[test]
    fn unknown_share_falls_back_to_root() {
        let p = FtpPath::root().resolve("/nope", &["home".to_owned()]);
        assert!(p.is_virtual_root());
    }
}
