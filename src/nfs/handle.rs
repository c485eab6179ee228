//! NFS opaque file handle: a 32-byte wire value the server
//! packs and later re-resolves, never interpreted by the client.

use byteorder::{BigEndian, ByteOrder};

pub const HANDLE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleType {
    Share = 0,
    Dir = 1,
    File = 2,
}

impl HandleType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(HandleType::Share),
            1 => Some(HandleType::Dir),
            2 => Some(HandleType::File),
            _ => None,
        }
    }
}

const HANDLE_VERSION: u8 = 1;

/// `version(1) | type(1) | shareId(4) | dirId(4) | fileId(4) | pad(18)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    pub handle_type: HandleType,
    pub share_id: u32,
    pub dir_id: u32,
    pub file_id: u32,
}

impl FileHandle {
    pub fn pack(&self) -> [u8; HANDLE_LEN] {
        let mut buf = [0u8; HANDLE_LEN];
        buf[0] = HANDLE_VERSION;
        buf[1] = self.handle_type as u8;
        BigEndian::write_u32(&mut buf[2..6], self.share_id);
        BigEndian::write_u32(&mut buf[6..10], self.dir_id);
        BigEndian::write_u32(&mut buf[10..14], self.file_id);
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Option<FileHandle> {
        if bytes.len() < 14 || bytes[0] != HANDLE_VERSION {
            return None;
        }
        let handle_type = HandleType::from_u8(bytes[1])?;
        let share_id = BigEndian::read_u32(&bytes[2..6]);
        let dir_id = BigEndian::read_u32(&bytes[6..10]);
        let file_id = BigEndian::read_u32(&bytes[10..14]);
        Some(FileHandle { handle_type, share_id, dir_id, file_id })
    }
}

/// Stable hash of a share name, used as `shareId` so handles stay
/// valid across restarts.
pub fn share_id_for_name(name: &str) -> u32 {
    // FNV-1a, 32-bit: simple, stable across process restarts and
    // platforms, unlike `std::hash::Hash`'s randomized default.
    let mut hash: u32 = 0x811c_9dc5;
    for b in name.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_pack_unpack() {
        let h = FileHandle { handle_type: HandleType::File, share_id: 42, dir_id: 7, file_id: 99 };
        let packed = h.pack();
        assert_eq!(packed.len(), HANDLE_LEN);
        let back = FileHandle::unpack(&packed).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn share_id_is_stable() {
        assert_eq!(share_id_for_name("home"), share_id_for_name("home"));
        assert_ne!(share_id_for_name("home"), share_id_for_name("other"));
    }

    #[test]
    fn rejects_truncated_or_bad_version() {
        assert!(FileHandle::unpack(&[0u8; 4]).is_none());
        let mut buf = FileHandle {
            handle_type: HandleType::Dir,
            share_id: 1,
            dir_id: 2,
            file_id: 3,
        }
        .pack();
        buf[0] = 0xff;
        assert!(FileHandle::unpack(&buf).is_none());
    }
}
