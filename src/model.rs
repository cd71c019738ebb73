//! Fixed-shape records that make up the on-disk/in-memory state: the
//! superblock, inodes, directory entries, open-file entries, and the small
//! enums that tag them. See `spec.md` §3.

use serde::{Deserialize, Serialize};

/// "SIMFS" as a little-endian magic constant, written into every superblock.
pub const MAGIC: u64 = 0x0053_4D46_4953; // matches the source's 0x53494D4653

/// Default inode count for a freshly formatted disk.
pub const DEFAULT_N_INODES: usize = 1024;
/// Default block count for a freshly formatted disk.
pub const DEFAULT_N_BLOCKS: usize = 4096;
/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// The uid that always passes every permission check.
pub const ROOT_UID: u32 = 0;
/// Default permissions for a freshly created directory (rwxr-xr-x).
pub const DEFAULT_DIR_PERMS: u16 = 0o755;
/// Default permissions for a freshly created file (rw-r--r--).
pub const DEFAULT_FILE_PERMS: u16 = 0o644;
/// Default permissions for a freshly created symbolic link (rwxrwxrwx).
pub const DEFAULT_SYMLINK_PERMS: u16 = 0o777;

/// Loop guard on symlink expansion during path resolution.
pub const SYMLINK_MAX_DEPTH: u32 = 40;
/// Number of direct block slots an inode holds before spilling into the
/// indirect map.
pub const DIRECT_BLOCKS_MAX: usize = 12;
/// Maximum byte length of a single path component.
pub const MAX_NAME_LEN: usize = 255;

/// Seconds since the UNIX epoch, used for atime/mtime/ctime.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Tag distinguishing what an inode represents. Matched exhaustively at
/// every use site rather than dispatched through a trait object, per the
/// "variant types instead of dynamic dispatch" design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    File,
    Directory,
    SymbolicLink,
}

/// The mode an open-file entry was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
    Append,
    ReadWrite,
}

impl OpenMode {
    /// Parses the classic `r`/`w`/`a`/`r+` mode strings used by `open`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Self::Read),
            "w" => Some(Self::Write),
            "a" => Some(Self::Append),
            "r+" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    /// Whether file contents may be read in this mode.
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Whether file contents may be written in this mode.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::Append | Self::ReadWrite)
    }
}

/// A 9-bit owner/group/other rwx permission value, stored as a small
/// bitfield rather than a string (per the "permissions as a small bitfield"
/// design note). Accepts both an octal integer and a 9-char `rwxr-xr-x`
/// string on the boundary; internally it is always the 9-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission(u16);

impl Permission {
    /// Builds a permission value from its low 9 bits. Returns `None` if any
    /// bit above bit 8 is set.
    pub fn from_octal(bits: u16) -> Option<Self> {
        if bits > 0o777 {
            None
        } else {
            Some(Self(bits))
        }
    }

    /// Parses a `"rwxr-xr-x"`-shaped string into a permission value.
    pub fn from_rwx_str(s: &str) -> Option<Self> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 9 {
            return None;
        }
        let mut bits: u16 = 0;
        for (i, &expect) in ['r', 'w', 'x', 'r', 'w', 'x', 'r', 'w', 'x']
            .iter()
            .enumerate()
        {
            let c = chars[i];
            let shift = 8 - i as u16;
            if c == expect {
                bits |= 1 << shift;
            } else if c != '-' {
                return None;
            }
        }
        Some(Self(bits))
    }

    /// The raw 9-bit value.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Renders as a `"rwxr-xr-x"`-shaped string.
    pub fn to_rwx_string(self) -> String {
        let mut out = String::with_capacity(9);
        for i in 0..9u16 {
            let shift = 8 - i;
            let set = self.0 & (1 << shift) != 0;
            let c = match i % 3 {
                0 => 'r',
                1 => 'w',
                _ => 'x',
            };
            out.push(if set { c } else { '-' });
        }
        out
    }

    /// Owner triad (bits 6-8).
    pub fn owner(self) -> u8 {
        ((self.0 >> 6) & 0b111) as u8
    }

    /// Group triad (bits 3-5).
    pub fn group(self) -> u8 {
        ((self.0 >> 3) & 0b111) as u8
    }

    /// Other triad (bits 0-2).
    pub fn other(self) -> u8 {
        (self.0 & 0b111) as u8
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self(DEFAULT_FILE_PERMS)
    }
}

/// Fixed-size metadata record for a file, directory or symbolic link.
/// Indexed by inode id in the disk manager's inode table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inode {
    pub id: u32,
    pub file_type: FileType,
    /// Bytes for files/symlinks, entry count for directories.
    pub size: u64,
    pub owner_uid: u32,
    pub group_id: u32,
    pub permissions: Permission,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    /// Hard references from directory entries.
    pub link_count: u32,
    /// Total physical blocks reachable through direct/indirect maps.
    pub blocks_count: u32,
    pub direct_blocks: Vec<u32>,
    pub indirect_block: Option<u32>,
    pub double_indirect_block: Option<u32>,
    pub is_encrypted: bool,
    pub is_compressed: bool,
    pub compression_level: Option<u32>,
}

impl Inode {
    /// A freshly allocated, empty inode of the given type and owner.
    pub fn new(id: u32, file_type: FileType, owner_uid: u32, permissions: Permission, now: u64) -> Self {
        Self {
            id,
            file_type,
            size: 0,
            owner_uid,
            group_id: 0,
            permissions,
            atime: now,
            mtime: now,
            ctime: now,
            link_count: 1,
            blocks_count: 0,
            direct_blocks: Vec::new(),
            indirect_block: None,
            double_indirect_block: None,
            is_encrypted: false,
            is_compressed: false,
            compression_level: None,
        }
    }

    pub fn touch_atime(&mut self, now: u64) {
        self.atime = now;
    }

    pub fn touch_mtime(&mut self, now: u64) {
        self.mtime = now;
        self.ctime = now;
    }

    pub fn touch_ctime(&mut self, now: u64) {
        self.ctime = now;
    }
}

/// A single (name, inode_id, is_hardlink) record stored inside a directory's
/// data blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode_id: u32,
    pub is_hardlink: bool,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, inode_id: u32, is_hardlink: bool) -> Self {
        Self {
            name: name.into(),
            inode_id,
            is_hardlink,
        }
    }
}

/// The filesystem-wide header: sizes, free counts, root id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Superblock {
    pub magic: u64,
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub block_size: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub root_inode_id: Option<u32>,
}

/// Per-fd state binding an inode to a read/write cursor and mode. Holds no
/// owning reference to the inode — it is looked up through the disk
/// manager's table on every use, so it cannot outlive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileEntry {
    pub inode_id: u32,
    pub mode: OpenMode,
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_round_trips_through_rwx_string() {
        let p = Permission::from_octal(0o755).unwrap();
        assert_eq!(p.to_rwx_string(), "rwxr-xr-x");
        assert_eq!(Permission::from_rwx_str("rwxr-xr-x").unwrap(), p);
    }

    #[test]
    fn permission_rejects_out_of_range_octal() {
        assert!(Permission::from_octal(0o1000).is_none());
    }

    #[test]
    fn permission_triads() {
        let p = Permission::from_octal(0o640).unwrap();
        assert_eq!(p.owner(), 0b110);
        assert_eq!(p.group(), 0b100);
        assert_eq!(p.other(), 0b000);
    }

    #[test]
    fn open_mode_parses_classic_strings() {
        assert_eq!(OpenMode::parse("r"), Some(OpenMode::Read));
        assert_eq!(OpenMode::parse("w"), Some(OpenMode::Write));
        assert_eq!(OpenMode::parse("a"), Some(OpenMode::Append));
        assert_eq!(OpenMode::parse("r+"), Some(OpenMode::ReadWrite));
        assert_eq!(OpenMode::parse("x"), None);
    }
}
