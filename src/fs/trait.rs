//! Generic trait for implementing the read-only filesystem.
//!
//! Note that this is a slightly cleaner interface than directly using fuser.
//! The whole point of this is to abstract away fuser-specific details.

use std::time::SystemTime;

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;

/// Type representing an inode.
pub type Inode = u64;

/// Type representing an open file handle.
pub type FileHandle = u64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u16 {
        // Other
        const OTHER_EXECUTE = 1 << 0;
        const OTHER_WRITE   = 1 << 1;
        const OTHER_READ    = 1 << 2;

        // Group
        const GROUP_EXECUTE = 1 << 3;
        const GROUP_WRITE   = 1 << 4;
        const GROUP_READ    = 1 << 5;

        // Owner
        const OWNER_EXECUTE = 1 << 6;
        const OWNER_WRITE   = 1 << 7;
        const OWNER_READ    = 1 << 8;

        const READ_ONLY_FILE = Self::OWNER_READ.bits()
            | Self::GROUP_READ.bits()
            | Self::OTHER_READ.bits();
        const READ_ONLY_DIR = Self::READ_ONLY_FILE.bits()
            | Self::OWNER_EXECUTE.bits()
            | Self::GROUP_EXECUTE.bits()
            | Self::OTHER_EXECUTE.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        // Access modes (mutually exclusive)
        const RDONLY = libc::O_RDONLY;
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;

        // Creation/status flags
        const APPEND = libc::O_APPEND;
        const TRUNC = libc::O_TRUNC;
        const CREAT = libc::O_CREAT;
        const EXCL = libc::O_EXCL;

        // Behavior flags
        const NONBLOCK = libc::O_NONBLOCK;
        const NOFOLLOW = libc::O_NOFOLLOW;
        const CLOEXEC = libc::O_CLOEXEC;
        const DIRECTORY = libc::O_DIRECTORY;
    }
}

impl OpenFlags {
    /// Whether the flags request any kind of write access.
    #[must_use]
    pub fn wants_write(self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR | Self::APPEND | Self::TRUNC | Self::CREAT)
    }
}

/// Attributes common to files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommonFileAttr {
    pub ino: Inode,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub perm: Permissions,
    pub uid: u32,
    pub gid: u32,
    pub blksize: u32,
}

/// Stat data of a virtual node. The mounted tree only ever contains regular
/// files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAttr {
    RegularFile {
        common: CommonFileAttr,
        size: u64,
    },
    Directory {
        common: CommonFileAttr,
    },
}

impl FileAttr {
    pub fn common(&self) -> &CommonFileAttr {
        match self {
            Self::RegularFile { common, .. } | Self::Directory { common } => common,
        }
    }
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirEntryType {
    RegularFile,
    Directory,
}

/// One `readdir` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    pub ino: Inode,
    pub name: String,
    pub kind: DirEntryType,
}

/// Synthetic `statfs` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilesystemStats {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub max_filename_length: u32,
}

/// The read-only filesystem surface served through FUSE.
///
/// All methods take `&self`; implementations synchronize internally. Write
/// operations have no place here — the adapter answers them with `EROFS`
/// before they reach an implementation.
#[async_trait]
pub trait Fs: Send + Sync {
    type LookupError: std::error::Error;
    type GetAttrError: std::error::Error;
    type OpenError: std::error::Error;
    type ReadError: std::error::Error;
    type ReaddirError: std::error::Error;
    type ReleaseError: std::error::Error;
    type XattrError: std::error::Error;

    /// Resolve one path component below `parent`.
    async fn lookup(&self, parent: Inode, name: &str) -> Result<FileAttr, Self::LookupError>;

    /// Stat a node.
    async fn getattr(&self, ino: Inode) -> Result<FileAttr, Self::GetAttrError>;

    /// List a directory. Entries for `.` and `..` come first; the rest is
    /// sorted by name and stable within a run.
    async fn readdir(&self, ino: Inode) -> Result<Vec<DirEntry>, Self::ReaddirError>;

    /// Open a file for reading and hand out a fresh file handle.
    async fn open(&self, ino: Inode, flags: OpenFlags) -> Result<FileHandle, Self::OpenError>;

    /// Positional read from an open handle. POSIX EOF semantics.
    async fn read(
        &self,
        ino: Inode,
        fh: FileHandle,
        offset: u64,
        size: u32,
    ) -> Result<Bytes, Self::ReadError>;

    /// Drop a file handle.
    async fn release(&self, ino: Inode, fh: FileHandle) -> Result<(), Self::ReleaseError>;

    /// Read one extended attribute.
    async fn getxattr(&self, ino: Inode, name: &str) -> Result<Vec<u8>, Self::XattrError>;

    /// List extended attribute names.
    async fn listxattr(&self, ino: Inode) -> Result<Vec<String>, Self::XattrError>;

    /// Get filesystem statistics.
    async fn statfs(&self) -> Result<FilesystemStats, std::io::Error>;
}
