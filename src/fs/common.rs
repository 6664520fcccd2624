//! Shared error types of the filesystem dispatcher, with errno mappings.
//!
//! The mapping at the FUSE boundary is fixed: write attempts are `EROFS`
//! (handled in the adapter), unknown paths are `ENOENT`, auth-related
//! failures are `EACCES`, and everything else is `EIO`. The original failure
//! reason stays retrievable through `studip-fuse.contents-exception`.

use studip_api::ApiError;
use thiserror::Error;

use crate::cache::CacheError;
use crate::fs::tree::ExpansionError;

/// Whether an expansion failure is auth-flavoured (`EACCES`) or generic
/// (`EIO`).
fn expansion_errno(e: &ExpansionError) -> i32 {
    match e {
        ExpansionError::Crawl(ApiError::Auth) => libc::EACCES,
        ExpansionError::NotADirectory => libc::ENOTDIR,
        ExpansionError::UnknownNode => libc::ENOENT,
        ExpansionError::Crawl(_) => libc::EIO,
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no such entry")]
    NotFound,

    #[error(transparent)]
    Expansion(#[from] ExpansionError),
}

impl From<LookupError> for i32 {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::NotFound => libc::ENOENT,
            LookupError::Expansion(e) => expansion_errno(&e),
        }
    }
}

#[derive(Debug, Error)]
pub enum GetAttrError {
    #[error("inode not found")]
    InodeNotFound,
}

impl From<GetAttrError> for i32 {
    fn from(e: GetAttrError) -> Self {
        match e {
            GetAttrError::InodeNotFound => libc::ENOENT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadDirError {
    #[error("inode not found")]
    InodeNotFound,

    #[error(transparent)]
    Expansion(#[from] ExpansionError),
}

impl From<ReadDirError> for i32 {
    fn from(e: ReadDirError) -> Self {
        match e {
            ReadDirError::InodeNotFound => libc::ENOENT,
            ReadDirError::Expansion(e) => expansion_errno(&e),
        }
    }
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("inode not found")]
    InodeNotFound,

    #[error("write access requested on a read-only filesystem")]
    ReadOnly,

    #[error("inode is a directory")]
    IsADirectory,

    #[error("could not materialize contents: {0}")]
    Cache(#[from] CacheError),
}

impl From<OpenError> for i32 {
    fn from(e: OpenError) -> Self {
        match e {
            OpenError::InodeNotFound => libc::ENOENT,
            OpenError::ReadOnly => libc::EROFS,
            OpenError::IsADirectory => libc::EISDIR,
            OpenError::Cache(CacheError::Download(ApiError::Auth)) => libc::EACCES,
            OpenError::Cache(_) => libc::EIO,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("file not open")]
    FileNotOpen,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ReadError> for i32 {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::FileNotOpen => libc::EBADF,
            ReadError::Io(_) => libc::EIO,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("file not open")]
    FileNotOpen,
}

impl From<ReleaseError> for i32 {
    fn from(e: ReleaseError) -> Self {
        match e {
            ReleaseError::FileNotOpen => libc::EBADF,
        }
    }
}

#[derive(Debug, Error)]
pub enum XattrError {
    #[error("inode not found")]
    InodeNotFound,

    #[error("no such attribute")]
    NoSuchAttribute,

    #[error("could not serialize attribute: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<XattrError> for i32 {
    fn from(e: XattrError) -> Self {
        match e {
            XattrError::InodeNotFound => libc::ENOENT,
            XattrError::NoSuchAttribute => libc::ENODATA,
            XattrError::Serialize(_) => libc::EIO,
        }
    }
}
