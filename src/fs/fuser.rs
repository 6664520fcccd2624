//! Adapter between the async [`Fs`] trait and the fuser callback API.
//!
//! Each kernel callback becomes one task on the runtime handle; the fuser
//! thread never blocks on remote I/O. Every mutating callback is answered
//! with `EROFS` right here, before it can reach the filesystem.

use std::ffi::OsStr;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use fuser::TimeOrNow;
use tracing::Instrument as _;
use tracing::debug;

use crate::fs::r#trait::{CommonFileAttr, DirEntryType, FileAttr, Fs, OpenFlags};

impl From<FileAttr> for fuser::FileAttr {
    fn from(val: FileAttr) -> Self {
        fn common_to_fuser(common: CommonFileAttr) -> fuser::FileAttr {
            fuser::FileAttr {
                ino: common.ino,
                size: 0,
                blocks: 0,
                atime: common.mtime,
                mtime: common.mtime,
                ctime: common.ctime,
                crtime: common.ctime,
                kind: fuser::FileType::RegularFile,
                perm: common.perm.bits(),
                nlink: 1,
                uid: common.uid,
                gid: common.gid,
                rdev: 0,
                blksize: common.blksize,
                flags: 0,
            }
        }

        match val {
            FileAttr::RegularFile { common, size } => {
                let mut attr = common_to_fuser(common);
                attr.size = size;
                attr.blocks = size.div_ceil(u64::from(common.blksize));
                attr.kind = fuser::FileType::RegularFile;
                attr
            }
            FileAttr::Directory { common } => {
                let mut attr = common_to_fuser(common);
                attr.kind = fuser::FileType::Directory;
                attr
            }
        }
    }
}

impl From<DirEntryType> for fuser::FileType {
    fn from(val: DirEntryType) -> Self {
        match val {
            DirEntryType::RegularFile => Self::RegularFile,
            DirEntryType::Directory => Self::Directory,
        }
    }
}

impl From<i32> for OpenFlags {
    fn from(val: i32) -> Self {
        Self::from_bits_truncate(val)
    }
}

const ATTR_TTL: std::time::Duration = std::time::Duration::from_secs(1);

/// Serve an [`Fs`] implementation through fuser.
pub struct FuserAdapter<F: Fs + 'static>
where
    F::LookupError: Into<i32> + Send,
    F::GetAttrError: Into<i32> + Send,
    F::OpenError: Into<i32> + Send,
    F::ReadError: Into<i32> + Send,
    F::ReaddirError: Into<i32> + Send,
    F::ReleaseError: Into<i32> + Send,
    F::XattrError: Into<i32> + Send,
{
    fs: Arc<F>,
    runtime: tokio::runtime::Handle,
}

impl<F: Fs + 'static> FuserAdapter<F>
where
    F::LookupError: Into<i32> + Send,
    F::GetAttrError: Into<i32> + Send,
    F::OpenError: Into<i32> + Send,
    F::ReadError: Into<i32> + Send,
    F::ReaddirError: Into<i32> + Send,
    F::ReleaseError: Into<i32> + Send,
    F::XattrError: Into<i32> + Send,
{
    pub fn new(fs: Arc<F>, runtime: tokio::runtime::Handle) -> Self {
        Self { fs, runtime }
    }

    fn spawn<Fut>(&self, span: tracing::Span, f: impl FnOnce(Arc<F>) -> Fut + Send + 'static)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fs = Arc::clone(&self.fs);
        self.runtime.spawn(f(fs).instrument(span));
    }
}

/// Reply to a `getxattr`/`listxattr` with the standard size dance: a zero
/// `size` asks for the value's length, a too-small one gets `ERANGE`.
fn reply_xattr(reply: fuser::ReplyXattr, value: &[u8], size: u32) {
    if size == 0 {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "xattr values are tiny JSON documents"
        )]
        reply.size(value.len() as u32);
    } else if value.len() <= size as usize {
        reply.data(value);
    } else {
        reply.error(libc::ERANGE);
    }
}

impl<F: Fs + 'static> fuser::Filesystem for FuserAdapter<F>
where
    F::LookupError: Into<i32> + Send,
    F::GetAttrError: Into<i32> + Send,
    F::OpenError: Into<i32> + Send,
    F::ReadError: Into<i32> + Send,
    F::ReaddirError: Into<i32> + Send,
    F::ReleaseError: Into<i32> + Send,
    F::XattrError: Into<i32> + Send,
{
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let Some(name) = name.to_str().map(ToOwned::to_owned) else {
            reply.error(libc::ENOENT);
            return;
        };
        let span = tracing::debug_span!("FuserAdapter::lookup", parent, %name);
        self.spawn(span, move |fs| async move {
            match fs.lookup(parent, &name).await {
                Ok(attr) => reply.entry(&ATTR_TTL, &attr.into(), 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let span = tracing::debug_span!("FuserAdapter::getattr", ino);
        self.spawn(span, move |fs| async move {
            match fs.getattr(ino).await {
                Ok(attr) => reply.attr(&ATTR_TTL, &attr.into()),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let span = tracing::debug_span!("FuserAdapter::readdir", ino, offset);
        self.spawn(span, move |fs| async move {
            let entries = match fs.readdir(ino).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                    return;
                }
            };

            let offset = usize::try_from(offset).unwrap_or(0);
            for (i, entry) in entries.iter().enumerate().skip(offset) {
                let Ok(next_offset) = i64::try_from(i + 1) else {
                    reply.error(libc::EIO);
                    return;
                };
                if reply.add(entry.ino, next_offset, entry.kind.into(), &entry.name) {
                    break; // reply buffer full, kernel will call again
                }
            }
            reply.ok();
        });
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let flags: OpenFlags = flags.into();
        let span = tracing::debug_span!("FuserAdapter::open", ino, ?flags);
        self.spawn(span, move |fs| async move {
            match fs.open(ino, flags).await {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let span = tracing::debug_span!("FuserAdapter::read", ino, fh, offset, size);
        self.spawn(span, move |fs| async move {
            match fs.read(ino, fh, u64::try_from(offset).unwrap_or(0), size).await {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let span = tracing::debug_span!("FuserAdapter::release", ino, fh);
        self.spawn(span, move |fs| async move {
            match fs.release(ino, fh).await {
                Ok(()) => reply.ok(),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let span = tracing::debug_span!("FuserAdapter::statfs");
        self.spawn(span, move |fs| async move {
            match fs.statfs().await {
                Ok(stats) => reply.statfs(
                    stats.total_blocks,
                    stats.free_blocks,
                    stats.free_blocks,
                    stats.total_inodes,
                    0,
                    stats.block_size,
                    stats.max_filename_length,
                    stats.block_size,
                ),
                Err(e) => reply.error(e.raw_os_error().unwrap_or(libc::EIO)),
            }
        });
    }

    fn getxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        let Some(name) = name.to_str().map(ToOwned::to_owned) else {
            reply.error(libc::ENODATA);
            return;
        };
        let span = tracing::debug_span!("FuserAdapter::getxattr", ino, %name);
        self.spawn(span, move |fs| async move {
            match fs.getxattr(ino, &name).await {
                Ok(value) => reply_xattr(reply, &value, size),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    fn listxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        size: u32,
        reply: fuser::ReplyXattr,
    ) {
        let span = tracing::debug_span!("FuserAdapter::listxattr", ino);
        self.spawn(span, move |fs| async move {
            match fs.listxattr(ino).await {
                Ok(names) => {
                    let mut packed = Vec::new();
                    for name in names {
                        packed.extend_from_slice(name.as_bytes());
                        packed.push(0);
                    }
                    reply_xattr(reply, &packed, size);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                }
            }
        });
    }

    // ---------------------------------------------------------------------
    // Write-flavoured operations: all EROFS, unconditionally.
    // ---------------------------------------------------------------------

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn symlink(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &std::path::Path,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors fuser setattr API")]
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        reply.error(libc::EROFS);
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        reply.error(libc::EROFS);
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors fuser write API")]
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(libc::EROFS);
    }

    fn setxattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn removexattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn fallocate(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _length: i64,
        _mode: i32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors fuser copy_file_range API")]
    fn copy_file_range(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino_in: u64,
        _fh_in: u64,
        _offset_in: i64,
        _ino_out: u64,
        _fh_out: u64,
        _offset_out: i64,
        _len: u64,
        _flags: u32,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(libc::EROFS);
    }
}
