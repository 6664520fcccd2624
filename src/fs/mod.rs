//! The filesystem dispatcher.
//!
//! [`StudIpFs`] ties the virtual path resolver, the content cache and the
//! file handle table together behind the [`Fs`] trait, which the fuser
//! adapter serves to the kernel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use scc::HashMap as ConcurrentHashMap;
use studip_api::{HttpClient, StudIpClient};
use tracing::{instrument, trace, warn};

use crate::cache::{CachedFile, ContentCache};
use crate::fs::r#trait::{
    CommonFileAttr, DirEntry, DirEntryType, FileAttr, FileHandle, FilesystemStats, Fs, Inode,
    OpenFlags, Permissions,
};
use crate::fs::tree::{Node, NodeKind, Resolver, ROOT_NODE};
use crate::status::ContentsStatus;

pub mod common;
pub mod crawler;
pub mod fuser;
pub mod template;
pub mod tokens;
pub mod r#trait;
pub mod tree;

pub use common::{
    GetAttrError, LookupError, OpenError, ReadDirError, ReadError, ReleaseError, XattrError,
};

/// Extended attribute names served on every node.
pub mod xattr_names {
    /// JSON object of all tokens and their rendered values.
    pub const KNOWN_TOKENS: &str = "studip-fuse.known-tokens";
    /// JSON snapshot of the bound remote entity.
    pub const JSON: &str = "studip-fuse.json";
    /// `pending|available|failed|unknown|unavailable`.
    pub const CONTENTS_STATUS: &str = "studip-fuse.contents-status";
    /// Text of the recorded failure, or empty.
    pub const CONTENTS_EXCEPTION: &str = "studip-fuse.contents-exception";
    /// Web interface URL of the bound entity.
    pub const URL: &str = "studip-fuse.url";

    /// All names, for `listxattr`.
    pub const ALL: &[&str] = &[KNOWN_TOKENS, JSON, CONTENTS_STATUS, CONTENTS_EXCEPTION, URL];
}

struct OpenFile {
    ino: Inode,
    contents: Arc<CachedFile>,
}

/// The mounted Stud.IP filesystem.
pub struct StudIpFs<C: HttpClient + 'static> {
    resolver: Resolver<C>,
    cache: ContentCache<StudIpClient<C>>,
    /// Source of file handle ids. Handles are never reused within a run, so
    /// a stale handle after `release` can only miss, never alias.
    next_fh: AtomicU64,
    open_files: ConcurrentHashMap<FileHandle, OpenFile>,
    fs_owner: (u32, u32),
    web_base: String,
}

impl<C: HttpClient + 'static> StudIpFs<C> {
    const BLOCK_SIZE: u32 = 4096;

    /// Assemble the filesystem.
    #[must_use]
    pub fn new(
        resolver: Resolver<C>,
        cache: ContentCache<StudIpClient<C>>,
        fs_owner: (u32, u32),
        web_base: String,
    ) -> Self {
        Self {
            resolver,
            cache,
            next_fh: AtomicU64::new(1),
            open_files: ConcurrentHashMap::new(),
            fs_owner,
            web_base,
        }
    }

    /// The resolver backing this filesystem.
    #[must_use]
    pub fn resolver(&self) -> &Resolver<C> {
        &self.resolver
    }

    fn node_attr(&self, ino: Inode, node: &Node) -> FileAttr {
        let mtime = mtime_of(node);
        let common = CommonFileAttr {
            ino,
            mtime,
            ctime: mtime,
            perm: match node.kind {
                NodeKind::Directory => Permissions::READ_ONLY_DIR,
                NodeKind::FileLeaf => Permissions::READ_ONLY_FILE,
            },
            uid: self.fs_owner.0,
            gid: self.fs_owner.1,
            blksize: Self::BLOCK_SIZE,
        };
        match (&node.kind, &node.bindings.file) {
            (NodeKind::FileLeaf, Some(binding)) => FileAttr::RegularFile {
                common,
                size: binding.file.size,
            },
            _ => FileAttr::Directory { common },
        }
    }

    /// Web interface URL of the node's most specific bound entity.
    fn entity_url(&self, node: &Node) -> String {
        let web = &self.web_base;
        let bindings = &node.bindings;
        if let Some(file) = &bindings.file {
            format!("{web}/dispatch.php/file/details/{}", file.file.id)
        } else if let Some(cursor) = &bindings.folder {
            let cid = bindings.course.as_ref().map(|c| c.id.as_str()).unwrap_or("");
            format!(
                "{web}/dispatch.php/course/files/index/{}?cid={cid}",
                cursor.node.folder.id
            )
        } else if let Some(course) = &bindings.course {
            format!("{web}/dispatch.php/course/overview?cid={}", course.id)
        } else if let Some(semester) = &bindings.semester {
            format!("{web}/dispatch.php/my_courses/set_semester?sem_select={}", semester.id)
        } else {
            web.clone()
        }
    }
}

#[async_trait::async_trait]
impl<C: HttpClient + 'static> Fs for StudIpFs<C> {
    type LookupError = LookupError;
    type GetAttrError = GetAttrError;
    type OpenError = OpenError;
    type ReadError = ReadError;
    type ReaddirError = ReadDirError;
    type ReleaseError = ReleaseError;
    type XattrError = XattrError;

    #[instrument(name = "StudIpFs::lookup", skip(self))]
    async fn lookup(&self, parent: Inode, name: &str) -> Result<FileAttr, LookupError> {
        let child = self
            .resolver
            .lookup_child(parent, name)
            .await?
            .ok_or(LookupError::NotFound)?;
        let node = self.resolver.node(child).ok_or(LookupError::NotFound)?;
        trace!(parent, name, child, "resolved path component");
        Ok(self.node_attr(child, &node))
    }

    #[instrument(name = "StudIpFs::getattr", skip(self))]
    async fn getattr(&self, ino: Inode) -> Result<FileAttr, GetAttrError> {
        let node = self.resolver.node(ino).ok_or_else(|| {
            warn!(ino, "getattr on unknown inode");
            GetAttrError::InodeNotFound
        })?;
        Ok(self.node_attr(ino, &node))
    }

    #[instrument(name = "StudIpFs::readdir", skip(self))]
    async fn readdir(&self, ino: Inode) -> Result<Vec<DirEntry>, ReadDirError> {
        let node = self.resolver.node(ino).ok_or(ReadDirError::InodeNotFound)?;
        let children = self.resolver.expand(ino).await?;

        let mut entries = Vec::with_capacity(children.by_name.len() + 2);
        entries.push(DirEntry {
            ino,
            name: ".".to_owned(),
            kind: DirEntryType::Directory,
        });
        entries.push(DirEntry {
            ino: node.parent.unwrap_or(ROOT_NODE),
            name: "..".to_owned(),
            kind: DirEntryType::Directory,
        });
        // BTreeMap iteration keeps the listing lexicographic and stable.
        for (name, &child_id) in &children.by_name {
            let kind = match self.resolver.node(child_id).map(|n| n.kind) {
                Some(NodeKind::FileLeaf) => DirEntryType::RegularFile,
                _ => DirEntryType::Directory,
            };
            entries.push(DirEntry {
                ino: child_id,
                name: name.clone(),
                kind,
            });
        }
        Ok(entries)
    }

    #[instrument(name = "StudIpFs::open", skip(self))]
    async fn open(&self, ino: Inode, flags: OpenFlags) -> Result<FileHandle, OpenError> {
        if flags.wants_write() {
            return Err(OpenError::ReadOnly);
        }
        let node = self.resolver.node(ino).ok_or(OpenError::InodeNotFound)?;
        let binding = match (&node.kind, &node.bindings.file) {
            (NodeKind::FileLeaf, Some(binding)) => Arc::clone(binding),
            _ => return Err(OpenError::IsADirectory),
        };

        let contents = self.cache.open_file(&binding.file).await?;
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        drop(
            self.open_files
                .insert(fh, OpenFile { ino, contents }),
        );
        trace!(ino, fh, "assigned file handle");
        Ok(fh)
    }

    #[instrument(name = "StudIpFs::read", skip(self))]
    async fn read(
        &self,
        ino: Inode,
        fh: FileHandle,
        offset: u64,
        size: u32,
    ) -> Result<bytes::Bytes, ReadError> {
        let contents = self
            .open_files
            .read(&fh, |_, open| {
                debug_assert!(
                    open.ino == ino,
                    "file handle {fh} maps to inode {}, caller passed {ino}",
                    open.ino
                );
                Arc::clone(&open.contents)
            })
            .ok_or_else(|| {
                warn!(fh, "read on unknown file handle");
                ReadError::FileNotOpen
            })?;
        Ok(contents.read(offset, size)?)
    }

    #[instrument(name = "StudIpFs::release", skip(self))]
    async fn release(&self, ino: Inode, fh: FileHandle) -> Result<(), ReleaseError> {
        let removed = self.open_files.remove(&fh);
        if removed.is_none() {
            warn!(fh, "release on unknown file handle");
            return Err(ReleaseError::FileNotOpen);
        }
        trace!(ino, fh, "closed file handle");
        Ok(())
    }

    #[instrument(name = "StudIpFs::getxattr", skip(self))]
    async fn getxattr(&self, ino: Inode, name: &str) -> Result<Vec<u8>, XattrError> {
        let node = self.resolver.node(ino).ok_or(XattrError::InodeNotFound)?;
        let value = match name {
            xattr_names::KNOWN_TOKENS => {
                let ctx = node.bindings.token_ctx();
                serde_json::to_vec(&tokens::known_tokens(&ctx))?
            }
            xattr_names::JSON => serde_json::to_vec(&node.bindings.entity_json())?,
            xattr_names::CONTENTS_STATUS => {
                ContentsStatus::from(self.resolver.status(ino)).to_string().into_bytes()
            }
            xattr_names::CONTENTS_EXCEPTION => {
                self.resolver.failure(ino).unwrap_or_default().into_bytes()
            }
            xattr_names::URL => self.entity_url(&node).into_bytes(),
            _ => return Err(XattrError::NoSuchAttribute),
        };
        Ok(value)
    }

    #[instrument(name = "StudIpFs::listxattr", skip(self))]
    async fn listxattr(&self, ino: Inode) -> Result<Vec<String>, XattrError> {
        if self.resolver.node(ino).is_none() {
            return Err(XattrError::InodeNotFound);
        }
        Ok(xattr_names::ALL.iter().map(|&n| n.to_owned()).collect())
    }

    async fn statfs(&self) -> Result<FilesystemStats, std::io::Error> {
        Ok(FilesystemStats {
            block_size: Self::BLOCK_SIZE,
            total_blocks: 0,
            free_blocks: 0,
            total_inodes: 0,
            max_filename_length: 255,
        })
    }
}

/// Modification time derived from the most specific bound entity, the way
/// the remote service reports it.
fn mtime_of(node: &Node) -> SystemTime {
    let epoch_secs = if let Some(file) = &node.bindings.file {
        file.file.chdate
    } else if let Some(semester) = &node.bindings.semester {
        semester.begin
    } else {
        0
    };
    if epoch_secs <= 0 {
        SystemTime::UNIX_EPOCH
    } else {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(epoch_secs.unsigned_abs())
    }
}
