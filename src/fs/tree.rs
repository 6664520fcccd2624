//! The lazy virtual node tree.
//!
//! Every node represents one directory or file of the mounted view. A node
//! carries the template position it sits at, the remote entities fixed by its
//! ancestors, and — for directories — a materialization state. Children are
//! computed on first demand by enumerating remote entities at the grouping
//! level of the next template segment, rendering that segment per entity, and
//! splitting name collisions deterministically.
//!
//! Nodes are created once and live for the whole process; the arena index is
//! therefore a stable inode number.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use scc::HashMap as ConcurrentHashMap;
use studip_api::models::{Course, FileRef, Semester};
use studip_api::{ApiError, HttpClient};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{instrument, trace, warn};

use crate::fs::crawler::{Crawler, FolderNode};
use crate::fs::template::PathTemplate;
use crate::fs::tokens::{self, EntityLevel, Token, TokenContext};

/// Stable identifier of a virtual node; doubles as the FUSE inode.
pub type NodeId = u64;

/// The root node's id (and inode).
pub const ROOT_NODE: NodeId = 1;

/// Why a node could not be expanded. Terminal for the node: recorded once,
/// replayed to every current and future consumer.
#[derive(Debug, Clone, Error)]
pub enum ExpansionError {
    /// A remote request failed.
    #[error("crawl failed: {0}")]
    Crawl(#[from] ApiError),

    /// The node is a file, not a directory.
    #[error("not a directory")]
    NotADirectory,

    /// The node id is not in the arena.
    #[error("unknown node")]
    UnknownNode,
}

/// Whether a node is a directory or a file leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An inner directory.
    Directory,
    /// A file at full template depth.
    FileLeaf,
}

/// A file entity together with the folder path it was found under.
#[derive(Debug, Clone)]
pub struct FileBinding {
    /// The file.
    pub file: Arc<FileRef>,
    /// Escaped folder components from the top folder, inclusive.
    pub path: Vec<String>,
    /// Same, with a leading generic-root component stripped.
    pub short_path: Vec<String>,
}

/// A position inside a course's folder subtree, reached while a folder-path
/// segment is being consumed one component at a time.
#[derive(Debug, Clone)]
pub struct FolderCursor {
    /// The subtree rooted here.
    pub node: Arc<FolderNode>,
    /// Escaped folder components from the top folder, inclusive.
    pub path: Vec<String>,
    /// Same, with a leading generic-root component stripped.
    pub short_path: Vec<String>,
}

/// The entities fixed along the path from the root to a node. Bindings only
/// grow while descending.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    /// Bound semester.
    pub semester: Option<Arc<Semester>>,
    /// Bound course.
    pub course: Option<Arc<Course>>,
    /// Folder cursor, while a folder segment is in progress.
    pub folder: Option<Arc<FolderCursor>>,
    /// Bound file.
    pub file: Option<Arc<FileBinding>>,
}

impl Bindings {
    /// Token rendering view of these bindings.
    #[must_use]
    pub fn token_ctx(&self) -> TokenContext<'_> {
        let (path, short_path) = if let Some(file) = &self.file {
            (Some(file.path.as_slice()), Some(file.short_path.as_slice()))
        } else if let Some(cursor) = &self.folder {
            (Some(cursor.path.as_slice()), Some(cursor.short_path.as_slice()))
        } else {
            (None, None)
        };
        TokenContext {
            semester: self.semester.as_deref(),
            course: self.course.as_deref(),
            path,
            short_path,
            file: self.file.as_ref().map(|f| &*f.file),
        }
    }

    /// JSON snapshot of the most specific bound entity, for the
    /// `studip-fuse.json` attribute.
    #[must_use]
    pub fn entity_json(&self) -> serde_json::Value {
        if let Some(file) = &self.file {
            serde_json::to_value(&*file.file).unwrap_or_default()
        } else if let Some(cursor) = &self.folder {
            serde_json::to_value(&*cursor.node.folder).unwrap_or_default()
        } else if let Some(course) = &self.course {
            serde_json::to_value(&**course).unwrap_or_default()
        } else if let Some(semester) = &self.semester {
            serde_json::to_value(&**semester).unwrap_or_default()
        } else {
            serde_json::Value::Object(serde_json::Map::new())
        }
    }

    /// Id of the most specific bound entity, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        if let Some(file) = &self.file {
            Some(&file.file.id)
        } else if let Some(cursor) = &self.folder {
            Some(&cursor.node.folder.id)
        } else if let Some(course) = &self.course {
            Some(&course.id)
        } else {
            self.semester.as_ref().map(|s| s.id.as_str())
        }
    }
}

/// One virtual node. Immutable after creation.
#[derive(Debug)]
pub struct Node {
    /// Parent node, `None` for the root.
    pub parent: Option<NodeId>,
    /// Display name, unique among siblings.
    pub name: String,
    /// Index of the next template segment to consume below this node.
    pub seg_idx: usize,
    /// Entities fixed by this node and its ancestors.
    pub bindings: Bindings,
    /// Directory or file leaf.
    pub kind: NodeKind,
}

/// Children of an expanded directory. `BTreeMap` keeps `readdir` order
/// stable and lexicographic.
#[derive(Debug, Default)]
pub struct ChildSet {
    /// Child display name to node id.
    pub by_name: BTreeMap<String, NodeId>,
}

/// Materialization state of a directory node. Absence from the state table
/// means unexpanded.
enum DirState {
    /// Expansion in flight; waiters clone the receiver and await a change.
    Expanding(watch::Receiver<()>),
    /// Complete and fixed for the process lifetime.
    Expanded(Arc<ChildSet>),
    /// Terminal failure; no automatic retry.
    Failed(ExpansionError),
}

/// Observable materialization state, for the status xattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not yet expanded, or expansion in flight.
    Pending,
    /// Expanded, or a file leaf with metadata at hand.
    Available,
    /// Expansion failed.
    Failed,
    /// The node is not known to the resolver.
    Unknown,
}

struct ResolverInner<C: HttpClient + 'static> {
    crawler: Crawler<C>,
    template: PathTemplate,
    generic_roots: Vec<String>,
    nodes: ConcurrentHashMap<NodeId, Arc<Node>>,
    dir_states: ConcurrentHashMap<NodeId, DirState>,
    next_id: AtomicU64,
}

/// The virtual path resolver: owns the node arena and drives expansion.
///
/// Cheap to clone; all clones share the arena.
pub struct Resolver<C: HttpClient + 'static> {
    inner: Arc<ResolverInner<C>>,
}

impl<C: HttpClient + 'static> Clone for Resolver<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A child candidate before collision handling.
struct ChildSpec {
    name: String,
    entity_id: String,
    node: Node,
}

impl<C: HttpClient + 'static> Resolver<C> {
    /// Create a resolver with an empty root at [`ROOT_NODE`].
    #[must_use]
    pub fn new(crawler: Crawler<C>, template: PathTemplate, generic_roots: Vec<String>) -> Self {
        let nodes = ConcurrentHashMap::new();
        drop(nodes.insert(
            ROOT_NODE,
            Arc::new(Node {
                parent: None,
                name: String::new(),
                seg_idx: 0,
                bindings: Bindings::default(),
                kind: NodeKind::Directory,
            }),
        ));
        Self {
            inner: Arc::new(ResolverInner {
                crawler,
                template,
                generic_roots,
                nodes,
                dir_states: ConcurrentHashMap::new(),
                next_id: AtomicU64::new(ROOT_NODE + 1),
            }),
        }
    }

    /// The compiled template this resolver serves.
    #[must_use]
    pub fn template(&self) -> &PathTemplate {
        &self.inner.template
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.inner.nodes.read(&id, |_, n| Arc::clone(n))
    }

    /// Observable materialization state of a node.
    #[must_use]
    pub fn status(&self, id: NodeId) -> NodeStatus {
        let Some(node) = self.node(id) else {
            return NodeStatus::Unknown;
        };
        if node.kind == NodeKind::FileLeaf {
            return NodeStatus::Available;
        }
        self.inner
            .dir_states
            .read(&id, |_, s| match s {
                DirState::Expanding(_) => NodeStatus::Pending,
                DirState::Expanded(_) => NodeStatus::Available,
                DirState::Failed(_) => NodeStatus::Failed,
            })
            .unwrap_or(NodeStatus::Pending)
    }

    /// Text form of the recorded expansion failure, if any.
    #[must_use]
    pub fn failure(&self, id: NodeId) -> Option<String> {
        self.inner
            .dir_states
            .read(&id, |_, s| match s {
                DirState::Failed(e) => Some(e.to_string()),
                DirState::Expanding(_) | DirState::Expanded(_) => None,
            })
            .flatten()
    }

    /// Expand a directory node, returning its (complete, fixed) child set.
    ///
    /// At most one expansion runs per node; concurrent callers coalesce onto
    /// the in-flight one. The expansion itself runs as a detached task, so a
    /// cancelled caller never aborts it for the other waiters. Success and
    /// failure are both terminal.
    #[instrument(skip(self))]
    pub async fn expand(&self, id: NodeId) -> Result<Arc<ChildSet>, ExpansionError> {
        use scc::hash_map::Entry;

        let node = self.node(id).ok_or(ExpansionError::UnknownNode)?;
        if node.kind != NodeKind::Directory {
            return Err(ExpansionError::NotADirectory);
        }

        loop {
            match self.inner.dir_states.entry_async(id).await {
                Entry::Occupied(occ) => match occ.get() {
                    DirState::Expanded(children) => return Ok(Arc::clone(children)),
                    DirState::Failed(e) => return Err(e.clone()),
                    DirState::Expanding(rx) => {
                        let mut rx = rx.clone();
                        drop(occ); // release shard lock before awaiting
                        let _ = rx.changed().await;
                    }
                },
                Entry::Vacant(vac) => {
                    let (tx, rx) = watch::channel(());
                    drop(vac.insert_entry(DirState::Expanding(rx)));

                    let resolver = self.clone();
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        let state = match resolver.compute_children(&node).await {
                            Ok(specs) => {
                                let children = resolver.adopt(id, specs);
                                trace!(id, count = children.by_name.len(), "node expanded");
                                DirState::Expanded(Arc::new(children))
                            }
                            Err(e) => {
                                warn!(id, error = %e, "node expansion failed");
                                DirState::Failed(e)
                            }
                        };
                        resolver.inner.dir_states.upsert_async(id, state).await;
                        drop(tx);
                    });
                }
            }
        }
    }

    /// Expand `parent` and look up a child by display name.
    pub async fn lookup_child(
        &self,
        parent: NodeId,
        name: &str,
    ) -> Result<Option<NodeId>, ExpansionError> {
        let children = self.expand(parent).await?;
        Ok(children.by_name.get(name).copied())
    }

    /// Resolve an absolute path, expanding along the way. `Ok(None)` means a
    /// component does not exist; a failed ancestor yields its recorded error.
    pub async fn resolve_path(&self, path: &str) -> Result<Option<NodeId>, ExpansionError> {
        let mut current = ROOT_NODE;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match self.lookup_child(current, component).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Allocate arena slots for freshly computed children.
    fn adopt(&self, parent: NodeId, specs: Vec<ChildSpec>) -> ChildSet {
        let mut by_name = BTreeMap::new();
        for spec in disambiguate(specs) {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let node = Arc::new(Node {
                parent: Some(parent),
                name: spec.name.clone(),
                ..spec.node
            });
            drop(self.inner.nodes.insert(id, node));
            by_name.insert(spec.name, id);
        }
        ChildSet { by_name }
    }

    /// Compute the child candidates of a directory node.
    async fn compute_children(&self, node: &Node) -> Result<Vec<ChildSpec>, ExpansionError> {
        if let Some(cursor) = &node.bindings.folder {
            return Ok(self.folder_children(node, cursor));
        }

        let segment = self
            .inner
            .template
            .segment(node.seg_idx)
            .ok_or(ExpansionError::NotADirectory)?;

        match segment.level() {
            None => {
                // Constant directory: one child, nothing new bound.
                let name = segment.render(&node.bindings.token_ctx());
                Ok(vec![ChildSpec {
                    name,
                    entity_id: node.bindings.entity_id().unwrap_or("").to_owned(),
                    node: Node {
                        parent: None,
                        name: String::new(),
                        seg_idx: node.seg_idx + 1,
                        bindings: node.bindings.clone(),
                        kind: NodeKind::Directory,
                    },
                }])
            }
            Some(EntityLevel::Semester) => self.semester_children(node).await,
            Some(EntityLevel::Course) => self.course_children(node).await,
            Some(EntityLevel::Folder) => self.folder_segment_children(node, segment.folder_token())
                .await,
            Some(EntityLevel::File) => self.file_children(node).await,
        }
    }

    async fn semester_children(&self, node: &Node) -> Result<Vec<ChildSpec>, ExpansionError> {
        let segment = &self.inner.template.segments()[node.seg_idx];
        let candidates = match &node.bindings.semester {
            Some(bound) => vec![Arc::clone(bound)],
            None => self.inner.crawler.list_semesters().await?,
        };

        Ok(candidates
            .into_iter()
            .map(|semester| {
                let bindings = Bindings {
                    semester: Some(Arc::clone(&semester)),
                    ..node.bindings.clone()
                };
                ChildSpec {
                    name: segment.render(&bindings.token_ctx()),
                    entity_id: semester.id.clone(),
                    node: Node {
                        parent: None,
                        name: String::new(),
                        seg_idx: node.seg_idx + 1,
                        bindings,
                        kind: NodeKind::Directory,
                    },
                }
            })
            .collect())
    }

    async fn course_children(&self, node: &Node) -> Result<Vec<ChildSpec>, ExpansionError> {
        let segment = &self.inner.template.segments()[node.seg_idx];
        let scope = self.courses_in_scope(&node.bindings).await?;

        Ok(scope
            .into_iter()
            .map(|(course, semester)| {
                let bindings = Bindings {
                    semester,
                    course: Some(Arc::clone(&course)),
                    ..node.bindings.clone()
                };
                ChildSpec {
                    name: segment.render(&bindings.token_ctx()),
                    entity_id: course.id.clone(),
                    node: Node {
                        parent: None,
                        name: String::new(),
                        seg_idx: node.seg_idx + 1,
                        bindings,
                        kind: NodeKind::Directory,
                    },
                }
            })
            .collect())
    }

    /// First level of a folder segment: one subtree root per course in scope.
    /// A generic-named top folder is transparent for `{short-path}` — its
    /// children surface directly at this level.
    async fn folder_segment_children(
        &self,
        node: &Node,
        folder_token: Option<Token>,
    ) -> Result<Vec<ChildSpec>, ExpansionError> {
        let mut specs = Vec::new();
        for (course, semester) in self.courses_in_scope(&node.bindings).await? {
            let top = self.inner.crawler.list_folder_tree(&course).await?;
            let bindings = Bindings {
                semester,
                course: Some(Arc::clone(&course)),
                ..node.bindings.clone()
            };

            let top_name = tokens::escape_file_name(&top.folder.name);
            let stripped = folder_token == Some(Token::ShortPath)
                && self.inner.generic_roots.iter().any(|g| *g == top.folder.name);

            if stripped {
                let base = FolderCursor {
                    node: Arc::clone(&top),
                    path: vec![top_name],
                    short_path: Vec::new(),
                };
                self.cursor_children(node.seg_idx, &bindings, &base, &mut specs);
            } else {
                let cursor = FolderCursor {
                    node: Arc::clone(&top),
                    path: vec![top_name.clone()],
                    short_path: vec![top_name.clone()],
                };
                specs.push(ChildSpec {
                    name: top_name,
                    entity_id: top.folder.id.clone(),
                    node: Node {
                        parent: None,
                        name: String::new(),
                        seg_idx: node.seg_idx,
                        bindings: Bindings {
                            folder: Some(Arc::new(cursor)),
                            ..bindings
                        },
                        kind: NodeKind::Directory,
                    },
                });
            }
        }
        Ok(specs)
    }

    /// Children of a node sitting inside a folder segment: subfolders stay on
    /// the same segment with an advanced cursor; files directly here complete
    /// the folder segment and are named by the following segment.
    fn folder_children(&self, node: &Node, cursor: &FolderCursor) -> Vec<ChildSpec> {
        let mut specs = Vec::new();
        self.cursor_children(node.seg_idx, &node.bindings, cursor, &mut specs);
        specs
    }

    fn cursor_children(
        &self,
        seg_idx: usize,
        bindings: &Bindings,
        cursor: &FolderCursor,
        specs: &mut Vec<ChildSpec>,
    ) {
        for sub in &cursor.node.subfolders {
            let component = tokens::escape_file_name(&sub.folder.name);
            let mut path = cursor.path.clone();
            path.push(component.clone());
            let mut short_path = cursor.short_path.clone();
            short_path.push(component.clone());
            specs.push(ChildSpec {
                name: component,
                entity_id: sub.folder.id.clone(),
                node: Node {
                    parent: None,
                    name: String::new(),
                    seg_idx,
                    bindings: Bindings {
                        folder: Some(Arc::new(FolderCursor {
                            node: Arc::clone(sub),
                            path,
                            short_path,
                        })),
                        ..bindings.clone()
                    },
                    kind: NodeKind::Directory,
                },
            });
        }

        let name_segment_idx = seg_idx + 1;
        for file in &cursor.node.files {
            let binding = FileBinding {
                file: Arc::clone(file),
                path: cursor.path.clone(),
                short_path: cursor.short_path.clone(),
            };
            let child_bindings = Bindings {
                folder: None,
                file: Some(Arc::new(binding)),
                ..bindings.clone()
            };
            let name = self.inner.template.segments()[name_segment_idx]
                .render(&child_bindings.token_ctx());
            specs.push(ChildSpec {
                name,
                entity_id: file.id.clone(),
                node: Node {
                    parent: None,
                    name: String::new(),
                    seg_idx: name_segment_idx + 1,
                    bindings: child_bindings,
                    kind: if name_segment_idx + 1 == self.inner.template.len() {
                        NodeKind::FileLeaf
                    } else {
                        NodeKind::Directory
                    },
                },
            });
        }
    }

    /// A file-level segment with no folder segment before it: every file in
    /// scope is a candidate, carrying the folder path it was found under.
    async fn file_children(&self, node: &Node) -> Result<Vec<ChildSpec>, ExpansionError> {
        let segment = &self.inner.template.segments()[node.seg_idx];
        let leaf = node.seg_idx + 1 == self.inner.template.len();

        if let Some(bound) = &node.bindings.file {
            // File already fixed by an earlier segment; one child renders the
            // remaining metadata segment.
            let bindings = node.bindings.clone();
            let name = segment.render(&bindings.token_ctx());
            return Ok(vec![ChildSpec {
                name,
                entity_id: bound.file.id.clone(),
                node: Node {
                    parent: None,
                    name: String::new(),
                    seg_idx: node.seg_idx + 1,
                    bindings,
                    kind: if leaf { NodeKind::FileLeaf } else { NodeKind::Directory },
                },
            }]);
        }

        let mut specs = Vec::new();
        for (course, semester) in self.courses_in_scope(&node.bindings).await? {
            let top = self.inner.crawler.list_folder_tree(&course).await?;
            let course_bindings = Bindings {
                semester,
                course: Some(Arc::clone(&course)),
                ..node.bindings.clone()
            };

            let mut files = Vec::new();
            let top_path = vec![tokens::escape_file_name(&top.folder.name)];
            collect_files(&top, &top_path, &mut files);
            let strip = self.inner.generic_roots.iter().any(|g| *g == top.folder.name);

            for (file, path) in files {
                let short_path = if strip { path[1..].to_vec() } else { path.clone() };
                let bindings = Bindings {
                    file: Some(Arc::new(FileBinding {
                        file: Arc::clone(&file),
                        path,
                        short_path,
                    })),
                    ..course_bindings.clone()
                };
                specs.push(ChildSpec {
                    name: segment.render(&bindings.token_ctx()),
                    entity_id: file.id.clone(),
                    node: Node {
                        parent: None,
                        name: String::new(),
                        seg_idx: node.seg_idx + 1,
                        bindings,
                        kind: if leaf { NodeKind::FileLeaf } else { NodeKind::Directory },
                    },
                });
            }
        }
        Ok(specs)
    }

    /// The courses consistent with the given bindings, each paired with the
    /// semester binding its children should carry.
    async fn courses_in_scope(
        &self,
        bindings: &Bindings,
    ) -> Result<Vec<(Arc<Course>, Option<Arc<Semester>>)>, ExpansionError> {
        if let Some(course) = &bindings.course {
            return Ok(vec![(Arc::clone(course), bindings.semester.clone())]);
        }

        let courses = self.inner.crawler.list_user_courses().await?;
        let semesters = self.inner.crawler.list_semesters().await?;

        let scope = courses
            .iter()
            .filter(|c| {
                bindings
                    .semester
                    .as_ref()
                    .is_none_or(|s| c.runs_in(s.begin))
            })
            .map(|course| {
                // Children of a course bind its first semester unless an
                // ancestor already fixed one.
                let semester = bindings.semester.clone().or_else(|| {
                    semesters
                        .iter()
                        .find(|s| Some(s.begin) == course.start_begin)
                        .cloned()
                });
                (Arc::clone(course), semester)
            })
            .collect();
        Ok(scope)
    }
}

/// Recursively collect `(file, folder path)` pairs under `node`.
fn collect_files(
    node: &FolderNode,
    path: &[String],
    out: &mut Vec<(Arc<FileRef>, Vec<String>)>,
) {
    for file in &node.files {
        out.push((Arc::clone(file), path.to_vec()));
    }
    for sub in &node.subfolders {
        let mut sub_path = path.to_vec();
        sub_path.push(tokens::escape_file_name(&sub.folder.name));
        collect_files(sub, &sub_path, out);
    }
}

/// Make candidate names unique.
///
/// Candidates whose rendered name collides each get a parenthesized suffix
/// built from the first 8 characters of their entity id — stable across runs
/// because entity ids are. Empty names become the bare suffix.
fn disambiguate(specs: Vec<ChildSpec>) -> Vec<ChildSpec> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for spec in &specs {
        *counts.entry(spec.name.clone()).or_default() += 1;
    }

    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    specs
        .into_iter()
        .map(|mut spec| {
            let prefix: String = spec.entity_id.chars().take(8).collect();
            if spec.name.is_empty() {
                spec.name = format!("({prefix})");
            } else if counts[&spec.name] > 1 {
                spec.name = format!("{} ({prefix})", spec.name);
            }
            // Id prefixes are unique in practice; fall back to the full id
            // if two entities ever share one.
            let dup = seen.entry(spec.name.clone()).or_default();
            *dup += 1;
            if *dup > 1 {
                spec.name = format!("{} ({})", spec.name, spec.entity_id);
            }
            spec
        })
        .collect()
}
