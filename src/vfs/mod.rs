//! In-memory virtual file system.
//!
//! A [`VirtualFileSystem`] is a tree of files and directories keyed by
//! normalized absolute paths.  One instance is built per incoming request
//! from a client snapshot, mutated by the tool layer during a single
//! orchestration run, and serialized back out at the end — it never
//! touches real disk and is never shared across requests.
//!
//! All operations take `/`-rooted paths.  Normalization strips `.` and
//! empty segments and rejects `..` outright; directory existence is an
//! explicit invariant (a child cannot exist without its parent directory
//! node) rather than something inferred from string splitting.

pub mod snapshot;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by file-system operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Malformed or escaping path (relative tricks, `..`, empty).
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// No node at the given path.
    #[error("not found: {0}")]
    NotFound(String),
    /// A file operation was applied to a directory.
    #[error("is a directory: {0}")]
    IsDirectory(String),
    /// A directory operation was applied to a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// Creation target already occupied.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Non-recursive delete of a directory with children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    /// `old_str` occurs more than once when exactly one match is required.
    #[error("found {count} occurrences of old_str in {path}, expected exactly one")]
    AmbiguousMatch { path: String, count: usize },
    /// `old_str` does not occur in the file at all.
    #[error("old_str not found in {0}")]
    NoMatch(String),
    /// Line number outside the file's line range.
    #[error("line {line} is out of range for {path} ({total} lines)")]
    LineOutOfRange {
        path: String,
        line: usize,
        total: usize,
    },
}

impl FsError {
    /// Stable machine-readable kind, used in tool error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            FsError::InvalidPath(_) => "invalid_path",
            FsError::NotFound(_) => "not_found",
            FsError::IsDirectory(_) => "is_directory",
            FsError::NotADirectory(_) => "not_a_directory",
            FsError::AlreadyExists(_) => "already_exists",
            FsError::DirectoryNotEmpty(_) => "directory_not_empty",
            FsError::AmbiguousMatch { .. } => "ambiguous_match",
            FsError::NoMatch(_) => "no_match",
            FsError::LineOutOfRange { .. } => "line_out_of_range",
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A single node in the tree: a text file or a directory.
#[derive(Debug, Clone, PartialEq)]
pub enum FileNode {
    File {
        path: String,
        content: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
    Directory {
        path: String,
        /// Normalized absolute paths of immediate children.
        children: BTreeSet<String>,
    },
}

impl FileNode {
    /// The node's normalized absolute path.
    pub fn path(&self) -> &str {
        match self {
            FileNode::File { path, .. } | FileNode::Directory { path, .. } => path,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileNode::Directory { .. })
    }
}

/// How many matches a textual replace is required to hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Exactly one occurrence — more is `AmbiguousMatch`, zero is `NoMatch`.
    ExactlyOne,
    /// Replace every occurrence (zero is still `NoMatch`).
    All,
}

// ---------------------------------------------------------------------------
// Path normalization
// ---------------------------------------------------------------------------

/// Normalize a raw path into its canonical absolute form.
///
/// Rules: the result is `/`-rooted (a missing leading slash is tolerated,
/// `App.jsx` → `/App.jsx`), empty and `.` segments are dropped, and any
/// `..` segment is rejected — there is nothing above the virtual root to
/// escape into, so traversal is always an error rather than a clamp.
pub fn normalize_path(raw: &str) -> Result<String, FsError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FsError::InvalidPath(raw.to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in trimmed.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return Err(FsError::InvalidPath(raw.to_string())),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Parent path of a normalized path (`None` for the root).
pub fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}

// ---------------------------------------------------------------------------
// VirtualFileSystem
// ---------------------------------------------------------------------------

/// The in-memory tree.  Owns every node; the root directory `/` is always
/// present and cannot be deleted or renamed.
#[derive(Debug)]
pub struct VirtualFileSystem {
    nodes: BTreeMap<String, FileNode>,
}

impl Default for VirtualFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for VirtualFileSystem {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl VirtualFileSystem {
    /// Create an empty tree containing only the root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            FileNode::Directory {
                path: "/".to_string(),
                children: BTreeSet::new(),
            },
        );
        Self { nodes }
    }

    /// Immutable view of every node, ordered by path.
    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.values()
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Whether a node exists at `path` (after normalization).
    pub fn exists(&self, path: &str) -> bool {
        normalize_path(path)
            .map(|p| self.nodes.contains_key(&p))
            .unwrap_or(false)
    }

    /// Whether `path` names an existing directory.
    pub fn is_dir(&self, path: &str) -> bool {
        normalize_path(path)
            .ok()
            .and_then(|p| self.nodes.get(&p))
            .map(FileNode::is_directory)
            .unwrap_or(false)
    }

    // -- internal helpers ---------------------------------------------------

    fn link_child(&mut self, parent: &str, child: &str) {
        if let Some(FileNode::Directory { children, .. }) = self.nodes.get_mut(parent) {
            children.insert(child.to_string());
        }
    }

    fn unlink_child(&mut self, parent: &str, child: &str) {
        if let Some(FileNode::Directory { children, .. }) = self.nodes.get_mut(parent) {
            children.remove(child);
        }
    }

    /// Insert a directory node, linking it to its (existing) parent.
    pub(crate) fn insert_directory(&mut self, path: &str) {
        if self.nodes.contains_key(path) {
            return;
        }
        self.nodes.insert(
            path.to_string(),
            FileNode::Directory {
                path: path.to_string(),
                children: BTreeSet::new(),
            },
        );
        if let Some(parent) = parent_path(path) {
            self.link_child(&parent, path);
        }
    }

    /// Insert a file node directly, linking it to its (existing) parent.
    /// Used by the snapshot codec after it has validated the tree shape.
    pub(crate) fn insert_file(
        &mut self,
        path: &str,
        content: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) {
        self.nodes.insert(
            path.to_string(),
            FileNode::File {
                path: path.to_string(),
                content,
                created_at,
                updated_at,
            },
        );
        if let Some(parent) = parent_path(path) {
            self.link_child(&parent, path);
        }
    }

    // -- read side ----------------------------------------------------------

    /// Return a file's full content.
    pub fn read(&self, path: &str) -> Result<String, FsError> {
        let path = normalize_path(path)?;
        match self.nodes.get(&path) {
            Some(FileNode::File { content, .. }) => Ok(content.clone()),
            Some(FileNode::Directory { .. }) => Err(FsError::IsDirectory(path)),
            None => Err(FsError::NotFound(path)),
        }
    }

    /// Return full or line-ranged file content without mutating anything.
    ///
    /// `range` is 1-indexed and inclusive; an `end` past the last line is
    /// clamped to the end of the file.
    pub fn view(&self, path: &str, range: Option<(usize, usize)>) -> Result<String, FsError> {
        let normalized = normalize_path(path)?;
        let content = self.read(&normalized)?;
        let Some((start, end)) = range else {
            return Ok(content);
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let total = lines.len();
        if start < 1 || start > total {
            return Err(FsError::LineOutOfRange {
                path: normalized,
                line: start,
                total,
            });
        }
        if end < start {
            return Err(FsError::LineOutOfRange {
                path: normalized,
                line: end,
                total,
            });
        }
        let end = end.min(total);
        Ok(lines[start - 1..end].join("\n"))
    }

    /// Immediate children of a directory, ordered by path.
    pub fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        let path = normalize_path(path)?;
        match self.nodes.get(&path) {
            Some(FileNode::Directory { children, .. }) => {
                Ok(children.iter().cloned().collect())
            }
            Some(FileNode::File { .. }) => Err(FsError::NotADirectory(path)),
            None => Err(FsError::NotFound(path)),
        }
    }

    // -- write side ---------------------------------------------------------

    /// Create or overwrite a file.
    ///
    /// When the file does not exist and `create` is false the call fails
    /// with `NotFound`.  When `create` is true the immediate parent
    /// directory is created if missing — but only if *its* parent already
    /// exists as a directory; deeper missing ancestors are an error, never
    /// silently materialized.
    pub fn write(&mut self, path: &str, content: &str, create: bool) -> Result<(), FsError> {
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(FsError::IsDirectory(path));
        }

        match self.nodes.get_mut(&path) {
            Some(FileNode::File {
                content: existing,
                updated_at,
                ..
            }) => {
                *existing = content.to_string();
                *updated_at = Utc::now();
                return Ok(());
            }
            Some(FileNode::Directory { .. }) => return Err(FsError::IsDirectory(path)),
            None => {}
        }

        if !create {
            return Err(FsError::NotFound(path));
        }

        let parent = parent_path(&path).ok_or_else(|| FsError::InvalidPath(path.clone()))?;
        match self.nodes.get(&parent) {
            Some(FileNode::Directory { .. }) => {}
            Some(FileNode::File { .. }) => return Err(FsError::NotADirectory(parent)),
            None => {
                // One level of implicit creation: the immediate parent may
                // be materialized when the grandparent is a real directory.
                let grandparent =
                    parent_path(&parent).ok_or_else(|| FsError::NotFound(parent.clone()))?;
                match self.nodes.get(&grandparent) {
                    Some(FileNode::Directory { .. }) => self.insert_directory(&parent),
                    Some(FileNode::File { .. }) => {
                        return Err(FsError::NotADirectory(grandparent))
                    }
                    None => return Err(FsError::NotFound(parent)),
                }
            }
        }

        let now = Utc::now();
        self.insert_file(&path, content.to_string(), now, now);
        Ok(())
    }

    /// Textual find-and-replace scoped to one file.
    ///
    /// Never applies a partial or ambiguous replacement: with
    /// [`ReplaceMode::ExactlyOne`] the call fails (content untouched) when
    /// `old_str` matches more than once.  Returns the number of
    /// replacements performed.
    pub fn replace(
        &mut self,
        path: &str,
        old_str: &str,
        new_str: &str,
        mode: ReplaceMode,
    ) -> Result<usize, FsError> {
        let path = normalize_path(path)?;
        let content = match self.nodes.get(&path) {
            Some(FileNode::File { content, .. }) => content,
            Some(FileNode::Directory { .. }) => return Err(FsError::IsDirectory(path)),
            None => return Err(FsError::NotFound(path)),
        };

        if old_str.is_empty() {
            return Err(FsError::NoMatch(path));
        }
        let count = content.matches(old_str).count();
        if count == 0 {
            return Err(FsError::NoMatch(path));
        }
        if mode == ReplaceMode::ExactlyOne && count > 1 {
            return Err(FsError::AmbiguousMatch { path, count });
        }

        let replaced = match mode {
            ReplaceMode::ExactlyOne => content.replacen(old_str, new_str, 1),
            ReplaceMode::All => content.replace(old_str, new_str),
        };
        let applied = if mode == ReplaceMode::All { count } else { 1 };

        if let Some(FileNode::File {
            content, updated_at, ..
        }) = self.nodes.get_mut(&path)
        {
            *content = replaced;
            *updated_at = Utc::now();
        }
        Ok(applied)
    }

    /// Insert `text` as new line(s) after 1-indexed line `after_line`
    /// (`0` prepends to the file).
    pub fn insert(&mut self, path: &str, after_line: usize, text: &str) -> Result<(), FsError> {
        let path = normalize_path(path)?;
        let content = match self.nodes.get(&path) {
            Some(FileNode::File { content, .. }) => content.clone(),
            Some(FileNode::Directory { .. }) => return Err(FsError::IsDirectory(path)),
            None => return Err(FsError::NotFound(path)),
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let total = lines.len();
        if after_line > total {
            return Err(FsError::LineOutOfRange {
                path,
                line: after_line,
                total,
            });
        }

        let new_lines: Vec<&str> = text.split('\n').collect();
        let mut result: Vec<&str> = Vec::with_capacity(total + new_lines.len());
        result.extend_from_slice(&lines[..after_line]);
        result.extend_from_slice(&new_lines);
        result.extend_from_slice(&lines[after_line..]);
        let joined = result.join("\n");

        if let Some(FileNode::File {
            content, updated_at, ..
        }) = self.nodes.get_mut(&path)
        {
            *content = joined;
            *updated_at = Utc::now();
        }
        Ok(())
    }

    /// Delete a file or directory.
    ///
    /// Deleting a non-empty directory requires `recursive`; the root
    /// cannot be deleted at all.
    pub fn delete(&mut self, path: &str, recursive: bool) -> Result<(), FsError> {
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(FsError::InvalidPath(path));
        }

        match self.nodes.get(&path) {
            Some(FileNode::File { .. }) => {
                self.nodes.remove(&path);
            }
            Some(FileNode::Directory { children, .. }) => {
                if !children.is_empty() && !recursive {
                    return Err(FsError::DirectoryNotEmpty(path));
                }
                let prefix = format!("{path}/");
                let doomed: Vec<String> = self
                    .nodes
                    .keys()
                    .filter(|k| k.as_str() == path || k.starts_with(&prefix))
                    .cloned()
                    .collect();
                for key in doomed {
                    self.nodes.remove(&key);
                }
            }
            None => return Err(FsError::NotFound(path)),
        }

        if let Some(parent) = parent_path(&path) {
            self.unlink_child(&parent, &path);
        }
        Ok(())
    }

    /// Move a node (and, for directories, its whole subtree) to a new path.
    ///
    /// Atomic: every move is computed and validated before the first map
    /// mutation, so a failing rename leaves the tree byte-identical.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        let old_path = normalize_path(old_path)?;
        let new_path = normalize_path(new_path)?;
        if old_path == "/" || new_path == "/" {
            return Err(FsError::InvalidPath(new_path));
        }
        if old_path == new_path {
            return Ok(());
        }

        let is_dir = match self.nodes.get(&old_path) {
            Some(node) => node.is_directory(),
            None => return Err(FsError::NotFound(old_path)),
        };
        if self.nodes.contains_key(&new_path) {
            return Err(FsError::AlreadyExists(new_path));
        }
        // A directory cannot be moved beneath itself.
        if is_dir && new_path.starts_with(&format!("{old_path}/")) {
            return Err(FsError::InvalidPath(new_path));
        }
        let new_parent =
            parent_path(&new_path).ok_or_else(|| FsError::InvalidPath(new_path.clone()))?;
        match self.nodes.get(&new_parent) {
            Some(FileNode::Directory { .. }) => {}
            Some(FileNode::File { .. }) => return Err(FsError::NotADirectory(new_parent)),
            None => return Err(FsError::NotFound(new_parent)),
        }

        // Collect the subtree (or single node) to move.
        let old_prefix = format!("{old_path}/");
        let moved_keys: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| k.as_str() == old_path || k.starts_with(&old_prefix))
            .cloned()
            .collect();

        // All validation passed — apply.
        for key in moved_keys {
            let rewritten = if key == old_path {
                new_path.clone()
            } else {
                format!("{new_path}{}", &key[old_path.len()..])
            };
            let node = self.nodes.remove(&key).map(|node| match node {
                FileNode::File {
                    content,
                    created_at,
                    updated_at,
                    ..
                } => FileNode::File {
                    path: rewritten.clone(),
                    content,
                    created_at,
                    updated_at,
                },
                FileNode::Directory { children, .. } => FileNode::Directory {
                    path: rewritten.clone(),
                    children: children
                        .into_iter()
                        .map(|c| format!("{new_path}{}", &c[old_path.len()..]))
                        .collect(),
                },
            });
            if let Some(node) = node {
                self.nodes.insert(rewritten, node);
            }
        }

        if let Some(old_parent) = parent_path(&old_path) {
            self.unlink_child(&old_parent, &old_path);
        }
        self.link_child(&new_parent, &new_path);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
