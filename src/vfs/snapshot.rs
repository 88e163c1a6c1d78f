//! Snapshot codec: the flat, order-independent wire form of the tree.
//!
//! The service is stateless between requests — the client sends the whole
//! file system as a `path → node` map and receives the mutated map back.
//! `deserialize` reconstructs directory nodes implied by file paths even
//! when the client sent no explicit directory entries, then rejects any
//! map that cannot form a consistent tree.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{normalize_path, parent_path, FileNode, VirtualFileSystem};

/// Malformed inbound snapshot.  Unlike file-system errors this aborts the
/// whole run — there is no tree to hand to the agent.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// One entry in the flat map.  Timestamps are optional on input (older
/// clients never sent them) and always present on output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SnapshotNode {
    File {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_at: Option<DateTime<Utc>>,
    },
    Directory {},
}

/// The serialized tree: normalized path → node, root excluded.
pub type Snapshot = BTreeMap<String, SnapshotNode>;

/// Flatten a tree into its snapshot map.
pub fn serialize(fs: &VirtualFileSystem) -> Snapshot {
    let mut map = Snapshot::new();
    for node in fs.nodes() {
        match node {
            FileNode::File {
                path,
                content,
                created_at,
                updated_at,
            } => {
                map.insert(
                    path.clone(),
                    SnapshotNode::File {
                        content: content.clone(),
                        created_at: Some(*created_at),
                        updated_at: Some(*updated_at),
                    },
                );
            }
            FileNode::Directory { path, .. } => {
                // The root is implicit on the wire.
                if path != "/" {
                    map.insert(path.clone(), SnapshotNode::Directory {});
                }
            }
        }
    }
    map
}

/// Rebuild a tree from a snapshot map.
///
/// The map's iteration order is irrelevant.  Fails with
/// [`SnapshotError::InvalidSnapshot`] on unparseable paths, duplicate
/// paths after normalization, or a path claimed as both file and
/// directory (explicitly or implied by a deeper entry).
pub fn deserialize(snapshot: &Snapshot) -> Result<VirtualFileSystem, SnapshotError> {
    let mut files: BTreeMap<String, (&str, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
        BTreeMap::new();
    let mut dirs: BTreeSet<String> = BTreeSet::new();

    for (raw_path, node) in snapshot {
        let path = normalize_path(raw_path)
            .map_err(|e| SnapshotError::InvalidSnapshot(format!("bad path {raw_path:?}: {e}")))?;

        match node {
            SnapshotNode::File {
                content,
                created_at,
                updated_at,
            } => {
                if path == "/" {
                    return Err(SnapshotError::InvalidSnapshot(
                        "root cannot be a file".to_string(),
                    ));
                }
                if files
                    .insert(path.clone(), (content.as_str(), *created_at, *updated_at))
                    .is_some()
                {
                    return Err(SnapshotError::InvalidSnapshot(format!(
                        "duplicate path after normalization: {path}"
                    )));
                }
            }
            SnapshotNode::Directory {} => {
                if path != "/" && !dirs.insert(path.clone()) {
                    return Err(SnapshotError::InvalidSnapshot(format!(
                        "duplicate path after normalization: {path}"
                    )));
                }
            }
        }
    }

    // Materialize every ancestor implied by a file or directory path.
    let implied: Vec<String> = files
        .keys()
        .chain(dirs.iter())
        .filter_map(|p| parent_path(p))
        .collect();
    let mut frontier = implied;
    while let Some(path) = frontier.pop() {
        if path == "/" || dirs.contains(&path) {
            continue;
        }
        if let Some(parent) = parent_path(&path) {
            frontier.push(parent);
        }
        dirs.insert(path);
    }

    // A path cannot be both a file and a (declared or implied) directory.
    for path in &dirs {
        if files.contains_key(path) {
            return Err(SnapshotError::InvalidSnapshot(format!(
                "{path} is both a file and a directory"
            )));
        }
    }

    // BTree order puts every parent before its children, so linking is
    // safe in a single pass.
    let mut fs = VirtualFileSystem::new();
    for path in &dirs {
        fs.insert_directory(path);
    }
    for (path, (content, created_at, updated_at)) in &files {
        let now = Utc::now();
        fs.insert_file(
            path,
            (*content).to_string(),
            created_at.unwrap_or(now),
            updated_at.unwrap_or(now),
        );
    }
    Ok(fs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_structure() {
        let mut fs = VirtualFileSystem::new();
        fs.write("/App.jsx", "export default App", true).unwrap();
        fs.write("/components/Button.jsx", "button", true).unwrap();
        fs.write("/components/ui/Card.jsx", "card", true).unwrap();

        let restored = deserialize(&serialize(&fs)).unwrap();
        assert_eq!(fs, restored);
    }

    #[test]
    fn empty_tree_round_trips_to_empty_map() {
        let fs = VirtualFileSystem::new();
        let snap = serialize(&fs);
        assert!(snap.is_empty());
        assert_eq!(deserialize(&snap).unwrap(), fs);
    }

    #[test]
    fn implied_directories_are_reconstructed() {
        let mut snap = Snapshot::new();
        snap.insert(
            "/a/b/c.txt".to_string(),
            SnapshotNode::File {
                content: "x".to_string(),
                created_at: None,
                updated_at: None,
            },
        );
        let fs = deserialize(&snap).unwrap();
        assert!(fs.exists("/a"));
        assert!(fs.exists("/a/b"));
        assert_eq!(fs.list("/a").unwrap(), vec!["/a/b".to_string()]);
        assert_eq!(fs.read("/a/b/c.txt").unwrap(), "x");
    }

    #[test]
    fn file_and_directory_conflict_is_rejected() {
        let mut snap = Snapshot::new();
        snap.insert(
            "/a".to_string(),
            SnapshotNode::File {
                content: "x".to_string(),
                created_at: None,
                updated_at: None,
            },
        );
        snap.insert("/a".to_string(), SnapshotNode::Directory {});
        // BTreeMap keeps one entry per key; force the conflict through an
        // implied directory instead.
        snap.insert(
            "/a/b.txt".to_string(),
            SnapshotNode::File {
                content: "y".to_string(),
                created_at: None,
                updated_at: None,
            },
        );
        assert!(matches!(
            deserialize(&snap),
            Err(SnapshotError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn traversal_paths_are_rejected() {
        let mut snap = Snapshot::new();
        snap.insert(
            "/../etc/passwd".to_string(),
            SnapshotNode::File {
                content: "x".to_string(),
                created_at: None,
                updated_at: None,
            },
        );
        assert!(matches!(
            deserialize(&snap),
            Err(SnapshotError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn duplicate_after_normalization_is_rejected() {
        let mut snap = Snapshot::new();
        snap.insert(
            "/a.txt".to_string(),
            SnapshotNode::File {
                content: "one".to_string(),
                created_at: None,
                updated_at: None,
            },
        );
        snap.insert(
            "a.txt".to_string(),
            SnapshotNode::File {
                content: "two".to_string(),
                created_at: None,
                updated_at: None,
            },
        );
        assert!(matches!(
            deserialize(&snap),
            Err(SnapshotError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn map_order_does_not_matter() {
        let a = serde_json::from_str::<Snapshot>(
            r#"{"/x/a.txt":{"type":"file","content":"1"},"/x":{"type":"directory"}}"#,
        )
        .unwrap();
        let b = serde_json::from_str::<Snapshot>(
            r#"{"/x":{"type":"directory"},"/x/a.txt":{"type":"file","content":"1"}}"#,
        )
        .unwrap();
        let fs_a = deserialize(&a).unwrap();
        let fs_b = deserialize(&b).unwrap();
        assert_eq!(
            fs_a.read("/x/a.txt").unwrap(),
            fs_b.read("/x/a.txt").unwrap()
        );
        assert_eq!(fs_a.list("/").unwrap(), fs_b.list("/").unwrap());
    }

    #[test]
    fn wire_format_matches_expected_shape() {
        let mut fs = VirtualFileSystem::new();
        fs.write("/App.jsx", "X", true).unwrap();
        let json = serde_json::to_value(serialize(&fs)).unwrap();
        assert_eq!(json["/App.jsx"]["type"], "file");
        assert_eq!(json["/App.jsx"]["content"], "X");
    }
}
