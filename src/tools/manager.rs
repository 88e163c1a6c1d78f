//! The `manager` tool — structural operations on the tree.
//!
//! Commands: `rename` (move a file or an entire directory subtree) and
//! `delete` (remove a file, or a directory when empty or `recursive`).

use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_command, ToolError, ToolMeta};
use crate::vfs::{normalize_path, VirtualFileSystem};

const COMMANDS: &[&str] = &["rename", "delete"];

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum ManagerCommand {
    Rename {
        old_path: String,
        new_path: String,
    },
    Delete {
        path: String,
        #[serde(default)]
        recursive: bool,
    },
}

/// Apply one manager invocation.
pub fn run(fs: &mut VirtualFileSystem, args: &Value) -> Result<Value, ToolError> {
    let command: ManagerCommand = parse_command(args, COMMANDS)?;

    match command {
        ManagerCommand::Rename { old_path, new_path } => {
            let from = normalize_path(&old_path)?;
            let to = normalize_path(&new_path)?;
            fs.rename(&from, &to)?;
            Ok(json!({ "renamed": true, "old_path": from, "new_path": to }))
        }
        ManagerCommand::Delete { path, recursive } => {
            let normalized = normalize_path(&path)?;
            fs.delete(&normalized, recursive)?;
            Ok(json!({ "deleted": true, "path": normalized }))
        }
    }
}

/// Tool metadata injected into the backend request.
pub fn meta() -> ToolMeta {
    ToolMeta {
        name: "manager".into(),
        description: "Rename/move or delete files and directories in the project.".into(),
        args_schema: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["rename", "delete"],
                    "description": "The management operation to perform."
                },
                "old_path": {
                    "type": "string",
                    "description": "Current absolute path (rename only)."
                },
                "new_path": {
                    "type": "string",
                    "description": "Destination absolute path (rename only). Its parent directory must exist."
                },
                "path": {
                    "type": "string",
                    "description": "Absolute path to delete (delete only)."
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Delete a directory together with its contents. Default: false."
                }
            },
            "required": ["command"],
            "additionalProperties": false
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> VirtualFileSystem {
        let mut fs = VirtualFileSystem::new();
        fs.write("/src/App.jsx", "app", true).unwrap();
        fs.write("/src/util.js", "util", true).unwrap();
        fs
    }

    #[test]
    fn rename_moves_a_file() {
        let mut fs = seeded();
        let out = run(
            &mut fs,
            &json!({ "command": "rename", "old_path": "/src/util.js", "new_path": "/src/helpers.js" }),
        )
        .unwrap();
        assert_eq!(out["renamed"], true);
        assert!(!fs.exists("/src/util.js"));
        assert_eq!(fs.read("/src/helpers.js").unwrap(), "util");
    }

    #[test]
    fn rename_onto_occupied_path_fails() {
        let mut fs = seeded();
        let err = run(
            &mut fs,
            &json!({ "command": "rename", "old_path": "/src/util.js", "new_path": "/src/App.jsx" }),
        )
        .unwrap_err();
        assert_eq!(err.kind, "already_exists");
        assert_eq!(fs.read("/src/util.js").unwrap(), "util");
    }

    #[test]
    fn delete_defaults_to_non_recursive() {
        let mut fs = seeded();
        let err = run(&mut fs, &json!({ "command": "delete", "path": "/src" })).unwrap_err();
        assert_eq!(err.kind, "directory_not_empty");

        run(
            &mut fs,
            &json!({ "command": "delete", "path": "/src", "recursive": true }),
        )
        .unwrap();
        assert!(!fs.exists("/src"));
    }

    #[test]
    fn delete_missing_path_is_not_found() {
        let mut fs = VirtualFileSystem::new();
        let err = run(&mut fs, &json!({ "command": "delete", "path": "/ghost" })).unwrap_err();
        assert_eq!(err.kind, "not_found");
    }

    #[test]
    fn missing_rename_fields_are_invalid_arguments() {
        let mut fs = seeded();
        let err = run(
            &mut fs,
            &json!({ "command": "rename", "old_path": "/src/util.js" }),
        )
        .unwrap_err();
        assert_eq!(err.kind, "invalid_arguments");
        assert!(fs.exists("/src/util.js"));
    }
}
