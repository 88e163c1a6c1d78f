//! The `editor` tool — inspect and surgically edit files in the tree.
//!
//! Commands:
//! - `view` — full or line-ranged content; on a directory, its listing
//! - `create` — create a new file (refuses to overwrite an existing one)
//! - `str_replace` — exact-match find-and-replace
//! - `insert` — insert lines after a 1-indexed line number (0 prepends)

use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_command, ToolError, ToolMeta};
use crate::vfs::{normalize_path, ReplaceMode, VirtualFileSystem};

const COMMANDS: &[&str] = &["view", "create", "str_replace", "insert"];

/// Closed command set — adding a command is a compiler-checked change.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum EditorCommand {
    View {
        path: String,
        #[serde(default)]
        view_range: Option<(usize, usize)>,
    },
    Create {
        path: String,
        #[serde(alias = "text")]
        file_text: String,
    },
    StrReplace {
        path: String,
        #[serde(alias = "old_text")]
        old_str: String,
        #[serde(alias = "new_text")]
        new_str: String,
        #[serde(default)]
        replace_all: bool,
    },
    Insert {
        path: String,
        insert_line: usize,
        #[serde(alias = "text")]
        new_text: String,
    },
}

/// Apply one editor invocation.  Pure with respect to everything except
/// the passed-in tree.
pub fn run(fs: &mut VirtualFileSystem, args: &Value) -> Result<Value, ToolError> {
    let command: EditorCommand = parse_command(args, COMMANDS)?;

    match command {
        EditorCommand::View { path, view_range } => {
            let normalized = normalize_path(&path)?;
            if fs.is_dir(&normalized) {
                let entries = fs.list(&normalized)?;
                return Ok(json!({ "path": normalized, "entries": entries }));
            }
            let content = fs.view(&normalized, view_range)?;
            Ok(json!({ "path": normalized, "content": content }))
        }
        EditorCommand::Create { path, file_text } => {
            let normalized = normalize_path(&path)?;
            // Creating over an existing file would silently destroy prior
            // agent work; force str_replace / an explicit overwrite flow.
            if fs.exists(&normalized) {
                return Err(ToolError {
                    kind: "already_exists",
                    message: format!("already exists: {normalized}"),
                });
            }
            let bytes = file_text.len();
            fs.write(&normalized, &file_text, true)?;
            Ok(json!({ "created": true, "path": normalized, "bytes": bytes }))
        }
        EditorCommand::StrReplace {
            path,
            old_str,
            new_str,
            replace_all,
        } => {
            let normalized = normalize_path(&path)?;
            let mode = if replace_all {
                ReplaceMode::All
            } else {
                ReplaceMode::ExactlyOne
            };
            let replaced = fs.replace(&normalized, &old_str, &new_str, mode)?;
            Ok(json!({ "replaced": replaced, "path": normalized }))
        }
        EditorCommand::Insert {
            path,
            insert_line,
            new_text,
        } => {
            let normalized = normalize_path(&path)?;
            fs.insert(&normalized, insert_line, &new_text)?;
            Ok(json!({ "inserted": true, "path": normalized, "line": insert_line }))
        }
    }
}

/// Tool metadata injected into the backend request.
pub fn meta() -> ToolMeta {
    ToolMeta {
        name: "editor".into(),
        description: "View, create, and surgically edit files in the project. \
                      Prefer str_replace with a unique snippet over rewriting whole files."
            .into(),
        args_schema: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["view", "create", "str_replace", "insert"],
                    "description": "The edit operation to perform."
                },
                "path": {
                    "type": "string",
                    "description": "Absolute path rooted at '/', e.g. /App.jsx."
                },
                "file_text": {
                    "type": "string",
                    "description": "Full content for the new file (create only)."
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to find (str_replace only). Must occur exactly once unless replace_all is set."
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text (str_replace only). Use an empty string to delete."
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence of old_str instead of requiring a unique match. Default: false."
                },
                "insert_line": {
                    "type": "integer",
                    "description": "1-indexed line to insert after; 0 prepends (insert only)."
                },
                "new_text": {
                    "type": "string",
                    "description": "Lines to insert (insert only)."
                },
                "view_range": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "minItems": 2,
                    "maxItems": 2,
                    "description": "Optional [start, end] line range for view, 1-indexed inclusive."
                }
            },
            "required": ["command", "path"],
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
        fs.write("/App.jsx", "const a = 1;\nconst b = 2;", true)
            .unwrap();
        fs
    }

    #[test]
    fn create_writes_a_new_file() {
        let mut fs = VirtualFileSystem::new();
        let out = run(
            &mut fs,
            &json!({ "command": "create", "path": "/App.jsx", "file_text": "X" }),
        )
        .unwrap();
        assert_eq!(out["created"], true);
        assert_eq!(fs.read("/App.jsx").unwrap(), "X");
    }

    #[test]
    fn create_accepts_text_alias() {
        let mut fs = VirtualFileSystem::new();
        run(
            &mut fs,
            &json!({ "command": "create", "path": "/App.jsx", "text": "X" }),
        )
        .unwrap();
        assert_eq!(fs.read("/App.jsx").unwrap(), "X");
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let mut fs = seeded();
        let err = run(
            &mut fs,
            &json!({ "command": "create", "path": "/App.jsx", "file_text": "clobber" }),
        )
        .unwrap_err();
        assert_eq!(err.kind, "already_exists");
        assert_eq!(fs.read("/App.jsx").unwrap(), "const a = 1;\nconst b = 2;");
    }

    #[test]
    fn str_replace_edits_unique_snippet() {
        let mut fs = seeded();
        let out = run(
            &mut fs,
            &json!({
                "command": "str_replace",
                "path": "/App.jsx",
                "old_str": "const a = 1;",
                "new_str": "const a = 42;"
            }),
        )
        .unwrap();
        assert_eq!(out["replaced"], 1);
        assert_eq!(fs.read("/App.jsx").unwrap(), "const a = 42;\nconst b = 2;");
    }

    #[test]
    fn str_replace_ambiguous_is_surfaced_not_guessed() {
        let mut fs = VirtualFileSystem::new();
        fs.write("/App.jsx", "foo bar foo", true).unwrap();
        let err = run(
            &mut fs,
            &json!({
                "command": "str_replace",
                "path": "/App.jsx",
                "old_str": "foo",
                "new_str": "baz"
            }),
        )
        .unwrap_err();
        assert_eq!(err.kind, "ambiguous_match");
        assert_eq!(fs.read("/App.jsx").unwrap(), "foo bar foo");
    }

    #[test]
    fn insert_and_view_range() {
        let mut fs = seeded();
        run(
            &mut fs,
            &json!({
                "command": "insert",
                "path": "/App.jsx",
                "insert_line": 1,
                "new_text": "const c = 3;"
            }),
        )
        .unwrap();
        let out = run(
            &mut fs,
            &json!({ "command": "view", "path": "/App.jsx", "view_range": [2, 2] }),
        )
        .unwrap();
        assert_eq!(out["content"], "const c = 3;");
    }

    #[test]
    fn view_directory_lists_children() {
        let mut fs = VirtualFileSystem::new();
        fs.write("/src/a.jsx", "a", true).unwrap();
        fs.write("/src/b.jsx", "b", true).unwrap();
        let out = run(&mut fs, &json!({ "command": "view", "path": "/src" })).unwrap();
        assert_eq!(out["entries"], json!(["/src/a.jsx", "/src/b.jsx"]));
    }

    #[test]
    fn unknown_command_is_unsupported() {
        let mut fs = VirtualFileSystem::new();
        let err = run(
            &mut fs,
            &json!({ "command": "append", "path": "/a.txt" }),
        )
        .unwrap_err();
        assert_eq!(err.kind, "unsupported_command");
    }

    #[test]
    fn missing_field_is_invalid_arguments_and_mutates_nothing() {
        let mut fs = VirtualFileSystem::new();
        let err = run(&mut fs, &json!({ "command": "create", "path": "/a.txt" })).unwrap_err();
        assert_eq!(err.kind, "invalid_arguments");
        assert!(!fs.exists("/a.txt"));

        let err = run(&mut fs, &json!({ "path": "/a.txt" })).unwrap_err();
        assert_eq!(err.kind, "invalid_arguments");
    }
}
