//! File-set comparison and the on-disk diff document.
//!
//! Walks two unpacked bundle trees and classifies every union entry as
//! merge, add or delete. File keys are the relative path minus extension,
//! always `/`-separated. Only `.json` entries are structurally compared;
//! binary assets carry copy semantics only.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::compare::FileDiff;
use crate::error::EngineError;

/// What happens to a file during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FileActionKind {
    #[default]
    Merge,
    Add,
    Delete,
}

impl From<FileActionKind> for u8 {
    fn from(kind: FileActionKind) -> u8 {
        match kind {
            FileActionKind::Merge => 0,
            FileActionKind::Add => 1,
            FileActionKind::Delete => 2,
        }
    }
}

impl TryFrom<u8> for FileActionKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FileActionKind::Merge),
            1 => Ok(FileActionKind::Add),
            2 => Ok(FileActionKind::Delete),
            other => Err(format!("unknown file_copy_action {other}")),
        }
    }
}

/// One file of the bundle with its action and structural diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMergeAction {
    pub file_key: String,
    pub file_ext: String,
    pub is_directory: bool,
    #[serde(rename = "file_copy_action")]
    pub action: FileActionKind,
    #[serde(default, skip_serializing_if = "FileDiff::is_empty")]
    pub file_diff: FileDiff,
}

impl FileMergeAction {
    /// Relative file name, extension included.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.file_key, self.file_ext)
    }

    /// True when this entry is structurally comparable.
    pub fn is_json(&self) -> bool {
        self.file_ext.eq_ignore_ascii_case(".json")
    }
}

/// Ordered set of per-file actions; the serialised diff document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleDiff {
    pub merge_actions: Vec<FileMergeAction>,
}

impl BundleDiff {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(EngineError::DiffDocument)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        fs::write(path, self.to_json()).map_err(|e| EngineError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Self::from_json(&text)
    }
}

/// Relative entry name → is-directory, `/`-separated, root excluded.
pub fn scan_dir(root: &Path) -> Result<BTreeMap<String, bool>, EngineError> {
    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            EngineError::io(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        entries.insert(rel, entry.file_type().is_dir());
    }
    Ok(entries)
}

/// Split a relative name into (key, extension-with-dot).
fn split_key(name: &str) -> (String, String) {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => (
            name[..name.len() - ext.len() - 1].to_string(),
            format!(".{ext}"),
        ),
        None => (name.to_string(), String::new()),
    }
}

/// Classify the union of two scanned trees. Entries present in both
/// merge; present only in the source are adds; only in the destination,
/// deletes.
pub fn file_set_change(
    src: &BTreeMap<String, bool>,
    dst: &BTreeMap<String, bool>,
) -> BundleDiff {
    let mut actions = Vec::new();

    for (name, &is_dir) in dst {
        let (file_key, file_ext) = split_key(name);
        let action = if src.contains_key(name) {
            FileActionKind::Merge
        } else {
            FileActionKind::Delete
        };
        actions.push(FileMergeAction {
            file_key,
            file_ext,
            is_directory: is_dir,
            action,
            file_diff: FileDiff::default(),
        });
    }

    for (name, &is_dir) in src {
        if dst.contains_key(name) {
            continue;
        }
        let (file_key, file_ext) = split_key(name);
        actions.push(FileMergeAction {
            file_key,
            file_ext,
            is_directory: is_dir,
            action: FileActionKind::Add,
            file_diff: FileDiff::default(),
        });
    }

    BundleDiff { merge_actions: actions }
}

/// Path form of a whole-file action.
pub fn build_file_action(kind: FileActionKind, file_name: &str) -> String {
    match kind {
        FileActionKind::Add => format!("A~{file_name}~$"),
        FileActionKind::Delete => format!("D~{file_name}~$"),
        FileActionKind::Merge => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(entries: &[(&str, bool)]) -> BTreeMap<String, bool> {
        entries
            .iter()
            .map(|(n, d)| (n.to_string(), *d))
            .collect()
    }

    #[test]
    fn classify_union() {
        let src = set(&[
            ("document.json", false),
            ("pages", true),
            ("pages/new.json", false),
        ]);
        let dst = set(&[
            ("document.json", false),
            ("pages", true),
            ("pages/old.json", false),
        ]);
        let diff = file_set_change(&src, &dst);
        let by_key: BTreeMap<_, _> = diff
            .merge_actions
            .iter()
            .map(|a| (a.file_name(), a.action))
            .collect();
        assert_eq!(by_key["document.json"], FileActionKind::Merge);
        assert_eq!(by_key["pages/new.json"], FileActionKind::Add);
        assert_eq!(by_key["pages/old.json"], FileActionKind::Delete);
        assert_eq!(by_key["pages"], FileActionKind::Merge);
    }

    #[test]
    fn key_splits_off_extension() {
        let diff = file_set_change(&set(&[("pages/9E4C.json", false)]), &set(&[]));
        let action = &diff.merge_actions[0];
        assert_eq!(action.file_key, "pages/9E4C");
        assert_eq!(action.file_ext, ".json");
        assert!(action.is_json());

        let diff = file_set_change(&set(&[("previews/preview.png", false)]), &set(&[]));
        assert!(!diff.merge_actions[0].is_json());
    }

    #[test]
    fn extensionless_entries_keep_full_key() {
        let diff = file_set_change(&set(&[("previews", true)]), &set(&[]));
        assert_eq!(diff.merge_actions[0].file_key, "previews");
        assert_eq!(diff.merge_actions[0].file_ext, "");
        assert!(diff.merge_actions[0].is_directory);
    }

    #[test]
    fn diff_document_round_trip() {
        let mut diff = file_set_change(
            &set(&[("document.json", false)]),
            &set(&[("document.json", false)]),
        );
        diff.merge_actions[0]
            .file_diff
            .src_to_dst_diff
            .insert(r#"$["frame"]["x"]"#.into(), r#"$["frame"]["x"]"#.into());
        diff.merge_actions[0].file_diff.seq_key = "do_objectID".into();

        let text = diff.to_json();
        assert!(text.contains("\"merge_actions\""));
        assert!(text.contains("\"file_copy_action\": 0"));
        assert!(text.contains("\"src_to_dst_diff\""));

        let back = BundleDiff::from_json(&text).unwrap();
        assert_eq!(back.merge_actions[0].file_key, "document");
        assert_eq!(
            back.merge_actions[0].file_diff.src_to_dst_diff,
            diff.merge_actions[0].file_diff.src_to_dst_diff
        );
    }

    #[test]
    fn empty_file_diff_is_omitted() {
        let diff = file_set_change(&set(&[("user.json", false)]), &set(&[("user.json", false)]));
        let text = diff.to_json();
        assert!(!text.contains("file_diff"));
    }

    #[test]
    fn malformed_diff_document_is_a_decode_error() {
        let err = BundleDiff::from_json("{\"merge_actions\": 7}").unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn file_action_paths() {
        assert_eq!(
            build_file_action(FileActionKind::Add, "pages/9E4C.json"),
            "A~pages/9E4C.json~$"
        );
        assert_eq!(
            build_file_action(FileActionKind::Delete, "pages/9E4C.json"),
            "D~pages/9E4C.json~$"
        );
        assert_eq!(build_file_action(FileActionKind::Merge, "x"), "");
    }
}
