//! Dependency expansion across files.
//!
//! After comparison, every file carries identifier anchors. Expansion
//! joins them against a global identifier index so that each edit knows
//! the paths — possibly in other files — that must be co-applied, and
//! `find_matching` answers the per-edit closure query used when the diff
//! document is produced.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use bundlemerge_jsonpath::{flatten, FileOp, PathExpr};

use crate::bundle::read_json;
use crate::compare::FileDiff;
use crate::depend::{AnchorRecord, DependencyIndex, DocSide, SKIP_ATTRIBUTES};
use crate::error::EngineError;
use crate::fileset::{FileActionKind, FileMergeAction};
use crate::PAGES_PREFIX;

// ── String helpers over parsed paths ──────────────────────────────────────

/// The `~file~` token of a path, or empty.
fn file_key_of(s: &str) -> String {
    PathExpr::parse(s)
        .ok()
        .and_then(|e| e.file)
        .unwrap_or_default()
}

/// The leading file facet of a path (`A~f~`, `D~f~` or `~f~`), or empty.
fn file_prefix_of(s: &str) -> String {
    let Ok(expr) = PathExpr::parse(s) else {
        return String::new();
    };
    let Some(file) = expr.file else {
        return String::new();
    };
    let action = match expr.file_op {
        Some(FileOp::Add) => "A",
        Some(FileOp::Delete) => "D",
        None => "",
    };
    format!("{action}~{file}~")
}

fn has_file_op(s: &str) -> bool {
    PathExpr::parse(s).is_ok_and(|e| e.file_op.is_some())
}

/// Flattened form of a path string; empty input and parse failures map to
/// empty.
fn flat_of(s: &str, omit_op: bool) -> String {
    if s.is_empty() {
        return String::new();
    }
    match PathExpr::parse(s) {
        Ok(expr) => flatten(&expr, omit_op),
        Err(_) => String::new(),
    }
}

// ── Seeding ───────────────────────────────────────────────────────────────

/// Register the whole-file dependency of an added or deleted entry:
/// the file stem (for pages, the page identifier) binds to a file-action
/// path.
fn seed_file_action(
    index: &mut DependencyIndex,
    kind: FileActionKind,
    file_key: &str,
    file_name: &str,
) {
    let prefix = match kind {
        FileActionKind::Add => "A",
        FileActionKind::Delete => "D",
        // Binary entries present on both sides keep copy semantics.
        FileActionKind::Merge => "A",
    };
    match file_key.strip_prefix(PAGES_PREFIX) {
        Some(stem) => {
            let path = format!("{prefix}~{file_name}~$");
            index.add_dependent(stem, &path, &path, file_key);
        }
        None => {
            let path = format!("{prefix}~{file_name}~$");
            index.add_dependent(file_key, &path, &path, file_key);
        }
    }
}

/// Invert add/delete when looking from the destination document.
fn action_for_side(kind: FileActionKind, side: DocSide) -> FileActionKind {
    match (kind, side) {
        (FileActionKind::Add, DocSide::Destination) => FileActionKind::Delete,
        (FileActionKind::Delete, DocSide::Destination) => FileActionKind::Add,
        (kind, _) => kind,
    }
}

/// Build one side's global identifier index. Added/deleted files bind
/// their stem to a whole-file action path; merged JSON files resolve the
/// node each edit addresses. Deletion edits resolve against the side that
/// still holds the object, hence the `other` index.
fn build_dependence_paths(
    side: DocSide,
    dir1: &Path,
    dir2: &Path,
    actions: &[FileMergeAction],
    index: &mut DependencyIndex,
    other: &mut DependencyIndex,
) -> Result<(), EngineError> {
    for action in actions {
        let file_name = action.file_name();
        let kind = action_for_side(action.action, side);

        if !action.is_json() {
            if !action.is_directory {
                seed_file_action(index, kind, &action.file_key, &file_name);
            }
            continue;
        }

        if kind != FileActionKind::Merge {
            seed_file_action(index, kind, &action.file_key, &file_name);
            continue;
        }

        let diffs = match side {
            DocSide::Source => &action.file_diff.src_to_dst_diff,
            DocSide::Destination => &action.file_diff.dst_to_src_diff,
        };
        if diffs.is_empty() {
            continue;
        }
        let path1 = dir1.join(&file_name);
        let path2 = dir2.join(&file_name);
        if !path1.exists() || !path2.exists() {
            continue;
        }
        let doc1 = read_json(&path1)?;
        let doc2 = read_json(&path2)?;

        for (key, reference) in diffs {
            if flat_of(key, false).starts_with('-') {
                other.resolve_dependencies(&action.file_key, &file_name, key, reference, &doc2);
            } else {
                index.resolve_dependencies(&action.file_key, &file_name, key, reference, &doc1);
            }
        }
    }
    Ok(())
}

// ── Expansion ─────────────────────────────────────────────────────────────

/// Per-file identifier snapshot used while expanding.
struct FileObjIndex {
    file_key: String,
    file_ext: String,
    dep_obj_src: BTreeMap<String, Vec<AnchorRecord>>,
    dep_obj_dst: BTreeMap<String, Vec<AnchorRecord>>,
}

impl FileObjIndex {
    fn for_side(&self, side: DocSide) -> &BTreeMap<String, Vec<AnchorRecord>> {
        match side {
            DocSide::Source => &self.dep_obj_src,
            DocSide::Destination => &self.dep_obj_dst,
        }
    }
}

/// Join one file's identifier anchors against the global index, following
/// cross-file edges recursively. Each file is visited at most once per
/// expansion (the stop set breaks reference cycles). Returns dependent
/// path records to adopt into the file's `dep_path`.
fn expand_file(
    side: DocSide,
    file_key: &str,
    global: &DependencyIndex,
    local_obj: &BTreeMap<String, Vec<AnchorRecord>>,
    files: &BTreeMap<String, FileObjIndex>,
    stop: &mut BTreeSet<String>,
) -> Vec<(String, AnchorRecord)> {
    let mut out = Vec::new();

    for (id, local_anchors) in local_obj {
        let Some(global_anchors) = global.dep_obj.get(id) else {
            continue;
        };
        for local in local_anchors {
            for remote in global_anchors {
                if remote.file_key != file_key {
                    out.push((
                        local.path.clone(),
                        AnchorRecord {
                            path: remote.path.clone(),
                            ref_path: remote.ref_path.clone(),
                            file_key: String::new(),
                        },
                    ));

                    let Some(info) = files.get(&remote.file_key) else {
                        continue;
                    };
                    if stop.contains(&info.file_key) {
                        continue;
                    }
                    stop.insert(file_key.to_string());
                    let sub = expand_file(
                        side,
                        &info.file_key,
                        global,
                        info.for_side(side),
                        files,
                        stop,
                    );
                    for (sub_key, record) in sub {
                        let routed = if sub_key.starts_with('~')
                            || sub_key.starts_with('A')
                            || sub_key.starts_with('D')
                        {
                            sub_key
                        } else {
                            format!("~{}{}~{sub_key}", info.file_key, info.file_ext)
                        };
                        out.push((routed, record));
                    }
                } else {
                    let path = flat_of(&remote.path, false);
                    if path.is_empty() {
                        continue;
                    }
                    out.push((
                        local.path.clone(),
                        AnchorRecord {
                            path,
                            ref_path: flat_of(&remote.ref_path, false),
                            file_key: String::new(),
                        },
                    ));
                }
            }
        }
    }

    out
}

/// Build both global indices and expand every file's dependency paths.
/// Must run to completion before any merge executor starts; the resulting
/// indices are read-only afterwards.
pub fn proceed_dependencies(
    dir1: &Path,
    dir2: &Path,
    actions: &mut [FileMergeAction],
) -> Result<(), EngineError> {
    let mut global_src = DependencyIndex::default();
    let mut global_dst = DependencyIndex::default();

    build_dependence_paths(
        DocSide::Source,
        dir1,
        dir2,
        actions,
        &mut global_src,
        &mut global_dst,
    )?;
    build_dependence_paths(
        DocSide::Destination,
        dir2,
        dir1,
        actions,
        &mut global_dst,
        &mut global_src,
    )?;

    let files: BTreeMap<String, FileObjIndex> = actions
        .iter()
        .map(|a| {
            (
                a.file_key.clone(),
                FileObjIndex {
                    file_key: a.file_key.clone(),
                    file_ext: a.file_ext.clone(),
                    dep_obj_src: a.file_diff.dep_src.dep_obj.clone(),
                    dep_obj_dst: a.file_diff.dep_dst.dep_obj.clone(),
                },
            )
        })
        .collect();

    for action in actions.iter_mut() {
        let local_src = action.file_diff.dep_src.dep_obj.clone();
        for (key, record) in expand_file(
            DocSide::Source,
            &action.file_key,
            &global_src,
            &local_src,
            &files,
            &mut BTreeSet::new(),
        ) {
            let slot = action.file_diff.dep_src.dep_path.entry(key).or_default();
            if !slot.contains(&record) {
                slot.push(record);
            }
        }

        let local_dst = action.file_diff.dep_dst.dep_obj.clone();
        for (key, record) in expand_file(
            DocSide::Destination,
            &action.file_key,
            &global_dst,
            &local_dst,
            &files,
            &mut BTreeSet::new(),
        ) {
            let slot = action.file_diff.dep_dst.dep_path.entry(key).or_default();
            if !slot.contains(&record) {
                slot.push(record);
            }
        }
    }
    Ok(())
}

// ── Per-edit closure query ────────────────────────────────────────────────

/// Collect into `out` every dependent `(path, anchor)` pair that must be
/// co-applied with the edit at `key`, recursing through newly produced
/// paths. Expansions taken from the destination side are marked with the
/// `R` reverse prefix for the merge executor to invert.
pub fn find_matching(
    side: DocSide,
    file_name: &str,
    key: &str,
    dep_path_1: &BTreeMap<String, Vec<AnchorRecord>>,
    dep_path_2: &BTreeMap<String, Vec<AnchorRecord>>,
    out: &mut BTreeMap<String, String>,
) {
    // Primitive-valued attribute families cannot host references.
    if SKIP_ATTRIBUTES.iter().any(|attr| key.contains(attr)) {
        return;
    }

    let flat_with_op = flat_of(key, false);
    if flat_with_op.is_empty() {
        return;
    }

    // A deletion's dependencies live on the side that still holds the
    // object.
    if flat_with_op.starts_with('-') && side == DocSide::Source {
        find_matching(
            DocSide::Destination,
            file_name,
            key,
            dep_path_2,
            dep_path_1,
            out,
        );
        return;
    }

    // Resequencing dependencies belong to the child elements; file-level
    // actions address the whole document.
    if flat_with_op.starts_with('^') || has_file_op(key) {
        return;
    }

    let flat_match = flat_of(key, true);

    for (dep_key, anchors) in dep_path_1 {
        let flat_key = flat_of(dep_key, true);
        if flat_key != flat_match && !flat_key.starts_with(&flat_match) {
            continue;
        }
        for record in anchors {
            let mut new_key = record.path.clone();
            let target_file = file_key_of(&new_key);

            // Edits within the same subtree are already covered, except
            // for resequencing anchors.
            if target_file.is_empty() && !dep_key.starts_with('^') {
                continue;
            }
            if target_file == file_name {
                continue;
            }

            let source_prefix = file_prefix_of(dep_key);
            if !source_prefix.is_empty() && target_file.is_empty() {
                new_key = format!("{source_prefix}{new_key}");
            }

            let marked = match side {
                DocSide::Destination => format!("R{new_key}"),
                DocSide::Source => new_key.clone(),
            };
            if out.contains_key(&marked) {
                continue;
            }

            // Lost references inside other page files resolve on their
            // own during merge; only whole-file actions cross into pages.
            let crosses_pages = file_key_of(&new_key).starts_with(PAGES_PREFIX);
            if crosses_pages && !has_file_op(&new_key) {
                continue;
            }

            out.insert(marked, record.ref_path.clone());
            find_matching(side, file_name, &new_key, dep_path_1, dep_path_2, out);
        }
    }
}

/// Augment each file's source edit set with its dependency closure, and
/// give page additions and deletions their bookkeeping edits: the
/// whole-file action, the `document.json` page table, and the `meta.json`
/// pages-and-artboards entry.
pub fn produce_diff_with_dependencies(actions: &mut [FileMergeAction]) {
    for action in actions.iter_mut() {
        let file_name = action.file_name();
        let keys: Vec<String> = action.file_diff.src_to_dst_diff.keys().cloned().collect();
        let mut found = BTreeMap::new();
        for key in &keys {
            find_matching(
                DocSide::Source,
                &file_name,
                key,
                &action.file_diff.dep_src.dep_path,
                &action.file_diff.dep_dst.dep_path,
                &mut found,
            );
        }
        action.file_diff.src_to_dst_diff.extend(found);

        if action.file_diff.src_to_dst_diff.is_empty() {
            continue;
        }
        if let Some(stem) = action.file_key.strip_prefix(PAGES_PREFIX) {
            if matches!(action.action, FileActionKind::Add | FileActionKind::Delete) {
                let file_action = crate::fileset::build_file_action(action.action, &file_name);
                action
                    .file_diff
                    .src_to_dst_diff
                    .insert(file_action.clone(), file_action);
                action.file_diff.src_to_dst_diff.insert(
                    "~document.json~$[\"pages\"]".to_string(),
                    "~document.json~$[\"pages\"]".to_string(),
                );
                match action.action {
                    FileActionKind::Add => {
                        action.file_diff.src_to_dst_diff.insert(
                            format!("~meta.json~+$[\"pagesAndArtboards\"][\"{stem}\"]"),
                            "~meta.json~$[\"pagesAndArtboards\"]".to_string(),
                        );
                    }
                    FileActionKind::Delete => {
                        action.file_diff.src_to_dst_diff.insert(
                            format!("~meta.json~-$[\"pagesAndArtboards\"][\"{stem}\"]"),
                            String::new(),
                        );
                    }
                    FileActionKind::Merge => {}
                }
            }
        }
    }
}

/// Seed the diff record of an added or deleted page file: the page stem
/// becomes a dependency object anchored at the document root, and the
/// root itself becomes the edit.
pub fn file_dependent_object(
    diff: &mut FileDiff,
    kind: FileActionKind,
    file_key: &str,
    side: DocSide,
) {
    let Some(stem) = file_key.strip_prefix(PAGES_PREFIX) else {
        return;
    };
    let anchor = vec![AnchorRecord {
        path: "$".to_string(),
        ref_path: String::new(),
        file_key: String::new(),
    }];
    match side {
        DocSide::Source => {
            diff.dep_src.dep_obj.insert(stem.to_string(), anchor);
            match kind {
                FileActionKind::Add => {
                    diff.src_to_dst_diff.insert("$".into(), "$".into());
                }
                FileActionKind::Delete => {
                    diff.src_to_dst_diff.insert("-$".into(), String::new());
                }
                FileActionKind::Merge => {}
            }
        }
        DocSide::Destination => {
            diff.dep_dst.dep_obj.insert(stem.to_string(), anchor);
            match kind {
                FileActionKind::Add => {
                    diff.dst_to_src_diff.insert("-$".into(), String::new());
                }
                FileActionKind::Delete => {
                    diff.dst_to_src_diff.insert("$".into(), "$".into());
                }
                FileActionKind::Merge => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchors(entries: &[(&str, &[(&str, &str)])]) -> BTreeMap<String, Vec<AnchorRecord>> {
        entries
            .iter()
            .map(|(key, records)| {
                (
                    key.to_string(),
                    records
                        .iter()
                        .map(|(path, ref_path)| AnchorRecord {
                            path: path.to_string(),
                            ref_path: ref_path.to_string(),
                            file_key: String::new(),
                        })
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn skip_list_attributes_do_not_expand() {
        let deps = anchors(&[(
            r#"$["layers"][0]["frame"]"#,
            &[("~meta.json~$[\"x\"]", "$")],
        )]);
        let mut out = BTreeMap::new();
        find_matching(
            DocSide::Source,
            "pages/p.json",
            r#"$["layers"][0]["frame"]["x"]"#,
            &deps,
            &BTreeMap::new(),
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn ancestor_edit_pulls_descendant_dependencies() {
        let deps = anchors(&[(
            r#"$["layers"][2]["style"]"#,
            &[(
                "~meta.json~+$[\"pagesAndArtboards\"][\"X\"]",
                "$[\"pagesAndArtboards\"]",
            )],
        )]);
        let mut out = BTreeMap::new();
        find_matching(
            DocSide::Source,
            "pages/p.json",
            r#"$["layers"][2]"#,
            &deps,
            &BTreeMap::new(),
            &mut out,
        );
        // The edit addresses an ancestor of the registered subtree: the
        // child's cross-file dependency travels with it.
        assert_eq!(
            out.get("~meta.json~+$[\"pagesAndArtboards\"][\"X\"]")
                .map(String::as_str),
            Some("$[\"pagesAndArtboards\"]")
        );
    }

    #[test]
    fn sequence_markers_and_file_actions_do_not_expand() {
        let deps = anchors(&[("$", &[("~meta.json~$", "$")])]);
        let mut out = BTreeMap::new();
        find_matching(
            DocSide::Source,
            "f.json",
            r#"^$["layers"]"#,
            &deps,
            &BTreeMap::new(),
            &mut out,
        );
        assert!(out.is_empty());
        find_matching(
            DocSide::Source,
            "f.json",
            "A~pages/x.json~$",
            &deps,
            &BTreeMap::new(),
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn deletions_expand_on_the_destination_side() {
        let dst_deps = anchors(&[(
            r#"-$["layers"][1]"#,
            &[("~meta.json~-$[\"pagesAndArtboards\"][\"Z\"]", "")],
        )]);
        let mut out = BTreeMap::new();
        find_matching(
            DocSide::Source,
            "pages/p.json",
            r#"-$["layers"][1]"#,
            &BTreeMap::new(),
            &dst_deps,
            &mut out,
        );
        // Swapped to the destination index, so the result is R-marked.
        assert_eq!(
            out.get("R~meta.json~-$[\"pagesAndArtboards\"][\"Z\"]")
                .map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn same_file_paths_are_not_duplicated() {
        let deps = anchors(&[(r#"$["uses"]"#, &[(r#"$["uses"]["other"]"#, "$")])]);
        let mut out = BTreeMap::new();
        find_matching(
            DocSide::Source,
            "document.json",
            r#"$["uses"]"#,
            &deps,
            &BTreeMap::new(),
            &mut out,
        );
        // Intra-file, non-resequence anchors are skipped.
        assert!(out.is_empty());
    }

    #[test]
    fn page_file_references_are_limited_to_file_actions() {
        let deps = anchors(&[(
            r#"$["uses"]"#,
            &[
                ("~pages/other.json~$[\"layers\"][0]", "$"),
                ("A~pages/other.json~$", "A~pages/other.json~$"),
            ],
        )]);
        let mut out = BTreeMap::new();
        find_matching(
            DocSide::Source,
            "document.json",
            r#"$["uses"]"#,
            &deps,
            &BTreeMap::new(),
            &mut out,
        );
        assert!(!out.contains_key("~pages/other.json~$[\"layers\"][0]"));
        assert!(out.contains_key("A~pages/other.json~$"));
    }

    #[test]
    fn file_dependent_object_seeds_root_edits() {
        let mut diff = FileDiff::default();
        file_dependent_object(
            &mut diff,
            FileActionKind::Add,
            "pages/9E4C",
            DocSide::Source,
        );
        file_dependent_object(
            &mut diff,
            FileActionKind::Add,
            "pages/9E4C",
            DocSide::Destination,
        );
        assert_eq!(diff.src_to_dst_diff.get("$").map(String::as_str), Some("$"));
        assert_eq!(diff.dst_to_src_diff.get("-$").map(String::as_str), Some(""));
        assert_eq!(diff.dep_src.dep_obj["9E4C"][0].path, "$");
    }

    #[test]
    fn non_page_files_are_not_seeded() {
        let mut diff = FileDiff::default();
        file_dependent_object(&mut diff, FileActionKind::Add, "document", DocSide::Source);
        assert!(diff.src_to_dst_diff.is_empty());
    }
}
