//! End-to-end pipelines over whole bundles.
//!
//! - [`diff_bundles`] computes the tagged-path diff of two bundles.
//! - [`merge_bundles`] applies a previously computed diff to a
//!   destination bundle (two-way merge).
//! - [`merge_bundles_three_way`] applies two diffs against a common base,
//!   running deletions from both branches as one union set.
//!
//! Sources of truth: the `src` bundle of a diff is the version whose
//! content wins; applying the diff's `src_to_dst_diff` onto the `dst`
//! bundle converges it on `src`.

use std::collections::BTreeSet;
use std::path::Path;

use bundlemerge_jsonpath::{flatten, reverse_action, FileOp, PathExpr};

use crate::bundle::{
    copy_entry, pack, read_json_or_empty, remove_entry, write_json, Workspace,
};
use crate::collision::{self, CollisionReport};
use crate::compare::{compare_documents, CompareOptions};
use crate::depend::{
    file_dependent_object, proceed_dependencies, produce_diff_with_dependencies, DocSide,
};
use crate::error::EngineError;
use crate::fileset::{file_set_change, scan_dir, BundleDiff, FileActionKind, FileMergeAction};
use crate::merge::{
    confirm_deletions, mark_deletions, merge_file, plan_edits, run_resequences, run_values,
};

// ── Diff pipeline ─────────────────────────────────────────────────────────

/// Compute the structural diff between two bundles (archives or unpacked
/// directories). `merge(diff, src, dst)` converges `dst` on `src`.
pub fn diff_bundles(
    src: &Path,
    dst: &Path,
    opts: &CompareOptions,
) -> Result<BundleDiff, EngineError> {
    let ws_src = Workspace::open(src)?;
    let ws_dst = Workspace::open(dst)?;

    let entries_src = scan_dir(ws_src.path())?;
    let entries_dst = scan_dir(ws_dst.path())?;
    let mut diff = file_set_change(&entries_src, &entries_dst);

    compare_json_entries(&mut diff, ws_src.path(), ws_dst.path(), opts)?;
    proceed_dependencies(ws_src.path(), ws_dst.path(), &mut diff.merge_actions)?;
    produce_diff_with_dependencies(&mut diff.merge_actions);
    Ok(diff)
}

/// Run the structural comparator over every `.json` union entry.
fn compare_json_entries(
    diff: &mut BundleDiff,
    dir_src: &Path,
    dir_dst: &Path,
    opts: &CompareOptions,
) -> Result<(), EngineError> {
    for action in &mut diff.merge_actions {
        if !action.is_json() {
            continue;
        }
        let file_name = action.file_name();
        let doc_src = read_json_or_empty(&dir_src.join(&file_name))?;
        let doc_dst = read_json_or_empty(&dir_dst.join(&file_name))?;
        action.file_diff = compare_documents(&doc_src, &doc_dst, opts);

        if action.action != FileActionKind::Merge {
            file_dependent_object(
                &mut action.file_diff,
                action.action,
                &action.file_key,
                DocSide::Source,
            );
            file_dependent_object(
                &mut action.file_diff,
                action.action,
                &action.file_key,
                DocSide::Destination,
            );
        }
    }
    Ok(())
}

// ── Edit regrouping ───────────────────────────────────────────────────────

fn new_action(file_name: &str, identity_key: &str) -> FileMergeAction {
    let (file_key, file_ext) = match Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
    {
        Some(ext) => (
            file_name[..file_name.len() - ext.len() - 1].to_string(),
            format!(".{ext}"),
        ),
        None => (file_name.to_string(), String::new()),
    };
    let mut action = FileMergeAction {
        file_key,
        file_ext,
        ..FileMergeAction::default()
    };
    action.file_diff.seq_key = identity_key.to_string();
    action
}

/// Regroup a diff document's edits by target file. Cross-file paths are
/// routed to the file their token names, `R`-marked edits are inverted
/// first, and whole-file action paths become the target's copy action.
fn build_file_actions(diff: &BundleDiff, identity_key: &str) -> Vec<FileMergeAction> {
    let mut grouped: std::collections::BTreeMap<String, FileMergeAction> = Default::default();

    for action in &diff.merge_actions {
        let name = action.file_name();
        let entry = grouped
            .entry(name.clone())
            .or_insert_with(|| new_action(&name, identity_key));
        entry.is_directory = action.is_directory;
        entry.action = action.action;
        if !action.file_diff.seq_key.is_empty() {
            entry.file_diff.seq_key = action.file_diff.seq_key.clone();
        }
    }

    for action in &diff.merge_actions {
        for (key, reference) in &action.file_diff.src_to_dst_diff {
            let (key, reference) = if key.starts_with('R') {
                match reverse_action(key, reference) {
                    Ok(pair) => pair,
                    Err(err) => {
                        log::warn!("cannot invert reverse-marked edit {key:?}: {err}");
                        continue;
                    }
                }
            } else {
                (key.clone(), reference.clone())
            };
            if key.is_empty() {
                continue;
            }
            let expr = match PathExpr::parse(&key) {
                Ok(expr) => expr,
                Err(err) => {
                    log::warn!("skipping edit with bad path syntax {key:?}: {err}");
                    continue;
                }
            };

            let file_name = expr.file.clone().unwrap_or_else(|| action.file_name());
            let entry = grouped
                .entry(file_name.clone())
                .or_insert_with(|| new_action(&file_name, identity_key));

            match expr.file_op {
                Some(FileOp::Add) => {
                    entry.action = FileActionKind::Add;
                    continue;
                }
                Some(FileOp::Delete) => {
                    entry.action = FileActionKind::Delete;
                    continue;
                }
                None => {}
            }

            let flat_ref = match PathExpr::parse(&reference) {
                Ok(expr) if !reference.is_empty() => flatten(&expr, false),
                _ => String::new(),
            };
            entry
                .file_diff
                .src_to_dst_diff
                .insert(flatten(&expr, false), flat_ref);
        }
    }

    grouped.into_values().collect()
}

/// Carry out a regrouped file-level action; returns true when the entry
/// is fully handled (no structural merge left to run).
fn apply_file_action(
    action: &FileMergeAction,
    src_root: &Path,
    dst_root: &Path,
) -> Result<bool, EngineError> {
    match action.action {
        FileActionKind::Add if !action.is_directory => {
            copy_entry(src_root, dst_root, &action.file_name())?;
            Ok(true)
        }
        FileActionKind::Delete if !action.is_directory => {
            remove_entry(dst_root, &action.file_name())?;
            Ok(true)
        }
        _ => Ok(!action.is_json()),
    }
}

// ── Two-way merge pipeline ────────────────────────────────────────────────

/// Apply a diff to the destination bundle and pack the result as `out`.
/// The source bundle supplies the content for set/add edits.
pub fn merge_bundles(
    diff: &BundleDiff,
    src: &Path,
    dst: &Path,
    out: &Path,
    opts: &CompareOptions,
) -> Result<(), EngineError> {
    let ws_src = Workspace::open(src)?;
    let ws_dst = Workspace::open_mut(dst)?;

    for action in build_file_actions(diff, &opts.identity_key) {
        if apply_file_action(&action, ws_src.path(), ws_dst.path())? {
            continue;
        }
        if action.file_diff.src_to_dst_diff.is_empty() {
            continue;
        }
        let file_name = action.file_name();
        let src_doc = read_json_or_empty(&ws_src.file(&file_name))?;
        let mut dst_doc = read_json_or_empty(&ws_dst.file(&file_name))?;
        merge_file(
            &src_doc,
            &mut dst_doc,
            &action.file_diff.src_to_dst_diff,
            &action.file_diff.seq_key,
        );
        write_json(&ws_dst.file(&file_name), &dst_doc)?;
    }

    pack(ws_dst.path(), out)
}

// ── Three-way merge pipeline ──────────────────────────────────────────────

/// Apply the diffs of two branches against their common base and pack the
/// result as `out`. Value edits run per branch; deletions discovered by
/// either branch are marked and confirmed as one union set, so a property
/// deleted on one side is not resurrected by the other side's unrelated
/// edits. Returns the identifier collision report.
pub fn merge_bundles_three_way(
    diff_local: &BundleDiff,
    diff_remote: &BundleDiff,
    base: &Path,
    local: &Path,
    remote: &Path,
    out: &Path,
    opts: &CompareOptions,
) -> Result<CollisionReport, EngineError> {
    let ws_base = Workspace::open_mut(base)?;
    let ws_local = Workspace::open(local)?;
    let ws_remote = Workspace::open(remote)?;

    let report = collision::detect(diff_local, diff_remote);
    if !report.is_empty() {
        log::warn!(
            "{} identifier collision(s) between branches",
            report.collisions.len()
        );
    }

    let local_actions = build_file_actions(diff_local, &opts.identity_key);
    let remote_actions = build_file_actions(diff_remote, &opts.identity_key);

    for (actions, ws) in [(&local_actions, &ws_local), (&remote_actions, &ws_remote)] {
        for action in actions.iter() {
            apply_file_action(action, ws.path(), ws_base.path())?;
        }
    }

    let merge_files: BTreeSet<String> = local_actions
        .iter()
        .chain(remote_actions.iter())
        .filter(|a| {
            a.is_json()
                && a.action == FileActionKind::Merge
                && !a.file_diff.src_to_dst_diff.is_empty()
        })
        .map(|a| a.file_name())
        .collect();

    for file_name in merge_files {
        let local_action = local_actions.iter().find(|a| a.file_name() == file_name);
        let remote_action = remote_actions.iter().find(|a| a.file_name() == file_name);

        let local_plan = local_action
            .map(|a| plan_edits(&a.file_diff.src_to_dst_diff))
            .unwrap_or_default();
        let remote_plan = remote_action
            .map(|a| plan_edits(&a.file_diff.src_to_dst_diff))
            .unwrap_or_default();

        let identity = [local_action, remote_action]
            .into_iter()
            .flatten()
            .map(|a| a.file_diff.seq_key.clone())
            .find(|k| !k.is_empty())
            .unwrap_or_else(|| opts.identity_key.clone());

        let local_doc = read_json_or_empty(&ws_local.file(&file_name))?;
        let remote_doc = read_json_or_empty(&ws_remote.file(&file_name))?;
        let mut base_doc = read_json_or_empty(&ws_base.file(&file_name))?;

        run_values(&local_doc, &mut base_doc, &local_plan);
        run_values(&remote_doc, &mut base_doc, &remote_plan);

        let mut union = local_plan.clone();
        union.absorb_deletes(&remote_plan);
        mark_deletions(&mut base_doc, &union);

        run_resequences(&local_doc, &mut base_doc, &identity, &local_plan);
        run_resequences(&remote_doc, &mut base_doc, &identity, &remote_plan);

        confirm_deletions(&mut base_doc, &union);
        write_json(&ws_base.file(&file_name), &base_doc)?;
    }

    pack(ws_base.path(), out)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regrouping_routes_cross_file_edits() {
        let mut diff = BundleDiff::default();
        let mut action = new_action("pages/p.json", "do_objectID");
        action.file_diff.src_to_dst_diff.insert(
            "~document.json~$[\"pages\"]".into(),
            "~document.json~$[\"pages\"]".into(),
        );
        action
            .file_diff
            .src_to_dst_diff
            .insert("$[\"layers\"][0]".into(), "$[\"layers\"][0]".into());
        diff.merge_actions.push(action);

        let grouped = build_file_actions(&diff, "do_objectID");
        let by_name: std::collections::BTreeMap<_, _> =
            grouped.iter().map(|a| (a.file_name(), a)).collect();
        assert!(by_name["document.json"]
            .file_diff
            .src_to_dst_diff
            .contains_key("$[\"pages\"]"));
        assert!(by_name["pages/p.json"]
            .file_diff
            .src_to_dst_diff
            .contains_key("$[\"layers\"][0]"));
    }

    #[test]
    fn regrouping_inverts_reverse_marked_edits() {
        let mut diff = BundleDiff::default();
        let mut action = new_action("pages/p.json", "do_objectID");
        action.file_diff.src_to_dst_diff.insert(
            "R~meta.json~+$[\"pagesAndArtboards\"][\"Z\"]".into(),
            "~meta.json~$[\"pagesAndArtboards\"]".into(),
        );
        diff.merge_actions.push(action);

        let grouped = build_file_actions(&diff, "do_objectID");
        let meta = grouped
            .iter()
            .find(|a| a.file_name() == "meta.json")
            .unwrap();
        // The destination-side add inverts into a deletion of the entry.
        assert_eq!(
            meta.file_diff
                .src_to_dst_diff
                .get("-$[\"pagesAndArtboards\"][\"Z\"]")
                .map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn regrouping_turns_file_tokens_into_actions() {
        let mut diff = BundleDiff::default();
        let mut action = new_action("pages/p.json", "do_objectID");
        action.action = FileActionKind::Add;
        action
            .file_diff
            .src_to_dst_diff
            .insert("A~pages/p.json~$".into(), "A~pages/p.json~$".into());
        action.file_diff.src_to_dst_diff.insert("$".into(), "$".into());
        diff.merge_actions.push(action);

        let grouped = build_file_actions(&diff, "do_objectID");
        let page = grouped
            .iter()
            .find(|a| a.file_name() == "pages/p.json")
            .unwrap();
        assert_eq!(page.action, FileActionKind::Add);
    }

    #[test]
    fn regrouped_reverse_of_file_add_is_file_delete() {
        let (s, d) = reverse_action("A~pages/p.json~$", "A~pages/p.json~$").unwrap();
        assert_eq!(s, "D~pages/p.json~$");
        assert_eq!(d, s);
        let mut diff = BundleDiff::default();
        let mut action = new_action("document.json", "do_objectID");
        action
            .file_diff
            .src_to_dst_diff
            .insert("RA~pages/p.json~$".into(), "A~pages/p.json~$".into());
        diff.merge_actions.push(action);
        let grouped = build_file_actions(&diff, "do_objectID");
        let page = grouped
            .iter()
            .find(|a| a.file_name() == "pages/p.json")
            .unwrap();
        assert_eq!(page.action, FileActionKind::Delete);
    }

    #[test]
    fn bad_paths_do_not_break_regrouping() {
        let mut diff = BundleDiff::default();
        let mut action = new_action("document.json", "do_objectID");
        action
            .file_diff
            .src_to_dst_diff
            .insert("~unterminated".into(), "$".into());
        action
            .file_diff
            .src_to_dst_diff
            .insert("$[\"ok\"]".into(), "$[\"ok\"]".into());
        diff.merge_actions.push(action);
        let grouped = build_file_actions(&diff, "do_objectID");
        let doc = grouped
            .iter()
            .find(|a| a.file_name() == "document.json")
            .unwrap();
        assert_eq!(doc.file_diff.src_to_dst_diff.len(), 1);
    }
}
