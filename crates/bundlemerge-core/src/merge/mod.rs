//! Merge executor: applies tagged edits to a destination tree.
//!
//! Edits for one file run in four phases, in this order:
//!
//! 1. value edits, ascending path depth (a parent must exist before a
//!    child can be added into it);
//! 2. deletion marking, descending depth — sequence slots are nulled and
//!    mapping keys removed, so an outer deletion cannot invalidate the
//!    indices of a pending inner one;
//! 3. resequencing, descending depth (children reorder before their
//!    parent sequence is restructured);
//! 4. deletion confirmation: touched sequences compact by moving null
//!    sentinels to the tail and truncating.
//!
//! The contract is best-effort: a failed edit is logged and skipped, the
//! pipeline never aborts on a single stale path.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use bundlemerge_jsonpath::{
    flatten, path_depth, resolve_steps, reverse_action, step_index, EditOp, PathError, PathExpr,
    Step,
};

use crate::compare::sequence::{align, ABSENT};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("invalid merge action: {0}")]
    InvalidAction(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// How a sequence deletion is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Remove the element immediately (two-way merge without pending
    /// sibling edits would allow this; the pipelines use mark + sweep).
    Immediate,
    /// First phase: replace the element with a null sentinel.
    Mark,
    /// Second phase: compact the owning sequence.
    Sweep,
}

// ── Mutable navigation ────────────────────────────────────────────────────

/// Mutable counterpart of the navigator, used only by the executor.
fn value_at_mut<'a>(doc: &'a mut Value, steps: &[Step]) -> Result<&'a mut Value, PathError> {
    let mut current = doc;
    for step in steps {
        current = match step {
            Step::Key(key) => current
                .as_object_mut()
                .ok_or(PathError::MapExpected)?
                .get_mut(key)
                .ok_or_else(|| PathError::NotFound(key.clone()))?,
            _ => {
                let arr = current.as_array_mut().ok_or(PathError::ArrayExpected)?;
                let idx = step_index(arr, step)?;
                &mut arr[idx]
            }
        };
    }
    Ok(current)
}

// ── Individual operations ─────────────────────────────────────────────────

fn set_value(
    src: &Value,
    dst: &mut Value,
    src_expr: &PathExpr,
    dst_expr: &PathExpr,
) -> Result<(), MergeError> {
    let val = resolve_steps(src, &src_expr.steps)?.clone();
    if dst_expr.is_root() {
        *dst = val;
        return Ok(());
    }
    let parent = value_at_mut(dst, dst_expr.parent_steps())?;
    match dst_expr.last_step() {
        Some(Step::Key(_)) => {
            // The property name travels with the source path.
            let Some(Step::Key(key)) = src_expr.last_step() else {
                return Err(MergeError::InvalidAction(format!(
                    "set of {dst_expr} from non-mapping source {src_expr}"
                )));
            };
            parent
                .as_object_mut()
                .ok_or(PathError::MapExpected)?
                .insert(key.clone(), val);
        }
        Some(step) => {
            let arr = parent.as_array_mut().ok_or(PathError::ArrayExpected)?;
            let idx = step_index(arr, step)?;
            arr[idx] = val;
        }
        None => unreachable!("non-root path has a last step"),
    }
    Ok(())
}

fn add_value(
    src: &Value,
    dst: &mut Value,
    src_expr: &PathExpr,
    dst_expr: &PathExpr,
) -> Result<(), MergeError> {
    let val = resolve_steps(src, &src_expr.steps)?.clone();
    // The destination path of an add references the receiving container.
    let target = value_at_mut(dst, &dst_expr.steps)?;
    match src_expr.last_step() {
        Some(Step::Key(key)) => {
            target
                .as_object_mut()
                .ok_or(PathError::MapExpected)?
                .insert(key.clone(), val);
            Ok(())
        }
        Some(_) => {
            target
                .as_array_mut()
                .ok_or(PathError::ArrayExpected)?
                .push(val);
            Ok(())
        }
        None => Err(MergeError::InvalidAction(format!(
            "add with root source path into {dst_expr}"
        ))),
    }
}

fn delete_value(dst: &mut Value, dst_expr: &PathExpr, mode: DeleteMode) -> Result<(), MergeError> {
    if dst_expr.is_root() {
        // Whole-file deletions are handled at the file level.
        log::debug!("ignoring root deletion inside a document");
        return Ok(());
    }
    let parent = value_at_mut(dst, dst_expr.parent_steps())?;
    match dst_expr.last_step() {
        Some(Step::Key(key)) => {
            // Mapping keys go in the marking phase; the sweep finds the
            // key already gone, which is fine.
            parent
                .as_object_mut()
                .ok_or(PathError::MapExpected)?
                .remove(key);
            Ok(())
        }
        Some(step) => {
            let arr = parent.as_array_mut().ok_or(PathError::ArrayExpected)?;
            match mode {
                DeleteMode::Immediate => {
                    let idx = step_index(arr, step)?;
                    arr.remove(idx);
                }
                DeleteMode::Mark => {
                    let idx = step_index(arr, step)?;
                    arr[idx] = Value::Null;
                }
                DeleteMode::Sweep => compact(arr),
            }
            Ok(())
        }
        None => unreachable!("non-root path has a last step"),
    }
}

/// Move null sentinels to the tail and truncate, preserving the relative
/// order of the survivors.
pub fn compact(arr: &mut Vec<Value>) {
    let mut keep = 0;
    for i in 0..arr.len() {
        if !arr[i].is_null() {
            arr.swap(keep, i);
            keep += 1;
        }
    }
    arr.truncate(keep);
}

/// Apply a single tagged edit. An empty `src_path` marks a detached
/// deletion: the operator and addressing both come from `dst_path`.
pub fn apply_edit(
    src: &Value,
    dst: &mut Value,
    src_path: &str,
    dst_path: &str,
    mode: DeleteMode,
) -> Result<(), MergeError> {
    let dst_expr = PathExpr::parse(dst_path)?;
    let (op, src_expr) = if src_path.is_empty() {
        (dst_expr.op, dst_expr.clone())
    } else {
        let src_expr = PathExpr::parse(src_path)?;
        (src_expr.op, src_expr)
    };

    match op {
        EditOp::Resequence => Err(MergeError::InvalidAction(format!(
            "resequence edit {src_path:?} routed through the value path"
        ))),
        EditOp::Delete => delete_value(dst, &dst_expr, mode),
        EditOp::Add => add_value(src, dst, &src_expr, &dst_expr),
        EditOp::Set => set_value(src, dst, &src_expr, &dst_expr),
    }
}

/// Reorder the destination sequence at `dst_path` to match the identity
/// order of the source sequence at `src_path`. Destination elements
/// without a counterpart keep their relative order after the relocated
/// block.
pub fn apply_resequence(
    src: &Value,
    dst: &mut Value,
    identity_key: &str,
    src_path: &str,
    dst_path: &str,
) -> Result<(), MergeError> {
    let src_expr = PathExpr::parse(src_path)?;
    let dst_expr = PathExpr::parse(dst_path)?;
    if src_expr.op != EditOp::Resequence || dst_expr.op != EditOp::Resequence {
        return Err(MergeError::InvalidAction(format!(
            "{src_path:?} is not a resequence edit"
        )));
    }

    let src_arr = resolve_steps(src, &src_expr.steps)?
        .as_array()
        .ok_or(PathError::ArrayExpected)?
        .clone();
    let target = value_at_mut(dst, &dst_expr.steps)?;
    let arr = target.as_array_mut().ok_or(PathError::ArrayExpected)?;

    let (forward, _) = align(identity_key, &src_arr, arr);
    let mut old: Vec<Value> = std::mem::take(arr);
    let mut fresh = vec![Value::Null; old.len()];
    for (&i, &j) in &forward {
        if j == ABSENT {
            continue;
        }
        if i < fresh.len() {
            fresh[i] = std::mem::take(&mut old[j as usize]);
        } else {
            log::debug!("resequence target position {i} outside destination length");
        }
    }
    compact(&mut fresh);
    fresh.extend(old.into_iter().filter(|v| !v.is_null()));
    *arr = fresh;
    Ok(())
}

// ── Edit planning ─────────────────────────────────────────────────────────

/// Edits of one file, split by phase and pre-sorted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EditPlan {
    /// `(source, target)` value edits, ascending depth.
    pub values: Vec<(String, String)>,
    /// Detached deletion paths, descending depth.
    pub deletes: Vec<String>,
    /// `(source, target)` resequence edits, descending depth.
    pub reseq: Vec<(String, String)>,
}

impl EditPlan {
    /// True when every phase is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.deletes.is_empty() && self.reseq.is_empty()
    }

    /// Fold another plan's deletions in (three-way merges apply the union
    /// of both sides' deletions in a single pass).
    pub fn absorb_deletes(&mut self, other: &EditPlan) {
        for del in &other.deletes {
            if !self.deletes.contains(del) {
                self.deletes.push(del.clone());
            }
        }
        sort_descending(&mut self.deletes);
    }
}

fn sort_descending(paths: &mut [String]) {
    paths.sort_by_key(|p| {
        std::cmp::Reverse(PathExpr::parse(p).map(|e| path_depth(&e)).unwrap_or(0))
    });
}

/// True when `flat` addresses a strict descendant of `ancestor` (both in
/// key-only flattened form).
fn is_strict_descendant(flat: &str, ancestor: &str) -> bool {
    flat.len() > ancestor.len()
        && flat.starts_with(ancestor)
        && flat[ancestor.len()..].starts_with('[')
}

/// Split a per-file diff into the phased plan. `R`-marked keys are
/// inverted here via [`reverse_action`]; keys that reverse to nothing
/// drop out. An edit under a set or add of a whole container is subsumed
/// by it (the container copy already carries the child state) and drops
/// out too.
pub fn plan_edits(diffs: &BTreeMap<String, String>) -> EditPlan {
    struct Entry {
        key: String,
        reference: String,
        op: EditOp,
        depth: usize,
        flat: String,
    }

    let mut entries: Vec<Entry> = Vec::new();
    for (key, reference) in diffs {
        let (key, reference) = if key.starts_with('R') {
            match reverse_action(key, reference) {
                Ok((k, r)) => (k, r),
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
        if expr.file_op.is_some() {
            // Whole-file actions are handled by the orchestrator.
            continue;
        }
        entries.push(Entry {
            flat: flatten(&expr, true),
            depth: path_depth(&expr),
            op: expr.op,
            key,
            reference,
        });
    }

    let containers: Vec<String> = entries
        .iter()
        .filter(|e| {
            !e.reference.is_empty() && matches!(e.op, EditOp::Set | EditOp::Add)
        })
        .map(|e| e.flat.clone())
        .collect();
    entries.retain(|e| !containers.iter().any(|c| is_strict_descendant(&e.flat, c)));

    let mut plan = EditPlan::default();
    let mut value_depth: Vec<(usize, String, String)> = Vec::new();
    for entry in entries {
        if entry.reference.is_empty() {
            plan.deletes.push(entry.key);
        } else if entry.op == EditOp::Resequence {
            plan.reseq.push((entry.key, entry.reference));
        } else {
            value_depth.push((entry.depth, entry.key, entry.reference));
        }
    }

    value_depth.sort_by_key(|(depth, _, _)| *depth);
    plan.values = value_depth.into_iter().map(|(_, k, r)| (k, r)).collect();
    sort_descending(&mut plan.deletes);
    plan.reseq.sort_by_key(|(k, _)| {
        std::cmp::Reverse(PathExpr::parse(k).map(|e| path_depth(&e)).unwrap_or(0))
    });
    plan
}

// ── Phase runners ─────────────────────────────────────────────────────────

/// Phase 1: value edits.
pub fn run_values(src: &Value, dst: &mut Value, plan: &EditPlan) {
    for (key, reference) in &plan.values {
        if let Err(err) = apply_edit(src, dst, key, reference, DeleteMode::Mark) {
            log::warn!("skipping value edit {key:?}: {err}");
        }
    }
}

/// Phase 2: null out sequence slots, remove mapping keys.
pub fn mark_deletions(dst: &mut Value, plan: &EditPlan) {
    for del in &plan.deletes {
        if let Err(err) = apply_edit(&Value::Null, dst, "", del, DeleteMode::Mark) {
            log::warn!("skipping deletion mark {del:?}: {err}");
        }
    }
}

/// Phase 3: reorder sequences to the source's identity order.
pub fn run_resequences(src: &Value, dst: &mut Value, identity_key: &str, plan: &EditPlan) {
    for (key, reference) in &plan.reseq {
        if let Err(err) = apply_resequence(src, dst, identity_key, key, reference) {
            log::warn!("skipping resequence {key:?}: {err}");
        }
    }
}

/// Phase 4: compact every sequence touched by a deletion.
pub fn confirm_deletions(dst: &mut Value, plan: &EditPlan) {
    for del in &plan.deletes {
        if let Err(err) = apply_edit(&Value::Null, dst, "", del, DeleteMode::Sweep) {
            // Expected for elements whose parent was itself removed.
            log::debug!("deletion sweep on {del:?}: {err}");
        }
    }
}

/// Run all four phases of a per-file edit set against a destination tree.
pub fn merge_file(
    src: &Value,
    dst: &mut Value,
    diffs: &BTreeMap<String, String>,
    identity_key: &str,
) {
    let plan = plan_edits(diffs);
    run_values(src, dst, &plan);
    mark_deletions(dst, &plan);
    run_resequences(src, dst, identity_key, &plan);
    confirm_deletions(dst, &plan);
}
