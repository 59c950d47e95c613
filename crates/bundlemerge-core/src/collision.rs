//! Collision reporting for three-way merges.
//!
//! A collision is an identifier touched by both branches. The engine
//! surfaces them with the paths involved on each side and otherwise keeps
//! the deterministic phase ordering; resolution is left to the caller.

use std::collections::BTreeMap;

use serde::Serialize;

use bundlemerge_jsonpath::{PathExpr, Step};

use crate::fileset::BundleDiff;

/// One identifier edited on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub local_paths: Vec<String>,
    pub remote_paths: Vec<String>,
}

/// All collisions of a three-way merge, keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollisionReport {
    pub collisions: BTreeMap<String, Collision>,
}

impl CollisionReport {
    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Identifiers a diff touches: every relocated object plus every identity
/// predicate mentioned in an edit path, mapped to the paths involved.
fn touched_identifiers(diff: &BundleDiff) -> BTreeMap<String, Vec<String>> {
    let mut touched: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut record = |id: &str, path: &str| {
        let paths = touched.entry(id.to_string()).or_default();
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    };

    for action in &diff.merge_actions {
        for (id, path) in &action.file_diff.src_obj_relocate {
            record(id, path);
        }
        for (id, path) in &action.file_diff.dst_obj_relocate {
            record(id, path);
        }
        for key in action.file_diff.src_to_dst_diff.keys() {
            let Ok(expr) = PathExpr::parse(key) else {
                continue;
            };
            for step in &expr.steps {
                if let Step::Predicate { value, .. } = step {
                    record(value, key);
                }
            }
        }
    }
    touched
}

/// Intersect the identifiers touched by both branches.
pub fn detect(local: &BundleDiff, remote: &BundleDiff) -> CollisionReport {
    let local_touched = touched_identifiers(local);
    let remote_touched = touched_identifiers(remote);

    let mut report = CollisionReport::default();
    for (id, local_paths) in local_touched {
        if let Some(remote_paths) = remote_touched.get(&id) {
            report.collisions.insert(
                id,
                Collision {
                    local_paths,
                    remote_paths: remote_paths.clone(),
                },
            );
        }
    }
    report
}
