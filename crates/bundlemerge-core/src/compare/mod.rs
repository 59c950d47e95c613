//! Structural comparison of two JSON documents.
//!
//! The comparator walks both trees in lockstep and emits symmetric tagged
//! path sets: every difference is recorded once against the source
//! document and once against the destination, so either direction can be
//! executed as a merge. Sequences are aligned by identity key before
//! per-element recursion; identity-preserving relocations are recorded
//! separately from value edits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use bundlemerge_jsonpath::Step;

use crate::depend::DependencyIndex;
use crate::{CLASS_KEY, CONTAINER_CLASSES, DEFAULT_IDENTITY_KEY};

pub mod sequence;

use sequence::{align, ABSENT};

/// Comparator configuration.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    /// Property used to pair sequence elements across snapshots.
    pub identity_key: String,
}

impl Default for CompareOptions {
    fn default() -> Self {
        CompareOptions {
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
        }
    }
}

/// Per-file diff record: both edit directions, relocation maps, the
/// identity key used for alignment, and the dependency indices built
/// alongside (never serialised).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub src_to_dst_diff: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dst_to_src_diff: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub src_obj_relocate: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dst_obj_relocate: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seq_key: String,
    #[serde(skip)]
    pub dep_src: DependencyIndex,
    #[serde(skip)]
    pub dep_dst: DependencyIndex,
}

impl FileDiff {
    pub fn new(identity_key: &str) -> Self {
        FileDiff {
            seq_key: identity_key.to_string(),
            ..FileDiff::default()
        }
    }

    /// True when neither direction carries an edit or relocation.
    pub fn is_empty(&self) -> bool {
        self.src_to_dst_diff.is_empty()
            && self.dst_to_src_diff.is_empty()
            && self.src_obj_relocate.is_empty()
            && self.dst_obj_relocate.is_empty()
    }
}

/// Compare two documents rooted at `$`, producing the full per-file diff.
pub fn compare_documents(doc1: &Value, doc2: &Value, opts: &CompareOptions) -> FileDiff {
    let mut ctx = CompareContext {
        identity_key: &opts.identity_key,
        diff: FileDiff::new(&opts.identity_key),
    };

    let mut p1 = Vec::new();
    let mut p2 = Vec::new();
    match (doc1, doc2) {
        (Value::Object(m1), Value::Object(m2)) => ctx.compare_maps(m1, m2, &mut p1, &mut p2),
        _ => {
            if !ctx.compare_values(doc1, doc2, &mut p1, &mut p2) {
                ctx.record_set(&p1, &p2);
            }
        }
    }
    ctx.diff
}

/// Comparison state threaded explicitly through the recursion: the
/// identity key and the accumulating diff record.
struct CompareContext<'a> {
    identity_key: &'a str,
    diff: FileDiff,
}

/// Render a step list as a rooted path string.
fn render(steps: &[Step]) -> String {
    use std::fmt::Write;
    let mut out = String::from("$");
    for step in steps {
        let _ = write!(out, "{step}");
    }
    out
}

fn child_key(steps: &[Step], key: &str) -> String {
    format!("{}[\"{key}\"]", render(steps))
}

fn child_index(steps: &[Step], index: usize) -> String {
    format!("{}[{index}]", render(steps))
}

impl CompareContext<'_> {
    /// Dispatch on shape. Returns `false` when the values differ in a way
    /// the caller must record as a set edit (primitive inequality or
    /// shape mismatch); containers record their own edits and return
    /// `true`.
    fn compare_values(
        &mut self,
        v1: &Value,
        v2: &Value,
        p1: &mut Vec<Step>,
        p2: &mut Vec<Step>,
    ) -> bool {
        match (v1, v2) {
            (Value::Object(m1), Value::Object(m2)) => {
                self.compare_maps(m1, m2, p1, p2);
                true
            }
            (Value::Array(a1), Value::Array(a2)) => {
                self.compare_seqs(a1, a2, p1, p2);
                true
            }
            (a, b) if !a.is_object() && !a.is_array() && !b.is_object() && !b.is_array() => {
                // Numbers compare textually: the decoder preserves the
                // original notation, so 1.0 and 1.00 stay distinct.
                a == b
            }
            _ => false,
        }
    }

    fn record_set(&mut self, p1: &[Step], p2: &[Step]) {
        let s1 = render(p1);
        let s2 = render(p2);
        self.diff.src_to_dst_diff.insert(s1.clone(), s2.clone());
        self.diff.dst_to_src_diff.insert(s2, s1);
    }

    fn compare_maps(
        &mut self,
        m1: &Map<String, Value>,
        m2: &Map<String, Value>,
        p1: &mut Vec<Step>,
        p2: &mut Vec<Step>,
    ) {
        let id1 = m1.get(self.identity_key).and_then(Value::as_str);
        let id2 = m2.get(self.identity_key).and_then(Value::as_str);
        if let (Some(id1), Some(id2)) = (id1, id2) {
            if id1 != id2 || p1 != p2 {
                self.diff
                    .src_obj_relocate
                    .insert(id1.to_string(), render(p1));
                self.diff
                    .dst_obj_relocate
                    .insert(id2.to_string(), render(p2));
            }
        }

        let mut has_diff = false;
        for (key, item) in m1 {
            match m2.get(key) {
                Some(other) => {
                    p1.push(Step::Key(key.clone()));
                    p2.push(Step::Key(key.clone()));
                    if !self.compare_values(item, other, p1, p2) {
                        self.record_set(p1, p2);
                        has_diff = true;
                    }
                    p1.pop();
                    p2.pop();
                }
                None => {
                    let child = child_key(p1, key);
                    self.diff
                        .dst_to_src_diff
                        .insert(format!("-{child}"), String::new());
                    self.diff
                        .src_to_dst_diff
                        .insert(format!("+{child}"), render(p2));
                    has_diff = true;
                }
            }
        }
        if has_diff {
            for (key, item) in m1 {
                if key != self.identity_key {
                    self.diff.dep_src.index_subtree(item, &child_key(p1, key));
                }
            }
        }

        let mut has_diff = false;
        for key in m2.keys() {
            if !m1.contains_key(key) {
                let child = child_key(p2, key);
                self.diff
                    .src_to_dst_diff
                    .insert(format!("-{child}"), String::new());
                self.diff
                    .dst_to_src_diff
                    .insert(format!("+{child}"), render(p1));
                has_diff = true;
            }
        }
        if has_diff {
            for (key, item) in m2 {
                if key != self.identity_key {
                    self.diff.dep_dst.index_subtree(item, &child_key(p2, key));
                }
            }
        }
    }

    /// Step addressing a sequence element: top-level design containers
    /// (artboards, symbol masters) go by identity predicate so the edit
    /// survives resequencing; everything else by index.
    fn step_for(&self, element: &Value, index: usize) -> Step {
        if let Some(map) = element.as_object() {
            let is_container = map
                .get(CLASS_KEY)
                .and_then(Value::as_str)
                .is_some_and(|c| CONTAINER_CLASSES.contains(&c));
            if is_container {
                if let Some(id) = map.get(self.identity_key).and_then(Value::as_str) {
                    return Step::Predicate {
                        key: self.identity_key.to_string(),
                        value: id.to_string(),
                    };
                }
            }
        }
        Step::Index(index as i64)
    }

    fn compare_seqs(
        &mut self,
        a1: &[Value],
        a2: &[Value],
        p1: &mut Vec<Step>,
        p2: &mut Vec<Step>,
    ) {
        let (forward, backward) = align(self.identity_key, a1, a2);
        let mut order_changed = false;

        for (&i, &j) in &forward {
            if i as i64 != j {
                order_changed = true;
            }
            if j == ABSENT {
                p1.push(self.step_for(&a1[i], i));
                let elem1 = render(p1);
                p1.pop();
                self.diff
                    .dst_to_src_diff
                    .insert(format!("-{elem1}"), String::new());
                self.diff
                    .src_to_dst_diff
                    .insert(format!("+{elem1}"), render(p2));
                self.diff.dep_dst.add_path_anchor(
                    &format!("-{elem1}"),
                    &format!("^{}", render(p1)),
                    &format!("^{}", render(p2)),
                );
                self.diff.dep_src.index_subtree(&a1[i], &elem1);
            } else {
                let j = j as usize;
                p1.push(self.step_for(&a1[i], i));
                p2.push(self.step_for(&a2[j], j));
                if !self.compare_values(&a1[i], &a2[j], p1, p2) {
                    self.record_set(p1, p2);
                }
                p1.pop();
                p2.pop();
            }
        }

        for (&j, &i) in &backward {
            if j as i64 != i {
                order_changed = true;
            }
            if i == ABSENT {
                p2.push(self.step_for(&a2[j], j));
                let elem2 = render(p2);
                p2.pop();
                self.diff
                    .src_to_dst_diff
                    .insert(format!("-{elem2}"), String::new());
                self.diff
                    .dst_to_src_diff
                    .insert(format!("+{elem2}"), render(p1));
                self.diff.dep_src.add_path_anchor(
                    &format!("-{elem2}"),
                    &format!("^{}", render(p2)),
                    &format!("^{}", render(p1)),
                );
                self.diff.dep_dst.index_subtree(&a2[j], &elem2);
            }
        }

        // No identity on either side: fall back to positional comparison
        // under deep equality.
        if forward.is_empty() && backward.is_empty() && a1 != a2 {
            let shorter = a1.len().min(a2.len());
            for i in 0..shorter {
                p1.push(Step::Index(i as i64));
                p2.push(Step::Index(i as i64));
                if !self.compare_values(&a1[i], &a2[i], p1, p2) {
                    self.record_set(p1, p2);
                }
                let (e1, e2) = (render(p1), render(p2));
                p1.pop();
                p2.pop();
                self.diff.dep_src.index_subtree(&a1[i], &e1);
                self.diff.dep_dst.index_subtree(&a2[i], &e2);
            }
            for (i, item) in a1.iter().enumerate().skip(shorter) {
                let elem1 = child_index(p1, i);
                self.diff
                    .dst_to_src_diff
                    .insert(format!("-{elem1}"), String::new());
                self.diff
                    .src_to_dst_diff
                    .insert(format!("+{elem1}"), render(p2));
                self.diff.dep_src.index_subtree(item, &elem1);
            }
            for (i, item) in a2.iter().enumerate().skip(shorter) {
                let elem2 = child_index(p2, i);
                self.diff
                    .src_to_dst_diff
                    .insert(format!("-{elem2}"), String::new());
                self.diff
                    .dst_to_src_diff
                    .insert(format!("+{elem2}"), render(p1));
                self.diff.dep_dst.index_subtree(item, &elem2);
            }
        }

        if order_changed {
            let (s1, s2) = (render(p1), render(p2));
            self.diff
                .src_to_dst_diff
                .insert(format!("^{s1}"), format!("^{s2}"));
            self.diff
                .dst_to_src_diff
                .insert(format!("^{s2}"), format!("^{s1}"));
        }
    }
}
