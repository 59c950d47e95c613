//! Cross-file dependency tracking.
//!
//! Objects in a bundle refer to each other by stable identifiers: object
//! UUIDs, `images/<sha1>` asset references and `pages/<uuid>` page
//! references. This module recognises identifiers, and maintains the two
//! per-document indices used by dependency expansion:
//!
//! - `dep_obj`: identifier → anchor records (paths that mention it);
//! - `dep_path`: edit path → anchor records that must be co-applied.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use bundlemerge_jsonpath::{resolve_with, PathExpr, Step};

use crate::{DEFAULT_IDENTITY_KEY, PAGES_PREFIX, SYMBOL_ID_KEY};

mod expand;
pub use expand::{
    file_dependent_object, find_matching, proceed_dependencies, produce_diff_with_dependencies,
};

/// Which document of a comparison an index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocSide {
    Source,
    Destination,
}

/// Attribute names that never host references; edits under them are not
/// expanded.
pub const SKIP_ATTRIBUTES: [&str; 4] = [
    "resizingConstraint",
    "archivedAttributedString",
    "points",
    "frame",
];

static ID_FORMATS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        // Canonical UUID with version nibble 1-5.
        Regex::new("^[a-z0-9]{8}-[a-z0-9]{4}-[1-5][a-z0-9]{3}-[a-z0-9]{4}-[a-z0-9]{12}$")
            .expect("uuid format"),
        // Bundled image reference.
        Regex::new("^images/[a-z0-9]{40}$").expect("image format"),
        // Bundled page reference.
        Regex::new("^pages/[a-z0-9]{8}-[a-z0-9]{4}-[1-5][a-z0-9]{3}-[a-z0-9]{4}-[a-z0-9]{12}$")
            .expect("page format"),
    ]
});

/// True when the string matches one of the reference formats.
pub fn is_identifier_str(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    ID_FORMATS.iter().any(|re| re.is_match(&lower))
}

/// True when the value is a string matching one of the reference formats.
pub fn is_identifier(value: &Value) -> bool {
    value.as_str().is_some_and(is_identifier_str)
}

/// A path that must travel together with an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnchorRecord {
    /// The dependent path itself.
    pub path: String,
    /// The anchor path it attaches to.
    pub ref_path: String,
    /// The file owning the anchor; empty for intra-file anchors.
    pub file_key: String,
}

/// Per-document dependency index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyIndex {
    pub dep_obj: BTreeMap<String, Vec<AnchorRecord>>,
    pub dep_path: BTreeMap<String, Vec<AnchorRecord>>,
}

impl DependencyIndex {
    pub fn is_empty(&self) -> bool {
        self.dep_obj.is_empty() && self.dep_path.is_empty()
    }

    /// Bind an identifier-valued leaf to the path of its containing
    /// object. Returns whether the value was an identifier.
    pub fn add_object_anchor(&mut self, value: &Value, container_path: &str) -> bool {
        let Some(s) = value.as_str() else {
            return false;
        };
        if !is_identifier_str(s) {
            return false;
        }
        let key = s.strip_prefix(PAGES_PREFIX).unwrap_or(s);
        self.dep_obj.entry(key.to_string()).or_default().push(AnchorRecord {
            path: container_path.to_string(),
            ref_path: String::new(),
            file_key: String::new(),
        });
        true
    }

    /// Bind an identifier to an explicit (path, anchor, file) triple.
    pub fn add_dependent(&mut self, key: &str, ref_path: &str, path: &str, file_key: &str) {
        self.dep_obj.entry(key.to_string()).or_default().push(AnchorRecord {
            path: path.to_string(),
            ref_path: ref_path.to_string(),
            file_key: file_key.to_string(),
        });
    }

    /// Bind a dependent path record to an edit path.
    pub fn add_path_anchor(&mut self, key: &str, ref_path: &str, path: &str) {
        self.dep_path.entry(key.to_string()).or_default().push(AnchorRecord {
            path: path.to_string(),
            ref_path: ref_path.to_string(),
            file_key: String::new(),
        });
    }

    /// Walk a subtree recording every identifier-valued leaf against the
    /// path of the container holding it.
    pub fn index_subtree(&mut self, value: &Value, path: &str) {
        if !self.traverse(value, path) {
            self.add_object_anchor(value, path);
        }
    }

    fn traverse(&mut self, value: &Value, path: &str) -> bool {
        match value {
            Value::Object(map) => {
                for (key, item) in map {
                    let child = format!("{path}[\"{key}\"]");
                    if !self.traverse(item, &child) {
                        self.add_object_anchor(item, path);
                    }
                }
                true
            }
            Value::Array(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    let child = format!("{path}[{i}]");
                    if !self.traverse(item, &child) {
                        self.add_object_anchor(item, path);
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Visit the node addressed by an edit and bind every identifier it
    /// carries (`symbolID`, the identity key, or an identifier-valued
    /// mapping key) to the edit's paths. Total: navigation misses are
    /// traced and ignored.
    pub fn resolve_dependencies(
        &mut self,
        file_key: &str,
        file_name: &str,
        key: &str,
        reference: &str,
        doc: &Value,
    ) {
        if reference.is_empty() {
            return;
        }
        let expr = match PathExpr::parse(key) {
            Ok(expr) => expr,
            Err(err) => {
                log::warn!("unparseable edit path {key:?}: {err}");
                return;
            }
        };

        let path1 = format!("~{file_name}~{key}");
        let path2 = format!("~{file_name}~{reference}");

        let result = resolve_with(doc, &expr, &mut |value, _prev, current| {
            let Some(map) = value.as_object() else {
                return true;
            };
            if let Some(sid) = map.get(SYMBOL_ID_KEY).and_then(Value::as_str) {
                self.add_dependent(sid, &path2, &path1, file_key);
            }
            match map.get(DEFAULT_IDENTITY_KEY).and_then(Value::as_str) {
                Some(oid) => self.add_dependent(oid, &path2, &path1, file_key),
                None => {
                    if let Some(Step::Key(k)) = current {
                        if is_identifier_str(k) {
                            self.add_dependent(k, &path2, &path1, file_key);
                        }
                    }
                }
            }
            true
        });

        if let Err(err) = result {
            log::debug!("dependency walk stopped for {key:?} in {file_name}: {err}");
        }
    }
}
