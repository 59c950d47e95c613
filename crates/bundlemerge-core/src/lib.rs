//! Structural three-way diff and merge for design-document bundles.
//!
//! A bundle is a zip archive of JSON files plus binary assets. The engine
//! computes a semantic difference between two bundles as a set of tagged
//! path expressions, expands each edit with the cross-file paths needed to
//! keep references intact, and applies ordered edit sets to a destination
//! bundle for two-way and three-way merges.
//!
//! Pipeline entry points live in [`orchestrate`]:
//! [`orchestrate::diff_bundles`], [`orchestrate::merge_bundles`] and
//! [`orchestrate::merge_bundles_three_way`].

pub mod bundle;
pub mod collision;
pub mod compare;
pub mod depend;
pub mod error;
pub mod fileset;
pub mod merge;
pub mod orchestrate;

pub use compare::{CompareOptions, FileDiff};
pub use error::EngineError;
pub use fileset::{BundleDiff, FileActionKind, FileMergeAction};

/// Property used to recognise the "same" element across snapshots.
pub const DEFAULT_IDENTITY_KEY: &str = "do_objectID";

/// Class discriminator property.
pub const CLASS_KEY: &str = "_class";

/// `_class` values addressed by identity predicate rather than index.
pub const CONTAINER_CLASSES: [&str; 2] = ["artboard", "symbolMaster"];

/// Reference properties recognised when building the dependency index.
pub const SYMBOL_ID_KEY: &str = "symbolID";

/// Directory prefix stripped from file stems before they are used as
/// identifier keys.
pub const PAGES_PREFIX: &str = "pages/";
