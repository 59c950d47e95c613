//! Extended JSON-path expressions for design-document bundles.
//!
//! The textual form is a JSON-pointer-like syntax extended with
//! self-describing prefixes:
//!
//! ```text
//! $["layers"][1]                 plain addressing
//! $["layers"][1]["frame"]        property of an element
//! ^$["layers"]                   the order of the sequence changed
//! +$["layers"][3]                element at index 3 is added
//! -$["layers"][4]                element at index 4 is deleted
//! $["layers"][@do_objectID='X']  element located by identity predicate
//! ~pages/9E4C.json~$["layers"]   path anchored in another file
//! A~pages/9E4C.json~$            the whole file is added
//! D~pages/9E4C.json~$            the whole file is deleted
//! R+$["layers"][3]               reverse marker: invert before applying
//! ```
//!
//! A path string parses once into a [`PathExpr`] record with one explicit
//! field per facet; the string form exists only at the serialisation
//! boundary.

use thiserror::Error;

mod navigate;
mod parse;
mod print;
mod types;

pub use navigate::{resolve, resolve_steps, resolve_with, step_index, Visitor};
pub use print::{flatten, path_depth, reverse_action};
pub use types::{EditOp, FileOp, PathExpr, Step};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("bad path syntax: {0}")]
    Syntax(String),
    #[error("unclosed file token")]
    UnclosedFileToken,
    #[error("expected a mapping")]
    MapExpected,
    #[error("expected a sequence")]
    ArrayExpected,
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("sequence index out of bounds: {0}")]
    OutOfBounds(i64),
    #[error("no sequence element matches [@{key}='{value}']")]
    PredicateUnmatched { key: String, value: String },
}
