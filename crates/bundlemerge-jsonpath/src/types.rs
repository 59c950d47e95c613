//! Structured representation of a path expression.

/// One step of a path, from the root downwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Mapping child, `["key"]`.
    Key(String),
    /// Sequence element by index, `[3]`. Kept signed so that a negative
    /// index surfaces as an out-of-bounds navigation error rather than a
    /// parse error.
    Index(i64),
    /// Sequence element by identity predicate, `[@do_objectID='X']`.
    Predicate { key: String, value: String },
}

/// Edit operator carried by a path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditOp {
    /// No prefix: overwrite the addressed value.
    #[default]
    Set,
    /// `+`: the addressed value is added.
    Add,
    /// `-`: the addressed value is deleted.
    Delete,
    /// `^`: the addressed sequence is reordered.
    Resequence,
}

/// Whole-file action carried by an `A`/`D` prefix on a file token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Add,
    Delete,
}

/// A fully parsed path expression.
///
/// The five orthogonal facets of the textual form each get their own
/// field; prefix sniffing on strings never happens past the parser.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathExpr {
    /// Leading `R`: the merge executor must invert the operator and swap
    /// the documents before applying.
    pub reverse: bool,
    /// `A`/`D` file action, if any.
    pub file_op: Option<FileOp>,
    /// `~file~` token, if any. Always `/`-separated.
    pub file: Option<String>,
    /// The edit operator.
    pub op: EditOp,
    /// Steps from the root. Empty means the document root itself.
    pub steps: Vec<Step>,
}

impl PathExpr {
    /// A bare `$` with no prefixes.
    pub fn root() -> Self {
        PathExpr::default()
    }

    /// True when the expression addresses the document root.
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// The last step, if the path is not the root.
    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Steps of the parent path (everything but the last step).
    pub fn parent_steps(&self) -> &[Step] {
        match self.steps.len() {
            0 => &[],
            n => &self.steps[..n - 1],
        }
    }
}
