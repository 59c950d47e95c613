//! Rendering, flattening and reversal of path expressions.

use std::fmt;

use crate::types::{EditOp, FileOp, PathExpr, Step};
use crate::PathError;

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(k) => write!(f, "[\"{k}\"]"),
            Step::Index(i) => write!(f, "[{i}]"),
            Step::Predicate { key, value } => write!(f, "[@{key}='{value}']"),
        }
    }
}

impl fmt::Display for PathExpr {
    /// Render the canonical textual form, prefixes included.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reverse {
            write!(f, "R")?;
        }
        match self.file_op {
            Some(FileOp::Add) => write!(f, "A")?,
            Some(FileOp::Delete) => write!(f, "D")?,
            None => {}
        }
        if let Some(file) = &self.file {
            write!(f, "~{file}~")?;
        }
        match self.op {
            EditOp::Set => {}
            EditOp::Add => write!(f, "+")?,
            EditOp::Delete => write!(f, "-")?,
            EditOp::Resequence => write!(f, "^")?,
        }
        write!(f, "$")?;
        for step in &self.steps {
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Canonical key-only form: file action and token stripped, the edit
/// operator kept unless `omit_op`. Used as a map key and for prefix
/// matching during dependency expansion.
pub fn flatten(expr: &PathExpr, omit_op: bool) -> String {
    let stripped = PathExpr {
        reverse: false,
        file_op: None,
        file: None,
        op: if omit_op { EditOp::Set } else { expr.op },
        steps: expr.steps.clone(),
    };
    stripped.to_string()
}

/// Path depth, measured in steps. Value edits are ordered ascending by
/// this, deletions and resequencings descending.
pub fn path_depth(expr: &PathExpr) -> usize {
    expr.steps.len()
}

/// Invert a `(source, target)` edit pair:
///
/// | input            | reversed                  |
/// |------------------|---------------------------|
/// | `A~f~p`          | `D~f~p`, same             |
/// | `D~f~p`          | `A~f~p`, same             |
/// | `+p`             | `-p`, empty               |
/// | `-p`             | empty, empty              |
/// | set / resequence | swap(source, target)      |
///
/// A leading `R` on either side is stripped first. The empty string is the
/// deletion sentinel and reverses to itself.
pub fn reverse_action(src: &str, dst: &str) -> Result<(String, String), PathError> {
    if src.is_empty() {
        return Ok((String::new(), String::new()));
    }

    let mut p1 = PathExpr::parse(src)?;
    p1.reverse = false;

    match p1.file_op {
        Some(FileOp::Add) => {
            p1.file_op = Some(FileOp::Delete);
            let s = p1.to_string();
            return Ok((s.clone(), s));
        }
        Some(FileOp::Delete) => {
            p1.file_op = Some(FileOp::Add);
            let s = p1.to_string();
            return Ok((s.clone(), s));
        }
        None => {}
    }

    match p1.op {
        EditOp::Add => {
            p1.op = EditOp::Delete;
            Ok((p1.to_string(), String::new()))
        }
        EditOp::Delete => Ok((String::new(), String::new())),
        EditOp::Set | EditOp::Resequence => {
            // Swap: the target path becomes the source, keeping the
            // original source's file token; the source flattens into the
            // new target.
            let mut p2 = if dst.is_empty() {
                PathExpr::root()
            } else {
                PathExpr::parse(dst)?
            };
            p2.reverse = false;
            p2.file = p1.file.take();
            p2.file_op = None;
            let new_dst = flatten(&p1, false);
            Ok((p2.to_string(), new_dst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(s: &str) -> String {
        PathExpr::parse(s).unwrap().to_string()
    }

    #[test]
    fn render_is_normalised_parse() {
        for s in [
            "$",
            r#"$["layers"][1]["frame"]"#,
            r#"+$["layers"][3]"#,
            r#"-$["layers"][4]"#,
            r#"^$["layers"]"#,
            "A~pages/9E4C.json~$",
            "D~pages/9E4C.json~$",
            r#"~meta.json~+$["pagesAndArtboards"]["X"]"#,
            r#"R+$["layers"][3]"#,
            r#"$["layers"][@do_objectID='AB-12']"#,
        ] {
            assert_eq!(roundtrip(s), s);
        }
    }

    #[test]
    fn bare_chain_renders_canonical() {
        assert_eq!(roundtrip("layers.0.frame"), r#"$["layers"][0]["frame"]"#);
    }

    #[test]
    fn flatten_strips_file_facets() {
        let p = PathExpr::parse(r#"~meta.json~+$["pages"]["X"]"#).unwrap();
        assert_eq!(flatten(&p, false), r#"+$["pages"]["X"]"#);
        assert_eq!(flatten(&p, true), r#"$["pages"]["X"]"#);

        let p = PathExpr::parse(r#"A~pages/9E.json~$"#).unwrap();
        assert_eq!(flatten(&p, false), "$");
    }

    #[test]
    fn depth() {
        assert_eq!(path_depth(&PathExpr::parse("$").unwrap()), 0);
        assert_eq!(
            path_depth(&PathExpr::parse(r#"$["a"][0]["b"]"#).unwrap()),
            3
        );
    }

    #[test]
    fn reverse_file_actions() {
        let (s, d) = reverse_action("A~pages/9E.json~$", "A~pages/9E.json~$").unwrap();
        assert_eq!(s, "D~pages/9E.json~$");
        assert_eq!(d, s);

        let (s, d) = reverse_action("D~pages/9E.json~$", "D~pages/9E.json~$").unwrap();
        assert_eq!(s, "A~pages/9E.json~$");
        assert_eq!(d, s);
    }

    #[test]
    fn reverse_add_becomes_delete() {
        let (s, d) = reverse_action(r#"+$["c"]"#, "$").unwrap();
        assert_eq!(s, r#"-$["c"]"#);
        assert_eq!(d, "");
    }

    #[test]
    fn reverse_delete_becomes_empty() {
        let (s, d) = reverse_action(r#"-$["b"]"#, "").unwrap();
        assert_eq!(s, "");
        assert_eq!(d, "");
        // Idempotent thereafter.
        assert_eq!(reverse_action(&s, &d).unwrap(), (String::new(), String::new()));
    }

    #[test]
    fn reverse_set_swaps() {
        let (s, d) = reverse_action(r#"$["a"]["x"]"#, r#"$["b"]["y"]"#).unwrap();
        assert_eq!(s, r#"$["b"]["y"]"#);
        assert_eq!(d, r#"$["a"]["x"]"#);
        // An involution for set edits.
        assert_eq!(
            reverse_action(&s, &d).unwrap(),
            (r#"$["a"]["x"]"#.to_string(), r#"$["b"]["y"]"#.to_string())
        );
    }

    #[test]
    fn reverse_set_moves_file_token() {
        let (s, d) =
            reverse_action(r#"~meta.json~$["pages"]"#, r#"$["pages"]"#).unwrap();
        assert_eq!(s, r#"~meta.json~$["pages"]"#);
        assert_eq!(d, r#"$["pages"]"#);
    }

    #[test]
    fn reverse_strips_r_marker() {
        let (s, d) = reverse_action(r#"R+$["layers"][3]"#, "$").unwrap();
        assert_eq!(s, r#"-$["layers"][3]"#);
        assert_eq!(d, "");
    }
}
