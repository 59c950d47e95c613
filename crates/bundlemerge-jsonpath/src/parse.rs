//! Parsing of the textual path form.
//!
//! The parser accepts a pragmatic superset of the canonical form: bare
//! property chains such as `layers.0.frame` are understood and normalise
//! to `["layers"][0]["frame"]`. Prefixes are recognised in the fixed
//! order `R`, `A`/`D`, `~file~`, operator, `$`.

use crate::types::{EditOp, FileOp, PathExpr, Step};
use crate::PathError;

impl PathExpr {
    /// Parse a path expression. The empty string is legal and denotes the
    /// document root.
    pub fn parse(input: &str) -> Result<PathExpr, PathError> {
        let mut s = input;
        let mut expr = PathExpr::default();

        if let Some(rest) = s.strip_prefix('R') {
            expr.reverse = true;
            s = rest;
        }

        if let Some(rest) = s.strip_prefix('A') {
            expr.file_op = Some(FileOp::Add);
            s = rest;
        } else if let Some(rest) = s.strip_prefix('D') {
            expr.file_op = Some(FileOp::Delete);
            s = rest;
        }

        if let Some(rest) = s.strip_prefix('~') {
            let end = rest.find('~').ok_or(PathError::UnclosedFileToken)?;
            expr.file = Some(rest[..end].replace('\\', "/"));
            s = &rest[end + 1..];
        }

        match s.bytes().next() {
            Some(b'+') => {
                expr.op = EditOp::Add;
                s = &s[1..];
            }
            Some(b'-') => {
                expr.op = EditOp::Delete;
                s = &s[1..];
            }
            Some(b'^') => {
                expr.op = EditOp::Resequence;
                s = &s[1..];
            }
            _ => {}
        }

        s = s.strip_prefix('$').unwrap_or(s);

        while !s.is_empty() {
            if s.starts_with('[') {
                let (step, rest) = parse_bracketed(s)?;
                expr.steps.push(step);
                s = rest;
            } else {
                let end = s.find('[').unwrap_or(s.len());
                let bare = &s[..end];
                s = &s[end..];
                for piece in bare.split('.') {
                    if piece.is_empty() {
                        continue;
                    }
                    expr.steps.push(bare_step(piece));
                }
            }
        }

        Ok(expr)
    }
}

/// Parse one `[...]` step at the head of `s`, returning it and the rest.
fn parse_bracketed(s: &str) -> Result<(Step, &str), PathError> {
    let body = &s[1..];

    if let Some(quoted) = body.strip_prefix('"') {
        let end = quoted
            .find("\"]")
            .ok_or_else(|| PathError::Syntax(s.to_string()))?;
        return Ok((Step::Key(quoted[..end].to_string()), &quoted[end + 2..]));
    }

    if let Some(pred) = body.strip_prefix('@') {
        let eq = pred
            .find('=')
            .ok_or_else(|| PathError::Syntax(s.to_string()))?;
        let key = pred[..eq].to_string();
        let rest = pred[eq + 1..]
            .strip_prefix('\'')
            .ok_or_else(|| PathError::Syntax(s.to_string()))?;
        let close = rest
            .find('\'')
            .ok_or_else(|| PathError::Syntax(s.to_string()))?;
        let value = rest[..close].to_string();
        let rest = rest[close + 1..]
            .strip_prefix(']')
            .ok_or_else(|| PathError::Syntax(s.to_string()))?;
        return Ok((Step::Predicate { key, value }, rest));
    }

    let end = body
        .find(']')
        .ok_or_else(|| PathError::Syntax(s.to_string()))?;
    let idx: i64 = body[..end]
        .parse()
        .map_err(|_| PathError::Syntax(s.to_string()))?;
    Ok((Step::Index(idx), &body[end + 1..]))
}

/// A bare (unbracketed) segment: integers become index steps, everything
/// else a mapping key.
fn bare_step(piece: &str) -> Step {
    match piece.parse::<i64>() {
        Ok(idx) => Step::Index(idx),
        Err(_) => Step::Key(piece.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_root() {
        let p = PathExpr::parse("").unwrap();
        assert!(p.is_root());
        assert_eq!(p.op, EditOp::Set);
    }

    #[test]
    fn bare_dollar_is_root() {
        assert!(PathExpr::parse("$").unwrap().is_root());
    }

    #[test]
    fn plain_steps() {
        let p = PathExpr::parse(r#"$["layers"][1]["frame"]"#).unwrap();
        assert_eq!(
            p.steps,
            vec![
                Step::Key("layers".into()),
                Step::Index(1),
                Step::Key("frame".into())
            ]
        );
    }

    #[test]
    fn bare_chain_normalises() {
        let p = PathExpr::parse("layers.0.frame").unwrap();
        assert_eq!(
            p.steps,
            vec![
                Step::Key("layers".into()),
                Step::Index(0),
                Step::Key("frame".into())
            ]
        );
    }

    #[test]
    fn mixed_bare_and_bracketed() {
        let p = PathExpr::parse(r#"$["layers"]0["frame"]"#).unwrap();
        assert_eq!(p.steps.len(), 3);
        assert_eq!(p.steps[1], Step::Index(0));
    }

    #[test]
    fn operators() {
        assert_eq!(PathExpr::parse(r#"+$["a"]"#).unwrap().op, EditOp::Add);
        assert_eq!(PathExpr::parse(r#"-$["a"]"#).unwrap().op, EditOp::Delete);
        assert_eq!(
            PathExpr::parse(r#"^$["a"]"#).unwrap().op,
            EditOp::Resequence
        );
    }

    #[test]
    fn file_token_with_action() {
        let p = PathExpr::parse("A~pages/9E4C.json~$").unwrap();
        assert_eq!(p.file_op, Some(FileOp::Add));
        assert_eq!(p.file.as_deref(), Some("pages/9E4C.json"));
        assert!(p.is_root());

        let p = PathExpr::parse(r#"D~meta.json~$["pagesAndArtboards"]"#).unwrap();
        assert_eq!(p.file_op, Some(FileOp::Delete));
        assert_eq!(p.steps.len(), 1);
    }

    #[test]
    fn file_token_then_operator() {
        let p = PathExpr::parse(r#"~meta.json~+$["pagesAndArtboards"]["X"]"#).unwrap();
        assert_eq!(p.file.as_deref(), Some("meta.json"));
        assert_eq!(p.op, EditOp::Add);
        assert_eq!(p.steps.len(), 2);
    }

    #[test]
    fn reverse_marker() {
        let p = PathExpr::parse(r#"R+$["layers"][3]"#).unwrap();
        assert!(p.reverse);
        assert_eq!(p.op, EditOp::Add);
    }

    #[test]
    fn predicate_step() {
        let p = PathExpr::parse(r#"$["layers"][@do_objectID='AB-12']"#).unwrap();
        assert_eq!(
            p.steps[1],
            Step::Predicate {
                key: "do_objectID".into(),
                value: "AB-12".into()
            }
        );
    }

    #[test]
    fn unclosed_file_token() {
        assert_eq!(
            PathExpr::parse("~meta.json$").unwrap_err(),
            PathError::UnclosedFileToken
        );
    }

    #[test]
    fn malformed_brackets() {
        assert!(matches!(
            PathExpr::parse(r#"$["a"#),
            Err(PathError::Syntax(_))
        ));
        assert!(matches!(
            PathExpr::parse("$[zz]"),
            Err(PathError::Syntax(_))
        ));
        assert!(matches!(
            PathExpr::parse(r#"$[@k=v]"#),
            Err(PathError::Syntax(_))
        ));
    }

    #[test]
    fn negative_index_parses() {
        // Rejected later by the navigator as out-of-bounds, not here.
        let p = PathExpr::parse("$[-1]").unwrap();
        assert_eq!(p.steps, vec![Step::Index(-1)]);
    }
}
