//! Read-only navigation of a JSON tree along a parsed path.
//!
//! The navigator never mutates; callers stage mutations elsewhere.
//! Resolution is O(depth).

use serde_json::Value;

use crate::types::{PathExpr, Step};
use crate::PathError;

/// Visitor callback: `(value, parent_step, current_step)`, invoked at the
/// root (both steps `None`) and after every descent. Returning `false`
/// short-circuits the walk at the current value.
pub type Visitor<'a> = dyn FnMut(&Value, Option<&Step>, Option<&Step>) -> bool + 'a;

/// Resolve the value addressed by `expr`.
pub fn resolve<'a>(doc: &'a Value, expr: &PathExpr) -> Result<&'a Value, PathError> {
    resolve_steps(doc, &expr.steps)
}

/// Resolve a bare step sequence against a value.
pub fn resolve_steps<'a>(doc: &'a Value, steps: &[Step]) -> Result<&'a Value, PathError> {
    let mut current = doc;
    for step in steps {
        current = lookup(current, step)?;
    }
    Ok(current)
}

/// Resolve the value addressed by `expr`, invoking `visitor` along the way.
pub fn resolve_with<'a>(
    doc: &'a Value,
    expr: &PathExpr,
    visitor: &mut dyn FnMut(&Value, Option<&Step>, Option<&Step>) -> bool,
) -> Result<&'a Value, PathError> {
    if !visitor(doc, None, None) {
        return Ok(doc);
    }

    let mut current = doc;
    let mut prev: Option<&Step> = None;
    for step in &expr.steps {
        current = lookup(current, step)?;
        if !visitor(current, prev, Some(step)) {
            return Ok(current);
        }
        prev = Some(step);
    }
    Ok(current)
}

/// Resolve one step against a value.
fn lookup<'a>(value: &'a Value, step: &Step) -> Result<&'a Value, PathError> {
    match step {
        Step::Key(key) => {
            let map = value.as_object().ok_or(PathError::MapExpected)?;
            map.get(key).ok_or_else(|| PathError::NotFound(key.clone()))
        }
        Step::Index(_) | Step::Predicate { .. } => {
            let arr = value.as_array().ok_or(PathError::ArrayExpected)?;
            let idx = step_index(arr, step)?;
            Ok(&arr[idx])
        }
    }
}

/// Resolve a sequence step to a concrete index: bounds-checks plain
/// indices, scans for identity-predicate matches.
pub fn step_index(arr: &[Value], step: &Step) -> Result<usize, PathError> {
    match step {
        Step::Index(i) => {
            if *i < 0 || *i as usize >= arr.len() {
                return Err(PathError::OutOfBounds(*i));
            }
            Ok(*i as usize)
        }
        Step::Predicate { key, value } => arr
            .iter()
            .position(|e| e.get(key.as_str()).and_then(Value::as_str) == Some(value.as_str()))
            .ok_or_else(|| PathError::PredicateUnmatched {
                key: key.clone(),
                value: value.clone(),
            }),
        Step::Key(_) => Err(PathError::ArrayExpected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> PathExpr {
        PathExpr::parse(s).unwrap()
    }

    #[test]
    fn resolve_root() {
        let doc = json!({"a": 1});
        assert_eq!(resolve(&doc, &path("$")).unwrap(), &doc);
    }

    #[test]
    fn resolve_nested() {
        let doc = json!({"frame": {"x": 5}});
        assert_eq!(
            resolve(&doc, &path(r#"$["frame"]["x"]"#)).unwrap(),
            &json!(5)
        );
    }

    #[test]
    fn resolve_index() {
        let doc = json!({"layers": [10, 20, 30]});
        assert_eq!(
            resolve(&doc, &path(r#"$["layers"][2]"#)).unwrap(),
            &json!(30)
        );
    }

    #[test]
    fn resolve_predicate() {
        let doc = json!({"layers": [
            {"do_objectID": "X", "v": 1},
            {"do_objectID": "Y", "v": 2},
        ]});
        let got = resolve(&doc, &path(r#"$["layers"][@do_objectID='Y']["v"]"#)).unwrap();
        assert_eq!(got, &json!(2));
    }

    #[test]
    fn map_expected() {
        let doc = json!([1, 2]);
        assert_eq!(
            resolve(&doc, &path(r#"$["a"]"#)).unwrap_err(),
            PathError::MapExpected
        );
    }

    #[test]
    fn array_expected() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(
            resolve(&doc, &path(r#"$["a"][0]"#)).unwrap_err(),
            PathError::ArrayExpected
        );
    }

    #[test]
    fn not_found() {
        let doc = json!({"a": 1});
        assert_eq!(
            resolve(&doc, &path(r#"$["z"]"#)).unwrap_err(),
            PathError::NotFound("z".into())
        );
    }

    #[test]
    fn out_of_bounds() {
        let doc = json!({"a": [1]});
        assert_eq!(
            resolve(&doc, &path(r#"$["a"][3]"#)).unwrap_err(),
            PathError::OutOfBounds(3)
        );
        assert_eq!(
            resolve(&doc, &path(r#"$["a"][-1]"#)).unwrap_err(),
            PathError::OutOfBounds(-1)
        );
    }

    #[test]
    fn predicate_unmatched() {
        let doc = json!({"a": [{"do_objectID": "X"}]});
        assert!(matches!(
            resolve(&doc, &path(r#"$["a"][@do_objectID='Z']"#)),
            Err(PathError::PredicateUnmatched { .. })
        ));
    }

    #[test]
    fn visitor_sees_every_descent() {
        let doc = json!({"layers": [{"name": "n"}]});
        let mut seen = Vec::new();
        let expr = path(r#"$["layers"][0]["name"]"#);
        resolve_with(&doc, &expr, &mut |_, prev, cur| {
            seen.push((prev.cloned(), cur.cloned()));
            true
        })
        .unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (None, None));
        assert_eq!(seen[1], (None, Some(Step::Key("layers".into()))));
        assert_eq!(
            seen[3],
            (Some(Step::Index(0)), Some(Step::Key("name".into())))
        );
    }

    #[test]
    fn visitor_short_circuits() {
        let doc = json!({"a": {"b": {"c": 1}}});
        let expr = path(r#"$["a"]["b"]["c"]"#);
        let got = resolve_with(&doc, &expr, &mut |_, _, cur| {
            !matches!(cur, Some(Step::Key(k)) if k == "b")
        })
        .unwrap();
        assert_eq!(got, &json!({"c": 1}));
    }
}
