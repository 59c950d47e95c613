//! Identity-keyed alignment of two ordered collections.

use std::collections::BTreeMap;

use serde_json::Value;

/// Permutation target meaning "no counterpart on the other side".
pub const ABSENT: i64 = -1;

/// Index permutation: position in one collection → position in the other,
/// or [`ABSENT`].
pub type Permutation = BTreeMap<usize, i64>;

/// Align two sequences by the value of `identity_key`.
///
/// Elements carrying the same identity are paired first-with-first,
/// second-with-second; unmatched extras map to [`ABSENT`] in order.
/// Elements without the identity key do not appear in either permutation.
/// Both directions are produced at once; they are not symmetric when
/// multiplicities differ.
pub fn align(identity_key: &str, left: &[Value], right: &[Value]) -> (Permutation, Permutation) {
    let left_ids = identity_positions(identity_key, left);
    let right_ids = identity_positions(identity_key, right);

    let mut forward = Permutation::new();
    let mut backward = Permutation::new();

    for (id, l_positions) in &left_ids {
        match right_ids.get(id) {
            Some(r_positions) => {
                for (k, &l) in l_positions.iter().enumerate() {
                    forward.insert(l, r_positions.get(k).map_or(ABSENT, |&r| r as i64));
                }
            }
            None => {
                for &l in l_positions {
                    forward.insert(l, ABSENT);
                }
            }
        }
    }

    for (id, r_positions) in &right_ids {
        match left_ids.get(id) {
            Some(l_positions) => {
                for (k, &r) in r_positions.iter().enumerate() {
                    backward.insert(r, l_positions.get(k).map_or(ABSENT, |&l| l as i64));
                }
            }
            None => {
                for &r in r_positions {
                    backward.insert(r, ABSENT);
                }
            }
        }
    }

    (forward, backward)
}

/// Occurrence positions of every identity value, in sequence order.
fn identity_positions(identity_key: &str, seq: &[Value]) -> BTreeMap<String, Vec<usize>> {
    let mut positions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, item) in seq.iter().enumerate() {
        if let Some(id) = item.get(identity_key).and_then(Value::as_str) {
            positions.entry(id.to_string()).or_default().push(index);
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layers(ids: &[&str]) -> Vec<Value> {
        ids.iter().map(|id| json!({"do_objectID": id})).collect()
    }

    #[test]
    fn identical_order() {
        let l = layers(&["A", "B"]);
        let (fwd, bwd) = align("do_objectID", &l, &l);
        assert_eq!(fwd[&0], 0);
        assert_eq!(fwd[&1], 1);
        assert_eq!(bwd, fwd);
    }

    #[test]
    fn swapped_order() {
        let l = layers(&["A", "B"]);
        let r = layers(&["B", "A"]);
        let (fwd, bwd) = align("do_objectID", &l, &r);
        assert_eq!(fwd[&0], 1);
        assert_eq!(fwd[&1], 0);
        assert_eq!(bwd[&0], 1);
        assert_eq!(bwd[&1], 0);
    }

    #[test]
    fn one_sided_elements_are_absent() {
        let l = layers(&["A", "B", "C"]);
        let r = layers(&["B"]);
        let (fwd, bwd) = align("do_objectID", &l, &r);
        assert_eq!(fwd[&0], ABSENT);
        assert_eq!(fwd[&1], 0);
        assert_eq!(fwd[&2], ABSENT);
        assert_eq!(bwd[&0], 1);
        assert_eq!(bwd.len(), 1);
    }

    #[test]
    fn duplicate_identities_pair_in_order() {
        let l = layers(&["A", "A", "A"]);
        let r = layers(&["A", "A"]);
        let (fwd, bwd) = align("do_objectID", &l, &r);
        // min(3, 2) pairs; the third left occurrence is unmatched.
        assert_eq!(fwd[&0], 0);
        assert_eq!(fwd[&1], 1);
        assert_eq!(fwd[&2], ABSENT);
        assert_eq!(bwd[&0], 0);
        assert_eq!(bwd[&1], 1);
    }

    #[test]
    fn unkeyed_elements_are_invisible() {
        let l = vec![json!({"v": 1}), json!({"do_objectID": "A"})];
        let r = vec![json!({"do_objectID": "A"})];
        let (fwd, bwd) = align("do_objectID", &l, &r);
        assert_eq!(fwd.len(), 1);
        assert_eq!(fwd[&1], 0);
        assert_eq!(bwd[&0], 1);
    }

    #[test]
    fn empty_sequences() {
        let (fwd, bwd) = align("do_objectID", &[], &[]);
        assert!(fwd.is_empty());
        assert!(bwd.is_empty());
    }
}
