//! `_findlimit`: the lowest revision a copy trace still needs to look at to
//! have a complete view of renames between two endpoints.
//!
//! Grounded in `examples/original_source/mercurial/copies.py::_findlimit`.
//! The original negates revision numbers before pushing them onto a
//! `heapq` (a min-heap) to get max-first pop order; a plain `BinaryHeap`
//! (already a max-heap in Rust) gets the same traversal order without the
//! negation dance.

use crate::node::Revision;
use crate::primitives::Changelog;
use std::collections::{BinaryHeap, HashMap};

/// Finds the last revision that must be checked to compute a full
/// transitive closure of file copies between `a` and `b`: generally the
/// lowest revision number that is an ancestor of exactly one of `a`/`b`,
/// except when one is a direct descendant of the other, in which case the
/// result is clamped to `min(limit, a, b)`, exercised by the commit-amend
/// scenario in this module's tests.
///
/// `a`/`b` of `None` stand for the working directory's pseudo-revision
/// (`len(changelog)` in the original); since this crate has no dirstate,
/// the caller supplies that pseudo-revision's parent list directly via
/// `working_parents` rather than this function
/// reaching into a dirstate. Passing an empty list when neither `a` nor
/// `b` is `None` is harmless, since it is only consulted for the working
/// pseudo-revision.
pub fn find_limit(
    cl: &dyn Changelog,
    a: Option<Revision>,
    b: Option<Revision>,
    working_parents: Vec<Revision>,
) -> Option<Revision> {
    let working = cl.len() as Revision;
    let a_key = a.unwrap_or(working);
    let b_key = b.unwrap_or(working);

    let mut side: HashMap<Revision, i8> = HashMap::new();
    side.insert(a_key, -1);
    side.insert(b_key, 1);

    let mut visit: BinaryHeap<Revision> = BinaryHeap::new();
    visit.push(a_key);
    visit.push(b_key);
    let mut interesting: i64 = visit.len() as i64;
    let mut has_common_ancestor = false;
    let mut limit = working;

    while interesting > 0 {
        let r = match visit.pop() {
            Some(r) => r,
            None => break,
        };
        let parents: Vec<Revision> = if r == working {
            working_parents.clone()
        } else {
            let (p1, p2) = cl.parent_revs(r);
            [p1, p2].into_iter().flatten().collect()
        };
        for p in parents {
            match side.get(&p).copied() {
                None => {
                    let s = side[&r];
                    side.insert(p, s);
                    if s != 0 {
                        interesting += 1;
                    }
                    visit.push(p);
                }
                Some(sp) if sp != 0 && sp != side[&r] => {
                    side.insert(p, 0);
                    interesting -= 1;
                    has_common_ancestor = true;
                }
                _ => {}
            }
        }
        if side[&r] != 0 {
            limit = r;
            interesting -= 1;
        }
    }

    if !has_common_ancestor {
        return None;
    }

    Some(limit.min(a_key).min(b_key))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::Node;
    use crate::primitives::mem::MemChangelog;

    fn n(byte: u8) -> Node {
        Node::from_bytes(&[byte; 20]).unwrap()
    }

    #[test]
    fn no_common_ancestor_returns_none() {
        let mut cl = MemChangelog::new();
        let a = cl.add(n(1), (None, None), true);
        let b = cl.add(n(2), (None, None), true);
        assert_eq!(find_limit(&cl, Some(a), Some(b), vec![]), None);
    }

    #[test]
    fn linear_history_limit_is_the_fork_point() {
        let mut cl = MemChangelog::new();
        let root = cl.add(n(1), (None, None), true);
        let left = cl.add(n(2), (Some(root), None), false);
        let right = cl.add(n(3), (Some(root), None), false);
        assert_eq!(find_limit(&cl, Some(left), Some(right), vec![]), Some(root));
    }

    /// Reproduces the upstream `test-commit-amend.t` scenario: when
    /// one endpoint directly descends the other, the naive fork-point
    /// computation undershoots the revision actually carrying rename
    /// metadata, so the result is clamped to `min(limit, a, b)`.
    #[test]
    fn descendant_clamp_reaches_further_back_than_the_naive_fork_point() {
        let mut cl = MemChangelog::new();
        let a0 = cl.add(n(1), (None, None), true); // rev 0: file 'a0' committed
        let a1 = cl.add(n(2), (Some(a0), None), false); // rev 1: a0 -> a1 rename
        let a1_amend = cl.add(n(3), (Some(a0), None), false); // rev 2: amend off rev 0
        let amend_tmp = cl.add(n(4), (Some(a1_amend), None), false); // rev 3: temp amend commit
        let _ = a1;

        // a=3, b=0: naive fork point would be rev 2 (a1_amend), but the
        // rename lives in rev 1, below the naive limit; the descendant
        // clamp (a1_amend is a descendant of a0) pulls the limit down to
        // min(limit, a, b) = min(2, 3, 0) = 0.
        assert_eq!(find_limit(&cl, Some(amend_tmp), Some(a0), vec![]), Some(0));
    }
}
