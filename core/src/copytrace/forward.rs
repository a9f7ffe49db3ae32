//! Forward and backward copy tracing, and `pathcopies`'s three-way dispatch
//! between them.
//!
//! Grounded in `examples/original_source/mercurial/copies.py`'s
//! `_tracefile`/`_forwardcopies`/`_backwardrenames`/`_chain`/`pathcopies`.

use crate::copytrace::findlimit::find_limit;
use crate::node::{Node, Revision};
use crate::primitives::{common_ancestor, Changelog, Ctx, CtxProvider, FileLog, Manifest};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

/// Ancestors of `(start_path, start_rev)` in descending-linkrev order,
/// crossing from a file's introducing revision into its copy source via
/// `FileLog::renamed_from` the way real `filectx.ancestors()` does. `start`
/// itself is never yielded, matching `fctx.ancestors()`.
pub(crate) struct FileAncestors<'a> {
    get_filelog: &'a dyn Fn(&str) -> Option<Rc<dyn FileLog>>,
    heap: std::collections::BinaryHeap<(Revision, std::cmp::Reverse<String>, Revision)>,
    seen: HashSet<(String, Revision)>,
}

impl<'a> FileAncestors<'a> {
    pub(crate) fn new(get_filelog: &'a dyn Fn(&str) -> Option<Rc<dyn FileLog>>, start_path: &str, start_rev: Revision) -> Self {
        let mut it = FileAncestors { get_filelog, heap: std::collections::BinaryHeap::new(), seen: HashSet::new() };
        if let Some(fl) = get_filelog(start_path) {
            it.push_parents(start_path, start_rev, &*fl);
        }
        it
    }

    fn push_parents(&mut self, path: &str, rev: Revision, fl: &dyn FileLog) {
        for (p, r) in file_parents(path, rev, fl) {
            if self.seen.insert((p.clone(), r)) {
                if let Some(pfl) = (self.get_filelog)(&p) {
                    let linkrev = pfl.linkrev(r);
                    self.heap.push((linkrev, std::cmp::Reverse(p), r));
                }
            }
        }
    }
}

impl<'a> Iterator for FileAncestors<'a> {
    /// `(path, filelog-revision, linkrev)`.
    type Item = (String, Revision, Revision);

    fn next(&mut self) -> Option<Self::Item> {
        let (linkrev, std::cmp::Reverse(path), rev) = self.heap.pop()?;
        if let Some(fl) = (self.get_filelog)(&path) {
            self.push_parents(&path, rev, &*fl);
        }
        Some((path, rev, linkrev))
    }
}

/// The parents of `(path, rev)` for ancestor-walk purposes: the normal
/// filelog parents, or, when there are none (the revision introduced the
/// file), the rename source if the revision carries one. This is how
/// `filectx.parents()` lets a copy tracer cross from one path's history
/// into another's without a separate "copy log".
fn file_parents(path: &str, rev: Revision, fl: &dyn FileLog) -> Vec<(String, Revision)> {
    let (p1, p2) = fl.parent_revs(rev);
    let mut out: Vec<(String, Revision)> =
        [p1, p2].into_iter().flatten().map(|r| (path.to_string(), r)).collect();
    if out.is_empty() {
        if let Some((src_path, src_rev)) = fl.renamed_from(rev) {
            out.push((src_path, src_rev));
        }
    }
    out
}

/// Returns the nearest ancestor of `(path, rev)` that is recorded with the
/// same filenode in `am`, checked on each ancestor before the cutoff so a
/// match at exactly `limit` still counts; once an ancestor's linkrev drops
/// below `limit` without matching, the walk gives up rather than paying for
/// a full trace to the root (an optimisation only — the walk is never
/// guaranteed to stop at exactly the right point, only to not under-trace).
/// The original additionally
/// guards this cutoff with the ancestor's own filelog-local revision number
/// (`f.rev() < limit`), comparing it against a changelog-revision limit;
/// that comparison is incommensurate and the guard is redundant with the
/// linkrev check in every case that matters, so it's dropped here.
pub(crate) fn trace_file(
    get_filelog: &dyn Fn(&str) -> Option<Rc<dyn FileLog>>,
    path: &str,
    rev: Revision,
    am: &dyn Manifest,
    limit: Option<Revision>,
) -> Option<String> {
    for (p, r, linkrev) in FileAncestors::new(get_filelog, path, rev) {
        let fl = get_filelog(&p)?;
        if am.lookup(&p) == Some(fl.node(r)) {
            return Some(p);
        }
        if let Some(lim) = limit {
            if linkrev < lim {
                return None;
            }
        }
    }
    None
}

/// `{dst@b: src@a}` copy mapping where `a` is an ancestor of `b`
/// (`_forwardcopies`). Files present in `b` but not in `a` are traced
/// backward through their own history (crossing renames) until one lands
/// on a path+filenode already present in `a`'s manifest.
///
/// `working_copy_parent`/`dirstate_copies` implement the one dirstate
/// short-circuit the original keeps in this function (`b` is the working
/// directory and `a` is its first parent): dirstate itself is out of scope
/// here, but the hook for a caller that owns one to short-circuit
/// through it is cheap to keep. When `b` is the working directory and the
/// short-circuit doesn't apply, this returns an empty map rather than
/// attempting the dirstate-aware chaining the original does in that case.
pub fn forward_copies(
    cl: &dyn Changelog,
    a: &dyn Ctx,
    b: &dyn Ctx,
    working_copy_parent: Option<Node>,
    dirstate_copies: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let br = match b.rev() {
        Some(r) => r,
        None => {
            if working_copy_parent == Some(a.node()) {
                return dirstate_copies.cloned().unwrap_or_default();
            }
            return BTreeMap::new();
        }
    };
    let ar = match a.rev() {
        Some(r) => r,
        None => return BTreeMap::new(),
    };

    let limit = find_limit(cl, Some(ar), Some(br), Vec::new());
    let am = a.manifest();
    let bm = b.manifest();
    let missing = bm.files_not_in(am);

    let get_fl = |p: &str| b.filelog(p);
    let mut cm = BTreeMap::new();
    for f in missing {
        let node = match bm.lookup(&f) {
            Some(n) => n,
            None => continue,
        };
        let fl = match b.filelog(&f) {
            Some(fl) => fl,
            None => continue,
        };
        let rev = match fl.rev_of(&node) {
            Some(r) => r,
            None => continue,
        };
        if let Some(src) = trace_file(&get_fl, &f, rev, am, limit) {
            cm.insert(f, src);
        }
    }
    cm
}

/// `{src@y: dst@x}` where `y` is an ancestor of `x` (`_backwardrenames`):
/// the inverse of `forward_copies(y, x)`, dropping any source still present
/// in `x` (those are copies, not renames — the source file wasn't deleted).
pub fn backward_renames(
    cl: &dyn Changelog,
    x: &dyn Ctx,
    y: &dyn Ctx,
    disable_copytrace: bool,
) -> BTreeMap<String, String> {
    if disable_copytrace {
        return BTreeMap::new();
    }
    let forward = forward_copies(cl, y, x, None, None);
    let mut out = BTreeMap::new();
    // sorted(f.iteritems()) in the original just gives deterministic
    // iteration order for an arbitrary-1:n-rename tiebreak; BTreeMap
    // iteration is already sorted by key.
    for (dst, src) in forward {
        if x.manifest().contains(&src) {
            continue;
        }
        out.insert(src, dst);
    }
    out
}

/// Chains two copy maps `a: src(src)->mid` and `b: mid->dst(dst)` into one
/// `src->dst` map (`_chain`), consulting the two endpoint contexts to
/// decide whether a hop is a copy (source still lives on) or a rename, and
/// to drop criss-crossed copies where both ends of a chained entry already
/// exist unchanged in their respective endpoint.
pub fn chain(
    src: &dyn Ctx,
    dst: &dyn Ctx,
    a: &BTreeMap<String, String>,
    b: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut t = a.clone();
    for (k, v) in b {
        if let Some(existing) = t.get(v).cloned() {
            if &existing != k {
                t.insert(k.clone(), existing);
            }
            if !dst.manifest().contains(v) {
                t.remove(v);
            }
        }
        if src.manifest().contains(v) {
            t.insert(k.clone(), v.clone());
        }
    }
    t.retain(|k, v| !(src.manifest().contains(k) && dst.manifest().contains(v)));
    t
}

/// `{dst@y: src@x}` directed copy mapping (`pathcopies`): dispatches to
/// forward tracing, backward tracing, or a chain through the common
/// ancestor, depending on which of `x`/`y` is the other's ancestor.
pub fn path_copies(
    provider: &dyn CtxProvider,
    cl: &dyn Changelog,
    x: &dyn Ctx,
    y: &dyn Ctx,
) -> BTreeMap<String, String> {
    if x.node() == y.node() {
        return BTreeMap::new();
    }
    let (xr, yr) = match (x.rev(), y.rev()) {
        (Some(a), Some(b)) => (a, b),
        // Working-copy endpoints aren't supported by this dispatch; callers
        // tracing against the working directory use forward_copies directly
        // with its dirstate short-circuit.
        _ => return BTreeMap::new(),
    };

    match common_ancestor(cl, xr, yr) {
        Some(a) if a == xr => forward_copies(cl, x, y, None, None),
        Some(a) if a == yr => backward_renames(cl, x, y, false),
        Some(a) => {
            let actx = provider.ctx(a);
            chain(x, y, &backward_renames(cl, x, actx.as_ref(), false), &forward_copies(cl, actx.as_ref(), y, None, None))
        }
        None => BTreeMap::new(),
    }
}
