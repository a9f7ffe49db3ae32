//! Merge-time copy/rename detection: `mergecopies`, its relatedness test
//! `_related`, its per-file worker `_checkcopies`, and `duplicatecopies`.
//!
//! Grounded in `examples/original_source/mercurial/copies.py`.

use crate::copytrace::findlimit::find_limit;
use crate::copytrace::forward::{path_copies, FileAncestors};
use crate::node::{Node, Revision};
use crate::primitives::{common_ancestor, dirname, is_ancestor, Changelog, Ctx, CtxProvider, FileLog, Manifest};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

/// Per-side accumulator for `check_copies`: every copy relationship it
/// notices (`fullcopy`) and the subset it judges actually relevant to a
/// merge (`copy`).
#[derive(Default)]
pub(crate) struct CopyData {
    pub copy: BTreeMap<String, String>,
    pub fullcopy: BTreeMap<String, String>,
}

/// The four maps `merge_copies` returns, matching `mergecopies`'s docstring:
/// `copy` (dst -> src, either direction), `movewithdir` (src -> dst implied
/// by a whole-directory move), `diverge` (src -> the several dsts it
/// diverged to) and `renamedelete` (src -> dsts it was renamed to on one
/// side while deleted on the other).
#[derive(Default, Debug, Clone, PartialEq)]
pub struct MergeCopies {
    pub copy: BTreeMap<String, String>,
    pub movewithdir: BTreeMap<String, String>,
    pub diverge: BTreeMap<String, Vec<String>>,
    pub renamedelete: BTreeMap<String, Vec<String>>,
}

/// Whether `f1` and `f2` (two `(path, filelog-revision)` pairs) share a
/// common file ancestor, walking each side's history independently, always
/// advancing whichever side has the higher linkrev, and giving up once
/// either side's linkrev drops below `limit` without the two having met
/// (`_related`). `limit` here is `tca`'s revision — this is a divergence
/// test, not the same `limit` `check_copies` uses for its own walk cutoff.
pub(crate) fn related(
    get_filelog: &dyn Fn(&str) -> Option<Rc<dyn FileLog>>,
    f1: (&str, Revision),
    f2: (&str, Revision),
    limit: Revision,
) -> bool {
    if f1.0 == f2.0 && f1.1 == f2.1 {
        return true;
    }

    let head = |path: &str, rev: Revision| -> Option<Revision> { get_filelog(path).map(|fl| fl.linkrev(rev)) };

    let mut g1 = FileAncestors::new(get_filelog, f1.0, f1.1);
    let mut g2 = FileAncestors::new(get_filelog, f2.0, f2.1);
    let mut cur1 = (f1.0.to_string(), f1.1);
    let mut cur2 = (f2.0.to_string(), f2.1);

    loop {
        let lr1 = match head(&cur1.0, cur1.1) {
            Some(v) => v,
            None => return false,
        };
        let lr2 = match head(&cur2.0, cur2.1) {
            Some(v) => v,
            None => return false,
        };
        if lr1 > lr2 {
            match g1.next() {
                Some((p, r, _)) => cur1 = (p, r),
                None => return false,
            }
        } else if lr2 > lr1 {
            match g2.next() {
                Some((p, r, _)) => cur2 = (p, r),
                None => return false,
            }
        } else if cur1 == cur2 {
            return true;
        } else if lr1 == lr2 || lr1 < limit || lr2 < limit {
            return false;
        }
    }
}

/// Checks `f` (present in `m1`) for a possible copy relationship into `m2`,
/// recording anything found into `data`/`diverge` (`_checkcopies`). Walks
/// `f`'s ancestors, crossing renames, until either a match lands on a file
/// also present in `m2` (recording a copy, or a divergence if more than one
/// source is later found to map to the same destination) or the walk's
/// linkrev runs below `limit`.
///
/// `base_ne_tca` is `base != tca` hoisted out of the per-file loop by the
/// caller (it's the same for every call within one `merge_copies` pass);
/// combined with `f` already being present in `mb` it reproduces the
/// original's graft-rotation `backwards` flag.
#[allow(clippy::too_many_arguments)]
pub(crate) fn check_copies(
    get_filelog: &dyn Fn(&str) -> Option<Rc<dyn FileLog>>,
    f: &str,
    m1: &dyn Manifest,
    m2: &dyn Manifest,
    mb: &dyn Manifest,
    base_ne_tca: bool,
    tca_rev: Revision,
    limit: Revision,
    data: &mut CopyData,
    diverge: &mut BTreeMap<String, Vec<String>>,
) {
    let backwards = base_ne_tca && mb.contains(f);

    let node = match m1.lookup(f) {
        Some(n) => n,
        None => return,
    };
    let fl = match get_filelog(f) {
        Some(fl) => fl,
        None => return,
    };
    let start_rev = match fl.rev_of(&node) {
        Some(r) => r,
        None => return,
    };

    let mut of: Option<String> = None;
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(f.to_string());

    for (path, rev, linkrev) in FileAncestors::new(get_filelog, f, start_rev) {
        of = Some(path.clone());
        if seen.contains(&path) {
            // check limit late - grab the last rename before giving up.
            if linkrev < limit {
                break;
            }
            continue;
        }
        seen.insert(path.clone());

        if backwards {
            data.fullcopy.insert(path.clone(), f.to_string());
        } else {
            data.fullcopy.insert(f.to_string(), path.clone());
        }

        if !m2.contains(&path) {
            continue;
        }
        if m2.lookup(&path) == mb.lookup(&path) {
            return;
        }

        let dst_node = match m2.lookup(&path) {
            Some(n) => n,
            None => continue,
        };
        let dst_fl = match get_filelog(&path) {
            Some(fl) => fl,
            None => continue,
        };
        let dst_rev = match dst_fl.rev_of(&dst_node) {
            Some(r) => r,
            None => continue,
        };

        if related(get_filelog, (&path, rev), (&path, dst_rev), tca_rev) {
            if backwards {
                data.copy.insert(path.clone(), f.to_string());
            } else if mb.contains(&path) {
                data.copy.insert(f.to_string(), path.clone());
            }
            return;
        }
    }

    if let Some(of) = of {
        if mb.contains(&of) {
            diverge.entry(of).or_default().push(f.to_string());
        }
    }
}

fn compute_nonoverlap(added1: &HashSet<String>, added2: &HashSet<String>) -> (Vec<String>, Vec<String>) {
    let mut u1: Vec<String> = added1.difference(added2).cloned().collect();
    u1.sort();
    let mut u2: Vec<String> = added2.difference(added1).cloned().collect();
    u2.sort();
    (u1, u2)
}

/// Finds moves and copies between `c1` and `c2` relevant for merging them
/// with `base` as the merge base (`mergecopies`). `working_copy_parent`/
/// `dirstate_copies` give callers that own a dirstate a way to short-circuit
/// the common "parent -> working directory" case the same way
/// `forward_copies` does; full dirstate-aware tracing beyond that single
/// case is out of scope (no dirstate is modeled here).
#[allow(clippy::too_many_arguments)]
pub fn merge_copies(
    provider: &dyn CtxProvider,
    cl: &dyn Changelog,
    c1: &dyn Ctx,
    c2: &dyn Ctx,
    base: &dyn Ctx,
    disable_copytrace: bool,
    working_copy_parent: Option<Node>,
    dirstate_copies: Option<&BTreeMap<String, String>>,
) -> MergeCopies {
    if c1.node() == c2.node() {
        return MergeCopies::default();
    }

    if c2.rev().is_none() {
        if let Some(p1) = working_copy_parent {
            if c1.node() == p1 {
                return MergeCopies { copy: dirstate_copies.cloned().unwrap_or_default(), ..Default::default() };
            }
        }
    }

    if disable_copytrace {
        return MergeCopies::default();
    }

    let (c1r, c2r, base_r) = match (c1.rev(), c2.rev(), base.rev()) {
        (Some(a), Some(b), Some(base_rev)) => (a, b, base_rev),
        _ => return MergeCopies::default(),
    };

    let dirty_c1 = !(base_r == c1r || is_ancestor(cl, base_r, c1r));
    let dirty_c2 = !(base_r == c2r || is_ancestor(cl, base_r, c2r));
    let graft = dirty_c1 || dirty_c2;
    let tca_r = if graft {
        match common_ancestor(cl, c1r, c2r) {
            Some(r) => r,
            None => return MergeCopies::default(),
        }
    } else {
        base_r
    };

    let limit = match find_limit(cl, Some(c1r), Some(c2r), Vec::new()) {
        Some(l) => l,
        None => return MergeCopies::default(),
    };

    let m1 = c1.manifest();
    let m2 = c2.manifest();
    let mb = base.manifest();
    let tca = provider.ctx(tca_r);

    let added_in_m1: HashSet<String> = m1.files_not_in(mb).into_iter().collect();
    let added_in_m2: HashSet<String> = m2.files_not_in(mb).into_iter().collect();
    let mut both_new: Vec<String> = added_in_m1.intersection(&added_in_m2).cloned().collect();
    both_new.sort();

    let (u1r, u2r, u1u, u2u) = if tca_r == base_r {
        let (u1, u2) = compute_nonoverlap(&added_in_m1, &added_in_m2);
        (u1.clone(), u2.clone(), u1, u2)
    } else {
        let (u1r, u2r) = compute_nonoverlap(&added_in_m1, &added_in_m2);
        let mta = tca.manifest();
        let added_in_m1_tca: HashSet<String> = m1.files_not_in(mta).into_iter().collect();
        let added_in_m2_tca: HashSet<String> = m2.files_not_in(mta).into_iter().collect();
        let (u1u, u2u) = compute_nonoverlap(&added_in_m1_tca, &added_in_m2_tca);
        (u1r, u2r, u1u, u2u)
    };

    let mut diverge: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut data1 = CopyData::default();
    let mut data2 = CopyData::default();
    let base_ne_tca = base.node() != tca.node();
    let get_fl1 = |p: &str| c1.filelog(p);
    let get_fl2 = |p: &str| c2.filelog(p);

    for f in &u1u {
        check_copies(&get_fl1, f, m1, m2, mb, base_ne_tca, tca_r, limit, &mut data1, &mut diverge);
    }
    for f in &u2u {
        check_copies(&get_fl2, f, m2, m1, mb, base_ne_tca, tca_r, limit, &mut data2, &mut diverge);
    }

    let mut copy = data1.copy;
    copy.extend(data2.copy);
    let mut fullcopy = data1.fullcopy;
    fullcopy.extend(data2.fullcopy);

    let mut renamedelete: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let diverge_keys: Vec<String> = diverge.keys().cloned().collect();
    for of in diverge_keys {
        let fl = diverge.get(&of).cloned().unwrap_or_default();
        if fl.len() == 1 || m1.contains(&of) || m2.contains(&of) {
            diverge.remove(&of);
            if !m1.contains(&of) && !m2.contains(&of) {
                let kept: Vec<String> = fl.into_iter().filter(|x| m1.contains(x) || m2.contains(x)).collect();
                renamedelete.insert(of, kept);
            }
        }
    }

    let mut both_diverge: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut both_data = CopyData::default();
    for f in &both_new {
        check_copies(&get_fl1, f, m1, m2, mb, base_ne_tca, tca_r, limit, &mut both_data, &mut both_diverge);
        check_copies(&get_fl2, f, m2, m1, mb, base_ne_tca, tca_r, limit, &mut both_data, &mut both_diverge);
    }
    for (of, fl) in &both_diverge {
        if fl.len() == 2 && fl[0] == fl[1] {
            copy.insert(fl[0].clone(), of.clone());
        }
    }

    if fullcopy.is_empty() {
        return MergeCopies { copy, movewithdir: BTreeMap::new(), diverge, renamedelete };
    }

    let mut d1 = c1.dirs();
    let mut d2 = c2.dirs();
    d1.add_path("/");
    d2.add_path("/");

    let mut invalid: HashSet<String> = HashSet::new();
    let mut dirmove: BTreeMap<String, String> = BTreeMap::new();

    // Note: unlike the original, the "already seen to be uninteresting"
    // early-skip below is checked against the same slash-suffixed key every
    // insertion into `invalid` uses, so it actually fires; in the original
    // the early-skip key lacks the trailing slash `invalid`'s insertions
    // carry, making it permanently dead — harmless there only because the
    // later sweep (`for i in invalid: dirmove.pop(i, None)`) still drops
    // the entry before `dirmove` is read.
    for (dst, src) in &fullcopy {
        let dsrc = dirname(src);
        let ddst = dirname(dst);
        let dsrc_key = format!("{}/", dsrc);
        if invalid.contains(&dsrc_key) {
            continue;
        } else if d1.contains(dsrc) && d1.contains(ddst) {
            invalid.insert(dsrc_key);
        } else if d2.contains(dsrc) && d2.contains(ddst) {
            invalid.insert(dsrc_key);
        } else if dirmove.get(&dsrc_key).map_or(false, |existing| existing != &format!("{}/", ddst)) {
            invalid.insert(dsrc_key);
        } else {
            dirmove.insert(dsrc_key, format!("{}/", ddst));
        }
    }
    for i in &invalid {
        dirmove.remove(i);
    }

    if dirmove.is_empty() {
        return MergeCopies { copy, movewithdir: BTreeMap::new(), diverge, renamedelete };
    }

    let mut movewithdir: BTreeMap<String, String> = BTreeMap::new();
    for f in u1r.iter().chain(u2r.iter()) {
        if fullcopy.contains_key(f) {
            continue;
        }
        for (d, dd) in &dirmove {
            if let Some(rest) = f.strip_prefix(d.as_str()) {
                let df = format!("{}{}", dd, rest);
                if !copy.contains_key(&df) {
                    movewithdir.insert(f.clone(), df);
                }
                break;
            }
        }
    }

    MergeCopies { copy, movewithdir, diverge, renamedelete }
}

/// Reproduces the copies from `fromrev` to `rev` by calling `apply(src,
/// dst)` for each one found, skipping any destination also produced by
/// copy-tracing `fromrev` to `skiprev` (`duplicatecopies`). Real dirstate
/// filtering (`repo.dirstate[dst] in "nma"`) is the caller's responsibility
/// through `apply`, matching how this crate's other components push
/// decisions to a callback rather than owning a dirstate themselves.
pub fn duplicate_copies(
    provider: &dyn CtxProvider,
    cl: &dyn Changelog,
    rev: Revision,
    fromrev: Revision,
    skiprev: Option<Revision>,
    disable_copytrace: bool,
    mut apply: impl FnMut(&str, &str),
) {
    let mut exclude: BTreeMap<String, String> = BTreeMap::new();
    if let Some(skiprev) = skiprev {
        if !disable_copytrace {
            let from_ctx = provider.ctx(fromrev);
            let skip_ctx = provider.ctx(skiprev);
            exclude = path_copies(provider, cl, from_ctx.as_ref(), skip_ctx.as_ref());
        }
    }

    let from_ctx = provider.ctx(fromrev);
    let rev_ctx = provider.ctx(rev);
    for (dst, src) in path_copies(provider, cl, from_ctx.as_ref(), rev_ctx.as_ref()) {
        if exclude.contains_key(&dst) {
            continue;
        }
        apply(&src, &dst);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::primitives::mem::{MemFileLog, MemManifest, MemRepo};

    fn n(byte: u8) -> Node {
        Node::from_bytes(&[byte; 20]).unwrap()
    }

    /// base has `a`; c1 renames `a` -> `b`; c2 edits `a` in place. Merging
    /// them should surface the rename as a copy relevant to the merge.
    fn rename_vs_edit_repo() -> (MemRepo, Revision, Revision, Revision) {
        let mut repo = MemRepo::new();

        // Changelog revisions: base=0, c1=1, c2=2 — linkrevs below are
        // pinned to that order since they're assigned before `commit` hands
        // out the actual revision numbers.
        let mut a_log = MemFileLog::new();
        let a_node = n(0xa1);
        let a_rev0 = a_log.add(a_node, b"one".to_vec(), 0, (None, None));
        let a_node2 = n(0xa2);
        a_log.add(a_node2, b"two".to_vec(), 2, (Some(a_rev0), None));
        repo.filelogs.insert("a".to_string(), Rc::new(a_log));

        let mut b_log = MemFileLog::new();
        let b_node = n(0xb1);
        let b_rev = b_log.add(b_node, b"one".to_vec(), 1, (None, None));
        b_log.set_renamed(b_rev, "a", a_rev0);
        repo.filelogs.insert("b".to_string(), Rc::new(b_log));

        let mut base_manifest = MemManifest::new();
        base_manifest.insert("a", a_node, 0);
        let base = repo.commit(n(1), (None, None), true, base_manifest);

        let mut c1_manifest = MemManifest::new();
        c1_manifest.insert("b", b_node, 0);
        let c1 = repo.commit(n(2), (Some(base), None), false, c1_manifest);

        let mut c2_manifest = MemManifest::new();
        c2_manifest.insert("a", a_log_node_at_rev1(&repo), 0);
        let c2 = repo.commit(n(3), (Some(base), None), false, c2_manifest);

        (repo, base, c1, c2)
    }

    fn a_log_node_at_rev1(repo: &MemRepo) -> Node {
        repo.filelogs.get("a").unwrap().node(1)
    }

    #[test]
    fn merge_copies_detects_rename_against_independent_edit() {
        let (repo, base, c1, c2) = rename_vs_edit_repo();
        let base_ctx = repo.ctx(base);
        let c1_ctx = repo.ctx(c1);
        let c2_ctx = repo.ctx(c2);

        let result = merge_copies(&repo, &repo.changelog, &c1_ctx, &c2_ctx, &base_ctx, false, None, None);
        assert_eq!(result.copy.get("b"), Some(&"a".to_string()));
    }

    #[test]
    fn merge_copies_is_empty_for_identical_contexts() {
        let (repo, base, c1, _c2) = rename_vs_edit_repo();
        let base_ctx = repo.ctx(base);
        let c1_ctx = repo.ctx(c1);
        let result = merge_copies(&repo, &repo.changelog, &c1_ctx, &c1_ctx, &base_ctx, false, None, None);
        assert_eq!(result, MergeCopies::default());
    }

    #[test]
    fn merge_copies_respects_disable_copytrace() {
        let (repo, base, c1, c2) = rename_vs_edit_repo();
        let base_ctx = repo.ctx(base);
        let c1_ctx = repo.ctx(c1);
        let c2_ctx = repo.ctx(c2);
        let result = merge_copies(&repo, &repo.changelog, &c1_ctx, &c2_ctx, &base_ctx, true, None, None);
        assert_eq!(result, MergeCopies::default());
    }
}
