//! The obsolescence store: the marker log plus the three derived indices
//! every other operation walks, and the revision sets derived from them.
//!
//! Grounded throughout in `obsolete.py`'s `obsstore` class and its
//! `cachefuncs` registry; `Marker` can't cleanly derive `Hash`/`Eq` (it
//! carries an `f64` date), so markers are addressed by index into `markers`
//! rather than kept in a `HashSet` the way the original keeps hashable
//! tuples — an index-based adaptation, not a behavior change.

use crate::error::{CResult, Error};
use crate::node::{Node, Revision};
use crate::obsstore::framing;
use crate::obsstore::marker::Marker;
use crate::primitives::Changelog;
use crate::transaction::Transaction;
use crate::vfs::Vfs;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Cardinalities of the five cached revision sets for one changelog, the
/// kind of summary a `hg summary`/status-line caller wants without handing
/// back every member revision. `serde`-derived so embedding processes can
/// report it as JSON the way the teacher's own status types
/// (`kv/src/row/rows.rs`) are serialized for external consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct ObsolescenceSummary {
    pub obsolete: usize,
    pub unstable: usize,
    pub suspended: usize,
    pub extinct: usize,
    pub bumped: usize,
    pub divergent: usize,
}

pub struct ObsStore<'a> {
    vfs: &'a dyn Vfs,
    path: String,
    pub readonly: bool,
    version: u8,
    markers: Vec<Marker>,
    /// precursor -> indices of markers whose precursor it is.
    successors: HashMap<Node, BTreeSet<usize>>,
    /// successor -> indices of markers that name it as a successor.
    precursors: HashMap<Node, BTreeSet<usize>>,
    /// recorded parent -> indices of markers that record it as a parent.
    children: HashMap<Node, BTreeSet<usize>>,
}

impl<'a> ObsStore<'a> {
    pub fn new(vfs: &'a dyn Vfs, path: impl Into<String>, default_version: u8) -> CResult<Self> {
        let mut store = ObsStore {
            vfs,
            path: path.into(),
            readonly: false,
            version: default_version,
            markers: Vec::new(),
            successors: HashMap::new(),
            precursors: HashMap::new(),
            children: HashMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> CResult<()> {
        self.markers = match self.vfs.try_read(&self.path)? {
            None => Vec::new(),
            Some(bytes) if bytes.is_empty() => Vec::new(),
            Some(bytes) => {
                self.version = bytes[0];
                framing::read_markers(&bytes)?
            }
        };
        self.rebuild_indices();
        Ok(())
    }

    fn rebuild_indices(&mut self) {
        self.successors.clear();
        self.precursors.clear();
        self.children.clear();
        for (idx, marker) in self.markers.iter().enumerate() {
            self.successors.entry(marker.precursor).or_default().insert(idx);
            for succ in &marker.successors {
                self.precursors.entry(*succ).or_default().insert(idx);
            }
            if let Some(parents) = &marker.parents {
                for parent in parents {
                    self.children.entry(*parent).or_default().insert(idx);
                }
            }
        }
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Appends `new_markers` to the store, deduplicating against markers
    /// already on disk (by `(precursor, successors)`) and against
    /// duplicates within this same call, exactly like `obsstore.add`'s
    /// `known`/`getsuccessors` guard. Returns the number of markers actually
    /// written. The version header is written only when appending to an
    /// empty file (`offset == 0` in the original).
    pub fn add(&mut self, tr: &mut Transaction, new_markers: &[Marker]) -> CResult<usize> {
        if self.readonly {
            return Err(Error::Abort("obsolescence store is read-only".into()));
        }
        for m in new_markers {
            m.validate()?;
        }

        let mut known: HashSet<(Node, Vec<Node>)> = HashSet::new();
        let mut staged: Vec<Marker> = Vec::new();
        for marker in new_markers {
            let already_on_disk = self.successors.get(&marker.precursor).is_some_and(|idxs| {
                idxs.iter().any(|&i| self.markers[i].successors == marker.successors)
            });
            let key = (marker.precursor, marker.successors.clone());
            if already_on_disk || known.contains(&key) {
                continue;
            }
            known.insert(key);
            staged.push(marker.clone());
        }

        if staged.is_empty() {
            return Ok(0);
        }

        let offset = self.vfs.try_read(&self.path)?.map(|d| d.len() as u64).unwrap_or(0);
        tr.add(&self.path, offset)?;

        let mut buf = Vec::new();
        if offset == 0 {
            buf.push(self.version);
        }
        for marker in &staged {
            buf.extend(framing::encode_marker(marker, self.version)?);
        }
        self.vfs.append(&self.path, &buf)?;

        let base = self.markers.len();
        for (i, marker) in staged.iter().enumerate() {
            let idx = base + i;
            self.successors.entry(marker.precursor).or_default().insert(idx);
            for succ in &marker.successors {
                self.precursors.entry(*succ).or_default().insert(idx);
            }
            if let Some(parents) = &marker.parents {
                for parent in parents {
                    self.children.entry(*parent).or_default().insert(idx);
                }
            }
        }
        let added = staged.len();
        self.markers.extend(staged);

        let prev: usize =
            tr.hookargs.get("new_obsmarkers").and_then(|s| s.parse().ok()).unwrap_or(0);
        tr.hookargs.insert("new_obsmarkers".to_string(), (prev + added).to_string());

        Ok(added)
    }

    /// Builds and stages a single marker from its components, matching
    /// `createmarkers`'s validation: the precursor must be mutable (not
    /// public), and a changeset may not obsolete itself.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        tr: &mut Transaction,
        precursor: Node,
        successors: Vec<Node>,
        flags: u32,
        parents: Option<Vec<Node>>,
        date: (f64, i32),
        metadata: Vec<(String, String)>,
        precursor_mutable: bool,
    ) -> CResult<()> {
        if !precursor_mutable {
            return Err(Error::Abort("cannot obsolete public changeset".into()));
        }
        if successors.contains(&precursor) {
            return Err(Error::Value("changeset cannot obsolete itself".into()));
        }
        let mut marker = Marker { precursor, successors, flags, metadata, date, parents };
        marker.sort_metadata();
        self.add(tr, std::slice::from_ref(&marker))?;
        Ok(())
    }

    /// Markers received from a peer (already decoded from the pushkey wire
    /// format): staged the same way as locally created ones.
    pub fn merge_markers(&mut self, tr: &mut Transaction, incoming: &[Marker]) -> CResult<usize> {
        self.add(tr, incoming)
    }

    /// Every marker reachable from `nodes` by following precursor,
    /// successor or recorded-parent edges in either direction, the
    /// transitive closure `relevantmarkers` needs to decide which markers
    /// matter when displaying or exchanging obsolescence data about a set
    /// of changesets.
    pub fn relevant_markers(&self, nodes: &[Node]) -> Vec<Marker> {
        let mut seen_markers: BTreeSet<usize> = BTreeSet::new();
        let mut seen_nodes: HashSet<Node> = nodes.iter().copied().collect();
        let mut pending: HashSet<Node> = nodes.iter().copied().collect();

        while !pending.is_empty() {
            let mut direct: BTreeSet<usize> = BTreeSet::new();
            for current in &pending {
                if let Some(idxs) = self.precursors.get(current) {
                    direct.extend(idxs.iter().copied());
                }
                if let Some(idxs) = self.successors.get(current) {
                    direct.extend(idxs.iter().copied());
                }
                if let Some(idxs) = self.children.get(current) {
                    for &idx in idxs {
                        if !self.markers[idx].successors.is_empty() {
                            direct.insert(idx);
                        }
                    }
                }
            }
            let new_direct: Vec<usize> =
                direct.difference(&seen_markers).copied().collect();

            let mut next_pending = HashSet::new();
            for &idx in &new_direct {
                let m = &self.markers[idx];
                if seen_nodes.insert(m.precursor) {
                    next_pending.insert(m.precursor);
                }
                for s in &m.successors {
                    if seen_nodes.insert(*s) {
                        next_pending.insert(*s);
                    }
                }
            }
            seen_markers.extend(new_direct);
            pending = next_pending;
        }

        seen_markers.into_iter().map(|i| self.markers[i].clone()).collect()
    }

    /// Markers that exist *only* because of `nodes`: walked back from each
    /// node through its precursors, a precursor is pulled in (and walked
    /// further) only once every marker naming it as a precursor has already
    /// been accounted for. Used to decide which markers a `strip` of
    /// `nodes` may safely discard.
    pub fn exclusive_markers(&self, nodes: &[Node]) -> Vec<Marker> {
        let boundary: HashSet<Node> = nodes.iter().copied().collect();
        let mut seen_nodes: HashSet<Node> = HashSet::new();
        let mut stack: Vec<Node> = nodes.to_vec();
        let mut exclusive: BTreeSet<usize> = BTreeSet::new();

        while let Some(current) = stack.pop() {
            if !seen_nodes.insert(current) {
                continue;
            }
            let prec_idxs: Vec<usize> = self
                .precursors
                .get(&current)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default();
            for idx in prec_idxs {
                let prec = self.markers[idx].precursor;
                let known = seen_nodes.contains(&prec);
                if known && !boundary.contains(&prec) {
                    continue;
                }
                exclusive.insert(idx);

                let all_for_prec: BTreeSet<usize> =
                    self.successors.get(&prec).cloned().unwrap_or_default();
                if all_for_prec.is_subset(&exclusive) {
                    stack.push(prec);
                }
            }
        }

        exclusive.into_iter().map(|i| self.markers[i].clone()).collect()
    }

    /// The set of "successors sets" of `node`: every way of tracing `node`
    /// forward to nodes with no further successors, deduplicated to an
    /// antichain (no returned set is a superset of another). Ported from
    /// the original's explicit-stack algorithm rather than written
    /// recursively, since the original's comments are explicit that
    /// recursion risks blowing the interpreter's stack on long obsolescence
    /// chains and this crate keeps the same non-recursive shape.
    pub fn successors_sets(
        &self,
        node: Node,
        cache: &mut HashMap<Node, Vec<Vec<Node>>>,
    ) -> Vec<Vec<Node>> {
        if let Some(v) = cache.get(&node) {
            return v.clone();
        }

        let mut stack = vec![node];
        let mut stacked: HashSet<Node> = HashSet::new();
        stacked.insert(node);

        while let Some(&current) = stack.last() {
            if cache.contains_key(&current) {
                stack.pop();
                continue;
            }

            let marker_idxs = match self.successors.get(&current) {
                None => {
                    cache.insert(current, vec![vec![current]]);
                    stack.pop();
                    continue;
                }
                Some(idxs) => idxs,
            };

            let mut sorted_idxs: Vec<usize> = marker_idxs.iter().copied().collect();
            sorted_idxs.sort_by(|&a, &b| self.markers[a].sort_key().cmp(&self.markers[b].sort_key()));

            let mut missing: Option<Node> = None;
            'markers: for &idx in &sorted_idxs {
                for suc in &self.markers[idx].successors {
                    if !cache.contains_key(suc) {
                        if stacked.contains(suc) {
                            // cycle: treat this branch as pruned rather than
                            // looping forever.
                            cache.insert(*suc, Vec::new());
                        } else {
                            missing = Some(*suc);
                            break 'markers;
                        }
                    }
                }
            }

            if let Some(next) = missing {
                stacked.insert(next);
                stack.push(next);
                continue;
            }

            // Every successor of every marker touching `current` is now
            // resolved: the successors-sets of `current` are the union,
            // across its markers, of the Cartesian product of each
            // marker's successors' own sets.
            let mut sets: Vec<Vec<Node>> = Vec::new();
            for &idx in &sorted_idxs {
                let marker = &self.markers[idx];
                let mut partial: Vec<Vec<Node>> = vec![Vec::new()];
                for suc in &marker.successors {
                    let suc_sets = cache.get(suc).cloned().unwrap_or_default();
                    let mut next_partial = Vec::new();
                    for p in &partial {
                        for s in &suc_sets {
                            let mut combined = p.clone();
                            combined.extend(s.iter().copied());
                            next_partial.push(combined);
                        }
                    }
                    partial = next_partial;
                }
                sets.extend(partial);
            }

            cache.insert(current, dedup_antichain(sets));
            stack.pop();
        }

        cache.get(&node).cloned().unwrap_or_default()
    }

    /// `rev` is obsolete if it has a marker naming it as precursor and it
    /// isn't public (`_computeobsoleteset`). Public changesets can't be
    /// obsoleted, so a lingering marker about one is meaningless.
    pub fn obsolete_revs(&self, cl: &dyn Changelog) -> BTreeSet<Revision> {
        let mut out = BTreeSet::new();
        for prec in self.successors.keys() {
            if let Some(rev) = cl.rev(prec) {
                if !cl.is_public(rev) {
                    out.insert(rev);
                }
            }
        }
        out
    }

    /// Non-public descendants of an obsolete revision that aren't
    /// themselves obsolete (`_computeunstableset`): these are the
    /// changesets a user still sees in their draft work even though an
    /// ancestor has been rewritten away.
    pub fn unstable_revs(&self, cl: &dyn Changelog) -> BTreeSet<Revision> {
        let obsolete = self.obsolete_revs(cl);
        let mut out = BTreeSet::new();
        for rev in 0..cl.len() as Revision {
            if obsolete.contains(&rev) || cl.is_public(rev) {
                continue;
            }
            let ancestors: HashSet<Revision> = cl.ancestors(&[rev], false).collect();
            if ancestors.iter().any(|a| obsolete.contains(a)) {
                out.insert(rev);
            }
        }
        out
    }

    /// Obsolete revisions kept alive by a non-obsolete descendant
    /// (`_computesuspendedset`): stripping them would orphan real work.
    pub fn suspended_revs(&self, cl: &dyn Changelog) -> BTreeSet<Revision> {
        let obsolete = self.obsolete_revs(cl);
        let mut out = BTreeSet::new();
        for rev in 0..cl.len() as Revision {
            if obsolete.contains(&rev) {
                continue;
            }
            let ancestors: HashSet<Revision> = cl.ancestors(&[rev], false).collect();
            for &anc in &ancestors {
                if obsolete.contains(&anc) {
                    out.insert(anc);
                }
            }
        }
        out
    }

    /// Obsolete revisions with nothing left depending on them
    /// (`_computeextinctset`): safe to garbage-collect.
    pub fn extinct_revs(&self, cl: &dyn Changelog) -> BTreeSet<Revision> {
        let obsolete = self.obsolete_revs(cl);
        let suspended = self.suspended_revs(cl);
        obsolete.difference(&suspended).copied().collect()
    }

    /// A draft revision is "bumped" if its obsolescence precursor chain
    /// (ignoring markers flagged `BUMPED_FIX`) reaches a public revision
    /// (`_computebumpedset`): it was amended from something already shared.
    pub fn bumped_revs(&self, cl: &dyn Changelog) -> BTreeSet<Revision> {
        let mut out = BTreeSet::new();
        for rev in 0..cl.len() as Revision {
            if cl.is_public(rev) {
                continue;
            }
            let node = cl.node(rev);
            let mut stack = vec![node];
            let mut seen = HashSet::new();
            let mut found_public_precursor = false;
            while let Some(current) = stack.pop() {
                if !seen.insert(current) {
                    continue;
                }
                if let Some(idxs) = self.precursors.get(&current) {
                    for &idx in idxs {
                        let marker = &self.markers[idx];
                        if marker.bumped_fix() {
                            continue;
                        }
                        let prec = marker.precursor;
                        if let Some(prec_rev) = cl.rev(&prec) {
                            if cl.is_public(prec_rev) {
                                found_public_precursor = true;
                                break;
                            }
                        }
                        stack.push(prec);
                    }
                }
                if found_public_precursor {
                    break;
                }
            }
            if found_public_precursor {
                out.insert(rev);
            }
        }
        out
    }

    /// The five cached set sizes in one pass, for callers that only want to
    /// report counts (a status line) without materializing every member
    /// revision.
    pub fn summarize(&self, cl: &dyn Changelog) -> ObsolescenceSummary {
        ObsolescenceSummary {
            obsolete: self.obsolete_revs(cl).len(),
            unstable: self.unstable_revs(cl).len(),
            suspended: self.suspended_revs(cl).len(),
            extinct: self.extinct_revs(cl).len(),
            bumped: self.bumped_revs(cl).len(),
            divergent: self.divergent_revs(cl).len(),
        }
    }

    /// Non-public, non-obsolete revisions whose precursor chain reaches a
    /// node with more than one non-pruned successor set
    /// (`_computedivergentset`): walked backward from `rev` through the
    /// markers naming it (or an ancestor precursor) as a successor, a
    /// revision is divergent if any precursor on that chain was
    /// independently rewritten more than one way.
    pub fn divergent_revs(&self, cl: &dyn Changelog) -> BTreeSet<Revision> {
        let obsolete = self.obsolete_revs(cl);
        let mut out = BTreeSet::new();
        let mut cache = HashMap::new();
        for rev in 0..cl.len() as Revision {
            if cl.is_public(rev) || obsolete.contains(&rev) {
                continue;
            }
            let node = cl.node(rev);
            let mut to_process: Vec<Node> = self
                .precursors
                .get(&node)
                .map(|idxs| idxs.iter().map(|&i| self.markers[i].precursor).collect())
                .unwrap_or_default();
            let mut seen: HashSet<Node> = HashSet::new();
            while let Some(prec) = to_process.pop() {
                if !seen.insert(prec) {
                    // emergency cycle-hanging prevention.
                    continue;
                }
                let sets = self.successors_sets(prec, &mut cache);
                let non_pruned = sets.iter().filter(|s| !s.is_empty()).count();
                if non_pruned > 1 {
                    out.insert(rev);
                    break;
                }
                if let Some(idxs) = self.precursors.get(&prec) {
                    to_process.extend(idxs.iter().map(|&i| self.markers[i].precursor));
                }
            }
        }
        out
    }
}

/// Deduplicates `sets` and removes any set that is a superset of another,
/// leaving an antichain. Matches the original's `sorted(..., key=len,
/// reverse=True)` plus subset-filtering pass, then its final
/// `final.reverse()` so the smallest surviving set sorts first.
fn dedup_antichain(mut sets: Vec<Vec<Node>>) -> Vec<Vec<Node>> {
    if sets.len() <= 1 {
        return sets;
    }
    sets.sort_by(|a, b| b.len().cmp(&a.len()));
    let mut accepted: Vec<HashSet<Node>> = Vec::new();
    let mut final_sets: Vec<Vec<Node>> = Vec::new();
    for candidate in sets {
        let as_set: HashSet<Node> = candidate.iter().copied().collect();
        if accepted.iter().any(|prev| as_set.is_subset(prev)) {
            continue;
        }
        accepted.push(as_set);
        final_sets.push(candidate);
    }
    final_sets.reverse();
    final_sets
}
