//! End-to-end scenarios against the in-memory primitives from `primitives::mem`.
//!
//! Each test here exercises one component as a whole rather than a single
//! function, the way `kv/tests/` drives the in-memory `Engine` end to end.

use vcscore::node::Node;
use vcscore::obsstore::{framing, Marker, ObsStore};
use vcscore::primitives::mem::{MemManifest, MemRepo};
use vcscore::primitives::{Changelog, Ctx};
use vcscore::tagcache::FnodeCache;
use vcscore::transaction::{rollback, Transaction};
use vcscore::copytrace::{merge_copies, path_copies};
use vcscore::vfs::Vfs;
use std::collections::HashMap;

fn node(byte: u8) -> Node {
    Node::from_bytes(&[byte; 20]).unwrap()
}

fn marker(
    precursor: Node,
    successors: Vec<Node>,
    metadata: Vec<(&str, &str)>,
    date: (f64, i32),
    parents: Option<Vec<Node>>,
) -> Marker {
    Marker {
        precursor,
        successors,
        flags: 0,
        metadata: metadata.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        date,
        parents,
    }
}

/// S1: obsstore round-trip, v1 framing.
#[test]
fn obsstore_round_trip_v1() {
    let vfs = vcscore::vfs::MemVfs::new();
    let a = node(1);
    let b = node(2);
    let c = node(3);
    let d = node(4);
    let a_parent = node(5);

    let m1 = marker(a, vec![b], vec![], (1000.0, 0), None);
    let m2 = marker(b, vec![c, d], vec![("user", "u")], (1001.0, -120), Some(vec![a_parent]));

    {
        let mut store = ObsStore::new(&vfs, "obsstore", framing::VERSION_V1).unwrap();
        let mut tr = Transaction::begin(&vfs, "journal").unwrap();
        let added = store.add(&mut tr, &[m1.clone(), m2.clone()]).unwrap();
        assert_eq!(added, 2);
        tr.close().unwrap();
    }

    // Reload from disk, as a fresh process would after a restart.
    let reloaded = ObsStore::new(&vfs, "obsstore", framing::VERSION_V1).unwrap();
    assert_eq!(reloaded.markers().len(), 2);

    // successorssets(A) follows M1 into B, then M2 splits B into {C} and {D}.
    let mut succ_of_a = reloaded.successors_sets(a, &mut HashMap::new());
    succ_of_a.sort();
    let mut expected = vec![vec![c], vec![d]];
    expected.sort();
    assert_eq!(succ_of_a, expected);

    let relevant_for_c = reloaded.relevant_markers(&[c]);
    assert_eq!(relevant_for_c.len(), 2, "both M1 and M2 are on the path to C");
    let relevant_for_d = reloaded.relevant_markers(&[d]);
    assert_eq!(relevant_for_d.len(), 2);

    let markers_touching_a_parent: Vec<_> =
        reloaded.markers().iter().filter(|m| m.parents.as_deref() == Some(&[a_parent][..])).collect();
    assert_eq!(markers_touching_a_parent.len(), 1);

    let file_len = vfs.len("obsstore").unwrap();
    let frame1 = framing::encode_marker(&m1, framing::VERSION_V1).unwrap().len();
    let frame2 = framing::encode_marker(&m2, framing::VERSION_V1).unwrap().len();
    assert!(file_len as usize >= 1 + frame1 + frame2);
}

/// S2: successorssets across a split with a prune in the middle.
#[test]
fn successorssets_split_with_prune() {
    let vfs = vcscore::vfs::MemVfs::new();
    let mut store = ObsStore::new(&vfs, "obsstore", framing::VERSION_V1).unwrap();
    let mut tr = Transaction::begin(&vfs, "journal").unwrap();

    let a = node(1);
    let b = node(2);
    let c = node(3);
    // A -> (B, C); B -> () (pruned).
    store
        .add(&mut tr, &[marker(a, vec![b, c], vec![], (0.0, 0), None), marker(b, vec![], vec![], (0.0, 0), None)])
        .unwrap();
    tr.close().unwrap();

    let sets = store.successors_sets(a, &mut HashMap::new());
    // B's pruned branch contributes an empty tail, C contributes itself:
    // the Cartesian product collapses to the single tuple (C,).
    assert_eq!(sets, vec![vec![c]]);
}

/// S2': successorssets across genuine divergence (two independent markers
/// naming the same precursor).
#[test]
fn successorssets_divergence() {
    let vfs = vcscore::vfs::MemVfs::new();
    let mut store = ObsStore::new(&vfs, "obsstore", framing::VERSION_V1).unwrap();
    let mut tr = Transaction::begin(&vfs, "journal").unwrap();

    let a = node(1);
    let b = node(2);
    let c = node(3);
    store.add(&mut tr, &[marker(a, vec![b], vec![], (0.0, 0), None), marker(a, vec![c], vec![], (1.0, 0), None)]).unwrap();
    tr.close().unwrap();

    let mut sets = store.successors_sets(a, &mut HashMap::new());
    sets.sort();
    let mut expected = vec![vec![b], vec![c]];
    expected.sort();
    assert_eq!(sets, expected);
}

/// S3: a transaction that never reaches `close` (simulating a crash before
/// the process could roll back) is recovered by the standalone `rollback`.
#[test]
fn transaction_rollback_after_crash() {
    let vfs = vcscore::vfs::MemVfs::new();
    vfs.write("F", &[0u8; 100]).unwrap();

    {
        let mut tr = Transaction::begin(&vfs, "journal").unwrap();
        tr.add("F", 100).unwrap();
        vfs.append("F", &[1u8; 50]).unwrap();
        assert_eq!(vfs.len("F").unwrap(), 150);
        // Simulate a hard crash: the transaction's own `Drop` never runs,
        // so this leaves the journal on disk exactly as a killed process
        // would.
        std::mem::forget(tr);
    }

    let mut reports = Vec::new();
    rollback(&vfs, "journal", &mut |msg| reports.push(msg.to_string())).unwrap();
    assert_eq!(vfs.len("F").unwrap(), 100);
    assert!(!vfs.exists("journal"));
}

/// S4: the tag filenode cache recomputes a stale record and then serves it
/// from cache without recomputing again.
#[test]
fn fnode_cache_recomputes_stale_record() {
    let vfs = vcscore::vfs::MemVfs::new();
    let mut cache = FnodeCache::load(&vfs, "cache/hgtagsfnodes1", 20, 6).unwrap();

    let n5 = node(5);
    let stale_fnode = node(9);
    // Plant a record at rev 5 whose stored node prefix doesn't match N5,
    // the way a history-rewrite would leave a stale entry behind.
    cache.setfnode(node(0xAA), 5, stale_fnode).unwrap();

    let mut compute_calls = 0;
    let recomputed = node(7);
    let got = cache
        .getfnode(n5, 5, true, || {
            compute_calls += 1;
            Ok(recomputed)
        })
        .unwrap();
    assert_eq!(got, Some(recomputed));
    assert_eq!(compute_calls, 1);

    let mut second_calls = 0;
    let got_again = cache.getfnode(n5, 5, false, || {
        second_calls += 1;
        unreachable!("cache hit must not recompute")
    });
    assert_eq!(got_again.unwrap(), Some(recomputed));
    assert_eq!(second_calls, 0);
}

/// S5: a whole-directory rename is inferred as a directory move when the
/// other side of the merge adds a new file under the old directory.
#[test]
fn directory_rename_inferred_on_sibling_add() {
    let mut repo = MemRepo::new();

    let mut base_manifest = MemManifest::new();
    base_manifest.insert("a/one.txt", node(1), 0);
    let base = repo.commit(node(10), (None, None), true, base_manifest);

    // c1 renames every file under a/ to b/.
    let mut c1_manifest = MemManifest::new();
    c1_manifest.insert("b/one.txt", node(1), 0);
    let c1 = repo.commit(node(11), (Some(base), None), false, c1_manifest);
    repo.filelog_mut("b/one.txt").add(node(1), b"one".to_vec(), c1, (None, None));
    repo.filelog_mut("b/one.txt").set_renamed(0, "a/one.txt", 0);
    repo.filelog_mut("a/one.txt").add(node(1), b"one".to_vec(), base, (None, None));

    // c2 (sibling of c1) adds a new file under a/.
    let mut c2_manifest = MemManifest::new();
    c2_manifest.insert("a/one.txt", node(1), 0);
    c2_manifest.insert("a/new.txt", node(2), 0);
    let c2 = repo.commit(node(12), (Some(base), None), false, c2_manifest);
    repo.filelog_mut("a/new.txt").add(node(2), b"new".to_vec(), c2, (None, None));

    let c1_ctx = repo.ctx(c1);
    let c2_ctx = repo.ctx(c2);
    let base_ctx = repo.ctx(base);

    let result = merge_copies(&repo, &repo.changelog, &c1_ctx, &c2_ctx, &base_ctx, false, None, None);
    assert_eq!(result.movewithdir.get("a/new.txt"), Some(&"b/new.txt".to_string()));
}

/// S6: `pathcopies` chains a rename recorded partway down a linear history.
#[test]
fn pathcopies_chains_through_linear_history() {
    let mut repo = MemRepo::new();

    let mut base_manifest = MemManifest::new();
    base_manifest.insert("f", node(1), 0);
    let base = repo.commit(node(20), (None, None), true, base_manifest);

    let mut x_manifest = MemManifest::new();
    x_manifest.insert("f", node(1), 0);
    let x = repo.commit(node(21), (Some(base), None), false, x_manifest);

    // f is renamed to g between X and Y.
    let mut y_manifest = MemManifest::new();
    y_manifest.insert("g", node(1), 0);
    let y = repo.commit(node(22), (Some(x), None), false, y_manifest);

    repo.filelog_mut("f").add(node(1), b"content".to_vec(), base, (None, None));
    repo.filelog_mut("g").add(node(1), b"content".to_vec(), y, (None, None));
    repo.filelog_mut("g").set_renamed(0, "f", 0);

    let base_ctx = repo.ctx(base);
    let x_ctx = repo.ctx(x);
    let y_ctx = repo.ctx(y);

    let forward = path_copies(&repo, &repo.changelog, &base_ctx, &y_ctx);
    assert_eq!(forward.get("g"), Some(&"f".to_string()));

    let backward = path_copies(&repo, &repo.changelog, &y_ctx, &base_ctx);
    assert_eq!(backward.get("f"), Some(&"g".to_string()));

    let within_rename = path_copies(&repo, &repo.changelog, &x_ctx, &y_ctx);
    assert_eq!(within_rename.get("g"), Some(&"f".to_string()));
}

/// Sanity check that the in-memory changelog used across every scenario
/// above reports ancestry the way the copy tracer and fnode cache assume.
#[test]
fn mem_repo_ctx_provider_resolves_every_committed_revision() {
    let mut repo = MemRepo::new();
    let manifest = MemManifest::new();
    let rev = repo.commit(node(1), (None, None), true, manifest);
    let ctx = repo.ctx(rev);
    assert_eq!(ctx.node(), node(1));
    assert_eq!(repo.changelog.len(), 1);
}
