//! The tag resolver (TR): computes the global `{name -> (node, history)}`
//! map, consulting the tag filenode cache to avoid a manifest lookup at
//! every head and the `cache/tags2[-<filter>]` secondary cache to avoid
//! re-reading `.hgtags` entirely when the repository tip hasn't moved.
//!
//! Grounded in `tags.py::findglobaltags`/`_readtagcache`/`_getfnodes`.

use crate::error::CResult;
use crate::node::Node;
use crate::primitives::{Changelog, CtxProvider};
use crate::tagcache::FnodeCache;
use crate::tags::cache;
use crate::tags::file::{read_tags, update_tags, TagBinding};
use crate::vfs::Vfs;
use std::collections::{HashMap, HashSet};

pub const TAGS_FILE: &str = ".hgtags";

/// Computes the global tag map for `cl`. `filter_name` selects which
/// secondary-cache file to read/write; `filtered_hash`, when the caller's
/// filter excludes any revisions, is an externally computed digest of the
/// filtered set used purely as a cache invalidation key (hashing a revset
/// is a revlog/filtering concern, out of this crate's scope per
/// `SPEC_FULL.md` §1 — callers without a filter pass `None`).
pub fn resolve(
    vfs: &dyn Vfs,
    cl: &dyn Changelog,
    ctx_provider: &dyn CtxProvider,
    fnode_cache: &mut FnodeCache,
    filter_name: Option<&str>,
    filtered_hash: Option<Node>,
) -> CResult<HashMap<String, TagBinding>> {
    let cache_path = cache::cache_path(filter_name);
    let tiprev = cl.tip();
    let tipnode = match tiprev {
        Some(r) => cl.node(r),
        None => Node::NULL_SHA1,
    };

    if let Some(cached) = cache::read_cache(vfs, &cache_path, tiprev, tipnode, filtered_hash) {
        return Ok(cached);
    }

    let mut heads = cl.heads();
    if heads.is_empty() {
        // Case 2: empty repository. Nothing to compute, nothing worth
        // caching (`_readtagcache`'s `shouldwrite = False` branch).
        return Ok(HashMap::new());
    }
    heads.sort_unstable();

    let tiprev = tiprev.expect("heads is non-empty implies a non-empty changelog");
    let tip_ctx = ctx_provider.ctx(tiprev);
    let has_tags_file = tip_ctx.filelog(TAGS_FILE).map(|fl| fl.len() > 0).unwrap_or(false);
    if !has_tags_file {
        // Case 3 fast path: `.hgtags` has never existed in this repository.
        fnode_cache.write()?;
        cache::write_cache(vfs, &cache_path, Some(tiprev), tipnode, filtered_hash, &HashMap::new())?;
        return Ok(HashMap::new());
    }

    let mut alltags: HashMap<String, TagBinding> = HashMap::new();
    let mut seen_fnodes: HashSet<Node> = HashSet::new();

    for rev in heads {
        let node = cl.node(rev);
        let ctx = ctx_provider.ctx(rev);
        let manifest_lookup = ctx.manifest().lookup(TAGS_FILE);
        let fnode = fnode_cache
            .getfnode(node, rev, true, || match manifest_lookup {
                Some(n) => Ok(n),
                None => Node::null_of_len(node.len()),
            })?
            .expect("computemissing=true always returns Some");

        if fnode.is_null() || !seen_fnodes.insert(fnode) {
            continue;
        }
        let filelog = match ctx.filelog(TAGS_FILE) {
            Some(fl) => fl,
            None => continue,
        };
        let frev = match filelog.rev_of(&fnode) {
            Some(r) => r,
            None => continue,
        };

        let content = filelog.revision(frev);
        let text = String::from_utf8_lossy(&content);
        let filetags = read_tags(text.lines());
        update_tags(filetags, &mut alltags);
    }

    fnode_cache.write()?;
    cache::write_cache(vfs, &cache_path, Some(tiprev), tipnode, filtered_hash, &alltags)?;

    Ok(alltags)
}
