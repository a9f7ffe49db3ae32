//! `.hgtags`-format line parsing and tag-history merge logic.
//!
//! Grounded in `examples/original_source/mercurial/tags.py`'s
//! `_readtaghist`/`_readtags`/`_updatetags`.

use crate::node::Node;
use std::collections::HashMap;

/// A tag's current binding plus every node it was previously bound to,
/// oldest first, matching `repo._tagscache.tags[name]` ("node", "hist...").
pub type TagBinding = (Node, Vec<Node>);

/// Parses `.hgtags`-format lines (`"<hex40> <name>"`) into `name ->
/// [node, ...]`, oldest binding first. Blank lines, lines that don't split
/// on whitespace, and unparsable nodes are silently skipped and logged,
/// matching `_readtaghist`'s tolerant parse.
pub fn read_tag_hist<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, Vec<Node>> {
    let mut hist: HashMap<String, Vec<Node>> = HashMap::new();
    for (lineno, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        let (hex, name) = match line.split_once(' ') {
            Some(pair) => pair,
            None => {
                log::debug!("tags, line {}: cannot parse entry", lineno);
                continue;
            }
        };
        let name = name.trim_end();
        if name.is_empty() {
            log::debug!("tags, line {}: node {:?} has no tag name", lineno, hex);
            continue;
        }
        let node = match Node::from_hex(hex) {
            Ok(n) => n,
            Err(_) => {
                log::debug!("tags, line {}: node {:?} is not well formed", lineno, hex);
                continue;
            }
        };
        hist.entry(name.to_string()).or_default().push(node);
    }
    hist
}

/// Collapses `read_tag_hist`'s per-name node lists into `(current, prior)`
/// bindings: the last line read for a name is current, everything earlier
/// is history, oldest first.
pub fn read_tags<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, TagBinding> {
    read_tag_hist(lines)
        .into_iter()
        .map(|(name, mut nodes)| {
            let current = nodes.pop().expect("read_tag_hist never stores an empty vec");
            (name, (current, nodes))
        })
        .collect()
}

/// Merges `incoming` (tag bindings read from one `.hgtags` revision, or one
/// cache's worth of history) into `alltags`, applying `_updatetags`'s
/// precedence rule: the incoming binding normally wins, but the existing
/// one is kept when it supersedes incoming (its node appears in incoming's
/// history, and either incoming's node doesn't symmetrically appear in the
/// existing history or the existing history is strictly longer). Callers
/// merge oldest-revision-first so that, for any name, the final entry in
/// `alltags` reflects the tip-most binding.
pub fn update_tags(incoming: HashMap<String, TagBinding>, alltags: &mut HashMap<String, TagBinding>) {
    for (name, (anode, mut ahist)) in incoming {
        let mut anode = anode;
        if let Some((bnode, bhist)) = alltags.remove(&name) {
            if bnode != anode && bhist.contains(&anode) && (!ahist.contains(&bnode) || bhist.len() > ahist.len()) {
                anode = bnode;
            }
            for n in bhist {
                if !ahist.contains(&n) {
                    ahist.push(n);
                }
            }
        }
        alltags.insert(name, (anode, ahist));
    }
}
