//! The tag-history secondary cache (`cache/tags2[-<filter>]`).
//!
//! Grounded in `tags.py`'s `_readtagcache`/`_writetagcache`: a validation
//! line (`"<tiprev> <tiphex>[ <filteredhex>]"`) followed by one
//! `"<hex> <name>"` line per historic and current binding, history first,
//! tags sorted by name.

use crate::node::{Node, Revision};
use crate::tags::file::{read_tags, TagBinding};
use crate::vfs::Vfs;
use std::collections::HashMap;

pub fn cache_path(filter_name: Option<&str>) -> String {
    match filter_name {
        Some(f) => format!("cache/tags2-{}", f),
        None => "cache/tags2".to_string(),
    }
}

/// Reads and validates the secondary cache at `path`. Returns `Some(tags)`
/// only when the validation line's `(tiprev, tipnode, filtered_hash)`
/// matches exactly; a missing file, unparsable header, or any mismatch is
/// treated as "cache is stale" and returns `None`, matching
/// `_readtagcache`'s blanket `except Exception: pass`.
pub fn read_cache(
    vfs: &dyn Vfs,
    path: &str,
    tiprev: Option<Revision>,
    tipnode: Node,
    filtered_hash: Option<Node>,
) -> Option<HashMap<String, TagBinding>> {
    let data = vfs.try_read(path).ok().flatten()?;
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.lines();
    let header = lines.next()?;
    let mut parts = header.split_whitespace();

    let cacherev: i64 = parts.next()?.parse().ok()?;
    let cachenode = Node::from_hex(parts.next()?).ok()?;
    let cachehash = match parts.next() {
        Some(h) => Some(Node::from_hex(h).ok()?),
        None => None,
    };

    let want_rev = tiprev.map(|r| r as i64).unwrap_or(-1);
    if cacherev != want_rev || cachenode != tipnode || cachehash != filtered_hash {
        return None;
    }
    Some(read_tags(lines))
}

/// Writes the validation line plus sorted tag history to `path`.
pub fn write_cache(
    vfs: &dyn Vfs,
    path: &str,
    tiprev: Option<Revision>,
    tipnode: Node,
    filtered_hash: Option<Node>,
    tags: &HashMap<String, TagBinding>,
) -> crate::error::CResult<()> {
    let want_rev = tiprev.map(|r| r as i64).unwrap_or(-1);
    let mut out = match filtered_hash {
        Some(h) => format!("{} {} {}\n", want_rev, tipnode.to_hex(), h.to_hex()),
        None => format!("{} {}\n", want_rev, tipnode.to_hex()),
    };

    let mut names: Vec<&String> = tags.keys().collect();
    names.sort();
    for name in names {
        let (node, hist) = &tags[name];
        for old in hist {
            out.push_str(&format!("{} {}\n", old.to_hex(), name));
        }
        out.push_str(&format!("{} {}\n", node.to_hex(), name));
    }
    vfs.write(path, out.as_bytes())
}
