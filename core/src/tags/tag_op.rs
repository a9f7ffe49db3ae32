//! The `tag()` write path: appends a new binding to `.hgtags` or
//! `localtags`.
//!
//! Grounded in `tags.py::_tag`'s `writetags` closure. `.hgtags` is a
//! tracked file whose append is recorded against a transaction so it rolls
//! back with everything else in the commit that introduces it; `localtags`
//! is untracked (never committed) and is written directly, matching the
//! local/non-local branches in the original taking different openers.

use crate::error::CResult;
use crate::node::Node;
use crate::transaction::Transaction;
use crate::vfs::Vfs;

pub const HGTAGS_FILE: &str = ".hgtags";
pub const LOCALTAGS_FILE: &str = "localtags";

/// One `name` being (re)bound to `node`, with `previous` set to the name's
/// prior resolved node when the name was already a known tag — the
/// original additionally writes that prior binding first so a subsequent
/// read sees both the deprecated and the new line (`_tag`'s `old =
/// repo.tags().get(name, nullid)`).
pub struct TagWrite<'a> {
    pub name: &'a str,
    pub previous: Option<Node>,
}

/// Appends one `"<hex> <name>"` line per write in `writes` (preceded by the
/// previous binding's line when present) to `path`, creating the file if
/// absent and inserting a leading newline if the existing content doesn't
/// already end in one. Pass `tr: Some(..)` for `.hgtags` so the append is
/// rolled back with the rest of the transaction; pass `None` for
/// `localtags`, which Mercurial never tracks.
pub fn write_tags(
    vfs: &dyn Vfs,
    tr: Option<&mut Transaction>,
    path: &str,
    node: Node,
    writes: &[TagWrite],
) -> CResult<()> {
    let existing = vfs.try_read(path)?.unwrap_or_default();
    if let Some(tr) = tr {
        tr.add(path, existing.len() as u64)?;
    }

    let mut out = existing;
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    for write in writes {
        if let Some(old) = write.previous {
            out.extend_from_slice(format!("{} {}\n", old.to_hex(), write.name).as_bytes());
        }
        out.extend_from_slice(format!("{} {}\n", node.to_hex(), write.name).as_bytes());
    }
    vfs.write(path, &out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vfs::MemVfs;

    fn node(byte: u8) -> Node {
        Node::from_bytes(&[byte; 20]).unwrap()
    }

    #[test]
    fn appends_to_empty_file() {
        let vfs = MemVfs::new();
        write_tags(&vfs, None, HGTAGS_FILE, node(1), &[TagWrite { name: "v1.0", previous: None }]).unwrap();
        assert_eq!(vfs.read(HGTAGS_FILE).unwrap(), format!("{} v1.0\n", node(1).to_hex()).into_bytes());
    }

    #[test]
    fn inserts_newline_before_appending_to_unterminated_file() {
        let vfs = MemVfs::new();
        vfs.write(HGTAGS_FILE, format!("{} v1.0", node(1).to_hex()).as_bytes()).unwrap();
        write_tags(&vfs, None, HGTAGS_FILE, node(2), &[TagWrite { name: "v2.0", previous: None }]).unwrap();
        let expect = format!("{} v1.0\n{} v2.0\n", node(1).to_hex(), node(2).to_hex());
        assert_eq!(vfs.read(HGTAGS_FILE).unwrap(), expect.into_bytes());
    }

    #[test]
    fn writes_previous_binding_before_new_one() {
        let vfs = MemVfs::new();
        write_tags(
            &vfs,
            None,
            HGTAGS_FILE,
            node(2),
            &[TagWrite { name: "v1.0", previous: Some(node(1)) }],
        )
        .unwrap();
        let expect = format!("{} v1.0\n{} v1.0\n", node(1).to_hex(), node(2).to_hex());
        assert_eq!(vfs.read(HGTAGS_FILE).unwrap(), expect.into_bytes());
    }
}
