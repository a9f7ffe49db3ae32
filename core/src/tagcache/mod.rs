//! The tag filenode cache (TFC): a fixed-record array mapping changelog
//! revision -> `.hgtags` filenode, so the tag resolver can avoid a manifest
//! lookup per head. Grounded in
//! `examples/original_source/mercurial/tags.py`'s `hgtagsfnodescache`.

mod fnodecache;

pub use fnodecache::{FnodeCache, FNODE_RECORD_LEN, MISSING_SENTINEL_BYTE};
