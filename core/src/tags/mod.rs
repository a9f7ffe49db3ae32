//! Tag resolution: `.hgtags`-format parsing and merge logic (`file`), the
//! secondary `cache/tags2[-<filter>]` cache (`cache`), the resolver that
//! ties them together with the tag filenode cache (`resolver`), and the
//! `tag()` write path (`tag_op`).

pub mod cache;
pub mod file;
pub mod resolver;
pub mod tag_op;

pub use file::{read_tag_hist, read_tags, update_tags, TagBinding};
pub use resolver::resolve;
pub use tag_op::{write_tags, TagWrite, HGTAGS_FILE, LOCALTAGS_FILE};
