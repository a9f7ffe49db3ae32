//! Copy/rename tracing: the ancestor-walk cutoff (`findlimit`), directed
//! copy-map construction along a line of history (`forward`), and merge-time
//! copy/rename/divergence detection (`merge`). Grounded throughout in
//! `examples/original_source/mercurial/copies.py`.

pub mod findlimit;
pub mod forward;
pub mod merge;

pub use findlimit::find_limit;
pub use forward::{backward_renames, chain, forward_copies, path_copies};
pub use merge::{duplicate_copies, merge_copies, MergeCopies};
