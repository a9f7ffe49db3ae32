//! `vcscore` is the storage core of a Mercurial-like distributed version
//! control system: obsolescence markers and the revision sets derived from
//! them, a journaled write-ahead transaction manager, the tag filenode cache
//! and tag resolver, and the copy/rename tracer used by merges.
//!
//! What it deliberately leaves out — revlog storage, the working directory,
//! the wire protocol, phases — is covered in `SPEC_FULL.md` §1's Non-goals;
//! `primitives` is the seam a real repository implementation plugs into.
//!
//! ## Getting started
//!
//! ```rust
//! use vcscore::config::Config;
//! use vcscore::node::Node;
//! use vcscore::obsstore::ObsStore;
//! use vcscore::transaction::Transaction;
//! use vcscore::vfs::{MemVfs, Vfs};
//!
//! fn main() -> vcscore::error::CResult<()> {
//!     let vfs = MemVfs::new();
//!     let config = Config::default();
//!     let mut store = ObsStore::new(&vfs, "store/obsstore", config.obsstore_version.as_byte())?;
//!
//!     let precursor = Node::from_hex("000000000000000000000000000000000000000a")?;
//!     let successor = Node::from_hex("000000000000000000000000000000000000000b")?;
//!
//!     let mut tr = Transaction::begin(&vfs, "store/journal")?;
//!     store.create(&mut tr, precursor, vec![successor], 0, None, (0.0, 0), vec![], true)?;
//!     tr.close()?;
//!
//!     assert_eq!(store.markers().len(), 1);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod copytrace;
pub mod error;
pub mod node;
pub mod obsstore;
pub mod primitives;
pub mod repo;
pub mod tagcache;
pub mod tags;
pub mod transaction;
pub mod vfs;
