//! Fixed-record `.hgtags` filenode cache.
//!
//! Each record is `4 + nodesize` bytes: a 4-byte prefix of the changeset
//! node, verifying the record still describes the revision it claims to,
//! followed by the filenode of `.hgtags` at that changeset. Record `i`
//! belongs to changelog revision `i`. The sentinel record (all `0xFF`) means
//! "not yet computed".
//!
//! Grounded in `hgtagsfnodescache` (`examples/original_source/mercurial/tags.py`),
//! including its `_dirtyoffset` tracking (only the dirty suffix is ever
//! rewritten) and its silent, best-effort write lock.

use crate::error::CResult;
use crate::node::{Node, Revision};
use crate::vfs::Vfs;

/// `4` (node prefix) + `nodesize` (20 for SHA-1, 32 for SHA-256). The
/// original predates SHA-256 and hardcodes 24; this crate parameterizes on
/// the repository's configured node width so the same cache format stays
/// coherent for both node sizes `Node` supports.
pub fn record_len(nodesize: usize) -> usize {
    4 + nodesize
}

/// Backwards-compatible constant for the common SHA-1 case (`4 + 20`),
/// matching spec.md §3's literal "24 bytes".
pub const FNODE_RECORD_LEN: usize = 24;
pub const MISSING_SENTINEL_BYTE: u8 = 0xFF;

pub struct FnodeCache<'a> {
    vfs: &'a dyn Vfs,
    path: String,
    nodesize: usize,
    raw: Vec<u8>,
    /// Smallest offset that differs from what's on disk; `None` means
    /// nothing to flush.
    dirty_offset: Option<usize>,
    pub lookupcount: u64,
    pub hitcount: u64,
}

impl<'a> FnodeCache<'a> {
    /// Loads the cache from `path` (if it exists) and extends/truncates the
    /// in-memory copy to exactly `changelog_len` records, matching the
    /// constructor's `wantedlen = cllen * _fnodesrecsize` reconciliation.
    pub fn load(vfs: &'a dyn Vfs, path: impl Into<String>, nodesize: usize, changelog_len: usize) -> CResult<Self> {
        let path = path.into();
        let mut raw = vfs.try_read(&path)?.unwrap_or_default();
        let rec_len = record_len(nodesize);
        let wanted_len = changelog_len * rec_len;
        let raw_len = raw.len();

        let mut dirty_offset = None;
        if raw_len < wanted_len {
            dirty_offset = Some(raw_len);
            raw.resize(wanted_len, MISSING_SENTINEL_BYTE);
        } else if raw_len > wanted_len {
            raw.truncate(wanted_len);
            dirty_offset = Some(raw.len());
        }

        Ok(FnodeCache { vfs, path, nodesize, raw, dirty_offset, lookupcount: 0, hitcount: 0 })
    }

    fn record_len(&self) -> usize {
        record_len(self.nodesize)
    }

    fn is_sentinel(record: &[u8]) -> bool {
        record.iter().all(|b| *b == MISSING_SENTINEL_BYTE)
    }

    fn record_at(&self, rev: Revision) -> &[u8] {
        let rl = self.record_len();
        let off = rev as usize * rl;
        &self.raw[off..off + rl]
    }

    /// Looks up the `.hgtags` filenode at `node`/`rev`. On a cache hit
    /// (prefix matches), returns it directly. On a miss or mismatch: if
    /// `computemissing` is false, returns `None` without doing any work;
    /// otherwise calls `compute` (expected to consult the manifest) and
    /// persists the result, returning `Ok(Some(fnode))`.
    pub fn getfnode(
        &mut self,
        node: Node,
        rev: Revision,
        computemissing: bool,
        compute: impl FnOnce() -> CResult<Node>,
    ) -> CResult<Option<Node>> {
        self.lookupcount += 1;
        let rec_len = self.record_len();
        let record = self.record_at(rev);
        if !Self::is_sentinel(record) {
            let prefix = &record[..4];
            if prefix == &node.prefix4()[..] {
                self.hitcount += 1;
                return Ok(Some(Node::from_bytes(&record[4..])?));
            }
        }

        if !computemissing {
            return Ok(None);
        }

        let fnode = compute()?;
        self.write_entry(rev as usize * rec_len, node.prefix4(), fnode);
        Ok(Some(fnode))
    }

    /// Unconditionally sets the `.hgtags` filenode for `rev`, used when the
    /// caller already computed it as a side effect of something else. A
    /// no-op if the cached value already matches (avoids marking the cache
    /// dirty for nothing).
    pub fn setfnode(&mut self, node: Node, rev: Revision, fnode: Node) -> CResult<()> {
        if self.getfnode(node, rev, false, || unreachable!())? == Some(fnode) {
            return Ok(());
        }
        let rec_len = self.record_len();
        self.write_entry(rev as usize * rec_len, node.prefix4(), fnode);
        Ok(())
    }

    fn write_entry(&mut self, offset: usize, prefix: [u8; 4], fnode: Node) {
        let rec_len = self.record_len();
        self.raw[offset..offset + 4].copy_from_slice(&prefix);
        self.raw[offset + 4..offset + rec_len].copy_from_slice(fnode.as_bytes());
        self.dirty_offset = Some(self.dirty_offset.map_or(offset, |d| d.min(offset)));
    }

    /// Flushes the dirty suffix to disk, extending the on-disk file as
    /// needed. Acquires a non-blocking write lock first; if the lock can't
    /// be acquired, this silently does nothing (the cache is a pure
    /// optimisation, per spec.md §4.3/§5 and §7's "secondary-cache errors
    /// are always swallowed").
    pub fn write(&mut self) -> CResult<()> {
        let dirty_offset = match self.dirty_offset {
            None => return Ok(()),
            Some(o) => o,
        };
        if dirty_offset >= self.raw.len() {
            self.dirty_offset = None;
            return Ok(());
        }

        let lock_path = format!("{}.lock", self.path);
        let _guard = match self.vfs.try_lock(&lock_path) {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("not writing {} because lock cannot be acquired", self.path);
                return Ok(());
            }
        };

        let on_disk_len = self.vfs.try_read(&self.path)?.map(|d| d.len()).unwrap_or(0);
        let actual_offset = on_disk_len.min(dirty_offset);
        let data = &self.raw[actual_offset..];
        if actual_offset == 0 {
            self.vfs.write(&self.path, &self.raw)?;
        } else {
            self.vfs.truncate(&self.path, actual_offset as u64)?;
            self.vfs.append(&self.path, data)?;
        }
        self.dirty_offset = None;
        Ok(())
    }
}
