//! Journaled write-ahead transaction manager.
//!
//! A `Transaction` records, for every file it touches, the offset it had
//! before the transaction started. Aborting (explicitly, or by being
//! dropped without `close()`) truncates each file back to that offset, or
//! removes backup copies it made along the way. This is the only component
//! in this crate responsible for coordinating writes across more than one
//! file atomically.

use crate::error::{CResult, Error};
use crate::transaction::record::{
    encode_backup_entry, encode_entry, parse_backup_journal, parse_journal, BackupEntry, Entry,
    JOURNAL_VERSION,
};
use crate::vfs::Vfs;
use std::collections::BTreeMap;

type PendingCallback<'a> = Box<dyn FnOnce() -> bool + 'a>;
type FinalizeCallback<'a> = Box<dyn FnMut() + 'a>;

struct FileGenerator<'a> {
    order: i64,
    filenames: Vec<String>,
    genfunc: Box<dyn FnMut(&[String]) -> CResult<Vec<Vec<u8>>> + 'a>,
    /// `None` means "the transaction's own opener"; the only other value
    /// ever used for a real filename tuple is the bookmarks file, which is
    /// the one case this mechanism has no proper backup/restore story for.
    vfs: Option<&'a dyn Vfs>,
}

/// A write-ahead transaction over one or more files addressed through a
/// `Vfs`. Mirrors the original journal-replay scheme: `journal` records
/// per-file truncate offsets, `journal.backupfiles` records hardlink/copy
/// backups to restore on abort.
pub struct Transaction<'a> {
    vfs: &'a dyn Vfs,
    report: Box<dyn FnMut(&str) + 'a>,
    after: Option<Box<dyn FnOnce() + 'a>>,
    onclose: Option<Box<dyn FnOnce() + 'a>>,
    onabort: Option<Box<dyn FnOnce() + 'a>>,

    journal_path: String,
    backup_journal_path: String,
    journal_open: bool,

    count: u32,
    usages: u32,

    entries: Vec<Entry>,
    backup_entries: Vec<BackupEntry>,
    map: BTreeMap<String, usize>,
    backup_map: BTreeMap<String, usize>,
    queue: Vec<(Vec<Entry>, Vec<BackupEntry>)>,

    file_generators: BTreeMap<String, FileGenerator<'a>>,
    pending_callbacks: BTreeMap<String, PendingCallback<'a>>,
    any_pending: bool,
    finalize_callbacks: BTreeMap<String, FinalizeCallback<'a>>,

    pub hookargs: BTreeMap<String, String>,
}

macro_rules! require_active {
    ($self:expr) => {
        if $self.count == 0 {
            return Err(Error::InvalidTransactionState);
        }
    };
}

impl<'a> Transaction<'a> {
    pub fn begin(vfs: &'a dyn Vfs, journal_path: &str) -> CResult<Self> {
        Self::begin_with_mode(vfs, journal_path, None)
    }

    pub fn begin_with_mode(
        vfs: &'a dyn Vfs,
        journal_path: &str,
        create_mode: Option<u32>,
    ) -> CResult<Self> {
        let backup_journal_path = format!("{}.backupfiles", journal_path);
        vfs.write(journal_path, b"")?;
        vfs.write(&backup_journal_path, format!("{}\n", JOURNAL_VERSION).as_bytes())?;
        if let Some(mode) = create_mode {
            vfs.chmod(journal_path, mode & 0o666)?;
            vfs.chmod(&backup_journal_path, mode & 0o666)?;
        }
        Ok(Transaction {
            vfs,
            report: Box::new(|_msg| {}),
            after: None,
            onclose: None,
            onabort: None,
            journal_path: journal_path.to_string(),
            backup_journal_path,
            journal_open: true,
            count: 1,
            usages: 1,
            entries: Vec::new(),
            backup_entries: Vec::new(),
            map: BTreeMap::new(),
            backup_map: BTreeMap::new(),
            queue: Vec::new(),
            file_generators: BTreeMap::new(),
            pending_callbacks: BTreeMap::new(),
            any_pending: false,
            finalize_callbacks: BTreeMap::new(),
            hookargs: BTreeMap::new(),
        })
    }

    pub fn on_report(&mut self, report: impl FnMut(&str) + 'a) {
        self.report = Box::new(report);
    }

    pub fn on_after(&mut self, after: impl FnOnce() + 'a) {
        self.after = Some(Box::new(after));
    }

    pub fn on_close(&mut self, onclose: impl FnOnce() + 'a) {
        self.onclose = Some(Box::new(onclose));
    }

    pub fn on_abort(&mut self, onabort: impl FnOnce() + 'a) {
        self.onabort = Some(Box::new(onabort));
    }

    pub fn running(&self) -> bool {
        self.count > 0
    }

    pub fn start_group(&mut self) -> CResult<()> {
        require_active!(self);
        self.queue.push((Vec::new(), Vec::new()));
        Ok(())
    }

    pub fn end_group(&mut self) -> CResult<()> {
        require_active!(self);
        let (group_entries, group_backups) =
            self.queue.pop().ok_or(Error::Programming("endgroup without startgroup".into()))?;

        let mut buf = String::new();
        for e in &group_entries {
            buf.push_str(&encode_entry(e));
        }
        if !buf.is_empty() {
            self.vfs.append(&self.journal_path, buf.as_bytes())?;
        }

        let mut backup_buf = String::new();
        for b in &group_backups {
            backup_buf.push_str(&encode_backup_entry(b));
        }
        if !backup_buf.is_empty() {
            self.vfs.append(&self.backup_journal_path, backup_buf.as_bytes())?;
        }

        self.entries.extend(group_entries);
        self.backup_entries.extend(group_backups);
        Ok(())
    }

    /// Records that `file` had length `offset` before this transaction
    /// touched it. A no-op if `file` is already tracked.
    pub fn add(&mut self, file: &str, offset: u64) -> CResult<()> {
        require_active!(self);
        if self.map.contains_key(file) || self.backup_map.contains_key(file) {
            return Ok(());
        }
        let entry = Entry { file: file.to_string(), offset };
        if let Some((group, _)) = self.queue.last_mut() {
            group.push(entry);
            return Ok(());
        }
        self.vfs.append(&self.journal_path, encode_entry(&entry).as_bytes())?;
        self.map.insert(file.to_string(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Backs up `file` by copying it aside so it can be restored on abort.
    /// If `file` doesn't exist yet, this degrades to recording a
    /// truncate-to-zero instead (there is nothing to back up).
    pub fn add_backup(&mut self, file: &str, vfs: Option<&dyn Vfs>) -> CResult<()> {
        require_active!(self);
        if self.map.contains_key(file) || self.backup_map.contains_key(file) {
            return Ok(());
        }
        let backup_path = format!("{}.backup.{}", self.journal_path, file);
        let source_vfs = vfs.unwrap_or(self.vfs);
        if !source_vfs.exists(file) {
            return self.add(file, 0);
        }
        let data = source_vfs.read(file)?;
        self.vfs.write(&backup_path, &data)?;

        let entry = BackupEntry { file: file.to_string(), backup_path };
        if let Some((_, group)) = self.queue.last_mut() {
            group.push(entry);
            return Ok(());
        }
        self.vfs.append(&self.backup_journal_path, encode_backup_entry(&entry).as_bytes())?;
        self.backup_map.insert(file.to_string(), self.backup_entries.len());
        self.backup_entries.push(entry);
        Ok(())
    }

    /// Registers a generator invoked once at `close()` time to produce the
    /// contents of `filenames`. Re-registering the same `genid` overwrites
    /// the previous registration. Files are generated in ascending `order`.
    ///
    /// Only the bookmarks file may use a non-default `vfs`; this mechanism
    /// has no backup/restore story for any other custom opener.
    pub fn add_file_generator(
        &mut self,
        genid: &str,
        filenames: &[&str],
        genfunc: impl FnMut(&[String]) -> CResult<Vec<Vec<u8>>> + 'a,
        order: i64,
        vfs: Option<&'a dyn Vfs>,
    ) -> CResult<()> {
        require_active!(self);
        if vfs.is_some() && filenames != ["bookmarks"] {
            return Err(Error::Programming(
                "custom vfs is only supported for the bookmarks file generator".into(),
            ));
        }
        self.file_generators.insert(
            genid.to_string(),
            FileGenerator {
                order,
                filenames: filenames.iter().map(|s| s.to_string()).collect(),
                genfunc: Box::new(genfunc),
                vfs,
            },
        );
        Ok(())
    }

    fn generate_files(&mut self) -> CResult<()> {
        let mut ordered: Vec<String> = self.file_generators.keys().cloned().collect();
        ordered.sort_by_key(|k| {
            let g = &self.file_generators[k];
            (g.order, g.filenames.clone())
        });
        for genid in ordered {
            let mut gen = self.file_generators.remove(&genid).unwrap();
            for name in &gen.filenames {
                if name != "phaseroots" && name != "bookmarks" {
                    self.add_backup(name, gen.vfs)?;
                }
            }
            let contents = (gen.genfunc)(&gen.filenames)?;
            let target_vfs = gen.vfs.unwrap_or(self.vfs);
            for (name, content) in gen.filenames.iter().zip(contents.into_iter()) {
                target_vfs.write(name, &content)?;
            }
        }
        Ok(())
    }

    pub fn find(&self, file: &str) -> Option<Entry> {
        self.map.get(file).map(|&i| self.entries[i].clone())
    }

    /// Overwrites the recorded offset for an already-tracked file. Only
    /// valid for files not currently buffered in an open group.
    pub fn replace(&mut self, file: &str, offset: u64) -> CResult<()> {
        require_active!(self);
        let idx = *self.map.get(file).ok_or_else(|| Error::Lookup(file.to_string()))?;
        self.entries[idx] = Entry { file: file.to_string(), offset };
        self.vfs.append(&self.journal_path, format!("{}\0{}\n", file, offset).as_bytes())?;
        Ok(())
    }

    /// Increments the nesting depth, returning a token whose `Drop`
    /// (via `release`) must be called exactly once to balance this call.
    pub fn nest(&mut self) -> CResult<()> {
        require_active!(self);
        self.count += 1;
        self.usages += 1;
        Ok(())
    }

    /// Balances a `nest()`. If every usage has been released while the
    /// transaction is still open (neither closed nor aborted), the
    /// transaction aborts rather than leaking.
    pub fn release(&mut self) -> CResult<()> {
        if self.count > 0 {
            self.usages -= 1;
        }
        if self.count > 0 && self.usages == 0 {
            self.abort()?;
        }
        Ok(())
    }

    pub fn add_pending(&mut self, category: &str, callback: impl FnOnce() -> bool + 'a) {
        self.pending_callbacks.insert(category.to_string(), Box::new(callback));
    }

    /// Runs every registered pending callback once, removing it from the
    /// queue as it runs, and reports whether any of them wrote data.
    pub fn write_pending(&mut self) -> CResult<bool> {
        require_active!(self);
        let categories: Vec<String> = self.pending_callbacks.keys().cloned().collect();
        for cat in categories {
            if let Some(cb) = self.pending_callbacks.remove(&cat) {
                let wrote = cb();
                self.any_pending = self.any_pending || wrote;
            }
        }
        Ok(self.any_pending)
    }

    pub fn add_finalize(&mut self, category: &str, callback: impl FnMut() + 'a) {
        self.finalize_callbacks.insert(category.to_string(), Box::new(callback));
    }

    /// Commits the transaction. No-op past the first call once nesting has
    /// unwound to zero.
    pub fn close(&mut self) -> CResult<()> {
        require_active!(self);
        if self.count == 1 {
            self.generate_files()?;
            let categories: Vec<String> = self.finalize_callbacks.keys().cloned().collect();
            for cat in categories {
                if let Some(cb) = self.finalize_callbacks.get_mut(&cat) {
                    cb();
                }
            }
            if let Some(onclose) = self.onclose.take() {
                onclose();
            }
        }

        self.count -= 1;
        if self.count != 0 {
            return Ok(());
        }

        self.entries.clear();
        if let Some(after) = self.after.take() {
            after();
        }
        if self.vfs.exists(&self.journal_path) {
            self.vfs.unlink(&self.journal_path)?;
        }
        if self.vfs.exists(&self.backup_journal_path) {
            self.vfs.unlink(&self.backup_journal_path)?;
            for b in &self.backup_entries {
                self.vfs.unlink(&b.backup_path)?;
            }
        }
        self.backup_entries.clear();
        self.journal_open = false;
        Ok(())
    }

    /// Aborts the transaction, truncating every tracked file back to its
    /// recorded offset (unlinking it instead when the offset is zero) and
    /// restoring backups. Uses the same playback semantics as the
    /// standalone crash-recovery `rollback`.
    pub fn abort(&mut self) -> CResult<()> {
        self.count = 0;
        self.usages = 0;

        if let Some(onabort) = self.onabort.take() {
            onabort();
        }

        if self.entries.is_empty() && self.backup_entries.is_empty() {
            if self.journal_open {
                self.vfs.unlink(&self.journal_path)?;
                self.vfs.unlink(&self.backup_journal_path)?;
                self.journal_open = false;
            }
            return Ok(());
        }

        (self.report)("transaction abort!\n");

        match playback(
            self.vfs,
            &mut *self.report,
            &self.journal_path,
            &self.backup_journal_path,
            &self.entries,
            &self.backup_entries,
        ) {
            Ok(()) => (self.report)("rollback completed\n"),
            Err(_) => (self.report)("rollback failed - please run recovery\n"),
        }
        self.journal_open = false;
        Ok(())
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        if self.journal_open {
            let _ = self.abort();
        }
    }
}

/// Replays a journal: truncates every tracked file back to its recorded
/// offset, unlinking it instead when the offset is zero, restores backups,
/// then removes the journal files. Shared by `Transaction::abort` and the
/// standalone crash-recovery `rollback` — both use identical semantics.
///
/// Best-effort throughout: every entry is attempted even if an earlier one
/// failed, and the journal files are unlinked last regardless of whether any
/// entry failed, so a retried `rollback` never gets stuck replaying work that
/// already happened. Failures are reported and accumulated into a single
/// `Error::Abort` returned at the end.
fn playback(
    vfs: &dyn Vfs,
    report: &mut dyn FnMut(&str),
    journal_path: &str,
    backup_journal_path: &str,
    entries: &[Entry],
    backup_entries: &[BackupEntry],
) -> CResult<()> {
    let mut failures = Vec::new();

    for entry in entries {
        if entry.offset > 0 {
            if let Err(err) = vfs.truncate(&entry.file, entry.offset) {
                report(&format!("failed to truncate {}\n", entry.file));
                failures.push(format!("{}: {}", entry.file, err));
            }
        } else if let Err(err) = vfs.unlink(&entry.file) {
            report(&format!("failed to remove {}\n", entry.file));
            failures.push(format!("{}: {}", entry.file, err));
        }
    }

    let mut restored_backups = Vec::new();
    for entry in backup_entries {
        match vfs.copy(&entry.backup_path, &entry.file) {
            Ok(()) => restored_backups.push(entry.backup_path.clone()),
            Err(err) => {
                report(&format!("failed to recover {}\n", entry.file));
                failures.push(format!("{}: {}", entry.file, err));
            }
        }
    }

    if let Err(err) = vfs.unlink(journal_path) {
        report(&format!("failed to remove {}\n", journal_path));
        failures.push(format!("{}: {}", journal_path, err));
    }
    if vfs.exists(backup_journal_path) {
        if let Err(err) = vfs.unlink(backup_journal_path) {
            report(&format!("failed to remove {}\n", backup_journal_path));
            failures.push(format!("{}: {}", backup_journal_path, err));
        }
    }
    for b in restored_backups {
        if let Err(err) = vfs.unlink(&b) {
            report(&format!("failed to remove {}\n", b));
            failures.push(format!("{}: {}", b, err));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Abort(format!("rollback failed: {}", failures.join("; "))))
    }
}

/// Recovers an incomplete transaction found on disk after a crash, reading
/// `journal_path` and `journal_path.backupfiles` directly rather than
/// through a live `Transaction`.
pub fn rollback(vfs: &dyn Vfs, journal_path: &str, report: &mut dyn FnMut(&str)) -> CResult<()> {
    let data = vfs.read(journal_path)?;
    let entries = parse_journal(&data, report);

    let backup_journal_path = format!("{}.backupfiles", journal_path);
    let backup_entries = match vfs.try_read(&backup_journal_path)? {
        Some(data) => parse_backup_journal(&data, report)?.unwrap_or_default(),
        None => Vec::new(),
    };

    playback(vfs, report, journal_path, &backup_journal_path, &entries, &backup_entries)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vfs::MemVfs;

    #[test]
    fn add_then_abort_truncates_to_recorded_offset() {
        let vfs = MemVfs::new();
        vfs.write("00changelog.i", b"0123456789").unwrap();

        {
            let mut txn = Transaction::begin(&vfs, "journal").unwrap();
            txn.add("00changelog.i", 5).unwrap();
            vfs.append("00changelog.i", b"extra").unwrap();
            txn.abort().unwrap();
        }

        assert_eq!(vfs.read("00changelog.i").unwrap(), b"01234");
        assert!(!vfs.exists("journal"));
    }

    #[test]
    fn close_commits_and_removes_journal() {
        let vfs = MemVfs::new();
        vfs.write("00changelog.i", b"0123456789").unwrap();
        let mut txn = Transaction::begin(&vfs, "journal").unwrap();
        txn.add("00changelog.i", 5).unwrap();
        txn.close().unwrap();
        assert!(!vfs.exists("journal"));
        assert_eq!(vfs.read("00changelog.i").unwrap(), b"0123456789");
    }

    #[test]
    fn drop_without_close_aborts() {
        let vfs = MemVfs::new();
        vfs.write("f", b"aaaa").unwrap();
        {
            let mut txn = Transaction::begin(&vfs, "journal").unwrap();
            txn.add("f", 1).unwrap();
            vfs.append("f", b"zz").unwrap();
        }
        assert_eq!(vfs.read("f").unwrap(), b"a");
    }

    #[test]
    fn add_backup_restores_file_on_abort() {
        let vfs = MemVfs::new();
        vfs.write("bookmarks", b"old").unwrap();
        let mut txn = Transaction::begin(&vfs, "journal").unwrap();
        txn.add_backup("bookmarks", None).unwrap();
        vfs.write("bookmarks", b"new").unwrap();
        txn.abort().unwrap();
        assert_eq!(vfs.read("bookmarks").unwrap(), b"old");
    }

    #[test]
    fn nest_release_without_close_aborts() {
        let vfs = MemVfs::new();
        vfs.write("f", b"aaaa").unwrap();
        let mut txn = Transaction::begin(&vfs, "journal").unwrap();
        txn.add("f", 1).unwrap();
        txn.nest().unwrap();
        vfs.append("f", b"zz").unwrap();
        txn.release().unwrap();
        assert!(txn.running());
        txn.release().unwrap();
        assert!(!txn.running());
        assert_eq!(vfs.read("f").unwrap(), b"a");
    }

    #[test]
    fn rollback_recovers_crashed_transaction() {
        let vfs = MemVfs::new();
        vfs.write("f", b"0123456789").unwrap();
        vfs.write("journal", b"f\x005\n").unwrap();
        vfs.write("journal.backupfiles", b"1\n").unwrap();
        vfs.append("f", b"garbage").unwrap();

        let mut messages = Vec::new();
        rollback(&vfs, "journal", &mut |m| messages.push(m.to_string())).unwrap();
        assert_eq!(vfs.read("f").unwrap(), b"01234");
        assert!(!vfs.exists("journal"));
    }

    #[test]
    fn playback_continues_past_entry_failure_and_always_unlinks_journal() {
        let vfs = MemVfs::new();
        vfs.write("a", b"new-a").unwrap();
        vfs.write("b", b"new-b").unwrap();
        vfs.write("a.backup", b"old-a").unwrap();
        // "b.backup" is deliberately missing so its restore fails.
        vfs.write(
            "journal.backupfiles",
            format!(
                "1\n{}{}",
                encode_backup_entry(&BackupEntry {
                    file: "a".to_string(),
                    backup_path: "a.backup".to_string()
                }),
                encode_backup_entry(&BackupEntry {
                    file: "b".to_string(),
                    backup_path: "b.backup".to_string()
                }),
            )
            .as_bytes(),
        )
        .unwrap();
        vfs.write("journal", b"").unwrap();

        let mut messages = Vec::new();
        let result = playback(
            &vfs,
            &mut |m| messages.push(m.to_string()),
            "journal",
            "journal.backupfiles",
            &[],
            &[
                BackupEntry { file: "b".to_string(), backup_path: "b.backup".to_string() },
                BackupEntry { file: "a".to_string(), backup_path: "a.backup".to_string() },
            ],
        );

        assert!(result.is_err());
        // The entry after the failing one was still attempted.
        assert_eq!(vfs.read("a").unwrap(), b"old-a");
        // Journal files are unlinked even though a restore failed.
        assert!(!vfs.exists("journal"));
        assert!(!vfs.exists("journal.backupfiles"));
    }

    #[test]
    fn file_generator_runs_in_order_at_close() {
        let vfs = MemVfs::new();
        let mut txn = Transaction::begin(&vfs, "journal").unwrap();
        let log = std::cell::RefCell::new(Vec::new());
        txn.add_file_generator(
            "late",
            &["b"],
            |_names| {
                log.borrow_mut().push("late");
                Ok(vec![b"B".to_vec()])
            },
            10,
            None,
        )
        .unwrap();
        txn.add_file_generator(
            "early",
            &["a"],
            |_names| {
                log.borrow_mut().push("early");
                Ok(vec![b"A".to_vec()])
            },
            0,
            None,
        )
        .unwrap();
        txn.close().unwrap();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(vfs.read("a").unwrap(), b"A");
        assert_eq!(vfs.read("b").unwrap(), b"B");
    }
}
