//! Journal/backup-journal record parsing and serialization.
//!
//! The journal is a sequence of `"<path>\0<offset>\n"` lines, one per file
//! the transaction has touched; replaying it means truncating each path to
//! its recorded offset. `journal.backupfiles` carries a version line
//! followed by `"<path>\0<backup-path>\n"` lines.

use crate::error::{CResult, Error};

pub const JOURNAL_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub file: String,
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupEntry {
    pub file: String,
    pub backup_path: String,
}

pub fn encode_entry(entry: &Entry) -> String {
    format!("{}\0{}\n", entry.file, entry.offset)
}

pub fn encode_backup_entry(entry: &BackupEntry) -> String {
    format!("{}\0{}\n", entry.file, entry.backup_path)
}

/// Parses the journal file. Malformed lines are reported via `report` and
/// skipped, matching the original recovery tool's tolerance for a
/// partially-written journal.
pub fn parse_journal(data: &[u8], report: &mut dyn FnMut(&str)) -> Vec<Entry> {
    let text = String::from_utf8_lossy(data);
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\0') {
            Some((file, offset_str)) => match offset_str.parse::<u64>() {
                Ok(offset) => entries.push(Entry { file: file.to_string(), offset }),
                Err(_) => report(&format!("couldn't read journal entry {:?}!\n", line)),
            },
            None => report(&format!("couldn't read journal entry {:?}!\n", line)),
        }
    }
    entries
}

/// Parses `journal.backupfiles`. Returns `Ok(None)` if the version header
/// doesn't match what this crate writes (a newer writer's journal), in which
/// case the caller should not attempt to use the backup entries.
pub fn parse_backup_journal(
    data: &[u8],
    report: &mut dyn FnMut(&str),
) -> CResult<Option<Vec<BackupEntry>>> {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.lines();
    let version_line = match lines.next() {
        Some(l) => l,
        None => return Ok(Some(Vec::new())),
    };
    let version: u32 = version_line
        .parse()
        .map_err(|_| Error::Corrupt(format!("invalid backup journal version {:?}", version_line)))?;
    if version != JOURNAL_VERSION {
        report("journal was created by a newer version of this tool");
        return Ok(None);
    }
    let mut entries = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\0') {
            Some((file, backup)) => {
                entries.push(BackupEntry { file: file.to_string(), backup_path: backup.to_string() })
            }
            None => report(&format!("couldn't read backup journal entry {:?}!\n", line)),
        }
    }
    Ok(Some(entries))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_journal_entries() {
        let entry = Entry { file: "00changelog.i".to_string(), offset: 128 };
        let encoded = encode_entry(&entry);
        let mut reports = Vec::new();
        let parsed = parse_journal(encoded.as_bytes(), &mut |msg| reports.push(msg.to_string()));
        assert_eq!(parsed, vec![entry]);
        assert!(reports.is_empty());
    }

    #[test]
    fn reports_malformed_lines() {
        let mut reports = Vec::new();
        let parsed = parse_journal(b"nosep\n00changelog.i\0notanumber\n", &mut |m| {
            reports.push(m.to_string())
        });
        assert!(parsed.is_empty());
        assert_eq!(reports.len(), 2);
    }

    #[test]
    fn rejects_future_backup_journal_version() {
        let mut reports = Vec::new();
        let result = parse_backup_journal(b"2\nfoo\0bar\n", &mut |m| reports.push(m.to_string()));
        assert_eq!(result.unwrap(), None);
        assert_eq!(reports.len(), 1);
    }
}
