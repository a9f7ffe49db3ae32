//! Filesystem opener abstraction.
//!
//! The transaction manager, obsolescence store, tag filenode cache and tag
//! resolver all address files by a path relative to a store root rather than
//! talking to `std::fs` directly, mirroring Mercurial's `vfs` object. This
//! keeps the repository-primitive contract (`primitives.rs`) testable against
//! an in-memory filesystem without touching disk.

use crate::error::{CResult, Error};
use fs4::FileExt;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait Vfs {
    fn read(&self, path: &str) -> CResult<Vec<u8>>;

    /// Like `read`, but returns `Ok(None)` instead of an error when the file
    /// does not exist.
    fn try_read(&self, path: &str) -> CResult<Option<Vec<u8>>> {
        if !self.exists(path) {
            return Ok(None);
        }
        self.read(path).map(Some)
    }

    fn write(&self, path: &str, data: &[u8]) -> CResult<()>;

    fn append(&self, path: &str, data: &[u8]) -> CResult<()>;

    /// Truncates (or creates) `path` to exactly `len` bytes.
    fn truncate(&self, path: &str, len: u64) -> CResult<()>;

    fn unlink(&self, path: &str) -> CResult<()>;

    fn exists(&self, path: &str) -> bool;

    fn copy(&self, src: &str, dst: &str) -> CResult<()>;

    fn len(&self, path: &str) -> CResult<u64>;

    fn chmod(&self, path: &str, mode: u32) -> CResult<()>;

    fn join(&self, path: &str) -> PathBuf;

    /// Attempts a non-blocking exclusive lock on `path`, used by the tag
    /// filenode cache's best-effort writer lock.
    fn try_lock(&self, path: &str) -> CResult<Box<dyn LockGuard>>;
}

pub trait LockGuard {}

/// A real, `std::fs`-backed `Vfs` rooted at a directory on disk.
pub struct FsVfs {
    root: PathBuf,
}

impl FsVfs {
    pub fn new(root: impl Into<PathBuf>) -> CResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FsVfs { root })
    }
}

struct FileLockGuard(#[allow(dead_code)] std::fs::File);
impl LockGuard for FileLockGuard {}

impl Vfs for FsVfs {
    fn read(&self, path: &str) -> CResult<Vec<u8>> {
        let mut buf = Vec::new();
        std::fs::File::open(self.join(path))?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write(&self, path: &str, data: &[u8]) -> CResult<()> {
        let full = self.join(path);
        if let Some(dir) = full.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(full, data)?;
        Ok(())
    }

    fn append(&self, path: &str, data: &[u8]) -> CResult<()> {
        let full = self.join(path);
        if let Some(dir) = full.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(full)?;
        f.write_all(data)?;
        f.flush()?;
        Ok(())
    }

    fn truncate(&self, path: &str, len: u64) -> CResult<()> {
        let full = self.join(path);
        if let Some(dir) = full.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let f = std::fs::OpenOptions::new().create(true).write(true).open(full)?;
        f.set_len(len)?;
        Ok(())
    }

    fn unlink(&self, path: &str) -> CResult<()> {
        match std::fs::remove_file(self.join(path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.join(path).exists()
    }

    fn copy(&self, src: &str, dst: &str) -> CResult<()> {
        let dst_full = self.join(dst);
        if let Some(dir) = dst_full.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::copy(self.join(src), dst_full)?;
        Ok(())
    }

    fn len(&self, path: &str) -> CResult<u64> {
        Ok(std::fs::metadata(self.join(path))?.len())
    }

    fn chmod(&self, path: &str, mode: u32) -> CResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(self.join(path), std::fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        {
            let _ = (path, mode);
        }
        Ok(())
    }

    fn join(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn try_lock(&self, path: &str) -> CResult<Box<dyn LockGuard>> {
        let full = self.join(path);
        if let Some(dir) = full.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new().create(true).write(true).open(&full)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Box::new(FileLockGuard(file))),
            Err(_) => Err(Error::LockUnavailable),
        }
    }
}

/// An in-memory `Vfs`, used by unit tests that don't need to exercise real
/// disk I/O (`primitives::mem` uses the same convention for changelog state).
#[derive(Default)]
pub struct MemVfs {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemVfs {
    pub fn new() -> Self {
        MemVfs::default()
    }
}

struct NoopLockGuard;
impl LockGuard for NoopLockGuard {}

impl Vfs for MemVfs {
    fn read(&self, path: &str) -> CResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Lookup(format!("no such file: {}", path)))
    }

    fn write(&self, path: &str, data: &[u8]) -> CResult<()> {
        self.files.lock().unwrap().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn append(&self, path: &str, data: &[u8]) -> CResult<()> {
        self.files.lock().unwrap().entry(path.to_string()).or_default().extend_from_slice(data);
        Ok(())
    }

    fn truncate(&self, path: &str, len: u64) -> CResult<()> {
        let mut files = self.files.lock().unwrap();
        let buf = files.entry(path.to_string()).or_default();
        buf.resize(len as usize, 0);
        Ok(())
    }

    fn unlink(&self, path: &str) -> CResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn copy(&self, src: &str, dst: &str) -> CResult<()> {
        let data = self.read(src)?;
        self.write(dst, &data)
    }

    fn len(&self, path: &str) -> CResult<u64> {
        Ok(self.read(path)?.len() as u64)
    }

    fn chmod(&self, _path: &str, _mode: u32) -> CResult<()> {
        Ok(())
    }

    fn join(&self, path: &str) -> PathBuf {
        Path::new(path).to_path_buf()
    }

    fn try_lock(&self, _path: &str) -> CResult<Box<dyn LockGuard>> {
        Ok(Box::new(NoopLockGuard))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_vfs_round_trips() {
        let vfs = MemVfs::new();
        vfs.write("a", b"hello").unwrap();
        assert_eq!(vfs.read("a").unwrap(), b"hello");
        vfs.append("a", b" world").unwrap();
        assert_eq!(vfs.read("a").unwrap(), b"hello world");
        vfs.truncate("a", 5).unwrap();
        assert_eq!(vfs.read("a").unwrap(), b"hello");
        assert!(vfs.try_read("missing").unwrap().is_none());
    }

    #[test]
    fn fs_vfs_round_trips() {
        let dir = tempdir::TempDir::new("vfs").unwrap();
        let vfs = FsVfs::new(dir.path()).unwrap();
        vfs.write("a/b.txt", b"data").unwrap();
        assert_eq!(vfs.read("a/b.txt").unwrap(), b"data");
        vfs.unlink("a/b.txt").unwrap();
        assert!(!vfs.exists("a/b.txt"));
    }
}
