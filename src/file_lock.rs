use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use fs2::FileExt;
use log::debug;

/// A segment file held under an exclusive advisory lock.
///
/// The lock guarantees at most one append-mode handle per directory: every
/// segment a writer touches stays locked for the handle's lifetime.
/// Dropping the value unlocks the file.
#[derive(Debug)]
pub(crate) struct LockedFile {
    f: File,
    path: PathBuf,
}

impl LockedFile {
    /// Creates (or truncates) the file and acquires its lock.
    pub(crate) fn create(path: impl Into<PathBuf>) -> Result<Self, io::Error> {
        let path = path.into();
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Self::lock(f, path)
    }

    /// Opens an existing file read-write and acquires its lock without
    /// blocking.
    pub(crate) fn open(path: impl Into<PathBuf>) -> Result<Self, io::Error> {
        let path = path.into();
        let f = OpenOptions::new().read(true).write(true).open(&path)?;

        Self::lock(f, path)
    }

    fn lock(f: File, path: PathBuf) -> Result<Self, io::Error> {
        f.try_lock_exclusive().map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "segment file '{}' is locked by another process, \
                    shutdown other process to continue; \
                    error:({})",
                    path.display(),
                    e
                ),
            )
        })?;

        debug!("segment lock acquired: {}", path.display());

        Ok(Self { f, path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The file name without its directory part.
    pub(crate) fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub(crate) fn file(&self) -> &File {
        &self.f
    }

    /// A second descriptor for the same open file, e.g. for the write-side
    /// segment backend. The clone shares the lock.
    pub(crate) fn try_clone_file(&self) -> Result<File, io::Error> {
        self.f.try_clone()
    }

    /// A fresh read-only descriptor on the same path, for the replay
    /// decoder.
    pub(crate) fn reopen_read(&self) -> Result<File, io::Error> {
        OpenOptions::new().read(true).open(&self.path)
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = self.f.unlock();
        debug!("segment lock released: {}", self.path.display());
    }
}
