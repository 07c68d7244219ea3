use crate::layout::CloneLayout;
use crate::StoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock on a clone directory.
///
/// Machine creation holds it from the first clone until the domain is live
/// or the attempt has been rolled back. Stale clone collection holds it while
/// it deletes, so it never sees a clone whose domain is still being
/// submitted.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

fn open(layout: &CloneLayout) -> Result<(File, PathBuf), StoreError> {
    layout.initialize()?;
    let path = layout.lock_file();
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)?;
    Ok((file, path))
}

impl StoreLock {
    /// Block until the lock is free.
    pub fn acquire(layout: &CloneLayout) -> Result<Self, StoreError> {
        let (file, path) = open(layout)?;
        file.lock_exclusive()?;
        debug!("locked clone store {}", path.display());
        Ok(Self { file, path })
    }

    /// `None` when another holder has the lock.
    pub fn try_acquire(layout: &CloneLayout) -> Result<Option<Self>, StoreError> {
        let (file, path) = open(layout)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
