//! The advisory, per-directory exclusive lock that enforces single-process
//! ownership of a database, using `fs4`'s `try_lock_exclusive` on a
//! dedicated file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs4::FileExt;

use crate::error::Result;

const LOCK_FILE_NAME: &str = "db.lock";

/// Holds the exclusive lock on `db.lock` for the lifetime of the value.
/// Releasing it (on drop, or explicitly via `release`) does not remove the
/// file.
#[derive(Debug)]
pub struct DirLock {
    file: File,
}

impl DirLock {
    /// Creates `db.lock` under `dir` if absent and takes out a non-blocking
    /// exclusive lock on it, failing fast with `Error::Locked` if another
    /// process already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).read(true).write(true).open(dir.join(LOCK_FILE_NAME))?;
        file.try_lock_exclusive()?;
        Ok(Self { file })
    }

    /// Releases the lock. Idempotent; safe to call even though `Drop` also
    /// releases it.
    pub fn release(&self) -> Result<()> {
        fs4::FileExt::unlock(&self.file)?;
        Ok(())
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs4::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn second_lock_in_same_directory_fails() {
        let dir = TempDir::new().unwrap();
        let first = DirLock::acquire(dir.path()).expect("first lock should succeed");

        let second = DirLock::acquire(dir.path());
        assert!(matches!(second, Err(Error::Locked)));

        drop(first);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
