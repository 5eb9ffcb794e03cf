//! Cross-process advisory locking on the database file.
//!
//! Write handles take a whole-file exclusive lock; read handles take a
//! shared lock. Acquisition blocks indefinitely; bounded waiting is the
//! caller's responsibility. The guard releases the lock on drop, which
//! covers every exit path including errors.
//!
//! The locks are advisory: they coordinate cooperating audiodb processes and
//! do not defend against arbitrary writers.

use std::fs::File;
use std::io;

use fs2::FileExt;
use tracing::debug;

/// RAII guard for an acquired file lock.
///
/// Holds a duplicate of the database file handle; `flock`-style locks attach
/// to the open file description, so releasing through the duplicate releases
/// the handle's lock.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    exclusive: bool,
}

impl FileLock {
    /// Acquire a whole-file lock, blocking until granted.
    ///
    /// At most one exclusive holder exists at a time, never concurrently
    /// with any shared holder; shared holders may coexist freely.
    pub fn acquire(file: &File, exclusive: bool) -> io::Result<FileLock> {
        let dup = file.try_clone()?;
        if exclusive {
            dup.lock_exclusive()?;
        } else {
            dup.lock_shared()?;
        }
        debug!(target: "adb::storage", exclusive, "acquired file lock");
        Ok(FileLock {
            file: dup,
            exclusive,
        })
    }

    /// Whether this guard holds the exclusive lock
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Best effort: the lock also dies with the file descriptor.
        let _ = self.file.unlock();
        debug!(target: "adb::storage", exclusive = self.exclusive, "released file lock");
    }
}
