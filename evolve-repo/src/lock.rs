//! Advisory, non-blocking, per-directory locking.

use std::fs::{self, File};
use std::os::unix::io::AsRawFd;

use camino::{Utf8Path, Utf8PathBuf};
use nix::fcntl::{flock, FlockArg};

use crate::{RepoError, Result};

/// Reserved name of the lock marker file, present only while a lock is held
/// (or after a holder died without releasing).
pub const LOCK_FILE: &str = ".evolve-lock";

/// An exclusive lock on one repository directory, coordinating mutation
/// across independent processes sharing the filesystem.
///
/// The marker file's existence is only a fast-path check that avoids an OS
/// call in the common contended case; the non-blocking `flock` on the
/// marker's descriptor is the real arbiter. Releasing deletes the marker
/// before the descriptor closes, which leaves a brief window where another
/// process can recreate and lock a fresh marker while the old descriptor is
/// still open. The OS lock is keyed to the original file rather than the
/// path, so only the fast-path check can race; lock acquisition itself
/// cannot.
///
/// Acquisition never blocks: contention fails fast with
/// [`RepoError::LockBusy`] and retry policy is left to the caller. The guard
/// releases on drop, so every exit path of a protected section releases the
/// lock.
#[derive(Debug)]
pub struct DirLock {
    dir: Utf8PathBuf,
    file: Option<File>,
}

impl DirLock {
    /// Acquires the lock for `dir`, failing fast if a marker file is already
    /// present or another live holder owns the lock.
    pub fn acquire(dir: impl AsRef<Utf8Path>) -> Result<Self> {
        Self::acquire_inner(dir.as_ref(), false)
    }

    /// Acquires the lock for `dir` ignoring any existing marker file. The
    /// `flock` attempt still fails against a live holder, so stealing only
    /// ever reclaims a marker left stale by a dead process.
    pub fn steal(dir: impl AsRef<Utf8Path>) -> Result<Self> {
        Self::acquire_inner(dir.as_ref(), true)
    }

    fn acquire_inner(dir: &Utf8Path, steal: bool) -> Result<Self> {
        let marker = dir.join(LOCK_FILE);
        if !steal && marker.exists() {
            return Err(RepoError::LockBusy(dir.to_owned()));
        }
        let file = File::create(marker.as_std_path())?;
        if flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).is_err() {
            // The descriptor closes on drop; the live holder keeps its lock.
            return Err(RepoError::LockBusy(dir.to_owned()));
        }
        Ok(DirLock {
            dir: dir.to_owned(),
            file: Some(file),
        })
    }

    /// Releases the lock: deletes the marker file, then closes the locked
    /// descriptor.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            fs::remove_file(self.dir.join(LOCK_FILE).as_std_path())?;
            drop(file);
        }
        Ok(())
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}
