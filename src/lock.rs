//! Advisory lock on the base directory so that only one process owns the
//! capture store at a time.
//!
//! The daemon takes the lock at startup and keeps it. CLI commands running
//! in-process take it for the duration of the command. CLI commands sent to
//! a daemon do not lock at all.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

const LOCK_FILE_NAME: &str = "traceback.lock";

/// Exclusive lock, released on drop.
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    /// Fails with `WouldBlock` when another process holds the lock.
    pub fn try_acquire(base_path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(base_path.join(LOCK_FILE_NAME))?;

        try_lock_exclusive(&file)?;
        Ok(FileLock { file })
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "capture store is in use by another traceback process",
        ));
    }
    Err(err)
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

/// A lock that is only taken when the store is opened in this process.
pub enum LockGuard {
    Held(FileLock),
    Skipped,
}

impl LockGuard {
    pub fn acquire(base_path: &Path, remote: bool) -> io::Result<Self> {
        if remote {
            Ok(LockGuard::Skipped)
        } else {
            FileLock::try_acquire(base_path).map(LockGuard::Held)
        }
    }
}
