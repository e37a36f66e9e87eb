//! Advisory file locks shared between orderwatch processes.
//!
//! The daemon and one-shot `ingest`/`check` processes open the same state
//! directory. Every store operation and every cycle holds an exclusive
//! `flock` on a sibling lock file, so their read-modify-write sequences
//! never interleave. Locks belong to the open file, so two handles in one
//! process exclude each other as well.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Lock file serializing whole cycles inside a state directory.
pub const CYCLE_LOCK_FILE_NAME: &str = "cycle.lock";

/// Exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the lock on `path` is held, creating the file if needed.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the platform has no `flock`.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        lock_exclusive(&file)?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file locking requires a unix platform",
    ))
}
