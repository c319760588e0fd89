//! Advisory `flock`-based locks guarding cross-invocation critical sections.
//!
//! Reconciliation runs and backup runs are separate OS processes started by
//! cron. A [`FileLock`] is held for the lifetime of the value; the kernel
//! releases it when the file descriptor is closed, including on crash.

use crate::error::{BackopperError, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// An exclusive lock on a lock file. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    /// Try to take the exclusive lock without blocking.
    ///
    /// Returns [`BackopperError::StoreBusy`] when another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        if !try_acquire_exclusive_nonblocking(&file)? {
            return Err(BackopperError::StoreBusy(path.display().to_string()));
        }
        tracing::debug!(lock = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn try_acquire_exclusive_nonblocking(file: &File) -> io::Result<bool> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to an open `File` that outlives this call, and
    // `LOCK_EX | LOCK_NB` is a valid flock operation.
    let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(not(unix))]
fn try_acquire_exclusive_nonblocking(_: &File) -> io::Result<bool> {
    Ok(true)
}
