//! Owned watch handles and the opener that creates them.
//!
//! A [`WatchHandle`] owns the descriptor backing one watch target. The
//! descriptor is closed exactly once, when the handle is dropped. Everything
//! else in the watcher refers to it through a [`HandleKey`], which pairs the
//! raw descriptor number with a generation so that a number recycled by the
//! kernel never resolves to a stale entry.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::WatchError;

/// Logical reference to an open watch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleKey {
    fd: RawFd,
    generation: u64,
}

impl HandleKey {
    pub fn new(fd: RawFd, generation: u64) -> Self {
        Self { fd, generation }
    }

    /// The raw descriptor number.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}#{}", self.fd, self.generation)
    }
}

/// An open descriptor for one watched path.
#[derive(Debug)]
pub struct WatchHandle {
    file: File,
    key: HandleKey,
    path: Arc<PathBuf>,
}

impl WatchHandle {
    pub fn key(&self) -> HandleKey {
        self.key
    }

    pub fn path(&self) -> &Arc<PathBuf> {
        &self.path
    }

    /// Close the descriptor now.
    pub fn release(self) {
        drop(self.file);
    }
}

impl AsRawFd for WatchHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Opens watch targets and stamps each handle with a fresh generation.
///
/// One opener belongs to one watcher session.
#[derive(Debug)]
pub struct Opener {
    next_generation: AtomicU64,
}

impl Opener {
    pub fn new() -> Self {
        Self {
            next_generation: AtomicU64::new(1),
        }
    }

    /// Open `path` with the minimal access needed to observe it.
    ///
    /// Directories are accepted. Adding or removing an entry counts as a
    /// write to the directory; edits to the files inside it are not seen.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<WatchHandle, WatchError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(open_flags())
            .open(path)
            .map_err(|e| WatchError::from_open(path.to_path_buf(), e))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let key = HandleKey::new(file.as_raw_fd(), generation);

        crate::debug_event!("opener", "opened", "{} as {key}", path.display());

        Ok(WatchHandle {
            file,
            key,
            path: Arc::new(path.to_path_buf()),
        })
    }
}

impl Default for Opener {
    fn default() -> Self {
        Self::new()
    }
}

// O_NONBLOCK keeps open(2) on a FIFO from waiting for a peer. The
// descriptor is never read or written.
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn open_flags() -> i32 {
    // Event-only access: does not keep the volume busy.
    libc::O_EVTONLY | libc::O_NONBLOCK | libc::O_CLOEXEC
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn open_flags() -> i32 {
    libc::O_NONBLOCK | libc::O_CLOEXEC
}
