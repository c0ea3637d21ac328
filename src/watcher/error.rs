//! Error types for the watcher system.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::handle::HandleKey;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Cannot watch {path}: no such file or directory")]
    NotFound { path: PathBuf },

    #[error("Cannot watch {path}: permission denied")]
    PermissionDenied { path: PathBuf },

    #[error("Out of descriptors or kernel resources: {reason}")]
    ResourceExhausted { reason: String },

    #[error("Handle {key} is already registered")]
    DuplicateHandle { key: HandleKey },

    #[error("Handle {key} is not registered")]
    UnknownHandle { key: HandleKey },

    #[error("Event port wait failed: {source}")]
    Poll { source: io::Error },

    #[error("Failed to create event port: {source}")]
    PortCreate { source: io::Error },

    #[error("Path {path} is already being watched")]
    AlreadyWatched { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to load config: {reason}")]
    ConfigError { reason: String },
}

impl WatchError {
    /// Map an `open(2)` failure for `path` onto the watch taxonomy.
    pub fn from_open(path: PathBuf, err: io::Error) -> Self {
        if is_exhaustion(&err) {
            return WatchError::ResourceExhausted {
                reason: format!("opening {}: {err}", path.display()),
            };
        }
        match err.kind() {
            io::ErrorKind::NotFound => WatchError::NotFound { path },
            io::ErrorKind::PermissionDenied => WatchError::PermissionDenied { path },
            _ => WatchError::Io { path, source: err },
        }
    }

    /// Map a failure to create the kernel event queue.
    pub fn from_port_create(err: io::Error) -> Self {
        if is_exhaustion(&err) {
            WatchError::ResourceExhausted {
                reason: format!("creating event port: {err}"),
            }
        } else {
            WatchError::PortCreate { source: err }
        }
    }

    /// Whether the error ends the watch loop it occurred in.
    ///
    /// `UnknownHandle` and `Poll` are absorbed by the loop; everything else
    /// stops watching that one path.
    pub fn is_fatal_to_loop(&self) -> bool {
        !matches!(
            self,
            WatchError::UnknownHandle { .. } | WatchError::Poll { .. }
        )
    }
}

fn is_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOMEM)
    )
}
