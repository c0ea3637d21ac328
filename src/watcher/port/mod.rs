//! Event notification ports.
//!
//! A port owns one kernel event queue shared by every watch loop of a session.
//! Registrations are per descriptor, edge-triggered and re-armed: after an
//! event fires the registration stays active for the next one without being
//! resubmitted. Resubmitting is harmless and updates the interest flags.
//!
//! Two backends implement [`EventPort`]:
//!
//! ```text
//! kqueue   (macOS, iOS, FreeBSD, OpenBSD, DragonFly)  EVFILT_VNODE, EV_ADD|EV_CLEAR|EV_ENABLE
//! inotify  (Linux, Android)                          watch on /proc/self/fd/<fd>
//! ```

#[cfg(any(target_os = "linux", target_os = "android"))]
mod inotify;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use inotify::InotifyPort as PlatformPort;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueuePort as PlatformPort;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
compile_error!("vigil needs kqueue or inotify");

use std::sync::Arc;
use std::time::Duration;

use super::error::WatchError;
use super::event::{EventCategories, RawEvent};
use super::handle::{HandleKey, WatchHandle};

/// One registration entry: which handle, and which categories to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub key: HandleKey,
    pub interest: EventCategories,
}

impl Registration {
    pub fn new(handle: &WatchHandle, interest: EventCategories) -> Self {
        Self {
            key: handle.key(),
            interest,
        }
    }
}

/// A kernel-level event queue.
pub trait EventPort: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Submit a registration. Idempotent for the same handle.
    fn register(&self, registration: &Registration) -> Result<(), WatchError>;

    /// Re-affirm `registrations`, then wait up to `timeout` for ready events.
    ///
    /// A zero timeout polls without blocking. An interrupted wait returns no
    /// events. Other failures are reported as `WatchError::Poll`.
    fn wait(
        &self,
        registrations: &[Registration],
        max_events: usize,
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, WatchError>;

    /// Drop a registration. Must be called before the handle is closed.
    fn deregister(&self, registration: &Registration);
}

/// Create the port for the current platform.
pub fn create() -> Result<Arc<dyn EventPort>, WatchError> {
    let port = PlatformPort::new()?;
    crate::debug_event!("port", "created", "{}", port.name());
    Ok(Arc::new(port))
}
