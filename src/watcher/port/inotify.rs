//! inotify backend.
//!
//! inotify watches paths, not descriptors. Adding the watch through
//! `/proc/self/fd/<fd>` resolves to the inode the descriptor holds, so the
//! watch follows the opened file across renames the way a vnode filter does.
//!
//! Unlinking a file that is still open does not raise `IN_DELETE_SELF` until
//! the last descriptor closes; the kernel sends `IN_ATTRIB` for the link count
//! change instead. A link count of zero is therefore reported as a delete.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use parking_lot::Mutex;

use super::{EventPort, Registration};
use crate::watcher::error::WatchError;
use crate::watcher::event::{EventCategories, RawEvent};
use crate::watcher::handle::HandleKey;

/// Entry changes inside a watched directory count as writes to it.
const ENTRY_CHANGES: u32 =
    libc::IN_CREATE | libc::IN_DELETE | libc::IN_MOVED_FROM | libc::IN_MOVED_TO;

const WATCH_MASK: u32 =
    libc::IN_MODIFY | libc::IN_ATTRIB | libc::IN_MOVE_SELF | libc::IN_DELETE_SELF | ENTRY_CHANGES;

const EVENT_HEADER: usize = mem::size_of::<libc::inotify_event>();
const NAME_MAX: usize = 255;

type WatchDescriptor = i32;

#[derive(Debug, Default)]
struct Watches {
    /// Hard links share an inode and therefore a watch descriptor.
    by_wd: HashMap<WatchDescriptor, Vec<Registration>>,
    by_key: HashMap<HandleKey, WatchDescriptor>,
}

impl Watches {
    fn drop_wd(&mut self, wd: WatchDescriptor) {
        if let Some(regs) = self.by_wd.remove(&wd) {
            for reg in regs {
                self.by_key.remove(&reg.key);
            }
        }
    }
}

/// One inotify instance.
#[derive(Debug)]
pub struct InotifyPort {
    fd: OwnedFd,
    watches: Mutex<Watches>,
}

impl InotifyPort {
    pub fn new() -> Result<Self, WatchError> {
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(WatchError::from_port_create(io::Error::last_os_error()));
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            watches: Mutex::new(Watches::default()),
        })
    }

    /// Block until the queue is readable or `timeout` elapses.
    fn ready(&self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc > 0)
    }

    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Translate one kernel event for the handle behind `key`.
    fn translate(mask: u32, fd: RawFd) -> EventCategories {
        let mut out = EventCategories::empty();
        if mask & (libc::IN_MODIFY | ENTRY_CHANGES) != 0 {
            out |= EventCategories::WRITE;
        }
        if mask & libc::IN_MOVE_SELF != 0 {
            out |= EventCategories::RENAME;
        }
        if mask & libc::IN_DELETE_SELF != 0 {
            out |= EventCategories::DELETE;
        }
        if mask & libc::IN_ATTRIB != 0 {
            if link_count(fd) == Some(0) {
                out |= EventCategories::DELETE;
            } else {
                out |= EventCategories::ATTRIB;
            }
        }
        out
    }
}

fn link_count(fd: RawFd) -> Option<u64> {
    let mut st: libc::stat = unsafe { mem::zeroed() };
    let rc = unsafe { libc::fstat(fd, &mut st) };
    if rc < 0 {
        None
    } else {
        Some(st.st_nlink as u64)
    }
}

impl EventPort for InotifyPort {
    fn name(&self) -> &str {
        "inotify"
    }

    fn register(&self, registration: &Registration) -> Result<(), WatchError> {
        let mut watches = self.watches.lock();
        if let Some(&wd) = watches.by_key.get(&registration.key) {
            // The kernel mask covers every category; only the stored interest changes.
            if let Some(existing) = watches
                .by_wd
                .get_mut(&wd)
                .and_then(|regs| regs.iter_mut().find(|r| r.key == registration.key))
            {
                existing.interest = registration.interest;
            }
            return Ok(());
        }

        let proc_path = format!("/proc/self/fd/{}", registration.key.fd());
        let c_path = CString::new(proc_path).map_err(|e| WatchError::Poll {
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), WATCH_MASK) };
        if wd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOSPC) | Some(libc::ENOMEM) => WatchError::ResourceExhausted {
                    reason: format!("inotify watch for {}: {err}", registration.key),
                },
                _ => WatchError::Poll { source: err },
            });
        }

        watches.by_wd.entry(wd).or_default().push(*registration);
        watches.by_key.insert(registration.key, wd);
        Ok(())
    }

    fn wait(
        &self,
        _registrations: &[Registration],
        max_events: usize,
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, WatchError> {
        // inotify watches stay armed; there is nothing to re-affirm.
        if !timeout.is_zero() {
            match self.ready(timeout) {
                Ok(true) => {}
                Ok(false) => return Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
                Err(e) => return Err(WatchError::Poll { source: e }),
            }
        }

        let mut buf = vec![0u8; max_events.max(1) * (EVENT_HEADER + NAME_MAX + 1)];
        let len = match self.read_into(&mut buf) {
            Ok(len) => len,
            // Another loop drained the queue first.
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Ok(Vec::new());
            }
            Err(e) => return Err(WatchError::Poll { source: e }),
        };

        let mut ready = Vec::new();
        // Held while translating so no descriptor is closed under fstat.
        let mut watches = self.watches.lock();
        let mut offset = 0;
        while offset + EVENT_HEADER <= len {
            let event: libc::inotify_event = unsafe {
                std::ptr::read_unaligned(buf[offset..].as_ptr() as *const libc::inotify_event)
            };
            offset += EVENT_HEADER + event.len as usize;

            if event.mask & libc::IN_Q_OVERFLOW != 0 {
                tracing::warn!("[port] inotify queue overflow, events were lost");
                continue;
            }
            if event.mask & libc::IN_IGNORED != 0 {
                watches.drop_wd(event.wd);
                continue;
            }

            let Some(regs) = watches.by_wd.get(&event.wd) else {
                continue;
            };
            for reg in regs {
                let flags = Self::translate(event.mask, reg.key.fd());
                if !flags.is_empty() {
                    ready.push(RawEvent::new(reg.key, flags));
                }
            }
        }
        Ok(ready)
    }

    fn deregister(&self, registration: &Registration) {
        let mut watches = self.watches.lock();
        let Some(wd) = watches.by_key.remove(&registration.key) else {
            return;
        };

        let now_empty = match watches.by_wd.get_mut(&wd) {
            Some(regs) => {
                regs.retain(|r| r.key != registration.key);
                regs.is_empty()
            }
            None => false,
        };
        if now_empty {
            watches.by_wd.remove(&wd);
            let rc = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), wd) };
            if rc < 0 {
                crate::debug_event!(
                    "port",
                    "deregister",
                    "{}: {}",
                    registration.key,
                    io::Error::last_os_error()
                );
            }
        }
    }
}
