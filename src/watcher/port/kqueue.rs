//! kqueue backend using `EVFILT_VNODE`.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use super::{EventPort, Registration};
use crate::watcher::error::WatchError;
use crate::watcher::event::{EventCategories, RawEvent};
use crate::watcher::handle::HandleKey;

// EV_ADD creates the registration, EV_CLEAR resets state after retrieval,
// EV_ENABLE keeps it armed.
const EV_FLAGS: u16 = libc::EV_ADD | libc::EV_CLEAR | libc::EV_ENABLE;

/// One kqueue instance.
#[derive(Debug)]
pub struct KqueuePort {
    kq: OwnedFd,
}

impl KqueuePort {
    pub fn new() -> Result<Self, WatchError> {
        let fd = unsafe { libc::kqueue() };
        if fd < 0 {
            return Err(WatchError::from_port_create(io::Error::last_os_error()));
        }
        let kq = unsafe { OwnedFd::from_raw_fd(fd) };
        unsafe { libc::fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
        Ok(Self { kq })
    }

    fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let timeout = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as libc::c_int,
                ptr::null_mut(),
                0,
                &timeout,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

fn note_flags(interest: EventCategories) -> u32 {
    let mut fflags = 0;
    if interest.contains(EventCategories::DELETE) {
        fflags |= libc::NOTE_DELETE;
    }
    if interest.contains(EventCategories::WRITE) {
        fflags |= libc::NOTE_WRITE | libc::NOTE_EXTEND;
    }
    if interest.contains(EventCategories::RENAME) {
        fflags |= libc::NOTE_RENAME;
    }
    if interest.contains(EventCategories::ATTRIB) {
        fflags |= libc::NOTE_ATTRIB | libc::NOTE_LINK;
    }
    fflags
}

fn categories(fflags: u32) -> EventCategories {
    let mut out = EventCategories::empty();
    if fflags & libc::NOTE_DELETE != 0 {
        out |= EventCategories::DELETE;
    }
    if fflags & (libc::NOTE_WRITE | libc::NOTE_EXTEND) != 0 {
        out |= EventCategories::WRITE;
    }
    if fflags & libc::NOTE_RENAME != 0 {
        out |= EventCategories::RENAME;
    }
    if fflags & (libc::NOTE_ATTRIB | libc::NOTE_LINK) != 0 {
        out |= EventCategories::ATTRIB;
    }
    out
}

fn change(registration: &Registration, flags: u16) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = registration.key.fd() as libc::uintptr_t;
    ev.filter = libc::EVFILT_VNODE;
    ev.flags = flags;
    ev.fflags = note_flags(registration.interest);
    // The generation rides along in udata so events resolve to the exact handle.
    ev.udata = registration.key.generation() as usize as *mut libc::c_void;
    ev
}

fn timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}

impl EventPort for KqueuePort {
    fn name(&self) -> &str {
        "kqueue"
    }

    fn register(&self, registration: &Registration) -> Result<(), WatchError> {
        self.submit(&[change(registration, EV_FLAGS)])
            .map_err(|e| match e.raw_os_error() {
                Some(libc::ENOMEM) => WatchError::ResourceExhausted {
                    reason: format!("kqueue registration for {}: {e}", registration.key),
                },
                _ => WatchError::Poll { source: e },
            })
    }

    fn wait(
        &self,
        registrations: &[Registration],
        max_events: usize,
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, WatchError> {
        let changes: Vec<libc::kevent> = registrations
            .iter()
            .map(|r| change(r, EV_FLAGS))
            .collect();
        let mut events: Vec<libc::kevent> = vec![unsafe { std::mem::zeroed() }; max_events.max(1)];
        let ts = timespec(timeout);

        let n = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as libc::c_int,
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                &ts,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(WatchError::Poll { source: err });
        }

        let mut ready = Vec::with_capacity(n as usize);
        for ev in &events[..n as usize] {
            if ev.flags & libc::EV_ERROR != 0 {
                crate::debug_event!(
                    "port",
                    "change rejected",
                    "fd {}: {}",
                    ev.ident,
                    io::Error::from_raw_os_error(ev.data as i32)
                );
                continue;
            }
            let key = HandleKey::new(ev.ident as RawFd, ev.udata as usize as u64);
            let flags = categories(ev.fflags);
            if !flags.is_empty() {
                ready.push(RawEvent::new(key, flags));
            }
        }
        Ok(ready)
    }

    fn deregister(&self, registration: &Registration) {
        if let Err(e) = self.submit(&[change(registration, libc::EV_DELETE)]) {
            // Already gone when the vnode was revoked or the fd closed.
            crate::debug_event!("port", "deregister", "{}: {e}", registration.key);
        }
    }
}
