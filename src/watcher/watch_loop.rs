//! Per-path watch loop.
//!
//! ```text
//! Registering --register ok--> Polling --cancel / fatal--> Terminated
//!      |                        ^    |
//!      +--register failed--+    +----+  wait, resolve, classify, dispatch
//!                          v
//!                      Terminated
//! ```
//!
//! The loop owns its [`WatchHandle`] through a lease. Dropping the lease
//! deregisters from the port, closes the descriptor and only then removes the
//! registry entry, on every exit path including unwinding.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::error::WatchError;
use super::event::{EventCategories, NotificationEvent};
use super::handle::{HandleKey, WatchHandle};
use super::port::{EventPort, Registration};
use super::registry::HandleRegistry;

/// How a loop waits for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    /// Block in the kernel for up to `timeout`, then check for cancellation.
    Blocking { timeout: Duration },
    /// Poll without blocking and sleep `delay` whenever nothing was ready.
    Interval { delay: Duration },
}

impl PollStrategy {
    fn wait_timeout(&self) -> Duration {
        match self {
            PollStrategy::Blocking { timeout } => *timeout,
            PollStrategy::Interval { .. } => Duration::ZERO,
        }
    }

    fn idle_delay(&self) -> Option<Duration> {
        match self {
            PollStrategy::Blocking { .. } => None,
            PollStrategy::Interval { delay } => Some(*delay),
        }
    }

    /// Pause after a failed wait, so a persistent failure cannot spin.
    fn retry_delay(&self) -> Duration {
        match self {
            PollStrategy::Blocking { timeout } => *timeout,
            PollStrategy::Interval { delay } => *delay,
        }
    }
}

impl Default for PollStrategy {
    fn default() -> Self {
        PollStrategy::Blocking {
            timeout: Duration::from_millis(250),
        }
    }
}

/// Everything a loop shares with the rest of its session.
#[derive(Clone)]
pub struct LoopContext {
    pub port: Arc<dyn EventPort>,
    pub registry: Arc<HandleRegistry>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub strategy: PollStrategy,
    pub max_events: usize,
    pub interest: EventCategories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Registering,
    Polling,
    Terminated,
}

/// Why a loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    Cancelled,
    /// The registry no longer knows this loop's handle.
    Orphaned,
    Failed(WatchError),
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopExit::Cancelled => f.write_str("cancelled"),
            LoopExit::Orphaned => f.write_str("handle vanished from registry"),
            LoopExit::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub polls: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub poll_errors: u64,
}

/// Final report of a loop.
#[derive(Debug)]
pub struct LoopOutcome {
    pub path: Arc<PathBuf>,
    pub exit: LoopExit,
    pub stats: LoopStats,
}

/// Owns the handle and undoes its registrations when dropped.
struct Lease {
    handle: Option<WatchHandle>,
    registration: Registration,
    armed: bool,
    port: Arc<dyn EventPort>,
    registry: Arc<HandleRegistry>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.armed {
            self.port.deregister(&self.registration);
        }
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        self.registry.unregister(self.registration.key);
    }
}

/// One watched path.
pub struct WatchLoop {
    ctx: LoopContext,
    lease: Lease,
    path: Arc<PathBuf>,
    cancel: CancellationToken,
    state: LoopState,
    stats: LoopStats,
}

impl WatchLoop {
    /// Take ownership of a handle whose registry entry already exists.
    pub fn new(ctx: LoopContext, handle: WatchHandle, cancel: CancellationToken) -> Self {
        let registration = Registration::new(&handle, ctx.interest);
        let path = Arc::clone(handle.path());
        let lease = Lease {
            handle: Some(handle),
            registration,
            armed: false,
            port: Arc::clone(&ctx.port),
            registry: Arc::clone(&ctx.registry),
        };
        Self {
            ctx,
            lease,
            path,
            cancel,
            state: LoopState::Registering,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn key(&self) -> HandleKey {
        self.lease.registration.key
    }

    pub fn path(&self) -> &Arc<PathBuf> {
        &self.path
    }

    /// First submission to the port. Moves the loop to `Polling`.
    pub fn register(&mut self) -> Result<(), WatchError> {
        if self.state != LoopState::Registering {
            return Ok(());
        }
        match self.ctx.port.register(&self.lease.registration) {
            Ok(()) => {
                self.lease.armed = true;
                self.state = LoopState::Polling;
                Ok(())
            }
            Err(e) => {
                self.state = LoopState::Terminated;
                Err(e)
            }
        }
    }

    /// Run until cancelled or an unrecoverable error occurs.
    pub fn run(mut self) -> LoopOutcome {
        if let Err(e) = self.register() {
            tracing::error!("[watch] cannot register {}: {e}", self.path.display());
            return self.finish(LoopExit::Failed(e));
        }

        crate::debug_event!(
            "watch",
            "polling",
            "{} ({})",
            self.path.display(),
            self.key()
        );

        let exit = loop {
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            match self.poll_once() {
                Ok(Cycle::Dispatched(0)) => {
                    if let Some(delay) = self.ctx.strategy.idle_delay() {
                        thread::sleep(delay);
                    }
                }
                Ok(Cycle::Dispatched(_)) => {}
                Ok(Cycle::Orphaned) => break LoopExit::Orphaned,
                Err(e) if e.is_fatal_to_loop() => break LoopExit::Failed(e),
                Err(e) => {
                    self.stats.poll_errors += 1;
                    tracing::warn!("[watch] {}: {e}", self.path.display());
                    thread::sleep(self.ctx.strategy.retry_delay());
                }
            }
        };

        self.finish(exit)
    }

    /// One wait plus dispatch of everything it returned.
    fn poll_once(&mut self) -> Result<Cycle, WatchError> {
        self.stats.polls += 1;
        let events = self.ctx.port.wait(
            std::slice::from_ref(&self.lease.registration),
            self.ctx.max_events,
            self.ctx.strategy.wait_timeout(),
        )?;

        let mut dispatched = 0;
        let mut orphaned = false;
        for raw in events {
            // The queue is shared, so resolve each event by its own handle.
            let path = match self.ctx.registry.lookup(raw.key) {
                Ok(path) => path,
                Err(e) => {
                    // Keep going: the rest of the batch may belong to other loops.
                    if raw.key == self.key() {
                        orphaned = true;
                        continue;
                    }
                    self.stats.dropped += 1;
                    crate::debug_event!("watch", "dropped", "{e}");
                    continue;
                }
            };

            let Some(event) = NotificationEvent::classify(path, raw.flags, self.ctx.interest)
            else {
                continue;
            };
            self.ctx.dispatcher.dispatch(&event);
            dispatched += 1;
        }

        self.stats.dispatched += dispatched;
        if orphaned {
            return Ok(Cycle::Orphaned);
        }
        Ok(Cycle::Dispatched(dispatched))
    }

    fn finish(mut self, exit: LoopExit) -> LoopOutcome {
        self.state = LoopState::Terminated;
        match &exit {
            LoopExit::Cancelled => {
                crate::debug_event!("watch", "stopped", "{}", self.path.display())
            }
            other => tracing::warn!("[watch] {} stopped: {other}", self.path.display()),
        }
        let path = Arc::clone(&self.path);
        let stats = self.stats;
        // Dropping self releases the lease.
        drop(self);
        LoopOutcome { path, exit, stats }
    }
}

enum Cycle {
    Dispatched(u64),
    Orphaned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::dispatcher::ChannelDispatcher;
    use crate::watcher::event::RawEvent;
    use crate::watcher::handle::Opener;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io;
    use tempfile::TempDir;

    /// Port that replays a fixed script of wait results.
    #[derive(Default)]
    struct ScriptedPort {
        script: Mutex<VecDeque<Result<Vec<RawEvent>, io::ErrorKind>>>,
        registered: Mutex<Vec<Registration>>,
        deregistered: Mutex<Vec<Registration>>,
        refuse_registration: bool,
    }

    impl ScriptedPort {
        fn push(&self, step: Result<Vec<RawEvent>, io::ErrorKind>) {
            self.script.lock().push_back(step);
        }
    }

    impl EventPort for ScriptedPort {
        fn name(&self) -> &str {
            "scripted"
        }

        fn register(&self, registration: &Registration) -> Result<(), WatchError> {
            if self.refuse_registration {
                return Err(WatchError::ResourceExhausted {
                    reason: "scripted".to_string(),
                });
            }
            self.registered.lock().push(*registration);
            Ok(())
        }

        fn wait(
            &self,
            _registrations: &[Registration],
            _max_events: usize,
            timeout: Duration,
        ) -> Result<Vec<RawEvent>, WatchError> {
            let step = self.script.lock().pop_front();
            match step {
                Some(Ok(events)) => Ok(events),
                Some(Err(kind)) => Err(WatchError::Poll {
                    source: io::Error::from(kind),
                }),
                None => {
                    thread::sleep(timeout);
                    Ok(Vec::new())
                }
            }
        }

        fn deregister(&self, registration: &Registration) {
            self.deregistered.lock().push(*registration);
        }
    }

    struct Fixture {
        _dir: TempDir,
        port: Arc<ScriptedPort>,
        registry: Arc<HandleRegistry>,
        rx: crossbeam_channel::Receiver<NotificationEvent>,
        ctx: LoopContext,
        handle: WatchHandle,
    }

    fn fixture(port: ScriptedPort) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a").unwrap();

        let port = Arc::new(port);
        let registry = Arc::new(HandleRegistry::new());
        let (dispatcher, rx) = ChannelDispatcher::channel();
        let handle = Opener::new().open(&path).unwrap();
        registry
            .register(handle.key(), Arc::clone(handle.path()))
            .unwrap();

        let ctx = LoopContext {
            port: port.clone(),
            registry: registry.clone(),
            dispatcher: Arc::new(dispatcher),
            strategy: PollStrategy::Blocking {
                timeout: Duration::from_millis(5),
            },
            max_events: 10,
            interest: EventCategories::interest(false),
        };

        Fixture {
            _dir: dir,
            port,
            registry,
            rx,
            ctx,
            handle,
        }
    }

    #[test]
    fn test_dispatches_union_of_categories() {
        let f = fixture(ScriptedPort::default());
        let key = f.handle.key();
        f.port.push(Ok(vec![RawEvent::new(
            key,
            EventCategories::RENAME | EventCategories::DELETE,
        )]));

        let cancel = CancellationToken::new();
        let watch = WatchLoop::new(f.ctx.clone(), f.handle, cancel.clone());
        let join = thread::spawn(move || watch.run());

        let event = f.rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event.categories,
            EventCategories::RENAME | EventCategories::DELETE
        );
        let lines: Vec<_> = event.report_lines().collect();
        assert!(lines[0].starts_with("delete: "));
        assert!(lines[1].starts_with("rename: "));

        cancel.cancel();
        let outcome = join.join().unwrap();
        assert!(matches!(outcome.exit, LoopExit::Cancelled));
        assert_eq!(outcome.stats.dispatched, 1);
    }

    #[test]
    fn test_unknown_handle_is_dropped_and_loop_continues() {
        let f = fixture(ScriptedPort::default());
        let key = f.handle.key();
        let stranger = HandleKey::new(key.fd() + 1000, 99);
        f.port
            .push(Ok(vec![RawEvent::new(stranger, EventCategories::WRITE)]));
        f.port
            .push(Ok(vec![RawEvent::new(key, EventCategories::WRITE)]));

        let cancel = CancellationToken::new();
        let watch = WatchLoop::new(f.ctx.clone(), f.handle, cancel.clone());
        let join = thread::spawn(move || watch.run());

        let event = f.rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.categories, EventCategories::WRITE);

        cancel.cancel();
        let outcome = join.join().unwrap();
        assert_eq!(outcome.stats.dropped, 1);
        assert_eq!(outcome.stats.dispatched, 1);
        // Nothing else was emitted for the stranger
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn test_poll_error_does_not_terminate() {
        let f = fixture(ScriptedPort::default());
        let key = f.handle.key();
        f.port.push(Err(io::ErrorKind::Other));
        f.port
            .push(Ok(vec![RawEvent::new(key, EventCategories::DELETE)]));

        let cancel = CancellationToken::new();
        let watch = WatchLoop::new(f.ctx.clone(), f.handle, cancel.clone());
        let join = thread::spawn(move || watch.run());

        let event = f.rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.categories, EventCategories::DELETE);

        cancel.cancel();
        let outcome = join.join().unwrap();
        assert_eq!(outcome.stats.poll_errors, 1);
    }

    #[test]
    fn test_cancel_releases_everything() {
        let f = fixture(ScriptedPort::default());
        let key = f.handle.key();

        let cancel = CancellationToken::new();
        let watch = WatchLoop::new(f.ctx.clone(), f.handle, cancel.clone());
        cancel.cancel();
        let outcome = watch.run();

        assert!(matches!(outcome.exit, LoopExit::Cancelled));
        assert!(!f.registry.contains(key));
        assert_eq!(f.port.registered.lock().len(), 1);
        assert_eq!(f.port.deregistered.lock()[0].key, key);
    }

    #[test]
    fn test_failed_registration_never_polls() {
        let f = fixture(ScriptedPort {
            refuse_registration: true,
            ..Default::default()
        });
        let key = f.handle.key();

        let mut watch = WatchLoop::new(f.ctx.clone(), f.handle, CancellationToken::new());
        assert_eq!(watch.state(), LoopState::Registering);
        assert!(watch.register().is_err());
        assert_eq!(watch.state(), LoopState::Terminated);
        drop(watch);

        assert!(!f.registry.contains(key));
        // Never armed, so nothing to deregister
        assert!(f.port.deregistered.lock().is_empty());
    }

    #[test]
    fn test_orphaned_handle_terminates() {
        let f = fixture(ScriptedPort::default());
        let key = f.handle.key();
        f.registry.unregister(key);
        f.port
            .push(Ok(vec![RawEvent::new(key, EventCategories::WRITE)]));

        let watch = WatchLoop::new(f.ctx.clone(), f.handle, CancellationToken::new());
        let outcome = watch.run();

        assert!(matches!(outcome.exit, LoopExit::Orphaned));
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn test_orphaned_loop_still_delivers_rest_of_batch() {
        let f = fixture(ScriptedPort::default());
        let key = f.handle.key();
        let neighbour = HandleKey::new(key.fd() + 1000, 77);
        f.registry
            .register(neighbour, Arc::new(PathBuf::from("/w/neighbour.txt")))
            .unwrap();
        f.registry.unregister(key);
        f.port.push(Ok(vec![
            RawEvent::new(key, EventCategories::WRITE),
            RawEvent::new(neighbour, EventCategories::WRITE),
        ]));

        let watch = WatchLoop::new(f.ctx.clone(), f.handle, CancellationToken::new());
        let outcome = watch.run();

        assert!(matches!(outcome.exit, LoopExit::Orphaned));
        let event = f.rx.try_recv().unwrap();
        assert_eq!(event.path.as_path(), std::path::Path::new("/w/neighbour.txt"));
        assert!(f.rx.try_recv().is_err());
        assert_eq!(outcome.stats.dispatched, 1);
        // Only the loop's own entry is touched
        assert!(f.registry.contains(neighbour));
    }

    #[test]
    fn test_interval_strategy_polls_without_blocking() {
        let mut f = fixture(ScriptedPort::default());
        f.ctx.strategy = PollStrategy::Interval {
            delay: Duration::from_millis(5),
        };
        let key = f.handle.key();
        f.port.push(Ok(Vec::new()));
        f.port
            .push(Ok(vec![RawEvent::new(key, EventCategories::WRITE)]));

        let cancel = CancellationToken::new();
        let watch = WatchLoop::new(f.ctx.clone(), f.handle, cancel.clone());
        let join = thread::spawn(move || watch.run());

        assert!(f.rx.recv_timeout(Duration::from_secs(2)).is_ok());
        cancel.cancel();
        let outcome = join.join().unwrap();
        assert!(outcome.stats.polls >= 2);
    }

    #[test]
    fn test_attrib_outside_interest_is_silent() {
        let f = fixture(ScriptedPort::default());
        let key = f.handle.key();
        f.port
            .push(Ok(vec![RawEvent::new(key, EventCategories::ATTRIB)]));

        let cancel = CancellationToken::new();
        let watch = WatchLoop::new(f.ctx.clone(), f.handle, cancel.clone());
        let join = thread::spawn(move || watch.run());

        assert!(f.rx.recv_timeout(Duration::from_millis(100)).is_err());
        cancel.cancel();
        let outcome = join.join().unwrap();
        assert_eq!(outcome.stats.dispatched, 0);
        assert_eq!(outcome.stats.dropped, 0);
    }
}
