//! Watcher session: one port, one registry, one loop per watched path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::error::WatchError;
use super::event::EventCategories;
use super::handle::{HandleKey, Opener};
use super::port::{self, EventPort};
use super::registry::HandleRegistry;
use super::watch_loop::{LoopContext, LoopExit, LoopOutcome, PollStrategy, WatchLoop};
use crate::config::{PollStrategyKind, WatchConfig};

/// Session-wide loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub strategy: PollStrategy,
    pub max_events: usize,
    pub interest: EventCategories,
}

impl WatchOptions {
    pub fn from_config(config: &WatchConfig) -> Self {
        let interval = Duration::from_millis(config.poll_interval_ms);
        let strategy = match config.strategy {
            PollStrategyKind::Blocking => PollStrategy::Blocking { timeout: interval },
            PollStrategyKind::Interval => PollStrategy::Interval { delay: interval },
        };
        Self {
            strategy,
            max_events: config.max_events.max(1),
            interest: EventCategories::interest(config.include_attributes),
        }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from_config(&WatchConfig::default())
    }
}

/// Result of starting several watches at once.
#[derive(Debug, Default)]
pub struct WatchReport {
    pub started: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, WatchError)>,
}

impl WatchReport {
    pub fn all_failed(&self) -> bool {
        self.started.is_empty() && !self.failed.is_empty()
    }
}

struct RunningLoop {
    key: HandleKey,
    cancel: CancellationToken,
    thread: JoinHandle<LoopOutcome>,
}

impl RunningLoop {
    fn stop(self) -> Option<LoopOutcome> {
        self.cancel.cancel();
        self.thread.join().ok()
    }
}

/// Owns the shared event port and handle registry, and the threads watching
/// each path.
///
/// Failing to create the port is the only error that prevents a session
/// from existing. Every other failure is scoped to one path.
pub struct Watcher {
    ctx: LoopContext,
    opener: Opener,
    shutdown: CancellationToken,
    loops: Mutex<HashMap<PathBuf, RunningLoop>>,
}

impl Watcher {
    /// Start a session on the platform's event port.
    pub fn new(options: WatchOptions, dispatcher: Arc<dyn Dispatcher>) -> Result<Self, WatchError> {
        let port = port::create()?;
        Ok(Self::with_port(port, options, dispatcher))
    }

    /// Start a session on an existing port.
    pub fn with_port(
        port: Arc<dyn EventPort>,
        options: WatchOptions,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let ctx = LoopContext {
            port,
            registry: Arc::new(HandleRegistry::new()),
            dispatcher,
            strategy: options.strategy,
            max_events: options.max_events,
            interest: options.interest,
        };
        Self {
            ctx,
            opener: Opener::new(),
            shutdown: CancellationToken::new(),
            loops: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.ctx.registry
    }

    /// Open, register and start watching `path`.
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<HandleKey, WatchError> {
        let path = path.as_ref().to_path_buf();
        if self.is_watching(&path) {
            return Err(WatchError::AlreadyWatched { path });
        }

        // Opened without the loop table locked so a slow open stalls only this call.
        let handle = self.opener.open(&path)?;

        let mut loops = self.loops.lock();
        if let Some(running) = loops.get(&path) {
            if !running.thread.is_finished() {
                return Err(WatchError::AlreadyWatched { path });
            }
            if let Some(finished) = loops.remove(&path) {
                log_finished(finished.stop());
            }
        }

        let key = handle.key();
        self.ctx.registry.register(key, Arc::clone(handle.path()))?;

        let cancel = self.shutdown.child_token();
        let mut watch = WatchLoop::new(self.ctx.clone(), handle, cancel.clone());
        watch.register()?;

        let thread = thread::Builder::new()
            .name(format!("vigil-watch-{}", key.fd()))
            .spawn(move || watch.run())
            .map_err(|e| WatchError::ResourceExhausted {
                reason: format!("spawning watch thread for {}: {e}", path.display()),
            })?;

        crate::log_event!("watch", "watching", "{}", path.display());
        loops.insert(
            path,
            RunningLoop {
                key,
                cancel,
                thread,
            },
        );
        Ok(key)
    }

    /// Start a loop for each path. Failures are logged and collected; they do
    /// not stop the other paths from being watched.
    pub fn watch_all<I, P>(&self, paths: I) -> WatchReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = WatchReport::default();
        for path in paths {
            let path = path.as_ref();
            match self.watch(path) {
                Ok(_) => report.started.push(path.to_path_buf()),
                Err(e) => {
                    tracing::error!("[watch] {e}");
                    report.failed.push((path.to_path_buf(), e));
                }
            }
        }
        report
    }

    /// Stop watching `path`. Returns `None` if it was not watched.
    pub fn unwatch(&self, path: impl AsRef<Path>) -> Option<LoopOutcome> {
        let running = self.loops.lock().remove(path.as_ref())?;
        let outcome = running.stop();
        if outcome.is_none() {
            tracing::error!("[watch] loop for {} panicked", path.as_ref().display());
        }
        outcome
    }

    /// Paths with a live loop.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .loops
            .lock()
            .iter()
            .filter(|(_, running)| !running.thread.is_finished())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.loops
            .lock()
            .get(path.as_ref())
            .is_some_and(|running| !running.thread.is_finished())
    }

    /// Key of the handle watching `path`.
    pub fn key_of(&self, path: impl AsRef<Path>) -> Option<HandleKey> {
        self.loops.lock().get(path.as_ref()).map(|running| running.key)
    }

    /// Cancel every loop and wait for each to release its handle.
    pub fn shutdown(&self) -> Vec<LoopOutcome> {
        self.shutdown.cancel();
        let drained: Vec<(PathBuf, RunningLoop)> = self.loops.lock().drain().collect();

        let mut outcomes = Vec::with_capacity(drained.len());
        for (path, running) in drained {
            match running.stop() {
                Some(outcome) => outcomes.push(outcome),
                None => tracing::error!("[watch] loop for {} panicked", path.display()),
            }
        }
        crate::debug_event!("watch", "shutdown", "{} loops stopped", outcomes.len());
        outcomes
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if !self.loops.get_mut().is_empty() {
            self.shutdown();
        }
    }
}

fn log_finished(outcome: Option<LoopOutcome>) {
    let Some(outcome) = outcome else {
        return;
    };
    if !matches!(outcome.exit, LoopExit::Cancelled) {
        crate::debug_event!(
            "watch",
            "reaped",
            "{}: {}",
            outcome.path.display(),
            outcome.exit
        );
    }
}
