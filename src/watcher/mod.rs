//! Per-descriptor filesystem watcher.
//!
//! # Architecture
//!
//! ```text
//! Watcher (session)
//!   - Opener          path -> WatchHandle (owned fd + generation)
//!   - HandleRegistry  HandleKey -> path, shared by all loops
//!   - EventPort       one kqueue / inotify instance, shared by all loops
//!   - WatchLoop x N   one thread per path
//!         |
//!    wait -> RawEvent -> registry lookup -> NotificationEvent -> Dispatcher
//! ```

pub mod dispatcher;
mod error;
mod event;
mod handle;
pub mod port;
mod registry;
mod session;
mod watch_loop;

pub use dispatcher::{ChannelDispatcher, Dispatcher, LogDispatcher};
pub use error::WatchError;
pub use event::{EventCategories, NotificationEvent, RawEvent};
pub use handle::{HandleKey, Opener, WatchHandle};
pub use port::{EventPort, Registration};
pub use registry::HandleRegistry;
pub use session::{WatchOptions, WatchReport, Watcher};
pub use watch_loop::{
    LoopContext, LoopExit, LoopOutcome, LoopState, LoopStats, PollStrategy, WatchLoop,
};
