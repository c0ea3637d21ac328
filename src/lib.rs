//! Vigil: per-file change notifications on top of the kernel's
//! descriptor-based event facility.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod watcher;

pub use config::{PollStrategyKind, Settings, WatchConfig};
pub use watcher::{
    ChannelDispatcher, Dispatcher, EventCategories, HandleKey, LogDispatcher, NotificationEvent,
    WatchError, WatchOptions, WatchReport, Watcher,
};
