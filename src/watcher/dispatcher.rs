//! Dispatchers consume classified notifications.

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::event::NotificationEvent;

/// Side effect performed for every notification.
///
/// Called from watch loop threads, possibly concurrently.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, event: &NotificationEvent);
}

impl<F> Dispatcher for F
where
    F: Fn(&NotificationEvent) + Send + Sync,
{
    fn dispatch(&self, event: &NotificationEvent) {
        self(event)
    }
}

/// Writes one `"<category>: <path>"` line per fired category.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn dispatch(&self, event: &NotificationEvent) {
        for line in event.report_lines() {
            tracing::info!(target: "report", "{line}");
        }
    }
}

/// Forwards notifications into a channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: Sender<NotificationEvent>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving end of its stream.
    pub fn channel() -> (Self, Receiver<NotificationEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, event: &NotificationEvent) {
        if self.tx.send(event.clone()).is_err() {
            crate::debug_event!("dispatch", "receiver gone", "{}", event.path.display());
        }
    }
}
