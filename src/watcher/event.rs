//! Event categories, raw port events and classified notifications.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;
use chrono::{DateTime, Utc};

use super::handle::HandleKey;

bitflags! {
    /// Change categories, used both as an interest set and as fired flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventCategories: u8 {
        const DELETE = 1 << 0;
        const WRITE = 1 << 1;
        const RENAME = 1 << 2;
        const ATTRIB = 1 << 3;
    }
}

impl EventCategories {
    /// Report order. Each check is independent of the others.
    pub const ORDER: [EventCategories; 4] = [
        EventCategories::DELETE,
        EventCategories::WRITE,
        EventCategories::RENAME,
        EventCategories::ATTRIB,
    ];

    /// Interest set used for watch targets.
    pub fn interest(include_attributes: bool) -> Self {
        let base = Self::DELETE | Self::WRITE | Self::RENAME;
        if include_attributes {
            base | Self::ATTRIB
        } else {
            base
        }
    }

    /// Label used in report lines. Only meaningful for single-bit values.
    pub fn label(self) -> &'static str {
        if self == Self::DELETE {
            "delete"
        } else if self == Self::WRITE {
            "write"
        } else if self == Self::RENAME {
            "rename"
        } else if self == Self::ATTRIB {
            "attrib"
        } else {
            "mixed"
        }
    }

    /// Single-bit categories contained in `self`, in report order.
    pub fn each(self) -> impl Iterator<Item = EventCategories> {
        Self::ORDER.into_iter().filter(move |c| self.contains(*c))
    }
}

impl fmt::Display for EventCategories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for category in self.each() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(category.label())?;
            first = false;
        }
        Ok(())
    }
}

/// One readiness notification as returned by an event port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub key: HandleKey,
    pub flags: EventCategories,
}

impl RawEvent {
    pub fn new(key: HandleKey, flags: EventCategories) -> Self {
        Self { key, flags }
    }
}

/// A classified change on a watched path.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub path: Arc<PathBuf>,
    pub categories: EventCategories,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Build a notification, or `None` if no category of interest fired.
    pub fn classify(
        path: Arc<PathBuf>,
        flags: EventCategories,
        interest: EventCategories,
    ) -> Option<Self> {
        let categories = flags & interest;
        if categories.is_empty() {
            return None;
        }
        Some(Self {
            path,
            categories,
            timestamp: Utc::now(),
        })
    }

    /// `"<category>: <path>"` for every fired category, in report order.
    pub fn report_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.categories
            .each()
            .map(move |c| format!("{}: {}", c.label(), self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> Arc<PathBuf> {
        Arc::new(PathBuf::from(p))
    }

    #[test]
    fn test_classify_single_category() {
        let event = NotificationEvent::classify(
            path("./test/a.txt"),
            EventCategories::WRITE,
            EventCategories::interest(false),
        )
        .unwrap();

        assert_eq!(event.categories, EventCategories::WRITE);
        let lines: Vec<_> = event.report_lines().collect();
        assert_eq!(lines, vec!["write: ./test/a.txt"]);
    }

    #[test]
    fn test_classify_reports_every_category() {
        // Rename and delete together: neither wins over the other
        let event = NotificationEvent::classify(
            path("/w/b.txt"),
            EventCategories::RENAME | EventCategories::DELETE | EventCategories::WRITE,
            EventCategories::interest(false),
        )
        .unwrap();

        let lines: Vec<_> = event.report_lines().collect();
        assert_eq!(
            lines,
            vec!["delete: /w/b.txt", "write: /w/b.txt", "rename: /w/b.txt"]
        );
    }

    #[test]
    fn test_classify_filters_by_interest() {
        // Attribute changes are not reported unless asked for
        assert!(
            NotificationEvent::classify(
                path("/w/c"),
                EventCategories::ATTRIB,
                EventCategories::interest(false)
            )
            .is_none()
        );

        let event = NotificationEvent::classify(
            path("/w/c"),
            EventCategories::ATTRIB | EventCategories::WRITE,
            EventCategories::interest(true),
        )
        .unwrap();
        assert_eq!(
            event.categories,
            EventCategories::ATTRIB | EventCategories::WRITE
        );
    }

    #[test]
    fn test_display() {
        let all = EventCategories::all();
        assert_eq!(all.to_string(), "delete|write|rename|attrib");
        assert_eq!(EventCategories::empty().to_string(), "");
    }
}
