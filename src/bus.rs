//! Application-wide notices backed by a `tokio::sync::broadcast` channel.
//!
//! The orchestrator publishes here when something outside a single job
//! happens (the cache was wiped, a refresh was requested) and subscribes
//! to log those notices to the console.

use std::fmt;

use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemNotice {
    /// The cache directory was cleared and recreated.
    CacheDeleted,
    /// The operator asked for a fresh session.
    RefreshRequested,
}

impl SystemNotice {
    /// Console text for this notice.
    pub fn console_message(self) -> &'static str {
        match self {
            SystemNotice::CacheDeleted => "Cache deleted successfully.",
            SystemNotice::RefreshRequested => "Session refreshed.",
        }
    }
}

impl fmt::Display for SystemNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemNotice::CacheDeleted => write!(f, "cache.deleted"),
            SystemNotice::RefreshRequested => write!(f, "session.refresh"),
        }
    }
}

/// In-process fan-out for [`SystemNotice`]s.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    sender: broadcast::Sender<SystemNotice>,
}

impl NoticeBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers that fall behind observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, notice: SystemNotice) -> usize {
        tracing::debug!(%notice, "Publishing system notice");
        // A send error only means nobody is listening.
        self.sender.send(notice).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemNotice> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
