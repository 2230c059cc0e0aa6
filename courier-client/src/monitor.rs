//! Connectivity and lifecycle notifications.
//!
//! The host app reports reachability changes and app lifecycle transitions
//! into a [`Monitor`]. Every [`Monitor::subscribe`] starts a fresh stream,
//! so the dispatch loop can drop its subscription and resubscribe at any
//! time without losing the monitor itself.

use courier_core::{Action, Reachability};
use tokio::sync::broadcast;

/// Notifications buffered per subscriber before the oldest are dropped.
const MONITOR_CAPACITY: usize = 64;

/// App lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app came to the foreground.
    BecameActive,
    /// The app moved to the background.
    EnteredBackground,
    /// The app is about to exit.
    WillTerminate,
}

impl LifecycleEvent {
    /// The pipeline action this transition triggers.
    pub fn action(self) -> Action {
        match self {
            Self::BecameActive => Action::Start,
            Self::EnteredBackground | Self::WillTerminate => Action::Stop,
        }
    }
}

/// Broadcast source of notifications of type `T`.
///
/// Clones report into the same stream.
#[derive(Debug, Clone)]
pub struct Monitor<T> {
    tx: broadcast::Sender<T>,
}

/// Network reachability notifications.
pub type ConnectivityMonitor = Monitor<Reachability>;

/// App lifecycle notifications.
pub type LifecycleMonitor = Monitor<LifecycleEvent>;

impl<T: Clone> Monitor<T> {
    /// Create a monitor with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MONITOR_CAPACITY);
        Self { tx }
    }

    /// Report a notification to every current subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn report(&self, value: T) -> usize {
        self.tx.send(value).unwrap_or(0)
    }

    /// Start a new stream of notifications reported from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Default for Monitor<T> {
    fn default() -> Self {
        Self::new()
    }
}
