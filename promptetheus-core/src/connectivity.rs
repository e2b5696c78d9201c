//! Online/offline state tracking.
//!
//! The monitor never touches the network. It is fed by a platform signal
//! source (a health probe in the CLI) and fans transitions out to
//! subscribers.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Signals published by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Transitioned from offline to online.
    Online,
    /// Transitioned from online to offline.
    Offline,
    /// The application returned to the foreground.
    Foreground,
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            online: AtomicBool::new(initially_online),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records the current platform state.
    ///
    /// Returns true and notifies subscribers only when the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        let event = if online {
            tracing::info!("Connectivity restored");
            ConnectivityEvent::Online
        } else {
            tracing::info!("Connectivity lost");
            ConnectivityEvent::Offline
        };
        // No subscribers is fine
        let _ = self.events.send(event);
        true
    }

    pub fn notify_foreground(&self) {
        let _ = self.events.send(ConnectivityEvent::Foreground);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_initial_state() {
        assert!(ConnectivityMonitor::new(true).is_online());
        assert!(!ConnectivityMonitor::new(false).is_online());
    }

    #[test]
    fn test_transitions_emit_events() {
        let monitor = ConnectivityMonitor::new(true);
        let mut events = monitor.subscribe();

        assert!(monitor.set_online(false));
        assert!(monitor.set_online(true));

        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Offline);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Online);
    }

    #[test]
    fn test_repeated_state_is_not_a_transition() {
        let monitor = ConnectivityMonitor::new(true);
        let mut events = monitor.subscribe();

        assert!(!monitor.set_online(true));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_foreground_signal() {
        let monitor = ConnectivityMonitor::new(false);
        let mut events = monitor.subscribe();

        monitor.notify_foreground();

        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Foreground);
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_set_online_without_subscribers() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(monitor.set_online(true));
        assert!(monitor.is_online());
    }
}
