//! Cooperative cancellation shared by the worker loop and every fetch.
//!
//! A [`ShutdownTrigger`] fires once; every cloned [`Shutdown`] observes it.
//! Dropping the trigger counts as firing it, so a worker can never outlive the
//! owner of its trigger.

use std::sync::Arc;
use tokio::sync::watch;

/// Fires the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left
        self.sender.send_replace(true);
    }
}

/// Cloneable view of the shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
    // Holds the sender for signals that have no external trigger
    _detached: Option<Arc<watch::Sender<bool>>>,
}

impl Shutdown {
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (sender, receiver) = watch::channel(false);
        (
            ShutdownTrigger { sender },
            Shutdown {
                receiver,
                _detached: None,
            },
        )
    }

    /// A signal that never fires, for one-off invocations such as a manual refresh
    pub fn never() -> Shutdown {
        let (sender, receiver) = watch::channel(false);
        Shutdown {
            receiver,
            _detached: Some(Arc::new(sender)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolve once the signal fires (or the trigger is dropped).
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        // wait_for errors only when the sender is gone, which also means shutdown
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}
