//! Network presence.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Reports connectivity and re-runs sync once the network returns.
pub trait NetworkPresence: Send + Sync {
    /// Returns true if the network is believed to be reachable.
    fn is_network_present(&self) -> bool;

    /// Asks to trigger a sync as soon as the network is back.
    fn register_sync_when_network_present(&self);

    /// Withdraws a pending [`register_sync_when_network_present`](Self::register_sync_when_network_present).
    fn unregister_sync_when_network_present(&self);
}

/// A network presence double with call counters.
#[derive(Debug)]
pub struct MockNetwork {
    present: AtomicBool,
    registered: AtomicBool,
    register_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
}

impl MockNetwork {
    /// Creates an online network.
    pub fn online() -> Self {
        Self::with_presence(true)
    }

    /// Creates an offline network.
    pub fn offline() -> Self {
        Self::with_presence(false)
    }

    fn with_presence(present: bool) -> Self {
        Self {
            present: AtomicBool::new(present),
            registered: AtomicBool::new(false),
            register_calls: AtomicUsize::new(0),
            unregister_calls: AtomicUsize::new(0),
        }
    }

    /// Changes connectivity.
    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    /// Returns true while a "sync when present" request is armed.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Number of register calls.
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Number of unregister calls.
    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::online()
    }
}

impl NetworkPresence for MockNetwork {
    fn is_network_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn register_sync_when_network_present(&self) {
        self.registered.store(true, Ordering::SeqCst);
        self.register_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn unregister_sync_when_network_present(&self) {
        self.registered.store(false, Ordering::SeqCst);
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
    }
}
