//! # Completion Waiters
//!
//! Clients register to be told about completions in a context. Each client
//! has a trigger counter that grows by one per retired command; poll/wait
//! layers compare it against the last value they saw.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::sync::{Arc, Weak};
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

/// Identity of a registered client
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Get the raw value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

#[derive(Debug, Default)]
struct ClientState {
    triggers: Mutex<u64>,
    cond: Condvar,
}

/// Registered clients of one context
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    clients: Mutex<HashMap<ClientId, Arc<ClientState>>>,
    next_client: AtomicU64,
    total: AtomicU64,
}

impl WaiterRegistry {
    /// Register a new client
    pub fn register(self: &Arc<Self>) -> ClientHandle {
        let id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let state = Arc::new(ClientState::default());
        self.clients.lock().insert(id, state.clone());
        log::debug!("registered waiter {:?}", id);

        ClientHandle {
            id,
            state,
            registry: Arc::downgrade(self),
        }
    }

    fn unregister(&self, id: ClientId) {
        self.clients.lock().remove(&id);
    }

    /// Record `count` completions and wake every client
    pub fn notify(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.total.fetch_add(count, Ordering::AcqRel);
        for client in self.clients.lock().values() {
            *client.triggers.lock() += count;
            client.cond.notify_all();
        }
    }

    /// Completions recorded since the context was created
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Number of registered clients
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

// =============================================================================
// CLIENT HANDLE
// =============================================================================

/// A registered client; unregisters on drop
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    state: Arc<ClientState>,
    registry: Weak<WaiterRegistry>,
}

impl ClientHandle {
    /// Client id
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Completions seen since registration
    pub fn triggers(&self) -> u64 {
        *self.state.triggers.lock()
    }

    /// Block until the trigger count exceeds `seen` or `timeout` elapses
    ///
    /// Returns the trigger count at wake-up.
    pub fn wait(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut triggers = self.state.triggers.lock();
        while *triggers <= seen {
            if self.state.cond.wait_until(&mut triggers, deadline).timed_out() {
                break;
            }
        }
        *triggers
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_notify_counts() {
        let registry = Arc::new(WaiterRegistry::default());
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a.id(), b.id());

        registry.notify(2);
        registry.notify(0);
        assert_eq!(a.triggers(), 2);
        assert_eq!(b.triggers(), 2);
        assert_eq!(registry.total(), 2);
    }

    #[test]
    fn test_late_client_starts_at_zero() {
        let registry = Arc::new(WaiterRegistry::default());
        registry.notify(5);
        let client = registry.register();
        assert_eq!(client.triggers(), 0);
        assert_eq!(registry.total(), 5);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = Arc::new(WaiterRegistry::default());
        let client = registry.register();
        assert_eq!(registry.client_count(), 1);
        drop(client);
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn test_wait_times_out() {
        let registry = Arc::new(WaiterRegistry::default());
        let client = registry.register();
        assert_eq!(client.wait(0, Duration::from_millis(5)), 0);
    }

    #[test]
    fn test_wait_wakes_on_notify() {
        let registry = Arc::new(WaiterRegistry::default());
        let client = registry.register();

        let notifier = {
            let registry = registry.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                registry.notify(1);
            })
        };

        assert_eq!(client.wait(0, Duration::from_secs(5)), 1);
        notifier.join().unwrap();
    }
}
