//! Per-key fill gates for collapsing concurrent cache misses.
//!
//! The first task to miss on a key takes its gate and fills the cache; tasks
//! arriving meanwhile queue on the same gate and re-read the cache once they
//! get through. Every holder and waiter is counted on the gate, and the gate
//! leaves the map when the last of them is gone, including waiters that are
//! cancelled before they get in.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::keys::CacheKey;

#[derive(Default)]
struct Gate {
    lock: Arc<Mutex<()>>,
    // Only touched under the map's shard lock.
    participants: usize,
}

#[derive(Default, Clone)]
pub struct FlightGroup {
    gates: Arc<DashMap<CacheKey, Gate>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive fill rights on `key`.
    pub async fn enter(&self, key: &CacheKey) -> FlightGuard {
        let ticket = Ticket::register(&self.gates, key);
        let permit = Arc::clone(&ticket.lock).lock_owned().await;

        FlightGuard {
            _permit: permit,
            _ticket: ticket,
        }
    }

    /// Number of keys with a fill in progress or queued.
    pub fn in_flight(&self) -> usize {
        self.gates.len()
    }
}

/// Fill rights on one key, released on drop.
pub struct FlightGuard {
    // Field order matters: the permit is released before the ticket leaves.
    _permit: OwnedMutexGuard<()>,
    _ticket: Ticket,
}

/// A holder's or waiter's registration on a gate.
struct Ticket {
    key: CacheKey,
    lock: Arc<Mutex<()>>,
    gates: Arc<DashMap<CacheKey, Gate>>,
}

impl Ticket {
    fn register(gates: &Arc<DashMap<CacheKey, Gate>>, key: &CacheKey) -> Self {
        let lock = {
            let mut gate = gates.entry(key.clone()).or_default();
            gate.participants += 1;
            Arc::clone(&gate.lock)
        };
        Self {
            key: key.clone(),
            lock,
            gates: Arc::clone(gates),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Entry::Occupied(mut gate) = self.gates.entry(self.key.clone()) {
            gate.get_mut().participants -= 1;
            if gate.get().participants == 0 {
                gate.remove();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::domain::users::Username;

    fn key(name: &str) -> CacheKey {
        CacheKey::user(&Username::parse(name).expect("valid username"))
    }

    #[tokio::test]
    async fn gate_is_released_on_drop() {
        let flights = FlightGroup::new();
        {
            let _guard = flights.enter(&key("alice")).await;
            assert_eq!(flights.in_flight(), 1);
        }
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let flights = FlightGroup::new();
        let _alice = flights.enter(&key("alice")).await;
        let bob = tokio::time::timeout(Duration::from_millis(100), flights.enter(&key("bob"))).await;
        assert!(bob.is_ok());
        assert_eq!(flights.in_flight(), 2);
    }

    #[tokio::test]
    async fn same_key_is_serialized() {
        let flights = FlightGroup::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = flights.enter(&key("alice")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_the_gate() {
        let flights = FlightGroup::new();
        let holder = flights.enter(&key("alice")).await;

        let waiter_key = key("alice");
        let mut waiter = Box::pin(flights.enter(&waiter_key));
        let queued = tokio::time::timeout(Duration::from_millis(10), &mut waiter).await;
        assert!(queued.is_err(), "waiter should queue behind the holder");
        assert_eq!(flights.in_flight(), 1);

        drop(holder);
        assert_eq!(flights.in_flight(), 1);
        drop(waiter);
        assert_eq!(flights.in_flight(), 0);

        let again =
            tokio::time::timeout(Duration::from_millis(100), flights.enter(&key("alice"))).await;
        assert!(again.is_ok(), "gate should be free after the waiter is cancelled");
    }

    #[tokio::test]
    async fn waiter_cancelled_while_holder_runs() {
        let flights = FlightGroup::new();
        let holder = flights.enter(&key("alice")).await;

        let waiter =
            tokio::time::timeout(Duration::from_millis(10), flights.enter(&key("alice"))).await;
        assert!(waiter.is_err());
        assert_eq!(flights.in_flight(), 1);

        drop(holder);
        assert_eq!(flights.in_flight(), 0);
    }
}
