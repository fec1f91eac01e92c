//! Per-order serialization.

use std::collections::HashMap;
use std::sync::Arc;

use common::OrderId;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub(crate) type OrderGuard = OwnedMutexGuard<()>;

/// One async mutex per order, created on first use.
#[derive(Debug, Default)]
pub(crate) struct OrderLocks {
    locks: Mutex<HashMap<OrderId, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    /// Waits until no other operation holds the order.
    pub(crate) async fn acquire(&self, order_id: OrderId) -> OrderGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(order_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Unlocks the order and forgets its mutex.
    ///
    /// The entry stays when another operation is already waiting on it, so
    /// the map only holds orders with work in flight.
    pub(crate) async fn release(&self, order_id: OrderId, guard: OrderGuard) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one behind the guard.
        if locks
            .get(&order_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&order_id);
        }
        drop(guard);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_operations_on_one_order_do_not_overlap() {
        let locks = Arc::new(OrderLocks::default());
        let active = Arc::new(AtomicU32::new(0));
        let order_id = OrderId::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(order_id).await;
                assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_release_removes_idle_lock() {
        let locks = OrderLocks::default();
        let order_id = OrderId::new();

        let guard = locks.acquire(order_id).await;
        assert_eq!(locks.len().await, 1);
        locks.release(order_id, guard).await;
        assert_eq!(locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_release_keeps_lock_with_waiter() {
        let locks = Arc::new(OrderLocks::default());
        let order_id = OrderId::new();

        let guard = locks.acquire(order_id).await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move {
                let guard = locks.acquire(order_id).await;
                locks.release(order_id, guard).await;
            }
        });
        // Let the waiter clone the mutex and block on it.
        while Arc::strong_count(locks.locks.lock().await.get(&order_id).unwrap()) < 3 {
            tokio::task::yield_now().await;
        }

        locks.release(order_id, guard).await;
        assert_eq!(locks.len().await, 1);

        waiter.await.unwrap();
        assert_eq!(locks.len().await, 0);
    }
}
