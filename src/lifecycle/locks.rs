//! Per-order mutual exclusion
//!
//! Every state-machine transition runs inside the order's critical
//! section; operations on distinct orders never contend.

use dashmap::DashMap;
use ethers::types::H256;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct OrderLocks {
    locks: DashMap<H256, Arc<Mutex<()>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Handle to the keyed mutex for `order_id`, created on first use.
    pub fn lock_for(&self, order_id: H256) -> Arc<Mutex<()>> {
        self.locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for a terminal order. Safe even if another task
    /// still holds a clone; it just stops being handed out.
    pub fn release(&self, order_id: H256) {
        self.locks.remove(&order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn same_order_operations_serialize() {
        let locks = Arc::new(OrderLocks::new());
        let id = H256::repeat_byte(0x01);
        let concurrent = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let lock = locks.lock_for(id);
                let _guard = lock.lock().await;
                let inside = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(inside, Ordering::SeqCst);
                tokio::task::yield_now().await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_orders_do_not_contend() {
        let locks = OrderLocks::new();
        let a = locks.lock_for(H256::repeat_byte(0x01));
        let b = locks.lock_for(H256::repeat_byte(0x02));

        let _ga = a.lock().await;
        // Would deadlock if the keyed lock were global.
        let _gb = b.lock().await;
    }
}
