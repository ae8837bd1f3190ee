//! # Pending Transaction Tracker
//!
//! In-memory map of pushes that are waiting for their callback, keyed by
//! MerchantRequestID.
//!
//! ```text
//! initiate_push ──put──► ┌──────────────────────────┐ ◄──take── handle_callback
//!                        │ merchant_request_id → tx │
//!      sweeper ─sweep──► └──────────────────────────┘ ◄──find─── check_status
//! ```
//!
//! The tracker is a cache in front of the ledger: the request ids are also
//! stored on the sale, so an entry lost to a restart or evicted by the
//! sweeper is still settled through the ledger fallback.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use duka_core::MobilePaymentState;

/// A push payment waiting for its callback.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub sale_id: String,
    pub cashier_id: String,
    pub amount: i64,
    pub phone_number: String,
    pub state: MobilePaymentState,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe tracker of pending pushes.
#[derive(Debug, Default)]
pub struct PendingTracker {
    entries: Mutex<HashMap<String, PendingTransaction>>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingTransaction>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or replaces the entry for its MerchantRequestID.
    pub fn put(&self, entry: PendingTransaction) {
        self.lock().insert(entry.merchant_request_id.clone(), entry);
    }

    pub fn get(&self, merchant_request_id: &str) -> Option<PendingTransaction> {
        self.lock().get(merchant_request_id).cloned()
    }

    pub fn delete(&self, merchant_request_id: &str) -> bool {
        self.lock().remove(merchant_request_id).is_some()
    }

    /// Removes and returns the entry in one critical section. Of two racing
    /// callbacks for the same push, exactly one gets `Some`.
    pub fn take(&self, merchant_request_id: &str) -> Option<PendingTransaction> {
        self.lock().remove(merchant_request_id)
    }

    pub fn find_by_checkout(&self, checkout_request_id: &str) -> Option<PendingTransaction> {
        self.lock()
            .values()
            .find(|entry| entry.checkout_request_id == checkout_request_id)
            .cloned()
    }

    /// Evicts entries created more than `ttl` before `now` and returns them.
    pub fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<PendingTransaction> {
        let cutoff = now - ttl;
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn entry(merchant: &str, checkout: &str, created_at: DateTime<Utc>) -> PendingTransaction {
        PendingTransaction {
            merchant_request_id: merchant.to_string(),
            checkout_request_id: checkout.to_string(),
            sale_id: "sale-1".to_string(),
            amount: 500,
            cashier_id: "cashier-1".to_string(),
            phone_number: "254712345678".to_string(),
            state: MobilePaymentState::PendingStk,
            created_at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let tracker = PendingTracker::new();
        tracker.put(entry("mr-1", "ws_CO_1", t0()));

        assert_eq!(tracker.get("mr-1").unwrap().checkout_request_id, "ws_CO_1");
        assert_eq!(tracker.find_by_checkout("ws_CO_1").unwrap().merchant_request_id, "mr-1");
        assert!(tracker.find_by_checkout("ws_CO_2").is_none());

        assert!(tracker.delete("mr-1"));
        assert!(!tracker.delete("mr-1"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_take_is_single_winner() {
        let tracker = Arc::new(PendingTracker::new());
        tracker.put(entry("mr-1", "ws_CO_1", t0()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.take("mr-1").is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_sweep_expired() {
        let tracker = PendingTracker::new();
        tracker.put(entry("old", "ws_CO_old", t0()));
        tracker.put(entry("new", "ws_CO_new", t0() + Duration::minutes(9)));

        let evicted = tracker.sweep_expired(t0() + Duration::minutes(11), Duration::minutes(10));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].merchant_request_id, "old");
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("new").is_some());
    }
}
