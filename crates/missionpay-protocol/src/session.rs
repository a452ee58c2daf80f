//! Bounded proof-session store
//!
//! Records which payment transactions have already bought a task execution.
//! Entries expire after the proof freshness window, since an expired proof is
//! rejected by the verifier anyway. When the store is full of live entries it
//! refuses new redemptions instead of evicting them.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use missionpay_types::SharedClock;
use tracing::warn;

use crate::error::SessionError;

/// Default maximum live redemptions
pub const DEFAULT_SESSION_CAPACITY: usize = 10_000;

pub trait SessionStore: Send + Sync {
    /// Mark `key` as redeemed; fails if it already was
    fn redeem(&self, key: &str) -> Result<(), SessionError>;

    fn is_redeemed(&self, key: &str) -> bool;

    /// Number of live entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Sessions {
    redeemed: HashMap<String, DateTime<Utc>>,
    /// Insertion order for expiry sweeps
    order: VecDeque<(String, DateTime<Utc>)>,
}

pub struct BoundedSessionStore {
    capacity: usize,
    ttl: Duration,
    clock: SharedClock,
    sessions: Mutex<Sessions>,
}

impl BoundedSessionStore {
    pub fn new(capacity: usize, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            capacity,
            ttl,
            clock,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    fn sweep(&self, sessions: &mut Sessions, now: DateTime<Utc>) {
        while let Some((key, at)) = sessions.order.front() {
            if *at + self.ttl > now {
                break;
            }
            if sessions.redeemed.get(key) == Some(at) {
                sessions.redeemed.remove(key);
            }
            sessions.order.pop_front();
        }
    }
}

impl SessionStore for BoundedSessionStore {
    fn redeem(&self, key: &str) -> Result<(), SessionError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        self.sweep(&mut sessions, now);

        if sessions.redeemed.contains_key(key) {
            return Err(SessionError::ProofAlreadyRedeemed {
                key: key.to_string(),
            });
        }
        if sessions.redeemed.len() >= self.capacity {
            warn!(capacity = self.capacity, "Proof session store full");
            return Err(SessionError::StoreFull {
                capacity: self.capacity,
            });
        }

        sessions.redeemed.insert(key.to_string(), now);
        sessions.order.push_back((key.to_string(), now));
        Ok(())
    }

    fn is_redeemed(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        self.sweep(&mut sessions, now);
        sessions.redeemed.contains_key(key)
    }

    fn len(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        self.sweep(&mut sessions, now);
        sessions.redeemed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missionpay_types::ManualClock;
    use std::sync::Arc;

    fn store(capacity: usize) -> (BoundedSessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (
            BoundedSessionStore::new(capacity, Duration::seconds(300), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_second_redemption_rejected() {
        let (store, _) = store(10);
        store.redeem("0xabc").unwrap();
        assert_eq!(
            store.redeem("0xabc"),
            Err(SessionError::ProofAlreadyRedeemed {
                key: "0xabc".to_string()
            })
        );
        assert!(store.is_redeemed("0xabc"));
    }

    #[test]
    fn test_full_store_fails_closed() {
        let (store, _) = store(2);
        store.redeem("a").unwrap();
        store.redeem("b").unwrap();
        assert!(matches!(store.redeem("c"), Err(SessionError::StoreFull { capacity: 2 })));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expiry_queue_tracks_live_entries() {
        let (store, clock) = store(4);
        for round in 0..50 {
            let key = format!("0x{round}");
            store.redeem(&key).unwrap();
            assert!(store.redeem(&key).is_err());
            clock.advance(Duration::seconds(120));
        }

        let sessions = store.sessions.lock();
        assert_eq!(sessions.order.len(), sessions.redeemed.len());
        assert!(sessions.order.len() <= 3);
    }

    #[test]
    fn test_entries_expire() {
        let (store, clock) = store(2);
        store.redeem("a").unwrap();
        clock.advance(Duration::seconds(200));
        store.redeem("b").unwrap();

        clock.advance(Duration::seconds(101));
        assert!(!store.is_redeemed("a"));
        assert!(store.is_redeemed("b"));
        store.redeem("c").unwrap();
        assert_eq!(store.len(), 2);
    }
}
