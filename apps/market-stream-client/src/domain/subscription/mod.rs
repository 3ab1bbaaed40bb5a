//! Subscription Bookkeeping
//!
//! Two layers of subscription state:
//!
//! - [`SubscriptionSet`]: the stream keys one connection believes it is
//!   subscribed to. Idempotent add/remove; read-only source for replay
//!   after a reconnect.
//! - [`ConsumerLedger`]: which consumer holds which key on a shared feed,
//!   with reference counting so that the last consumer to release a key is
//!   the only one that unsubscribes it upstream.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::stream::StreamKey;

// =============================================================================
// Subscription Set
// =============================================================================

/// Set of stream keys owned by one connection.
///
/// ```rust
/// use market_stream_client::domain::subscription::SubscriptionSet;
///
/// let mut set = SubscriptionSet::new();
/// let key = "ethusdc@trade".parse().unwrap();
///
/// assert!(set.insert(key));
/// assert!(!set.insert("ETHUSDC@trade".parse().unwrap()));
/// assert_eq!(set.len(), 1);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionSet {
    keys: BTreeSet<StreamKey>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    /// Add a key. Returns `false` if it was already present.
    pub fn insert(&mut self, key: StreamKey) -> bool {
        self.keys.insert(key)
    }

    /// Remove a key. Returns `false` if it was absent.
    pub fn remove(&mut self, key: &StreamKey) -> bool {
        self.keys.remove(key)
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, key: &StreamKey) -> bool {
        self.keys.contains(key)
    }

    /// Drop every key.
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over the keys.
    pub fn iter(&self) -> impl Iterator<Item = &StreamKey> {
        self.keys.iter()
    }

    /// Snapshot of the keys.
    #[must_use]
    pub fn to_vec(&self) -> Vec<StreamKey> {
        self.keys.iter().cloned().collect()
    }

    /// Params for the batched SUBSCRIBE sent when a connection opens.
    ///
    /// Implicit user streams are tracked here but never sent.
    #[must_use]
    pub fn replay_params(&self) -> Vec<String> {
        self.keys
            .iter()
            .filter(|key| !key.is_implicit())
            .map(ToString::to_string)
            .collect()
    }
}

// =============================================================================
// Consumer Ledger
// =============================================================================

/// Unique identifier for a consumer attached to a feed.
pub type ConsumerId = u64;

#[derive(Debug, Default)]
struct LedgerState {
    /// Map from consumer ID to the keys it holds.
    consumer_keys: HashMap<ConsumerId, HashSet<StreamKey>>,
    /// Map from key to number of consumers holding it.
    key_refcount: HashMap<StreamKey, usize>,
}

/// Reference counts of stream keys across the consumers of one feed.
///
/// ```rust
/// use market_stream_client::domain::subscription::ConsumerLedger;
///
/// let ledger = ConsumerLedger::new();
/// let key = "ethusdc@trade".parse().unwrap();
/// let (a, b) = (ledger.register(), ledger.register());
///
/// assert!(ledger.add(a, &key));
/// assert!(!ledger.add(b, &key));
///
/// // Still held by `b`: no upstream unsubscribe.
/// assert!(!ledger.remove(a, &key));
/// assert!(ledger.remove(b, &key));
/// ```
#[derive(Debug, Default)]
pub struct ConsumerLedger {
    state: RwLock<LedgerState>,
    next_consumer: AtomicU64,
}

impl ConsumerLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh consumer ID.
    pub fn register(&self) -> ConsumerId {
        self.next_consumer.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record that `consumer` holds `key`.
    ///
    /// Returns `true` if this made the key held at all (refcount 0→1).
    pub fn add(&self, consumer: ConsumerId, key: &StreamKey) -> bool {
        let mut state = self.state.write();
        if !state
            .consumer_keys
            .entry(consumer)
            .or_default()
            .insert(key.clone())
        {
            return false;
        }

        let refcount = state.key_refcount.entry(key.clone()).or_insert(0);
        *refcount += 1;
        *refcount == 1
    }

    /// Release `key` for `consumer`.
    ///
    /// Returns `true` if no consumer holds the key anymore (refcount 1→0).
    /// Releasing a key the consumer does not hold changes nothing.
    pub fn remove(&self, consumer: ConsumerId, key: &StreamKey) -> bool {
        let mut state = self.state.write();
        let Some(keys) = state.consumer_keys.get_mut(&consumer) else {
            return false;
        };
        if !keys.remove(key) {
            return false;
        }
        if keys.is_empty() {
            state.consumer_keys.remove(&consumer);
        }

        Self::release(&mut state, key)
    }

    /// Release everything `consumer` holds.
    ///
    /// Returns the keys no consumer holds anymore.
    pub fn remove_consumer(&self, consumer: ConsumerId) -> Vec<StreamKey> {
        let mut state = self.state.write();
        let Some(keys) = state.consumer_keys.remove(&consumer) else {
            return vec![];
        };

        keys.into_iter()
            .filter(|key| Self::release(&mut state, key))
            .collect()
    }

    /// Number of consumers holding `key`.
    #[must_use]
    pub fn holders(&self, key: &StreamKey) -> usize {
        self.state.read().key_refcount.get(key).copied().unwrap_or(0)
    }

    /// Number of consumers holding at least one key.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.state.read().consumer_keys.len()
    }

    /// Number of distinct keys held.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.state.read().key_refcount.len()
    }

    fn release(state: &mut LedgerState, key: &StreamKey) -> bool {
        let Some(refcount) = state.key_refcount.get_mut(key) else {
            return false;
        };
        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            state.key_refcount.remove(key);
            return true;
        }
        false
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> StreamKey {
        s.parse().unwrap()
    }

    #[test]
    fn set_insert_is_idempotent() {
        let mut set = SubscriptionSet::new();
        assert!(set.insert(key("ethusdc@trade")));
        assert!(!set.insert(key("ethusdc@trade")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn set_remove_absent_is_noop() {
        let mut set = SubscriptionSet::new();
        set.insert(key("ethusdc@trade"));

        assert!(!set.remove(&key("btcusdc@trade")));
        assert_eq!(set.to_vec(), vec![key("ethusdc@trade")]);
    }

    #[test]
    fn replay_params_skip_implicit_streams() {
        let mut set = SubscriptionSet::new();
        set.insert(key("ethusdc@trade"));
        set.insert(key("ethusdc@executionReport"));
        set.insert(key("ethusdc@balanceUpdate"));
        set.insert(key("btcusdc@kline_1m"));

        let params = set.replay_params();

        assert_eq!(params.len(), 2);
        assert!(params.contains(&"ethusdc@trade".to_string()));
        assert!(params.contains(&"btcusdc@kline_1m".to_string()));
    }

    #[test]
    fn set_clear() {
        let mut set = SubscriptionSet::new();
        set.insert(key("ethusdc@trade"));
        set.clear();
        assert!(set.is_empty());
        assert!(set.replay_params().is_empty());
    }

    #[test]
    fn ledger_first_and_last_holder() {
        let ledger = ConsumerLedger::new();
        let (a, b) = (ledger.register(), ledger.register());
        let trade = key("ethusdc@trade");

        assert!(ledger.add(a, &trade));
        assert!(!ledger.add(b, &trade));
        assert_eq!(ledger.holders(&trade), 2);

        assert!(!ledger.remove(a, &trade));
        assert_eq!(ledger.holders(&trade), 1);
        assert!(ledger.remove(b, &trade));
        assert_eq!(ledger.holders(&trade), 0);
    }

    #[test]
    fn ledger_duplicate_add_by_same_consumer() {
        let ledger = ConsumerLedger::new();
        let a = ledger.register();
        let trade = key("ethusdc@trade");

        assert!(ledger.add(a, &trade));
        assert!(!ledger.add(a, &trade));
        assert_eq!(ledger.holders(&trade), 1);
        assert!(ledger.remove(a, &trade));
    }

    #[test]
    fn ledger_remove_unheld_key() {
        let ledger = ConsumerLedger::new();
        let (a, b) = (ledger.register(), ledger.register());
        let trade = key("ethusdc@trade");

        ledger.add(a, &trade);

        assert!(!ledger.remove(b, &trade));
        assert!(!ledger.remove(a, &key("btcusdc@trade")));
        assert_eq!(ledger.holders(&trade), 1);
    }

    #[test]
    fn ledger_remove_consumer_preserves_others() {
        let ledger = ConsumerLedger::new();
        let (a, b) = (ledger.register(), ledger.register());

        ledger.add(a, &key("ethusdc@trade"));
        ledger.add(a, &key("ethusdc@depth"));
        ledger.add(b, &key("ethusdc@trade"));

        let released = ledger.remove_consumer(a);

        assert_eq!(released, vec![key("ethusdc@depth")]);
        assert_eq!(ledger.holders(&key("ethusdc@trade")), 1);
        assert_eq!(ledger.consumer_count(), 1);
        assert_eq!(ledger.key_count(), 1);
    }

    #[test]
    fn ledger_ids_are_unique() {
        let ledger = ConsumerLedger::new();
        let ids: HashSet<_> = (0..100).map(|_| ledger.register()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn ledger_concurrent_consumers() {
        use std::sync::Arc;
        use std::thread;

        let ledger = Arc::new(ConsumerLedger::new());
        let shared = key("ethusdc@trade");

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let shared = shared.clone();
                thread::spawn(move || {
                    let id = ledger.register();
                    ledger.add(id, &shared);
                    ledger.add(id, &key(&format!("sym{i}@trade")));
                    id
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ledger.holders(&shared), 10);
        assert_eq!(ledger.key_count(), 11);

        let last_releases = ids
            .iter()
            .filter(|id| ledger.remove(**id, &shared))
            .count();
        assert_eq!(last_releases, 1);
    }
}
