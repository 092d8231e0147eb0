//! Last-value caches with subscription replay
//!
//! Each cache owns one lock covering the subscription set, the cached values
//! and the notification itself. A subscriber therefore sees the cached value
//! exactly once, before any later live update for the same key.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::UpdateListener;
use crate::listener::ListenerSlot;

/// Values cached per key (an instrument, for market data)
pub trait Keyed {
    type Key: Eq + Hash + Clone + Send;

    fn key(&self) -> Self::Key;
}

struct Entries<K, V> {
    subscriptions: HashSet<K>,
    values: HashMap<K, V>,
}

pub struct SubscriptionCache<V: Keyed> {
    entries: Mutex<Entries<V::Key, V>>,
    listener: ListenerSlot<dyn UpdateListener<V>>,
}

impl<V: Keyed> SubscriptionCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                subscriptions: HashSet::new(),
                values: HashMap::new(),
            }),
            listener: ListenerSlot::new(),
        }
    }

    /// Install the listener for live and replayed values. Subscriptions are
    /// kept across listener swaps.
    pub fn set_listener(&self, listener: Arc<dyn UpdateListener<V>>) {
        // Under the cache lock so no update is half-delivered to the old one.
        let _entries = self.entries.lock();
        self.listener.register(listener);
    }

    pub fn clear_listener(&self) {
        let _entries = self.entries.lock();
        self.listener.clear();
    }

    /// Start live updates for `key`, replaying its cached value if there is
    /// one. Subscribing to an active key is a no-op.
    pub fn subscribe(&self, key: V::Key) {
        let mut entries = self.entries.lock();
        if !entries.subscriptions.insert(key.clone()) {
            return;
        }
        if let (Some(value), Some(listener)) = (entries.values.get(&key), self.listener.get()) {
            listener.on_update(value);
        }
    }

    pub fn subscribe_many(&self, keys: impl IntoIterator<Item = V::Key>) {
        keys.into_iter().for_each(|key| self.subscribe(key));
    }

    pub fn unsubscribe(&self, key: &V::Key) {
        self.entries.lock().subscriptions.remove(key);
    }

    pub fn unsubscribe_many<'a>(&self, keys: impl IntoIterator<Item = &'a V::Key>)
    where
        V::Key: 'a,
    {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.subscriptions.remove(key);
        }
    }

    pub fn unsubscribe_all(&self) {
        self.entries.lock().subscriptions.clear();
    }

    /// Cache `value` and deliver it if its key is subscribed.
    pub fn on_receive(&self, value: V) {
        let mut entries = self.entries.lock();
        let key = value.key();
        if entries.subscriptions.contains(&key) {
            if let Some(listener) = self.listener.get() {
                listener.on_update(&value);
            }
        }
        entries.values.insert(key, value);
    }

    pub fn is_subscribed(&self, key: &V::Key) -> bool {
        self.entries.lock().subscriptions.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Keyed + Clone> SubscriptionCache<V> {
    pub fn get(&self, key: &V::Key) -> Option<V> {
        self.entries.lock().values.get(key).cloned()
    }
}

impl<V: Keyed> Default for SubscriptionCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned on listener registration; subscription calls chain.
pub struct Registration<V: Keyed> {
    cache: Arc<SubscriptionCache<V>>,
}

impl<V: Keyed> Registration<V> {
    pub(crate) fn new(cache: Arc<SubscriptionCache<V>>) -> Self {
        Self { cache }
    }

    /// Subscribe to `key` and replay its cached value. Subscribing again to
    /// a key that is already active does nothing and does not replay.
    pub fn subscribe(&self, key: V::Key) -> &Self {
        self.cache.subscribe(key);
        self
    }

    pub fn subscribe_many(&self, keys: impl IntoIterator<Item = V::Key>) -> &Self {
        self.cache.subscribe_many(keys);
        self
    }

    pub fn unsubscribe(&self, key: &V::Key) -> &Self {
        self.cache.unsubscribe(key);
        self
    }

    pub fn unsubscribe_many<'a>(&self, keys: impl IntoIterator<Item = &'a V::Key>) -> &Self
    where
        V::Key: 'a,
    {
        self.cache.unsubscribe_many(keys);
        self
    }

    pub fn unsubscribe_all(&self) -> &Self {
        self.cache.unsubscribe_all();
        self
    }
}

/// Single-valued cell (session state): replays the last value on
/// registration, then delivers every update.
pub struct LatestValue<V> {
    value: Mutex<Option<V>>,
    listener: ListenerSlot<dyn UpdateListener<V>>,
}

impl<V> LatestValue<V> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            listener: ListenerSlot::new(),
        }
    }

    pub fn register(&self, listener: Arc<dyn UpdateListener<V>>) {
        let value = self.value.lock();
        if let Some(current) = value.as_ref() {
            listener.on_update(current);
        }
        self.listener.register(listener);
    }

    pub fn unregister(&self) {
        let _value = self.value.lock();
        self.listener.clear();
    }

    pub fn on_receive(&self, update: V) {
        let mut value = self.value.lock();
        if let Some(listener) = self.listener.get() {
            listener.on_update(&update);
        }
        *value = Some(update);
    }
}

impl<V: Clone> LatestValue<V> {
    pub fn get(&self) -> Option<V> {
        self.value.lock().clone()
    }
}

impl<V> Default for LatestValue<V> {
    fn default() -> Self {
        Self::new()
    }
}
