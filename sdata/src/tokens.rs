//! Version tokens for optimistic concurrency.
//!
//! Tokens live in a side table keyed by the stable identity of a resource,
//! its kind plus key, never by in-memory address. A missing entry means no
//! token is known. Eviction is up to the caller: an optional capacity bound
//! drops the oldest insertion, [`TokenStore::remove`] drops a single entry, and
//! a [`TokenScope`] drops everything it registered when it goes out of scope.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Stable identity of a persisted resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}('{}')", self.kind, self.id)
    }
}

#[derive(Debug, Clone)]
struct TokenSlot {
    token: String,
    /// Insertion order, used for capacity eviction.
    sequence: u64,
}

/// Concurrent map from resource identity to its last known version token.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: DashMap<EntityKey, TokenSlot>,
    capacity: Option<usize>,
    sequence: AtomicU64,
}

static GLOBAL: OnceLock<Arc<TokenStore>> = OnceLock::new();

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding at most `capacity` tokens; the oldest insertion goes first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tokens: DashMap::with_capacity(capacity),
            capacity: Some(capacity),
            sequence: AtomicU64::new(0),
        }
    }

    /// Process-wide, unbounded store shared by clients that don't bring their own.
    pub fn global() -> Arc<TokenStore> {
        GLOBAL.get_or_init(|| Arc::new(TokenStore::new())).clone()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Inserts or replaces the token for `key`. A replaced token counts as a
    /// fresh insertion for eviction order.
    pub fn insert(&self, key: EntityKey, token: impl Into<String>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.tokens.insert(
            key,
            TokenSlot {
                token: token.into(),
                sequence,
            },
        );
        self.enforce_capacity();
    }

    pub fn get(&self, key: &EntityKey) -> Option<String> {
        self.tokens.get(key).map(|slot| slot.token.clone())
    }

    pub fn remove(&self, key: &EntityKey) -> Option<String> {
        self.tokens.remove(key).map(|(_, slot)| slot.token)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.tokens.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&self) {
        self.tokens.clear();
    }

    /// Opens a scope whose registered keys are evicted when it is dropped.
    pub fn scope(self: &Arc<Self>) -> TokenScope {
        TokenScope {
            store: Arc::clone(self),
            keys: Vec::new(),
        }
    }

    fn enforce_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.tokens.len() > capacity {
            // Collect before removing: holding an iterator guard across a
            // removal on the same shard deadlocks.
            let oldest = self
                .tokens
                .iter()
                .min_by_key(|entry| entry.value().sequence)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    debug!("Evicting version token for {}", key);
                    self.tokens.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Evicts the tokens of every key registered with it on drop.
pub struct TokenScope {
    store: Arc<TokenStore>,
    keys: Vec<EntityKey>,
}

impl TokenScope {
    /// Registers a key whose token was stored elsewhere.
    pub fn track(&mut self, key: EntityKey) {
        self.keys.push(key);
    }

    pub fn insert(&mut self, key: EntityKey, token: impl Into<String>) {
        self.store.insert(key.clone(), token);
        self.keys.push(key);
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn keys(&self) -> &[EntityKey] {
        &self.keys
    }
}

impl Drop for TokenScope {
    fn drop(&mut self) {
        for key in self.keys.drain(..) {
            self.store.remove(&key);
        }
    }
}
