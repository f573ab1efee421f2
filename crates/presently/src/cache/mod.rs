//! Replicated directed-presence cache.
//!
//! The cache maps a sender to its [`DirectedPresenceRegistry`] and is visible
//! to every node of the cluster. It is weakly consistent: a write on one node
//! eventually reaches the others, but no node can rely on seeing everything
//! another node wrote, least of all after that node disappears.
//!
//! # Architecture
//!
//! - [`ReplicatedCache`] is the interface the presence core programs against.
//! - [`LocalCache`] is the standalone implementation used outside a cluster.
//! - [`ClusterCacheHub`] / [`ClusteredCache`] is an in-process cluster: one hub
//!   shared by several node views, values replicated in serialized form.
//! - [`ClusterCacheProvider`] hands out clustered views when the node joins
//!   and detaches them when it leaves.
//! - [`CacheHandle`] holds the implementation currently in use. Joining or
//!   leaving a cluster swaps it, which discards the previous contents.
//!
//! Mutations are reported to registered [`CacheEntryListener`]s as
//! [`CacheEvent`]s. Concurrent read-modify-write sequences on one key are
//! serialized through [`ReplicatedCache::lock_for`].

mod clustered;
mod local;

pub use clustered::{ClusterCacheHub, ClusteredCache};
pub use local::LocalCache;

use crate::address::{Address, NodeId};
use crate::error::{CacheError, ListenerError};
use crate::registry::DirectedPresenceRegistry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock guarding one cache key. Hold its guard across a read-modify-write.
///
/// The lock table keeps an entry for a key only while some `KeyLock` for it
/// is alive.
pub struct KeyLock {
    key: Address,
    mutex: Arc<Mutex<()>>,
    slots: Arc<DashMap<Address, LockSlot>>,
}

impl KeyLock {
    /// Block until the key is free and take it.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock()
    }

    /// Take the key if it is free.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.mutex.try_lock()
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        self.slots.remove_if_mut(&self.key, |_, slot| {
            slot.holders -= 1;
            slot.holders == 0
        });
    }
}

impl fmt::Debug for KeyLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLock")
            .field("key", &self.key)
            .field("locked", &self.mutex.is_locked())
            .finish()
    }
}

/// A mutation observed on the cache.
///
/// `node` is the cluster node the mutation originated from. Values are `None`
/// when the listener was registered without values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A key was created.
    Added {
        /// Sender key.
        key: Address,
        /// New registry.
        value: Option<DirectedPresenceRegistry>,
        /// Originating node.
        node: NodeId,
    },
    /// An existing key was overwritten.
    Updated {
        /// Sender key.
        key: Address,
        /// Registry before the write.
        old: Option<DirectedPresenceRegistry>,
        /// Registry after the write.
        new: Option<DirectedPresenceRegistry>,
        /// Originating node.
        node: NodeId,
    },
    /// A key was removed.
    Removed {
        /// Sender key.
        key: Address,
        /// Registry that was removed.
        old: Option<DirectedPresenceRegistry>,
        /// Originating node.
        node: NodeId,
    },
    /// A key was evicted by the cache itself.
    Evicted {
        /// Sender key.
        key: Address,
        /// Registry that was evicted.
        old: Option<DirectedPresenceRegistry>,
        /// Originating node.
        node: NodeId,
    },
    /// Every entry of a node was evicted.
    MapEvicted {
        /// Originating node.
        node: NodeId,
    },
    /// The map was cleared by a node.
    MapCleared {
        /// Originating node.
        node: NodeId,
    },
}

impl CacheEvent {
    /// The node the mutation originated from.
    pub fn node(&self) -> &NodeId {
        match self {
            Self::Added { node, .. }
            | Self::Updated { node, .. }
            | Self::Removed { node, .. }
            | Self::Evicted { node, .. }
            | Self::MapEvicted { node }
            | Self::MapCleared { node } => node,
        }
    }

    /// Copy of the event with every value stripped.
    fn without_values(&self) -> Self {
        match self.clone() {
            Self::Added { key, node, .. } => Self::Added {
                key,
                value: None,
                node,
            },
            Self::Updated { key, node, .. } => Self::Updated {
                key,
                old: None,
                new: None,
                node,
            },
            Self::Removed { key, node, .. } => Self::Removed {
                key,
                old: None,
                node,
            },
            Self::Evicted { key, node, .. } => Self::Evicted {
                key,
                old: None,
                node,
            },
            other => other,
        }
    }
}

/// Receives cache mutation events.
///
/// Callbacks may run on any thread, concurrently with stanza processing.
/// An error is fatal: the cache deregisters the listener and never calls it again.
pub trait CacheEntryListener: Send + Sync + 'static {
    /// Handle one mutation event.
    fn on_event(&self, event: &CacheEvent) -> Result<(), ListenerError>;
}

/// Cluster-visible map of sender to directed-presence registry.
pub trait ReplicatedCache: Send + Sync + 'static {
    /// Name of the cache.
    fn name(&self) -> &str;

    /// The node this view of the cache belongs to.
    fn node_id(&self) -> &NodeId;

    /// Returns `true` if writes are replicated to other nodes.
    fn is_clustered(&self) -> bool;

    /// Lock for `key`. Different keys never share a lock.
    fn lock_for(&self, key: &Address) -> KeyLock;

    /// Get the registry stored under `key`.
    fn get(&self, key: &Address) -> Result<Option<DirectedPresenceRegistry>, CacheError>;

    /// Store `value` under `key`, returning the previous registry.
    fn put(
        &self,
        key: Address,
        value: DirectedPresenceRegistry,
    ) -> Result<Option<DirectedPresenceRegistry>, CacheError>;

    /// Remove `key`, returning the registry it held.
    fn remove(&self, key: &Address) -> Result<Option<DirectedPresenceRegistry>, CacheError>;

    /// Every entry visible to this node.
    fn entries(&self) -> Result<Vec<(Address, DirectedPresenceRegistry)>, CacheError>;

    /// Register a mutation listener.
    ///
    /// With `include_values` false, events carry no registry values.
    fn add_listener(&self, listener: Arc<dyn CacheEntryListener>, include_values: bool);
}

/// Source of clustered cache instances.
///
/// Each join returns a fresh view for `node`, without any listeners.
pub trait ClusterCacheProvider: Send + Sync + 'static {
    /// Join the cluster-wide cache as `node`.
    fn join_cluster(&self, node: &NodeId) -> Arc<dyn ReplicatedCache>;

    /// Detach `node` from the cluster-wide cache.
    ///
    /// Listeners registered through the node's view stop receiving events.
    fn leave_cluster(&self, node: &NodeId);
}

// =============================================================================
// Shared building blocks
// =============================================================================

struct LockSlot {
    mutex: Arc<Mutex<()>>,
    holders: usize,
}

/// Per-key lock table.
#[derive(Default)]
pub(crate) struct KeyLocks {
    slots: Arc<DashMap<Address, LockSlot>>,
}

impl KeyLocks {
    pub(crate) fn lock_for(&self, key: &Address) -> KeyLock {
        let mut slot = self.slots.entry(key.clone()).or_insert_with(|| LockSlot {
            mutex: Arc::default(),
            holders: 0,
        });
        slot.holders += 1;
        KeyLock {
            key: key.clone(),
            mutex: Arc::clone(&slot.mutex),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of keys with a live lock handle.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

struct Registration {
    id: u64,
    listener: Arc<dyn CacheEntryListener>,
    include_values: bool,
}

/// Listeners registered on one node's view of a cache.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    registrations: RwLock<Vec<Registration>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn CacheEntryListener>, include_values: bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registrations.write().push(Registration {
            id,
            listener,
            include_values,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations.read().len()
    }

    /// Deliver `event` to every listener, dropping the ones that fail.
    pub(crate) fn dispatch(&self, cache: &str, event: &CacheEvent) {
        let targets: Vec<(u64, Arc<dyn CacheEntryListener>, bool)> = self
            .registrations
            .read()
            .iter()
            .map(|r| (r.id, Arc::clone(&r.listener), r.include_values))
            .collect();
        if targets.is_empty() {
            return;
        }

        let stripped = event.without_values();
        let mut failed = Vec::new();
        for (id, listener, include_values) in targets {
            let delivered = if include_values { event } else { &stripped };
            if let Err(e) = listener.on_event(delivered) {
                tracing::error!(
                    cache = %cache,
                    error = %e,
                    "Cache listener failed; deregistering it"
                );
                failed.push(id);
            }
        }
        if !failed.is_empty() {
            self.registrations
                .write()
                .retain(|r| !failed.contains(&r.id));
        }
    }
}

// =============================================================================
// CacheHandle
// =============================================================================

/// Holder of the cache implementation currently in use.
///
/// Components keep a `CacheHandle` rather than a cache so that a cluster
/// join or leave can swap the implementation underneath them.
#[derive(Clone)]
pub struct CacheHandle {
    current: Arc<RwLock<Arc<dyn ReplicatedCache>>>,
}

impl CacheHandle {
    /// Create a handle around an initial implementation.
    pub fn new(cache: Arc<dyn ReplicatedCache>) -> Self {
        Self {
            current: Arc::new(RwLock::new(cache)),
        }
    }

    /// The implementation currently in use.
    pub fn current(&self) -> Arc<dyn ReplicatedCache> {
        self.current.read().clone()
    }

    /// Replace the implementation, returning the previous one.
    pub fn swap(&self, cache: Arc<dyn ReplicatedCache>) -> Arc<dyn ReplicatedCache> {
        tracing::debug!(
            cache = %cache.name(),
            clustered = cache.is_clustered(),
            "Swapping cache implementation"
        );
        std::mem::replace(&mut *self.current.write(), cache)
    }
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.current();
        f.debug_struct("CacheHandle")
            .field("name", &cache.name())
            .field("node", cache.node_id())
            .field("clustered", &cache.is_clustered())
            .finish()
    }
}
