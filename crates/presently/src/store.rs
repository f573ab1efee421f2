//! Node-local store of directed presences.
//!
//! The [`LocalPresenceStore`] holds the directed-presence registries of the
//! senders whose sessions live on this node. It is authoritative for that
//! subset: when the node joins or leaves a cluster, the replicated cache is
//! rebuilt from it.
//!
//! The store is a concurrent map; cloning it yields another handle to the same
//! data. Read-modify-write sequences on one sender must be serialized by the
//! caller through the replicated cache's key lock.
//!
//! # Example
//!
//! ```
//! use presently::{Address, DirectedPresenceRegistry, LocalPresenceStore, NodeId};
//!
//! let store = LocalPresenceStore::new();
//! let sender: Address = "alice@example.org/phone".parse().unwrap();
//! let room: Address = "room@muc.example.org".parse().unwrap();
//!
//! let mut registry = DirectedPresenceRegistry::new();
//! registry.add(&room, &NodeId::new("node1"), "room@muc.example.org/alice".parse().unwrap());
//! store.insert(sender.clone(), registry);
//!
//! assert_eq!(store.len(), 1);
//! assert!(store.get(&sender).is_some());
//! ```

use crate::address::Address;
use crate::registry::DirectedPresenceRegistry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Concurrent map of sender to [`DirectedPresenceRegistry`] for local senders.
pub struct LocalPresenceStore {
    inner: Arc<DashMap<Address, DirectedPresenceRegistry>>,
}

impl Clone for LocalPresenceStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for LocalPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPresenceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    // =========================================================================
    // Basic Operations
    // =========================================================================

    /// Stores the registry of `sender`.
    ///
    /// An empty registry removes the sender instead; empty registries are never kept.
    /// Returns the previous registry, if any.
    pub fn insert(
        &self,
        sender: Address,
        registry: DirectedPresenceRegistry,
    ) -> Option<DirectedPresenceRegistry> {
        if registry.is_empty() {
            return self.remove(&sender);
        }
        self.inner.insert(sender, registry)
    }

    /// Gets a copy of the registry of `sender`.
    pub fn get(&self, sender: &Address) -> Option<DirectedPresenceRegistry> {
        self.inner.get(sender).map(|r| r.value().clone())
    }

    /// Removes the registry of `sender`.
    pub fn remove(&self, sender: &Address) -> Option<DirectedPresenceRegistry> {
        self.inner.remove(sender).map(|(_, v)| v)
    }

    /// Returns `true` if the store holds a registry for `sender`.
    pub fn contains(&self, sender: &Address) -> bool {
        self.inner.contains_key(sender)
    }

    /// Applies `f` to the registry of `sender` in place.
    ///
    /// The sender is dropped if its registry ends up empty. Returns `None`
    /// if the sender is unknown, otherwise the closure's result.
    pub fn modify<F, R>(&self, sender: &Address, f: F) -> Option<R>
    where
        F: FnOnce(&mut DirectedPresenceRegistry) -> R,
    {
        let result = {
            let mut entry = self.inner.get_mut(sender)?;
            f(entry.value_mut())
        };
        self.inner.remove_if(sender, |_, registry| registry.is_empty());
        Some(result)
    }

    // =========================================================================
    // Bulk Operations
    // =========================================================================

    /// Returns a point-in-time copy of every entry, ordered by sender.
    ///
    /// Iterating the snapshot holds no lock on the live store.
    pub fn snapshot(&self) -> BTreeMap<Address, DirectedPresenceRegistry> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Returns every sender currently stored.
    pub fn senders(&self) -> Vec<Address> {
        self.inner.iter().map(|r| r.key().clone()).collect()
    }

    /// Returns the number of senders in the store.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl fmt::Debug for LocalPresenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPresenceStore")
            .field("len", &self.inner.len())
            .finish()
    }
}
