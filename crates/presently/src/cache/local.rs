//! Standalone (non-replicated) cache implementation.

use super::{CacheEntryListener, CacheEvent, KeyLock, KeyLocks, Listeners, ReplicatedCache};
use crate::address::{Address, NodeId};
use crate::error::CacheError;
use crate::registry::DirectedPresenceRegistry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-process cache used while the node is not part of a cluster.
///
/// Listeners registered here see every mutation, attributed to this node.
pub struct LocalCache {
    name: String,
    node_id: NodeId,
    data: DashMap<Address, DirectedPresenceRegistry>,
    locks: KeyLocks,
    listeners: Listeners,
}

impl LocalCache {
    /// Create an empty cache named `name` on node `node_id`.
    pub fn new(name: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            name: name.into(),
            node_id,
            data: DashMap::new(),
            locks: KeyLocks::default(),
            listeners: Listeners::default(),
        }
    }
}

impl ReplicatedCache for LocalCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn is_clustered(&self) -> bool {
        false
    }

    fn lock_for(&self, key: &Address) -> KeyLock {
        self.locks.lock_for(key)
    }

    fn get(&self, key: &Address) -> Result<Option<DirectedPresenceRegistry>, CacheError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    fn put(
        &self,
        key: Address,
        value: DirectedPresenceRegistry,
    ) -> Result<Option<DirectedPresenceRegistry>, CacheError> {
        let old = self.data.insert(key.clone(), value.clone());
        let event = match &old {
            None => CacheEvent::Added {
                key,
                value: Some(value),
                node: self.node_id.clone(),
            },
            Some(previous) => CacheEvent::Updated {
                key,
                old: Some(previous.clone()),
                new: Some(value),
                node: self.node_id.clone(),
            },
        };
        self.listeners.dispatch(&self.name, &event);
        Ok(old)
    }

    fn remove(&self, key: &Address) -> Result<Option<DirectedPresenceRegistry>, CacheError> {
        let old = self.data.remove(key).map(|(_, v)| v);
        if old.is_some() {
            self.listeners.dispatch(
                &self.name,
                &CacheEvent::Removed {
                    key: key.clone(),
                    old: old.clone(),
                    node: self.node_id.clone(),
                },
            );
        }
        Ok(old)
    }

    fn entries(&self) -> Result<Vec<(Address, DirectedPresenceRegistry)>, CacheError> {
        Ok(self
            .data
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }

    fn add_listener(&self, listener: Arc<dyn CacheEntryListener>, include_values: bool) {
        self.listeners.add(listener, include_values);
    }
}
