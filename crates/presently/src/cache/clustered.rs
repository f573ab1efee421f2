//! In-process clustered cache.
//!
//! A [`ClusterCacheHub`] plays the role of the distributed data grid: it holds
//! the shared entries and the cluster-wide key locks. Each node talks to it
//! through its own [`ClusteredCache`] view. Values are stored postcard-encoded,
//! so every read decodes a replica rather than sharing the writer's object.
//!
//! Mutation events are delivered to the listeners of every *other* member;
//! the writing node does not hear its own writes.
//!
//! When a member leaves, the entries it wrote are dropped without any event.
//! This models the weak guarantee of a real grid: what a vanished node put in
//! the cache may simply be gone, and nobody is told.

use super::{
    CacheEntryListener, CacheEvent, ClusterCacheProvider, KeyLock, KeyLocks, Listeners,
    ReplicatedCache,
};
use crate::address::{Address, NodeId};
use crate::error::CacheError;
use crate::registry::DirectedPresenceRegistry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

struct StoredEntry {
    bytes: Vec<u8>,
    owner: NodeId,
}

struct HubInner {
    name: String,
    data: DashMap<Address, StoredEntry>,
    locks: KeyLocks,
    members: DashMap<NodeId, Arc<Listeners>>,
}

impl HubInner {
    /// Deliver `event` to every member except `origin`.
    fn broadcast(&self, origin: &NodeId, event: &CacheEvent) {
        let targets: Vec<Arc<Listeners>> = self
            .members
            .iter()
            .filter(|m| m.key() != origin)
            .map(|m| Arc::clone(m.value()))
            .collect();
        for listeners in targets {
            listeners.dispatch(&self.name, event);
        }
    }
}

fn encode(value: &DirectedPresenceRegistry) -> Result<Vec<u8>, CacheError> {
    postcard::to_allocvec(value).map_err(|e| CacheError::Encode(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<DirectedPresenceRegistry, CacheError> {
    postcard::from_bytes(bytes).map_err(|e| CacheError::Decode(e.to_string()))
}

/// Shared state of an in-process cluster cache.
#[derive(Clone)]
pub struct ClusterCacheHub {
    inner: Arc<HubInner>,
}

impl ClusterCacheHub {
    /// Create an empty hub for the cache named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                name: name.into(),
                data: DashMap::new(),
                locks: KeyLocks::default(),
                members: DashMap::new(),
            }),
        }
    }

    /// Add `node` to the cluster and return its view of the cache.
    ///
    /// A node that rejoins starts with no listeners.
    pub fn join(&self, node: NodeId) -> ClusteredCache {
        let listeners = Arc::new(Listeners::default());
        self.inner.members.insert(node.clone(), Arc::clone(&listeners));
        tracing::debug!(cache = %self.inner.name, node = %node, "Node joined cache cluster");
        ClusteredCache {
            node_id: node,
            hub: Arc::clone(&self.inner),
            listeners,
        }
    }

    /// Remove `node` from the cluster.
    ///
    /// Its listeners stop receiving events and the entries it wrote are lost.
    pub fn leave(&self, node: &NodeId) {
        self.inner.members.remove(node);
        let before = self.inner.data.len();
        self.inner.data.retain(|_, entry| &entry.owner != node);
        tracing::debug!(
            cache = %self.inner.name,
            node = %node,
            lost = before - self.inner.data.len(),
            "Node left cache cluster"
        );
    }

    /// Current members.
    pub fn members(&self) -> Vec<NodeId> {
        self.inner.members.iter().map(|m| m.key().clone()).collect()
    }

    /// Number of entries held by the hub.
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Returns `true` if the hub holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Evict `key`, notifying every member other than the entry's writer.
    pub fn evict(&self, key: &Address) -> Result<Option<DirectedPresenceRegistry>, CacheError> {
        let Some((_, entry)) = self.inner.data.remove(key) else {
            return Ok(None);
        };
        let old = decode(&entry.bytes)?;
        self.inner.broadcast(
            &entry.owner,
            &CacheEvent::Evicted {
                key: key.clone(),
                old: Some(old.clone()),
                node: entry.owner.clone(),
            },
        );
        Ok(Some(old))
    }

    /// Drop every entry written by `node`, announcing it as a map eviction.
    pub fn evict_node(&self, node: &NodeId) {
        self.inner.data.retain(|_, entry| &entry.owner != node);
        self.inner
            .broadcast(node, &CacheEvent::MapEvicted { node: node.clone() });
    }

    /// Clear the whole map on behalf of `node`.
    pub fn clear(&self, node: &NodeId) {
        self.inner.data.clear();
        self.inner
            .broadcast(node, &CacheEvent::MapCleared { node: node.clone() });
    }
}

impl fmt::Debug for ClusterCacheHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCacheHub")
            .field("name", &self.inner.name)
            .field("members", &self.inner.members.len())
            .field("len", &self.inner.data.len())
            .finish()
    }
}

impl ClusterCacheProvider for ClusterCacheHub {
    fn join_cluster(&self, node: &NodeId) -> Arc<dyn ReplicatedCache> {
        Arc::new(self.join(node.clone()))
    }

    fn leave_cluster(&self, node: &NodeId) {
        self.leave(node);
    }
}

/// One node's view of a [`ClusterCacheHub`].
pub struct ClusteredCache {
    node_id: NodeId,
    hub: Arc<HubInner>,
    listeners: Arc<Listeners>,
}

impl ReplicatedCache for ClusteredCache {
    fn name(&self) -> &str {
        &self.hub.name
    }

    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn is_clustered(&self) -> bool {
        true
    }

    fn lock_for(&self, key: &Address) -> KeyLock {
        self.hub.locks.lock_for(key)
    }

    fn get(&self, key: &Address) -> Result<Option<DirectedPresenceRegistry>, CacheError> {
        match self.hub.data.get(key) {
            Some(entry) => decode(&entry.bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put(
        &self,
        key: Address,
        value: DirectedPresenceRegistry,
    ) -> Result<Option<DirectedPresenceRegistry>, CacheError> {
        let bytes = encode(&value)?;
        let previous = self.hub.data.insert(
            key.clone(),
            StoredEntry {
                bytes,
                owner: self.node_id.clone(),
            },
        );
        let old = previous.map(|entry| decode(&entry.bytes)).transpose()?;
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
        self.hub.broadcast(&self.node_id, &event);
        Ok(old)
    }

    fn remove(&self, key: &Address) -> Result<Option<DirectedPresenceRegistry>, CacheError> {
        let Some((_, entry)) = self.hub.data.remove(key) else {
            return Ok(None);
        };
        let old = decode(&entry.bytes)?;
        self.hub.broadcast(
            &self.node_id,
            &CacheEvent::Removed {
                key: key.clone(),
                old: Some(old.clone()),
                node: self.node_id.clone(),
            },
        );
        Ok(Some(old))
    }

    fn entries(&self) -> Result<Vec<(Address, DirectedPresenceRegistry)>, CacheError> {
        self.hub
            .data
            .iter()
            .map(|r| -> Result<_, CacheError> {
                Ok((r.key().clone(), decode(&r.value().bytes)?))
            })
            .collect()
    }

    fn add_listener(&self, listener: Arc<dyn CacheEntryListener>, include_values: bool) {
        self.listeners.add(listener, include_values);
    }
}

impl fmt::Debug for ClusteredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusteredCache")
            .field("name", &self.hub.name)
            .field("node", &self.node_id)
            .finish()
    }
}
