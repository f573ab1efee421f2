//! Cache listener maintaining the [`ClusterReverseIndex`].

use super::ClusterReverseIndex;
use crate::address::{Address, NodeId};
use crate::cache::{CacheEntryListener, CacheEvent};
use crate::collab::RouteResolver;
use crate::error::ListenerError;
use crate::registry::DirectedPresenceRegistry;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Keeps the reverse index in step with directed-presence cache mutations.
///
/// Only receivers whose handler is routed on this node are recorded. The
/// listener needs event values; registered without them it fails on the
/// first added or updated event.
pub struct DirectedPresenceListener {
    name: String,
    index: Arc<ClusterReverseIndex>,
    routes: Arc<dyn RouteResolver>,
}

impl DirectedPresenceListener {
    /// Create a listener feeding `index`.
    pub fn new(
        name: impl Into<String>,
        index: Arc<ClusterReverseIndex>,
        routes: Arc<dyn RouteResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            routes,
        }
    }

    /// Receivers of `registry` whose handler has a local route.
    fn local_receivers(&self, registry: &DirectedPresenceRegistry) -> BTreeSet<Address> {
        registry.receivers_where(|handler| self.routes.has_local_route(handler))
    }

    fn handle_added(
        &self,
        key: &Address,
        value: Option<&DirectedPresenceRegistry>,
        node: &NodeId,
    ) -> Result<(), ListenerError> {
        let registry = value.ok_or_else(|| missing(key, node))?;
        let receivers = self.local_receivers(registry);
        if !receivers.is_empty() {
            self.index.upsert(node, key.clone(), receivers);
        }
        Ok(())
    }

    fn handle_updated(
        &self,
        key: &Address,
        value: Option<&DirectedPresenceRegistry>,
        node: &NodeId,
    ) -> Result<(), ListenerError> {
        let registry = value.ok_or_else(|| missing(key, node))?;
        let receivers = self.local_receivers(registry);
        if receivers.is_empty() {
            self.index.remove_sender(node, key);
        } else {
            self.index.upsert(node, key.clone(), receivers);
        }
        Ok(())
    }
}

fn missing(key: &Address, node: &NodeId) -> ListenerError {
    ListenerError::MissingValue {
        key: key.clone(),
        node: node.clone(),
    }
}

impl CacheEntryListener for DirectedPresenceListener {
    fn on_event(&self, event: &CacheEvent) -> Result<(), ListenerError> {
        tracing::trace!(listener = %self.name, event = ?event, "Directed presence cache event");
        match event {
            CacheEvent::Added { key, value, node } => {
                self.handle_added(key, value.as_ref(), node)
            }
            CacheEvent::Updated { key, new, node, .. } => {
                self.handle_updated(key, new.as_ref(), node)
            }
            CacheEvent::Removed { key, old, node } | CacheEvent::Evicted { key, old, node } => {
                if old.is_some() {
                    self.index.remove_sender(node, key);
                }
                Ok(())
            }
            CacheEvent::MapEvicted { node } | CacheEvent::MapCleared { node } => {
                self.index.clear_node(node);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for DirectedPresenceListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectedPresenceListener")
            .field("name", &self.name)
            .finish()
    }
}
