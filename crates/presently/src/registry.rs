//! Directed-presence registry for a single sender.
//!
//! A [`DirectedPresenceRegistry`] records, for one sender, every handler that
//! relayed a directed presence on the sender's behalf and the receivers that
//! handler delivered to. It is the value type of both the local store and the
//! replicated cache.
//!
//! Two invariants hold after every operation:
//!
//! - there is at most one [`DirectedPresence`] per handler, and
//! - no [`DirectedPresence`] has an empty receiver set.

use crate::address::{Address, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Receivers reached through one handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectedPresence {
    /// Entity that physically dispatched the presence (e.g. a room service).
    handler: Address,
    /// Cluster node that recorded this entry.
    node_id: NodeId,
    /// Ultimate receivers of the presence.
    receivers: BTreeSet<Address>,
}

impl DirectedPresence {
    /// Create an entry for `handler` with no receivers yet.
    fn new(handler: Address, node_id: NodeId) -> Self {
        Self {
            handler,
            node_id,
            receivers: BTreeSet::new(),
        }
    }

    /// The handler address.
    pub fn handler(&self) -> &Address {
        &self.handler
    }

    /// The node that recorded this entry.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The receivers reached through this handler.
    pub fn receivers(&self) -> &BTreeSet<Address> {
        &self.receivers
    }
}

/// All directed presences sent by one sender, grouped by handler.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectedPresenceRegistry {
    entries: Vec<DirectedPresence>,
}

impl DirectedPresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no handler entry remains.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of handler entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Handler entries in insertion order.
    pub fn entries(&self) -> &[DirectedPresence] {
        &self.entries
    }

    /// Entry for `handler`, if any.
    pub fn get(&self, handler: &Address) -> Option<&DirectedPresence> {
        self.entries.iter().find(|dp| &dp.handler == handler)
    }

    /// Node that recorded the registry, taken from its first entry.
    ///
    /// All entries of one sender are written by the node hosting the sender.
    pub fn origin_node(&self) -> Option<&NodeId> {
        self.entries.first().map(|dp| &dp.node_id)
    }

    /// Total number of `(handler, receiver)` pairs.
    pub fn pair_count(&self) -> usize {
        self.entries.iter().map(|dp| dp.receivers.len()).sum()
    }

    /// Every `(handler, receiver)` pair.
    pub fn pairs(&self) -> impl Iterator<Item = (&Address, &Address)> {
        self.entries
            .iter()
            .flat_map(|dp| dp.receivers.iter().map(move |r| (&dp.handler, r)))
    }

    /// Record that `handler` delivered a presence to `receiver`.
    ///
    /// Returns `true` if the registry changed. Repeating a pair is a no-op.
    pub fn add(&mut self, handler: &Address, node_id: &NodeId, receiver: Address) -> bool {
        let idx = match self.entries.iter().position(|dp| &dp.handler == handler) {
            Some(idx) => idx,
            None => {
                self.entries
                    .push(DirectedPresence::new(handler.clone(), node_id.clone()));
                self.entries.len() - 1
            }
        };
        self.entries[idx].receivers.insert(receiver)
    }

    /// Forget that `handler` delivered a presence to `receiver`.
    ///
    /// Drops the handler entry when its last receiver goes. Returns `true` if
    /// the registry changed.
    pub fn remove(&mut self, handler: &Address, receiver: &Address) -> bool {
        let Some(idx) = self.entries.iter().position(|dp| &dp.handler == handler) else {
            return false;
        };
        let removed = self.entries[idx].receivers.remove(receiver);
        if self.entries[idx].receivers.is_empty() {
            self.entries.remove(idx);
        }
        removed
    }

    /// Keep only the handler entries matching `f`.
    pub fn retain_handlers<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&DirectedPresence) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|dp| f(dp));
        before - self.entries.len()
    }

    /// Returns `true` if any receiver shares the bare address of `recipient`.
    pub fn has_bare_receiver(&self, recipient: &Address) -> bool {
        self.entries
            .iter()
            .flat_map(|dp| dp.receivers.iter())
            .any(|r| r.same_bare(recipient))
    }

    /// Remove every receiver sharing the bare address of `recipient`, under
    /// any handler. Returns the number of receivers removed.
    pub fn remove_bare_receiver(&mut self, recipient: &Address) -> usize {
        let mut removed = 0;
        for dp in &mut self.entries {
            let before = dp.receivers.len();
            dp.receivers.retain(|r| !r.same_bare(recipient));
            removed += before - dp.receivers.len();
        }
        self.entries.retain(|dp| !dp.receivers.is_empty());
        removed
    }

    /// Union of the receivers of every entry whose handler matches `f`.
    pub fn receivers_where<F>(&self, mut f: F) -> BTreeSet<Address>
    where
        F: FnMut(&Address) -> bool,
    {
        self.entries
            .iter()
            .filter(|dp| f(&dp.handler))
            .flat_map(|dp| dp.receivers.iter().cloned())
            .collect()
    }
}
