//! Per-node reverse index of directed presences.
//!
//! For each cluster node, the index records which senders hosted there sent
//! directed presence to handlers hosted *here*, and to which receivers. It is
//! derived locally from cache events and never replicated. When a node
//! disappears, this is the only record left of what its users told our
//! handlers, so it drives the compensating unavailable presences.

use crate::address::{Address, NodeId};
use crate::collab::StanzaRouter;
use crate::stanza::Presence;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

type SenderMap = DashMap<Address, BTreeSet<Address>>;

/// `node -> sender -> receivers`, restricted to locally routed handlers.
#[derive(Default)]
pub struct ClusterReverseIndex {
    nodes: DashMap<NodeId, SenderMap>,
}

impl ClusterReverseIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Listener-facing updates
    // =========================================================================

    /// Replace the receivers recorded for `sender` on `node`.
    ///
    /// An empty set is not stored; use [`remove_sender`](Self::remove_sender).
    pub fn upsert(&self, node: &NodeId, sender: Address, receivers: BTreeSet<Address>) {
        if receivers.is_empty() {
            return;
        }
        self.nodes
            .entry(node.clone())
            .or_default()
            .insert(sender, receivers);
    }

    /// Forget `sender` on `node`. Returns the receivers that were recorded.
    pub fn remove_sender(&self, node: &NodeId, sender: &Address) -> Option<BTreeSet<Address>> {
        let removed = {
            let senders = self.nodes.get(node)?;
            senders.remove(sender).map(|(_, receivers)| receivers)
        };
        self.nodes.remove_if(node, |_, senders| senders.is_empty());
        removed
    }

    /// Forget everything recorded for `node`.
    pub fn clear_node(&self, node: &NodeId) {
        self.nodes.remove(node);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Receivers recorded for `sender` on `node`.
    pub fn receivers(&self, node: &NodeId, sender: &Address) -> Option<BTreeSet<Address>> {
        self.nodes
            .get(node)?
            .get(sender)
            .map(|r| r.value().clone())
    }

    /// Copy of the senders recorded for `node`.
    pub fn node_entries(&self, node: &NodeId) -> BTreeMap<Address, BTreeSet<Address>> {
        self.nodes
            .get(node)
            .map(|senders| {
                senders
                    .iter()
                    .map(|r| (r.key().clone(), r.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes that currently have entries.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|r| r.key().clone()).collect()
    }

    /// Returns `true` if no node has entries.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // =========================================================================
    // Node departure
    // =========================================================================

    /// Remove and return everything recorded for `node`.
    ///
    /// A second call for the same node returns `None`.
    pub fn take_node(&self, node: &NodeId) -> Option<BTreeMap<Address, BTreeSet<Address>>> {
        let (_, senders) = self.nodes.remove(node)?;
        Some(senders.into_iter().collect())
    }

    /// Retract every directed presence recorded for a departed node.
    ///
    /// Routes one unavailable presence per `(sender, receiver)` pair. Routing
    /// failures are logged and skipped. Returns the number of presences routed.
    pub fn handle_node_down(&self, node: &NodeId, router: &dyn StanzaRouter) -> usize {
        let Some(senders) = self.take_node(node) else {
            tracing::debug!(node = %node, "No directed presences recorded for departed node");
            return 0;
        };

        let mut routed = 0;
        for (sender, receivers) in senders {
            for receiver in receivers {
                let presence = Presence::unavailable(sender.clone(), receiver.clone());
                match router.route(presence.into()) {
                    Ok(()) => routed += 1,
                    Err(e) => tracing::error!(
                        node = %node,
                        sender = %sender,
                        receiver = %receiver,
                        error = %e,
                        "Failed to route unavailable presence for departed node"
                    ),
                }
            }
        }
        tracing::info!(node = %node, routed, "Retracted directed presences of departed node");
        routed
    }
}

impl fmt::Debug for ClusterReverseIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterReverseIndex")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
