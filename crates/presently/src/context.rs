//! Facts about the local server shared by the presence components.

use crate::address::{Address, NodeId};
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity and lifecycle flags of the local server node.
#[derive(Debug)]
pub struct ServerContext {
    domain: String,
    node_id: NodeId,
    shutting_down: AtomicBool,
}

impl ServerContext {
    /// Create a context for `domain` running as cluster node `node_id`.
    pub fn new(domain: &str, node_id: NodeId) -> Self {
        Self {
            domain: domain.to_ascii_lowercase(),
            node_id,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The server's domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// This node's cluster identifier.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Returns `true` if `address` belongs to this server's domain.
    pub fn is_local(&self, address: &Address) -> bool {
        address.domain_part() == self.domain
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Flag the server as shutting down.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}
