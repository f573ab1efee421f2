//! Cluster consistency of directed presences.
//!
//! Cache entries written by a node can vanish with that node. To still retract
//! what its users announced to our handlers, every node derives a
//! [`ClusterReverseIndex`] from cache events through a
//! [`DirectedPresenceListener`], and the [`ClusterCoordinator`] replays it as
//! unavailable presences when a node leaves.

mod coordinator;
mod listener;
mod reverse_index;

pub use coordinator::{ClusterCoordinator, ClusterState};
pub use listener::DirectedPresenceListener;
pub use reverse_index::ClusterReverseIndex;
