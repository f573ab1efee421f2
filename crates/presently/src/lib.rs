//! # Presently - Clustered directed-presence tracking
//!
//! Presently is the presence-distribution core of a clustered real-time
//! messaging server. It accepts presence changes from locally connected
//! entities, fans them out through rosters, and keeps a cluster-wide record of
//! *directed* presence: presence sent to an entity outside the sender's
//! roster, such as a chat room or a service component.
//!
//! When a sender goes offline, or the cluster node hosting it disappears,
//! every entity that saw the sender come online receives a compensating
//! unavailable presence.
//!
//! # Overview
//!
//! - **Registry**: per-sender record of handler → receivers pairs
//! - **Store**: the registries of senders hosted on this node
//! - **Cache**: cluster-visible copy of every registry, with per-key locks
//!   and mutation events
//! - **Cluster**: reverse index derived from cache events, and the
//!   coordinator reacting to membership changes
//! - **Dispatcher**: processing of presence stanzas
//! - **Sweeper**: removal of entries whose handler vanished
//!
//! # Example
//!
//! ```
//! use presently::{Address, LocalCache, NodeId, ReplicatedCache};
//!
//! let cache = LocalCache::new("Directed Presences", NodeId::new("node1"));
//! let sender: Address = "alice@example.org/phone".parse().unwrap();
//! let room: Address = "room@muc.example.org".parse().unwrap();
//!
//! let lock = cache.lock_for(&sender);
//! let _guard = lock.lock();
//! let mut registry = cache.get(&sender).unwrap().unwrap_or_default();
//! registry.add(&room, cache.node_id(), "room@muc.example.org/alice".parse().unwrap());
//! cache.put(sender.clone(), registry).unwrap();
//!
//! assert_eq!(cache.get(&sender).unwrap().map(|r| r.pair_count()), Some(1));
//! ```

#![deny(missing_docs)]

// =============================================================================
// Data model
// =============================================================================

/// Entity addresses and cluster node identifiers.
pub mod address;

/// Presence and message stanzas.
pub mod stanza;

/// Directed-presence registry of one sender.
pub mod registry;

/// Node-local store of directed presences.
pub mod store;

/// Error types.
pub mod error;

/// Configuration.
pub mod config;

/// Local server identity and lifecycle flags.
pub mod context;

// =============================================================================
// Components
// =============================================================================

/// Replicated directed-presence cache.
pub mod cache;

/// Reverse index and cluster membership handling.
pub mod cluster;

/// Interfaces to the rest of the server.
pub mod collab;

/// Presence stanza processing.
pub mod dispatcher;

/// Expiry of directed presences to vanished handlers.
pub mod sweeper;

/// Wiring of all components for one node.
pub mod node;

// =============================================================================
// Re-exports for convenient top-level access
// =============================================================================

pub use address::{Address, NodeId};
pub use cache::{
    CacheEntryListener, CacheEvent, CacheHandle, ClusterCacheHub, ClusterCacheProvider,
    ClusteredCache, KeyLock, LocalCache, ReplicatedCache,
};
pub use cluster::{ClusterCoordinator, ClusterReverseIndex, ClusterState, DirectedPresenceListener};
pub use collab::{
    ClientSession, ClusterEvent, Collaborators, OfflineStore, PendingRequest, PresenceTracker,
    RosterCollaborator, RosterItem, RouteResolver, SessionRegistry, StanzaRouter,
    SubscriptionState,
};
pub use config::PresenceConfig;
pub use context::ServerContext;
pub use dispatcher::PresenceDispatcher;
pub use error::{
    AddressError, CacheError, ConfigError, ListenerError, PresenceError, RosterError, RouteError,
};
pub use node::{NodeTasks, PresenceNode};
pub use registry::{DirectedPresence, DirectedPresenceRegistry};
pub use stanza::{
    ErrorCondition, Message, Presence, PresenceType, Stanza, create_subscribe_presence,
    is_presence_update_reflection,
};
pub use store::LocalPresenceStore;
pub use sweeper::ExpirySweeper;
