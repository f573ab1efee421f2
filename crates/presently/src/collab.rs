//! Interfaces to the rest of the server.
//!
//! The presence core does not route stanzas, store rosters or manage
//! connections itself. It reaches those services through the traits in this
//! module, which the embedding server implements.

use crate::address::{Address, NodeId};
use crate::error::{RosterError, RouteError};
use crate::stanza::{Message, Presence, Stanza};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Routing
// =============================================================================

/// Answers whether an address is currently reachable.
pub trait RouteResolver: Send + Sync + 'static {
    /// Returns `true` if `address` is served by a session or component on this node.
    fn has_local_route(&self, address: &Address) -> bool;

    /// Returns `true` if `address` is served anywhere in the cluster.
    fn has_cluster_route(&self, address: &Address) -> bool;
}

/// Delivers stanzas to their final recipients.
pub trait StanzaRouter: Send + Sync + 'static {
    /// Route `stanza` to the address in its `to` field.
    fn route(&self, stanza: Stanza) -> Result<(), RouteError>;
}

// =============================================================================
// Roster
// =============================================================================

/// Presence subscription between a roster owner and one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// Neither side receives the other's presence.
    None,
    /// The owner receives the contact's presence.
    To,
    /// The contact receives the owner's presence.
    From,
    /// Both directions.
    Both,
}

impl SubscriptionState {
    /// Returns `true` if the contact already receives the owner's presence.
    pub fn contact_receives_presence(self) -> bool {
        matches!(self, Self::From | Self::Both)
    }

    /// Returns `true` if the owner receives the contact's presence.
    pub fn owner_receives_presence(self) -> bool {
        matches!(self, Self::To | Self::Both)
    }
}

/// A subscription request received while the owner was offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingRequest {
    /// The contact asked to subscribe; holds the request as received.
    Subscribe(Presence),
    /// The contact cancelled its subscription.
    Unsubscribe,
}

/// One entry of a user's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItem {
    /// The contact's address.
    pub contact: Address,
    /// Current subscription state.
    pub subscription: SubscriptionState,
    /// Request waiting to be shown to the owner.
    pub pending: Option<PendingRequest>,
}

impl RosterItem {
    /// Create an item with no pending request.
    pub fn new(contact: Address, subscription: SubscriptionState) -> Self {
        Self {
            contact,
            subscription,
            pending: None,
        }
    }

    /// Attach a pending inbound request.
    pub fn with_pending(mut self, pending: PendingRequest) -> Self {
        self.pending = Some(pending);
        self
    }
}

/// Roster storage and subscription handling.
pub trait RosterCollaborator: Send + Sync + 'static {
    /// Returns `false` when the roster service is switched off.
    fn is_enabled(&self) -> bool;

    /// Subscription state between `owner` (a local username) and `contact`.
    ///
    /// `Ok(None)` means the contact is not on the roster.
    fn subscription(
        &self,
        owner: &str,
        contact: &Address,
    ) -> Result<Option<SubscriptionState>, RosterError>;

    /// Returns `true` if `contact` already receives `owner`'s presence.
    fn is_subscribed(&self, owner: &str, contact: &Address) -> Result<bool, RosterError> {
        Ok(self
            .subscription(owner, contact)?
            .is_some_and(SubscriptionState::contact_receives_presence))
    }

    /// Send `presence` to every contact subscribed to `owner`.
    fn broadcast_presence(&self, owner: &str, presence: &Presence) -> Result<(), RosterError>;

    /// Returns `true` if `username` has an account on this server.
    fn is_registered_user(&self, username: &str) -> bool;

    /// Every item on `username`'s roster.
    fn roster_items(&self, username: &str) -> Result<Vec<RosterItem>, RosterError>;

    /// Apply a subscription management stanza.
    fn handle_subscription(&self, presence: &Presence) -> Result<(), RosterError>;
}

// =============================================================================
// Sessions
// =============================================================================

/// A connected client.
pub trait ClientSession: Send + Sync + 'static {
    /// Full address of the session.
    fn address(&self) -> &Address;

    /// Domain of the server hosting the session.
    fn server_domain(&self) -> &str;

    /// Returns `true` once the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Returns `true` once the client has authenticated.
    fn is_authenticated(&self) -> bool;

    /// Returns `true` for an anonymous login.
    ///
    /// The default falls back on the address shape: a resource
    /// without a node part.
    fn is_anonymous(&self) -> bool {
        let address = self.address();
        address.node().is_none() && address.resource().is_some()
    }

    /// Returns `true` once the session has been initialized.
    fn is_initialized(&self) -> bool;

    /// Mark the session initialized.
    fn set_initialized(&self, initialized: bool);

    /// Record the latest presence of the session.
    fn set_presence(&self, presence: &Presence);

    /// Deliver a stanza straight to the client.
    fn deliver(&self, stanza: Stanza) -> Result<(), RouteError>;

    /// Returns `true` if stored offline messages may be pushed on login.
    fn can_flood_offline(&self) -> bool;
}

/// Looks up sessions by address.
pub trait SessionRegistry: Send + Sync + 'static {
    /// The session bound to `address`, if any.
    fn session(&self, address: &Address) -> Option<Arc<dyn ClientSession>>;
}

/// Messages stored for offline users.
pub trait OfflineStore: Send + Sync + 'static {
    /// Remove and return every message stored for `username`.
    fn take_messages(&self, username: &str) -> Vec<Message>;
}

/// Server-wide presence bookkeeping.
pub trait PresenceTracker: Send + Sync + 'static {
    /// A user became available.
    fn user_available(&self, presence: &Presence);

    /// A user became unavailable.
    fn user_unavailable(&self, presence: &Presence);

    /// Ask `probee` for its presence on behalf of `prober`.
    fn probe_presence(&self, prober: &Address, probee: &Address);
}

// =============================================================================
// Cluster membership
// =============================================================================

/// A change in cluster membership, as seen from this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// This node joined a cluster.
    LocalJoined,
    /// Another node joined the cluster.
    RemoteJoined(NodeId),
    /// This node left the cluster.
    LocalLeft,
    /// Another node left the cluster.
    RemoteLeft(NodeId),
}

// =============================================================================
// Bundle
// =============================================================================

/// Every service the presence core depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Route lookups.
    pub routes: Arc<dyn RouteResolver>,
    /// Stanza delivery.
    pub router: Arc<dyn StanzaRouter>,
    /// Roster service.
    pub roster: Arc<dyn RosterCollaborator>,
    /// Session lookup.
    pub sessions: Arc<dyn SessionRegistry>,
    /// Offline message storage.
    pub offline: Arc<dyn OfflineStore>,
    /// Presence bookkeeping.
    pub tracker: Arc<dyn PresenceTracker>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
