//! Presence update handling.
//!
//! The [`PresenceDispatcher`] receives presence stanzas sent by locally
//! connected entities. Broadcast availability changes fan out through the
//! roster. Presence sent *directly* to an entity outside the roster is
//! recorded, so that a later unavailable can be delivered to every entity that
//! saw the sender come online.
//!
//! Recorded directed presences live in two places: the node-local
//! [`LocalPresenceStore`] and the cluster-visible cache. Both are written under
//! the cache's per-sender lock.

use crate::address::Address;
use crate::cache::{CacheHandle, ReplicatedCache};
use crate::collab::{ClientSession, Collaborators, PendingRequest};
use crate::context::ServerContext;
use crate::error::{PresenceError, RosterError, RouteError};
use crate::registry::DirectedPresenceRegistry;
use crate::stanza::{ErrorCondition, Presence, PresenceType, create_subscribe_presence};
use crate::store::LocalPresenceStore;
use std::fmt;
use std::sync::Arc;

/// Entry point for presence stanzas from local entities.
pub struct PresenceDispatcher {
    ctx: Arc<ServerContext>,
    store: LocalPresenceStore,
    cache: CacheHandle,
    collab: Collaborators,
}

impl PresenceDispatcher {
    /// Create a dispatcher over the given store and cache.
    pub fn new(
        ctx: Arc<ServerContext>,
        store: LocalPresenceStore,
        cache: CacheHandle,
        collab: Collaborators,
    ) -> Self {
        Self {
            ctx,
            store,
            cache,
            collab,
        }
    }

    // =========================================================================
    // Stanza processing
    // =========================================================================

    /// Process a presence stanza sent by a local entity.
    ///
    /// Failures are logged; protocol and authorization violations are
    /// answered with an error stanza.
    pub fn process(&self, presence: Presence) {
        let session = presence
            .from
            .as_ref()
            .and_then(|from| self.collab.sessions.session(from));

        match self.classify(&presence, session.as_deref()) {
            Ok(()) => {}
            Err(PresenceError::UnknownUser(user)) => {
                tracing::warn!(user = %user, "Presence being sent from unknown user");
            }
            Err(PresenceError::NotAuthorized(address)) => {
                tracing::debug!(
                    sender = %address,
                    "Rejecting presence from unauthenticated session"
                );
                self.reply_error(&presence, session.as_deref(), ErrorCondition::NotAuthorized);
            }
            Err(e) => {
                tracing::error!(error = %e, presence = ?presence, "Failed to process presence");
            }
        }
    }

    fn classify(
        &self,
        presence: &Presence,
        session: Option<&dyn ClientSession>,
    ) -> Result<(), PresenceError> {
        if let Some(session) = session
            && !session.is_authenticated()
        {
            return Err(PresenceError::NotAuthorized(session.address().clone()));
        }

        match presence.kind {
            PresenceType::Available => {
                if let Some(session) = session {
                    if session.is_closed() {
                        tracing::warn!(
                            session = %session.address(),
                            "Rejected available presence from closed session"
                        );
                        return Ok(());
                    }
                    session.set_presence(presence);
                }

                self.broadcast_update(presence);

                if let Some(session) = session
                    && !session.is_initialized()
                {
                    self.init_session(session);
                    session.set_initialized(true);
                }

                self.collab.tracker.user_available(presence);
            }
            PresenceType::Unavailable => {
                if let Some(session) = session {
                    session.set_presence(presence);
                }
                self.broadcast_update(presence);
                self.broadcast_unavailable_for_directed_presences(presence);
                self.collab.tracker.user_unavailable(presence);
            }
            PresenceType::Subscribe
            | PresenceType::Subscribed
            | PresenceType::Unsubscribe
            | PresenceType::Unsubscribed => {
                self.collab
                    .roster
                    .handle_subscription(presence)
                    .map_err(|e| match e {
                        RosterError::UserNotFound(user) => PresenceError::UnknownUser(user),
                        other => other.into(),
                    })?;
                if presence.kind == PresenceType::Subscribed
                    && let (Some(from), Some(to)) = (&presence.from, &presence.to)
                {
                    self.drop_directed_to_new_subscriber(from, to);
                }
            }
            PresenceType::Error | PresenceType::Probe => {
                tracing::debug!(
                    kind = ?presence.kind,
                    "Unexpected presence type; answering bad-request"
                );
                self.reply_error(presence, session, ErrorCondition::BadRequest);
            }
        }
        Ok(())
    }

    /// Answer `presence` with an error of the given condition.
    fn reply_error(
        &self,
        presence: &Presence,
        session: Option<&dyn ClientSession>,
        condition: ErrorCondition,
    ) {
        let mut reply = presence.clone();
        match session {
            Some(session) => {
                reply.from = Some(Address::domain(session.server_domain()));
                reply.to = Some(session.address().clone());
            }
            None => std::mem::swap(&mut reply.from, &mut reply.to),
        }
        let reply = reply.into_error(condition);
        if let Err(e) = self.collab.router.route(reply.into()) {
            tracing::error!(error = %e, %condition, "Failed to deliver error response");
        }
    }

    /// Send a broadcast presence to the sender's roster.
    fn broadcast_update(&self, update: &Presence) {
        let Some(from) = &update.from else {
            return;
        };
        if !self.ctx.is_local(from) {
            tracing::warn!(
                domain = %self.ctx.domain(),
                sender = %from,
                "Presence update from unknown remote user"
            );
            return;
        }
        if !self.collab.roster.is_enabled() {
            return;
        }
        let Some(name) = from.node() else {
            return;
        };
        match self.collab.roster.broadcast_presence(name, update) {
            Ok(()) => {}
            Err(RosterError::UserNotFound(user)) => {
                tracing::warn!(user = %user, "Presence being sent from unknown user");
            }
            Err(e) => {
                tracing::error!(sender = %from, error = %e, "Failed to broadcast presence");
            }
        }
    }

    /// Send `update` to every receiver of the sender's directed presences and
    /// forget them.
    fn broadcast_unavailable_for_directed_presences(&self, update: &Presence) {
        let Some(from) = &update.from else {
            return;
        };
        if !self.ctx.is_local(from) {
            return;
        }

        let cache = self.cache.current();
        let registry = {
            let lock = cache.lock_for(from);
            let _guard = lock.lock();
            let cached = match cache.remove(from) {
                Ok(cached) => cached,
                Err(e) => {
                    tracing::error!(
                        sender = %from,
                        error = %e,
                        "Failed to remove directed presences"
                    );
                    None
                }
            };
            let local = self.store.remove(from);
            cached.or(local)
        };

        let Some(registry) = registry else {
            return;
        };
        tracing::debug!(
            sender = %from,
            receivers = registry.pair_count(),
            "Retracting directed presences"
        );
        for (_, receiver) in registry.pairs() {
            let presence = update.readdressed(receiver.clone());
            if let Err(e) = self.collab.router.route(presence.into()) {
                tracing::error!(
                    sender = %from,
                    receiver = %receiver,
                    error = %e,
                    "Failed to route unavailable presence"
                );
            }
        }
    }

    /// A `subscribed` answer makes `contact` a roster subscriber of `from`, so
    /// any directed presence from `from` to `contact` is now redundant.
    fn drop_directed_to_new_subscriber(&self, from: &Address, contact: &Address) {
        let senders: Vec<Address> = self
            .store
            .senders()
            .into_iter()
            .filter(|sender| sender.same_bare(from))
            .collect();
        for sender in senders {
            if let Err(e) = self.remove_directed_presence(&sender, contact) {
                tracing::error!(
                    sender = %sender,
                    contact = %contact,
                    error = %e,
                    "Failed to drop directed presence"
                );
            }
        }
    }

    // =========================================================================
    // Session initialization
    // =========================================================================

    /// First availability of a registered user: replay pending subscription
    /// requests, probe contacts and flush offline messages.
    fn init_session(&self, session: &dyn ClientSession) {
        let address = session.address();
        let Some(username) = address.node() else {
            return;
        };
        if !self.collab.roster.is_registered_user(username) {
            return;
        }
        let bare = address.to_bare();

        if self.collab.roster.is_enabled() {
            match self.collab.roster.roster_items(username) {
                Ok(items) => {
                    for item in items {
                        let pending = match &item.pending {
                            Some(PendingRequest::Subscribe(stored)) => {
                                Some(stored.readdressed(bare.clone()))
                            }
                            Some(PendingRequest::Unsubscribe) => Some(create_subscribe_presence(
                                item.contact.clone(),
                                bare.clone(),
                                false,
                            )),
                            None => None,
                        };
                        if let Some(presence) = pending
                            && let Err(e) = session.deliver(presence.into())
                        {
                            tracing::warn!(
                                session = %address,
                                contact = %item.contact,
                                error = %e,
                                "Failed to deliver pending subscription request"
                            );
                        }
                        if item.subscription.owner_receives_presence() {
                            self.collab.tracker.probe_presence(address, &item.contact);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        user = %username,
                        error = %e,
                        "Failed to load roster for new session"
                    );
                }
            }
        }

        if session.can_flood_offline() {
            let messages = self.collab.offline.take_messages(username);
            tracing::debug!(
                user = %username,
                count = messages.len(),
                "Delivering offline messages"
            );
            for message in messages {
                if let Err(e) = session.deliver(message.into()) {
                    tracing::warn!(
                        session = %address,
                        error = %e,
                        "Failed to deliver offline message"
                    );
                }
            }
        }
    }

    // =========================================================================
    // Directed presence tracking
    // =========================================================================

    /// Route a presence addressed to `handler`'s entity, then record it.
    pub fn process_directed(
        &self,
        presence: Presence,
        handler: &Address,
    ) -> Result<(), PresenceError> {
        let receiver = presence.to.clone().ok_or(RouteError::MissingRecipient)?;
        self.collab.router.route(presence.clone().into())?;
        self.directed_presence_sent(&presence, handler, &receiver)
    }

    /// Record that `update` was delivered by `handler` to `receiver`.
    ///
    /// An unavailable update forgets the pair instead. Does nothing for
    /// senders that are not local or whose receiver already gets their
    /// presence through the roster.
    pub fn directed_presence_sent(
        &self,
        update: &Presence,
        handler: &Address,
        receiver: &Address,
    ) -> Result<(), PresenceError> {
        let Some(from) = &update.from else {
            return Ok(());
        };
        if !self.ctx.is_local(from) || !self.keep_track(from, receiver) {
            return Ok(());
        }

        let cache = self.cache.current();
        let lock = cache.lock_for(from);
        let _guard = lock.lock();

        let existing = cache.get(from)?;
        if update.kind == PresenceType::Unavailable {
            let Some(mut registry) = existing else {
                return Ok(());
            };
            registry.remove(handler, receiver);
            if registry.is_empty() {
                cache.remove(from)?;
                self.store.remove(from);
            } else {
                self.publish(cache.as_ref(), from, registry)?;
            }
        } else {
            let mut registry = existing.unwrap_or_default();
            registry.add(handler, self.ctx.node_id(), receiver.clone());
            self.publish(cache.as_ref(), from, registry)?;
        }
        Ok(())
    }

    /// Whether a directed presence from `from` to `receiver` must be recorded.
    fn keep_track(&self, from: &Address, receiver: &Address) -> bool {
        match from.node() {
            Some(name) => {
                if !self.collab.roster.is_enabled() {
                    return true;
                }
                match self.collab.roster.is_subscribed(name, receiver) {
                    Ok(subscribed) => !subscribed,
                    Err(RosterError::UserNotFound(user)) => {
                        tracing::warn!(user = %user, "Presence being sent from unknown user");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(
                            sender = %from,
                            error = %e,
                            "Roster lookup failed; not tracking"
                        );
                        false
                    }
                }
            }
            None => match self.collab.sessions.session(from) {
                Some(session) => session.is_anonymous(),
                None => from.resource().is_some(),
            },
        }
    }

    /// Write `registry` to the local store and the cache. Caller holds the lock.
    fn publish(
        &self,
        cache: &dyn ReplicatedCache,
        sender: &Address,
        registry: DirectedPresenceRegistry,
    ) -> Result<(), PresenceError> {
        self.store.insert(sender.clone(), registry.clone());
        cache.put(sender.clone(), registry)?;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns `true` if `owner` has a directed presence to `recipient`'s bare address.
    pub fn has_directed_presence(&self, owner: &Address, recipient: &Address) -> bool {
        match self.cache.current().get(owner) {
            Ok(registry) => registry.is_some_and(|r| r.has_bare_receiver(recipient)),
            Err(e) => {
                tracing::error!(owner = %owner, error = %e, "Failed to read directed presences");
                false
            }
        }
    }

    /// Forget every directed presence from `owner` to `recipient`'s bare address.
    ///
    /// Returns the number of receivers removed.
    pub fn remove_directed_presence(
        &self,
        owner: &Address,
        recipient: &Address,
    ) -> Result<usize, PresenceError> {
        let cache = self.cache.current();
        let lock = cache.lock_for(owner);
        let _guard = lock.lock();

        let Some(mut registry) = cache.get(owner)? else {
            return Ok(0);
        };
        let removed = registry.remove_bare_receiver(recipient);
        if removed == 0 {
            return Ok(0);
        }
        if registry.is_empty() {
            cache.remove(owner)?;
        } else {
            cache.put(owner.clone(), registry)?;
        }
        self.store
            .modify(owner, |local| local.remove_bare_receiver(recipient));
        Ok(removed)
    }
}

impl fmt::Debug for PresenceDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceDispatcher")
            .field("domain", &self.ctx.domain())
            .field("node", self.ctx.node_id())
            .field("senders", &self.store.len())
            .finish()
    }
}
