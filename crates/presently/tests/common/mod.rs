//! Recording test doubles for the collaborator interfaces.

#![allow(dead_code)]

use parking_lot::{Mutex, RwLock};
use presently::{
    Address, ClientSession, ClusterCacheHub, Collaborators, Message, NodeId, OfflineStore,
    Presence, PresenceConfig, PresenceNode, PresenceTracker, RosterCollaborator, RosterError,
    RosterItem, RouteError, RouteResolver, ServerContext, SessionRegistry, Stanza, StanzaRouter,
    SubscriptionState,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DOMAIN: &str = "example.org";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

/// Side effects observed across collaborators, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Broadcast(String, Presence),
    Routed(Stanza),
}

pub type Journal = Arc<Mutex<Vec<Recorded>>>;

// =============================================================================
// Routing
// =============================================================================

#[derive(Default)]
pub struct TestRoutes {
    local: RwLock<HashSet<Address>>,
    cluster: RwLock<HashSet<Address>>,
}

impl TestRoutes {
    pub fn add_local(&self, address: &str) {
        self.local.write().insert(addr(address));
    }

    pub fn add_cluster(&self, address: &str) {
        self.cluster.write().insert(addr(address));
    }

    pub fn remove(&self, address: &str) {
        self.local.write().remove(&addr(address));
        self.cluster.write().remove(&addr(address));
    }
}

impl RouteResolver for TestRoutes {
    fn has_local_route(&self, address: &Address) -> bool {
        self.local.read().contains(address)
    }

    fn has_cluster_route(&self, address: &Address) -> bool {
        self.local.read().contains(address) || self.cluster.read().contains(address)
    }
}

pub struct RecordingRouter {
    journal: Journal,
    failing: RwLock<HashSet<Address>>,
}

impl RecordingRouter {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            failing: RwLock::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, address: &str) {
        self.failing.write().insert(addr(address));
    }
}

impl StanzaRouter for RecordingRouter {
    fn route(&self, stanza: Stanza) -> Result<(), RouteError> {
        let to = stanza.to().cloned().ok_or(RouteError::MissingRecipient)?;
        if self.failing.read().contains(&to) {
            return Err(RouteError::NoRoute(to));
        }
        self.journal.lock().push(Recorded::Routed(stanza));
        Ok(())
    }
}

// =============================================================================
// Roster
// =============================================================================

pub struct TestRoster {
    journal: Journal,
    enabled: AtomicBool,
    registered: RwLock<HashSet<String>>,
    subscriptions: RwLock<HashMap<(String, Address), SubscriptionState>>,
    items: RwLock<HashMap<String, Vec<RosterItem>>>,
    failing_owner: RwLock<Option<String>>,
    pub handled: Mutex<Vec<Presence>>,
}

impl TestRoster {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            enabled: AtomicBool::new(true),
            registered: RwLock::new(HashSet::new()),
            subscriptions: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            failing_owner: RwLock::new(None),
            handled: Mutex::new(Vec::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn register(&self, username: &str) {
        self.registered.write().insert(username.to_string());
    }

    pub fn subscribe(&self, owner: &str, contact: &str, state: SubscriptionState) {
        self.subscriptions
            .write()
            .insert((owner.to_string(), addr(contact).to_bare()), state);
    }

    pub fn set_items(&self, owner: &str, items: Vec<RosterItem>) {
        self.items.write().insert(owner.to_string(), items);
    }

    pub fn fail_lookups_for(&self, owner: &str) {
        *self.failing_owner.write() = Some(owner.to_string());
    }
}

impl RosterCollaborator for TestRoster {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn subscription(
        &self,
        owner: &str,
        contact: &Address,
    ) -> Result<Option<SubscriptionState>, RosterError> {
        if self.failing_owner.read().as_deref() == Some(owner) {
            return Err(RosterError::UserNotFound(owner.to_string()));
        }
        Ok(self
            .subscriptions
            .read()
            .get(&(owner.to_string(), contact.to_bare()))
            .copied())
    }

    fn broadcast_presence(&self, owner: &str, presence: &Presence) -> Result<(), RosterError> {
        self.journal
            .lock()
            .push(Recorded::Broadcast(owner.to_string(), presence.clone()));
        Ok(())
    }

    fn is_registered_user(&self, username: &str) -> bool {
        self.registered.read().contains(username)
    }

    fn roster_items(&self, username: &str) -> Result<Vec<RosterItem>, RosterError> {
        Ok(self
            .items
            .read()
            .get(username)
            .cloned()
            .unwrap_or_default())
    }

    fn handle_subscription(&self, presence: &Presence) -> Result<(), RosterError> {
        let owner = presence.from.as_ref().and_then(|from| from.node());
        if let Some(owner) = owner
            && self.failing_owner.read().as_deref() == Some(owner)
        {
            return Err(RosterError::UserNotFound(owner.to_string()));
        }
        self.handled.lock().push(presence.clone());
        Ok(())
    }
}

// =============================================================================
// Sessions
// =============================================================================

pub struct TestSession {
    address: Address,
    closed: AtomicBool,
    authenticated: AtomicBool,
    initialized: AtomicBool,
    anonymous: Option<bool>,
    flood: bool,
    pub presence: Mutex<Option<Presence>>,
    pub delivered: Mutex<Vec<Stanza>>,
}

impl TestSession {
    pub fn new(address: &str) -> Self {
        Self {
            address: addr(address),
            closed: AtomicBool::new(false),
            authenticated: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            anonymous: None,
            flood: true,
            presence: Mutex::new(None),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = Some(anonymous);
        self
    }

    pub fn closed(self) -> Self {
        self.closed.store(true, Ordering::SeqCst);
        self
    }

    pub fn unauthenticated(self) -> Self {
        self.authenticated.store(false, Ordering::SeqCst);
        self
    }
}

impl ClientSession for TestSession {
    fn address(&self) -> &Address {
        &self.address
    }

    fn server_domain(&self) -> &str {
        DOMAIN
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn is_anonymous(&self) -> bool {
        match self.anonymous {
            Some(flag) => flag,
            None => self.address.node().is_none() && self.address.resource().is_some(),
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    fn set_presence(&self, presence: &Presence) {
        *self.presence.lock() = Some(presence.clone());
    }

    fn deliver(&self, stanza: Stanza) -> Result<(), RouteError> {
        self.delivered.lock().push(stanza);
        Ok(())
    }

    fn can_flood_offline(&self) -> bool {
        self.flood
    }
}

#[derive(Default)]
pub struct TestSessions {
    sessions: RwLock<HashMap<Address, Arc<TestSession>>>,
}

impl TestSessions {
    pub fn add(&self, session: TestSession) -> Arc<TestSession> {
        let session = Arc::new(session);
        self.sessions
            .write()
            .insert(session.address().clone(), Arc::clone(&session));
        session
    }
}

impl SessionRegistry for TestSessions {
    fn session(&self, address: &Address) -> Option<Arc<dyn ClientSession>> {
        self.sessions
            .read()
            .get(address)
            .map(|s| Arc::clone(s) as Arc<dyn ClientSession>)
    }
}

#[derive(Default)]
pub struct TestOffline {
    messages: Mutex<HashMap<String, Vec<Message>>>,
}

impl TestOffline {
    pub fn store(&self, username: &str, message: Message) {
        self.messages
            .lock()
            .entry(username.to_string())
            .or_default()
            .push(message);
    }
}

impl OfflineStore for TestOffline {
    fn take_messages(&self, username: &str) -> Vec<Message> {
        self.messages.lock().remove(username).unwrap_or_default()
    }
}

#[derive(Default)]
pub struct TestTracker {
    pub available: Mutex<Vec<Presence>>,
    pub unavailable: Mutex<Vec<Presence>>,
    pub probes: Mutex<Vec<(Address, Address)>>,
}

impl PresenceTracker for TestTracker {
    fn user_available(&self, presence: &Presence) {
        self.available.lock().push(presence.clone());
    }

    fn user_unavailable(&self, presence: &Presence) {
        self.unavailable.lock().push(presence.clone());
    }

    fn probe_presence(&self, prober: &Address, probee: &Address) {
        self.probes.lock().push((prober.clone(), probee.clone()));
    }
}

// =============================================================================
// Harness
// =============================================================================

/// One presence node with recording collaborators.
pub struct Harness {
    pub node: PresenceNode,
    pub journal: Journal,
    pub routes: Arc<TestRoutes>,
    pub router: Arc<RecordingRouter>,
    pub roster: Arc<TestRoster>,
    pub sessions: Arc<TestSessions>,
    pub offline: Arc<TestOffline>,
    pub tracker: Arc<TestTracker>,
}

impl Harness {
    pub fn new(hub: &ClusterCacheHub, node: &str) -> Self {
        Self::with_config(hub, node, PresenceConfig::default())
    }

    pub fn standalone() -> Self {
        Self::new(&ClusterCacheHub::new("Directed Presences"), "node1")
    }

    pub fn with_config(hub: &ClusterCacheHub, node: &str, config: PresenceConfig) -> Self {
        init_tracing();
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(TestRoutes::default());
        let router = Arc::new(RecordingRouter::new(Arc::clone(&journal)));
        let roster = Arc::new(TestRoster::new(Arc::clone(&journal)));
        let sessions = Arc::new(TestSessions::default());
        let offline = Arc::new(TestOffline::default());
        let tracker = Arc::new(TestTracker::default());

        let collab = Collaborators {
            routes: routes.clone(),
            router: router.clone(),
            roster: roster.clone(),
            sessions: sessions.clone(),
            offline: offline.clone(),
            tracker: tracker.clone(),
        };
        let ctx = Arc::new(ServerContext::new(DOMAIN, NodeId::new(node)));
        let node = PresenceNode::new(config, ctx, collab, Arc::new(hub.clone())).unwrap();

        Self {
            node,
            journal,
            routes,
            router,
            roster,
            sessions,
            offline,
            tracker,
        }
    }

    /// Every routed stanza, in order.
    pub fn routed(&self) -> Vec<Stanza> {
        self.journal
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Routed(s) => Some(s.clone()),
                Recorded::Broadcast(..) => None,
            })
            .collect()
    }

    /// Routed presences as `(from, to)` pairs.
    pub fn routed_pairs(&self) -> Vec<(String, String)> {
        self.routed()
            .iter()
            .filter_map(Stanza::as_presence)
            .map(|p| {
                (
                    p.from.as_ref().map(ToString::to_string).unwrap_or_default(),
                    p.to.as_ref().map(ToString::to_string).unwrap_or_default(),
                )
            })
            .collect()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Send a directed available presence from `from` through `handler` to `to`.
    pub fn send_directed(&self, from: &str, handler: &str, to: &str) {
        let presence = Presence::available(addr(from)).with_to(addr(to));
        self.node
            .dispatcher()
            .process_directed(presence, &addr(handler))
            .unwrap();
    }
}
