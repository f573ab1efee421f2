//! Reaction to cluster membership changes.

use super::{ClusterReverseIndex, DirectedPresenceListener};
use crate::address::NodeId;
use crate::cache::{
    CacheEntryListener, CacheEvent, CacheHandle, ClusterCacheProvider, LocalCache,
    ReplicatedCache,
};
use crate::collab::{ClusterEvent, RouteResolver, StanzaRouter};
use crate::config::PresenceConfig;
use crate::context::ServerContext;
use crate::store::LocalPresenceStore;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Membership state of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    /// Not part of a cluster.
    Standalone,
    /// Switching to the clustered cache.
    Joining,
    /// Part of a cluster.
    Clustered,
    /// Switching back to a local cache.
    Leaving,
}

/// Keeps the cache, the local store and the reverse index consistent across
/// membership changes.
pub struct ClusterCoordinator {
    ctx: Arc<ServerContext>,
    config: PresenceConfig,
    store: LocalPresenceStore,
    cache: CacheHandle,
    provider: Arc<dyn ClusterCacheProvider>,
    index: Arc<ClusterReverseIndex>,
    routes: Arc<dyn RouteResolver>,
    router: Arc<dyn StanzaRouter>,
    state: Mutex<ClusterState>,
}

impl ClusterCoordinator {
    /// Create a coordinator for a standalone node.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<ServerContext>,
        config: PresenceConfig,
        store: LocalPresenceStore,
        cache: CacheHandle,
        provider: Arc<dyn ClusterCacheProvider>,
        index: Arc<ClusterReverseIndex>,
        routes: Arc<dyn RouteResolver>,
        router: Arc<dyn StanzaRouter>,
    ) -> Self {
        Self {
            ctx,
            config,
            store,
            cache,
            provider,
            index,
            routes,
            router,
            state: Mutex::new(ClusterState::Standalone),
        }
    }

    /// Current membership state.
    pub fn state(&self) -> ClusterState {
        *self.state.lock()
    }

    fn set_state(&self, state: ClusterState) {
        *self.state.lock() = state;
        tracing::debug!(node = %self.ctx.node_id(), ?state, "Cluster state changed");
    }

    /// Handle one membership event.
    pub fn handle(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::LocalJoined => self.joined_cluster(),
            ClusterEvent::RemoteJoined(node) => {
                tracing::debug!(node = %node, "Node joined the cluster; nothing to do");
            }
            ClusterEvent::LocalLeft => self.left_cluster(),
            ClusterEvent::RemoteLeft(node) => self.node_left(&node),
        }
    }

    /// Consume membership events until the channel closes.
    ///
    /// Events are handled one at a time, in order.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ClusterEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        tracing::debug!(node = %self.ctx.node_id(), "Cluster event channel closed");
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(
        self: Arc<Self>,
        rx: mpsc::Receiver<ClusterEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    // =========================================================================
    // Membership transitions
    // =========================================================================

    fn joined_cluster(&self) {
        self.set_state(ClusterState::Joining);

        let cache = self.provider.join_cluster(self.ctx.node_id());
        self.cache.swap(Arc::clone(&cache));
        self.restore_cache_content(cache.as_ref());

        let listener: Arc<dyn CacheEntryListener> = Arc::new(DirectedPresenceListener::new(
            self.config.listener_name.clone(),
            Arc::clone(&self.index),
            Arc::clone(&self.routes),
        ));

        match cache.entries() {
            Ok(entries) => {
                let local = self.ctx.node_id();
                for (sender, registry) in entries {
                    let Some(origin) = registry.origin_node().cloned() else {
                        continue;
                    };
                    if &origin == local {
                        continue;
                    }
                    let event = CacheEvent::Added {
                        key: sender.clone(),
                        value: Some(registry),
                        node: origin,
                    };
                    if let Err(e) = listener.on_event(&event) {
                        tracing::error!(
                            sender = %sender,
                            error = %e,
                            "Failed to index existing directed presence"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read cluster cache while joining");
            }
        }

        if !self.config.include_values {
            tracing::warn!(
                listener = %self.config.listener_name,
                "Registering directed presence listener without values; it will fail on first event"
            );
        }
        cache.add_listener(listener, self.config.include_values);

        self.set_state(ClusterState::Clustered);
        tracing::info!(node = %self.ctx.node_id(), senders = self.store.len(), "Joined cluster");
    }

    fn left_cluster(&self) {
        // Detach first so the listener of this cache stops feeding the index.
        self.provider.leave_cluster(self.ctx.node_id());

        if self.ctx.is_shutting_down() {
            tracing::debug!("Leaving cluster during shutdown; skipping reconciliation");
            self.set_state(ClusterState::Standalone);
            return;
        }
        self.set_state(ClusterState::Leaving);

        let cache: Arc<dyn ReplicatedCache> = Arc::new(LocalCache::new(
            self.config.cache_name.clone(),
            self.ctx.node_id().clone(),
        ));
        self.cache.swap(Arc::clone(&cache));
        self.restore_cache_content(cache.as_ref());

        for node in self.index.nodes() {
            self.index.handle_node_down(&node, self.router.as_ref());
        }

        self.set_state(ClusterState::Standalone);
        tracing::info!(node = %self.ctx.node_id(), "Left cluster");
    }

    fn node_left(&self, node: &NodeId) {
        tracing::debug!(node = %node, "Cleaning up directed presences of departed node");
        self.index.handle_node_down(node, self.router.as_ref());
    }

    /// Republish every locally hosted sender into `cache`.
    fn restore_cache_content(&self, cache: &dyn ReplicatedCache) {
        tracing::trace!(
            cache = %cache.name(),
            "Restoring directed presences provided by this node"
        );
        for (sender, registry) in self.store.snapshot() {
            if registry.is_empty() {
                tracing::warn!(
                    sender = %sender,
                    "Skipping empty directed presences while restoring cache"
                );
                continue;
            }
            let lock = cache.lock_for(&sender);
            let _guard = lock.lock();
            if let Err(e) = cache.put(sender.clone(), registry) {
                tracing::error!(
                    sender = %sender,
                    error = %e,
                    "Failed to restore directed presences"
                );
            }
        }
    }
}

impl fmt::Debug for ClusterCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("node", self.ctx.node_id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::cache::ClusterCacheHub;
    use crate::error::RouteError;
    use crate::registry::DirectedPresenceRegistry;
    use crate::stanza::Stanza;
    use std::collections::HashSet;

    struct Routes(HashSet<Address>);

    impl RouteResolver for Routes {
        fn has_local_route(&self, address: &Address) -> bool {
            self.0.contains(address)
        }
        fn has_cluster_route(&self, address: &Address) -> bool {
            self.0.contains(address)
        }
    }

    #[derive(Default)]
    struct Router(Mutex<Vec<Stanza>>);

    impl StanzaRouter for Router {
        fn route(&self, stanza: Stanza) -> Result<(), RouteError> {
            self.0.lock().push(stanza);
            Ok(())
        }
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    struct Fixture {
        coordinator: Arc<ClusterCoordinator>,
        ctx: Arc<ServerContext>,
        store: LocalPresenceStore,
        cache: CacheHandle,
        index: Arc<ClusterReverseIndex>,
        router: Arc<Router>,
    }

    fn fixture(hub: &ClusterCacheHub, node: &str, local_handlers: &[&str]) -> Fixture {
        let ctx = Arc::new(ServerContext::new("example.org", NodeId::new(node)));
        let config = PresenceConfig::default();
        let store = LocalPresenceStore::new();
        let cache = CacheHandle::new(Arc::new(LocalCache::new(
            config.cache_name.clone(),
            NodeId::new(node),
        )));
        let index = Arc::new(ClusterReverseIndex::new());
        let router = Arc::new(Router::default());
        let routes = Routes(local_handlers.iter().map(|s| addr(s)).collect());
        let coordinator = Arc::new(ClusterCoordinator::new(
            Arc::clone(&ctx),
            config,
            store.clone(),
            cache.clone(),
            Arc::new(hub.clone()),
            Arc::clone(&index),
            Arc::new(routes),
            router.clone(),
        ));
        Fixture {
            coordinator,
            ctx,
            store,
            cache,
            index,
            router,
        }
    }

    fn registry(node: &str, handler: &str, receiver: &str) -> DirectedPresenceRegistry {
        let mut reg = DirectedPresenceRegistry::new();
        reg.add(&addr(handler), &NodeId::new(node), addr(receiver));
        reg
    }

    #[test]
    fn test_join_republishes_local_store() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let f = fixture(&hub, "n1", &[]);
        let alice = addr("alice@example.org/phone");
        f.store.insert(
            alice.clone(),
            registry("n1", "room@muc.example.org", "room@muc.example.org/alice"),
        );

        f.coordinator.handle(ClusterEvent::LocalJoined);

        assert_eq!(f.coordinator.state(), ClusterState::Clustered);
        assert!(f.cache.current().is_clustered());
        assert!(f.cache.current().get(&alice).unwrap().is_some());
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_join_indexes_entries_of_other_nodes() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let n2 = hub.join(NodeId::new("n2"));
        let bob = addr("bob@example.org/desk");
        n2.put(
            bob.clone(),
            registry("n2", "room@muc.example.org", "room@muc.example.org/bob"),
        )
        .unwrap();

        let f = fixture(&hub, "n1", &["room@muc.example.org"]);
        f.coordinator.handle(ClusterEvent::LocalJoined);

        assert!(f.index.receivers(&NodeId::new("n2"), &bob).is_some());
    }

    #[test]
    fn test_listener_follows_remote_writes_after_join() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let f = fixture(&hub, "n1", &["room@muc.example.org"]);
        f.coordinator.handle(ClusterEvent::LocalJoined);

        let n2 = hub.join(NodeId::new("n2"));
        let bob = addr("bob@example.org/desk");
        n2.put(
            bob.clone(),
            registry("n2", "room@muc.example.org", "room@muc.example.org/bob"),
        )
        .unwrap();
        assert!(f.index.receivers(&NodeId::new("n2"), &bob).is_some());

        n2.remove(&bob).unwrap();
        assert!(f.index.is_empty());
    }

    #[test]
    fn test_remote_leave_routes_unavailable() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let f = fixture(&hub, "n1", &["room@muc.example.org"]);
        f.coordinator.handle(ClusterEvent::LocalJoined);
        let n2 = hub.join(NodeId::new("n2"));
        n2.put(
            addr("bob@example.org/desk"),
            registry("n2", "room@muc.example.org", "room@muc.example.org/bob"),
        )
        .unwrap();

        hub.leave(&NodeId::new("n2"));
        f.coordinator
            .handle(ClusterEvent::RemoteLeft(NodeId::new("n2")));
        f.coordinator
            .handle(ClusterEvent::RemoteLeft(NodeId::new("n2")));

        assert_eq!(f.router.0.lock().len(), 1);
        assert!(f.index.is_empty());
    }

    #[test]
    fn test_local_leave_cleans_every_node_and_restores_local_cache() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let f = fixture(&hub, "n1", &["room@muc.example.org"]);
        let alice = addr("alice@example.org/phone");
        f.store.insert(
            alice.clone(),
            registry("n1", "room@muc.example.org", "room@muc.example.org/alice"),
        );
        f.coordinator.handle(ClusterEvent::LocalJoined);
        let n2 = hub.join(NodeId::new("n2"));
        n2.put(
            addr("bob@example.org/desk"),
            registry("n2", "room@muc.example.org", "room@muc.example.org/bob"),
        )
        .unwrap();

        f.coordinator.handle(ClusterEvent::LocalLeft);

        assert_eq!(f.coordinator.state(), ClusterState::Standalone);
        let cache = f.cache.current();
        assert!(!cache.is_clustered());
        assert!(cache.get(&alice).unwrap().is_some());
        assert_eq!(cache.entries().unwrap().len(), 1);
        assert_eq!(f.router.0.lock().len(), 1);
        assert!(f.index.is_empty());
    }

    #[test]
    fn test_local_leave_stops_following_cluster_writes() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let f = fixture(&hub, "n1", &["room@muc.example.org"]);
        f.coordinator.handle(ClusterEvent::LocalJoined);
        let n2 = hub.join(NodeId::new("n2"));

        f.coordinator.handle(ClusterEvent::LocalLeft);
        assert_eq!(hub.members(), vec![NodeId::new("n2")]);

        n2.put(
            addr("bob@example.org/desk"),
            registry("n2", "room@muc.example.org", "room@muc.example.org/bob"),
        )
        .unwrap();
        assert!(f.index.is_empty());
    }

    #[test]
    fn test_local_leave_during_shutdown_skips_reconciliation() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let f = fixture(&hub, "n1", &["room@muc.example.org"]);
        f.coordinator.handle(ClusterEvent::LocalJoined);
        let n2 = hub.join(NodeId::new("n2"));
        n2.put(
            addr("bob@example.org/desk"),
            registry("n2", "room@muc.example.org", "room@muc.example.org/bob"),
        )
        .unwrap();

        f.ctx.begin_shutdown();
        f.coordinator.handle(ClusterEvent::LocalLeft);

        assert_eq!(f.coordinator.state(), ClusterState::Standalone);
        assert!(f.router.0.lock().is_empty());
        assert!(f.cache.current().is_clustered());
        assert_eq!(hub.members(), vec![NodeId::new("n2")]);
    }

    #[tokio::test]
    async fn test_run_consumes_events_in_order() {
        let hub = ClusterCacheHub::new("Directed Presences");
        let f = fixture(&hub, "n1", &[]);
        let (tx, rx) = mpsc::channel(8);
        let task = Arc::clone(&f.coordinator).spawn(rx);

        tx.send(ClusterEvent::LocalJoined).await.unwrap();
        tx.send(ClusterEvent::RemoteJoined(NodeId::new("n2")))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(f.coordinator.state(), ClusterState::Clustered);
    }
}
