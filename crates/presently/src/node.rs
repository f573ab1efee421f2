//! Wiring of the presence components for one server node.

use crate::cache::{CacheHandle, ClusterCacheProvider, LocalCache};
use crate::cluster::{ClusterCoordinator, ClusterReverseIndex};
use crate::collab::{ClusterEvent, Collaborators};
use crate::config::PresenceConfig;
use crate::context::ServerContext;
use crate::dispatcher::PresenceDispatcher;
use crate::error::ConfigError;
use crate::store::LocalPresenceStore;
use crate::sweeper::ExpirySweeper;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The presence core of one node: dispatcher, coordinator and sweeper over a
/// shared store, cache and reverse index.
///
/// The node starts standalone, with a [`LocalCache`].
pub struct PresenceNode {
    ctx: Arc<ServerContext>,
    config: PresenceConfig,
    store: LocalPresenceStore,
    cache: CacheHandle,
    index: Arc<ClusterReverseIndex>,
    dispatcher: Arc<PresenceDispatcher>,
    coordinator: Arc<ClusterCoordinator>,
    sweeper: ExpirySweeper,
}

impl PresenceNode {
    /// Build a node from a validated configuration.
    pub fn new(
        config: PresenceConfig,
        ctx: Arc<ServerContext>,
        collab: Collaborators,
        provider: Arc<dyn ClusterCacheProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = LocalPresenceStore::new();
        let cache = CacheHandle::new(Arc::new(LocalCache::new(
            config.cache_name.clone(),
            ctx.node_id().clone(),
        )));
        let index = Arc::new(ClusterReverseIndex::new());

        let dispatcher = Arc::new(PresenceDispatcher::new(
            Arc::clone(&ctx),
            store.clone(),
            cache.clone(),
            collab.clone(),
        ));
        let coordinator = Arc::new(ClusterCoordinator::new(
            Arc::clone(&ctx),
            config.clone(),
            store.clone(),
            cache.clone(),
            provider,
            Arc::clone(&index),
            Arc::clone(&collab.routes),
            Arc::clone(&collab.router),
        ));
        let sweeper = ExpirySweeper::new(store.clone(), cache.clone(), collab.routes);

        tracing::debug!(
            node = %ctx.node_id(),
            domain = %ctx.domain(),
            cache = %config.cache_name,
            "Presence node created"
        );

        Ok(Self {
            ctx,
            config,
            store,
            cache,
            index,
            dispatcher,
            coordinator,
            sweeper,
        })
    }

    /// Start the membership loop and the expiry sweep.
    pub fn start(&self, events: mpsc::Receiver<ClusterEvent>) -> NodeTasks {
        NodeTasks {
            coordinator: Arc::clone(&self.coordinator).spawn(events),
            sweeper: self.sweeper.clone().spawn(self.config.sweep_period()),
        }
    }

    /// Server context.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Active configuration.
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Presence dispatcher.
    pub fn dispatcher(&self) -> &Arc<PresenceDispatcher> {
        &self.dispatcher
    }

    /// Membership coordinator.
    pub fn coordinator(&self) -> &Arc<ClusterCoordinator> {
        &self.coordinator
    }

    /// Expiry sweeper.
    pub fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    /// Directed presences of senders hosted here.
    pub fn store(&self) -> &LocalPresenceStore {
        &self.store
    }

    /// Cache currently in use.
    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// Reverse index of other nodes' directed presences.
    pub fn reverse_index(&self) -> &Arc<ClusterReverseIndex> {
        &self.index
    }
}

impl fmt::Debug for PresenceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceNode")
            .field("node", self.ctx.node_id())
            .field("state", &self.coordinator.state())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Background tasks of a started [`PresenceNode`].
#[derive(Debug)]
pub struct NodeTasks {
    /// Membership event loop; ends when the event channel closes.
    pub coordinator: JoinHandle<()>,
    /// Expiry sweep loop.
    pub sweeper: JoinHandle<()>,
}

impl NodeTasks {
    /// Stop both tasks.
    pub fn abort(&self) {
        self.coordinator.abort();
        self.sweeper.abort();
    }
}
