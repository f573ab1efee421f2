//! Periodic removal of directed presences to vanished handlers.

use crate::address::Address;
use crate::cache::{CacheHandle, ReplicatedCache};
use crate::collab::RouteResolver;
use crate::error::CacheError;
use crate::store::LocalPresenceStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Drops directed-presence entries whose handler is no longer routable.
///
/// Only senders hosted on this node are swept. Their local and cached
/// registries are pruned together under the sender's lock.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: LocalPresenceStore,
    cache: CacheHandle,
    routes: Arc<dyn RouteResolver>,
}

impl ExpirySweeper {
    /// Create a sweeper over `store`, locking through `cache`.
    pub fn new(
        store: LocalPresenceStore,
        cache: CacheHandle,
        routes: Arc<dyn RouteResolver>,
    ) -> Self {
        Self {
            store,
            cache,
            routes,
        }
    }

    /// Run one sweep. Returns the number of handler entries removed.
    pub fn sweep(&self) -> usize {
        let cache = self.cache.current();
        let mut removed = 0;

        for (sender, registry) in self.store.snapshot() {
            let expired = registry
                .entries()
                .iter()
                .any(|dp| !self.is_routable(dp.handler()));
            if !expired {
                continue;
            }

            let lock = cache.lock_for(&sender);
            let _guard = lock.lock();
            removed += self
                .store
                .modify(&sender, |registry| {
                    registry.retain_handlers(|dp| self.is_routable(dp.handler()))
                })
                .unwrap_or(0);
            if let Err(e) = self.sweep_cached(cache.as_ref(), &sender) {
                tracing::error!(
                    sender = %sender,
                    error = %e,
                    "Failed to remove expired directed presences from cache"
                );
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Removed expired directed presences");
        }
        removed
    }

    /// Prune the cached registry of `sender`. Caller holds the sender's lock.
    fn sweep_cached(
        &self,
        cache: &dyn ReplicatedCache,
        sender: &Address,
    ) -> Result<(), CacheError> {
        let Some(mut registry) = cache.get(sender)? else {
            return Ok(());
        };
        if registry.retain_handlers(|dp| self.is_routable(dp.handler())) == 0 {
            return Ok(());
        }
        if registry.is_empty() {
            cache.remove(sender)?;
        } else {
            cache.put(sender.clone(), registry)?;
        }
        Ok(())
    }

    fn is_routable(&self, handler: &Address) -> bool {
        self.routes.has_local_route(handler) || self.routes.has_cluster_route(handler)
    }

    /// Run [`sweep`](Self::sweep) every `period` on the current tokio runtime.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                self.sweep();
            }
        })
    }
}

impl fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("senders", &self.store.len())
            .finish()
    }
}
