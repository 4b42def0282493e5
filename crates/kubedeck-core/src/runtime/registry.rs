// ── Teardown / rebuild primitives ──
//
// The registry is the only code that constructs `ClusterRuntime`s and
// the only holder of the authoritative identity → runtime map. Readers
// get lock-free snapshots; writers swap whole maps and are serialized
// by the coordinator's change lock.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kubedeck_kube::ClientFactory;

use super::ClusterRuntime;
use crate::auth::AuthStateManager;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::model::ClusterIdentity;
use crate::transport::{RebuildRequester, TransportFailureTracker};

pub type RuntimeMap = HashMap<ClusterIdentity, Arc<ClusterRuntime>>;

/// State carried from a torn-down runtime into its replacement.
#[derive(Debug, Clone, Default)]
pub struct RebuildSeed {
    /// Keeps the transport cooldown running across the rebuild.
    pub last_transport_rebuild: Option<Instant>,
    /// Start the fresh auth manager Invalid with this reason.
    pub resume_invalid: Option<String>,
}

pub struct RuntimeRegistry {
    map: ArcSwap<RuntimeMap>,
    factory: Arc<dyn ClientFactory>,
    config: Arc<CoreConfig>,
    events: EventBus,
    requester: Arc<dyn RebuildRequester>,
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("clusters", &self.map.load().len())
            .finish_non_exhaustive()
    }
}

impl RuntimeRegistry {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        config: Arc<CoreConfig>,
        events: EventBus,
        requester: Arc<dyn RebuildRequester>,
    ) -> Self {
        Self {
            map: ArcSwap::from_pointee(HashMap::new()),
            factory,
            config,
            events,
            requester,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<RuntimeMap> {
        self.map.load_full()
    }

    pub fn get(&self, cluster: &ClusterIdentity) -> Option<Arc<ClusterRuntime>> {
        self.map.load().get(cluster).cloned()
    }

    pub fn contains(&self, cluster: &ClusterIdentity) -> bool {
        self.map.load().contains_key(cluster)
    }

    pub fn len(&self) -> usize {
        self.map.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.load().is_empty()
    }

    // ── Rebuild ──────────────────────────────────────────────────────

    /// Build a fresh, uncommitted runtime from the kubeconfig as it is on
    /// disk right now.
    ///
    /// Bounded by the operation timeout and abandoned as soon as `cancel`
    /// fires. On error nothing is left behind.
    pub async fn build(
        &self,
        cluster: &ClusterIdentity,
        seed: RebuildSeed,
        cancel: &CancellationToken,
    ) -> Result<Arc<ClusterRuntime>, CoreError> {
        let timeout = self.config.operation_timeout;
        let built = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(CoreError::Cancelled { cluster: cluster.clone() });
            }
            r = tokio::time::timeout(
                timeout,
                self.factory.build(cluster.kubeconfig(), cluster.context()),
            ) => r,
        };

        let client = match built {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                return Err(CoreError::RebuildFailed {
                    cluster: cluster.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CoreError::Timeout {
                    cluster: cluster.clone(),
                    operation: "client build".into(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled {
                cluster: cluster.clone(),
            });
        }

        let auth = AuthStateManager::new(
            cluster.clone(),
            self.config.recovery.clone(),
            Arc::clone(&client),
            self.events.clone(),
        );
        if let Some(reason) = seed.resume_invalid {
            auth.resume_invalid(reason);
        }
        let transport = TransportFailureTracker::new(
            cluster.clone(),
            self.config.transport,
            self.events.clone(),
            Arc::clone(&self.requester),
        )
        .with_last_rebuild(seed.last_transport_rebuild);

        debug!(cluster = %cluster, "runtime built");
        Ok(Arc::new(ClusterRuntime::new(
            cluster.clone(),
            client,
            auth,
            transport,
            self.config.request_timeout,
            self.config.health_interval,
        )))
    }

    // ── Map mutation (caller holds the change lock) ──────────────────

    /// Remove one runtime from the map without tearing it down.
    pub(crate) fn detach(&self, cluster: &ClusterIdentity) -> Option<Arc<ClusterRuntime>> {
        let current = self.map.load_full();
        let existing = current.get(cluster).cloned()?;
        let mut next = (*current).clone();
        next.remove(cluster);
        self.map.store(Arc::new(next));
        Some(existing)
    }

    /// Install one runtime, returning whatever it replaced.
    pub(crate) fn attach(&self, runtime: Arc<ClusterRuntime>) -> Option<Arc<ClusterRuntime>> {
        let mut next = (*self.map.load_full()).clone();
        let previous = next.insert(runtime.cluster().clone(), runtime);
        self.map.store(Arc::new(next));
        previous
    }

    /// Swap in a complete next-state map built by the caller.
    pub(crate) fn replace_all(&self, next: RuntimeMap) {
        self.map.store(Arc::new(next));
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Tear down a runtime that is no longer in the map.
    pub async fn teardown(&self, runtime: &ClusterRuntime) {
        runtime.shutdown(self.config.operation_timeout).await;
        info!(cluster = %runtime.cluster(), "cluster torn down");
    }
}
