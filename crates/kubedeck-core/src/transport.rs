// ── Transport failure tracking ──
//
// Counts non-credential failures (connect, TLS, timeouts) per cluster
// and asks for a rebuild when they pile up. Independent of auth state:
// a cluster with good credentials can still be stuck on dead
// connections, and credential rejections never land here.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TransportPolicy;
use crate::error::CoreError;
use crate::events::{EventBus, EventKind, RebuildCause};
use crate::model::{ClusterIdentity, Connectivity};

/// Whoever owns the runtime map. The tracker only asks; the owner decides
/// whether the cluster is still selected and serializes the rebuild.
#[async_trait]
pub trait RebuildRequester: Send + Sync {
    async fn request_rebuild(
        &self,
        cluster: ClusterIdentity,
        cause: RebuildCause,
        reason: String,
    ) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Rebuilding,
    Closed,
}

#[derive(Debug)]
struct Inner {
    count: u32,
    last_failure: Option<Instant>,
    phase: Phase,
    connectivity: Connectivity,
    last_rebuild: Option<Instant>,
    rebuilds: u32,
}

struct Shared {
    cluster: ClusterIdentity,
    policy: TransportPolicy,
    events: EventBus,
    requester: Arc<dyn RebuildRequester>,
    inner: Mutex<Inner>,
}

/// Sliding-window transport failure counter for one cluster.
#[derive(Clone)]
pub struct TransportFailureTracker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransportFailureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportFailureTracker")
            .field("cluster", &self.shared.cluster)
            .field("inner", &*self.shared.lock())
            .finish_non_exhaustive()
    }
}

impl TransportFailureTracker {
    pub fn new(
        cluster: ClusterIdentity,
        policy: TransportPolicy,
        events: EventBus,
        requester: Arc<dyn RebuildRequester>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cluster,
                policy,
                events,
                requester,
                inner: Mutex::new(Inner {
                    count: 0,
                    last_failure: None,
                    phase: Phase::Idle,
                    connectivity: Connectivity::Healthy,
                    last_rebuild: None,
                    rebuilds: 0,
                }),
            }),
        }
    }

    /// Carry the cooldown over from the tracker this one replaces.
    pub fn with_last_rebuild(self, last_rebuild: Option<Instant>) -> Self {
        self.shared.lock().last_rebuild = last_rebuild;
        self
    }

    pub fn cluster(&self) -> &ClusterIdentity {
        &self.shared.cluster
    }

    pub fn failure_count(&self) -> u32 {
        self.shared.lock().count
    }

    pub fn connectivity(&self) -> Connectivity {
        self.shared.lock().connectivity
    }

    pub fn is_rebuilding(&self) -> bool {
        self.shared.lock().phase == Phase::Rebuilding
    }

    pub fn last_rebuild(&self) -> Option<Instant> {
        self.shared.lock().last_rebuild
    }

    /// Rebuilds this tracker has requested.
    pub fn rebuilds_requested(&self) -> u32 {
        self.shared.lock().rebuilds
    }

    /// Count one transport failure and request a rebuild once the
    /// threshold is reached, unless one is running or the cooldown since
    /// the last one has not elapsed. Suppressed failures still count.
    pub fn record_failure(&self, reason: &str) {
        let now = Instant::now();
        let mut inner = self.shared.lock();
        if inner.phase == Phase::Closed {
            return;
        }

        let idle_too_long = inner
            .last_failure
            .is_some_and(|last| now.duration_since(last) >= self.shared.policy.window);
        if idle_too_long {
            inner.count = 0;
        }
        inner.count = inner.count.saturating_add(1);
        inner.last_failure = Some(now);

        debug!(
            cluster = %self.shared.cluster,
            count = inner.count,
            reason,
            "transport failure"
        );

        if inner.count < self.shared.policy.threshold {
            return;
        }

        if inner.connectivity == Connectivity::Healthy {
            inner.connectivity = Connectivity::Degraded;
            warn!(cluster = %self.shared.cluster, failures = inner.count, "connectivity degraded");
            self.shared.events.emit(
                &self.shared.cluster,
                EventKind::ConnectivityDegraded {
                    failures: inner.count,
                    reason: reason.to_owned(),
                },
            );
        }

        if inner.phase != Phase::Idle {
            return;
        }
        let cooling_down = inner
            .last_rebuild
            .is_some_and(|last| now.duration_since(last) < self.shared.policy.cooldown);
        if cooling_down {
            debug!(cluster = %self.shared.cluster, "rebuild suppressed by cooldown");
            return;
        }

        inner.phase = Phase::Rebuilding;
        inner.last_rebuild = Some(now);
        inner.rebuilds += 1;
        drop(inner);

        info!(cluster = %self.shared.cluster, "requesting transport rebuild");
        let shared = Arc::clone(&self.shared);
        let reason = reason.to_owned();
        tokio::spawn(async move {
            let result = shared
                .requester
                .request_rebuild(
                    shared.cluster.clone(),
                    RebuildCause::TransportFailures,
                    reason,
                )
                .await;
            if let Err(e) = result {
                warn!(cluster = %shared.cluster, error = %e, "transport rebuild failed");
            }
            let mut inner = shared.lock();
            if inner.phase == Phase::Rebuilding {
                inner.phase = Phase::Idle;
            }
        });
    }

    /// A request completed; the connection is fine.
    pub fn record_success(&self) {
        let mut inner = self.shared.lock();
        inner.count = 0;
        inner.last_failure = None;
        if inner.connectivity == Connectivity::Degraded && inner.phase != Phase::Closed {
            inner.connectivity = Connectivity::Healthy;
            info!(cluster = %self.shared.cluster, "connectivity healthy");
            self.shared
                .events
                .emit(&self.shared.cluster, EventKind::ConnectivityHealthy);
        }
    }

    /// Stop requesting rebuilds. Used by teardown.
    pub fn close(&self) {
        self.shared.lock().phase = Phase::Closed;
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
