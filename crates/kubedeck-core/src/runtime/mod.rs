// ── Per-cluster runtime state ──
//
// A `ClusterRuntime` owns everything derived for one committed identity:
// the client, its auth manager, its transport tracker and any background
// work. Nothing in here is shared with another identity. Runtimes are
// created and destroyed only through the registry.

mod locks;
mod registry;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kubedeck_kube::{ClusterClient, Error as KubeError, FailureKind};

use crate::auth::AuthStateManager;
use crate::error::CoreError;
use crate::model::{ClusterIdentity, ClusterStatus};
use crate::transport::TransportFailureTracker;

pub use locks::ClusterLocks;
pub use registry::{RebuildSeed, RuntimeMap, RuntimeRegistry};

/// Live state for one committed cluster.
pub struct ClusterRuntime {
    cluster: ClusterIdentity,
    client: Arc<dyn ClusterClient>,
    auth: AuthStateManager,
    transport: TransportFailureTracker,
    request_timeout: Duration,
    health_interval: Duration,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    built_at: Instant,
}

impl std::fmt::Debug for ClusterRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRuntime")
            .field("cluster", &self.cluster)
            .field("auth", &self.auth.state())
            .field("transport", &self.transport.connectivity())
            .finish_non_exhaustive()
    }
}

impl ClusterRuntime {
    pub(crate) fn new(
        cluster: ClusterIdentity,
        client: Arc<dyn ClusterClient>,
        auth: AuthStateManager,
        transport: TransportFailureTracker,
        request_timeout: Duration,
        health_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            client,
            auth,
            transport,
            request_timeout,
            health_interval,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            built_at: Instant::now(),
        }
    }

    pub fn cluster(&self) -> &ClusterIdentity {
        &self.cluster
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    pub fn auth(&self) -> &AuthStateManager {
        &self.auth
    }

    pub fn transport(&self) -> &TransportFailureTracker {
        &self.transport
    }

    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus::Connected {
            auth: self.auth.state(),
            connectivity: self.transport.connectivity(),
        }
    }

    // ── Wrapped calls ────────────────────────────────────────────────

    /// Run one request against this cluster.
    ///
    /// Blocked up front while credentials are Invalid. Bounded by the
    /// request timeout. Credential rejections go to the auth manager,
    /// transport failures to the tracker; any answer from the server
    /// counts as success for both.
    pub async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Arc<dyn ClusterClient>) -> Fut,
        Fut: Future<Output = Result<T, KubeError>>,
    {
        self.auth.check()?;
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled {
                cluster: self.cluster.clone(),
            });
        }

        let result = match tokio::time::timeout(self.request_timeout, f(Arc::clone(&self.client)))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(KubeError::Timeout {
                timeout_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(value) => {
                self.auth.report_success();
                self.transport.record_success();
                Ok(value)
            }
            Err(err) => {
                match err.kind() {
                    FailureKind::CredentialRejected => {
                        // The server answered, so the connection itself is fine.
                        self.transport.record_success();
                        self.auth.report_failure(&err.to_string());
                    }
                    FailureKind::Transport => {
                        self.transport.record_failure(&err.to_string());
                    }
                    FailureKind::Other => {
                        if matches!(err, KubeError::Api { .. }) {
                            self.auth.report_success();
                            self.transport.record_success();
                        }
                    }
                }
                debug!(cluster = %self.cluster, operation, error = %err, "cluster call failed");
                Err(CoreError::from_kube(&self.cluster, err))
            }
        }
    }

    /// Read-only reachability check through the wrapped call path.
    pub async fn probe(&self) -> Result<(), CoreError> {
        self.call("probe", |client| async move { client.probe().await })
            .await
    }

    // ── Background work ──────────────────────────────────────────────

    /// Start cluster-scoped background tasks. Called once the runtime is
    /// committed; a runtime that never commits never starts them.
    pub(crate) fn start_background(self: &Arc<Self>) {
        if self.health_interval.is_zero() || self.cancel.is_cancelled() {
            return;
        }
        let handle = tokio::spawn(health_task(
            Arc::downgrade(self),
            self.health_interval,
            self.cancel.clone(),
        ));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Teardown. Stops background work and recovery, waiting up to
    /// `grace` for tasks to exit before aborting them. Idempotent and safe
    /// on a runtime that never started anything.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.transport.close();
        self.auth.shutdown().await;

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for mut handle in handles {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(cluster = %self.cluster, "background task did not stop in time, aborting");
                handle.abort();
            }
        }
        debug!(cluster = %self.cluster, "runtime torn down");
    }
}

/// Periodic probe. Holds only a weak reference so a detached runtime is
/// never kept alive by its own health check.
async fn health_task(runtime: Weak<ClusterRuntime>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(runtime) = runtime.upgrade() else {
                    break;
                };
                if let Err(e) = runtime.probe().await {
                    debug!(cluster = %runtime.cluster, error = %e, "health probe failed");
                }
            }
        }
    }
}
