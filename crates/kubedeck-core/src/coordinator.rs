// ── Selection coordinator ──
//
// Applies "connect to exactly these clusters" requests in three phases:
//
//   Diff    short critical section: mint a generation, compute add/remove
//   Work    parallel per-cluster builds, no broad lock held, each job
//           bound to the generation's cancellation token
//   Commit  short critical section: drop stale generations wholesale,
//           persist, then swap in the next runtime map
//
// Every other mutation of the committed set (watcher reconnects, auth
// retries, transport rebuilds) goes through the same change lock.
//
// Lock order: change → selection → cluster key → settings. The cluster
// key is never held while waiting for the change lock.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kubedeck_kube::ClientFactory;

use crate::auth::AuthState;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::{Event, EventBus, EventKind, RebuildCause, SelectionChange};
use crate::model::{ClusterIdentity, ClusterStatus};
use crate::runtime::{ClusterLocks, ClusterRuntime, RebuildSeed, RuntimeMap, RuntimeRegistry};
use crate::store::SelectionStore;
use crate::transport::RebuildRequester;

// ── Reports ─────────────────────────────────────────────────────────

/// One cluster that could not be added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionFailure {
    pub cluster: ClusterIdentity,
    pub reason: String,
}

/// Outcome of one committed selection batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionReport {
    pub generation: u64,
    pub added: Vec<ClusterIdentity>,
    pub removed: Vec<ClusterIdentity>,
    pub kept: Vec<ClusterIdentity>,
    pub failed: Vec<SelectionFailure>,
}

// ── Internal state ──────────────────────────────────────────────────

/// Everything guarded by the change lock.
struct ChangeState {
    generation: u64,
    token: CancellationToken,
    /// Latest requested selection, committed or not.
    target: Vec<ClusterIdentity>,
    /// Bumped whenever a cluster's committed runtime changes.
    epochs: HashMap<ClusterIdentity, u64>,
    /// In-flight rebuilds, cancelled when the cluster's epoch moves on.
    rebuilds: HashMap<ClusterIdentity, CancellationToken>,
}

impl ChangeState {
    fn epoch(&self, cluster: &ClusterIdentity) -> u64 {
        self.epochs.get(cluster).copied().unwrap_or(0)
    }

    fn bump(&mut self, cluster: &ClusterIdentity) -> u64 {
        if let Some(token) = self.rebuilds.remove(cluster) {
            token.cancel();
        }
        let epoch = self.epochs.entry(cluster.clone()).or_insert(0);
        *epoch += 1;
        *epoch
    }
}

/// Read-mostly snapshots guarded by the selection lock.
#[derive(Default)]
struct SelectionSnapshot {
    available: Arc<Vec<ClusterIdentity>>,
    selected: Arc<Vec<ClusterIdentity>>,
    target: Arc<Vec<ClusterIdentity>>,
}

enum Request {
    Replace(Vec<ClusterIdentity>),
    Remove(Vec<ClusterIdentity>),
}

type BuildResult = (ClusterIdentity, Result<Arc<ClusterRuntime>, String>);

struct CommitPlan {
    next: RuntimeMap,
    fresh: Vec<Arc<ClusterRuntime>>,
    retired: Vec<Arc<ClusterRuntime>>,
    failed: Vec<SelectionFailure>,
}

struct CoordinatorInner {
    config: Arc<CoreConfig>,
    registry: RuntimeRegistry,
    keys: ClusterLocks,
    change: Mutex<ChangeState>,
    selection: RwLock<SelectionSnapshot>,
    store: Arc<dyn SelectionStore>,
    events: EventBus,
    failures: DashMap<ClusterIdentity, String>,
    shutdown: CancellationToken,
}

// ── Coordinator ─────────────────────────────────────────────────────

/// The authoritative owner of every cluster runtime.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`.
#[derive(Clone)]
pub struct SelectionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for SelectionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionCoordinator")
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl SelectionCoordinator {
    pub fn new(
        config: CoreConfig,
        factory: Arc<dyn ClientFactory>,
        store: Arc<dyn SelectionStore>,
    ) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new(config.event_capacity);
        let shutdown = CancellationToken::new();

        let inner = Arc::new_cyclic(|weak: &Weak<CoordinatorInner>| {
            let requester: Arc<dyn RebuildRequester> = Arc::new(CoordinatorLink {
                inner: weak.clone(),
            });
            CoordinatorInner {
                registry: RuntimeRegistry::new(
                    factory,
                    Arc::clone(&config),
                    events.clone(),
                    requester,
                ),
                keys: ClusterLocks::new(),
                change: Mutex::new(ChangeState {
                    generation: 0,
                    token: shutdown.child_token(),
                    target: Vec::new(),
                    epochs: HashMap::new(),
                    rebuilds: HashMap::new(),
                }),
                selection: RwLock::new(SelectionSnapshot::default()),
                store,
                events,
                failures: DashMap::new(),
                shutdown,
                config,
            }
        });

        Self { inner }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<Event>> {
        self.inner.events.subscribe()
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Identities found by the latest successful scan.
    pub async fn available(&self) -> Arc<Vec<ClusterIdentity>> {
        Arc::clone(&self.inner.selection.read().await.available)
    }

    /// Committed selection.
    pub async fn selected(&self) -> Arc<Vec<ClusterIdentity>> {
        Arc::clone(&self.inner.selection.read().await.selected)
    }

    pub async fn is_selected(&self, cluster: &ClusterIdentity) -> bool {
        self.inner
            .selection
            .read()
            .await
            .selected
            .contains(cluster)
    }

    /// The live runtime for a committed cluster.
    pub fn runtime(&self, cluster: &ClusterIdentity) -> Option<Arc<ClusterRuntime>> {
        self.inner.registry.get(cluster)
    }

    pub fn runtimes(&self) -> Arc<RuntimeMap> {
        self.inner.registry.snapshot()
    }

    pub async fn status(&self, cluster: &ClusterIdentity) -> Result<ClusterStatus, CoreError> {
        if let Some(runtime) = self.inner.registry.get(cluster) {
            return Ok(runtime.status());
        }
        if let Some(reason) = self.inner.failures.get(cluster) {
            return Ok(ClusterStatus::Failed {
                reason: reason.value().clone(),
            });
        }
        let snapshot = self.inner.selection.read().await;
        if snapshot.selected.contains(cluster) || snapshot.target.contains(cluster) {
            return Ok(ClusterStatus::Pending);
        }
        Err(CoreError::UnknownCluster {
            cluster: cluster.clone(),
        })
    }

    /// Status of every selected or requested cluster, in request order.
    pub async fn statuses(&self) -> Vec<(ClusterIdentity, ClusterStatus)> {
        let ids: Vec<ClusterIdentity> = {
            let snapshot = self.inner.selection.read().await;
            let mut ids = snapshot.target.to_vec();
            for id in snapshot.selected.iter() {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            ids
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(status) = self.status(&id).await {
                out.push((id, status));
            }
        }
        out
    }

    /// Replace the available list after a successful scan.
    pub async fn set_available(&self, clusters: Vec<ClusterIdentity>) {
        self.inner.selection.write().await.available = Arc::new(clusters);
    }

    // ── Selection changes ────────────────────────────────────────────

    /// Make `requested` the selection. A newer request cancels this one;
    /// the superseded call returns [`CoreError::Superseded`].
    pub async fn select(&self, requested: Vec<ClusterIdentity>) -> Result<SelectionReport, CoreError> {
        self.apply(Request::Replace(requested)).await
    }

    /// Remove clusters from the latest requested selection.
    pub async fn deselect(
        &self,
        clusters: &[ClusterIdentity],
        reason: &str,
    ) -> Result<SelectionReport, CoreError> {
        let report = self.apply(Request::Remove(clusters.to_vec())).await?;
        for id in report.removed.iter().filter(|id| clusters.contains(id)) {
            info!(cluster = %id, reason, "cluster removed");
            self.inner.events.emit(
                id,
                EventKind::ClusterRemoved {
                    reason: reason.to_owned(),
                },
            );
        }
        Ok(report)
    }

    /// Feed the persisted selection through a normal request.
    pub async fn restore(&self) -> Result<SelectionReport, CoreError> {
        let saved = self.inner.store.load_selection().await?;
        info!(clusters = saved.len(), "restoring saved selection");
        self.select(saved).await
    }

    #[allow(clippy::too_many_lines)]
    async fn apply(&self, request: Request) -> Result<SelectionReport, CoreError> {
        // ── Diff ──
        let (generation, token, requested, to_add, to_remove, kept) = {
            let mut change = self.inner.change.lock().await;
            let requested = match request {
                Request::Replace(ids) => dedup(ids),
                Request::Remove(ids) => change
                    .target
                    .iter()
                    .filter(|id| !ids.contains(id))
                    .cloned()
                    .collect(),
            };

            change.generation += 1;
            change.token.cancel();
            change.token = self.inner.shutdown.child_token();
            change.target.clone_from(&requested);

            let live = self.inner.registry.snapshot();
            let mut snapshot = self.inner.selection.write().await;
            snapshot.target = Arc::new(requested.clone());

            let (kept, to_add): (Vec<_>, Vec<_>) = requested
                .iter()
                .cloned()
                .partition(|id| live.contains_key(id));
            let mut to_remove: Vec<ClusterIdentity> = Vec::new();
            for id in snapshot.selected.iter().chain(live.keys()) {
                if !requested.contains(id) && !to_remove.contains(id) {
                    to_remove.push(id.clone());
                }
            }

            (
                change.generation,
                change.token.clone(),
                requested,
                to_add,
                to_remove,
                kept,
            )
        };

        info!(
            generation,
            add = to_add.len(),
            remove = to_remove.len(),
            keep = kept.len(),
            "selection change"
        );

        // ── Work ──
        let results = self.build_all(&to_add, &token).await;

        // Optimistic plan outside the lock; redone only if the map moved.
        let base = self.inner.registry.snapshot();
        let mut plan = plan_commit(&base, &to_remove, &results);

        // ── Commit ──
        let mut change = self.inner.change.lock().await;
        if change.generation != generation {
            let current = change.generation;
            drop(change);
            debug!(generation, current, "selection superseded, discarding results");
            self.teardown_all(plan.fresh).await;
            return Err(CoreError::Superseded {
                generation,
                current,
            });
        }

        let current = self.inner.registry.snapshot();
        if !Arc::ptr_eq(&base, &current) {
            plan = plan_commit(&current, &to_remove, &results);
        }

        let next_selected: Vec<ClusterIdentity> = requested
            .iter()
            .filter(|id| !plan.failed.iter().any(|f| &f.cluster == *id))
            .cloned()
            .collect();

        if let Err(e) = self.inner.store.save_selection(&next_selected).await {
            let committed = self.inner.selection.read().await.selected.to_vec();
            change.target.clone_from(&committed);
            self.inner.selection.write().await.target = Arc::new(committed);
            drop(change);
            error!(generation, error = %e, "selection not persisted, batch abandoned");
            self.teardown_all(plan.fresh).await;
            return Err(CoreError::ReconciliationFailed {
                reason: e.to_string(),
            });
        }

        self.inner.registry.replace_all(plan.next);
        let added: Vec<ClusterIdentity> = plan.fresh.iter().map(|rt| rt.cluster().clone()).collect();
        for id in added.iter().chain(to_remove.iter()) {
            change.bump(id);
        }
        self.inner.selection.write().await.selected = Arc::new(next_selected);
        for runtime in &plan.fresh {
            runtime.start_background();
        }
        drop(change);

        // ── After commit ──
        for id in added.iter().chain(to_remove.iter()) {
            self.inner.failures.remove(id);
        }
        for failure in &plan.failed {
            self.inner
                .failures
                .insert(failure.cluster.clone(), failure.reason.clone());
        }

        self.teardown_all(plan.retired).await;
        self.inner.keys.prune(|id| self.inner.registry.contains(id));

        for id in &added {
            self.inner.events.emit(
                id,
                EventKind::SelectionApplied {
                    change: SelectionChange::Added,
                    error: None,
                },
            );
        }
        for id in &to_remove {
            self.inner.events.emit(
                id,
                EventKind::SelectionApplied {
                    change: SelectionChange::Removed,
                    error: None,
                },
            );
        }
        for failure in &plan.failed {
            warn!(cluster = %failure.cluster, reason = %failure.reason, "cluster could not be added");
            self.inner.events.emit(
                &failure.cluster,
                EventKind::SelectionApplied {
                    change: SelectionChange::Failed,
                    error: Some(failure.reason.clone()),
                },
            );
        }

        info!(
            generation,
            added = added.len(),
            removed = to_remove.len(),
            failed = plan.failed.len(),
            "selection committed"
        );

        Ok(SelectionReport {
            generation,
            added,
            removed: to_remove,
            kept,
            failed: plan.failed,
        })
    }

    /// Build every identity in parallel, bounded by `max_parallel`, each
    /// under its cluster key.
    async fn build_all(
        &self,
        ids: &[ClusterIdentity],
        token: &CancellationToken,
    ) -> Vec<BuildResult> {
        let limiter = Arc::new(Semaphore::new(self.inner.config.max_parallel.max(1)));
        let mut jobs = JoinSet::new();

        for id in ids {
            let inner = Arc::clone(&self.inner);
            let limiter = Arc::clone(&limiter);
            let token = token.clone();
            let id = id.clone();
            jobs.spawn(async move {
                let result = build_one(&inner, &id, &limiter, &token)
                    .await
                    .map_err(|e| e.to_string());
                (id, result)
            });
        }

        let mut results: Vec<BuildResult> = Vec::with_capacity(ids.len());
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "selection job did not complete"),
            }
        }
        for id in ids {
            if !results.iter().any(|(done, _)| done == id) {
                results.push((id.clone(), Err("job did not complete".into())));
            }
        }
        results
    }

    // ── Rebuild ──────────────────────────────────────────────────────

    /// Tear down and rebuild one selected cluster from its kubeconfig as
    /// it is on disk now. Other clusters are untouched.
    ///
    /// On failure the cluster stays selected but absent, with its error
    /// visible through [`status()`](Self::status).
    pub async fn rebuild(
        &self,
        cluster: &ClusterIdentity,
        cause: RebuildCause,
        reason: &str,
    ) -> Result<(), CoreError> {
        self.rebuild_with(cluster, cause, reason, None).await
    }

    /// Manual authentication retry.
    ///
    /// An Invalid cluster is rebuilt from fresh credentials and its new
    /// manager starts recovery with a fresh attempt counter. A cluster
    /// left absent by a failed rebuild is rebuilt. Returns `false` when
    /// there was nothing to retry.
    pub async fn retry_auth(&self, cluster: &ClusterIdentity) -> Result<bool, CoreError> {
        if let Some(runtime) = self.inner.registry.get(cluster) {
            if runtime.auth().state() != AuthState::Invalid {
                return Ok(false);
            }
            let reason = runtime
                .auth()
                .reason()
                .unwrap_or_else(|| "credentials rejected".into());
            self.rebuild_with(cluster, RebuildCause::CredentialRetry, "manual retry", Some(reason))
                .await?;
            return Ok(true);
        }

        if !self.is_selected(cluster).await {
            return Err(CoreError::UnknownCluster {
                cluster: cluster.clone(),
            });
        }
        self.rebuild_with(cluster, RebuildCause::CredentialRetry, "manual retry", None)
            .await?;
        Ok(true)
    }

    async fn rebuild_with(
        &self,
        cluster: &ClusterIdentity,
        cause: RebuildCause,
        reason: &str,
        resume_invalid: Option<String>,
    ) -> Result<(), CoreError> {
        info!(cluster = %cluster, %cause, reason, "rebuild requested");
        let retry_auth = resume_invalid.is_some();

        // Detach under the change lock.
        let (epoch, previous, token) = {
            let mut change = self.inner.change.lock().await;
            if !self.inner.selection.read().await.selected.contains(cluster) {
                return Err(CoreError::UnknownCluster {
                    cluster: cluster.clone(),
                });
            }
            let previous = self.inner.registry.detach(cluster);
            let epoch = change.bump(cluster);
            let token = self.inner.shutdown.child_token();
            change.rebuilds.insert(cluster.clone(), token.clone());
            (epoch, previous, token)
        };

        // Teardown and build under the cluster key only.
        let built = {
            let _key = self.inner.keys.acquire(cluster).await;
            let seed = RebuildSeed {
                last_transport_rebuild: previous
                    .as_ref()
                    .and_then(|rt| rt.transport().last_rebuild()),
                resume_invalid,
            };
            if let Some(previous) = &previous {
                self.inner.registry.teardown(previous).await;
            }
            self.inner.registry.build(cluster, seed, &token).await
        };

        // Install only if nothing newer happened to this cluster meanwhile.
        let mut change = self.inner.change.lock().await;
        let current = change.epoch(cluster) == epoch
            && self.inner.selection.read().await.selected.contains(cluster);

        match built {
            Ok(runtime) if current => {
                change.rebuilds.remove(cluster);
                let replaced = self.inner.registry.attach(Arc::clone(&runtime));
                runtime.start_background();
                if retry_auth {
                    runtime.auth().trigger_retry();
                }
                drop(change);

                self.inner.failures.remove(cluster);
                if let Some(replaced) = replaced {
                    self.inner.registry.teardown(&replaced).await;
                }
                info!(cluster = %cluster, %cause, "cluster rebuilt");
                self.inner
                    .events
                    .emit(cluster, EventKind::Rebuilt { cause });
                Ok(())
            }
            Ok(runtime) => {
                drop(change);
                debug!(cluster = %cluster, "rebuild superseded, discarding");
                self.inner.registry.teardown(&runtime).await;
                Err(CoreError::Cancelled {
                    cluster: cluster.clone(),
                })
            }
            Err(e) if current => {
                change.rebuilds.remove(cluster);
                drop(change);
                warn!(cluster = %cluster, %cause, error = %e, "rebuild failed");
                self.inner.failures.insert(cluster.clone(), e.to_string());
                self.inner.events.emit(
                    cluster,
                    EventKind::RebuildFailed {
                        cause,
                        reason: e.to_string(),
                    },
                );
                Err(e)
            }
            Err(e) => {
                drop(change);
                debug!(cluster = %cluster, error = %e, "superseded rebuild failed");
                Err(e)
            }
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Tear down runtimes already out of the map, in parallel, each under
    /// its cluster key.
    async fn teardown_all(&self, runtimes: Vec<Arc<ClusterRuntime>>) {
        if runtimes.is_empty() {
            return;
        }
        let mut jobs = JoinSet::new();
        for runtime in runtimes {
            let inner = Arc::clone(&self.inner);
            jobs.spawn(async move {
                let _key = inner.keys.acquire(runtime.cluster()).await;
                inner.registry.teardown(&runtime).await;
            });
        }
        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "teardown did not complete");
            }
        }
    }

    /// Cancel in-flight work and tear down every runtime. The persisted
    /// selection is left as it is so the next start restores it.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let runtimes: Vec<Arc<ClusterRuntime>> = {
            let mut change = self.inner.change.lock().await;
            change.generation += 1;
            change.token.cancel();
            let all = self.inner.registry.snapshot();
            for id in all.keys() {
                change.bump(id);
            }
            self.inner.registry.replace_all(HashMap::new());
            all.values().cloned().collect()
        };
        self.teardown_all(runtimes).await;
        info!("coordinator shut down");
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn build_one(
    inner: &CoordinatorInner,
    cluster: &ClusterIdentity,
    limiter: &Arc<Semaphore>,
    token: &CancellationToken,
) -> Result<Arc<ClusterRuntime>, CoreError> {
    let cancelled = || CoreError::Cancelled {
        cluster: cluster.clone(),
    };

    let _permit = tokio::select! {
        biased;
        () = token.cancelled() => return Err(cancelled()),
        permit = Arc::clone(limiter).acquire_owned() => permit
            .map_err(|_| CoreError::Internal("job limiter closed".into()))?,
    };
    let _key = tokio::select! {
        biased;
        () = token.cancelled() => return Err(cancelled()),
        key = inner.keys.acquire(cluster) => key,
    };
    inner
        .registry
        .build(cluster, RebuildSeed::default(), token)
        .await
}

fn plan_commit(
    base: &RuntimeMap,
    to_remove: &[ClusterIdentity],
    results: &[BuildResult],
) -> CommitPlan {
    let mut next = base.clone();
    let mut retired = Vec::new();
    let mut fresh = Vec::new();
    let mut failed = Vec::new();

    for id in to_remove {
        if let Some(runtime) = next.remove(id) {
            retired.push(runtime);
        }
    }
    for (id, result) in results {
        match result {
            Ok(runtime) => {
                if let Some(previous) = next.insert(id.clone(), Arc::clone(runtime)) {
                    retired.push(previous);
                }
                fresh.push(Arc::clone(runtime));
            }
            Err(reason) => failed.push(SelectionFailure {
                cluster: id.clone(),
                reason: reason.clone(),
            }),
        }
    }

    CommitPlan {
        next,
        fresh,
        retired,
        failed,
    }
}

fn dedup(ids: Vec<ClusterIdentity>) -> Vec<ClusterIdentity> {
    let mut out: Vec<ClusterIdentity> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

// ── Rebuild requests from trackers ──────────────────────────────────

/// Weak link handed to every transport tracker so runtimes never keep
/// the coordinator alive.
struct CoordinatorLink {
    inner: Weak<CoordinatorInner>,
}

#[async_trait]
impl RebuildRequester for CoordinatorLink {
    async fn request_rebuild(
        &self,
        cluster: ClusterIdentity,
        cause: RebuildCause,
        reason: String,
    ) -> Result<(), CoreError> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        SelectionCoordinator { inner }
            .rebuild(&cluster, cause, &reason)
            .await
    }
}
