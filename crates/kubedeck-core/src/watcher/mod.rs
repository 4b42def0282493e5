// ── Kubeconfig watcher ──
//
// notify thread ──accepted paths──▶ debounce ──batches──▶ reconcile loop
//
// Each batch re-scans every search location first. If that scan fails
// the batch is dropped without touching the selection; otherwise every
// selected cluster whose file changed is rebuilt, removed, or deferred
// according to `reconcile::plan_batch`.

mod debounce;
mod reconcile;
mod scan;
mod watch_set;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use arc_swap::ArcSwap;
use notify::{EventKind as FsEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::SelectionCoordinator;
use crate::error::CoreError;
use crate::events::{EventKind, RebuildCause};
use crate::model::ClusterIdentity;

pub use debounce::{MAX_DEBOUNCE, debounce};
pub use reconcile::{BatchPlan, FileVerdict, classify, plan_batch};
pub use scan::{ClusterScanner, FsScanner};
pub use watch_set::{WatchSet, is_editor_artifact};

const RAW_CHANNEL_SIZE: usize = 256;
const BATCH_CHANNEL_SIZE: usize = 16;

/// Result of reconciling one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The scan failed; nothing was changed or announced.
    Skipped { reason: String },
    Applied {
        available: usize,
        rebuilt: Vec<ClusterIdentity>,
        removed: Vec<ClusterIdentity>,
        deferred: Vec<ClusterIdentity>,
    },
}

/// Watches kubeconfig locations and feeds confirmed changes into the
/// coordinator. Cheaply cloneable.
#[derive(Clone)]
pub struct KubeconfigWatcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    coordinator: SelectionCoordinator,
    scanner: Arc<dyn ClusterScanner>,
    watch_set: Arc<ArcSwap<WatchSet>>,
    raw_tx: mpsc::Sender<PathBuf>,
    raw_rx: Mutex<Option<mpsc::Receiver<PathBuf>>>,
    fs_watcher: Mutex<Option<RecommendedWatcher>>,
    reconcile_lock: tokio::sync::Mutex<()>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for KubeconfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeconfigWatcher")
            .field("watch_set", &self.inner.watch_set.load())
            .finish_non_exhaustive()
    }
}

impl KubeconfigWatcher {
    pub fn new(
        coordinator: SelectionCoordinator,
        scanner: Arc<dyn ClusterScanner>,
        watch_set: WatchSet,
    ) -> Self {
        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_SIZE);
        Self {
            inner: Arc::new(WatcherInner {
                coordinator,
                scanner,
                watch_set: Arc::new(ArcSwap::from_pointee(watch_set)),
                raw_tx,
                raw_rx: Mutex::new(Some(raw_rx)),
                fs_watcher: Mutex::new(None),
                reconcile_lock: tokio::sync::Mutex::new(()),
                tasks: tokio::sync::Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn watch_set(&self) -> Arc<WatchSet> {
        self.inner.watch_set.load_full()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Scan once, then follow filesystem events. Calling it again is a
    /// no-op.
    pub async fn start(&self) -> Result<(), CoreError> {
        if !self.start_pipeline().await {
            return Ok(());
        }
        let watcher = self.spawn_fs_watcher()?;
        *self
            .inner
            .fs_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }

    /// Like [`start()`](Self::start) but without a filesystem watcher;
    /// changes arrive only through [`submit()`](Self::submit).
    pub async fn start_without_fs_events(&self) {
        self.start_pipeline().await;
    }

    /// Stop watching and wait for the pipeline tasks to exit.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        drop(
            self.inner
                .fs_watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("kubeconfig watcher stopped");
    }

    async fn start_pipeline(&self) -> bool {
        let Some(raw_rx) = self
            .inner
            .raw_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        if let Err(e) = self.refresh_available().await {
            warn!(error = %e, "initial kubeconfig scan failed");
        }

        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_SIZE);
        let delay = self.inner.coordinator.config().debounce;
        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(tokio::spawn(debounce(
            raw_rx,
            delay,
            self.inner.cancel.child_token(),
            batch_tx,
        )));
        tasks.push(tokio::spawn(reconcile_loop(
            Arc::downgrade(&self.inner),
            batch_rx,
            self.inner.cancel.child_token(),
        )));
        info!(directories = self.inner.watch_set.load().len(), "kubeconfig watcher started");
        true
    }

    fn spawn_fs_watcher(&self) -> Result<RecommendedWatcher, CoreError> {
        let tx = self.inner.raw_tx.clone();
        let watch_set = Arc::clone(&self.inner.watch_set);

        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if !is_content_change(event.kind) {
                        return;
                    }
                    let set = watch_set.load();
                    for path in event.paths {
                        if set.accepts(&path) && tx.blocking_send(path).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "kubeconfig watch error"),
            },
        )
        .map_err(|e| CoreError::Config {
            message: format!("cannot start file watcher: {e}"),
        })?;

        register(&mut watcher, &self.inner.watch_set.load());
        Ok(watcher)
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Replace the watched locations and re-scan.
    pub async fn configure(&self, watch_set: WatchSet) -> Result<usize, CoreError> {
        let previous = self.inner.watch_set.swap(Arc::new(watch_set));
        {
            let mut guard = self
                .inner
                .fs_watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(watcher) = guard.as_mut() {
                for dir in previous.directories() {
                    if let Err(e) = watcher.unwatch(dir) {
                        debug!(dir = %dir.display(), error = %e, "unwatch failed");
                    }
                }
                register(watcher, &self.inner.watch_set.load());
            }
        }
        info!(directories = self.inner.watch_set.load().len(), "watch set reconfigured");
        self.refresh_available().await
    }

    /// Queue a changed path as if the filesystem had reported it. Returns
    /// `false` when the path is outside the watch set.
    pub async fn submit(&self, path: PathBuf) -> bool {
        if !self.inner.watch_set.load().accepts(&path) {
            return false;
        }
        self.inner.raw_tx.send(path).await.is_ok()
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// Re-scan and publish the available list.
    pub async fn refresh_available(&self) -> Result<usize, CoreError> {
        let watch_set = self.inner.watch_set.load_full();
        let fresh = self.inner.scanner.scan(&watch_set).await?;
        let count = fresh.len();
        self.inner.coordinator.set_available(fresh).await;
        self.inner
            .coordinator
            .events()
            .emit_global(EventKind::AvailableClustersChanged { count });
        Ok(count)
    }

    /// Apply one batch of changed paths.
    pub async fn reconcile(&self, changed: &BTreeSet<PathBuf>) -> ReconcileOutcome {
        WatcherInner::reconcile(&self.inner, changed).await
    }
}

impl WatcherInner {
    async fn reconcile(this: &Arc<Self>, changed: &BTreeSet<PathBuf>) -> ReconcileOutcome {
        let _serial = this.reconcile_lock.lock().await;
        debug!(paths = changed.len(), "reconciling kubeconfig changes");

        let watch_set = this.watch_set.load_full();
        let fresh = match this.scanner.scan(&watch_set).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "kubeconfig scan failed, batch skipped");
                return ReconcileOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let available = fresh.len();
        let selected = this.coordinator.selected().await;
        let plan = plan_batch(&selected, changed, &fresh).await;

        this.coordinator.set_available(fresh).await;
        this.coordinator
            .events()
            .emit_global(EventKind::AvailableClustersChanged { count: available });

        for (cluster, reason) in &plan.deferred {
            info!(cluster = %cluster, reason = %reason, "kubeconfig unreadable, deferring");
        }

        let mut removed = Vec::new();
        if !plan.remove.is_empty() {
            for (cluster, reason) in &plan.remove {
                info!(cluster = %cluster, reason = %reason, "cluster confirmed gone");
            }
            let ids: Vec<ClusterIdentity> = plan.remove.iter().map(|(id, _)| id.clone()).collect();
            match this
                .coordinator
                .deselect(&ids, "removed from kubeconfig")
                .await
            {
                Ok(report) => removed = report.removed,
                Err(e) => warn!(error = %e, "deselect after kubeconfig change failed"),
            }
        }

        let mut jobs = JoinSet::new();
        for cluster in plan.rebuild.iter().cloned() {
            let coordinator = this.coordinator.clone();
            jobs.spawn(async move {
                let result = coordinator
                    .rebuild(&cluster, RebuildCause::KubeconfigChanged, "kubeconfig changed")
                    .await;
                (cluster, result)
            });
        }
        let mut rebuilt = Vec::new();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((cluster, Ok(()))) => rebuilt.push(cluster),
                Ok((cluster, Err(e))) => {
                    debug!(cluster = %cluster, error = %e, "rebuild after kubeconfig change did not install");
                }
                Err(e) => warn!(error = %e, "rebuild task did not complete"),
            }
        }
        rebuilt.sort();

        ReconcileOutcome::Applied {
            available,
            rebuilt,
            removed,
            deferred: plan.deferred.into_iter().map(|(id, _)| id).collect(),
        }
    }
}

async fn reconcile_loop(
    inner: Weak<WatcherInner>,
    mut batches: mpsc::Receiver<BTreeSet<PathBuf>>,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        WatcherInner::reconcile(&inner, &batch).await;
    }
}

fn is_content_change(kind: FsEventKind) -> bool {
    matches!(
        kind,
        FsEventKind::Any | FsEventKind::Create(_) | FsEventKind::Modify(_) | FsEventKind::Remove(_)
    )
}

fn register(watcher: &mut RecommendedWatcher, watch_set: &WatchSet) {
    for dir in watch_set.directories() {
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            warn!(dir = %dir.display(), error = %e, "cannot watch directory");
        }
    }
}
