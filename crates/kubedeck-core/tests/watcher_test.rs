#![allow(clippy::unwrap_used)]
// Integration tests for `KubeconfigWatcher` reconciliation.

mod common;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use kubedeck_core::{
    ClusterIdentity, ClusterScanner, EventKind, FsScanner, KubeconfigWatcher,
    MemorySelectionStore, ReconcileOutcome, SelectionStore, WatchSet,
};

use common::{CountingScanner, FakeFactory, coordinator, drain, id};

const TWO_CONTEXTS: &str = "\
apiVersion: v1
kind: Config
current-context: a
contexts:
- name: a
  context: {cluster: one, user: one}
- name: b
  context: {cluster: two, user: two}
";

const ONLY_A: &str = "\
apiVersion: v1
kind: Config
contexts:
- name: a
  context: {cluster: one, user: one}
";

fn memory_store() -> Arc<dyn SelectionStore> {
    Arc::new(MemorySelectionStore::default())
}

fn changed(path: &Path) -> BTreeSet<PathBuf> {
    BTreeSet::from([path.to_path_buf()])
}

// ── Reconciliation against real files ───────────────────────────────

#[tokio::test]
async fn file_edits_rebuild_defer_or_remove_per_context() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config");
    std::fs::write(&config, TWO_CONTEXTS).unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let a = ClusterIdentity::new(root.join("config"), "a");
    let b = ClusterIdentity::new(root.join("config"), "b");

    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    let mut watch = WatchSet::new();
    watch.watch_directory(dir.path());
    let watcher = KubeconfigWatcher::new(coord.clone(), Arc::new(FsScanner), watch);

    assert_eq!(watcher.refresh_available().await.unwrap(), 2);
    coord.select(vec![a.clone(), b.clone()]).await.unwrap();
    let a_before = coord.runtime(&a).unwrap();

    // A change elsewhere touches nothing.
    let other = dir.path().join("unrelated");
    std::fs::write(&other, ONLY_A).unwrap();
    let outcome = watcher.reconcile(&changed(&other)).await;
    assert!(matches!(
        outcome,
        ReconcileOutcome::Applied { ref rebuilt, ref removed, .. }
            if rebuilt.is_empty() && removed.is_empty()
    ));
    std::fs::remove_file(&other).unwrap();

    // Truncated mid-write: both clusters are left alone.
    std::fs::write(&config, "contexts:\n- name: [a\n").unwrap();
    let outcome = watcher.reconcile(&changed(&config)).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            available: 0,
            rebuilt: vec![],
            removed: vec![],
            deferred: vec![a.clone(), b.clone()],
        }
    );
    assert!(Arc::ptr_eq(&a_before, &coord.runtime(&a).unwrap()));
    assert_eq!(*coord.selected().await, vec![a.clone(), b.clone()]);

    // Rewritten without `b`: `a` is rebuilt, `b` is removed.
    std::fs::write(&config, ONLY_A).unwrap();
    let outcome = watcher.reconcile(&changed(&config)).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            available: 1,
            rebuilt: vec![a.clone()],
            removed: vec![b.clone()],
            deferred: vec![],
        }
    );
    assert_eq!(factory.builds(&a), 2);
    assert!(a_before.is_shut_down());
    assert_eq!(*coord.selected().await, vec![a.clone()]);

    // Deleted: `a` goes too.
    std::fs::remove_file(&config).unwrap();
    let outcome = watcher.reconcile(&changed(&config)).await;
    assert!(matches!(
        outcome,
        ReconcileOutcome::Applied { ref removed, .. } if removed == &vec![a.clone()]
    ));
    assert!(coord.selected().await.is_empty());
    assert!(coord.runtimes().is_empty());
}

#[tokio::test]
async fn file_cut_off_before_its_contexts_is_deferred() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config");
    std::fs::write(&config, TWO_CONTEXTS).unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    let a = ClusterIdentity::new(root.join("config"), "a");

    let factory = FakeFactory::new();
    let store = Arc::new(MemorySelectionStore::default());
    let coord = coordinator(&factory, Arc::clone(&store) as Arc<dyn SelectionStore>);
    let mut watch = WatchSet::new();
    watch.watch_directory(dir.path());
    let watcher = KubeconfigWatcher::new(coord.clone(), Arc::new(FsScanner), watch);

    watcher.refresh_available().await.unwrap();
    coord.select(vec![a.clone()]).await.unwrap();
    let a_before = coord.runtime(&a).unwrap();

    std::fs::write(&config, "apiVersion: v1\nkind: Config\ncurrent-context: a\n").unwrap();
    let outcome = watcher.reconcile(&changed(&config)).await;

    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            available: 0,
            rebuilt: vec![],
            removed: vec![],
            deferred: vec![a.clone()],
        }
    );
    assert_eq!(*coord.selected().await, vec![a.clone()]);
    assert_eq!(store.load_selection().await.unwrap(), vec![a.clone()]);
    assert!(Arc::ptr_eq(&a_before, &coord.runtime(&a).unwrap()));
}

#[tokio::test]
async fn failed_scan_skips_the_batch() {
    let scanner = CountingScanner::new(vec![id("a")]);
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    let mut watch = WatchSet::new();
    watch.watch_file("/k/a");
    let watcher = KubeconfigWatcher::new(
        coord.clone(),
        Arc::clone(&scanner) as Arc<dyn ClusterScanner>,
        watch,
    );

    watcher.refresh_available().await.unwrap();
    coord.select(vec![id("a")]).await.unwrap();
    let mut rx = coord.subscribe();

    scanner.set_failing(true);
    let outcome = watcher.reconcile(&changed(Path::new("/k/a"))).await;

    assert!(matches!(outcome, ReconcileOutcome::Skipped { .. }));
    assert_eq!(*coord.available().await, vec![id("a")]);
    assert_eq!(*coord.selected().await, vec![id("a")]);
    assert_eq!(factory.builds(&id("a")), 1);
    assert!(drain(&mut rx).is_empty());
}

// ── Debounced pipeline ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn burst_of_changes_reconciles_once() {
    let scanner = CountingScanner::new(vec![id("a")]);
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    let mut watch = WatchSet::new();
    watch.watch_file("/k/a");
    let watcher = KubeconfigWatcher::new(
        coord.clone(),
        Arc::clone(&scanner) as Arc<dyn ClusterScanner>,
        watch,
    );

    watcher.start_without_fs_events().await;
    assert_eq!(scanner.calls(), 1);
    let mut rx = coord.subscribe();

    assert!(!watcher.submit(PathBuf::from("/k/a.swp")).await);
    assert!(!watcher.submit(PathBuf::from("/elsewhere/a")).await);
    for _ in 0..5 {
        assert!(watcher.submit(PathBuf::from("/k/a")).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(scanner.calls(), 2);
    let announced = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e.kind, EventKind::AvailableClustersChanged { .. }))
        .count();
    assert_eq!(announced, 1);

    watcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn selected_cluster_is_rebuilt_after_its_file_changes() {
    let scanner = CountingScanner::new(vec![id("a"), id("b")]);
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    let mut watch = WatchSet::new();
    watch.watch_file("/k/a");
    watch.watch_file("/k/b");
    let watcher = KubeconfigWatcher::new(
        coord.clone(),
        Arc::clone(&scanner) as Arc<dyn ClusterScanner>,
        watch,
    );
    coord.select(vec![id("a"), id("b")]).await.unwrap();

    watcher.start_without_fs_events().await;
    watcher.submit(PathBuf::from("/k/a")).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(factory.builds(&id("a")), 2);
    assert_eq!(factory.builds(&id("b")), 1);
    watcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn configure_replaces_the_watch_set_and_rescans() {
    let scanner = CountingScanner::new(vec![id("a")]);
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    let watcher = KubeconfigWatcher::new(
        coord.clone(),
        Arc::clone(&scanner) as Arc<dyn ClusterScanner>,
        WatchSet::new(),
    );

    let mut next = WatchSet::new();
    next.watch_file("/k/a");
    assert_eq!(watcher.configure(next.clone()).await.unwrap(), 1);

    assert_eq!(*watcher.watch_set(), next);
    assert_eq!(scanner.calls(), 1);
    assert_eq!(*coord.available().await, vec![id("a")]);
}

#[tokio::test]
async fn configure_survives_a_vanished_watched_directory() {
    let old = tempfile::tempdir().unwrap();
    let new = tempfile::tempdir().unwrap();
    std::fs::write(new.path().join("config"), ONLY_A).unwrap();

    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    let mut watch = WatchSet::new();
    watch.watch_directory(old.path());
    let watcher = KubeconfigWatcher::new(coord.clone(), Arc::new(FsScanner), watch);
    watcher.start().await.unwrap();

    let old_path = old.path().to_path_buf();
    old.close().unwrap();
    assert!(!old_path.exists());

    let mut next = WatchSet::new();
    next.watch_directory(new.path());
    assert_eq!(watcher.configure(next.clone()).await.unwrap(), 1);
    assert_eq!(*watcher.watch_set(), next);

    watcher.stop().await;
}
