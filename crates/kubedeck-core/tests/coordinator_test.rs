#![allow(clippy::unwrap_used)]
// Integration tests for `SelectionCoordinator` with fake clients, on paused time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use kubedeck_core::{
    AuthState, ClusterStatus, CoreError, EventKind, MemorySelectionStore, RebuildCause,
    SelectionChange, SelectionStore,
};
use kubedeck_kube::Error as KubeError;

use common::{FakeFactory, FlakyStore, coordinator, drain, id, is_kind, next_matching};

fn memory_store() -> Arc<dyn SelectionStore> {
    Arc::new(MemorySelectionStore::default())
}

// ── Selection ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn select_connects_every_requested_cluster() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());

    let report = coord.select(vec![id("a"), id("b"), id("a")]).await.unwrap();

    assert_eq!(report.added.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(*coord.selected().await, vec![id("a"), id("b")]);
    assert!(coord.runtime(&id("a")).is_some());
    assert!(matches!(
        coord.status(&id("b")).await.unwrap(),
        ClusterStatus::Connected {
            auth: AuthState::Valid,
            ..
        }
    ));
    assert!(matches!(
        coord.status(&id("z")).await,
        Err(CoreError::UnknownCluster { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn kept_clusters_are_not_rebuilt() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());

    coord.select(vec![id("a"), id("b")]).await.unwrap();
    let a_before = coord.runtime(&id("a")).unwrap();

    let report = coord.select(vec![id("a"), id("c")]).await.unwrap();

    assert_eq!(report.kept, vec![id("a")]);
    assert_eq!(report.added, vec![id("c")]);
    assert_eq!(report.removed, vec![id("b")]);
    assert!(Arc::ptr_eq(&a_before, &coord.runtime(&id("a")).unwrap()));
    assert_eq!(factory.builds(&id("a")), 1);
    assert!(coord.runtime(&id("b")).is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_add_does_not_block_the_others() {
    let factory = FakeFactory::new();
    factory.fail(&id("x"), "exec plugin not found");
    let coord = coordinator(&factory, memory_store());
    let mut rx = coord.subscribe();

    let report = coord.select(vec![id("x"), id("y")]).await.unwrap();

    assert_eq!(report.added, vec![id("y")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].cluster, id("x"));
    assert_eq!(*coord.selected().await, vec![id("y")]);
    assert!(matches!(
        coord.status(&id("x")).await.unwrap(),
        ClusterStatus::Failed { reason } if reason.contains("exec plugin not found")
    ));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| is_kind(e, &id("x"), |k| matches!(
        k,
        EventKind::SelectionApplied {
            change: SelectionChange::Failed,
            error: Some(_)
        }
    ))));
}

#[tokio::test(start_paused = true)]
async fn restore_uses_the_persisted_selection() {
    let factory = FakeFactory::new();
    let store = Arc::new(MemorySelectionStore::new(vec![id("a"), id("b")]));
    let coord = coordinator(&factory, store);

    let report = coord.restore().await.unwrap();

    assert_eq!(report.added.len(), 2);
    assert_eq!(coord.runtimes().len(), 2);
}

// ── Supersession ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn newer_selection_supersedes_a_slow_one() {
    let factory = FakeFactory::new();
    factory.delay(&id("slow"), Duration::from_secs(5));
    let coord = coordinator(&factory, memory_store());

    let first = tokio::spawn({
        let coord = coord.clone();
        async move { coord.select(vec![id("slow")]).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = coord.select(vec![id("fast")]).await.unwrap();

    assert!(matches!(
        first.await.unwrap(),
        Err(CoreError::Superseded { .. })
    ));
    assert_eq!(second.added, vec![id("fast")]);
    assert_eq!(*coord.selected().await, vec![id("fast")]);
    assert!(coord.runtime(&id("slow")).is_none());
}

#[tokio::test(start_paused = true)]
async fn superseded_batch_discards_its_finished_builds() {
    let factory = FakeFactory::new();
    factory.delay(&id("slow"), Duration::from_secs(5));
    let coord = coordinator(&factory, memory_store());
    let mut rx = coord.subscribe();

    let first = tokio::spawn({
        let coord = coord.clone();
        async move { coord.select(vec![id("quick"), id("slow")]).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(factory.builds(&id("quick")), 1);

    coord.select(vec![id("other")]).await.unwrap();

    assert!(matches!(
        first.await.unwrap(),
        Err(CoreError::Superseded { .. })
    ));
    assert!(coord.runtime(&id("quick")).is_none());
    assert_eq!(*coord.selected().await, vec![id("other")]);
    assert!(drain(&mut rx).iter().all(|e| !is_kind(e, &id("quick"), |k| matches!(
        k,
        EventKind::SelectionApplied {
            change: SelectionChange::Added,
            ..
        }
    ))));
}

#[tokio::test(start_paused = true)]
async fn overlapping_selection_keeps_only_the_newer_batch() {
    let factory = FakeFactory::new();
    factory.delay(&id("b"), Duration::from_secs(5));
    let store = Arc::new(MemorySelectionStore::default());
    let coord = coordinator(&factory, Arc::clone(&store) as Arc<dyn SelectionStore>);
    let mut rx = coord.subscribe();

    let first = tokio::spawn({
        let coord = coord.clone();
        async move { coord.select(vec![id("a"), id("b")]).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(factory.builds(&id("a")), 1);

    let second = coord.select(vec![id("a"), id("c")]).await.unwrap();

    assert!(matches!(
        first.await.unwrap(),
        Err(CoreError::Superseded { .. })
    ));
    let mut added = second.added.clone();
    added.sort();
    assert_eq!(added, vec![id("a"), id("c")]);
    assert_eq!(factory.builds(&id("a")), 2);
    let a = coord.runtime(&id("a")).unwrap();
    assert!(!a.is_shut_down());
    assert!(coord.runtime(&id("b")).is_none());
    assert_eq!(*coord.selected().await, vec![id("a"), id("c")]);
    assert_eq!(store.load_selection().await.unwrap(), vec![id("a"), id("c")]);

    let events = drain(&mut rx);
    let added = |cluster: &str| {
        events
            .iter()
            .filter(|e| {
                is_kind(e, &id(cluster), |k| {
                    matches!(
                        k,
                        EventKind::SelectionApplied {
                            change: SelectionChange::Added,
                            ..
                        }
                    )
                })
            })
            .count()
    };
    assert_eq!(added("a"), 1);
    assert_eq!(added("b"), 0);
    assert!(events.iter().all(|e| !is_kind(e, &id("b"), |_| true)));
}

// ── Persistence failure ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unsaved_deselect_changes_nothing() {
    let factory = FakeFactory::new();
    let store = FlakyStore::new();
    let coord = coordinator(&factory, Arc::clone(&store) as Arc<dyn SelectionStore>);

    coord.select(vec![id("a"), id("b")]).await.unwrap();
    let a = coord.runtime(&id("a")).unwrap();

    store.set_failing(true);
    let err = coord.deselect(&[id("a")], "user request").await.unwrap_err();

    assert!(matches!(err, CoreError::ReconciliationFailed { .. }));
    assert_eq!(*coord.selected().await, vec![id("a"), id("b")]);
    assert!(Arc::ptr_eq(&a, &coord.runtime(&id("a")).unwrap()));
    assert!(!a.is_shut_down());
}

#[tokio::test(start_paused = true)]
async fn deselect_tears_down_and_notifies() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    coord.select(vec![id("a"), id("b")]).await.unwrap();
    let a = coord.runtime(&id("a")).unwrap();
    let mut rx = coord.subscribe();

    coord.deselect(&[id("a")], "user request").await.unwrap();

    assert!(a.is_shut_down());
    assert_eq!(*coord.selected().await, vec![id("b")]);
    assert!(drain(&mut rx).iter().any(|e| is_kind(e, &id("a"), |k| matches!(
        k,
        EventKind::ClusterRemoved { reason } if reason == "user request"
    ))));
}

// ── Transport rebuilds ──────────────────────────────────────────────

async fn transport_failure(coord: &kubedeck_core::SelectionCoordinator, cluster: &str) {
    let runtime = coord.runtime(&id(cluster)).unwrap();
    let result = runtime
        .call("list pods", |_client| async {
            Err::<(), _>(KubeError::Transport {
                message: "connection refused".into(),
            })
        })
        .await;
    assert!(matches!(result, Err(CoreError::Transport { .. })));
}

#[tokio::test(start_paused = true)]
async fn repeated_transport_failures_rebuild_only_that_cluster() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    coord.select(vec![id("a"), id("b")]).await.unwrap();
    let a_before = coord.runtime(&id("a")).unwrap();
    let b_before = coord.runtime(&id("b")).unwrap();
    let mut rx = coord.subscribe();

    for _ in 0..3 {
        transport_failure(&coord, "a").await;
    }
    next_matching(&mut rx, |e| {
        is_kind(e, &id("a"), |k| {
            matches!(
                k,
                EventKind::Rebuilt {
                    cause: RebuildCause::TransportFailures
                }
            )
        })
    })
    .await;

    assert_eq!(factory.builds(&id("a")), 2);
    assert_eq!(factory.builds(&id("b")), 1);
    assert!(a_before.is_shut_down());
    assert!(!Arc::ptr_eq(&a_before, &coord.runtime(&id("a")).unwrap()));
    assert!(Arc::ptr_eq(&b_before, &coord.runtime(&id("b")).unwrap()));
    assert_eq!(b_before.transport().failure_count(), 0);
    assert_eq!(b_before.transport().rebuilds_requested(), 0);
    assert!(b_before.auth().is_valid());

    // The replacement inherits the cooldown.
    for _ in 0..3 {
        transport_failure(&coord, "a").await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(factory.builds(&id("a")), 2);
}

#[tokio::test(start_paused = true)]
async fn credential_rejection_on_one_cluster_leaves_the_other_untouched() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    coord.select(vec![id("a"), id("b")]).await.unwrap();
    factory.set_rejecting(&id("a"), true);
    let a = coord.runtime(&id("a")).unwrap();
    let b = coord.runtime(&id("b")).unwrap();

    let result = a
        .call("list pods", |_client| async {
            Err::<(), _>(KubeError::Unauthorized {
                message: "token expired".into(),
            })
        })
        .await;

    assert!(matches!(result, Err(CoreError::CredentialsRejected { .. })));
    assert!(!a.auth().is_valid());
    assert_eq!(a.transport().failure_count(), 0);
    assert!(b.auth().is_valid());
    assert_eq!(b.auth().state(), AuthState::Valid);
    assert_eq!(b.transport().failure_count(), 0);
    assert_eq!(factory.probes(&id("b")), 0);
    assert!(b.call("get version", |client| async move { client.server_version().await }).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn failed_rebuild_leaves_cluster_selected_but_absent() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());
    coord.select(vec![id("a")]).await.unwrap();

    factory.fail(&id("a"), "certificate file missing");
    let err = coord
        .rebuild(&id("a"), RebuildCause::KubeconfigChanged, "kubeconfig changed")
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::RebuildFailed { .. }));
    assert!(coord.is_selected(&id("a")).await);
    assert!(coord.runtime(&id("a")).is_none());
    assert!(matches!(
        coord.status(&id("a")).await.unwrap(),
        ClusterStatus::Failed { .. }
    ));

    factory.succeed(&id("a"));
    assert!(coord.retry_auth(&id("a")).await.unwrap());
    assert!(coord.runtime(&id("a")).is_some());
}

#[tokio::test(start_paused = true)]
async fn rebuild_of_unselected_cluster_is_rejected() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());

    let err = coord
        .rebuild(&id("a"), RebuildCause::KubeconfigChanged, "kubeconfig changed")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownCluster { .. }));
    assert_eq!(factory.builds(&id("a")), 0);
}

// ── Credential retry ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn manual_retry_rebuilds_an_exhausted_cluster() {
    let factory = FakeFactory::new();
    factory.set_rejecting(&id("a"), true);
    let coord = coordinator(&factory, memory_store());
    coord.select(vec![id("a"), id("b")]).await.unwrap();
    let mut rx = coord.subscribe();

    let runtime = coord.runtime(&id("a")).unwrap();
    let result = runtime
        .call("list pods", |_client| async {
            Err::<(), _>(KubeError::Unauthorized {
                message: "token expired".into(),
            })
        })
        .await;
    assert!(matches!(result, Err(CoreError::CredentialsRejected { .. })));

    next_matching(&mut rx, |e| {
        is_kind(e, &id("a"), |k| {
            matches!(k, EventKind::AuthFailed { reason } if reason.contains("manual action"))
        })
    })
    .await;
    assert_eq!(runtime.auth().state(), AuthState::Invalid);
    assert!(matches!(
        runtime.call("list pods", |_client| async { Ok(()) }).await,
        Err(CoreError::AuthInvalid { .. })
    ));
    assert_eq!(
        coord.runtime(&id("b")).unwrap().auth().state(),
        AuthState::Valid
    );

    assert!(!coord.retry_auth(&id("b")).await.unwrap());

    factory.set_rejecting(&id("a"), false);
    assert!(coord.retry_auth(&id("a")).await.unwrap());
    assert_eq!(factory.builds(&id("a")), 2);

    next_matching(&mut rx, |e| {
        is_kind(e, &id("a"), |k| matches!(k, EventKind::AuthRecovered))
    })
    .await;
    let rebuilt = coord.runtime(&id("a")).unwrap();
    assert_eq!(rebuilt.auth().state(), AuthState::Valid);
    assert!(runtime.is_shut_down());
}

#[tokio::test(start_paused = true)]
async fn retry_of_unknown_cluster_is_an_error() {
    let factory = FakeFactory::new();
    let coord = coordinator(&factory, memory_store());

    assert!(matches!(
        coord.retry_auth(&id("nope")).await,
        Err(CoreError::UnknownCluster { .. })
    ));
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_tears_down_everything_but_keeps_the_saved_selection() {
    let factory = FakeFactory::new();
    let store = Arc::new(MemorySelectionStore::default());
    let coord = coordinator(&factory, Arc::clone(&store) as Arc<dyn SelectionStore>);
    coord.select(vec![id("a"), id("b")]).await.unwrap();
    let a = coord.runtime(&id("a")).unwrap();

    coord.shutdown().await;

    assert!(a.is_shut_down());
    assert!(coord.runtimes().is_empty());
    assert_eq!(store.load_selection().await.unwrap(), vec![id("a"), id("b")]);
}
