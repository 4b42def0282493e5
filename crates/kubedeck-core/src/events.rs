// ── Per-cluster notifications ──
//
// Every state transition the interface cares about is published once
// on a broadcast bus. Cluster-scoped events carry their identity so a
// consumer can route them to that cluster's view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::ClusterIdentity;

/// What started a teardown/rebuild cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RebuildCause {
    /// Repeated non-credential failures crossed the transport threshold.
    TransportFailures,
    /// The kubeconfig backing the cluster changed on disk.
    KubeconfigChanged,
    /// The user asked to retry authentication.
    CredentialRetry,
}

/// Per-cluster outcome inside one applied selection batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SelectionChange {
    Added,
    Removed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ── Authentication ───────────────────────────────────────────────
    AuthFailed { reason: String },
    AuthRecovering { attempt_budget: u32 },
    AuthRecovered,

    // ── Connectivity ─────────────────────────────────────────────────
    ConnectivityDegraded { failures: u32, reason: String },
    ConnectivityHealthy,

    // ── Lifecycle ────────────────────────────────────────────────────
    Rebuilt { cause: RebuildCause },
    RebuildFailed { cause: RebuildCause, reason: String },
    SelectionApplied {
        change: SelectionChange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ClusterRemoved { reason: String },

    // ── Discovery ────────────────────────────────────────────────────
    AvailableClustersChanged { count: usize },
}

/// One published notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterIdentity>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Broadcast fan-out shared by every component.
///
/// Cheaply cloneable. Emitting with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a cluster-scoped event.
    pub fn emit(&self, cluster: &ClusterIdentity, kind: EventKind) {
        self.send(Some(cluster.clone()), kind);
    }

    /// Publish an event that is not tied to one cluster.
    pub fn emit_global(&self, kind: EventKind) {
        self.send(None, kind);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }

    fn send(&self, cluster: Option<ClusterIdentity>, kind: EventKind) {
        trace!(cluster = ?cluster, event = ?kind, "emit");
        let _ = self.tx.send(Arc::new(Event {
            at: Utc::now(),
            cluster,
            kind,
        }));
    }
}
