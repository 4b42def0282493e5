// ── Core error types ──
//
// Errors surfaced by the lifecycle layer. Every per-cluster variant
// carries the identity it belongs to so the interface can scope the
// message to that cluster's view.

use thiserror::Error;

use crate::auth::AuthState;
use crate::model::ClusterIdentity;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    /// A call was blocked before reaching the network.
    #[error("{cluster}: credentials are {state}: {reason}")]
    AuthInvalid {
        cluster: ClusterIdentity,
        state: AuthState,
        reason: String,
    },

    /// The API server rejected the credentials on this request.
    #[error("{cluster}: credentials rejected: {message}")]
    CredentialsRejected {
        cluster: ClusterIdentity,
        message: String,
    },

    // ── Connectivity ─────────────────────────────────────────────────
    #[error("{cluster}: transport failure: {message}")]
    Transport {
        cluster: ClusterIdentity,
        message: String,
    },

    #[error("{cluster}: API error (HTTP {status}): {message}")]
    Api {
        cluster: ClusterIdentity,
        status: u16,
        message: String,
    },

    #[error("{cluster}: {operation} timed out after {timeout_ms}ms")]
    Timeout {
        cluster: ClusterIdentity,
        operation: String,
        timeout_ms: u64,
    },

    // ── Lifecycle ────────────────────────────────────────────────────
    /// Client construction for one cluster failed; the cluster stays absent.
    #[error("{cluster}: rebuild failed: {reason}")]
    RebuildFailed {
        cluster: ClusterIdentity,
        reason: String,
    },

    /// The job was cancelled by a newer request or by shutdown.
    #[error("{cluster}: operation cancelled")]
    Cancelled { cluster: ClusterIdentity },

    /// A downstream step of a commit failed; the batch was not applied.
    #[error("Reconciliation failed: {reason}")]
    ReconciliationFailed { reason: String },

    /// A newer selection request replaced this one before it committed.
    #[error("Selection generation {generation} superseded by {current}")]
    Superseded { generation: u64, current: u64 },

    /// Re-scanning the kubeconfig search locations failed.
    #[error("Kubeconfig scan failed: {reason}")]
    ScanFailed { reason: String },

    #[error("Cluster {cluster} is not selected")]
    UnknownCluster { cluster: ClusterIdentity },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Attach a cluster identity to a client-layer error.
    pub fn from_kube(cluster: &ClusterIdentity, err: kubedeck_kube::Error) -> Self {
        use kubedeck_kube::Error as KubeError;

        match err {
            KubeError::Unauthorized { message } => Self::CredentialsRejected {
                cluster: cluster.clone(),
                message,
            },
            KubeError::Transport { message } => Self::Transport {
                cluster: cluster.clone(),
                message,
            },
            KubeError::Api { status, message } => Self::Api {
                cluster: cluster.clone(),
                status,
                message,
            },
            KubeError::Timeout { timeout_ms } => Self::Timeout {
                cluster: cluster.clone(),
                operation: "request".into(),
                timeout_ms,
            },
            other @ (KubeError::Io { .. }
            | KubeError::Parse { .. }
            | KubeError::ContextNotFound { .. }
            | KubeError::ClientBuild { .. }) => Self::RebuildFailed {
                cluster: cluster.clone(),
                reason: other.to_string(),
            },
        }
    }

    /// The cluster this error is scoped to, if any.
    pub fn cluster(&self) -> Option<&ClusterIdentity> {
        match self {
            Self::AuthInvalid { cluster, .. }
            | Self::CredentialsRejected { cluster, .. }
            | Self::Transport { cluster, .. }
            | Self::Api { cluster, .. }
            | Self::Timeout { cluster, .. }
            | Self::RebuildFailed { cluster, .. }
            | Self::Cancelled { cluster }
            | Self::UnknownCluster { cluster } => Some(cluster),
            Self::ReconciliationFailed { .. }
            | Self::Superseded { .. }
            | Self::ScanFailed { .. }
            | Self::Config { .. }
            | Self::Internal(_) => None,
        }
    }
}
