use serde::{Deserialize, Serialize};
use strum::Display;

use crate::auth::AuthState;

/// Connectivity as seen by the transport failure tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Healthy,
    Degraded,
}

/// Snapshot of one selected cluster for the interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusterStatus {
    /// A runtime is installed.
    Connected {
        auth: AuthState,
        connectivity: Connectivity,
    },
    /// Selected, but the last add or rebuild failed; no runtime exists.
    Failed { reason: String },
    /// Selected, with an add or rebuild still in flight.
    Pending,
}

impl ClusterStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}
