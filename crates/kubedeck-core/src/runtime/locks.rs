use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::ClusterIdentity;

/// Per-identity exclusion keys.
///
/// Everything that builds or tears down one cluster's runtime holds its
/// key, so an auth-driven rebuild and a watcher-driven rebuild of the
/// same cluster run one after the other. Keys for different clusters
/// never contend.
#[derive(Debug, Default)]
pub struct ClusterLocks {
    keys: DashMap<ClusterIdentity, Arc<Mutex<()>>>,
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, cluster: &ClusterIdentity) -> OwnedMutexGuard<()> {
        // Clone the key out before awaiting so no shard lock is held.
        let key = Arc::clone(
            self.keys
                .entry(cluster.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        key.lock_owned().await
    }

    /// Drop keys nobody holds or waits on for identities not in `keep`.
    pub fn prune(&self, keep: impl Fn(&ClusterIdentity) -> bool) {
        self.keys
            .retain(|id, key| keep(id) || Arc::strong_count(key) > 1);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
