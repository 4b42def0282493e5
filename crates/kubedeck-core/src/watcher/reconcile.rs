// ── Batch classification ──
//
// For each selected cluster whose file changed: still listed by the
// fresh scan → rebuild. Not listed → read the file itself. Missing file
// or missing context is a confirmed loss; a file that exists but does not
// parse, or parses without a contexts list, is most likely mid-write and
// is left alone until the next batch.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use kubedeck_kube::KubeconfigFile;

use super::watch_set::path_key;
use crate::model::ClusterIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileVerdict {
    ContextPresent,
    ConfirmedAbsent { reason: String },
    Transient { reason: String },
}

/// Read one cluster's kubeconfig and decide what its absence means.
pub async fn classify(cluster: &ClusterIdentity) -> FileVerdict {
    match KubeconfigFile::read(cluster.kubeconfig()).await {
        Ok(file) if file.has_context(cluster.context()) => FileVerdict::ContextPresent,
        Ok(_) => FileVerdict::ConfirmedAbsent {
            reason: format!(
                "context '{}' no longer defined in {}",
                cluster.context(),
                cluster.kubeconfig().display()
            ),
        },
        Err(e) if e.is_not_found() => FileVerdict::ConfirmedAbsent {
            reason: format!("{} no longer exists", cluster.kubeconfig().display()),
        },
        Err(e) => FileVerdict::Transient {
            reason: e.to_string(),
        },
    }
}

/// What one debounced batch does to the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub rebuild: Vec<ClusterIdentity>,
    pub remove: Vec<(ClusterIdentity, String)>,
    pub deferred: Vec<(ClusterIdentity, String)>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.rebuild.is_empty() && self.remove.is_empty() && self.deferred.is_empty()
    }
}

pub async fn plan_batch(
    selected: &[ClusterIdentity],
    changed: &BTreeSet<PathBuf>,
    fresh: &[ClusterIdentity],
) -> BatchPlan {
    let changed: HashSet<PathBuf> = changed.iter().map(|p| path_key(p)).collect();
    let fresh: HashSet<(PathBuf, &str)> = fresh
        .iter()
        .map(|id| (path_key(id.kubeconfig()), id.context()))
        .collect();

    let mut plan = BatchPlan::default();
    for cluster in selected {
        let key = path_key(cluster.kubeconfig());
        if !changed.contains(&key) {
            continue;
        }
        if fresh.contains(&(key, cluster.context())) {
            plan.rebuild.push(cluster.clone());
            continue;
        }
        match classify(cluster).await {
            FileVerdict::ContextPresent => plan.rebuild.push(cluster.clone()),
            FileVerdict::ConfirmedAbsent { reason } => plan.remove.push((cluster.clone(), reason)),
            FileVerdict::Transient { reason } => plan.deferred.push((cluster.clone(), reason)),
        }
    }
    plan
}
