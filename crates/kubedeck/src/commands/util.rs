//! Shared helpers for command handlers.

use std::path::{Path, PathBuf};

use kubedeck_config::{Settings, expand_home, watch_set};
use kubedeck_core::{ClusterIdentity, ClusterScanner, FsScanner};

use crate::error::CliError;

/// Bring a user-typed identity into the form the scanner produces: `~`
/// expanded and the directory canonicalized when it exists.
pub fn resolve(cluster: &ClusterIdentity) -> ClusterIdentity {
    ClusterIdentity::new(resolve_path(cluster.kubeconfig()), cluster.context())
}

pub fn resolve_all(clusters: &[ClusterIdentity]) -> Vec<ClusterIdentity> {
    clusters.iter().map(resolve).collect()
}

fn resolve_path(path: &Path) -> PathBuf {
    let path = expand_home(path);
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match std::fs::canonicalize(parent) {
        Ok(dir) => dir.join(name),
        Err(_) => path,
    }
}

/// Every context defined in the configured watch locations.
pub async fn scan_available(settings: &Settings) -> Result<Vec<ClusterIdentity>, CliError> {
    let watch = watch_set(&settings.watch);
    Ok(FsScanner.scan(&watch).await?)
}

/// Fail on the first identity that no watched kubeconfig defines.
pub fn ensure_available(
    requested: &[ClusterIdentity],
    available: &[ClusterIdentity],
) -> Result<(), CliError> {
    match requested.iter().find(|id| !available.contains(id)) {
        Some(missing) => Err(CliError::NotFound {
            resource_type: "context".into(),
            identifier: missing.to_string(),
            list_command: "contexts".into(),
        }),
        None => Ok(()),
    }
}

/// Render a list of identities for a one-line message.
pub fn join(clusters: &[ClusterIdentity]) -> String {
    clusters
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
