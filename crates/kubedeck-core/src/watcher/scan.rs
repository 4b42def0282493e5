// ── Kubeconfig discovery ──
//
// Turns a `WatchSet` into the list of cluster identities currently
// available. A file that cannot be parsed right now contributes nothing;
// whether that means "gone" is decided per cluster by the reconciler.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use kubedeck_kube::KubeconfigFile;

use super::watch_set::{WatchSet, is_editor_artifact};
use crate::error::CoreError;
use crate::model::ClusterIdentity;

#[async_trait]
pub trait ClusterScanner: Send + Sync {
    /// Every identity defined by the files in `watch`. An error means the
    /// scan as a whole could not be trusted.
    async fn scan(&self, watch: &WatchSet) -> Result<Vec<ClusterIdentity>, CoreError>;
}

/// Reads kubeconfigs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

#[async_trait]
impl ClusterScanner for FsScanner {
    async fn scan(&self, watch: &WatchSet) -> Result<Vec<ClusterIdentity>, CoreError> {
        let mut found: Vec<ClusterIdentity> = Vec::new();

        for (dir, filter) in watch.entries() {
            let files = match filter {
                Some(names) => names.iter().map(|name| dir.join(name)).collect(),
                None => list_directory(dir).await?,
            };

            for file in files {
                match KubeconfigFile::read(&file).await {
                    Ok(config) => {
                        for context in config.context_names() {
                            let id = ClusterIdentity::new(&file, context);
                            if !found.contains(&id) {
                                found.push(id);
                            }
                        }
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        debug!(path = %file.display(), error = %e, "skipping unreadable kubeconfig");
                    }
                }
            }
        }

        Ok(found)
    }
}

/// Regular files in `dir` that are not editor artifacts, sorted. A
/// missing directory is empty; any other listing error fails the scan.
async fn list_directory(dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let scan_failed = |e: std::io::Error| CoreError::ScanFailed {
        reason: format!("{}: {e}", dir.display()),
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(scan_failed(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(scan_failed)? {
        if is_editor_artifact(&entry.file_name()) {
            continue;
        }
        let path = entry.path();
        // Follows symlinks; dangling links and directories are skipped.
        if tokio::fs::metadata(&path)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = "contexts:\n- name: dev\n- name: prod\n";

    #[tokio::test]
    async fn lists_contexts_from_unfiltered_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config"), CONFIG).unwrap();
        std::fs::write(dir.path().join("config.swp"), CONFIG).unwrap();
        std::fs::write(dir.path().join("broken"), "contexts: [").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut watch = WatchSet::new();
        watch.watch_directory(dir.path());
        let found = FsScanner.scan(&watch).await.unwrap();

        let root = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                ClusterIdentity::new(root.join("config"), "dev"),
                ClusterIdentity::new(root.join("config"), "prod"),
            ]
        );
    }

    #[tokio::test]
    async fn filtered_directory_reads_only_listed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), CONFIG).unwrap();
        std::fs::write(dir.path().join("b"), CONFIG).unwrap();

        let mut watch = WatchSet::new();
        watch.watch_file(dir.path().join("a"));
        watch.watch_file(dir.path().join("missing"));
        let found = FsScanner.scan(&watch).await.unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|id| id.kubeconfig().ends_with("a")));
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = WatchSet::new();
        watch.watch_directory(dir.path().join("not-there"));

        assert!(FsScanner.scan(&watch).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_a_file_as_directory_fails_the_scan() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, CONFIG).unwrap();

        let mut watch = WatchSet::new();
        watch.watch_directory(&file);
        let err = FsScanner.scan(&watch).await.unwrap_err();
        assert!(matches!(err, CoreError::ScanFailed { .. }));
    }
}
