// ── Per-context clients ──
//
// `ClientFactory` turns a (kubeconfig, context) pair into a live
// `ClusterClient`. Each call reads the file fresh so a rebuild always
// picks up credentials rewritten by an external refresher.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::debug;

use crate::error::Error;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection to one cluster, scoped to one context.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Cheap read-only request proving the credentials are accepted.
    async fn probe(&self) -> Result<(), Error>;

    /// The API server's reported version string.
    async fn server_version(&self) -> Result<String, Error>;

    /// The underlying `kube` client, for resource-specific collaborators.
    fn kube(&self) -> Option<&kube::Client> {
        None
    }
}

/// Builds clients from on-disk credentials.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn build(
        &self,
        kubeconfig: &Path,
        context: &str,
    ) -> Result<Arc<dyn ClusterClient>, Error>;
}

// ── kube-backed implementation ──────────────────────────────────────

/// [`ClientFactory`] backed by `kube::Client`.
#[derive(Debug, Clone)]
pub struct KubeClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for KubeClientFactory {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl KubeClientFactory {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

#[async_trait]
impl ClientFactory for KubeClientFactory {
    async fn build(
        &self,
        kubeconfig: &Path,
        context: &str,
    ) -> Result<Arc<dyn ClusterClient>, Error> {
        let owned: PathBuf = kubeconfig.to_path_buf();
        // `read_from` resolves relative certificate paths against the file's
        // directory; it is blocking I/O.
        let parsed = tokio::task::spawn_blocking(move || Kubeconfig::read_from(&owned))
            .await
            .map_err(|e| Error::ClientBuild {
                context: context.to_owned(),
                message: format!("kubeconfig reader task failed: {e}"),
            })?
            .map_err(|e| Error::Parse {
                path: kubeconfig.to_path_buf(),
                message: e.to_string(),
            })?;

        if !parsed.contexts.iter().any(|c| c.name == context) {
            return Err(Error::ContextNotFound {
                path: kubeconfig.to_path_buf(),
                context: context.to_owned(),
            });
        }

        let options = KubeConfigOptions {
            context: Some(context.to_owned()),
            ..Default::default()
        };

        let mut config = kube::Config::from_custom_kubeconfig(parsed, &options)
            .await
            .map_err(|e| Error::ClientBuild {
                context: context.to_owned(),
                message: e.to_string(),
            })?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        let client = kube::Client::try_from(config).map_err(|e| Error::ClientBuild {
            context: context.to_owned(),
            message: e.to_string(),
        })?;

        debug!(kubeconfig = %kubeconfig.display(), context, "built cluster client");

        Ok(Arc::new(KubeClusterClient {
            client,
            context: context.to_owned(),
        }))
    }
}

/// [`ClusterClient`] over a `kube::Client`.
pub struct KubeClusterClient {
    client: kube::Client,
    context: String,
}

impl fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn probe(&self) -> Result<(), Error> {
        self.client.apiserver_version().await?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String, Error> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    fn kube(&self) -> Option<&kube::Client> {
        Some(&self.client)
    }
}
