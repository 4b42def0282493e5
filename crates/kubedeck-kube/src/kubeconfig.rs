// ── Kubeconfig files ──
//
// A kubeconfig is opaque to kubedeck except for the set of context
// names it defines. Client construction goes through `kube` itself;
// this module only answers "which contexts does this file define
// right now", which is what the watcher needs to tell a transient
// half-written file apart from a context that is really gone.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Error;

/// The subset of a kubeconfig kubedeck reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigFile {
    contexts: Vec<NamedContext>,
    current_context: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawKubeconfig {
    #[serde(default)]
    contexts: Option<Vec<NamedContext>>,
    #[serde(default)]
    current_context: Option<String>,
}

/// One `contexts[]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: Option<ContextRef>,
}

/// The cluster/user pair a context points at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextRef {
    pub cluster: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl KubeconfigFile {
    /// Parse kubeconfig YAML.
    ///
    /// Empty content and a missing or null `contexts` key are rejected: a
    /// file truncated mid-write must never read as "defines no contexts".
    /// Only an explicit `contexts: []` means the file defines none.
    pub fn parse(path: &Path, content: &str) -> Result<Self, Error> {
        let parse_error = |message: String| Error::Parse {
            path: path.to_path_buf(),
            message,
        };

        if content.trim().is_empty() {
            return Err(parse_error("file is empty".into()));
        }

        let raw: RawKubeconfig =
            serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?;
        let Some(contexts) = raw.contexts else {
            return Err(parse_error("no contexts list".into()));
        };

        Ok(Self {
            contexts,
            current_context: raw.current_context,
        })
    }

    /// Read and parse a kubeconfig from disk.
    pub async fn read(path: &Path) -> Result<Self, Error> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(path, &content)
    }

    /// All contexts in file order.
    pub fn contexts(&self) -> &[NamedContext] {
        &self.contexts
    }

    /// Context names in file order, duplicates removed.
    pub fn context_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for ctx in self.contexts() {
            if !names.contains(&ctx.name.as_str()) {
                names.push(&ctx.name);
            }
        }
        names
    }

    /// Whether `name` is defined in this file.
    pub fn has_context(&self, name: &str) -> bool {
        self.contexts().iter().any(|c| c.name == name)
    }

    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref()
    }
}

// ── Default search locations ────────────────────────────────────────

/// Kubeconfig files kubectl would consult: every `$KUBECONFIG` entry,
/// or `~/.kube/config` when the variable is unset or empty.
pub fn default_kubeconfig_paths() -> Vec<PathBuf> {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        let paths: Vec<PathBuf> = std::env::split_paths(&value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !paths.is_empty() {
            return paths;
        }
    }

    directories::BaseDirs::new()
        .map(|dirs| vec![dirs.home_dir().join(".kube").join("config")])
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TWO_CONTEXTS: &str = r"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev-cluster
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: dev-user
    namespace: apps
- name: prod
  context:
    cluster: dev-cluster
    user: dev-user
users:
- name: dev-user
  user:
    token: abc
";

    #[test]
    fn parses_context_names_in_order() {
        let file = KubeconfigFile::parse(Path::new("k"), TWO_CONTEXTS).unwrap();
        assert_eq!(file.context_names(), vec!["dev", "prod"]);
        assert_eq!(file.current_context(), Some("dev"));
        assert!(file.has_context("prod"));
        assert!(!file.has_context("staging"));
        assert_eq!(
            file.contexts()[0]
                .context
                .as_ref()
                .and_then(|c| c.namespace.as_deref()),
            Some("apps")
        );
    }

    #[test]
    fn empty_content_is_a_parse_error() {
        let err = KubeconfigFile::parse(Path::new("k"), "  \n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn truncated_yaml_is_a_parse_error() {
        let err = KubeconfigFile::parse(Path::new("k"), "contexts:\n- name: [dev\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn missing_or_null_contexts_is_a_parse_error() {
        for yaml in [
            "apiVersion: v1\nkind: Config\ncurrent-context: dev\n",
            "apiVersion: v1\ncontexts: null\n",
            "apiVersion: v1\ncontexts:\n",
        ] {
            let err = KubeconfigFile::parse(Path::new("k"), yaml).unwrap_err();
            assert!(matches!(err, Error::Parse { .. }), "{yaml:?}");
        }
    }

    #[test]
    fn explicit_empty_contexts_means_no_contexts() {
        let file = KubeconfigFile::parse(Path::new("k"), "apiVersion: v1\ncontexts: []\n").unwrap();
        assert!(file.context_names().is_empty());
    }

    #[test]
    fn duplicate_context_names_are_collapsed() {
        let yaml = "contexts:\n- name: a\n- name: a\n- name: b\n";
        let file = KubeconfigFile::parse(Path::new("k"), yaml).unwrap();
        assert_eq!(file.context_names(), vec!["a", "b"]);
    }
}
