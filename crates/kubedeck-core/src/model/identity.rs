// ── Cluster identity ──
//
// A cluster endpoint is named by the kubeconfig file that defines it
// plus the context inside that file. Two files defining the same
// context name are two different clusters.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Immutable (kubeconfig path, context name) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterIdentity {
    kubeconfig: PathBuf,
    context: String,
}

impl ClusterIdentity {
    pub fn new(kubeconfig: impl Into<PathBuf>, context: impl Into<String>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            context: context.into(),
        }
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kubeconfig.display(), self.context)
    }
}

/// Error parsing a `path:context` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cluster identity '{input}': expected <kubeconfig-path>:<context>")]
pub struct ParseIdentityError {
    input: String,
}

impl FromStr for ClusterIdentity {
    type Err = ParseIdentityError;

    /// Parses `path:context`. The split happens at the first `:` after an
    /// optional drive prefix, so context names may themselves contain `:`
    /// (EKS contexts are ARNs).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdentityError {
            input: s.to_owned(),
        };

        let bytes = s.as_bytes();
        let skip = if bytes.len() > 2
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && matches!(bytes[2], b'\\' | b'/')
        {
            2
        } else {
            0
        };

        let split = s
            .get(skip..)
            .and_then(|rest| rest.find(':'))
            .map(|i| i + skip)
            .ok_or_else(err)?;
        let (path, context) = (&s[..split], &s[split + 1..]);

        if path.is_empty() || context.is_empty() {
            return Err(err());
        }
        Ok(Self::new(path, context))
    }
}
