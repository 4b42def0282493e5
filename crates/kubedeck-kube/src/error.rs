use std::path::PathBuf;

use thiserror::Error;

/// How a failed request should be routed by the caller.
///
/// Credential rejections belong to the authentication path, transport
/// failures to the connectivity path. Everything else proves the API
/// server answered with accepted credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The API server (or the credential plugin) refused the credentials.
    CredentialRejected,
    /// The request never produced an API response: connect, TLS, timeout.
    Transport,
    /// The server answered with a non-auth error status, or the failure
    /// happened locally before any request was made.
    Other,
}

/// Top-level error type for the `kubedeck-kube` crate.
///
/// Covers kubeconfig access, client construction, and request failures.
/// `kubedeck-core` routes request failures through [`Error::kind`].
#[derive(Debug, Error)]
pub enum Error {
    // ── Kubeconfig files ────────────────────────────────────────────
    /// The kubeconfig file could not be read.
    #[error("Failed to read kubeconfig {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The kubeconfig file exists but its content is not a usable kubeconfig.
    #[error("Kubeconfig {} is not valid: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The named context is not defined in the kubeconfig.
    #[error("Context '{context}' not found in {}", path.display())]
    ContextNotFound { path: PathBuf, context: String },

    // ── Client construction ─────────────────────────────────────────
    /// Building a client from a valid context failed (bad cluster entry,
    /// unreadable certificate, unsupported auth provider, ...).
    #[error("Failed to build client for context '{context}': {message}")]
    ClientBuild { context: String, message: String },

    // ── Requests ────────────────────────────────────────────────────
    /// HTTP 401 or a credential plugin failure.
    #[error("Credentials rejected: {message}")]
    Unauthorized { message: String },

    /// Connection refused, DNS failure, TLS failure, broken stream.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The API server answered with an error status other than 401.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request did not complete in time.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl Error {
    /// Classify this error for auth / transport routing.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized { .. } => FailureKind::CredentialRejected,
            Self::Transport { .. } | Self::Timeout { .. } => FailureKind::Transport,
            Self::Io { .. }
            | Self::Parse { .. }
            | Self::ContextNotFound { .. }
            | Self::ClientBuild { .. }
            | Self::Api { .. } => FailureKind::Other,
        }
    }

    /// Returns `true` if the kubeconfig file itself does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Returns `true` if the error is about the kubeconfig content rather
    /// than the cluster behind it.
    pub fn is_kubeconfig_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Parse { .. } | Self::ContextNotFound { .. }
        )
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 401 => Self::Unauthorized {
                message: resp.message,
            },
            kube::Error::Api(resp) => Self::Api {
                status: resp.code,
                message: resp.message,
            },
            kube::Error::Auth(e) => Self::Unauthorized {
                message: e.to_string(),
            },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}
