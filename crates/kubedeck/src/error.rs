//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use kubedeck_config::ConfigError;
use kubedeck_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach {cluster}: {message}")]
    #[diagnostic(
        code(kubedeck::connection_failed),
        help("Check that the API server is reachable from this machine.")
    )]
    ConnectionFailed { cluster: String, message: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed for {cluster}: {reason}")]
    #[diagnostic(
        code(kubedeck::auth_failed),
        help(
            "Refresh the credentials in the kubeconfig (for example with your\n\
             cloud provider's login command), then enter `retry {cluster}` in kubedeck run"
        )
    )]
    AuthFailed { cluster: String, reason: String },

    // ── Clusters ─────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(kubedeck::not_found),
        help("Run: kubedeck {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("Could not connect {cluster}: {reason}")]
    #[diagnostic(
        code(kubedeck::rebuild_failed),
        help("Fix the kubeconfig, then enter `retry {cluster}` in kubedeck run")
    )]
    RebuildFailed { cluster: String, reason: String },

    #[error("Selection changed concurrently: {reason}")]
    #[diagnostic(code(kubedeck::conflict))]
    Conflict { reason: String },

    #[error("Selection not applied: {reason}")]
    #[diagnostic(
        code(kubedeck::reconciliation_failed),
        help("Nothing was changed. Check that the settings file is writable.")
    )]
    Reconciliation { reason: String },

    #[error("API error (HTTP {status}) from {cluster}: {message}")]
    #[diagnostic(code(kubedeck::api_error))]
    ApiError {
        cluster: String,
        status: u16,
        message: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(kubedeck::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(kubedeck::config),
        help("Run: kubedeck config path to locate the settings file")
    )]
    Config(#[from] ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("{operation} on {cluster} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(kubedeck::timeout),
        help("Raise tuning.request_timeout_ms or check the API server's responsiveness.")
    )]
    Timeout {
        cluster: String,
        operation: String,
        timeout_ms: u64,
    },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(kubedeck::json))]
    Json(#[from] serde_json::Error),

    #[error("Could not render YAML: {0}")]
    #[diagnostic(code(kubedeck::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Could not render TOML: {0}")]
    #[diagnostic(code(kubedeck::toml))]
    Toml(#[from] toml::ser::Error),

    #[error("{0}")]
    #[diagnostic(code(kubedeck::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config(ConfigError::Validation { .. }) => {
                exit_code::USAGE
            }
            Self::RebuildFailed { .. }
            | Self::Reconciliation { .. }
            | Self::ApiError { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Toml(_)
            | Self::Internal(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthInvalid { cluster, reason, .. } => Self::AuthFailed {
                cluster: cluster.to_string(),
                reason,
            },
            CoreError::CredentialsRejected { cluster, message } => Self::AuthFailed {
                cluster: cluster.to_string(),
                reason: message,
            },
            CoreError::Transport { cluster, message } => Self::ConnectionFailed {
                cluster: cluster.to_string(),
                message,
            },
            CoreError::Api {
                cluster,
                status,
                message,
            } => Self::ApiError {
                cluster: cluster.to_string(),
                status,
                message,
            },
            CoreError::Timeout {
                cluster,
                operation,
                timeout_ms,
            } => Self::Timeout {
                cluster: cluster.to_string(),
                operation,
                timeout_ms,
            },
            CoreError::RebuildFailed { cluster, reason } => Self::RebuildFailed {
                cluster: cluster.to_string(),
                reason,
            },
            CoreError::UnknownCluster { cluster } => Self::NotFound {
                resource_type: "selected cluster".into(),
                identifier: cluster.to_string(),
                list_command: "selected".into(),
            },
            CoreError::Superseded {
                generation,
                current,
            } => Self::Conflict {
                reason: format!("request {generation} was replaced by request {current}"),
            },
            CoreError::ReconciliationFailed { reason } => Self::Reconciliation { reason },
            CoreError::ScanFailed { reason } => Self::Internal(format!("kubeconfig scan failed: {reason}")),
            CoreError::Config { message } => Self::Validation {
                field: "settings".into(),
                reason: message,
            },
            err @ (CoreError::Cancelled { .. } | CoreError::Internal(_)) => {
                Self::Internal(err.to_string())
            }
        }
    }
}
