//! Kubernetes access layer for kubedeck.
//!
//! - **[`KubeconfigFile`]**: reads a kubeconfig and reports which contexts it
//!   defines. Empty or unparsable content is an error, never "no contexts".
//! - **[`ClientFactory`]** / **[`ClusterClient`]**: the seam between the
//!   lifecycle coordinator and the API server. [`KubeClientFactory`] builds
//!   `kube::Client`s; tests substitute fakes.
//! - **[`Error`]**: request failures carry a [`FailureKind`] so callers can
//!   route credential rejections and transport failures separately.

pub mod client;
pub mod error;
pub mod kubeconfig;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{ClientFactory, ClusterClient, KubeClientFactory, KubeClusterClient};
pub use error::{Error, FailureKind};
pub use kubeconfig::{ContextRef, KubeconfigFile, NamedContext, default_kubeconfig_paths};
