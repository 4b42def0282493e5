//! Client lifecycle and auth recovery for many Kubernetes clusters at once.
//!
//! Every selected `(kubeconfig, context)` pair gets its own isolated
//! runtime. Nothing that goes wrong with one cluster leaks into another.
//!
//! - **[`SelectionCoordinator`]**: the single owner of all runtimes.
//!   [`select()`](SelectionCoordinator::select) applies a requested set in
//!   diff / parallel-work / commit phases; newer requests supersede older
//!   ones wholesale. Also serves status queries and per-cluster rebuilds.
//!
//! - **[`AuthStateManager`]**: per-cluster `Valid → Invalid → Recovering`
//!   state machine with bounded, cancellable background recovery.
//!
//! - **[`TransportFailureTracker`]**: counts consecutive transport failures
//!   and asks for at most one rebuild per burst, rate-limited by a cooldown.
//!
//! - **[`RuntimeRegistry`]**: the teardown / rebuild primitives. The only
//!   place a [`ClusterRuntime`] is constructed or destroyed.
//!
//! - **[`KubeconfigWatcher`]**: debounced filesystem watching that rebuilds
//!   clusters whose kubeconfig changed and removes those confirmed gone.
//!
//! - **Events** ([`events`]): every state change is published on a
//!   broadcast [`EventBus`] tagged with its [`ClusterIdentity`].

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod model;
pub mod runtime;
pub mod store;
pub mod transport;
pub mod watcher;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{AuthInput, AuthState, AuthStateManager};
pub use config::{CoreConfig, RecoveryPolicy, TransportPolicy};
pub use coordinator::{SelectionCoordinator, SelectionFailure, SelectionReport};
pub use error::CoreError;
pub use events::{Event, EventBus, EventKind, RebuildCause, SelectionChange};
pub use model::{ClusterIdentity, ClusterStatus, Connectivity, ParseIdentityError};
pub use runtime::{ClusterLocks, ClusterRuntime, RebuildSeed, RuntimeMap, RuntimeRegistry};
pub use store::{MemorySelectionStore, SelectionStore};
pub use transport::{RebuildRequester, TransportFailureTracker};
pub use watcher::{
    ClusterScanner, FsScanner, KubeconfigWatcher, MAX_DEBOUNCE, ReconcileOutcome, WatchSet,
};
