// ── Per-cluster authentication state ──
//
// One `AuthStateManager` per runtime. It gates outbound calls while the
// credentials are known-bad and drives a bounded recovery loop that
// probes the cluster on a backoff schedule until it answers again.
//
//   Valid ──failure──▶ Invalid ──(automatic)──▶ Recovering ──probe ok──▶ Valid
//                         ▲                          │
//                         └─────budget exhausted─────┘
//
// An exhausted recovery stays Invalid until `trigger_retry()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubedeck_kube::ClusterClient;

use crate::config::RecoveryPolicy;
use crate::error::CoreError;
use crate::events::{EventBus, EventKind};
use crate::model::ClusterIdentity;

// ── State machine ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthState {
    Valid,
    Invalid,
    Recovering,
}

/// Inputs to [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthInput {
    /// The server rejected the credentials.
    Failure,
    /// A request (or probe) was accepted.
    Success,
    /// Start probing, automatically or on manual retry.
    BeginRecovery,
    /// The attempt budget ran out.
    Exhausted,
}

/// The only place auth state changes are decided. `None` means the input
/// is a no-op in that state.
pub fn transition(state: AuthState, input: AuthInput) -> Option<AuthState> {
    match (state, input) {
        (AuthState::Valid, AuthInput::Failure) | (AuthState::Recovering, AuthInput::Exhausted) => {
            Some(AuthState::Invalid)
        }
        (AuthState::Invalid, AuthInput::BeginRecovery) => Some(AuthState::Recovering),
        (AuthState::Invalid | AuthState::Recovering, AuthInput::Success) => Some(AuthState::Valid),
        _ => None,
    }
}

// ── Manager ─────────────────────────────────────────────────────────

/// Authentication state for one cluster.
///
/// Cheaply cloneable; clones share state. Dropping every clone does not
/// stop an active recovery, call [`shutdown()`](Self::shutdown) for that.
#[derive(Clone)]
pub struct AuthStateManager {
    shared: Arc<Shared>,
}

struct Shared {
    cluster: ClusterIdentity,
    policy: RecoveryPolicy,
    probe: Arc<dyn ClusterClient>,
    events: EventBus,
    inner: Mutex<Inner>,
}

struct Inner {
    state: AuthState,
    reason: Option<String>,
    /// Probe attempts made by the current recovery sequence.
    attempt: u32,
    /// Bumped whenever the current recovery sequence is replaced or ended.
    epoch: u64,
    recovery: Option<Recovery>,
    closed: bool,
}

struct Recovery {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum Finish {
    Recovered,
    Exhausted { last_error: String },
}

impl std::fmt::Debug for AuthStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("AuthStateManager")
            .field("cluster", &self.shared.cluster)
            .field("state", &inner.state)
            .field("attempt", &inner.attempt)
            .finish_non_exhaustive()
    }
}

impl AuthStateManager {
    /// Create a manager in the `Valid` state. `probe` must be scoped to
    /// this cluster alone.
    pub fn new(
        cluster: ClusterIdentity,
        policy: RecoveryPolicy,
        probe: Arc<dyn ClusterClient>,
        events: EventBus,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cluster,
                policy,
                probe,
                events,
                inner: Mutex::new(Inner {
                    state: AuthState::Valid,
                    reason: None,
                    attempt: 0,
                    epoch: 0,
                    recovery: None,
                    closed: false,
                }),
            }),
        }
    }

    pub fn cluster(&self) -> &ClusterIdentity {
        &self.shared.cluster
    }

    pub fn state(&self) -> AuthState {
        self.shared.lock().state
    }

    pub fn is_valid(&self) -> bool {
        self.state() == AuthState::Valid
    }

    /// Reason for the last failure, cleared on recovery.
    pub fn reason(&self) -> Option<String> {
        self.shared.lock().reason.clone()
    }

    /// Probe attempts made by the current (or last) recovery sequence.
    pub fn attempt(&self) -> u32 {
        self.shared.lock().attempt
    }

    pub fn has_active_recovery(&self) -> bool {
        self.shared.lock().recovery.is_some()
    }

    /// Gate checked before every outbound call.
    pub fn check(&self) -> Result<(), CoreError> {
        let inner = self.shared.lock();
        if inner.state == AuthState::Invalid {
            return Err(CoreError::AuthInvalid {
                cluster: self.shared.cluster.clone(),
                state: inner.state,
                reason: inner
                    .reason
                    .clone()
                    .unwrap_or_else(|| "credentials rejected".into()),
            });
        }
        Ok(())
    }

    /// The server rejected this cluster's credentials.
    ///
    /// Moves Valid to Invalid and starts recovery at once. A no-op while
    /// already Invalid or Recovering, so a burst of concurrent failures
    /// produces one notification.
    pub fn report_failure(&self, reason: &str) {
        let mut inner = self.shared.lock();
        let Some(next) = transition(inner.state, AuthInput::Failure) else {
            return;
        };
        inner.state = next;
        inner.reason = Some(reason.to_owned());
        warn!(cluster = %self.shared.cluster, reason, "credentials rejected");
        self.shared.events.emit(
            &self.shared.cluster,
            EventKind::AuthFailed {
                reason: reason.to_owned(),
            },
        );

        if !inner.closed {
            Shared::begin_recovery(&self.shared, &mut inner);
        }
    }

    /// A request was accepted. Ends any recovery in flight.
    pub fn report_success(&self) {
        let mut inner = self.shared.lock();
        let Some(next) = transition(inner.state, AuthInput::Success) else {
            return;
        };
        inner.state = next;
        inner.reason = None;
        inner.epoch += 1;
        if let Some(recovery) = inner.recovery.take() {
            recovery.cancel.cancel();
        }
        info!(cluster = %self.shared.cluster, "credentials accepted again");
        self.shared
            .events
            .emit(&self.shared.cluster, EventKind::AuthRecovered);
    }

    /// Restart recovery with a fresh attempt counter. Only effective from
    /// Invalid; returns whether a new sequence started.
    pub fn trigger_retry(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.closed || transition(inner.state, AuthInput::BeginRecovery).is_none() {
            return false;
        }
        info!(cluster = %self.shared.cluster, "manual credential retry");
        Shared::begin_recovery(&self.shared, &mut inner);
        true
    }

    /// Put a freshly built manager into Invalid without notifying, so a
    /// rebuild can carry the previous failure forward.
    pub(crate) fn resume_invalid(&self, reason: String) {
        let mut inner = self.shared.lock();
        if inner.state == AuthState::Valid {
            inner.state = AuthState::Invalid;
            inner.reason = Some(reason);
        }
    }

    /// Stop recovery and wait for the task to exit. Idempotent.
    pub async fn shutdown(&self) {
        let recovery = {
            let mut inner = self.shared.lock();
            inner.closed = true;
            inner.epoch += 1;
            inner.recovery.take()
        };

        if let Some(recovery) = recovery {
            recovery.cancel.cancel();
            if let Err(e) = recovery.handle.await {
                if e.is_panic() {
                    warn!(cluster = %self.shared.cluster, error = %e, "recovery task panicked");
                }
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invalid → Recovering. Caller holds the lock and has checked `closed`.
    fn begin_recovery(this: &Arc<Self>, inner: &mut Inner) {
        let Some(next) = transition(inner.state, AuthInput::BeginRecovery) else {
            return;
        };
        if let Some(previous) = inner.recovery.take() {
            previous.cancel.cancel();
        }

        inner.state = next;
        inner.attempt = 0;
        inner.epoch += 1;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(recovery_loop(
            Arc::clone(this),
            inner.epoch,
            cancel.clone(),
        ));
        inner.recovery = Some(Recovery { cancel, handle });

        debug!(
            cluster = %this.cluster,
            budget = this.policy.max_attempts,
            "recovery started"
        );
        this.events.emit(
            &this.cluster,
            EventKind::AuthRecovering {
                attempt_budget: this.policy.max_attempts,
            },
        );
    }

    /// Record the next attempt if `epoch` is still current.
    fn next_attempt(&self, epoch: u64) -> Option<u32> {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state != AuthState::Recovering {
            return None;
        }
        if inner.attempt >= self.policy.max_attempts {
            return None;
        }
        inner.attempt += 1;
        Some(inner.attempt)
    }

    fn finish(&self, epoch: u64, outcome: Finish) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        let input = match outcome {
            Finish::Recovered => AuthInput::Success,
            Finish::Exhausted { .. } => AuthInput::Exhausted,
        };
        let Some(next) = transition(inner.state, input) else {
            return;
        };

        inner.state = next;
        inner.epoch += 1;
        // The task is finishing by itself; dropping the handle detaches it.
        inner.recovery = None;

        match outcome {
            Finish::Recovered => {
                inner.reason = None;
                info!(cluster = %self.cluster, attempts = inner.attempt, "credentials recovered");
                self.events.emit(&self.cluster, EventKind::AuthRecovered);
            }
            Finish::Exhausted { last_error } => {
                let reason = format!("{last_error}; manual action required");
                warn!(
                    cluster = %self.cluster,
                    attempts = inner.attempt,
                    reason = %reason,
                    "credential recovery gave up"
                );
                inner.reason = Some(reason.clone());
                self.events
                    .emit(&self.cluster, EventKind::AuthFailed { reason });
            }
        }
    }
}

// ── Recovery loop ───────────────────────────────────────────────────

async fn recovery_loop(shared: Arc<Shared>, epoch: u64, cancel: CancellationToken) {
    let mut last_error = shared
        .lock()
        .reason
        .clone()
        .unwrap_or_else(|| "credentials rejected".into());
    let mut delay_index: u32 = 0;

    loop {
        let delay = shared.policy.delay_for(delay_index);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let Some(attempt) = shared.next_attempt(epoch) else {
            shared.finish(epoch, Finish::Exhausted { last_error });
            return;
        };
        delay_index = attempt;

        debug!(cluster = %shared.cluster, attempt, "probing credentials");
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            r = tokio::time::timeout(shared.policy.probe_timeout, shared.probe.probe()) => r,
        };

        match result {
            Ok(Ok(())) => {
                shared.finish(epoch, Finish::Recovered);
                return;
            }
            Ok(Err(e)) => {
                debug!(cluster = %shared.cluster, attempt, error = %e, "probe failed");
                last_error = e.to_string();
            }
            Err(_) => {
                debug!(cluster = %shared.cluster, attempt, "probe timed out");
                last_error = format!(
                    "probe timed out after {}ms",
                    shared.policy.probe_timeout.as_millis()
                );
            }
        }

        if attempt >= shared.policy.max_attempts {
            shared.finish(epoch, Finish::Exhausted { last_error });
            return;
        }
    }
}
