// ── Runtime tuning ──
//
// These types describe how aggressively kubedeck recovers and rebuilds.
// They never touch disk: the settings crate (or a test) constructs a
// `CoreConfig` and hands it to the coordinator.

use std::time::Duration;

/// Automatic authentication recovery policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Delay before each attempt. Attempts past the end reuse the last entry.
    pub backoff: Vec<Duration>,
    /// Probe attempts before recovery gives up and waits for a manual retry.
    pub max_attempts: u32,
    /// Upper bound on a single probe.
    pub probe_timeout: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            backoff: [1, 2, 5, 10, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_attempts: 5,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl RecoveryPolicy {
    /// Delay before the zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = usize::try_from(attempt).unwrap_or(usize::MAX);
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Transport failure tracking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPolicy {
    /// Failures within one window that trigger a rebuild.
    pub threshold: u32,
    /// Idle time after which the failure count starts over.
    pub window: Duration,
    /// Minimum time between two transport-driven rebuilds.
    pub cooldown: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Everything the lifecycle layer needs to know about timing and limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub recovery: RecoveryPolicy,
    pub transport: TransportPolicy,
    /// Timeout applied to every wrapped cluster call.
    pub request_timeout: Duration,
    /// Timeout for one add/remove/rebuild job.
    pub operation_timeout: Duration,
    /// Per-cluster jobs running at once within a selection batch.
    pub max_parallel: usize,
    /// Quiet period before a batch of file changes is reconciled.
    pub debounce: Duration,
    /// Period of the per-cluster health probe. Zero disables it.
    pub health_interval: Duration,
    /// Buffered notifications per subscriber.
    pub event_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryPolicy::default(),
            transport: TransportPolicy::default(),
            request_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(20),
            max_parallel: 4,
            debounce: Duration::from_millis(500),
            health_interval: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}
