#![allow(clippy::unwrap_used, dead_code)]
// Shared fakes for kubedeck-core integration tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use kubedeck_core::{
    ClusterIdentity, ClusterScanner, CoreConfig, CoreError, Event, EventKind, MemorySelectionStore,
    RecoveryPolicy, SelectionCoordinator, SelectionStore, WatchSet,
};
use kubedeck_kube::{ClientFactory, ClusterClient, Error as KubeError};

// ── Client ──────────────────────────────────────────────────────────

/// Probes succeed unless the shared `reject` flag is set.
pub struct FakeClient {
    reject: Arc<AtomicBool>,
    probes: Arc<AtomicU32>,
    script: Mutex<Vec<Result<(), String>>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::sharing(Arc::default(), Arc::default()))
    }

    fn sharing(reject: Arc<AtomicBool>, probes: Arc<AtomicU32>) -> Self {
        Self {
            reject,
            probes,
            script: Mutex::new(Vec::new()),
        }
    }

    /// Probe results consumed in order before falling back to the flag.
    pub fn scripted(results: Vec<Result<(), String>>) -> Arc<Self> {
        let client = Self::new();
        let mut results = results;
        results.reverse();
        *client.script.lock().unwrap() = results;
        client
    }

    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for FakeClient {
    async fn probe(&self) -> Result<(), KubeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().unwrap().pop() {
            return next.map_err(|message| KubeError::Unauthorized { message });
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(KubeError::Unauthorized {
                message: "token expired".into(),
            });
        }
        Ok(())
    }

    async fn server_version(&self) -> Result<String, KubeError> {
        Ok("v1.31.0".into())
    }
}

// ── Factory ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    fail: Option<String>,
    delay: Duration,
    reject: Arc<AtomicBool>,
    probes: Arc<AtomicU32>,
    builds: u32,
}

/// Builds [`FakeClient`]s. Per identity: optional failure, optional delay,
/// a credential-rejection flag and probe counter shared by every client
/// it builds, and a build counter.
#[derive(Default)]
pub struct FakeFactory {
    scripts: Mutex<HashMap<ClusterIdentity, Script>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, id: &ClusterIdentity, reason: &str) {
        self.scripts.lock().unwrap().entry(id.clone()).or_default().fail = Some(reason.into());
    }

    pub fn succeed(&self, id: &ClusterIdentity) {
        self.scripts.lock().unwrap().entry(id.clone()).or_default().fail = None;
    }

    pub fn delay(&self, id: &ClusterIdentity, delay: Duration) {
        self.scripts.lock().unwrap().entry(id.clone()).or_default().delay = delay;
    }

    pub fn set_rejecting(&self, id: &ClusterIdentity, reject: bool) {
        self.scripts
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_default()
            .reject
            .store(reject, Ordering::SeqCst);
    }

    pub fn builds(&self, id: &ClusterIdentity) -> u32 {
        self.scripts.lock().unwrap().get(id).map_or(0, |s| s.builds)
    }

    /// Probes made by every client built for `id`.
    pub fn probes(&self, id: &ClusterIdentity) -> u32 {
        self.scripts
            .lock()
            .unwrap()
            .get(id)
            .map_or(0, |s| s.probes.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn build(
        &self,
        kubeconfig: &Path,
        context: &str,
    ) -> Result<Arc<dyn ClusterClient>, KubeError> {
        let id = ClusterIdentity::new(kubeconfig, context);
        let (fail, delay, reject, probes) = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(id).or_default();
            script.builds += 1;
            (
                script.fail.clone(),
                script.delay,
                Arc::clone(&script.reject),
                Arc::clone(&script.probes),
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = fail {
            return Err(KubeError::ClientBuild {
                context: context.into(),
                message,
            });
        }

        Ok(Arc::new(FakeClient::sharing(reject, probes)))
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Memory store whose saves can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemorySelectionStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SelectionStore for FlakyStore {
    async fn load_selection(&self) -> Result<Vec<ClusterIdentity>, CoreError> {
        self.inner.load_selection().await
    }

    async fn save_selection(&self, selected: &[ClusterIdentity]) -> Result<(), CoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Config {
                message: "settings file is read-only".into(),
            });
        }
        self.inner.save_selection(selected).await
    }
}

// ── Scanner ─────────────────────────────────────────────────────────

/// Returns a fixed list and counts calls. Fails while `failing` is set.
#[derive(Default)]
pub struct CountingScanner {
    found: Mutex<Vec<ClusterIdentity>>,
    calls: AtomicU32,
    failing: AtomicBool,
}

impl CountingScanner {
    pub fn new(found: Vec<ClusterIdentity>) -> Arc<Self> {
        Arc::new(Self {
            found: Mutex::new(found),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterScanner for CountingScanner {
    async fn scan(&self, _watch: &WatchSet) -> Result<Vec<ClusterIdentity>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::ScanFailed {
                reason: "permission denied".into(),
            });
        }
        Ok(self.found.lock().unwrap().clone())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

pub fn id(context: &str) -> ClusterIdentity {
    ClusterIdentity::new(format!("/k/{context}"), format!("ctx-{context}"))
}

/// Quick recovery, no health probes.
pub fn test_config() -> CoreConfig {
    CoreConfig {
        recovery: RecoveryPolicy {
            backoff: vec![Duration::from_secs(1), Duration::from_secs(2)],
            max_attempts: 3,
            probe_timeout: Duration::from_secs(1),
        },
        health_interval: Duration::ZERO,
        debounce: Duration::from_millis(500),
        ..CoreConfig::default()
    }
}

pub fn coordinator(factory: &Arc<FakeFactory>, store: Arc<dyn SelectionStore>) -> SelectionCoordinator {
    SelectionCoordinator::new(test_config(), Arc::clone(factory) as Arc<dyn ClientFactory>, store)
}

/// Wait for the next event matching `pred`, skipping others.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<Arc<Event>>,
    pred: impl Fn(&Event) -> bool,
) -> Arc<Event> {
    loop {
        let event = rx.recv().await.unwrap();
        if pred(&event) {
            return event;
        }
    }
}

/// Everything already queued on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<Arc<Event>>) -> Vec<Arc<Event>> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

pub fn is_kind(event: &Event, cluster: &ClusterIdentity, pred: impl Fn(&EventKind) -> bool) -> bool {
    event.cluster.as_ref() == Some(cluster) && pred(&event.kind)
}
