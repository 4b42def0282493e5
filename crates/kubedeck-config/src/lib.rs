//! Persisted settings for kubedeck.
//!
//! TOML file resolution, layered loading (defaults, file, `KUBEDECK_*`
//! environment), translation to `kubedeck_core::CoreConfig` and
//! `WatchSet`, and the [`SettingsStore`] that persists the selection for
//! the coordinator. Only the selected identities and user preferences
//! are stored; runtime state never is.

mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kubedeck_core::{
    ClusterIdentity, CoreConfig, MAX_DEBOUNCE, RecoveryPolicy, TransportPolicy, WatchSet,
};

pub use store::SettingsStore;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML settings structs ───────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Clusters to connect to at startup, in selection order.
    #[serde(default)]
    pub selected: Vec<SelectedCluster>,

    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub tuning: Tuning,
}

impl Settings {
    pub fn selected_identities(&self) -> Vec<ClusterIdentity> {
        self.selected.iter().map(ClusterIdentity::from).collect()
    }

    pub fn set_selected(&mut self, clusters: &[ClusterIdentity]) {
        self.selected = clusters.iter().map(SelectedCluster::from).collect();
    }
}

/// One persisted selection entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelectedCluster {
    pub kubeconfig: PathBuf,
    pub context: String,
}

impl From<&SelectedCluster> for ClusterIdentity {
    fn from(entry: &SelectedCluster) -> Self {
        Self::new(&entry.kubeconfig, &entry.context)
    }
}

impl From<&ClusterIdentity> for SelectedCluster {
    fn from(id: &ClusterIdentity) -> Self {
        Self {
            kubeconfig: id.kubeconfig().to_path_buf(),
            context: id.context().to_owned(),
        }
    }
}

/// Where to look for kubeconfigs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatchSettings {
    /// Also watch `$KUBECONFIG` entries (or `~/.kube/config`).
    #[serde(default = "default_true")]
    pub include_default: bool,

    /// Directories whose every file is a candidate kubeconfig.
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// Individual kubeconfig files.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            include_default: true,
            directories: Vec::new(),
            files: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Recovery and rebuild tuning. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Tuning {
    pub backoff_ms: Vec<u64>,
    pub max_attempts: u32,
    pub probe_timeout_ms: u64,
    pub transport_threshold: u32,
    pub transport_window_ms: u64,
    pub transport_cooldown_ms: u64,
    pub request_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub max_parallel: usize,
    pub debounce_ms: u64,
    /// Zero disables the periodic health probe.
    pub health_interval_ms: u64,
    pub event_capacity: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            backoff_ms: core.recovery.backoff.iter().map(|d| millis(*d)).collect(),
            max_attempts: core.recovery.max_attempts,
            probe_timeout_ms: millis(core.recovery.probe_timeout),
            transport_threshold: core.transport.threshold,
            transport_window_ms: millis(core.transport.window),
            transport_cooldown_ms: millis(core.transport.cooldown),
            request_timeout_ms: millis(core.request_timeout),
            operation_timeout_ms: millis(core.operation_timeout),
            max_parallel: core.max_parallel,
            debounce_ms: millis(core.debounce),
            health_interval_ms: millis(core.health_interval),
            event_capacity: core.event_capacity,
        }
    }
}

impl Tuning {
    /// Validate and convert to the core's runtime tuning.
    pub fn to_core_config(&self) -> Result<CoreConfig, ConfigError> {
        if self.backoff_ms.is_empty() {
            return Err(invalid("tuning.backoff_ms", "must list at least one delay"));
        }
        if self.transport_threshold == 0 {
            return Err(invalid("tuning.transport_threshold", "must be at least 1"));
        }
        if self.max_parallel == 0 {
            return Err(invalid("tuning.max_parallel", "must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("tuning.event_capacity", "must be at least 1"));
        }
        if u128::from(self.debounce_ms) > MAX_DEBOUNCE.as_millis() {
            return Err(ConfigError::Validation {
                field: "tuning.debounce_ms".into(),
                reason: format!("must be at most {}", MAX_DEBOUNCE.as_millis()),
            });
        }
        for (field, value) in [
            ("tuning.probe_timeout_ms", self.probe_timeout_ms),
            ("tuning.request_timeout_ms", self.request_timeout_ms),
            ("tuning.operation_timeout_ms", self.operation_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        Ok(CoreConfig {
            recovery: RecoveryPolicy {
                backoff: self.backoff_ms.iter().copied().map(Duration::from_millis).collect(),
                max_attempts: self.max_attempts,
                probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            },
            transport: TransportPolicy {
                threshold: self.transport_threshold,
                window: Duration::from_millis(self.transport_window_ms),
                cooldown: Duration::from_millis(self.transport_cooldown_ms),
            },
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            max_parallel: self.max_parallel,
            debounce: Duration::from_millis(self.debounce_ms),
            health_interval: Duration::from_millis(self.health_interval_ms),
            event_capacity: self.event_capacity,
        })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Watch configuration ─────────────────────────────────────────────

/// Build the watcher's location set from settings.
pub fn watch_set(settings: &WatchSettings) -> WatchSet {
    let mut set = if settings.include_default {
        WatchSet::from_default_locations()
    } else {
        WatchSet::new()
    };
    for dir in &settings.directories {
        set.watch_directory(expand_home(dir));
    }
    for file in &settings.files {
        set.watch_file(expand_home(file));
    }
    set
}

/// Expand a leading `~/`.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), BaseDirs::new()) {
        (Ok(rest), Some(dirs)) => dirs.home_dir().join(rest),
        _ => path.to_path_buf(),
    }
}

// ── Settings file path ──────────────────────────────────────────────

/// Resolve the settings file path via XDG / platform conventions.
pub fn settings_path() -> PathBuf {
    ProjectDirs::from("dev", "kubedeck", "kubedeck").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("settings.toml");
            p
        },
        |dirs| dirs.config_dir().join("settings.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = BaseDirs::new().map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
    p.push(".config");
    p.push("kubedeck");
    p
}

// ── Settings loading ────────────────────────────────────────────────

/// Effective settings: defaults, then the file, then `KUBEDECK_*`
/// environment overrides (`KUBEDECK_TUNING__DEBOUNCE_MS=250`).
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("KUBEDECK_").split("__"));

    let settings: Settings = figment.extract()?;
    Ok(settings)
}

/// [`load_settings_from`] at the canonical path.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&settings_path())
}

/// Parse file content alone, without environment overrides. Used for
/// read-modify-write so overrides never get baked into the file.
pub(crate) fn parse_file_content(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::string(content))
        .extract()?;
    Ok(settings)
}
