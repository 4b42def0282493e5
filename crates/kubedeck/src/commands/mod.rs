//! Command dispatch: bridges CLI args -> coordinator -> output formatting.

pub mod config_cmd;
pub mod contexts;
pub mod run;
pub mod selection;
pub mod status;
pub mod util;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kubedeck_config::{Settings, SettingsStore, load_settings_from, settings_path};
use kubedeck_core::{CoreConfig, SelectionCoordinator, SelectionStore};
use kubedeck_kube::KubeClientFactory;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Contexts => contexts::handle(global).await,
        Command::Selected => selection::handle_selected(global),
        Command::Status(args) => status::handle(args, global).await,
        Command::Select(args) => selection::handle_select(args, global).await,
        Command::Deselect(args) => selection::handle_deselect(args, global).await,
        Command::Run(args) => run::handle(args, global).await,
        Command::Config(args) => config_cmd::handle(&args, global),
    }
}

// ── Shared setup ────────────────────────────────────────────────────

/// Settings file in effect: `--config`, else the platform default.
pub fn settings_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(settings_path)
}

/// Effective settings and validated core tuning.
pub fn load(global: &GlobalOpts) -> Result<(Settings, CoreConfig), CliError> {
    let settings = load_settings_from(&settings_file(global))?;
    let core = settings.tuning.to_core_config()?;
    Ok((settings, core))
}

/// Coordinator backed by real kube clients.
///
/// One-shot commands pass `long_running = false`, which disables the
/// periodic health probe.
pub fn coordinator(
    core: CoreConfig,
    store: Arc<dyn SelectionStore>,
    long_running: bool,
) -> SelectionCoordinator {
    let mut core = core;
    if !long_running {
        core.health_interval = Duration::ZERO;
    }
    let factory = Arc::new(KubeClientFactory::new(
        core.recovery.probe_timeout,
        core.request_timeout,
    ));
    SelectionCoordinator::new(core, factory, store)
}

/// The settings file as a selection store.
pub fn settings_store(global: &GlobalOpts) -> Arc<SettingsStore> {
    Arc::new(SettingsStore::new(settings_file(global)))
}
