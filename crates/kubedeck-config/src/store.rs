// ── Settings store ──
//
// Every write is a full read-modify-write under one lock, written to a
// temp file next to the target and renamed over it, so a concurrent
// reader sees either the old file or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use kubedeck_core::{ClusterIdentity, CoreError, SelectionStore};

use crate::{ConfigError, Settings, parse_file_content, settings_path};

/// Owner of the settings file for one process.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at the canonical settings path.
    pub fn open_default() -> Self {
        Self::new(settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File content without environment overrides. A missing file reads
    /// as defaults.
    pub async fn read(&self) -> Result<Settings, ConfigError> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    /// Apply `change` to the current file content and persist the result.
    pub async fn update(
        &self,
        change: impl FnOnce(&mut Settings) + Send,
    ) -> Result<Settings, ConfigError> {
        self.try_update(|settings| {
            change(settings);
            Ok::<(), ConfigError>(())
        })
        .await
    }

    /// Like [`update()`](Self::update), but `change` may refuse. A refused
    /// change writes nothing and its error is returned as-is.
    pub async fn try_update<E>(
        &self,
        change: impl FnOnce(&mut Settings) -> Result<(), E> + Send,
    ) -> Result<Settings, E>
    where
        E: From<ConfigError>,
    {
        let _guard = self.lock.lock().await;
        let mut settings = self.read_unlocked().await?;
        change(&mut settings)?;
        self.write_unlocked(&settings).await?;
        Ok(settings)
    }

    async fn read_unlocked(&self) -> Result<Settings, ConfigError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => parse_file_content(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Settings::default()),
            Err(source) => Err(ConfigError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write_unlocked(&self, settings: &Settings) -> Result<(), ConfigError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ConfigError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }

        let content = toml::to_string_pretty(settings)?;
        let temp_path = self.path.with_extension("toml.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(io_err(&self.path))?;

        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

#[async_trait]
impl SelectionStore for SettingsStore {
    async fn load_selection(&self) -> Result<Vec<ClusterIdentity>, CoreError> {
        let settings = self.read().await.map_err(to_core)?;
        Ok(settings.selected_identities())
    }

    async fn save_selection(&self, selected: &[ClusterIdentity]) -> Result<(), CoreError> {
        let selected = selected.to_vec();
        self.update(move |settings| settings.set_selected(&selected))
            .await
            .map_err(to_core)?;
        Ok(())
    }
}

fn to_core(err: ConfigError) -> CoreError {
    CoreError::Config {
        message: err.to_string(),
    }
}
