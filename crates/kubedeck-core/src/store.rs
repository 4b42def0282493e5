// ── Selection persistence seam ──
//
// Only the list of selected identities survives a restart. The on-disk
// format belongs to the settings crate; the coordinator sees this trait.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::model::ClusterIdentity;

#[async_trait]
pub trait SelectionStore: Send + Sync {
    async fn load_selection(&self) -> Result<Vec<ClusterIdentity>, CoreError>;

    /// Persist the full selection. Implementations hold their own lock
    /// across the whole read-modify-write.
    async fn save_selection(&self, selected: &[ClusterIdentity]) -> Result<(), CoreError>;
}

/// In-process store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    selected: Mutex<Vec<ClusterIdentity>>,
}

impl MemorySelectionStore {
    pub fn new(initial: Vec<ClusterIdentity>) -> Self {
        Self {
            selected: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl SelectionStore for MemorySelectionStore {
    async fn load_selection(&self) -> Result<Vec<ClusterIdentity>, CoreError> {
        Ok(self.selected.lock().await.clone())
    }

    async fn save_selection(&self, selected: &[ClusterIdentity]) -> Result<(), CoreError> {
        *self.selected.lock().await = selected.to_vec();
        Ok(())
    }
}
