// # File Store
//
// File-based implementation of RelationStore, RegistrationStore and
// ProfileStore with crash recovery.
//
// ## Purpose
//
// Keeps relation history, registrations and the profile cache across
// daemon restarts.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "data": {
//     "relations": [{ "owner_id": 1, "target_id": 2, "relation_type": "friend" }],
//     "changes": [{ "id": 1, "time": "2025-01-09T12:00:00Z", "owner_id": 1,
//                   "target_id": 2, "relation_type": "friend", "is_appeared": true }],
//     "next_change_id": 1,
//     "registrations": [1],
//     "profiles": { "2": { "id": 2, "first_name": "Ann", "last_name": "Lee" } }
//   }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::state::memory::StoreData;
use crate::traits::{
    ProfileStore, RegistrationStore, Relation, RelationChange, RelationStore, RelationType,
    UserProfile,
};

/// Store file format version
/// Used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// File-based store with crash recovery
///
/// Every mutation is applied to a copy of the state, the copy is written to
/// disk, and only then does it replace the in-memory state. A failed write
/// leaves both the file and memory as they were. A transition's change
/// event and edge update land in the same write, so the file never holds
/// one without the other.
///
/// # Example
///
/// ```rust,no_run
/// use relwatch_core::state::FileStore;
/// use relwatch_core::traits::RegistrationStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::new("/var/lib/relwatch/store.json").await?;
///
///     store.add(42).await?;
///     assert_eq!(store.list_all().await?, vec![42]);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Arc<RwLock<StoreData>>,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    data: StoreData,
}

impl FileStore {
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Try to load existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with empty state
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let data = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(data)),
        })
    }

    /// Load store data with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If it does not parse, try loading backup
    /// 3. If backup also fails, start with empty state
    async fn load_with_recovery(path: &Path) -> Result<StoreData, Error> {
        match Self::load(path).await {
            Ok(data) => {
                tracing::debug!(
                    "Loaded store from file: {} relations, {} changes",
                    data.relations.len(),
                    data.changes.len()
                );
                Ok(data)
            }
            Err(e @ Error::Json(_)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(StoreData::default());
                }

                match Self::load(&backup_path).await {
                    Ok(data) => {
                        tracing::info!(
                            "Recovered store from backup: {} relations, {} changes",
                            data.relations.len(),
                            data.changes.len()
                        );
                        if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await
                        {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(data)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty store.",
                            backup_err
                        );
                        Ok(StoreData::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load store data from file
    async fn load(path: &Path) -> Result<StoreData, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(StoreData::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store_unavailable(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.data)
    }

    /// Write `data` to the store file atomically
    ///
    /// Callers hold the state write lock, so writes never interleave.
    async fn write(&self, data: &StoreData) -> Result<(), Error> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            data: data.clone(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store_unavailable(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store_unavailable(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store_unavailable(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.flush().await.map_err(|e| {
                Error::store_unavailable(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store_unavailable(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    /// Apply `mutate` to a copy, write the copy, then make it current
    async fn mutate<T>(&self, mutate: impl FnOnce(&mut StoreData) -> T) -> Result<T, Error> {
        let mut state_guard = self.state.write().await;

        let mut next = state_guard.clone();
        let value = mutate(&mut next);

        self.write(&next).await?;
        *state_guard = next;
        Ok(value)
    }

    /// Restore store file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::store_unavailable(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored store file from backup");
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl RelationStore for FileStore {
    async fn find_targets(
        &self,
        owner_id: i64,
        relation_type: RelationType,
    ) -> Result<HashSet<i64>, Error> {
        Ok(self.state.read().await.targets(owner_id, relation_type))
    }

    async fn add_relation(&self, relation: &Relation) -> Result<(), Error> {
        self.mutate(|data| {
            data.relations.insert(*relation);
        })
        .await
    }

    async fn remove_relation(&self, relation: &Relation) -> Result<(), Error> {
        self.mutate(|data| {
            data.relations.remove(relation);
        })
        .await
    }

    async fn append_change(&self, change: RelationChange) -> Result<RelationChange, Error> {
        self.mutate(|data| data.append(change)).await
    }

    async fn list_changes_by_owner(&self, owner_id: i64) -> Result<Vec<RelationChange>, Error> {
        Ok(self
            .state
            .read()
            .await
            .changes_where(|c| c.owner_id == owner_id))
    }

    async fn list_all_changes(&self) -> Result<Vec<RelationChange>, Error> {
        Ok(self.state.read().await.changes_where(|_| true))
    }

    async fn record_transition(
        &self,
        relation: &Relation,
        is_appeared: bool,
        time: DateTime<Utc>,
    ) -> Result<RelationChange, Error> {
        self.mutate(|data| data.transition(relation, is_appeared, time))
            .await
    }

    async fn flush(&self) -> Result<(), Error> {
        // Every committed mutation is already on disk
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for FileStore {
    async fn add(&self, owner_id: i64) -> Result<(), Error> {
        self.mutate(|data| {
            data.registrations.insert(owner_id);
        })
        .await
    }

    async fn remove(&self, owner_id: i64) -> Result<(), Error> {
        self.mutate(|data| {
            data.registrations.remove(&owner_id);
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<i64>, Error> {
        Ok(self
            .state
            .read()
            .await
            .registrations
            .iter()
            .copied()
            .collect())
    }

    async fn contains(&self, owner_id: i64) -> Result<bool, Error> {
        Ok(self
            .state
            .read()
            .await
            .registrations
            .contains(&owner_id))
    }
}

#[async_trait]
impl ProfileStore for FileStore {
    async fn missing(&self, ids: &[i64]) -> Result<Vec<i64>, Error> {
        Ok(self.state.read().await.missing_profiles(ids))
    }

    async fn save_all(&self, profiles: &[UserProfile]) -> Result<(), Error> {
        if profiles.is_empty() {
            return Ok(());
        }
        self.mutate(|data| {
            for profile in profiles {
                data.profiles.insert(profile.id, profile.clone());
            }
        })
        .await
    }

    async fn find(&self, id: i64) -> Result<Option<UserProfile>, Error> {
        Ok(self.state.read().await.profiles.get(&id).cloned())
    }
}
