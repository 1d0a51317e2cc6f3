//! File-backed store.
//!
//! Layout under the data directory:
//!
//! ```text
//! definitions/<definition-id>.json
//! instances/<instance-id>.json
//! ```
//!
//! Every file wraps its payload with a crc32c checksum and is replaced
//! atomically (write to a temporary file, sync, rename). Instance saves run
//! on the tokio blocking pool; the definition and listing calls of [`Store`]
//! are synchronous.

use crate::error::StorageError;
use crate::{sort_definitions, Store};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use statewise_core::{
    Definition, DefinitionId, Instance, InstanceId, InstanceRecord, InstanceRepository,
    RepositoryError,
};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// On-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Stored {
    checksum: String,
    payload: serde_json::Value,
}

impl Stored {
    fn wrap<T: Serialize>(value: &T) -> Result<Self, StorageError> {
        let payload = serde_json::to_value(value)?;
        let checksum = checksum(&payload)?;
        Ok(Self { checksum, payload })
    }

    fn unwrap_checked<T: DeserializeOwned>(self, path: &Path) -> Result<T, StorageError> {
        let actual = checksum(&self.payload)?;
        if actual != self.checksum {
            return Err(StorageError::Corruption(format!(
                "{} checksum mismatch (expected {}, got {})",
                path.display(),
                self.checksum,
                actual
            )));
        }
        Ok(serde_json::from_value(self.payload)?)
    }
}

fn checksum(payload: &serde_json::Value) -> Result<String, StorageError> {
    let data = serde_json::to_vec(payload)?;
    Ok(format!("{:08x}", crc32c::crc32c(&data)))
}

fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(&Stored::wrap(value)?)?;
    let tmp = path.with_extension("json.tmp");

    let mut file = File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a file, `None` if it does not exist.
fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let stored: Stored = serde_json::from_slice(&data).map_err(|e| {
        StorageError::Corruption(format!("{} is not a valid record: {}", path.display(), e))
    })?;
    stored.unwrap_checked(path).map(Some)
}

/// Writes `record` with the next token if the stored token still matches.
/// Blocking; runs on the blocking pool.
fn save_record(
    write_lock: &Mutex<()>,
    path: &Path,
    mut record: InstanceRecord,
) -> Result<u64, RepositoryError> {
    let _guard = write_lock.lock();
    let expected = record.concurrency_token;

    let actual = read_file::<InstanceRecord>(path)?
        .map(|r| r.concurrency_token)
        .unwrap_or(0);
    if actual != expected {
        return Err(RepositoryError::ConcurrencyConflict {
            instance_id: record.id.to_string(),
            expected,
            actual,
        });
    }

    record.concurrency_token = actual + 1;
    write_file(path, &record)?;

    tracing::debug!(
        "Saved instance {} with token {}",
        record.id,
        record.concurrency_token
    );
    Ok(record.concurrency_token)
}

/// Persists definitions and instances as checksummed JSON files.
pub struct FileStore {
    dir: PathBuf,
    /// Definitions loaded or saved through this store.
    definitions: RwLock<HashMap<DefinitionId, Arc<Definition>>>,
    /// Serializes instance writes so the token check and the rename are atomic.
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Opens or creates a store at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("definitions"))?;
        fs::create_dir_all(dir.join("instances"))?;

        tracing::debug!("Opened file store at {}", dir.display());

        Ok(Self {
            dir,
            definitions: RwLock::new(HashMap::new()),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn definition_path(&self, id: DefinitionId) -> PathBuf {
        self.dir.join("definitions").join(format!("{}.json", id))
    }

    fn instance_path(&self, id: InstanceId) -> PathBuf {
        self.dir.join("instances").join(format!("{}.json", id))
    }

    fn read_dir<T: DeserializeOwned>(&self, sub: &str) -> Result<Vec<T>, StorageError> {
        let mut items = Vec::new();
        for entry in fs::read_dir(self.dir.join(sub))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(item) = read_file(&path)? {
                items.push(item);
            }
        }
        Ok(items)
    }

}

#[async_trait]
impl InstanceRepository for FileStore {
    async fn save_instance(&self, instance: &Instance) -> Result<u64, RepositoryError> {
        let write_lock = self.write_lock.clone();
        let path = self.instance_path(instance.id());
        let record = instance.to_record();

        tokio::task::spawn_blocking(move || save_record(&write_lock, &path, record))
            .await
            .map_err(|e| RepositoryError::Failure(format!("instance write task failed: {}", e)))?
    }
}

impl Store for FileStore {
    fn save_definition(&self, definition: &Definition) -> Result<(), StorageError> {
        write_file(&self.definition_path(definition.id()), definition)?;
        self.definitions
            .write()
            .insert(definition.id(), Arc::new(definition.clone()));

        tracing::info!(
            "Stored definition '{}' v{} as {}",
            definition.name(),
            definition.version(),
            definition.id()
        );
        Ok(())
    }

    fn load_definition(&self, id: DefinitionId) -> Result<Arc<Definition>, StorageError> {
        if let Some(definition) = self.definitions.read().get(&id) {
            return Ok(definition.clone());
        }

        let definition: Definition = read_file(&self.definition_path(id))?
            .ok_or(StorageError::DefinitionNotFound(id))?;
        let definition = Arc::new(definition);
        self.definitions.write().insert(id, definition.clone());
        Ok(definition)
    }

    fn list_definitions(&self) -> Result<Vec<Arc<Definition>>, StorageError> {
        let mut definitions: Vec<Arc<Definition>> = self
            .read_dir::<Definition>("definitions")?
            .into_iter()
            .map(Arc::new)
            .collect();
        sort_definitions(&mut definitions);
        Ok(definitions)
    }

    fn load_record(&self, id: InstanceId) -> Result<InstanceRecord, StorageError> {
        read_file(&self.instance_path(id))?
            .ok_or(StorageError::InstanceNotFound(id))
    }

    fn list_instances(&self) -> Result<Vec<InstanceRecord>, StorageError> {
        let mut records = self.read_dir::<InstanceRecord>("instances")?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
