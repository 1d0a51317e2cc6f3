//! # statewise-storage
//!
//! Storage layer for statewise.
//!
//! This crate provides:
//! - An in-memory store for tests and embedding
//! - A file store with checksummed JSON records
//! - [`InstanceRepository`](statewise_core::InstanceRepository) implementations
//!   with optimistic concurrency

pub mod error;
pub mod file;
pub mod memory;

pub use error::StorageError;
pub use file::FileStore;
pub use memory::MemoryStore;

use statewise_core::{
    Definition, DefinitionId, Instance, InstanceId, InstanceRecord, InstanceRepository,
};
use std::sync::Arc;

/// Definition and instance lookups shared by every store.
pub trait Store: InstanceRepository {
    fn save_definition(&self, definition: &Definition) -> Result<(), StorageError>;

    fn load_definition(&self, id: DefinitionId) -> Result<Arc<Definition>, StorageError>;

    /// All definitions, ordered by name then version.
    fn list_definitions(&self) -> Result<Vec<Arc<Definition>>, StorageError>;

    fn load_record(&self, id: InstanceId) -> Result<InstanceRecord, StorageError>;

    /// All instance records, oldest first.
    fn list_instances(&self) -> Result<Vec<InstanceRecord>, StorageError>;

    /// Loads an instance together with the definition version it runs on.
    fn load_instance(&self, id: InstanceId) -> Result<Instance, StorageError> {
        let record = self.load_record(id)?;
        let definition = self.load_definition(record.definition_id)?;
        Ok(Instance::from_record(record, definition)?)
    }
}

fn sort_definitions(definitions: &mut [Arc<Definition>]) {
    definitions.sort_by(|a, b| {
        a.name()
            .cmp(b.name())
            .then_with(|| a.version().cmp(&b.version()))
    });
}
