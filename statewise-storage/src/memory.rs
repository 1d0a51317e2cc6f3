//! In-memory store.

use crate::error::StorageError;
use crate::{sort_definitions, Store};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use statewise_core::{
    Definition, DefinitionId, Instance, InstanceId, InstanceRecord, InstanceRepository,
    RepositoryError,
};
use std::sync::Arc;

/// Keeps definitions and instance records in concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    definitions: DashMap<DefinitionId, Arc<Definition>>,
    instances: DashMap<InstanceId, InstanceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[async_trait]
impl InstanceRepository for MemoryStore {
    async fn save_instance(&self, instance: &Instance) -> Result<u64, RepositoryError> {
        let expected = instance.concurrency_token();
        let mut record = instance.to_record();

        // The entry guard holds the shard lock across compare and swap.
        match self.instances.entry(instance.id()) {
            Entry::Occupied(mut entry) => {
                let actual = entry.get().concurrency_token;
                if actual != expected {
                    return Err(RepositoryError::ConcurrencyConflict {
                        instance_id: instance.id().to_string(),
                        expected,
                        actual,
                    });
                }
                record.concurrency_token = actual + 1;
                entry.insert(record);
                Ok(actual + 1)
            }
            Entry::Vacant(entry) => {
                if expected != 0 {
                    return Err(RepositoryError::ConcurrencyConflict {
                        instance_id: instance.id().to_string(),
                        expected,
                        actual: 0,
                    });
                }
                record.concurrency_token = 1;
                entry.insert(record);
                Ok(1)
            }
        }
    }
}

impl Store for MemoryStore {
    fn save_definition(&self, definition: &Definition) -> Result<(), StorageError> {
        self.definitions
            .insert(definition.id(), Arc::new(definition.clone()));
        Ok(())
    }

    fn load_definition(&self, id: DefinitionId) -> Result<Arc<Definition>, StorageError> {
        self.definitions
            .get(&id)
            .map(|d| d.value().clone())
            .ok_or(StorageError::DefinitionNotFound(id))
    }

    fn list_definitions(&self) -> Result<Vec<Arc<Definition>>, StorageError> {
        let mut definitions: Vec<_> = self.definitions.iter().map(|d| d.value().clone()).collect();
        sort_definitions(&mut definitions);
        Ok(definitions)
    }

    fn load_record(&self, id: InstanceId) -> Result<InstanceRecord, StorageError> {
        self.instances
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StorageError::InstanceNotFound(id))
    }

    fn list_instances(&self) -> Result<Vec<InstanceRecord>, StorageError> {
        let mut records: Vec<_> = self.instances.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewise_core::{
        Actor, DefinitionBuilder, DefinitionStatus, HandlerRegistry, TransitionEngine,
        TransitionSpec,
    };

    fn definition() -> Definition {
        DefinitionBuilder::new("door")
            .status(DefinitionStatus::Published)
            .initial_state("closed")
            .state("open", Default::default())
            .transition(TransitionSpec::on("open").from("closed").to("open"))
            .transition(TransitionSpec::on("close").from("open").to("closed"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let store = Arc::new(MemoryStore::new());
        let def = definition();
        store.save_definition(&def).unwrap();

        let engine = TransitionEngine::new(Arc::new(HandlerRegistry::new()), store.clone());
        let mut instance = Instance::create(store.load_definition(def.id()).unwrap()).unwrap();
        engine
            .try_transition_by_name(&mut instance, "open", &Actor::from("bob"), None)
            .await
            .unwrap();

        let loaded = store.load_instance(instance.id()).unwrap();
        assert_eq!(loaded.current_state().unwrap().name(), "open");
        assert_eq!(loaded.concurrency_token(), 1);
        assert_eq!(loaded.history().len(), 1);
        assert_eq!(store.instance_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_token_rejected() {
        let store = MemoryStore::new();
        let instance = Instance::create(Arc::new(definition())).unwrap();

        assert_eq!(store.save_instance(&instance).await.unwrap(), 1);
        let err = store.save_instance(&instance).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::ConcurrencyConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_entries() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load_definition(DefinitionId::new()),
            Err(StorageError::DefinitionNotFound(_))
        ));
        assert!(matches!(
            store.load_instance(InstanceId::new()),
            Err(StorageError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_list_definitions_sorted() {
        let store = MemoryStore::new();
        let v1 = definition();
        let v2 = v1.create_new_version(2).unwrap();
        store.save_definition(&v2).unwrap();
        store.save_definition(&v1).unwrap();

        let versions: Vec<u32> = store
            .list_definitions()
            .unwrap()
            .iter()
            .map(|d| d.version())
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }
}
