use std::sync::Arc;

use corral_core::engine::{EngineError, RelationReader};
use corral_core::policy::{Policy, PolicyKey};
use corral_storage::Store;

pub struct StoreRelationReader<S: Store> {
    store: Arc<S>,
}

impl<S: Store> StoreRelationReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

fn storage_error(e: corral_storage::StorageError) -> EngineError {
    EngineError::StorageError(e.to_string())
}

impl<S: Store> RelationReader for StoreRelationReader<S> {
    async fn policy(&self, subject: &str, object: &str) -> Result<Option<Policy>, EngineError> {
        self.store
            .retrieve(&PolicyKey::new(subject, object))
            .await
            .map_err(storage_error)
    }

    async fn subject_policies(&self, subject: &str) -> Result<Vec<Policy>, EngineError> {
        self.store
            .retrieve_by_subject(subject)
            .await
            .map_err(storage_error)
    }

    async fn client_owner(&self, client_id: &str) -> Result<Option<String>, EngineError> {
        let client = self
            .store
            .retrieve_client(client_id)
            .await
            .map_err(storage_error)?;
        Ok(client.map(|c| c.owner_id))
    }

    async fn group_owner(&self, group_id: &str) -> Result<Option<String>, EngineError> {
        let group = self
            .store
            .retrieve_group(group_id)
            .await
            .map_err(storage_error)?;
        Ok(group.map(|g| g.owner_id))
    }
}
