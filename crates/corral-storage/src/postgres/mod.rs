pub mod migrations;
mod queries;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use corral_core::entity::{Client, Group, Status};
use corral_core::policy::{Policy, PolicyKey, PolicyPage, PolicyQuery};

use crate::traits::{ClientRepository, GroupRepository, PolicyReader, PolicyWriter, StorageError};

use queries::ClientLookup;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(url)
        .await
        .map_err(|e| StorageError::Internal(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl PolicyReader for PostgresStore {
    async fn retrieve(&self, key: &PolicyKey) -> Result<Option<Policy>, StorageError> {
        queries::select_policy(&self.pool, key).await
    }

    async fn retrieve_by_subject(&self, subject: &str) -> Result<Vec<Policy>, StorageError> {
        queries::select_policies_by_subject(&self.pool, subject).await
    }

    async fn retrieve_all(&self, query: &PolicyQuery) -> Result<PolicyPage, StorageError> {
        queries::select_policy_page(&self.pool, query).await
    }
}

impl PolicyWriter for PostgresStore {
    async fn save(&self, policy: &Policy) -> Result<(), StorageError> {
        queries::insert_policy(&self.pool, policy).await
    }

    async fn update(&self, policy: &Policy) -> Result<(), StorageError> {
        queries::update_policy(&self.pool, policy).await
    }

    async fn delete(&self, key: &PolicyKey) -> Result<(), StorageError> {
        queries::delete_policy(&self.pool, key).await
    }
}

impl ClientRepository for PostgresStore {
    async fn save_client(&self, client: &Client) -> Result<(), StorageError> {
        queries::insert_client(&self.pool, client).await
    }

    async fn retrieve_client(&self, id: &str) -> Result<Option<Client>, StorageError> {
        queries::select_client(&self.pool, ClientLookup::Id, id).await
    }

    async fn retrieve_client_by_secret(&self, secret: &str) -> Result<Option<Client>, StorageError> {
        queries::select_client(&self.pool, ClientLookup::Secret, secret).await
    }

    async fn change_client_status(&self, id: &str, status: Status) -> Result<Client, StorageError> {
        queries::update_client_status(&self.pool, id, status).await
    }
}

impl GroupRepository for PostgresStore {
    async fn save_group(&self, group: &Group) -> Result<(), StorageError> {
        queries::insert_group(&self.pool, group).await
    }

    async fn retrieve_group(&self, id: &str) -> Result<Option<Group>, StorageError> {
        queries::select_group(&self.pool, id).await
    }

    async fn retrieve_all_groups(&self) -> Result<Vec<Group>, StorageError> {
        queries::select_all_groups(&self.pool).await
    }

    async fn change_group_status(&self, id: &str, status: Status) -> Result<Group, StorageError> {
        queries::update_group_status(&self.pool, id, status).await
    }
}
