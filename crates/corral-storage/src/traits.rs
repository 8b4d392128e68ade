use std::future::Future;

use corral_core::entity::{Client, Group, Status};
use corral_core::policy::{Policy, PolicyKey, PolicyPage, PolicyQuery};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("entity not found")]
    NotFound,
    #[error("entity already exists: {0}")]
    Conflict(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

pub trait PolicyReader: Send + Sync {
    fn retrieve(
        &self,
        key: &PolicyKey,
    ) -> impl Future<Output = Result<Option<Policy>, StorageError>> + Send;

    fn retrieve_by_subject(
        &self,
        subject: &str,
    ) -> impl Future<Output = Result<Vec<Policy>, StorageError>> + Send;

    /// Filtered page ordered by `(subject, object)`.
    fn retrieve_all(
        &self,
        query: &PolicyQuery,
    ) -> impl Future<Output = Result<PolicyPage, StorageError>> + Send;
}

pub trait PolicyWriter: Send + Sync {
    /// Fails with [`StorageError::Conflict`] when `(subject, object)` exists.
    fn save(&self, policy: &Policy) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Replaces actions and update bookkeeping of an existing tuple.
    fn update(&self, policy: &Policy) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn delete(&self, key: &PolicyKey) -> impl Future<Output = Result<(), StorageError>> + Send;
}

pub trait ClientRepository: Send + Sync {
    /// Fails with [`StorageError::Conflict`] on a duplicate id or secret.
    fn save_client(&self, client: &Client)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    fn retrieve_client(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Client>, StorageError>> + Send;

    fn retrieve_client_by_secret(
        &self,
        secret: &str,
    ) -> impl Future<Output = Result<Option<Client>, StorageError>> + Send;

    fn change_client_status(
        &self,
        id: &str,
        status: Status,
    ) -> impl Future<Output = Result<Client, StorageError>> + Send;
}

pub trait GroupRepository: Send + Sync {
    fn save_group(&self, group: &Group) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn retrieve_group(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<Group>, StorageError>> + Send;

    /// Every group; hierarchy walks run over this in process.
    fn retrieve_all_groups(&self) -> impl Future<Output = Result<Vec<Group>, StorageError>> + Send;

    fn change_group_status(
        &self,
        id: &str,
        status: Status,
    ) -> impl Future<Output = Result<Group, StorageError>> + Send;
}

/// The full repository surface a policy engine runs against.
pub trait Store: PolicyReader + PolicyWriter + ClientRepository + GroupRepository {}

impl<T> Store for T where T: PolicyReader + PolicyWriter + ClientRepository + GroupRepository {}
