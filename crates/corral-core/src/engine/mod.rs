mod evaluate;
mod hierarchy;

pub use evaluate::Evaluator;
pub use hierarchy::{Hierarchy, MAX_LEVEL, MIN_LEVEL, clamp_level};

use std::future::Future;

use crate::policy::{EntityType, Policy};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("action '{action}' is not valid for entity type '{entity_type}'")]
    InvalidAction {
        entity_type: EntityType,
        action: String,
    },

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Read-side view of the relation store the evaluator runs against.
pub trait RelationReader: Send + Sync {
    fn policy(
        &self,
        subject: &str,
        object: &str,
    ) -> impl Future<Output = Result<Option<Policy>, EngineError>> + Send;

    fn subject_policies(
        &self,
        subject: &str,
    ) -> impl Future<Output = Result<Vec<Policy>, EngineError>> + Send;

    fn client_owner(
        &self,
        client_id: &str,
    ) -> impl Future<Output = Result<Option<String>, EngineError>> + Send;

    fn group_owner(
        &self,
        group_id: &str,
    ) -> impl Future<Output = Result<Option<String>, EngineError>> + Send;
}
