use std::sync::Arc;

use crate::policy::{EntityType, THINGS_OBJECT};

use super::{EngineError, RelationReader};

/// Store-backed authorization decisions for the two entity evaluation modes.
pub struct Evaluator<R: RelationReader> {
    reader: Arc<R>,
}

impl<R: RelationReader> Evaluator<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader }
    }

    pub async fn evaluate(
        &self,
        entity_type: EntityType,
        subject: &str,
        object: &str,
        action: &str,
    ) -> Result<bool, EngineError> {
        if !entity_type.is_valid_action(action) {
            return Err(EngineError::InvalidAction {
                entity_type,
                action: action.to_string(),
            });
        }

        match entity_type {
            EntityType::Client => self.evaluate_client(subject, object, action).await,
            EntityType::Group => self.evaluate_group(subject, object, action).await,
        }
    }

    async fn evaluate_client(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> Result<bool, EngineError> {
        if self.holds(subject, object, action).await? {
            return Ok(true);
        }
        if self.holds(subject, THINGS_OBJECT, action).await? {
            return Ok(true);
        }
        if self.shares_group(subject, object, action).await? {
            return Ok(true);
        }

        let owner = self.reader.client_owner(object).await?;
        Ok(owner.as_deref() == Some(subject))
    }

    async fn evaluate_group(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> Result<bool, EngineError> {
        if self.holds(subject, object, action).await? {
            return Ok(true);
        }

        let owner = self.reader.group_owner(object).await?;
        Ok(owner.as_deref() == Some(subject))
    }

    async fn holds(&self, subject: &str, object: &str, action: &str) -> Result<bool, EngineError> {
        Ok(self
            .reader
            .policy(subject, object)
            .await?
            .is_some_and(|p| p.has_action(action)))
    }

    /// A group through which `subject` holds `action` and which `object` is
    /// connected to.
    async fn shares_group(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> Result<bool, EngineError> {
        let candidates = self.reader.subject_policies(subject).await?;

        for policy in candidates
            .iter()
            .filter(|p| p.has_action(action))
            .filter(|p| p.object != object && p.object != THINGS_OBJECT)
        {
            if self.reader.policy(object, &policy.object).await?.is_some() {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
