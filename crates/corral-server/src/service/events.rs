use chrono::Utc;

use corral_core::entity::{Client, Group, GroupQuery, GroupsPage, Status};
use corral_core::policy::{AccessRequest, Policy, PolicyKey, PolicyPage, PolicyQuery};
use corral_core::token::{IssueRequest, Token};
use corral_events::{
    Event, EventError, EventLog, OCCURRED_AT_KEY, OPERATION_KEY, Record, ResilientPublisher,
};

use crate::error::ApiError;

use super::PolicyService;

fn record(operation: &str) -> Record {
    Record::from([
        (OPERATION_KEY.to_string(), operation.to_string()),
        (OCCURRED_AT_KEY.to_string(), Utc::now().to_rfc3339()),
    ])
}

struct PolicyEvent<'a> {
    operation: &'static str,
    policy: &'a Policy,
}

impl Event for PolicyEvent<'_> {
    fn encode(&self) -> Result<Record, EventError> {
        let mut record = record(self.operation);
        record.insert("subject".to_string(), self.policy.subject.clone());
        record.insert("object".to_string(), self.policy.object.clone());
        record.insert("actions".to_string(), self.policy.actions.join(","));
        record.insert("owner_id".to_string(), self.policy.owner_id.clone());
        record.insert("updated_by".to_string(), self.policy.updated_by.clone());
        Ok(record)
    }
}

struct PolicyDeleted<'a> {
    key: &'a PolicyKey,
}

impl Event for PolicyDeleted<'_> {
    fn encode(&self) -> Result<Record, EventError> {
        let mut record = record("policy.delete");
        record.insert("subject".to_string(), self.key.subject.clone());
        record.insert("object".to_string(), self.key.object.clone());
        Ok(record)
    }
}

struct TokenIssued {
    operation: &'static str,
    subject_id: Option<String>,
}

impl Event for TokenIssued {
    fn encode(&self) -> Result<Record, EventError> {
        let mut record = record(self.operation);
        if let Some(ref subject_id) = self.subject_id {
            record.insert("subject_id".to_string(), subject_id.clone());
        }
        Ok(record)
    }
}

struct GroupCreated<'a> {
    group: &'a Group,
}

impl Event for GroupCreated<'_> {
    fn encode(&self) -> Result<Record, EventError> {
        let mut record = record("group.create");
        record.insert("id".to_string(), self.group.id.clone());
        record.insert("owner_id".to_string(), self.group.owner_id.clone());
        if let Some(ref parent_id) = self.group.parent_id {
            record.insert("parent_id".to_string(), parent_id.clone());
        }
        if !self.group.name.is_empty() {
            record.insert("name".to_string(), self.group.name.clone());
        }
        Ok(record)
    }
}

struct ClientRegistered<'a> {
    client: &'a Client,
}

impl Event for ClientRegistered<'_> {
    fn encode(&self) -> Result<Record, EventError> {
        let mut record = record("client.register");
        record.insert("id".to_string(), self.client.id.clone());
        record.insert("owner_id".to_string(), self.client.owner_id.clone());
        Ok(record)
    }
}

struct StatusChanged<'a> {
    operation: &'static str,
    id: &'a str,
    status: Status,
}

impl Event for StatusChanged<'_> {
    fn encode(&self) -> Result<Record, EventError> {
        let mut record = record(self.operation);
        record.insert("id".to_string(), self.id.to_string());
        record.insert("status".to_string(), self.status.to_string());
        Ok(record)
    }
}

/// Publishes a record of every successful mutation.
///
/// Reads pass straight through; a record that cannot be encoded is logged and
/// dropped without failing the call.
pub struct EventStoreMiddleware<S: PolicyService, L: EventLog> {
    inner: S,
    publisher: ResilientPublisher<L>,
}

impl<S: PolicyService, L: EventLog> EventStoreMiddleware<S, L> {
    pub fn new(inner: S, publisher: ResilientPublisher<L>) -> Self {
        Self { inner, publisher }
    }

    async fn publish<E: Event>(&self, event: &E) {
        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!(error = %e, "event dropped");
        }
    }
}

impl<S: PolicyService, L: EventLog> PolicyService for EventStoreMiddleware<S, L> {
    async fn issue(&self, request: IssueRequest) -> Result<Token, ApiError> {
        let subject_id = request.subject_id.clone();
        let token = self.inner.issue(request).await?;
        self.publish(&TokenIssued {
            operation: "token.issue",
            subject_id: Some(subject_id),
        })
        .await;
        Ok(token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token, ApiError> {
        let token = self.inner.refresh(refresh_token).await?;
        self.publish(&TokenIssued {
            operation: "token.refresh",
            subject_id: None,
        })
        .await;
        Ok(token)
    }

    async fn identify(&self, token: &str) -> Result<String, ApiError> {
        self.inner.identify(token).await
    }

    async fn authorize(
        &self,
        token: &str,
        entity_type: &str,
        request: &AccessRequest,
    ) -> Result<(), ApiError> {
        self.inner.authorize(token, entity_type, request).await
    }

    async fn add_policy(&self, token: &str, policy: Policy) -> Result<Policy, ApiError> {
        let policy = self.inner.add_policy(token, policy).await?;
        self.publish(&PolicyEvent {
            operation: "policy.add",
            policy: &policy,
        })
        .await;
        Ok(policy)
    }

    async fn update_policy(&self, token: &str, policy: Policy) -> Result<Policy, ApiError> {
        let policy = self.inner.update_policy(token, policy).await?;
        self.publish(&PolicyEvent {
            operation: "policy.update",
            policy: &policy,
        })
        .await;
        Ok(policy)
    }

    async fn delete_policy(&self, token: &str, key: &PolicyKey) -> Result<(), ApiError> {
        self.inner.delete_policy(token, key).await?;
        self.publish(&PolicyDeleted { key }).await;
        Ok(())
    }

    async fn list_policies(&self, token: &str, query: &PolicyQuery) -> Result<PolicyPage, ApiError> {
        self.inner.list_policies(token, query).await
    }

    async fn can_access_by_key(&self, channel_id: &str, key: &str) -> Result<String, ApiError> {
        self.inner.can_access_by_key(channel_id, key).await
    }

    async fn can_access_by_id(&self, channel_id: &str, thing_id: &str) -> Result<(), ApiError> {
        self.inner.can_access_by_id(channel_id, thing_id).await
    }

    async fn identify_thing(&self, key: &str) -> Result<String, ApiError> {
        self.inner.identify_thing(key).await
    }

    async fn create_group(&self, token: &str, group: Group) -> Result<Group, ApiError> {
        let group = self.inner.create_group(token, group).await?;
        self.publish(&GroupCreated { group: &group }).await;
        Ok(group)
    }

    async fn register_client(&self, token: &str, client: Client) -> Result<Client, ApiError> {
        let client = self.inner.register_client(token, client).await?;
        self.publish(&ClientRegistered { client: &client }).await;
        Ok(client)
    }

    async fn list_groups(&self, token: &str, query: &GroupQuery) -> Result<GroupsPage, ApiError> {
        self.inner.list_groups(token, query).await
    }

    async fn list_memberships(
        &self,
        token: &str,
        client_id: &str,
        query: &GroupQuery,
    ) -> Result<GroupsPage, ApiError> {
        self.inner.list_memberships(token, client_id, query).await
    }

    async fn enable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        let group = self.inner.enable_group(token, id).await?;
        self.publish(&StatusChanged {
            operation: "group.enable",
            id,
            status: group.status,
        })
        .await;
        Ok(group)
    }

    async fn disable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        let group = self.inner.disable_group(token, id).await?;
        self.publish(&StatusChanged {
            operation: "group.disable",
            id,
            status: group.status,
        })
        .await;
        Ok(group)
    }

    async fn enable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        let client = self.inner.enable_client(token, id).await?;
        self.publish(&StatusChanged {
            operation: "client.enable",
            id,
            status: client.status,
        })
        .await;
        Ok(client)
    }

    async fn disable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        let client = self.inner.disable_client(token, id).await?;
        self.publish(&StatusChanged {
            operation: "client.disable",
            id,
            status: client.status,
        })
        .await;
        Ok(client)
    }
}
