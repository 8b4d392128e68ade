use std::future::Future;
use std::time::Instant;

use corral_core::entity::{Client, Group, GroupQuery, GroupsPage};
use corral_core::policy::{AccessRequest, Policy, PolicyKey, PolicyPage, PolicyQuery};
use corral_core::token::{IssueRequest, Token};

use crate::error::ApiError;

use super::PolicyService;

/// Logs every call with its method name, outcome and duration.
pub struct LoggingMiddleware<S: PolicyService> {
    inner: S,
}

impl<S: PolicyService> LoggingMiddleware<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

async fn logged<T, F>(method: &'static str, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    let start = Instant::now();
    let result = call.await;
    let elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);

    match result {
        Ok(_) => tracing::debug!(method, elapsed_us, "call completed"),
        Err(ref e) => tracing::warn!(method, elapsed_us, error = %e, "call failed"),
    }
    result
}

impl<S: PolicyService> PolicyService for LoggingMiddleware<S> {
    async fn issue(&self, request: IssueRequest) -> Result<Token, ApiError> {
        logged("issue", self.inner.issue(request)).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token, ApiError> {
        logged("refresh", self.inner.refresh(refresh_token)).await
    }

    async fn identify(&self, token: &str) -> Result<String, ApiError> {
        logged("identify", self.inner.identify(token)).await
    }

    async fn authorize(
        &self,
        token: &str,
        entity_type: &str,
        request: &AccessRequest,
    ) -> Result<(), ApiError> {
        logged(
            "authorize",
            self.inner.authorize(token, entity_type, request),
        )
        .await
    }

    async fn add_policy(&self, token: &str, policy: Policy) -> Result<Policy, ApiError> {
        logged("add_policy", self.inner.add_policy(token, policy)).await
    }

    async fn update_policy(&self, token: &str, policy: Policy) -> Result<Policy, ApiError> {
        logged("update_policy", self.inner.update_policy(token, policy)).await
    }

    async fn delete_policy(&self, token: &str, key: &PolicyKey) -> Result<(), ApiError> {
        logged("delete_policy", self.inner.delete_policy(token, key)).await
    }

    async fn list_policies(&self, token: &str, query: &PolicyQuery) -> Result<PolicyPage, ApiError> {
        logged("list_policies", self.inner.list_policies(token, query)).await
    }

    async fn can_access_by_key(&self, channel_id: &str, key: &str) -> Result<String, ApiError> {
        logged(
            "can_access_by_key",
            self.inner.can_access_by_key(channel_id, key),
        )
        .await
    }

    async fn can_access_by_id(&self, channel_id: &str, thing_id: &str) -> Result<(), ApiError> {
        logged(
            "can_access_by_id",
            self.inner.can_access_by_id(channel_id, thing_id),
        )
        .await
    }

    async fn identify_thing(&self, key: &str) -> Result<String, ApiError> {
        logged("identify_thing", self.inner.identify_thing(key)).await
    }

    async fn create_group(&self, token: &str, group: Group) -> Result<Group, ApiError> {
        logged("create_group", self.inner.create_group(token, group)).await
    }

    async fn register_client(&self, token: &str, client: Client) -> Result<Client, ApiError> {
        logged("register_client", self.inner.register_client(token, client)).await
    }

    async fn list_groups(&self, token: &str, query: &GroupQuery) -> Result<GroupsPage, ApiError> {
        logged("list_groups", self.inner.list_groups(token, query)).await
    }

    async fn list_memberships(
        &self,
        token: &str,
        client_id: &str,
        query: &GroupQuery,
    ) -> Result<GroupsPage, ApiError> {
        logged(
            "list_memberships",
            self.inner.list_memberships(token, client_id, query),
        )
        .await
    }

    async fn enable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        logged("enable_group", self.inner.enable_group(token, id)).await
    }

    async fn disable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        logged("disable_group", self.inner.disable_group(token, id)).await
    }

    async fn enable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        logged("enable_client", self.inner.enable_client(token, id)).await
    }

    async fn disable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        logged("disable_client", self.inner.disable_client(token, id)).await
    }
}
