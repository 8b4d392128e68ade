use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use corral_core::entity::{Client, Group, GroupQuery, GroupsPage};
use corral_core::policy::{AccessRequest, Policy, PolicyKey, PolicyPage, PolicyQuery};
use corral_core::token::{IssueRequest, Token};

use crate::error::ApiError;
use crate::metrics::Metrics;

use super::PolicyService;

pub struct MetricsMiddleware<S: PolicyService> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S: PolicyService> MetricsMiddleware<S> {
    pub fn new(inner: S, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    async fn measured<T, F>(&self, method: &'static str, call: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let start = Instant::now();
        let result = call.await;
        self.metrics
            .record_method(method, start.elapsed(), result.is_err());
        result
    }
}

impl<S: PolicyService> PolicyService for MetricsMiddleware<S> {
    async fn issue(&self, request: IssueRequest) -> Result<Token, ApiError> {
        self.measured("issue", self.inner.issue(request)).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token, ApiError> {
        self.measured("refresh", self.inner.refresh(refresh_token))
            .await
    }

    async fn identify(&self, token: &str) -> Result<String, ApiError> {
        self.measured("identify", self.inner.identify(token)).await
    }

    async fn authorize(
        &self,
        token: &str,
        entity_type: &str,
        request: &AccessRequest,
    ) -> Result<(), ApiError> {
        self.measured(
            "authorize",
            self.inner.authorize(token, entity_type, request),
        )
        .await
    }

    async fn add_policy(&self, token: &str, policy: Policy) -> Result<Policy, ApiError> {
        self.measured("add_policy", self.inner.add_policy(token, policy))
            .await
    }

    async fn update_policy(&self, token: &str, policy: Policy) -> Result<Policy, ApiError> {
        self.measured("update_policy", self.inner.update_policy(token, policy))
            .await
    }

    async fn delete_policy(&self, token: &str, key: &PolicyKey) -> Result<(), ApiError> {
        self.measured("delete_policy", self.inner.delete_policy(token, key))
            .await
    }

    async fn list_policies(&self, token: &str, query: &PolicyQuery) -> Result<PolicyPage, ApiError> {
        self.measured("list_policies", self.inner.list_policies(token, query))
            .await
    }

    async fn can_access_by_key(&self, channel_id: &str, key: &str) -> Result<String, ApiError> {
        self.measured(
            "can_access_by_key",
            self.inner.can_access_by_key(channel_id, key),
        )
        .await
    }

    async fn can_access_by_id(&self, channel_id: &str, thing_id: &str) -> Result<(), ApiError> {
        self.measured(
            "can_access_by_id",
            self.inner.can_access_by_id(channel_id, thing_id),
        )
        .await
    }

    async fn identify_thing(&self, key: &str) -> Result<String, ApiError> {
        self.measured("identify_thing", self.inner.identify_thing(key))
            .await
    }

    async fn create_group(&self, token: &str, group: Group) -> Result<Group, ApiError> {
        self.measured("create_group", self.inner.create_group(token, group))
            .await
    }

    async fn register_client(&self, token: &str, client: Client) -> Result<Client, ApiError> {
        self.measured("register_client", self.inner.register_client(token, client))
            .await
    }

    async fn list_groups(&self, token: &str, query: &GroupQuery) -> Result<GroupsPage, ApiError> {
        self.measured("list_groups", self.inner.list_groups(token, query))
            .await
    }

    async fn list_memberships(
        &self,
        token: &str,
        client_id: &str,
        query: &GroupQuery,
    ) -> Result<GroupsPage, ApiError> {
        self.measured(
            "list_memberships",
            self.inner.list_memberships(token, client_id, query),
        )
        .await
    }

    async fn enable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        self.measured("enable_group", self.inner.enable_group(token, id))
            .await
    }

    async fn disable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        self.measured("disable_group", self.inner.disable_group(token, id))
            .await
    }

    async fn enable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        self.measured("enable_client", self.inner.enable_client(token, id))
            .await
    }

    async fn disable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        self.measured("disable_client", self.inner.disable_client(token, id))
            .await
    }
}
