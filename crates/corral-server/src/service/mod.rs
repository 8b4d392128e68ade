mod engine;
mod events;
mod logging;
mod metrics;

pub use engine::PolicyEngine;
pub use events::EventStoreMiddleware;
pub use logging::LoggingMiddleware;
pub use metrics::MetricsMiddleware;

use std::future::Future;
use std::sync::Arc;

use corral_core::entity::{Client, Group, GroupQuery, GroupsPage};
use corral_core::policy::{AccessRequest, Policy, PolicyKey, PolicyPage, PolicyQuery};
use corral_core::token::{IssueRequest, Token};
use corral_events::{EventLog, ResilientPublisher};
use corral_storage::{InMemoryChannelCache, InMemoryPolicyCache, InMemoryThingCache, Store};

use crate::error::ApiError;

/// Every operation the authorization service exposes.
///
/// Decorators implement this trait around an inner service, so logging,
/// metrics and event publishing compose without touching the engine.
pub trait PolicyService: Send + Sync + 'static {
    fn issue(&self, request: IssueRequest)
    -> impl Future<Output = Result<Token, ApiError>> + Send;

    fn refresh(&self, refresh_token: &str)
    -> impl Future<Output = Result<Token, ApiError>> + Send;

    /// Resolves an access token to its subject id.
    fn identify(&self, token: &str) -> impl Future<Output = Result<String, ApiError>> + Send;

    fn authorize(
        &self,
        token: &str,
        entity_type: &str,
        request: &AccessRequest,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn add_policy(
        &self,
        token: &str,
        policy: Policy,
    ) -> impl Future<Output = Result<Policy, ApiError>> + Send;

    fn update_policy(
        &self,
        token: &str,
        policy: Policy,
    ) -> impl Future<Output = Result<Policy, ApiError>> + Send;

    fn delete_policy(
        &self,
        token: &str,
        key: &PolicyKey,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn list_policies(
        &self,
        token: &str,
        query: &PolicyQuery,
    ) -> impl Future<Output = Result<PolicyPage, ApiError>> + Send;

    /// Returns the id of the thing owning `key` when it is connected to the channel.
    fn can_access_by_key(
        &self,
        channel_id: &str,
        key: &str,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;

    fn can_access_by_id(
        &self,
        channel_id: &str,
        thing_id: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn identify_thing(&self, key: &str) -> impl Future<Output = Result<String, ApiError>> + Send;

    fn create_group(
        &self,
        token: &str,
        group: Group,
    ) -> impl Future<Output = Result<Group, ApiError>> + Send;

    fn register_client(
        &self,
        token: &str,
        client: Client,
    ) -> impl Future<Output = Result<Client, ApiError>> + Send;

    fn list_groups(
        &self,
        token: &str,
        query: &GroupQuery,
    ) -> impl Future<Output = Result<GroupsPage, ApiError>> + Send;

    fn list_memberships(
        &self,
        token: &str,
        client_id: &str,
        query: &GroupQuery,
    ) -> impl Future<Output = Result<GroupsPage, ApiError>> + Send;

    fn enable_group(
        &self,
        token: &str,
        id: &str,
    ) -> impl Future<Output = Result<Group, ApiError>> + Send;

    fn disable_group(
        &self,
        token: &str,
        id: &str,
    ) -> impl Future<Output = Result<Group, ApiError>> + Send;

    fn enable_client(
        &self,
        token: &str,
        id: &str,
    ) -> impl Future<Output = Result<Client, ApiError>> + Send;

    fn disable_client(
        &self,
        token: &str,
        id: &str,
    ) -> impl Future<Output = Result<Client, ApiError>> + Send;
}

/// The engine over in-process caches, wrapped in every decorator.
pub type Service<S, L> = MetricsMiddleware<
    LoggingMiddleware<
        EventStoreMiddleware<
            PolicyEngine<S, InMemoryPolicyCache, InMemoryThingCache, InMemoryChannelCache>,
            L,
        >,
    >,
>;

pub fn compose<S, L>(
    engine: PolicyEngine<S, InMemoryPolicyCache, InMemoryThingCache, InMemoryChannelCache>,
    publisher: ResilientPublisher<L>,
    metrics: Arc<crate::metrics::Metrics>,
) -> Service<S, L>
where
    S: Store + 'static,
    L: EventLog,
{
    let engine = engine.with_metrics(Arc::clone(&metrics));
    MetricsMiddleware::new(
        LoggingMiddleware::new(EventStoreMiddleware::new(engine, publisher)),
        metrics,
    )
}
