use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use corral_core::engine::{Evaluator, Hierarchy};
use corral_core::entity::{Client, Group, GroupQuery, GroupsPage, Status};
use corral_core::policy::{
    AccessRequest, CLIENT_ACTIONS, EntityType, GROUP_ACTIONS, Policy, PolicyKey, PolicyPage,
    PolicyQuery,
};
use corral_core::token::{Claims, IssueRequest, Token, TokenIssuer, TokenKind};
use corral_storage::{ChannelCache, PolicyCache, Store, ThingCache};

use crate::adapter::StoreRelationReader;
use crate::audit;
use crate::error::ApiError;
use crate::metrics::Metrics;

use super::PolicyService;

/// Resolves callers through the token issuer and answers from the policy
/// cache first, falling back to the store.
pub struct PolicyEngine<S, P, T, C>
where
    S: Store,
    P: PolicyCache,
    T: ThingCache,
    C: ChannelCache,
{
    store: Arc<S>,
    tokens: Arc<dyn TokenIssuer>,
    evaluator: Evaluator<StoreRelationReader<S>>,
    policies: P,
    things: T,
    channels: C,
    metrics: Option<Arc<Metrics>>,
}

impl<S, P, T, C> PolicyEngine<S, P, T, C>
where
    S: Store,
    P: PolicyCache,
    T: ThingCache,
    C: ChannelCache,
{
    pub fn new(
        store: Arc<S>,
        tokens: Arc<dyn TokenIssuer>,
        policies: P,
        things: T,
        channels: C,
    ) -> Self {
        let evaluator = Evaluator::new(Arc::new(StoreRelationReader::new(Arc::clone(&store))));
        Self {
            store,
            tokens,
            evaluator,
            policies,
            things,
            channels,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn claims(&self, token: &str, expected: TokenKind) -> Result<Claims, ApiError> {
        let claims = self.tokens.parse(token).inspect_err(|e| {
            audit::audit_auth_failure(&e.to_string());
        })?;
        if claims.kind != expected {
            audit::audit_auth_failure("unexpected token kind");
            return Err(ApiError::Authentication(format!(
                "{} token required, got {}",
                expected, claims.kind
            )));
        }
        Ok(claims)
    }

    fn caller(&self, token: &str) -> Result<Claims, ApiError> {
        self.claims(token, TokenKind::Access)
    }

    async fn holds(&self, subject: &str, object: &str, action: &str) -> Result<bool, ApiError> {
        Ok(self
            .store
            .retrieve(&PolicyKey::new(subject, object))
            .await?
            .is_some_and(|p| p.has_action(action)))
    }

    async fn cached_allows(&self, key: &PolicyKey, action: &str) -> bool {
        let cached = match self.policies.get(key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, "policy cache lookup failed");
                None
            }
        };
        let hit = cached.is_some_and(|p| p.has_action(action));

        if let Some(ref metrics) = self.metrics {
            if hit {
                metrics.record_policy_cache_hit();
            } else {
                metrics.record_policy_cache_miss();
            }
        }
        hit
    }

    async fn cache_policy(&self, policy: &Policy) {
        if let Err(e) = self.policies.put(policy).await {
            tracing::warn!(key = %policy.key(), error = %e, "policy cache update failed");
        }
    }

    /// The owner tuple must be free before the entity itself is written.
    async fn ensure_owner_slot(&self, owner: &str, object: &str) -> Result<(), ApiError> {
        let key = PolicyKey::new(owner, object);
        if self.store.retrieve(&key).await?.is_some() {
            return Err(ApiError::Conflict(key.to_string()));
        }
        Ok(())
    }

    async fn save_owner_policy(
        &self,
        owner: &str,
        object: &str,
        actions: &[&str],
    ) -> Result<(), ApiError> {
        let mut policy = Policy::new(owner, object, actions.iter().copied()).with_owner(owner);
        policy.updated_by = owner.to_string();
        self.store.save(&policy).await?;
        self.cache_policy(&policy).await;
        Ok(())
    }

    async fn check_connected(&self, channel_id: &str, thing_id: &str) -> Result<(), ApiError> {
        match self.channels.has_thing(channel_id, thing_id).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "connectivity cache lookup failed"),
        }

        let connection = self
            .store
            .retrieve(&PolicyKey::new(thing_id, channel_id))
            .await?;
        if connection.is_none() {
            return Err(ApiError::Authorization);
        }
        let enabled = self
            .store
            .retrieve_client(thing_id)
            .await?
            .is_some_and(|thing| thing.status == Status::Enabled);
        if !enabled {
            return Err(ApiError::Authorization);
        }

        if let Err(e) = self.channels.connect(channel_id, thing_id).await {
            tracing::warn!(channel_id, thing_id, error = %e, "connectivity cache update failed");
        }
        Ok(())
    }

    async fn change_group_status(
        &self,
        token: &str,
        id: &str,
        status: Status,
    ) -> Result<Group, ApiError> {
        let claims = self.caller(token)?;
        let group = self
            .store
            .retrieve_group(id)
            .await?
            .ok_or(ApiError::NotFound)?;

        if !claims.is_admin()
            && group.owner_id != claims.subject_id
            && !self.holds(&claims.subject_id, id, "g_update").await?
        {
            return Err(ApiError::Authorization);
        }
        if group.status == status {
            return Err(ApiError::StatusAlreadyAssigned);
        }

        let group = self.store.change_group_status(id, status).await?;
        audit::audit_status_changed(&claims.subject_id, "group", id, status);
        Ok(group)
    }

    async fn change_client_status(
        &self,
        token: &str,
        id: &str,
        status: Status,
    ) -> Result<Client, ApiError> {
        let claims = self.caller(token)?;
        let client = self
            .store
            .retrieve_client(id)
            .await?
            .ok_or(ApiError::NotFound)?;

        if !claims.is_admin()
            && client.owner_id != claims.subject_id
            && !self.holds(&claims.subject_id, id, "c_update").await?
        {
            return Err(ApiError::Authorization);
        }
        if client.status == status {
            return Err(ApiError::StatusAlreadyAssigned);
        }

        let client = self.store.change_client_status(id, status).await?;
        if status == Status::Disabled {
            if let Err(e) = self.things.remove(&client.secret).await {
                tracing::warn!(client_id = id, error = %e, "key cache eviction failed");
            }
            if let Err(e) = self.channels.remove_thing(id).await {
                tracing::warn!(client_id = id, error = %e, "connectivity cache eviction failed");
            }
        }
        audit::audit_status_changed(&claims.subject_id, "client", id, status);
        Ok(client)
    }

    /// Applies status and visibility filters; admins see everything.
    async fn visible_groups(
        &self,
        claims: &Claims,
        groups: Vec<Group>,
        status: Status,
    ) -> Result<Vec<Group>, ApiError> {
        let listable: HashSet<String> = if claims.is_admin() {
            HashSet::new()
        } else {
            self.store
                .retrieve_by_subject(&claims.subject_id)
                .await?
                .into_iter()
                .filter(|p| p.has_action("g_list"))
                .map(|p| p.object)
                .collect()
        };

        Ok(groups
            .into_iter()
            .filter(|g| status.admits(g.status))
            .filter(|g| {
                claims.is_admin() || g.owner_id == claims.subject_id || listable.contains(&g.id)
            })
            .collect())
    }
}

fn generated_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl<S, P, T, C> PolicyService for PolicyEngine<S, P, T, C>
where
    S: Store + 'static,
    P: PolicyCache + 'static,
    T: ThingCache + 'static,
    C: ChannelCache + 'static,
{
    async fn issue(&self, request: IssueRequest) -> Result<Token, ApiError> {
        let token = self.tokens.issue(&request)?;
        audit::audit_token_issued(&request.subject_id, false);
        Ok(token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token, ApiError> {
        let claims = self.claims(refresh_token, TokenKind::Refresh)?;
        let request = IssueRequest {
            subject_id: claims.subject_id,
            role: claims.role,
            tag: claims.tag,
        };
        let token = self.tokens.issue(&request)?;
        audit::audit_token_issued(&request.subject_id, true);
        Ok(token)
    }

    async fn identify(&self, token: &str) -> Result<String, ApiError> {
        Ok(self.caller(token)?.subject_id)
    }

    async fn authorize(
        &self,
        token: &str,
        entity_type: &str,
        request: &AccessRequest,
    ) -> Result<(), ApiError> {
        let claims = self.caller(token)?;
        let entity_type: EntityType = entity_type.parse()?;
        if request.object.is_empty() {
            return Err(ApiError::Malformed("object must not be empty".to_string()));
        }
        if !entity_type.is_valid_action(&request.action) {
            return Err(ApiError::Malformed(format!(
                "action '{}' is not valid for entity type '{}'",
                request.action, entity_type
            )));
        }

        let key = PolicyKey::new(&claims.subject_id, &request.object);
        if self.cached_allows(&key, &request.action).await {
            return Ok(());
        }

        let allowed = self
            .evaluator
            .evaluate(
                entity_type,
                &claims.subject_id,
                &request.object,
                &request.action,
            )
            .await?;
        if allowed {
            Ok(())
        } else {
            Err(ApiError::Authorization)
        }
    }

    async fn add_policy(&self, token: &str, mut policy: Policy) -> Result<Policy, ApiError> {
        let claims = self.caller(token)?;
        policy.validate()?;
        policy.normalize();

        let now = Utc::now();
        policy.owner_id = claims.subject_id.clone();
        policy.created_at = now;
        policy.updated_at = now;
        policy.updated_by = claims.subject_id.clone();

        self.store.save(&policy).await?;
        self.cache_policy(&policy).await;

        audit::audit_policy_added(
            &claims.subject_id,
            &policy.subject,
            &policy.object,
            &policy.actions,
        );
        Ok(policy)
    }

    async fn update_policy(&self, token: &str, mut policy: Policy) -> Result<Policy, ApiError> {
        let claims = self.caller(token)?;
        policy.validate()?;
        policy.normalize();

        if !claims.is_admin() {
            let own = self
                .store
                .retrieve(&PolicyKey::new(&claims.subject_id, &policy.object))
                .await?;
            if !own.is_some_and(|p| p.covers(&policy.actions)) {
                return Err(ApiError::HigherPolicyRank);
            }
        }

        let mut existing = self
            .store
            .retrieve(&policy.key())
            .await?
            .ok_or(ApiError::NotFound)?;
        if !claims.is_admin() && existing.owner_id != claims.subject_id {
            return Err(ApiError::Authorization);
        }

        existing.actions = policy.actions;
        existing.updated_at = Utc::now();
        existing.updated_by = claims.subject_id.clone();
        self.store.update(&existing).await?;
        self.cache_policy(&existing).await;

        audit::audit_policy_updated(
            &claims.subject_id,
            &existing.subject,
            &existing.object,
            &existing.actions,
        );
        Ok(existing)
    }

    async fn delete_policy(&self, token: &str, key: &PolicyKey) -> Result<(), ApiError> {
        let claims = self.caller(token)?;
        if key.subject.is_empty() || key.object.is_empty() {
            return Err(ApiError::Malformed(
                "subject and object must not be empty".to_string(),
            ));
        }

        self.store.delete(key).await?;

        if let Err(e) = self.policies.remove(key).await {
            tracing::warn!(key = %key, error = %e, "policy cache eviction failed");
        }
        if let Err(e) = self.channels.disconnect(&key.object, &key.subject).await {
            tracing::warn!(key = %key, error = %e, "connectivity cache eviction failed");
        }

        audit::audit_policy_deleted(&claims.subject_id, &key.subject, &key.object);
        Ok(())
    }

    async fn list_policies(&self, token: &str, query: &PolicyQuery) -> Result<PolicyPage, ApiError> {
        let claims = self.caller(token)?;
        query.validate()?;

        let mut query = query.clone();
        if !claims.is_admin() {
            query.owner_id = Some(claims.subject_id);
        }
        Ok(self.store.retrieve_all(&query).await?)
    }

    async fn can_access_by_key(&self, channel_id: &str, key: &str) -> Result<String, ApiError> {
        let thing_id = self.identify_thing(key).await?;
        self.check_connected(channel_id, &thing_id).await?;
        Ok(thing_id)
    }

    async fn can_access_by_id(&self, channel_id: &str, thing_id: &str) -> Result<(), ApiError> {
        self.check_connected(channel_id, thing_id).await
    }

    async fn identify_thing(&self, key: &str) -> Result<String, ApiError> {
        if key.is_empty() {
            return Err(ApiError::Malformed("key must not be empty".to_string()));
        }

        match self.things.id_for_key(key).await {
            Ok(Some(id)) => return Ok(id),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "key cache lookup failed"),
        }

        let client = self
            .store
            .retrieve_client_by_secret(key)
            .await?
            .ok_or(ApiError::NotFound)?;
        if client.status != Status::Enabled {
            return Err(ApiError::Authorization);
        }

        if let Err(e) = self.things.save(key, &client.id).await {
            tracing::warn!(thing_id = %client.id, error = %e, "key cache update failed");
        }
        Ok(client.id)
    }

    async fn create_group(&self, token: &str, mut group: Group) -> Result<Group, ApiError> {
        let claims = self.caller(token)?;

        if let Some(ref parent_id) = group.parent_id {
            let parent = self
                .store
                .retrieve_group(parent_id)
                .await?
                .ok_or(ApiError::NotFound)?;
            if !claims.is_admin()
                && parent.owner_id != claims.subject_id
                && !self.holds(&claims.subject_id, &parent.id, "g_add").await?
            {
                return Err(ApiError::Authorization);
            }
        }

        let now = Utc::now();
        if group.id.is_empty() {
            group.id = generated_id();
        }
        group.owner_id = claims.subject_id.clone();
        group.status = Status::Enabled;
        group.created_at = now;
        group.updated_at = now;
        group.level = 0;
        group.path = String::new();

        self.ensure_owner_slot(&claims.subject_id, &group.id).await?;
        self.store.save_group(&group).await?;
        self.save_owner_policy(&claims.subject_id, &group.id, GROUP_ACTIONS)
            .await?;

        audit::audit_group_created(&claims.subject_id, &group.id, group.parent_id.as_deref());
        Ok(group)
    }

    async fn register_client(&self, token: &str, mut client: Client) -> Result<Client, ApiError> {
        let claims = self.caller(token)?;

        let now = Utc::now();
        if client.id.is_empty() {
            client.id = generated_id();
        }
        if client.secret.is_empty() {
            client.secret = generated_id();
        }
        client.owner_id = claims.subject_id.clone();
        client.status = Status::Enabled;
        client.created_at = now;
        client.updated_at = now;

        self.ensure_owner_slot(&claims.subject_id, &client.id).await?;
        self.store.save_client(&client).await?;
        self.save_owner_policy(&claims.subject_id, &client.id, CLIENT_ACTIONS)
            .await?;

        audit::audit_client_registered(&claims.subject_id, &client.id);
        Ok(client)
    }

    async fn list_groups(&self, token: &str, query: &GroupQuery) -> Result<GroupsPage, ApiError> {
        let claims = self.caller(token)?;

        let hierarchy = Hierarchy::new(self.store.retrieve_all_groups().await?);
        let groups = match query.id {
            Some(ref root) => hierarchy
                .walk(root, query.direction(), query.level)
                .ok_or(ApiError::NotFound)?,
            None => hierarchy.all(),
        };

        let groups = self.visible_groups(&claims, groups, query.status).await?;
        Ok(GroupsPage::paginate(
            groups,
            query.offset,
            query.effective_limit(),
        ))
    }

    async fn list_memberships(
        &self,
        token: &str,
        client_id: &str,
        query: &GroupQuery,
    ) -> Result<GroupsPage, ApiError> {
        let claims = self.caller(token)?;
        if self.store.retrieve_client(client_id).await?.is_none() {
            return Err(ApiError::NotFound);
        }

        if !claims.is_admin()
            && !self
                .evaluator
                .evaluate(EntityType::Client, &claims.subject_id, client_id, "c_list")
                .await?
        {
            return Err(ApiError::Authorization);
        }

        let mut groups = Vec::new();
        for policy in self.store.retrieve_by_subject(client_id).await? {
            if let Some(group) = self.store.retrieve_group(&policy.object).await?
                && query.status.admits(group.status)
            {
                groups.push(group);
            }
        }
        groups.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(GroupsPage::paginate(
            groups,
            query.offset,
            query.effective_limit(),
        ))
    }

    async fn enable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        self.change_group_status(token, id, Status::Enabled).await
    }

    async fn disable_group(&self, token: &str, id: &str) -> Result<Group, ApiError> {
        self.change_group_status(token, id, Status::Disabled).await
    }

    async fn enable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        self.change_client_status(token, id, Status::Enabled).await
    }

    async fn disable_client(&self, token: &str, id: &str) -> Result<Client, ApiError> {
        self.change_client_status(token, id, Status::Disabled).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use corral_core::token::{JwtTokenService, Role};
    use corral_storage::{
        ClientRepository, GroupRepository, InMemoryChannelCache, InMemoryPolicyCache, InMemoryStore,
        InMemoryThingCache, PolicyReader, PolicyWriter,
    };

    use crate::audit::tests::{audit_events, capture_async, has_field};

    pub(crate) type TestEngine =
        PolicyEngine<InMemoryStore, InMemoryPolicyCache, InMemoryThingCache, InMemoryChannelCache>;

    pub(crate) fn make_tokens() -> Arc<JwtTokenService> {
        Arc::new(JwtTokenService::new(
            b"test-secret",
            "corral.test",
            Duration::from_secs(60),
            Duration::from_secs(600),
        ))
    }

    pub(crate) fn make_engine() -> (TestEngine, Arc<InMemoryStore>, Arc<JwtTokenService>) {
        let store = Arc::new(InMemoryStore::new());
        let tokens = make_tokens();
        let ttl = Duration::from_secs(60);
        let engine = PolicyEngine::new(
            Arc::clone(&store),
            tokens.clone(),
            InMemoryPolicyCache::new(ttl),
            InMemoryThingCache::new(ttl),
            InMemoryChannelCache::new(ttl),
        );
        (engine, store, tokens)
    }

    pub(crate) fn access(tokens: &JwtTokenService, subject: &str) -> String {
        tokens
            .issue(&IssueRequest::new(subject, Role::User))
            .unwrap()
            .access_token
    }

    fn admin(tokens: &JwtTokenService, subject: &str) -> String {
        tokens
            .issue(&IssueRequest::new(subject, Role::Admin))
            .unwrap()
            .access_token
    }

    fn group(id: &str) -> Group {
        Group::new(id, "")
    }

    fn policy(subject: &str, object: &str, actions: &[&str]) -> Policy {
        Policy::new(subject, object, actions.iter().copied())
    }

    #[tokio::test]
    async fn owner_grant_allows_only_granted_action() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");

        // 1. u1 creates channel c1 and grants u2 read
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine
            .add_policy(&u1, policy("u2", "c1", &["m_read"]))
            .await
            .unwrap();

        // 2. u2 may read
        engine
            .authorize(&u2, "group", &AccessRequest::new("c1", "m_read"))
            .await
            .unwrap();

        // 3. u2 may not write
        let err = engine
            .authorize(&u2, "group", &AccessRequest::new("c1", "m_write"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization));
    }

    #[tokio::test]
    async fn group_owner_is_authorized_without_cache() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        store
            .save_group(&Group::new("g1", "u1"))
            .await
            .unwrap();

        engine
            .authorize(&u1, "group", &AccessRequest::new("g1", "g_delete"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn authorize_rejects_unknown_entity_type() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let reads = store.read_count();

        let err = engine
            .authorize(&u1, "thing", &AccessRequest::new("t1", "m_read"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidEntityType(ref t) if t == "thing"));
        assert_eq!(store.read_count(), reads);
    }

    #[tokio::test]
    async fn authorize_rejects_action_outside_entity_vocabulary() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");

        let err = engine
            .authorize(&u1, "client", &AccessRequest::new("t1", "g_add"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[tokio::test]
    async fn client_owner_and_things_grant_authorize() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        engine
            .register_client(&u1, Client::new("t1", "", "key-1"))
            .await
            .unwrap();

        engine
            .authorize(&u1, "client", &AccessRequest::new("t1", "c_update"))
            .await
            .unwrap();
        let err = engine
            .authorize(&u2, "client", &AccessRequest::new("t1", "c_update"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization));

        store
            .save(&policy("u2", "things", &["c_list"]).with_owner("root"))
            .await
            .unwrap();
        engine
            .authorize(&u2, "client", &AccessRequest::new("t1", "c_list"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cached_policy_authorizes_without_store_reads() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine
            .add_policy(&u1, policy("u2", "c1", &["m_read"]))
            .await
            .unwrap();

        let reads = store.read_count();
        engine
            .authorize(&u2, "group", &AccessRequest::new("c1", "m_read"))
            .await
            .unwrap();
        assert_eq!(store.read_count(), reads, "fast path must not touch the store");

        engine
            .delete_policy(&u1, &PolicyKey::new("u2", "c1"))
            .await
            .unwrap();
        let err = engine
            .authorize(&u2, "group", &AccessRequest::new("c1", "m_read"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization));
    }

    #[tokio::test]
    async fn cache_metrics_count_hits_and_misses() {
        let (engine, _store, tokens) = make_engine();
        let metrics = Arc::new(Metrics::new());
        let engine = engine.with_metrics(Arc::clone(&metrics));
        let u1 = access(&tokens, "u1");
        engine.create_group(&u1, group("c1")).await.unwrap();

        engine
            .authorize(&u1, "group", &AccessRequest::new("c1", "m_read"))
            .await
            .unwrap();
        let _ = engine
            .authorize(&u1, "group", &AccessRequest::new("c2", "m_read"))
            .await;

        assert_eq!(metrics.policy_cache_hits(), 1);
        assert_eq!(metrics.policy_cache_misses(), 1);
    }

    #[tokio::test]
    async fn add_policy_sets_ownership_and_rejects_duplicates() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");

        let added = engine
            .add_policy(&u1, policy("u2", "c1", &["m_write", "m_read", "m_read"]))
            .await
            .unwrap();
        assert_eq!(added.owner_id, "u1");
        assert_eq!(added.updated_by, "u1");
        assert_eq!(added.actions, vec!["m_read", "m_write"]);

        let err = engine
            .add_policy(&u1, policy("u2", "c1", &["m_read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn add_policy_rejects_malformed_before_store() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");

        let empty = engine
            .add_policy(&u1, policy("u2", "c1", &[]))
            .await
            .unwrap_err();
        let unknown = engine
            .add_policy(&u1, policy("u2", "c1", &["fly"]))
            .await
            .unwrap_err();

        assert!(matches!(empty, ApiError::Malformed(_)));
        assert!(matches!(unknown, ApiError::Malformed(ref m) if m.contains("fly")));
        assert!(store.retrieve(&PolicyKey::new("u2", "c1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_policy_enforces_rank() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");

        // 1. u2 holds only m_read on c1 and grants it onward to u3
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine
            .add_policy(&u1, policy("u2", "c1", &["m_read"]))
            .await
            .unwrap();
        engine
            .add_policy(&u2, policy("u3", "c1", &["m_read"]))
            .await
            .unwrap();

        // 2. Escalating beyond the caller's own actions is rejected
        let err = engine
            .update_policy(&u2, policy("u3", "c1", &["m_read", "m_write"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::HigherPolicyRank));

        // 3. Staying within them is accepted
        let updated = engine
            .update_policy(&u2, policy("u3", "c1", &["m_read"]))
            .await
            .unwrap();
        assert_eq!(updated.actions, vec!["m_read"]);
        assert_eq!(updated.updated_by, "u2");
    }

    #[tokio::test]
    async fn update_policy_requires_ownership_unless_admin() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        let root = admin(&tokens, "root");
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine.create_group(&u2, group("c2")).await.unwrap();
        engine
            .add_policy(&u1, policy("u3", "c2", &["m_read"]))
            .await
            .unwrap();

        // u2 outranks u1 on c2 but does not own the tuple
        let err = engine
            .update_policy(&u2, policy("u3", "c2", &["m_write"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization));

        let updated = engine
            .update_policy(&root, policy("u3", "c2", &["g_list", "m_write"]))
            .await
            .unwrap();
        assert_eq!(updated.owner_id, "u1");
        assert_eq!(updated.updated_by, "root");
    }

    #[tokio::test]
    async fn update_policy_missing_tuple_is_not_found() {
        let (engine, _store, tokens) = make_engine();
        let root = admin(&tokens, "root");

        let err = engine
            .update_policy(&root, policy("u3", "c1", &["m_read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn update_policy_refreshes_cache() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine
            .add_policy(&u1, policy("u2", "c1", &["m_read"]))
            .await
            .unwrap();

        engine
            .update_policy(&u1, policy("u2", "c1", &["m_write"]))
            .await
            .unwrap();

        let err = engine
            .authorize(&u2, "group", &AccessRequest::new("c1", "m_read"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization));
        engine
            .authorize(&u2, "group", &AccessRequest::new("c1", "m_write"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_policy_needs_authentication_only() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let stranger = access(&tokens, "u9");
        engine
            .add_policy(&u1, policy("u2", "c1", &["m_read"]))
            .await
            .unwrap();

        engine
            .delete_policy(&stranger, &PolicyKey::new("u2", "c1"))
            .await
            .unwrap();

        assert!(store.retrieve(&PolicyKey::new("u2", "c1")).await.unwrap().is_none());
        let err = engine
            .delete_policy(&stranger, &PolicyKey::new("u2", "c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn delete_policy_evicts_connectivity() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        engine
            .register_client(&u1, Client::new("t1", "", "key-1"))
            .await
            .unwrap();
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine
            .add_policy(&u1, policy("t1", "c1", &["m_write"]))
            .await
            .unwrap();
        engine.can_access_by_id("c1", "t1").await.unwrap();

        engine
            .delete_policy(&u1, &PolicyKey::new("t1", "c1"))
            .await
            .unwrap();

        let err = engine.can_access_by_id("c1", "t1").await.unwrap_err();
        assert!(matches!(err, ApiError::Authorization));
    }

    #[tokio::test]
    async fn list_policies_is_restricted_to_owned_unless_admin() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        let root = admin(&tokens, "root");
        engine
            .add_policy(&u1, policy("a", "c1", &["m_read"]))
            .await
            .unwrap();
        engine
            .add_policy(&u2, policy("b", "c1", &["m_read"]))
            .await
            .unwrap();

        let mine = engine
            .list_policies(&u1, &PolicyQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(mine.policies[0].subject, "a");

        let spoofed = engine
            .list_policies(
                &u1,
                &PolicyQuery {
                    owner_id: Some("u2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(spoofed.policies[0].owner_id, "u1");

        let all = engine
            .list_policies(&root, &PolicyQuery::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.limit, corral_core::policy::DEFAULT_LIMIT);
    }

    #[tokio::test]
    async fn list_policies_validates_action_filter() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");

        let err = engine
            .list_policies(
                &u1,
                &PolicyQuery {
                    action: Some("fly".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[tokio::test]
    async fn token_kinds_are_not_interchangeable() {
        let (engine, _store, _tokens) = make_engine();

        let pair = engine
            .issue(IssueRequest::new("u1", Role::User))
            .await
            .unwrap();
        assert_eq!(engine.identify(&pair.access_token).await.unwrap(), "u1");

        let err = engine.identify(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
        let err = engine.refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));

        let renewed = engine.refresh(&pair.refresh_token).await.unwrap();
        assert_eq!(engine.identify(&renewed.access_token).await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn refresh_keeps_role() {
        let (engine, _store, tokens) = make_engine();
        let pair = engine
            .issue(IssueRequest::new("root", Role::Admin))
            .await
            .unwrap();

        let renewed = engine.refresh(&pair.refresh_token).await.unwrap();

        assert!(tokens.parse(&renewed.access_token).unwrap().is_admin());
    }

    #[tokio::test]
    async fn garbage_token_is_an_authentication_error() {
        let (engine, _store, _tokens) = make_engine();

        let err = engine
            .add_policy("not-a-token", policy("u2", "c1", &["m_read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[tokio::test]
    async fn connectivity_by_key_and_id() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        engine
            .register_client(&u1, Client::new("t1", "", "key-1"))
            .await
            .unwrap();
        engine.create_group(&u1, group("c1")).await.unwrap();

        // 1. Not connected yet
        let err = engine.can_access_by_key("c1", "key-1").await.unwrap_err();
        assert!(matches!(err, ApiError::Authorization));

        // 2. Connected through a (thing, channel) tuple
        engine
            .add_policy(&u1, policy("t1", "c1", &["m_write", "m_read"]))
            .await
            .unwrap();
        assert_eq!(engine.can_access_by_key("c1", "key-1").await.unwrap(), "t1");
        engine.can_access_by_id("c1", "t1").await.unwrap();

        // 3. Unknown keys are not found
        let err = engine.can_access_by_key("c1", "key-2").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn disabled_thing_loses_access_by_id() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        engine
            .register_client(&u1, Client::new("t1", "", "key-1"))
            .await
            .unwrap();
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine
            .add_policy(&u1, policy("t1", "c1", &["m_write"]))
            .await
            .unwrap();

        // 1. A granted check leaves a connectivity mark behind
        engine.can_access_by_id("c1", "t1").await.unwrap();

        // 2. Disabling the thing revokes access despite the mark
        engine.disable_client(&u1, "t1").await.unwrap();
        let err = engine.can_access_by_id("c1", "t1").await.unwrap_err();
        assert!(matches!(err, ApiError::Authorization));

        // 3. Re-enabling restores it
        engine.enable_client(&u1, "t1").await.unwrap();
        engine.can_access_by_id("c1", "t1").await.unwrap();
    }

    #[tokio::test]
    async fn disabled_client_cannot_be_identified_by_key() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        engine
            .register_client(&u1, Client::new("t1", "", "key-1"))
            .await
            .unwrap();
        assert_eq!(engine.identify_thing("key-1").await.unwrap(), "t1");

        engine.disable_client(&u1, "t1").await.unwrap();

        let err = engine.identify_thing("key-1").await.unwrap_err();
        assert!(matches!(err, ApiError::Authorization));
    }

    #[tokio::test]
    async fn register_client_generates_id_and_key() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");

        let client = engine
            .register_client(&u1, Client::new("", "someone-else", ""))
            .await
            .unwrap();

        assert!(!client.id.is_empty());
        assert!(!client.secret.is_empty());
        assert_eq!(client.owner_id, "u1");
        let owner = store
            .retrieve(&PolicyKey::new("u1", &client.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.actions.len(), CLIENT_ACTIONS.len());

        let err = engine
            .register_client(&u1, Client::new("", "", client.secret.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_group_under_parent_needs_rights() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        engine.create_group(&u1, group("root")).await.unwrap();

        let err = engine
            .create_group(&u2, group("child").with_parent("root"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization));

        engine
            .add_policy(&u1, policy("u2", "root", &["g_add"]))
            .await
            .unwrap();
        let child = engine
            .create_group(&u2, group("child").with_parent("root"))
            .await
            .unwrap();
        assert_eq!(child.owner_id, "u2");
        assert_eq!(child.parent_id.as_deref(), Some("root"));

        let err = engine
            .create_group(&u1, group("orphan").with_parent("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn status_change_is_not_idempotent() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        engine.create_group(&u1, group("g1")).await.unwrap();

        let err = engine.enable_group(&u1, "g1").await.unwrap_err();
        assert!(matches!(err, ApiError::StatusAlreadyAssigned));

        let disabled = engine.disable_group(&u1, "g1").await.unwrap();
        assert_eq!(disabled.status, Status::Disabled);
        engine.enable_group(&u1, "g1").await.unwrap();
        let err = engine.enable_group(&u1, "g1").await.unwrap_err();
        assert!(matches!(err, ApiError::StatusAlreadyAssigned));
    }

    #[tokio::test]
    async fn status_change_requires_rights() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        engine.create_group(&u1, group("g1")).await.unwrap();
        engine
            .register_client(&u1, Client::new("t1", "", "key-1"))
            .await
            .unwrap();

        assert!(matches!(
            engine.disable_group(&u2, "g1").await.unwrap_err(),
            ApiError::Authorization
        ));
        assert!(matches!(
            engine.disable_client(&u2, "t1").await.unwrap_err(),
            ApiError::Authorization
        ));
        assert!(matches!(
            engine.disable_group(&u2, "missing").await.unwrap_err(),
            ApiError::NotFound
        ));

        engine
            .add_policy(&u1, policy("u2", "g1", &["g_update"]))
            .await
            .unwrap();
        engine.disable_group(&u2, "g1").await.unwrap();
    }

    #[tokio::test]
    async fn list_groups_walks_bounded_hierarchy() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        engine.create_group(&u1, group("g1")).await.unwrap();
        engine
            .create_group(&u1, group("g2").with_parent("g1"))
            .await
            .unwrap();
        engine
            .create_group(&u1, group("g3").with_parent("g2"))
            .await
            .unwrap();

        let ancestors = engine
            .list_groups(
                &u1,
                &GroupQuery {
                    id: Some("g3".to_string()),
                    direction: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ancestors.total, 3);

        let children = engine
            .list_groups(
                &u1,
                &GroupQuery {
                    id: Some("g1".to_string()),
                    direction: -1,
                    level: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = children.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);

        let err = engine
            .list_groups(
                &u1,
                &GroupQuery {
                    id: Some("nope".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn list_groups_filters_visibility_and_status() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        let root = admin(&tokens, "root");
        engine.create_group(&u1, group("g1")).await.unwrap();
        engine.create_group(&u1, group("g2")).await.unwrap();
        engine.disable_group(&u1, "g2").await.unwrap();

        let none = engine
            .list_groups(&u2, &GroupQuery::default())
            .await
            .unwrap();
        assert_eq!(none.total, 0);

        engine
            .add_policy(&u1, policy("u2", "g1", &["g_list"]))
            .await
            .unwrap();
        let listed = engine
            .list_groups(&u2, &GroupQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.groups[0].id, "g1");

        let disabled = engine
            .list_groups(
                &root,
                &GroupQuery {
                    status: Status::Disabled,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(disabled.total, 1);
        assert_eq!(disabled.groups[0].id, "g2");
    }

    #[tokio::test]
    async fn create_group_with_taken_owner_tuple_writes_nothing() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");

        // 1. u2 grants u1 a tuple on a group id that does not exist yet
        engine
            .add_policy(&u2, policy("u1", "g_new", &["m_read"]))
            .await
            .unwrap();

        // 2. u1 cannot create the group and no group is left behind
        let err = engine.create_group(&u1, group("g_new")).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(store.retrieve_group("g_new").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_client_with_taken_owner_tuple_writes_nothing() {
        let (engine, store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        engine
            .add_policy(&u2, policy("u1", "t_new", &["c_list"]))
            .await
            .unwrap();

        let err = engine
            .register_client(&u1, Client::new("t_new", "", "key-new"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(store.retrieve_client("t_new").await.unwrap().is_none());
        assert!(store.retrieve_client_by_secret("key-new").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_memberships_requires_client_rights() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");
        let u2 = access(&tokens, "u2");
        engine
            .register_client(&u1, Client::new("t1", "", "key-1"))
            .await
            .unwrap();
        engine.create_group(&u1, group("c1")).await.unwrap();
        engine.create_group(&u1, group("c2")).await.unwrap();
        engine
            .add_policy(&u1, policy("t1", "c1", &["m_read"]))
            .await
            .unwrap();

        let page = engine
            .list_memberships(&u1, "t1", &GroupQuery::default())
            .await
            .unwrap();
        let ids: Vec<&str> = page.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["c1"]);

        let err = engine
            .list_memberships(&u2, "t1", &GroupQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization));

        let err = engine
            .list_memberships(&u1, "t9", &GroupQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[test]
    fn mutations_are_audited_without_tokens() {
        let (engine, _store, tokens) = make_engine();
        let u1 = access(&tokens, "u1");

        let events = capture_async(|| async {
            engine
                .add_policy(&u1, policy("u2", "c1", &["m_read"]))
                .await
                .unwrap();
            let _ = engine.identify("garbage").await;
        });

        let audit = audit_events(&events);
        assert_eq!(audit.len(), 2);
        assert!(has_field(audit[0], "event", "policy_added"));
        assert!(has_field(audit[1], "event", "auth_failure"));
        assert!(audit.iter().all(|e| e.fields.iter().all(|(_, v)| v != &u1)));
    }
}
