use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;

use corral_core::entity::{Client, Group, Status};
use corral_core::policy::{Policy, PolicyKey, PolicyPage, PolicyQuery};

use crate::traits::{ClientRepository, GroupRepository, PolicyReader, PolicyWriter, StorageError};

#[derive(Debug, Default)]
struct InnerState {
    policies: BTreeMap<PolicyKey, Policy>,
    clients: HashMap<String, Client>,
    groups: HashMap<String, Group>,
}

/// Process-local store; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
    reads: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read operations served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }
}

impl PolicyReader for InMemoryStore {
    async fn retrieve(&self, key: &PolicyKey) -> Result<Option<Policy>, StorageError> {
        self.count_read();
        let state = self.state.lock();
        Ok(state.policies.get(key).cloned())
    }

    async fn retrieve_by_subject(&self, subject: &str) -> Result<Vec<Policy>, StorageError> {
        self.count_read();
        let state = self.state.lock();
        Ok(state
            .policies
            .values()
            .filter(|p| p.subject == subject)
            .cloned()
            .collect())
    }

    async fn retrieve_all(&self, query: &PolicyQuery) -> Result<PolicyPage, StorageError> {
        self.count_read();
        let state = self.state.lock();
        let limit = query.effective_limit();

        let matching: Vec<&Policy> = state.policies.values().filter(|p| query.matches(p)).collect();
        let total = matching.len() as u64;
        let policies = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(PolicyPage {
            total,
            offset: query.offset,
            limit,
            policies,
        })
    }
}

impl PolicyWriter for InMemoryStore {
    async fn save(&self, policy: &Policy) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let key = policy.key();
        if state.policies.contains_key(&key) {
            return Err(StorageError::Conflict(key.to_string()));
        }
        state.policies.insert(key, policy.clone());
        Ok(())
    }

    async fn update(&self, policy: &Policy) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let existing = state
            .policies
            .get_mut(&policy.key())
            .ok_or(StorageError::NotFound)?;

        existing.actions = policy.actions.clone();
        existing.updated_at = policy.updated_at;
        existing.updated_by = policy.updated_by.clone();
        Ok(())
    }

    async fn delete(&self, key: &PolicyKey) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state
            .policies
            .remove(key)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}

impl ClientRepository for InMemoryStore {
    async fn save_client(&self, client: &Client) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.clients.contains_key(&client.id) {
            return Err(StorageError::Conflict(format!("client {}", client.id)));
        }
        if state.clients.values().any(|c| c.secret == client.secret) {
            return Err(StorageError::Conflict("client key".to_string()));
        }
        state.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn retrieve_client(&self, id: &str) -> Result<Option<Client>, StorageError> {
        self.count_read();
        let state = self.state.lock();
        Ok(state.clients.get(id).cloned())
    }

    async fn retrieve_client_by_secret(&self, secret: &str) -> Result<Option<Client>, StorageError> {
        self.count_read();
        let state = self.state.lock();
        Ok(state.clients.values().find(|c| c.secret == secret).cloned())
    }

    async fn change_client_status(&self, id: &str, status: Status) -> Result<Client, StorageError> {
        let mut state = self.state.lock();
        let client = state.clients.get_mut(id).ok_or(StorageError::NotFound)?;
        client.status = status;
        client.updated_at = Utc::now();
        Ok(client.clone())
    }
}

impl GroupRepository for InMemoryStore {
    async fn save_group(&self, group: &Group) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.groups.contains_key(&group.id) {
            return Err(StorageError::Conflict(format!("group {}", group.id)));
        }
        if let Some(ref parent) = group.parent_id
            && !state.groups.contains_key(parent)
        {
            return Err(StorageError::NotFound);
        }
        state.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn retrieve_group(&self, id: &str) -> Result<Option<Group>, StorageError> {
        self.count_read();
        let state = self.state.lock();
        Ok(state.groups.get(id).cloned())
    }

    async fn retrieve_all_groups(&self) -> Result<Vec<Group>, StorageError> {
        self.count_read();
        let state = self.state.lock();
        Ok(state.groups.values().cloned().collect())
    }

    async fn change_group_status(&self, id: &str, status: Status) -> Result<Group, StorageError> {
        let mut state = self.state.lock();
        let group = state.groups.get_mut(id).ok_or(StorageError::NotFound)?;
        group.status = status;
        group.updated_at = Utc::now();
        Ok(group.clone())
    }
}
