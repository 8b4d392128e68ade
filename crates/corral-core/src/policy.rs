use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pseudo-object granting its actions on every client.
pub const THINGS_OBJECT: &str = "things";

pub const GROUP_ACTIONS: &[&str] = &["g_add", "g_delete", "g_update", "g_list", "m_write", "m_read"];

pub const CLIENT_ACTIONS: &[&str] = &[
    "c_delete", "c_update", "c_list", "c_share", "m_write", "m_read",
];

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

pub fn is_valid_action(action: &str) -> bool {
    GROUP_ACTIONS.contains(&action) || CLIENT_ACTIONS.contains(&action)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("policy subject must not be empty")]
    EmptySubject,

    #[error("policy object must not be empty")]
    EmptyObject,

    #[error("policy must carry at least one action")]
    EmptyActions,

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Client,
    Group,
}

impl EntityType {
    pub fn actions(self) -> &'static [&'static str] {
        match self {
            EntityType::Client => CLIENT_ACTIONS,
            EntityType::Group => GROUP_ACTIONS,
        }
    }

    pub fn is_valid_action(self, action: &str) -> bool {
        self.actions().contains(&action)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Client => "client",
            EntityType::Group => "group",
        }
    }
}

impl FromStr for EntityType {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(EntityType::Client),
            "group" => Ok(EntityType::Group),
            other => Err(PolicyError::InvalidEntityType(other.to_string())),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a tuple for update, delete and cache purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey {
    pub subject: String,
    pub object: String,
}

impl PolicyKey {
    pub fn new(subject: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.subject, self.object)
    }
}

/// A directed relation granting `subject` a set of actions on `object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub owner_id: String,
    pub subject: String,
    pub object: String,
    pub actions: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: String,
}

impl Policy {
    pub fn new<A>(
        subject: impl Into<String>,
        object: impl Into<String>,
        actions: impl IntoIterator<Item = A>,
    ) -> Self
    where
        A: Into<String>,
    {
        let now = Utc::now();
        Self {
            owner_id: String::new(),
            subject: subject.into(),
            object: object.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            created_at: now,
            updated_at: now,
            updated_by: String::new(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(&self.subject, &self.object)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.subject.is_empty() {
            return Err(PolicyError::EmptySubject);
        }
        if self.object.is_empty() {
            return Err(PolicyError::EmptyObject);
        }
        if self.actions.is_empty() {
            return Err(PolicyError::EmptyActions);
        }
        if let Some(bad) = self.actions.iter().find(|a| !is_valid_action(a)) {
            return Err(PolicyError::InvalidAction(bad.clone()));
        }
        Ok(())
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    /// True when every action in `requested` is already held by this tuple.
    pub fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|a| self.has_action(a))
    }

    /// Sorts and deduplicates the action set.
    pub fn normalize(&mut self) {
        self.actions.sort();
        self.actions.dedup();
    }
}

/// The object/action pair a caller asks to be authorized for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessRequest {
    pub object: String,
    pub action: String,
}

impl AccessRequest {
    pub fn new(object: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            action: action.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyQuery {
    pub offset: u64,
    pub limit: u64,
    pub owner_id: Option<String>,
    pub subject: Option<String>,
    pub object: Option<String>,
    pub action: Option<String>,
}

impl PolicyQuery {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if let Some(ref action) = self.action
            && !is_valid_action(action)
        {
            return Err(PolicyError::InvalidAction(action.clone()));
        }
        Ok(())
    }

    pub fn effective_limit(&self) -> u64 {
        match self.limit {
            0 => DEFAULT_LIMIT,
            n => n.min(MAX_LIMIT),
        }
    }

    pub fn matches(&self, policy: &Policy) -> bool {
        if let Some(ref owner) = self.owner_id
            && owner != &policy.owner_id
        {
            return false;
        }
        if let Some(ref subject) = self.subject
            && subject != &policy.subject
        {
            return false;
        }
        if let Some(ref object) = self.object
            && object != &policy.object
        {
            return false;
        }
        if let Some(ref action) = self.action
            && !policy.has_action(action)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub policies: Vec<Policy>,
}
