use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{DEFAULT_LIMIT, MAX_LIMIT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Enabled,
    Disabled,
    All,
}

impl Status {
    /// Query filter semantics: `All` matches every stored status.
    pub fn admits(self, status: Status) -> bool {
        self == Status::All || self == status
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Enabled => "enabled",
            Status::Disabled => "disabled",
            Status::All => "all",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(Status::Enabled),
            "disabled" => Ok(Status::Disabled),
            "all" => Ok(Status::All),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// A device or user principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, secret: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: String::new(),
            owner_id: owner_id.into(),
            secret: secret.into(),
            status: Status::Enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A channel or any other nestable resource.
///
/// `level` and `path` are projections filled in by hierarchy queries; they are
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub level: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Group {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            owner_id: owner_id.into(),
            parent_id: None,
            status: Status::Enabled,
            created_at: now,
            updated_at: now,
            level: 0,
            path: String::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ancestors,
    Descendants,
}

impl From<i64> for Direction {
    fn from(value: i64) -> Self {
        if value >= 0 {
            Direction::Ancestors
        } else {
            Direction::Descendants
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GroupQuery {
    /// Root of a hierarchy walk; `None` lists every visible group.
    pub id: Option<String>,
    pub level: usize,
    pub direction: i64,
    pub status: Status,
    pub offset: u64,
    pub limit: u64,
}

impl Default for GroupQuery {
    fn default() -> Self {
        Self {
            id: None,
            level: 0,
            direction: 0,
            status: Status::All,
            offset: 0,
            limit: 0,
        }
    }
}

impl GroupQuery {
    pub fn direction(&self) -> Direction {
        Direction::from(self.direction)
    }

    pub fn effective_limit(&self) -> u64 {
        match self.limit {
            0 => DEFAULT_LIMIT,
            n => n.min(MAX_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupsPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub groups: Vec<Group>,
}

impl GroupsPage {
    /// Slices an already filtered result set into a page.
    pub fn paginate(groups: Vec<Group>, offset: u64, limit: u64) -> Self {
        let total = groups.len() as u64;
        let groups = groups
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Self {
            total,
            offset,
            limit,
            groups,
        }
    }
}
