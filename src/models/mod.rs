//! Data models for Lodestar entities.
//!
//! This module defines the core data structures:
//! - `Entity` - Pages, issues, and epics with a parent hierarchy
//! - `Container` - Workspaces, projects, and teamspaces that own entities
//! - `Membership` - Who belongs to a container, and with what role
//! - `Favorite` - Per-user bookmarks on entities, scoped to a container
//! - `RecentVisit` - Per-user visit log entries
//! - `Comment` - Threaded comments (including agent-run threads)

pub mod run;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a membership-bearing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Workspace,
    Project,
    Teamspace,
}

impl ContainerKind {
    /// Get all container kinds.
    pub fn all() -> &'static [ContainerKind] {
        &[
            ContainerKind::Workspace,
            ContainerKind::Project,
            ContainerKind::Teamspace,
        ]
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerKind::Workspace => "workspace",
            ContainerKind::Project => "project",
            ContainerKind::Teamspace => "teamspace",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "workspace" => Ok(ContainerKind::Workspace),
            "project" => Ok(ContainerKind::Project),
            "teamspace" => Ok(ContainerKind::Teamspace),
            _ => Err(format!("Unknown container kind: {}", s)),
        }
    }
}

/// Kind of a movable entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Page,
    Issue,
    Epic,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Page => "page",
            EntityKind::Issue => "issue",
            EntityKind::Epic => "epic",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "page" => Ok(EntityKind::Page),
            "issue" => Ok(EntityKind::Issue),
            "epic" => Ok(EntityKind::Epic),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// Role of a user inside a container.
///
/// Guests can view but never move entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Member,
    Guest,
}

impl Role {
    /// Returns true if this role may move entities between containers.
    pub fn can_move(&self) -> bool {
        matches!(self, Role::Admin | Role::Member)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Guest => "guest",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "guest" => Ok(Role::Guest),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// A registered user or agent identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (UUID)
    pub id: String,

    /// Display name
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with the given ID and name.
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            created_at: Utc::now(),
        }
    }
}

/// A membership-bearing scope that owns entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Unique identifier (UUID)
    pub id: String,

    /// Container kind
    pub kind: ContainerKind,

    /// Owning workspace. For a workspace container this is its own ID.
    pub workspace_id: String,

    /// Display name
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Soft-deletion timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Container {
    /// Create a new container.
    pub fn new(id: String, kind: ContainerKind, workspace_id: String, name: String) -> Self {
        Self {
            id,
            kind,
            workspace_id,
            name,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

/// A page, issue, or epic, owned by exactly one container at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier (UUID)
    pub id: String,

    /// Entity kind
    pub kind: EntityKind,

    /// Title
    pub title: String,

    /// Parent entity ID for hierarchical organization (same kind, forms a forest)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Owning container
    pub container_id: String,

    /// Owning workspace (denormalized for scoped queries)
    pub workspace_id: String,

    /// Creating user
    pub created_by: String,

    /// Last user to mutate the entity
    pub updated_by: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Soft-deletion timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Create a new entity in the given container.
    pub fn new(
        id: String,
        kind: EntityKind,
        title: String,
        container_id: String,
        workspace_id: String,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            title,
            parent: None,
            container_id,
            workspace_id,
            updated_by: created_by.clone(),
            created_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// A per-user bookmark on an entity, scoped to the container the entity
/// lived in when the favorite was created (or last reconciled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    /// Owning user
    pub user_id: String,

    /// Kind of the favorited entity
    pub entity_kind: EntityKind,

    /// Favorited entity
    pub entity_id: String,

    /// Container the favorite is scoped to
    pub container_id: String,

    /// Owning workspace
    pub workspace_id: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Favorite {
    /// Create a new favorite scoped to the entity's current container.
    pub fn new(
        user_id: String,
        entity_kind: EntityKind,
        entity_id: String,
        container_id: String,
        workspace_id: String,
    ) -> Self {
        Self {
            user_id,
            entity_kind,
            entity_id,
            container_id,
            workspace_id,
            created_at: Utc::now(),
        }
    }
}

/// A per-user recent-visit log entry. Pruned when entities move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentVisit {
    /// Visiting user
    pub user_id: String,

    /// Kind of the visited entity
    pub entity_kind: EntityKind,

    /// Visited entity
    pub entity_id: String,

    /// Owning workspace
    pub workspace_id: String,

    /// Visit timestamp
    pub visited_at: DateTime<Utc>,
}

impl RecentVisit {
    /// Record a visit happening now.
    pub fn new(
        user_id: String,
        entity_kind: EntityKind,
        entity_id: String,
        workspace_id: String,
    ) -> Self {
        Self {
            user_id,
            entity_kind,
            entity_id,
            workspace_id,
            visited_at: Utc::now(),
        }
    }
}

/// A comment, optionally parented to another comment (thread).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Unique identifier (UUID)
    pub id: String,

    /// Entity the comment is attached to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Container the comment is scoped to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,

    /// Owning workspace
    pub workspace_id: String,

    /// Parent comment for threading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Comment body
    pub body: String,

    /// Authoring user
    pub actor: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Create a new comment in the given workspace.
    pub fn new(id: String, workspace_id: String, body: String, actor: String) -> Self {
        Self {
            id,
            entity_id: None,
            container_id: None,
            workspace_id,
            parent: None,
            body,
            actor,
            created_at: Utc::now(),
        }
    }
}

/// Per-workspace feature flags recognized by the permission gate.
///
/// This is a closed set: unknown flag names are rejected at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    /// Entities may be moved between containers
    MovePages,
    /// Agent runs and activity recording are available
    AgentRuns,
    /// Teamspace containers are available
    Teamspaces,
}

impl FeatureFlag {
    /// Get all recognized flags.
    pub fn all() -> &'static [FeatureFlag] {
        &[
            FeatureFlag::MovePages,
            FeatureFlag::AgentRuns,
            FeatureFlag::Teamspaces,
        ]
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureFlag::MovePages => "move_pages",
            FeatureFlag::AgentRuns => "agent_runs",
            FeatureFlag::Teamspaces => "teamspaces",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for FeatureFlag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "move_pages" => Ok(FeatureFlag::MovePages),
            "agent_runs" => Ok(FeatureFlag::AgentRuns),
            "teamspaces" => Ok(FeatureFlag::Teamspaces),
            _ => Err(format!("Unknown feature flag: {}", s)),
        }
    }
}
