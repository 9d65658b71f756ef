//! Permission gate: composable boolean predicates evaluated before any
//! resolver runs.
//!
//! A gated operation names a [`Capability`] and a [`Scope`]; the gate ANDs
//! three independent predicates: the actor exists, the actor is a member of
//! the scope container (with a sufficient role where the capability demands
//! one), and the capability's feature flag is enabled for the workspace.
//! Flags arrive as an explicit [`FlagSet`] loaded by the caller; the gate
//! itself performs no flag lookups and has no side effects.

use crate::models::{ContainerKind, FeatureFlag};
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Explicit set of enabled feature flags for one workspace.
///
/// Loaded once per operation via `Storage::workspace_flags` and passed into
/// every gated call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagSet {
    move_pages: bool,
    agent_runs: bool,
    teamspaces: bool,
}

impl FlagSet {
    /// A flag set with every recognized flag enabled. Used in tests and by
    /// operations that are deliberately ungated.
    pub fn all_enabled() -> Self {
        Self {
            move_pages: true,
            agent_runs: true,
            teamspaces: true,
        }
    }

    /// Enable a flag.
    pub fn enable(&mut self, flag: FeatureFlag) {
        match flag {
            FeatureFlag::MovePages => self.move_pages = true,
            FeatureFlag::AgentRuns => self.agent_runs = true,
            FeatureFlag::Teamspaces => self.teamspaces = true,
        }
    }

    /// Check whether a flag is enabled.
    pub fn is_enabled(&self, flag: FeatureFlag) -> bool {
        match flag {
            FeatureFlag::MovePages => self.move_pages,
            FeatureFlag::AgentRuns => self.agent_runs,
            FeatureFlag::Teamspaces => self.teamspaces,
        }
    }
}

/// What an actor is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Create an entity in a container
    CreateEntity,
    /// Move entities between containers
    MoveEntities,
    /// Record activities on an agent run
    RecordActivity,
    /// Create or join teamspace containers
    UseTeamspaces,
}

impl Capability {
    /// The feature flag gating this capability, if any.
    pub fn required_flag(&self) -> Option<FeatureFlag> {
        match self {
            Capability::CreateEntity => None,
            Capability::MoveEntities => Some(FeatureFlag::MovePages),
            Capability::RecordActivity => Some(FeatureFlag::AgentRuns),
            Capability::UseTeamspaces => Some(FeatureFlag::Teamspaces),
        }
    }

    /// Whether guests are denied this capability.
    pub fn requires_write_role(&self) -> bool {
        matches!(self, Capability::MoveEntities)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::CreateEntity => "create_entity",
            Capability::MoveEntities => "move_entities",
            Capability::RecordActivity => "record_activity",
            Capability::UseTeamspaces => "use_teamspaces",
        };
        write!(f, "{}", s)
    }
}

/// The container scope a capability is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Workspace(String),
    Project(String),
    Teamspace(String),
}

impl Scope {
    /// Build a scope from a container kind and id.
    pub fn for_container(kind: ContainerKind, id: &str) -> Self {
        match kind {
            ContainerKind::Workspace => Scope::Workspace(id.to_string()),
            ContainerKind::Project => Scope::Project(id.to_string()),
            ContainerKind::Teamspace => Scope::Teamspace(id.to_string()),
        }
    }

    /// The container id this scope names.
    pub fn container_id(&self) -> &str {
        match self {
            Scope::Workspace(id) | Scope::Project(id) | Scope::Teamspace(id) => id,
        }
    }

    /// The container kind this scope expects.
    pub fn kind(&self) -> ContainerKind {
        match self {
            Scope::Workspace(_) => ContainerKind::Workspace,
            Scope::Project(_) => ContainerKind::Project,
            Scope::Teamspace(_) => ContainerKind::Teamspace,
        }
    }
}

/// Evaluate the gate. Returns false on any failed predicate; errors only
/// surface for storage failures.
pub fn is_permitted(
    conn: &Connection,
    flags: &FlagSet,
    capability: Capability,
    actor_id: &str,
    scope: &Scope,
) -> Result<bool> {
    if let Some(flag) = capability.required_flag() {
        if !flags.is_enabled(flag) {
            return Ok(false);
        }
    }

    if !actor_exists(conn, actor_id)? {
        return Ok(false);
    }

    // The scope container must exist, be live, and be of the expected kind.
    let kind: Option<String> = conn
        .query_row(
            "SELECT kind FROM containers WHERE id = ?1 AND deleted_at IS NULL",
            [scope.container_id()],
            |row| row.get(0),
        )
        .optional()?;
    match kind {
        Some(k) if k == scope.kind().to_string() => {}
        _ => return Ok(false),
    }

    let role: Option<String> = conn
        .query_row(
            "SELECT role FROM memberships WHERE container_id = ?1 AND user_id = ?2",
            params![scope.container_id(), actor_id],
            |row| row.get(0),
        )
        .optional()?;
    let role = match role {
        Some(r) => r
            .parse::<crate::models::Role>()
            .map_err(Error::InvalidInput)?,
        None => return Ok(false),
    };

    if capability.requires_write_role() && !role.can_move() {
        return Ok(false);
    }

    Ok(true)
}

/// Evaluate the gate and abort with `PermissionDenied` on failure.
pub fn require(
    conn: &Connection,
    flags: &FlagSet,
    capability: Capability,
    actor_id: &str,
    scope: &Scope,
) -> Result<()> {
    if is_permitted(conn, flags, capability, actor_id, scope)? {
        Ok(())
    } else {
        Err(Error::PermissionDenied(format!(
            "{} denied for user {} in {} {}",
            capability,
            actor_id,
            scope.kind(),
            scope.container_id(),
        )))
    }
}

fn actor_exists(conn: &Connection, actor_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        [actor_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, ContainerKind, Role, User};
    use crate::storage::{new_id, Storage};
    use crate::test_utils::TestEnv;

    fn seed(storage: &mut Storage) -> (String, String, String) {
        let ws = new_id();
        let project = new_id();
        let user = new_id();
        storage
            .create_user(&User::new(user.clone(), "ada".to_string()))
            .unwrap();
        storage
            .create_container(&Container::new(
                ws.clone(),
                ContainerKind::Workspace,
                ws.clone(),
                "Acme".to_string(),
            ))
            .unwrap();
        storage
            .create_container(&Container::new(
                project.clone(),
                ContainerKind::Project,
                ws.clone(),
                "Apollo".to_string(),
            ))
            .unwrap();
        storage.add_member(&ws, &user, Role::Member).unwrap();
        storage.add_member(&project, &user, Role::Member).unwrap();
        (ws, project, user)
    }

    #[test]
    fn test_member_with_flag_is_permitted() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (_, project, user) = seed(&mut storage);

        let flags = FlagSet::all_enabled();
        assert!(is_permitted(
            storage.conn(),
            &flags,
            Capability::MoveEntities,
            &user,
            &Scope::Project(project),
        )
        .unwrap());
    }

    #[test]
    fn test_flag_disabled_denies() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (_, project, user) = seed(&mut storage);

        let flags = FlagSet::default();
        assert!(!is_permitted(
            storage.conn(),
            &flags,
            Capability::MoveEntities,
            &user,
            &Scope::Project(project),
        )
        .unwrap());
    }

    #[test]
    fn test_non_member_denied() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (_, project, _) = seed(&mut storage);

        let outsider = new_id();
        storage
            .create_user(&User::new(outsider.clone(), "eve".to_string()))
            .unwrap();

        let flags = FlagSet::all_enabled();
        assert!(!is_permitted(
            storage.conn(),
            &flags,
            Capability::MoveEntities,
            &outsider,
            &Scope::Project(project),
        )
        .unwrap());
    }

    #[test]
    fn test_guest_cannot_move_but_can_create() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (_, project, _) = seed(&mut storage);

        let guest = new_id();
        storage
            .create_user(&User::new(guest.clone(), "guest".to_string()))
            .unwrap();
        storage.add_member(&project, &guest, Role::Guest).unwrap();

        let flags = FlagSet::all_enabled();
        assert!(!is_permitted(
            storage.conn(),
            &flags,
            Capability::MoveEntities,
            &guest,
            &Scope::Project(project.clone()),
        )
        .unwrap());
        assert!(is_permitted(
            storage.conn(),
            &flags,
            Capability::CreateEntity,
            &guest,
            &Scope::Project(project),
        )
        .unwrap());
    }

    #[test]
    fn test_scope_kind_mismatch_denied() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, _, user) = seed(&mut storage);

        // The workspace container exists, but the scope claims it is a project.
        let flags = FlagSet::all_enabled();
        assert!(!is_permitted(
            storage.conn(),
            &flags,
            Capability::CreateEntity,
            &user,
            &Scope::Project(ws),
        )
        .unwrap());
    }

    #[test]
    fn test_require_maps_to_permission_denied() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (_, project, user) = seed(&mut storage);

        let err = require(
            storage.conn(),
            &FlagSet::default(),
            Capability::MoveEntities,
            &user,
            &Scope::Project(project),
        )
        .unwrap_err();
        assert!(matches!(err, crate::Error::PermissionDenied(_)));
    }
}
