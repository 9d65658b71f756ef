//! Command implementations for the Lodestar CLI.
//!
//! This module contains the business logic for each CLI command. Every
//! command opens storage for the given data directory, evaluates the
//! permission gate where one applies, and returns a result type that can
//! render as JSON (default) or human-readable text.

use crate::config::Config;
use crate::models::run::{Activity, ActivitySignal, Run, RunStatus};
use crate::models::{
    Comment, Container, ContainerKind, Entity, EntityKind, Favorite, FeatureFlag, RecentVisit,
    Role, User,
};
use crate::permissions::{self, Capability, Scope};
use crate::resolvers::{collect_descendants, move_entities, record_activity, MoveDestination,
    MoveOutcome};
use crate::storage::{new_id, validate_id, Storage};
use crate::tasks::{self, DeferredTask, NestedMoveArgs, QueueSummary, RunWebhookArgs,
    TaskRegistry};
use crate::{Error, Result};
use serde::Serialize;
use std::path::Path;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

// === System ===

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub path: String,
    pub created: bool,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.created {
            format!("Initialized data directory at {}", self.path)
        } else {
            format!("Already initialized at {}", self.path)
        }
    }
}

/// Initialize the data directory. Idempotent.
pub fn system_init(data_dir: &Path) -> Result<InitResult> {
    let created = !Storage::exists(data_dir);
    Storage::init(data_dir)?;
    Ok(InitResult {
        path: data_dir.display().to_string(),
        created,
    })
}

#[derive(Debug, Serialize)]
pub struct InfoResult {
    pub path: String,
    pub version: String,
    pub commit: String,
    pub built: String,
    pub users: usize,
    pub containers: usize,
    pub queued_tasks: usize,
}

impl Output for InfoResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Lodestar {} ({} built {})\nData: {}\nUsers: {}  Containers: {}  Queued tasks: {}",
            self.version,
            self.commit,
            self.built,
            self.path,
            self.users,
            self.containers,
            self.queued_tasks
        )
    }
}

/// Summarize the instance.
pub fn system_info(data_dir: &Path) -> Result<InfoResult> {
    let storage = Storage::open(data_dir)?;
    let users: i64 = storage
        .conn()
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    let containers = storage.list_containers(None)?.len();
    let queued = storage.queued_tasks()?.len();
    Ok(InfoResult {
        path: data_dir.display().to_string(),
        version: crate::cli::package_version().to_string(),
        commit: crate::cli::git_commit().to_string(),
        built: crate::cli::build_timestamp().to_string(),
        users: users as usize,
        containers,
        queued_tasks: queued,
    })
}

// === Users ===

#[derive(Debug, Serialize)]
pub struct UserResult {
    pub user: User,
}

impl Output for UserResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Created user {} ({})", self.user.name, self.user.id)
    }
}

/// Create a user.
pub fn user_create(data_dir: &Path, name: String) -> Result<UserResult> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("User name cannot be empty".to_string()));
    }
    let mut storage = Storage::open(data_dir)?;
    let user = User::new(new_id(), name);
    storage.create_user(&user)?;
    Ok(UserResult { user })
}

// === Containers ===

#[derive(Debug, Serialize)]
pub struct ContainerResult {
    pub container: Container,
}

impl Output for ContainerResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Created {} {} ({})",
            self.container.kind, self.container.name, self.container.id
        )
    }
}

/// Create a workspace. The creator becomes its first admin.
pub fn workspace_create(data_dir: &Path, name: String, creator: &str) -> Result<ContainerResult> {
    let mut storage = Storage::open(data_dir)?;
    if !storage.user_exists(creator)? {
        return Err(Error::NotFound(format!("User not found: {}", creator)));
    }

    let id = new_id();
    let container = Container::new(id.clone(), ContainerKind::Workspace, id, name);
    storage.create_container(&container)?;
    storage.add_member(&container.id, creator, Role::Admin)?;
    Ok(ContainerResult { container })
}

/// Create a project inside a workspace.
pub fn project_create(
    data_dir: &Path,
    name: String,
    workspace_id: &str,
    creator: &str,
) -> Result<ContainerResult> {
    let mut storage = Storage::open(data_dir)?;
    let flags = storage.workspace_flags(workspace_id)?;
    permissions::require(
        storage.conn(),
        &flags,
        Capability::CreateEntity,
        creator,
        &Scope::Workspace(workspace_id.to_string()),
    )?;

    let container = Container::new(
        new_id(),
        ContainerKind::Project,
        workspace_id.to_string(),
        name,
    );
    storage.create_container(&container)?;
    storage.add_member(&container.id, creator, Role::Admin)?;
    Ok(ContainerResult { container })
}

/// Create a teamspace inside a workspace. Gated on the teamspaces flag.
pub fn teamspace_create(
    data_dir: &Path,
    name: String,
    workspace_id: &str,
    creator: &str,
) -> Result<ContainerResult> {
    let mut storage = Storage::open(data_dir)?;
    let flags = storage.workspace_flags(workspace_id)?;
    permissions::require(
        storage.conn(),
        &flags,
        Capability::UseTeamspaces,
        creator,
        &Scope::Workspace(workspace_id.to_string()),
    )?;

    let container = Container::new(
        new_id(),
        ContainerKind::Teamspace,
        workspace_id.to_string(),
        name,
    );
    storage.create_container(&container)?;
    storage.add_member(&container.id, creator, Role::Admin)?;
    Ok(ContainerResult { container })
}

#[derive(Debug, Serialize)]
pub struct MemberResult {
    pub container_id: String,
    pub user_id: String,
    pub role: Role,
}

impl Output for MemberResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Added {} to {} as {}",
            self.user_id, self.container_id, self.role
        )
    }
}

/// Add (or re-role) a member of a container.
pub fn container_add_member(
    data_dir: &Path,
    container_id: &str,
    user_id: &str,
    role: Role,
) -> Result<MemberResult> {
    let mut storage = Storage::open(data_dir)?;
    storage.add_member(container_id, user_id, role)?;
    Ok(MemberResult {
        container_id: container_id.to_string(),
        user_id: user_id.to_string(),
        role,
    })
}

#[derive(Debug, Serialize)]
pub struct FlagResult {
    pub workspace_id: String,
    pub flag: FeatureFlag,
    pub enabled: bool,
}

impl Output for FlagResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Flag {} {} for workspace {}",
            self.flag,
            if self.enabled { "enabled" } else { "disabled" },
            self.workspace_id
        )
    }
}

/// Enable or disable a per-workspace feature flag. Unknown flag names are
/// rejected before any write.
pub fn workspace_flag(
    data_dir: &Path,
    workspace_id: &str,
    flag_name: &str,
    enable: bool,
) -> Result<FlagResult> {
    let flag: FeatureFlag = flag_name.parse().map_err(Error::InvalidInput)?;
    let mut storage = Storage::open(data_dir)?;
    let container = storage.get_container(workspace_id)?;
    if container.kind != ContainerKind::Workspace {
        return Err(Error::InvalidInput(format!(
            "Not a workspace: {}",
            workspace_id
        )));
    }

    if enable {
        storage.enable_flag(workspace_id, flag)?;
    } else {
        storage.disable_flag(workspace_id, flag)?;
    }
    Ok(FlagResult {
        workspace_id: workspace_id.to_string(),
        flag,
        enabled: enable,
    })
}

// === Entities ===

#[derive(Debug, Serialize)]
pub struct EntityResult {
    pub entity: Entity,
}

impl Output for EntityResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "{} {} ({}) in {}",
            self.entity.kind, self.entity.title, self.entity.id, self.entity.container_id
        )
    }
}

/// Create an entity in a container. Gated on container membership.
pub fn entity_create(
    data_dir: &Path,
    kind: EntityKind,
    title: String,
    container_id: &str,
    actor: &str,
    parent: Option<&str>,
) -> Result<EntityResult> {
    let mut storage = Storage::open(data_dir)?;
    let container = storage.get_container(container_id)?;
    let flags = storage.workspace_flags(&container.workspace_id)?;
    permissions::require(
        storage.conn(),
        &flags,
        Capability::CreateEntity,
        actor,
        &Scope::for_container(container.kind, container_id),
    )?;

    if let Some(parent_id) = parent {
        let parent_entity = storage.get_entity(parent_id)?;
        if parent_entity.deleted_at.is_some() {
            return Err(Error::InvalidInput(format!(
                "Parent is deleted: {}",
                parent_id
            )));
        }
        if parent_entity.kind != kind {
            return Err(Error::InvalidInput(format!(
                "Parent kind {} does not match {}",
                parent_entity.kind, kind
            )));
        }
        // Parent links never cross containers; the subtree mover assumes
        // every descendant starts in the root's workspace.
        if parent_entity.container_id != container_id {
            return Err(Error::InvalidInput(format!(
                "Parent {} is in a different container",
                parent_id
            )));
        }
    }

    let mut entity = Entity::new(
        new_id(),
        kind,
        title,
        container_id.to_string(),
        container.workspace_id,
        actor.to_string(),
    );
    entity.parent = parent.map(|p| p.to_string());
    storage.create_entity(&entity)?;
    Ok(EntityResult { entity })
}

/// Show an entity.
pub fn entity_show(data_dir: &Path, id: &str) -> Result<EntityResult> {
    let storage = Storage::open(data_dir)?;
    let entity = storage.get_entity(id)?;
    Ok(EntityResult { entity })
}

#[derive(Debug, Serialize)]
pub struct MoveResult {
    pub entity_id: String,
    pub destination: String,
    pub outcome: MoveOutcome,
    pub nested_task: i64,
}

impl Output for MoveResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Moved {} to {} (favorites: {} kept, {} removed; comments: {}; subtree task #{})",
            self.entity_id,
            self.destination,
            self.outcome.favorites_repointed,
            self.outcome.favorites_deleted,
            self.outcome.comments_repointed,
            self.nested_task
        )
    }
}

/// Move an entity (and, deferred, its subtree) to another container.
///
/// The gate is evaluated for both the source and destination containers
/// before any write; denial leaves the database untouched. The root is
/// lifted to the top level of the destination, then a `nested_move` task
/// is enqueued to catch the descendants up.
pub fn entity_move(
    data_dir: &Path,
    entity_id: &str,
    to_kind: ContainerKind,
    to_container: &str,
    actor: &str,
) -> Result<MoveResult> {
    validate_id(entity_id)?;
    let mut storage = Storage::open(data_dir)?;
    let entity = storage.get_entity(entity_id)?;
    let source = storage.get_container(&entity.container_id)?;
    let flags = storage.workspace_flags(&entity.workspace_id)?;

    permissions::require(
        storage.conn(),
        &flags,
        Capability::MoveEntities,
        actor,
        &Scope::for_container(source.kind, &source.id),
    )?;
    permissions::require(
        storage.conn(),
        &flags,
        Capability::MoveEntities,
        actor,
        &Scope::for_container(to_kind, to_container),
    )?;

    let dest = MoveDestination {
        kind: to_kind,
        container_id: to_container.to_string(),
    };
    let tx = storage.transaction()?;
    let outcome = move_entities(&tx, &[entity_id.to_string()], &dest, actor)?;
    // The moved root is lifted to the top of the destination.
    tx.execute(
        "UPDATE entities SET parent = NULL WHERE id = ?1",
        [entity_id],
    )?;
    tx.commit()?;

    let nested_task = storage.enqueue_task(
        "nested_move",
        &serde_json::to_value(NestedMoveArgs {
            root_id: entity_id.to_string(),
            kind: to_kind,
            container_id: to_container.to_string(),
            actor: actor.to_string(),
        })?,
    )?;

    Ok(MoveResult {
        entity_id: entity_id.to_string(),
        destination: to_container.to_string(),
        outcome,
        nested_task,
    })
}

#[derive(Debug, Serialize)]
pub struct SubtreeResult {
    pub root: String,
    pub descendants: Vec<String>,
    pub count: usize,
}

impl Output for SubtreeResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("{} descendants of {}", self.count, self.root)
    }
}

/// List all live descendants of an entity.
pub fn entity_subtree(data_dir: &Path, id: &str) -> Result<SubtreeResult> {
    let storage = Storage::open(data_dir)?;
    let descendants = collect_descendants(storage.conn(), id)?;
    Ok(SubtreeResult {
        root: id.to_string(),
        count: descendants.len(),
        descendants,
    })
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub entity_id: String,
    pub deleted: bool,
}

impl Output for DeleteResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Deleted {}", self.entity_id)
    }
}

/// Soft-delete an entity.
pub fn entity_delete(data_dir: &Path, id: &str) -> Result<DeleteResult> {
    let mut storage = Storage::open(data_dir)?;
    storage.soft_delete_entity(id)?;
    Ok(DeleteResult {
        entity_id: id.to_string(),
        deleted: true,
    })
}

// === Favorites and visits ===

#[derive(Debug, Serialize)]
pub struct FavResult {
    pub user_id: String,
    pub entity_id: String,
    pub added: bool,
}

impl Output for FavResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.added {
            format!("Favorited {} for {}", self.entity_id, self.user_id)
        } else {
            format!("Unfavorited {} for {}", self.entity_id, self.user_id)
        }
    }
}

/// Favorite an entity, scoped to its current container.
pub fn fav_add(data_dir: &Path, user_id: &str, entity_id: &str) -> Result<FavResult> {
    let mut storage = Storage::open(data_dir)?;
    if !storage.user_exists(user_id)? {
        return Err(Error::NotFound(format!("User not found: {}", user_id)));
    }
    let entity = storage.get_entity(entity_id)?;
    if entity.deleted_at.is_some() {
        return Err(Error::InvalidInput(format!(
            "Entity is deleted: {}",
            entity_id
        )));
    }
    // A favorite is scoped to the entity's container; the owner must be a
    // member of that container.
    if storage.member_role(&entity.container_id, user_id)?.is_none() {
        return Err(Error::PermissionDenied(format!(
            "User {} is not a member of container {}",
            user_id, entity.container_id
        )));
    }

    storage.add_favorite(&Favorite::new(
        user_id.to_string(),
        entity.kind,
        entity.id,
        entity.container_id,
        entity.workspace_id,
    ))?;
    Ok(FavResult {
        user_id: user_id.to_string(),
        entity_id: entity_id.to_string(),
        added: true,
    })
}

/// Remove a favorite.
pub fn fav_rm(data_dir: &Path, user_id: &str, entity_id: &str) -> Result<FavResult> {
    let mut storage = Storage::open(data_dir)?;
    storage.remove_favorite(user_id, entity_id)?;
    Ok(FavResult {
        user_id: user_id.to_string(),
        entity_id: entity_id.to_string(),
        added: false,
    })
}

#[derive(Debug, Serialize)]
pub struct FavListResult {
    pub user_id: String,
    pub favorites: Vec<Favorite>,
}

impl Output for FavListResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("{} favorites for {}", self.favorites.len(), self.user_id);
        for fav in &self.favorites {
            out.push_str(&format!(
                "\n  {} {} (in {})",
                fav.entity_kind, fav.entity_id, fav.container_id
            ));
        }
        out
    }
}

/// List a user's favorites.
pub fn fav_list(data_dir: &Path, user_id: &str) -> Result<FavListResult> {
    let storage = Storage::open(data_dir)?;
    let favorites = storage.list_favorites(user_id)?;
    Ok(FavListResult {
        user_id: user_id.to_string(),
        favorites,
    })
}

#[derive(Debug, Serialize)]
pub struct VisitResult {
    pub user_id: String,
    pub entity_id: String,
}

impl Output for VisitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Recorded visit to {} by {}", self.entity_id, self.user_id)
    }
}

/// Record that a user visited an entity.
pub fn visit_record(data_dir: &Path, user_id: &str, entity_id: &str) -> Result<VisitResult> {
    let mut storage = Storage::open(data_dir)?;
    if !storage.user_exists(user_id)? {
        return Err(Error::NotFound(format!("User not found: {}", user_id)));
    }
    let entity = storage.get_entity(entity_id)?;

    storage.record_visit(&RecentVisit::new(
        user_id.to_string(),
        entity.kind,
        entity.id,
        entity.workspace_id,
    ))?;
    Ok(VisitResult {
        user_id: user_id.to_string(),
        entity_id: entity_id.to_string(),
    })
}

// === Runs ===

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub run: Run,
    pub webhook_task: i64,
}

impl Output for RunResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Started run {} ({})", self.run.id, self.run.status)
    }
}

/// Start an agent run. Gated on the agent_runs flag for the workspace.
pub fn run_start(
    data_dir: &Path,
    workspace_id: &str,
    agent_user: &str,
    creator: &str,
    entity_id: Option<&str>,
) -> Result<RunResult> {
    let mut storage = Storage::open(data_dir)?;
    let flags = storage.workspace_flags(workspace_id)?;
    permissions::require(
        storage.conn(),
        &flags,
        Capability::RecordActivity,
        creator,
        &Scope::Workspace(workspace_id.to_string()),
    )?;
    if !storage.user_exists(agent_user)? {
        return Err(Error::NotFound(format!("User not found: {}", agent_user)));
    }
    if let Some(entity) = entity_id {
        storage.get_entity(entity)?;
    }

    let mut run = Run::new(
        new_id(),
        workspace_id.to_string(),
        agent_user.to_string(),
        creator.to_string(),
    );
    run.entity_id = entity_id.map(|e| e.to_string());
    storage.create_run(&run)?;

    let webhook_task = storage.enqueue_task(
        "run_webhook",
        &serde_json::to_value(RunWebhookArgs {
            run_id: run.id.clone(),
        })?,
    )?;

    Ok(RunResult { run, webhook_task })
}

#[derive(Debug, Serialize)]
pub struct ActivityResult {
    pub activity_id: String,
    pub run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_task: Option<i64>,
}

impl Output for ActivityResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("Run {} is now {}", self.run_id, self.status);
        if let Some(comment) = &self.comment {
            out.push_str(&format!("; comment {}", comment));
        }
        out
    }
}

/// Record an activity on a run, advancing its status and propagating a
/// comment when applicable. A terminal transition enqueues the webhook.
pub fn run_activity(
    data_dir: &Path,
    run_id: &str,
    kind_name: &str,
    body: String,
    actor: &str,
    stop: bool,
) -> Result<ActivityResult> {
    let kind = kind_name.parse().map_err(Error::InvalidInput)?;
    validate_id(run_id)?;
    let mut storage = Storage::open(data_dir)?;
    let run = storage.get_run(run_id)?;
    if run.status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "Run {} already ended ({})",
            run_id, run.status
        )));
    }
    let flags = storage.workspace_flags(&run.workspace_id)?;
    permissions::require(
        storage.conn(),
        &flags,
        Capability::RecordActivity,
        actor,
        &Scope::Workspace(run.workspace_id.clone()),
    )?;

    let mut activity = Activity::new(
        new_id(),
        run_id.to_string(),
        run.workspace_id.clone(),
        kind,
        body,
        actor.to_string(),
    );
    if stop {
        activity.signal = ActivitySignal::Stop;
    }

    let tx = storage.transaction()?;
    let (status, comment) = record_activity(&tx, &activity)?;
    tx.commit()?;

    let webhook_task = if status.is_terminal() {
        Some(storage.enqueue_task(
            "run_webhook",
            &serde_json::to_value(RunWebhookArgs {
                run_id: run_id.to_string(),
            })?,
        )?)
    } else {
        None
    };

    Ok(ActivityResult {
        activity_id: activity.id,
        run_id: run_id.to_string(),
        status,
        comment,
        webhook_task,
    })
}

#[derive(Debug, Serialize)]
pub struct RunShowResult {
    pub run: Run,
    pub effective_status: RunStatus,
    pub activities: Vec<Activity>,
    pub thread: Vec<Comment>,
}

impl Output for RunShowResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "Run {} [{}] agent={} activities={}",
            self.run.id,
            self.effective_status,
            self.run.agent_user,
            self.activities.len()
        );
        for activity in &self.activities {
            out.push_str(&format!("\n  {} {}", activity.kind, activity.body));
        }
        out
    }
}

/// Show a run with its activities and comment thread. Fetching the status
/// persists the stale transition when the run has gone quiet.
pub fn run_show(data_dir: &Path, run_id: &str) -> Result<RunShowResult> {
    let mut storage = Storage::open(data_dir)?;
    let effective_status = storage.run_status(run_id)?;
    let run = storage.get_run(run_id)?;
    let activities = storage.list_activities(run_id)?;
    let thread = match &run.comment {
        Some(anchor) => {
            let mut thread = vec![storage.get_comment(anchor)?];
            thread.extend(storage.list_thread(anchor)?);
            thread
        }
        None => Vec::new(),
    };
    Ok(RunShowResult {
        run,
        effective_status,
        activities,
        thread,
    })
}

#[derive(Debug, Serialize)]
pub struct RunListResult {
    pub workspace_id: String,
    pub runs: Vec<Run>,
}

impl Output for RunListResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("{} runs in {}", self.runs.len(), self.workspace_id);
        for run in &self.runs {
            out.push_str(&format!("\n  {} [{}]", run.id, run.status));
        }
        out
    }
}

/// List runs in a workspace, newest first.
pub fn run_list(data_dir: &Path, workspace_id: &str) -> Result<RunListResult> {
    let storage = Storage::open(data_dir)?;
    let runs = storage.list_runs(workspace_id)?;
    Ok(RunListResult {
        workspace_id: workspace_id.to_string(),
        runs,
    })
}

// === Queue ===

#[derive(Debug, Serialize)]
pub struct QueueRunResult {
    pub summary: QueueSummary,
}

impl Output for QueueRunResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Processed {} tasks: {} succeeded, {} failed",
            self.summary.processed, self.summary.succeeded, self.summary.failed
        )
    }
}

/// Execute every queued deferred task.
pub fn queue_run(data_dir: &Path) -> Result<QueueRunResult> {
    let mut storage = Storage::open(data_dir)?;
    let config = Config::load(&storage)?;
    let registry = TaskRegistry::builtin();
    let summary = tasks::run_pending(&mut storage, &config, &registry)?;
    Ok(QueueRunResult { summary })
}

#[derive(Debug, Serialize)]
pub struct QueueListResult {
    pub tasks: Vec<DeferredTask>,
}

impl Output for QueueListResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("{} tasks", self.tasks.len());
        for task in &self.tasks {
            out.push_str(&format!("\n  #{} {} [{}]", task.id, task.name, task.status));
        }
        out
    }
}

/// List all deferred tasks, newest first.
pub fn queue_list(data_dir: &Path) -> Result<QueueListResult> {
    let storage = Storage::open(data_dir)?;
    let tasks = storage.list_tasks()?;
    Ok(QueueListResult { tasks })
}

// === Config ===

#[derive(Debug, Serialize)]
pub struct ConfigSetResult {
    pub key: String,
    pub value: String,
}

impl Output for ConfigSetResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {}", self.key, self.value)
    }
}

/// Set a config value after validating it.
pub fn config_set(data_dir: &Path, key: &str, value: &str) -> Result<ConfigSetResult> {
    Config::validate(key, value)?;
    let mut storage = Storage::open(data_dir)?;
    storage.set_config(key, value)?;
    Ok(ConfigSetResult {
        key: key.to_string(),
        value: redact(key, value),
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigListResult {
    pub entries: Vec<(String, String)>,
}

impl Output for ConfigListResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = String::from("Configuration:");
        for (key, value) in &self.entries {
            out.push_str(&format!("\n  {} = {}", key, value));
        }
        out
    }
}

/// List config entries. Secrets are redacted in the output.
pub fn config_list(data_dir: &Path) -> Result<ConfigListResult> {
    let storage = Storage::open(data_dir)?;
    let entries = storage
        .list_configs()?
        .into_iter()
        .map(|(key, value)| {
            let value = redact(&key, &value);
            (key, value)
        })
        .collect();
    Ok(ConfigListResult { entries })
}

fn redact(key: &str, value: &str) -> String {
    if key.contains("secret") {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    struct Fixture {
        ws: String,
        project: String,
        user: String,
    }

    fn seed(data_dir: &Path) -> Fixture {
        system_init(data_dir).unwrap();
        let user = user_create(data_dir, "ada".to_string()).unwrap().user.id;
        let ws = workspace_create(data_dir, "Acme".to_string(), &user)
            .unwrap()
            .container
            .id;
        let project = project_create(data_dir, "Apollo".to_string(), &ws, &user)
            .unwrap()
            .container
            .id;
        Fixture { ws, project, user }
    }

    #[test]
    fn test_init_is_idempotent() {
        let env = TestEnv::new();
        assert!(system_init(env.data_path()).unwrap().created);
        assert!(!system_init(env.data_path()).unwrap().created);
    }

    #[test]
    fn test_workspace_creator_is_admin() {
        let env = TestEnv::new();
        let fx = seed(env.data_path());

        let storage = env.open_storage();
        assert_eq!(
            storage.member_role(&fx.ws, &fx.user).unwrap(),
            Some(Role::Admin)
        );
    }

    #[test]
    fn test_teamspace_requires_flag() {
        let env = TestEnv::new();
        let fx = seed(env.data_path());

        let err = teamspace_create(env.data_path(), "Core".to_string(), &fx.ws, &fx.user)
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        workspace_flag(env.data_path(), &fx.ws, "teamspaces", true).unwrap();
        teamspace_create(env.data_path(), "Core".to_string(), &fx.ws, &fx.user).unwrap();
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let env = TestEnv::new();
        let fx = seed(env.data_path());

        let err = workspace_flag(env.data_path(), &fx.ws, "warp_drive", true).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_move_denied_without_flag_leaves_state() {
        let env = TestEnv::new();
        let fx = seed(env.data_path());

        let entity = entity_create(
            env.data_path(),
            EntityKind::Page,
            "Roadmap".to_string(),
            &fx.ws,
            &fx.user,
            None,
        )
        .unwrap()
        .entity;

        let err = entity_move(
            env.data_path(),
            &entity.id,
            ContainerKind::Project,
            &fx.project,
            &fx.user,
        )
        .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        // Zero writes: the entity stayed put and no task was enqueued.
        let shown = entity_show(env.data_path(), &entity.id).unwrap().entity;
        assert_eq!(shown.container_id, fx.ws);
        assert!(queue_list(env.data_path()).unwrap().tasks.is_empty());
    }

    #[test]
    fn test_move_clears_parent_and_enqueues_nested() {
        let env = TestEnv::new();
        let fx = seed(env.data_path());
        workspace_flag(env.data_path(), &fx.ws, "move_pages", true).unwrap();

        let root = entity_create(
            env.data_path(),
            EntityKind::Page,
            "Root".to_string(),
            &fx.ws,
            &fx.user,
            None,
        )
        .unwrap()
        .entity;
        let child = entity_create(
            env.data_path(),
            EntityKind::Page,
            "Child".to_string(),
            &fx.ws,
            &fx.user,
            Some(&root.id),
        )
        .unwrap()
        .entity;
        // Give the root a parent so the lift is observable.
        let top = entity_create(
            env.data_path(),
            EntityKind::Page,
            "Top".to_string(),
            &fx.ws,
            &fx.user,
            None,
        )
        .unwrap()
        .entity;
        {
            let mut storage = env.open_storage();
            storage.set_entity_parent(&root.id, Some(&top.id)).unwrap();
        }

        let result = entity_move(
            env.data_path(),
            &root.id,
            ContainerKind::Project,
            &fx.project,
            &fx.user,
        )
        .unwrap();
        assert_eq!(result.outcome.moved, vec![root.id.clone()]);

        let moved = entity_show(env.data_path(), &root.id).unwrap().entity;
        assert_eq!(moved.container_id, fx.project);
        assert!(moved.parent.is_none());

        // The child has not moved yet; running the queue catches it up.
        assert_eq!(
            entity_show(env.data_path(), &child.id).unwrap().entity.container_id,
            fx.ws
        );
        let summary = queue_run(env.data_path()).unwrap().summary;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            entity_show(env.data_path(), &child.id).unwrap().entity.container_id,
            fx.project
        );
    }

    #[test]
    fn test_run_lifecycle_enqueues_webhooks() {
        let env = TestEnv::new();
        let fx = seed(env.data_path());
        workspace_flag(env.data_path(), &fx.ws, "agent_runs", true).unwrap();
        let agent = user_create(env.data_path(), "copilot".to_string())
            .unwrap()
            .user
            .id;
        container_add_member(env.data_path(), &fx.ws, &agent, Role::Member).unwrap();

        let run = run_start(env.data_path(), &fx.ws, &agent, &fx.user, None)
            .unwrap()
            .run;

        let result = run_activity(
            env.data_path(),
            &run.id,
            "error",
            "exploded".to_string(),
            &agent,
            false,
        )
        .unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.webhook_task.is_some());

        // One webhook at start, one at the terminal transition.
        let tasks = queue_list(env.data_path()).unwrap().tasks;
        assert_eq!(
            tasks.iter().filter(|t| t.name == "run_webhook").count(),
            2
        );

        // Further activities on an ended run are refused.
        let err = run_activity(
            env.data_path(),
            &run.id,
            "response",
            "too late".to_string(),
            &agent,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_run_show_includes_thread() {
        let env = TestEnv::new();
        let fx = seed(env.data_path());
        workspace_flag(env.data_path(), &fx.ws, "agent_runs", true).unwrap();
        let agent = user_create(env.data_path(), "copilot".to_string())
            .unwrap()
            .user
            .id;
        container_add_member(env.data_path(), &fx.ws, &agent, Role::Member).unwrap();

        let run = run_start(env.data_path(), &fx.ws, &agent, &fx.user, None)
            .unwrap()
            .run;
        run_activity(
            env.data_path(),
            &run.id,
            "response",
            "hello".to_string(),
            &agent,
            false,
        )
        .unwrap();
        run_activity(
            env.data_path(),
            &run.id,
            "response",
            "world".to_string(),
            &agent,
            false,
        )
        .unwrap();

        let shown = run_show(env.data_path(), &run.id).unwrap();
        assert_eq!(shown.activities.len(), 2);
        assert_eq!(shown.thread.len(), 2);
        assert!(shown.thread[0].parent.is_none());
        assert_eq!(
            shown.thread[1].parent.as_deref(),
            Some(shown.thread[0].id.as_str())
        );
    }

    #[test]
    fn test_config_secret_redacted() {
        let env = TestEnv::new();
        seed(env.data_path());

        config_set(env.data_path(), "webhook_secret", "hunter2").unwrap();
        config_set(env.data_path(), "webhook_url", "https://example.test/hook").unwrap();

        let entries = config_list(env.data_path()).unwrap().entries;
        let secret = entries.iter().find(|(k, _)| k == "webhook_secret").unwrap();
        assert_eq!(secret.1, "[REDACTED]");
        let url = entries.iter().find(|(k, _)| k == "webhook_url").unwrap();
        assert_eq!(url.1, "https://example.test/hook");
    }
}
