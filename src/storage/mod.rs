//! Storage layer for Lodestar data.
//!
//! A single SQLite database (`lodestar.db`) under the data directory holds
//! every workspace. The schema is created explicitly and every query that
//! must exclude soft-deleted rows states `deleted_at IS NULL` itself; there
//! are no implicit filters.
//!
//! Mutations that must be atomic (the move resolver, activity recording)
//! run inside an explicit [`rusqlite::Transaction`] obtained from
//! [`Storage::transaction`]; the resolver functions in [`crate::resolvers`]
//! operate on the transaction handle directly.

use crate::models::run::{Activity, ActivityKind, ActivitySignal, Run, RunStatus};
use crate::models::{
    Comment, Container, ContainerKind, Entity, EntityKind, Favorite, FeatureFlag, RecentVisit,
    Role, User,
};
use crate::permissions::FlagSet;
use crate::tasks::{DeferredTask, TaskStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the SQLite database file under the data directory.
const DB_FILE: &str = "lodestar.db";

/// Storage manager for one Lodestar instance.
pub struct Storage {
    /// Data directory holding the database and the action log
    pub root: PathBuf,
    /// SQLite connection
    conn: Connection,
}

impl Storage {
    /// Open existing storage in the given data directory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join(DB_FILE);
        if !db_path.exists() {
            return Err(Error::NotInitialized);
        }

        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            root: data_dir.to_path_buf(),
            conn,
        })
    }

    /// Initialize storage in the given data directory.
    pub fn init(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            root: data_dir.to_path_buf(),
            conn,
        })
    }

    /// Check if storage exists in the given data directory.
    pub fn exists(data_dir: &Path) -> bool {
        data_dir.join(DB_FILE).exists()
    }

    /// Borrow the underlying connection for read-only resolver calls.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin an explicit transaction. Resolver writes go through this so a
    /// mid-resolver failure rolls back atomically.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS containers (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS memberships (
                container_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                PRIMARY KEY (container_id, user_id),
                FOREIGN KEY (container_id) REFERENCES containers(id)
            );

            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                parent TEXT,
                container_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS favorites (
                user_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                container_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, entity_id)
            );

            CREATE TABLE IF NOT EXISTS recent_visits (
                user_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                visited_at TEXT NOT NULL,
                PRIMARY KEY (user_id, entity_id)
            );

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                entity_id TEXT,
                container_id TEXT,
                workspace_id TEXT NOT NULL,
                parent TEXT,
                body TEXT NOT NULL,
                actor TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                entity_id TEXT,
                agent_user TEXT NOT NULL,
                creator TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'created',
                comment TEXT,
                source_comment TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                ended_at TEXT,
                stopped_at TEXT,
                stopped_by TEXT
            );

            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                body TEXT NOT NULL,
                ephemeral INTEGER NOT NULL DEFAULT 0,
                signal TEXT NOT NULL DEFAULT 'continue',
                comment TEXT,
                actor TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            );

            CREATE TABLE IF NOT EXISTS feature_flags (
                workspace_id TEXT NOT NULL,
                flag TEXT NOT NULL,
                PRIMARY KEY (workspace_id, flag)
            );

            CREATE TABLE IF NOT EXISTS deferred_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                args TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                error TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(parent);
            CREATE INDEX IF NOT EXISTS idx_entities_container ON entities(container_id);
            CREATE INDEX IF NOT EXISTS idx_favorites_entity ON favorites(entity_id);
            CREATE INDEX IF NOT EXISTS idx_visits_entity ON recent_visits(entity_id);
            CREATE INDEX IF NOT EXISTS idx_comments_entity ON comments(entity_id);
            CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent);
            CREATE INDEX IF NOT EXISTS idx_activities_run ON activities(run_id);
            CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON deferred_tasks(status);
            "#,
        )?;

        Ok(())
    }

    // === User Operations ===

    /// Create a new user.
    pub fn create_user(&mut self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![user.id, user.name, ts(&user.created_at)],
        )?;
        Ok(())
    }

    /// Get a user by ID.
    pub fn get_user(&self, id: &str) -> Result<User> {
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?
            .map(|(id, name, created_at)| {
                Ok(User {
                    id,
                    name,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .unwrap_or_else(|| Err(Error::NotFound(format!("User not found: {}", id))))
    }

    /// Check that a user exists.
    pub fn user_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // === Container Operations ===

    /// Create a new container.
    pub fn create_container(&mut self, container: &Container) -> Result<()> {
        self.conn.execute(
            "INSERT INTO containers (id, kind, workspace_id, name, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![
                container.id,
                container.kind.to_string(),
                container.workspace_id,
                container.name,
                ts(&container.created_at),
            ],
        )?;
        Ok(())
    }

    /// Get a container by ID, including soft-deleted ones.
    pub fn get_container(&self, id: &str) -> Result<Container> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, workspace_id, name, created_at, deleted_at
             FROM containers WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_container(row),
            None => Err(Error::NotFound(format!("Container not found: {}", id))),
        }
    }

    /// List all live containers, optionally filtered by kind.
    pub fn list_containers(&self, kind: Option<ContainerKind>) -> Result<Vec<Container>> {
        let mut sql = String::from(
            "SELECT id, kind, workspace_id, name, created_at, deleted_at
             FROM containers WHERE deleted_at IS NULL",
        );
        if kind.is_some() {
            sql.push_str(" AND kind = ?1");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut containers = Vec::new();
        let mut rows = match kind {
            Some(k) => stmt.query([k.to_string()])?,
            None => stmt.query([])?,
        };
        while let Some(row) = rows.next()? {
            containers.push(row_to_container(row)?);
        }
        Ok(containers)
    }

    // === Membership Operations ===

    /// Add or update a membership.
    pub fn add_member(&mut self, container_id: &str, user_id: &str, role: Role) -> Result<()> {
        // Both sides must exist before a membership row is written.
        self.get_container(container_id)?;
        if !self.user_exists(user_id)? {
            return Err(Error::NotFound(format!("User not found: {}", user_id)));
        }
        self.conn.execute(
            "INSERT INTO memberships (container_id, user_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT(container_id, user_id) DO UPDATE SET role = excluded.role",
            params![container_id, user_id, role.to_string()],
        )?;
        Ok(())
    }

    /// Remove a membership.
    pub fn remove_member(&mut self, container_id: &str, user_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM memberships WHERE container_id = ?1 AND user_id = ?2",
            params![container_id, user_id],
        )?;
        Ok(())
    }

    /// Get the membership set of a container.
    pub fn membership_set(&self, container_id: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM memberships WHERE container_id = ?1")?;
        let ids = stmt
            .query_map([container_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Get a user's role in a container, if any.
    pub fn member_role(&self, container_id: &str, user_id: &str) -> Result<Option<Role>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM memberships WHERE container_id = ?1 AND user_id = ?2",
                params![container_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        match role {
            Some(r) => Ok(Some(r.parse().map_err(Error::InvalidInput)?)),
            None => Ok(None),
        }
    }

    // === Entity Operations ===

    /// Create a new entity.
    pub fn create_entity(&mut self, entity: &Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entities
                 (id, kind, title, parent, container_id, workspace_id,
                  created_by, updated_by, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
            params![
                entity.id,
                entity.kind.to_string(),
                entity.title,
                entity.parent,
                entity.container_id,
                entity.workspace_id,
                entity.created_by,
                entity.updated_by,
                ts(&entity.created_at),
                ts(&entity.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Get an entity by ID, including soft-deleted ones.
    pub fn get_entity(&self, id: &str) -> Result<Entity> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, title, parent, container_id, workspace_id,
                    created_by, updated_by, created_at, updated_at, deleted_at
             FROM entities WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_entity(row),
            None => Err(Error::NotFound(format!("Entity not found: {}", id))),
        }
    }

    /// List live entities in a container.
    pub fn list_entities(&self, container_id: &str) -> Result<Vec<Entity>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, title, parent, container_id, workspace_id,
                    created_by, updated_by, created_at, updated_at, deleted_at
             FROM entities
             WHERE container_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query([container_id])?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(row_to_entity(row)?);
        }
        Ok(entities)
    }

    /// Re-parent an entity. `parent = None` lifts it to the top level.
    pub fn set_entity_parent(&mut self, id: &str, parent: Option<&str>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE entities SET parent = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, parent, ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Entity not found: {}", id)));
        }
        Ok(())
    }

    /// Soft-delete an entity. Dependent records stay in place.
    pub fn soft_delete_entity(&mut self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE entities SET deleted_at = ?2, updated_at = ?2
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id, ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Entity not found: {}", id)));
        }
        Ok(())
    }

    // === Favorite Operations ===

    /// Add a favorite. Replaces an existing favorite on the same entity.
    pub fn add_favorite(&mut self, favorite: &Favorite) -> Result<()> {
        self.conn.execute(
            "INSERT INTO favorites
                 (user_id, entity_kind, entity_id, container_id, workspace_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, entity_id) DO UPDATE SET
                 container_id = excluded.container_id",
            params![
                favorite.user_id,
                favorite.entity_kind.to_string(),
                favorite.entity_id,
                favorite.container_id,
                favorite.workspace_id,
                ts(&favorite.created_at),
            ],
        )?;
        Ok(())
    }

    /// Remove a favorite.
    pub fn remove_favorite(&mut self, user_id: &str, entity_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM favorites WHERE user_id = ?1 AND entity_id = ?2",
            params![user_id, entity_id],
        )?;
        Ok(())
    }

    /// List a user's favorites.
    pub fn list_favorites(&self, user_id: &str) -> Result<Vec<Favorite>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, entity_kind, entity_id, container_id, workspace_id, created_at
             FROM favorites WHERE user_id = ?1 ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query([user_id])?;
        let mut favorites = Vec::new();
        while let Some(row) = rows.next()? {
            favorites.push(row_to_favorite(row)?);
        }
        Ok(favorites)
    }

    // === Recent Visit Operations ===

    /// Record a visit, replacing any earlier visit to the same entity.
    pub fn record_visit(&mut self, visit: &RecentVisit) -> Result<()> {
        self.conn.execute(
            "INSERT INTO recent_visits
                 (user_id, entity_kind, entity_id, workspace_id, visited_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, entity_id) DO UPDATE SET
                 visited_at = excluded.visited_at",
            params![
                visit.user_id,
                visit.entity_kind.to_string(),
                visit.entity_id,
                visit.workspace_id,
                ts(&visit.visited_at),
            ],
        )?;
        Ok(())
    }

    /// List a user's visits, most recent first.
    pub fn list_visits(&self, user_id: &str) -> Result<Vec<RecentVisit>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, entity_kind, entity_id, workspace_id, visited_at
             FROM recent_visits WHERE user_id = ?1 ORDER BY visited_at DESC",
        )?;
        let mut rows = stmt.query([user_id])?;
        let mut visits = Vec::new();
        while let Some(row) = rows.next()? {
            visits.push(RecentVisit {
                user_id: row.get(0)?,
                entity_kind: parse_kind(&row.get::<_, String>(1)?)?,
                entity_id: row.get(2)?,
                workspace_id: row.get(3)?,
                visited_at: parse_ts(&row.get::<_, String>(4)?)?,
            });
        }
        Ok(visits)
    }

    /// Count visit rows for an entity.
    pub fn count_visits_for_entity(&self, entity_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM recent_visits WHERE entity_id = ?1",
            [entity_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // === Comment Operations ===

    /// Get a comment by ID.
    pub fn get_comment(&self, id: &str) -> Result<Comment> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, container_id, workspace_id, parent, body, actor, created_at
             FROM comments WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_comment(row),
            None => Err(Error::NotFound(format!("Comment not found: {}", id))),
        }
    }

    /// Create a comment.
    pub fn create_comment(&mut self, comment: &Comment) -> Result<()> {
        insert_comment(&self.conn, comment)
    }

    /// List replies threaded under a root comment, oldest first.
    pub fn list_thread(&self, root_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, container_id, workspace_id, parent, body, actor, created_at
             FROM comments WHERE parent = ?1 ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query([root_id])?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next()? {
            comments.push(row_to_comment(row)?);
        }
        Ok(comments)
    }

    /// List comments attached to an entity, oldest first.
    pub fn list_comments_for_entity(&self, entity_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, container_id, workspace_id, parent, body, actor, created_at
             FROM comments WHERE entity_id = ?1 ORDER BY created_at ASC",
        )?;
        let mut rows = stmt.query([entity_id])?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next()? {
            comments.push(row_to_comment(row)?);
        }
        Ok(comments)
    }

    // === Run Operations ===

    /// Create a run.
    pub fn create_run(&mut self, run: &Run) -> Result<()> {
        self.conn.execute(
            "INSERT INTO runs
                 (id, workspace_id, entity_id, agent_user, creator, status,
                  comment, source_comment, error, started_at, updated_at,
                  ended_at, stopped_at, stopped_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run.id,
                run.workspace_id,
                run.entity_id,
                run.agent_user,
                run.creator,
                run.status.to_string(),
                run.comment,
                run.source_comment,
                run.error,
                ts(&run.started_at),
                ts(&run.updated_at),
                run.ended_at.as_ref().map(ts),
                run.stopped_at.as_ref().map(ts),
                run.stopped_by,
            ],
        )?;
        Ok(())
    }

    /// Get a run by ID.
    pub fn get_run(&self, id: &str) -> Result<Run> {
        get_run(&self.conn, id)
    }

    /// Fetch a run's status, persisting the stale transition if it applies.
    /// Going stale ends the run, so it enqueues the status webhook like any
    /// other terminal transition.
    pub fn run_status(&mut self, id: &str) -> Result<RunStatus> {
        let run = self.get_run(id)?;
        let now = Utc::now();
        let effective = run.effective_status(now);
        if effective == RunStatus::Stale && run.status != RunStatus::Stale {
            self.conn.execute(
                "UPDATE runs SET status = ?2, ended_at = ?3 WHERE id = ?1",
                params![id, RunStatus::Stale.to_string(), ts(&now)],
            )?;
            self.enqueue_task("run_webhook", &serde_json::json!({ "run_id": id }))?;
        }
        Ok(effective)
    }

    /// List runs in a workspace, newest first.
    pub fn list_runs(&self, workspace_id: &str) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM runs WHERE workspace_id = ?1 ORDER BY started_at DESC",
        )?;
        let ids = stmt
            .query_map([workspace_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut runs = Vec::new();
        for id in ids {
            runs.push(self.get_run(&id)?);
        }
        Ok(runs)
    }

    // === Activity Operations ===

    /// Get an activity by ID.
    pub fn get_activity(&self, id: &str) -> Result<Activity> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, workspace_id, kind, body, ephemeral, signal,
                    comment, actor, created_at
             FROM activities WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_activity(row),
            None => Err(Error::NotFound(format!("Activity not found: {}", id))),
        }
    }

    /// List a run's activities in insertion order.
    pub fn list_activities(&self, run_id: &str) -> Result<Vec<Activity>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, workspace_id, kind, body, ephemeral, signal,
                    comment, actor, created_at
             FROM activities WHERE run_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query([run_id])?;
        let mut activities = Vec::new();
        while let Some(row) = rows.next()? {
            activities.push(row_to_activity(row)?);
        }
        Ok(activities)
    }

    // === Feature Flag Operations ===

    /// Enable a feature flag for a workspace.
    pub fn enable_flag(&mut self, workspace_id: &str, flag: FeatureFlag) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO feature_flags (workspace_id, flag) VALUES (?1, ?2)",
            params![workspace_id, flag.to_string()],
        )?;
        Ok(())
    }

    /// Disable a feature flag for a workspace.
    pub fn disable_flag(&mut self, workspace_id: &str, flag: FeatureFlag) -> Result<()> {
        self.conn.execute(
            "DELETE FROM feature_flags WHERE workspace_id = ?1 AND flag = ?2",
            params![workspace_id, flag.to_string()],
        )?;
        Ok(())
    }

    /// Load the flag set of a workspace. Unknown rows are ignored so a
    /// downgraded binary does not choke on flags it no longer knows.
    pub fn workspace_flags(&self, workspace_id: &str) -> Result<FlagSet> {
        let mut stmt = self
            .conn
            .prepare("SELECT flag FROM feature_flags WHERE workspace_id = ?1")?;
        let names = stmt
            .query_map([workspace_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut flags = FlagSet::default();
        for name in names {
            if let Ok(flag) = name.parse::<FeatureFlag>() {
                flags.enable(flag);
            }
        }
        Ok(flags)
    }

    // === Deferred Task Operations ===

    /// Enqueue a deferred task by name with JSON-serializable args.
    pub fn enqueue_task(&mut self, name: &str, args: &serde_json::Value) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO deferred_tasks (name, args, status, created_at)
             VALUES (?1, ?2, 'queued', ?3)",
            params![name, args.to_string(), ts(&Utc::now())],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List queued tasks in insertion order.
    pub fn queued_tasks(&self) -> Result<Vec<DeferredTask>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, args, status, error, created_at, completed_at
             FROM deferred_tasks WHERE status = 'queued' ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(row_to_task(row)?);
        }
        Ok(tasks)
    }

    /// List all tasks, newest first.
    pub fn list_tasks(&self) -> Result<Vec<DeferredTask>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, args, status, error, created_at, completed_at
             FROM deferred_tasks ORDER BY id DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(row_to_task(row)?);
        }
        Ok(tasks)
    }

    /// Mark a task done.
    pub fn mark_task_done(&mut self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE deferred_tasks SET status = 'done', completed_at = ?2 WHERE id = ?1",
            params![id, ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Mark a task failed with its error text. Failed tasks are not retried.
    pub fn mark_task_failed(&mut self, id: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE deferred_tasks SET status = 'failed', error = ?2, completed_at = ?3
             WHERE id = ?1",
            params![id, error, ts(&Utc::now())],
        )?;
        Ok(())
    }

    // === Config Operations ===

    /// Get a config value.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a config value.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// List all config entries.
    pub fn list_configs(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM config ORDER BY key ASC")?;
        let entries = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// === Shared row/repo helpers (also used by resolvers over a Transaction) ===

/// Format a timestamp for storage.
pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a stored timestamp.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Bad timestamp {:?}: {}", s, e)))
}

fn parse_kind(s: &str) -> Result<EntityKind> {
    s.parse().map_err(Error::InvalidInput)
}

/// Generate a new UUID v4 identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate that an ID is a well-formed UUID.
pub fn validate_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| Error::InvalidId(id.to_string()))
}

fn row_to_container(row: &Row) -> Result<Container> {
    Ok(Container {
        id: row.get(0)?,
        kind: row.get::<_, String>(1)?.parse().map_err(Error::InvalidInput)?,
        workspace_id: row.get(2)?,
        name: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?)?,
        deleted_at: row
            .get::<_, Option<String>>(5)?
            .map(|s| parse_ts(&s))
            .transpose()?,
    })
}

fn row_to_entity(row: &Row) -> Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        kind: parse_kind(&row.get::<_, String>(1)?)?,
        title: row.get(2)?,
        parent: row.get(3)?,
        container_id: row.get(4)?,
        workspace_id: row.get(5)?,
        created_by: row.get(6)?,
        updated_by: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
        updated_at: parse_ts(&row.get::<_, String>(9)?)?,
        deleted_at: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_ts(&s))
            .transpose()?,
    })
}

fn row_to_favorite(row: &Row) -> Result<Favorite> {
    Ok(Favorite {
        user_id: row.get(0)?,
        entity_kind: parse_kind(&row.get::<_, String>(1)?)?,
        entity_id: row.get(2)?,
        container_id: row.get(3)?,
        workspace_id: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?)?,
    })
}

fn row_to_comment(row: &Row) -> Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        container_id: row.get(2)?,
        workspace_id: row.get(3)?,
        parent: row.get(4)?,
        body: row.get(5)?,
        actor: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?)?,
    })
}

fn row_to_run(row: &Row) -> Result<Run> {
    Ok(Run {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        entity_id: row.get(2)?,
        agent_user: row.get(3)?,
        creator: row.get(4)?,
        status: row
            .get::<_, String>(5)?
            .parse::<RunStatus>()
            .map_err(Error::InvalidInput)?,
        comment: row.get(6)?,
        source_comment: row.get(7)?,
        error: row.get(8)?,
        started_at: parse_ts(&row.get::<_, String>(9)?)?,
        updated_at: parse_ts(&row.get::<_, String>(10)?)?,
        ended_at: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_ts(&s))
            .transpose()?,
        stopped_at: row
            .get::<_, Option<String>>(12)?
            .map(|s| parse_ts(&s))
            .transpose()?,
        stopped_by: row.get(13)?,
    })
}

fn row_to_activity(row: &Row) -> Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        run_id: row.get(1)?,
        workspace_id: row.get(2)?,
        kind: row
            .get::<_, String>(3)?
            .parse::<ActivityKind>()
            .map_err(Error::InvalidInput)?,
        body: row.get(4)?,
        ephemeral: row.get::<_, i64>(5)? != 0,
        signal: row
            .get::<_, String>(6)?
            .parse::<ActivitySignal>()
            .map_err(Error::InvalidInput)?,
        comment: row.get(7)?,
        actor: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?)?,
    })
}

fn row_to_task(row: &Row) -> Result<DeferredTask> {
    Ok(DeferredTask {
        id: row.get(0)?,
        name: row.get(1)?,
        args: serde_json::from_str(&row.get::<_, String>(2)?)?,
        status: row
            .get::<_, String>(3)?
            .parse::<TaskStatus>()
            .map_err(Error::InvalidInput)?,
        error: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?)?,
        completed_at: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_ts(&s))
            .transpose()?,
    })
}

/// Fetch a run through any connection or transaction handle.
pub fn get_run(conn: &Connection, id: &str) -> Result<Run> {
    let mut stmt = conn.prepare(
        "SELECT id, workspace_id, entity_id, agent_user, creator, status,
                comment, source_comment, error, started_at, updated_at,
                ended_at, stopped_at, stopped_by
         FROM runs WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => row_to_run(row),
        None => Err(Error::NotFound(format!("Run not found: {}", id))),
    }
}

/// Insert a comment through any connection or transaction handle.
pub fn insert_comment(conn: &Connection, comment: &Comment) -> Result<()> {
    conn.execute(
        "INSERT INTO comments
             (id, entity_id, container_id, workspace_id, parent, body, actor, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            comment.id,
            comment.entity_id,
            comment.container_id,
            comment.workspace_id,
            comment.parent,
            comment.body,
            comment.actor,
            ts(&comment.created_at),
        ],
    )?;
    Ok(())
}

/// Resolve the data directory: explicit flag > `LODE_DATA_DIR` > XDG data dir.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(env_dir) = std::env::var("LODE_DATA_DIR") {
        if !env_dir.is_empty() {
            return Ok(PathBuf::from(env_dir));
        }
    }
    dirs::data_dir()
        .map(|d| d.join("lodestar"))
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    fn seed_workspace(storage: &mut Storage) -> (String, String) {
        let ws_id = new_id();
        let user_id = new_id();
        storage
            .create_user(&User::new(user_id.clone(), "ada".to_string()))
            .unwrap();
        storage
            .create_container(&Container::new(
                ws_id.clone(),
                ContainerKind::Workspace,
                ws_id.clone(),
                "Acme".to_string(),
            ))
            .unwrap();
        storage
            .add_member(&ws_id, &user_id, Role::Admin)
            .unwrap();
        (ws_id, user_id)
    }

    #[test]
    fn test_open_uninitialized_fails() {
        let env = TestEnv::new();
        assert!(matches!(
            Storage::open(env.data_path()),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_init_then_open() {
        let env = TestEnv::new();
        {
            env.init_storage();
        }
        assert!(Storage::exists(env.data_path()));
        env.open_storage();
    }

    #[test]
    fn test_entity_crud() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed_workspace(&mut storage);

        let entity = Entity::new(
            new_id(),
            EntityKind::Page,
            "Roadmap".to_string(),
            ws.clone(),
            ws.clone(),
            user.clone(),
        );
        storage.create_entity(&entity).unwrap();

        let loaded = storage.get_entity(&entity.id).unwrap();
        assert_eq!(loaded.title, "Roadmap");
        assert_eq!(loaded.container_id, ws);

        storage.soft_delete_entity(&entity.id).unwrap();
        let deleted = storage.get_entity(&entity.id).unwrap();
        assert!(deleted.deleted_at.is_some());
        assert!(storage.list_entities(&ws).unwrap().is_empty());
    }

    #[test]
    fn test_membership_set_and_role() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed_workspace(&mut storage);

        let guest = new_id();
        storage
            .create_user(&User::new(guest.clone(), "guest".to_string()))
            .unwrap();
        storage.add_member(&ws, &guest, Role::Guest).unwrap();

        let members = storage.membership_set(&ws).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&user));
        assert_eq!(storage.member_role(&ws, &guest).unwrap(), Some(Role::Guest));
        assert_eq!(storage.member_role(&ws, "nobody").unwrap(), None);
        assert_eq!(storage.get_user(&guest).unwrap().name, "guest");

        storage.remove_member(&ws, &guest).unwrap();
        assert_eq!(storage.member_role(&ws, &guest).unwrap(), None);
        assert_eq!(storage.membership_set(&ws).unwrap().len(), 1);
    }

    #[test]
    fn test_add_member_requires_both_sides() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed_workspace(&mut storage);

        assert!(matches!(
            storage.add_member(&ws, "missing-user", Role::Member),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            storage.add_member("missing-container", &user, Role::Member),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_favorite_unique_per_user_entity() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed_workspace(&mut storage);

        let fav = Favorite {
            user_id: user.clone(),
            entity_kind: EntityKind::Page,
            entity_id: "e-1".to_string(),
            container_id: ws.clone(),
            workspace_id: ws.clone(),
            created_at: Utc::now(),
        };
        storage.add_favorite(&fav).unwrap();
        storage.add_favorite(&fav).unwrap();

        assert_eq!(storage.list_favorites(&user).unwrap().len(), 1);
    }

    #[test]
    fn test_workspace_flags_roundtrip() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, _) = seed_workspace(&mut storage);

        let flags = storage.workspace_flags(&ws).unwrap();
        assert!(!flags.is_enabled(FeatureFlag::MovePages));

        storage.enable_flag(&ws, FeatureFlag::MovePages).unwrap();
        storage.enable_flag(&ws, FeatureFlag::AgentRuns).unwrap();
        let flags = storage.workspace_flags(&ws).unwrap();
        assert!(flags.is_enabled(FeatureFlag::MovePages));
        assert!(flags.is_enabled(FeatureFlag::AgentRuns));
        assert!(!flags.is_enabled(FeatureFlag::Teamspaces));

        storage.disable_flag(&ws, FeatureFlag::MovePages).unwrap();
        let flags = storage.workspace_flags(&ws).unwrap();
        assert!(!flags.is_enabled(FeatureFlag::MovePages));
    }

    #[test]
    fn test_task_queue_lifecycle() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();

        let id1 = storage
            .enqueue_task("run_webhook", &serde_json::json!({"run_id": "r-1"}))
            .unwrap();
        let id2 = storage
            .enqueue_task("nested_move", &serde_json::json!({"root_id": "e-1"}))
            .unwrap();

        let queued = storage.queued_tasks().unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].id, id1);
        assert_eq!(queued[1].id, id2);

        storage.mark_task_done(id1).unwrap();
        storage.mark_task_failed(id2, "boom").unwrap();
        assert!(storage.queued_tasks().unwrap().is_empty());

        let all = storage.list_tasks().unwrap();
        assert_eq!(all.len(), 2);
        let failed = all.iter().find(|t| t.id == id2).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_config_roundtrip() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();

        assert_eq!(storage.get_config("webhook_url").unwrap(), None);
        storage
            .set_config("webhook_url", "https://example.test/hook")
            .unwrap();
        storage.set_config("webhook_url", "https://example.test/v2").unwrap();
        assert_eq!(
            storage.get_config("webhook_url").unwrap().as_deref(),
            Some("https://example.test/v2")
        );
        assert_eq!(storage.list_configs().unwrap().len(), 1);
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id(&new_id()).is_ok());
        assert!(matches!(validate_id("not-a-uuid"), Err(Error::InvalidId(_))));
    }

    // Env-var tests are serialized: the process environment is global.
    #[test]
    #[serial_test::serial]
    fn test_resolve_data_dir_precedence() {
        unsafe { std::env::remove_var("LODE_DATA_DIR") };
        let explicit = PathBuf::from("/tmp/explicit");
        assert_eq!(resolve_data_dir(Some(explicit.clone())).unwrap(), explicit);

        unsafe { std::env::set_var("LODE_DATA_DIR", "/tmp/from-env") };
        // Explicit flag wins over the environment.
        assert_eq!(resolve_data_dir(Some(explicit.clone())).unwrap(), explicit);
        assert_eq!(
            resolve_data_dir(None).unwrap(),
            PathBuf::from("/tmp/from-env")
        );

        unsafe { std::env::remove_var("LODE_DATA_DIR") };
        let fallback = resolve_data_dir(None).unwrap();
        assert!(fallback.ends_with("lodestar"));
    }

    #[test]
    fn test_run_status_persists_stale_and_enqueues_webhook() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed_workspace(&mut storage);

        let mut run = Run::new(new_id(), ws, user.clone(), user);
        run.updated_at = Utc::now()
            - chrono::Duration::seconds(crate::models::run::STALE_TIMEOUT_SECS + 1);
        storage.create_run(&run).unwrap();

        assert_eq!(storage.run_status(&run.id).unwrap(), RunStatus::Stale);

        let stored = storage.get_run(&run.id).unwrap();
        assert_eq!(stored.status, RunStatus::Stale);
        assert!(stored.ended_at.is_some());

        let tasks = storage.list_tasks().unwrap();
        assert_eq!(
            tasks.iter().filter(|t| t.name == "run_webhook").count(),
            1
        );

        // Reading again is a no-op: the transition already happened.
        assert_eq!(storage.run_status(&run.id).unwrap(), RunStatus::Stale);
        assert_eq!(storage.list_tasks().unwrap().len(), 1);
    }
}
