//! Deferred task queue.
//!
//! Expensive follow-up work (subtree moves, webhook delivery, visit
//! pruning) is enqueued as a named task with JSON args and executed later
//! by `run_pending`. Tasks run at most once: a failed task is marked
//! failed with its error text and never retried. One task failing does not
//! stop the rest of the queue.

use crate::config::Config;
use crate::resolvers::{collect_descendants, move_entities, MoveDestination};
use crate::storage::Storage;
use crate::webhook;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state of a queued task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// A queued unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredTask {
    /// Queue position; assigned by the database
    pub id: i64,

    /// Registered task name
    pub name: String,

    /// Task arguments as stored
    pub args: serde_json::Value,

    /// Lifecycle state
    pub status: TaskStatus,

    /// Error text for failed tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the task was enqueued
    pub created_at: DateTime<Utc>,

    /// When the task finished, successfully or not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A task handler. Args arrive as the JSON stored at enqueue time.
pub type TaskHandler = fn(&mut Storage, &Config, &serde_json::Value) -> Result<()>;

/// Static registry of the built-in task handlers. Task names are fixed at
/// compile time; an enqueued name with no handler fails at execution.
pub struct TaskRegistry {
    handlers: HashMap<&'static str, TaskHandler>,
}

impl TaskRegistry {
    /// The built-in task set.
    pub fn builtin() -> Self {
        let mut handlers: HashMap<&'static str, TaskHandler> = HashMap::new();
        handlers.insert("nested_move", nested_move);
        handlers.insert("run_webhook", run_webhook);
        handlers.insert("prune_recent_visits", prune_recent_visits);
        Self { handlers }
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<TaskHandler> {
        self.handlers.get(name).copied()
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Outcome of one `run_pending` pass.
#[derive(Debug, Default, Serialize)]
pub struct QueueSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Execute every queued task in insertion order.
///
/// Each task is marked done or failed individually; a failure is reported
/// on stderr and the pass continues with the next task.
pub fn run_pending(
    storage: &mut Storage,
    config: &Config,
    registry: &TaskRegistry,
) -> Result<QueueSummary> {
    let mut summary = QueueSummary::default();

    for task in storage.queued_tasks()? {
        summary.processed += 1;
        let outcome = match registry.get(&task.name) {
            Some(handler) => handler(storage, config, &task.args),
            None => Err(Error::InvalidInput(format!(
                "Unknown task: {}",
                task.name
            ))),
        };
        match outcome {
            Ok(()) => {
                storage.mark_task_done(task.id)?;
                summary.succeeded += 1;
            }
            Err(e) => {
                eprintln!("Task {} ({}) failed: {}", task.id, task.name, e);
                storage.mark_task_failed(task.id, &e.to_string())?;
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NestedMoveArgs {
    pub root_id: String,
    pub kind: crate::models::ContainerKind,
    pub container_id: String,
    pub actor: String,
}

/// Move every live descendant of a moved root into the same destination.
///
/// The root itself has already been moved synchronously; this task catches
/// the subtree up. Runs in one transaction so a partial subtree move never
/// becomes visible.
fn nested_move(storage: &mut Storage, _config: &Config, args: &serde_json::Value) -> Result<()> {
    let args: NestedMoveArgs = serde_json::from_value(args.clone())?;

    let descendants = collect_descendants(storage.conn(), &args.root_id)?;
    if descendants.is_empty() {
        return Ok(());
    }

    let dest = MoveDestination {
        kind: args.kind,
        container_id: args.container_id,
    };
    let tx = storage.transaction()?;
    move_entities(&tx, &descendants, &dest, &args.actor)?;
    tx.commit()?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunWebhookArgs {
    pub run_id: String,
}

/// Deliver the status webhook for a run.
fn run_webhook(storage: &mut Storage, config: &Config, args: &serde_json::Value) -> Result<()> {
    let args: RunWebhookArgs = serde_json::from_value(args.clone())?;
    let run = storage.get_run(&args.run_id)?;
    webhook::notify_run_status(config, &run)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PruneVisitsArgs {
    #[serde(default)]
    pub retention_days: Option<i64>,
}

/// Delete recent-visit rows older than the retention window.
fn prune_recent_visits(
    storage: &mut Storage,
    config: &Config,
    args: &serde_json::Value,
) -> Result<()> {
    let args: PruneVisitsArgs = serde_json::from_value(args.clone())?;
    let days = args
        .retention_days
        .unwrap_or(config.recent_visit_retention_days);
    let cutoff = Utc::now() - Duration::days(days);

    let tx = storage.transaction()?;
    tx.execute(
        "DELETE FROM recent_visits WHERE visited_at < ?1",
        [crate::storage::ts(&cutoff)],
    )?;
    tx.commit()?;
    Ok(())
}
