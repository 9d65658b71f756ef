//! Agent run and activity models.
//!
//! A `Run` is an automated execution session that accumulates `Activity`
//! records and optionally a durable comment thread. Activity kinds drive
//! the run status machine; ephemeral kinds never reach the comment thread.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runs inactive for longer than this read as stale.
pub const STALE_TIMEOUT_SECS: i64 = 5 * 60;

/// Status of an agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Initiated but not yet processing
    #[default]
    Created,
    /// Actively processing
    InProgress,
    /// Paused, waiting for additional input
    Awaiting,
    /// Finished successfully
    Completed,
    /// A stop request was received and is being processed
    Stopping,
    /// Stopped on request
    Stopped,
    /// Encountered an error and cannot continue
    Failed,
    /// Not updated for too long while active
    Stale,
}

impl RunStatus {
    /// Returns true for statuses where the run is still doing work.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunStatus::Created | RunStatus::InProgress | RunStatus::Awaiting
        )
    }

    /// Returns true for statuses the run can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Stopped | RunStatus::Failed | RunStatus::Stale
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Created => "created",
            RunStatus::InProgress => "in_progress",
            RunStatus::Awaiting => "awaiting",
            RunStatus::Completed => "completed",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
            RunStatus::Stale => "stale",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunStatus::Created),
            "in_progress" => Ok(RunStatus::InProgress),
            "awaiting" => Ok(RunStatus::Awaiting),
            "completed" => Ok(RunStatus::Completed),
            "stopping" => Ok(RunStatus::Stopping),
            "stopped" => Ok(RunStatus::Stopped),
            "failed" => Ok(RunStatus::Failed),
            "stale" => Ok(RunStatus::Stale),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Kind of a single event within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[default]
    Prompt,
    Response,
    Action,
    Thought,
    Error,
    Elicitation,
}

impl ActivityKind {
    /// Returns true for kinds that are UI-only and never become comments.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            ActivityKind::Action | ActivityKind::Thought | ActivityKind::Error
        )
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityKind::Prompt => "prompt",
            ActivityKind::Response => "response",
            ActivityKind::Action => "action",
            ActivityKind::Thought => "thought",
            ActivityKind::Error => "error",
            ActivityKind::Elicitation => "elicitation",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "prompt" => Ok(ActivityKind::Prompt),
            "response" => Ok(ActivityKind::Response),
            "action" => Ok(ActivityKind::Action),
            "thought" => Ok(ActivityKind::Thought),
            "error" => Ok(ActivityKind::Error),
            "elicitation" => Ok(ActivityKind::Elicitation),
            _ => Err(format!("Unknown activity kind: {}", s)),
        }
    }
}

/// How an activity should be interpreted by the run status machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySignal {
    #[default]
    Continue,
    Stop,
}

impl fmt::Display for ActivitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivitySignal::Continue => "continue",
            ActivitySignal::Stop => "stop",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ActivitySignal {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "continue" => Ok(ActivitySignal::Continue),
            "stop" => Ok(ActivitySignal::Stop),
            _ => Err(format!("Unknown activity signal: {}", s)),
        }
    }
}

/// An automated execution session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier (UUID)
    pub id: String,

    /// Owning workspace
    pub workspace_id: String,

    /// Entity the run is attached to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Identity the agent posts as
    pub agent_user: String,

    /// User who started the run
    pub creator: String,

    /// Current status
    pub status: RunStatus,

    /// Anchor comment of the run's thread; None until the first durable activity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// First comment ever created for this run; set together with `comment`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_comment: Option<String>,

    /// Error text recorded when the run fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the run was started
    pub started_at: DateTime<Utc>,

    /// Last time any activity touched the run
    pub updated_at: DateTime<Utc>,

    /// When the run reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// When a stop completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,

    /// Who requested the stop
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_by: Option<String>,
}

impl Run {
    /// Create a new run in the given workspace.
    pub fn new(id: String, workspace_id: String, agent_user: String, creator: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            workspace_id,
            entity_id: None,
            agent_user,
            creator,
            status: RunStatus::default(),
            comment: None,
            source_comment: None,
            error: None,
            started_at: now,
            updated_at: now,
            ended_at: None,
            stopped_at: None,
            stopped_by: None,
        }
    }

    /// The status this run reads as right now, accounting for staleness.
    ///
    /// An active run not touched within the stale timeout reads as `Stale`.
    /// The caller is responsible for persisting the transition.
    pub fn effective_status(&self, now: DateTime<Utc>) -> RunStatus {
        if self.status.is_active() && now - self.updated_at > Duration::seconds(STALE_TIMEOUT_SECS)
        {
            RunStatus::Stale
        } else {
            self.status
        }
    }
}

/// A single event within a run. Immutable once persisted, except the
/// `comment` back-reference which is set exactly once by propagation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Unique identifier (UUID)
    pub id: String,

    /// Owning run
    pub run_id: String,

    /// Owning workspace
    pub workspace_id: String,

    /// Activity kind
    pub kind: ActivityKind,

    /// Activity body
    pub body: String,

    /// Whether this activity is UI-only (derived from kind at insert)
    pub ephemeral: bool,

    /// How the status machine interprets this activity
    #[serde(default)]
    pub signal: ActivitySignal,

    /// Comment created from this activity, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Authoring user
    pub actor: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// Create a new activity. Ephemerality is derived from the kind.
    pub fn new(
        id: String,
        run_id: String,
        workspace_id: String,
        kind: ActivityKind,
        body: String,
        actor: String,
    ) -> Self {
        Self {
            id,
            run_id,
            workspace_id,
            kind,
            body,
            ephemeral: kind.is_ephemeral(),
            signal: ActivitySignal::default(),
            comment: None,
            actor,
            created_at: Utc::now(),
        }
    }
}

/// Compute the next run status for a recorded activity.
///
/// Pure transition function; persistence is the caller's job. Returns the
/// new status. `Stopping` resolves to `Stopped` only on a response.
pub fn next_status(current: RunStatus, kind: ActivityKind, signal: ActivitySignal) -> RunStatus {
    match kind {
        ActivityKind::Action | ActivityKind::Thought => RunStatus::InProgress,
        ActivityKind::Error => RunStatus::Failed,
        ActivityKind::Elicitation => RunStatus::Awaiting,
        ActivityKind::Response => {
            if current == RunStatus::Stopping {
                RunStatus::Stopped
            } else {
                RunStatus::InProgress
            }
        }
        ActivityKind::Prompt => {
            if signal == ActivitySignal::Stop {
                RunStatus::Stopping
            } else {
                RunStatus::InProgress
            }
        }
    }
}
