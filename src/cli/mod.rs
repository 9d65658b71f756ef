//! CLI argument definitions for Lodestar.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lodestar - workspace entity tracking with container moves and agent runs.
#[derive(Parser, Debug)]
#[command(name = "lode")]
#[command(author, version, about = "Track workspace entities, moves, and agent runs", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Data directory (defaults to the platform data dir).
    /// Can also be set via the LODE_DATA_DIR environment variable.
    #[arg(short = 'D', long = "data-dir", global = true, env = "LODE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// System administration commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },

    /// User management commands
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Workspace management commands
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },

    /// Project management commands
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Teamspace management commands (requires the teamspaces flag)
    Teamspace {
        #[command(subcommand)]
        command: TeamspaceCommands,
    },

    /// Entity commands (pages, issues, epics)
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },

    /// Favorite commands
    Fav {
        #[command(subcommand)]
        command: FavCommands,
    },

    /// Recent-visit commands
    Visit {
        #[command(subcommand)]
        command: VisitCommands,
    },

    /// Agent run commands
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },

    /// Deferred task queue commands
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// System subcommands
#[derive(Subcommand, Debug)]
pub enum SystemCommands {
    /// Initialize the data directory
    Init,

    /// Show instance information
    Info,
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Create a user
    Create {
        /// Display name
        name: String,
    },
}

/// Workspace subcommands
#[derive(Subcommand, Debug)]
pub enum WorkspaceCommands {
    /// Create a workspace; the creator becomes its first admin
    Create {
        /// Workspace name
        name: String,

        /// Creating user ID
        #[arg(long)]
        creator: String,
    },

    /// Add or update a workspace member
    AddMember {
        /// Workspace ID
        workspace: String,

        /// User ID
        user: String,

        /// Role (admin, member, guest)
        #[arg(long, default_value = "member")]
        role: String,
    },

    /// Enable or disable a feature flag (move_pages, agent_runs, teamspaces)
    Flag {
        /// Workspace ID
        workspace: String,

        /// Flag name
        flag: String,

        /// Disable instead of enable
        #[arg(long)]
        disable: bool,
    },
}

/// Project subcommands
#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Create a project in a workspace
    Create {
        /// Project name
        name: String,

        /// Owning workspace ID
        #[arg(long)]
        workspace: String,

        /// Creating user ID
        #[arg(long)]
        creator: String,
    },

    /// Add or update a project member
    AddMember {
        /// Project ID
        project: String,

        /// User ID
        user: String,

        /// Role (admin, member, guest)
        #[arg(long, default_value = "member")]
        role: String,
    },
}

/// Teamspace subcommands
#[derive(Subcommand, Debug)]
pub enum TeamspaceCommands {
    /// Create a teamspace in a workspace
    Create {
        /// Teamspace name
        name: String,

        /// Owning workspace ID
        #[arg(long)]
        workspace: String,

        /// Creating user ID
        #[arg(long)]
        creator: String,
    },

    /// Add or update a teamspace member
    AddMember {
        /// Teamspace ID
        teamspace: String,

        /// User ID
        user: String,

        /// Role (admin, member, guest)
        #[arg(long, default_value = "member")]
        role: String,
    },
}

/// Entity subcommands
#[derive(Subcommand, Debug)]
pub enum EntityCommands {
    /// Create an entity in a container
    Create {
        /// Entity title
        title: String,

        /// Entity kind (page, issue, epic)
        #[arg(long, default_value = "page")]
        kind: String,

        /// Owning container ID
        #[arg(long)]
        container: String,

        /// Acting user ID
        #[arg(long)]
        actor: String,

        /// Parent entity ID (same kind)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Show an entity
    Show {
        /// Entity ID
        id: String,
    },

    /// Move an entity (and, deferred, its subtree) to another container
    Move {
        /// Entity ID
        id: String,

        /// Destination container kind (workspace, project, teamspace)
        #[arg(long)]
        to_kind: String,

        /// Destination container ID
        #[arg(long)]
        to: String,

        /// Acting user ID
        #[arg(long)]
        actor: String,
    },

    /// List all live descendants of an entity
    Subtree {
        /// Root entity ID
        id: String,
    },

    /// Soft-delete an entity
    Delete {
        /// Entity ID
        id: String,
    },
}

/// Favorite subcommands
#[derive(Subcommand, Debug)]
pub enum FavCommands {
    /// Favorite an entity
    Add {
        /// User ID
        user: String,

        /// Entity ID
        entity: String,
    },

    /// Remove a favorite
    Rm {
        /// User ID
        user: String,

        /// Entity ID
        entity: String,
    },

    /// List a user's favorites
    List {
        /// User ID
        user: String,
    },
}

/// Visit subcommands
#[derive(Subcommand, Debug)]
pub enum VisitCommands {
    /// Record that a user visited an entity
    Record {
        /// User ID
        user: String,

        /// Entity ID
        entity: String,
    },
}

/// Run subcommands
#[derive(Subcommand, Debug)]
pub enum RunCommands {
    /// Start an agent run
    Start {
        /// Workspace ID
        #[arg(long)]
        workspace: String,

        /// Agent identity user ID
        #[arg(long)]
        agent: String,

        /// Creating user ID
        #[arg(long)]
        creator: String,

        /// Entity the run is attached to
        #[arg(long)]
        entity: Option<String>,
    },

    /// Record an activity on a run
    Activity {
        /// Run ID
        run: String,

        /// Activity kind (prompt, response, action, thought, error, elicitation)
        #[arg(long)]
        kind: String,

        /// Activity body
        #[arg(long)]
        body: String,

        /// Acting user ID
        #[arg(long)]
        actor: String,

        /// Mark this activity as a stop request
        #[arg(long)]
        stop: bool,
    },

    /// Show a run with its activities and comment thread
    Show {
        /// Run ID
        id: String,
    },

    /// List runs in a workspace
    List {
        /// Workspace ID
        workspace: String,
    },
}

/// Queue subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Execute all queued deferred tasks
    Run,

    /// List deferred tasks
    List,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// List configuration values
    List,
}

/// Package version from Cargo.
pub fn package_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Git commit the binary was built from.
pub fn git_commit() -> &'static str {
    env!("LODE_GIT_COMMIT")
}

/// Timestamp the binary was built at.
pub fn build_timestamp() -> &'static str {
    env!("LODE_BUILD_TIMESTAMP")
}
