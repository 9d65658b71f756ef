//! Lodestar CLI - workspace entity tracking with container moves and agent runs.

use clap::Parser;
use lodestar::action_log;
use lodestar::cli::{
    Cli, Commands, ConfigCommands, EntityCommands, FavCommands, ProjectCommands, QueueCommands,
    RunCommands, SystemCommands, TeamspaceCommands, UserCommands, VisitCommands,
    WorkspaceCommands,
};
use lodestar::commands::{self, Output};
use lodestar::models::{ContainerKind, EntityKind, Role};
use lodestar::storage::resolve_data_dir;
use lodestar::Error;
use std::path::Path;
use std::process;
use std::time::Instant;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    let data_dir = match resolve_data_dir(cli.data_dir) {
        Ok(dir) => dir,
        Err(e) => exit_with_error(&e, human),
    };

    let (cmd_name, args_json) = serialize_command(&cli.command);
    let start = Instant::now();

    let result = run_command(cli.command, &data_dir, human);

    let duration = start.elapsed().as_millis() as u64;
    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    action_log::log_action(&data_dir, &cmd_name, args_json, success, error, duration);

    if let Err(e) = result {
        exit_with_error(&e, human);
    }
}

fn exit_with_error(e: &Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
    }
    process::exit(1);
}

fn parse_role(role: &str) -> Result<Role, Error> {
    role.parse().map_err(Error::InvalidInput)
}

fn parse_entity_kind(kind: &str) -> Result<EntityKind, Error> {
    kind.parse().map_err(Error::InvalidInput)
}

fn parse_container_kind(kind: &str) -> Result<ContainerKind, Error> {
    kind.parse().map_err(Error::InvalidInput)
}

fn run_command(command: Commands, data_dir: &Path, human: bool) -> Result<(), Error> {
    match command {
        Commands::System { command } => match command {
            SystemCommands::Init => {
                let result = commands::system_init(data_dir)?;
                output(&result, human);
            }
            SystemCommands::Info => {
                let result = commands::system_info(data_dir)?;
                output(&result, human);
            }
        },

        Commands::User { command } => match command {
            UserCommands::Create { name } => {
                let result = commands::user_create(data_dir, name)?;
                output(&result, human);
            }
        },

        Commands::Workspace { command } => match command {
            WorkspaceCommands::Create { name, creator } => {
                let result = commands::workspace_create(data_dir, name, &creator)?;
                output(&result, human);
            }
            WorkspaceCommands::AddMember {
                workspace,
                user,
                role,
            } => {
                let result =
                    commands::container_add_member(data_dir, &workspace, &user, parse_role(&role)?)?;
                output(&result, human);
            }
            WorkspaceCommands::Flag {
                workspace,
                flag,
                disable,
            } => {
                let result = commands::workspace_flag(data_dir, &workspace, &flag, !disable)?;
                output(&result, human);
            }
        },

        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                workspace,
                creator,
            } => {
                let result = commands::project_create(data_dir, name, &workspace, &creator)?;
                output(&result, human);
            }
            ProjectCommands::AddMember {
                project,
                user,
                role,
            } => {
                let result =
                    commands::container_add_member(data_dir, &project, &user, parse_role(&role)?)?;
                output(&result, human);
            }
        },

        Commands::Teamspace { command } => match command {
            TeamspaceCommands::Create {
                name,
                workspace,
                creator,
            } => {
                let result = commands::teamspace_create(data_dir, name, &workspace, &creator)?;
                output(&result, human);
            }
            TeamspaceCommands::AddMember {
                teamspace,
                user,
                role,
            } => {
                let result =
                    commands::container_add_member(data_dir, &teamspace, &user, parse_role(&role)?)?;
                output(&result, human);
            }
        },

        Commands::Entity { command } => match command {
            EntityCommands::Create {
                title,
                kind,
                container,
                actor,
                parent,
            } => {
                let result = commands::entity_create(
                    data_dir,
                    parse_entity_kind(&kind)?,
                    title,
                    &container,
                    &actor,
                    parent.as_deref(),
                )?;
                output(&result, human);
            }
            EntityCommands::Show { id } => {
                let result = commands::entity_show(data_dir, &id)?;
                output(&result, human);
            }
            EntityCommands::Move {
                id,
                to_kind,
                to,
                actor,
            } => {
                let result = commands::entity_move(
                    data_dir,
                    &id,
                    parse_container_kind(&to_kind)?,
                    &to,
                    &actor,
                )?;
                output(&result, human);
            }
            EntityCommands::Subtree { id } => {
                let result = commands::entity_subtree(data_dir, &id)?;
                output(&result, human);
            }
            EntityCommands::Delete { id } => {
                let result = commands::entity_delete(data_dir, &id)?;
                output(&result, human);
            }
        },

        Commands::Fav { command } => match command {
            FavCommands::Add { user, entity } => {
                let result = commands::fav_add(data_dir, &user, &entity)?;
                output(&result, human);
            }
            FavCommands::Rm { user, entity } => {
                let result = commands::fav_rm(data_dir, &user, &entity)?;
                output(&result, human);
            }
            FavCommands::List { user } => {
                let result = commands::fav_list(data_dir, &user)?;
                output(&result, human);
            }
        },

        Commands::Visit { command } => match command {
            VisitCommands::Record { user, entity } => {
                let result = commands::visit_record(data_dir, &user, &entity)?;
                output(&result, human);
            }
        },

        Commands::Run { command } => match command {
            RunCommands::Start {
                workspace,
                agent,
                creator,
                entity,
            } => {
                let result = commands::run_start(
                    data_dir,
                    &workspace,
                    &agent,
                    &creator,
                    entity.as_deref(),
                )?;
                output(&result, human);
            }
            RunCommands::Activity {
                run,
                kind,
                body,
                actor,
                stop,
            } => {
                let result = commands::run_activity(data_dir, &run, &kind, body, &actor, stop)?;
                output(&result, human);
            }
            RunCommands::Show { id } => {
                let result = commands::run_show(data_dir, &id)?;
                output(&result, human);
            }
            RunCommands::List { workspace } => {
                let result = commands::run_list(data_dir, &workspace)?;
                output(&result, human);
            }
        },

        Commands::Queue { command } => match command {
            QueueCommands::Run => {
                let result = commands::queue_run(data_dir)?;
                output(&result, human);
            }
            QueueCommands::List => {
                let result = commands::queue_list(data_dir)?;
                output(&result, human);
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => {
                let result = commands::config_set(data_dir, &key, &value)?;
                output(&result, human);
            }
            ConfigCommands::List => {
                let result = commands::config_list(data_dir)?;
                output(&result, human);
            }
        },
    }

    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Serialize command to extract name and arguments for logging.
fn serialize_command(command: &Commands) -> (String, serde_json::Value) {
    match command {
        Commands::System { command } => match command {
            SystemCommands::Init => ("system init".to_string(), serde_json::json!({})),
            SystemCommands::Info => ("system info".to_string(), serde_json::json!({})),
        },
        Commands::User { command } => match command {
            UserCommands::Create { name } => (
                "user create".to_string(),
                serde_json::json!({ "name": name }),
            ),
        },
        Commands::Workspace { command } => match command {
            WorkspaceCommands::Create { name, creator } => (
                "workspace create".to_string(),
                serde_json::json!({ "name": name, "creator": creator }),
            ),
            WorkspaceCommands::AddMember {
                workspace,
                user,
                role,
            } => (
                "workspace add-member".to_string(),
                serde_json::json!({ "workspace": workspace, "user": user, "role": role }),
            ),
            WorkspaceCommands::Flag {
                workspace,
                flag,
                disable,
            } => (
                "workspace flag".to_string(),
                serde_json::json!({ "workspace": workspace, "flag": flag, "disable": disable }),
            ),
        },
        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                workspace,
                creator,
            } => (
                "project create".to_string(),
                serde_json::json!({ "name": name, "workspace": workspace, "creator": creator }),
            ),
            ProjectCommands::AddMember {
                project,
                user,
                role,
            } => (
                "project add-member".to_string(),
                serde_json::json!({ "project": project, "user": user, "role": role }),
            ),
        },
        Commands::Teamspace { command } => match command {
            TeamspaceCommands::Create {
                name,
                workspace,
                creator,
            } => (
                "teamspace create".to_string(),
                serde_json::json!({ "name": name, "workspace": workspace, "creator": creator }),
            ),
            TeamspaceCommands::AddMember {
                teamspace,
                user,
                role,
            } => (
                "teamspace add-member".to_string(),
                serde_json::json!({ "teamspace": teamspace, "user": user, "role": role }),
            ),
        },
        Commands::Entity { command } => match command {
            EntityCommands::Create {
                title,
                kind,
                container,
                actor,
                parent,
            } => (
                "entity create".to_string(),
                serde_json::json!({
                    "title": title,
                    "kind": kind,
                    "container": container,
                    "actor": actor,
                    "parent": parent,
                }),
            ),
            EntityCommands::Show { id } => (
                "entity show".to_string(),
                serde_json::json!({ "id": id }),
            ),
            EntityCommands::Move {
                id,
                to_kind,
                to,
                actor,
            } => (
                "entity move".to_string(),
                serde_json::json!({ "id": id, "to_kind": to_kind, "to": to, "actor": actor }),
            ),
            EntityCommands::Subtree { id } => (
                "entity subtree".to_string(),
                serde_json::json!({ "id": id }),
            ),
            EntityCommands::Delete { id } => (
                "entity delete".to_string(),
                serde_json::json!({ "id": id }),
            ),
        },
        Commands::Fav { command } => match command {
            FavCommands::Add { user, entity } => (
                "fav add".to_string(),
                serde_json::json!({ "user": user, "entity": entity }),
            ),
            FavCommands::Rm { user, entity } => (
                "fav rm".to_string(),
                serde_json::json!({ "user": user, "entity": entity }),
            ),
            FavCommands::List { user } => (
                "fav list".to_string(),
                serde_json::json!({ "user": user }),
            ),
        },
        Commands::Visit { command } => match command {
            VisitCommands::Record { user, entity } => (
                "visit record".to_string(),
                serde_json::json!({ "user": user, "entity": entity }),
            ),
        },
        Commands::Run { command } => match command {
            RunCommands::Start {
                workspace,
                agent,
                creator,
                entity,
            } => (
                "run start".to_string(),
                serde_json::json!({
                    "workspace": workspace,
                    "agent": agent,
                    "creator": creator,
                    "entity": entity,
                }),
            ),
            RunCommands::Activity {
                run,
                kind,
                body,
                actor,
                stop,
            } => (
                "run activity".to_string(),
                serde_json::json!({
                    "run": run,
                    "kind": kind,
                    "body": body,
                    "actor": actor,
                    "stop": stop,
                }),
            ),
            RunCommands::Show { id } => (
                "run show".to_string(),
                serde_json::json!({ "id": id }),
            ),
            RunCommands::List { workspace } => (
                "run list".to_string(),
                serde_json::json!({ "workspace": workspace }),
            ),
        },
        Commands::Queue { command } => match command {
            QueueCommands::Run => ("queue run".to_string(), serde_json::json!({})),
            QueueCommands::List => ("queue list".to_string(), serde_json::json!({})),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => (
                "config set".to_string(),
                serde_json::json!({ "key": key, "value": value }),
            ),
            ConfigCommands::List => ("config list".to_string(), serde_json::json!({})),
        },
    }
}
