//! Integration tests for the permission gate via CLI.
//!
//! These tests verify:
//! - Feature flags gate moves, agent runs, and teamspaces per workspace
//! - Guests cannot write; non-members cannot act at all
//! - A denied command leaves the database untouched

mod common;

use common::{lode_json, seed_workspace, TestEnv};
use predicates::prelude::*;

#[test]
fn test_move_requires_flag() {
    let env = TestEnv::init();
    let (user, ws, project) = seed_workspace(&env);

    let entity = lode_json(
        &env,
        &[
            "entity", "create", "Plan", "--container", &ws, "--actor", &user,
        ],
    )["entity"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    env.lode()
        .args([
            "entity", "move", &entity, "--to-kind", "project", "--to", &project, "--actor", &user,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));

    // Denial before any write: entity unchanged, queue empty.
    let shown = lode_json(&env, &["entity", "show", &entity]);
    assert_eq!(shown["entity"]["container_id"], ws);
    let tasks = lode_json(&env, &["queue", "list"]);
    assert!(tasks["tasks"].as_array().unwrap().is_empty());

    lode_json(&env, &["workspace", "flag", &ws, "move_pages"]);
    env.lode()
        .args([
            "entity", "move", &entity, "--to-kind", "project", "--to", &project, "--actor", &user,
        ])
        .assert()
        .success();
}

#[test]
fn test_flag_disable_revokes() {
    let env = TestEnv::init();
    let (user, ws, project) = seed_workspace(&env);
    lode_json(&env, &["workspace", "flag", &ws, "move_pages"]);
    lode_json(&env, &["workspace", "flag", &ws, "move_pages", "--disable"]);

    let entity = lode_json(
        &env,
        &[
            "entity", "create", "Plan", "--container", &ws, "--actor", &user,
        ],
    )["entity"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    env.lode()
        .args([
            "entity", "move", &entity, "--to-kind", "project", "--to", &project, "--actor", &user,
        ])
        .assert()
        .failure();
}

#[test]
fn test_unknown_flag_rejected() {
    let env = TestEnv::init();
    let (_, ws, _) = seed_workspace(&env);

    env.lode()
        .args(["workspace", "flag", &ws, "warp_drive"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("warp_drive"));
}

#[test]
fn test_guest_can_create_but_not_move() {
    let env = TestEnv::init();
    let (_, ws, project) = seed_workspace(&env);
    lode_json(&env, &["workspace", "flag", &ws, "move_pages"]);
    let guest = lode_json(&env, &["user", "create", "visitor"])["user"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    lode_json(
        &env,
        &["workspace", "add-member", &ws, &guest, "--role", "guest"],
    );

    let entity = lode_json(
        &env,
        &[
            "entity", "create", "Draft", "--container", &ws, "--actor", &guest,
        ],
    )["entity"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    env.lode()
        .args([
            "entity", "move", &entity, "--to-kind", "project", "--to", &project, "--actor", &guest,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("denied"));
}

#[test]
fn test_non_member_cannot_create() {
    let env = TestEnv::init();
    let (_, ws, _) = seed_workspace(&env);
    let outsider = lode_json(&env, &["user", "create", "outsider"])["user"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    env.lode()
        .args([
            "entity", "create", "Draft", "--container", &ws, "--actor", &outsider,
        ])
        .assert()
        .failure();
}

#[test]
fn test_teamspace_requires_flag() {
    let env = TestEnv::init();
    let (user, ws, _) = seed_workspace(&env);

    env.lode()
        .args([
            "teamspace", "create", "Core", "--workspace", &ws, "--creator", &user,
        ])
        .assert()
        .failure();

    lode_json(&env, &["workspace", "flag", &ws, "teamspaces"]);
    env.lode()
        .args([
            "teamspace", "create", "Core", "--workspace", &ws, "--creator", &user,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\":\"teamspace\""));
}

#[test]
fn test_run_start_requires_flag() {
    let env = TestEnv::init();
    let (user, ws, _) = seed_workspace(&env);
    let agent = lode_json(&env, &["user", "create", "copilot"])["user"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    env.lode()
        .args([
            "run", "start", "--workspace", &ws, "--agent", &agent, "--creator", &user,
        ])
        .assert()
        .failure();

    lode_json(&env, &["workspace", "flag", &ws, "agent_runs"]);
    env.lode()
        .args([
            "run", "start", "--workspace", &ws, "--agent", &agent, "--creator", &user,
        ])
        .assert()
        .success();
}

#[test]
fn test_move_gated_on_destination() {
    let env = TestEnv::init();
    let (user, ws, _) = seed_workspace(&env);
    lode_json(&env, &["workspace", "flag", &ws, "move_pages"]);

    // A project the actor is not a member of.
    let other_admin = lode_json(&env, &["user", "create", "bob"])["user"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    lode_json(&env, &["workspace", "add-member", &ws, &other_admin]);
    let closed = lode_json(
        &env,
        &[
            "project",
            "create",
            "Closed",
            "--workspace",
            &ws,
            "--creator",
            &other_admin,
        ],
    )["container"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let entity = lode_json(
        &env,
        &[
            "entity", "create", "Plan", "--container", &ws, "--actor", &user,
        ],
    )["entity"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    env.lode()
        .args([
            "entity", "move", &entity, "--to-kind", "project", "--to", &closed, "--actor", &user,
        ])
        .assert()
        .failure();
}
