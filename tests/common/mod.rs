//! Common test utilities for lodestar integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's platform data directory.

#![allow(dead_code)]

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with an isolated data directory.
///
/// The `lode()` method returns a `Command` that sets `LODE_DATA_DIR`
/// per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with an isolated data directory.
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and initialize lodestar.
    pub fn init() -> Self {
        let env = Self::new();
        env.lode().args(["system", "init"]).assert().success();
        env
    }

    /// Get a Command for the lode binary with the isolated data directory.
    pub fn lode(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_lode"));
        cmd.env("LODE_DATA_DIR", self.data_dir.path());
        cmd
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a lode command and parse its JSON stdout.
pub fn lode_json(env: &TestEnv, args: &[&str]) -> serde_json::Value {
    let output = env.lode().args(args).output().unwrap();
    assert!(
        output.status.success(),
        "command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

/// Seed a user, workspace, and project; returns (user, workspace, project) IDs.
pub fn seed_workspace(env: &TestEnv) -> (String, String, String) {
    let user = lode_json(env, &["user", "create", "ada"])["user"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let ws = lode_json(env, &["workspace", "create", "Acme", "--creator", &user])["container"]
        ["id"]
        .as_str()
        .unwrap()
        .to_string();
    let project = lode_json(
        env,
        &[
            "project", "create", "Apollo", "--workspace", &ws, "--creator", &user,
        ],
    )["container"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    (user, ws, project)
}
