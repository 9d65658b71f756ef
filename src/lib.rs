//! Lodestar - workspace entity tracking for multi-tenant project data.
//!
//! This library provides the core functionality for the `lode` CLI tool:
//! entity hierarchies, container moves, favorites, agent runs, and the
//! deferred task queue that keeps denormalized state in sync.

pub mod action_log;
pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod permissions;
pub mod resolvers;
pub mod storage;
pub mod tasks;
pub mod webhook;


/// Library-level error type for Lodestar operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not initialized: run `lode system init` first")]
    NotInitialized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Lodestar operations.
pub type Result<T> = std::result::Result<T, Error>;
