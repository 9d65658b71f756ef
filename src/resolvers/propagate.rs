//! Activity-to-Comment Propagator.
//!
//! Converts durable run activities into comment records threaded under the
//! run's anchor comment, and drives the run status machine as a side
//! effect of recording each activity.
//!
//! Anchor state machine per run: NO_COMMENT -> HAS_COMMENT on the first
//! durable activity (the new comment becomes both `comment` and
//! `source_comment`); every later durable activity threads a new comment
//! under the anchor without touching the run's pointers. Ephemeral
//! activities never create comments.
//!
//! Duplicate delivery is guarded by the activity's `comment`
//! back-reference: once set, `propagate` is a no-op for that activity.

use crate::models::run::{next_status, Activity, Run, RunStatus};
use crate::models::Comment;
use crate::storage::{self, new_id, ts};
use crate::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};

/// Insert an activity row. Ephemerality is stored as derived from the kind.
pub fn insert_activity(tx: &Transaction, activity: &Activity) -> Result<()> {
    tx.execute(
        "INSERT INTO activities
             (id, run_id, workspace_id, kind, body, ephemeral, signal,
              comment, actor, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            activity.id,
            activity.run_id,
            activity.workspace_id,
            activity.kind.to_string(),
            activity.body,
            activity.kind.is_ephemeral() as i64,
            activity.signal.to_string(),
            activity.comment,
            activity.actor,
            ts(&activity.created_at),
        ],
    )?;
    Ok(())
}

/// Advance the run status machine for a recorded activity and persist the
/// transition. Returns the new status.
pub fn apply_status(tx: &Transaction, run: &Run, activity: &Activity) -> Result<RunStatus> {
    let status = next_status(run.status, activity.kind, activity.signal);
    let now = ts(&Utc::now());

    match status {
        RunStatus::Failed => {
            tx.execute(
                "UPDATE runs SET status = ?2, error = ?3, ended_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![run.id, status.to_string(), activity.body, now],
            )?;
        }
        RunStatus::Stopped => {
            tx.execute(
                "UPDATE runs SET status = ?2, stopped_at = ?3, stopped_by = ?4,
                        ended_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![run.id, status.to_string(), now, activity.actor],
            )?;
        }
        _ => {
            tx.execute(
                "UPDATE runs SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![run.id, status.to_string(), now],
            )?;
        }
    }

    Ok(status)
}

/// Create the comment for a durable activity, threading it under the run's
/// anchor. Returns the new comment ID, or `None` when the activity is
/// ephemeral or was already propagated.
pub fn propagate(tx: &Transaction, run: &Run, activity: &Activity) -> Result<Option<String>> {
    if activity.kind.is_ephemeral() {
        return Ok(None);
    }

    // Deduplication key for at-least-once callers: the back-reference is
    // set exactly once, so a second delivery finds it and stops.
    let existing: Option<Option<String>> = tx
        .query_row(
            "SELECT comment FROM activities WHERE id = ?1",
            [&activity.id],
            |row| row.get(0),
        )
        .optional()?;
    if matches!(existing, Some(Some(_))) {
        return Ok(None);
    }

    let mut comment = Comment::new(
        new_id(),
        run.workspace_id.clone(),
        activity.body.clone(),
        activity.actor.clone(),
    );
    comment.entity_id = run.entity_id.clone();
    comment.parent = run.comment.clone();
    storage::insert_comment(tx, &comment)?;

    if run.comment.is_none() {
        // First durable activity: the new comment becomes the anchor.
        tx.execute(
            "UPDATE runs SET comment = ?2, source_comment = ?2 WHERE id = ?1",
            params![run.id, comment.id],
        )?;
    }

    tx.execute(
        "UPDATE activities SET comment = ?2 WHERE id = ?1",
        params![activity.id, comment.id],
    )?;

    Ok(Some(comment.id))
}

/// Record one activity end to end: insert it, advance the run status, and
/// propagate a comment when the activity was authored by the run's agent.
/// Returns the resulting status and the created comment ID, if any.
pub fn record_activity(
    tx: &Transaction,
    activity: &Activity,
) -> Result<(RunStatus, Option<String>)> {
    let run = storage::get_run(tx, &activity.run_id)?;

    insert_activity(tx, activity)?;
    let status = apply_status(tx, &run, activity)?;

    // Only the agent's own activities reach the comment thread; user
    // activities (prompts relayed by humans) stay out of it.
    let comment = if activity.actor == run.agent_user {
        propagate(tx, &run, activity)?
    } else {
        None
    };

    Ok((status, comment))
}
