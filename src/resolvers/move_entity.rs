//! Move/Transfer Resolver.
//!
//! Re-points a batch of entities to a destination container and reconciles
//! their dependent records: favorites are deleted or re-pointed against a
//! membership snapshot, comments follow the entities, recent visits are
//! always deleted.
//!
//! All writes go through the transaction handle the caller passes in; the
//! destination lookup happens before the first write so a missing
//! destination aborts with nothing to roll back. The membership snapshot is
//! taken once at the start and never re-queried, so a concurrent membership
//! change during the operation can produce a stale favorite decision; this
//! is an accepted race, not a bug.

use crate::models::ContainerKind;
use crate::storage::ts;
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::collections::HashSet;

/// Target container of a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveDestination {
    pub kind: ContainerKind,
    pub container_id: String,
}

/// What a move touched. Re-applying the same move yields all-zero counts
/// except `moved`, which always lists the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveOutcome {
    /// Entity IDs the batch re-pointed
    pub moved: Vec<String>,
    /// Favorites re-pointed to the destination
    pub favorites_repointed: usize,
    /// Favorites deleted because their owner is not a destination member
    pub favorites_deleted: usize,
    /// Comments re-pointed to the destination
    pub comments_repointed: usize,
    /// Recent-visit rows deleted
    pub visits_deleted: usize,
}

/// Move `entity_ids` into the destination container.
///
/// Idempotent for a given (batch, destination) pair. Returns `NotFound`
/// before any write if the destination does not exist or is soft-deleted;
/// refuses soft-deleted entities and cross-workspace moves.
pub fn move_entities(
    tx: &Transaction,
    entity_ids: &[String],
    dest: &MoveDestination,
    actor_id: &str,
) -> Result<MoveOutcome> {
    // 1. Destination must exist, be live, and match the claimed kind.
    let dest_row: Option<(String, String)> = tx
        .query_row(
            "SELECT kind, workspace_id FROM containers
             WHERE id = ?1 AND deleted_at IS NULL",
            [&dest.container_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (dest_kind, dest_workspace) = dest_row.ok_or_else(|| {
        Error::NotFound(format!("Destination container not found: {}", dest.container_id))
    })?;
    if dest_kind != dest.kind.to_string() {
        return Err(Error::InvalidInput(format!(
            "Destination {} is a {}, not a {}",
            dest.container_id, dest_kind, dest.kind
        )));
    }

    // Validate the whole batch before the first write.
    for id in entity_ids {
        let row: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT workspace_id, deleted_at FROM entities WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (workspace_id, deleted_at) =
            row.ok_or_else(|| Error::NotFound(format!("Entity not found: {}", id)))?;
        if deleted_at.is_some() {
            return Err(Error::InvalidInput(format!("Cannot move archived entity {}", id)));
        }
        if workspace_id != dest_workspace {
            return Err(Error::InvalidInput(format!(
                "Entity {} belongs to a different workspace",
                id
            )));
        }
    }

    // 2. Snapshot the destination membership once.
    let members = membership_snapshot(tx, &dest.container_id)?;

    let mut outcome = MoveOutcome::default();
    let now = ts(&Utc::now());

    for id in entity_ids {
        // 3. Favorites: drop the ones whose owner cannot see the
        // destination, re-point the rest.
        let favorite_owners: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT user_id FROM favorites WHERE entity_id = ?1")?;
            stmt.query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        for owner in favorite_owners {
            if members.contains(&owner) {
                outcome.favorites_repointed += tx.execute(
                    "UPDATE favorites SET container_id = ?3
                     WHERE user_id = ?1 AND entity_id = ?2 AND container_id != ?3",
                    params![owner, id, dest.container_id],
                )?;
            } else {
                outcome.favorites_deleted += tx.execute(
                    "DELETE FROM favorites WHERE user_id = ?1 AND entity_id = ?2",
                    params![owner, id],
                )?;
            }
        }

        // 4. Comments follow the entity.
        outcome.comments_repointed += tx.execute(
            "UPDATE comments SET container_id = ?2
             WHERE entity_id = ?1 AND (container_id IS NULL OR container_id != ?2)",
            params![id, dest.container_id],
        )?;

        // 5. Recent visits are always dropped on a move.
        outcome.visits_deleted +=
            tx.execute("DELETE FROM recent_visits WHERE entity_id = ?1", [id])?;

        // 6. Re-point the entity itself.
        tx.execute(
            "UPDATE entities SET container_id = ?2, updated_by = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, dest.container_id, actor_id, now],
        )?;
        outcome.moved.push(id.clone());
    }

    Ok(outcome)
}

fn membership_snapshot(conn: &Connection, container_id: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM memberships WHERE container_id = ?1")?;
    let members = stmt
        .query_map([container_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(members)
}
