//! Descendant Collector: the recursive closure over the parent-child
//! edge relation.

use crate::Result;
use rusqlite::Connection;
use std::collections::HashSet;

/// Upper bound on the visited set. The schema forbids cycles, but a
/// corrupted parent chain must not loop forever.
pub const MAX_SUBTREE: usize = 100_000;

/// Collect the IDs of all live descendants of `root_id`.
///
/// Breadth-first over the parent edges, no depth limit, each ID exactly
/// once, no ordering guarantee. A leaf, unknown, or malformed root yields
/// an empty set rather than an error.
pub fn collect_descendants(conn: &Connection, root_id: &str) -> Result<Vec<String>> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root_id.to_string());

    let mut result = Vec::new();
    let mut frontier = vec![root_id.to_string()];

    let mut stmt =
        conn.prepare("SELECT id FROM entities WHERE parent = ?1 AND deleted_at IS NULL")?;

    while let Some(current) = frontier.pop() {
        let children = stmt
            .query_map([&current], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for child in children {
            if visited.len() >= MAX_SUBTREE {
                return Ok(result);
            }
            if visited.insert(child.clone()) {
                result.push(child.clone());
                frontier.push(child);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, ContainerKind, Entity, EntityKind, User};
    use crate::storage::{new_id, Storage};
    use crate::test_utils::TestEnv;

    fn seed(storage: &mut Storage) -> (String, String) {
        let ws = new_id();
        let user = new_id();
        storage
            .create_user(&User::new(user.clone(), "ada".to_string()))
            .unwrap();
        storage
            .create_container(&Container::new(
                ws.clone(),
                ContainerKind::Workspace,
                ws.clone(),
                "Acme".to_string(),
            ))
            .unwrap();
        (ws, user)
    }

    fn add_page(storage: &mut Storage, ws: &str, user: &str, parent: Option<&str>) -> String {
        let mut entity = Entity::new(
            new_id(),
            EntityKind::Page,
            "node".to_string(),
            ws.to_string(),
            ws.to_string(),
            user.to_string(),
        );
        entity.parent = parent.map(|p| p.to_string());
        storage.create_entity(&entity).unwrap();
        entity.id
    }

    #[test]
    fn test_leaf_returns_empty() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed(&mut storage);
        let leaf = add_page(&mut storage, &ws, &user, None);

        assert!(collect_descendants(storage.conn(), &leaf).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_root_returns_empty() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        assert!(collect_descendants(storage.conn(), "no-such-id")
            .unwrap()
            .is_empty());
        assert!(collect_descendants(storage.conn(), "").unwrap().is_empty());
    }

    #[test]
    fn test_depth_five_branching_three() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed(&mut storage);

        // Depth-5 tree with branching factor 3: 3+9+27+81+243 = 363 descendants.
        let root = add_page(&mut storage, &ws, &user, None);
        let mut level = vec![root.clone()];
        for _ in 0..5 {
            let mut next = Vec::new();
            for parent in &level {
                for _ in 0..3 {
                    next.push(add_page(&mut storage, &ws, &user, Some(parent)));
                }
            }
            level = next;
        }

        let descendants = collect_descendants(storage.conn(), &root).unwrap();
        assert_eq!(descendants.len(), 363);
        let unique: HashSet<_> = descendants.iter().collect();
        assert_eq!(unique.len(), 363);
        assert!(!descendants.contains(&root));
    }

    #[test]
    fn test_soft_deleted_children_excluded() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed(&mut storage);

        let root = add_page(&mut storage, &ws, &user, None);
        let keep = add_page(&mut storage, &ws, &user, Some(&root));
        let drop = add_page(&mut storage, &ws, &user, Some(&root));
        storage.soft_delete_entity(&drop).unwrap();

        let descendants = collect_descendants(storage.conn(), &root).unwrap();
        assert_eq!(descendants, vec![keep]);
    }

    #[test]
    fn test_cycle_does_not_loop() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (ws, user) = seed(&mut storage);

        // Manufacture a corrupt two-node cycle.
        let a = add_page(&mut storage, &ws, &user, None);
        let b = add_page(&mut storage, &ws, &user, Some(&a));
        storage.set_entity_parent(&a, Some(&b)).unwrap();

        let from_a = collect_descendants(storage.conn(), &a).unwrap();
        assert_eq!(from_a, vec![b.clone()]);
        let from_b = collect_descendants(storage.conn(), &b).unwrap();
        assert_eq!(from_b, vec![a]);
    }
}
