// Integration tests for entity lifecycle tracking
// Identifier assignment, deletion semantics and the state transitions
// a flush settles.

mod common;

use common::{fresh_repository, BoxShape, Design, Sheet, Template};
use std::collections::HashSet;
use vellum_core::{EntityCategory, EntityState, VellumError};
use vellum_store::Repository;

fn count(repo: &Repository, table: &str) -> i64 {
    repo.connection()
        .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
            row.get(0)
        })
        .unwrap()
}

#[test]
fn test_identifier_is_assigned_exactly_once() {
    let mut repo = fresh_repository("ids");

    // Given: a tracked entity that never reached the store
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "first".to_string(),
            }),
            None,
        )
        .unwrap();
    assert_eq!(repo.cache().id(design).unwrap(), None);
    assert!(repo.cache().is_new(design).unwrap());

    // When: it is flushed
    repo.save_changes().unwrap();

    // Then: it has an identifier and is no longer new
    let id = repo.cache().id(design).unwrap().expect("id assigned");
    assert!(!repo.cache().is_new(design).unwrap());

    // And: later flushes never reassign it
    repo.entity_mut(design)
        .unwrap()
        .as_any_mut()
        .downcast_mut::<Design>()
        .unwrap()
        .name = "renamed".to_string();
    repo.save_changes().unwrap();
    assert_eq!(repo.cache().id(design).unwrap(), Some(id));
}

#[test]
fn test_identifiers_are_unique_across_every_table() {
    let mut repo = fresh_repository("allocator");

    // Given: one entity per table, plus the project root row
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "d".to_string(),
            }),
            None,
        )
        .unwrap();
    let template = repo
        .insert_entity(
            "demo.template",
            Box::new(Template {
                name: "t".to_string(),
            }),
            None,
        )
        .unwrap();
    let sheet = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "s".to_string(),
            }),
            None,
        )
        .unwrap();
    repo.save_changes().unwrap();

    // Then: no two rows share a value, even across tables
    let mut ids = HashSet::new();
    ids.insert(repo.project().id().unwrap().raw());
    for handle in [design, template, sheet] {
        ids.insert(repo.cache().id(handle).unwrap().unwrap().raw());
    }
    assert_eq!(ids.len(), 4, "identifiers collided across tables: {:?}", ids);
}

#[test]
fn test_deleting_a_new_entity_vacates_its_slot() {
    let mut repo = fresh_repository("discard");

    // Given: a tracked entity that was never flushed
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "draft".to_string(),
            }),
            None,
        )
        .unwrap();

    // When: it is deleted before the flush
    repo.delete_entity(design).unwrap();

    // Then: the handle dangles and nothing is pending
    assert!(repo.entity(design).is_err());
    assert!(repo.cache().new_in(EntityCategory::Design).is_empty());

    // And: the flush writes no row for it
    repo.save_changes().unwrap();
    assert_eq!(count(&repo, "demo_design"), 0);
}

#[test]
fn test_deleting_a_persisted_entity_removes_row_and_bucket() {
    let mut repo = fresh_repository("remove");
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "done".to_string(),
            }),
            None,
        )
        .unwrap();
    repo.save_changes().unwrap();
    let id = repo.cache().id(design).unwrap().unwrap();
    assert_eq!(count(&repo, "demo_design"), 1);

    // When: the persisted entity is deleted and flushed
    repo.delete_entity(design).unwrap();
    assert_eq!(repo.cache().state(design).unwrap(), EntityState::Deleted);

    // a deleted bucket rejects further mutation
    let err = repo.entity_mut(design).unwrap_err();
    assert!(matches!(err, VellumError::EntityDeleted { .. }), "got {:?}", err);

    repo.save_changes().unwrap();

    // Then: the row and the bucket are both gone
    assert_eq!(count(&repo, "demo_design"), 0);
    assert!(repo.entity(design).is_err());
    assert!(repo.cache().find_by_id("demo.design", id).is_none());
}

#[test]
fn test_entity_mut_transitions_loaded_buckets_to_modified() {
    let mut repo = fresh_repository("dirty");
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "clean".to_string(),
            }),
            None,
        )
        .unwrap();
    repo.save_changes().unwrap();
    assert_eq!(repo.cache().state(design).unwrap(), EntityState::Original);

    // When: the entity is borrowed mutably
    repo.entity_mut(design)
        .unwrap()
        .as_any_mut()
        .downcast_mut::<Design>()
        .unwrap()
        .name = "touched".to_string();

    // Then: the bucket is dirty until the next flush settles it
    assert_eq!(repo.cache().state(design).unwrap(), EntityState::Modified);
    repo.save_changes().unwrap();
    assert_eq!(repo.cache().state(design).unwrap(), EntityState::Original);

    let name: String = repo
        .connection()
        .query_row("SELECT \"name\" FROM \"demo_design\"", [], |row| row.get(0))
        .unwrap();
    assert_eq!(name, "touched");
}

#[test]
fn test_mark_modified_is_a_noop_for_new_entities() {
    let mut repo = fresh_repository("fresh");
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "new".to_string(),
            }),
            None,
        )
        .unwrap();

    repo.mark_modified(design).unwrap();

    // membership in the new set is what marks it pending
    assert_eq!(repo.cache().state(design).unwrap(), EntityState::Original);
    assert!(repo.cache().is_new(design).unwrap());
}

#[test]
fn test_change_owner_rebinds_the_stored_owner_row() {
    let mut repo = fresh_repository("move");
    let first = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "first".to_string(),
            }),
            None,
        )
        .unwrap();
    let second = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "second".to_string(),
            }),
            None,
        )
        .unwrap();
    let shape = repo
        .insert_entity(
            "demo.box",
            Box::new(BoxShape {
                x: 5,
                y: 5,
                fill: None,
                vertices: Vec::new(),
                glue_points: Vec::new(),
            }),
            Some(first),
        )
        .unwrap();
    repo.save_changes().unwrap();

    // When: the shape moves to the other diagram
    repo.change_owner(shape, Some(second)).unwrap();
    assert_eq!(repo.cache().state(shape).unwrap(), EntityState::OwnerChanged);
    repo.save_changes().unwrap();

    // Then: the stored row points at the new owner
    let shape_id = repo.cache().id(shape).unwrap().unwrap();
    let second_id = repo.cache().id(second).unwrap().unwrap();
    let owner_id: i64 = repo
        .connection()
        .query_row(
            "SELECT \"owner_id\" FROM \"demo_box\" WHERE \"id\" = ?1",
            [shape_id.raw()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(owner_id, second_id.raw());
    assert_eq!(repo.cache().state(shape).unwrap(), EntityState::Original);
    assert_eq!(repo.cache().owner(shape).unwrap(), Some(second));
}
