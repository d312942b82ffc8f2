// Integration tests for flush atomicity
// A failing statement anywhere in the flush must roll the whole
// transaction back and leave the tracked state exactly as it was.

mod common;

use common::{demo_registry, BoxShape, Design, Sheet, Template};
use vellum_core::{EntityCategory, EntityState, OperationKind, VellumError};
use vellum_store::{
    build_command_table, create_schema, db, Repository, StoreCommand, REPOSITORY_VERSION,
};

fn count(repo: &Repository, table: &str) -> i64 {
    repo.connection()
        .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
            row.get(0)
        })
        .unwrap()
}

// Builds a repository whose command for (type, operation) declares the
// wrong parameter count, so the flush trips over it mid-transaction.
fn sabotaged_repository(type_name: &str, operation: OperationKind) -> Repository {
    let conn = db::open_in_memory().unwrap();
    let registry = demo_registry();
    create_schema(&conn, &registry, REPOSITORY_VERSION).unwrap();
    let mut commands = build_command_table(&registry).unwrap();
    let sql = commands
        .get(type_name, operation)
        .unwrap()
        .sql()
        .to_string();
    commands.set(type_name, operation, StoreCommand::new(sql, 9));
    Repository::create(conn, registry, commands, "doomed", REPOSITORY_VERSION).unwrap()
}

#[test]
fn test_failed_insert_rolls_back_every_earlier_row() {
    // Given: the diagram insert is broken, but designs and templates
    // flush before diagrams and will already have executed
    let mut repo = sabotaged_repository("demo.sheet", OperationKind::Insert);
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "kept".to_string(),
            }),
            None,
        )
        .unwrap();
    let template = repo
        .insert_entity(
            "demo.template",
            Box::new(Template {
                name: "kept".to_string(),
            }),
            None,
        )
        .unwrap();
    let sheet = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "broken".to_string(),
            }),
            None,
        )
        .unwrap();

    // When: the flush fails on the diagram
    let err = repo.save_changes().unwrap_err();
    assert!(matches!(err, VellumError::SchemaConflict { .. }), "got {:?}", err);

    // Then: no row survived, not even the project root
    assert_eq!(count(&repo, "demo_design"), 0);
    assert_eq!(count(&repo, "demo_template"), 0);
    assert_eq!(count(&repo, "demo_sheet"), 0);
    assert_eq!(count(&repo, "project_info"), 0);
    assert!(repo.project().id().is_none());

    // And: the tracked state is untouched, ready for a corrected retry
    for handle in [design, template, sheet] {
        assert_eq!(repo.cache().id(handle).unwrap(), None);
        assert!(repo.cache().is_new(handle).unwrap());
        assert_eq!(repo.cache().state(handle).unwrap(), EntityState::Original);
    }
}

#[test]
fn test_failed_delete_keeps_the_row_and_the_deletion_mark() {
    // Given: a persisted shape whose delete command is broken
    let mut repo = sabotaged_repository("demo.box", OperationKind::Delete);
    let sheet = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "sturdy".to_string(),
            }),
            None,
        )
        .unwrap();
    let shape = repo
        .insert_entity(
            "demo.box",
            Box::new(BoxShape {
                x: 3,
                y: 4,
                fill: None,
                vertices: Vec::new(),
                glue_points: Vec::new(),
            }),
            Some(sheet),
        )
        .unwrap();
    repo.save_changes().unwrap();
    let shape_id = repo.cache().id(shape).unwrap().unwrap();
    assert_eq!(count(&repo, "demo_box"), 1);

    // When: deleting it fails mid-flush
    repo.delete_entity(shape).unwrap();
    let err = repo.save_changes().unwrap_err();
    assert!(matches!(err, VellumError::SchemaConflict { .. }), "got {:?}", err);

    // Then: the row is still stored and the bucket still wants deletion
    assert_eq!(count(&repo, "demo_box"), 1);
    assert_eq!(repo.cache().state(shape).unwrap(), EntityState::Deleted);
    assert_eq!(repo.cache().id(shape).unwrap(), Some(shape_id));
}

#[test]
fn test_failed_flush_does_not_consume_drawn_identifiers_for_the_cache() {
    // Given: a broken diagram insert and one design that flushes first
    let mut repo = sabotaged_repository("demo.sheet", OperationKind::Insert);
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "early".to_string(),
            }),
            None,
        )
        .unwrap();
    repo.insert_entity(
        "demo.sheet",
        Box::new(Sheet {
            title: "late".to_string(),
        }),
        None,
    )
    .unwrap();
    repo.save_changes().unwrap_err();

    // Then: the design was staged an identifier inside the transaction,
    // but the rollback means the cache never learns it
    assert_eq!(repo.cache().id(design).unwrap(), None);
    assert_eq!(repo.cache().new_in(EntityCategory::Design).len(), 1);
}
