// Integration tests for flush ordering
// Audit triggers on the generated tables record the exact sequence of
// row operations inside a flush transaction.

mod common;

use common::{fresh_repository, BoxShape, ColorStyle, Design, Sheet, Template};
use vellum_store::Repository;

// Each trigger appends (table, action, row id) so the log replays the
// flush one row at a time.
fn install_audit(repo: &Repository) {
    repo.connection()
        .execute_batch(
            "CREATE TABLE audit_log (
                 seq INTEGER PRIMARY KEY AUTOINCREMENT,
                 tbl TEXT NOT NULL,
                 action TEXT NOT NULL,
                 row_id INTEGER NOT NULL
             );
             CREATE TRIGGER audit_design_insert AFTER INSERT ON demo_design
             BEGIN INSERT INTO audit_log (tbl, action, row_id) VALUES ('demo_design', 'insert', NEW.id); END;
             CREATE TRIGGER audit_style_insert AFTER INSERT ON demo_color_style
             BEGIN INSERT INTO audit_log (tbl, action, row_id) VALUES ('demo_color_style', 'insert', NEW.id); END;
             CREATE TRIGGER audit_template_insert AFTER INSERT ON demo_template
             BEGIN INSERT INTO audit_log (tbl, action, row_id) VALUES ('demo_template', 'insert', NEW.id); END;
             CREATE TRIGGER audit_sheet_insert AFTER INSERT ON demo_sheet
             BEGIN INSERT INTO audit_log (tbl, action, row_id) VALUES ('demo_sheet', 'insert', NEW.id); END;
             CREATE TRIGGER audit_sheet_delete AFTER DELETE ON demo_sheet
             BEGIN INSERT INTO audit_log (tbl, action, row_id) VALUES ('demo_sheet', 'delete', OLD.id); END;
             CREATE TRIGGER audit_box_insert AFTER INSERT ON demo_box
             BEGIN INSERT INTO audit_log (tbl, action, row_id) VALUES ('demo_box', 'insert', NEW.id); END;
             CREATE TRIGGER audit_box_delete AFTER DELETE ON demo_box
             BEGIN INSERT INTO audit_log (tbl, action, row_id) VALUES ('demo_box', 'delete', OLD.id); END;",
        )
        .unwrap();
}

fn audit_log(repo: &Repository) -> Vec<(String, String, i64)> {
    let mut stmt = repo
        .connection()
        .prepare("SELECT tbl, action, row_id FROM audit_log ORDER BY seq")
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap();
    rows.collect::<rusqlite::Result<_>>().unwrap()
}

fn seq_of(log: &[(String, String, i64)], tbl: &str, action: &str, row_id: i64) -> usize {
    log.iter()
        .position(|(t, a, r)| t == tbl && a == action && *r == row_id)
        .unwrap_or_else(|| panic!("no '{} {} {}' in audit log {:?}", action, tbl, row_id, log))
}

fn plain_box(x: i32) -> Box<BoxShape> {
    Box::new(BoxShape {
        x,
        y: 0,
        fill: None,
        vertices: Vec::new(),
        glue_points: Vec::new(),
    })
}

#[test]
fn test_owners_insert_before_the_entities_they_own() {
    let mut repo = fresh_repository("order");
    install_audit(&repo);

    // Given: a diagram with a three-deep shape chain, tracked in one batch
    let sheet = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "chain".to_string(),
            }),
            None,
        )
        .unwrap();
    let first = repo.insert_entity("demo.box", plain_box(1), Some(sheet)).unwrap();
    let second = repo.insert_entity("demo.box", plain_box(2), Some(first)).unwrap();
    let third = repo.insert_entity("demo.box", plain_box(3), Some(second)).unwrap();

    // When: the batch is flushed
    repo.save_changes().unwrap();

    // Then: every row lands strictly after the row it needs an id from
    let log = audit_log(&repo);
    let sheet_id = repo.cache().id(sheet).unwrap().unwrap().raw();
    let first_id = repo.cache().id(first).unwrap().unwrap().raw();
    let second_id = repo.cache().id(second).unwrap().unwrap().raw();
    let third_id = repo.cache().id(third).unwrap().unwrap().raw();

    let sheet_at = seq_of(&log, "demo_sheet", "insert", sheet_id);
    let first_at = seq_of(&log, "demo_box", "insert", first_id);
    let second_at = seq_of(&log, "demo_box", "insert", second_id);
    let third_at = seq_of(&log, "demo_box", "insert", third_id);
    assert!(sheet_at < first_at, "diagram must precede its root shape");
    assert!(first_at < second_at, "parent shape must precede its child");
    assert!(second_at < third_at, "parent shape must precede its child");
}

#[test]
fn test_category_order_runs_styles_before_templates_before_diagrams() {
    let mut repo = fresh_repository("categories");
    install_audit(&repo);

    // Given: one new entity per category, tracked in reverse order
    let shape_owner = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "z".to_string(),
            }),
            None,
        )
        .unwrap();
    let shape = repo
        .insert_entity("demo.box", plain_box(9), Some(shape_owner))
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
    let design = repo
        .insert_entity(
            "demo.design",
            Box::new(Design {
                name: "d".to_string(),
            }),
            None,
        )
        .unwrap();
    let style = repo
        .insert_entity(
            "demo.color_style",
            Box::new(ColorStyle {
                name: "s".to_string(),
                argb: 7,
            }),
            Some(design),
        )
        .unwrap();

    repo.save_changes().unwrap();

    // Then: the flush runs in category order, not tracking order
    let log = audit_log(&repo);
    let design_at = seq_of(
        &log,
        "demo_design",
        "insert",
        repo.cache().id(design).unwrap().unwrap().raw(),
    );
    let style_at = seq_of(
        &log,
        "demo_color_style",
        "insert",
        repo.cache().id(style).unwrap().unwrap().raw(),
    );
    let template_at = seq_of(
        &log,
        "demo_template",
        "insert",
        repo.cache().id(template).unwrap().unwrap().raw(),
    );
    let sheet_at = seq_of(
        &log,
        "demo_sheet",
        "insert",
        repo.cache().id(shape_owner).unwrap().unwrap().raw(),
    );
    let shape_at = seq_of(
        &log,
        "demo_box",
        "insert",
        repo.cache().id(shape).unwrap().unwrap().raw(),
    );
    assert!(design_at < style_at);
    assert!(style_at < template_at);
    assert!(template_at < sheet_at);
    assert!(sheet_at < shape_at);
}

#[test]
fn test_deletes_run_before_inserts_and_children_before_owners() {
    let mut repo = fresh_repository("phases");

    // Given: a persisted diagram with a shape on it
    let sheet = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "old".to_string(),
            }),
            None,
        )
        .unwrap();
    let shape = repo.insert_entity("demo.box", plain_box(4), Some(sheet)).unwrap();
    repo.save_changes().unwrap();
    let sheet_id = repo.cache().id(sheet).unwrap().unwrap().raw();
    let shape_id = repo.cache().id(shape).unwrap().unwrap().raw();

    // audit only the second flush
    install_audit(&repo);

    // When: both are deleted while a new template is pending
    repo.delete_entity(shape).unwrap();
    repo.delete_entity(sheet).unwrap();
    let template = repo
        .insert_entity(
            "demo.template",
            Box::new(Template {
                name: "fresh".to_string(),
            }),
            None,
        )
        .unwrap();
    repo.save_changes().unwrap();

    // Then: shape delete, then diagram delete, then the insert
    let log = audit_log(&repo);
    let shape_gone = seq_of(&log, "demo_box", "delete", shape_id);
    let sheet_gone = seq_of(&log, "demo_sheet", "delete", sheet_id);
    let template_at = seq_of(
        &log,
        "demo_template",
        "insert",
        repo.cache().id(template).unwrap().unwrap().raw(),
    );
    assert!(shape_gone < sheet_gone, "shapes must clear before their diagram");
    assert!(sheet_gone < template_at, "the delete phase must finish first");
}

#[test]
fn test_deleted_shape_chains_drain_leaves_first() {
    let mut repo = fresh_repository("drain");

    // Given: a persisted three-deep chain
    let sheet = repo
        .insert_entity(
            "demo.sheet",
            Box::new(Sheet {
                title: "chain".to_string(),
            }),
            None,
        )
        .unwrap();
    let first = repo.insert_entity("demo.box", plain_box(1), Some(sheet)).unwrap();
    let second = repo.insert_entity("demo.box", plain_box(2), Some(first)).unwrap();
    let third = repo.insert_entity("demo.box", plain_box(3), Some(second)).unwrap();
    repo.save_changes().unwrap();
    let first_id = repo.cache().id(first).unwrap().unwrap().raw();
    let second_id = repo.cache().id(second).unwrap().unwrap().raw();
    let third_id = repo.cache().id(third).unwrap().unwrap().raw();

    install_audit(&repo);

    // When: the whole chain is deleted in owner-first order
    repo.delete_entity(first).unwrap();
    repo.delete_entity(second).unwrap();
    repo.delete_entity(third).unwrap();
    repo.save_changes().unwrap();

    // Then: rows disappear leaf-first regardless of deletion order
    let log = audit_log(&repo);
    let third_gone = seq_of(&log, "demo_box", "delete", third_id);
    let second_gone = seq_of(&log, "demo_box", "delete", second_id);
    let first_gone = seq_of(&log, "demo_box", "delete", first_id);
    assert!(third_gone < second_gone);
    assert!(second_gone < first_gone);
}
