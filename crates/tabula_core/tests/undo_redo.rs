use std::cell::RefCell;
use std::rc::Rc;

use tabula_core::{
    CellValue, ChangeEvent, ChangeKind, ColumnMode, MatrixOp, Project, ProjectError, RowRange,
    Settings, TypeError,
};

fn setup() -> Project {
    let mut project = Project::new("P");
    let root = project.root().id();
    project.add_table(root, "T", 3, 2).unwrap();
    project
}

#[test]
fn undoing_every_edit_restores_the_initial_tree() {
    let mut project = setup();
    let initial = project.root().clone();
    let root = project.root().id();
    let table = project.id_at("P/T").unwrap();
    let x = project.id_at("P/T/1").unwrap();
    let y = project.id_at("P/T/2").unwrap();

    let folder = project.add_folder(root, "F").unwrap().target;
    project.set_cell_text(x, 0, "1.5").unwrap();
    project.set_cell_text(y, 2, "abc").unwrap();
    project.set_column_mode(y, ColumnMode::Text).unwrap();
    project.set_masked(x, RowRange::new(0, 1).unwrap(), true).unwrap();
    project.rename(table, "Data").unwrap();
    project.set_comment(table, "measured").unwrap();
    project.move_aspect(table, folder, None).unwrap();
    project.set_row_count(table, 10).unwrap();
    let matrix = project.add_matrix(root, "M", 2, 2).unwrap().target;
    project
        .edit_matrix(matrix, MatrixOp::SetCell { row: 1, column: 0, value: 4.0 })
        .unwrap();
    project.remove_child(folder, table).unwrap();

    for _ in 0..12 {
        project.undo().unwrap();
    }
    assert_eq!(project.root(), &initial);
    assert_eq!(project.undo_text().as_deref(), Some("P: add T"));

    for _ in 0..11 {
        project.redo().unwrap();
    }
    assert_eq!(project.path_of(table).unwrap(), "P/F/Data");
    assert_eq!(project.find(table).unwrap().table_row_count(), Some(10));
    assert_eq!(project.matrix(matrix).unwrap().cell(1, 0), Some(4.0));
}

#[test]
fn new_edit_after_undo_discards_redo_history() {
    let mut project = setup();
    let root = project.root().id();
    project.add_folder(root, "A").unwrap();
    project.undo().unwrap();
    assert!(project.can_redo());
    assert_eq!(project.redo_text().as_deref(), Some("P: add A"));

    project.add_folder(root, "B").unwrap();
    assert!(!project.can_redo());
    assert!(project.redo().is_err());
}

#[test]
fn repeated_writes_to_one_cell_merge_into_one_step() {
    let mut project = setup();
    let x = project.id_at("P/T/1").unwrap();

    let first = project.set_cell_text(x, 0, "1").unwrap();
    let second = project.set_cell_text(x, 0, "2").unwrap();
    assert!(!first.merged);
    assert!(second.merged);
    assert_eq!(project.column(x).unwrap().value(0), Some(CellValue::Numeric(2.0)));

    project.undo().unwrap();
    assert_eq!(project.column(x).unwrap().row_count(), 0);
    assert_eq!(project.undo_text().as_deref(), Some("P: add T"));
}

#[test]
fn rejected_edit_leaves_history_untouched() {
    let mut project = setup();
    let x = project.id_at("P/T/1").unwrap();
    let before = project.root().clone();

    let err = project
        .set_cell_value(x, 0, CellValue::Text("nope".to_string()))
        .unwrap_err();
    assert!(matches!(
        err,
        ProjectError::Type(TypeError::InvalidRowType { row: 0, .. })
    ));
    assert_eq!(project.root(), &before);
    assert_eq!(project.undo_text().as_deref(), Some("P: add T"));
}

#[test]
fn undo_limit_drops_oldest_steps() {
    let settings = Settings {
        undo_limit: 3,
        ..Settings::default()
    };
    let mut project = Project::with_settings("P", settings);
    let root = project.root().id();
    for name in ["A", "B", "C", "D", "E"] {
        project.add_folder(root, name).unwrap();
    }

    let mut steps = 0;
    while project.can_undo() {
        project.undo().unwrap();
        steps += 1;
    }
    assert_eq!(steps, 3);
    let names: Vec<&str> = project.root().children().iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[test]
fn observers_see_edits_and_their_undo() {
    let mut project = setup();
    let x = project.id_at("P/T/1").unwrap();
    let seen: Rc<RefCell<Vec<ChangeKind>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let observer = project.subscribe(move |event: &ChangeEvent| {
        sink.borrow_mut().push(event.kind);
    });

    project.set_cell_text(x, 1, "7").unwrap();
    project.undo().unwrap();
    assert_eq!(
        seen.borrow().as_slice(),
        &[ChangeKind::DataChanged, ChangeKind::DataChanged]
    );

    assert!(project.unsubscribe(observer));
    project.redo().unwrap();
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn modified_flag_follows_clean_point() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("p.tabula");
    let mut project = setup();
    assert!(project.is_modified());

    project.save_as(&path).unwrap();
    assert!(!project.is_modified());

    let root = project.root().id();
    project.add_folder(root, "F").unwrap();
    assert!(project.is_modified());
    project.undo().unwrap();
    assert!(!project.is_modified());
}
