use tabula_core::project::results_log::EntryLevel;
use tabula_core::{AspectId, ColumnMode, ColumnOp, FormulaError, MatrixOp, Project, ProjectError};

struct Fixture {
    project: Project,
    a: AspectId,
    b: AspectId,
}

fn setup() -> Fixture {
    let mut project = Project::new("P");
    let root = project.root().id();
    let table = project.add_table(root, "T", 3, 0).unwrap().target;
    let a = project.add_column(table, "A", ColumnMode::Numeric).unwrap().target;
    let b = project.add_column(table, "B", ColumnMode::Numeric).unwrap().target;
    project
        .edit_column(
            a,
            ColumnOp::ReplaceTexts {
                first: 0,
                values: vec!["1".into(), "2".into(), "3".into()],
            },
        )
        .unwrap();
    Fixture { project, a, b }
}

fn numbers(project: &Project, column: AspectId) -> Vec<Option<f64>> {
    let column = project.column(column).unwrap();
    (0..column.row_count())
        .map(|row| column.numeric_value(row))
        .collect()
}

#[test]
fn dependent_column_follows_its_source() {
    let Fixture { mut project, a, b } = setup();
    project.set_formula(b, "col(\"A\") * 2").unwrap();

    let report = project.recalculate().unwrap();
    assert_eq!(report.evaluated, vec![b]);
    assert!(report.errors.is_empty());
    assert!(report.mutation.is_some());
    assert_eq!(numbers(&project, b), vec![Some(2.0), Some(4.0), Some(6.0)]);

    project.set_cell_text(a, 0, "10").unwrap();
    project.recalculate().unwrap();
    assert_eq!(numbers(&project, b)[0], Some(20.0));
}

#[test]
fn recalculation_is_one_undo_step() {
    let Fixture { mut project, b, .. } = setup();
    project.set_formula(b, "col(\"A\") + i").unwrap();
    project.recalculate().unwrap();
    assert_eq!(project.undo_text().as_deref(), Some("recalculate"));
    assert_eq!(numbers(&project, b), vec![Some(2.0), Some(4.0), Some(6.0)]);

    project.undo().unwrap();
    assert!(numbers(&project, b).is_empty());
    assert_eq!(project.column(b).unwrap().formula(), "col(\"A\") + i");
}

#[test]
fn unchanged_results_do_not_add_history() {
    let Fixture { mut project, b, .. } = setup();
    project.set_formula(b, "col(\"A\")").unwrap();
    project.recalculate().unwrap();
    let text = project.undo_text();

    let report = project.recalculate().unwrap();
    assert!(report.mutation.is_none());
    assert_eq!(project.undo_text(), text);
}

#[test]
fn mutual_references_are_reported_as_cycle() {
    let Fixture { mut project, a, b } = setup();
    project.set_formula(a, "col(\"B\") + 1").unwrap();
    project.set_formula(b, "col(\"A\") + 1").unwrap();
    let before = numbers(&project, a);

    let err = project.evaluate_column(a).unwrap_err();
    assert!(matches!(
        err,
        ProjectError::Formula(FormulaError::Cycle { ref columns }) if columns.len() == 2
    ));

    let report = project.recalculate().unwrap();
    assert!(report.evaluated.is_empty());
    assert!(report.mutation.is_none());
    assert!(matches!(report.errors.as_slice(), [FormulaError::Cycle { .. }]));
    assert_eq!(numbers(&project, a), before);
    assert_eq!(project.results_log().last().unwrap().level, EntryLevel::Error);
}

#[test]
fn evaluate_column_does_not_store_values() {
    let Fixture { mut project, b, .. } = setup();
    project.set_formula(b, "col(\"A\") * col(\"A\")").unwrap();

    let values = project.evaluate_column(b).unwrap();
    assert_eq!(values, vec![Some(1.0), Some(4.0), Some(9.0)]);
    assert!(numbers(&project, b).is_empty());
}

#[test]
fn matrix_formula_fills_every_cell() {
    let mut project = Project::new("P");
    let root = project.root().id();
    let matrix = project.add_matrix(root, "M", 2, 3).unwrap().target;
    project
        .edit_matrix(matrix, MatrixOp::SetFormula("i * 10 + j".to_string()))
        .unwrap();

    project.recalculate_matrix(matrix).unwrap();
    let filled = project.matrix(matrix).unwrap();
    assert_eq!(filled.cell(0, 0), Some(11.0));
    assert_eq!(filled.cell(1, 2), Some(23.0));

    project.undo().unwrap();
    assert_eq!(project.matrix(matrix).unwrap().cell(1, 2), Some(0.0));
}
