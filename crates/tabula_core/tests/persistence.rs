use std::time::{Duration, Instant};

use tabula_core::persistence::file::{backup_path, is_compressed};
use tabula_core::persistence::loader::load_str;
use tabula_core::persistence::CURRENT_VERSION;
use tabula_core::{
    AutosaveOutcome, Autosaver, ColumnMode, ColumnOp, Coordinates, FormatError, MatrixOp,
    PersistError, PlotDesignation, Project, ProjectError, RowRange, Settings,
};

fn setup() -> Project {
    let mut project = Project::new("P");
    let root = project.root().id();
    let folder = project.add_folder(root, "F").unwrap().target;
    project.set_comment(folder, "raw data").unwrap();
    project.set_caption_spec(folder, "%n%C{ - }%c").unwrap();

    let table = project.add_table(folder, "T", 4, 0).unwrap().target;
    let x = project.add_column(table, "x", ColumnMode::Numeric).unwrap().target;
    project
        .edit_column(
            x,
            ColumnOp::ReplaceTexts {
                first: 0,
                values: vec!["0.1".into(), "-0".into(), "1e300".into(), "".into()],
            },
        )
        .unwrap();
    project.set_plot_designation(x, PlotDesignation::X).unwrap();
    project.set_masked(x, RowRange::single(1), true).unwrap();

    let label = project.add_column(table, "label", ColumnMode::Text).unwrap().target;
    project
        .edit_column(
            label,
            ColumnOp::ReplaceTexts {
                first: 0,
                values: vec![" a <b> & c ".into(), "".into(), "line".into()],
            },
        )
        .unwrap();

    let when = project.add_column(table, "when", ColumnMode::DateTime).unwrap().target;
    project.set_cell_text(when, 0, "2024-03-01 12:30:00").unwrap();
    project.set_cell_text(when, 2, "1999-12-31").unwrap();

    let month = project.add_column(table, "month", ColumnMode::Month).unwrap().target;
    project.set_cell_text(month, 0, "March").unwrap();

    let doubled = project.add_column(table, "y", ColumnMode::Numeric).unwrap().target;
    project.set_formula(doubled, "col(\"x\") * 2").unwrap();
    project.recalculate().unwrap();

    let matrix = project.add_matrix(root, "M", 2, 2).unwrap().target;
    project
        .edit_matrix(
            matrix,
            MatrixOp::SetCoordinates(Coordinates {
                x_start: 0.5,
                x_end: 1.5,
                y_start: -1.0,
                y_end: 1.0,
            }),
        )
        .unwrap();
    project
        .edit_matrix(matrix, MatrixOp::SetFormula("x * y".to_string()))
        .unwrap();
    project.recalculate_matrix(matrix).unwrap();
    project
}

#[test]
fn saved_project_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("p.tabula");
    let mut project = setup();

    project.save_as(&path).unwrap();
    let (loaded, report) = Project::open(&path, Settings::default()).unwrap();

    assert!(report.is_clean(), "{}", report.summary());
    assert_eq!(loaded.root(), project.root());
    assert!(!loaded.is_modified());
    assert_eq!(loaded.file_path(), Some(path.as_path()));
}

#[test]
fn compressed_project_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("p.tabula.zst");
    let mut project = setup();

    project.save_as(&path).unwrap();
    assert!(is_compressed(&std::fs::read(&path).unwrap()));
    let (loaded, _) = Project::open(&path, Settings::default()).unwrap();
    assert_eq!(loaded.root(), project.root());
}

#[test]
fn one_malformed_table_is_reported_and_the_rest_loads() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<tabula_project version="1.0">
  <project name="P" creation_time="2024-03-01T10:00:00.000Z">
    <folder name="F">
      <table name="T1" rows="2" columns="1">
        <column name="a" type="Numeric" mode="Numeric" plot_designation="X">
          <cell row="0">1</cell>
          <cell row="1">2</cell>
        </column>
      </table>
      <table name="T2" columns="0"/>
      <matrix name="M" rows="1" cols="2">
        <cell row="0" col="1">5</cell>
      </matrix>
    </folder>
  </project>
</tabula_project>"#;

    let loaded = load_str(xml).unwrap();
    assert_eq!(loaded.version, CURRENT_VERSION);
    assert!(loaded.version.is_supported());
    assert_eq!(loaded.report.problems.len(), 1);
    let problem = &loaded.report.problems[0];
    assert_eq!(problem.path, "P/F/T2");
    assert_eq!(problem.message, "invalid or missing number of rows");
    assert!(loaded.report.is_partial());

    assert!(loaded.root.find_by_path("P/F/T2").is_none());
    let table = loaded.root.find_by_path("P/F/T1").unwrap();
    assert_eq!(table.table_row_count(), Some(2));
    let matrix = loaded.root.find_by_path("P/F/M").unwrap().as_matrix().unwrap();
    assert_eq!(matrix.cell(0, 1), Some(5.0));
}

#[test]
fn overflowing_indices_in_a_file_are_reported_and_the_rest_loads() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<tabula_project version="1.0">
  <project name="P" creation_time="2024-03-01T10:00:00.000Z">
    <table name="Big" rows="18446744073709551615"/>
    <table name="T" rows="2" columns="2">
      <column name="a" type="Numeric" mode="Numeric" plot_designation="X">
        <cell row="0">1</cell>
        <cell row="18446744073709551615">2</cell>
      </column>
      <column name="b" type="Numeric" mode="Numeric" plot_designation="Y">
        <masking><row_range start="1" end="18446744073709551615"/></masking>
      </column>
    </table>
    <matrix name="M" rows="4294967296" cols="4294967296"/>
  </project>
</tabula_project>"#;

    let loaded = load_str(xml).unwrap();
    let problems: Vec<(&str, &str)> = loaded
        .report
        .problems
        .iter()
        .map(|issue| (issue.path.as_str(), issue.message.as_str()))
        .collect();
    assert_eq!(
        problems,
        [
            ("P/Big", "invalid or missing number of rows"),
            ("P/T/a", "invalid row index `18446744073709551615`"),
            ("P/T/b", "invalid or missing start/end row"),
            ("P/M", "invalid or missing matrix dimensions"),
        ]
    );
    let table = loaded.root.find_by_path("P/T").unwrap();
    assert_eq!(table.children().len(), 1);
    let column = table.children()[0].as_column().unwrap();
    assert_eq!(column.row_count(), 1);
}

#[test]
fn edits_past_the_row_limit_leave_the_project_untouched() {
    let mut project = setup();
    let x = project.id_at("P/F/T/x").unwrap();
    let before = project.root().clone();

    assert!(matches!(
        project.edit_column(
            x,
            ColumnOp::ReplaceTexts {
                first: usize::MAX,
                values: vec!["1".into()],
            },
        ),
        Err(ProjectError::Type(_))
    ));
    assert!(matches!(
        project.edit_column(
            x,
            ColumnOp::SetMasked {
                range: RowRange::new(0, usize::MAX - 1).unwrap(),
                masked: true,
            },
        ),
        Err(ProjectError::Type(_))
    ));
    let m = project.id_at("P/M").unwrap();
    assert!(matches!(
        project.edit_matrix(
            m,
            MatrixOp::Resize {
                rows: usize::MAX,
                columns: 2,
            },
        ),
        Err(ProjectError::Structural(_))
    ));
    assert_eq!(project.root(), &before);
}

#[test]
fn partial_load_lands_in_results_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.tabula");
    std::fs::write(
        &path,
        "<tabula_project version=\"1.0\"><project name=\"P\">\
         <table name=\"T\"/></project></tabula_project>",
    )
    .unwrap();

    let (project, report) = Project::open(&path, Settings::default()).unwrap();
    assert!(report.is_partial());
    assert!(project.root().children().is_empty());
    assert!(project
        .results_log()
        .entries()
        .iter()
        .any(|entry| entry.message.contains("invalid or missing number of rows")));
}

#[test]
fn unsupported_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.tabula");
    std::fs::write(
        &path,
        "<tabula_project version=\"3.1\"><project name=\"P\"/></tabula_project>",
    )
    .unwrap();

    let err = Project::open(&path, Settings::default()).unwrap_err();
    assert!(matches!(
        err,
        ProjectError::Persist(PersistError::Format(FormatError::UnsupportedVersion { .. }))
    ));
}

#[test]
fn newer_minor_version_loads_with_warning() {
    let loaded = load_str(
        "<tabula_project version=\"1.7\"><project name=\"P\"><folder name=\"F\"/></project>\
         <extras/></tabula_project>",
    )
    .unwrap();
    assert!(!loaded.report.is_partial());
    assert!(loaded.report.warnings.len() >= 2);
    assert!(loaded.root.find_by_path("P/F").is_some());
}

#[test]
fn second_save_keeps_previous_file_as_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("p.tabula");
    let mut project = Project::new("P");
    project.save_as(&path).unwrap();

    let root = project.root().id();
    project.add_folder(root, "Later").unwrap();
    project.save().unwrap();

    assert!(backup_path(&path).exists());
    let (previous, _) = Project::open_backup(&path, Settings::default()).unwrap();
    assert!(previous.root().children().is_empty());
    let (current, _) = Project::open(&path, Settings::default()).unwrap();
    assert!(current.find_by_path("P/Later").is_some());
}

#[test]
fn failed_save_keeps_project_modified() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("p.tabula");
    let mut project = setup();

    let err = project.save_as(&path).unwrap_err();
    assert!(matches!(err, ProjectError::Persist(PersistError::Io { .. })));
    assert!(project.is_modified());
    assert!(project.file_path().is_none());
    assert!(matches!(project.save(), Err(ProjectError::NoFilePath)));
}

#[test]
fn autosave_writes_side_file_only_when_due_and_modified() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("p.tabula");
    let mut project = Project::new("P");
    project.save_as(&path).unwrap();

    let start = Instant::now();
    let mut autosaver = Autosaver::new(true, Duration::from_secs(60), start);
    let later = start + Duration::from_secs(61);
    assert_eq!(
        autosaver.on_timer(&project, start + Duration::from_secs(30)).unwrap(),
        AutosaveOutcome::NotDue
    );
    assert_eq!(
        autosaver.on_timer(&project, later).unwrap(),
        AutosaveOutcome::Unmodified
    );

    let root = project.root().id();
    project.add_folder(root, "F").unwrap();
    let much_later = later + Duration::from_secs(61);
    {
        let _guard = project.save_lock().try_acquire().unwrap();
        assert_eq!(
            autosaver.on_timer(&project, much_later).unwrap(),
            AutosaveOutcome::Busy
        );
    }

    let AutosaveOutcome::Saved(target) = autosaver.on_timer(&project, much_later).unwrap() else {
        panic!("expected an autosave");
    };
    assert_ne!(target, path);
    assert!(project.is_modified());
    let (recovered, _) = Project::open(&target, Settings::default()).unwrap();
    assert!(recovered.find_by_path("P/F").is_some());
    let (on_disk, _) = Project::open(&path, Settings::default()).unwrap();
    assert!(on_disk.find_by_path("P/F").is_none());
}
