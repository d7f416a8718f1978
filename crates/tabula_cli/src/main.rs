//! Inspection entry point.
//!
//! # Responsibility
//! - Verify `tabula_core` linkage by printing its version.
//! - Given a project file, load it and print the aspect tree and the load
//!   diagnostics.

use std::process::ExitCode;
use tabula_core::{core_version, init_from_settings, Aspect, Project, Settings};

fn print_tree(aspect: &Aspect, depth: usize) {
    let detail = match aspect.as_column() {
        Some(column) => format!(
            " [{} {} rows={}]",
            column.mode().as_str(),
            column.plot_designation().as_str(),
            column.row_count()
        ),
        None => match (aspect.table_row_count(), aspect.as_matrix()) {
            (Some(rows), _) => format!(" [rows={rows}]"),
            (None, Some(matrix)) => format!(" [{}x{}]", matrix.rows(), matrix.columns()),
            (None, None) => String::new(),
        },
    };
    println!(
        "{}{} {}{}",
        "  ".repeat(depth),
        aspect.aspect_type().as_str(),
        aspect.name(),
        detail
    );
    for child in aspect.children() {
        print_tree(child, depth + 1);
    }
}

fn main() -> ExitCode {
    println!("tabula_core version={}", core_version());
    let Some(path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };

    let settings = Settings::default();
    let log_dir = std::env::temp_dir().join("tabula-logs");
    if let Err(err) = init_from_settings(&settings, &log_dir) {
        eprintln!("logging disabled: {err}");
    }

    match Project::open(&path, settings) {
        Ok((project, report)) => {
            print_tree(project.root(), 0);
            println!("{}", report.summary());
            if report.is_partial() {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("failed to open {path}: {err}");
            log::error!("event=cli_open module=cli status=error");
            ExitCode::FAILURE
        }
    }
}
