//! Serializes an aspect tree into the project XML document.
//!
//! # Invariants
//! - Depth-first, child order preserved, ids written.
//! - Every stored cell is written, including invalid ones, so a reload
//!   reproduces the payload bit for bit.
//! - Numbers use the shortest round-trip text.

use crate::model::aspect::{Aspect, AspectKind};
use crate::model::cell::CellValue;
use crate::model::column::Column;
use crate::model::filter::{format_datetime, format_round_trip, ISO_DATETIME_FORMAT};
use crate::model::interval::IntervalSet;
use crate::model::matrix::Matrix;
use crate::model::mode::NumericFormat;
use crate::persistence::{CURRENT_VERSION, ROOT_ELEMENT};
use chrono::SecondsFormat;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

type XmlWriter = Writer<Vec<u8>>;

fn emit(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), String> {
    writer
        .write_event(event)
        .map_err(|err| format!("failed to write XML: {err}"))
}

/// Writes `<name>text</name>`, or `<name/>` for empty text so that
/// indentation never leaks into the value.
fn write_text_element(writer: &mut XmlWriter, start: BytesStart<'_>, text: &str) -> Result<(), String> {
    if text.is_empty() {
        return emit(writer, Event::Empty(start));
    }
    let end = start.to_end().into_owned();
    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(end))
}

fn write_optional_text(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), String> {
    if text.is_empty() {
        return Ok(());
    }
    write_text_element(writer, BytesStart::new(name), text)
}

/// Returns the complete project document for `root`.
pub fn to_xml(root: &Aspect) -> Result<String, String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    let version = CURRENT_VERSION.to_string();
    let mut start = BytesStart::new(ROOT_ELEMENT);
    start.push_attribute(("version", version.as_str()));
    emit(&mut writer, Event::Start(start))?;
    write_aspect(&mut writer, root)?;
    emit(&mut writer, Event::End(BytesEnd::new(ROOT_ELEMENT)))?;

    String::from_utf8(writer.into_inner()).map_err(|err| format!("writer produced invalid UTF-8: {err}"))
}

fn write_aspect(writer: &mut XmlWriter, aspect: &Aspect) -> Result<(), String> {
    let element = aspect.aspect_type().as_str();
    let id = aspect.id().to_string();
    let created = aspect
        .creation_time()
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut start = BytesStart::new(element);
    start.push_attribute(("id", id.as_str()));
    start.push_attribute(("name", aspect.name()));
    start.push_attribute(("creation_time", created.as_str()));
    start.push_attribute(("caption_spec", aspect.caption_spec()));

    let mut owned: Vec<(&str, String)> = Vec::new();
    match aspect.kind() {
        AspectKind::Project | AspectKind::Folder => {}
        AspectKind::Table(table) => {
            owned.push(("rows", table.row_count().to_string()));
            owned.push(("columns", aspect.columns().count().to_string()));
        }
        AspectKind::Matrix(matrix) => {
            let coordinates = matrix.coordinates();
            owned.push(("rows", matrix.rows().to_string()));
            owned.push(("cols", matrix.columns().to_string()));
            owned.push(("x_start", format_round_trip(coordinates.x_start)));
            owned.push(("x_end", format_round_trip(coordinates.x_end)));
            owned.push(("y_start", format_round_trip(coordinates.y_start)));
            owned.push(("y_end", format_round_trip(coordinates.y_end)));
            push_numeric_format(&mut owned, matrix.numeric_format());
        }
        AspectKind::Column(column) => {
            owned.push(("type", column.data().data_type().as_str().to_string()));
            owned.push(("mode", column.mode().as_str().to_string()));
            owned.push((
                "plot_designation",
                column.plot_designation().as_str().to_string(),
            ));
            push_numeric_format(&mut owned, column.numeric_format());
            owned.push(("datetime_format", column.datetime_format().to_string()));
        }
    }
    for (key, value) in &owned {
        start.push_attribute((*key, value.as_str()));
    }
    emit(writer, Event::Start(start))?;

    write_optional_text(writer, "comment", aspect.comment())?;
    match aspect.kind() {
        AspectKind::Column(column) => write_column_body(writer, column)?,
        AspectKind::Matrix(matrix) => write_matrix_body(writer, matrix)?,
        _ => {}
    }
    for child in aspect.children() {
        write_aspect(writer, child)?;
    }
    emit(writer, Event::End(BytesEnd::new(element)))
}

fn push_numeric_format(attributes: &mut Vec<(&str, String)>, format: NumericFormat) {
    attributes.push(("numeric_format", format.notation.as_char().to_string()));
    attributes.push(("numeric_digits", format.digits.to_string()));
}

fn write_ranges(writer: &mut XmlWriter, name: &str, set: &IntervalSet) -> Result<(), String> {
    if set.is_empty() {
        return Ok(());
    }
    emit(writer, Event::Start(BytesStart::new(name)))?;
    for range in set.ranges() {
        let start_row = range.start().to_string();
        let end_row = range.end().to_string();
        let mut element = BytesStart::new("row_range");
        element.push_attribute(("start", start_row.as_str()));
        element.push_attribute(("end", end_row.as_str()));
        emit(writer, Event::Empty(element))?;
    }
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn cell_text(value: &CellValue) -> String {
    match value {
        CellValue::Numeric(number) => format_round_trip(*number),
        CellValue::Text(text) => text.clone(),
        CellValue::DateTime(value) => format_datetime(value, ISO_DATETIME_FORMAT),
    }
}

fn write_column_body(writer: &mut XmlWriter, column: &Column) -> Result<(), String> {
    write_optional_text(writer, "formula", column.formula())?;
    write_ranges(writer, "masking", column.masked_rows())?;
    write_ranges(writer, "invalid", column.invalid_rows())?;
    for row in 0..column.row_count() {
        let Some(value) = column.data().get(row) else {
            continue;
        };
        let index = row.to_string();
        let mut start = BytesStart::new("cell");
        start.push_attribute(("row", index.as_str()));
        write_text_element(writer, start, &cell_text(&value))?;
    }
    Ok(())
}

fn write_matrix_body(writer: &mut XmlWriter, matrix: &Matrix) -> Result<(), String> {
    write_optional_text(writer, "formula", matrix.formula())?;
    for row in 0..matrix.rows() {
        for col in 0..matrix.columns() {
            let Some(value) = matrix.cell(row, col) else {
                continue;
            };
            let row_index = row.to_string();
            let col_index = col.to_string();
            let mut start = BytesStart::new("cell");
            start.push_attribute(("row", row_index.as_str()));
            start.push_attribute(("col", col_index.as_str()));
            write_text_element(writer, start, &format_round_trip(value))?;
        }
    }
    Ok(())
}
