//! Workbook pipeline.
//!
//! The `engine` module turns the bytes of an uploaded payroll
//! workbook into a [`ParsedWorkbook`].  Decoding is delegated to
//! [`calamine`], which auto-detects `.xlsx`, `.xlsm`, `.xlsb` and
//! legacy `.xls` files; every worksheet is copied into a [`RawSheet`]
//! so that the extraction code never sees the decoder's types.
//! Sheets are independent of each other, so extraction runs in
//! parallel with [`rayon`] while the output keeps workbook order.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Datelike, Local, NaiveDate};
use rayon::prelude::*;

use crate::catalog::FieldCatalog;
use crate::error::Result;
use crate::extract::{parse_sheet, ParsedSheet, ParsedWorkbook, WorkbookSummary};
use crate::models::{Cell, RawSheet};

/// Convert a decoded cell.  Dates keep their serial number, errors
/// read as empty.
pub fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Int(v) => Cell::Number(*v as f64),
        Data::Float(v) => Cell::Number(*v),
        Data::String(v) => Cell::Text(v.clone()),
        Data::Bool(v) => Cell::Bool(*v),
        Data::DateTime(v) => Cell::Number(v.as_f64()),
        Data::DateTimeIso(v) | Data::DurationIso(v) => Cell::Text(v.clone()),
        Data::Error(_) | Data::Empty => Cell::Empty,
    }
}

/// Decode every worksheet of an in-memory workbook, in workbook order.
pub fn load_sheets_from_bytes(bytes: Vec<u8>) -> Result<Vec<RawSheet>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        let start = range
            .start()
            .map(|(row, col)| (row as usize, col as usize))
            .unwrap_or((0, 0));
        let rows = range
            .rows()
            .map(|row| row.iter().map(cell_from_data).collect())
            .collect();
        sheets.push(RawSheet::new(name, start, rows));
    }
    log::info!("decoded workbook with {} sheets", sheets.len());
    Ok(sheets)
}

pub fn load_sheets_from_path(path: &Path) -> Result<Vec<RawSheet>> {
    load_sheets_from_bytes(std::fs::read(path)?)
}

/// Extract every sheet.  Sheets without employees are dropped from
/// `sheets` but still counted in `summary.total_sheets`.
pub fn parse_workbook(
    sheets: &[RawSheet],
    catalog: &FieldCatalog,
    default_pay_period: &str,
) -> ParsedWorkbook {
    let parsed: Vec<ParsedSheet> = sheets
        .par_iter()
        .map(|sheet| parse_sheet(sheet, catalog, default_pay_period))
        .filter(|sheet| !sheet.employees.is_empty())
        .collect();

    let all_employees: Vec<_> = parsed
        .iter()
        .flat_map(|sheet| sheet.employees.iter().cloned())
        .collect();
    let summary = WorkbookSummary {
        total_sheets: sheets.len(),
        total_employees: all_employees.len(),
        sheets_with_data: parsed.len(),
    };
    log::info!(
        "parsed {} employees from {} of {} sheets",
        summary.total_employees,
        summary.sheets_with_data,
        summary.total_sheets
    );
    ParsedWorkbook {
        sheets: parsed,
        all_employees,
        summary,
    }
}

/// Decode and extract in one go.
pub fn parse_workbook_bytes(
    bytes: Vec<u8>,
    catalog: &FieldCatalog,
    default_pay_period: &str,
) -> Result<ParsedWorkbook> {
    let sheets = load_sheets_from_bytes(bytes)?;
    Ok(parse_workbook(&sheets, catalog, default_pay_period))
}

/// `2026年1月` style period label.
pub fn pay_period_label(date: NaiveDate) -> String {
    format!("{}年{}月", date.year(), date.month())
}

pub fn current_pay_period() -> String {
    pay_period_label(Local::now().date_naive())
}
