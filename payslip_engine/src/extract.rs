//! Row extraction.
//!
//! Each sheet category has a fixed column layout in the catalog.  The
//! extractor finds where the data starts, walks the rows until the
//! totals row, and turns every data row into an [`EmployeeRecord`]
//! whose breakdown holds every mapped column as a formatted string.
//! Rows that are not employee rows are skipped, never reported.

use crate::catalog::{
    ColumnDef, FieldCatalog, EMAIL_FIELD, NAME_FIELD, OVERTIME_HOURS_FIELD, REMARKS_FIELD,
};
use crate::classify::{classify_sheet, detect_employer};
use crate::models::{
    Breakdown, Category, Cell, EmployeeKind, EmployeeRecord, RawSheet, RecordMetadata,
};
use crate::totals;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// First-column tokens that mark the header row.
const HEADER_TOKENS: &[&str] = &["序号", "No", "No.", "Serial No"];
/// First-column markers of the totals row that ends a sheet.
const TOTAL_MARKERS: &[&str] = &["合计", "Total"];
/// Rows scanned for a header token.
const HEADER_SCAN_ROWS: usize = 10;
/// Data start row when no header token is found (the third row).
const DEFAULT_DATA_START_ROW: usize = 2;
/// Currency recorded on every extracted record.
const SHEET_CURRENCY: &str = "SGD";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"));

/// Identity fields and breakdown of one data row, before the sheet
/// context is attached.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedRow {
    pub name: String,
    pub email: String,
    pub remarks: String,
    pub overtime_hours: String,
    pub breakdown: Breakdown,
}

/// Formatted text of a cell.  Numbers get two decimals, blanks and
/// dashes become `"0.00"`, everything else is trimmed text.
pub fn format_cell(cell: Option<&Cell>) -> String {
    match cell {
        None | Some(Cell::Empty) => "0.00".to_string(),
        Some(Cell::Number(n)) => totals::format_number(*n),
        Some(Cell::Bool(b)) => b.to_string(),
        Some(Cell::Text(s)) if s.is_empty() || s == "-" => "0.00".to_string(),
        Some(Cell::Text(s)) => s.trim().to_string(),
    }
}

/// Read one row through a column mapping.  Returns `None` when the row
/// has no name, i.e. is not a data row.
pub fn extract_row(sheet: &RawSheet, row: usize, mapping: &[ColumnDef]) -> Option<ExtractedRow> {
    let mut out = ExtractedRow::default();
    for column in mapping {
        let value = format_cell(sheet.cell(row, column.index));
        match column.label.as_str() {
            NAME_FIELD => out.name = value.clone(),
            EMAIL_FIELD => out.email = value.clone(),
            REMARKS_FIELD => out.remarks = value.clone(),
            OVERTIME_HOURS_FIELD => out.overtime_hours = value.clone(),
            _ => {}
        }
        out.breakdown.insert(column.label.clone(), value);
    }
    // blank name cells are formatted as "0.00"
    if out.name.is_empty() || out.name == "0.00" {
        return None;
    }
    Some(out)
}

/// Row index of the header row, found by scanning the first column of
/// the first rows for a header token.
pub fn find_header_row(sheet: &RawSheet) -> Option<usize> {
    let ((start_row, _), (end_row, _)) = sheet.range()?;
    (start_row..=end_row)
        .take(HEADER_SCAN_ROWS)
        .find(|&r| match sheet.cell(r, 0) {
            Some(cell) if !cell.is_empty() => {
                HEADER_TOKENS.contains(&cell.as_text().trim())
            }
            _ => false,
        })
}

/// First row to scan for employee data.
pub fn data_start_row(sheet: &RawSheet) -> usize {
    find_header_row(sheet).map_or(DEFAULT_DATA_START_ROW, |r| r + 1)
}

fn is_total_row(cell: Option<&Cell>) -> bool {
    match cell {
        Some(cell) if !cell.is_empty() => {
            let text = cell.as_text();
            TOTAL_MARKERS.iter().any(|m| text.contains(m))
        }
        _ => false,
    }
}

/// Data rows carry a serial number in the first column.
fn has_serial_number(cell: Option<&Cell>) -> bool {
    match cell {
        Some(Cell::Number(_)) => true,
        Some(Cell::Text(s)) => !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

/// One sheet's worth of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSheet {
    pub sheet_name: String,
    pub category: Category,
    pub employees: Vec<EmployeeRecord>,
    pub column_headers: Vec<String>,
}

/// Extract every employee of a sheet.
///
/// `default_pay_period` is attached to expatriate records, whose
/// payslips always show a period.
pub fn parse_sheet(
    sheet: &RawSheet,
    catalog: &FieldCatalog,
    default_pay_period: &str,
) -> ParsedSheet {
    let category = classify_sheet(&sheet.name);
    let mapping = catalog.column_mapping(category);
    let employer = detect_employer(&sheet.name);
    let mut employees = Vec::new();

    if let Some((_, (end_row, _))) = sheet.range() {
        for row in data_start_row(sheet)..=end_row {
            let first = sheet.cell(row, 0);
            if is_total_row(first) {
                break;
            }
            if !has_serial_number(first) {
                continue;
            }
            let Some(extracted) = extract_row(sheet, row, mapping) else {
                continue;
            };

            let metadata = RecordMetadata {
                currency: SHEET_CURRENCY.to_string(),
                employer_name_zh: employer.zh.clone(),
                employer_name_en: employer.en.clone(),
                pay_period: (category == Category::Expatriate)
                    .then(|| default_pay_period.to_string()),
                payment_date: None,
            };
            let kind = match (category, catalog.structure_of(category)) {
                (Category::Expatriate, Some(structure)) => {
                    let (sections, calculated) =
                        totals::derive(&extracted.breakdown, structure, catalog);
                    EmployeeKind::Expatriate {
                        sections,
                        calculated: Some(calculated),
                    }
                }
                (Category::Expatriate, None) => EmployeeKind::Expatriate {
                    sections: Vec::new(),
                    calculated: None,
                },
                (Category::Local, _) => EmployeeKind::Local,
            };

            employees.push(EmployeeRecord {
                name: extracted.name,
                email: extracted.email,
                remarks: extracted.remarks,
                overtime_hours: extracted.overtime_hours,
                breakdown: extracted.breakdown,
                sheet_name: sheet.name.clone(),
                row_number: row + 1,
                metadata,
                kind,
            });
        }
    }

    log::debug!(
        "sheet `{}` classified {category}, {} employee rows",
        sheet.name,
        employees.len()
    );

    ParsedSheet {
        sheet_name: sheet.name.clone(),
        category,
        employees,
        column_headers: mapping.iter().map(|c| c.label.clone()).collect(),
    }
}

/// Result of checking a record before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// A record can be sent when it has a name and a well-formed email.
pub fn validate_employee(employee: &EmployeeRecord) -> Validation {
    let mut errors = Vec::new();
    if employee.name.is_empty() {
        errors.push("Name is missing".to_string());
    }
    if employee.email.is_empty() || employee.email == "0.00" {
        errors.push("Email is missing".to_string());
    } else if !is_valid_email(&employee.email) {
        errors.push("Email format is invalid".to_string());
    }
    Validation {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Counters of a parsed workbook.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookSummary {
    pub total_sheets: usize,
    pub total_employees: usize,
    pub sheets_with_data: usize,
}

/// Every sheet that produced at least one employee, plus the flattened
/// employee list in sheet order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedWorkbook {
    pub sheets: Vec<ParsedSheet>,
    pub all_employees: Vec<EmployeeRecord>,
    pub summary: WorkbookSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub local: usize,
    pub expatriate: usize,
}

/// Validation overview shown before a send run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    pub total_employees: usize,
    pub valid_employees: usize,
    pub invalid_employees: usize,
    pub missing_emails: usize,
    pub by_sheet: BTreeMap<String, usize>,
    pub by_type: CategoryCounts,
}

pub fn data_summary(parsed: &ParsedWorkbook) -> DataSummary {
    let mut summary = DataSummary {
        total_employees: parsed.all_employees.len(),
        ..DataSummary::default()
    };
    for employee in &parsed.all_employees {
        if validate_employee(employee).is_valid {
            summary.valid_employees += 1;
        } else {
            summary.invalid_employees += 1;
            if employee.email.is_empty() || employee.email == "0.00" {
                summary.missing_emails += 1;
            }
        }
        match employee.category() {
            Category::Local => summary.by_type.local += 1,
            Category::Expatriate => summary.by_type.expatriate += 1,
        }
    }
    for sheet in &parsed.sheets {
        summary
            .by_sheet
            .insert(sheet.sheet_name.clone(), sheet.employees.len());
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn catalog() -> FieldCatalog {
        FieldCatalog::standard().unwrap()
    }

    fn local_row(serial: f64, name: &str, basic: f64, email: &str) -> Vec<Cell> {
        let mut row = vec![Cell::Empty; 23];
        row[0] = Cell::Number(serial);
        row[1] = text(name);
        row[2] = Cell::Number(basic);
        row[3] = text("-");
        row[19] = Cell::Number(basic);
        row[21] = text(email);
        row[22] = Cell::Number(2.0);
        row
    }

    #[test]
    fn cell_formatting() {
        assert_eq!(format_cell(None), "0.00");
        assert_eq!(format_cell(Some(&Cell::Empty)), "0.00");
        assert_eq!(format_cell(Some(&text("-"))), "0.00");
        assert_eq!(format_cell(Some(&Cell::Number(1234.5))), "1234.50");
        assert_eq!(format_cell(Some(&text("  Zhang San "))), "Zhang San");
    }

    #[test]
    fn header_discovery() {
        let sheet = RawSheet::from_rows(
            "属地",
            vec![
                vec![text("工资表")],
                vec![text("")],
                vec![text("  No. ")],
                vec![Cell::Number(1.0)],
            ],
        );
        assert_eq!(find_header_row(&sheet), Some(2));
        assert_eq!(data_start_row(&sheet), 3);

        let headerless = RawSheet::from_rows("x", vec![vec![text("a")], vec![text("b")]]);
        assert_eq!(find_header_row(&headerless), None);
        assert_eq!(data_start_row(&headerless), 2);
    }

    #[test]
    fn header_scan_is_limited_to_the_first_rows() {
        let mut rows: Vec<Vec<Cell>> = (0..10).map(|_| vec![text("title")]).collect();
        rows.push(vec![text("序号")]);
        let sheet = RawSheet::from_rows("s", rows);
        assert_eq!(find_header_row(&sheet), None);
    }

    #[test]
    fn row_extraction_reads_special_fields() {
        let catalog = catalog();
        let sheet = RawSheet::from_rows("属地", vec![local_row(1.0, "LI HUA", 5000.0, "li@x.com")]);
        let row = extract_row(&sheet, 0, catalog.column_mapping(Category::Local)).unwrap();
        assert_eq!(row.name, "LI HUA");
        assert_eq!(row.email, "li@x.com");
        assert_eq!(row.overtime_hours, "2.00");
        assert_eq!(row.breakdown.get("固定工资类 - 合同工资"), Some("5000.00"));
        assert_eq!(row.breakdown.get("固定工资类 - 补贴"), Some("0.00"));
        assert_eq!(row.breakdown.len(), 23);
        assert_eq!(row.breakdown.keys().next(), Some("序号"));
    }

    #[test]
    fn nameless_row_is_not_a_record() {
        let catalog = catalog();
        let sheet = RawSheet::from_rows("属地", vec![local_row(1.0, "", 5000.0, "li@x.com")]);
        assert_eq!(
            extract_row(&sheet, 0, catalog.column_mapping(Category::Local)),
            None
        );
    }

    #[test]
    fn sheet_scan_skips_and_stops() {
        let catalog = catalog();
        let sheet = RawSheet::from_rows(
            "属地员工",
            vec![
                vec![text("2026年1月工资表")],
                vec![text("序号"), text("姓名")],
                vec![text(""), text("Name")],
                local_row(1.0, "A", 100.0, "a@x.com"),
                local_row(2.0, "", 100.0, "nobody@x.com"),
                local_row(3.0, "C", 300.0, "c@x.com"),
                vec![text("合计"), Cell::Empty, Cell::Number(400.0)],
                local_row(4.0, "D", 1.0, "d@x.com"),
            ],
        );
        let parsed = parse_sheet(&sheet, &catalog, "2026年1月");
        let names: Vec<&str> = parsed.employees.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(parsed.category, Category::Local);
        assert_eq!(parsed.employees[1].row_number, 6);
        assert_eq!(parsed.employees[0].metadata.pay_period, None);
        assert_eq!(parsed.column_headers.len(), 23);
    }

    #[test]
    fn expatriate_sheet_gets_totals_and_period() {
        let catalog = catalog();
        let mut row = vec![Cell::Empty; 31];
        row[0] = Cell::Number(1.0);
        row[1] = text("WANG");
        row[2] = Cell::Number(3.0);
        row[7] = Cell::Number(5000.0);
        row[24] = Cell::Number(100.0);
        row[29] = text("wang@x.com");
        let sheet = RawSheet::from_rows(
            "外派-国际公司",
            vec![vec![text("序号")], row],
        );
        let parsed = parse_sheet(&sheet, &catalog, "2026年1月");
        assert_eq!(parsed.category, Category::Expatriate);
        let record = &parsed.employees[0];
        assert_eq!(record.metadata.pay_period.as_deref(), Some("2026年1月"));
        assert_eq!(record.metadata.currency, "SGD");
        match &record.kind {
            EmployeeKind::Expatriate {
                calculated: Some(totals),
                ..
            } => {
                assert_eq!(totals.net_salary, totals.gross_salary - totals.total_deductions);
                assert_eq!(totals.total_deductions, 100.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn validation_messages() {
        let catalog = catalog();
        let sheet = RawSheet::from_rows(
            "属地",
            vec![
                local_row(1.0, "A", 1.0, "a@x.com"),
                local_row(2.0, "B", 1.0, "not-an-email"),
                local_row(3.0, "C", 1.0, ""),
            ],
        );
        let mut parsed = parse_sheet(&sheet, &catalog, "");
        assert_eq!(parsed.employees.len(), 3);
        assert!(validate_employee(&parsed.employees[0]).is_valid);
        assert_eq!(
            validate_employee(&parsed.employees[1]).errors,
            vec!["Email format is invalid".to_string()]
        );
        assert_eq!(
            validate_employee(&parsed.employees[2]).errors,
            vec!["Email is missing".to_string()]
        );

        let workbook = ParsedWorkbook {
            all_employees: std::mem::take(&mut parsed.employees),
            sheets: vec![parsed],
            summary: WorkbookSummary::default(),
        };
        let summary = data_summary(&workbook);
        assert_eq!(summary.valid_employees, 1);
        assert_eq!(summary.invalid_employees, 2);
        assert_eq!(summary.missing_emails, 1);
        assert_eq!(summary.by_type.local, 3);
    }
}
