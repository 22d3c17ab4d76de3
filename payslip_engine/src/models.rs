//! Data models for the Payslip Engine.
//!
//! The `models` module defines the serialisable structs and enums that
//! flow through the pipeline: raw spreadsheet grids, the employee
//! records extracted from them, the canonical document consumed by
//! the renderers, and the persisted configuration records.  All of
//! them derive `Serialize` and `Deserialize` so they can be handed to
//! the HTTP layer or the local store without any glue.  JSON field
//! names are camelCase.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single decoded spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// A numeric cell.  Dates arrive here as spreadsheet serial numbers.
    Number(f64),
    /// A boolean cell.
    Bool(bool),
    /// Any textual cell, including formula errors rendered as text.
    Text(String),
    /// An empty cell inside the occupied range.
    #[default]
    Empty,
}

impl Cell {
    /// Text rendering of the cell, used for header and marker checks.
    /// Empty cells render as an empty string.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// A named two dimensional grid of cells as produced by workbook
/// decoding.  Coordinates passed to [`RawSheet::cell`] are absolute
/// (zero-based) sheet coordinates; the grid itself only stores the
/// occupied range starting at `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    /// Sheet name as it appears in the workbook tab.
    pub name: String,
    start: (usize, usize),
    rows: Vec<Vec<Cell>>,
}

impl RawSheet {
    /// Build a sheet whose occupied range begins at `start`
    /// (`(row, column)`).
    pub fn new(name: impl Into<String>, start: (usize, usize), rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            start,
            rows,
        }
    }

    /// Build a sheet whose occupied range begins at `A1`.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self::new(name, (0, 0), rows)
    }

    /// Cell accessor.  Returns `None` outside the occupied range.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        let r = row.checked_sub(self.start.0)?;
        let c = col.checked_sub(self.start.1)?;
        self.rows.get(r)?.get(c)
    }

    /// Inclusive `(start, end)` corners of the occupied range, or
    /// `None` for an empty sheet.
    pub fn range(&self) -> Option<((usize, usize), (usize, usize))> {
        if self.rows.is_empty() {
            return None;
        }
        let width = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        if width == 0 {
            return None;
        }
        let end = (self.start.0 + self.rows.len() - 1, self.start.1 + width - 1);
        Some((self.start, end))
    }
}

/// The two employee schemas found in a payroll workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Staff posted abroad (外派员工).  Their sheets carry structured
    /// wage sections and the totals are derived.
    Expatriate,
    /// Locally hired staff (属地员工).  Their columns encode
    /// `"Group - Item"` pairs with pre-supplied totals.
    #[default]
    Local,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Expatriate => "expatriate",
            Category::Local => "local",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Chinese/English label pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bilingual {
    pub zh: String,
    pub en: String,
}

impl Bilingual {
    pub fn new(zh: impl Into<String>, en: impl Into<String>) -> Self {
        Self {
            zh: zh.into(),
            en: en.into(),
        }
    }

    /// `"中文 / English"`, the display form used on every payslip.
    pub fn format(&self) -> String {
        format!("{} / {}", self.zh, self.en)
    }
}

/// The flat, insertion-ordered mapping of column label to formatted
/// value extracted from one spreadsheet row.
///
/// Order matters: alias matching is first-match-wins and local
/// payslips are laid out in column order, so the breakdown keeps the
/// order in which keys were first inserted.  Serialises as a JSON
/// object in that order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Breakdown(Vec<(String, String)>);

impl Breakdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value.  Overwriting keeps the key's
    /// original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + Clone {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Breakdown {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut breakdown = Breakdown::new();
        for (k, v) in iter {
            breakdown.insert(k, v);
        }
        breakdown
    }
}

impl Serialize for Breakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Breakdown {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BreakdownVisitor;

        impl<'de> Visitor<'de> for BreakdownVisitor {
            type Value = Breakdown;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of label to value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Breakdown, A::Error> {
                let mut breakdown = Breakdown::new();
                while let Some((key, value)) = access.next_entry::<String, CellText>()? {
                    breakdown.insert(key, value.0);
                }
                Ok(breakdown)
            }
        }

        deserializer.deserialize_map(BreakdownVisitor)
    }
}

/// Accepts a JSON string, number, boolean or null and keeps its text
/// form.  Spreadsheet-derived values are loosely typed by nature.
struct CellText(String);

impl<'de> Deserialize<'de> for CellText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CellTextVisitor;

        impl<'de> Visitor<'de> for CellTextVisitor {
            type Value = CellText;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CellText, E> {
                Ok(CellText(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<CellText, E> {
                Ok(CellText(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<CellText, E> {
                Ok(CellText(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<CellText, E> {
                Ok(CellText(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<CellText, E> {
                Ok(CellText(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<CellText, E> {
                Ok(CellText(v.to_string()))
            }

            fn visit_unit<E: de::Error>(self) -> Result<CellText, E> {
                Ok(CellText(String::new()))
            }

            fn visit_none<E: de::Error>(self) -> Result<CellText, E> {
                Ok(CellText(String::new()))
            }
        }

        deserializer.deserialize_any(CellTextVisitor)
    }
}

fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    CellText::deserialize(deserializer).map(|t| t.0)
}

/// Sheet-level facts attached to every record at extraction time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordMetadata {
    /// Default currency code for amounts without an explicit marker.
    pub currency: String,
    /// Employer name in Chinese, detected from the sheet name.
    pub employer_name_zh: String,
    /// Employer name in English, detected from the sheet name.
    pub employer_name_en: String,
    /// Pay period embedded in the record, e.g. `2026年10月`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_period: Option<String>,
    /// Payment date embedded in the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<String>,
}

/// One item of a structured wage section, resolved from the
/// breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionItem {
    /// Catalog key of the item, e.g. `固定工资`.
    pub key: String,
    /// Catalog label id of the item, e.g. `basicSalary`.
    pub label: String,
    /// Formatted value as found in the breakdown.
    pub value: String,
    /// Leniently parsed numeric value.
    pub num_value: f64,
}

/// A structured wage component group of an expatriate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub label: String,
    pub items: Vec<SectionItem>,
    /// Sum of the monetary items of the section.
    pub subtotal: f64,
}

/// Derived totals of an expatriate record.
///
/// `net_salary` is always exactly `gross_salary - total_deductions`;
/// no value is recomputed independently.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub gross_salary: f64,
    pub total_deductions: f64,
    pub net_salary: f64,
    /// The deduction items that contributed to `total_deductions`.
    #[serde(default)]
    pub deductions: Vec<SectionItem>,
}

/// Category discriminant of a record together with the data only that
/// category carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum EmployeeKind {
    Expatriate {
        #[serde(default)]
        sections: Vec<Section>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        calculated: Option<Totals>,
    },
    /// Local records, and any unrecognised category tag.
    #[serde(other)]
    Local,
}

impl EmployeeKind {
    pub fn category(&self) -> Category {
        match self {
            EmployeeKind::Expatriate { .. } => Category::Expatriate,
            EmployeeKind::Local => Category::Local,
        }
    }
}

/// One parsed data row of a payroll sheet.
///
/// Records are created once by the row extractor and are not mutated
/// afterwards; the normaliser and the renderers only read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRecord {
    /// The employee's name.  A row without one is not a data row.
    pub name: String,
    /// Destination mailbox.  Validated separately, see
    /// [`crate::extract::validate_employee`].
    #[serde(default)]
    pub email: String,
    /// Free text remarks shown under the payslip table.
    #[serde(default)]
    pub remarks: String,
    /// Overtime hours as found in the sheet (text or number).
    #[serde(default, deserialize_with = "text_or_number")]
    pub overtime_hours: String,
    /// Every mapped column of the row, in column order.
    #[serde(default)]
    pub breakdown: Breakdown,
    /// Origin sheet.
    #[serde(default)]
    pub sheet_name: String,
    /// One-based spreadsheet row the record came from.
    #[serde(default)]
    pub row_number: usize,
    #[serde(default)]
    pub metadata: RecordMetadata,
    #[serde(flatten)]
    pub kind: EmployeeKind,
}

impl EmployeeRecord {
    pub fn category(&self) -> Category {
        self.kind.category()
    }
}

/// How a group is laid out by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// A named group: header band, items, spacer.
    Titled,
    /// The generic "Item" group; its rows are rendered bare.
    Generic,
    /// A title-less group holding a single total line.
    Standalone,
}

/// A rendered line of a payslip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Display label, usually bilingual.
    pub label: String,
    /// The breakdown key or item name the line came from.
    pub original_label: String,
    /// Raw value as found in the breakdown (or computed).
    pub value: String,
    /// Two-decimal rendering of `value`.
    pub formatted_value: String,
    /// `"RMB"`, `"SGD"` or `""` for unitless fields.
    pub unit: String,
    pub is_bold: bool,
    pub is_highlight: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub title: String,
    pub kind: GroupKind,
    pub items: Vec<LineItem>,
}

/// Header facts of a canonical document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub name: String,
    pub email: String,
    /// Row number of the source record, shown as the employee number.
    pub employee_no: usize,
    pub pay_period: String,
    pub payment_date: String,
    pub employer: Bilingual,
    pub currency: String,
    pub is_expatriate: bool,
    pub remarks: String,
}

/// The normaliser's output and the renderers' only input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalDocument {
    pub meta: DocumentMeta,
    pub groups: Vec<Group>,
}

/// SMTP relay settings as entered by the operator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (typically port 465).  When false the connection
    /// upgrades with STARTTLS if the relay offers it.
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// RFC 3339 timestamp stamped by the store on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
}

/// Operator settings: templates and defaults for a send run.
///
/// Subject and body templates recognise the `{name}`, `{month}`,
/// `{companyName}` and `{email}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub email_subject: String,
    pub email_body: String,
    pub pdf_footer: String,
    /// Pay month, `YYYY-MM`.
    pub month: String,
    pub pay_period: String,
    pub date_of_payment: String,
    pub company_name: String,
    pub company_name_en: String,
    pub delay_between_emails_ms: u64,
    pub include_document: bool,
}

pub const DEFAULT_EMAIL_SUBJECT: &str = "工资条 - {month}";

pub const DEFAULT_EMAIL_BODY: &str = "尊敬的 {name}，\n\n您好！请查看您的工资详情。\n\n如有任何疑问，请联系Yunzhi。\n\nDear {name},\n\nPlease find your salary details below.\n\nIf you have any questions, please contact Yunzhi.";

pub const DEFAULT_PDF_FOOTER: &str = "此工资条由系统自动生成";

impl Default for AppSettings {
    fn default() -> Self {
        let today = chrono::Local::now().date_naive();
        Self {
            email_subject: DEFAULT_EMAIL_SUBJECT.to_string(),
            email_body: DEFAULT_EMAIL_BODY.to_string(),
            pdf_footer: DEFAULT_PDF_FOOTER.to_string(),
            month: today.format("%Y-%m").to_string(),
            pay_period: String::new(),
            date_of_payment: today.format("%Y-%m-%d").to_string(),
            company_name: String::new(),
            company_name_en: String::new(),
            delay_between_emails_ms: 1000,
            include_document: true,
        }
    }
}

/// One successfully delivered payslip, kept in the local history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailHistoryRecord {
    pub name: String,
    pub email: String,
    pub month: String,
    #[serde(default)]
    pub message_id: Option<String>,
    /// RFC 3339 timestamp, stamped by the store.
    #[serde(default)]
    pub sent_at: String,
}
