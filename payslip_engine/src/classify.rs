//! Sheet category classification.
//!
//! Payroll workbooks mix expatriate and local sheets.  The sheet name
//! is the primary signal; when it is unavailable the breakdown keys of
//! a record are scanned instead.  Both classifiers fail open to
//! [`Category::Local`].

use crate::models::{Bilingual, Category};

const EXPATRIATE_SHEET_KEYWORDS: &[&str] = &["外派", "expatriate", "dispatch", "overseas"];
const LOCAL_SHEET_KEYWORDS: &[&str] = &["属地", "local", "本地"];

const EXPATRIATE_CONTENT_KEYWORDS: &[&str] = &[
    "Pay Period",
    "应发工资",
    "Gross Salary",
    "Net Salary",
    "实发工资",
    "CPF",
];
const LOCAL_CONTENT_KEYWORDS: &[&str] = &["基本工资(RMB)", "补贴(RMB)", "扣除(RMB)"];

/// Classify a sheet from its name (case-insensitive substring match).
/// Expatriate keywords win over local ones; anything unrecognised is
/// local.
pub fn classify_sheet(sheet_name: &str) -> Category {
    let name = sheet_name.to_lowercase();
    if EXPATRIATE_SHEET_KEYWORDS.iter().any(|k| name.contains(k)) {
        return Category::Expatriate;
    }
    if LOCAL_SHEET_KEYWORDS.iter().any(|k| name.contains(k)) {
        return Category::Local;
    }
    Category::Local
}

/// Classify a record from its breakdown keys.
pub fn classify_by_content<'a>(keys: impl IntoIterator<Item = &'a str>) -> Category {
    let joined = keys.into_iter().collect::<Vec<_>>().join(" ");
    if EXPATRIATE_CONTENT_KEYWORDS.iter().any(|k| joined.contains(k)) {
        return Category::Expatriate;
    }
    if LOCAL_CONTENT_KEYWORDS.iter().any(|k| joined.contains(k)) {
        return Category::Local;
    }
    Category::Local
}

/// Employer name pair for a sheet.
///
/// Branch sheets (`分社`) pay on behalf of the Singapore branch; the
/// international company's sheets may be paid by the branch on its
/// behalf (`国际公司` + `代发`).  Everything else is the international
/// company.
pub fn detect_employer(sheet_name: &str) -> Bilingual {
    if sheet_name.contains("分社") {
        return Bilingual::new(
            "中国船级社新加坡分社",
            "China Classification Society, Singapore Branch",
        );
    }
    if sheet_name.contains("国际公司") && sheet_name.contains("代发") {
        return Bilingual::new(
            "中国船级社国际有限公司（暂由新加坡分社代发）",
            "China Classification Society International Pte Ltd (on behalf of China Classification Society, Singapore Branch)",
        );
    }
    Bilingual::new(
        "中国船级社国际有限公司",
        "China Classification Society International Pte Ltd",
    )
}
