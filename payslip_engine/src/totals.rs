//! Derived-field calculation for expatriate records.
//!
//! Expatriate sheets do not carry trustworthy totals, so gross salary,
//! total deductions and net salary are computed from the structured
//! sections of the catalog.  Values are located with alias-tolerant
//! matching and parsed leniently: anything that is not a number counts
//! as zero, nothing here ever fails.

use std::collections::HashSet;

use crate::catalog::{FieldCatalog, ItemDef, Structure, OVERTIME_HOURS_FIELD};
use crate::models::{Breakdown, Section, SectionItem, Totals};

/// Suffixes under which a catalog key may appear as a column label.
const CURRENCY_SUFFIXES: &[&str] = &["", " (RMB)", " (SGD)"];

/// Parse the longest numeric prefix of `text`, after leading
/// whitespace, the way spreadsheet exports are usually read: `"12.5
/// hrs"` is 12.5, `"1,000"` is 1.
fn parse_numeric_prefix(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return None;
    }
    let mut end = i;
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            end = j;
        }
    }
    s[..end].parse::<f64>().ok()
}

/// Lenient number parsing.  Blank, dash and unparseable input read as
/// zero.
pub fn safe_parse_number(value: &str) -> f64 {
    if value.is_empty() || value == "-" {
        return 0.0;
    }
    match parse_numeric_prefix(value) {
        Some(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// Two-decimal rendering of a loosely typed amount.
pub fn format_amount(value: &str) -> String {
    format_number(safe_parse_number(value))
}

/// Two decimals, exact binary ties rounded away from zero (`0.125`
/// gives `0.13`).  Values that only look like ties, such as `2.675`,
/// round by their true binary value.
pub fn format_number(value: f64) -> String {
    let scaled = value * 100.0;
    // a two-decimal tie is representable only as a multiple of 1/8
    let tie = (value * 8.0).fract() == 0.0 && scaled.fract().abs() == 0.5;
    let text = if tie {
        format!("{:.2}", (scaled + 0.5f64.copysign(value)) / 100.0)
    } else {
        format!("{value:.2}")
    };
    if text == "-0.00" {
        "0.00".to_string()
    } else {
        text
    }
}

/// A value is displayable when it is present, not blank, not a dash,
/// and numerically non-zero.
pub fn should_display_value(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some("" | "-" | "0" | "0.00") => false,
        Some(v) => safe_parse_number(v) != 0.0,
    }
}

/// Tolerant key resolution.
///
/// For each alias in order, scan the entries in order and return the
/// value of the first entry whose key contains the alias or is
/// contained in it.  Containment is bidirectional, so short keys can
/// match long aliases.
pub fn find_value_by_variations<'a, I, A>(entries: I, aliases: &[A]) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    A: AsRef<str>,
{
    for alias in aliases {
        let alias = alias.as_ref();
        for (key, value) in entries.clone() {
            if key.contains(alias) || alias.contains(key) {
                return Some(value);
            }
        }
    }
    None
}

/// Exact lookup of a catalog key, also under its currency-suffixed
/// column labels.  Returns the matched breakdown key and its value.
pub fn resolve_exact<'a>(breakdown: &'a Breakdown, key: &str) -> Option<(&'a str, &'a str)> {
    CURRENCY_SUFFIXES.iter().find_map(|suffix| {
        breakdown
            .iter()
            .find(|(candidate, _)| candidate.strip_prefix(key) == Some(*suffix))
    })
}

/// Breakdown keys that belong to some item of the structure by exact
/// key.  Alias matching never looks at these for another item.
fn claimed_keys<'a>(breakdown: &'a Breakdown, structure: &Structure) -> HashSet<&'a str> {
    structure
        .items()
        .filter_map(|item| resolve_exact(breakdown, &item.key))
        .map(|(key, _)| key)
        .collect()
}

/// The item's own column first, then alias matching over the columns
/// no other item owns.  Overtime-hour columns are never amounts.
fn find_item<'a>(
    breakdown: &'a Breakdown,
    item: &ItemDef,
    catalog: &FieldCatalog,
    claimed: &HashSet<&str>,
) -> Option<&'a str> {
    if let Some((_, value)) = resolve_exact(breakdown, &item.key) {
        return Some(value);
    }
    let unclaimed = breakdown
        .iter()
        .filter(|(key, _)| !claimed.contains(key) && !key.contains(OVERTIME_HOURS_FIELD));
    let aliases = catalog
        .variations_of(&item.label)
        .unwrap_or(std::slice::from_ref(&item.key));
    find_value_by_variations(unclaimed, aliases)
}

fn section_item(item: &ItemDef, value: &str) -> SectionItem {
    SectionItem {
        key: item.key.clone(),
        label: item.label.clone(),
        value: value.to_string(),
        num_value: safe_parse_number(value),
    }
}

/// Resolve every structured section against a breakdown.  Items that
/// cannot be found are left out; the subtotal is the sum of every item
/// that was found.  Reference-only items are not part of the sums.
pub fn compute_sections(
    breakdown: &Breakdown,
    structure: &Structure,
    catalog: &FieldCatalog,
) -> Vec<Section> {
    let claimed = claimed_keys(breakdown, structure);
    structure
        .sections
        .iter()
        .map(|def| {
            let mut section = Section {
                id: def.id.clone(),
                label: def.label.clone(),
                items: Vec::new(),
                subtotal: 0.0,
            };
            for item in def.items.iter().filter(|item| !item.reference_only) {
                if let Some(value) = find_item(breakdown, item, catalog, &claimed) {
                    let resolved = section_item(item, value);
                    section.subtotal += resolved.num_value;
                    section.items.push(resolved);
                }
            }
            section
        })
        .collect()
}

/// Gross is the sum of section subtotals, deductions are summed from
/// the deduction definitions, and net is their difference.
pub fn compute_totals(
    sections: &[Section],
    breakdown: &Breakdown,
    structure: &Structure,
    catalog: &FieldCatalog,
) -> Totals {
    let gross_salary: f64 = sections.iter().map(|s| s.subtotal).sum();
    let claimed = claimed_keys(breakdown, structure);
    let deductions: Vec<SectionItem> = structure
        .deductions
        .iter()
        .filter_map(|def| {
            find_item(breakdown, def, catalog, &claimed).map(|v| section_item(def, v))
        })
        .collect();
    let total_deductions: f64 = deductions.iter().map(|d| d.num_value).sum();
    Totals {
        gross_salary,
        total_deductions,
        net_salary: gross_salary - total_deductions,
        deductions,
    }
}

/// Sections and totals in one go.
pub fn derive(
    breakdown: &Breakdown,
    structure: &Structure,
    catalog: &FieldCatalog,
) -> (Vec<Section>, Totals) {
    let sections = compute_sections(breakdown, structure, catalog);
    let totals = compute_totals(&sections, breakdown, structure, catalog);
    (sections, totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use proptest::prelude::*;

    fn catalog() -> FieldCatalog {
        FieldCatalog::standard().unwrap()
    }

    #[test]
    fn lenient_parsing() {
        assert_eq!(safe_parse_number(""), 0.0);
        assert_eq!(safe_parse_number("-"), 0.0);
        assert_eq!(safe_parse_number("abc"), 0.0);
        assert_eq!(safe_parse_number("  12.5 hrs"), 12.5);
        assert_eq!(safe_parse_number("1,000.00"), 1.0);
        assert_eq!(safe_parse_number("-3e2"), -300.0);
        assert_eq!(safe_parse_number(".5"), 0.5);
        assert_eq!(safe_parse_number("7e"), 7.0);
    }

    #[test]
    fn formatting() {
        assert_eq!(format_amount("1000"), "1000.00");
        assert_eq!(format_amount("-0"), "0.00");
        assert_eq!(format_amount("x"), "0.00");
        assert_eq!(format_number(12.345), "12.35");
    }

    #[test]
    fn exact_ties_round_away_from_zero() {
        assert_eq!(format_number(0.125), "0.13");
        assert_eq!(format_number(1234.375), "1234.38");
        assert_eq!(format_number(-0.125), "-0.13");
        assert_eq!(format_number(0.625), "0.63");
        // 2.675 is stored just below the tie
        assert_eq!(format_number(2.675), "2.67");
        assert_eq!(format_number(-0.001), "0.00");
    }

    #[test]
    fn display_rule() {
        for hidden in [None, Some(""), Some("-"), Some("0"), Some("0.00"), Some("n/a")] {
            assert!(!should_display_value(hidden), "{hidden:?}");
        }
        assert!(should_display_value(Some("0.01")));
        assert!(should_display_value(Some("-5")));
    }

    #[test]
    fn alias_matching_is_bidirectional_and_ordered() {
        let breakdown: Breakdown = [
            ("午餐补贴 (RMB)", "100.00"),
            ("补贴 (RMB)", "300.00"),
            ("CPF", "50.00"),
        ]
        .into_iter()
        .collect();
        // "补贴" is contained in the lunch column, which comes first
        assert_eq!(
            find_value_by_variations(breakdown.iter(), &["补贴"]),
            Some("100.00")
        );
        // the short key "CPF" is contained in the alias
        assert_eq!(
            find_value_by_variations(breakdown.iter(), &["个人CPF"]),
            Some("50.00")
        );
        assert_eq!(find_value_by_variations(breakdown.iter(), &["房租"]), None);
    }

    #[test]
    fn sections_and_totals() {
        let catalog = catalog();
        let structure = catalog.structure_of(Category::Expatriate).unwrap();
        let breakdown: Breakdown = [
            ("档案工资-岗级", "3.00"),
            ("固定工资 (RMB)", "5000.00"),
            ("年终奖", "1000.00"),
            ("扣发SGD (SGD)", "200.00"),
        ]
        .into_iter()
        .collect();
        let (sections, totals) = derive(&breakdown, structure, &catalog);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].id, "fixedSalary");
        // the archive grade is shown on the payslip, not paid
        assert!(sections[0].items.iter().all(|i| i.key != "档案工资-岗级"));
        assert_eq!(sections[0].subtotal, 5000.0);
        assert_eq!(sections[1].subtotal, 1000.0);
        assert_eq!(totals.gross_salary, 6000.0);
        assert_eq!(totals.total_deductions, 200.0);
        assert_eq!(totals.net_salary, 5800.0);
    }

    fn structure_with(items: Vec<ItemDef>) -> Structure {
        let mut structure = catalog().structure_of(Category::Expatriate).unwrap().clone();
        structure.sections.truncate(1);
        structure.sections[0].items = items;
        structure
    }

    fn paid(key: &str, label: &str) -> ItemDef {
        ItemDef {
            key: key.to_string(),
            label: label.to_string(),
            reference_only: false,
        }
    }

    #[test]
    fn subtotal_counts_every_included_item() {
        let catalog = catalog();
        // a unitless key that a catalog chooses to sum
        let structure = structure_with(vec![
            paid("地区系数", "regionalCoefficient"),
            paid("固定工资", "basicSalary"),
        ]);
        let breakdown: Breakdown = [("地区系数", "1.5"), ("固定工资 (RMB)", "5000")]
            .into_iter()
            .collect();
        let (sections, totals) = derive(&breakdown, &structure, &catalog);
        assert!(catalog.is_unitless("地区系数"));
        assert_eq!(sections[0].items.len(), 2);
        assert_eq!(sections[0].subtotal, 5001.5);
        assert_eq!(totals.gross_salary, 5001.5);
    }

    #[test]
    fn archive_columns_do_not_shadow_paid_items() {
        let catalog = catalog();
        let structure = catalog.structure_of(Category::Expatriate).unwrap();
        let breakdown: Breakdown = [
            ("档案工资-岗位工资 (RMB)", "1000.00"),
            ("固定工资 (RMB)", "5000.00"),
            ("岗位工资 (RMB)", "2000.00"),
            ("午餐补贴 (RMB)", "100.00"),
            ("补贴 (RMB)", "300.00"),
            ("加班小时", "10"),
        ]
        .into_iter()
        .collect();
        let (sections, totals) = derive(&breakdown, structure, &catalog);
        let fixed: Vec<(&str, &str)> = sections[0]
            .items
            .iter()
            .map(|i| (i.key.as_str(), i.value.as_str()))
            .collect();
        assert_eq!(
            fixed,
            vec![
                ("固定工资", "5000.00"),
                ("岗位工资", "2000.00"),
                ("补贴", "300.00"),
                ("午餐补贴", "100.00"),
            ]
        );
        assert_eq!(sections[0].subtotal, 7400.0);
        assert_eq!(totals.gross_salary, 7400.0);
    }

    #[test]
    fn alias_fallback_skips_columns_owned_by_other_items() {
        let catalog = catalog();
        let structure = catalog.structure_of(Category::Expatriate).unwrap();
        // no post salary column of its own: the archive column is not borrowed
        let breakdown: Breakdown = [("档案工资-岗位工资 (RMB)", "1000.00"), ("固定工资 (RMB)", "5000.00")]
            .into_iter()
            .collect();
        let (sections, _) = derive(&breakdown, structure, &catalog);
        assert!(sections[0].items.iter().all(|i| i.key != "岗位工资"));
        assert_eq!(sections[0].subtotal, 5000.0);

        // an unfamiliar header still resolves through its aliases
        let breakdown: Breakdown = [("Post Salary", "2000.00")].into_iter().collect();
        let (sections, _) = derive(&breakdown, structure, &catalog);
        assert_eq!(sections[0].items[0].key, "岗位工资");
        assert_eq!(sections[0].subtotal, 2000.0);
    }

    proptest! {
        #[test]
        fn net_is_gross_minus_deductions(
            basic in -1.0e6f64..1.0e6,
            bonus in -1.0e6f64..1.0e6,
            cpf in -1.0e6f64..1.0e6,
            junk in "[a-z]{0,6}",
        ) {
            let catalog = catalog();
            let structure = catalog.structure_of(Category::Expatriate).unwrap();
            let breakdown: Breakdown = [
                ("固定工资 (RMB)".to_string(), format!("{basic:.2}")),
                ("年终奖".to_string(), format!("{bonus:.2}")),
                ("个人CPF".to_string(), format!("{cpf:.2}")),
                ("其他 (RMB)".to_string(), junk),
            ]
            .into_iter()
            .collect();
            let (_, totals) = derive(&breakdown, structure, &catalog);
            prop_assert_eq!(totals.net_salary, totals.gross_salary - totals.total_deductions);
        }
    }
}
