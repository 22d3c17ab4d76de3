//! Normalisation of employee records into canonical documents.
//!
//! Both renderers consume a [`CanonicalDocument`]: header facts plus
//! ordered groups of bilingual, unit-aware line items.  How the groups
//! are built depends on the record's category:
//!
//! * expatriate records follow the catalog structure, so their layout
//!   is fixed regardless of column order: sections, then gross salary,
//!   deductions and net salary;
//! * local records follow their breakdown, whose keys already encode
//!   `"Group - Item"` pairs in presentation order.
//!
//! Zero, blank and dash values never produce a line.

use crate::catalog::{
    CatalogError, FieldCatalog, ItemDef, Structure, DEDUCTIONS_LABEL, EMAIL_FIELD, ITEM_LABEL,
    OVERTIME_HOURS_FIELD, OVERTIME_LABEL, REMARKS_FIELD, SERIAL_FIELD,
};
use crate::models::{
    Bilingual, Breakdown, CanonicalDocument, Category, DocumentMeta, EmployeeKind,
    EmployeeRecord, Group, GroupKind, LineItem, Totals,
};
use crate::totals::{self, format_amount, format_number, resolve_exact, should_display_value};
use serde::{Deserialize, Serialize};

/// Separator between group and item in local breakdown keys.
const GROUP_SEPARATOR: &str = " - ";
/// Local item names containing one of these are emphasised.
const EMPHASIS_MARKERS: &[&str] = &[
    "小计",
    "合计",
    "应发工资",
    "实发工资",
    "扣发合计",
    "应发工资合计",
    "其他扣发",
];
const OVERTIME_PAY_MARKER: &str = "加班费";
const RMB_MARKER: &str = "(RMB)";
const SGD_MARKER: &str = "(SGD)";

/// Explicit overrides for the document header.  Each one wins over
/// the value embedded in the record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NormalizeOptions {
    pub pay_period: Option<String>,
    pub payment_date: Option<String>,
    pub company_name: Option<String>,
    pub company_name_en: Option<String>,
}

fn first_non_empty<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Build the canonical document of a record.
///
/// Header precedence: explicit options, then values embedded in the
/// record, then the bare `month`.  Fails only when the catalog lacks
/// the expatriate structure.
pub fn normalize(
    employee: &EmployeeRecord,
    month: &str,
    options: &NormalizeOptions,
    catalog: &FieldCatalog,
) -> Result<CanonicalDocument, CatalogError> {
    let category = employee.category();
    let metadata = &employee.metadata;
    let meta = DocumentMeta {
        name: employee.name.clone(),
        email: employee.email.clone(),
        employee_no: employee.row_number,
        pay_period: first_non_empty([
            options.pay_period.as_deref(),
            metadata.pay_period.as_deref(),
            Some(month),
        ]),
        payment_date: first_non_empty([
            options.payment_date.as_deref(),
            metadata.payment_date.as_deref(),
        ]),
        employer: Bilingual::new(
            first_non_empty([
                options.company_name.as_deref(),
                Some(metadata.employer_name_zh.as_str()),
            ]),
            first_non_empty([
                options.company_name_en.as_deref(),
                Some(metadata.employer_name_en.as_str()),
            ]),
        ),
        currency: first_non_empty([
            Some(metadata.currency.as_str()),
            Some(catalog.default_currency(category)),
        ]),
        is_expatriate: category == Category::Expatriate,
        remarks: employee.remarks.clone(),
    };

    let groups = match &employee.kind {
        EmployeeKind::Expatriate { calculated, .. } => {
            let structure = catalog
                .structure_of(Category::Expatriate)
                .ok_or(CatalogError::MissingStructure)?;
            let computed;
            let totals = match calculated {
                Some(totals) => totals,
                None => {
                    computed = totals::derive(&employee.breakdown, structure, catalog).1;
                    &computed
                }
            };
            expatriate_groups(&employee.breakdown, totals, structure, &meta.currency, catalog)
        }
        EmployeeKind::Local => local_groups(employee, &meta.currency, catalog),
    };

    Ok(CanonicalDocument { meta, groups })
}

fn unit_for(item_key: &str, matched_key: &str, currency: &str, catalog: &FieldCatalog) -> String {
    if catalog.is_unitless(item_key) {
        String::new()
    } else if matched_key.contains(RMB_MARKER) {
        "RMB".to_string()
    } else if matched_key.contains(SGD_MARKER) {
        "SGD".to_string()
    } else {
        currency.to_string()
    }
}

fn structured_line(
    def: &ItemDef,
    breakdown: &Breakdown,
    currency: &str,
    catalog: &FieldCatalog,
    emphasised: bool,
) -> Option<LineItem> {
    let (matched_key, value) = resolve_exact(breakdown, &def.key)?;
    if !should_display_value(Some(value)) {
        return None;
    }
    Some(LineItem {
        label: catalog.bilingual(Category::Expatriate, &def.label),
        unit: unit_for(&def.key, matched_key, currency, catalog),
        original_label: matched_key.to_string(),
        value: value.to_string(),
        formatted_value: format_amount(value),
        is_bold: emphasised,
        is_highlight: emphasised,
    })
}

fn total_line(def: &ItemDef, amount: f64, currency: &str, catalog: &FieldCatalog) -> Option<LineItem> {
    let value = amount.to_string();
    if !should_display_value(Some(&value)) {
        return None;
    }
    Some(LineItem {
        label: catalog.bilingual(Category::Expatriate, &def.label),
        original_label: def.key.clone(),
        value,
        formatted_value: format_number(amount),
        unit: currency.to_string(),
        is_bold: true,
        is_highlight: true,
    })
}

fn standalone(item: LineItem) -> Group {
    Group {
        title: String::new(),
        kind: GroupKind::Standalone,
        items: vec![item],
    }
}

fn expatriate_groups(
    breakdown: &Breakdown,
    totals: &Totals,
    structure: &Structure,
    currency: &str,
    catalog: &FieldCatalog,
) -> Vec<Group> {
    let mut groups = Vec::new();

    for section in &structure.sections {
        let mut items: Vec<LineItem> = section
            .items
            .iter()
            .filter_map(|def| structured_line(def, breakdown, currency, catalog, false))
            .collect();
        if items.is_empty() {
            continue;
        }
        if let Some(subtotal) = &section.subtotal {
            items.extend(structured_line(subtotal, breakdown, currency, catalog, true));
        }
        groups.push(Group {
            title: catalog.bilingual(Category::Expatriate, &section.label),
            kind: GroupKind::Titled,
            items,
        });
    }

    if let Some(gross) = total_line(&structure.gross_salary, totals.gross_salary, currency, catalog) {
        groups.push(standalone(gross));
    }

    let mut deductions: Vec<LineItem> = structure
        .deductions
        .iter()
        .filter_map(|def| structured_line(def, breakdown, currency, catalog, false))
        .collect();
    deductions.extend(total_line(
        &structure.total_deductions,
        totals.total_deductions,
        currency,
        catalog,
    ));
    if !deductions.is_empty() {
        groups.push(Group {
            title: catalog.bilingual(Category::Expatriate, DEDUCTIONS_LABEL),
            kind: GroupKind::Titled,
            items: deductions,
        });
    }

    if let Some(net) = total_line(&structure.net_salary, totals.net_salary, currency, catalog) {
        groups.push(standalone(net));
    }

    groups
}

fn is_excluded_local_key(key: &str) -> bool {
    key == SERIAL_FIELD || key == EMAIL_FIELD || key == REMARKS_FIELD || key.contains(OVERTIME_HOURS_FIELD)
}

fn local_groups(employee: &EmployeeRecord, currency: &str, catalog: &FieldCatalog) -> Vec<Group> {
    let labels = catalog.labels_of(Category::Local);
    // keyed by source group name, `None` for the generic group
    let mut groups: Vec<(Option<&str>, Group)> = Vec::new();

    for (key, value) in employee.breakdown.iter() {
        if is_excluded_local_key(key) || !should_display_value(Some(value)) {
            continue;
        }

        let mut parts = key.split(GROUP_SEPARATOR);
        let (group_name, item_name) = match (parts.next(), parts.next()) {
            (Some(group), Some(item)) => (Some(group), item),
            _ => (None, key),
        };

        let index = match groups.iter().position(|(name, _)| *name == group_name) {
            Some(index) => index,
            None => {
                let group = match group_name {
                    Some(name) => Group {
                        title: labels
                            .find_by_zh(name)
                            .map(Bilingual::format)
                            .unwrap_or_else(|| name.to_string()),
                        kind: GroupKind::Titled,
                        items: Vec::new(),
                    },
                    None => Group {
                        title: catalog.bilingual(Category::Local, ITEM_LABEL),
                        kind: GroupKind::Generic,
                        items: Vec::new(),
                    },
                };
                groups.push((group_name, group));
                groups.len() - 1
            }
        };

        let emphasised = EMPHASIS_MARKERS.iter().any(|m| item_name.contains(m));
        let label = if let Some(known) = labels.find_by_zh(item_name) {
            known.format()
        } else if item_name.contains(OVERTIME_PAY_MARKER) {
            let hours = if employee.overtime_hours.is_empty() {
                "0"
            } else {
                employee.overtime_hours.as_str()
            };
            let en = labels.get(OVERTIME_LABEL).map_or("Overtime", |l| l.en.as_str());
            format!("{item_name} ({hours}小时) / {en} ({hours} hrs)")
        } else {
            item_name.to_string()
        };
        let unit = if catalog.is_unitless(item_name) {
            String::new()
        } else {
            currency.to_string()
        };

        groups[index].1.items.push(LineItem {
            label,
            original_label: item_name.to_string(),
            value: value.to_string(),
            formatted_value: format_amount(value),
            unit,
            is_bold: emphasised,
            is_highlight: emphasised,
        });
    }

    groups.into_iter().map(|(_, group)| group).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMetadata;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn catalog() -> FieldCatalog {
        FieldCatalog::standard().unwrap()
    }

    fn record(kind: EmployeeKind, pairs: &[(&str, &str)]) -> EmployeeRecord {
        EmployeeRecord {
            name: "LI HUA".to_string(),
            email: "lihua@ccs.org.cn".to_string(),
            remarks: String::new(),
            overtime_hours: "2.00".to_string(),
            breakdown: pairs.iter().copied().collect(),
            sheet_name: "Sheet".to_string(),
            row_number: 4,
            metadata: RecordMetadata::default(),
            kind,
        }
    }

    fn expatriate(pairs: &[(&str, &str)]) -> EmployeeRecord {
        record(
            EmployeeKind::Expatriate {
                sections: Vec::new(),
                calculated: None,
            },
            pairs,
        )
    }

    fn titles(doc: &CanonicalDocument) -> Vec<&str> {
        doc.groups.iter().map(|g| g.title.as_str()).collect()
    }

    #[test]
    fn local_blank_values_are_suppressed() {
        let employee = record(
            EmployeeKind::Local,
            &[("固定工资", "1000.00"), ("补贴", "0.00"), ("实发工资", "1000.00")],
        );
        let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog()).unwrap();
        assert_eq!(doc.groups.len(), 1);
        let group = &doc.groups[0];
        assert_eq!(group.kind, GroupKind::Generic);
        assert_eq!(group.title, "项目 / Item");
        let originals: Vec<&str> = group.items.iter().map(|i| i.original_label.as_str()).collect();
        assert_eq!(originals, vec!["固定工资", "实发工资"]);
        assert!(group.items[1].is_bold && group.items[1].is_highlight);
        assert!(!group.items[0].is_bold);
        assert_eq!(group.items[0].unit, "RMB");
    }

    #[test]
    fn expatriate_units_follow_catalog() {
        let employee = expatriate(&[("档案工资-岗级", "3"), ("固定工资", "5000")]);
        let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog()).unwrap();
        let fixed = &doc.groups[0];
        assert_eq!(fixed.title, "固定工资 / Fixed Salary");
        assert_eq!(fixed.items.len(), 2);
        assert_eq!(fixed.items[0].label, "档案工资-岗级 / Archive Grade");
        assert_eq!(fixed.items[0].unit, "");
        assert_eq!(fixed.items[1].unit, "SGD");
        assert_eq!(fixed.items[1].formatted_value, "5000.00");
        assert_eq!(
            titles(&doc),
            vec!["固定工资 / Fixed Salary", "", ""],
            "no deductions group without deductions"
        );
        let gross = &doc.groups[1].items[0];
        assert_eq!(gross.label, "应发工资 / Gross Salary");
        assert_eq!(gross.formatted_value, "5000.00");
        assert!(gross.is_bold && gross.is_highlight);
        assert_eq!(doc.groups[2].kind, GroupKind::Standalone);
    }

    #[test]
    fn expatriate_currency_markers_and_deductions() {
        let employee = expatriate(&[
            ("固定工资 (RMB)", "5000.00"),
            ("房租 (SGD)", "800.00"),
            ("RMB合计 (RMB)", "5000.00"),
            ("扣发SGD (SGD)", "200.00"),
            ("备注", "note"),
        ]);
        let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog()).unwrap();
        let fixed = &doc.groups[0];
        let units: Vec<&str> = fixed.items.iter().map(|i| i.unit.as_str()).collect();
        assert_eq!(units, vec!["RMB", "SGD", "RMB"]);
        assert!(fixed.items[2].is_bold, "section subtotal is emphasised");

        let deductions = doc
            .groups
            .iter()
            .find(|g| g.title == "扣除 / Deductions")
            .unwrap();
        assert_eq!(deductions.items.len(), 2);
        assert_eq!(deductions.items[0].label, "扣发(SGD) / Deduction (SGD)");
        assert_eq!(deductions.items[1].label, "扣发合计 / Total Deductions");
        assert!(deductions.items[1].is_bold);
        let net = &doc.groups.last().unwrap().items[0];
        assert_eq!(net.label, "实发工资 / Net Salary");
    }

    #[test]
    fn local_groups_follow_first_occurrence() {
        let employee = record(
            EmployeeKind::Local,
            &[
                ("序号", "1"),
                ("姓名", "LI HUA"),
                ("固定工资类 - 合同工资", "5000"),
                ("固定工资类 - 补贴", "200"),
                ("固定工资类 - 加班费", "100"),
                ("固定工资类 - 小计", "5300"),
                ("浮动工资类 - 年终奖", "10000"),
                ("浮动工资类 - 小计", "10000"),
                ("应发工资合计", "15300"),
                ("个人CPF扣除 - 固定工资", "100"),
                ("个人CPF扣除 - 浮动工资", "200"),
                ("个人CPF扣除 - 合计", "300"),
                ("其他扣发", "50"),
                ("扣发合计", "350"),
                ("实发工资", "14950"),
                ("加班小时", "2"),
            ],
        );
        let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog()).unwrap();
        assert_eq!(
            titles(&doc),
            vec![
                "固定工资类 / Fixed Salary",
                "浮动工资类 / Bonuses & Others",
                "项目 / Item",
                "个人CPF扣除 / CPF Deductions",
            ]
        );
        let generic: Vec<&str> = doc.groups[2].items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(
            generic,
            vec![
                "应发工资合计 / Gross Salary",
                "其他扣发 / Other Deductions",
                "扣发合计 / Total Deductions",
                "实发工资 / Net Salary",
            ]
        );
        assert!(doc.groups[2].items.iter().all(|i| i.is_bold));
        assert_eq!(doc.groups[0].items[2].label, "加班费 / Overtime");
        assert!(doc.groups[0].items[3].is_bold);
    }

    #[test]
    fn unknown_overtime_column_interpolates_hours() {
        let employee = record(
            EmployeeKind::Local,
            &[("固定工资类 - 加班费(节假日)", "120"), ("自定义项", "5")],
        );
        let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog()).unwrap();
        let items = &doc.groups[0].items;
        assert_eq!(items[0].label, "加班费(节假日) (2.00小时) / Overtime (2.00 hrs)");
        assert_eq!(doc.groups[1].items[0].label, "自定义项");
    }

    #[test]
    fn overtime_hours_are_inserted_as_recorded() {
        let mut employee = record(EmployeeKind::Local, &[("固定工资类 - 加班费(周末)", "60")]);
        for (hours, shown) in [("0.00", "0.00"), ("1.5", "1.5"), ("3 hrs", "3 hrs"), ("", "0")] {
            employee.overtime_hours = hours.to_string();
            let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog()).unwrap();
            assert_eq!(
                doc.groups[0].items[0].label,
                format!("加班费(周末) ({shown}小时) / Overtime ({shown} hrs)")
            );
        }
    }

    #[test]
    fn header_precedence() {
        let mut employee = record(EmployeeKind::Local, &[]);
        employee.metadata = RecordMetadata {
            currency: "SGD".to_string(),
            employer_name_zh: "中国船级社新加坡分社".to_string(),
            employer_name_en: "China Classification Society, Singapore Branch".to_string(),
            pay_period: Some("2026年1月".to_string()),
            payment_date: None,
        };
        let catalog = catalog();

        let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog).unwrap();
        assert_eq!(doc.meta.pay_period, "2026年1月");
        assert_eq!(doc.meta.payment_date, "");
        assert_eq!(doc.meta.currency, "SGD");
        assert_eq!(doc.meta.employer.zh, "中国船级社新加坡分社");
        assert_eq!(doc.meta.employee_no, 4);
        assert!(!doc.meta.is_expatriate);

        let options = NormalizeOptions {
            pay_period: Some("2026-01-01 ~ 2026-01-31".to_string()),
            payment_date: Some("2026-02-05".to_string()),
            company_name: Some("其他公司".to_string()),
            company_name_en: Some(String::new()),
        };
        let doc = normalize(&employee, "2026-01", &options, &catalog).unwrap();
        assert_eq!(doc.meta.pay_period, "2026-01-01 ~ 2026-01-31");
        assert_eq!(doc.meta.payment_date, "2026-02-05");
        assert_eq!(doc.meta.employer.zh, "其他公司");
        // empty override falls through to the record
        assert_eq!(
            doc.meta.employer.en,
            "China Classification Society, Singapore Branch"
        );

        employee.metadata = RecordMetadata::default();
        let doc = normalize(&employee, "2026-01", &NormalizeOptions::default(), &catalog).unwrap();
        assert_eq!(doc.meta.pay_period, "2026-01");
        assert_eq!(doc.meta.currency, "RMB");
    }

    #[test]
    fn supplied_totals_are_used_as_is() {
        let employee = record(
            EmployeeKind::Expatriate {
                sections: Vec::new(),
                calculated: Some(Totals {
                    gross_salary: 7000.0,
                    total_deductions: 500.0,
                    net_salary: 6500.0,
                    deductions: Vec::new(),
                }),
            },
            &[("固定工资", "5000")],
        );
        let doc = normalize(&employee, "", &NormalizeOptions::default(), &catalog()).unwrap();
        let values: Vec<&str> = doc
            .groups
            .iter()
            .flat_map(|g| g.items.iter())
            .map(|i| i.formatted_value.as_str())
            .collect();
        assert_eq!(values, vec!["5000.00", "7000.00", "500.00", "6500.00"]);
    }

    const LOCAL_KEYS: &[&str] = &[
        "固定工资类 - 合同工资",
        "固定工资类 - 补贴",
        "浮动工资类 - 年终奖",
        "应发工资合计",
        "扣发合计",
        "实发工资",
    ];
    const EXPATRIATE_KEYS: &[&str] = &[
        "固定工资 (RMB)",
        "档案工资-岗级",
        "年终奖",
        "房租 (SGD)",
        "个人CPF",
        "扣发SGD (SGD)",
    ];

    fn blank() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just(""), Just("-"), Just("0"), Just("0.00")]
    }

    proptest! {
        #[test]
        fn blank_values_never_render(values in prop::collection::vec(blank(), 6)) {
            let catalog = catalog();
            let local: Vec<(&str, &str)> = LOCAL_KEYS.iter().copied().zip(values.iter().copied()).collect();
            let doc = normalize(&record(EmployeeKind::Local, &local), "m", &NormalizeOptions::default(), &catalog).unwrap();
            prop_assert!(doc.groups.is_empty());

            let expat: Vec<(&str, &str)> = EXPATRIATE_KEYS.iter().copied().zip(values.iter().copied()).collect();
            let doc = normalize(&expatriate(&expat), "m", &NormalizeOptions::default(), &catalog).unwrap();
            prop_assert!(doc.groups.is_empty());
        }

        #[test]
        fn expatriate_layout_ignores_column_order(
            order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let values = ["5000", "3", "1000", "800", "50", "200"];
            let pairs: Vec<(&str, &str)> = order.iter().map(|&i| (EXPATRIATE_KEYS[i], values[i])).collect();
            let doc = normalize(&expatriate(&pairs), "m", &NormalizeOptions::default(), &catalog()).unwrap();
            prop_assert_eq!(
                titles(&doc),
                vec!["固定工资 / Fixed Salary", "奖金及其他 / Bonuses & Others", "", "扣除 / Deductions", ""]
            );
            let fixed: Vec<&str> = doc.groups[0].items.iter().map(|i| i.original_label.as_str()).collect();
            prop_assert_eq!(fixed, vec!["档案工资-岗级", "固定工资 (RMB)", "房租 (SGD)"]);
        }

        #[test]
        fn local_groups_follow_scan_order(
            order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let keys = ["甲 - a", "乙 - b", "甲 - c", "丙 - d", "e", "乙 - f"];
            let pairs: Vec<(&str, &str)> = order.iter().map(|&i| (keys[i], "1")).collect();
            let doc = normalize(&record(EmployeeKind::Local, &pairs), "m", &NormalizeOptions::default(), &catalog()).unwrap();

            let mut expected: Vec<String> = Vec::new();
            for (key, _) in &pairs {
                let title = match key.split_once(" - ") {
                    Some((group, _)) => group.to_string(),
                    None => "项目 / Item".to_string(),
                };
                if !expected.contains(&title) {
                    expected.push(title);
                }
            }
            let actual: Vec<String> = doc.groups.iter().map(|g| g.title.clone()).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn normalizing_twice_is_identical(values in prop::collection::vec("[0-9]{0,4}(\\.[0-9]{1,2})?", 6)) {
            let catalog = catalog();
            let pairs: Vec<(&str, &str)> = EXPATRIATE_KEYS.iter().copied().zip(values.iter().map(String::as_str)).collect();
            let employee = expatriate(&pairs);
            let first = normalize(&employee, "m", &NormalizeOptions::default(), &catalog).unwrap();
            let second = normalize(&employee, "m", &NormalizeOptions::default(), &catalog).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
