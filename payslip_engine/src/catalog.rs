//! The field catalog.
//!
//! All static payroll knowledge lives here: the bilingual label
//! dictionaries, the fixed column layout of each sheet category, the
//! structure of expatriate payslips, the unitless field allowlist and
//! the alias lists used for tolerant column matching.
//!
//! A [`FieldCatalog`] is an immutable value.  It is built once at
//! start-up (from the built-in tables or from a JSON file), validated,
//! and passed explicitly to every component that needs it.

use crate::error::PayslipError;
use crate::models::{Bilingual, Category};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Column label carrying the employee name.
pub const NAME_FIELD: &str = "姓名";
/// Column label carrying the destination mailbox.
pub const EMAIL_FIELD: &str = "邮箱";
/// Column label carrying free text remarks.
pub const REMARKS_FIELD: &str = "备注";
/// Column label carrying overtime hours.
pub const OVERTIME_HOURS_FIELD: &str = "加班小时";
/// Column label carrying the serial number.
pub const SERIAL_FIELD: &str = "序号";

/// Label id of the generic "Item" group.
pub const ITEM_LABEL: &str = "item";
/// Label id of the expatriate deductions group.
pub const DEDUCTIONS_LABEL: &str = "deductions";
/// Label id of the local overtime pay line.
pub const OVERTIME_LABEL: &str = "overtime";

/// A configuration error in the catalog.  Always fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("{category} catalog references label `{key}` (from {referenced_by}) missing from its dictionary")]
    MissingLabel {
        category: Category,
        key: String,
        referenced_by: String,
    },
    #[error("{category} column mapping has no `姓名` column")]
    MissingNameColumn { category: Category },
    #[error("{category} column mapping assigns column {index} twice")]
    DuplicateColumn { category: Category, index: usize },
    #[error("expatriate catalog has no payslip structure")]
    MissingStructure,
}

/// A dictionary entry: label id plus its bilingual text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub key: String,
    #[serde(flatten)]
    pub text: Bilingual,
}

/// An ordered bilingual dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<LabelEntry>);

impl LabelSet {
    pub fn get(&self, key: &str) -> Option<&Bilingual> {
        self.0.iter().find(|e| e.key == key).map(|e| &e.text)
    }

    /// First entry whose Chinese text equals `zh` exactly.
    pub fn find_by_zh(&self, zh: &str) -> Option<&Bilingual> {
        self.0.iter().find(|e| e.text.zh == zh).map(|e| &e.text)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelEntry> {
        self.0.iter()
    }
}

/// One fixed column: zero-based index and the semantic label its
/// values are filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub index: usize,
    pub label: String,
}

/// One item of a payslip section: the breakdown key (without currency
/// suffix) and the label id used for display and alias lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDef {
    pub key: String,
    pub label: String,
    /// Shown on the payslip but never summed or alias-matched.
    /// Archive grades and coefficients are listed this way.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reference_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDef {
    pub id: String,
    pub label: String,
    pub items: Vec<ItemDef>,
    /// Breakdown key of a pre-supplied subtotal shown at the foot of
    /// the section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<ItemDef>,
}

/// The structure of a computed payslip: wage sections, then gross,
/// deductions and net.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Structure {
    pub sections: Vec<SectionDef>,
    pub gross_salary: ItemDef,
    pub deductions: Vec<ItemDef>,
    pub total_deductions: ItemDef,
    pub net_salary: ItemDef,
}

impl Structure {
    /// Every item definition, in layout order.
    pub fn items(&self) -> impl Iterator<Item = &ItemDef> {
        self.sections
            .iter()
            .flat_map(|section| section.items.iter().chain(&section.subtotal))
            .chain(std::iter::once(&self.gross_salary))
            .chain(&self.deductions)
            .chain([&self.total_deductions, &self.net_salary])
    }

    /// Every label id the structure refers to, with a description of
    /// where it is referenced.
    fn referenced_labels(&self) -> Vec<(&str, String)> {
        let mut refs = Vec::new();
        for section in &self.sections {
            refs.push((section.label.as_str(), format!("section `{}`", section.id)));
            for item in &section.items {
                refs.push((item.label.as_str(), format!("item `{}`", item.key)));
            }
            if let Some(subtotal) = &section.subtotal {
                refs.push((subtotal.label.as_str(), format!("subtotal `{}`", subtotal.key)));
            }
        }
        for item in &self.deductions {
            refs.push((item.label.as_str(), format!("deduction `{}`", item.key)));
        }
        refs.push((self.gross_salary.label.as_str(), "gross salary".to_string()));
        refs.push((self.total_deductions.label.as_str(), "total deductions".to_string()));
        refs.push((self.net_salary.label.as_str(), "net salary".to_string()));
        refs.push((DEDUCTIONS_LABEL, "deductions group".to_string()));
        refs
    }
}

/// Everything the catalog knows about one sheet category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCatalog {
    /// Currency used when a record carries none.
    pub default_currency: String,
    pub labels: LabelSet,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
}

/// Alias list for one label id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    pub key: String,
    pub aliases: Vec<String>,
}

/// The immutable payroll field catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCatalog {
    pub expatriate: CategoryCatalog,
    pub local: CategoryCatalog,
    pub unitless_fields: Vec<String>,
    pub variations: Vec<Variation>,
}

impl FieldCatalog {
    /// The built-in catalog, validated.
    pub fn standard() -> Result<Self, CatalogError> {
        let catalog = Self::builtin();
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog from a JSON file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self, PayslipError> {
        let data = std::fs::read_to_string(path)?;
        let catalog: FieldCatalog = serde_json::from_str(&data)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn category(&self, category: Category) -> &CategoryCatalog {
        match category {
            Category::Expatriate => &self.expatriate,
            Category::Local => &self.local,
        }
    }

    pub fn labels_of(&self, category: Category) -> &LabelSet {
        &self.category(category).labels
    }

    pub fn column_mapping(&self, category: Category) -> &[ColumnDef] {
        &self.category(category).columns
    }

    pub fn structure_of(&self, category: Category) -> Option<&Structure> {
        self.category(category).structure.as_ref()
    }

    pub fn default_currency(&self, category: Category) -> &str {
        &self.category(category).default_currency
    }

    pub fn is_unitless(&self, key: &str) -> bool {
        self.unitless_fields.iter().any(|f| f == key)
    }

    pub fn variations_of(&self, key: &str) -> Option<&[String]> {
        self.variations
            .iter()
            .find(|v| v.key == key)
            .map(|v| v.aliases.as_slice())
    }

    /// Bilingual display text of a label id, `"中文 / English"`.
    /// Falls back to the id itself.
    pub fn bilingual(&self, category: Category, key: &str) -> String {
        self.labels_of(category)
            .get(key)
            .map(Bilingual::format)
            .unwrap_or_else(|| key.to_string())
    }

    /// Check that every label the catalog refers to is defined and
    /// that each column layout can identify employees.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for category in [Category::Expatriate, Category::Local] {
            let cat = self.category(category);
            let mut refs: Vec<(&str, String)> = vec![(ITEM_LABEL, "generic group".to_string())];
            if let Some(structure) = &cat.structure {
                refs.extend(structure.referenced_labels());
            }
            for (key, referenced_by) in refs {
                if cat.labels.get(key).is_none() {
                    return Err(CatalogError::MissingLabel {
                        category,
                        key: key.to_string(),
                        referenced_by,
                    });
                }
            }

            if !cat.columns.iter().any(|c| c.label == NAME_FIELD) {
                return Err(CatalogError::MissingNameColumn { category });
            }
            let mut seen = std::collections::HashSet::new();
            for column in &cat.columns {
                if !seen.insert(column.index) {
                    return Err(CatalogError::DuplicateColumn {
                        category,
                        index: column.index,
                    });
                }
            }
        }
        if self.expatriate.structure.is_none() {
            return Err(CatalogError::MissingStructure);
        }
        Ok(())
    }

    fn builtin() -> Self {
        FieldCatalog {
            expatriate: CategoryCatalog {
                default_currency: "SGD".to_string(),
                labels: label_set(EXPATRIATE_LABELS),
                columns: columns(EXPATRIATE_COLUMNS),
                structure: Some(expatriate_structure()),
            },
            local: CategoryCatalog {
                default_currency: "RMB".to_string(),
                labels: label_set(LOCAL_LABELS),
                columns: columns(LOCAL_COLUMNS),
                structure: None,
            },
            unitless_fields: UNITLESS_FIELDS.iter().map(|s| s.to_string()).collect(),
            variations: COLUMN_VARIATIONS
                .iter()
                .map(|(key, aliases)| Variation {
                    key: key.to_string(),
                    aliases: aliases.iter().map(|a| a.to_string()).collect(),
                })
                .collect(),
        }
    }
}

fn label_set(table: &[(&str, &str, &str)]) -> LabelSet {
    LabelSet(
        table
            .iter()
            .map(|(key, zh, en)| LabelEntry {
                key: key.to_string(),
                text: Bilingual::new(*zh, *en),
            })
            .collect(),
    )
}

fn columns(table: &[&str]) -> Vec<ColumnDef> {
    table
        .iter()
        .enumerate()
        .map(|(index, label)| ColumnDef {
            index,
            label: label.to_string(),
        })
        .collect()
}

fn item(key: &str, label: &str) -> ItemDef {
    ItemDef {
        key: key.to_string(),
        label: label.to_string(),
        reference_only: false,
    }
}

fn reference_item(key: &str, label: &str) -> ItemDef {
    ItemDef {
        reference_only: true,
        ..item(key, label)
    }
}

fn expatriate_structure() -> Structure {
    Structure {
        sections: vec![
            SectionDef {
                id: "fixedSalary".to_string(),
                label: "fixedSalary".to_string(),
                items: vec![
                    reference_item("档案工资-岗级", "archiveGrade"),
                    reference_item("档案工资-岗位工资", "archivePostSalary"),
                    reference_item("档案工资-薪级", "archivePayScale"),
                    reference_item("档案工资-薪级工资", "archivePayScaleSalary"),
                    reference_item("地区系数", "regionalCoefficient"),
                    item("固定工资", "basicSalary"),
                    reference_item("驻外岗级", "overseasGrade"),
                    item("岗位工资", "postSalary"),
                    item("补贴", "subsidy"),
                    item("午餐补贴", "lunchSubsidy"),
                    item("交通补贴", "transportSubsidy"),
                    item("生活补贴-艰苦地区", "hardshipSubsidy"),
                    item("生活补贴-危险地区", "dangerSubsidy"),
                    item("出海补贴", "seaSubsidy"),
                    item("驾车", "driving"),
                    item("外勤", "fieldWork"),
                    item("加班", "overtime"),
                    item("其他", "others"),
                    item("房租", "rent"),
                ],
                subtotal: Some(item("RMB合计", "rmbTotal")),
            },
            SectionDef {
                id: "bonuses".to_string(),
                label: "bonuses".to_string(),
                items: vec![
                    item("年终奖", "yearEndBonus"),
                    item("假期工资", "holidayPay"),
                    item("奖励金", "reward"),
                    item("浮动其他", "variableOthers"),
                    item("奖金预支", "bonusAdvance"),
                ],
                subtotal: None,
            },
        ],
        gross_salary: item("应发工资", "grossSalary"),
        deductions: vec![
            item("个人CPF", "cpf"),
            item("扣发RMB", "deductionRMB"),
            item("扣发SGD", "deductionSGD"),
        ],
        total_deductions: item("扣发合计", "totalDeductions"),
        net_salary: item("实发工资", "netSalary"),
    }
}

const UNITLESS_FIELDS: &[&str] = &["档案工资-岗级", "档案工资-薪级", "地区系数", "驻外岗级"];

const EXPATRIATE_LABELS: &[(&str, &str, &str)] = &[
    ("employer", "雇主名称", "Name of Employer"),
    ("employeeName", "姓名", "Name"),
    ("payPeriod", "工资周期", "Pay Period"),
    ("fixedSalary", "固定工资", "Fixed Salary"),
    ("bonuses", "奖金及其他", "Bonuses & Others"),
    ("deductions", "扣除", "Deductions"),
    ("archiveGrade", "档案工资-岗级", "Archive Grade"),
    ("archivePostSalary", "档案工资-岗位工资", "Archive Post Salary"),
    ("archivePayScale", "档案工资-薪级", "Archive Pay Scale"),
    ("archivePayScaleSalary", "档案工资-薪级工资", "Archive Pay Scale Salary"),
    ("regionalCoefficient", "地区系数", "Regional Coefficient"),
    ("overseasGrade", "驻外岗级", "Overseas Grade"),
    ("basicSalary", "固定工资", "Basic Salary"),
    ("postSalary", "岗位工资", "Post Salary"),
    ("subsidy", "补贴", "Subsidy"),
    ("lunchSubsidy", "午餐补贴", "Lunch Subsidy"),
    ("transportSubsidy", "交通补贴", "Transport Subsidy"),
    ("hardshipSubsidy", "艰苦地区补贴", "Hardship Allowance"),
    ("dangerSubsidy", "危险地区补贴", "Danger Allowance"),
    ("seaSubsidy", "出海补贴", "Sea Inspection Subsidy"),
    ("driving", "行车/驾车补贴", "Driving Allowance"),
    ("fieldWork", "外勤", "Field Work"),
    ("overtime", "加班 (小时 × $5)", "Overtime"),
    ("others", "其他", "Others"),
    ("rmbTotal", "RMB合计", "RMB Total"),
    ("yearEndBonus", "年终奖", "Year-end Bonus"),
    ("holidayPay", "假期工资", "Holiday Pay"),
    ("reward", "奖励金", "Reward/Incentive"),
    ("variableOthers", "浮动其他", "Variable Others"),
    ("rent", "房租", "Rent"),
    ("bonusAdvance", "奖金预支", "Bonus Advance"),
    ("cpf", "个人CPF", "Personal CPF"),
    ("deductionRMB", "扣发(RMB)", "Deduction (RMB)"),
    ("deductionSGD", "扣发(SGD)", "Deduction (SGD)"),
    ("subtotal", "小计", "Subtotal"),
    ("grossSalary", "应发工资", "Gross Salary"),
    ("totalDeductions", "扣发合计", "Total Deductions"),
    ("netSalary", "实发工资", "Net Salary"),
    ("paymentDate", "付款日期", "Date of Payment"),
    ("item", "项目", "Item"),
    ("amount", "金额", "Amount"),
];

const LOCAL_LABELS: &[(&str, &str, &str)] = &[
    ("employeeName", "姓名", "Name"),
    ("employeeNumber", "序号", "Employee No."),
    ("month", "月份", "Month"),
    ("item", "项目", "Item"),
    ("fixedSalary", "固定工资类", "Fixed Salary"),
    ("bonuses", "浮动工资类", "Bonuses & Others"),
    ("cpfDeductions", "个人CPF扣除", "CPF Deductions"),
    ("otherDeductions", "其他扣发", "Other Deductions"),
    ("basicSalary", "合同工资", "Basic Salary"),
    ("subsidy", "补贴", "Subsidy"),
    ("driving", "驾车补贴", "Driving Allowance"),
    ("fieldWork", "外勤补贴", "Field Work Allowance"),
    ("overtime", "加班费", "Overtime"),
    ("subtotal", "小计", "Subtotal"),
    ("yearEndBonus", "年终奖", "Year-end Bonus"),
    ("holidayPay", "假期工资", "Holiday Pay"),
    ("reward", "奖励金", "Reward"),
    ("variableOthers", "浮动其他", "Variable Others"),
    ("fixedPart", "固定工资", "Fixed Salary"),
    ("variablePart", "浮动工资", "Variable Salary"),
    ("total", "合计", "Total"),
    ("grossSalary", "应发工资合计", "Gross Salary"),
    ("totalDeductions", "扣发合计", "Total Deductions"),
    ("netSalary", "实发工资", "Net Salary"),
    ("amount", "金额", "Amount"),
    ("remarks", "备注", "Remarks"),
];

/// Column layout of expatriate sheets, one label per column from A.
const EXPATRIATE_COLUMNS: &[&str] = &[
    "序号",
    "姓名",
    "档案工资-岗级",
    "档案工资-岗位工资 (RMB)",
    "档案工资-薪级",
    "档案工资-薪级工资 (RMB)",
    "地区系数",
    "固定工资 (RMB)",
    "驻外岗级",
    "岗位工资 (RMB)",
    "午餐补贴 (RMB)",
    "交通补贴 (RMB)",
    "生活补贴-艰苦地区 (RMB)",
    "生活补贴-危险地区 (RMB)",
    "出海补贴 (RMB)",
    "驾车 (RMB)",
    "补贴 (RMB)",
    "其他 (RMB)",
    "RMB合计 (RMB)",
    "SGD合计 (SGD)",
    "房租 (SGD)",
    "奖金预支 (SGD)",
    "应发工资 (SGD)",
    "扣发RMB (RMB)",
    "扣发SGD (SGD)",
    "扣发合计 (SGD)",
    "实发工资 (SGD)",
    "备注",
    "EP符合性",
    "邮箱",
    "加班小时",
];

/// Column layout of local sheets.  Keys encode `"Group - Item"`.
const LOCAL_COLUMNS: &[&str] = &[
    "序号",
    "姓名",
    "固定工资类 - 合同工资",
    "固定工资类 - 补贴",
    "固定工资类 - 驾车补贴",
    "固定工资类 - 外勤补贴",
    "固定工资类 - 加班费",
    "固定工资类 - 小计",
    "浮动工资类 - 年终奖",
    "浮动工资类 - 假期工资",
    "浮动工资类 - 奖励金",
    "浮动工资类 - 浮动其他",
    "浮动工资类 - 小计",
    "应发工资合计",
    "个人CPF扣除 - 固定工资",
    "个人CPF扣除 - 浮动工资",
    "个人CPF扣除 - 合计",
    "其他扣发",
    "扣发合计",
    "实发工资",
    "备注",
    "邮箱",
    "加班小时",
];

const COLUMN_VARIATIONS: &[(&str, &[&str])] = &[
    ("name", &["姓名", "Name", "name", "员工姓名"]),
    ("email", &["Email", "email", "E-mail", "邮箱"]),
    ("remarks", &["备注", "Remarks", "remark", "Note"]),
    ("employeeNo", &["序号", "No", "Employee No", "员工编号"]),
    ("basicSalary", &["固定工资", "Basic Salary", "Fixed Salary", "基本工资"]),
    ("postSalary", &["岗位工资", "Post Salary"]),
    ("subsidy", &["补贴", "Subsidy", "Allowance", "补贴合计"]),
    ("lunchSubsidy", &["午餐补贴", "Lunch"]),
    ("transportSubsidy", &["交通补贴", "Transport"]),
    ("hardshipSubsidy", &["艰苦地区", "Hardship"]),
    ("dangerSubsidy", &["危险地区", "Danger"]),
    ("seaSubsidy", &["出海补贴", "Sea"]),
    ("driving", &["驾车", "Driving", "Driving Allowance", "行车补贴"]),
    ("fieldWork", &["外勤", "Field Work", "Field"]),
    ("overtime", &["加班", "Overtime", "OT", "加班 (hours x $5)", "加班(hours x $5)"]),
    ("others", &["其他", "Others"]),
    ("rent", &["房租", "Rent"]),
    ("yearEndBonus", &["年终奖", "Year-end Bonus", "Bonus"]),
    ("holidayPay", &["假期工资", "Holiday Pay", "Holiday"]),
    ("reward", &["奖励金", "Reward", "Incentive"]),
    ("variableOthers", &["浮动其他", "浮动基他", "Variable Others"]),
    ("bonusAdvance", &["奖金预支", "Bonus Advance"]),
    ("cpf", &["个人CPF", "Personal CPF", "CPF"]),
    ("deductionRMB", &["扣发RMB", "Deduction RMB"]),
    ("deductionSGD", &["扣发SGD", "Deduction SGD"]),
    ("subtotal", &["小计", "Subtotal", "Sub-total"]),
    ("grossSalary", &["应发工资", "Gross Salary", "Gross"]),
    ("totalDeductions", &["扣发合计", "Total Deductions", "Deductions Total"]),
    ("netSalary", &["实发工资", "Net Salary", "Net Pay", "Take Home"]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = FieldCatalog::standard().unwrap();
        assert_eq!(catalog.column_mapping(Category::Expatriate).len(), 31);
        assert_eq!(catalog.column_mapping(Category::Local).len(), 23);
        assert!(catalog.structure_of(Category::Local).is_none());
        assert!(catalog.is_unitless("地区系数"));
        assert!(!catalog.is_unitless("固定工资"));
    }

    #[test]
    fn missing_label_is_reported() {
        let mut catalog = FieldCatalog::builtin();
        catalog.expatriate.labels.0.retain(|e| e.key != "cpf");
        let err = catalog.validate().unwrap_err();
        assert_eq!(
            err,
            CatalogError::MissingLabel {
                category: Category::Expatriate,
                key: "cpf".to_string(),
                referenced_by: "deduction `个人CPF`".to_string(),
            }
        );
    }

    #[test]
    fn mapping_without_name_column_is_rejected() {
        let mut catalog = FieldCatalog::builtin();
        catalog.local.columns.retain(|c| c.label != NAME_FIELD);
        assert_eq!(
            catalog.validate(),
            Err(CatalogError::MissingNameColumn {
                category: Category::Local
            })
        );
    }

    #[test]
    fn catalog_survives_json() {
        let catalog = FieldCatalog::standard().unwrap();
        let text = serde_json::to_string(&catalog).unwrap();
        let back: FieldCatalog = serde_json::from_str(&text).unwrap();
        assert_eq!(back, catalog);
    }

    #[test]
    fn lookups() {
        let catalog = FieldCatalog::standard().unwrap();
        assert_eq!(
            catalog.bilingual(Category::Expatriate, "grossSalary"),
            "应发工资 / Gross Salary"
        );
        assert_eq!(
            catalog.labels_of(Category::Local).find_by_zh("加班费"),
            Some(&Bilingual::new("加班费", "Overtime"))
        );
        assert_eq!(catalog.variations_of("cpf").map(|v| v.len()), Some(3));
        assert_eq!(catalog.variations_of("archiveGrade"), None);
    }
}
