//! Markup renderers for canonical documents.
//!
//! Two views of the same [`CanonicalDocument`]: a fixed-width payslip
//! fragment handed to the rasterizer, and a self-contained email body.
//! Both share the group rule: generic and standalone groups are bare
//! rows, titled groups get a header band, their items and a spacer.
//!
//! Document data is HTML-escaped.  Operator templates (subject, body,
//! footer) are inserted as markup after placeholder substitution.

use crate::models::{AppSettings, CanonicalDocument, Group, GroupKind, LineItem};

/// Intrinsic width of the payslip fragment, in pixels.
pub const DOCUMENT_WIDTH_PX: u32 = 820;

const ITEM_HEADING: &str = "项目 / Item";
const AMOUNT_HEADING: &str = "金额 / Amount";
const CONTACT_LINE: &str = "如果有问题请联系Yunzhi";
const EMAIL_NOTICE: &str =
    "此邮件由系统自动发送，请勿回复。<br>This email is auto-generated, please do not reply.";

/// Values for the `{name}`, `{month}`, `{companyName}` and `{email}`
/// placeholders.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub name: &'a str,
    pub month: &'a str,
    pub company_name: &'a str,
    pub email: &'a str,
}

impl<'a> TemplateContext<'a> {
    pub fn for_document(
        doc: &'a CanonicalDocument,
        settings: &'a AppSettings,
        month: &'a str,
    ) -> Self {
        let company_name = if doc.meta.employer.zh.is_empty() {
            settings.company_name.as_str()
        } else {
            doc.meta.employer.zh.as_str()
        };
        TemplateContext {
            name: &doc.meta.name,
            month,
            company_name,
            email: if doc.meta.email.is_empty() {
                "N/A"
            } else {
                doc.meta.email.as_str()
            },
        }
    }
}

/// Replace every occurrence of each known placeholder.  Unknown
/// placeholders are left as they are.
pub fn substitute_placeholders(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{name}", ctx.name)
        .replace("{month}", ctx.month)
        .replace("{companyName}", ctx.company_name)
        .replace("{email}", ctx.email)
}

pub fn render_subject(doc: &CanonicalDocument, settings: &AppSettings, month: &str) -> String {
    substitute_placeholders(
        &settings.email_subject,
        &TemplateContext::for_document(doc, settings, month),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn amount_text(item: &LineItem) -> String {
    if item.unit.is_empty() {
        item.formatted_value.clone()
    } else {
        format!("{} {}", item.formatted_value, item.unit)
    }
}

/// Table rows of all groups, styled by the caller.
struct RowStyle {
    cell: &'static str,
    emphasis: &'static str,
    band: &'static str,
    band_cell: &'static str,
}

const DOCUMENT_ROWS: RowStyle = RowStyle {
    cell: "padding: 9px 10px; border: 1px solid #e2e8f0;",
    emphasis: " font-weight: 700; background-color: #f8fafc;",
    band: " style=\"background: linear-gradient(90deg, #f3f4f6 0%, #e5e7eb 100%);\"",
    band_cell: "padding: 10px; font-weight: 700; border: 1px solid #d1d5db;",
};

const EMAIL_ROWS: RowStyle = RowStyle {
    cell: "padding: 8px; border: 1px solid #ddd;",
    emphasis: " font-weight: 700; background-color: #f8fafc;",
    band: " style=\"background-color: #e0e7ff;\"",
    band_cell: "padding: 10px; font-weight: 700; border: 1px solid #c7d2fe;",
};

fn render_rows(groups: &[Group], style: &RowStyle) -> String {
    let mut out = String::new();
    for group in groups {
        if group.items.is_empty() {
            continue;
        }
        let banded = group.kind == GroupKind::Titled;
        if banded {
            out.push_str(&format!(
                "<tr{}><td colspan=\"2\" style=\"{}\">{}</td></tr>\n",
                style.band,
                style.band_cell,
                escape(&group.title)
            ));
        }
        for item in &group.items {
            let emphasis = if item.is_bold { style.emphasis } else { "" };
            out.push_str(&format!(
                "<tr><td style=\"{cell}{emphasis}\">{label}</td>\
                 <td style=\"{cell} text-align: right;{emphasis}\">{amount}</td></tr>\n",
                cell = style.cell,
                label = escape(&item.label),
                amount = escape(&amount_text(item)),
            ));
        }
        if banded {
            out.push_str("<tr><td colspan=\"2\" style=\"height: 8px; border: 0;\"></td></tr>\n");
        }
    }
    out
}

fn employer_line(doc: &CanonicalDocument) -> Option<String> {
    let employer = &doc.meta.employer;
    let parts: Vec<&str> = [employer.zh.as_str(), employer.en.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(escape(&parts.join(" / ")))
    }
}

/// The payslip fragment, [`DOCUMENT_WIDTH_PX`] wide, for rasterizing.
pub fn render_document(doc: &CanonicalDocument, footer: &str) -> String {
    let meta = &doc.meta;
    let mut out = format!(
        "<div style=\"width: {DOCUMENT_WIDTH_PX}px; padding: 36px 44px; \
         font-family: 'Microsoft YaHei', 'PingFang SC', 'Noto Sans', Arial, sans-serif; background: white;\">\n\
         <div style=\"text-align: right; margin-bottom: 26px; font-size: 20px; font-weight: 700; color: #0f172a;\">\
         工资条 Salary Slip</div>\n\
         <div style=\"margin-bottom: 18px; padding: 6px 2px; border-bottom: 1px solid #e2e8f0; font-size: 13px; color: #334155;\">\n"
    );
    if let Some(employer) = employer_line(doc) {
        out.push_str(&format!(
            "<div><strong>雇主名称 / Name of Employer:</strong> {employer}</div>\n"
        ));
    }
    out.push_str(&format!(
        "<div><strong>姓名 / Name:</strong> {}</div>\n\
         <div><strong>Pay Period:</strong> {}</div>\n",
        escape(&meta.name),
        escape(&meta.pay_period)
    ));
    if !meta.payment_date.is_empty() {
        out.push_str(&format!(
            "<div><strong>Date of Payment:</strong> {}</div>\n",
            escape(&meta.payment_date)
        ));
    }
    out.push_str("</div>\n");

    out.push_str(&format!(
        "<table style=\"width: 100%; border-collapse: collapse; margin-bottom: 16px; font-size: 13px;\">\n\
         <thead><tr style=\"background: linear-gradient(90deg, #4b5563 0%, #374151 100%); color: white;\">\
         <th style=\"padding: 12px; border: 1px solid #1f2937; text-align: left;\">{ITEM_HEADING}</th>\
         <th style=\"padding: 12px; border: 1px solid #1f2937; text-align: right;\">{AMOUNT_HEADING}</th>\
         </tr></thead>\n<tbody>\n{}</tbody>\n</table>\n",
        render_rows(&doc.groups, &DOCUMENT_ROWS)
    ));

    if !meta.remarks.is_empty() {
        out.push_str(&format!(
            "<div style=\"margin-top: 12px; padding: 10px 12px; background-color: #fff7ed; \
             border-left: 4px solid #fb923c; font-size: 12px;\"><strong>备注 Remarks:</strong> {}</div>\n",
            escape(&meta.remarks)
        ));
    }

    let email = if meta.email.is_empty() { "N/A" } else { meta.email.as_str() };
    out.push_str(&format!(
        "<div style=\"margin-top: 16px; padding-top: 16px; border-top: 1px solid #e2e8f0; \
         font-size: 11px; color: #64748b; text-align: center;\">\n\
         <p>Email: {}</p>\n<p>{CONTACT_LINE}</p>\n<p>{footer}</p>\n</div>\n</div>\n",
        escape(email)
    ));
    out
}

/// A complete HTML email carrying the payslip table and the
/// operator's greeting.
pub fn render_email_body(doc: &CanonicalDocument, settings: &AppSettings, month: &str) -> String {
    let meta = &doc.meta;
    let ctx = TemplateContext::for_document(doc, settings, month);
    let greeting = substitute_placeholders(&settings.email_body, &ctx);
    let footer = if settings.pdf_footer.is_empty() {
        EMAIL_NOTICE
    } else {
        settings.pdf_footer.as_str()
    };

    let mut out = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<style>\n\
         body { font-family: 'Microsoft YaHei', 'SimHei', Arial, sans-serif; line-height: 1.6; color: #333; }\n\
         .container { max-width: 700px; margin: 0 auto; padding: 20px; }\n\
         .header { background-color: #475569; color: white; padding: 20px; text-align: center; }\n\
         .metadata { background-color: #f8fafc; padding: 15px; margin: 15px 0; border-radius: 8px; }\n\
         .content { background-color: #f9f9f9; padding: 20px; }\n\
         table { width: 100%; border-collapse: collapse; margin: 20px 0; background: white; }\n\
         th { background-color: #475569; color: white; padding: 10px; text-align: left; }\n\
         .footer { text-align: center; color: #666; font-size: 12px; margin-top: 20px; }\n\
         </style>\n</head>\n<body>\n<div class=\"container\">\n\
         <div class=\"header\"><h3>工资条 Salary Slip</h3></div>\n\
         <div class=\"content\">\n<div class=\"metadata\">\n",
    );
    if let Some(employer) = employer_line(doc) {
        out.push_str(&format!(
            "<div><strong>雇主名称 / Name of Employer:</strong> {employer}</div>\n"
        ));
    }
    out.push_str(&format!(
        "<div><strong>姓名 / Name:</strong> {}</div>\n\
         <div><strong>Pay Period:</strong> {}</div>\n</div>\n",
        escape(&meta.name),
        escape(&meta.pay_period)
    ));
    if !meta.payment_date.is_empty() {
        out.push_str(&format!(
            "<p><strong>Date of Payment:</strong> {}</p>\n",
            escape(&meta.payment_date)
        ));
    }
    out.push_str(&format!(
        "<p>{greeting}</p>\n<table>\n<thead><tr><th>{ITEM_HEADING}</th>\
         <th style=\"text-align: right;\">{AMOUNT_HEADING}</th></tr></thead>\n\
         <tbody>\n{}</tbody>\n</table>\n",
        render_rows(&doc.groups, &EMAIL_ROWS)
    ));
    if !meta.remarks.is_empty() {
        out.push_str(&format!(
            "<p style=\"background-color: #fef3c7; padding: 10px; border-left: 4px solid #f59e0b;\">\
             <strong>备注 Remarks:</strong> {}</p>\n",
            escape(&meta.remarks)
        ));
    }
    out.push_str(&format!(
        "</div>\n<div class=\"footer\">\n<p>{footer}</p>\n<p>{CONTACT_LINE}</p>\n</div>\n\
         </div>\n</body>\n</html>\n"
    ));
    out
}
