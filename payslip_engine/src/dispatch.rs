//! Bulk payslip delivery.
//!
//! Employees are mailed one at a time with a fixed pause between
//! sends so that third-party relays are not flooded.  A failure for
//! one recipient is recorded and the batch moves on; the caller gets a
//! per-recipient report at the end and a progress event after every
//! attempt.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::FieldCatalog;
use crate::error::{PayslipError, Result};
use crate::models::{AppSettings, CanonicalDocument, EmployeeRecord};
use crate::normalize::{normalize, NormalizeOptions};
use crate::render::{render_document, render_email_body, render_subject, DOCUMENT_WIDTH_PX};
use crate::transport::{DocumentRasterizer, MailAttachment, MailTransport, OutgoingMail};

pub const DRY_RUN_MARKER: &str = "[TEST DRY RUN]";

fn default_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOptions {
    pub month: String,
    #[serde(flatten)]
    pub normalize: NormalizeOptions,
    /// Pause between two consecutive sends.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub dry_run: bool,
    /// Destination of every message in a dry run.
    #[serde(default)]
    pub debug_email: Option<String>,
    #[serde(default = "default_true")]
    pub include_document: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        BulkOptions {
            month: String::new(),
            normalize: NormalizeOptions::default(),
            delay_ms: default_delay_ms(),
            dry_run: false,
            debug_email: None,
            include_document: true,
        }
    }
}

impl BulkOptions {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// Reported after every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub employee_name: String,
    pub status: DeliveryStatus,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDetail {
    pub employee: String,
    /// Address the message was actually sent to.
    pub email: String,
    /// The employee's own address, set in dry runs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_email: Option<String>,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub debug_email: Option<String>,
    pub details: Vec<DeliveryDetail>,
}

/// Everything needed to turn a record into a message.
#[derive(Clone)]
pub struct Composer<'a> {
    pub catalog: &'a FieldCatalog,
    pub settings: &'a AppSettings,
    pub rasterizer: Option<Arc<dyn DocumentRasterizer>>,
}

impl<'a> Composer<'a> {
    pub fn new(catalog: &'a FieldCatalog, settings: &'a AppSettings) -> Self {
        Composer {
            catalog,
            settings,
            rasterizer: None,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Option<Arc<dyn DocumentRasterizer>>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Build the message for one document.
    ///
    /// In a dry run the subject names the employee's real address,
    /// which stays in `doc`, while the message goes to `destination`.
    /// A rasterizer failure only drops the attachment.  Rasterizing
    /// runs on the blocking pool.
    pub async fn compose_message(
        &self,
        doc: &CanonicalDocument,
        month: &str,
        destination: &str,
        dry_run: bool,
        include_document: bool,
    ) -> OutgoingMail {
        let subject = render_subject(doc, self.settings, month);
        let subject = if dry_run {
            format!("{DRY_RUN_MARKER} {subject} - 原收件人: {}", doc.meta.email)
        } else {
            subject
        };

        let mut attachments = Vec::new();
        if let (true, Some(rasterizer)) = (include_document, &self.rasterizer) {
            let markup = render_document(doc, &self.settings.pdf_footer);
            let rasterizer = Arc::clone(rasterizer);
            let rendered = tokio::task::spawn_blocking(move || {
                rasterizer.rasterize(&markup, DOCUMENT_WIDTH_PX)
            })
            .await
            .map_err(PayslipError::from)
            .and_then(|bytes| bytes);
            match rendered {
                Ok(bytes) => attachments.push(MailAttachment::from_bytes(
                    format!("salary_slip_{}_{month}.pdf", doc.meta.name),
                    &bytes,
                )),
                Err(err) => log::warn!(
                    "[EMAIL] Payslip document for {} not attached: {err}",
                    doc.meta.name
                ),
            }
        }

        OutgoingMail {
            to: destination.to_string(),
            subject,
            html: render_email_body(doc, self.settings, month),
            attachments,
        }
    }
}

fn percentage(current: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((current as f64 / total as f64) * 100.0).round() as u32
}

/// Mail every employee in order.
///
/// Fails up front only for a dry run without a debug address; every
/// other problem is recorded against the employee it concerns.
pub async fn send_bulk<T, F>(
    transport: &T,
    employees: &[EmployeeRecord],
    options: &BulkOptions,
    composer: Composer<'_>,
    mut on_progress: F,
) -> Result<BulkResult>
where
    T: MailTransport,
    F: FnMut(Progress),
{
    let debug_email = options
        .debug_email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if options.dry_run && debug_email.is_none() {
        return Err(PayslipError::MissingDebugAddress);
    }

    let total = employees.len();
    let mut result = BulkResult {
        total,
        sent: 0,
        failed: 0,
        dry_run: options.dry_run,
        debug_email: debug_email.filter(|_| options.dry_run).map(str::to_string),
        details: Vec::with_capacity(total),
    };
    log::info!(
        "[EMAIL] Sending {total} payslips for {}{}",
        options.month,
        if options.dry_run { " (dry run)" } else { "" }
    );

    for (index, employee) in employees.iter().enumerate() {
        let destination = match (options.dry_run, debug_email) {
            (true, Some(debug)) => debug,
            _ => employee.email.as_str(),
        };

        let outcome = match normalize(employee, &options.month, &options.normalize, composer.catalog) {
            Ok(doc) => {
                let mail = composer.compose_message(
                    &doc,
                    &options.month,
                    destination,
                    options.dry_run,
                    options.include_document,
                )
                .await;
                transport.send(mail).await
            }
            Err(err) => Err(err.into()),
        };

        let mut detail = DeliveryDetail {
            employee: employee.name.clone(),
            email: destination.to_string(),
            original_email: options.dry_run.then(|| employee.email.clone()),
            status: DeliveryStatus::Success,
            message_id: None,
            error: None,
        };
        match outcome {
            Ok(receipt) => {
                result.sent += 1;
                detail.message_id = receipt.message_id;
            }
            Err(err) => {
                log::warn!("[EMAIL] Failed to send to {} <{destination}>: {err}", employee.name);
                result.failed += 1;
                detail.status = DeliveryStatus::Failed;
                detail.error = Some(err.to_string());
            }
        }
        let status = detail.status;
        result.details.push(detail);

        on_progress(Progress {
            current: index + 1,
            total,
            employee_name: employee.name.clone(),
            status,
            percentage: percentage(index + 1, total),
        });

        if index + 1 < total && options.delay_ms > 0 {
            tokio::time::sleep(options.delay()).await;
        }
    }

    log::info!(
        "[EMAIL] Batch finished: {} sent, {} failed",
        result.sent,
        result.failed
    );
    Ok(result)
}
