//! HTTP API for the Payslip Engine.
//!
//! This module exposes the pipeline over a small JSON API built with
//! [`axum`](https://crates.io/crates/axum): workbook parsing, preview
//! of normalised documents and rendered markup, single and bulk mail
//! delivery, and the locally stored settings, SMTP configuration and
//! delivery history.  The field catalog and the store are created once
//! and shared between requests.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::FieldCatalog;
use crate::config::ServerConfig;
use crate::dispatch::{send_bulk, BulkOptions, BulkResult, Composer, DeliveryStatus};
use crate::engine::{current_pay_period, parse_workbook_bytes};
use crate::error::PayslipError;
use crate::extract::{data_summary, DataSummary, ParsedWorkbook};
use crate::models::{AppSettings, CanonicalDocument, EmailHistoryRecord, EmployeeRecord, SmtpConfig};
use crate::normalize::{normalize, NormalizeOptions};
use crate::render::{render_document, render_email_body, render_subject};
use crate::storage::{JsonStore, StorageInfo};
use crate::transport::{DocumentRasterizer, MailTransport, OutgoingMail, SmtpMailer};

/// Uploaded workbooks and bulk payloads can be large.
const BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Application state shared across requests.
pub struct AppState {
    pub catalog: FieldCatalog,
    pub store: JsonStore,
    pub rasterizer: Option<Arc<dyn DocumentRasterizer>>,
}

impl AppState {
    fn composer<'a>(&'a self, settings: &'a AppSettings) -> Composer<'a> {
        Composer::new(&self.catalog, settings).with_rasterizer(self.rasterizer.clone())
    }
}

/// Error body of a failed request, `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl ToString) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.into().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build the shared state from the process configuration.  An
/// invalid catalog file is fatal.
pub fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    let catalog = config.load_catalog()?;
    let store = JsonStore::open(&config.data_dir)?;
    let rasterizer = config
        .rasterizer()
        .map(|r| Arc::new(r) as Arc<dyn DocumentRasterizer>);
    if rasterizer.is_none() {
        log::info!("no rasterizer configured, payslips are sent without attachments");
    }
    Ok(Arc::new(AppState {
        catalog,
        store,
        rasterizer,
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/test-smtp", post(test_smtp_handler))
        .route("/api/send-email", post(send_email_handler))
        .route("/api/parse", post(parse_handler))
        .route("/api/normalize", post(normalize_handler))
        .route("/api/render", post(render_handler))
        .route("/api/send-bulk", post(send_bulk_handler))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route(
            "/api/smtp-config",
            get(get_smtp_config)
                .put(put_smtp_config)
                .delete(delete_smtp_config),
        )
        .route("/api/history", get(get_history).delete(delete_history))
        .route("/api/storage", get(get_storage))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// Handler for POST /api/test-smtp
async fn test_smtp_handler(Json(config): Json<SmtpConfig>) -> Response {
    let verified = match SmtpMailer::new(&config) {
        Ok(mailer) => mailer.verify().await,
        Err(err) => Err(err),
    };
    match verified {
        Ok(()) => Json(json!({"success": true, "message": "SMTP configuration is valid"}))
            .into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": err.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SendEmailRequest {
    smtp: SmtpConfig,
    #[serde(flatten)]
    mail: OutgoingMail,
}

/// Handler for POST /api/send-email
async fn send_email_handler(Json(request): Json<SendEmailRequest>) -> Response {
    log::info!(
        "[EMAIL] SMTP Host: {}:{}",
        request.smtp.host,
        request.smtp.port
    );
    let sent = match SmtpMailer::new(&request.smtp) {
        Ok(mailer) => mailer.send(request.mail).await,
        Err(err) => Err(err),
    };
    match sent {
        Ok(receipt) => Json(json!({"success": true, "messageId": receipt.message_id}))
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "message": err.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ParseResponse {
    workbook: ParsedWorkbook,
    summary: DataSummary,
}

/// Handler for POST /api/parse; the body is the raw workbook file.
async fn parse_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<ParseResponse> {
    let period = current_pay_period();
    let parsed = tokio::task::spawn_blocking(move || {
        parse_workbook_bytes(body.to_vec(), &state.catalog, &period)
    })
    .await?;
    let workbook = match parsed {
        Ok(workbook) => workbook,
        Err(err @ PayslipError::Workbook(_)) => return Err(ApiError::bad_request(err)),
        Err(err) => return Err(err.into()),
    };
    let summary = data_summary(&workbook);
    Ok(Json(ParseResponse { workbook, summary }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRequest {
    employee: EmployeeRecord,
    #[serde(default)]
    month: Option<String>,
    #[serde(default)]
    options: NormalizeOptions,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Request options first, then the stored settings.
fn with_settings(options: NormalizeOptions, settings: &AppSettings) -> NormalizeOptions {
    NormalizeOptions {
        pay_period: options.pay_period.or_else(|| non_empty(&settings.pay_period)),
        payment_date: options
            .payment_date
            .or_else(|| non_empty(&settings.date_of_payment)),
        company_name: options
            .company_name
            .or_else(|| non_empty(&settings.company_name)),
        company_name_en: options
            .company_name_en
            .or_else(|| non_empty(&settings.company_name_en)),
    }
}

fn document_for(
    state: &AppState,
    request: DocumentRequest,
    settings: &AppSettings,
) -> std::result::Result<(CanonicalDocument, String), ApiError> {
    let month = request
        .month
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| settings.month.clone());
    let options = with_settings(request.options, settings);
    let doc = normalize(&request.employee, &month, &options, &state.catalog)?;
    Ok((doc, month))
}

/// Handler for POST /api/normalize
async fn normalize_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DocumentRequest>,
) -> ApiResult<CanonicalDocument> {
    let settings = state.store.load_settings();
    let (doc, _) = document_for(&state, request, &settings)?;
    Ok(Json(doc))
}

#[derive(Debug, Serialize)]
struct RenderResponse {
    subject: String,
    document: String,
    email: String,
}

/// Handler for POST /api/render
async fn render_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DocumentRequest>,
) -> ApiResult<RenderResponse> {
    let settings = state.store.load_settings();
    let (doc, month) = document_for(&state, request, &settings)?;
    Ok(Json(RenderResponse {
        subject: render_subject(&doc, &settings, &month),
        document: render_document(&doc, &settings.pdf_footer),
        email: render_email_body(&doc, &settings, &month),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkRequest {
    /// Falls back to the stored configuration.
    #[serde(default)]
    smtp: Option<SmtpConfig>,
    employees: Vec<EmployeeRecord>,
    options: BulkOptions,
}

/// Handler for POST /api/send-bulk
async fn send_bulk_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkRequest>,
) -> ApiResult<BulkResult> {
    let smtp = request
        .smtp
        .or_else(|| state.store.load_smtp_config())
        .ok_or_else(|| ApiError::bad_request("no SMTP configuration"))?;
    let mailer = SmtpMailer::new(&smtp)?;
    let settings = state.store.load_settings();

    let mut options = request.options;
    if options.month.is_empty() {
        options.month = settings.month.clone();
    }
    options.normalize = with_settings(options.normalize, &settings);

    let result = match send_bulk(
        &mailer,
        &request.employees,
        &options,
        state.composer(&settings),
        |p| {
            log::info!(
                "[EMAIL] {}/{} ({}%) {}: {:?}",
                p.current,
                p.total,
                p.percentage,
                p.employee_name,
                p.status
            )
        },
    )
    .await
    {
        Ok(result) => result,
        Err(err @ PayslipError::MissingDebugAddress) => return Err(ApiError::bad_request(err)),
        Err(err) => return Err(err.into()),
    };

    if !result.dry_run {
        let delivered = result
            .details
            .iter()
            .filter(|d| d.status == DeliveryStatus::Success)
            .map(|d| EmailHistoryRecord {
                name: d.employee.clone(),
                email: d.email.clone(),
                month: options.month.clone(),
                message_id: d.message_id.clone(),
                sent_at: String::new(),
            });
        state.store.add_to_email_history(delivered)?;
    }
    Ok(Json(result))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<AppSettings> {
    Json(state.store.load_settings())
}

async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<AppSettings>,
) -> ApiResult<AppSettings> {
    state.store.save_settings(&settings)?;
    Ok(Json(settings))
}

async fn get_smtp_config(State(state): State<Arc<AppState>>) -> Json<Option<SmtpConfig>> {
    Json(state.store.load_smtp_config())
}

async fn put_smtp_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<SmtpConfig>,
) -> ApiResult<SmtpConfig> {
    Ok(Json(state.store.save_smtp_config(&config)?))
}

async fn delete_smtp_config(State(state): State<Arc<AppState>>) -> std::result::Result<StatusCode, ApiError> {
    state.store.clear_smtp_config()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_history(State(state): State<Arc<AppState>>) -> Json<Vec<EmailHistoryRecord>> {
    Json(state.store.email_history())
}

async fn delete_history(State(state): State<Arc<AppState>>) -> std::result::Result<StatusCode, ApiError> {
    state.store.clear_email_history()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_storage(State(state): State<Arc<AppState>>) -> Json<StorageInfo> {
    Json(state.store.storage_info())
}

/// Launch the API server.  This function builds the shared state from
/// the configuration and binds to the configured address.  It blocks
/// until the server terminates.
pub async fn serve(config: &ServerConfig) -> Result<()> {
    let router = build_router(build_state(config)?);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmployeeKind, RecordMetadata};

    fn state(dir: &tempfile::TempDir) -> Arc<AppState> {
        build_state(&ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        })
        .unwrap()
    }

    fn request() -> DocumentRequest {
        DocumentRequest {
            employee: EmployeeRecord {
                name: "LI HUA".to_string(),
                email: "lihua@ccs.org.cn".to_string(),
                remarks: String::new(),
                overtime_hours: String::new(),
                breakdown: [("固定工资", "1000.00"), ("补贴", "0.00"), ("实发工资", "1000.00")]
                    .into_iter()
                    .collect(),
                sheet_name: "属地".to_string(),
                row_number: 3,
                metadata: RecordMetadata::default(),
                kind: EmployeeKind::Local,
            },
            month: Some("2026-01".to_string()),
            options: NormalizeOptions::default(),
        }
    }

    #[tokio::test]
    async fn settings_feed_document_headers() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let settings = AppSettings {
            company_name: "中国船级社".to_string(),
            pay_period: "2026-01-01 ~ 2026-01-31".to_string(),
            ..AppSettings::default()
        };
        put_settings(State(state.clone()), Json(settings)).await.unwrap();

        let Json(doc) = normalize_handler(State(state.clone()), Json(request())).await.unwrap();
        assert_eq!(doc.meta.employer.zh, "中国船级社");
        assert_eq!(doc.meta.pay_period, "2026-01-01 ~ 2026-01-31");
        assert_eq!(doc.groups.len(), 1);

        let mut explicit = request();
        explicit.options.pay_period = Some("一月".to_string());
        let Json(doc) = normalize_handler(State(state), Json(explicit)).await.unwrap();
        assert_eq!(doc.meta.pay_period, "一月");
    }

    #[tokio::test]
    async fn render_returns_both_views() {
        let dir = tempfile::tempdir().unwrap();
        let Json(rendered) = render_handler(State(state(&dir)), Json(request())).await.unwrap();
        assert_eq!(rendered.subject, "工资条 - 2026-01");
        assert!(rendered.document.contains("width: 820px"));
        assert!(rendered.email.contains("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn garbage_upload_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_handler(State(state(&dir)), Bytes::from_static(b"nope"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bulk_without_smtp_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bulk = BulkRequest {
            smtp: None,
            employees: vec![request().employee],
            options: BulkOptions::default(),
        };
        let err = send_bulk_handler(State(state(&dir)), Json(bulk)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stored_smtp_config_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 465,
            secure: true,
            user: "payroll@example.com".to_string(),
            password: "secret".to_string(),
            saved_at: None,
        };
        let Json(saved) = put_smtp_config(State(state.clone()), Json(config)).await.unwrap();
        assert!(saved.saved_at.is_some());
        let Json(info) = get_storage(State(state.clone())).await;
        assert!(info.smtp_config);
        delete_smtp_config(State(state.clone())).await.unwrap();
        let Json(loaded) = get_smtp_config(State(state)).await;
        assert_eq!(loaded, None);
    }
}
