//! Error types for the Payslip Engine.
//!
//! Data-quality problems in a workbook are not errors: malformed rows
//! are skipped and unparseable numbers read as zero.  What remains are
//! configuration problems, I/O, and failures of the external
//! collaborators (workbook decoding, mail relay, rasterizer).

use crate::catalog::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayslipError {
    #[error("invalid field catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("invalid mail address `{address}`: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("invalid content type: {0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("smtp relay {host} did not accept the connection")]
    RelayUnavailable { host: String },
    #[error("attachment is not valid base64: {0}")]
    Attachment(#[from] base64::DecodeError),
    #[error("document rendering failed: {0}")]
    Render(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("dry run requires a debug address")]
    MissingDebugAddress,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = PayslipError> = std::result::Result<T, E>;
