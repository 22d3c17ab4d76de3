//! Payslip Engine library crate.
//!
//! This crate turns a multi-sheet payroll workbook into bilingual
//! payslips and mails them.  The pipeline is exposed as reusable
//! modules: `engine::parse_workbook_bytes` decodes and extracts a
//! workbook, `normalize::normalize` builds the canonical document of
//! one employee, `render` produces markup from it and
//! `dispatch::send_bulk` delivers a batch.  The HTTP API can be
//! embedded via `api::build_router`.

pub mod models;
pub mod error;
pub mod catalog;
pub mod classify;
pub mod totals;
pub mod extract;
pub mod normalize;
pub mod render;
pub mod transport;
pub mod dispatch;
pub mod engine;
pub mod storage;
pub mod config;
pub mod api;

pub use error::{PayslipError, Result};
