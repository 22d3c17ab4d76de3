//! Local persistence.
//!
//! A small key-value store backed by one JSON file per key in a data
//! directory.  It keeps the SMTP configuration, the operator settings
//! and the history of delivered payslips between runs.  Reads never
//! fail: absent or unreadable entries are logged and treated as
//! missing.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{AppSettings, EmailHistoryRecord, SmtpConfig};

pub const SMTP_CONFIG_KEY: &str = "smtp_config";
pub const EMAIL_HISTORY_KEY: &str = "email_history";
pub const APP_SETTINGS_KEY: &str = "app_settings";
const KEYS: [&str; 3] = [SMTP_CONFIG_KEY, EMAIL_HISTORY_KEY, APP_SETTINGS_KEY];

/// Entries kept in the email history, newest first.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub smtp_config: bool,
    pub email_history_count: usize,
    pub settings: bool,
    /// Bytes on disk across all keys.
    pub total_size: u64,
    #[serde(rename = "totalSizeKB")]
    pub total_size_kb: String,
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug)]
pub struct JsonStore {
    dir: PathBuf,
    // serialises read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(JsonStore {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = match fs::read_to_string(self.path(key)) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!("failed to load {key}: {err}");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("failed to parse {key}: {err}");
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persist the relay configuration, stamped with the save time.
    pub fn save_smtp_config(&self, config: &SmtpConfig) -> Result<SmtpConfig> {
        let stamped = SmtpConfig {
            saved_at: Some(now_stamp()),
            ..config.clone()
        };
        let _guard = self.guard();
        self.write(SMTP_CONFIG_KEY, &stamped)?;
        Ok(stamped)
    }

    pub fn load_smtp_config(&self) -> Option<SmtpConfig> {
        self.read(SMTP_CONFIG_KEY)
    }

    pub fn clear_smtp_config(&self) -> Result<()> {
        let _guard = self.guard();
        self.remove(SMTP_CONFIG_KEY)
    }

    pub fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        let _guard = self.guard();
        self.write(APP_SETTINGS_KEY, settings)
    }

    /// Stored settings over the defaults.  Fields missing from the
    /// file keep their default value.
    pub fn load_settings(&self) -> AppSettings {
        self.read(APP_SETTINGS_KEY).unwrap_or_default()
    }

    pub fn clear_settings(&self) -> Result<()> {
        let _guard = self.guard();
        self.remove(APP_SETTINGS_KEY)
    }

    pub fn email_history(&self) -> Vec<EmailHistoryRecord> {
        self.read(EMAIL_HISTORY_KEY).unwrap_or_default()
    }

    /// Prepend delivered payslips, stamping each with the current time.
    /// Only the newest [`HISTORY_LIMIT`] entries are kept.
    pub fn add_to_email_history(
        &self,
        records: impl IntoIterator<Item = EmailHistoryRecord>,
    ) -> Result<()> {
        let _guard = self.guard();
        let stamp = now_stamp();
        let mut added: Vec<EmailHistoryRecord> = records
            .into_iter()
            .map(|record| EmailHistoryRecord {
                sent_at: stamp.clone(),
                ..record
            })
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        // newest first
        added.reverse();
        added.extend(self.email_history());
        added.truncate(HISTORY_LIMIT);
        self.write(EMAIL_HISTORY_KEY, &added)
    }

    pub fn clear_email_history(&self) -> Result<()> {
        let _guard = self.guard();
        self.remove(EMAIL_HISTORY_KEY)
    }

    pub fn storage_info(&self) -> StorageInfo {
        let total_size: u64 = KEYS
            .iter()
            .filter_map(|key| fs::metadata(self.path(key)).ok())
            .map(|meta| meta.len())
            .sum();
        StorageInfo {
            smtp_config: self.path(SMTP_CONFIG_KEY).is_file(),
            email_history_count: self.email_history().len(),
            settings: self.path(APP_SETTINGS_KEY).is_file(),
            total_size,
            total_size_kb: format!("{:.2}", total_size as f64 / 1024.0),
        }
    }

    pub fn clear_all(&self) -> Result<()> {
        let _guard = self.guard();
        for key in KEYS {
            self.remove(key)?;
        }
        Ok(())
    }
}
