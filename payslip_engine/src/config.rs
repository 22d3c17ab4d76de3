//! Process configuration.
//!
//! Everything is read from environment variables once at start-up:
//!
//! * `PAYSLIP_BIND_ADDR`: listen address, default `127.0.0.1:3001`;
//! * `PAYSLIP_DATA_DIR`: directory of the local store, default `data`;
//! * `PAYSLIP_CATALOG`: optional JSON field catalog replacing the
//!   built-in one;
//! * `PAYSLIP_RASTERIZER`: optional converter command line used to
//!   attach payslip documents (see
//!   [`CommandRasterizer`](crate::transport::CommandRasterizer)).

use std::path::PathBuf;

use crate::catalog::FieldCatalog;
use crate::error::Result;
use crate::transport::CommandRasterizer;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3001";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub rasterizer: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            catalog_path: None,
            rasterizer: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: get("PAYSLIP_BIND_ADDR").unwrap_or(defaults.bind_addr),
            data_dir: get("PAYSLIP_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            catalog_path: get("PAYSLIP_CATALOG").map(PathBuf::from),
            rasterizer: get("PAYSLIP_RASTERIZER"),
        }
    }

    /// The configured catalog, validated.
    pub fn load_catalog(&self) -> Result<FieldCatalog> {
        match &self.catalog_path {
            Some(path) => {
                log::info!("loading field catalog from {}", path.display());
                FieldCatalog::from_json_file(path)
            }
            None => Ok(FieldCatalog::standard()?),
        }
    }

    pub fn rasterizer(&self) -> Option<CommandRasterizer> {
        self.rasterizer
            .as_deref()
            .and_then(CommandRasterizer::from_command_line)
    }
}
