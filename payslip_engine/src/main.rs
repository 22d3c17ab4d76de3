//! Entry point for the Payslip Engine binary.
//!
//! Running this binary starts an HTTP server exposing the payslip
//! pipeline.  Configuration comes from `PAYSLIP_*` environment
//! variables (see [`payslip_engine::config`]); log output is
//! controlled with `RUST_LOG` and defaults to `info`.

use payslip_engine::api;
use payslip_engine::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    if let Err(err) = api::serve(&config).await {
        log::error!("Error running server: {err:#}");
        return Err(err);
    }
    Ok(())
}
