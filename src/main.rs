//! Certforge - Hierarchical Certificate Authority Orchestrator
//!
//! Builds the configured authority tree at startup and keeps the OCSP
//! responder for the whole forest running. Tree mutations (new
//! authorities, new certificates, revocations) arrive through the library
//! API; this binary is the startup trigger and the responder's keeper.

use anyhow::{bail, Context, Result};
use certforge::configs::AppConfig;
use certforge::engine::Engine;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load certforge.toml")?;
    let ocsp_port = config.ocsp_port;
    let engine =
        Engine::bootstrap(config).context("failed to build the certificate authority tree")?;
    info!(
        "authority tree built, OCSP responder listening on port {}",
        ocsp_port
    );

    loop {
        thread::sleep(Duration::from_secs(5));
        if !engine.responder().is_running() {
            engine.shutdown();
            bail!("OCSP responder exited unexpectedly");
        }
    }
}
