//! HTTP service command: `repo-scan serve`.

use anyhow::{Result, bail};
use tracing::warn;

use super::super::Cli;

pub async fn cmd_serve(cli: &Cli, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = super::load_and_init(cli)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let report = config.validate();
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if !report.is_ok() {
        bail!("Invalid configuration: {}", report.errors.join("; "));
    }

    repo_scan::scan::server::start_server(config).await
}
