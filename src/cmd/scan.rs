//! One-shot scan command: `repo-scan scan <url>`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use repo_scan::scan::docker::DockerRuntime;
use repo_scan::scan::fetcher::GitFetcher;
use repo_scan::scan::models::{JobStatus, validate_source_url};
use repo_scan::scan::server::build_orchestrator;
use repo_scan::scan::store::MemoryStore;

use super::super::Cli;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run a scan against an in-memory store and print the finished job.
/// Returns the process exit code: 0 when Done, 1 when Error.
pub async fn cmd_scan(cli: &Cli, url: &str) -> Result<i32> {
    let config = super::load_and_init(cli)?;
    validate_source_url(url)?;

    let runtime = DockerRuntime::connect()
        .await
        .context("Failed to initialize container runtime")?;
    let orchestrator = build_orchestrator(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(GitFetcher::new(&config.fetch)),
        Arc::new(runtime),
    );

    let id = orchestrator.submit(url).await?;
    eprintln!("Scan {} submitted for {}", id, url);

    let job = loop {
        let job = orchestrator
            .get(&id)
            .await?
            .ok_or_else(|| anyhow!("Scan {} disappeared from the store", id))?;
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(if job.status == JobStatus::Error { 1 } else { 0 })
}
