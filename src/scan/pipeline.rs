//! Job orchestration: accept submissions, run fetch → sandbox → classify in
//! the background, and record exactly one terminal outcome per job.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use super::classifier::{Classifier, Verdict};
use super::fetcher::SourceFetcher;
use super::models::{AnalyzerOutput, Job, JobId, validate_source_url};
use super::sandbox::SandboxRunner;
use super::store::JobStore;
use crate::config::{PipelineConfig, WorkspaceConfig};
use crate::errors::{ScanError, StoreError, SubmitError};

/// Everything a pipeline task needs, shared across jobs.
#[derive(Clone)]
struct ScanContext {
    store: Arc<dyn JobStore>,
    fetcher: Arc<dyn SourceFetcher>,
    runner: Arc<SandboxRunner>,
    classifier: Arc<Classifier>,
    workspace: WorkspaceConfig,
}

/// Front door for scans. Cheap to share behind an `Arc`.
pub struct ScanOrchestrator {
    store: Arc<dyn JobStore>,
    queue: mpsc::UnboundedSender<Job>,
}

impl ScanOrchestrator {
    /// Build the orchestrator and start its dispatcher.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn JobStore>,
        fetcher: Arc<dyn SourceFetcher>,
        runner: Arc<SandboxRunner>,
        classifier: Classifier,
        workspace: WorkspaceConfig,
        pipeline: PipelineConfig,
    ) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let ctx = ScanContext {
            store: store.clone(),
            fetcher,
            runner,
            classifier: Arc::new(classifier),
            workspace,
        };
        tokio::spawn(dispatch(ctx, rx, pipeline.max_concurrent_scans));
        Self { store, queue }
    }

    /// Validate `url`, persist a Processing job and queue its pipeline.
    ///
    /// Returns once the job is durably stored. The scan itself runs later.
    pub async fn submit(&self, url: &str) -> Result<JobId, SubmitError> {
        let url = validate_source_url(url)?;
        let job = Job::new(url);
        self.store.put(&job).await?;
        info!(job_id = %job.id, url = %job.url, "Scan submitted");

        let id = job.id.clone();
        if let Err(mpsc::error::SendError(mut job)) = self.queue.send(job) {
            error!(job_id = %id, "Scan dispatcher is gone; failing job");
            if job.fail(SubmitError::DispatcherClosed.to_string()).is_ok() {
                job.touch();
                self.store.put(&job).await?;
            }
            return Err(SubmitError::DispatcherClosed);
        }
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        self.store.list().await
    }
}

/// Hand queued jobs to pipeline tasks, at most `limit` at a time (0 = no limit).
async fn dispatch(ctx: ScanContext, mut rx: mpsc::UnboundedReceiver<Job>, limit: usize) {
    let semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
    info!(max_concurrent_scans = limit, "Scan dispatcher started");

    while let Some(job) = rx.recv().await {
        let permit = match &semaphore {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(err) => {
                    error!(error = %err, "Failed to acquire scan permit");
                    break;
                }
            },
            None => None,
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            run_job(ctx, job).await;
            drop(permit);
        });
    }

    debug!("Scan dispatcher exiting");
}

/// Run all stages for one job and persist its terminal record.
async fn run_job(ctx: ScanContext, mut job: Job) {
    let workspace = ctx.workspace.root.join(&job.id);
    info!(job_id = %job.id, url = %job.url, workspace = %workspace.display(), "Scan started");

    let stages = tokio::spawn(run_stages(ctx.clone(), job.url.clone(), workspace.clone()));
    let outcome = match stages.await {
        Ok(outcome) => outcome,
        Err(join_err) => Err(ScanError::Panicked(join_err.to_string())),
    };

    let transition = match outcome {
        Ok((output, verdict)) => {
            info!(
                job_id = %job.id,
                is_secure = verdict.is_secure,
                severity_count = verdict.severity_count,
                "Scan finished"
            );
            job.complete(output, verdict.is_secure)
        }
        Err(err) => {
            warn!(job_id = %job.id, error = %err, "Scan failed");
            job.fail(err.to_string())
        }
    };

    match transition {
        Ok(()) => {
            job.touch();
            if let Err(e) = ctx.store.put(&job).await {
                error!(job_id = %job.id, error = %e, "Failed to persist scan outcome");
            }
        }
        Err(e) => error!(job_id = %job.id, error = %e, "Refusing second terminal transition"),
    }

    if ctx.workspace.cleanup {
        remove_workspace(&job.id, workspace).await;
    }
}

async fn run_stages(
    ctx: ScanContext,
    url: String,
    workspace: PathBuf,
) -> Result<(AnalyzerOutput, Verdict), ScanError> {
    ctx.fetcher.fetch(&url, &workspace).await?;
    debug!(url = %url, "Source fetched");

    let output = ctx.runner.run(&workspace).await?;
    let verdict = ctx.classifier.classify(&output)?;
    Ok((output, verdict))
}

async fn remove_workspace(job_id: &str, workspace: PathBuf) {
    match tokio::fs::remove_dir_all(&workspace).await {
        Ok(()) => debug!(job_id = %job_id, "Workspace removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            job_id = %job_id,
            workspace = %workspace.display(),
            error = %e,
            "Failed to remove workspace"
        ),
    }
}
