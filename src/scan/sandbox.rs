use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::models::AnalyzerOutput;
use crate::config::SandboxConfig;
use crate::errors::{PullError, SandboxError, ScanError};

/// What to run: one container from `image` with `args`, the binds mounted
/// read/write, started in `working_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub args: Vec<String>,
    /// `host_path:container_path:rw`
    pub binds: Vec<String>,
    pub working_dir: String,
}

/// Container engine capabilities the sandbox needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> anyhow::Result<bool>;

    async fn pull_image(&self, image: &str) -> anyhow::Result<()>;

    /// Returns the new container's id.
    async fn create_container(&self, spec: &ContainerSpec) -> anyhow::Result<String>;

    async fn start_container(&self, id: &str) -> anyhow::Result<()>;

    /// Block until the container has exited and return its exit code.
    async fn wait_container(&self, id: &str) -> anyhow::Result<i64>;

    /// Full standard-output stream of an exited container.
    async fn stdout(&self, id: &str) -> anyhow::Result<Vec<u8>>;

    /// Remove the container together with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> anyhow::Result<()>;
}

/// Runs the analyzer image against a workspace in a throwaway container.
pub struct SandboxRunner {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
}

impl SandboxRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    pub fn container_spec(&self, workspace: &Path) -> ContainerSpec {
        ContainerSpec {
            image: self.config.image.clone(),
            args: self.config.args.clone(),
            binds: vec![format!(
                "{}:{}:rw",
                workspace.display(),
                self.config.mount_path
            )],
            working_dir: self.config.working_dir.clone(),
        }
    }

    /// Pull if needed, create, start, wait, read stdout, remove, then decode
    /// the JSON suffix of the output.
    ///
    /// Only `ScanError::Pull` and `ScanError::Sandbox` are returned. The
    /// container is removed whenever it was created, before the output is
    /// parsed.
    pub async fn run(&self, workspace: &Path) -> Result<AnalyzerOutput, ScanError> {
        self.ensure_image().await?;

        let spec = self.container_spec(workspace);
        let id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| SandboxError::Create {
                image: spec.image.clone(),
                message: format!("{:#}", e),
            })?;
        info!(container_id = %id, image = %spec.image, "Sandbox container created");

        // Container steps run in their own task so a panic in the runtime
        // still reaches the removal below.
        let steps = tokio::spawn(Self::execute(
            self.runtime.clone(),
            id.clone(),
            self.config.wait_timeout_secs,
        ));
        let captured = match steps.await {
            Ok(captured) => captured,
            Err(join_err) => Err(SandboxError::Aborted {
                id: id.clone(),
                message: join_err.to_string(),
            }),
        };
        self.remove(&id).await;

        let stdout = captured?;
        Ok(extract_json_payload(&stdout)?)
    }

    async fn ensure_image(&self) -> Result<(), PullError> {
        let image = &self.config.image;
        let present = self.runtime.image_exists(image).await.unwrap_or_else(|e| {
            warn!(image = %image, error = %e, "Image lookup failed; pulling");
            false
        });
        if present {
            debug!(image = %image, "Analyzer image present locally");
            return Ok(());
        }

        info!(image = %image, "Pulling analyzer image");
        self.runtime
            .pull_image(image)
            .await
            .map_err(|e| PullError {
                image: image.clone(),
                message: format!("{:#}", e),
            })
    }

    async fn execute(
        runtime: Arc<dyn ContainerRuntime>,
        id: String,
        wait_timeout_secs: Option<u64>,
    ) -> Result<Vec<u8>, SandboxError> {
        let id = id.as_str();
        runtime
            .start_container(id)
            .await
            .map_err(|e| SandboxError::Start {
                id: id.to_string(),
                message: format!("{:#}", e),
            })?;
        info!(container_id = %id, "Sandbox container started");

        let wait = runtime.wait_container(id);
        let waited = match wait_timeout_secs {
            None => wait.await,
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(container_id = %id, secs, "Sandbox container exceeded wait timeout");
                    return Err(SandboxError::TimedOut {
                        id: id.to_string(),
                        secs,
                    });
                }
            },
        };
        let exit_code = waited.map_err(|e| SandboxError::Wait {
            id: id.to_string(),
            message: format!("{:#}", e),
        })?;
        // Analyzers commonly exit non-zero when they report findings.
        info!(container_id = %id, exit_code, "Sandbox container exited");

        runtime
            .stdout(id)
            .await
            .map_err(|e| SandboxError::Logs {
                id: id.to_string(),
                message: format!("{:#}", e),
            })
    }

    async fn remove(&self, id: &str) {
        match self.runtime.remove_container(id).await {
            Ok(()) => info!(container_id = %id, "Sandbox container removed"),
            Err(e) => warn!(container_id = %id, error = %e, "Failed to remove sandbox container"),
        }
    }
}

/// Decode the JSON object that ends the analyzer output.
///
/// Everything before the first `{` byte is treated as preamble. The analyzer
/// must print exactly one JSON object as a strict suffix of its output.
pub fn extract_json_payload(output: &[u8]) -> Result<AnalyzerOutput, SandboxError> {
    let start = output
        .iter()
        .position(|&b| b == b'{')
        .ok_or(SandboxError::MissingPayload)?;
    serde_json::from_slice(&output[start..]).map_err(SandboxError::InvalidPayload)
}
