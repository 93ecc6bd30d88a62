//! Docker Engine runtime backed by bollard.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateImageOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, WaitContainerOptionsBuilder,
};
use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use super::sandbox::{ContainerRuntime, ContainerSpec};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect through the local socket (or `DOCKER_HOST`) and ping the daemon.
    pub async fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker")?;
        docker.ping().await.context("Docker ping failed")?;
        debug!("Connected to Docker daemon");
        Ok(Self { docker })
    }
}

/// Split `repo:tag`, leaving registry ports (`host:5000/repo`) intact.
fn split_image_ref(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(anyhow!("Failed to inspect image {}: {}", image, e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (repo, tag) = split_image_ref(image);
        let options = CreateImageOptionsBuilder::default()
            .from_image(repo)
            .tag(tag)
            .build();
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| anyhow!("Failed to pull {}: {}", image, e))?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.args.clone()),
            working_dir: Some(spec.working_dir.clone()),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(None, body)
            .await
            .map_err(|e| anyhow!("Failed to create container: {}", e))?;
        for warning in &response.warnings {
            debug!(container_id = %response.id, warning = %warning, "Docker create warning");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| anyhow!("Failed to start container: {}", e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let options = WaitContainerOptionsBuilder::default()
            .condition("not-running")
            .build();
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; it is still a clean exit.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(anyhow!("Failed to wait for container: {}", e)),
            None => Err(anyhow!("Wait stream for container {} ended early", id)),
        }
    }

    async fn stdout(&self, id: &str) -> Result<Vec<u8>> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(false)
            .follow(false)
            .build();
        let mut stream = self.docker.logs(id, Some(options));
        let mut out = Vec::new();
        while let Some(frame) = stream.next().await {
            match frame.map_err(|e| anyhow!("Failed to read container logs: {}", e))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    out.extend_from_slice(&message);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default()
            .v(true)
            .force(true)
            .build();
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| anyhow!("Failed to remove container: {}", e))
    }
}
