use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{error, info};

use super::api::{self, AppState};
use super::classifier::Classifier;
use super::docker::DockerRuntime;
use super::fetcher::{GitFetcher, SourceFetcher};
use super::pipeline::ScanOrchestrator;
use super::sandbox::{ContainerRuntime, SandboxRunner};
use super::store::{JobStore, open_store};
use crate::config::ScannerConfig;

/// Wire the pipeline stages together from `config`.
///
/// Must be called inside a Tokio runtime.
pub fn build_orchestrator(
    config: &ScannerConfig,
    store: Arc<dyn JobStore>,
    fetcher: Arc<dyn SourceFetcher>,
    runtime: Arc<dyn ContainerRuntime>,
) -> ScanOrchestrator {
    let runner = Arc::new(SandboxRunner::new(runtime, config.sandbox.clone()));
    ScanOrchestrator::new(
        store,
        fetcher,
        runner,
        Classifier::new(&config.classifier),
        config.workspace.clone(),
        config.pipeline.clone(),
    )
}

/// Build the application router with request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(state)
}

/// Start the scan server and run until Ctrl+C.
pub async fn start_server(config: ScannerConfig) -> Result<()> {
    let store = open_store(&config.storage)
        .await
        .with_context(|| format!("Failed to open {} job store", config.storage.backend))?;
    let runtime = DockerRuntime::connect()
        .await
        .context("Failed to initialize container runtime")?;
    let fetcher = GitFetcher::new(&config.fetch);

    let orchestrator =
        build_orchestrator(&config, store, Arc::new(fetcher), Arc::new(runtime));
    let app = build_router(Arc::new(AppState { orchestrator }));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        storage = %config.storage.backend,
        image = %config.sandbox.image,
        "repo-scan listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::store::MemoryStore;
    use crate::scan::testing::{FakeFetcher, FakeRuntime};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = ScannerConfig::default();
        let orchestrator = build_orchestrator(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(FakeFetcher::ok()),
            Arc::new(FakeRuntime::new()),
        );
        build_router(Arc::new(AppState { orchestrator }))
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let req = Request::builder()
            .uri("/api/projects")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let req = Request::builder()
            .method("DELETE")
            .uri("/scan")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
