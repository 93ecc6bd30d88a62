use std::path::Path;

use async_trait::async_trait;
use git2::{ErrorCode, FetchOptions, Repository, build::RepoBuilder};
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::errors::FetchError;

/// Brings a remote repository into a local workspace.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Clone `url` into `destination`.
    ///
    /// A destination that already holds a repository counts as success.
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError>;
}

/// libgit2-backed fetcher. Clones run on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct GitFetcher {
    shallow: bool,
}

impl GitFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            shallow: config.shallow,
        }
    }

    fn perform_clone(url: &str, destination: &Path, shallow: bool) -> Result<(), FetchError> {
        if Repository::open(destination).is_ok() {
            warn!(
                url = %url,
                path = %destination.display(),
                "Workspace already holds a repository; reusing it"
            );
            return Ok(());
        }

        let mut fetch_options = FetchOptions::new();
        fetch_options.download_tags(git2::AutotagOption::None);
        if shallow {
            fetch_options.depth(1);
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        match builder.clone(url, destination) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Exists => {
                warn!(
                    url = %url,
                    path = %destination.display(),
                    error = %e,
                    "Workspace already exists; treating clone as done"
                );
                Ok(())
            }
            Err(source) => Err(FetchError::Clone {
                url: url.to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::Workspace {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        info!(url = %url, path = %destination.display(), shallow = self.shallow, "Starting git clone");

        let url_owned = url.to_string();
        let dest = destination.to_path_buf();
        let shallow = self.shallow;
        tokio::task::spawn_blocking(move || Self::perform_clone(&url_owned, &dest, shallow))
            .await??;

        debug!(url = %url, path = %destination.display(), "Git clone completed");
        Ok(())
    }
}
