//! In-process doubles for the container runtime and source fetcher.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::fetcher::SourceFetcher;
use super::sandbox::{ContainerRuntime, ContainerSpec};
use crate::errors::FetchError;

/// Stdout shaped like a bandit run: log preamble followed by the report.
pub fn bandit_output(high: f64) -> Vec<u8> {
    let report = serde_json::json!({
        "errors": [],
        "results": [],
        "metrics": {
            "_totals": {
                "SEVERITY.HIGH": high,
                "SEVERITY.MEDIUM": 0.0,
                "SEVERITY.LOW": 0.0,
                "loc": 12
            }
        }
    });
    format!("[main]\tINFO\tprofile include tests: None\n{}\n", report).into_bytes()
}

/// Records every call as `"<op> <arg>"`. Ops named in `fail_on` return an
/// error; ops named in `panic_on` panic after being recorded.
pub struct FakeRuntime {
    calls: Mutex<Vec<String>>,
    created: AtomicUsize,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
    image_present: bool,
    stdout: Vec<u8>,
    routes: Vec<(String, Vec<u8>)>,
    assigned: Mutex<HashMap<String, Vec<u8>>>,
    exit_code: i64,
    wait_delay: Option<Duration>,
    wait_gate: Option<std::sync::Arc<Semaphore>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            image_present: false,
            stdout: bandit_output(0.0),
            routes: Vec::new(),
            assigned: Mutex::new(HashMap::new()),
            exit_code: 0,
            wait_delay: None,
            wait_gate: None,
        }
    }

    pub fn with_image_present(mut self) -> Self {
        self.image_present = true;
        self
    }

    pub fn with_stdout(mut self, stdout: Vec<u8>) -> Self {
        self.stdout = stdout;
        self
    }

    /// Containers whose mounted `app.py` contains `marker` print `stdout`
    /// instead of the default output.
    pub fn with_stdout_for(mut self, marker: &str, stdout: Vec<u8>) -> Self {
        self.routes.push((marker.to_string(), stdout));
        self
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = Some(delay);
        self
    }

    /// `wait_container` blocks until a permit is available on `gate`.
    pub fn with_wait_gate(mut self, gate: std::sync::Arc<Semaphore>) -> Self {
        self.wait_gate = Some(gate);
        self
    }

    pub fn fail_on(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn panic_on(mut self, op: &'static str) -> Self {
        self.panicking.insert(op);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{op} ");
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn routed_stdout(&self, spec: &ContainerSpec) -> Option<Vec<u8>> {
        // binds are `host:container:rw`
        let host = spec.binds.first()?.rsplitn(3, ':').nth(2)?;
        let source = std::fs::read_to_string(Path::new(host).join("app.py")).ok()?;
        self.routes
            .iter()
            .find(|(marker, _)| source.contains(marker.as_str()))
            .map(|(_, stdout)| stdout.clone())
    }

    fn record(&self, op: &'static str, arg: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("{op} {arg}"));
        if self.panicking.contains(op) {
            panic!("{op} blew up in fake runtime");
        }
        if self.failing.contains(op) {
            return Err(anyhow!("{op} refused by fake runtime"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> anyhow::Result<bool> {
        self.record("image_exists", image)?;
        Ok(self.image_present)
    }

    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        self.record("pull", image)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> anyhow::Result<String> {
        self.record("create", &spec.image)?;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("c-{n}");
        if let Some(stdout) = self.routed_stdout(spec) {
            self.assigned.lock().unwrap().insert(id.clone(), stdout);
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        self.record("start", id)
    }

    async fn wait_container(&self, id: &str) -> anyhow::Result<i64> {
        self.record("wait", id)?;
        if let Some(delay) = self.wait_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = &self.wait_gate {
            gate.acquire().await?.forget();
        }
        Ok(self.exit_code)
    }

    async fn stdout(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        self.record("stdout", id)?;
        let assigned = self.assigned.lock().unwrap().get(id).cloned();
        Ok(assigned.unwrap_or_else(|| self.stdout.clone()))
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        self.record("remove", id)
    }
}

/// Creates the destination directory with an `app.py` naming the source
/// URL, or fails every call.
pub struct FakeFetcher {
    fail: bool,
    panic: bool,
}

impl FakeFetcher {
    pub fn ok() -> Self {
        Self {
            fail: false,
            panic: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            panic: false,
        }
    }

    pub fn panicking() -> Self {
        Self {
            fail: false,
            panic: true,
        }
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        if self.panic {
            panic!("fetcher exploded on {url}");
        }
        if self.fail {
            return Err(FetchError::Clone {
                url: url.to_string(),
                source: git2::Error::from_str("repository not found"),
            });
        }
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|source| FetchError::Workspace {
                path: destination.to_path_buf(),
                source,
            })?;
        let source = format!("# {url}\nprint('hi')\n");
        tokio::fs::write(destination.join("app.py"), source)
            .await
            .map_err(|source| FetchError::Workspace {
                path: destination.to_path_buf(),
                source,
            })
    }
}
