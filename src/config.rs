//! Configuration for repo-scan.
//!
//! Settings are read from `repo-scan.toml` (or the path given with
//! `--config`), then overridden by `REPO_SCAN_*` environment variables, then
//! by CLI flags. Every field has a default, so a missing file is fine.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [storage]
//! backend = "sqlite"        # memory | sqlite | redis
//! path = "repo-scan.db"
//! host = "127.0.0.1"        # redis only
//! port = 6379
//! db = 0
//! key_prefix = "scan:"
//!
//! [workspace]
//! root = "/tmp/src"
//! cleanup = false
//!
//! [fetch]
//! shallow = false
//!
//! [sandbox]
//! image = "opensorcery/bandit"
//! args = ["-f", "json", "-r", "/code"]
//! mount_path = "/code"
//! working_dir = "/code"
//! wait_timeout_secs = 900   # omit to wait forever
//!
//! [classifier]
//! severity_field = "SEVERITY.HIGH"
//! insecure_above = 1
//!
//! [pipeline]
//! max_concurrent_scans = 4  # 0 = no limit: one task per submission, started at once
//!
//! [logging]
//! format = "pretty"         # pretty | json
//! filter = "info"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "repo-scan.toml";

const ENV_PREFIX: &str = "REPO_SCAN_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which `JobStore` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
    Redis,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
            StorageBackend::Redis => write!(f, "redis"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sqlite" => Ok(StorageBackend::Sqlite),
            "redis" => Ok(StorageBackend::Redis),
            _ => bail!(
                "Invalid storage backend '{}'. Valid values: memory, sqlite, redis",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("repo-scan.db")
}

fn default_redis_port() -> u16 {
    6379
}

fn default_key_prefix() -> String {
    "scan:".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
            host: default_host(),
            port: default_redis_port(),
            db: 0,
            username: String::new(),
            password: String::new(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl StorageConfig {
    /// Redis connection parameters. Credentials are passed as fields, never
    /// spliced into a URL, so any byte sequence is a valid password.
    pub fn redis_connection_info(&self) -> ConnectionInfo {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                username: non_empty(&self.username),
                password: non_empty(&self.password),
                ..Default::default()
            },
        }
    }

    /// `host:port/db` for log lines. Never includes credentials.
    pub fn redis_endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Parent directory of per-job clones (`<root>/<job id>`).
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Delete the job's workspace once the pipeline finishes.
    #[serde(default)]
    pub cleanup: bool,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/tmp/src")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            cleanup: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    /// Clone with depth 1.
    #[serde(default)]
    pub shallow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Where the workspace is bound inside the container.
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    #[serde(default = "default_mount_path")]
    pub working_dir: String,
    /// Upper bound on the container wait. `None` waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_secs: Option<u64>,
}

fn default_image() -> String {
    "opensorcery/bandit".to_string()
}

fn default_args() -> Vec<String> {
    ["-f", "json", "-r", "/code"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_mount_path() -> String {
    "/code".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            args: default_args(),
            mount_path: default_mount_path(),
            working_dir: default_mount_path(),
            wait_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    /// Key under `metrics._totals` holding the severity count.
    #[serde(default = "default_severity_field")]
    pub severity_field: String,
    /// A count strictly above this marks the scan insecure.
    #[serde(default = "default_insecure_above")]
    pub insecure_above: f64,
}

fn default_severity_field() -> String {
    "SEVERITY.HIGH".to_string()
}

fn default_insecure_above() -> f64 {
    1.0
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            severity_field: default_severity_field(),
            insecure_above: default_insecure_above(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Pipelines allowed to run at once. 0 removes the limit.
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,
}

fn default_max_concurrent_scans() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: default_max_concurrent_scans(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScannerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Outcome of `ScannerConfig::validate`.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ScannerConfig {
    /// Parse a TOML file. Fields missing from the file keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load from `path`, or from `repo-scan.toml` in the working directory
    /// when no path is given, then apply environment overrides.
    ///
    /// An explicit path must exist; the implicit default may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `REPO_SCAN_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(backend) = var("STORAGE") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = var("DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(host) = var("REDIS_HOST") {
            self.storage.host = host;
        }
        if let Some(port) = var("REDIS_PORT") {
            self.storage.port = parse_env("REDIS_PORT", &port)?;
        }
        if let Some(password) = var("REDIS_PASSWORD") {
            self.storage.password = password;
        }
        if let Some(root) = var("WORKSPACE") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(image) = var("IMAGE") {
            self.sandbox.image = image;
        }
        if let Some(format) = var("LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.server.port == 0 {
            report.errors.push("server.port must be non-zero".into());
        }
        if self.sandbox.image.trim().is_empty() {
            report.errors.push("sandbox.image must not be empty".into());
        }
        if !self.sandbox.mount_path.starts_with('/') {
            report
                .errors
                .push("sandbox.mount_path must be an absolute container path".into());
        }
        if !self.classifier.insecure_above.is_finite() {
            report
                .errors
                .push("classifier.insecure_above must be a finite number".into());
        }

        if self.workspace.root.is_relative() {
            report.warnings.push(format!(
                "workspace.root '{}' is relative; docker bind mounts need an absolute host path",
                self.workspace.root.display()
            ));
        }
        if self.sandbox.args.is_empty() {
            report
                .warnings
                .push("sandbox.args is empty; the image's default command will run".into());
        }
        if self.sandbox.wait_timeout_secs.is_none() {
            report.warnings.push(
                "sandbox.wait_timeout_secs is unset; a wedged analyzer blocks its scan forever"
                    .into(),
            );
        }
        if self.pipeline.max_concurrent_scans == 0 {
            report.warnings.push(
                "pipeline.max_concurrent_scans = 0; every submission starts a container immediately"
                    .into(),
            );
        }
        if self.storage.backend == StorageBackend::Redis
            && !self.storage.password.is_empty()
            && self.storage.username.is_empty()
        {
            report
                .warnings
                .push("storage.password is set without storage.username; using default user".into());
        }

        report
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {}{}='{}': {}", ENV_PREFIX, name, value, e))
}
