//! Scan service: sandboxed static analysis of remote repositories.
//!
//! ## Overview
//!
//! A client submits a repository URL and gets a job id back immediately.
//! In the background the repository is cloned into a per-job workspace, an
//! analyzer container runs over it, and the analyzer's JSON report is turned
//! into a secure/insecure verdict. Clients poll the job until it is `done`
//! or `error`.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (router, TraceLayer, start_server)   │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         │ ScanOrchestrator::submit()             │
//!                       │         v                                        │
//!                       │  pipeline.rs  (dispatcher, per-job task)         │
//!                       │         │                                        │
//!                       │         │ SourceFetcher::fetch()                 │
//!                       │         v                                        │
//!                       │  fetcher.rs   (GitFetcher, libgit2)              │
//!                       │         │                                        │
//!                       │         │ SandboxRunner::run()                   │
//!                       │         v                                        │
//!                       │  sandbox.rs   (ContainerRuntime trait)           │
//!                       │    └─ docker.rs  (DockerRuntime, bollard)        │
//!                       │         │                                        │
//!                       │         │ Classifier::classify()                 │
//!                       │         v                                        │
//!                       │  classifier.rs  (Verdict)                        │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | `Job`, `JobStatus`, source URL validation               |
//! | `store`       | `JobStore` trait, `MemoryStore`, backend selection      |
//! | `db`          | SQLite backend; queries run on blocking threads         |
//! | `redis_store` | Redis-compatible backend over a `ConnectionManager`     |

pub mod api;
pub mod classifier;
pub mod db;
pub mod docker;
pub mod fetcher;
pub mod models;
pub mod pipeline;
pub mod redis_store;
pub mod sandbox;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
