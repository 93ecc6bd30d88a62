//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `scan`   | `Scan`           |
//! | `config` | `Config`         |

pub mod config;
pub mod scan;
pub mod serve;

pub use config::cmd_config;
pub use scan::cmd_scan;
pub use serve::cmd_serve;

use anyhow::Result;
use repo_scan::config::ScannerConfig;

use super::Cli;

/// Load the configuration and install the tracing subscriber.
fn load_and_init(cli: &Cli) -> Result<ScannerConfig> {
    let config = ScannerConfig::load(cli.config.as_deref())?;
    repo_scan::logging::init_logging(&config.logging, cli.verbose)?;
    Ok(config)
}
