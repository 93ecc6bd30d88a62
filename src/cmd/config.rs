//! Configuration view and validation commands: `repo-scan config`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use repo_scan::config::{CONFIG_FILE_NAME, ScannerConfig};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = ScannerConfig::load(cli.config.as_deref())?;
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found; showing defaults", config_path.display());
            }
            println!("# Effective values (with REPO_SCAN_* overrides)");
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let config = ScannerConfig::load(cli.config.as_deref())?;
            let report = config.validate();

            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            for error in &report.errors {
                println!("error: {}", error);
            }
            if !report.is_ok() {
                bail!(
                    "Configuration is invalid ({} error(s))",
                    report.errors.len()
                );
            }
            println!("Configuration is valid.");
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                println!(
                    "{} already exists. Use --force to overwrite it.",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            let contents = ScannerConfig::default().to_toml()?;
            std::fs::write(&config_path, contents)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
