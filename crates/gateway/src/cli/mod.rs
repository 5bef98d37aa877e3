//! Command-line entry points. `serve` (the default) starts the HTTP
//! gateway; `config` inspects the TOML file without starting a server.

pub mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use gw_domain::config::Config;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "Multi-model comparison gateway")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Inspect the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the config and print every issue found.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load and parse the config file named by `--config`. Missing file is
/// an error — there is no builtin default deployment is expected to work
/// against (at least one LLM provider must be named explicitly).
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config = toml::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(config)
}
