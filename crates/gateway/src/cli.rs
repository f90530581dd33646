//! Command-line surface — `serve` (the default) plus a handful of
//! one-shot overrides. No subcommand tree is needed: this service has a
//! single mode of operation.

use clap::{Parser, Subcommand};

/// pageindex-web — the document-indexing control plane.
#[derive(Debug, Parser)]
#[command(name = "pageindex-web", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the TOML config file (overrides `PAGEINDEX_CONFIG`).
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Override the listen host from the config file.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Override the listen port from the config file.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Override the storage root from the config file.
    #[arg(long, global = true)]
    pub root: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP/SSE server (default when no subcommand is given).
    Serve,
    /// Parse the config file and report any validation issues, without starting the server.
    Validate,
}

/// Load the configuration from `--config`, then `PAGEINDEX_CONFIG`, then
/// `pageindex.toml` by default. Falls back to defaults when the file is
/// absent; any other I/O or parse error is fatal.
pub fn load_config(cli: &Cli) -> anyhow::Result<(pageindex_domain::config::Config, String)> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("PAGEINDEX_CONFIG").ok())
        .unwrap_or_else(|| "pageindex.toml".to_string());

    let mut config = pageindex_domain::config::Config::load(std::path::Path::new(&config_path))?;

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }

    Ok((config, config_path))
}
