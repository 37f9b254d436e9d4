use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "caddyctl", about = "Manage a local Caddy reverse proxy", version)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show server status and configured sites
    Status,
    /// Start the Caddy server
    Start,
    /// Stop the Caddy server
    Stop,
    /// Restart the Caddy server so it re-reads its configuration
    Restart,
    /// List configured sites with upstream reachability
    #[command(visible_alias = "sites")]
    List,
    /// Add a site that reverse-proxies a local port
    Add {
        /// Domain to serve, e.g. myapp.localhost. Defaults to
        /// `<project dirname>.localhost` when --project is given.
        domain: Option<String>,
        /// Local port to proxy to. Defaults to the project's .env PORT.
        #[arg(short, long)]
        port: Option<u16>,
        /// Project directory whose .env file should carry the port
        #[arg(long)]
        project: Option<PathBuf>,
        /// Write the configuration but skip the server reload step
        #[arg(long)]
        no_reload: bool,
    },
    /// Remove a site by domain
    #[command(visible_alias = "rm")]
    Remove {
        domain: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Write the configuration but skip the server reload step
        #[arg(long)]
        no_reload: bool,
    },
}
