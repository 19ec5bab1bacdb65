use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::speedtest::RunConfig;

pub const DEFAULT_PING_URL: &str = "https://speed.cloudflare.com/__down?bytes=0";
pub const DEFAULT_DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down?bytes=10485760";
pub const DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

#[derive(Debug, Parser)]
#[command(name = "netgauge", version, about = "Network latency and throughput estimator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Mode>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Measure latency, download and upload (default)
    Run(RunArgs),
    /// Serve the echo, payload source and payload sink endpoints
    Serve(ServeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Latency echo endpoint (answers bodyless HEAD requests)
    #[arg(long, env = "NETGAUGE_PING_URL", default_value = DEFAULT_PING_URL)]
    pub ping_url: String,

    /// Payload source endpoint (streams filler bytes)
    #[arg(long, env = "NETGAUGE_DOWNLOAD_URL", default_value = DEFAULT_DOWNLOAD_URL)]
    pub download_url: String,

    /// Payload sink endpoint (accepts and discards uploads)
    #[arg(long, env = "NETGAUGE_UPLOAD_URL", default_value = DEFAULT_UPLOAD_URL)]
    pub upload_url: String,

    /// Base URL of a `netgauge serve` instance; overrides the three endpoints
    #[arg(long, env = "NETGAUGE_SERVER")]
    pub server: Option<String>,

    /// Print plain progress lines instead of the terminal UI
    #[arg(long)]
    pub headless: bool,

    /// Write logs to this file (the terminal UI owns stdout/stderr)
    #[arg(long, env = "NETGAUGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "NETGAUGE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,
}

impl RunArgs {
    pub fn run_config(&self) -> RunConfig {
        match &self.server {
            Some(base) => RunConfig::from_server(base),
            None => RunConfig::new(&self.ping_url, &self.download_url, &self.upload_url),
        }
    }
}

impl Cli {
    /// The selected mode; bare `netgauge` means `netgauge run`.
    pub fn mode(self) -> Mode {
        self.command.unwrap_or(Mode::Run(self.run))
    }
}
