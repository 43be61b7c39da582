use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mediahound")]
#[command(about = "Find, fetch and convert media embedded in web pages", long_about = None)]
pub struct Cli {
    /// Config file (defaults to $MEDIAHOUND_CONFIG or config/mediahound.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
    /// Discover media on one page and print the ranked candidates as JSON
    Discover(DiscoverArgs),
    /// Report which discoverer would be used and whether ffmpeg is available
    Probe,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct DiscoverArgs {
    /// Page to inspect
    pub url: String,
}
