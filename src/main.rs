use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gradio_pages::config::Config;
use gradio_pages::server;

#[derive(Parser)]
#[command(name = "gradio-pages", version, about = "Deploys Gradio apps from Forgejo pushes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the deployment service
    Serve {
        /// HTTP listen port
        #[arg(long)]
        port: Option<u16>,
        /// Base URL of the Forgejo instance
        #[arg(long)]
        forgejo_url: Option<String>,
        /// Directory for clone workspaces
        #[arg(long)]
        app_dir: Option<PathBuf>,
        /// Registry snapshot path
        #[arg(long)]
        state_file: Option<PathBuf>,
        /// First host port eligible for allocation
        #[arg(long)]
        port_start: Option<u16>,
        /// Last host port eligible for allocation
        #[arg(long)]
        port_end: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            port,
            forgejo_url,
            app_dir,
            state_file,
            port_start,
            port_end,
        } => {
            let mut config = Config::from_env()?;
            if let Some(port) = port {
                config.listen_port = port;
            }
            if let Some(url) = forgejo_url {
                config.forgejo_url = url.trim_end_matches('/').to_string();
            }
            if let Some(dir) = app_dir {
                config.app_dir = dir;
            }
            if let Some(path) = state_file {
                config.state_file = path;
            }
            if let Some(start) = port_start {
                config.port_start = start;
            }
            if let Some(end) = port_end {
                config.port_end = end;
            }
            server::start_server(config).await
        }
    }
}
