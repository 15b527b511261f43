use clap::Parser;
use tracing::info;

use switchboard_host::config::HostConfig;
use switchboard_host::host::Host;

/// Switchboard Host - service orchestration and adapter dispatch
#[derive(Parser, Debug)]
#[command(name = "switchboard-host", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Project name (overrides the configured one)
    #[arg(short, long)]
    project: Option<String>,

    /// Unix socket of the sidecar service (overrides the configured one)
    #[arg(short, long)]
    socket: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default_for_project("default"),
    };
    if let Some(project) = args.project {
        config.project_name = project;
    }
    if let Some(socket) = args.socket {
        config.transport.socket_path = Some(socket);
    }

    info!(project = %config.project_name, "🔀 Switchboard host starting");

    let host = Host::new(config).await?;
    host.run().await?;

    Ok(())
}
