//! Mesh overlay node binary.
//!
//! Joins the peer mesh, broadcasts stdin lines to every peer and prints what
//! the peers send.

use tracing_subscriber::EnvFilter;

use mesh_node::cli::Cli;
use mesh_node::config::NodeConfig;
use mesh_node::node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging. Logs go to stderr so stdout only carries peer data.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("Mesh Node v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = NodeConfig::from_cli(&cli)?;

    // Create and run node
    let node = Node::new(config)?;
    node.run().await?;

    // A pending stdin read would otherwise keep the runtime alive.
    std::process::exit(0);
}
