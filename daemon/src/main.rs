//! strata daemon — entry point for running a strata membership node.

use std::path::PathBuf;

use clap::Parser;

use strata_node::{init_logging, LogFormat, Node, NodeConfig};
use strata_types::NetworkId;

#[derive(Parser)]
#[command(name = "strata-daemon", about = "strata store node daemon")]
struct Cli {
    /// Network to connect to: "live", "test", or "dev".
    /// When a config file is provided, defaults to the file's network value.
    #[arg(long, env = "STRATA_NETWORK")]
    network: Option<String>,

    /// Port for P2P connections (defaults to the network default).
    #[arg(long, env = "STRATA_P2P_PORT")]
    port: Option<u16>,

    /// Address other nodes should dial us at.
    #[arg(long, env = "STRATA_ADVERTISE_IP")]
    advertise_ip: Option<String>,

    /// Bootstrap peer addresses (comma-separated: "1.2.3.4:17171,5.6.7.8:17171").
    #[arg(long, env = "STRATA_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, default_value = "info", env = "STRATA_LOG_LEVEL")]
    log_level: String,

    /// Log format: "human" or "json".
    #[arg(long, default_value = "human", env = "STRATA_LOG_FORMAT")]
    log_format: String,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_network(s: &str) -> NetworkId {
    match s.to_lowercase().as_str() {
        "live" => NetworkId::Live,
        "test" => NetworkId::Test,
        _ => NetworkId::Dev,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config: NodeConfig = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(
            path.to_str()
                .ok_or_else(|| anyhow::anyhow!("config path is not valid UTF-8"))?,
        )?,
        None => NodeConfig::default(),
    };

    let network = cli
        .network
        .as_deref()
        .map(parse_network)
        .unwrap_or(file_config.network);

    let config = NodeConfig {
        network,
        port: cli.port.unwrap_or(if cli.config.is_some() {
            file_config.port
        } else {
            network.default_port()
        }),
        advertise_ip: cli.advertise_ip.unwrap_or(file_config.advertise_ip),
        bootstrap_peers: if cli.bootstrap_peers.is_empty() {
            file_config.bootstrap_peers
        } else {
            cli.bootstrap_peers
        },
        log_level: cli.log_level,
        log_format: cli.log_format,
        ..file_config
    };

    init_logging(LogFormat::parse(&config.log_format), &config.log_level);

    tracing::info!(
        network = config.network.as_str(),
        port = config.port,
        "starting strata node"
    );
    if !config.bootstrap_peers.is_empty() {
        tracing::info!("bootstrap peers: {}", config.bootstrap_peers.join(", "));
    }

    let mut node = Node::new(config).await?;
    node.start().await?;

    node.shutdown().wait_for_signal().await;
    tracing::info!("shutdown signal received — stopping node");
    node.stop().await?;

    tracing::info!("strata daemon exited cleanly");
    Ok(())
}
