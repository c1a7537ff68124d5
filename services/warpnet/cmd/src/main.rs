//! WARPNet command-line tool.
//!
//! Brings up the nodes listed in the configuration file, reports what they
//! are, and sends simple management commands.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wn_node::{
    format_hw_addr, NetworkSettings, Node, NodeFactory, NodeInfo, NodeInit, NodeKindRegistry,
    UdpConfig, UdpConnector,
};

#[macro_use]
mod logging;
mod config;

use config::WarpnetConfig;
use logging::WnLogFormatter;

/// WARPNet node management tool
#[derive(Parser, Debug)]
#[command(name = "warpnet", version, about = "Discover and manage WARPNet nodes")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "warpnet.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Receive timeout, e.g. 500ms (overrides the configuration)
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the node-type registry
    Types,
    /// Bring up and configure every configured node
    Init {
        /// Print the node summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Make one configured node identify itself
    Identify {
        /// Serial number of the node
        #[arg(long)]
        serial: u32,
    },
}

/// Summary of one configured node
#[derive(Debug, Serialize)]
struct NodeSummary {
    kind: String,
    #[serde(flatten)]
    info: NodeInfo,
    ip_address: Option<String>,
    hw_addr: Option<String>,
    max_payload: Option<usize>,
}

impl NodeSummary {
    fn from_node(node: &Node) -> Self {
        let transport = node.transport();
        Self {
            kind: node.kind_name().to_string(),
            info: node.info().clone(),
            ip_address: transport
                .and_then(|t| t.remote_addr())
                .map(|a| a.ip().to_string()),
            hw_addr: transport
                .and_then(|t| t.params().hw_addr)
                .map(format_hw_addr),
            max_payload: transport.map(|t| t.max_payload()),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("warpnet={}", args.log_level).parse()?)
        .add_directive(format!("wn_node={}", args.log_level).parse()?)
        .add_directive(format!("wn_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(WnLogFormatter::new("warpnet".to_string()))
        .init();

    info!("Starting WARPNet tool v{}", env!("CARGO_PKG_VERSION"));

    let mut config = WarpnetConfig::load_from_file(&args.config)?;
    if let Some(timeout) = args.timeout {
        config.network.timeout_ms = timeout.as_millis() as u64;
    }

    let registry = NodeKindRegistry::with_defaults();
    let connector = Arc::new(UdpConnector::new(UdpConfig::from_config(&config)?));
    let factory = NodeFactory::new(
        &config,
        &registry,
        connector,
        NetworkSettings::from_config(&config),
    );

    match args.command {
        Commands::Types => print_types(&factory),
        Commands::Init { json } => init_nodes(&factory, &config, json).await?,
        Commands::Identify { serial } => identify(&factory, &config, serial).await?,
    }

    Ok(())
}

fn print_types(factory: &NodeFactory) {
    println!("WARPNet Node Types:");
    for (type_code, name) in factory.node_types() {
        println!("    {:#010x} = {}", type_code, name);
    }
}

async fn init_nodes(
    factory: &NodeFactory,
    config: &WarpnetConfig,
    json: bool,
) -> anyhow::Result<()> {
    let inits = config.node_inits();
    if inits.is_empty() {
        component_warn!("init", "No nodes configured in the configuration file");
    }

    let mut nodes = Vec::new();
    for init in &inits {
        match bring_up(factory, init, config.network.jumbo_frames).await {
            Ok(node) => nodes.push(node),
            Err(e) => component_error!(
                "init",
                "Unable to initialize node W3-a-{:05}: {:#}",
                init.serial_number,
                e
            ),
        }
    }

    component_info!("init", "Initialized {} of {} nodes", nodes.len(), inits.len());

    let summaries: Vec<_> = nodes.iter().map(NodeSummary::from_node).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            println!(
                "{} [{}] {}",
                summary.info,
                summary.kind,
                summary.info.description.as_deref().unwrap_or("")
            );
        }
    }

    for node in &mut nodes {
        node.close();
    }
    Ok(())
}

async fn bring_up(factory: &NodeFactory, init: &NodeInit, jumbo: bool) -> anyhow::Result<Node> {
    let mut node = factory.create_node(init).await?;
    component_debug!("init", "Configuring {}", node);
    if let Err(e) = node.configure_node(jumbo).await {
        node.close();
        return Err(e).with_context(|| format!("configuring {}", node));
    }
    Ok(node)
}

async fn identify(
    factory: &NodeFactory,
    config: &WarpnetConfig,
    serial: u32,
) -> anyhow::Result<()> {
    let init = config
        .node_inits()
        .into_iter()
        .find(|init| init.serial_number == serial)
        .ok_or_else(|| anyhow!("node W3-a-{:05} is not in the configuration", serial))?;

    let mut node = factory.create_node(&init).await?;
    node.identify().await?;
    component_info!("identify", "Sent identify to {}", node);
    node.close();
    Ok(())
}
