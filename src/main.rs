//! catalog-node: peer-to-peer package catalog daemon
//!
//! Without a subcommand the node runs until interrupted: it crawls peers,
//! reconciles votes and serves the HTTP API. With a subcommand it opens the
//! same node, performs one operation, prints the result as JSON and exits.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use catalog_node::execution::CapabilityRegistry;
use catalog_node::{api, Config, Identifier, Node, NodeHandle};

#[derive(Parser)]
#[command(name = "catalog-node")]
#[command(about = "Peer-to-peer package catalog node")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "catalog-node.toml")]
    config: PathBuf,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "CATALOG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Publish package/<name> and add it to the catalog
    Create { name: String },
    /// Add the built-in test package to the catalog
    CreateTest,
    /// List the catalog
    List,
    /// Show one catalog entry
    Get(IdArgs),
    /// Catalog a package learned about out of band
    Register {
        #[command(flatten)]
        id: IdArgs,
        /// Package name used to fetch it
        #[arg(long)]
        name: Option<String>,
    },
    /// Download and install a cataloged package
    Download(IdArgs),
    /// Run an installed package
    Run(IdArgs),
    /// Vote for a cataloged package
    Vote(IdArgs),
    /// List cached packages
    Cache,
    /// List installed packages
    Library,
    /// Reconcile vote tallies against the ledger
    Reconcile,
    /// Crawl every configured peer once
    Crawl,
}

#[derive(clap::Args)]
struct IdArgs {
    /// Creator public key (hex)
    creator: String,
    /// Content hash
    content_hash: String,
}

impl IdArgs {
    fn identifier(&self) -> anyhow::Result<Identifier> {
        Identifier::parse(&self.creator, &self.content_hash)
            .with_context(|| format!("invalid creator key {:?}", self.creator))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("catalog_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }

    info!("Data dir: {}", config.data_dir().display());

    let api_config = config.api.clone();
    let node = Node::open(config, CapabilityRegistry::default())?;
    let handle = node.handle();
    let node_task = tokio::spawn(node.run());

    match cli.command {
        Some(command) => {
            let result = execute(&handle, command).await;
            handle.shutdown();
            node_task.await??;
            println!("{}", result?);
        }
        None => {
            if api_config.enabled {
                let api_handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = api::serve(api_handle, api_config.http_port).await {
                        error!(error = %e, "HTTP API stopped");
                    }
                });
            }

            tokio::signal::ctrl_c().await?;
            info!("Interrupted, shutting down");
            handle.shutdown();
            node_task.await??;
        }
    }

    Ok(())
}

async fn execute(node: &NodeHandle, command: Command) -> anyhow::Result<String> {
    match command {
        Command::Create { name } => to_json(&node.create(&name).await?),
        Command::CreateTest => to_json(&node.create_test().await?),
        Command::List => to_json(&node.list()?),
        Command::Get(args) => to_json(&node.get(&args.identifier()?)?),
        Command::Register { id, name } => to_json(&node.register(id.identifier()?, name).await?),
        Command::Download(args) => to_json(&node.download(args.identifier()?).await?),
        Command::Run(args) => to_json(&node.run_package(args.identifier()?).await?),
        Command::Vote(args) => to_json(&node.vote(args.identifier()?).await?),
        Command::Cache => to_json(&node.list_cache()?),
        Command::Library => to_json(&node.list_library()?),
        Command::Reconcile => to_json(&node.reconcile().await?),
        Command::Crawl => to_json(&node.crawl().await?),
    }
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
