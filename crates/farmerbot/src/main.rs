//! Farmerbot binary - run the bot or drive one-off power actions.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use farmerbot::{Config, FarmerBot};
use farmerbot_client::ws::{connect_relay, WsChainManager};
use farmerbot_client::{ChainManager, Identity, Network, RelayBus, RelayNodeClient, RelayReplier};

#[derive(Parser)]
#[command(name = "farmerbot")]
#[command(about = "Run the farmerbot to power-manage the nodes of your farm")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Grid network to use
    #[arg(short, long, global = true, default_value = "main")]
    network: String,

    /// Mnemonic of the farmer account
    #[arg(short, long, global = true, conflicts_with = "seed")]
    mnemonic: Option<String>,

    /// Hex seed of the farmer account
    #[arg(short, long, global = true)]
    seed: Option<String>,

    /// Print debug logs too
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot
    Run {
        /// Config file with the farm, node and power settings (yaml/json/toml)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Power on a node, or all nodes of a farm, then exit
    Start {
        /// A node id, or `all`
        target: StartTarget,

        /// Farm whose nodes to start (required with `all`)
        #[arg(long)]
        farm: Option<u32>,
    },

    /// Print the version
    Version,
}

#[derive(Debug, Clone, Copy)]
enum StartTarget {
    All,
    Node(u32),
}

impl FromStr for StartTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<u32>()
            .map(Self::Node)
            .map_err(|_| format!("expected a node id or 'all', not '{s}'"))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("farmerbot={default_level}"))),
        )
        .init();

    let result = match &cli.command {
        Commands::Run { config } => run(&cli, config.clone()).await,
        Commands::Start { target, farm } => start(&cli, *target, *farm).await,
        Commands::Version => {
            println!("{}", farmerbot::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_identity(cli: &Cli) -> anyhow::Result<Identity> {
    if let Some(mnemonic) = &cli.mnemonic {
        return Identity::from_mnemonic(mnemonic).context("invalid mnemonic");
    }
    if let Some(seed) = &cli.seed {
        return Identity::from_seed_hex(seed).context("invalid seed");
    }
    anyhow::bail!("either --mnemonic or --seed is required")
}

async fn run(cli: &Cli, config_path: PathBuf) -> anyhow::Result<()> {
    let network: Network = cli.network.parse().map_err(anyhow::Error::msg)?;
    let identity = load_identity(cli)?;
    let config = Config::load(&config_path)?;
    let farm_id = config.farm_id;

    let chain_manager: Arc<dyn ChainManager> =
        Arc::new(WsChainManager::new(network.chain_urls(), identity.clone()));

    let session = format!("farmerbot-{farm_id}");
    let (bus, listener) = connect_relay(&network.relay_url(), &session, &identity)
        .await
        .context("could not create the relay peer")?;
    let node_client = Arc::new(RelayNodeClient::new(
        Arc::clone(&bus) as Arc<dyn RelayBus>
    ));

    let bot = FarmerBot::new(config, &identity, chain_manager, node_client).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    bot.run(Box::new(listener), bus as Arc<dyn RelayReplier>, cancel)
        .await?;
    Ok(())
}

async fn start(cli: &Cli, target: StartTarget, farm: Option<u32>) -> anyhow::Result<()> {
    let network: Network = cli.network.parse().map_err(anyhow::Error::msg)?;
    let identity = load_identity(cli)?;

    let manager = WsChainManager::new(network.chain_urls(), identity);
    let chain = manager.connect().await?;

    match target {
        StartTarget::Node(node_id) => {
            chain.set_power_target(node_id, true).await?;
            info!(node_id, "node power target set to up");
        }
        StartTarget::All => {
            let farm_id = farm.context("--farm is required with 'start all'")?;
            for node_id in chain.nodes_in_farm(farm_id).await? {
                chain.set_power_target(node_id, true).await?;
                info!(node_id, "node power target set to up");
            }
        }
    }
    Ok(())
}
