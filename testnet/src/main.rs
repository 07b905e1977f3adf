//! Commonware Testnet CLI

use clap::{Arg, ArgAction, Command};
use commonware_testnet::{
    docker::Docker, network::Network, rpc::Http, CancellationToken, Chain, Config, Error, Image,
    Manifest,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Bring up a chain, wait for a height and tear it down
const RUN_CMD: &str = "run";

/// Remove containers and networks left behind by a chain
const CLEAN_CMD: &str = "clean";

/// Entrypoint for the Commonware Testnet CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("testnet")
        .version(crate_version())
        .about("Bootstrap ephemeral multi-node chains in containers.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(RUN_CMD)
                .about("Start a chain described by a YAML manifest, wait until every node reaches the target height, then tear it down.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML manifest")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new(CLEAN_CMD)
                .about("Remove all containers and the network left behind by a chain.")
                .arg(
                    Arg::new("chain-id")
                        .long("chain-id")
                        .required(true)
                        .help("Chain ID the network name is derived from")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    Arg::new("network")
                        .long("network")
                        .help("Network name (defaults to <chain-id>-network)")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    match matches.subcommand() {
        Some((RUN_CMD, matches)) => {
            let path = matches.get_one::<PathBuf>("config").unwrap();
            if let Err(e) = run(path).await {
                error!(error=?e, "failed to run chain");
                return std::process::ExitCode::FAILURE;
            }
        }
        Some((CLEAN_CMD, matches)) => {
            let chain_id = matches.get_one::<String>("chain-id").unwrap();
            let network = matches.get_one::<String>("network");
            if let Err(e) = clean(chain_id, network.map(String::as_str)).await {
                error!(error=?e, "failed to clean chain");
                return std::process::ExitCode::FAILURE;
            }
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
            return std::process::ExitCode::FAILURE;
        }
        None => {
            error!("no subcommand provided");
            return std::process::ExitCode::FAILURE;
        }
    }
    std::process::ExitCode::SUCCESS
}

/// Bring up the chain described by the manifest at `path`.
///
/// The chain is torn down whether or not it reached the target height.
async fn run(path: &Path) -> Result<(), Error> {
    let contents = tokio::fs::read_to_string(path).await?;
    let manifest: Manifest = serde_yaml::from_str(&contents)?;
    let config = manifest.config()?;
    info!(
        chain_id = config.chain_id.as_str(),
        validators = manifest.validators,
        full_nodes = manifest.full_nodes,
        height = manifest.height,
        "loaded manifest"
    );

    // Cancel everything on ctrl-c
    let token = CancellationToken::new();
    let canceler = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received interrupt, canceling");
            canceler.cancel();
        }
    });

    let mut chain = Chain::new(Docker::default(), Http::default(), config).await?;
    let result = bring_up(&mut chain, &manifest, &token).await;
    let teardown = chain.teardown().await;
    result.and(teardown)
}

async fn bring_up(
    chain: &mut Chain<Docker, Http>,
    manifest: &Manifest,
    token: &CancellationToken,
) -> Result<(), Error> {
    for _ in 0..manifest.validators {
        chain.add_node(true)?;
    }
    for _ in 0..manifest.full_nodes {
        chain.add_node(false)?;
    }
    chain.initialize(token).await?;
    chain.create_genesis_default(token).await?;
    chain.start(token).await?;
    chain.wait_for_height(manifest.height, token).await?;
    for (node, hash) in chain.genesis_hashes().await? {
        info!(node = node.as_str(), hash = hash.as_str(), "final genesis");
    }
    Ok(())
}

/// Remove everything left attached to the network of `chain_id`.
async fn clean(chain_id: &str, network: Option<&str>) -> Result<(), Error> {
    let mut config = Config::new(chain_id, Image::gaia());
    if let Some(network) = network {
        config = config.with_network(network);
    }
    let mut network = Network::new(Docker::default(), &config);
    network.reset().await?;
    info!(network = network.name(), "cleaned");
    Ok(())
}
