//! Chain, image and manifest configuration.

use crate::{
    retry::{Backoff, RetryPolicy},
    Error,
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Port every node listens on for peer connections.
pub const P2P_PORT: u16 = 26656;

/// Container port (and protocol) that exposes the status RPC.
pub const RPC_PORT: &str = "26657/tcp";

/// Label key attached to every network and container created for a chain.
const DEFAULT_LABEL_KEY: &str = "commonware-testnet";

/// Number of status queries made while waiting for a target height.
pub const HEIGHT_ATTEMPTS: usize = 15;

/// Number of attempts made to read a key after it was created.
pub const KEY_ATTEMPTS: usize = 10;

/// Container image (and the chain binary inside it) used by every node of a chain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub repository: String,
    pub version: String,
    pub bin: String,
    pub ports: Vec<String>,
}

impl Image {
    /// Gaia (Cosmos Hub) image published by heighliner.
    pub fn gaia() -> Self {
        Self {
            repository: "ghcr.io/strangelove-ventures/heighliner/gaia".into(),
            version: "v5.0.7".into(),
            bin: "gaiad".into(),
            ports: vec![
                "26656/tcp".into(),
                RPC_PORT.into(),
                "9090/tcp".into(),
                "1337/tcp".into(),
                "1234/tcp".into(),
            ],
        }
    }

    /// Home directory of the chain binary inside the container.
    pub fn home(&self) -> String {
        format!("/home/{}", self.bin)
    }
}

/// Amounts used when registering genesis accounts and self-delegations.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GenesisConfig {
    pub account_balance: String,
    pub self_delegation: String,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            account_balance: "1000000000000stake".into(),
            self_delegation: "100000000000stake".into(),
        }
    }
}

/// Consensus timeouts written into every node's configuration.
///
/// Shorter than the binary's defaults so blocks are produced quickly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusConfig {
    pub timeout_commit: Duration,
    pub timeout_propose: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            timeout_commit: Duration::from_secs(3),
            timeout_propose: Duration::from_secs(3),
        }
    }
}

/// Configuration of a single chain.
///
/// Everything that could collide between chains running in the same process (network name,
/// labels, directories) is derived from `chain_id` instead of being global.
#[derive(Clone, Debug)]
pub struct Config {
    /// Identity of the chain (unique per test run).
    pub chain_id: String,

    /// Image every node runs.
    pub image: Image,

    /// Name of the container network shared by all nodes of the chain.
    pub network: String,

    /// Label key attached to the network and containers (the value is the chain ID).
    pub label_key: String,

    /// Directory under which the chain's root directory is created (defaults to `<cwd>/tmp`).
    pub root: Option<PathBuf>,

    /// Keep the root directory after teardown.
    pub keep_data: bool,

    /// Genesis amounts.
    pub genesis: GenesisConfig,

    /// Consensus timeouts.
    pub consensus: ConsensusConfig,

    /// Delay between starting a node and the first status query.
    pub warmup: Duration,

    /// Time given to a node to stop before it is killed.
    pub stop_timeout: Duration,

    /// Retry policy used to verify a freshly started node (unbounded).
    pub readiness: RetryPolicy,

    /// Retry policy used while waiting for a target height.
    pub height: RetryPolicy,

    /// Retry policy used to read a key after it was created.
    pub keys: RetryPolicy,
}

impl Config {
    /// Returns the default configuration for `chain_id`.
    pub fn new(chain_id: &str, image: Image) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            image,
            network: format!("{chain_id}-network"),
            label_key: DEFAULT_LABEL_KEY.to_string(),
            root: None,
            keep_data: false,
            genesis: GenesisConfig::default(),
            consensus: ConsensusConfig::default(),
            warmup: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
            readiness: RetryPolicy::unbounded(Backoff::new(
                Duration::from_millis(100),
                Duration::from_secs(10),
            )),
            height: RetryPolicy::bounded(
                HEIGHT_ATTEMPTS,
                Backoff::new(Duration::from_millis(100), Duration::from_secs(30)),
            ),
            keys: RetryPolicy::bounded(
                KEY_ATTEMPTS,
                Backoff::new(Duration::from_millis(100), Duration::from_secs(5)),
            ),
        }
    }

    pub fn with_network(mut self, network: &str) -> Self {
        self.network = network.to_string();
        self
    }

    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_keep_data(mut self, keep_data: bool) -> Self {
        self.keep_data = keep_data;
        self
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_height_policy(mut self, policy: RetryPolicy) -> Self {
        self.height = policy;
        self
    }

    /// Ensures the configuration can be used to construct a chain.
    pub fn validate(&self) -> Result<(), Error> {
        if self.chain_id.is_empty() {
            return Err(Error::Config("chain ID must not be empty".into()));
        }
        if self.network.is_empty() {
            return Err(Error::Config("network name must not be empty".into()));
        }
        if self.image.bin.is_empty() {
            return Err(Error::Config("image binary must not be empty".into()));
        }
        if !self.image.ports.iter().any(|port| port == RPC_PORT) {
            return Err(Error::Config(format!(
                "image must expose the rpc port ({RPC_PORT})"
            )));
        }
        Ok(())
    }
}

/// Description of a chain to bring up from the command line.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Manifest {
    pub chain_id: String,
    pub image: Image,
    pub validators: usize,
    #[serde(default)]
    pub full_nodes: usize,
    pub height: i64,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub keep_data: bool,
    #[serde(default)]
    pub genesis: Option<GenesisConfig>,
    #[serde(default)]
    pub timeout_commit_ms: Option<u64>,
    #[serde(default)]
    pub timeout_propose_ms: Option<u64>,
}

impl Manifest {
    /// Converts the manifest into a chain [Config].
    pub fn config(&self) -> Result<Config, Error> {
        if self.validators == 0 {
            return Err(Error::Config("at least one validator is required".into()));
        }
        let mut config = Config::new(&self.chain_id, self.image.clone())
            .with_keep_data(self.keep_data);
        if let Some(network) = &self.network {
            config = config.with_network(network);
        }
        if let Some(root) = &self.root {
            config = config.with_root(root.clone());
        }
        if let Some(genesis) = &self.genesis {
            config.genesis = genesis.clone();
        }
        if let Some(ms) = self.timeout_commit_ms {
            config.consensus.timeout_commit = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_propose_ms {
            config.consensus.timeout_propose = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_derived_from_chain_id() {
        let config = Config::new("ibc-test-1", Image::gaia());
        assert_eq!(config.network, "ibc-test-1-network");
        assert_eq!(config.label_key, DEFAULT_LABEL_KEY);
        assert_eq!(config.height.attempts, Some(HEIGHT_ATTEMPTS));
        assert_eq!(config.readiness.attempts, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_rpc_port() {
        let mut image = Image::gaia();
        image.ports.retain(|port| port != RPC_PORT);
        let config = Config::new("ibc-test-1", image);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_manifest_from_yaml() {
        let yaml = r#"
chain_id: ibc-test-2
image:
  repository: ghcr.io/strangelove-ventures/heighliner/gaia
  version: v5.0.7
  bin: gaiad
  ports: ["26656/tcp", "26657/tcp"]
validators: 3
full_nodes: 1
height: 10
timeout_commit_ms: 1500
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        let config = manifest.config().unwrap();
        assert_eq!(config.chain_id, "ibc-test-2");
        assert_eq!(config.network, "ibc-test-2-network");
        assert_eq!(config.image.home(), "/home/gaiad");
        assert_eq!(
            config.consensus.timeout_commit,
            Duration::from_millis(1500)
        );
        assert_eq!(config.consensus.timeout_propose, Duration::from_secs(3));
        assert_eq!(manifest.full_nodes, 1);
    }

    #[test]
    fn test_manifest_requires_validator() {
        let manifest = Manifest {
            chain_id: "ibc-test-3".into(),
            image: Image::gaia(),
            validators: 0,
            full_nodes: 2,
            height: 5,
            network: None,
            root: None,
            keep_data: false,
            genesis: None,
            timeout_commit_ms: None,
            timeout_propose_ms: None,
        };
        assert!(matches!(manifest.config(), Err(Error::Config(_))));
    }
}
