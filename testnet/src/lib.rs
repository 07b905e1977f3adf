//! Bootstrap ephemeral multi-node chains inside containers for integration tests.
//!
//! A [Chain] owns an ordered set of [Node]s that share one container network and one host
//! root directory. Bringing a chain up follows a fixed sequence:
//!
//! 1. [Chain::add_node] provisions each node's host home directory.
//! 2. [Chain::initialize] runs `init` (and, for validators, `keys add`) on every node concurrently.
//! 3. [Chain::create_genesis] assembles one genesis document from every validator's gentx and
//!    distributes identical copies to all nodes.
//! 4. [Chain::start] writes each node's configuration (embedding the current peer topology),
//!    starts every node concurrently and waits for each to answer status queries.
//! 5. [Chain::wait_for_height] polls every node until it reports the target height.
//!
//! Containers, status queries and keys are reached through the [ContainerRuntime], [Dialer] and
//! [KeyStore] interfaces. [docker::Docker] and [rpc::Http] drive real containers, while
//! [mocks::Mock] simulates a chain binary on the host filesystem for tests.
//!
//! # Cancellation
//!
//! Every blocking operation takes a [CancellationToken]. Retries observe cancellation and return
//! [Error::Canceled] instead of continuing their backoff. When one task of a concurrent phase
//! fails, the remaining tasks are signaled to stop retrying but are still awaited (never aborted
//! mid-command) before the first error is returned.
//!
//! # Example
//!
//! ```no_run
//! use commonware_testnet::{docker::Docker, rpc::Http, Chain, Config, Image};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), commonware_testnet::Error> {
//! let token = CancellationToken::new();
//! let config = Config::new("ibc-test-1", Image::gaia());
//! let mut chain = Chain::new(Docker::default(), Http::default(), config).await?;
//! for i in 0..4 {
//!     chain.add_node(i < 3)?;
//! }
//! chain.initialize(&token).await?;
//! chain.create_genesis(&chain.validators(), &token).await?;
//! chain.start(&token).await?;
//! chain.wait_for_height(10, &token).await?;
//! chain.teardown().await
//! # }
//! ```

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

pub use tokio_util::sync::CancellationToken;

mod chain;
pub use chain::Chain;
mod config;
pub use config::{ConsensusConfig, Config, GenesisConfig, Image, Manifest, P2P_PORT, RPC_PORT};
pub mod docker;
mod genesis;
pub mod keys;
pub use keys::{Key, KeyStore, VALIDATOR_KEY};
pub mod mocks;
pub mod network;
mod node;
pub use node::{Node, NodeId, Process};
pub mod retry;
pub use retry::{Backoff, RetryPolicy};
pub mod rpc;
pub use rpc::{Dialer, StatusClient, SyncInfo};
mod runtime;
pub use runtime::{ContainerId, ContainerRuntime, Mount, NetworkId, RunSpec};
pub mod topology;
mod utils;
pub use utils::sha256_hex;

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while orchestrating a chain.
#[derive(Error, Debug)]
pub enum Error {
    #[error("resource unavailable: {0}")]
    Resource(String),
    #[error("container runtime failed: {0}")]
    Runtime(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{node} is not owned by chain {chain_id}")]
    NotOwned { chain_id: String, node: String },
    #[error("{node} exited with code {code} running '{command}': {logs}")]
    Process {
        node: String,
        command: String,
        code: i64,
        logs: String,
    },
    #[error("status query to {endpoint} failed: {reason}")]
    Query { endpoint: String, reason: String },
    #[error("{node} still catching up at height {height}")]
    CatchingUp { node: String, height: i64 },
    #[error("{node} at height {height}, waiting for {target}")]
    Behind {
        node: String,
        height: i64,
        target: i64,
    },
    #[error("{node} key {name} unavailable")]
    KeyUnavailable { node: String, name: String },
    #[error("{node} failed to reach height {target} (latest: {latest:?})")]
    HeightTimeout {
        node: String,
        target: i64,
        latest: Option<i64>,
    },
    #[error("genesis mismatch on {node}: expected {expected}, found {found}")]
    GenesisMismatch {
        node: String,
        expected: String,
        found: String,
    },
    #[error("{0} already running")]
    AlreadyRunning(String),
    #[error("{0} not running")]
    NotRunning(String),
    #[error("{node}: {source}")]
    Node {
        node: String,
        #[source]
        source: Box<Error>,
    },
    #[error("invalid node key at {path:?}: {reason}")]
    NodeKey { path: PathBuf, reason: String },
    #[error("invalid config: {0}")]
    Config(String),
    #[error("canceled")]
    Canceled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns true if the error describes a condition that may clear on its own
    /// (a failed status query, a node that is not yet ready, a key that is not yet readable).
    ///
    /// Only transient errors are retried by a [RetryPolicy].
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Query { .. }
                | Error::CatchingUp { .. }
                | Error::Behind { .. }
                | Error::KeyUnavailable { .. }
        )
    }
}
