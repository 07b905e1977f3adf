use crate::{
    config::Config,
    keys::{self, parse_address, Key, KeyStore, VALIDATOR_KEY},
    rpc::{Dialer, StatusClient, SyncInfo},
    topology::Peer,
    utils::{random_name, sha256_hex},
    ContainerId, ContainerRuntime, Error, Mount, RunSpec, P2P_PORT, RPC_PORT,
};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{fs, time::sleep};
use tokio_util::sync::CancellationToken;
use toml::{Table, Value};
use tracing::{debug, info, warn};

/// Number of trailing log lines attached to a failed command.
const LOG_TAIL: usize = 20;

/// Length of the random names given to one-shot command containers.
const COMMAND_NAME_LENGTH: usize = 8;

/// Handle to a node of a specific chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    chain_id: String,
    index: usize,
}

impl NodeId {
    pub(crate) fn new(chain_id: &str, index: usize) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            index,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}-{}", self.chain_id, self.index)
    }
}

/// A started node: its container and a client bound to its published RPC endpoint.
pub struct Process<C> {
    pub container: ContainerId,
    pub endpoint: String,
    pub client: C,
}

/// One participant of a chain.
pub struct Node<R: ContainerRuntime, D: Dialer> {
    runtime: R,
    dialer: D,
    config: Arc<Config>,
    network: String,

    id: NodeId,
    name: String,
    validator: bool,
    host_home: PathBuf,

    process: Option<Process<D::Client>>,
}

impl<R: ContainerRuntime, D: Dialer> Node<R, D> {
    /// Create a node and provision its host home directory under `root`.
    pub(crate) fn new(
        runtime: R,
        dialer: D,
        config: Arc<Config>,
        root: &Path,
        index: usize,
        validator: bool,
    ) -> Result<Self, Error> {
        let id = NodeId::new(&config.chain_id, index);
        let name = id.to_string();
        let host_home = root.join(&name);
        std::fs::create_dir_all(&host_home)
            .map_err(|e| Error::Resource(format!("failed to create {host_home:?}: {e}")))?;
        Ok(Self {
            runtime,
            dialer,
            network: config.network.clone(),
            config,
            id,
            name,
            validator,
            host_home,
            process: None,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Unique name of the node, also used as its container name and hostname.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_validator(&self) -> bool {
        self.validator
    }

    /// Home directory on the host (mounted into every container of the node).
    pub fn host_home(&self) -> &Path {
        &self.host_home
    }

    /// Home directory inside the container.
    pub fn home(&self) -> String {
        self.config.image.home()
    }

    pub fn genesis_path(&self) -> PathBuf {
        self.host_home.join("config").join("genesis.json")
    }

    pub fn node_key_path(&self) -> PathBuf {
        self.host_home.join("config").join("node_key.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.host_home.join("config").join("config.toml")
    }

    pub fn gentx_path(&self, node_id: &str) -> PathBuf {
        self.host_home
            .join("config")
            .join("gentx")
            .join(format!("gentx-{node_id}.json"))
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    pub fn process(&self) -> Option<&Process<D::Client>> {
        self.process.as_ref()
    }

    /// Node ID derived from the node key written by `init`.
    pub async fn node_id(&self) -> Result<String, Error> {
        keys::load_node_id(&self.node_key_path()).await
    }

    /// Address other nodes dial to reach this node.
    pub async fn peer(&self) -> Result<Peer, Error> {
        Ok(Peer {
            id: self.node_id().await?,
            host: self.name.clone(),
            port: P2P_PORT,
        })
    }

    fn run_spec(&self, name: String, command: Vec<String>) -> RunSpec {
        RunSpec {
            name,
            hostname: self.name.clone(),
            repository: self.config.image.repository.clone(),
            tag: self.config.image.version.clone(),
            command,
            mounts: vec![Mount {
                host: self.host_home.clone(),
                container: self.home(),
            }],
            ports: self.config.image.ports.clone(),
            network: self.network.clone(),
            labels: BTreeMap::from([(
                self.config.label_key.clone(),
                self.config.chain_id.clone(),
            )]),
        }
    }

    /// Build a chain binary invocation (always pointed at the node's home).
    fn command(&self, args: &[&str]) -> Vec<String> {
        let mut command = vec![self.config.image.bin.clone()];
        command.extend(args.iter().map(|arg| arg.to_string()));
        command.push("--home".into());
        command.push(self.home());
        command
    }

    /// Run `command` in a one-shot container and wait for it to exit, returning its output.
    ///
    /// A non-zero exit code is a [Error::Process] failure. Cancellation is only observed before
    /// the container is launched: a command that started always runs to completion and its
    /// container is removed.
    async fn execute(
        &self,
        command: Vec<String>,
        token: &CancellationToken,
    ) -> Result<String, Error> {
        if token.is_cancelled() {
            return Err(Error::Canceled);
        }
        let joined = command.join(" ");
        debug!(node = self.name.as_str(), command = joined.as_str(), "executing");
        let container = self
            .runtime
            .run(self.run_spec(random_name(COMMAND_NAME_LENGTH), command))
            .await?;
        let code = self.runtime.wait(&container).await?;
        let logs = self.runtime.logs(&container).await?;
        if let Err(err) = self.runtime.remove(&container, true).await {
            warn!(
                node = self.name.as_str(),
                ?err,
                "failed to remove command container"
            );
        }
        if code != 0 {
            return Err(Error::Process {
                node: self.name.clone(),
                command: joined,
                code,
                logs: tail(&logs),
            });
        }
        Ok(logs)
    }

    /// Attach the node name to runtime and filesystem failures.
    pub(crate) fn context(&self, err: Error) -> Error {
        match err {
            Error::Runtime(_) | Error::Io(_) => Error::Node {
                node: self.name.clone(),
                source: Box::new(err),
            },
            err => err,
        }
    }

    /// Fail with [Error::Process] if the long-running `container` has already exited.
    ///
    /// An exited container is removed so the node name can be reused.
    async fn check_exited(&self, container: &ContainerId, command: &str) -> Result<(), Error> {
        let Some(code) = self
            .runtime
            .exit_code(container)
            .await
            .map_err(|e| self.context(e))?
        else {
            return Ok(());
        };
        let logs = self.runtime.logs(container).await.unwrap_or_default();
        if let Err(err) = self.runtime.remove(container, true).await {
            warn!(node = self.name.as_str(), ?err, "failed to remove exited container");
        }
        Err(Error::Process {
            node: self.name.clone(),
            command: command.to_string(),
            code,
            logs: tail(&logs),
        })
    }

    /// Initialize the node's home directory (config, node key and draft genesis).
    pub async fn init(&self, token: &CancellationToken) -> Result<(), Error> {
        let command = self.command(&["init", &self.name, "--chain-id", &self.config.chain_id]);
        self.execute(command, token).await?;
        Ok(())
    }

    /// Create key `name` in the node's test keyring.
    pub async fn create_key(&self, name: &str, token: &CancellationToken) -> Result<(), Error> {
        let command = self.command(&[
            "keys",
            "add",
            name,
            "--keyring-backend",
            "test",
            "--output",
            "json",
        ]);
        self.execute(command, token).await?;
        Ok(())
    }

    /// Prepare the node before genesis: `init`, plus the validator key for validators.
    ///
    /// Full nodes never receive a key.
    pub async fn initialize(&self, token: &CancellationToken) -> Result<(), Error> {
        self.init(token).await?;
        if self.validator {
            self.create_key(VALIDATOR_KEY, token).await?;
        }
        info!(node = self.name.as_str(), validator = self.validator, "initialized");
        Ok(())
    }

    /// Register a genesis account for `address` in this node's draft genesis.
    pub async fn add_genesis_account(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let command = self.command(&[
            "add-genesis-account",
            address,
            &self.config.genesis.account_balance,
        ]);
        self.execute(command, token).await?;
        Ok(())
    }

    /// Sign this node's genesis transaction with the validator key.
    pub async fn gentx(&self, token: &CancellationToken) -> Result<(), Error> {
        let command = self.command(&[
            "gentx",
            VALIDATOR_KEY,
            &self.config.genesis.self_delegation,
            "--keyring-backend",
            "test",
            "--chain-id",
            &self.config.chain_id,
        ]);
        self.execute(command, token).await?;
        Ok(())
    }

    /// Fold every gentx in the node's gentx directory into its genesis.
    pub async fn collect_gentxs(&self, token: &CancellationToken) -> Result<(), Error> {
        let command = self.command(&["collect-gentxs"]);
        self.execute(command, token).await?;
        Ok(())
    }

    /// Fund the validator key in this node's draft genesis and sign a gentx with it.
    ///
    /// Returns the validator key.
    pub async fn create_genesis_tx(&self, token: &CancellationToken) -> Result<Key, Error> {
        let key = self.get_key(VALIDATOR_KEY, token).await?;
        self.add_genesis_account(&key.address, token).await?;
        self.gentx(token).await?;
        Ok(key)
    }

    async fn show_key(&self, name: &str, token: &CancellationToken) -> Result<Key, Error> {
        let unavailable = || Error::KeyUnavailable {
            node: self.name.clone(),
            name: name.to_string(),
        };
        let command = self.command(&[
            "keys",
            "show",
            name,
            "--address",
            "--keyring-backend",
            "test",
        ]);
        let output = match self.execute(command, token).await {
            Ok(output) => output,
            Err(Error::Process { .. }) => return Err(unavailable()),
            Err(err) => return Err(err),
        };
        let address = parse_address(&output).ok_or_else(unavailable)?;
        Ok(Key {
            name: name.to_string(),
            address,
        })
    }

    pub async fn read_genesis(&self) -> Result<Vec<u8>, Error> {
        fs::read(self.genesis_path())
            .await
            .map_err(|e| self.context(e.into()))
    }

    pub async fn write_genesis(&self, genesis: &[u8]) -> Result<(), Error> {
        fs::write(self.genesis_path(), genesis)
            .await
            .map_err(|e| self.context(e.into()))
    }

    /// Hex-encoded SHA-256 digest of the node's genesis file.
    pub async fn genesis_hash(&self) -> Result<String, Error> {
        Ok(sha256_hex(&self.read_genesis().await?))
    }

    /// Rewrite the node configuration, embedding `peers` as persistent peers.
    pub async fn set_config(&self, peers: &str) -> Result<(), Error> {
        let path = self.config_path();
        let mut table = match fs::read_to_string(&path).await {
            Ok(contents) => contents.parse::<Table>()?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Table::new(),
            Err(err) => return Err(err.into()),
        };
        configure(&mut table, &self.name, peers, &self.config);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, toml::to_string(&table)?).await?;
        debug!(node = self.name.as_str(), peers, "wrote config");
        Ok(())
    }

    /// Write the configuration, start the node and wait until it is no longer catching up.
    ///
    /// Readiness is retried without bound: if the node never becomes ready this only returns
    /// once `token` is canceled.
    pub async fn start(&mut self, peers: &str, token: &CancellationToken) -> Result<(), Error> {
        if self.process.is_some() {
            return Err(Error::AlreadyRunning(self.name.clone()));
        }
        self.set_config(peers).await.map_err(|e| self.context(e))?;

        // Launch the node
        let command = self.command(&["start"]);
        let joined = command.join(" ");
        info!(node = self.name.as_str(), "starting container");
        let container = self
            .runtime
            .run(self.run_spec(self.name.clone(), command))
            .await
            .map_err(|e| self.context(e))?;
        self.check_exited(&container, &joined).await?;
        let endpoint = match self.runtime.host_port(&container, RPC_PORT).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                if let Err(err) = self.runtime.remove(&container, true).await {
                    warn!(node = self.name.as_str(), ?err, "failed to remove container");
                }
                return Err(self.context(err));
            }
        };
        info!(
            node = self.name.as_str(),
            endpoint = endpoint.as_str(),
            "resolved rpc endpoint"
        );
        let client = self.dialer.dial(&endpoint)?;
        self.process = Some(Process {
            container,
            endpoint,
            client,
        });

        // Wait for the node to answer status queries
        let result = self.verify(&joined, token).await;
        if let Err(Error::Process { .. }) = result {
            self.process = None;
        }
        result
    }

    /// Wait until the node is no longer catching up, failing early if its container exits.
    async fn verify(&self, command: &str, token: &CancellationToken) -> Result<(), Error> {
        let Some(process) = self.process.as_ref() else {
            return Err(Error::NotRunning(self.name.clone()));
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Canceled),
            _ = sleep(self.config.warmup) => {},
        }
        let node = self;
        let info = self
            .config
            .readiness
            .run(token, move || async move {
                node.check_exited(&process.container, command).await?;
                let info = process.client.status().await?;
                if info.catching_up {
                    return Err(Error::CatchingUp {
                        node: node.name.clone(),
                        height: info.latest_height,
                    });
                }
                Ok(info)
            })
            .await?;
        info!(node = self.name.as_str(), height = info.latest_height, "node ready");
        Ok(())
    }

    fn client(&self) -> Result<&D::Client, Error> {
        self.process
            .as_ref()
            .map(|process| &process.client)
            .ok_or_else(|| Error::NotRunning(self.name.clone()))
    }

    /// Query the node's current sync state.
    pub async fn status(&self) -> Result<SyncInfo, Error> {
        self.client()?.status().await
    }

    /// Poll the node until it reports at least `height` and is not catching up.
    ///
    /// Fails with [Error::HeightTimeout] once the height policy is exhausted.
    pub async fn wait_for_height(
        &self,
        height: i64,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let client = self.client()?;
        let name = self.name.as_str();
        let result = self
            .config
            .height
            .run(token, move || async move {
                let info = client.status().await?;
                if info.catching_up {
                    return Err(Error::CatchingUp {
                        node: name.to_string(),
                        height: info.latest_height,
                    });
                }
                if info.latest_height < height {
                    return Err(Error::Behind {
                        node: name.to_string(),
                        height: info.latest_height,
                        target: height,
                    });
                }
                Ok(info)
            })
            .await;
        match result {
            Ok(info) => {
                info!(
                    node = self.name.as_str(),
                    height = info.latest_height,
                    target = height,
                    "reached height"
                );
                Ok(())
            }
            Err(
                Error::CatchingUp { height: latest, .. } | Error::Behind { height: latest, .. },
            ) => Err(Error::HeightTimeout {
                node: self.name.clone(),
                target: height,
                latest: Some(latest),
            }),
            Err(Error::Query { .. }) => Err(Error::HeightTimeout {
                node: self.name.clone(),
                target: height,
                latest: None,
            }),
            Err(err) => Err(err),
        }
    }

    /// Stop and remove the node's container and drop its status client.
    ///
    /// The node can be started again afterwards.
    pub async fn stop(&mut self) -> Result<(), Error> {
        let Some(process) = self.process.take() else {
            return Err(Error::NotRunning(self.name.clone()));
        };
        let stopped = self
            .runtime
            .stop(&process.container, self.config.stop_timeout)
            .await;
        let removed = self.runtime.remove(&process.container, true).await;
        stopped.and(removed).map_err(|e| self.context(e))?;
        info!(node = self.name.as_str(), "stopped");
        Ok(())
    }
}

impl<R: ContainerRuntime, D: Dialer> KeyStore for Node<R, D> {
    async fn get_key(&self, name: &str, token: &CancellationToken) -> Result<Key, Error> {
        self.config
            .keys
            .run(token, move || self.show_key(name, token))
            .await
    }
}

/// Last [LOG_TAIL] lines of `logs`.
fn tail(logs: &str) -> String {
    let lines: Vec<&str> = logs.lines().collect();
    lines[lines.len().saturating_sub(LOG_TAIL)..].join("\n")
}

/// Format a duration the way the node's configuration expects (`3s`, `1500ms`).
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

/// Set `key` in the `[section]` table (or the root table if `section` is `None`).
fn set(table: &mut Table, section: Option<&str>, key: &str, value: Value) {
    let Some(section) = section else {
        table.insert(key.to_string(), value);
        return;
    };
    match table.get_mut(section) {
        Some(Value::Table(inner)) => {
            inner.insert(key.to_string(), value);
        }
        _ => {
            let mut inner = Table::new();
            inner.insert(key.to_string(), value);
            table.insert(section.to_string(), Value::Table(inner));
        }
    }
}

/// Apply test-network settings to a node configuration.
///
/// Consensus timeouts are shortened, the RPC listens on all interfaces and the address book
/// accepts several peers behind one IP.
fn configure(table: &mut Table, moniker: &str, peers: &str, config: &Config) {
    set(table, None, "moniker", Value::String(moniker.into()));
    set(table, None, "log_level", Value::String("info".into()));
    set(
        table,
        Some("consensus"),
        "timeout_commit",
        Value::String(format_duration(config.consensus.timeout_commit)),
    );
    set(
        table,
        Some("consensus"),
        "timeout_propose",
        Value::String(format_duration(config.consensus.timeout_propose)),
    );
    set(
        table,
        Some("rpc"),
        "laddr",
        Value::String(format!("tcp://0.0.0.0:{}", rpc_port_number())),
    );
    set(table, Some("p2p"), "allow_duplicate_ip", Value::Boolean(true));
    set(table, Some("p2p"), "addr_book_strict", Value::Boolean(false));
    set(
        table,
        Some("p2p"),
        "persistent_peers",
        Value::String(peers.into()),
    );
}

/// Numeric part of [RPC_PORT].
fn rpc_port_number() -> &'static str {
    RPC_PORT.split('/').next().unwrap_or(RPC_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Image;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3)), "3s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn test_configure_overrides_defaults() {
        let mut table: Table = r#"
moniker = "default"
proxy_app = "tcp://127.0.0.1:26658"

[rpc]
laddr = "tcp://127.0.0.1:26657"
cors_allowed_origins = []

[p2p]
laddr = "tcp://0.0.0.0:26656"
persistent_peers = ""
addr_book_strict = true

[consensus]
timeout_propose = "3s"
timeout_commit = "5s"
"#
        .parse()
        .unwrap();
        let config = Config::new("ibc-test-1", Image::gaia());
        configure(&mut table, "node-ibc-test-1-0", "a@b:26656,c@d:26656", &config);

        assert_eq!(table["moniker"].as_str(), Some("node-ibc-test-1-0"));
        assert_eq!(table["log_level"].as_str(), Some("info"));
        assert_eq!(
            table["proxy_app"].as_str(),
            Some("tcp://127.0.0.1:26658")
        );
        assert_eq!(table["rpc"]["laddr"].as_str(), Some("tcp://0.0.0.0:26657"));
        assert!(table["rpc"].get("cors_allowed_origins").is_some());
        assert_eq!(table["p2p"]["laddr"].as_str(), Some("tcp://0.0.0.0:26656"));
        assert_eq!(
            table["p2p"]["persistent_peers"].as_str(),
            Some("a@b:26656,c@d:26656")
        );
        assert_eq!(table["p2p"]["allow_duplicate_ip"].as_bool(), Some(true));
        assert_eq!(table["p2p"]["addr_book_strict"].as_bool(), Some(false));
        assert_eq!(table["consensus"]["timeout_commit"].as_str(), Some("3s"));
        assert_eq!(table["consensus"]["timeout_propose"].as_str(), Some("3s"));
    }

    #[test]
    fn test_configure_empty_table() {
        let mut table = Table::new();
        let config = Config::new("ibc-test-1", Image::gaia());
        configure(&mut table, "node-ibc-test-1-3", "", &config);
        let rendered = toml::to_string(&table).unwrap();
        let parsed: Table = rendered.parse().unwrap();
        assert_eq!(parsed["p2p"]["persistent_peers"].as_str(), Some(""));
        assert_eq!(parsed["moniker"].as_str(), Some("node-ibc-test-1-3"));
    }

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new("ibc-test-1", 3);
        assert_eq!(id.to_string(), "node-ibc-test-1-3");
        assert_eq!(id.chain_id(), "ibc-test-1");
        assert_eq!(id.index(), 3);
    }
}
