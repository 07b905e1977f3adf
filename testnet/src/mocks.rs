//! In-memory container runtime and status dialer for tests.
//!
//! [Mock] never launches a container. One-shot commands of the chain binary (`init`, `keys`,
//! `add-genesis-account`, `gentx`, `collect-gentxs`) are simulated synchronously against the
//! mounted host home directory, so the files they produce look like the real ones. `start`
//! registers a long-running container whose status endpoint reports a height that advances by
//! one block per second (of tokio time) from the moment the first node of the network started.

use crate::{
    keys::{encode_node_key, node_id},
    ContainerId, ContainerRuntime, Dialer, Error, NetworkId, RunSpec, StatusClient, SyncInfo,
};
use rand::{distributions::Uniform, Rng, RngCore};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::time::Instant;

/// Time a freshly started node reports `catching_up`.
const CATCH_UP: Duration = Duration::from_secs(1);

/// Interval between simulated blocks.
const BLOCK_TIME: Duration = Duration::from_secs(1);

/// First host port handed out to published RPC endpoints.
const FIRST_PORT: u16 = 30000;

/// Default contents of `config/config.toml` written by `init`.
const DEFAULT_CONFIG: &str = r#"proxy_app = "tcp://127.0.0.1:26658"
moniker = "default"
log_level = "main:info,state:info,*:error"

[rpc]
laddr = "tcp://127.0.0.1:26657"

[p2p]
laddr = "tcp://0.0.0.0:26656"
persistent_peers = ""
addr_book_strict = true
allow_duplicate_ip = false

[consensus]
timeout_propose = "3s"
timeout_commit = "5s"
"#;

enum Status {
    Running,
    Exited(i64),
}

struct Container {
    spec: RunSpec,
    status: Status,
    logs: String,
    endpoint: Option<String>,
    started: Instant,
}

struct Network {
    name: String,
    labels: BTreeMap<String, String>,

    /// When the first node attached to the network started producing blocks.
    genesis: Option<Instant>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    next_port: u16,
    networks: BTreeMap<String, Network>,
    containers: BTreeMap<String, Container>,
    commands: Vec<String>,

    failures: Vec<(String, i64)>,
    catching_up: BTreeSet<String>,
    stall: Option<i64>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:016x}", self.next_id)
    }

    fn container(&self, id: &ContainerId) -> Result<&Container, Error> {
        self.containers
            .get(&id.0)
            .ok_or_else(|| Error::Runtime(format!("no such container: {id}")))
    }

    /// Height of the chain on `network` at `now`.
    fn height(&self, network: &str, now: Instant) -> i64 {
        let genesis = self
            .networks
            .values()
            .find(|candidate| candidate.name == network)
            .and_then(|network| network.genesis);
        let Some(genesis) = genesis else {
            return 0;
        };
        let blocks = now.duration_since(genesis).as_secs() / BLOCK_TIME.as_secs();
        let height = i64::try_from(blocks).unwrap_or(i64::MAX);
        match self.stall {
            Some(cap) => height.min(cap),
            None => height,
        }
    }
}

/// Simulated container engine and chain binary.
#[derive(Clone, Default)]
pub struct Mock {
    state: Arc<Mutex<State>>,
}

impl Mock {
    fn state(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::Runtime("mock state poisoned".into()))
    }

    /// Make every command containing `pattern` exit with `code`.
    pub fn fail(&self, pattern: &str, code: i64) {
        if let Ok(mut state) = self.state() {
            state.failures.push((pattern.to_string(), code));
        }
    }

    /// Keep the node with `hostname` reporting `catching_up` (or release it).
    pub fn set_catching_up(&self, hostname: &str, catching_up: bool) {
        if let Ok(mut state) = self.state() {
            if catching_up {
                state.catching_up.insert(hostname.to_string());
            } else {
                state.catching_up.remove(hostname);
            }
        }
    }

    /// Stop every chain from advancing past `height`.
    pub fn stall(&self, height: i64) {
        if let Ok(mut state) = self.state() {
            state.stall = Some(height);
        }
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state()
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    /// Names of all networks that currently exist.
    pub fn networks(&self) -> Vec<String> {
        self.state()
            .map(|state| {
                state
                    .networks
                    .values()
                    .map(|network| network.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Labels of the network named `name`, if it exists.
    pub fn network_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        let state = self.state().ok()?;
        state
            .networks
            .values()
            .find(|network| network.name == name)
            .map(|network| network.labels.clone())
    }

    /// Number of containers that exist (running or exited).
    pub fn containers(&self) -> usize {
        self.state()
            .map(|state| state.containers.len())
            .unwrap_or_default()
    }

    /// Number of running containers.
    pub fn running(&self) -> usize {
        self.state()
            .map(|state| {
                state
                    .containers
                    .values()
                    .filter(|container| matches!(container.status, Status::Running))
                    .count()
            })
            .unwrap_or_default()
    }
}

impl ContainerRuntime for Mock {
    async fn run(&self, spec: RunSpec) -> Result<ContainerId, Error> {
        let mut state = self.state()?;
        if !state
            .networks
            .values()
            .any(|network| network.name == spec.network)
        {
            return Err(Error::Runtime(format!("network {} not found", spec.network)));
        }
        if state
            .containers
            .values()
            .any(|container| container.spec.name == spec.name)
        {
            return Err(Error::Runtime(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        let joined = spec.command.join(" ");
        state.commands.push(joined.clone());

        // Resolve how the container behaves
        let injected = state
            .failures
            .iter()
            .find(|(pattern, _)| joined.contains(pattern.as_str()))
            .map(|(_, code)| *code);
        let now = Instant::now();
        let (status, logs, endpoint) = match injected {
            Some(code) => (Status::Exited(code), format!("injected failure: {joined}"), None),
            None if is_start(&spec) => match start(&spec) {
                Ok(()) => {
                    if state.next_port == 0 {
                        state.next_port = FIRST_PORT;
                    }
                    let port = state.next_port;
                    state.next_port += 1;
                    if let Some(network) = state
                        .networks
                        .values_mut()
                        .find(|network| network.name == spec.network)
                    {
                        network.genesis.get_or_insert(now);
                    }
                    (Status::Running, String::new(), Some(format!("127.0.0.1:{port}")))
                }
                Err(reason) => (Status::Exited(1), reason, None),
            },
            None => match simulate(&spec) {
                Ok(output) => (Status::Exited(0), output, None),
                Err(reason) => (Status::Exited(1), reason, None),
            },
        };
        let id = state.next_id("container");
        state.containers.insert(
            id.clone(),
            Container {
                spec,
                status,
                logs,
                endpoint,
                started: now,
            },
        );
        Ok(ContainerId(id))
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64, Error> {
        let state = self.state()?;
        match state.container(id)?.status {
            Status::Exited(code) => Ok(code),
            Status::Running => Err(Error::Runtime(format!("{id} does not exit on its own"))),
        }
    }

    async fn exit_code(&self, id: &ContainerId) -> Result<Option<i64>, Error> {
        let state = self.state()?;
        match state.container(id)?.status {
            Status::Exited(code) => Ok(Some(code)),
            Status::Running => Ok(None),
        }
    }

    async fn logs(&self, id: &ContainerId) -> Result<String, Error> {
        let state = self.state()?;
        Ok(state.container(id)?.logs.clone())
    }

    async fn stop(&self, id: &ContainerId, _timeout: Duration) -> Result<(), Error> {
        let mut state = self.state()?;
        let container = state
            .containers
            .get_mut(&id.0)
            .ok_or_else(|| Error::Runtime(format!("no such container: {id}")))?;
        if matches!(container.status, Status::Running) {
            container.status = Status::Exited(0);
            container.endpoint = None;
        }
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<(), Error> {
        let mut state = self.state()?;
        if matches!(state.container(id)?.status, Status::Running) && !force {
            return Err(Error::Runtime(format!("{id} is running")));
        }
        state.containers.remove(&id.0);
        Ok(())
    }

    async fn list_by_network(&self, network: &str) -> Result<Vec<ContainerId>, Error> {
        let state = self.state()?;
        Ok(state
            .containers
            .iter()
            .filter(|(_, container)| container.spec.network == network)
            .map(|(id, _)| ContainerId(id.clone()))
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<NetworkId, Error> {
        let mut state = self.state()?;
        if state.networks.values().any(|network| network.name == name) {
            return Err(Error::Runtime(format!("network {name} already exists")));
        }
        let id = state.next_id("network");
        state.networks.insert(
            id.clone(),
            Network {
                name: name.to_string(),
                labels: labels.clone(),
                genesis: None,
            },
        );
        Ok(NetworkId(id))
    }

    async fn find_networks(&self, name: &str) -> Result<Vec<NetworkId>, Error> {
        let state = self.state()?;
        Ok(state
            .networks
            .iter()
            .filter(|(_, network)| network.name == name)
            .map(|(id, _)| NetworkId(id.clone()))
            .collect())
    }

    async fn remove_network(&self, id: &NetworkId) -> Result<(), Error> {
        let mut state = self.state()?;
        let network = state
            .networks
            .get(&id.0)
            .ok_or_else(|| Error::Runtime(format!("no such network: {id}")))?;
        if state
            .containers
            .values()
            .any(|container| container.spec.network == network.name)
        {
            return Err(Error::Runtime(format!(
                "network {} has attached containers",
                network.name
            )));
        }
        state.networks.remove(&id.0);
        Ok(())
    }

    async fn host_port(&self, id: &ContainerId, port: &str) -> Result<String, Error> {
        let state = self.state()?;
        let container = state.container(id)?;
        if !container.spec.ports.iter().any(|published| published == port) {
            return Err(Error::Runtime(format!("{id} does not publish {port}")));
        }
        container
            .endpoint
            .clone()
            .ok_or_else(|| Error::Runtime(format!("{id} is not running")))
    }
}

impl Dialer for Mock {
    type Client = MockClient;

    fn dial(&self, endpoint: &str) -> Result<MockClient, Error> {
        Ok(MockClient {
            state: self.state.clone(),
            endpoint: endpoint.to_string(),
        })
    }
}

/// Status client answering from the state of a [Mock].
pub struct MockClient {
    state: Arc<Mutex<State>>,
    endpoint: String,
}

impl StatusClient for MockClient {
    async fn status(&self) -> Result<SyncInfo, Error> {
        let query = |reason: &str| Error::Query {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        };
        let state = self.state.lock().map_err(|_| query("mock state poisoned"))?;
        let container = state
            .containers
            .values()
            .find(|container| container.endpoint.as_deref() == Some(self.endpoint.as_str()))
            .ok_or_else(|| query("connection refused"))?;
        let now = Instant::now();
        let catching_up = state.catching_up.contains(&container.spec.hostname)
            || now.duration_since(container.started) < CATCH_UP;
        Ok(SyncInfo {
            latest_height: state.height(&container.spec.network, now),
            catching_up,
        })
    }
}

/// Arguments following the binary, with the `--home` flag resolved to the mounted host path.
struct Invocation<'a> {
    args: Vec<&'a str>,
    home: PathBuf,
}

impl<'a> Invocation<'a> {
    fn parse(spec: &'a RunSpec) -> Result<Self, String> {
        let mut args = Vec::new();
        let mut home = None;
        let mut iter = spec.command.iter().skip(1);
        while let Some(arg) = iter.next() {
            if arg == "--home" {
                home = iter.next();
                continue;
            }
            args.push(arg.as_str());
        }
        let home = home.ok_or("missing --home")?;
        let mount = spec
            .mounts
            .iter()
            .find(|mount| &mount.container == home)
            .ok_or_else(|| format!("{home} is not mounted"))?;
        Ok(Self {
            args,
            home: mount.host.clone(),
        })
    }

    /// Value following `--flag`.
    fn flag(&self, flag: &str) -> Option<&'a str> {
        let position = self.args.iter().position(|arg| *arg == flag)?;
        self.args.get(position + 1).copied()
    }

    /// Positional argument `index` (flags and their values excluded).
    fn positional(&self, index: usize) -> Option<&'a str> {
        let mut positional = Vec::new();
        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            if arg.starts_with("--") {
                iter.next();
                continue;
            }
            positional.push(*arg);
        }
        positional.get(index).copied()
    }

    fn config(&self) -> PathBuf {
        self.home.join("config")
    }

    fn genesis(&self) -> PathBuf {
        self.config().join("genesis.json")
    }

    fn keyring(&self) -> PathBuf {
        self.home.join("keyring-test")
    }

    fn gentx_dir(&self) -> PathBuf {
        self.config().join("gentx")
    }
}

fn is_start(spec: &RunSpec) -> bool {
    spec.command.get(1).map(String::as_str) == Some("start")
}

fn read_json(path: &Path) -> Result<Value, String> {
    let contents = fs::read(path).map_err(|e| format!("failed to read {path:?}: {e}"))?;
    serde_json::from_slice(&contents).map_err(|e| format!("invalid json in {path:?}: {e}"))
}

fn write_json(path: &Path, value: &Value) -> Result<(), String> {
    let contents = serde_json::to_vec_pretty(value).map_err(|e| e.to_string())?;
    fs::write(path, contents).map_err(|e| format!("failed to write {path:?}: {e}"))
}

fn read_key(invocation: &Invocation<'_>, name: &str) -> Result<String, String> {
    fs::read_to_string(invocation.keyring().join(format!("{name}.address")))
        .map(|address| address.trim().to_string())
        .map_err(|_| format!("{name} is not a valid name or address: key not found"))
}

fn accounts(genesis: &Value) -> Vec<String> {
    genesis["accounts"]
        .as_array()
        .map(|accounts| {
            accounts
                .iter()
                .filter_map(|account| account["address"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn push(genesis: &mut Value, field: &str, entry: Value) -> Result<(), String> {
    genesis[field]
        .as_array_mut()
        .ok_or_else(|| format!("genesis has no {field}"))?
        .push(entry);
    Ok(())
}

/// Random bech32-looking account address.
fn random_address() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Uniform::new_inclusive(b'a', b'z'))
        .take(38)
        .map(char::from)
        .collect();
    format!("cosmos1{suffix}")
}

/// Run a one-shot command of the chain binary, returning its output.
fn simulate(spec: &RunSpec) -> Result<String, String> {
    let invocation = Invocation::parse(spec)?;
    match invocation.args.as_slice() {
        ["init", ..] => init(&invocation),
        ["keys", "add", ..] => add_key(&invocation),
        ["keys", "show", ..] => show_key(&invocation),
        ["add-genesis-account", ..] => add_genesis_account(&invocation),
        ["gentx", ..] => gentx(&invocation),
        ["collect-gentxs", ..] => collect_gentxs(&invocation),
        args => Err(format!("unknown command: {}", args.join(" "))),
    }
}

fn init(invocation: &Invocation<'_>) -> Result<String, String> {
    let chain_id = invocation.flag("--chain-id").ok_or("missing --chain-id")?;
    let moniker = invocation.positional(1).ok_or("missing moniker")?;
    let genesis = invocation.genesis();
    if genesis.exists() {
        return Err(format!("genesis.json file already exists: {genesis:?}"));
    }
    fs::create_dir_all(invocation.config()).map_err(|e| e.to_string())?;

    let mut keypair = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut keypair);
    let node_key = invocation.config().join("node_key.json");
    fs::write(&node_key, encode_node_key(&keypair)).map_err(|e| e.to_string())?;
    fs::write(invocation.config().join("config.toml"), DEFAULT_CONFIG)
        .map_err(|e| e.to_string())?;
    write_json(
        &genesis,
        &json!({
            "chain_id": chain_id,
            "accounts": [],
            "gen_txs": [],
        }),
    )?;
    Ok(json!({"moniker": moniker, "chain_id": chain_id}).to_string())
}

fn add_key(invocation: &Invocation<'_>) -> Result<String, String> {
    let name = invocation.positional(2).ok_or("missing key name")?;
    let path = invocation.keyring().join(format!("{name}.address"));
    if path.exists() {
        return Err(format!("key {name} already exists"));
    }
    fs::create_dir_all(invocation.keyring()).map_err(|e| e.to_string())?;
    let address = random_address();
    fs::write(&path, &address).map_err(|e| e.to_string())?;
    Ok(json!({"name": name, "type": "local", "address": address}).to_string())
}

fn show_key(invocation: &Invocation<'_>) -> Result<String, String> {
    let name = invocation.positional(2).ok_or("missing key name")?;
    Ok(format!("{}\n", read_key(invocation, name)?))
}

fn add_genesis_account(invocation: &Invocation<'_>) -> Result<String, String> {
    let address = invocation.positional(1).ok_or("missing address")?;
    let coins = invocation.positional(2).ok_or("missing coins")?;
    let path = invocation.genesis();
    let mut genesis = read_json(&path)?;
    if accounts(&genesis).iter().any(|account| account == address) {
        return Err(format!("cannot add account at existing address {address}"));
    }
    push(
        &mut genesis,
        "accounts",
        json!({"address": address, "coins": coins}),
    )?;
    write_json(&path, &genesis)?;
    Ok(String::new())
}

fn gentx(invocation: &Invocation<'_>) -> Result<String, String> {
    let name = invocation.positional(1).ok_or("missing key name")?;
    let amount = invocation.positional(2).ok_or("missing amount")?;
    let chain_id = invocation.flag("--chain-id").ok_or("missing --chain-id")?;
    let address = read_key(invocation, name)?;
    let genesis = read_json(&invocation.genesis())?;
    if genesis["chain_id"].as_str() != Some(chain_id) {
        return Err(format!("chain ID {chain_id} does not match genesis"));
    }
    if !accounts(&genesis).contains(&address) {
        return Err(format!("account {address} does not exist in genesis"));
    }
    let node_key = fs::read(invocation.config().join("node_key.json")).map_err(|e| e.to_string())?;
    let node_id = node_id(&node_key)?;
    fs::create_dir_all(invocation.gentx_dir()).map_err(|e| e.to_string())?;
    let path = invocation.gentx_dir().join(format!("gentx-{node_id}.json"));
    write_json(
        &path,
        &json!({"validator": address, "node_id": node_id, "amount": amount}),
    )?;
    Ok(format!("Genesis transaction written to {path:?}\n"))
}

fn collect_gentxs(invocation: &Invocation<'_>) -> Result<String, String> {
    let mut files: Vec<PathBuf> = fs::read_dir(invocation.gentx_dir())
        .map_err(|e| e.to_string())?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|extension| extension == "json"))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err("no gentxs found".into());
    }
    let path = invocation.genesis();
    let mut genesis = read_json(&path)?;
    let known = accounts(&genesis);
    for file in files {
        let tx = read_json(&file)?;
        let validator = tx["validator"].as_str().unwrap_or_default();
        if !known.iter().any(|account| account == validator) {
            return Err(format!("account {validator} in {file:?} not in genesis"));
        }
        push(&mut genesis, "gen_txs", tx)?;
    }
    write_json(&path, &genesis)?;
    Ok(String::new())
}

/// Check a node can start: its genesis must contain at least one gentx.
fn start(spec: &RunSpec) -> Result<(), String> {
    let invocation = Invocation::parse(spec)?;
    let genesis = read_json(&invocation.genesis())?;
    let validators = genesis["gen_txs"].as_array().map(Vec::len).unwrap_or(0);
    if validators == 0 {
        return Err("genesis contains no validators".into());
    }
    if !invocation.config().join("config.toml").exists() {
        return Err("missing config.toml".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mount;

    fn spec(home: &Path, name: &str, args: &[&str]) -> RunSpec {
        let mut command = vec!["gaiad".to_string()];
        command.extend(args.iter().map(|arg| arg.to_string()));
        command.push("--home".into());
        command.push("/home/gaiad".into());
        RunSpec {
            name: name.into(),
            hostname: "node-ibc-test-1-0".into(),
            repository: "gaia".into(),
            tag: "v5.0.7".into(),
            command,
            mounts: vec![Mount {
                host: home.to_path_buf(),
                container: "/home/gaiad".into(),
            }],
            ports: vec![crate::RPC_PORT.into()],
            network: "ibc-test-1-network".into(),
            labels: BTreeMap::new(),
        }
    }

    async fn exec(mock: &Mock, home: &Path, name: &str, args: &[&str]) -> (i64, String) {
        let id = mock.run(spec(home, name, args)).await.unwrap();
        let code = mock.wait(&id).await.unwrap();
        let logs = mock.logs(&id).await.unwrap();
        mock.remove(&id, true).await.unwrap();
        (code, logs)
    }

    #[tokio::test]
    async fn test_run_requires_network() {
        let home = tempfile::tempdir().unwrap();
        let mock = Mock::default();
        let err = mock
            .run(spec(home.path(), "a", &["init", "x", "--chain-id", "c"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[tokio::test]
    async fn test_simulated_genesis_flow() {
        let home = tempfile::tempdir().unwrap();
        let mock = Mock::default();
        mock.create_network("ibc-test-1-network", &BTreeMap::new())
            .await
            .unwrap();

        let (code, _) = exec(&mock, home.path(), "a", &["init", "n", "--chain-id", "ibc-test-1"]).await;
        assert_eq!(code, 0);
        let (code, _) = exec(&mock, home.path(), "b", &["init", "n", "--chain-id", "ibc-test-1"]).await;
        assert_eq!(code, 1);

        // Missing key
        let (code, _) = exec(&mock, home.path(), "c", &["keys", "show", "validator", "--address"]).await;
        assert_eq!(code, 1);

        let (code, _) = exec(&mock, home.path(), "d", &["keys", "add", "validator"]).await;
        assert_eq!(code, 0);
        let (code, address) =
            exec(&mock, home.path(), "e", &["keys", "show", "validator", "--address"]).await;
        assert_eq!(code, 0);
        let address = address.trim().to_string();
        assert!(address.starts_with("cosmos1"));

        // gentx requires a funded account
        let gentx = ["gentx", "validator", "1stake", "--chain-id", "ibc-test-1"];
        let (code, _) = exec(&mock, home.path(), "f", &gentx).await;
        assert_eq!(code, 1);
        let (code, _) = exec(&mock, home.path(), "g", &["add-genesis-account", address.as_str(), "10stake"]).await;
        assert_eq!(code, 0);
        let (code, _) = exec(&mock, home.path(), "h", &["add-genesis-account", address.as_str(), "10stake"]).await;
        assert_eq!(code, 1);
        let (code, _) = exec(&mock, home.path(), "i", &gentx).await;
        assert_eq!(code, 0);
        let (code, _) = exec(&mock, home.path(), "j", &["collect-gentxs"]).await;
        assert_eq!(code, 0);

        let genesis = read_json(&home.path().join("config").join("genesis.json")).unwrap();
        assert_eq!(genesis["gen_txs"].as_array().unwrap().len(), 1);
        assert_eq!(mock.containers(), 0);
        assert_eq!(mock.commands().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_advances() {
        let home = tempfile::tempdir().unwrap();
        let mock = Mock::default();
        mock.create_network("ibc-test-1-network", &BTreeMap::new())
            .await
            .unwrap();

        // A node cannot start without a genesis
        let id = mock.run(spec(home.path(), "n", &["start"])).await.unwrap();
        assert_eq!(mock.wait(&id).await.unwrap(), 1);
        mock.remove(&id, true).await.unwrap();

        fs::create_dir_all(home.path().join("config")).unwrap();
        fs::write(home.path().join("config").join("config.toml"), DEFAULT_CONFIG).unwrap();
        write_json(
            &home.path().join("config").join("genesis.json"),
            &json!({"chain_id": "ibc-test-1", "accounts": [], "gen_txs": [{}]}),
        )
        .unwrap();
        let id = mock.run(spec(home.path(), "n", &["start"])).await.unwrap();
        assert!(mock.wait(&id).await.is_err());
        let endpoint = mock.host_port(&id, crate::RPC_PORT).await.unwrap();
        let client = mock.dial(&endpoint).unwrap();

        let info = client.status().await.unwrap();
        assert!(info.catching_up);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let info = client.status().await.unwrap();
        assert!(!info.catching_up);
        assert_eq!(info.latest_height, 3);

        mock.stall(4);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(client.status().await.unwrap().latest_height, 4);

        mock.stop(&id, Duration::from_secs(10)).await.unwrap();
        assert!(client.status().await.unwrap_err().is_transient());
        assert_eq!(mock.running(), 0);
    }

    #[tokio::test]
    async fn test_remove_network_with_containers() {
        let home = tempfile::tempdir().unwrap();
        let mock = Mock::default();
        let network = mock
            .create_network("ibc-test-1-network", &BTreeMap::new())
            .await
            .unwrap();
        assert!(mock
            .create_network("ibc-test-1-network", &BTreeMap::new())
            .await
            .is_err());
        let id = mock
            .run(spec(home.path(), "a", &["init", "n", "--chain-id", "c"]))
            .await
            .unwrap();
        assert!(mock.remove_network(&network).await.is_err());
        mock.remove(&id, false).await.unwrap();
        mock.remove_network(&network).await.unwrap();
        assert!(mock.networks().is_empty());
    }
}
