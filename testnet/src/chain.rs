use crate::{
    genesis,
    network::Network,
    topology::{peer_string, Peer},
    utils::{create_root, join_all},
    Config, ContainerRuntime, Dialer, Error, Node, NodeId,
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// An ephemeral chain: an ordered set of nodes sharing one network and one host root directory.
///
/// Nodes are addressed by the [NodeId]s returned from [Chain::add_node]. Phases are expected to
/// run in order (initialize, create genesis, start, wait for height) and every phase returns the
/// first error encountered by any node. Nothing is rolled back on failure: call
/// [Chain::teardown] to release every resource.
pub struct Chain<R: ContainerRuntime, D: Dialer> {
    runtime: R,
    dialer: D,
    config: Arc<Config>,
    network: Network<R>,

    root_path: PathBuf,
    root: Option<TempDir>,

    nodes: Vec<Node<R, D>>,
    torn_down: bool,
}

impl<R: ContainerRuntime, D: Dialer> Chain<R, D> {
    /// Remove anything left over from a previous run with the same network name, then
    /// provision the host root directory and create the network.
    pub async fn new(runtime: R, dialer: D, config: Config) -> Result<Self, Error> {
        config.validate()?;
        let mut network = Network::new(runtime.clone(), &config);
        network.reset().await?;
        let root = create_root(config.root.as_deref(), config.keep_data)?;
        let root_path = root.path().to_path_buf();
        info!(
            chain_id = config.chain_id.as_str(),
            root = ?root_path,
            "created root directory"
        );
        network.create().await?;
        Ok(Self {
            runtime,
            dialer,
            config: Arc::new(config),
            network,
            root_path,
            root: Some(root),
            nodes: Vec::new(),
            torn_down: false,
        })
    }

    pub fn chain_id(&self) -> &str {
        &self.config.chain_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Host directory containing the home directory of every node.
    pub fn root(&self) -> &Path {
        &self.root_path
    }

    pub fn network(&self) -> &Network<R> {
        &self.network
    }

    /// Add a node at the next index and provision its host home directory.
    pub fn add_node(&mut self, validator: bool) -> Result<NodeId, Error> {
        let node = Node::new(
            self.runtime.clone(),
            self.dialer.clone(),
            self.config.clone(),
            &self.root_path,
            self.nodes.len(),
            validator,
        )?;
        let id = node.id().clone();
        info!(node = node.name(), validator, "added node");
        self.nodes.push(node);
        Ok(id)
    }

    fn index(&self, id: &NodeId) -> Result<usize, Error> {
        if id.chain_id() != self.config.chain_id || id.index() >= self.nodes.len() {
            return Err(Error::NotOwned {
                chain_id: self.config.chain_id.clone(),
                node: id.to_string(),
            });
        }
        Ok(id.index())
    }

    /// Node addressed by `id`, failing if `id` does not belong to this chain.
    pub fn node(&self, id: &NodeId) -> Result<&Node<R, D>, Error> {
        let index = self.index(id)?;
        Ok(&self.nodes[index])
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node<R, D>, Error> {
        let index = self.index(id)?;
        Ok(&mut self.nodes[index])
    }

    /// All nodes in index order.
    pub fn nodes(&self) -> &[Node<R, D>] {
        &self.nodes
    }

    /// Identifiers of every validator, in index order.
    pub fn validators(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.is_validator())
            .map(|node| node.id().clone())
            .collect()
    }

    /// Initialize every node concurrently.
    pub async fn initialize(&self, token: &CancellationToken) -> Result<(), Error> {
        let child = token.child_token();
        join_all(&child, self.nodes.iter().map(|node| node.initialize(&child))).await?;
        info!(
            chain_id = self.chain_id(),
            nodes = self.nodes.len(),
            "initialized nodes"
        );
        Ok(())
    }

    /// Initialize a single node (e.g. one added after the chain started).
    pub async fn initialize_node(
        &self,
        id: &NodeId,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        self.node(id)?.initialize(token).await
    }

    /// Build the genesis from the gentxs of `validators` and give every node an identical copy.
    ///
    /// The first validator coordinates assembly. `validators` must be non-empty, free of
    /// duplicates, owned by this chain and flagged as validators; all of this is checked before
    /// anything is modified.
    pub async fn create_genesis(
        &self,
        validators: &[NodeId],
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let Some((first, others)) = validators.split_first() else {
            return Err(Error::InvalidInput(
                "at least one validator is required".into(),
            ));
        };
        let mut seen = BTreeSet::new();
        for id in validators {
            let node = self.node(id)?;
            if !node.is_validator() {
                return Err(Error::InvalidInput(format!("{id} is not a validator")));
            }
            if !seen.insert(id) {
                return Err(Error::InvalidInput(format!("{id} listed more than once")));
            }
        }

        // Assemble on the coordinator
        let coordinator = self.node(first)?;
        let others = others
            .iter()
            .map(|id| self.node(id))
            .collect::<Result<Vec<_>, _>>()?;
        let nodes: Vec<_> = self.nodes.iter().collect();
        genesis::create(coordinator, &others, &nodes, token).await?;
        info!(
            chain_id = self.chain_id(),
            coordinator = coordinator.name(),
            validators = validators.len(),
            "genesis distributed"
        );
        Ok(())
    }

    /// [Chain::create_genesis] with every validator of the chain.
    pub async fn create_genesis_default(&self, token: &CancellationToken) -> Result<(), Error> {
        self.create_genesis(&self.validators(), token).await
    }

    /// Peer string describing every node of the chain, in index order.
    ///
    /// Computed from the node keys on disk whenever it is requested.
    pub async fn peers(&self) -> Result<String, Error> {
        let mut peers: Vec<Peer> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            peers.push(node.peer().await?);
        }
        Ok(peer_string(&peers))
    }

    /// Configure and start every node concurrently, returning once all of them are ready.
    pub async fn start(&mut self, token: &CancellationToken) -> Result<(), Error> {
        let peers = self.peers().await?;
        let child = token.child_token();
        join_all(
            &child,
            self.nodes
                .iter_mut()
                .map(|node| node.start(&peers, &child)),
        )
        .await?;
        info!(
            chain_id = self.config.chain_id.as_str(),
            nodes = self.nodes.len(),
            "started nodes"
        );
        Ok(())
    }

    /// Configure and start a single node with the current topology.
    pub async fn start_node(
        &mut self,
        id: &NodeId,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        self.index(id)?;
        let peers = self.peers().await?;
        self.node_mut(id)?.start(&peers, token).await
    }

    /// Overwrite the genesis of `to` with the genesis of `from`.
    pub async fn copy_genesis(&self, from: &NodeId, to: &NodeId) -> Result<(), Error> {
        let source = self.node(from)?;
        let destination = self.node(to)?;
        let genesis = source.read_genesis().await?;
        destination.write_genesis(&genesis).await?;
        info!(
            from = source.name(),
            to = destination.name(),
            "copied genesis"
        );
        Ok(())
    }

    /// Wait until every running node reports at least `height`.
    pub async fn wait_for_height(
        &self,
        height: i64,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let running: Vec<_> = self.nodes.iter().filter(|node| node.is_running()).collect();
        if running.is_empty() {
            return Err(Error::NotRunning(self.config.chain_id.clone()));
        }
        let child = token.child_token();
        join_all(
            &child,
            running
                .iter()
                .map(|node| node.wait_for_height(height, &child)),
        )
        .await?;
        info!(chain_id = self.chain_id(), height, "chain reached height");
        Ok(())
    }

    /// `(node, hex SHA-256)` of the genesis file of every node.
    pub async fn genesis_hashes(&self) -> Result<Vec<(String, String)>, Error> {
        let mut hashes = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            hashes.push((node.name().to_string(), node.genesis_hash().await?));
        }
        Ok(hashes)
    }

    /// Stop every running node.
    pub async fn stop(&mut self) -> Result<(), Error> {
        join_all(
            &CancellationToken::new(),
            self.nodes
                .iter_mut()
                .filter(|node| node.is_running())
                .map(|node| node.stop()),
        )
        .await
    }

    /// Stop every node, remove the containers and network of the chain and (unless data is
    /// kept) the host root directory.
    ///
    /// Every step is attempted even if an earlier one fails; the first failure is returned.
    pub async fn teardown(mut self) -> Result<(), Error> {
        self.torn_down = true;
        let stopped = self.stop().await;
        if let Err(err) = &stopped {
            warn!(chain_id = self.chain_id(), ?err, "failed to stop nodes");
        }
        let removed = self.network.teardown().await;
        let closed = match self.root.take() {
            Some(root) if !self.config.keep_data => root.close().map_err(Error::from),
            _ => {
                info!(root = ?self.root_path, "kept root directory");
                Ok(())
            }
        };
        info!(chain_id = self.chain_id(), "torn down");
        stopped.and(removed).and(closed)
    }
}

impl<R: ContainerRuntime, D: Dialer> Drop for Chain<R, D> {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!(
                chain_id = self.config.chain_id.as_str(),
                "chain dropped without teardown"
            );
        }
    }
}
