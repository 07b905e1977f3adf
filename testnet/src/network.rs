//! Lifecycle of the container network shared by the nodes of a chain.

use crate::{utils::join_all, Config, ContainerRuntime, Error, NetworkId};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The network of one chain, identified by name.
pub struct Network<R: ContainerRuntime> {
    runtime: R,
    name: String,
    labels: BTreeMap<String, String>,
    id: Option<NetworkId>,
}

impl<R: ContainerRuntime> Network<R> {
    pub fn new(runtime: R, config: &Config) -> Self {
        Self {
            runtime,
            name: config.network.clone(),
            labels: BTreeMap::from([(config.label_key.clone(), config.chain_id.clone())]),
            id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime identifier of the network, if it was created by this handle.
    pub fn id(&self) -> Option<&NetworkId> {
        self.id.as_ref()
    }

    /// Remove every container attached to the network and every network with its name.
    ///
    /// Does nothing if neither exists.
    pub async fn reset(&mut self) -> Result<(), Error> {
        // Containers must be gone before their network can be removed
        let containers = self.runtime.list_by_network(&self.name).await?;
        if !containers.is_empty() {
            info!(
                network = self.name.as_str(),
                containers = containers.len(),
                "removing containers"
            );
        }
        let runtime = &self.runtime;
        let name = self.name.as_str();
        join_all(
            &CancellationToken::new(),
            containers.iter().map(|container| async move {
                runtime.remove(container, true).await?;
                debug!(network = name, %container, "removed container");
                Ok(())
            }),
        )
        .await?;

        // Remove networks one at a time
        for network in self.runtime.find_networks(&self.name).await? {
            self.runtime.remove_network(&network).await?;
            info!(network = self.name.as_str(), id = %network, "removed network");
        }
        self.id = None;
        Ok(())
    }

    /// Create the network, labeled with the chain it belongs to.
    pub async fn create(&mut self) -> Result<&NetworkId, Error> {
        let id = self
            .runtime
            .create_network(&self.name, &self.labels)
            .await?;
        info!(network = self.name.as_str(), %id, "created network");
        Ok(self.id.insert(id))
    }

    /// Remove the network and everything attached to it.
    pub async fn teardown(&mut self) -> Result<(), Error> {
        self.reset().await
    }
}
