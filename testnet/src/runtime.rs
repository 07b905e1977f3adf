use crate::Error;
use std::{collections::BTreeMap, fmt, future::Future, path::PathBuf, time::Duration};

/// Identifier of a container assigned by the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a network assigned by the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub String);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host directory mounted into a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

/// Everything needed to launch a container.
#[derive(Clone, Debug)]
pub struct RunSpec {
    /// Container name (unique among live containers).
    pub name: String,

    /// Hostname other containers on the network resolve the container by.
    pub hostname: String,

    pub repository: String,
    pub tag: String,
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,

    /// Container ports (e.g. `26657/tcp`) published on random host ports.
    pub ports: Vec<String>,

    /// Name of the network to attach to.
    pub network: String,
    pub labels: BTreeMap<String, String>,
}

/// Interface to the container engine hosting the nodes.
pub trait ContainerRuntime: Clone + Send + Sync + 'static {
    /// Launch a container in the background.
    fn run(&self, spec: RunSpec) -> impl Future<Output = Result<ContainerId, Error>> + Send;

    /// Wait for a container to exit, returning its exit code.
    fn wait(&self, id: &ContainerId) -> impl Future<Output = Result<i64, Error>> + Send;

    /// Exit code of a container that has exited, or `None` while it is still running.
    fn exit_code(
        &self,
        id: &ContainerId,
    ) -> impl Future<Output = Result<Option<i64>, Error>> + Send;

    /// Return everything a container has written to stdout and stderr.
    fn logs(&self, id: &ContainerId) -> impl Future<Output = Result<String, Error>> + Send;

    /// Stop a container, killing it if it has not exited after `timeout`.
    fn stop(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Remove a container (`force` removes it even if it is running).
    fn remove(&self, id: &ContainerId, force: bool)
        -> impl Future<Output = Result<(), Error>> + Send;

    /// List all containers (running or not) attached to `network`.
    fn list_by_network(
        &self,
        network: &str,
    ) -> impl Future<Output = Result<Vec<ContainerId>, Error>> + Send;

    /// Create a network named `name`.
    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<NetworkId, Error>> + Send;

    /// List all networks named exactly `name`.
    fn find_networks(&self, name: &str)
        -> impl Future<Output = Result<Vec<NetworkId>, Error>> + Send;

    /// Remove a network (fails while containers are attached).
    fn remove_network(&self, id: &NetworkId) -> impl Future<Output = Result<(), Error>> + Send;

    /// Host address (`host:port`) a published container port is reachable at.
    fn host_port(
        &self,
        id: &ContainerId,
        port: &str,
    ) -> impl Future<Output = Result<String, Error>> + Send;
}
