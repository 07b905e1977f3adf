use commonware_testnet::{mocks::Mock, Chain, Config, Image, NodeId};
use std::{path::Path, time::Duration};

/// Configuration of a chain whose data lives under `root`.
pub fn config(chain_id: &str, root: &Path) -> Config {
    Config::new(chain_id, Image::gaia())
        .with_root(root.to_path_buf())
        .with_warmup(Duration::from_secs(2))
}

/// Create a chain on `mock` with `validators` validators followed by `full_nodes` full nodes.
pub async fn chain(
    mock: &Mock,
    config: Config,
    validators: usize,
    full_nodes: usize,
) -> (Chain<Mock, Mock>, Vec<NodeId>) {
    let mut chain = Chain::new(mock.clone(), mock.clone(), config)
        .await
        .expect("failed to create chain");
    let mut ids = Vec::new();
    for i in 0..validators + full_nodes {
        ids.push(chain.add_node(i < validators).expect("failed to add node"));
    }
    (chain, ids)
}
