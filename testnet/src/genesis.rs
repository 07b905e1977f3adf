//! Assemble one genesis document from every validator's gentx and distribute it.

use crate::{utils::join_all, ContainerRuntime, Dialer, Error, Node};
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Move `from` to `to`, falling back to copy and remove when a rename is not possible
/// (e.g. across filesystems).
async fn relocate(from: &Path, to: &Path) -> Result<(), Error> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await?;
    Ok(())
}

/// Contribute `validator`'s gentx to `coordinator`.
///
/// The validator funds and signs in its own home, its account is added to the coordinator's
/// draft genesis and its gentx is moved into the coordinator's gentx directory.
async fn contribute<R: ContainerRuntime, D: Dialer>(
    coordinator: &Node<R, D>,
    validator: &Node<R, D>,
    token: &CancellationToken,
) -> Result<(), Error> {
    let key = validator.create_genesis_tx(token).await?;
    coordinator.add_genesis_account(&key.address, token).await?;
    let node_id = validator.node_id().await?;
    relocate(
        &validator.gentx_path(&node_id),
        &coordinator.gentx_path(&node_id),
    )
    .await
    .map_err(|e| validator.context(e))?;
    debug!(
        coordinator = coordinator.name(),
        validator = validator.name(),
        node_id = node_id.as_str(),
        "relocated gentx"
    );
    Ok(())
}

/// Build the genesis on `coordinator` from its own gentx and those of `validators`, then
/// write identical copies to every node in `nodes`.
///
/// Nothing is distributed unless every validator contributed successfully. Returns the
/// `(node, hash)` of every distributed genesis.
pub(crate) async fn create<R: ContainerRuntime, D: Dialer>(
    coordinator: &Node<R, D>,
    validators: &[&Node<R, D>],
    nodes: &[&Node<R, D>],
    token: &CancellationToken,
) -> Result<Vec<(String, String)>, Error> {
    // The coordinator's account must exist before it runs collect-gentxs
    coordinator.create_genesis_tx(token).await?;
    info!(coordinator = coordinator.name(), "created coordinator gentx");

    // Collect contributions from every other validator
    let child = token.child_token();
    join_all(
        &child,
        validators
            .iter()
            .map(|validator| contribute(coordinator, *validator, &child)),
    )
    .await?;
    coordinator.collect_gentxs(token).await?;
    info!(
        coordinator = coordinator.name(),
        validators = validators.len() + 1,
        "collected gentxs"
    );

    // Distribute the final genesis
    let genesis = coordinator.read_genesis().await?;
    for node in nodes {
        if node.name() != coordinator.name() {
            node.write_genesis(&genesis).await?;
        }
    }
    verify(coordinator, nodes).await
}

/// Hash the genesis of every node, failing if any differs from the coordinator's.
async fn verify<R: ContainerRuntime, D: Dialer>(
    coordinator: &Node<R, D>,
    nodes: &[&Node<R, D>],
) -> Result<Vec<(String, String)>, Error> {
    let expected = coordinator.genesis_hash().await?;
    let mut hashes = Vec::with_capacity(nodes.len());
    for node in nodes {
        let hash = node.genesis_hash().await?;
        info!(node = node.name(), hash = hash.as_str(), "genesis");
        if hash != expected {
            return Err(Error::GenesisMismatch {
                node: node.name().to_string(),
                expected,
                found: hash,
            });
        }
        hashes.push((node.name().to_string(), hash));
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relocate() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a").join("gentx-1.json");
        let to = dir.path().join("b").join("config").join("gentx").join("gentx-1.json");
        fs::create_dir_all(from.parent().unwrap()).await.unwrap();
        fs::write(&from, b"{}").await.unwrap();

        relocate(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_relocate_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = relocate(&dir.path().join("missing"), &dir.path().join("to"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
