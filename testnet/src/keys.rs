//! Key material of a node: the validator key stored in its keyring and the node key that
//! determines its network identity.

use crate::Error;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{future::Future, path::Path};
use tokio_util::sync::CancellationToken;

/// Name of the key every validator signs its genesis transaction with.
pub const VALIDATOR_KEY: &str = "validator";

/// Length (in bytes) of a node ID before hex encoding.
const NODE_ID_LENGTH: usize = 20;

/// A named key and the account address it controls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    pub name: String,
    pub address: String,
}

/// Resolves named keys to addresses.
pub trait KeyStore {
    /// Fetch key `name`, waiting until it is available.
    fn get_key(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Key, Error>> + Send;
}

#[derive(Deserialize)]
struct NodeKeyFile {
    priv_key: PrivKey,
}

#[derive(Deserialize)]
struct PrivKey {
    value: String,
}

/// Derive the node ID from the contents of a `node_key.json` file.
///
/// The private key is a base64-encoded Ed25519 keypair (seed followed by the public key); the
/// node ID is the hex encoding of the first 20 bytes of the SHA-256 digest of the public key.
pub fn node_id(contents: &[u8]) -> Result<String, String> {
    let file: NodeKeyFile = serde_json::from_slice(contents).map_err(|e| e.to_string())?;
    let keypair = STANDARD
        .decode(file.priv_key.value.trim())
        .map_err(|e| e.to_string())?;
    if keypair.len() != 64 {
        return Err(format!("expected 64 byte keypair, found {}", keypair.len()));
    }
    let digest = Sha256::digest(&keypair[32..]);
    Ok(hex::encode(&digest[..NODE_ID_LENGTH]))
}

/// Read `path` and derive the node ID it encodes.
pub async fn load_node_id(path: &Path) -> Result<String, Error> {
    let contents = tokio::fs::read(path).await.map_err(|e| Error::NodeKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    node_id(&contents).map_err(|reason| Error::NodeKey {
        path: path.to_path_buf(),
        reason,
    })
}

/// Encode `keypair` the way `init` writes it to `node_key.json`.
pub fn encode_node_key(keypair: &[u8; 64]) -> String {
    serde_json::json!({
        "priv_key": {
            "type": "tendermint/PrivKeyEd25519",
            "value": STANDARD.encode(keypair),
        }
    })
    .to_string()
}

/// Parse the output of `keys show <name> --address`.
pub(crate) fn parse_address(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let mut keypair = [7u8; 64];
        keypair[32..].copy_from_slice(&[9u8; 32]);
        let contents = encode_node_key(&keypair);

        let expected = hex::encode(&Sha256::digest([9u8; 32])[..NODE_ID_LENGTH]);
        let id = node_id(contents.as_bytes()).unwrap();
        assert_eq!(id, expected);
        assert_eq!(id.len(), 40);
    }

    #[test]
    fn test_node_id_rejects_short_key() {
        let contents = r#"{"priv_key":{"type":"tendermint/PrivKeyEd25519","value":"AAAA"}}"#;
        assert!(node_id(contents.as_bytes()).is_err());
        assert!(node_id(b"{}").is_err());
    }

    #[tokio::test]
    async fn test_load_node_id_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_node_id(&dir.path().join("node_key.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeKey { .. }));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu\n"),
            Some("cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu".into())
        );
        assert_eq!(parse_address("\n \n"), None);
    }
}
