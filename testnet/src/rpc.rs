//! Status queries against a running node.

use crate::Error;
use serde::Deserialize;
use std::{future::Future, time::Duration};

/// Sync state reported by a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncInfo {
    pub latest_height: i64,
    pub catching_up: bool,
}

/// Client bound to the status endpoint of one node.
pub trait StatusClient: Send + Sync + 'static {
    fn status(&self) -> impl Future<Output = Result<SyncInfo, Error>> + Send;
}

/// Constructs [StatusClient]s for published RPC endpoints.
pub trait Dialer: Clone + Send + Sync + 'static {
    type Client: StatusClient;

    /// Bind a client to `endpoint` (`host:port`).
    fn dial(&self, endpoint: &str) -> Result<Self::Client, Error>;
}

/// Dials Tendermint JSON-RPC endpoints over HTTP.
#[derive(Clone, Debug)]
pub struct Http {
    timeout: Duration,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl Http {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Dialer for Http {
    type Client = HttpClient;

    fn dial(&self, endpoint: &str) -> Result<HttpClient, Error> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Resource(format!("failed to build http client: {e}")))?;
        Ok(HttpClient {
            client,
            endpoint: endpoint.to_string(),
            url: format!("http://{endpoint}/status"),
        })
    }
}

/// [StatusClient] issuing `GET /status` requests.
pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    url: String,
}

impl StatusClient for HttpClient {
    async fn status(&self) -> Result<SyncInfo, Error> {
        let query = |reason: String| Error::Query {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| query(e.to_string()))?;
        if !response.status().is_success() {
            return Err(query(format!("unexpected status {}", response.status())));
        }
        let body = response.bytes().await.map_err(|e| query(e.to_string()))?;
        parse_status(&body).map_err(query)
    }
}

#[derive(Deserialize)]
struct Response {
    result: StatusResult,
}

#[derive(Deserialize)]
struct StatusResult {
    sync_info: RawSyncInfo,
}

#[derive(Deserialize)]
struct RawSyncInfo {
    latest_block_height: String,
    catching_up: bool,
}

/// Parse the body of a `/status` response.
///
/// Heights are encoded as strings.
pub fn parse_status(body: &[u8]) -> Result<SyncInfo, String> {
    let response: Response = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let sync_info = response.result.sync_info;
    let latest_height = sync_info
        .latest_block_height
        .parse()
        .map_err(|_| format!("invalid height: {}", sync_info.latest_block_height))?;
    Ok(SyncInfo {
        latest_height,
        catching_up: sync_info.catching_up,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let body = br#"{
            "jsonrpc": "2.0",
            "id": -1,
            "result": {
                "node_info": {"id": "3e2bd2bd1fb9b8bd3bbbef9bd9a3b9e8a8e8c2a1", "network": "ibc-test-1"},
                "sync_info": {
                    "latest_block_hash": "A1B2",
                    "latest_block_height": "12",
                    "catching_up": false
                }
            }
        }"#;
        assert_eq!(
            parse_status(body).unwrap(),
            SyncInfo {
                latest_height: 12,
                catching_up: false
            }
        );
    }

    #[test]
    fn test_parse_status_rejects_invalid_height() {
        let body = br#"{"result":{"sync_info":{"latest_block_height":"twelve","catching_up":true}}}"#;
        assert!(parse_status(body).is_err());
        assert!(parse_status(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let client = Http::new(Duration::from_millis(200))
            .dial("127.0.0.1:1")
            .unwrap();
        let err = client.status().await.unwrap_err();
        assert!(err.is_transient());
    }
}
