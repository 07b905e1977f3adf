//! Encode the set of peers every node dials on startup.

use std::fmt;

/// Address of one node on the chain network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// Node ID derived from the node key.
    pub id: String,

    /// Hostname the node is reachable at from other containers.
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// Join `peers` (in node order) into a persistent peer string.
pub fn peer_string(peers: &[Peer]) -> String {
    peers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::P2P_PORT;

    fn peer(i: usize) -> Peer {
        Peer {
            id: format!("{i:040x}"),
            host: format!("node-ibc-test-1-{i}"),
            port: P2P_PORT,
        }
    }

    #[test]
    fn test_peer_string() {
        assert_eq!(peer_string(&[]), "");
        assert_eq!(
            peer_string(&[peer(0)]),
            "0000000000000000000000000000000000000000@node-ibc-test-1-0:26656"
        );
        assert_eq!(
            peer_string(&[peer(1), peer(2)]),
            "0000000000000000000000000000000000000001@node-ibc-test-1-1:26656,\
             0000000000000000000000000000000000000002@node-ibc-test-1-2:26656"
        );
    }

    #[test]
    fn test_append_preserves_prefix() {
        let mut peers = Vec::new();
        let mut previous = peer_string(&peers);
        for i in 0..8 {
            peers.push(peer(i));
            let current = peer_string(&peers);
            if !previous.is_empty() {
                assert!(current.starts_with(&format!("{previous},")));
            }
            assert!(!current.ends_with(','));
            assert_eq!(current.split(',').count(), i + 1);
            previous = current;
        }
    }
}
