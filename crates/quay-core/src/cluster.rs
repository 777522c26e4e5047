//! Cluster view — the set of container-host nodes known to the platform.
//!
//! Each node carries an address and a free-form metadata map. The
//! scheduler recognizes two reserved metadata keys: `pool` (required for
//! candidacy) and the configured total-memory key (required for
//! memory-aware placement).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the pool a node belongs to.
pub const POOL_METADATA: &str = "pool";

/// A container-host node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Node {
    /// Full address, e.g. `http://10.0.0.1:2375`.
    pub address: String,
    pub metadata: HashMap<String, String>,
}

impl Node {
    /// The bare host of the node address: scheme and port stripped.
    pub fn host(&self) -> String {
        url_to_host(&self.address)
    }
}

/// Strip scheme, port and path from an address, leaving the host.
pub fn url_to_host(address: &str) -> String {
    let rest = match address.find("://") {
        Some(idx) => &address[idx + 3..],
        None => address,
    };
    let rest = rest.split('/').next().unwrap_or(rest);
    rest.split(':').next().unwrap_or(rest).to_string()
}

/// An enumerable snapshot of the cluster's nodes.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    nodes: Vec<Node>,
}

impl ClusterView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Re-registering an address replaces its metadata.
    pub fn register(&mut self, node: Node) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.address == node.address) {
            *existing = node;
        } else {
            self.nodes.push(node);
        }
    }

    /// Remove a node by address. Returns true if it existed.
    pub fn unregister(&mut self, address: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.address != address);
        self.nodes.len() != before
    }

    /// All registered nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Nodes whose metadata carries the given key/value pair.
    pub fn nodes_for_metadata(&self, key: &str, value: &str) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|n| n.metadata.get(key).is_some_and(|v| v == value))
            .cloned()
            .collect()
    }
}
