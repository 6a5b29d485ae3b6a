//! ASCII rendering of a cluster's replication tree.
//!
//! The renderer consumes the Inventory snapshot only; it performs no
//! probes and no refactoring. Each node is drawn depth-indented under its
//! upstream, prefixed with `+ ` when both replication threads run and
//! `- ` otherwise. The root (the node whose upstream is absent from the
//! cluster) carries no prefix.

use std::collections::BTreeMap;

use super::error::TopologyResult;
use super::node::Node;
use super::traits::Inventory;
use crate::types::NodeKey;

/// Render the replication tree of `cluster` from the inventory snapshot.
///
/// Returns an empty string for an unknown or empty cluster.
pub async fn cluster_topology(
    inventory: &dyn Inventory,
    cluster: &str,
) -> TopologyResult<String> {
    let nodes = inventory.read_cluster_instances(cluster).await?;
    Ok(render_nodes(&nodes))
}

/// Render a pre-fetched set of nodes as a tree.
pub fn render_nodes(nodes: &[Node]) -> String {
    let by_key: BTreeMap<&NodeKey, &Node> = nodes.iter().map(|n| (&n.key, n)).collect();

    // upstream -> children, children sorted by key for stable output.
    let mut children: BTreeMap<&NodeKey, Vec<&Node>> = BTreeMap::new();
    let mut root: Option<&Node> = None;
    for node in nodes {
        match node.upstream.as_ref().filter(|up| by_key.contains_key(up)) {
            Some(upstream) => children.entry(upstream).or_default().push(node),
            // Upstream missing from the cluster: this is the root.
            None => root = Some(node),
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| a.key.cmp(&b.key));
    }

    let Some(root) = root else {
        return String::new();
    };
    let mut lines = Vec::with_capacity(nodes.len());
    render_entry(0, root, &children, &mut lines);
    lines.join("\n")
}

fn render_entry(
    depth: usize,
    node: &Node,
    children: &BTreeMap<&NodeKey, Vec<&Node>>,
    lines: &mut Vec<String>,
) {
    let prefix = if depth > 0 {
        let glyph = if node.replication_running() { "+" } else { "-" };
        format!("{}{} ", " ".repeat((depth - 1) * 2), glyph)
    } else {
        String::new()
    };
    lines.push(format!("{prefix}{}", node.key));
    if let Some(replicas) = children.get(&node.key) {
        for replica in replicas {
            render_entry(depth + 1, replica, children, lines);
        }
    }
}
