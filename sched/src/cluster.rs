use serde::{Deserialize, Serialize};

use model::Hosts;

/// One compute node in the cluster inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    pub cores: usize,
}

/// Divide the node inventory among `ndir` directions running concurrently.
///
/// Directions are spread round-robin across nodes before any node takes a
/// second direction, and each direction's core share is its node's cores
/// (capped at `ncpu`) divided by *all* directions assigned to that node, so
/// the summed allocation never exceeds cluster capacity. A batch larger than
/// `nodes * ndir_per_node` squeezes the shares further and gets a warning;
/// shares never drop below one core.
///
/// An empty inventory degrades to a single-node, single-core allocation per
/// direction instead of failing; starvation must not abort the run.
pub fn divide_nodes(
    ndir: usize,
    nodes: &[ClusterNode],
    ndir_per_node: usize,
    ncpu: usize,
) -> Vec<Hosts> {
    if nodes.is_empty() {
        log::warn!("no cluster nodes configured; falling back to local single-core allocations");
        return vec![Hosts::local(); ndir];
    }
    let ndir_per_node = ndir_per_node.max(1);

    // round-robin node index per direction:
    let assigned: Vec<usize> = (0..ndir).map(|i| i % nodes.len()).collect();

    // how many directions share each node:
    let mut sharing = vec![0usize; nodes.len()];
    for &node_idx in &assigned {
        sharing[node_idx] += 1;
    }
    if sharing.iter().any(|&share| share > ndir_per_node) {
        log::warn!(
            "batch of {ndir} directions overfills the {} node slots; core shares are reduced \
             to stay within node capacity",
            nodes.len() * ndir_per_node
        );
    }

    assigned
        .iter()
        .map(|&node_idx| {
            let node = &nodes[node_idx];
            let cores = (node.cores.min(ncpu) / sharing[node_idx]).max(1);
            Hosts {
                nodes: vec![node.name.clone()],
                cores_per_node: cores,
            }
        })
        .collect()
}
