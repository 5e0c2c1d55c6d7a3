//! Mesh topology definitions for SRCR simulations
//!
//! A [`Mesh`] is the ground truth the simulator runs on: which nodes exist,
//! which pairs can hear each other, and what each directed link costs.
//! Builders cover the usual shapes:
//! - Line, ring, star, full mesh and grid with a uniform link cost
//! - Random with per-link random costs (seeded)
//! - The diamond used throughout the docs and tests
//! - Custom: built from an edge list

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use srcr_core::{Metric, MetricOracle, NodeAddr};

use crate::error::{SimError, SimResult};

/// Mesh shared between the simulator, the air medium and metric oracles
pub type SharedMesh = Arc<RwLock<Mesh>>;

/// State of one directed link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkState {
    pub metric: Metric,
    pub up: bool,
}

/// A mesh network topology
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    nodes: BTreeSet<NodeAddr>,
    /// Directed links, `(from, to)`
    links: BTreeMap<(NodeAddr, NodeAddr), LinkState>,
}

impl Mesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeAddr) {
        self.nodes.insert(node);
    }

    /// Connect two nodes with the same cost in both directions
    pub fn connect(&mut self, a: NodeAddr, b: NodeAddr, metric: Metric) {
        self.connect_asymmetric(a, b, metric, metric);
    }

    /// Connect two nodes with per-direction costs
    pub fn connect_asymmetric(&mut self, a: NodeAddr, b: NodeAddr, a_to_b: Metric, b_to_a: Metric) {
        if a == b {
            return;
        }
        self.add_node(a);
        self.add_node(b);
        self.links.insert((a, b), LinkState { metric: a_to_b, up: true });
        self.links.insert((b, a), LinkState { metric: b_to_a, up: true });
    }

    /// Take the link between `a` and `b` up or down, both directions
    ///
    /// Returns `false` if the nodes are not connected.
    pub fn set_link_up(&mut self, a: NodeAddr, b: NodeAddr, up: bool) -> bool {
        let mut found = false;
        for key in [(a, b), (b, a)] {
            if let Some(link) = self.links.get_mut(&key) {
                link.up = up;
                found = true;
            }
        }
        found
    }

    /// Change the cost of the directed link `from -> to`
    pub fn set_metric(&mut self, from: NodeAddr, to: NodeAddr, metric: Metric) -> bool {
        match self.links.get_mut(&(from, to)) {
            Some(link) => {
                link.metric = metric;
                true
            }
            None => false,
        }
    }

    pub fn link(&self, from: NodeAddr, to: NodeAddr) -> Option<LinkState> {
        self.links.get(&(from, to)).copied()
    }

    /// Cost of `from -> to`, 0 when there is no usable link
    pub fn metric(&self, from: NodeAddr, to: NodeAddr) -> Metric {
        match self.link(from, to) {
            Some(link) if link.up => link.metric,
            _ => 0,
        }
    }

    /// Whether `from` can currently reach `to` in one hop
    pub fn is_up(&self, from: NodeAddr, to: NodeAddr) -> bool {
        self.link(from, to).is_some_and(|l| l.up)
    }

    pub fn contains(&self, node: &NodeAddr) -> bool {
        self.nodes.contains(node)
    }

    /// Nodes `node` has a link to, up or down
    pub fn neighbors(&self, node: NodeAddr) -> Vec<NodeAddr> {
        self.links
            .iter()
            .filter(|((from, _), _)| *from == node)
            .map(|((_, to), _)| *to)
            .collect()
    }

    /// Nodes that currently hear a broadcast from `node`
    pub fn reachable_neighbors(&self, node: NodeAddr) -> Vec<NodeAddr> {
        self.links
            .iter()
            .filter(|((from, _), link)| *from == node && link.up)
            .map(|((_, to), _)| *to)
            .collect()
    }

    pub fn node_ids(&self) -> Vec<NodeAddr> {
        self.nodes.iter().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected connections
    pub fn edge_count(&self) -> usize {
        self.links.keys().filter(|(a, b)| a < b).count()
    }

    /// Print a simple ASCII visualization of the mesh
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Mesh Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Edges: {}\n\n", self.edge_count()));

        for node in &self.nodes {
            let neighbors: Vec<String> = self
                .neighbors(*node)
                .into_iter()
                .filter_map(|n| {
                    let link = self.link(*node, n)?;
                    let down = if link.up { "" } else { " down" };
                    Some(format!("{}({}{})", n.short_id(), link.metric, down))
                })
                .collect();
            output.push_str(&format!("  {} -> [{}]\n", node.short_id(), neighbors.join(", ")));
        }
        output
    }

    /// Wrap the mesh for sharing with the air and the oracles
    pub fn into_shared(self) -> SharedMesh {
        Arc::new(RwLock::new(self))
    }
}

/// Metric oracle for one node, reading link costs off the shared mesh
pub struct MeshMetric {
    node: NodeAddr,
    mesh: SharedMesh,
}

impl MeshMetric {
    pub fn new(node: NodeAddr, mesh: SharedMesh) -> Self {
        Self { node, mesh }
    }
}

impl MetricOracle for MeshMetric {
    fn forward_metric(&self, neighbor: &NodeAddr) -> Metric {
        self.mesh.read().metric(self.node, *neighbor)
    }

    fn reverse_metric(&self, neighbor: &NodeAddr) -> Metric {
        self.mesh.read().metric(*neighbor, self.node)
    }
}

/// Address of the `i`-th simulated node (0-based); the first 26 print as A..Z
pub fn node_addr(i: usize) -> NodeAddr {
    NodeAddr::new(10, 0, 0, (i + 1) as u8)
}

/// Address of a lettered node
pub fn letter(c: char) -> SimResult<NodeAddr> {
    NodeAddr::from_letter(c).ok_or(SimError::InvalidName(c))
}

/// Builder for creating mesh topologies
pub struct MeshBuilder {
    nodes: Vec<NodeAddr>,
    cost: Metric,
}

impl MeshBuilder {
    /// A builder for `node_count` nodes (10.0.0.1, 10.0.0.2, ...) with link cost 1
    pub fn new(node_count: usize) -> SimResult<Self> {
        if node_count == 0 || node_count > 254 {
            return Err(SimError::InvalidSize(node_count));
        }
        Ok(Self {
            nodes: (0..node_count).map(node_addr).collect(),
            cost: 1,
        })
    }

    /// Use `cost` for every link of the uniform shapes
    pub fn with_cost(mut self, cost: Metric) -> Self {
        self.cost = cost.max(1);
        self
    }

    fn empty(&self) -> Mesh {
        let mut mesh = Mesh::new();
        for node in &self.nodes {
            mesh.add_node(*node);
        }
        mesh
    }

    /// A - B - C - D - ...
    pub fn line(self) -> Mesh {
        let mut mesh = self.empty();
        for pair in self.nodes.windows(2) {
            mesh.connect(pair[0], pair[1], self.cost);
        }
        mesh
    }

    /// A - B - C - ... - A
    pub fn ring(self) -> Mesh {
        let mut mesh = self.empty();
        for i in 0..self.nodes.len() {
            let next = (i + 1) % self.nodes.len();
            mesh.connect(self.nodes[i], self.nodes[next], self.cost);
        }
        mesh
    }

    /// First node in the center, connected to all others
    pub fn star(self) -> Mesh {
        let mut mesh = self.empty();
        let center = self.nodes[0];
        for node in self.nodes.iter().skip(1) {
            mesh.connect(center, *node, self.cost);
        }
        mesh
    }

    /// Every node connected to every other
    pub fn full_mesh(self) -> Mesh {
        let mut mesh = self.empty();
        for i in 0..self.nodes.len() {
            for j in (i + 1)..self.nodes.len() {
                mesh.connect(self.nodes[i], self.nodes[j], self.cost);
            }
        }
        mesh
    }

    /// Row-major grid `width` nodes wide; the last row may be partial
    pub fn grid(self, width: usize) -> Mesh {
        let mut mesh = self.empty();
        let width = width.max(1);
        for i in 0..self.nodes.len() {
            if (i + 1) % width != 0 && i + 1 < self.nodes.len() {
                mesh.connect(self.nodes[i], self.nodes[i + 1], self.cost);
            }
            if i + width < self.nodes.len() {
                mesh.connect(self.nodes[i], self.nodes[i + width], self.cost);
            }
        }
        mesh
    }

    /// Random links with probability `connection_probability`, each with a
    /// random cost in `1..=max_cost` per direction
    ///
    /// Every node ends up with at least one link. The mesh is not
    /// guaranteed to be connected.
    pub fn random(self, connection_probability: f64, max_cost: Metric, seed: u64) -> Mesh {
        let mut mesh = self.empty();
        let mut rng = StdRng::seed_from_u64(seed);
        let max_cost = max_cost.max(1);
        let n = self.nodes.len();

        for i in 0..n {
            for j in (i + 1)..n {
                if rng.random::<f64>() < connection_probability {
                    let ab = rng.random_range(1..=max_cost);
                    let ba = rng.random_range(1..=max_cost);
                    mesh.connect_asymmetric(self.nodes[i], self.nodes[j], ab, ba);
                }
            }
        }

        if n > 1 {
            for i in 0..n {
                if mesh.neighbors(self.nodes[i]).is_empty() {
                    let other = (i + rng.random_range(1..n)) % n;
                    let cost = rng.random_range(1..=max_cost);
                    mesh.connect(self.nodes[i], self.nodes[other], cost);
                }
            }
        }
        mesh
    }

    /// The four-node diamond: A-B (1), B-D (2), A-C (2), C-D (3)
    ///
    /// A reaches D through B at total cost 3 or through C at cost 5.
    pub fn diamond() -> Mesh {
        let [a, b, c, d] = [0, 1, 2, 3].map(node_addr);
        let mut mesh = Mesh::new();
        mesh.connect(a, b, 1);
        mesh.connect(b, d, 2);
        mesh.connect(a, c, 2);
        mesh.connect(c, d, 3);
        mesh
    }
}

/// Create a custom mesh from `(a, b, cost)` triples of lettered nodes
pub fn from_edges(edges: &[(char, char, Metric)]) -> SimResult<Mesh> {
    let mut mesh = Mesh::new();
    for (a, b, cost) in edges {
        mesh.connect(letter(*a)?, letter(*b)?, *cost);
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    #[test]
    fn test_ring_topology() {
        let mesh = MeshBuilder::new(4).unwrap().ring();
        assert_eq!(mesh.node_count(), 4);
        assert_eq!(mesh.edge_count(), 4); // A-B, B-C, C-D, D-A

        assert!(mesh.is_up(make_id('A'), make_id('B')));
        assert!(mesh.is_up(make_id('D'), make_id('A'))); // Wrap around
        assert!(!mesh.is_up(make_id('A'), make_id('C'))); // Not direct
    }

    #[test]
    fn test_full_mesh() {
        let mesh = MeshBuilder::new(4).unwrap().with_cost(3).full_mesh();
        assert_eq!(mesh.edge_count(), 6);
        assert_eq!(mesh.metric(make_id('B'), make_id('D')), 3);
    }

    #[test]
    fn test_grid() {
        // A B C
        // D E F
        // G
        let mesh = MeshBuilder::new(7).unwrap().grid(3);
        assert!(mesh.is_up(make_id('A'), make_id('B')));
        assert!(!mesh.is_up(make_id('C'), make_id('D')));
        assert!(mesh.is_up(make_id('C'), make_id('F')));
        assert!(mesh.is_up(make_id('D'), make_id('G')));
        assert_eq!(mesh.edge_count(), 8);
    }

    #[test]
    fn test_random_is_seeded() {
        let a = MeshBuilder::new(12).unwrap().random(0.3, 5, 42);
        let b = MeshBuilder::new(12).unwrap().random(0.3, 5, 42);
        assert_eq!(a.visualize(), b.visualize());
        for node in a.node_ids() {
            assert!(!a.neighbors(node).is_empty());
            for n in a.neighbors(node) {
                assert!((1..=5).contains(&a.metric(node, n)));
            }
        }
    }

    #[test]
    fn test_link_down_reads_as_unusable() {
        let mut mesh = MeshBuilder::diamond();
        assert_eq!(mesh.metric(make_id('B'), make_id('D')), 2);

        assert!(mesh.set_link_up(make_id('D'), make_id('B'), false));
        assert_eq!(mesh.metric(make_id('B'), make_id('D')), 0);
        assert_eq!(mesh.metric(make_id('D'), make_id('B')), 0);
        assert!(!mesh.reachable_neighbors(make_id('D')).contains(&make_id('B')));
        assert!(mesh.neighbors(make_id('D')).contains(&make_id('B')));

        assert!(!mesh.set_link_up(make_id('A'), make_id('D'), false));
    }

    #[test]
    fn test_mesh_metric_oracle() {
        let mut mesh = Mesh::new();
        mesh.connect_asymmetric(make_id('A'), make_id('B'), 2, 7);
        let shared = mesh.into_shared();

        let oracle = MeshMetric::new(make_id('A'), shared.clone());
        assert_eq!(oracle.forward_metric(&make_id('B')), 2);
        assert_eq!(oracle.reverse_metric(&make_id('B')), 7);
        assert_eq!(oracle.forward_metric(&make_id('Z')), 0);

        shared.write().set_metric(make_id('A'), make_id('B'), 4);
        assert_eq!(oracle.forward_metric(&make_id('B')), 4);
    }

    #[test]
    fn test_custom_topology() {
        let mesh = from_edges(&[('A', 'B', 1), ('A', 'C', 2), ('B', 'D', 1)]).unwrap();
        assert_eq!(mesh.node_count(), 4);
        assert_eq!(mesh.edge_count(), 3);
        assert!(!mesh.is_up(make_id('A'), make_id('D')));
        assert!(matches!(from_edges(&[('a', 'B', 1)]), Err(SimError::InvalidName('a'))));
    }

    #[test]
    fn test_builder_bounds() {
        assert!(matches!(MeshBuilder::new(0), Err(SimError::InvalidSize(0))));
        assert!(MeshBuilder::new(255).is_err());
        assert_eq!(MeshBuilder::new(254).unwrap().line().node_count(), 254);
    }
}
