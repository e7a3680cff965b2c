//! Edge nodes, their ranking and the consistent-hash ring used to pin content to a subset.

use std::{cmp::Ordering, collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

/// Upper bound of [`Node::weight`].
pub const MAX_NODE_WEIGHT: f64 = 100.0;
const DISTANCE_IMPORTANCE: f64 = 0.8;
const WEIGHT_IMPORTANCE: f64 = 1.0 - DISTANCE_IMPORTANCE;
/// Virtual ring points per unit of weight.
const POINTS_PER_WEIGHT: f64 = 0.4;

/// An edge cache serving content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier reported by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Address of the node.
    #[serde(default)]
    pub ip: String,
    /// Preference in `0..=100`, higher is better.
    #[serde(default)]
    pub weight: f64,
    /// Distance to the client, lower is better.
    #[serde(default)]
    pub distance: f64,
    /// Base URL requests are sent to.
    pub url: String,
}

impl Node {
    /// A node with no ranking information.
    pub fn new(url: impl Into<String>) -> Self {
        Node {
            id: None,
            ip: String::new(),
            weight: 0.0,
            distance: 0.0,
            url: url.into(),
        }
    }

    /// Sets the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the distance.
    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = distance;
        self
    }
}

/// Score of a node, lower is better.
///
/// Distance is normalized by the largest distance in the set, weight by [`MAX_NODE_WEIGHT`].
pub fn score(node: &Node, max_distance: f64) -> f64 {
    let distance = if max_distance > 0.0 {
        node.distance / max_distance
    } else {
        0.0
    };
    DISTANCE_IMPORTANCE * distance - WEIGHT_IMPORTANCE * (node.weight / MAX_NODE_WEIGHT)
}

/// Orders nodes by ascending [`score`], keeping the input order on ties.
pub fn rank(nodes: &[Node]) -> Vec<Node> {
    let max_distance = nodes.iter().map(|n| n.distance).fold(0.0, f64::max);
    let mut scored: Vec<(f64, &Node)> = nodes.iter().map(|n| (score(n, max_distance), n)).collect();
    scored.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    scored.into_iter().map(|(_, n)| n.clone()).collect()
}

/// A consistent-hash ring over nodes, with points proportional to weight.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: Vec<(u64, usize)>,
    nodes: Vec<Node>,
}

impl HashRing {
    /// Builds a ring over `nodes`.
    pub fn new(nodes: &[Node]) -> Self {
        let mut points = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            for replica in 0..virtual_points(node.weight) {
                points.push((ring_hash(format!("{}#{replica}", node.url).as_bytes()), i));
            }
        }
        points.sort_unstable();
        HashRing {
            points,
            nodes: nodes.to_vec(),
        }
    }

    /// The first `n` distinct nodes clockwise from the position of `key`.
    pub fn get(&self, key: &str, n: usize) -> Vec<Node> {
        if self.points.is_empty() || n == 0 {
            return Vec::new();
        }
        let h = ring_hash(key.as_bytes());
        let start = self.points.partition_point(|(p, _)| *p < h);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for i in 0..self.points.len() {
            let (_, idx) = self.points[(start + i) % self.points.len()];
            if seen.insert(idx) {
                out.push(self.nodes[idx].clone());
                if out.len() == n {
                    break;
                }
            }
        }
        out
    }
}

fn virtual_points(weight: f64) -> usize {
    let weight = if weight.is_finite() {
        weight.clamp(0.0, MAX_NODE_WEIGHT)
    } else {
        0.0
    };
    1 + (weight * POINTS_PER_WEIGHT).round() as usize
}

fn ring_hash(bytes: &[u8]) -> u64 {
    let hash = blake3::hash(bytes);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(buf)
}

/// A ranked node list, optionally with a ring restricting each key to a subset.
///
/// Selectors are immutable snapshots; refreshing the node list builds a new one.
#[derive(Debug, Clone, Default)]
pub struct NodeSelector {
    ranked: Arc<[Node]>,
    ring: Option<(HashRing, usize)>,
}

impl NodeSelector {
    /// Ranks `nodes`.
    pub fn new(nodes: Vec<Node>) -> Self {
        NodeSelector {
            ranked: rank(&nodes).into(),
            ring: None,
        }
    }

    /// Places the best `ring_size` nodes on a ring, serving each key from `replicas` of them.
    pub fn with_ring(mut self, ring_size: usize, replicas: usize) -> Self {
        let top = &self.ranked[..ring_size.min(self.ranked.len())];
        self.ring = (!top.is_empty() && replicas > 0).then(|| (HashRing::new(top), replicas));
        self
    }

    /// All nodes, best first.
    pub fn ranked(&self) -> &[Node] {
        &self.ranked
    }

    /// Whether there are no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// The nodes to try for `key`, in order.
    pub fn candidates(&self, key: &str) -> Vec<Node> {
        match &self.ring {
            Some((ring, size)) => {
                let subset = ring.get(key, *size);
                // keep the ranked order within the subset
                self.ranked
                    .iter()
                    .filter(|n| subset.iter().any(|s| s.url == n.url))
                    .cloned()
                    .collect()
            }
            None => self.ranked.to_vec(),
        }
    }
}
