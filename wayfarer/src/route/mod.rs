//! On-device route computation over the local road graph.
//!
//! [`RouteGraph::build`] turns bulk-loaded [`RoadSegment`]s into an
//! adjacency graph. Node identity is a coordinate quantized to roughly
//! ten-meter bins, so near-duplicate segment endpoints merge into the same
//! node and independently digitized roads connect where they meet.
//!
//! [`RouteFinder::find_route`] runs A* with great-circle (haversine)
//! distance for both the accumulated cost and the heuristic. Haversine
//! never overestimates the remaining road distance, so the heuristic is
//! admissible and the returned path is shortest. An empty open set means
//! the endpoints are in disconnected (or ungraphed) regions; that is a
//! normal `None` outcome, not an error.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coord::{haversine_m, GeoPoint};
use crate::storage::{load_json, save_json, StorageError};

/// Node quantization bin size in degrees (~11m of latitude).
const NODE_EPSILON_DEG: f64 = 1e-4;

/// Maximum distance from a query point to its snapped graph node.
///
/// A start or end point farther than this from any road is ungraphed and
/// yields `None`.
const MAX_SNAP_M: f64 = 250.0;

/// Road classification for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadType {
    Motorway,
    Primary,
    Secondary,
    Residential,
    Track,
}

/// A road segment from the bulk region download. Read-only during routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadSegment {
    pub id: String,
    pub polyline: Vec<GeoPoint>,
    pub road_type: RoadType,
    pub speed_limit_kmh: u16,
}

/// A computed route. Transient - never persisted.
#[derive(Debug, Clone)]
pub struct RoutePath {
    /// Ordered coordinates from start to end.
    pub points: Vec<GeoPoint>,
    /// Total great-circle length along the path in meters.
    pub distance_m: f64,
}

/// Quantized node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId {
    lat_bin: i64,
    lon_bin: i64,
}

fn quantize(point: GeoPoint) -> NodeId {
    NodeId {
        lat_bin: (point.lat / NODE_EPSILON_DEG).round() as i64,
        lon_bin: (point.lon / NODE_EPSILON_DEG).round() as i64,
    }
}

/// Adjacency graph over quantized segment endpoints.
pub struct RouteGraph {
    /// Representative coordinate per node (first point seen in its bin).
    positions: HashMap<NodeId, GeoPoint>,
    adjacency: HashMap<NodeId, Vec<(NodeId, f64)>>,
}

impl RouteGraph {
    /// Builds the graph from road segments.
    ///
    /// Consecutive polyline points become bidirectional edges weighted by
    /// great-circle distance between their node positions. Points that
    /// quantize into the same bin collapse into one node.
    pub fn build(segments: &[RoadSegment]) -> Self {
        let mut positions: HashMap<NodeId, GeoPoint> = HashMap::new();
        let mut adjacency: HashMap<NodeId, Vec<(NodeId, f64)>> = HashMap::new();

        for segment in segments {
            for window in segment.polyline.windows(2) {
                let a = quantize(window[0]);
                let b = quantize(window[1]);

                positions.entry(a).or_insert(window[0]);
                positions.entry(b).or_insert(window[1]);

                if a == b {
                    // Both points landed in the same bin; no edge to add
                    continue;
                }

                let cost = haversine_m(positions[&a], positions[&b]);
                adjacency.entry(a).or_default().push((b, cost));
                adjacency.entry(b).or_default().push((a, cost));
            }
        }

        debug!(
            nodes = positions.len(),
            segments = segments.len(),
            "road graph built"
        );

        Self {
            positions,
            adjacency,
        }
    }

    /// Number of distinct nodes.
    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    /// Nearest graph node to `point` and its distance in meters.
    fn nearest_node(&self, point: GeoPoint) -> Option<(NodeId, f64)> {
        self.positions
            .iter()
            .map(|(&id, &pos)| (id, haversine_m(point, pos)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    }
}

/// Entry in the A* open set.
///
/// Ordered for a min-heap on `f`; equal `f` values resolve by insertion
/// sequence (FIFO), which makes exploration order - and therefore the
/// returned path among equal-length alternatives - deterministic.
struct OpenEntry {
    f: f64,
    g: f64,
    seq: u64,
    node: NodeId,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert so the lowest f pops first,
        // then the lowest sequence number among equals
        other
            .f
            .partial_cmp(&self.f)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A* shortest-path search over a [`RouteGraph`].
pub struct RouteFinder {
    graph: RouteGraph,
}

impl RouteFinder {
    pub fn new(graph: RouteGraph) -> Self {
        Self { graph }
    }

    pub fn from_segments(segments: &[RoadSegment]) -> Self {
        Self::new(RouteGraph::build(segments))
    }

    /// Computes the shortest path between two coordinates.
    ///
    /// Start and end snap to their nearest graph nodes (within
    /// [`MAX_SNAP_M`]). Returns `None` when either point is ungraphed or
    /// the two nodes are not connected - a normal outcome for queries
    /// outside the downloaded region.
    pub fn find_route(&self, start: GeoPoint, end: GeoPoint) -> Option<RoutePath> {
        let (start_node, start_dist) = self.graph.nearest_node(start)?;
        let (end_node, end_dist) = self.graph.nearest_node(end)?;
        if start_dist > MAX_SNAP_M || end_dist > MAX_SNAP_M {
            debug!(
                start_dist_m = start_dist,
                end_dist_m = end_dist,
                "query point too far from road graph"
            );
            return None;
        }

        let goal = self.graph.positions[&end_node];

        let mut open = BinaryHeap::new();
        let mut g_score: HashMap<NodeId, f64> = HashMap::new();
        let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
        let mut closed: HashSet<NodeId> = HashSet::new();
        let mut seq = 0u64;

        g_score.insert(start_node, 0.0);
        open.push(OpenEntry {
            f: haversine_m(self.graph.positions[&start_node], goal),
            g: 0.0,
            seq,
            node: start_node,
        });

        while let Some(entry) = open.pop() {
            if entry.node == end_node {
                return Some(self.reconstruct(&came_from, end_node, entry.g));
            }
            if !closed.insert(entry.node) {
                continue;
            }

            let Some(neighbors) = self.graph.adjacency.get(&entry.node) else {
                continue;
            };
            for &(neighbor, cost) in neighbors {
                if closed.contains(&neighbor) {
                    continue;
                }
                let tentative = entry.g + cost;
                if tentative < *g_score.get(&neighbor).unwrap_or(&f64::INFINITY) {
                    g_score.insert(neighbor, tentative);
                    came_from.insert(neighbor, entry.node);
                    seq += 1;
                    open.push(OpenEntry {
                        f: tentative + haversine_m(self.graph.positions[&neighbor], goal),
                        g: tentative,
                        seq,
                        node: neighbor,
                    });
                }
            }
        }

        // Open set exhausted: disconnected or ungraphed region
        None
    }

    fn reconstruct(
        &self,
        came_from: &HashMap<NodeId, NodeId>,
        end: NodeId,
        distance_m: f64,
    ) -> RoutePath {
        let mut nodes = vec![end];
        let mut current = end;
        while let Some(&previous) = came_from.get(&current) {
            nodes.push(previous);
            current = previous;
        }
        nodes.reverse();

        RoutePath {
            points: nodes
                .into_iter()
                .map(|node| self.graph.positions[&node])
                .collect(),
            distance_m,
        }
    }
}

/// Durable table of road segments for the downloaded region.
pub struct SegmentStore {
    path: PathBuf,
}

impl SegmentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads all segments; a missing table is an empty region.
    pub fn load(&self) -> Result<Vec<RoadSegment>, StorageError> {
        Ok(load_json(&self.path)?.unwrap_or_default())
    }

    /// Replaces the segment table with a bulk region download.
    pub fn save(&self, segments: &[RoadSegment]) -> Result<(), StorageError> {
        save_json(&self.path, &segments)
    }
}
