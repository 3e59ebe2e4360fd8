//! Relative pose graph with keyframe-to-keyframe and keyframe-to-landmark edges.
//!
//! Every landmark is anchored to the keyframe that first observed it, and its
//! position is stored relative to that base keyframe. Keyframes are linked by
//! relative-pose edges created according to the [`EdgeCreationPolicy`]. After
//! each new keyframe the graph reports the size of the local problem around it
//! (keyframes within `max_optimize_depth` hops), which is what the profiler
//! and the driver telemetry record.

use super::dot::DotGraph;
use super::*;
use crate::config::{EdgeCreationPolicy, SensorParams, SolverParams, StereoCameraParams};
use crate::io::{LandmarkId, Measurement};
use nalgebra::{Vector2, Vector3};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use tracing::debug;

const SECTION_DEFINE: &str = "define_new_keyframe";
const SECTION_ADD_OBSERVATIONS: &str = "define_new_keyframe.add_observations";
const SECTION_EDGES: &str = "define_new_keyframe.determine_kf2kf_edges";
const SECTION_OPTIMIZE: &str = "define_new_keyframe.optimize_local_area";

#[derive(Debug, Clone)]
struct KeyframeNode {
    frame_id: FrameId,
    /// Landmarks observed from this keyframe, one entry per observation
    observed: Vec<LandmarkId>,
    /// Landmarks whose base is this keyframe
    based: Vec<LandmarkId>,
}

#[derive(Debug, Clone)]
struct LandmarkNode {
    base_kf: KeyframeId,
    class: LandmarkClass,
    rel_pos: Vector3<f64>,
    observers: BTreeSet<KeyframeId>,
}

/// Visited keyframe of a breadth-first traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Visit {
    node: KeyframeId,
    parent: Option<KeyframeId>,
}

/// In-memory relative bundle adjustment graph
#[derive(Debug, Clone)]
pub struct RelativeGraph {
    params: SolverParams,
    sensor: Option<SensorParams>,
    profiler: TimeProfiler,
    keyframes: Vec<KeyframeNode>,
    adjacency: Vec<BTreeSet<KeyframeId>>,
    kf2kf_edges: Vec<(KeyframeId, KeyframeId)>,
    landmarks: BTreeMap<LandmarkId, LandmarkNode>,
    num_observations: usize,
    num_known: usize,
}

impl RelativeGraph {
    pub fn new(params: SolverParams) -> Self {
        Self {
            params,
            sensor: None,
            profiler: TimeProfiler::new(),
            keyframes: Vec::new(),
            adjacency: Vec::new(),
            kf2kf_edges: Vec::new(),
            landmarks: BTreeMap::new(),
            num_observations: 0,
            num_known: 0,
        }
    }

    /// Sensor parameters used to seed landmark positions from stereo observations
    pub fn with_sensor_params(mut self, sensor: Option<SensorParams>) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    pub fn kf2kf_edges(&self) -> &[(KeyframeId, KeyframeId)] {
        &self.kf2kf_edges
    }

    /// Base keyframe and relative position of a landmark
    pub fn landmark_position(&self, landmark_id: LandmarkId) -> Option<(KeyframeId, Vector3<f64>)> {
        self.landmarks
            .get(&landmark_id)
            .map(|lm| (lm.base_kf, lm.rel_pos))
    }

    fn add_observation(&mut self, kf_id: KeyframeId, entry: &BundleEntry) {
        let landmark_id = entry.observation.landmark_id;
        self.num_observations += 1;
        self.keyframes[kf_id as usize].observed.push(landmark_id);

        if let Some(lm) = self.landmarks.get_mut(&landmark_id) {
            lm.observers.insert(kf_id);
            return;
        }

        let rel_pos = self.initial_position(&entry.observation.measurement);
        if entry.class == LandmarkClass::Known {
            self.num_known += 1;
        }
        self.keyframes[kf_id as usize].based.push(landmark_id);
        self.landmarks.insert(
            landmark_id,
            LandmarkNode {
                base_kf: kf_id,
                class: entry.class,
                rel_pos,
                observers: BTreeSet::from([kf_id]),
            },
        );
    }

    /// Position of a new landmark relative to the observing keyframe
    fn initial_position(&self, measurement: &Measurement) -> Vector3<f64> {
        match measurement {
            Measurement::RangeBearing2D { range, yaw } => {
                Vector3::new(range * yaw.cos(), range * yaw.sin(), 0.0)
            }
            Measurement::StereoCamera { left, right } => self
                .sensor
                .as_ref()
                .and_then(|s| triangulate(&s.camera, left, right))
                .unwrap_or_else(Vector3::zeros),
        }
    }

    /// Keyframe new edges attach to when `kf` must be reached
    fn anchor_of(&self, kf: KeyframeId) -> KeyframeId {
        match self.params.edge_creation_policy {
            EdgeCreationPolicy::Linear => kf,
            EdgeCreationPolicy::Icra2013 => {
                let submap = self.params.submap_size.max(1) as KeyframeId;
                kf - kf % submap
            }
        }
    }

    fn insert_edge(&mut self, from: KeyframeId, to: KeyframeId) {
        self.adjacency[from as usize].insert(to);
        self.adjacency[to as usize].insert(from);
        self.kf2kf_edges.push((from, to));
    }

    /// Create the relative-pose edges of the new keyframe `kf_id`.
    ///
    /// One edge follows the edge policy. Landmarks re-observed from keyframes
    /// farther than `max_tree_depth` hops add a loop-closure edge to the anchor
    /// of their base keyframe.
    fn connect_keyframe(&mut self, kf_id: KeyframeId) -> Vec<(KeyframeId, KeyframeId)> {
        let mut created = Vec::new();
        if kf_id == 0 {
            return created;
        }

        let primary = match self.params.edge_creation_policy {
            EdgeCreationPolicy::Linear => kf_id - 1,
            EdgeCreationPolicy::Icra2013 => {
                let submap = self.params.submap_size.max(1) as KeyframeId;
                let base = self.anchor_of(kf_id);
                if base == kf_id { kf_id - submap } else { base }
            }
        };
        self.insert_edge(primary, kf_id);
        created.push((primary, kf_id));

        let mut remote_bases: Vec<KeyframeId> = self.keyframes[kf_id as usize]
            .observed
            .iter()
            .filter_map(|lm| self.landmarks.get(lm))
            .map(|lm| lm.base_kf)
            .filter(|&base| base != kf_id)
            .collect();
        remote_bases.sort_unstable();
        remote_bases.dedup();

        let mut reachable: HashSet<KeyframeId> = self
            .bfs(kf_id, self.params.max_tree_depth)
            .iter()
            .map(|v| v.node)
            .collect();
        for base in remote_bases {
            if reachable.contains(&base) {
                continue;
            }
            let anchor = self.anchor_of(base);
            if self.adjacency[kf_id as usize].contains(&anchor) {
                continue;
            }
            debug!("Loop closure edge KF {} -> KF {}", anchor, kf_id);
            self.insert_edge(anchor, kf_id);
            created.push((anchor, kf_id));
            reachable = self
                .bfs(kf_id, self.params.max_tree_depth)
                .iter()
                .map(|v| v.node)
                .collect();
        }
        created
    }

    /// Size of the local problem around `kf_id`
    fn local_problem_stats(&self, kf_id: KeyframeId) -> OptimizeStats {
        let area: BTreeSet<KeyframeId> = self
            .bfs(kf_id, self.params.max_optimize_depth)
            .iter()
            .map(|v| v.node)
            .collect();

        let num_kf2kf_edges_optimized = self
            .kf2kf_edges
            .iter()
            .filter(|(a, b)| area.contains(a) && area.contains(b))
            .count();
        let num_kf2lm_edges_optimized = area
            .iter()
            .flat_map(|kf| self.keyframes[*kf as usize].based.iter())
            .filter(|lm| {
                self.landmarks
                    .get(lm)
                    .is_some_and(|node| node.class == LandmarkClass::Unknown)
            })
            .count();
        let num_jacobians = area
            .iter()
            .map(|kf| self.keyframes[*kf as usize].observed.len())
            .sum();

        OptimizeStats {
            num_jacobians,
            num_kf2kf_edges_optimized,
            num_kf2lm_edges_optimized,
        }
    }

    /// Breadth-first traversal from `root`, at most `max_depth` hops
    fn bfs(&self, root: KeyframeId, max_depth: usize) -> Vec<Visit> {
        let n = self.keyframes.len();
        if root as usize >= n {
            return Vec::new();
        }

        let mut visited = vec![false; n];
        visited[root as usize] = true;
        let mut order = vec![Visit {
            node: root,
            parent: None,
        }];
        let mut queue = VecDeque::from([(root, 0usize)]);

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for &next in &self.adjacency[node as usize] {
                if !visited[next as usize] {
                    visited[next as usize] = true;
                    order.push(Visit {
                        node: next,
                        parent: Some(node),
                    });
                    queue.push_back((next, depth + 1));
                }
            }
        }
        order
    }

    fn spanning_tree_edges(&self, root: KeyframeId) -> Vec<(KeyframeId, KeyframeId)> {
        self.bfs(root, self.params.max_tree_depth)
            .iter()
            .filter_map(|v| v.parent.map(|p| (p, v.node)))
            .collect()
    }
}

/// Triangulate a rectified stereo observation into the left camera frame
fn triangulate(
    camera: &StereoCameraParams,
    left: &Vector2<f64>,
    right: &Vector2<f64>,
) -> Option<Vector3<f64>> {
    let disparity = left.x - right.x;
    if disparity.abs() < f64::EPSILON {
        return None;
    }
    let z = camera.fx * camera.baseline / disparity;
    if !z.is_finite() || z <= 0.0 {
        return None;
    }
    let x = (left.x - camera.cx) * z / camera.fx;
    let y = (left.y - camera.cy) * z / camera.fy;
    Some(Vector3::new(x, y, z))
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn kf_node(id: KeyframeId) -> String {
    format!("kf{id}")
}

fn lm_node(id: LandmarkId) -> String {
    format!("lm{id}")
}

impl KeyframeOptimizer for RelativeGraph {
    fn define_keyframe(&mut self, bundle: &KeyframeBundle) -> Result<KeyframeInfo, OptimizerError> {
        if bundle.is_empty() {
            return Err(OptimizerError::EmptyBundle {
                frame_id: bundle.frame_id,
            });
        }
        if let Some(entry) = bundle
            .entries
            .iter()
            .find(|e| e.observation.frame_id != bundle.frame_id)
        {
            return Err(OptimizerError::MixedFrames {
                expected: bundle.frame_id,
                found: entry.observation.frame_id,
            });
        }

        self.profiler.enter(SECTION_DEFINE);
        let kf_id = self.keyframes.len() as KeyframeId;
        self.keyframes.push(KeyframeNode {
            frame_id: bundle.frame_id,
            observed: Vec::with_capacity(bundle.len()),
            based: Vec::new(),
        });
        self.adjacency.push(BTreeSet::new());

        self.profiler.enter(SECTION_ADD_OBSERVATIONS);
        for entry in &bundle.entries {
            self.add_observation(kf_id, entry);
        }
        self.profiler.leave(SECTION_ADD_OBSERVATIONS);

        self.profiler.enter(SECTION_EDGES);
        let created_edges = self.connect_keyframe(kf_id);
        self.profiler.leave(SECTION_EDGES);

        self.profiler.enter(SECTION_OPTIMIZE);
        let stats = self.local_problem_stats(kf_id);
        self.profiler.leave(SECTION_OPTIMIZE);
        self.profiler.leave(SECTION_DEFINE);

        let info = KeyframeInfo {
            kf_id,
            created_edges,
            stats,
        };
        debug!("Frame {} -> {}", bundle.frame_id, info);
        Ok(info)
    }

    fn time_profiler(&self) -> &TimeProfiler {
        &self.profiler
    }

    fn time_profiler_mut(&mut self) -> &mut TimeProfiler {
        &mut self.profiler
    }

    fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    fn known_feature_count(&self) -> usize {
        self.num_known
    }

    fn unknown_feature_count(&self) -> usize {
        self.landmarks.len() - self.num_known
    }

    fn observation_count(&self) -> usize {
        self.num_observations
    }

    fn graph_dot(&self, include_landmarks: bool) -> String {
        let mut g = DotGraph::new("rba_graph");
        g.statement("node [shape=box, style=filled, fillcolor=lightblue]");
        for (id, kf) in self.keyframes.iter().enumerate() {
            let label = format!("KF {id} (frame {})", kf.frame_id);
            g.node(&kf_node(id as KeyframeId), &[("label", &label)]);
        }
        for &(from, to) in &self.kf2kf_edges {
            g.edge(&kf_node(from), &kf_node(to), &[]);
        }

        if include_landmarks {
            for (&id, lm) in &self.landmarks {
                let fill = match lm.class {
                    LandmarkClass::Known => "gray",
                    LandmarkClass::Unknown => "white",
                };
                g.node(
                    &lm_node(id),
                    &[
                        ("label", &format!("LM {id}")),
                        ("shape", "ellipse"),
                        ("fillcolor", fill),
                    ],
                );
                g.edge(&kf_node(lm.base_kf), &lm_node(id), &[]);
                for &observer in lm.observers.iter().filter(|&&o| o != lm.base_kf) {
                    g.edge(&kf_node(observer), &lm_node(id), &[("style", "dashed")]);
                }
            }
        }
        g.render()
    }

    fn spanning_tree_dot(&self, roots: &[KeyframeId]) -> String {
        let mut g = DotGraph::new("spanning_trees");
        for &root in roots.iter().filter(|&&r| (r as usize) < self.keyframes.len()) {
            // Node names are prefixed with the root so each tree stays a separate cluster
            let name = |kf: KeyframeId| format!("r{root}_kf{kf}");
            g.begin_subgraph(&format!("cluster_root_{root}"));
            g.statement(&format!("label=\"root KF {root}\""));
            for visit in self.bfs(root, self.params.max_tree_depth) {
                g.node(&name(visit.node), &[("label", &visit.node.to_string())]);
                if let Some(parent) = visit.parent {
                    g.edge(&name(parent), &name(visit.node), &[]);
                }
            }
            g.end_subgraph();
        }
        g.render()
    }

    fn scene(&self, root: KeyframeId) -> Scene {
        Scene {
            root_kf: root,
            keyframes: self
                .keyframes
                .iter()
                .enumerate()
                .map(|(id, kf)| SceneKeyframe {
                    id: id as KeyframeId,
                    frame_id: kf.frame_id,
                })
                .collect(),
            kf2kf_edges: self.kf2kf_edges.clone(),
            landmarks: self
                .landmarks
                .iter()
                .map(|(&id, lm)| SceneLandmark {
                    id,
                    base_kf: lm.base_kf,
                    class: lm.class,
                    rel_pos: [lm.rel_pos.x, lm.rel_pos.y, lm.rel_pos.z],
                })
                .collect(),
            spanning_tree: self.spanning_tree_edges(root),
        }
    }

    fn connectivity(&self) -> ConnectivityStats {
        if self.keyframes.is_empty() {
            return ConnectivityStats::default();
        }

        let degrees: Vec<f64> = self.adjacency.iter().map(|a| a.len() as f64).collect();
        let (degree_mean, degree_std) = mean_std(&degrees);
        let degree_max = degrees.iter().copied().fold(0.0, f64::max);

        let tree_sizes: Vec<usize> = (0..self.keyframes.len() as KeyframeId)
            .map(|kf| self.bfs(kf, self.params.max_tree_depth).len() - 1)
            .collect();
        let tree_sizes_f: Vec<f64> = tree_sizes.iter().map(|&s| s as f64).collect();
        let (tree_size_mean, tree_size_std) = mean_std(&tree_sizes_f);

        ConnectivityStats {
            degree_mean,
            degree_std,
            degree_max,
            tree_size_min: tree_sizes.iter().copied().min().unwrap_or(0),
            tree_size_max: tree_sizes.iter().copied().max().unwrap_or(0),
            tree_size_mean,
            tree_size_std,
        }
    }
}
