//! Interface to the relative bundle adjustment optimizer.
//!
//! The driver hands one [`KeyframeBundle`] at a time to a [`KeyframeOptimizer`]
//! and receives the assigned keyframe id plus statistics of the local
//! optimization. The optimizer owns the pose-graph state; the driver only
//! reads counters, profiler statistics and export descriptions from it.
//!
//! [`RelativeGraph`] is the in-tree implementation: it maintains the graph
//! topology and reports the size of every local problem, without numerical
//! refinement.

use crate::io::{FrameId, Observation};
use crate::landmarks::LandmarkClass;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub mod dot;
pub mod profiler;
pub mod relative_graph;

pub use profiler::{CallStats, TimeProfiler};
pub use relative_graph::RelativeGraph;

/// Keyframe identifier assigned by the optimizer
pub type KeyframeId = u64;

/// Errors signalled by an optimizer while defining a keyframe
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("keyframe bundle for frame {frame_id} has no observations")]
    EmptyBundle { frame_id: FrameId },

    #[error("keyframe bundle for frame {expected} contains an observation of frame {found}")]
    MixedFrames { expected: FrameId, found: FrameId },

    #[error("solver failure: {0}")]
    Solver(String),
}

/// One observation of a keyframe bundle, with the class of its landmark
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    pub observation: Observation,
    pub class: LandmarkClass,
}

/// All observations of one frame, ready to become a keyframe
#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeBundle {
    pub frame_id: FrameId,
    pub entries: Vec<BundleEntry>,
}

impl KeyframeBundle {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, observation: Observation, class: LandmarkClass) {
        self.entries.push(BundleEntry { observation, class });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.entries.iter().map(|e| &e.observation)
    }
}

/// Statistics of the local optimization run after a new keyframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimizeStats {
    pub num_jacobians: usize,
    pub num_kf2kf_edges_optimized: usize,
    pub num_kf2lm_edges_optimized: usize,
}

/// Optimizer response to a dispatched bundle
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyframeInfo {
    pub kf_id: KeyframeId,
    /// Keyframe-to-keyframe edges created for the new keyframe, as `(from, to)`
    pub created_edges: Vec<(KeyframeId, KeyframeId)>,
    pub stats: OptimizeStats,
}

impl fmt::Display for KeyframeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KF {} [ new edges: {}, jacobians: {}, kf2kf optimized: {}, kf2lm optimized: {} ]",
            self.kf_id,
            self.created_edges.len(),
            self.stats.num_jacobians,
            self.stats.num_kf2kf_edges_optimized,
            self.stats.num_kf2lm_edges_optimized
        )
    }
}

/// Graph connectivity statistics, for post-run evaluation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnectivityStats {
    pub degree_mean: f64,
    pub degree_std: f64,
    pub degree_max: f64,
    pub tree_size_min: usize,
    pub tree_size_max: usize,
    pub tree_size_mean: f64,
    pub tree_size_std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneKeyframe {
    pub id: KeyframeId,
    pub frame_id: FrameId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLandmark {
    pub id: u64,
    pub base_kf: KeyframeId,
    pub class: LandmarkClass,
    /// Position relative to the base keyframe
    pub rel_pos: [f64; 3],
}

/// Snapshot of the whole map, for later visual replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub root_kf: KeyframeId,
    pub keyframes: Vec<SceneKeyframe>,
    pub kf2kf_edges: Vec<(KeyframeId, KeyframeId)>,
    pub landmarks: Vec<SceneLandmark>,
    /// Spanning tree around `root_kf`, as `(parent, child)` edges
    pub spanning_tree: Vec<(KeyframeId, KeyframeId)>,
}

/// Incremental relative bundle adjustment back-end
pub trait KeyframeOptimizer {
    /// Append a keyframe built from `bundle` and optimize the area around it.
    /// Synchronous; an error aborts the run.
    fn define_keyframe(&mut self, bundle: &KeyframeBundle) -> Result<KeyframeInfo, OptimizerError>;

    fn time_profiler(&self) -> &TimeProfiler;

    fn time_profiler_mut(&mut self) -> &mut TimeProfiler;

    fn keyframe_count(&self) -> usize;

    fn known_feature_count(&self) -> usize;

    fn unknown_feature_count(&self) -> usize;

    fn observation_count(&self) -> usize;

    /// Graphviz description of the keyframe graph, optionally with landmarks
    fn graph_dot(&self, include_landmarks: bool) -> String;

    /// Graphviz description of the spanning trees rooted at `roots`
    fn spanning_tree_dot(&self, roots: &[KeyframeId]) -> String;

    fn scene(&self, root: KeyframeId) -> Scene;

    fn connectivity(&self) -> ConnectivityStats;

    /// Write [`KeyframeOptimizer::graph_dot`] to `path` and return it
    fn save_graph(&self, path: &Path, include_landmarks: bool) -> std::io::Result<String> {
        let dot = self.graph_dot(include_landmarks);
        std::fs::write(path, &dot)?;
        Ok(dot)
    }

    /// Write [`KeyframeOptimizer::spanning_tree_dot`] to `path` and return it
    fn dump_spanning_tree(&self, path: &Path, roots: &[KeyframeId]) -> std::io::Result<String> {
        let dot = self.spanning_tree_dot(roots);
        std::fs::write(path, &dot)?;
        Ok(dot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Measurement;

    #[test]
    fn test_bundle_accessors() {
        let mut bundle = KeyframeBundle::new(3);
        assert!(bundle.is_empty());
        bundle.push(
            Observation::new(
                3,
                7,
                Measurement::RangeBearing2D {
                    range: 1.0,
                    yaw: 0.5,
                },
            ),
            LandmarkClass::Unknown,
        );
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.observations().map(|o| o.landmark_id).next(), Some(7));
    }

    #[test]
    fn test_keyframe_info_display() {
        let info = KeyframeInfo {
            kf_id: 4,
            created_edges: vec![(3, 4)],
            stats: OptimizeStats {
                num_jacobians: 10,
                num_kf2kf_edges_optimized: 2,
                num_kf2lm_edges_optimized: 5,
            },
        };
        assert_eq!(
            info.to_string(),
            "KF 4 [ new edges: 1, jacobians: 10, kf2kf optimized: 2, kf2lm optimized: 5 ]"
        );
    }
}
