//! Shared utilities for driver integration tests
//!
//! Provides a recording optimizer that assigns consecutive keyframe ids, and
//! helpers to build observation streams and run configurations.

#![allow(dead_code)]

use rand::Rng;
use rba_slam::config::{
    LandmarkParameterization, PoseParameterization, ProblemKind, ProfileConfig, RunConfig,
};
use rba_slam::io::{DatasetStream, Measurement, Observation, ObservationKind};
use rba_slam::optimizer::{
    ConnectivityStats, KeyframeBundle, KeyframeId, KeyframeInfo, KeyframeOptimizer,
    OptimizeStats, OptimizerError, Scene, TimeProfiler,
};
use std::collections::BTreeSet;
use std::path::Path;

/// Optimizer double that records every bundle it receives
#[derive(Debug, Default)]
pub struct RecordingOptimizer {
    pub dispatched: Vec<KeyframeBundle>,
    /// Keyframe at which the "Y" metric is not recorded
    pub skip_y_at: Option<KeyframeId>,
    /// Frame id whose dispatch fails
    pub fail_at: Option<u64>,
    profiler: TimeProfiler,
    landmarks: BTreeSet<u64>,
    observations: usize,
}

impl RecordingOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched_frames(&self) -> Vec<u64> {
        self.dispatched.iter().map(|b| b.frame_id).collect()
    }
}

impl KeyframeOptimizer for RecordingOptimizer {
    fn define_keyframe(&mut self, bundle: &KeyframeBundle) -> Result<KeyframeInfo, OptimizerError> {
        if self.fail_at == Some(bundle.frame_id) {
            return Err(OptimizerError::Solver("singular system".into()));
        }

        let kf_id = self.dispatched.len() as KeyframeId;
        self.profiler.register_user_measure("X", 0.5);
        if self.skip_y_at != Some(kf_id) {
            self.profiler.register_user_measure("Y", 0.25);
        }
        for obs in bundle.observations() {
            self.landmarks.insert(obs.landmark_id);
        }
        self.observations += bundle.len();
        self.dispatched.push(bundle.clone());

        Ok(KeyframeInfo {
            kf_id,
            created_edges: if kf_id > 0 {
                vec![(kf_id - 1, kf_id)]
            } else {
                Vec::new()
            },
            stats: OptimizeStats {
                num_jacobians: bundle.len(),
                num_kf2kf_edges_optimized: kf_id.min(1) as usize,
                num_kf2lm_edges_optimized: bundle.len(),
            },
        })
    }

    fn time_profiler(&self) -> &TimeProfiler {
        &self.profiler
    }

    fn time_profiler_mut(&mut self) -> &mut TimeProfiler {
        &mut self.profiler
    }

    fn keyframe_count(&self) -> usize {
        self.dispatched.len()
    }

    fn known_feature_count(&self) -> usize {
        0
    }

    fn unknown_feature_count(&self) -> usize {
        self.landmarks.len()
    }

    fn observation_count(&self) -> usize {
        self.observations
    }

    fn graph_dot(&self, include_landmarks: bool) -> String {
        let mut dot = String::from("digraph g {\n");
        for kf in 0..self.dispatched.len() {
            dot.push_str(&format!("  \"kf{kf}\";\n"));
        }
        if include_landmarks {
            for lm in &self.landmarks {
                dot.push_str(&format!("  \"lm{lm}\";\n"));
            }
        }
        dot.push_str("}\n");
        dot
    }

    fn spanning_tree_dot(&self, roots: &[KeyframeId]) -> String {
        format!("digraph t {{ /* {roots:?} */ }}\n")
    }

    fn scene(&self, root: KeyframeId) -> Scene {
        Scene {
            root_kf: root,
            keyframes: Vec::new(),
            kf2kf_edges: Vec::new(),
            landmarks: Vec::new(),
            spanning_tree: Vec::new(),
        }
    }

    fn connectivity(&self) -> ConnectivityStats {
        ConnectivityStats::default()
    }
}

pub fn range_bearing_problem() -> ProblemKind {
    ProblemKind {
        pose: PoseParameterization::Se2,
        landmark: LandmarkParameterization::Euclidean2D,
        obs: ObservationKind::RangeBearing2D,
    }
}

/// Stream with one observation per entry of `frames`; landmark ids repeat every 7 rows
pub fn stream_of_frames(frames: &[u64]) -> DatasetStream {
    let observations = frames
        .iter()
        .enumerate()
        .map(|(i, &frame)| {
            Observation::new(
                frame,
                (i % 7) as u64,
                Measurement::RangeBearing2D {
                    range: 1.0 + (i % 5) as f64,
                    yaw: 0.1 * (i % 3) as f64,
                },
            )
        })
        .collect();
    DatasetStream::new(observations)
}

/// Frame ids `0..n_frames` in order, each repeated 1 to `max_obs` times
pub fn random_sequential_frames<R: Rng>(rng: &mut R, n_frames: u64, max_obs: usize) -> Vec<u64> {
    let mut frames = Vec::new();
    for frame in 0..n_frames {
        let count = rng.random_range(1..=max_obs);
        frames.extend(std::iter::repeat_n(frame, count));
    }
    frames
}

/// Non-interactive configuration writing into `output_dir`
pub fn test_config(output_dir: &Path) -> RunConfig {
    let mut config = RunConfig::new("unused.txt".into(), range_bearing_problem());
    config.output_dir = output_dir.to_path_buf();
    config
}

pub fn with_profile(mut config: RunConfig, segment_length: u64) -> RunConfig {
    config.profile = Some(ProfileConfig {
        prefix: "stats".into(),
        segment_length,
    });
    config
}
