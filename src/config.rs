//! Run configuration: solver parameters, sensor parameters and the
//! validated selection of pose/landmark/observation types.
//!
//! Solver and sensor parameters are stored as YAML. Command-line selectors
//! are validated into a [`ProblemKind`] before anything else happens, so
//! every inconsistency is reported as a configuration error before the run.

use crate::io::ObservationKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Observations consumed between two progress reports
pub const DEFAULT_PROGRESS_EVERY: usize = 200;

/// Default length, in keyframes, of each saved profiling segment
pub const DEFAULT_PROFILE_SEGMENT_LENGTH: u64 = 10;

/// Errors raised while building or loading the run configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(
        "argument --obs is mandatory to select the type of observations. Run with --help to see all the options."
    )]
    MissingObservationType,

    #[error("Exactly one of --se2 or --se3 flags must be set.")]
    PoseSelector,

    #[error("Exactly one of --lm-2d or --lm-3d flags must be set.")]
    LandmarkSelector,

    #[error("Unsupported observation type: {0}")]
    UnknownObservationType(String),

    #[error("the combination {pose} + {landmark} + {obs} is not supported")]
    UnsupportedCombination {
        pose: PoseParameterization,
        landmark: LandmarkParameterization,
        obs: ObservationKind,
    },

    #[error("--sensor-params-cfg-file is mandatory for {0} observations")]
    MissingSensorParams(ObservationKind),

    #[error("stereo baseline must be non-zero")]
    ZeroBaseline,

    #[error("a dataset file is required (--dataset)")]
    MissingDataset,

    #[error("unknown edge creation policy: {0}")]
    UnknownEdgePolicy(String),

    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },

    #[error("IO error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("YAML parse error in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// Parameterization of keyframe-to-keyframe relative poses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseParameterization {
    Se2,
    Se3,
}

impl fmt::Display for PoseParameterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoseParameterization::Se2 => write!(f, "SE(2)"),
            PoseParameterization::Se3 => write!(f, "SE(3)"),
        }
    }
}

/// Parameterization of landmark positions relative to their base keyframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandmarkParameterization {
    Euclidean2D,
    Euclidean3D,
}

impl fmt::Display for LandmarkParameterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LandmarkParameterization::Euclidean2D => write!(f, "Euclidean 2D landmarks"),
            LandmarkParameterization::Euclidean3D => write!(f, "Euclidean 3D landmarks"),
        }
    }
}

/// How new keyframe-to-keyframe edges are created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeCreationPolicy {
    /// Every keyframe is linked to its predecessor
    Linear,
    /// Keyframes are grouped in submaps: each keyframe links to the base of its
    /// submap, and each submap base links to the previous base
    #[default]
    Icra2013,
}

impl FromStr for EdgeCreationPolicy {
    type Err = ConfigError;

    /// Accepts `linear`/`icra2013`, case-insensitive, with an optional `ecp` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let name = lower.strip_prefix("ecp").unwrap_or(&lower);
        match name {
            "linear" | "lineargraph" => Ok(EdgeCreationPolicy::Linear),
            "icra2013" | "optimizeicra2013" => Ok(EdgeCreationPolicy::Icra2013),
            _ => Err(ConfigError::UnknownEdgePolicy(s.to_string())),
        }
    }
}

impl fmt::Display for EdgeCreationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeCreationPolicy::Linear => write!(f, "linear"),
            EdgeCreationPolicy::Icra2013 => write!(f, "icra2013"),
        }
    }
}

/// Parameters of the relative bundle adjustment problem
///
/// [`RelativeGraph`](crate::optimizer::RelativeGraph) reads the depths, the
/// edge policy and the submap size; the remaining fields are passed through
/// for a numerical solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Maximum depth of the spanning trees kept around each keyframe
    pub max_tree_depth: usize,
    /// Maximum topological distance of keyframes optimized after a new keyframe
    pub max_optimize_depth: usize,
    /// Maximum number of optimization iterations
    pub max_iters: usize,
    pub edge_creation_policy: EdgeCreationPolicy,
    /// Number of keyframes in each submap of the icra2013 edge policy
    pub submap_size: usize,
    pub use_robust_kernel: bool,
    pub std_noise_observations: f64,
    pub max_error_per_obs_to_stop: f64,
    pub compute_condition_number: bool,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_tree_depth: 4,
            max_optimize_depth: 4,
            max_iters: 20,
            edge_creation_policy: EdgeCreationPolicy::Icra2013,
            submap_size: 20,
            use_robust_kernel: false,
            std_noise_observations: 0.02,
            max_error_per_obs_to_stop: 1e-8,
            compute_condition_number: false,
        }
    }
}

impl SolverParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    pub fn with_max_optimize_depth(mut self, depth: usize) -> Self {
        self.max_optimize_depth = depth;
        self
    }

    pub fn with_edge_creation_policy(mut self, policy: EdgeCreationPolicy) -> Self {
        self.edge_creation_policy = policy;
        self
    }

    pub fn with_submap_size(mut self, submap_size: usize) -> Self {
        self.submap_size = submap_size;
        self
    }

    /// Load parameters from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let params: SolverParams =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        params.validate()?;
        Ok(params)
    }

    /// Save parameters to a YAML file
    pub fn to_yaml_file(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from `path` only when it is given and exists, else keep the defaults
    pub fn load_if_exists(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => Self::from_yaml_file(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.submap_size == 0 {
            return Err(ConfigError::NotPositive {
                name: "submap_size",
            });
        }
        if self.max_iters == 0 {
            return Err(ConfigError::NotPositive { name: "max_iters" });
        }
        Ok(())
    }
}

impl fmt::Display for SolverParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "max_tree_depth            = {}", self.max_tree_depth)?;
        writeln!(f, "max_optimize_depth        = {}", self.max_optimize_depth)?;
        writeln!(f, "max_iters                 = {}", self.max_iters)?;
        writeln!(f, "edge_creation_policy      = {}", self.edge_creation_policy)?;
        writeln!(f, "submap_size               = {}", self.submap_size)?;
        writeln!(f, "use_robust_kernel         = {}", self.use_robust_kernel)?;
        writeln!(f, "std_noise_observations    = {}", self.std_noise_observations)?;
        writeln!(f, "max_error_per_obs_to_stop = {:e}", self.max_error_per_obs_to_stop)?;
        write!(f, "compute_condition_number  = {}", self.compute_condition_number)
    }
}

/// Command-line overrides applied on top of the loaded solver parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverOverrides {
    pub max_tree_depth: Option<usize>,
    pub max_optimize_depth: Option<usize>,
    pub max_iters: Option<usize>,
    pub edge_creation_policy: Option<String>,
    pub submap_size: Option<usize>,
}

impl SolverOverrides {
    /// Apply every set override, logging each one
    pub fn apply(&self, params: &mut SolverParams) -> Result<(), ConfigError> {
        if let Some(depth) = self.max_tree_depth {
            params.max_tree_depth = depth;
            info!("Overriding max_tree_depth to value: {}", depth);
        }
        if let Some(policy) = &self.edge_creation_policy {
            params.edge_creation_policy = policy.parse()?;
            info!("Overriding edge_creation_policy to value: {}", policy);
        }
        if let Some(depth) = self.max_optimize_depth {
            params.max_optimize_depth = depth;
            info!("Overriding max_optimize_depth to value: {}", depth);
        }
        if let Some(iters) = self.max_iters {
            params.max_iters = iters;
            info!("Overriding max_iters to value: {}", iters);
        }
        if let Some(size) = self.submap_size {
            params.submap_size = size;
            info!("Overriding submap_size to value: {}", size);
        }
        params.validate()
    }
}

/// Intrinsics and baseline of a rectified stereo camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoCameraParams {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Distance between the left and right cameras (meters)
    pub baseline: f64,
}

/// Sensor parameters file, required for stereo observations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorParams {
    pub camera: StereoCameraParams,
}

impl SensorParams {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let params: SensorParams = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        if params.camera.baseline == 0.0 {
            return Err(ConfigError::ZeroBaseline);
        }
        Ok(params)
    }
}

/// Unvalidated problem selectors, as given on the command line
#[derive(Debug, Clone, Default)]
pub struct RawSelectors {
    pub se2: bool,
    pub se3: bool,
    pub lm_2d: bool,
    pub lm_3d: bool,
    pub obs: Option<String>,
    pub sensor_params: Option<PathBuf>,
}

/// Validated combination of pose, landmark and observation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemKind {
    pub pose: PoseParameterization,
    pub landmark: LandmarkParameterization,
    pub obs: ObservationKind,
}

impl ProblemKind {
    /// Validate the selectors, in the order the command line reports them
    pub fn from_selectors(raw: &RawSelectors) -> Result<Self, ConfigError> {
        let obs_name = raw
            .obs
            .as_deref()
            .ok_or(ConfigError::MissingObservationType)?;

        let pose = match (raw.se2, raw.se3) {
            (true, false) => PoseParameterization::Se2,
            (false, true) => PoseParameterization::Se3,
            _ => return Err(ConfigError::PoseSelector),
        };
        let landmark = match (raw.lm_2d, raw.lm_3d) {
            (true, false) => LandmarkParameterization::Euclidean2D,
            (false, true) => LandmarkParameterization::Euclidean3D,
            _ => return Err(ConfigError::LandmarkSelector),
        };
        let obs: ObservationKind = obs_name
            .parse()
            .map_err(|_| ConfigError::UnknownObservationType(obs_name.to_string()))?;

        let supported = matches!(
            (pose, landmark, obs),
            (
                PoseParameterization::Se2,
                LandmarkParameterization::Euclidean2D,
                ObservationKind::RangeBearing2D
            ) | (
                PoseParameterization::Se3,
                LandmarkParameterization::Euclidean3D,
                ObservationKind::StereoCamera
            )
        );
        if !supported {
            return Err(ConfigError::UnsupportedCombination {
                pose,
                landmark,
                obs,
            });
        }

        Ok(Self {
            pose,
            landmark,
            obs,
        })
    }

    /// Load the sensor parameters this observation type needs, if any
    pub fn load_sensor_params(
        &self,
        path: Option<&Path>,
    ) -> Result<Option<SensorParams>, ConfigError> {
        match self.obs {
            ObservationKind::RangeBearing2D => Ok(None),
            ObservationKind::StereoCamera => {
                let path = path.ok_or(ConfigError::MissingSensorParams(self.obs))?;
                SensorParams::from_yaml_file(path).map(Some)
            }
        }
    }
}

/// Telemetry output settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileConfig {
    /// File name prefix of the two telemetry tables
    pub prefix: String,
    /// Take one telemetry snapshot every this many keyframes
    pub segment_length: u64,
}

/// Fully validated configuration consumed by the driver
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub dataset: PathBuf,
    pub problem: ProblemKind,
    pub sensor: Option<SensorParams>,
    pub solver: SolverParams,
    /// Interactive surface active (the terminal stands in for the display)
    pub gui: bool,
    pub step_by_step: bool,
    pub profile: Option<ProfileConfig>,
    /// Keyframe groups per batch after the bootstrap batch
    pub frames_at_once: usize,
    pub progress_every: usize,
    pub debug_dump_spanning_tree: bool,
    pub save_final_graph: Option<PathBuf>,
    pub save_final_graph_landmarks: Option<PathBuf>,
    pub eval_connectivity: bool,
    /// Landmarks per keyframe classified as known on first sight (0 disables)
    pub max_known_feats_per_kf: usize,
    /// Directory receiving spanning-tree dumps and interactive snapshots
    pub output_dir: PathBuf,
}

impl RunConfig {
    pub fn new(dataset: PathBuf, problem: ProblemKind) -> Self {
        Self {
            dataset,
            problem,
            sensor: None,
            solver: SolverParams::default(),
            gui: false,
            step_by_step: false,
            profile: None,
            frames_at_once: 1,
            progress_every: DEFAULT_PROGRESS_EVERY,
            debug_dump_spanning_tree: false,
            save_final_graph: None,
            save_final_graph_landmarks: None,
            eval_connectivity: false,
            max_known_feats_per_kf: 0,
            output_dir: PathBuf::from("."),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.as_os_str().is_empty() {
            return Err(ConfigError::MissingDataset);
        }
        if self.frames_at_once == 0 {
            return Err(ConfigError::NotPositive {
                name: "frames_at_once",
            });
        }
        if let Some(profile) = &self.profile
            && profile.segment_length == 0
        {
            return Err(ConfigError::NotPositive {
                name: "profile-stats-length",
            });
        }
        if self.problem.obs == ObservationKind::StereoCamera && self.sensor.is_none() {
            return Err(ConfigError::MissingSensorParams(self.problem.obs));
        }
        self.solver.validate()
    }
}
