use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rba_slam::config::{
    DEFAULT_PROFILE_SEGMENT_LENGTH, ProblemKind, ProfileConfig, RawSelectors, RunConfig,
    SolverOverrides, SolverParams,
};
use rba_slam::driver::run_simulation;
use rba_slam::init_logger_with_level;
use rba_slam::logger::verbosity_to_level;
use tracing::info;

#[derive(Parser)]
#[command(name = "rba-slam")]
#[command(version)]
#[command(about = "Incremental relative bundle adjustment over a keyframe observation dataset")]
struct Args {
    /// Dataset file with one observation per line: frame_id landmark_id values...
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Relative poses are SE(2)
    #[arg(long)]
    se2: bool,

    /// Relative poses are SE(3)
    #[arg(long)]
    se3: bool,

    /// Landmarks are Euclidean 2D points
    #[arg(long = "lm-2d")]
    lm_2d: bool,

    /// Landmarks are Euclidean 3D points
    #[arg(long = "lm-3d")]
    lm_3d: bool,

    /// Observation type: RangeBearing_2D or StereoCamera
    #[arg(long)]
    obs: Option<String>,

    /// YAML file with sensor parameters (required for StereoCamera)
    #[arg(long)]
    sensor_params_cfg_file: Option<PathBuf>,

    /// Do not wait for keys in step-by-step mode; keys are only polled
    #[arg(long)]
    no_gui: bool,

    /// Pause after every batch until a key is entered
    #[arg(long)]
    step_by_step: bool,

    /// Save profiling tables with this file prefix
    #[arg(long)]
    profile_stats: Option<String>,

    /// Keyframes per profiling segment
    #[arg(long, default_value_t = DEFAULT_PROFILE_SEGMENT_LENGTH)]
    profile_stats_length: u64,

    /// Override max_tree_depth
    #[arg(long)]
    max_spanning_tree_depth: Option<usize>,

    /// Override max_optimize_depth
    #[arg(long)]
    max_optimize_depth: Option<usize>,

    /// Override max_iters
    #[arg(long)]
    max_iters: Option<usize>,

    /// Override the edge creation policy: linear or icra2013
    #[arg(long)]
    edge_policy: Option<String>,

    /// Override submap_size
    #[arg(long)]
    submap_size: Option<usize>,

    /// 0: quiet, 1: informative, 2: tons of info
    #[arg(short, long = "verbose-level", default_value_t = 1)]
    verbose_level: u8,

    /// Load solver parameters from this YAML file, if it exists
    #[arg(long)]
    cfg_file_rba: Option<PathBuf>,

    /// Write the current solver parameters to this YAML file and exit
    #[arg(long)]
    cfg_file_rba_bootstrap: Option<PathBuf>,

    /// Dump the spanning tree of every new keyframe as DOT/PNG
    #[arg(long)]
    debug_dump_cur_spantree: bool,

    /// Save the final keyframe graph (DOT, plus a PNG next to it)
    #[arg(long)]
    save_final_graph: Option<PathBuf>,

    /// Save the final graph with landmarks (DOT only)
    #[arg(long)]
    save_final_graph_landmarks: Option<PathBuf>,

    /// Log connectivity statistics of the final graph
    #[arg(long)]
    eval_connectivity: bool,

    /// Landmarks per keyframe whose relative position is taken as known
    #[arg(long, default_value_t = 0)]
    max_fixed_feats_per_kf: usize,

    /// Directory for spanning-tree dumps, snapshots and profiling tables
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    init_logger_with_level(verbosity_to_level(args.verbose_level));

    let selectors = RawSelectors {
        se2: args.se2,
        se3: args.se3,
        lm_2d: args.lm_2d,
        lm_3d: args.lm_3d,
        obs: args.obs.clone(),
        sensor_params: args.sensor_params_cfg_file.clone(),
    };
    let problem = ProblemKind::from_selectors(&selectors)?;
    info!(
        "Problem: {} + {} + {}",
        problem.pose, problem.landmark, problem.obs
    );

    let mut solver = SolverParams::load_if_exists(args.cfg_file_rba.as_deref())?;

    if let Some(path) = &args.cfg_file_rba_bootstrap {
        solver.to_yaml_file(path)?;
        info!("Wrote solver parameters to {}", path.display());
        return Ok(());
    }

    let overrides = SolverOverrides {
        max_tree_depth: args.max_spanning_tree_depth,
        max_optimize_depth: args.max_optimize_depth,
        max_iters: args.max_iters,
        edge_creation_policy: args.edge_policy.clone(),
        submap_size: args.submap_size,
    };
    overrides.apply(&mut solver)?;

    let sensor = problem.load_sensor_params(selectors.sensor_params.as_deref())?;

    let mut config = RunConfig::new(args.dataset.unwrap_or_default(), problem);
    config.sensor = sensor;
    config.solver = solver;
    config.gui = !args.no_gui;
    config.step_by_step = args.step_by_step;
    config.profile = args.profile_stats.map(|prefix| ProfileConfig {
        prefix,
        segment_length: args.profile_stats_length,
    });
    config.debug_dump_spanning_tree = args.debug_dump_cur_spantree;
    config.save_final_graph = args.save_final_graph;
    config.save_final_graph_landmarks = args.save_final_graph_landmarks;
    config.eval_connectivity = args.eval_connectivity;
    config.max_known_feats_per_kf = args.max_fixed_feats_per_kf;
    config.output_dir = args.output_dir;
    config.validate()?;

    let summary = run_simulation(&config)?;
    if let Some((means, calls)) = &summary.telemetry_files {
        info!("Profiling tables: {} {}", means.display(), calls.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = e.to_string();
            if !message.is_empty() {
                eprintln!("*EXCEPTION*:\n{message}");
            }
            ExitCode::FAILURE
        }
    }
}
