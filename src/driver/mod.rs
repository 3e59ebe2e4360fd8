//! Incremental keyframe driver.
//!
//! The [`Driver`] reads a frame-ordered observation stream, groups the
//! observations of each frame into a keyframe bundle and hands the bundles to
//! a [`KeyframeOptimizer`] one at a time. Around every dispatch it reports
//! progress, samples the optimizer's profiler, optionally dumps spanning
//! trees, and polls the user for interactive commands.
//!
//! # Example
//!
//! ```no_run
//! use rba_slam::config::{ProblemKind, RawSelectors, RunConfig};
//! use rba_slam::driver::run_simulation;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let problem = ProblemKind::from_selectors(&RawSelectors {
//!     se2: true,
//!     lm_2d: true,
//!     obs: Some("RangeBearing_2D".into()),
//!     ..Default::default()
//! })?;
//! let config = RunConfig::new("dataset_SENSOR.txt".into(), problem);
//! let summary = run_simulation(&config)?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod control;
pub mod progress;
pub mod telemetry;

pub use batcher::KeyframeBatcher;
pub use control::{
    Command, ControlAction, Controller, DriverState, KeySource, NoKeys, ScriptedKeys, TerminalKeys,
};
pub use progress::{Progress, ProgressReporter};
pub use telemetry::TelemetryAggregator;

use crate::config::RunConfig;
use crate::error::{RbaError, RbaResult};
use crate::export::{GraphExporter, Renderer};
use crate::io::{ObservationStream, load_dataset};
use crate::optimizer::{
    ConnectivityStats, KeyframeBundle, KeyframeId, KeyframeInfo, KeyframeOptimizer, RelativeGraph,
};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub keyframes: usize,
    pub observations_consumed: usize,
    pub total_observations: usize,
    pub quit_by_user: bool,
    pub elapsed: Duration,
    pub telemetry_files: Option<(PathBuf, PathBuf)>,
    pub connectivity: Option<ConnectivityStats>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} keyframes from {} / {} observations in {:.3} s{}",
            self.keyframes,
            self.observations_consumed,
            self.total_observations,
            self.elapsed.as_secs_f64(),
            if self.quit_by_user {
                " (stopped by user)"
            } else {
                ""
            }
        )
    }
}

pub struct Driver<O: KeyframeOptimizer> {
    config: RunConfig,
    optimizer: O,
    batcher: KeyframeBatcher,
    progress: ProgressReporter,
    telemetry: Option<TelemetryAggregator>,
    exporter: GraphExporter,
    controller: Controller,
    last_kf: Option<KeyframeId>,
    quit_by_user: bool,
}

impl<O: KeyframeOptimizer> Driver<O> {
    pub fn new(config: RunConfig, optimizer: O) -> Self {
        let batcher = KeyframeBatcher::new(config.frames_at_once, config.max_known_feats_per_kf);
        let telemetry = config
            .profile
            .as_ref()
            .map(|p| TelemetryAggregator::new(p.segment_length));
        let controller = Controller::new(Box::new(NoKeys), config.gui, config.step_by_step);
        Self {
            progress: ProgressReporter::new(config.progress_every),
            exporter: GraphExporter::new(config.output_dir.clone()),
            batcher,
            telemetry,
            controller,
            config,
            optimizer,
            last_kf: None,
            quit_by_user: false,
        }
    }

    pub fn with_key_source(mut self, keys: Box<dyn KeySource>) -> Self {
        self.controller = Controller::new(keys, self.config.gui, self.config.step_by_step);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.exporter = GraphExporter::new(self.config.output_dir.clone()).with_renderer(renderer);
        self
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn into_optimizer(self) -> O {
        self.optimizer
    }

    pub fn telemetry(&self) -> Option<&TelemetryAggregator> {
        self.telemetry.as_ref()
    }

    pub fn state(&self) -> DriverState {
        self.controller.state()
    }

    /// Process the whole stream, then write the requested final outputs.
    ///
    /// Sequence and optimizer errors abort the run; export failures during the
    /// run are logged and skipped.
    pub fn run<S: ObservationStream + ?Sized>(&mut self, stream: &mut S) -> RbaResult<RunSummary> {
        let start = Instant::now();
        self.progress.restart();
        info!("RBA parameters:\n{}", self.config.solver);
        info!("Processing {} observations", stream.total());

        // Dumps, snapshots and telemetry tables all land here
        fs::create_dir_all(&self.config.output_dir).map_err(|err| {
            RbaError::Io(format!(
                "failed to create output directory {}: {err}",
                self.config.output_dir.display()
            ))
        })?;

        while !stream.is_exhausted() && self.controller.state() != DriverState::Done {
            self.run_batch(stream)?;

            if let Some(action) = self.controller.check() {
                self.handle(action, stream);
            }
        }
        self.controller.finish();

        let elapsed = start.elapsed();
        let connectivity = self.evaluate_connectivity();
        let telemetry_files = self.save_telemetry()?;
        self.save_final_graphs()?;

        let summary = RunSummary {
            keyframes: self.optimizer.keyframe_count(),
            observations_consumed: stream.consumed(),
            total_observations: stream.total(),
            quit_by_user: self.quit_by_user,
            elapsed,
            telemetry_files,
            connectivity,
        };
        info!("Done: {}", summary);
        Ok(summary)
    }

    /// Dispatch one batch of keyframe groups
    fn run_batch<S: ObservationStream + ?Sized>(&mut self, stream: &mut S) -> RbaResult<()> {
        let groups = self.batcher.groups_in_next_batch();
        for _ in 0..groups {
            self.progress.maybe_report(stream.consumed(), stream.total());

            let Some(bundle) = self.batcher.next_bundle(stream)? else {
                break;
            };
            let info = self.dispatch(&bundle)?;
            self.batcher.acknowledge(&info, stream)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, bundle: &KeyframeBundle) -> RbaResult<KeyframeInfo> {
        let info = self.optimizer.define_keyframe(bundle)?;
        debug!("Frame {} ({} obs) -> {}", bundle.frame_id, bundle.len(), info);

        let profiler = self.optimizer.time_profiler_mut();
        profiler.register_user_measure("num_jacobians", info.stats.num_jacobians as f64);
        profiler.register_user_measure(
            "num_kf2kf_edges_optimized",
            info.stats.num_kf2kf_edges_optimized as f64,
        );
        profiler.register_user_measure(
            "num_kf2lm_edges_optimized",
            info.stats.num_kf2lm_edges_optimized as f64,
        );

        if self.config.debug_dump_spanning_tree
            && let Err(e) = self.exporter.dump_spanning_tree(&self.optimizer, info.kf_id)
        {
            warn!("Spanning tree dump failed: {}", e);
        }

        if let Some(telemetry) = self.telemetry.as_mut() {
            telemetry.maybe_snapshot(info.kf_id, &mut self.optimizer);
        }

        self.last_kf = Some(info.kf_id);
        Ok(info)
    }

    fn handle<S: ObservationStream + ?Sized>(&mut self, action: ControlAction, stream: &mut S) {
        match action {
            ControlAction::SaveScene => {
                let root = self.last_kf.unwrap_or(0);
                if let Err(e) = self.exporter.save_scene(&self.optimizer, root) {
                    warn!("Saving scene failed: {}", e);
                }
            }
            ControlAction::SaveGraph => {
                if let Err(e) = self.exporter.save_graph_snapshot(&self.optimizer) {
                    warn!("Saving graph failed: {}", e);
                }
            }
            ControlAction::Quit => {
                stream.close();
                self.quit_by_user = true;
                info!("Quitting by user command.");
            }
        }
    }

    fn evaluate_connectivity(&self) -> Option<ConnectivityStats> {
        if !self.config.eval_connectivity {
            return None;
        }
        let stats = self.optimizer.connectivity();
        info!(
            "Keyframe connectivity (degree) stats:\n mean = {}\n std  = {}\n max  = {}",
            stats.degree_mean, stats.degree_std, stats.degree_max
        );
        info!(
            "Spanning tree sizes stats:\n mean = {}\n std  = {}\n max  = {}\n min  = {}",
            stats.tree_size_mean, stats.tree_size_std, stats.tree_size_max, stats.tree_size_min
        );
        Some(stats)
    }

    fn save_telemetry(&self) -> RbaResult<Option<(PathBuf, PathBuf)>> {
        match (&self.telemetry, &self.config.profile) {
            (Some(telemetry), Some(profile)) => telemetry
                .save(&self.config.output_dir, &profile.prefix)
                .map(Some),
            _ => Ok(None),
        }
    }

    fn save_final_graphs(&self) -> RbaResult<()> {
        if let Some(path) = &self.config.save_final_graph {
            self.exporter.save_final_graph(&self.optimizer, path)?;
        }
        if let Some(path) = &self.config.save_final_graph_landmarks {
            self.exporter
                .save_final_graph_landmarks(&self.optimizer, path)?;
        }
        Ok(())
    }
}

/// Load the configured dataset and run it through a [`RelativeGraph`],
/// reading interactive commands from the terminal
pub fn run_simulation(config: &RunConfig) -> RbaResult<RunSummary> {
    let dataset = load_dataset(&config.dataset, config.problem.obs)?;
    info!(
        "Loaded {} {} observations of {} frames from {}",
        dataset.len(),
        dataset.kind,
        dataset.frame_count(),
        config.dataset.display()
    );

    let optimizer = RelativeGraph::new(config.solver.clone()).with_sensor_params(config.sensor);
    let keys: Box<dyn KeySource> = match TerminalKeys::spawn() {
        Ok(keys) => Box::new(keys),
        Err(e) => {
            warn!("Keyboard control unavailable: {}", e);
            Box::new(NoKeys)
        }
    };

    let mut stream = dataset.into_stream();
    let mut driver = Driver::new(config.clone(), optimizer).with_key_source(keys);
    driver.run(&mut stream)
}
