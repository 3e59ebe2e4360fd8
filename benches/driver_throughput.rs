//! Driver throughput benchmark
//!
//! Runs the full keyframe driver with the in-tree relative graph over
//! synthetic range-bearing datasets of increasing length, for both edge
//! creation policies.
//!
//! ## Usage
//!
//! ```bash
//! cargo bench --bench driver_throughput
//! ```

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rba_slam::config::{
    EdgeCreationPolicy, LandmarkParameterization, PoseParameterization, ProblemKind, RunConfig,
    SolverParams,
};
use rba_slam::driver::Driver;
use rba_slam::export::NoopRenderer;
use rba_slam::io::{DatasetStream, Measurement, Observation, ObservationKind};
use rba_slam::optimizer::RelativeGraph;

/// Landmarks seen from each keyframe; consecutive keyframes share all but one
const LANDMARKS_PER_FRAME: u64 = 30;

fn synthetic_observations(n_frames: u64) -> Vec<Observation> {
    let mut observations = Vec::with_capacity((n_frames * LANDMARKS_PER_FRAME) as usize);
    for frame in 0..n_frames {
        for lm in frame..frame + LANDMARKS_PER_FRAME {
            let offset = (lm - frame) as f64;
            observations.push(Observation::new(
                frame,
                lm,
                Measurement::RangeBearing2D {
                    range: 1.0 + 0.1 * offset,
                    yaw: -0.7 + 0.05 * offset,
                },
            ));
        }
    }
    observations
}

fn run_once(observations: &[Observation], policy: EdgeCreationPolicy) -> usize {
    let problem = ProblemKind {
        pose: PoseParameterization::Se2,
        landmark: LandmarkParameterization::Euclidean2D,
        obs: ObservationKind::RangeBearing2D,
    };
    let mut config = RunConfig::new("synthetic".into(), problem);
    config.solver = SolverParams::default().with_edge_creation_policy(policy);
    config.progress_every = usize::MAX;

    let optimizer = RelativeGraph::new(config.solver.clone());
    let mut driver = Driver::new(config, optimizer).with_renderer(Box::new(NoopRenderer));
    let mut stream = DatasetStream::new(observations.to_vec());
    driver.run(&mut stream).map(|s| s.keyframes).unwrap_or(0)
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver_throughput");
    group.sample_size(20);

    for n_frames in [100u64, 500, 2000] {
        let observations = synthetic_observations(n_frames);
        for policy in [EdgeCreationPolicy::Linear, EdgeCreationPolicy::Icra2013] {
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), n_frames),
                &observations,
                |b, obs| b.iter(|| black_box(run_once(obs, policy))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
