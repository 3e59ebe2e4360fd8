//! Per-segment profiler snapshots and their export as tab-separated tables.
//!
//! Every `segment_length` keyframes the optimizer's profiler statistics are
//! appended to one series per metric and the profiler is cleared, so each
//! sample covers a disjoint window. Metrics that did not appear in every
//! window are left out of the exported tables.

use crate::error::{RbaError, RbaResult};
use crate::optimizer::{KeyframeId, KeyframeOptimizer};
use chrono::Local;
use csv::{Terminator, WriterBuilder};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const TOTAL_NUM_KFS: &str = "total_num_kfs";
pub const TOTAL_NUM_LMS: &str = "total_num_lms";
pub const TOTAL_NUM_OBS: &str = "total_num_obs";

#[derive(Debug, Clone)]
pub struct TelemetryAggregator {
    segment_length: u64,
    timesteps: Vec<KeyframeId>,
    means: BTreeMap<String, Vec<f64>>,
    calls: BTreeMap<String, Vec<usize>>,
}

impl TelemetryAggregator {
    pub fn new(segment_length: u64) -> Self {
        Self {
            segment_length: segment_length.max(1),
            timesteps: Vec::new(),
            means: BTreeMap::new(),
            calls: BTreeMap::new(),
        }
    }

    /// Take a snapshot if `kf_id` starts a new segment. Returns whether one was taken.
    pub fn maybe_snapshot<O: KeyframeOptimizer + ?Sized>(
        &mut self,
        kf_id: KeyframeId,
        optimizer: &mut O,
    ) -> bool {
        if kf_id % self.segment_length != 0 {
            return false;
        }
        self.snapshot(kf_id, optimizer);
        true
    }

    /// Append the current profiler window at `timestep` and clear the profiler
    pub fn snapshot<O: KeyframeOptimizer + ?Sized>(&mut self, timestep: KeyframeId, optimizer: &mut O) {
        self.timesteps.push(timestep);

        for (name, stats) in optimizer.time_profiler().stats() {
            self.means.entry(name.clone()).or_default().push(stats.mean);
            self.calls.entry(name.clone()).or_default().push(stats.n_calls);
        }

        let total_lms = optimizer.known_feature_count() + optimizer.unknown_feature_count();
        for (name, value) in [
            (TOTAL_NUM_KFS, optimizer.keyframe_count()),
            (TOTAL_NUM_LMS, total_lms),
            (TOTAL_NUM_OBS, optimizer.observation_count()),
        ] {
            self.means
                .entry(name.to_string())
                .or_default()
                .push(value as f64);
        }

        optimizer.time_profiler_mut().clear();
    }

    pub fn timesteps(&self) -> &[KeyframeId] {
        &self.timesteps
    }

    pub fn mean_series(&self, name: &str) -> Option<&[f64]> {
        self.means.get(name).map(Vec::as_slice)
    }

    pub fn call_series(&self, name: &str) -> Option<&[usize]> {
        self.calls.get(name).map(Vec::as_slice)
    }

    /// Names of the mean-latency columns, i.e. metrics sampled at every timestep
    pub fn mean_columns(&self) -> Vec<&str> {
        rectangular(&self.means, self.timesteps.len())
    }

    /// Names of the call-count columns, i.e. metrics sampled at every timestep
    pub fn call_columns(&self) -> Vec<&str> {
        rectangular(&self.calls, self.timesteps.len())
    }

    pub fn write_means<W: Write>(&self, out: W) -> RbaResult<()> {
        write_table(out, &self.timesteps, &self.means)
    }

    pub fn write_calls<W: Write>(&self, out: W) -> RbaResult<()> {
        write_table(out, &self.timesteps, &self.calls)
    }

    /// Save both tables into `dir`, named after `prefix` and the local time
    pub fn save(&self, dir: &Path, prefix: &str) -> RbaResult<(PathBuf, PathBuf)> {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let (means_name, calls_name) = table_file_names(prefix, &stamp);
        let means_path = dir.join(means_name);
        let calls_path = dir.join(calls_name);

        info!(
            "Saving time stats to:\n{}\n{}",
            means_path.display(),
            calls_path.display()
        );
        self.write_means(create_table(&means_path)?)?;
        self.write_calls(create_table(&calls_path)?)?;
        Ok((means_path, calls_path))
    }
}

fn create_table(path: &Path) -> RbaResult<BufWriter<File>> {
    let file = File::create(path).map_err(|err| {
        RbaError::Io(format!("failed to create {}: {err}", path.display()))
    })?;
    Ok(BufWriter::new(file))
}

/// `<prefix>_<stamp>_means.csv` and `<prefix>_<stamp>_calls.csv`, with
/// characters that are invalid in file names replaced by `_`
pub fn table_file_names(prefix: &str, stamp: &str) -> (String, String) {
    let base = format!("{}_{}", strip_invalid_chars(prefix), strip_invalid_chars(stamp));
    (format!("{base}_means.csv"), format!("{base}_calls.csv"))
}

fn strip_invalid_chars(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn rectangular<T>(series: &BTreeMap<String, Vec<T>>, n: usize) -> Vec<&str> {
    series
        .iter()
        .filter(|(_, values)| values.len() == n)
        .map(|(name, _)| name.as_str())
        .collect()
}

fn write_table<W: Write, T: ToString>(
    mut out: W,
    timesteps: &[KeyframeId],
    series: &BTreeMap<String, Vec<T>>,
) -> RbaResult<()> {
    let columns: Vec<(&String, &Vec<T>)> = series
        .iter()
        .filter(|(_, values)| values.len() == timesteps.len())
        .collect();

    // Quoted metric names, written as-is so the csv writer does not escape them
    let mut header = String::from("timestep");
    for (name, _) in &columns {
        header.push_str(&format!("\t \"{name}\""));
    }
    writeln!(out, "{header}")?;

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(&mut out);
    for (row, timestep) in timesteps.iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(timestep.to_string());
        record.extend(columns.iter().map(|(_, values)| values[row].to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tables() -> TelemetryAggregator {
        let mut t = TelemetryAggregator::new(1);
        t.timesteps = vec![0, 1, 2];
        t.means.insert("X".into(), vec![0.5, 0.25, 0.125]);
        t.means.insert("Y".into(), vec![1.0, 2.0]);
        t.calls.insert("X".into(), vec![1, 2, 3]);
        t.calls.insert("Y".into(), vec![4, 5]);
        t
    }

    #[test]
    fn test_only_complete_series_become_columns() {
        let t = sample_tables();
        assert_eq!(t.mean_columns(), vec!["X"]);
        assert_eq!(t.call_columns(), vec!["X"]);
    }

    #[test]
    fn test_means_table_layout() -> RbaResult<()> {
        let t = sample_tables();
        let mut buf = Vec::new();
        t.write_means(&mut buf)?;
        let text = String::from_utf8(buf).map_err(|e| RbaError::Io(e.to_string()))?;
        assert_eq!(text, "timestep\t \"X\"\n0\t0.5\n1\t0.25\n2\t0.125\n");
        Ok(())
    }

    #[test]
    fn test_calls_table_uses_its_own_series() -> RbaResult<()> {
        let mut t = sample_tables();
        // A call series that is complete while the matching mean series is not
        t.calls.insert("Z".into(), vec![7, 8, 9]);
        let mut buf = Vec::new();
        t.write_calls(&mut buf)?;
        let text = String::from_utf8(buf).map_err(|e| RbaError::Io(e.to_string()))?;
        assert_eq!(
            text,
            "timestep\t \"X\"\t \"Z\"\n0\t1\t7\n1\t2\t8\n2\t3\t9\n"
        );
        Ok(())
    }

    #[test]
    fn test_file_names_strip_invalid_chars() {
        let (means, calls) = table_file_names("run/a:b", "2026-10-17_12-00-00");
        assert_eq!(means, "run_a_b_2026-10-17_12-00-00_means.csv");
        assert_eq!(calls, "run_a_b_2026-10-17_12-00-00_calls.csv");
    }

    #[test]
    fn test_empty_tables_have_header_only() -> RbaResult<()> {
        let t = TelemetryAggregator::new(10);
        let mut buf = Vec::new();
        t.write_means(&mut buf)?;
        assert_eq!(buf, b"timestep\n");
        Ok(())
    }

    #[test]
    fn test_save_error_names_the_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let missing = dir.path().join("missing");
        let err = sample_tables().save(&missing, "run");
        match err {
            Err(RbaError::Io(msg)) => {
                assert!(msg.contains("missing"));
                assert!(msg.contains("_means.csv"));
            }
            other => panic!("expected an IO error, got {other:?}"),
        }
        Ok(())
    }
}
