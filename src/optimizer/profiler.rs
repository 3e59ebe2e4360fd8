//! Named-section time profiler owned by an optimizer.
//!
//! Sections are timed with [`TimeProfiler::enter`]/[`TimeProfiler::leave`] or
//! [`TimeProfiler::measure`]; arbitrary values (edge counts, Jacobian counts)
//! can be recorded under a name with [`TimeProfiler::register_user_measure`].
//! Statistics accumulate until [`TimeProfiler::clear`].

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Accumulated statistics of one profiler section
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CallStats {
    pub n_calls: usize,
    /// Mean value (seconds for timed sections)
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
}

impl CallStats {
    fn record(&mut self, value: f64) {
        if self.n_calls == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.n_calls += 1;
        self.total += value;
        self.mean = self.total / self.n_calls as f64;
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeProfiler {
    sections: BTreeMap<String, CallStats>,
    open: HashMap<String, Instant>,
}

impl TimeProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `name`. A second `enter` without `leave` restarts the clock.
    pub fn enter(&mut self, name: &str) {
        self.open.insert(name.to_string(), Instant::now());
    }

    /// Stop timing `name`, returning the elapsed seconds, or `None` if it was not entered
    pub fn leave(&mut self, name: &str) -> Option<f64> {
        let start = self.open.remove(name)?;
        let elapsed = start.elapsed().as_secs_f64();
        self.sections
            .entry(name.to_string())
            .or_default()
            .record(elapsed);
        Some(elapsed)
    }

    /// Time the closure `f` under `name`
    pub fn measure<R>(&mut self, name: &str, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.sections
            .entry(name.to_string())
            .or_default()
            .record(start.elapsed().as_secs_f64());
        result
    }

    /// Record a non-time value under `name`
    pub fn register_user_measure(&mut self, name: &str, value: f64) {
        self.sections
            .entry(name.to_string())
            .or_default()
            .record(value);
    }

    pub fn get(&self, name: &str) -> Option<&CallStats> {
        self.sections.get(name)
    }

    /// Statistics of every section, ordered by name
    pub fn stats(&self) -> &BTreeMap<String, CallStats> {
        &self.sections
    }

    /// Drop all accumulated statistics and open sections
    pub fn clear(&mut self) {
        self.sections.clear();
        self.open.clear();
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_measures_accumulate() {
        let mut profiler = TimeProfiler::new();
        profiler.register_user_measure("num_jacobians", 4.0);
        profiler.register_user_measure("num_jacobians", 8.0);

        let stats = profiler.get("num_jacobians").copied().unwrap_or_default();
        assert_eq!(stats.n_calls, 2);
        assert_eq!(stats.mean, 6.0);
        assert_eq!(stats.min, 4.0);
        assert_eq!(stats.max, 8.0);
        assert_eq!(stats.total, 12.0);
    }

    #[test]
    fn test_enter_leave() {
        let mut profiler = TimeProfiler::new();
        assert!(profiler.leave("never_entered").is_none());

        profiler.enter("optimize");
        let elapsed = profiler.leave("optimize");
        assert!(elapsed.is_some_and(|t| t >= 0.0));
        assert_eq!(profiler.get("optimize").map(|s| s.n_calls), Some(1));
    }

    #[test]
    fn test_measure_returns_closure_value() {
        let mut profiler = TimeProfiler::new();
        let value = profiler.measure("work", || 21 * 2);
        assert_eq!(value, 42);
        assert_eq!(profiler.len(), 1);
    }

    #[test]
    fn test_clear_resets_window() {
        let mut profiler = TimeProfiler::new();
        profiler.register_user_measure("a", 1.0);
        profiler.enter("b");
        profiler.clear();
        assert!(profiler.is_empty());
        assert!(profiler.leave("b").is_none());
    }

    #[test]
    fn test_stats_are_sorted_by_name() {
        let mut profiler = TimeProfiler::new();
        profiler.register_user_measure("zeta", 1.0);
        profiler.register_user_measure("alpha", 1.0);
        let names: Vec<&String> = profiler.stats().keys().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
