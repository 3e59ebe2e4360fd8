//! Dataset progress estimate and the periodic status line.

use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::debug;

/// Completion estimate of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub consumed: usize,
    pub total: usize,
    pub percent_done: f64,
    pub elapsed: Duration,
    pub remaining: Duration,
}

impl Progress {
    /// Estimate completion after `consumed` of `total` observations in `elapsed`.
    ///
    /// The remaining time is `elapsed * (1 / fraction - 1)`, and zero once the
    /// run is complete or while nothing has been consumed.
    pub fn estimate(consumed: usize, total: usize, elapsed: Duration) -> Self {
        let percent_done = if total == 0 {
            100.0
        } else {
            100.0 * consumed as f64 / total as f64
        };
        let remaining = if consumed == 0 || percent_done >= 100.0 {
            Duration::ZERO
        } else {
            let fraction = percent_done / 100.0;
            elapsed.mul_f64(1.0 / fraction - 1.0)
        };
        Self {
            consumed,
            total,
            percent_done,
            elapsed,
            remaining,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Progress in dataset: obs {} / {} ({:.4}%)  Remaining: {}",
            self.consumed,
            self.total,
            self.percent_done,
            format_duration(self.remaining)
        )
    }
}

/// `HH:MM:SS.mmm`
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis % 1000)
}

/// Prints a status line every `every` consumed observations
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    every: usize,
    last_reported: usize,
    start: Instant,
}

impl ProgressReporter {
    pub fn new(every: usize) -> Self {
        Self {
            every,
            last_reported: 0,
            start: Instant::now(),
        }
    }

    /// Restart the wall clock, e.g. when the run begins long after construction
    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Report against the wall clock started in [`ProgressReporter::new`] or
    /// the last [`ProgressReporter::restart`]
    pub fn maybe_report(&mut self, consumed: usize, total: usize) -> Option<Progress> {
        let elapsed = self.start.elapsed();
        let progress = self.maybe_report_at(consumed, total, elapsed)?;

        // '\r' keeps a single refreshed line on the terminal
        print!("{progress} \r");
        let _ = std::io::stdout().flush();
        Some(progress)
    }

    /// Decide whether to report, without printing
    pub fn maybe_report_at(
        &mut self,
        consumed: usize,
        total: usize,
        elapsed: Duration,
    ) -> Option<Progress> {
        if consumed.saturating_sub(self.last_reported) <= self.every {
            return None;
        }
        self.last_reported = consumed;

        let progress = Progress::estimate(consumed, total, elapsed);
        debug!(
            consumed,
            total,
            percent = progress.percent_done,
            remaining_s = progress.remaining.as_secs_f64(),
            "progress"
        );
        Some(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_after_threshold_exceeded() {
        let mut reporter = ProgressReporter::new(200);
        let elapsed = Duration::from_secs(1);
        assert!(reporter.maybe_report_at(200, 1000, elapsed).is_none());
        assert!(reporter.maybe_report_at(201, 1000, elapsed).is_some());
        assert!(reporter.maybe_report_at(300, 1000, elapsed).is_none());
        assert!(reporter.maybe_report_at(401, 1000, elapsed).is_none());
        assert!(reporter.maybe_report_at(402, 1000, elapsed).is_some());
    }

    #[test]
    fn test_at_most_once_per_threshold() {
        let mut reporter = ProgressReporter::new(200);
        let fired = (0..=5000)
            .filter(|&c| reporter.maybe_report_at(c, 5000, Duration::ZERO).is_some())
            .count();
        assert!(fired <= 5000 / 200);
        assert!(fired > 0);
    }

    #[test]
    fn test_restart_resets_clock() {
        let mut reporter = ProgressReporter::new(200);
        std::thread::sleep(Duration::from_millis(200));
        assert!(reporter.elapsed() >= Duration::from_millis(200));
        reporter.restart();
        assert!(reporter.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_remaining_time_estimate() {
        let p = Progress::estimate(250, 1000, Duration::from_secs(10));
        assert_eq!(p.percent_done, 25.0);
        assert!((p.remaining.as_secs_f64() - 30.0).abs() < 1e-9);

        let done = Progress::estimate(1000, 1000, Duration::from_secs(10));
        assert_eq!(done.remaining, Duration::ZERO);

        let empty = Progress::estimate(0, 0, Duration::from_secs(1));
        assert_eq!(empty.remaining, Duration::ZERO);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(3_723_045)), "01:02:03.045");
        assert_eq!(format_duration(Duration::ZERO), "00:00:00.000");
    }

    #[test]
    fn test_display() {
        let p = Progress::estimate(500, 1000, Duration::from_secs(2));
        assert_eq!(
            p.to_string(),
            "Progress in dataset: obs 500 / 1000 (50.0000%)  Remaining: 00:00:02.000"
        );
    }
}
