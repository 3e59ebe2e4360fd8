//! Centralized logging configuration for the rba-slam binary
//!
//! This module provides a consistent logging setup with custom formatting
//! and default INFO level.

use tracing::Level;

/// Initialize the tracing subscriber with rba-slam's standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// # Example
/// ```no_run
/// use rba_slam::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("Application started");
/// }
/// ```
///
/// # Environment Variables
/// Override the default log level using `RUST_LOG`:
/// ```bash
/// RUST_LOG=debug cargo run --bin rba_slam -- --help
/// RUST_LOG=rba_slam::driver=trace cargo run --bin rba_slam
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    // try_init: integration tests and benches may install a subscriber more than once
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

/// Map the command-line verbosity (0: quiet, 1: informative, 2: tons of info)
/// to a default tracing level.
pub fn verbosity_to_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_to_level() {
        assert_eq!(verbosity_to_level(0), Level::WARN);
        assert_eq!(verbosity_to_level(1), Level::INFO);
        assert_eq!(verbosity_to_level(2), Level::DEBUG);
        assert_eq!(verbosity_to_level(9), Level::DEBUG);
    }
}
