pub mod config;
pub mod driver;
pub mod error;
pub mod export;
pub mod io;
pub mod landmarks;
pub mod logger;
pub mod optimizer;

pub use error::{RbaError, RbaResult};
pub use io::*;
pub use logger::{init_logger, init_logger_with_level};
