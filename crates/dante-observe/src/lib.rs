//! Process-wide logging setup for the provider daemon.
//!
//! ```rust,no_run
//! use dante_observe::{LoggerConfig, LoggerFormat, logger_init};
//!
//! let cfg = LoggerConfig::new(LoggerFormat::Json, "info,dante.exec=debug");
//! logger_init(&cfg).expect("logger");
//! ```
mod logger;
pub use logger::*;
