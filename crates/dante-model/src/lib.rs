//! Domain types shared by the provider daemon crates.
//!
//! The model is deliberately passive: it describes tasks as they arrive on the
//! dispatch stream, the results executors hand back, and the status values the
//! handler publishes. Nothing here performs I/O.

mod domain;
pub use domain::*;

mod snippet;
pub use snippet::{LOG_SNIPPET_CHARS, execution_log, truncate_chars};
