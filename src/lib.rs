//! Taskline - runs trees of tasks
//!
//! Tasks are commands, Rust callbacks or parents grouping other tasks. Trees
//! are declared in Rust or in a `taskline.yml` file and run with filters,
//! bounded concurrency, context propagation and rollbacks.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use error::{Result, TasklineError};

/// Current version of Taskline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
