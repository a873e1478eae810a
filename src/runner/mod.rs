//! Task execution engine
//!
//! This module handles the task model, static skip resolution, context
//! propagation, subprocess execution and the compilation of task trees into
//! runnable nodes.

pub mod background;
pub mod compile;
pub mod concurrency;
pub mod context;
pub mod exec;
pub mod filter;
pub mod flat;
pub mod interpolate;
pub mod run;
pub mod task;
pub mod when;

// Re-export main types
pub use concurrency::{cpu_count, resolve_concurrency};
pub use context::*;
pub use exec::{command_string, exec, Command, Exec, ExecOptions, ExecOutput, Output};
pub use filter::{build_statically_skipped_tasks, SkipReason, StaticSkips};
pub use flat::{build_flat_tasks, FlatTask, FlatTasks};
pub use run::{run_task, run_task_with};
pub use task::*;
