//! Common test utilities

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use taskline::runner::{build_flat_tasks, run_task_with, OptionsContext, RunOptions, Task};
use taskline::ui::{MemoryRenderer, TreeRunner};
use tempfile::TempDir;

/// Create a temporary directory with a taskline.yml file
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("taskline.yml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Create a test config in a subdirectory
pub fn create_test_config_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("taskline.yml");
    let sub_dir = temp_dir.path().join("subdir");

    fs::write(&config_path, content).unwrap();
    fs::create_dir(&sub_dir).unwrap();

    (temp_dir, config_path, sub_dir)
}

/// Run options as the command line builds them, without debug mode
pub fn quiet_options() -> RunOptions {
    RunOptions {
        debug: false,
        ..RunOptions::default()
    }
}

/// Run `task` against an in-memory renderer with a fixed CPU count
pub fn run_recorded(
    task: &Task,
    options: OptionsContext,
) -> (Arc<MemoryRenderer>, taskline::Result<()>) {
    let renderer = Arc::new(MemoryRenderer::new());
    let runner = TreeRunner::with_renderer(renderer.clone());
    let flat = build_flat_tasks(task).unwrap();
    let result = run_task_with(task, options, &flat, &runner, 4);
    (renderer, result)
}

/// Run `task` with `options` and no user fields
pub fn run_with_options(
    task: &Task,
    options: RunOptions,
) -> (Arc<MemoryRenderer>, taskline::Result<()>) {
    run_recorded(task, OptionsContext::new(options))
}
