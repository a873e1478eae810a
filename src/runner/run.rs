//! Run driver

use crate::error::{Result, TaskError, TasklineError};
use crate::runner::compile::{compile_task, Plan};
use crate::runner::concurrency::{cpu_count, resolve_concurrency};
use crate::runner::context::{ContextHolder, InternalContext, OptionsContext};
use crate::runner::filter::build_statically_skipped_tasks;
use crate::runner::flat::FlatTasks;
use crate::runner::task::Task;
use crate::ui::{Executor, RenderMode, TreeRunner};
use tracing::debug;

/// Run `task` with the default tree runner and the detected CPU count
pub fn run_task(task: &Task, options: OptionsContext, flat: &FlatTasks) -> Result<()> {
    run_task_with(task, options, flat, &TreeRunner::new(), cpu_count()?)
}

/// Run `task` on `executor`.
///
/// A sequential pool width forces debug mode: serial scheduling, verbose
/// rendering and live subprocess output. Command failures come back as
/// [`TasklineError::Failed`] carrying their outputs unless those were
/// already streamed.
pub fn run_task_with(
    task: &Task,
    mut options: OptionsContext,
    flat: &FlatTasks,
    executor: &dyn Executor,
    cpu_count: usize,
) -> Result<()> {
    let width = resolve_concurrency(options.options.concurrency, cpu_count);
    options.options.debug |= width == 0;
    let debug = options.options.debug;

    let skipped = build_statically_skipped_tasks(&options.options, flat, task.title());
    debug!(
        root = task.title(),
        width,
        skipped = skipped.len(),
        "computed static skip table"
    );

    let holder = ContextHolder::new(InternalContext::new(options));
    let root = compile_task(
        task,
        &holder,
        Plan {
            skipped: &skipped,
            width,
        },
    );
    let mode = if debug {
        RenderMode::Serial
    } else {
        RenderMode::Concurrent
    };

    executor.run(root, mode).map_err(|err| match err {
        TaskError::Exec(err) => TasklineError::Failed(err.to_detailed(!debug)),
        err => TasklineError::Task(err),
    })
}
