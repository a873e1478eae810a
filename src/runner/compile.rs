//! Compiles a task tree into runnable nodes
//!
//! Every node closes over the [`ContextHolder`] of the subtree it belongs to
//! and the static skip table of the run. Parent nodes fork their holder so
//! context added for their children never leaks to their siblings.

use crate::error::{TaskError, TaskResult};
use crate::runner::background::{placeholder_groups, start_background_process, BackgroundProcess};
use crate::runner::context::{ContextHolder, InternalContext};
use crate::runner::exec::{command_string, Command, Exec, ExecOptions, Output};
use crate::runner::filter::{SkipReason, StaticSkips};
use crate::runner::task::{
    AddContextFn, AddContextPayload, Background, CommandSource, CommandTask, Concurrent,
    OptionsSource, ParentTask, RegularTask, Task, TaskMeta, TaskPayload,
};
use crate::ui::{Node, NodeHandle, NodeList, Outcome};
use std::sync::{Arc, Mutex, PoisonError};

pub const ALL_CHILDREN_SKIPPED: &str = "All children are skipped";

/// Run-wide inputs shared by every compiled node
#[derive(Debug, Clone, Copy)]
pub struct Plan<'a> {
    pub skipped: &'a StaticSkips,
    /// Resolved worker pool width, 0 for sequential
    pub width: usize,
}

/// Compile `task` and its subtree against `holder`
pub fn compile_task<'a>(task: &'a Task, holder: &ContextHolder, plan: Plan<'a>) -> Node<'a> {
    match task {
        Task::Command(task) => compile_command(task, holder, plan),
        Task::Regular(task) => compile_regular(task, holder, plan),
        Task::Parent(task) => compile_parent(task, holder, plan),
    }
}

fn static_skip(plan: Plan<'_>, title: &str) -> Option<String> {
    plan.skipped.get(title).map(|reason| reason.message())
}

fn dynamic_skip(meta: &TaskMeta, holder: &ContextHolder) -> TaskResult<Option<String>> {
    let Some(predicate) = &meta.skip else {
        return Ok(None);
    };
    let context = holder.get();
    let user_context = if context.dry_run() {
        context.stand_in_context()
    } else {
        context.user_context()
    };
    Ok(predicate(&user_context)?.reason())
}

fn compile_command<'a>(task: &'a CommandTask, holder: &ContextHolder, plan: Plan<'a>) -> Node<'a> {
    let skip_holder = holder.clone();
    let holder = holder.clone();

    Node::new(task.meta.title.clone(), move |handle| {
        let context = holder.get();
        let resolved = resolve_command(
            &task.meta.title,
            &task.command,
            &task.options,
            &context,
            handle,
        )?;
        let Some((command, options)) = resolved else {
            return Ok(Outcome::Skipped(SkipReason::DryRun.message()));
        };

        let output = Output::new(handle, holder);
        let result = Exec::new(output.clone()).run_with(command, &options)?;
        if !context.debug() || options.silent {
            if let Some(line) = result.single_line() {
                output.line(line)?;
            }
        }
        Ok(Outcome::Done)
    })
    .skip_when(move || match static_skip(plan, &task.meta.title) {
        Some(reason) => Ok(Some(reason)),
        None => dynamic_skip(&task.meta, &skip_holder),
    })
}

/// Resolve a command and its options for running.
///
/// Under dry run nothing is returned: the node title shows the command
/// instead. Getters are first tried against a stand-in context; one that fails
/// on it depends on context only known at run time.
fn resolve_command(
    title: &str,
    command: &CommandSource,
    options: &OptionsSource,
    context: &InternalContext,
    handle: &NodeHandle<'_>,
) -> TaskResult<Option<(Command, ExecOptions)>> {
    if !context.dry_run() {
        let user_context = context.user_context();
        return Ok(Some((
            command.resolve(&user_context)?,
            options.resolve(&user_context)?,
        )));
    }

    let user_context = if command.is_getter() || options.is_getter() {
        context.stand_in_context()
    } else {
        context.user_context()
    };
    match (command.resolve(&user_context), options.resolve(&user_context)) {
        (Ok(command), Ok(options)) => {
            let rendered = command_string(&command, context, &options);
            handle.set_title(format!("{} ($ {})", title, rendered));
        }
        _ => handle.set_title(format!("{} (contextual command)", title)),
    }
    Ok(None)
}

fn compile_regular<'a>(task: &'a RegularTask, holder: &ContextHolder, plan: Plan<'a>) -> Node<'a> {
    let skip_holder = holder.clone();
    let holder = holder.clone();

    Node::new(task.meta.title.clone(), move |handle| {
        let output = Output::new(handle, holder);
        if let Some(line) = (task.run)(TaskPayload::new(output.clone()))? {
            output.line(line)?;
        }
        Ok(Outcome::Done)
    })
    .skip_when(move || {
        if let Some(reason) = static_skip(plan, &task.meta.title) {
            return Ok(Some(reason));
        }
        if skip_holder.get().dry_run() {
            return Ok(Some(SkipReason::DryRun.message()));
        }
        dynamic_skip(&task.meta, &skip_holder)
    })
}

fn is_statically_skipped(task: &Task, skipped: &StaticSkips) -> bool {
    skipped.contains_key(task.title())
        || (task.is_parent()
            && task
                .children()
                .iter()
                .all(|child| is_statically_skipped(child, skipped)))
}

fn static_parent_skip(task: &ParentTask, plan: Plan<'_>) -> Option<String> {
    if let Some(reason) = static_skip(plan, &task.meta.title) {
        return Some(reason);
    }
    task.children
        .iter()
        .all(|child| is_statically_skipped(child, plan.skipped))
        .then(|| ALL_CHILDREN_SKIPPED.to_string())
}

/// Pool width for the children of a parent
fn children_width(concurrent: Concurrent, debug: bool, width: usize) -> usize {
    if debug || width == 0 {
        return 0;
    }
    match concurrent {
        Concurrent::Sequential => 0,
        Concurrent::Parallel => width,
        Concurrent::Limit(limit) => limit.min(width),
    }
}

fn compile_parent<'a>(task: &'a ParentTask, holder: &ContextHolder, plan: Plan<'a>) -> Node<'a> {
    let skip_holder = holder.clone();
    let parent_holder = holder.clone();

    let node = Node::new(task.meta.title.clone(), move |_| {
        let own = parent_holder.copy();
        let context = own.get();
        let width = children_width(task.concurrent, context.debug(), plan.width);

        let children = task
            .children
            .iter()
            .map(|child| compile_task(child, &own, plan))
            .collect();
        let mut list = NodeList::new(children, width);

        if let Some(background) = &task.background {
            list = with_background(&task.meta.title, background, &own, list);
        }
        if let Some(add_context) = &task.add_context {
            list = with_added_context(&task.meta.title, add_context, &own, list);
        }
        Ok(Outcome::Children(list))
    })
    .skip_when(move || match static_parent_skip(task, plan) {
        Some(reason) => Ok(Some(reason)),
        None => dynamic_skip(&task.meta, &skip_holder),
    });

    let Some(rollback) = &task.rollback else {
        return node;
    };
    let holder = holder.clone();
    node.on_failure(move |handle| {
        let output = Output::new(handle, holder.copy());
        if let Some(line) = rollback(TaskPayload::new(output.clone()))? {
            output.line(line)?;
        }
        Ok(())
    })
}

/// Run `add_context` into `own`, then the children
fn with_added_context<'a>(
    title: &str,
    add_context: &'a AddContextFn,
    own: &ContextHolder,
    children: NodeList<'a>,
) -> NodeList<'a> {
    let holder = own.clone();
    let adding = Node::new(format!("{} [adding context]", title), move |handle| {
        if holder.get().dry_run() {
            return Ok(Outcome::Skipped(SkipReason::DryRun.message()));
        }
        let fields = add_context(AddContextPayload::new(Output::new(handle, holder.clone())))?;
        holder.add(fields);
        Ok(Outcome::Done)
    });
    let added = Node::new(format!("{} [with added context]", title), move |_| {
        Ok(Outcome::Children(children))
    });

    NodeList::sequential(vec![adding, added])
}

/// Start the background process, run the children, then stop the process
/// whether they succeeded or not
fn with_background<'a>(
    title: &'a str,
    background: &'a Background,
    own: &ContextHolder,
    main: NodeList<'a>,
) -> NodeList<'a> {
    let running: Arc<Mutex<Option<BackgroundProcess>>> = Arc::default();
    let dry_run = own.get().dry_run();

    let holder = own.clone();
    let slot = Arc::clone(&running);
    let start = Node::new(format!("{} [starting background process]", title), move |handle| {
        let context = holder.get();
        let resolved = resolve_command(
            title,
            &background.command,
            &background.options,
            &context,
            handle,
        )?;
        let Some((command, options)) = resolved else {
            holder.add(placeholder_groups(&background.pattern));
            return Ok(Outcome::Skipped(SkipReason::DryRun.message()));
        };

        Output::new(handle, holder.clone()).line(command_string(&command, &context, &options))?;
        let started =
            start_background_process(&command, &context, &options, &background.pattern)?;
        holder.add(started.groups);
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(started.process);
        Ok(Outcome::Done)
    });

    let stop = Node::new(format!("{} [stopping background process]", title), move |_| {
        if dry_run {
            return Ok(Outcome::Skipped(SkipReason::DryRun.message()));
        }
        let process = running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(process) = process {
            process.stop(background.kill.as_ref()).map_err(|err| {
                TaskError::Failed(
                    anyhow::Error::new(err).context("Failed to stop the background process"),
                )
            })?;
        }
        Ok(Outcome::Done)
    });

    let main = Node::new(format!("{} [with background process main]", title), move |_| {
        Ok(Outcome::Children(main))
    });
    let group = Node::new(format!("{} [with background process group]", title), move |_| {
        Ok(Outcome::Children(NodeList::sequential(vec![main, stop]).keep_going()))
    });

    NodeList::sequential(vec![start, group])
}
