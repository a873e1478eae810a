//! Task tree types
//!
//! A task is a command to run, a piece of Rust code to call, or a parent
//! grouping other tasks. Every task carries a title unique across its tree.

use crate::error::TaskResult;
use crate::runner::context::{ContextHolder, Fields, UserContext};
use crate::runner::exec::{Command, Exec, ExecOptions, Output};
use regex::Regex;
use std::fmt;
use std::io;
use std::process::Child;

/// Message shown when a skip predicate returns a plain `true`
pub const SELF_SKIPPED: &str = "Task skipped itself";

/// Result of a task's own skip predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    Run,
    Skip,
    Reason(String),
}

impl SkipDecision {
    /// The skip message, if the task should be skipped
    pub fn reason(self) -> Option<String> {
        match self {
            SkipDecision::Run => None,
            SkipDecision::Skip => Some(SELF_SKIPPED.to_string()),
            SkipDecision::Reason(reason) => Some(reason),
        }
    }
}

impl From<bool> for SkipDecision {
    fn from(skip: bool) -> Self {
        if skip {
            SkipDecision::Skip
        } else {
            SkipDecision::Run
        }
    }
}

impl From<&str> for SkipDecision {
    fn from(reason: &str) -> Self {
        SkipDecision::Reason(reason.to_string())
    }
}

impl From<String> for SkipDecision {
    fn from(reason: String) -> Self {
        SkipDecision::Reason(reason)
    }
}

impl From<Option<String>> for SkipDecision {
    fn from(reason: Option<String>) -> Self {
        reason.map_or(SkipDecision::Run, SkipDecision::Reason)
    }
}

pub type SkipFn = Box<dyn Fn(&UserContext) -> anyhow::Result<SkipDecision> + Send + Sync>;
pub type CommandGetter = Box<dyn Fn(&UserContext) -> anyhow::Result<Command> + Send + Sync>;
pub type OptionsGetter = Box<dyn Fn(&UserContext) -> anyhow::Result<ExecOptions> + Send + Sync>;
pub type RunFn =
    Box<dyn for<'h> Fn(TaskPayload<'h>) -> anyhow::Result<Option<String>> + Send + Sync>;
pub type AddContextFn =
    Box<dyn for<'h> Fn(AddContextPayload<'h>) -> anyhow::Result<Fields> + Send + Sync>;
pub type KillFn = Box<dyn Fn(&mut Child) -> io::Result<()> + Send + Sync>;

/// What `run` and `rollback` callbacks receive
pub struct TaskPayload<'h> {
    pub context: UserContext,
    pub exec: Exec<'h>,
    pub output: Output<'h>,
}

impl<'h> TaskPayload<'h> {
    pub fn new(output: Output<'h>) -> Self {
        TaskPayload {
            context: output.context().user_context(),
            exec: Exec::new(output.clone()),
            output,
        }
    }

    /// Report one output line for the task
    pub fn output_line(&self, line: impl AsRef<str>) -> TaskResult<()> {
        self.output.line(line)
    }
}

/// What `add_context` callbacks receive
pub struct AddContextPayload<'h> {
    pub context: UserContext,
    pub exec: Exec<'h>,
    holder: ContextHolder,
}

impl<'h> AddContextPayload<'h> {
    pub fn new(output: Output<'h>) -> Self {
        let holder = output.holder().clone();
        AddContextPayload {
            context: output.context().user_context(),
            exec: Exec::new(output),
            holder,
        }
    }

    /// Secrets are masked in every line displayed from now on
    pub fn add_secret(&self, secret: impl Into<String>) {
        self.holder.add_secret(secret);
    }
}

/// A command, given directly or computed from the context
pub enum CommandSource {
    Static(Command),
    Getter(CommandGetter),
}

impl CommandSource {
    pub fn is_getter(&self) -> bool {
        matches!(self, CommandSource::Getter(_))
    }

    pub fn resolve(&self, context: &UserContext) -> anyhow::Result<Command> {
        match self {
            CommandSource::Static(command) => Ok(command.clone()),
            CommandSource::Getter(getter) => getter(context),
        }
    }
}

/// Execution options, given directly or computed from the context
pub enum OptionsSource {
    Static(ExecOptions),
    Getter(OptionsGetter),
}

impl Default for OptionsSource {
    fn default() -> Self {
        OptionsSource::Static(ExecOptions::default())
    }
}

impl OptionsSource {
    pub fn is_getter(&self) -> bool {
        matches!(self, OptionsSource::Getter(_))
    }

    pub fn resolve(&self, context: &UserContext) -> anyhow::Result<ExecOptions> {
        match self {
            OptionsSource::Static(options) => Ok(options.clone()),
            OptionsSource::Getter(getter) => getter(context),
        }
    }
}

/// How the children of a parent task run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrent {
    #[default]
    Sequential,
    /// On a pool as wide as the run's concurrency allows
    Parallel,
    /// On a pool at most this wide
    Limit(usize),
}

impl From<bool> for Concurrent {
    fn from(concurrent: bool) -> Self {
        if concurrent {
            Concurrent::Parallel
        } else {
            Concurrent::Sequential
        }
    }
}

impl From<usize> for Concurrent {
    fn from(limit: usize) -> Self {
        Concurrent::Limit(limit)
    }
}

/// Fields shared by every kind of task
#[derive(Default)]
pub struct TaskMeta {
    pub title: String,
    pub tags: Vec<String>,
    pub skip: Option<SkipFn>,
}

impl TaskMeta {
    fn new(title: impl Into<String>) -> Self {
        TaskMeta {
            title: title.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for TaskMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMeta")
            .field("title", &self.title)
            .field("tags", &self.tags)
            .field("skip", &self.skip.is_some())
            .finish()
    }
}

/// Runs a single command
pub struct CommandTask {
    pub meta: TaskMeta,
    pub command: CommandSource,
    pub options: OptionsSource,
}

impl CommandTask {
    pub fn new<I, S>(title: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandTask {
            meta: TaskMeta::new(title),
            command: CommandSource::Static(command.into_iter().map(Into::into).collect()),
            options: OptionsSource::default(),
        }
    }

    /// A command computed from the context when the task runs
    pub fn with_getter<F>(title: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&UserContext) -> anyhow::Result<Command> + Send + Sync + 'static,
    {
        CommandTask {
            meta: TaskMeta::new(title),
            command: CommandSource::Getter(Box::new(getter)),
            options: OptionsSource::default(),
        }
    }

    pub fn options(mut self, options: ExecOptions) -> Self {
        self.options = OptionsSource::Static(options);
        self
    }

    pub fn options_with<F>(mut self, getter: F) -> Self
    where
        F: Fn(&UserContext) -> anyhow::Result<ExecOptions> + Send + Sync + 'static,
    {
        self.options = OptionsSource::Getter(Box::new(getter));
        self
    }
}

/// Calls Rust code
pub struct RegularTask {
    pub meta: TaskMeta,
    pub run: RunFn,
}

impl RegularTask {
    pub fn new<F>(title: impl Into<String>, run: F) -> Self
    where
        F: for<'h> Fn(TaskPayload<'h>) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        RegularTask {
            meta: TaskMeta::new(title),
            run: Box::new(run),
        }
    }
}

/// A process kept running while the children of a parent task run
pub struct Background {
    pub command: CommandSource,
    pub options: OptionsSource,
    /// Children start once this matches a chunk of the process output; named
    /// groups are added to their context
    pub pattern: Regex,
    pub kill: Option<KillFn>,
}

impl Background {
    pub fn new<I, S>(command: I, pattern: Regex) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Background {
            command: CommandSource::Static(command.into_iter().map(Into::into).collect()),
            options: OptionsSource::default(),
            pattern,
            kill: None,
        }
    }

    pub fn with_getter<F>(getter: F, pattern: Regex) -> Self
    where
        F: Fn(&UserContext) -> anyhow::Result<Command> + Send + Sync + 'static,
    {
        Background {
            command: CommandSource::Getter(Box::new(getter)),
            options: OptionsSource::default(),
            pattern,
            kill: None,
        }
    }

    pub fn options(mut self, options: ExecOptions) -> Self {
        self.options = OptionsSource::Static(options);
        self
    }

    pub fn options_with<F>(mut self, getter: F) -> Self
    where
        F: Fn(&UserContext) -> anyhow::Result<ExecOptions> + Send + Sync + 'static,
    {
        self.options = OptionsSource::Getter(Box::new(getter));
        self
    }

    /// Stop the process with `kill` instead of the default kill
    pub fn kill_with<F>(mut self, kill: F) -> Self
    where
        F: Fn(&mut Child) -> io::Result<()> + Send + Sync + 'static,
    {
        self.kill = Some(Box::new(kill));
        self
    }

    /// Named capture groups of the pattern
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.pattern.capture_names().flatten()
    }
}

/// Groups child tasks
pub struct ParentTask {
    pub meta: TaskMeta,
    pub children: Vec<Task>,
    pub concurrent: Concurrent,
    pub add_context: Option<AddContextFn>,
    pub background: Option<Background>,
    pub rollback: Option<RunFn>,
}

impl ParentTask {
    pub fn new(title: impl Into<String>, children: Vec<Task>) -> Self {
        ParentTask {
            meta: TaskMeta::new(title),
            children,
            concurrent: Concurrent::Sequential,
            add_context: None,
            background: None,
            rollback: None,
        }
    }

    pub fn concurrent(mut self, concurrent: impl Into<Concurrent>) -> Self {
        self.concurrent = concurrent.into();
        self
    }

    /// Compute fields visible to the children of this task only
    pub fn add_context<F>(mut self, add: F) -> Self
    where
        F: for<'h> Fn(AddContextPayload<'h>) -> anyhow::Result<Fields> + Send + Sync + 'static,
    {
        self.add_context = Some(Box::new(add));
        self
    }

    pub fn background(mut self, background: Background) -> Self {
        self.background = Some(background);
        self
    }

    /// Run `rollback` when any task of this subtree fails
    pub fn rollback<F>(mut self, rollback: F) -> Self
    where
        F: for<'h> Fn(TaskPayload<'h>) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        self.rollback = Some(Box::new(rollback));
        self
    }
}

macro_rules! impl_meta_builders {
    ($($kind:ident => $variant:ident),*) => {
        $(
            impl $kind {
                pub fn tags<I, S>(mut self, tags: I) -> Self
                where
                    I: IntoIterator<Item = S>,
                    S: Into<String>,
                {
                    self.meta.tags = tags.into_iter().map(Into::into).collect();
                    self
                }

                /// Skip the task when `predicate` says so
                pub fn skip_if<F, D>(self, predicate: F) -> Self
                where
                    F: Fn(&UserContext) -> D + Send + Sync + 'static,
                    D: Into<SkipDecision>,
                {
                    self.try_skip_if(move |context| Ok(predicate(context).into()))
                }

                pub fn try_skip_if<F>(mut self, predicate: F) -> Self
                where
                    F: Fn(&UserContext) -> anyhow::Result<SkipDecision> + Send + Sync + 'static,
                {
                    self.meta.skip = Some(Box::new(predicate));
                    self
                }
            }

            impl From<$kind> for Task {
                fn from(task: $kind) -> Self {
                    Task::$variant(task)
                }
            }
        )*
    };
}

impl_meta_builders!(CommandTask => Command, RegularTask => Regular, ParentTask => Parent);

/// A node of the declared task tree
pub enum Task {
    Command(CommandTask),
    Regular(RegularTask),
    Parent(ParentTask),
}

impl Task {
    pub fn meta(&self) -> &TaskMeta {
        match self {
            Task::Command(task) => &task.meta,
            Task::Regular(task) => &task.meta,
            Task::Parent(task) => &task.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut TaskMeta {
        match self {
            Task::Command(task) => &mut task.meta,
            Task::Regular(task) => &mut task.meta,
            Task::Parent(task) => &mut task.meta,
        }
    }

    pub fn title(&self) -> &str {
        &self.meta().title
    }

    pub fn tags(&self) -> &[String] {
        &self.meta().tags
    }

    pub fn children(&self) -> &[Task] {
        match self {
            Task::Parent(task) => &task.children,
            _ => &[],
        }
    }

    pub fn is_parent(&self) -> bool {
        matches!(self, Task::Parent(_))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Command(task) => f
                .debug_struct("CommandTask")
                .field("meta", &task.meta)
                .field("getter", &task.command.is_getter())
                .finish(),
            Task::Regular(task) => f
                .debug_struct("RegularTask")
                .field("meta", &task.meta)
                .finish(),
            Task::Parent(task) => f
                .debug_struct("ParentTask")
                .field("meta", &task.meta)
                .field("children", &task.children)
                .field("concurrent", &task.concurrent)
                .finish(),
        }
    }
}
