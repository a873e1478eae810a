//! Turns YAML task declarations into runnable task trees

use crate::config::types::{
    BackgroundConfig, CommandConfig, CommandSpec, ConcurrentSpec, ContextEntry, TaskConfig,
};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::context::{Fields, UserContext, Value};
use crate::runner::exec::ExecOptions;
use crate::runner::interpolate::{has_variables, interpolate, interpolate_list, interpolate_map};
use crate::runner::task::{
    AddContextPayload, Background, CommandTask, Concurrent, ParentTask, SkipDecision, SkipFn, Task,
    TaskPayload,
};
use crate::runner::when::Conditions;
use anyhow::Context as _;
use regex::Regex;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Interpreter used when the configuration does not set one
pub fn default_interpreter() -> Vec<String> {
    if cfg!(windows) {
        vec!["cmd".to_string(), "/C".to_string()]
    } else {
        vec!["sh".to_string(), "-c".to_string()]
    }
}

/// What every task of a configuration shares
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Directory of the config file; relative `dir` values start here
    pub base_dir: PathBuf,
    pub interpreter: Vec<String>,
}

impl BuildSettings {
    pub fn new(base_dir: impl Into<PathBuf>, interpreter: Option<Vec<String>>) -> Self {
        BuildSettings {
            base_dir: base_dir.into(),
            interpreter: interpreter.unwrap_or_else(default_interpreter),
        }
    }
}

/// Build the task tree of a command
pub fn build_command_task(command: &CommandConfig, settings: &BuildSettings) -> ConfigResult<Task> {
    build_task(&command.task, settings)
}

/// Build a task and its subtree
pub fn build_task(config: &TaskConfig, settings: &BuildSettings) -> ConfigResult<Task> {
    let title = config
        .title
        .clone()
        .ok_or_else(|| ConfigError::Invalid("Every task needs a title".to_string()))?;

    let mut task: Task = match (&config.command, &config.children) {
        (Some(command), None) => build_command(title, command, config, settings).into(),
        (None, Some(children)) => {
            let children = children
                .iter()
                .map(|child| build_task(child, settings))
                .collect::<ConfigResult<Vec<_>>>()?;
            build_parent(title, children, config, settings)?.into()
        }
        _ => {
            return Err(ConfigError::Invalid(format!(
                "Task '{}' needs either command or children",
                title
            )))
        }
    };

    let meta = task.meta_mut();
    meta.tags = config.tags.clone();

    let conditions: Vec<_> = config
        .when
        .iter()
        .flat_map(|when| when.conditions())
        .collect();
    if !conditions.is_empty() {
        let conditions = Conditions {
            conditions,
            working_dir: settings.base_dir.clone(),
            interpreter: settings.interpreter.clone(),
        };
        let skip: SkipFn = Box::new(move |ctx: &UserContext| -> anyhow::Result<SkipDecision> {
            Ok(conditions.unmet(ctx)?.into())
        });
        meta.skip = Some(skip);
    }

    Ok(task)
}

/// Argv template of a command; placeholders are filled at run time
fn template(command: &CommandSpec, settings: &BuildSettings) -> Vec<String> {
    command.to_argv(&settings.interpreter)
}

/// How to run one command template
#[derive(Debug, Clone)]
struct Invocation {
    argv: Vec<String>,
    dir: Option<String>,
    env: BTreeMap<String, String>,
    silent: bool,
    base_dir: PathBuf,
}

impl Invocation {
    fn is_contextual(&self) -> bool {
        self.argv.iter().any(|part| has_variables(part))
            || self.dir.as_deref().is_some_and(has_variables)
            || self.env.values().any(|value| has_variables(value))
    }

    fn argv(&self, ctx: &UserContext) -> anyhow::Result<Vec<String>> {
        Ok(interpolate_list(&self.argv, ctx)?)
    }

    /// Options of an invocation without placeholders
    fn static_options(&self) -> ExecOptions {
        ExecOptions {
            cwd: self
                .dir
                .as_deref()
                .map(|dir| resolve_dir(&self.base_dir, dir)),
            env: self.env.clone(),
            silent: self.silent,
        }
    }

    fn options(&self, ctx: &UserContext) -> anyhow::Result<ExecOptions> {
        let mut options = ExecOptions::new();
        if let Some(dir) = &self.dir {
            options = options.cwd(resolve_dir(&self.base_dir, &interpolate(dir, ctx)?));
        }
        options.env = interpolate_map(&self.env, ctx)?;
        options.silent = self.silent;
        Ok(options)
    }
}

fn resolve_dir(base_dir: &Path, dir: &str) -> PathBuf {
    let dir = Path::new(dir);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base_dir.join(dir)
    }
}

fn build_command(
    title: String,
    command: &CommandSpec,
    config: &TaskConfig,
    settings: &BuildSettings,
) -> CommandTask {
    let invocation = Arc::new(Invocation {
        argv: template(command, settings),
        dir: config.dir.clone(),
        env: config.env.clone(),
        silent: config.silent,
        base_dir: settings.base_dir.clone(),
    });

    if !invocation.is_contextual() {
        return CommandTask::new(title, invocation.argv.clone())
            .options(invocation.static_options());
    }

    let for_options = Arc::clone(&invocation);
    CommandTask::with_getter(title, move |ctx| invocation.argv(ctx))
        .options_with(move |ctx| for_options.options(ctx))
}

fn build_parent(
    title: String,
    children: Vec<Task>,
    config: &TaskConfig,
    settings: &BuildSettings,
) -> ConfigResult<ParentTask> {
    let mut parent = ParentTask::new(title.clone(), children);

    parent = match config.concurrent {
        Some(ConcurrentSpec::Flag(flag)) => parent.concurrent(flag),
        Some(ConcurrentSpec::Limit(limit)) => parent.concurrent(Concurrent::Limit(limit)),
        None => parent,
    };

    if !config.context.is_empty() {
        parent = parent.add_context(context_adder(config.context.clone(), settings.clone()));
    }

    if let Some(background) = &config.background {
        parent = parent.background(build_background(&title, background, settings)?);
    }

    if !config.rollback.is_empty() {
        let commands: Vec<Vec<String>> = config
            .rollback
            .iter()
            .map(|command| template(command, settings))
            .collect();
        parent = parent.rollback(move |payload: TaskPayload<'_>| {
            let mut last = None;
            for command in &commands {
                let argv = interpolate_list(command, &payload.context)?;
                let output = payload.exec.run(argv)?;
                last = output.last_line().map(str::to_string);
            }
            Ok(last.filter(|_| !payload.context.debug()))
        });
    }

    Ok(parent)
}

fn build_background(
    title: &str,
    config: &BackgroundConfig,
    settings: &BuildSettings,
) -> ConfigResult<Background> {
    let pattern = Regex::new(&config.pattern).map_err(|e| ConfigError::InvalidPattern {
        title: title.to_string(),
        error: e.to_string(),
    })?;
    let invocation = Invocation {
        argv: template(&config.command, settings),
        dir: config.dir.clone(),
        env: config.env.clone(),
        silent: true,
        base_dir: settings.base_dir.clone(),
    };

    if !invocation.is_contextual() {
        return Ok(Background::new(invocation.argv.clone(), pattern)
            .options(invocation.static_options()));
    }

    let invocation = Arc::new(invocation);
    let for_options = Arc::clone(&invocation);
    Ok(Background::with_getter(move |ctx| invocation.argv(ctx), pattern)
        .options_with(move |ctx| for_options.options(ctx)))
}

/// The `add_context` callback computing every entry of `context`, in key
/// order. Each entry sees the ones computed before it.
fn context_adder(
    entries: BTreeMap<String, ContextEntry>,
    settings: BuildSettings,
) -> impl for<'h> Fn(AddContextPayload<'h>) -> anyhow::Result<Fields> + Send + Sync + 'static {
    move |payload: AddContextPayload<'_>| {
        let mut fields = payload.context.fields().clone();
        let mut added = Fields::new();

        for (key, entry) in &entries {
            let ctx = UserContext::new(payload.context.debug(), fields.clone());
            let (value, secret) = match entry {
                ContextEntry::Literal(value) => (interpolate_value(value, &ctx)?, false),
                ContextEntry::Value { value, secret } => (interpolate_value(value, &ctx)?, *secret),
                ContextEntry::Environment {
                    environment,
                    secret,
                } => {
                    let value = env::var(environment).with_context(|| {
                        format!("Environment variable '{}' is not set", environment)
                    })?;
                    (Value::String(value), *secret)
                }
                ContextEntry::Command { command, secret } => {
                    let argv = interpolate_list(&template(command, &settings), &ctx)?;
                    let mut options = ExecOptions::new().cwd(&settings.base_dir);
                    options.silent = *secret;
                    let output = payload.exec.run_with(argv, &options)?;
                    (Value::String(output.stdout.trim().to_string()), *secret)
                }
            };

            if secret {
                if let Value::String(s) = &value {
                    payload.add_secret(s.clone());
                }
            }
            fields.insert(key.clone(), value.clone());
            added.insert(key.clone(), value);
        }

        Ok(added)
    }
}

fn interpolate_value(value: &Value, ctx: &UserContext) -> anyhow::Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(interpolate(s, ctx)?)),
        other => Ok(other.clone()),
    }
}
