//! Command execution
//!
//! Spawns subprocesses, streams their output in debug mode and turns
//! failures into [`ExecError`]s. Everything displayed goes through the
//! secret masking of the context the command runs in.

use crate::error::{ExecError, TaskResult};
use crate::runner::context::{hide_secrets, ContextHolder, InternalContext};
use crate::ui::NodeHandle;
use std::collections::BTreeMap;
use std::env;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, ExitStatus, Output as StdOutput, Stdio};
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use tracing::debug;

/// Executable followed by its arguments
pub type Command = Vec<String>;

/// How to run a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Working directory, defaults to the current one
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Neither print the command line nor stream the output
    pub silent: bool,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Outputs of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Last non-empty line of stdout
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
    }

    /// Trimmed stdout, when it is exactly one non-empty line
    pub fn single_line(&self) -> Option<&str> {
        let stdout = self.stdout.trim();
        (!stdout.is_empty() && !stdout.contains(['\n', '\r'])).then_some(stdout)
    }
}

/// Render a command the way a shell user would type it
pub fn command_string(
    command: &[String],
    context: &InternalContext,
    options: &ExecOptions,
) -> String {
    let cd = options
        .cwd
        .as_deref()
        .and_then(cd_segment)
        .unwrap_or_default();
    let rendered = format!("{}{}{}", cd, environment_string(&options.env), format_argv(command));
    context.hide_secrets(&rendered)
}

fn format_argv(command: &[String]) -> String {
    command
        .iter()
        .map(|part| {
            if part.contains(' ') {
                format!("\"{}\"", part)
            } else {
                part.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn cd_segment(cwd: &Path) -> Option<String> {
    let current = env::current_dir().ok();
    if current.as_deref() == Some(cwd) {
        return None;
    }
    let shown = match &current {
        Some(current) if cwd.is_absolute() => cwd.strip_prefix(current).unwrap_or(cwd),
        _ => cwd,
    };
    Some(format!("cd {} && ", shown.display()))
}

fn environment_string(env: &BTreeMap<String, String>) -> String {
    if env.is_empty() {
        return String::new();
    }

    if cfg!(windows) {
        let sets: Vec<String> = env
            .iter()
            .map(|(k, v)| format!("SET {}={}", k, v))
            .collect();
        return format!("{}&&", sets.join("&&"));
    }

    let pairs: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{} ", pairs.join(" "))
}

/// Build the process for `command` without starting it
pub fn build_process(command: &[String], options: &ExecOptions) -> Result<StdCommand, ExecError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ExecError::new("Command is empty", "", ""))?;

    let mut process = StdCommand::new(program);
    process.args(args);
    if let Some(cwd) = &options.cwd {
        process.current_dir(cwd);
    }
    process.envs(&options.env);
    Ok(process)
}

/// Run a command to completion.
///
/// In debug mode, unless `silent`, stdout and stderr are relayed live line
/// by line (masked) while also being captured.
pub fn exec(
    command: &[String],
    context: &InternalContext,
    options: &ExecOptions,
) -> Result<ExecOutput, ExecError> {
    let shown = context.hide_secrets(&format_argv(command));
    let mut process = build_process(command, options)?;
    debug!(command = %shown, cwd = ?options.cwd, "spawning subprocess");

    let result = if context.debug() && !options.silent {
        run_streamed(process, &context.secrets)
    } else {
        process.stdin(Stdio::null()).output()
    };
    let output = result.map_err(|err| {
        ExecError::new(
            context.hide_secrets(&format!("Command failed to start: {}: {}", shown, err)),
            "",
            "",
        )
    })?;

    let stdout = context.hide_secrets(&String::from_utf8_lossy(&output.stdout));
    let stderr = context.hide_secrets(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(ExecError::new(
            failure_message(output.status, &shown),
            stdout,
            stderr,
        ));
    }

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code: output.status.code(),
    })
}

fn failure_message(status: ExitStatus, display: &str) -> String {
    match status.code() {
        Some(code) => format!("Command failed with exit code {}: {}", code, display),
        None => format!("Command was terminated by a signal: {}", display),
    }
}

fn run_streamed(mut process: StdCommand, secrets: &[String]) -> io::Result<StdOutput> {
    let mut child = process
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (captured_out, captured_err) = thread::scope(|scope| {
        let out = scope.spawn(move || relay(stdout, io::stdout(), secrets));
        let err = scope.spawn(move || relay(stderr, io::stderr(), secrets));
        (joined(out), joined(err))
    });

    let status = child.wait()?;
    Ok(StdOutput {
        status,
        stdout: captured_out?,
        stderr: captured_err?,
    })
}

fn relay<R: Read, W: Write>(
    source: Option<R>,
    mut sink: W,
    secrets: &[String],
) -> io::Result<Vec<u8>> {
    let Some(source) = source else {
        return Ok(Vec::new());
    };

    let mut reader = BufReader::new(source);
    let mut captured = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        sink.write_all(hide_secrets(secrets, &text).as_bytes())?;
        sink.flush()?;
        captured.extend_from_slice(&line);
    }
    Ok(captured)
}

fn joined(handle: ScopedJoinHandle<'_, io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "output relay panicked")))
}

/// Output sink of a running node, masking the secrets of its context
#[derive(Clone)]
pub struct Output<'h> {
    handle: &'h NodeHandle<'h>,
    holder: ContextHolder,
}

impl<'h> Output<'h> {
    pub fn new(handle: &'h NodeHandle<'h>, holder: ContextHolder) -> Self {
        Output { handle, holder }
    }

    /// Report one line; line breaks are rejected
    pub fn line(&self, line: impl AsRef<str>) -> TaskResult<()> {
        let context = self.holder.get();
        self.handle.output_line(&context.hide_secrets(line.as_ref()))
    }

    pub fn context(&self) -> Arc<InternalContext> {
        self.holder.get()
    }

    pub(crate) fn holder(&self) -> &ContextHolder {
        &self.holder
    }
}

/// Command runner bound to a node and its context
#[derive(Clone)]
pub struct Exec<'h> {
    output: Output<'h>,
}

impl<'h> Exec<'h> {
    pub fn new(output: Output<'h>) -> Self {
        Exec { output }
    }

    pub fn run<I, S>(&self, command: I) -> TaskResult<ExecOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with(command, &ExecOptions::default())
    }

    /// Run a command, first reporting its command line unless `silent`
    pub fn run_with<I, S>(&self, command: I, options: &ExecOptions) -> TaskResult<ExecOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Command = command.into_iter().map(Into::into).collect();
        let context = self.output.context();
        if !options.silent {
            self.output.line(command_string(&command, &context, options))?;
        }
        Ok(exec(&command, &context, options)?)
    }
}
