//! Error types for Taskline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Taskline operations
pub type Result<T> = std::result::Result<T, TasklineError>;

/// Main error type for Taskline
#[derive(Error, Debug)]
pub enum TasklineError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A task failed while the tree was running
    #[error("{0}")]
    Task(#[from] TaskError),

    /// A command failed; the message already carries its outputs when needed
    #[error("{0}")]
    Failed(String),

    /// Variable interpolation errors
    #[error("Interpolation error: {0}")]
    Interpolation(#[from] InterpolationError),

    /// Command line misuse
    #[error("{0}")]
    Usage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Two tasks have the same title: {0}")]
    DuplicateTitle(String),

    #[error("Two tasks have the same title slug: {0}")]
    DuplicateSlug(String),

    #[error("Command '{0}' is not defined")]
    CommandNotFound(String),

    #[error("Failed to include file '{path}': {error}")]
    IncludeFile { path: PathBuf, error: String },

    #[error("Invalid CPU count: {0}")]
    InvalidCpuCount(String),

    #[error("Invalid match pattern for task '{title}': {error}")]
    InvalidPattern { title: String, error: String },
}

/// A subprocess that could not be spawned or exited unsuccessfully.
///
/// All fields are trimmed and have every known secret masked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecError {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl ExecError {
    pub fn new(
        message: impl Into<String>,
        stdout: impl AsRef<str>,
        stderr: impl AsRef<str>,
    ) -> Self {
        ExecError {
            message: message.into(),
            stdout: stdout.as_ref().trim().to_string(),
            stderr: stderr.as_ref().trim().to_string(),
        }
    }

    /// Render the user-facing message, with the captured outputs appended
    /// unless they were already streamed live.
    pub fn to_detailed(&self, with_outputs: bool) -> String {
        let mut parts = vec![self.message.as_str()];
        if with_outputs {
            if !self.stdout.is_empty() {
                parts.push("STDOUT:");
                parts.push(&self.stdout);
            }
            if !self.stderr.is_empty() {
                parts.push("STDERR:");
                parts.push(&self.stderr);
            }
        }
        parts.join("\n")
    }
}

/// Reading a value out of the user context failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context value '{0}' is not defined")]
    Missing(String),

    #[error("Context value '{key}' is not a {expected}")]
    Type { key: String, expected: &'static str },
}

/// Failure of a single node of the running task tree
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Output line cannot contain line break:\n\n: {0}")]
    MultilineOutput(String),

    #[error("Failed to build worker pool: {0}")]
    Pool(String),

    #[error("{0:#}")]
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<TaskError>() {
            Ok(task) => return task,
            Err(err) => err,
        };
        let err = match err.downcast::<ExecError>() {
            Ok(exec) => return TaskError::Exec(exec),
            Err(err) => err,
        };
        match err.downcast::<ContextError>() {
            Ok(context) => TaskError::Context(context),
            Err(err) => TaskError::Failed(err),
        }
    }
}

/// Variable interpolation errors
#[derive(Error, Debug)]
pub enum InterpolationError {
    #[error("Variable '{0}' is not defined")]
    UndefinedVariable(String),

    #[error("Invalid interpolation syntax: {0}")]
    InvalidSyntax(String),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for node execution
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Specialized result type for interpolation operations
pub type InterpolationResult<T> = std::result::Result<T, InterpolationError>;
