//! When condition evaluation
//!
//! Conditions declared on a task turn into its skip predicate: all of them
//! must hold for the task to run.

use crate::runner::context::UserContext;
use crate::runner::interpolate::interpolate_lenient;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use tracing::debug;

/// A single condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equal { left: String, right: String },
    NotEqual { left: String, right: String },
    /// Shell command that must exit successfully
    Command(String),
    /// Glob pattern that must match at least one path
    Exists(String),
    EnvSet(String),
    EnvNotSet(String),
    OptionSet(String),
    OptionNotSet(String),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equal { left, right } => write!(f, "{} == {}", left, right),
            Condition::NotEqual { left, right } => write!(f, "{} != {}", left, right),
            Condition::Command(command) => write!(f, "command `{}`", command),
            Condition::Exists(pattern) => write!(f, "exists {}", pattern),
            Condition::EnvSet(name) => write!(f, "env-set {}", name),
            Condition::EnvNotSet(name) => write!(f, "env-not-set {}", name),
            Condition::OptionSet(name) => write!(f, "option-set {}", name),
            Condition::OptionNotSet(name) => write!(f, "option-not-set {}", name),
        }
    }
}

/// Conditions of one task, with what they need to be evaluated
#[derive(Debug, Clone)]
pub struct Conditions {
    pub conditions: Vec<Condition>,
    /// Directory relative paths and commands are resolved against
    pub working_dir: PathBuf,
    /// Program and flags running `command` conditions
    pub interpreter: Vec<String>,
}

impl Conditions {
    /// The first condition that does not hold, rendered as a skip reason
    pub fn unmet(&self, ctx: &UserContext) -> anyhow::Result<Option<String>> {
        for condition in &self.conditions {
            if !evaluate(condition, ctx, &self.working_dir, &self.interpreter)? {
                debug!(%condition, "condition not met");
                return Ok(Some(format!("Condition not met: {}", condition)));
            }
        }
        Ok(None)
    }
}

/// Evaluate a single condition
pub fn evaluate(
    condition: &Condition,
    ctx: &UserContext,
    working_dir: &Path,
    interpreter: &[String],
) -> anyhow::Result<bool> {
    match condition {
        Condition::Equal { left, right } => {
            Ok(interpolate_lenient(left, ctx) == interpolate_lenient(right, ctx))
        }

        Condition::NotEqual { left, right } => {
            Ok(interpolate_lenient(left, ctx) != interpolate_lenient(right, ctx))
        }

        // A stand-in never spawns; the command is assumed to succeed
        Condition::Command(_) if ctx.is_stand_in() => Ok(true),

        Condition::Command(command) => {
            check_command(&interpolate_lenient(command, ctx), working_dir, interpreter)
        }

        Condition::Exists(pattern) => {
            let pattern = interpolate_lenient(pattern, ctx);
            let full = working_dir.join(&pattern);
            let mut matches = glob::glob(&full.to_string_lossy())?;
            Ok(matches.any(|entry| entry.is_ok()))
        }

        Condition::EnvSet(name) => Ok(env::var_os(interpolate_lenient(name, ctx)).is_some()),

        Condition::EnvNotSet(name) => Ok(env::var_os(interpolate_lenient(name, ctx)).is_none()),

        Condition::OptionSet(name) => Ok(option_set(ctx, name)),

        Condition::OptionNotSet(name) => Ok(!option_set(ctx, name)),
    }
}

/// An option counts as set when present and neither null, false nor empty
fn option_set(ctx: &UserContext, name: &str) -> bool {
    use serde_yaml::Value;

    match ctx.fields().get(name) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Run `command` quietly through the interpreter and report whether it succeeded
fn check_command(
    command: &str,
    working_dir: &Path,
    interpreter: &[String],
) -> anyhow::Result<bool> {
    let (program, flags) = interpreter
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Interpreter is empty"))?;

    let status = StdCommand::new(program)
        .args(flags)
        .arg(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::context::{Fields, InternalContext, OptionsContext};
    use tempfile::TempDir;

    fn ctx(pairs: &[(&str, serde_yaml::Value)]) -> UserContext {
        let fields: Fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        UserContext::new(false, fields)
    }

    fn sh() -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string()]
    }

    fn check(condition: Condition, ctx: &UserContext) -> bool {
        evaluate(&condition, ctx, Path::new("."), &sh()).unwrap()
    }

    #[test]
    fn test_evaluate_equal() {
        let production = ctx(&[("env", "production".into())]);
        let development = ctx(&[("env", "development".into())]);
        let condition = Condition::Equal {
            left: "${env}".to_string(),
            right: "production".to_string(),
        };

        assert!(check(condition.clone(), &production));
        assert!(!check(condition, &development));
    }

    #[test]
    fn test_evaluate_not_equal() {
        let development = ctx(&[("env", "development".into())]);
        let condition = Condition::NotEqual {
            left: "${env}".to_string(),
            right: "production".to_string(),
        };
        assert!(check(condition, &development));
    }

    #[test]
    #[cfg(unix)]
    fn test_evaluate_command() {
        let context = ctx(&[]);
        assert!(check(Condition::Command("true".to_string()), &context));
        assert!(!check(Condition::Command("false".to_string()), &context));
    }

    #[test]
    #[cfg(unix)]
    fn test_command_is_not_run_for_a_stand_in() {
        let temp_dir = TempDir::new().unwrap();
        let stand_in = InternalContext::new(OptionsContext::default()).stand_in_context();

        let met = evaluate(
            &Condition::Command("touch spawned; false".to_string()),
            &stand_in,
            temp_dir.path(),
            &sh(),
        )
        .unwrap();

        assert!(met);
        assert!(!temp_dir.path().join("spawned").exists());
    }

    #[test]
    fn test_evaluate_exists_with_glob() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("test.txt"), "test").unwrap();
        let context = ctx(&[]);

        let exists = |pattern: &str| {
            evaluate(
                &Condition::Exists(pattern.to_string()),
                &context,
                temp_dir.path(),
                &sh(),
            )
            .unwrap()
        };

        assert!(exists("test.txt"));
        assert!(exists("*.txt"));
        assert!(!exists("nonexistent.txt"));
        assert!(!exists("*.md"));
    }

    #[test]
    fn test_evaluate_env() {
        env::set_var("TEST_TASKLINE_WHEN_VAR", "value");
        env::remove_var("NONEXISTENT_VAR_TASKLINE");
        let context = ctx(&[]);

        assert!(check(Condition::EnvSet("TEST_TASKLINE_WHEN_VAR".to_string()), &context));
        assert!(check(Condition::EnvNotSet("NONEXISTENT_VAR_TASKLINE".to_string()), &context));

        env::remove_var("TEST_TASKLINE_WHEN_VAR");
    }

    #[test]
    fn test_evaluate_options() {
        let context = ctx(&[
            ("flag", true.into()),
            ("off", false.into()),
            ("name", "x".into()),
        ]);

        assert!(check(Condition::OptionSet("flag".to_string()), &context));
        assert!(check(Condition::OptionSet("name".to_string()), &context));
        assert!(check(Condition::OptionNotSet("off".to_string()), &context));
        assert!(check(Condition::OptionNotSet("missing".to_string()), &context));
    }

    #[test]
    fn test_unmet_reports_first_failing_condition() {
        let conditions = Conditions {
            conditions: vec![
                Condition::OptionNotSet("missing".to_string()),
                Condition::OptionSet("flag".to_string()),
                Condition::EnvSet("NONEXISTENT_VAR_TASKLINE".to_string()),
            ],
            working_dir: PathBuf::from("."),
            interpreter: sh(),
        };

        assert_eq!(
            conditions.unmet(&ctx(&[])).unwrap().as_deref(),
            Some("Condition not met: option-set flag")
        );
        env::remove_var("NONEXISTENT_VAR_TASKLINE");
        assert_eq!(
            conditions
                .unmet(&ctx(&[("flag", true.into())]))
                .unwrap()
                .as_deref(),
            Some("Condition not met: env-set NONEXISTENT_VAR_TASKLINE")
        );
    }
}
