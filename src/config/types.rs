//! Core configuration types
//!
//! This module defines the data structures that represent a taskline.yml
//! configuration file.

use crate::runner::when::Condition;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Top-level configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Application name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Application usage description (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    /// Interpreter for commands given as a single string (e.g., ["sh", "-c"])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<Vec<String>>,

    /// Dotenv file loaded before running, relative to the config file
    #[serde(rename = "env-file", default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,

    /// Commands defined in the configuration
    #[serde(default)]
    pub commands: BTreeMap<String, CommandConfig>,
}

/// A named command: its options and the task tree it runs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandConfig {
    /// Usage description for help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    /// Options (flags) of the command, available in the task context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, OptionConfig>,

    /// Root task
    pub task: TaskConfig,
}

/// A task of the tree, leaf or parent
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Conditions that must all hold for the task to run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<When>,

    /// Command of a leaf task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,

    /// Working directory of the command, relative to the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Extra environment variables for the command
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Neither print the command line nor stream its output
    #[serde(default)]
    pub silent: bool,

    /// Children of a parent task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TaskConfig>>,

    /// Run children concurrently, optionally with a pool width limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<ConcurrentSpec>,

    /// Fields added to the context of the children
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, ContextEntry>,

    /// Process kept running while the children run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundConfig>,

    /// Commands run when the subtree fails
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_commands"
    )]
    pub rollback: Vec<CommandSpec>,

    /// Load this task from another file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
}

impl TaskConfig {
    pub fn is_parent(&self) -> bool {
        self.children.is_some()
    }

    /// Title, or an empty string for entries still to be included
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }
}

/// A command to execute
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Run through the interpreter
    Shell(String),

    /// Executable followed by its arguments
    Argv(Vec<String>),
}

impl CommandSpec {
    /// The argv to run, wrapping shell strings with `interpreter`
    pub fn to_argv(&self, interpreter: &[String]) -> Vec<String> {
        match self {
            CommandSpec::Shell(script) => {
                let mut argv = interpreter.to_vec();
                argv.push(script.clone());
                argv
            }
            CommandSpec::Argv(argv) => argv.clone(),
        }
    }
}

/// `concurrent: true` or `concurrent: 4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConcurrentSpec {
    Flag(bool),
    Limit(usize),
}

/// How a context field gets its value
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ContextEntry {
    /// Trimmed stdout of a command
    Command {
        command: CommandSpec,
        #[serde(default)]
        secret: bool,
    },

    /// Value of an environment variable
    Environment {
        environment: String,
        #[serde(default)]
        secret: bool,
    },

    /// Explicit value
    Value {
        value: Value,
        #[serde(default)]
        secret: bool,
    },

    /// Plain value; strings are interpolated
    Literal(Value),
}

/// Background process of a parent task
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackgroundConfig {
    pub command: CommandSpec,

    /// Regular expression matched against chunks of the process output
    #[serde(rename = "match")]
    pub pattern: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// A conditional expression
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct When {
    /// Check if values are equal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equal: Option<WhenComparison>,

    /// Check if values are not equal
    #[serde(rename = "not-equal", skip_serializing_if = "Option::is_none")]
    pub not_equal: Option<WhenComparison>,

    /// Check if a command succeeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Check if a glob pattern matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<String>,

    /// Check if environment variable is set
    #[serde(rename = "env-set", skip_serializing_if = "Option::is_none")]
    pub env_set: Option<String>,

    /// Check if environment variable is not set
    #[serde(rename = "env-not-set", skip_serializing_if = "Option::is_none")]
    pub env_not_set: Option<String>,

    /// Check if option is set
    #[serde(rename = "option-set", skip_serializing_if = "Option::is_none")]
    pub option_set: Option<String>,

    /// Check if option is not set
    #[serde(rename = "option-not-set", skip_serializing_if = "Option::is_none")]
    pub option_not_set: Option<String>,
}

impl When {
    /// Every condition set in this entry
    pub fn conditions(&self) -> Vec<Condition> {
        let mut conditions = Vec::new();
        if let Some(WhenComparison { left, right }) = &self.equal {
            conditions.push(Condition::Equal {
                left: left.clone(),
                right: right.clone(),
            });
        }
        if let Some(WhenComparison { left, right }) = &self.not_equal {
            conditions.push(Condition::NotEqual {
                left: left.clone(),
                right: right.clone(),
            });
        }
        conditions.extend(self.command.clone().map(Condition::Command));
        conditions.extend(self.exists.clone().map(Condition::Exists));
        conditions.extend(self.env_set.clone().map(Condition::EnvSet));
        conditions.extend(self.env_not_set.clone().map(Condition::EnvNotSet));
        conditions.extend(self.option_set.clone().map(Condition::OptionSet));
        conditions.extend(self.option_not_set.clone().map(Condition::OptionNotSet));
        conditions
    }
}

/// A comparison for when conditions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WhenComparison {
    /// Left-hand side of comparison
    pub left: String,

    /// Right-hand side of comparison
    pub right: String,
}

/// An option (flag) definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OptionConfig {
    /// Usage description for help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    /// Short flag (single character)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,

    /// Option type (string, bool or number)
    #[serde(rename = "type", default = "default_option_type")]
    pub option_type: String,

    /// Default value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Required option
    #[serde(default)]
    pub required: bool,

    /// Environment variable to read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

fn default_option_type() -> String {
    "string".to_string()
}

/// Custom deserializer for commands that handles both a single command and a list
fn deserialize_commands<'de, D>(deserializer: D) -> Result<Vec<CommandSpec>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;

    match value {
        // Single shell command
        Value::String(s) => Ok(vec![CommandSpec::Shell(s)]),
        // List of commands, each a shell string or an argv
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| CommandSpec::deserialize(item).map_err(D::Error::custom))
            .collect(),
        // Null or not present
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("rollback must be a string or a list of commands")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_simple_config() {
        let yaml = r#"
commands:
  hello:
    usage: Say hello
    task:
      title: Say hello
      command: echo "hello"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.commands.len(), 1);
        let task = &config.commands["hello"].task;
        assert_eq!(task.title(), "Say hello");
        assert_eq!(
            task.command,
            Some(CommandSpec::Shell("echo \"hello\"".to_string()))
        );
    }

    #[test]
    fn test_deserialize_parent_task() {
        let yaml = r#"
commands:
  release:
    options:
      semver:
        usage: Version to release
        default: "1.0"
    task:
      title: Release
      concurrent: 2
      context:
        label: "v${semver}"
        token: { environment: TOKEN, secret: true }
        sha: { command: [git, rev-parse, HEAD] }
      rollback: [[echo, rb], "echo done"]
      children:
        - title: Echo start
          command: [echo, start]
          tags: [a]
        - include: other.yml
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let command = &config.commands["release"];
        assert!(command.options.contains_key("semver"));

        let task = &command.task;
        assert!(task.is_parent());
        assert_eq!(task.concurrent, Some(ConcurrentSpec::Limit(2)));
        assert_eq!(
            task.context["label"],
            ContextEntry::Literal(Value::String("v${semver}".to_string()))
        );
        assert_eq!(
            task.context["token"],
            ContextEntry::Environment {
                environment: "TOKEN".to_string(),
                secret: true
            }
        );
        assert!(matches!(task.context["sha"], ContextEntry::Command { secret: false, .. }));
        assert_eq!(
            task.rollback,
            vec![
                CommandSpec::Argv(vec!["echo".to_string(), "rb".to_string()]),
                CommandSpec::Shell("echo done".to_string()),
            ]
        );

        let children = task.children.as_ref().unwrap();
        assert_eq!(children[0].tags, vec!["a"]);
        assert_eq!(children[1].include.as_deref(), Some("other.yml"));
    }

    #[test]
    fn test_deserialize_when_conditions() {
        let yaml = r#"
title: Conditional
command: echo "Production!"
when:
  - equal:
      left: "${env}"
      right: "production"
    option-set: force
"#;
        let task: TaskConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.when.len(), 1);
        assert_eq!(task.when[0].conditions().len(), 2);
    }

    #[test]
    fn test_unknown_task_key_is_rejected() {
        let yaml = "title: Typo\ncomand: echo\n";
        assert!(serde_yaml::from_str::<TaskConfig>(yaml).is_err());
    }

    #[test]
    fn test_shell_command_uses_interpreter() {
        let interpreter = vec!["sh".to_string(), "-c".to_string()];
        let argv = CommandSpec::Shell("echo hi".to_string()).to_argv(&interpreter);
        assert_eq!(argv, vec!["sh", "-c", "echo hi"]);
    }
}
