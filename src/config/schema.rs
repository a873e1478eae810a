//! Configuration validation
//!
//! Structural checks run before anything else: a task tree that passes them
//! can always be built.

use crate::config::types::{Config, OptionConfig, TaskConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::runner::context::RESERVED_KEYS;
use regex::Regex;

/// Option types accepted in `options`
pub const OPTION_TYPES: &[&str] = &["string", "bool", "boolean", "number"];

/// Option names and short flags taken by the command line itself
pub const RESERVED_OPTIONS: &[&str] = &[
    "file",
    "help",
    "version",
    "debug",
    "dry-run",
    "dryRun",
    "from",
    "until",
    "only",
    "skip",
    "tag",
    "concurrency",
];
pub const RESERVED_SHORTS: &[char] = &['f', 'h', 'V'];

/// Command names taken by the command line itself
pub const RESERVED_COMMANDS: &[&str] = &["completion", "help"];

/// Validate a complete configuration
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    if let Some(interpreter) = &config.interpreter {
        if interpreter.is_empty() {
            return Err(ConfigError::Invalid("interpreter cannot be empty".to_string()));
        }
    }

    for (name, command) in &config.commands {
        if RESERVED_COMMANDS.contains(&name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Command name '{}' is reserved",
                name
            )));
        }
        for (option_name, option) in &command.options {
            validate_option(name, option_name, option)?;
        }
        validate_task(&command.task)?;
    }

    Ok(())
}

/// Validate an option of command `command`
fn validate_option(command: &str, name: &str, option: &OptionConfig) -> ConfigResult<()> {
    if RESERVED_KEYS.contains(&name) || RESERVED_OPTIONS.contains(&name) {
        return Err(ConfigError::Invalid(format!(
            "Option '{}' of command '{}' uses a reserved name",
            name, command
        )));
    }

    if !OPTION_TYPES.contains(&option.option_type.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "Invalid option type: {}. Must be one of: string, bool, number",
            option.option_type
        )));
    }

    if let Some(short) = &option.short {
        if short.chars().count() != 1 {
            return Err(ConfigError::Invalid(format!(
                "Short flag of option '{}' must be a single character",
                name
            )));
        }
        if short.chars().any(|c| RESERVED_SHORTS.contains(&c)) {
            return Err(ConfigError::Invalid(format!(
                "Short flag '{}' of option '{}' is reserved",
                short, name
            )));
        }
    }

    Ok(())
}

/// Validate a task and its subtree
pub fn validate_task(task: &TaskConfig) -> ConfigResult<()> {
    if let Some(include) = &task.include {
        return Err(ConfigError::Invalid(format!(
            "include '{}' can only be resolved from a config file",
            include
        )));
    }

    let title = match task.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => title,
        _ => return Err(ConfigError::Invalid("Every task needs a title".to_string())),
    };
    let invalid = |message: &str| ConfigError::Invalid(format!("Task '{}': {}", title, message));

    match (&task.command, &task.children) {
        (Some(_), Some(_)) => return Err(invalid("has both command and children")),
        (None, None) => return Err(invalid("needs either command or children")),
        _ => {}
    }

    if task.is_parent() {
        if task.dir.is_some() || !task.env.is_empty() || task.silent {
            return Err(invalid("dir, env and silent only apply to commands"));
        }
    } else if task.concurrent.is_some()
        || !task.context.is_empty()
        || task.background.is_some()
        || !task.rollback.is_empty()
    {
        return Err(invalid(
            "concurrent, context, background and rollback only apply to parent tasks",
        ));
    }

    if let Some(key) = task
        .context
        .keys()
        .find(|key| RESERVED_KEYS.contains(&key.as_str()))
    {
        return Err(invalid(&format!("context key '{}' is reserved", key)));
    }

    for when in &task.when {
        if when.conditions().is_empty() {
            return Err(invalid("when entry has no condition"));
        }
    }

    if let Some(background) = &task.background {
        let pattern = Regex::new(&background.pattern).map_err(|e| ConfigError::InvalidPattern {
            title: title.to_string(),
            error: e.to_string(),
        })?;
        if let Some(group) = pattern
            .capture_names()
            .flatten()
            .find(|group| RESERVED_KEYS.contains(group))
        {
            return Err(invalid(&format!("match group '{}' is reserved", group)));
        }
    }

    for child in task.children.iter().flatten() {
        validate_task(child)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(yaml: &str) -> TaskConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn config(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_tree() {
        let tree = task(
            r#"
title: Root
concurrent: true
rollback: echo rb
background: { command: [server], match: "port (?P<port>\\d+)" }
children:
  - title: Leaf
    command: [echo, hi]
    dir: sub
"#,
        );
        assert!(validate_task(&tree).is_ok());
    }

    #[test]
    fn test_missing_title() {
        let err = validate_task(&task("command: echo hi")).unwrap_err();
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn test_leaf_xor_parent() {
        assert!(validate_task(&task("title: Both\ncommand: x\nchildren: []")).is_err());
        assert!(validate_task(&task("title: Neither")).is_err());
    }

    #[test]
    fn test_parent_only_keys_on_leaf() {
        let err = validate_task(&task("title: Leaf\ncommand: x\nconcurrent: true")).unwrap_err();
        assert!(err.to_string().contains("only apply to parent tasks"));
    }

    #[test]
    fn test_invalid_match_pattern() {
        let tree = task(
            r#"
title: Root
background: { command: [server], match: "(unclosed" }
children: []
"#,
        );
        assert!(matches!(
            validate_task(&tree),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_nested_child_is_validated() {
        let tree = task("title: Root\nchildren:\n  - title: Child\n");
        assert!(validate_task(&tree).is_err());
    }

    #[test]
    fn test_option_types() {
        let ok = config(
            r#"
commands:
  build:
    options:
      flag: { type: bool }
      count: { type: number, short: c }
    task: { title: Build, command: make }
"#,
        );
        assert!(validate_config(&ok).is_ok());

        let bad = config(
            r#"
commands:
  build:
    options:
      flag: { type: list }
    task: { title: Build, command: make }
"#,
        );
        assert!(validate_config(&bad).is_err());
    }

    #[test]
    fn test_reserved_option_name() {
        let bad = config(
            r#"
commands:
  build:
    options:
      debug: { type: bool }
    task: { title: Build, command: make }
"#,
        );
        let err = validate_config(&bad).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_reserved_context_key() {
        let bad = task(
            r#"
title: Release
context:
  tag: v1
children:
  - { title: Push, command: [git, push] }
"#,
        );
        let err = validate_task(&bad).unwrap_err();
        assert!(err.to_string().contains("context key 'tag' is reserved"));

        let bad = task(
            r#"
title: Serve
background: { command: [serve], match: "(?P<only>\\d+)" }
children:
  - { title: Ping, command: [ping] }
"#,
        );
        assert!(validate_task(&bad).is_err());
    }

    #[test]
    fn test_reserved_command_name() {
        let bad = config("commands:\n  completion:\n    task: { title: C, command: x }\n");
        assert!(validate_config(&bad).is_err());
    }
}
