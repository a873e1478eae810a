//! Configuration file parsing and discovery

use crate::config::types::{Config, TaskConfig};
use crate::error::{ConfigError, ConfigResult, TasklineError};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file names to search for
pub const CONFIG_FILE_NAMES: &[&str] = &["taskline.yml", "taskline.yaml"];

/// Maximum nesting of included files
const MAX_INCLUDE_DEPTH: usize = 16;

/// Find the configuration file by searching current and parent directories
pub fn find_config_file() -> ConfigResult<PathBuf> {
    find_config_file_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the configuration file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            if config_path.is_file() {
                return Ok(config_path);
            }
            searched_paths.push(config_path.display().to_string());
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a configuration file from a path
pub fn parse_config_file(path: &Path) -> Result<Config, TasklineError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e))
    })?;

    parse_config(&contents, Some(path))
}

/// Parse configuration from a string; includes are resolved relative to
/// `config_path` when given
pub fn parse_config(yaml: &str, config_path: Option<&Path>) -> Result<Config, TasklineError> {
    let mut config: Config = serde_yaml::from_str(yaml)?;

    if let Some(path) = config_path {
        let dir = base_dir(path);
        for command in config.commands.values_mut() {
            process_includes(&mut command.task, &dir, 0)?;
        }
    }

    Ok(config)
}

/// Directory containing `config_path`
pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Replace every `include` entry of the tree with the task it points to
fn process_includes(task: &mut TaskConfig, dir: &Path, depth: usize) -> ConfigResult<()> {
    if let Some(include_path) = task.include.take() {
        let full_include_path = dir.join(&include_path);
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(ConfigError::IncludeFile {
                path: full_include_path,
                error: "includes are nested too deeply".to_string(),
            });
        }

        debug!(path = %full_include_path.display(), "including task");
        let mut included = load_included_task(&full_include_path)?;
        // Nested includes are relative to the file that declares them
        process_includes(&mut included, &base_dir(&full_include_path), depth + 1)?;
        *task = included;
        return Ok(());
    }

    if let Some(children) = task.children.as_mut() {
        for child in children {
            process_includes(child, dir, depth)?;
        }
    }
    Ok(())
}

/// Load a task from an included file
fn load_included_task(path: &Path) -> ConfigResult<TaskConfig> {
    let include_error = |error: String| ConfigError::IncludeFile {
        path: path.to_path_buf(),
        error,
    };

    let contents = fs::read_to_string(path).map_err(|e| include_error(e.to_string()))?;
    serde_yaml::from_str(&contents).map_err(|e| include_error(e.to_string()))
}

/// Parse configuration with automatic file discovery
pub fn parse_config_auto() -> Result<(Config, PathBuf), TasklineError> {
    let config_path = find_config_file()?;
    let config = parse_config_file(&config_path)?;
    Ok((config, config_path))
}

/// Load the `env-file` of the configuration into the process environment.
///
/// Variables already set are kept.
pub fn load_env_file(config: &Config, config_path: &Path) -> ConfigResult<()> {
    let Some(env_file) = &config.env_file else {
        return Ok(());
    };

    let path = base_dir(config_path).join(env_file);
    dotenvy::from_path(&path).map_err(|e| {
        ConfigError::Invalid(format!("Failed to load env file {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), "loaded env file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SIMPLE: &str = r#"
commands:
  test:
    task:
      title: Test
      command: echo "test"
"#;

    #[test]
    fn test_parse_simple_config() {
        let config = parse_config(SIMPLE, None).unwrap();
        assert_eq!(config.commands.len(), 1);
        assert!(config.commands.contains_key("test"));
    }

    #[test]
    fn test_find_config_in_current_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("taskline.yml");
        fs::write(&config_path, SIMPLE).unwrap();

        let found = find_config_file_from(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("taskline.yaml");
        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();
        fs::write(&config_path, SIMPLE).unwrap();

        let found = find_config_file_from(sub_dir).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_config_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = find_config_file_from(temp_dir.path().to_path_buf());
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_parse_config_with_name_and_interpreter() {
        let yaml = r#"
name: my-app
usage: My application
interpreter: [bash, -c]
commands: {}
"#;
        let config = parse_config(yaml, None).unwrap();
        assert_eq!(config.name.as_deref(), Some("my-app"));
        assert_eq!(config.usage.as_deref(), Some("My application"));
        assert_eq!(
            config.interpreter,
            Some(vec!["bash".to_string(), "-c".to_string()])
        );
    }

    #[test]
    fn test_nested_includes_resolve_relative_to_their_file() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("tasks");
        fs::create_dir(&nested).unwrap();
        fs::write(
            nested.join("group.yml"),
            "title: Group\nchildren:\n  - include: leaf.yml\n",
        )
        .unwrap();
        fs::write(nested.join("leaf.yml"), "title: Leaf\ncommand: [echo, leaf]\n").unwrap();

        let config_path = temp_dir.path().join("taskline.yml");
        fs::write(
            &config_path,
            r#"
commands:
  build:
    task:
      title: Root
      children:
        - include: tasks/group.yml
"#,
        )
        .unwrap();

        let config = parse_config_file(&config_path).unwrap();
        let root = &config.commands["build"].task;
        let group = &root.children.as_ref().unwrap()[0];
        assert_eq!(group.title(), "Group");
        assert_eq!(group.children.as_ref().unwrap()[0].title(), "Leaf");
    }

    #[test]
    fn test_missing_include_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("taskline.yml");
        fs::write(
            &config_path,
            "commands:\n  x:\n    task:\n      include: nope.yml\n",
        )
        .unwrap();

        let err = parse_config_file(&config_path).unwrap_err();
        assert!(matches!(
            err,
            TasklineError::Config(ConfigError::IncludeFile { .. })
        ));
    }

    #[test]
    fn test_load_env_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("taskline.yml");
        fs::write(temp_dir.path().join(".env"), "TASKLINE_TEST_ENV_FILE=loaded\n").unwrap();

        let config = Config {
            env_file: Some(".env".to_string()),
            ..Default::default()
        };
        env::remove_var("TASKLINE_TEST_ENV_FILE");
        load_env_file(&config, &config_path).unwrap();
        assert_eq!(env::var("TASKLINE_TEST_ENV_FILE").unwrap(), "loaded");
        env::remove_var("TASKLINE_TEST_ENV_FILE");
    }
}
