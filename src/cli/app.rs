//! Main CLI application

use crate::config::{
    base_dir, build_command_task, load_env_file, parse_config_auto, parse_config_file,
    validate_config, BuildSettings, Config, OptionConfig,
};
use crate::error::{ConfigError, Result, TasklineError};
use crate::runner::{build_flat_tasks, run_task, FlatTasks, OptionsContext, RunOptions, Task, Value};
use crate::utils::{check_slugs, resolve_title, slugify};
use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_NAME: &str = "taskline";
const COMPLETION: &str = "completion";

/// A config command ready to run
struct Runnable {
    task: Task,
    flat: FlatTasks,
}

/// CLI application
pub struct App {
    /// Parsed configuration
    config: Config,
    /// Task trees by command name
    commands: BTreeMap<String, Runnable>,
}

impl App {
    /// Create a new app from the configuration file found by walking up
    /// from the current directory
    pub fn new() -> Result<Self> {
        let (config, config_path) = parse_config_auto()?;
        Self::load(config, config_path)
    }

    /// Create app with a specific config file
    pub fn with_config_file(path: PathBuf) -> Result<Self> {
        let config = parse_config_file(&path)?;
        Self::load(config, path)
    }

    fn load(config: Config, config_path: PathBuf) -> Result<Self> {
        debug!(path = %config_path.display(), "loaded config file");
        load_env_file(&config, &config_path)?;
        validate_config(&config)?;

        let dir = base_dir(&config_path);
        let settings = BuildSettings::new(
            fs::canonicalize(&dir).unwrap_or(dir),
            config.interpreter.clone(),
        );

        let mut commands = BTreeMap::new();
        for (name, command) in &config.commands {
            let task = build_command_task(command, &settings)?;
            let flat = build_flat_tasks(&task)?;
            check_slugs(&flat)?;
            commands.insert(name.clone(), Runnable { task, flat });
        }

        Ok(App { config, commands })
    }

    /// An app without commands, used to print completions outside a project
    fn empty() -> Self {
        App {
            config: Config::default(),
            commands: BTreeMap::new(),
        }
    }

    /// Run the application with command line arguments
    pub fn run<I, T>(self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut command = build_command(&self.config, &self.commands);
        let matches = match command.try_get_matches_from_mut(args) {
            Ok(matches) => matches,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
                ) =>
            {
                err.print()?;
                return Ok(());
            }
            Err(err) => return Err(usage_error(err)),
        };

        let (name, sub_matches) = match matches.subcommand() {
            Some(subcommand) => subcommand,
            None => return Err(TasklineError::Usage(command.render_help().to_string())),
        };

        if name == COMPLETION {
            let shell = sub_matches
                .get_one::<Shell>("shell")
                .copied()
                .ok_or_else(|| TasklineError::Usage("A shell is required".to_string()))?;
            let bin_name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, bin_name, &mut io::stdout());
            return Ok(());
        }

        let runnable = self
            .commands
            .get(name)
            .ok_or_else(|| ConfigError::CommandNotFound(name.to_string()))?;
        let options = self.config.commands[name].options.iter();
        let context = OptionsContext {
            options: run_options(sub_matches, &runnable.flat),
            fields: option_fields(options, sub_matches)?,
        };

        debug!(command = name, options = ?context.options, "running command");
        run_task(&runnable.task, context, &runnable.flat)
    }
}

/// Build the clap command from configuration
fn build_command(config: &Config, commands: &BTreeMap<String, Runnable>) -> Command {
    let mut cmd = Command::new(config.name.clone().unwrap_or_else(|| DEFAULT_NAME.to_string()))
        .version(env!("CARGO_PKG_VERSION"))
        .about(
            config
                .usage
                .clone()
                .unwrap_or_else(|| "Runs trees of tasks declared in YAML".to_string()),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Path to taskline.yml config file")
                .global(true),
        )
        .subcommand(
            Command::new(COMPLETION)
                .about("Print a shell completion script")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        );

    for (name, command) in &config.commands {
        let mut task_cmd =
            Command::new(name.clone()).about(command.usage.clone().unwrap_or_default());

        for (opt_name, opt) in &command.options {
            task_cmd = task_cmd.arg(user_option(opt_name, opt));
        }

        if let Some(runnable) = commands.get(name) {
            task_cmd = with_run_options(task_cmd, &runnable.flat);
        }

        cmd = cmd.subcommand(task_cmd);
    }

    cmd
}

/// The clap argument of a config option
fn user_option(name: &str, opt: &OptionConfig) -> Arg {
    let mut opt_def = Arg::new(name.to_string()).long(name.to_string()).help(
        opt.usage
            .clone()
            .unwrap_or_else(|| format!("Option: {}", name)),
    );

    // Add short flag if specified
    if let Some(c) = opt.short.as_ref().and_then(|short| short.chars().next()) {
        opt_def = opt_def.short(c);
    }

    // Defaults and environment fallbacks are applied after parsing, so only
    // options with neither are required on the command line
    let required = opt.required && opt.default.is_none() && opt.environment.is_none();

    match opt.option_type.as_str() {
        "bool" | "boolean" => opt_def.action(ArgAction::SetTrue),
        "number" => opt_def
            .value_name(name.to_uppercase())
            .value_parser(value_parser!(f64))
            .required(required),
        _ => opt_def.value_name(name.to_uppercase()).required(required),
    }
}

/// Add the options every command shares
fn with_run_options(cmd: Command, flat: &FlatTasks) -> Command {
    let mut titles = BTreeSet::new();
    for title in flat.titles() {
        titles.insert(title.to_string());
        titles.insert(slugify(title));
    }
    let tags: Vec<String> = flat.tags().into_iter().map(str::to_string).collect();
    let title_arg = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .long(name)
            .value_name("TASK")
            .help(help)
            .value_parser(PossibleValuesParser::new(titles.clone()))
            .hide_possible_values(true)
    };

    cmd.arg(
        Arg::new("debug")
            .long("debug")
            .help("Run serially and stream command output")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("dry-run")
            .long("dry-run")
            .alias("dryRun")
            .help("Show the commands instead of running them")
            .action(ArgAction::SetTrue),
    )
    .arg(title_arg("from", "Skip the tasks before this one"))
    .arg(title_arg("until", "Skip the tasks after this one"))
    .arg(
        title_arg("only", "Only run these tasks")
            .num_args(1..)
            .action(ArgAction::Append),
    )
    .arg(
        title_arg("skip", "Skip these tasks")
            .num_args(1..)
            .action(ArgAction::Append),
    )
    .arg(
        Arg::new("tag")
            .long("tag")
            .value_name("TAG")
            .help("Only run the tasks carrying one of these tags")
            .num_args(1..)
            .action(ArgAction::Append)
            .value_parser(PossibleValuesParser::new(tags)),
    )
    .arg(
        Arg::new("concurrency")
            .long("concurrency")
            .value_name("RATIO")
            .help("Worker pool width as a fraction of the CPU count, 0 for serial")
            .default_value("1")
            .value_parser(parse_concurrency),
    )
}

fn parse_concurrency(value: &str) -> std::result::Result<f64, String> {
    let ratio: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if ratio.is_nan() || ratio < 0.0 {
        return Err(format!("'{}' must be zero or positive", value));
    }
    Ok(ratio)
}

/// Read the scheduler options; titles given as slugs become titles
fn run_options(matches: &ArgMatches, flat: &FlatTasks) -> RunOptions {
    let title = |value: &String| resolve_title(value, flat).unwrap_or_else(|| value.clone());
    let titles = |id: &str| -> Vec<String> {
        matches
            .get_many::<String>(id)
            .map(|values| values.map(title).collect())
            .unwrap_or_default()
    };

    RunOptions {
        debug: matches.get_flag("debug") || !io::stdout().is_terminal(),
        dry_run: matches.get_flag("dry-run"),
        from: matches.get_one::<String>("from").map(title),
        until: matches.get_one::<String>("until").map(title),
        only: titles("only"),
        skip: titles("skip"),
        tag: matches
            .get_many::<String>("tag")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        concurrency: matches
            .get_one::<f64>("concurrency")
            .copied()
            .unwrap_or(1.0),
    }
}

/// Context fields of the config options: command line first, then the
/// environment, then the default
fn option_fields<'c>(
    options: impl Iterator<Item = (&'c String, &'c OptionConfig)>,
    matches: &ArgMatches,
) -> Result<BTreeMap<String, Value>> {
    let mut fields = BTreeMap::new();

    for (name, opt) in options {
        let from_env = opt.environment.as_ref().and_then(|var| env::var(var).ok());
        let value = match opt.option_type.as_str() {
            "bool" | "boolean" => {
                let value = if matches.get_flag(name) {
                    true
                } else if let Some(raw) = from_env {
                    parse_bool(&raw).ok_or_else(|| invalid_value(name, &raw))?
                } else {
                    opt.default
                        .as_ref()
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                };
                Some(Value::Bool(value))
            }
            "number" => match matches.get_one::<f64>(name) {
                Some(n) => Some(number(*n)),
                None => match from_env {
                    Some(raw) => {
                        let parsed = raw.trim().parse().map_err(|_| invalid_value(name, &raw))?;
                        Some(number(parsed))
                    }
                    None => opt.default.clone(),
                },
            },
            _ => matches
                .get_one::<String>(name)
                .cloned()
                .or(from_env)
                .map(Value::String)
                .or_else(|| opt.default.clone()),
        };

        match value {
            Some(value) => {
                fields.insert(name.clone(), value);
            }
            None if opt.required => {
                return Err(TasklineError::Usage(format!(
                    "Missing required option: --{}",
                    name
                )))
            }
            None => {}
        }
    }

    Ok(fields)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn invalid_value(name: &str, raw: &str) -> TasklineError {
    TasklineError::Usage(format!("Invalid values:\n  --{}: '{}'", name, raw))
}

fn usage_error(err: clap::Error) -> TasklineError {
    let category = match err.kind() {
        ErrorKind::UnknownArgument => Some("Unknown arguments"),
        ErrorKind::InvalidValue | ErrorKind::ValueValidation => Some("Invalid values"),
        _ => None,
    };
    let rendered = err.render().to_string();
    let rendered = rendered.trim_end();
    TasklineError::Usage(match category {
        Some(category) => format!("{}\n{}", category, rendered),
        None => rendered.to_string(),
    })
}

/// Run the CLI application with the process arguments
pub fn run() -> Result<()> {
    run_from(env::args_os().collect::<Vec<_>>())
}

/// Run the CLI application with provided arguments
pub fn run_from(args: Vec<OsString>) -> Result<()> {
    // The config file has to be known before clap can describe its commands
    let file_path = extract_file_arg(&args);

    let app = match file_path {
        Some(path) => App::with_config_file(path),
        None => App::new(),
    };
    let app = match app {
        Ok(app) => app,
        Err(TasklineError::Config(ConfigError::NotFound(_))) if wants_completion(&args) => {
            App::empty()
        }
        Err(err) => return Err(err),
    };

    app.run(args)
}

fn wants_completion(args: &[OsString]) -> bool {
    args.iter().skip(1).any(|arg| arg == COMPLETION)
}

/// Extract --file argument before clap parsing
fn extract_file_arg(args: &[OsString]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--file" || arg == "-f" {
            return iter.next().map(PathBuf::from);
        }
        if let Some(path) = arg.to_str().and_then(|arg| arg.strip_prefix("--file=")) {
            return Some(PathBuf::from(path));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn args(parts: &[&str]) -> Vec<OsString> {
        parts.iter().map(OsString::from).collect()
    }

    fn app(yaml: &str) -> App {
        let config = parse_config(yaml, None).unwrap();
        App::load(config, PathBuf::from("taskline.yml")).unwrap()
    }

    const CONFIG: &str = r#"
commands:
  release:
    options:
      flag: { type: bool }
      label: { type: string, default: "1.0", short: l }
      retries: { type: number }
    task:
      title: Release
      children:
        - title: Echo start
          command: [echo, start]
          tags: [a]
        - title: Echo end
          command: [echo, end]
          tags: [b]
"#;

    fn matches(app: &App, argv: &[&str]) -> std::result::Result<ArgMatches, clap::Error> {
        build_command(&app.config, &app.commands).try_get_matches_from(args(argv))
    }

    #[test]
    fn test_extract_file_arg() {
        let path = extract_file_arg(&args(&["taskline", "--file", "test.yml"]));
        assert_eq!(path, Some(PathBuf::from("test.yml")));
    }

    #[test]
    fn test_extract_file_arg_short_and_inline() {
        let path = extract_file_arg(&args(&["taskline", "-f", "test.yml", "build"]));
        assert_eq!(path, Some(PathBuf::from("test.yml")));

        let path = extract_file_arg(&args(&["taskline", "--file=other.yml"]));
        assert_eq!(path, Some(PathBuf::from("other.yml")));
        assert_eq!(extract_file_arg(&args(&["taskline", "build"])), None);
    }

    #[test]
    fn test_slugs_are_coerced_to_titles() {
        let app = app(CONFIG);
        let argv = [
            "taskline",
            "release",
            "--only",
            "echo-start",
            "--from",
            "Echo end",
        ];
        let m = matches(&app, &argv).unwrap();
        let (_, sub) = m.subcommand().unwrap();
        let options = run_options(sub, &app.commands["release"].flat);
        assert_eq!(options.only, vec!["Echo start"]);
        assert_eq!(options.from.as_deref(), Some("Echo end"));
        assert_eq!(options.concurrency, 1.0);
    }

    #[test]
    fn test_unknown_title_and_tag_are_rejected() {
        let app = app(CONFIG);
        let err = matches(&app, &["taskline", "release", "--skip", "nope"]).unwrap_err();
        assert!(matches!(
            usage_error(err),
            TasklineError::Usage(msg) if msg.starts_with("Invalid values")
        ));

        assert!(matches(&app, &["taskline", "release", "--tag", "zzz"]).is_err());
        assert!(matches(&app, &["taskline", "release", "--tag", "a", "b"]).is_ok());
    }

    #[test]
    fn test_unknown_argument_is_a_usage_error() {
        let app = app(CONFIG);
        let err = matches(&app, &["taskline", "release", "--bogus"]).unwrap_err();
        assert!(matches!(
            usage_error(err),
            TasklineError::Usage(msg) if msg.starts_with("Unknown arguments")
        ));
    }

    #[test]
    fn test_dry_run_alias_and_concurrency() {
        let app = app(CONFIG);
        let argv = ["taskline", "release", "--dryRun", "--concurrency", "0.5"];
        let m = matches(&app, &argv).unwrap();
        let (_, sub) = m.subcommand().unwrap();
        let options = run_options(sub, &app.commands["release"].flat);
        assert!(options.dry_run);
        assert_eq!(options.concurrency, 0.5);

        assert!(matches(&app, &["taskline", "release", "--concurrency", "-1"]).is_err());
    }

    #[test]
    fn test_option_fields() {
        let app = app(CONFIG);
        let m = matches(&app, &["taskline", "release", "--flag", "--retries", "3"]).unwrap();
        let (name, sub) = m.subcommand().unwrap();
        let fields = option_fields(app.config.commands[name].options.iter(), sub).unwrap();

        assert_eq!(fields["flag"], Value::Bool(true));
        assert_eq!(fields["label"], Value::String("1.0".to_string()));
        assert_eq!(fields["retries"], Value::from(3));
    }

    #[test]
    fn test_missing_command_is_a_usage_error() {
        let app = app(CONFIG);
        let result = app.run(args(&["taskline"]));
        assert!(matches!(result, Err(TasklineError::Usage(_))));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
