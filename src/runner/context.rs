//! Execution context for task running
//!
//! A context is an immutable snapshot: the run options parsed from the
//! command line, the user fields (command options plus everything added by
//! `add_context` steps) and the secrets to redact. New snapshots are produced
//! by merging; a [`ContextHolder`] owns the current snapshot of one subtree.

use crate::error::ContextError;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A context value
pub type Value = serde_yaml::Value;

/// User-defined context fields
pub type Fields = BTreeMap<String, Value>;

/// Keys owned by the scheduler. They are never visible to user callbacks
/// and can never be overwritten by added context.
pub const RESERVED_KEYS: &[&str] = &[
    "$0",
    "_",
    "concurrency",
    "debug",
    "dry-run",
    "dryRun",
    "from",
    "only",
    "secrets",
    "skip",
    "tag",
    "until",
];

/// Value read in place of a missing key while evaluating getters during a dry run
pub const CONTEXTUAL_PLACEHOLDER: &str = "__contextual";

const MAX_MASK_LEN: usize = 20;

/// Options parsed from the command line, fixed for the whole run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Run serially, render verbosely and stream subprocess output
    pub debug: bool,
    /// Show commands instead of running them
    pub dry_run: bool,
    pub from: Option<String>,
    pub until: Option<String>,
    pub only: Vec<String>,
    pub skip: Vec<String>,
    pub tag: Vec<String>,
    /// Fraction of the CPU count used as worker pool width, 0 means serial
    pub concurrency: f64,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            debug: false,
            dry_run: false,
            from: None,
            until: None,
            only: Vec::new(),
            skip: Vec::new(),
            tag: Vec::new(),
            concurrency: 1.0,
        }
    }
}

/// Run options plus the user fields coming from command options
#[derive(Debug, Clone, Default)]
pub struct OptionsContext {
    pub options: RunOptions,
    pub fields: Fields,
}

impl OptionsContext {
    pub fn new(options: RunOptions) -> Self {
        OptionsContext {
            options,
            fields: Fields::new(),
        }
    }

    /// Set a single user field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A complete context snapshot as seen by the scheduler
#[derive(Debug, Clone, Default)]
pub struct InternalContext {
    pub options: RunOptions,
    pub fields: Fields,
    pub secrets: Vec<String>,
}

impl InternalContext {
    /// Create the initial snapshot of a run, with no secrets
    pub fn new(options_context: OptionsContext) -> Self {
        InternalContext {
            options: options_context.options,
            fields: strip_reserved(options_context.fields),
            secrets: Vec::new(),
        }
    }

    pub fn debug(&self) -> bool {
        self.options.debug
    }

    pub fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// The context exposed to user callbacks, without scheduler state
    pub fn user_context(&self) -> UserContext {
        UserContext {
            debug: self.options.debug,
            fields: self.fields.clone(),
            stand_in: false,
        }
    }

    /// A user context reading a placeholder for every missing key
    pub fn stand_in_context(&self) -> UserContext {
        UserContext {
            stand_in: true,
            ..self.user_context()
        }
    }

    /// Mask every registered secret found in `text`
    pub fn hide_secrets(&self, text: &str) -> String {
        hide_secrets(&self.secrets, text)
    }
}

/// Replace every occurrence of each secret with a run of asterisks
pub fn hide_secrets(secrets: &[String], text: &str) -> String {
    let mut safe_text = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        let mask = "*".repeat(secret.chars().count().min(MAX_MASK_LEN));
        safe_text = safe_text.replace(secret.as_str(), &mask);
    }
    safe_text
}

fn strip_reserved(mut fields: Fields) -> Fields {
    fields.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
    fields
}

/// The context handed to user callbacks
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    debug: bool,
    fields: Fields,
    stand_in: bool,
}

impl UserContext {
    pub fn new(debug: bool, fields: Fields) -> Self {
        UserContext {
            debug,
            fields: strip_reserved(fields),
            stand_in: false,
        }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Whether this context stands in for the real one during a dry run
    pub fn is_stand_in(&self) -> bool {
        self.stand_in
    }

    /// Get a value, failing when the key is not defined
    pub fn get(&self, key: &str) -> Result<Value, ContextError> {
        match self.fields.get(key) {
            Some(value) => Ok(value.clone()),
            None if self.stand_in => Ok(Value::String(CONTEXTUAL_PLACEHOLDER.to_string())),
            None => Err(ContextError::Missing(key.to_string())),
        }
    }

    /// Get a scalar value rendered as a string
    pub fn get_str(&self, key: &str) -> Result<String, ContextError> {
        let value = self.get(key)?;
        scalar_to_string(&value).ok_or_else(|| ContextError::Type {
            key: key.to_string(),
            expected: "string",
        })
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ContextError> {
        match self.get(key)? {
            Value::Bool(b) => Ok(b),
            _ => Err(ContextError::Type {
                key: key.to_string(),
                expected: "boolean",
            }),
        }
    }

    /// Look up a defined scalar field, ignoring the stand-in placeholder
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(scalar_to_string)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Holds the current snapshot of one subtree.
///
/// Clones share the same snapshot slot; [`ContextHolder::copy`] creates an
/// independent slot seeded with the current snapshot. Secrets are kept apart
/// from the snapshot and shared by every holder of a run, so a secret stays
/// masked everywhere once registered.
#[derive(Debug, Clone)]
pub struct ContextHolder {
    current: Arc<RwLock<Arc<InternalContext>>>,
    secrets: Arc<RwLock<Vec<String>>>,
}

impl ContextHolder {
    pub fn new(context: InternalContext) -> Self {
        ContextHolder {
            secrets: Arc::new(RwLock::new(context.secrets.clone())),
            current: Arc::new(RwLock::new(Arc::new(context))),
        }
    }

    /// Current snapshot, carrying every secret registered so far
    pub fn get(&self) -> Arc<InternalContext> {
        let snapshot = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        if snapshot.secrets == *secrets {
            return snapshot;
        }
        let mut context = InternalContext::clone(&snapshot);
        context.secrets = secrets.clone();
        Arc::new(context)
    }

    /// Merge user fields into the current snapshot. Reserved keys are dropped.
    pub fn add(&self, fields: Fields) {
        let fields = strip_reserved(fields);
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = InternalContext::clone(&slot);
        next.fields.extend(fields);
        *slot = Arc::new(next);
    }

    /// Register a string to redact from every line rendered for the rest of the run
    pub fn add_secret(&self, secret: impl Into<String>) {
        let secret = secret.into();
        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        if !secrets.contains(&secret) {
            secrets.push(secret);
        }
    }

    /// An independent holder starting from the current snapshot
    pub fn copy(&self) -> ContextHolder {
        ContextHolder {
            current: Arc::new(RwLock::new(self.get())),
            secrets: Arc::clone(&self.secrets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder() -> ContextHolder {
        let options = OptionsContext::new(RunOptions::default()).with_field("name", "world");
        ContextHolder::new(InternalContext::new(options))
    }

    #[test]
    fn test_reserved_fields_are_stripped() {
        let options = OptionsContext::new(RunOptions::default())
            .with_field("dryRun", true)
            .with_field("only", "x")
            .with_field("flag", true);
        let context = InternalContext::new(options);
        assert_eq!(context.fields.len(), 1);
        assert!(context.user_context().contains("flag"));
    }

    #[test]
    fn test_add_merges_fields() {
        let holder = holder();
        let mut added = Fields::new();
        added.insert("bar".to_string(), Value::from("baz"));
        added.insert("secrets".to_string(), Value::from("nope"));
        added.insert("debug".to_string(), Value::from(true));
        holder.add(added);

        let context = holder.get();
        assert_eq!(context.user_context().get_str("bar").unwrap(), "baz");
        assert!(!context.fields.contains_key("secrets"));
        assert!(!context.debug());
    }

    #[test]
    fn test_copy_isolates_fields_and_shares_secrets() {
        let parent = holder();
        let child = parent.copy();

        let mut fields = Fields::new();
        fields.insert("child_only".to_string(), Value::from(1));
        child.add(fields);
        child.add_secret("hunter2");

        let mut fields = Fields::new();
        fields.insert("parent_only".to_string(), Value::from(2));
        parent.add(fields);

        assert!(!parent.get().fields.contains_key("child_only"));
        assert!(!child.get().fields.contains_key("parent_only"));
        assert_eq!(child.get().secrets, vec!["hunter2".to_string()]);
        assert_eq!(parent.get().hide_secrets("pw hunter2"), "pw *******");
    }

    #[test]
    fn test_clones_share_the_snapshot() {
        let holder = holder();
        let shared = holder.clone();
        shared.add_secret("s3cret");
        shared.add_secret("s3cret");
        assert_eq!(holder.get().secrets.len(), 1);
    }

    #[test]
    fn test_copy_keeps_its_fields_but_sees_later_secrets() {
        let holder = holder();
        let frozen = holder.copy();

        let mut fields = Fields::new();
        fields.insert("later".to_string(), Value::from(1));
        holder.add(fields);
        holder.copy().add_secret("hunter2");

        assert!(!frozen.get().fields.contains_key("later"));
        assert_eq!(frozen.get().secrets, vec!["hunter2".to_string()]);
    }

    #[test]
    fn test_hide_secrets() {
        let secrets = vec!["hunter2".to_string(), "x".repeat(30)];
        let text = format!("login hunter2 then {} and hunter2", "x".repeat(30));
        assert_eq!(
            hide_secrets(&secrets, &text),
            format!("login ******* then {} and *******", "*".repeat(20))
        );
    }

    #[test]
    fn test_hide_secrets_ignores_empty_secret() {
        let secrets = vec![String::new()];
        assert_eq!(hide_secrets(&secrets, "abc"), "abc");
    }

    #[test]
    fn test_user_context_accessors() {
        let context = holder().get().user_context();
        assert_eq!(context.get_str("name").unwrap(), "world");
        assert!(matches!(
            context.get("missing"),
            Err(ContextError::Missing(_))
        ));
        assert!(matches!(
            context.get_bool("name"),
            Err(ContextError::Type { .. })
        ));
    }

    #[test]
    fn test_stand_in_context_reads_placeholder() {
        let context = holder().get().stand_in_context();
        assert_eq!(context.get_str("missing").unwrap(), CONTEXTUAL_PLACEHOLDER);
        assert_eq!(context.get_str("name").unwrap(), "world");
        assert_eq!(context.lookup("missing"), None);
        assert!(context.get_bool("missing").is_err());
    }
}
