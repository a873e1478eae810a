//! Title slugs
//!
//! Titles are free text; slugs give every task a name that can be typed on a
//! command line without quoting.

use crate::error::{ConfigError, ConfigResult};
use crate::runner::flat::FlatTasks;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

static SHELL_HOSTILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["'`$\\!&|;<>(){}\[\]*?#~^,:=]"#).expect("punctuation pattern is valid")
});

/// Lower-case `title`, join its words with `-` and drop quotes and
/// punctuation a shell would interpret
pub fn slugify(title: &str) -> String {
    let lower = title.trim().to_lowercase();
    let cleaned = SHELL_HOSTILE.replace_all(&lower, "");
    WHITESPACE.replace_all(cleaned.trim(), "-").into_owned()
}

/// Fail when two titles of the tree share a slug
pub fn check_slugs(flat: &FlatTasks) -> ConfigResult<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for title in flat.titles() {
        let slug = slugify(title);
        if let Some(other) = seen.insert(slug.clone(), title) {
            return Err(ConfigError::DuplicateSlug(format!(
                "'{}' and '{}' both become '{}'",
                other, title, slug
            )));
        }
    }
    Ok(())
}

/// The title `value` designates, given as a title or as a slug
pub fn resolve_title(value: &str, flat: &FlatTasks) -> Option<String> {
    if flat.contains(value) {
        return Some(value.to_string());
    }
    flat.titles()
        .find(|title| slugify(title) == value)
        .map(str::to_string)
}
