//! Variable interpolation for strings
//!
//! Replaces `${var}` placeholders with context fields, falling back to
//! environment variables.

use crate::error::{InterpolationError, InterpolationResult};
use crate::runner::context::{UserContext, CONTEXTUAL_PLACEHOLDER};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::env;
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("variable pattern is valid"));

/// Whether `s` contains at least one `${...}` placeholder
pub fn has_variables(s: &str) -> bool {
    VARIABLE.is_match(s)
}

/// Resolve one variable: context field first, then environment. A stand-in
/// context resolves anything else to the contextual placeholder.
pub fn lookup(name: &str, ctx: &UserContext) -> Option<String> {
    ctx.lookup(name)
        .or_else(|| env::var(name).ok())
        .or_else(|| ctx.is_stand_in().then(|| CONTEXTUAL_PLACEHOLDER.to_string()))
}

/// Interpolate variables in a string, failing on undefined ones
pub fn interpolate(s: &str, ctx: &UserContext) -> InterpolationResult<String> {
    let mut error = None;
    let result = VARIABLE.replace_all(s, |caps: &Captures| {
        let name = caps[1].trim();
        if name.is_empty() {
            error.get_or_insert(InterpolationError::InvalidSyntax(caps[0].to_string()));
            return String::new();
        }
        lookup(name, ctx).unwrap_or_else(|| {
            error.get_or_insert(InterpolationError::UndefinedVariable(name.to_string()));
            String::new()
        })
    });

    match error {
        Some(err) => Err(err),
        None => Ok(result.into_owned()),
    }
}

/// Interpolate variables, leaving undefined placeholders untouched
pub fn interpolate_lenient(s: &str, ctx: &UserContext) -> String {
    VARIABLE
        .replace_all(s, |caps: &Captures| {
            lookup(caps[1].trim(), ctx).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Interpolate every value of a map
pub fn interpolate_map(
    map: &BTreeMap<String, String>,
    ctx: &UserContext,
) -> InterpolationResult<BTreeMap<String, String>> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), interpolate(value, ctx)?)))
        .collect()
}

/// Interpolate a list of strings
pub fn interpolate_list(list: &[String], ctx: &UserContext) -> InterpolationResult<Vec<String>> {
    list.iter().map(|s| interpolate(s, ctx)).collect()
}
