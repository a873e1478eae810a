//! Static skip resolution
//!
//! Decides from the command line filters alone which titles must not run.
//! The table is computed once, before the first task starts, and never
//! changes during a run.

use crate::runner::context::RunOptions;
use crate::runner::flat::FlatTasks;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// The option a title was skipped by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    From,
    Until,
    Only,
    Skip,
    Tag,
    DryRun,
}

impl SkipReason {
    pub fn option_name(self) -> &'static str {
        match self {
            SkipReason::From => "from",
            SkipReason::Until => "until",
            SkipReason::Only => "only",
            SkipReason::Skip => "skip",
            SkipReason::Tag => "tag",
            SkipReason::DryRun => "dryRun",
        }
    }

    /// Message displayed for a node skipped for this reason
    pub fn message(self) -> String {
        format!("Skipped by --{} option", self.option_name())
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.option_name())
    }
}

/// Title to the option that skips it
pub type StaticSkips = HashMap<String, SkipReason>;

/// Compute which titles of the tree rooted at `root` the filters skip
pub fn build_statically_skipped_tasks(
    options: &RunOptions,
    flat: &FlatTasks,
    root: &str,
) -> StaticSkips {
    let mut skipped = StaticSkips::new();
    let leaves = flat.leaves();

    if let Some(until) = options.until.as_deref() {
        if let Some(end) = flat.subtree_end(until) {
            for leaf in &leaves {
                if flat.position(leaf).is_some_and(|position| position > end) {
                    skipped.insert(leaf.to_string(), SkipReason::Until);
                }
            }
        }
    }

    if let Some(from) = options.from.as_deref() {
        if let Some(start) = flat.position(from) {
            let ancestors: HashSet<&str> = flat.ancestors(from).into_iter().collect();
            for leaf in &leaves {
                let before = flat.position(leaf).is_some_and(|position| position < start);
                if before && !ancestors.contains(leaf) {
                    skipped.entry(leaf.to_string()).or_insert(SkipReason::From);
                }
            }
        }
    }

    mark(options, flat, root, false, &mut skipped);
    skipped
}

fn mark(
    options: &RunOptions,
    flat: &FlatTasks,
    title: &str,
    ancestor_matched_only: bool,
    skipped: &mut StaticSkips,
) {
    let Some(task) = flat.get(title) else {
        return;
    };
    let matched_only = ancestor_matched_only || options.only.iter().any(|t| t == title);

    if skipped.contains_key(title) {
        return;
    }

    if options.skip.iter().any(|t| t == title) {
        skipped.insert(title.to_string(), SkipReason::Skip);
    } else if let Some(children) = &task.children {
        for child in children {
            mark(options, flat, child, matched_only, skipped);
        }
    } else if !options.only.is_empty() && !matched_only {
        skipped.insert(title.to_string(), SkipReason::Only);
    } else if !options.tag.is_empty() && !options.tag.iter().any(|tag| task.tags.contains(tag)) {
        skipped.insert(title.to_string(), SkipReason::Tag);
    }
}
