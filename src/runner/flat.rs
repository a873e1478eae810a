//! Pre-order index of a task tree

use crate::error::{ConfigError, ConfigResult};
use crate::runner::task::Task;
use std::collections::{BTreeSet, HashMap};

/// What the index knows about one title
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatTask {
    pub parent: Option<String>,
    pub tags: Vec<String>,
    /// Child titles in declaration order, `None` for leaves
    pub children: Option<Vec<String>>,
}

/// Every title of a tree, in pre-order
#[derive(Debug, Clone, Default)]
pub struct FlatTasks {
    order: Vec<String>,
    tasks: HashMap<String, FlatTask>,
}

impl FlatTasks {
    pub fn get(&self, title: &str) -> Option<&FlatTask> {
        self.tasks.get(title)
    }

    pub fn contains(&self, title: &str) -> bool {
        self.tasks.contains_key(title)
    }

    /// Titles in pre-order
    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Leaf titles in execution order
    pub fn leaves(&self) -> Vec<&str> {
        self.titles()
            .filter(|title| self.is_leaf(title))
            .collect()
    }

    pub fn is_leaf(&self, title: &str) -> bool {
        self.get(title).is_some_and(|task| task.children.is_none())
    }

    /// Parent chain of `title`, closest first
    pub fn ancestors(&self, title: &str) -> Vec<&str> {
        let mut ancestors = Vec::new();
        let mut current = self.get(title).and_then(|task| task.parent.as_deref());
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.get(parent).and_then(|task| task.parent.as_deref());
        }
        ancestors
    }

    /// Every tag declared anywhere in the tree
    pub fn tags(&self) -> BTreeSet<&str> {
        self.tasks
            .values()
            .flat_map(|task| task.tags.iter().map(String::as_str))
            .collect()
    }

    /// Position of the last title of the subtree rooted at `title`
    pub fn subtree_end(&self, title: &str) -> Option<usize> {
        let start = self.order.iter().position(|t| t == title)?;
        let mut end = start;
        for (index, candidate) in self.order.iter().enumerate().skip(start + 1) {
            if self.ancestors(candidate).contains(&title) {
                end = index;
            } else {
                break;
            }
        }
        Some(end)
    }

    pub fn position(&self, title: &str) -> Option<usize> {
        self.order.iter().position(|t| t == title)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Index `root` in pre-order, failing on the first repeated title
pub fn build_flat_tasks(root: &Task) -> ConfigResult<FlatTasks> {
    let mut flat = FlatTasks::default();
    visit(root, None, &mut flat)?;
    Ok(flat)
}

fn visit(task: &Task, parent: Option<&str>, flat: &mut FlatTasks) -> ConfigResult<()> {
    let title = task.title();
    if flat.contains(title) {
        return Err(ConfigError::DuplicateTitle(title.to_string()));
    }

    let children = task
        .is_parent()
        .then(|| task.children().iter().map(|c| c.title().to_string()).collect());
    flat.order.push(title.to_string());
    flat.tasks.insert(
        title.to_string(),
        FlatTask {
            parent: parent.map(str::to_string),
            tags: task.tags().to_vec(),
            children,
        },
    );

    for child in task.children() {
        visit(child, Some(title), flat)?;
    }
    Ok(())
}
