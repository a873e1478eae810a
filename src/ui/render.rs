//! Renderers for node events

use colored::Colorize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Something that happened to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Retitled,
    Output(String),
    Skipped(String),
    Succeeded,
    Failed(String),
    RollingBack,
    RolledBack,
    RollbackFailed(String),
}

/// A node event; `title` is the node's title at the time of the event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub depth: usize,
    pub title: String,
    pub kind: EventKind,
}

/// Receives node events, possibly from several worker threads at once
pub trait Renderer: Send + Sync {
    fn render(&self, event: &Event);
}

/// One line per event, used in serial mode
#[derive(Debug, Default)]
pub struct VerboseRenderer;

impl VerboseRenderer {
    pub fn new() -> Self {
        VerboseRenderer
    }

    pub fn format(event: &Event) -> String {
        let title = &event.title;
        match &event.kind {
            EventKind::Started => format!("{} {}", "[STARTED]".cyan(), title),
            EventKind::Retitled => format!("{} {}", "[TITLE]".cyan(), title),
            EventKind::Output(line) => format!("{} {}", "[OUTPUT]".dimmed(), line),
            EventKind::Skipped(reason) => {
                format!("{} {}: {}", "[SKIPPED]".yellow(), title, reason)
            }
            EventKind::Succeeded => format!("{} {}", "[SUCCESS]".green(), title),
            EventKind::Failed(error) => format!("{} {}: {}", "[FAILED]".red(), title, error),
            EventKind::RollingBack => format!("{} {}", "[ROLLBACK]".magenta(), title),
            EventKind::RolledBack => format!("{} {}", "[ROLLED BACK]".magenta(), title),
            EventKind::RollbackFailed(error) => {
                format!("{} {}: {}", "[ROLLBACK FAILED]".red(), title, error)
            }
        }
    }
}

impl Renderer for VerboseRenderer {
    fn render(&self, event: &Event) {
        println!("{}", Self::format(event));
    }
}

/// One line per finished node, used in concurrent mode.
///
/// Output lines are held back and the last one is printed under the node's
/// status line.
#[derive(Debug, Default)]
pub struct CompactRenderer {
    last_output: Mutex<HashMap<String, String>>,
}

impl CompactRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_output(&self, title: &str) -> Option<String> {
        self.last_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(title)
    }

    /// Lines to print for an event, if any
    pub fn format(&self, event: &Event) -> Vec<String> {
        let indent = "  ".repeat(event.depth);
        let title = &event.title;
        let mut lines = Vec::new();

        match &event.kind {
            EventKind::Output(line) => {
                self.last_output
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(title.clone(), line.clone());
            }
            EventKind::Retitled | EventKind::Started | EventKind::RollingBack => {}
            EventKind::Skipped(reason) => {
                self.take_output(title);
                lines.push(format!(
                    "{indent}{} {} {}",
                    "↓".yellow(),
                    title,
                    format!("[{reason}]").dimmed()
                ));
            }
            EventKind::Succeeded => {
                lines.push(format!("{indent}{} {}", "✔".green(), title));
                if let Some(output) = self.take_output(title) {
                    lines.push(format!("{indent}  {} {}", "→".dimmed(), output));
                }
            }
            EventKind::Failed(error) => {
                self.take_output(title);
                lines.push(format!("{indent}{} {}", "✖".red(), title));
                if let Some(first) = error.lines().next() {
                    lines.push(format!("{indent}  {} {}", "→".red(), first));
                }
            }
            EventKind::RolledBack => {
                lines.push(format!(
                    "{indent}{} {} {}",
                    "↺".magenta(),
                    title,
                    "[rolled back]".dimmed()
                ));
            }
            EventKind::RollbackFailed(error) => {
                lines.push(format!(
                    "{indent}{} {} {}",
                    "↺".red(),
                    title,
                    format!("[rollback failed: {error}]").dimmed()
                ));
            }
        }

        lines
    }
}

impl Renderer for CompactRenderer {
    fn render(&self, event: &Event) {
        for line in self.format(event) {
            println!("{line}");
        }
    }
}

/// Records every event in memory
#[derive(Debug, Default)]
pub struct MemoryRenderer {
    events: Mutex<Vec<Event>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Output lines reported by nodes whose title starts with `title`
    pub fn outputs(&self, title: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.title.starts_with(title))
            .filter_map(|event| match event.kind {
                EventKind::Output(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Every output line of the run
    pub fn all_outputs(&self) -> Vec<String> {
        self.outputs("")
    }

    /// Skip reason of the node whose title starts with `title`
    pub fn skip_reason(&self, title: &str) -> Option<String> {
        self.events()
            .into_iter()
            .filter(|event| event.title.starts_with(title))
            .find_map(|event| match event.kind {
                EventKind::Skipped(reason) => Some(reason),
                _ => None,
            })
    }

    /// Titles of nodes that received an event equal to `kind`, in order
    pub fn titles_with(&self, kind: &EventKind) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| &event.kind == kind)
            .map(|event| event.title)
            .collect()
    }
}

impl Renderer for MemoryRenderer {
    fn render(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> Event {
        Event {
            depth: 1,
            title: "Echo start".to_string(),
            kind,
        }
    }

    #[test]
    fn test_verbose_format() {
        colored::control::set_override(false);
        assert_eq!(
            VerboseRenderer::format(&event(EventKind::Started)),
            "[STARTED] Echo start"
        );
        assert_eq!(
            VerboseRenderer::format(&event(EventKind::Skipped(
                "Skipped by --skip option".to_string()
            ))),
            "[SKIPPED] Echo start: Skipped by --skip option"
        );
    }

    #[test]
    fn test_compact_prints_last_output_on_success() {
        colored::control::set_override(false);
        let renderer = CompactRenderer::new();
        assert!(renderer.format(&event(EventKind::Started)).is_empty());
        assert!(renderer
            .format(&event(EventKind::Output("echo start".to_string())))
            .is_empty());
        assert!(renderer
            .format(&event(EventKind::Output("start".to_string())))
            .is_empty());

        let lines = renderer.format(&event(EventKind::Succeeded));
        assert_eq!(lines, vec!["  ✔ Echo start", "    → start"]);
    }

    #[test]
    fn test_memory_renderer_queries() {
        let renderer = MemoryRenderer::new();
        renderer.render(&event(EventKind::Output("x".to_string())));
        renderer.render(&event(EventKind::Skipped("nope".to_string())));

        assert_eq!(renderer.outputs("Echo"), vec!["x".to_string()]);
        assert_eq!(renderer.skip_reason("Echo start").as_deref(), Some("nope"));
        assert_eq!(
            renderer.titles_with(&EventKind::Skipped("nope".to_string())),
            vec!["Echo start".to_string()]
        );
    }
}
