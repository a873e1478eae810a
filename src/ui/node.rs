//! Runnable node tree handed to an [`Executor`]
//!
//! A node has a title, an optional skip check evaluated right before it
//! runs, a body and an optional rollback invoked when the body (or anything
//! it spawned) fails. A body either finishes, skips itself, or returns a list
//! of child nodes that the executor runs next.

use crate::error::{TaskError, TaskResult};
use crate::ui::render::{Event, EventKind, Renderer};
use std::sync::{Mutex, PoisonError};

pub type SkipCheck<'a> = Box<dyn FnOnce() -> TaskResult<Option<String>> + Send + 'a>;
pub type Body<'a> = Box<dyn FnOnce(&NodeHandle<'_>) -> TaskResult<Outcome<'a>> + Send + 'a>;
pub type Recovery<'a> = Box<dyn FnOnce(&NodeHandle<'_>) -> TaskResult<()> + Send + 'a>;

/// A single runnable node
pub struct Node<'a> {
    pub title: String,
    pub skip: Option<SkipCheck<'a>>,
    pub body: Body<'a>,
    pub rollback: Option<Recovery<'a>>,
}

impl<'a> Node<'a> {
    pub fn new<F>(title: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&NodeHandle<'_>) -> TaskResult<Outcome<'a>> + Send + 'a,
    {
        Node {
            title: title.into(),
            skip: None,
            body: Box::new(body),
            rollback: None,
        }
    }

    /// Evaluate `check` before running; `Some(reason)` skips the node
    pub fn skip_when<F>(mut self, check: F) -> Self
    where
        F: FnOnce() -> TaskResult<Option<String>> + Send + 'a,
    {
        self.skip = Some(Box::new(check));
        self
    }

    /// Run `rollback` if this node fails
    pub fn on_failure<F>(mut self, rollback: F) -> Self
    where
        F: FnOnce(&NodeHandle<'_>) -> TaskResult<()> + Send + 'a,
    {
        self.rollback = Some(Box::new(rollback));
        self
    }
}

/// What a node body produced
pub enum Outcome<'a> {
    Done,
    Skipped(String),
    Children(NodeList<'a>),
}

/// Children of a node and how to run them
pub struct NodeList<'a> {
    pub nodes: Vec<Node<'a>>,
    /// Worker pool width; 0 and 1 both mean one after the other
    pub concurrency: usize,
    /// Stop at the first failure instead of running every node
    pub exit_on_error: bool,
}

impl<'a> NodeList<'a> {
    pub fn new(nodes: Vec<Node<'a>>, concurrency: usize) -> Self {
        NodeList {
            nodes,
            concurrency,
            exit_on_error: true,
        }
    }

    pub fn sequential(nodes: Vec<Node<'a>>) -> Self {
        Self::new(nodes, 0)
    }

    /// Run every node even after a failure, then report the first error
    pub fn keep_going(mut self) -> Self {
        self.exit_on_error = false;
        self
    }
}

/// How the executor should render and schedule the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One node at a time, one line per event
    Serial,
    /// Worker pools as requested by node lists, compact output
    Concurrent,
}

/// Something able to run a node tree
pub trait Executor {
    fn run<'a>(&self, root: Node<'a>, mode: RenderMode) -> TaskResult<()>;
}

/// The view a running node has of itself
pub struct NodeHandle<'r> {
    title: Mutex<String>,
    depth: usize,
    renderer: &'r dyn Renderer,
}

impl<'r> NodeHandle<'r> {
    pub fn new(title: String, depth: usize, renderer: &'r dyn Renderer) -> Self {
        NodeHandle {
            title: Mutex::new(title),
            depth,
            renderer,
        }
    }

    pub fn title(&self) -> String {
        self.title
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn set_title(&self, title: impl Into<String>) {
        *self.title.lock().unwrap_or_else(PoisonError::into_inner) = title.into();
        self.emit(EventKind::Retitled);
    }

    /// Report one line of output for this node
    pub fn output_line(&self, line: &str) -> TaskResult<()> {
        if line.contains('\n') || line.contains('\r') {
            return Err(TaskError::MultilineOutput(line.to_string()));
        }
        self.emit(EventKind::Output(line.to_string()));
        Ok(())
    }

    pub fn emit(&self, kind: EventKind) {
        self.renderer.render(&Event {
            depth: self.depth,
            title: self.title(),
            kind,
        });
    }
}
