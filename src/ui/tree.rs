//! In-house executor for node trees
//!
//! Children of a node run one after the other, or on a bounded rayon pool
//! sized by their [`NodeList`]. A failing node reports its error, runs its
//! rollback best-effort and passes the original error up.

use crate::error::{TaskError, TaskResult};
use crate::ui::node::{Executor, Node, NodeHandle, NodeList, Outcome, RenderMode};
use crate::ui::render::{CompactRenderer, EventKind, Renderer, VerboseRenderer};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs node trees, rendering with a fixed renderer or one picked per mode
#[derive(Default)]
pub struct TreeRunner {
    renderer: Option<Arc<dyn Renderer>>,
}

impl TreeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always render with `renderer`, whatever the mode
    pub fn with_renderer(renderer: Arc<dyn Renderer>) -> Self {
        TreeRunner {
            renderer: Some(renderer),
        }
    }
}

impl Executor for TreeRunner {
    fn run<'a>(&self, root: Node<'a>, mode: RenderMode) -> TaskResult<()> {
        let renderer: Arc<dyn Renderer> = match &self.renderer {
            Some(renderer) => Arc::clone(renderer),
            None => match mode {
                RenderMode::Serial => Arc::new(VerboseRenderer::new()),
                RenderMode::Concurrent => Arc::new(CompactRenderer::new()),
            },
        };
        let walker = Walker {
            renderer: renderer.as_ref(),
            serial: mode == RenderMode::Serial,
        };
        walker.run_node(root, 0)
    }
}

struct Walker<'r> {
    renderer: &'r dyn Renderer,
    serial: bool,
}

impl Walker<'_> {
    fn run_node(&self, node: Node<'_>, depth: usize) -> TaskResult<()> {
        let Node {
            title,
            skip,
            body,
            rollback,
        } = node;
        let handle = NodeHandle::new(title, depth, self.renderer);

        if let Some(skip) = skip {
            match skip() {
                Ok(Some(reason)) => {
                    debug!(title = %handle.title(), %reason, "skipping task");
                    handle.emit(EventKind::Skipped(reason));
                    return Ok(());
                }
                Ok(None) => {}
                Err(err) => {
                    handle.emit(EventKind::Failed(err.to_string()));
                    return Err(err);
                }
            }
        }

        handle.emit(EventKind::Started);
        let result = body(&handle).and_then(|outcome| match outcome {
            Outcome::Done => Ok(None),
            Outcome::Skipped(reason) => Ok(Some(reason)),
            Outcome::Children(children) => {
                self.run_list(children, depth + 1).map(|()| None)
            }
        });

        match result {
            Ok(None) => {
                handle.emit(EventKind::Succeeded);
                Ok(())
            }
            Ok(Some(reason)) => {
                handle.emit(EventKind::Skipped(reason));
                Ok(())
            }
            Err(err) => {
                handle.emit(EventKind::Failed(err.to_string()));
                if let Some(rollback) = rollback {
                    handle.emit(EventKind::RollingBack);
                    match rollback(&handle) {
                        Ok(()) => handle.emit(EventKind::RolledBack),
                        Err(rollback_err) => {
                            warn!(
                                title = %handle.title(),
                                error = %rollback_err,
                                "rollback failed"
                            );
                            handle.emit(EventKind::RollbackFailed(rollback_err.to_string()));
                        }
                    }
                }
                Err(err)
            }
        }
    }

    fn run_list(&self, list: NodeList<'_>, depth: usize) -> TaskResult<()> {
        let NodeList {
            nodes,
            concurrency,
            exit_on_error,
        } = list;
        let width = if self.serial { 1 } else { concurrency.min(nodes.len()) };

        if width <= 1 {
            let mut first_error = None;
            for node in nodes {
                if let Err(err) = self.run_node(node, depth) {
                    if exit_on_error {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                }
            }
            return first_error.map_or(Ok(()), Err);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .build()
            .map_err(|err| TaskError::Pool(err.to_string()))?;

        pool.install(|| {
            if exit_on_error {
                nodes
                    .into_par_iter()
                    .try_for_each(|node| self.run_node(node, depth))
            } else {
                nodes
                    .into_par_iter()
                    .map(|node| self.run_node(node, depth))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .collect()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::render::MemoryRenderer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn recording_runner() -> (Arc<MemoryRenderer>, TreeRunner) {
        let renderer = Arc::new(MemoryRenderer::new());
        let runner = TreeRunner::with_renderer(renderer.clone());
        (renderer, runner)
    }

    fn failing(title: &str) -> Node<'static> {
        Node::new(title, |_| Err(TaskError::Failed(anyhow::anyhow!("boom"))))
    }

    #[test]
    fn test_sequential_children_run_in_order() {
        let (renderer, runner) = recording_runner();
        let root = Node::new("root", |_| {
            Ok(Outcome::Children(NodeList::sequential(vec![
                Node::new("a", |_| Ok(Outcome::Done)),
                Node::new("b", |_| Ok(Outcome::Done)),
            ])))
        });

        runner.run(root, RenderMode::Serial).unwrap();
        assert_eq!(
            renderer.titles_with(&EventKind::Succeeded),
            vec!["a", "b", "root"]
        );
    }

    #[test]
    fn test_skipped_node_body_never_runs() {
        let (renderer, runner) = recording_runner();
        let calls = AtomicUsize::new(0);
        let root = Node::new("a", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Done)
        })
        .skip_when(|| Ok(Some("nope".to_string())));

        runner.run(root, RenderMode::Serial).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(renderer.skip_reason("a").as_deref(), Some("nope"));
    }

    #[test]
    fn test_sequential_stops_at_first_failure() {
        let (renderer, runner) = recording_runner();
        let root = Node::new("root", |_| {
            Ok(Outcome::Children(NodeList::sequential(vec![
                failing("a"),
                Node::new("b", |_| Ok(Outcome::Done)),
            ])))
        });

        assert!(runner.run(root, RenderMode::Serial).is_err());
        assert!(renderer.titles_with(&EventKind::Started).iter().all(|t| t != "b"));
    }

    #[test]
    fn test_keep_going_runs_everything() {
        let (renderer, runner) = recording_runner();
        let root = Node::new("root", |_| {
            Ok(Outcome::Children(
                NodeList::sequential(vec![failing("a"), Node::new("b", |_| Ok(Outcome::Done))])
                    .keep_going(),
            ))
        });

        assert!(runner.run(root, RenderMode::Serial).is_err());
        assert_eq!(renderer.titles_with(&EventKind::Succeeded), vec!["b"]);
    }

    #[test]
    fn test_rollback_runs_on_failure_only() {
        let (renderer, runner) = recording_runner();
        let ok = Node::new("ok", |_| Ok(Outcome::Done)).on_failure(|h| h.output_line("rb"));
        runner.run(ok, RenderMode::Serial).unwrap();
        assert!(renderer.all_outputs().is_empty());

        let (renderer, runner) = recording_runner();
        let root = Node::new("root", |_| {
            Ok(Outcome::Children(NodeList::sequential(vec![failing("child")])))
        })
        .on_failure(|h| h.output_line("rb"));

        let err = runner.run(root, RenderMode::Serial).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(renderer.outputs("root"), vec!["rb".to_string()]);
        assert_eq!(renderer.titles_with(&EventKind::RolledBack), vec!["root"]);
    }

    #[test]
    fn test_rollback_failure_keeps_original_error() {
        let (renderer, runner) = recording_runner();
        let root = failing("root")
            .on_failure(|_| Err(TaskError::Failed(anyhow::anyhow!("rb failed"))));

        let err = runner.run(root, RenderMode::Serial).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(
            renderer.titles_with(&EventKind::RollbackFailed("rb failed".to_string())),
            vec!["root"]
        );
    }

    #[test]
    fn test_concurrent_children_overlap() {
        let (_, runner) = recording_runner();
        let sleeper = |title: &'static str| {
            Node::new(title, |_| {
                std::thread::sleep(Duration::from_millis(400));
                Ok(Outcome::Done)
            })
        };
        let root = Node::new("root", move |_| {
            Ok(Outcome::Children(NodeList::new(
                vec![sleeper("a"), sleeper("b"), sleeper("c")],
                3,
            )))
        });

        let start = Instant::now();
        runner.run(root, RenderMode::Concurrent).unwrap();
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn test_serial_mode_ignores_pool_width() {
        let (renderer, runner) = recording_runner();
        let root = Node::new("root", |_| {
            Ok(Outcome::Children(NodeList::new(
                vec![
                    Node::new("a", |_| Ok(Outcome::Done)),
                    Node::new("b", |_| Ok(Outcome::Done)),
                    Node::new("c", |_| Ok(Outcome::Done)),
                ],
                3,
            )))
        });

        runner.run(root, RenderMode::Serial).unwrap();
        assert_eq!(
            renderer.titles_with(&EventKind::Started),
            vec!["root", "a", "b", "c"]
        );
    }
}
