//! Background processes kept alive while a parent's children run

use crate::error::ExecError;
use crate::runner::context::{Fields, InternalContext, Value};
use crate::runner::exec::{build_process, ExecOptions};
use crate::runner::task::KillFn;
use regex::Regex;
use std::io::{self, Read};
use std::process::{Child, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tracing::debug;

pub const EXITED_BEFORE_MATCH: &str =
    "The background process exited before matching the given regexp";

const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// A spawned background process
#[derive(Debug)]
pub struct BackgroundProcess {
    child: Child,
}

impl BackgroundProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Stop the process with `kill`, or the default kill, and reap it
    pub fn stop(mut self, kill: Option<&KillFn>) -> io::Result<()> {
        debug!(pid = self.child.id(), "stopping background process");
        let killed = match kill {
            Some(kill) => kill(&mut self.child),
            None => self.child.kill(),
        };
        match killed {
            Ok(()) => {}
            // already exited
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(err),
        }
        self.child.wait().map(|_| ())
    }
}

/// A background process whose output matched, with its named capture groups
#[derive(Debug)]
pub struct Started {
    pub process: BackgroundProcess,
    pub groups: Fields,
}

/// Spawn `command` and wait until a chunk of its output matches `pattern`
pub fn start_background_process(
    command: &[String],
    context: &InternalContext,
    options: &ExecOptions,
    pattern: &Regex,
) -> Result<Started, ExecError> {
    let shown = context.hide_secrets(&command.join(" "));
    let mut child = build_process(command, options)?
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            ExecError::new(
                context.hide_secrets(&format!("Command failed to start: {}: {}", shown, err)),
                "",
                "",
            )
        })?;
    debug!(pid = child.id(), command = %shown, "started background process");

    let (sender, receiver) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        forward(stdout, Stream::Stdout, sender.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward(stderr, Stream::Stderr, sender.clone());
    }
    drop(sender);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    for (stream, data) in receiver.iter() {
        let text = String::from_utf8_lossy(&data).into_owned();
        match stream {
            Stream::Stdout => stdout.extend_from_slice(&data),
            Stream::Stderr => stderr.extend_from_slice(&data),
        }

        if let Some(captures) = pattern.captures(&text) {
            let groups = pattern
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.to_string(), Value::String(m.as_str().to_string())))
                })
                .collect();
            return Ok(Started {
                process: BackgroundProcess { child },
                groups,
            });
        }
    }

    // Both streams closed without a match; reap the process.
    let _ = child.wait();
    Err(ExecError::new(
        EXITED_BEFORE_MATCH,
        context.hide_secrets(&String::from_utf8_lossy(&stdout)),
        context.hide_secrets(&String::from_utf8_lossy(&stderr)),
    ))
}

/// Relay chunks of `source` until it closes. Once nobody listens any more the
/// stream is still drained so the process never blocks on a full pipe.
fn forward<R: Read + Send + 'static>(
    mut source: R,
    stream: Stream,
    sender: Sender<(Stream, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buffer = [0u8; CHUNK_SIZE];
        let mut listening = true;
        loop {
            match source.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if listening && sender.send((stream, buffer[..n].to_vec())).is_err() {
                        listening = false;
                    }
                }
            }
        }
    });
}

/// Fields added in place of the capture groups when nothing is spawned
pub fn placeholder_groups(pattern: &Regex) -> Fields {
    pattern
        .capture_names()
        .flatten()
        .map(|name| (name.to_string(), Value::String(name.to_string())))
        .collect()
}
