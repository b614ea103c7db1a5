use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{io::AsyncWriteExt, sync::mpsc, task::JoinHandle};
use tracing::debug;

/// Where a client shows what arrives from the relay.
pub trait DisplaySink: Send + Sync {
    fn append_line(&self, line: &str);

    fn report_error(&self, line: &str) {
        self.append_line(&format!("!!! {line}"));
    }
}

impl<T: DisplaySink + ?Sized> DisplaySink for Arc<T> {
    fn append_line(&self, line: &str) {
        (**self).append_line(line)
    }

    fn report_error(&self, line: &str) {
        (**self).report_error(line)
    }
}

#[derive(Debug)]
enum TerminalLine {
    Chat(String),
    Error(String),
}

/// Chat lines to stdout, errors to stderr.
///
/// Lines are queued to a printer task that owns the async terminal handles,
/// so displaying never blocks a runtime worker. The printer finishes once
/// every clone of the sink is dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct TerminalSink {
    lines: mpsc::UnboundedSender<TerminalLine>,
}

impl TerminalSink {
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (lines, queue) = mpsc::unbounded_channel();
        (Self { lines }, tokio::spawn(print_lines(queue)))
    }

    fn queue(&self, line: TerminalLine) {
        if self.lines.send(line).is_err() {
            debug!("terminal printer already stopped");
        }
    }
}

impl DisplaySink for TerminalSink {
    fn append_line(&self, line: &str) {
        self.queue(TerminalLine::Chat(line.to_owned()));
    }

    fn report_error(&self, line: &str) {
        self.queue(TerminalLine::Error(format!("!!! {line}")));
    }
}

async fn print_lines(mut queue: mpsc::UnboundedReceiver<TerminalLine>) {
    while let Some(line) = queue.recv().await {
        let written = match line {
            TerminalLine::Chat(line) => write_stdout(&line).await,
            TerminalLine::Error(line) => write_stderr(&line).await,
        };
        if let Err(error) = written {
            // Nothing sensible to do if the terminal is gone.
            debug!(?error, "terminal write failed");
            break;
        }
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

/// Keeps every line in memory; clones share the same transcript.
#[derive(Debug, Default, Clone)]
pub struct TranscriptSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl TranscriptSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DisplaySink for TranscriptSink {
    fn append_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_owned());
    }
}
