//! Event definitions for the manager's event loop.
//!
//! Every background task (stream readers, the AI backend, OS inspection,
//! timers) reports back by sending an `Event`; the loop applies them in
//! arrival order.

use std::path::PathBuf;

use crossterm::event::KeyEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::ai::AiEvent;
use crate::output::StreamKind;
use crate::project::ProjectStatus;
use crate::reconcile::Observation;

#[derive(Debug, Clone)]
pub enum Event {
    /// Text written by a project's dev server.
    Output {
        project: PathBuf,
        text: String,
        stream: StreamKind,
    },
    /// Text written by the persistent shell or a one-off command.
    TerminalOutput { project: PathBuf, text: String },
    /// The lifecycle status of a project changed.
    StatusChanged {
        project: PathBuf,
        status: ProjectStatus,
    },
    /// A listening port was seen in output or found by reconciliation.
    PortDetected { project: PathBuf, port: u16 },
    /// A supervised child exited on its own.
    ProcessExited {
        project: PathBuf,
        code: Option<i32>,
    },
    /// Result of an OS process scan, ready to be reconciled.
    Observed(Observation),
    /// An OS process scan failed; state is left as it was.
    ScanFailed,
    /// A streamed AI response event for the given query.
    Ai { query: u64, event: AiEvent },
    /// A command captured from an AI response is due to run.
    ExecuteDue { query: u64 },
    /// Ask the loop to run a reconciliation pass.
    RecheckStatuses,
    /// A keyboard event from the TUI.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// Bytes read from our own stdin in headless mode.
    Stdin(Vec<u8>),
    /// Ctrl-C / SIGTERM received by the manager itself.
    Shutdown,
}

/// Sending half of the event channel.
///
/// The loop itself must never wait on its own channel, so `emit` does not
/// block: when the channel is full the event is handed to a task. Reader
/// tasks use `send` instead, which applies backpressure to the child pipe.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub async fn send(&self, event: Event) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn output(&self, project: &std::path::Path, text: impl Into<String>) {
        self.emit(Event::Output {
            project: project.to_path_buf(),
            text: text.into(),
            stream: StreamKind::Stdout,
        });
    }

    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }
}

/// Creates the bounded event channel.
pub fn channel(capacity: usize) -> (EventSink, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSink::new(tx), rx)
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
