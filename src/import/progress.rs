use std::collections::BTreeMap;

use axum::response::sse::Event;
use tokio::sync::mpsc;

use crate::model::ChapterState;

/// One event on the progress stream of an import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Full status table, keyed by chapter number.
    Status(BTreeMap<u32, ChapterState>),
    /// Fatal failure. Terminates the stream.
    Error(String),
    /// Completion marker with a summary. Terminates the stream.
    Complete(String),
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::Complete(_) => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Status(_))
    }

    pub fn data(&self) -> String {
        match self {
            Self::Status(statuses) => {
                serde_json::to_string(statuses).unwrap_or_else(|err| {
                    tracing::warn!(?err, "serialize status table");
                    "{}".to_owned()
                })
            }
            Self::Error(message) | Self::Complete(message) => message.clone(),
        }
    }

    pub fn to_sse_event(&self) -> Event {
        Event::default().event(self.name()).data(self.data())
    }

    /// Encodes the event the way it appears on a `text/event-stream` body.
    pub fn to_wire(&self) -> String {
        let mut out = format!("event: {}\n", self.name());
        let data = self.data();
        for line in data.split('\n') {
            out.push_str("data: ");
            out.push_str(line.trim_end_matches('\r'));
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Sending half of a run's progress stream.
///
/// Writes are best effort: once the receiver is gone every later event is
/// dropped and the loss is logged once.
#[derive(Debug)]
pub struct ProgressEmitter {
    tx: mpsc::Sender<ProgressEvent>,
    connected: bool,
}

impl ProgressEmitter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                connected: true,
            },
            rx,
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.tx.is_closed()
    }

    pub async fn emit(&mut self, event: ProgressEvent) -> bool {
        if !self.connected {
            return false;
        }
        let name = event.name();
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(event = name, "progress receiver gone; dropping events");
                self.connected = false;
                false
            }
        }
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
    }
}
