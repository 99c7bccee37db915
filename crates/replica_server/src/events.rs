//! Session events and their delivery.
//!
//! The pipeline writes into an unbounded queue through an [`EventSink`]; an
//! HTTP stream drains it. The sink guarantees exactly one terminal event
//! (`done` or `error`) followed by the `end` sentinel, even when the pipeline
//! task panics or is aborted: whichever happens first, an explicit finish or
//! the last clone of the sink being dropped, wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::RwLock;
use replica_llm::UsageSummary;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Where a session's pipeline is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Scraping,
    Generating,
    Deploying,
    Fixing,
    Done,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Scraping => "scraping",
            Phase::Generating => "generating",
            Phase::Deploying => "deploying",
            Phase::Fixing => "fixing",
            Phase::Done => "done",
            Phase::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One event on a session stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Session {
        id: String,
        url: String,
    },
    Status {
        phase: Phase,
        message: String,
    },
    Screenshot {
        data: String,
        offset: u32,
        total: usize,
    },
    Plan {
        assignments: Vec<Vec<String>>,
    },
    WorkerStarted {
        worker: usize,
        role: String,
        snapshots: usize,
        planned: Vec<String>,
    },
    WorkerFinished {
        worker: usize,
        files: Vec<String>,
        error: Option<String>,
    },
    FileWrite {
        path: String,
        lines: usize,
        worker: usize,
    },
    FileUpload {
        path: String,
    },
    Repair {
        round: u32,
        path: String,
        error: String,
        fixed: bool,
    },
    Usage {
        #[serde(flatten)]
        summary: UsageSummary,
    },
    Done {
        id: String,
        preview_url: String,
        files: Vec<GeneratedFile>,
    },
    Error {
        message: String,
    },
    End,
}

/// A file of the finished clone, for the client's code view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub lines: usize,
    pub content: String,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            lines: content.lines().count(),
            content,
        }
    }
}

impl SessionEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Session { .. } => "session",
            SessionEvent::Status { .. } => "status",
            SessionEvent::Screenshot { .. } => "screenshot",
            SessionEvent::Plan { .. } => "plan",
            SessionEvent::WorkerStarted { .. } => "worker_started",
            SessionEvent::WorkerFinished { .. } => "worker_finished",
            SessionEvent::FileWrite { .. } => "file_write",
            SessionEvent::FileUpload { .. } => "file_upload",
            SessionEvent::Repair { .. } => "repair",
            SessionEvent::Usage { .. } => "usage",
            SessionEvent::Done { .. } => "done",
            SessionEvent::Error { .. } => "error",
            SessionEvent::End => "end",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Done { .. } | SessionEvent::Error { .. })
    }
}

/// Receiving end shared by successive stream readers.
pub type SharedReceiver = Arc<Mutex<UnboundedReceiver<SessionEvent>>>;

struct SinkInner {
    id: String,
    tx: UnboundedSender<SessionEvent>,
    phase: Arc<RwLock<Phase>>,
    finished: AtomicBool,
}

impl SinkInner {
    fn finish(&self, terminal: SessionEvent) -> bool {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session = %self.id, "Ignoring second terminal event");
            return false;
        }
        *self.phase.write() = match terminal {
            SessionEvent::Done { .. } => Phase::Done,
            _ => Phase::Error,
        };
        let _ = self.tx.send(terminal);
        let _ = self.tx.send(SessionEvent::End);
        true
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            warn!(session = %self.id, "Pipeline ended without a terminal event");
            self.finish(SessionEvent::Error {
                message: "The clone was interrupted".to_string(),
            });
        }
    }
}

/// Writing end of a session's event queue.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

impl EventSink {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Queue a non-terminal event. Terminal events go through
    /// [`done`](Self::done) and [`fail`](Self::fail).
    pub fn send(&self, event: SessionEvent) {
        if event.is_terminal() || matches!(event, SessionEvent::End) {
            warn!(session = %self.inner.id, "Terminal events must use done() or fail()");
            return;
        }
        if self.inner.finished.load(Ordering::Acquire) {
            return;
        }
        // The receiver outlives every reader, so a send only fails after eviction
        let _ = self.inner.tx.send(event);
    }

    /// Move to `phase` and tell the client.
    pub fn status(&self, phase: Phase, message: impl Into<String>) {
        *self.inner.phase.write() = phase;
        self.send(SessionEvent::Status {
            phase,
            message: message.into(),
        });
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.read()
    }

    /// Finish successfully. Returns false if the session already finished.
    pub fn done(&self, preview_url: impl Into<String>, files: Vec<GeneratedFile>) -> bool {
        self.inner.finish(SessionEvent::Done {
            id: self.inner.id.clone(),
            preview_url: preview_url.into(),
            files,
        })
    }

    /// Finish with an error. Returns false if the session already finished.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.inner.finish(SessionEvent::Error {
            message: message.into(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }
}

/// Create the queue of a new session. The phase cell is shared with the
/// registry entry.
pub fn channel(id: impl Into<String>, phase: Arc<RwLock<Phase>>) -> (EventSink, SharedReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = EventSink {
        inner: Arc::new(SinkInner {
            id: id.into(),
            tx,
            phase,
            finished: AtomicBool::new(false),
        }),
    };
    (sink, Arc::new(Mutex::new(rx)))
}

/// Drain `receiver` for one client.
///
/// Waits for any previous reader to let go of the queue, then yields events
/// until `end` (inclusive), the queue closing, or `idle_timeout` passing
/// without an event.
pub fn event_stream(receiver: SharedReceiver, idle_timeout: Duration) -> impl Stream<Item = SessionEvent> {
    futures::stream::unfold(
        (receiver, None, false),
        move |(receiver, guard, finished)| async move {
            if finished {
                return None;
            }
            let mut guard = match guard {
                Some(guard) => guard,
                None => receiver.clone().lock_owned().await,
            };
            match tokio::time::timeout(idle_timeout, guard.recv()).await {
                Ok(Some(event)) => {
                    let end = matches!(event, SessionEvent::End);
                    Some((event, (receiver, Some(guard), end)))
                }
                Ok(None) => None,
                Err(_) => {
                    debug!("Event stream idle for {:?}, closing", idle_timeout);
                    None
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn new_channel() -> (EventSink, SharedReceiver, Arc<RwLock<Phase>>) {
        let phase = Arc::new(RwLock::new(Phase::Scraping));
        let (sink, rx) = channel("s1", phase.clone());
        (sink, rx, phase)
    }

    #[tokio::test]
    async fn test_terminal_then_end_exactly_once() {
        let (sink, rx, phase) = new_channel();
        sink.status(Phase::Generating, "working");
        assert!(sink.done("/api/sandbox/s1/", vec![GeneratedFile::new("app/page.tsx", "a\nb\n")]));
        assert!(!sink.fail("too late"));
        sink.send(SessionEvent::FileUpload { path: "x".into() });
        drop(sink);

        let events: Vec<SessionEvent> = event_stream(rx, Duration::from_secs(1)).collect().await;
        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["status", "done", "end"]);
        assert_eq!(*phase.read(), Phase::Done);
    }

    #[tokio::test]
    async fn test_dropping_sink_emits_error_and_end() {
        let (sink, rx, phase) = new_channel();
        let task = tokio::spawn(async move {
            let _sink = sink;
            panic!("boom");
        });
        assert!(task.await.is_err());

        let events: Vec<SessionEvent> = event_stream(rx, Duration::from_secs(1)).collect().await;
        assert!(matches!(events[0], SessionEvent::Error { .. }));
        assert_eq!(events[1], SessionEvent::End);
        assert_eq!(events.len(), 2);
        assert_eq!(*phase.read(), Phase::Error);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_stream() {
        let (sink, rx, _) = new_channel();
        sink.send(SessionEvent::Plan { assignments: vec![] });
        let events: Vec<SessionEvent> = event_stream(rx, Duration::from_millis(20)).collect().await;
        assert_eq!(events.len(), 1);
        assert!(!sink.is_finished());
    }

    #[tokio::test]
    async fn test_reconnect_resumes_where_reader_left() {
        let (sink, rx, _) = new_channel();
        for i in 0..3 {
            sink.send(SessionEvent::FileUpload { path: format!("f{}", i) });
        }

        let mut first = Box::pin(event_stream(rx.clone(), Duration::from_secs(1)));
        assert_eq!(first.next().await, Some(SessionEvent::FileUpload { path: "f0".into() }));
        drop(first);

        sink.fail("stopped");
        let rest: Vec<SessionEvent> = event_stream(rx, Duration::from_secs(1)).collect().await;
        assert_eq!(rest.len(), 4);
        assert_eq!(rest[0], SessionEvent::FileUpload { path: "f1".into() });
        assert_eq!(rest[3], SessionEvent::End);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(SessionEvent::Status {
            phase: Phase::Deploying,
            message: "Creating sandbox".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["phase"], "deploying");

        let usage = serde_json::to_value(SessionEvent::Usage {
            summary: UsageSummary {
                calls: 2,
                input_tokens: 10,
                output_tokens: 5,
                cost_usd: 0.1,
            },
        })
        .unwrap();
        assert_eq!(usage["type"], "usage");
        assert_eq!(usage["calls"], 2);
    }
}
