//! Progress events for presentation layers

use serde::Serialize;
use tokio::sync::mpsc;

use crate::orchestrator::{RunId, Stage};
use crate::result::TaskStatus;
use crate::task::{AgentId, TaskId};

/// Something that happened during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        session_id: String,
        query: String,
    },
    StageEntered {
        run_id: RunId,
        stage: Stage,
    },
    TasksDecomposed {
        run_id: RunId,
        task_count: usize,
        fallback: bool,
    },
    GroupStarted {
        run_id: RunId,
        group: usize,
        task_ids: Vec<TaskId>,
    },
    TaskStarted {
        run_id: RunId,
        task_id: TaskId,
        agent: AgentId,
    },
    TaskFinished {
        run_id: RunId,
        task_id: TaskId,
        status: TaskStatus,
    },
    RunFinished {
        run_id: RunId,
        success: bool,
    },
}

/// Sending half; a disabled or closed sink drops events silently
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Receiving half handed to the host
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<RunEvent>,
}

impl EventStream {
    /// Wait for the next event; `None` once every sink is dropped
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Next event if one is queued
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create a connected sink/stream pair
pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx: Some(tx) }, EventStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_creation() {
        let (sink, mut stream) = event_channel();
        assert!(sink.is_enabled());
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_emit_and_drain() {
        let (sink, mut stream) = event_channel();
        let run_id = RunId::new();

        sink.emit(RunEvent::RunFinished {
            run_id,
            success: true,
        });
        sink.emit(RunEvent::StageEntered {
            run_id,
            stage: Stage::Done,
        });

        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RunEvent::RunFinished { success: true, .. }));
    }

    #[test]
    fn test_disabled_sink() {
        let sink = EventSink::disabled();
        assert!(!sink.is_enabled());
        sink.emit(RunEvent::RunFinished {
            run_id: RunId::new(),
            success: false,
        });
    }

    #[test]
    fn test_closed_stream_is_ignored() {
        let (sink, stream) = event_channel();
        drop(stream);
        assert!(!sink.is_enabled());
        sink.emit(RunEvent::RunFinished {
            run_id: RunId::new(),
            success: true,
        });
    }

    #[tokio::test]
    async fn test_receive_event() {
        let (sink, mut stream) = event_channel();
        sink.emit(RunEvent::TaskFinished {
            run_id: RunId::new(),
            task_id: TaskId(0),
            status: TaskStatus::Completed,
        });
        drop(sink);

        assert!(matches!(stream.recv().await, Some(RunEvent::TaskFinished { .. })));
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(RunEvent::GroupStarted {
            run_id: RunId::new(),
            group: 1,
            task_ids: vec![TaskId(2)],
        })
        .unwrap();
        assert_eq!(json["event"], "group_started");
        assert_eq!(json["task_ids"][0], 2);
    }
}
