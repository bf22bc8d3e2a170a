use async_trait::async_trait;
use serde::Serialize;

use crate::commands::TurnSummary;

/// Subtask phase announced on the stream before generation begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Retrieval,
    Tools,
    Generating,
}

/// Ordered events of a streamed turn. The sequence is fixed:
/// `Start, Step(Retrieval), Step(Tools), Step(Generating), Chunk*,
/// Complete` — or `Error` as the terminal event, after which nothing else
/// is emitted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        thread_id: String,
        user_message_id: String,
    },
    Step {
        phase: StepPhase,
        detail: String,
    },
    Chunk {
        delta: String,
    },
    Complete {
        summary: TurnSummary,
    },
    Error {
        message: String,
    },
}

/// Receiver for streamed turn events.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: StreamEvent);
}

/// Sink that records the events it receives, for tests.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<StreamEvent>,
}

#[async_trait]
impl EventSink for VecSink {
    async fn emit(&mut self, event: StreamEvent) {
        self.events.push(event);
    }
}
