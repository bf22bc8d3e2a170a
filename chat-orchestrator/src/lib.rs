#![allow(clippy::missing_docs_in_private_items)]

pub mod admission;
pub mod commands;
pub mod events;
pub mod orchestrator;
pub mod store;

pub use admission::AdmissionController;
pub use commands::{
    CreateThread, Regenerate, SendMessage, ToolInvocation, TurnResponse, TurnSummary, UpdateThread,
};
pub use events::{EventSink, StepPhase, StreamEvent, VecSink};
pub use orchestrator::{ChatOrchestrator, FlowRunner, NoopFlowRunner};
pub use store::{ThreadStore, TurnUsage};
