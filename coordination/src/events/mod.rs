//! Pipeline event log
//!
//! Every stage transition of a pipeline run is published as a
//! [`PipelineEvent`]:
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Orchestrator │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │  EventSink   │
//!                      │ (JSON lines) │
//!                      └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventFilter, EventSink, EventSinkError, EventSinkResult, FilteredReceiver,
    MemoryEventSink, NullEventSink, SharedEventBus,
};
pub use types::PipelineEvent;
