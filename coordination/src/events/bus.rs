//! Event bus for pipeline stage events
//!
//! Events go to every attached sink (the structured event log) and are
//! broadcast to live subscribers over a Tokio broadcast channel.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::PipelineEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event sinks
#[derive(Debug, thiserror::Error)]
pub enum EventSinkError {
    #[error("Failed to persist event: {0}")]
    PersistFailed(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for event sink operations
pub type EventSinkResult<T> = Result<T, EventSinkError>;

/// Destination for stage events. Write-only from the pipeline's side.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &PipelineEvent) -> EventSinkResult<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _event: &PipelineEvent) -> EventSinkResult<()> {
        Ok(())
    }
}

/// Keeps events in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Stage names in recording order
    pub fn stages(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|e| e.iter().map(|ev| ev.stage()).collect())
            .unwrap_or_default()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: &PipelineEvent) -> EventSinkResult<()> {
        self.events
            .lock()
            .map_err(|e| EventSinkError::PersistFailed(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Fan-out of stage events to sinks and subscribers
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    /// Create a new event bus without persistence
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            sinks: Vec::new(),
        }
    }

    /// Attach a sink that receives every published event
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Persist to every sink, then broadcast. A failing sink is logged and
    /// does not stop the pipeline.
    pub fn publish(&self, event: PipelineEvent) {
        let stage = event.stage();
        for sink in &self.sinks {
            if let Err(e) = sink.record(&event) {
                warn!(stage, error = %e, "Failed to persist event");
            }
        }

        match self.sender.send(event) {
            Ok(count) => debug!(stage, receivers = count, "Event published"),
            Err(_) => debug!(stage, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by stage names
    pub stages: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(mut self, stages: &[&str]) -> Self {
        self.stages = Some(stages.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn matches(&self, event: &PipelineEvent) -> bool {
        match &self.stages {
            Some(stages) => stages.iter().any(|s| s == event.stage()),
            None => true,
        }
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<PipelineEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<PipelineEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

impl EventBus {
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::state::EscalationTier;
    use chrono::Utc;

    fn generation_start() -> PipelineEvent {
        PipelineEvent::GenerationStart {
            tier: EscalationTier::Tier1,
            is_initial_tier: true,
            timestamp: Utc::now(),
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record(&self, _event: &PipelineEvent) -> EventSinkResult<()> {
            Err(EventSinkError::PersistFailed("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_sink_and_subscriber() {
        let sink = Arc::new(MemoryEventSink::new());
        let bus = EventBus::new().with_sink(sink.clone());
        let mut receiver = bus.subscribe();

        bus.publish(generation_start());

        assert_eq!(sink.stages(), vec!["generation_start"]);
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.stage(), "generation_start");
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let sink = Arc::new(MemoryEventSink::new());
        let bus = EventBus::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(sink.clone());
        bus.publish(generation_start());
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().stages(&["pipeline_failure"]));

        bus.publish(generation_start());
        bus.publish(PipelineEvent::PipelineFailure {
            query: "scan".to_string(),
            code: "cancelled".to_string(),
            reason: "client went away".to_string(),
            timestamp: Utc::now(),
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.stage(), "pipeline_failure");
    }

    #[test]
    fn test_null_sink() {
        assert!(NullEventSink.record(&generation_start()).is_ok());
    }
}
