//! Agent events: fire-and-forget notifications for UIs and audit logs.
//!
//! The loop and the history store publish an [`AgentEvent`] for every user
//! message, tool call, tool result and assistant response. Publishing never
//! blocks and never fails from the publisher's point of view: a slow or
//! missing consumer cannot stall a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    ToolCall,
    ToolResult,
    /// Text the model produced alongside a tool call
    AgentPlanning,
    SessionSummary,
    AgentResponse,
    AgentResponseInterrupted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(kind: EventKind, content: serde_json::Value) -> Self {
        Self {
            kind,
            content,
            timestamp: Utc::now(),
        }
    }

    /// An event whose content is `{"text": ...}`.
    pub fn text(kind: EventKind, text: impl Into<String>) -> Self {
        Self::new(kind, serde_json::json!({ "text": text.into() }))
    }
}

/// Where the loop publishes events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: AgentEvent) {}
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast`: sends never wait, and a subscriber that
/// falls more than `capacity` events behind loses the oldest ones.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: AgentEvent) {
        self.publish(event);
    }
}

#[derive(Debug, Error)]
#[error("Event delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// An external consumer of events (websocket, terminal renderer, ...).
#[async_trait::async_trait]
pub trait EventObserver: Send + Sync {
    async fn deliver(&self, event: &AgentEvent) -> std::result::Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(AgentEvent::new(
            EventKind::ToolCall,
            serde_json::json!({"tool_name": "read_file"}),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::ToolCall);
        assert_eq!(event.content["tool_name"], "read_file");
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::text(EventKind::Error, "no subscribers"));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = AgentEvent::text(EventKind::AgentResponseInterrupted, "stopped");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"agent_response_interrupted""#));
        assert!(json.contains(r#""text":"stopped""#));
    }
}
