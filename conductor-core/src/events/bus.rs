//! EventBus trait definition
//!
//! The EventBus abstraction enables event-driven observation with
//! late-joiner replay support.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::ConductorEvent;
use crate::agent::AgentId;
use crate::orchestration::OrchestrationId;

/// Sequence number for events (monotonically increasing)
pub type EventSeq = u64;

/// Event bus for publishing and subscribing to ConductorEvents
///
/// Implementations must support:
/// - Publishing events with sequence numbers
/// - Live subscriptions via broadcast channel
/// - Historical replay for late joiners
/// - Agent- and orchestration-scoped event retrieval
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event, returns its sequence number
    async fn publish(&self, event: ConductorEvent) -> EventSeq;

    /// Subscribe to all events from now (live stream)
    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, ConductorEvent)>;

    /// Get all events starting from a sequence number (for replay)
    async fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, ConductorEvent)>;

    /// Get all events concerning one agent
    async fn get_agent_events(&self, agent_id: AgentId) -> Vec<(EventSeq, ConductorEvent)>;

    /// Get all events concerning one orchestration run
    async fn get_orchestration_events(
        &self,
        orchestration_id: OrchestrationId,
    ) -> Vec<(EventSeq, ConductorEvent)>;

    /// Current sequence number (high water mark)
    fn current_seq(&self) -> EventSeq;
}
