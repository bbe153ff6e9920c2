//! In-memory EventBus implementation
//!
//! MemoryEventBus stores events in a Vec for replay and uses a broadcast
//! channel for live subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::ConductorEvent;
use super::bus::{EventBus, EventSeq};
use crate::agent::AgentId;
use crate::orchestration::OrchestrationId;

/// In-memory implementation of EventBus
///
/// Uses a Vec for historical storage (enabling replay) and a broadcast
/// channel for live subscribers. Thread-safe via RwLock and atomics.
pub struct MemoryEventBus {
    /// Stored events with sequence numbers
    events: RwLock<Vec<(EventSeq, ConductorEvent)>>,
    /// Next sequence number to assign
    next_seq: AtomicU64,
    /// Broadcast channel for live subscribers
    tx: broadcast::Sender<(EventSeq, ConductorEvent)>,
}

impl MemoryEventBus {
    /// Create a new MemoryEventBus with the given broadcast channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            events: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            tx,
        }
    }

    async fn filtered(
        &self,
        keep: impl Fn(&ConductorEvent) -> bool,
    ) -> Vec<(EventSeq, ConductorEvent)> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(_, event)| keep(event))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: ConductorEvent) -> EventSeq {
        // Sequence assignment and storage happen under one lock so the stored
        // order always matches sequence order
        let mut events = self.events.write().await;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        events.push((seq, event.clone()));
        drop(events);

        // Broadcast to live subscribers (ignore if no receivers)
        let _ = self.tx.send((seq, event));

        seq
    }

    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, ConductorEvent)> {
        self.tx.subscribe()
    }

    async fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, ConductorEvent)> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    async fn get_agent_events(&self, agent_id: AgentId) -> Vec<(EventSeq, ConductorEvent)> {
        self.filtered(|event| event.agent_id() == Some(agent_id))
            .await
    }

    async fn get_orchestration_events(
        &self,
        orchestration_id: OrchestrationId,
    ) -> Vec<(EventSeq, ConductorEvent)> {
        self.filtered(|event| event.orchestration_id() == Some(orchestration_id))
            .await
    }

    fn current_seq(&self) -> EventSeq {
        self.next_seq.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::orchestration::OrchestrationPhase;
    use crate::policy::ResourcePressure;

    fn pressure_event() -> ConductorEvent {
        ConductorEvent::PressureChanged {
            from: ResourcePressure::Normal,
            to: ResourcePressure::Elevated,
        }
    }

    fn phase_event(id: OrchestrationId) -> ConductorEvent {
        ConductorEvent::OrchestrationPhaseChanged {
            orchestration_id: id,
            phase: OrchestrationPhase::Executing,
        }
    }

    // ==================== Publish Tests ====================

    #[tokio::test]
    async fn publish_increments_sequence_number() {
        let bus = MemoryEventBus::new(100);

        let seq1 = bus.publish(pressure_event()).await;
        let seq2 = bus.publish(pressure_event()).await;
        let seq3 = bus.publish(pressure_event()).await;

        assert_eq!((seq1, seq2, seq3), (0, 1, 2));
        assert_eq!(bus.current_seq(), 3);
    }

    // ==================== Subscribe Tests ====================

    #[tokio::test]
    async fn subscribe_receives_new_events() {
        let bus = MemoryEventBus::new(100);
        let mut rx = bus.subscribe();

        bus.publish(pressure_event()).await;

        let (seq, event) = rx.recv().await.unwrap();
        assert_eq!(seq, 0);
        assert!(matches!(event, ConductorEvent::PressureChanged { .. }));
    }

    // ==================== Replay Tests ====================

    #[tokio::test]
    async fn events_from_returns_events_starting_at_seq() {
        let bus = MemoryEventBus::new(100);
        for _ in 0..3 {
            bus.publish(pressure_event()).await;
        }

        let events = bus.events_from(1).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 1);
        assert_eq!(events[1].0, 2);
        assert!(bus.events_from(100).await.is_empty());
    }

    #[tokio::test]
    async fn orchestration_events_are_filtered_by_id() {
        let bus = MemoryEventBus::new(100);
        let a = OrchestrationId::new();
        let b = OrchestrationId::new();

        bus.publish(phase_event(a)).await;
        bus.publish(phase_event(b)).await;
        bus.publish(phase_event(a)).await;
        bus.publish(pressure_event()).await;

        assert_eq!(bus.get_orchestration_events(a).await.len(), 2);
        assert_eq!(bus.get_orchestration_events(b).await.len(), 1);
        assert!(bus.get_agent_events(AgentId::new()).await.is_empty());
    }

    // ==================== Concurrent Access Tests ====================

    #[tokio::test]
    async fn concurrent_publish_maintains_sequence_integrity() {
        let bus = Arc::new(MemoryEventBus::new(1000));
        let mut handles = vec![];

        for _ in 0..10 {
            let bus = Arc::clone(&bus);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    bus.publish(pressure_event()).await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(bus.current_seq(), 100);
        let seqs: Vec<_> = bus.events_from(0).await.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, (0..100).collect::<Vec<_>>());
    }
}
