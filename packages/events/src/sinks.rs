//! Concrete [`EventSink`] implementations.

use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::{DispatchEvent, EventError, EventSink};

/// Writes every event to the log as a JSON line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &DispatchEvent) -> Result<(), EventError> {
        let json = serde_json::to_string(event)?;
        log::info!("event {json}");
        Ok(())
    }
}

/// Fans events out to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastSink {
    /// Creates a sink that buffers up to `capacity` events per slow
    /// subscriber before it starts lagging.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Opens a new subscription that sees every event published after this
    /// call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &DispatchEvent) -> Result<(), EventError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| EventError::NoSubscribers {
                event: event.name().to_string(),
            })
    }
}

/// Keeps every event in memory, in publish order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far.
    #[must_use]
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of everything published so far.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Forgets everything published so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &DispatchEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_dispatch_models::UnitId;

    fn removed() -> DispatchEvent {
        DispatchEvent::VehicleRemoved {
            unit_id: UnitId::nil(),
        }
    }

    #[test]
    fn broadcast_without_subscribers_reports_error() {
        let sink = BroadcastSink::new(8);
        assert!(matches!(
            sink.publish(&removed()),
            Err(EventError::NoSubscribers { .. })
        ));
    }

    #[test]
    fn broadcast_reaches_subscriber() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish(&removed()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), removed());
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.publish(&removed()).unwrap();
        sink.publish(&DispatchEvent::IncidentAttended {
            incident_id: UnitId::nil(),
            unit_id: None,
        })
        .unwrap();
        assert_eq!(sink.names(), vec!["vehicle_removed", "incident_attended"]);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn log_sink_encodes() {
        assert!(LogSink.publish(&removed()).is_ok());
    }
}
