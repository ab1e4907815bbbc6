use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

use crate::metrics::DOMAIN_EVENTS_TOTAL;
use crate::models::DomainEvent;

/// Publish-only sink for domain events. Publishing never waits for delivery.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: DomainEvent);

    fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: DomainEvent);
}

/// Fans every event out to its handlers, one Tokio task per handler.
/// A panicking handler is logged and never reaches the publisher.
pub struct AsyncEventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl AsyncEventBus {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Bus with the logging and metrics handlers installed.
    pub fn with_default_handlers() -> Self {
        Self::new()
            .with_handler(Arc::new(LoggingHandler))
            .with_handler(Arc::new(MetricsHandler))
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

impl Default for AsyncEventBus {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

impl EventBus for AsyncEventBus {
    fn publish(&self, event: DomainEvent) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                "Dropping {} event: no async runtime available",
                event.event_type()
            );
            return;
        };

        for handler in &self.handlers {
            let handler = Arc::clone(handler);
            let event = event.clone();
            let inner = runtime.clone();
            runtime.spawn(async move {
                let name = handler.name();
                let event_type = event.event_type();
                let task = inner.spawn(async move { handler.handle(event).await });
                if let Err(e) = task.await {
                    if e.is_panic() {
                        tracing::error!("Event handler {} panicked on {}", name, event_type);
                    } else {
                        tracing::warn!("Event handler {} was cancelled on {}", name, event_type);
                    }
                }
            });
        }
    }
}

pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, event: DomainEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::debug!("Domain event {}: {}", event.event_type(), payload),
            Err(e) => tracing::warn!("Failed to encode {} event: {}", event.event_type(), e),
        }
    }
}

pub struct MetricsHandler;

#[async_trait]
impl EventHandler for MetricsHandler {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn handle(&self, event: DomainEvent) {
        DOMAIN_EVENTS_TOTAL
            .with_label_values(&[event.event_type()])
            .inc();
    }
}

/// Keeps published events in memory. Used by tests and offline tools.
#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::event_type).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventBus for RecordingEventBus {
    fn publish(&self, event: DomainEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn handle(&self, _event: DomainEvent) {
            panic!("handler failure");
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: DomainEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event() -> DomainEvent {
        DomainEvent::PlayerLeftQueue {
            player_id: UserId::from_platform(1),
            at: 0,
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let bus = AsyncEventBus::new()
            .with_handler(Arc::new(PanickingHandler))
            .with_handler(Arc::new(CountingHandler(counter.clone())));

        bus.publish(event());
        bus.publish(event());

        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_publish_without_runtime_is_dropped() {
        let bus = AsyncEventBus::default();
        bus.publish(event());
    }

    #[test]
    fn test_recording_bus_keeps_order() {
        let bus = RecordingEventBus::new();
        bus.publish_all(vec![
            event(),
            DomainEvent::UserRegistered {
                user_id: UserId::from_platform(2),
                username: "bob".into(),
                at: 1,
            },
        ]);
        assert_eq!(
            bus.event_types(),
            vec!["player_left_queue", "user_registered"]
        );
    }
}
