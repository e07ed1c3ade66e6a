/*!
 * Event system for StationLink.
 *
 * A typed publish/subscribe bus. Each event type gets its own broadcast
 * channel; components either pull from a receiver or register an async
 * handler with [`SharedEventBus::on`].
 */
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Maximum number of events that can be buffered in a channel
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type EventSender<T> = broadcast::Sender<T>;
type EventReceiver<T> = broadcast::Receiver<T>;

/// Event bus for publishing and subscribing to events
#[derive(Debug)]
pub struct EventBus {
    channels: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    channel_capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity,
        }
    }

    fn sender<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventSender<T>> {
        let type_id = TypeId::of::<T>();
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::event("Failed to lock channels"))?;

        if let Some(sender) = channels.get(&type_id) {
            return sender
                .downcast_ref::<EventSender<T>>()
                .cloned()
                .ok_or_else(|| Error::event("Failed to downcast sender"));
        }

        let (sender, _) = broadcast::channel(self.channel_capacity);
        channels.insert(type_id, Box::new(sender.clone()));
        Ok(sender)
    }

    /// Publish an event, returning the number of receivers it reached
    ///
    /// Publishing with no subscriber is not an error; the event is dropped.
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        let sender = self.sender::<T>()?;

        if sender.receiver_count() == 0 {
            debug!("No receivers for event {:?}", event);
            return Ok(0);
        }

        match sender.send(event) {
            Ok(n) => {
                trace!("Published event to {} receivers", n);
                Ok(n)
            }
            Err(e) => {
                warn!("Failed to publish event: {}", e);
                Err(Error::event(format!("Failed to publish event: {}", e)))
            }
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        Ok(self.sender::<T>()?.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared event bus that can be cloned
#[derive(Debug, Clone)]
pub struct SharedEventBus(Arc<EventBus>);

impl SharedEventBus {
    /// Create a new shared event bus
    pub fn new() -> Self {
        Self(Arc::new(EventBus::new()))
    }

    /// Create a new shared event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(EventBus::with_capacity(capacity)))
    }

    /// Publish an event
    pub fn publish<T: Clone + Debug + Send + Sync + 'static>(&self, event: T) -> Result<usize> {
        self.0.publish(event)
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: Clone + Debug + Send + Sync + 'static>(&self) -> Result<EventReceiver<T>> {
        self.0.subscribe()
    }

    /// Register an async handler for every event of type `T`
    ///
    /// The handler runs in a dedicated delivery task, so invocations for one
    /// registration never overlap. The subscription is taken before this
    /// returns; events published afterwards are delivered. Abort the returned
    /// handle to unregister.
    pub fn on<T, F, Fut>(&self, handler: F) -> Result<JoinHandle<()>>
    where
        T: Clone + Debug + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let receiver = self.subscribe::<T>()?;
        Ok(tokio::spawn(deliver(receiver, handler)))
    }
}

impl Default for SharedEventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver<T, F, Fut>(mut receiver: EventReceiver<T>, handler: F)
where
    T: Clone + Debug + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match receiver.recv().await {
            Ok(event) => handler(event).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event handler lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => {
                debug!("Event channel closed, stopping delivery");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[derive(Debug, Clone)]
    struct TestEvent {
        id: u32,
        message: String,
    }

    #[tokio::test]
    async fn test_publish_subscribe() -> Result<()> {
        let event_bus = EventBus::new();
        let mut rx = event_bus.subscribe::<TestEvent>()?;

        let event = TestEvent {
            id: 1,
            message: "Hello, world!".to_string(),
        };

        let receivers = event_bus.publish(event.clone())?;
        assert_eq!(receivers, 1);

        let received = rx.recv().await.map_err(|e| Error::event(e.to_string()))?;
        assert_eq!(received.id, event.id);
        assert_eq!(received.message, event.message);

        Ok(())
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() -> Result<()> {
        let event_bus = EventBus::new();
        let receivers = event_bus.publish(TestEvent {
            id: 7,
            message: "nobody listens".to_string(),
        })?;
        assert_eq!(receivers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_event_types() -> Result<()> {
        #[derive(Debug, Clone)]
        struct OtherEvent {
            value: String,
        }

        let event_bus = SharedEventBus::new();
        let mut rx1 = event_bus.subscribe::<TestEvent>()?;
        let mut rx2 = event_bus.subscribe::<OtherEvent>()?;

        event_bus.publish(TestEvent {
            id: 3,
            message: "Test event".to_string(),
        })?;
        event_bus.publish(OtherEvent {
            value: "Other event".to_string(),
        })?;

        let received1 = rx1.recv().await.map_err(|e| Error::event(e.to_string()))?;
        let received2 = rx2.recv().await.map_err(|e| Error::event(e.to_string()))?;

        assert_eq!(received1.id, 3);
        assert_eq!(received2.value, "Other event");

        Ok(())
    }

    #[tokio::test]
    async fn test_on_handler_receives_in_order() -> Result<()> {
        let event_bus = SharedEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handle = event_bus.on(move |event: TestEvent| {
            let sink = sink.clone();
            async move {
                // Yield so overlapping invocations would interleave
                tokio::task::yield_now().await;
                sink.lock().unwrap().push(event.id);
            }
        })?;

        for id in 0..5 {
            event_bus.publish(TestEvent {
                id,
                message: String::new(),
            })?;
        }

        for _ in 0..100 {
            if seen.lock().unwrap().len() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_publish() -> Result<()> {
        const NUM_PUBLISHERS: usize = 10;
        const EVENTS_PER_PUBLISHER: usize = 10;

        let event_bus = SharedEventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let seen = counter.clone();
        let _handle = event_bus.on(move |_: TestEvent| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })?;

        let barrier = Arc::new(Barrier::new(NUM_PUBLISHERS));
        let mut handles = Vec::with_capacity(NUM_PUBLISHERS);

        for publisher_id in 0..NUM_PUBLISHERS {
            let event_bus = event_bus.clone();
            let barrier = barrier.clone();

            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                for i in 0..EVENTS_PER_PUBLISHER {
                    event_bus
                        .publish(TestEvent {
                            id: (publisher_id * EVENTS_PER_PUBLISHER + i) as u32,
                            message: format!("publisher {}, index {}", publisher_id, i),
                        })
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == NUM_PUBLISHERS * EVENTS_PER_PUBLISHER {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            counter.load(Ordering::SeqCst),
            NUM_PUBLISHERS * EVENTS_PER_PUBLISHER
        );

        Ok(())
    }
}
