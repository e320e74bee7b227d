//! Typed in-process pub/sub (spec.md §4.B), grounded directly in the
//! teacher's `agent::event_bus::EventBus`: a `broadcast` channel feeding
//! per-subscription bounded buffers, a sequence counter bumped with a CAS
//! loop, and a cleanup pass over stale subscriptions. The teacher's version
//! notifies a closed set of `EventObserver` trait objects; this one
//! generalizes that into typed, filterable `Subscribe` channels per
//! spec.md's contract while keeping the same bookkeeping shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex as TokioMutex};

/// The minimal catalog from spec.md §6 "Events emitted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ProviderRegistered,
    ProviderHealthChanged,
    ProviderOauthRefreshed,
    ProviderOauthRefreshFailed,
    CircuitStateChanged,
    EnsembleDecided,
    DebateCreated,
    DebateRoundStarted,
    DebateRoundCompleted,
    DebateCompleted,
    DebateFailed,
    DebateCancelled,
    CacheHit,
    CacheMiss,
    RequestFailed,
}

/// `{id, type, source, subject?, timestamp, traceID?, payload, metadata?}`
/// (spec.md §3 Event). Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub subject: Option<String>,
    pub timestamp_ms: i64,
    pub trace_id: Option<String>,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

type FilterFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A long-lived listener that sees every published event, regardless of
/// type. Grounded in the teacher's `agent::events::EventObserver`: some
/// consumers (audit logging, health-history persistence) want to stay
/// registered for the bus's lifetime rather than hold a channel receiver
/// open, which a `Subscribe` call would otherwise require per event type.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event);
}

struct Subscription {
    event_type: EventType,
    filter: Option<FilterFn>,
    sender: mpsc::Sender<Event>,
    dropped: AtomicU64,
}

/// `Publish`/`Subscribe` hub (spec.md §4.B). One bus instance is shared
/// process-wide per spec.md §9 "Singletons", constructed once and threaded
/// through constructors rather than accessed as a global.
pub struct EventBus {
    subscriptions: Arc<TokioMutex<Vec<Subscription>>>,
    observers: parking_lot::RwLock<Vec<Arc<dyn EventObserver>>>,
    sequence: AtomicU64,
    max_subscribers_per_type: usize,
    publish_timeout: Duration,
    cleanup_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(max_subscribers_per_type: usize, publish_timeout: Duration) -> Arc<Self> {
        let bus = Arc::new(Self {
            subscriptions: Arc::new(TokioMutex::new(Vec::new())),
            observers: parking_lot::RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            max_subscribers_per_type,
            publish_timeout,
            cleanup_task: TokioMutex::new(None),
        });
        bus
    }

    /// Registers a listener that sees every event published from now on,
    /// independent of the `Subscribe` channel contract.
    pub fn register_observer(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().push(observer);
    }

    /// Starts the periodic cleanup routine removing subscriptions whose
    /// receivers have been dropped (spec.md §4.B "Lifecycle").
    pub fn start_cleanup(self: &Arc<Self>, cleanup_interval: Duration) {
        let subscriptions = self.subscriptions.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let mut subs = subscriptions.lock().await;
                let before = subs.len();
                subs.retain(|s| !s.sender.is_closed());
                if subs.len() != before {
                    log::debug!("EventBus: cleanup dropped {} closed subscription(s)", before - subs.len());
                }
            }
        });
        // Best-effort: if called twice, the previous ticker is simply
        // replaced and dropped (which aborts it).
        if let Ok(mut guard) = self.cleanup_task.try_lock() {
            *guard = Some(handle);
        }
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a bounded receiver for `event_type`, optionally filtered.
    /// Bounded per type by `maxSubscribers` (spec.md §4.B).
    pub async fn subscribe(
        &self,
        event_type: EventType,
        buffer: usize,
        filter: Option<FilterFn>,
    ) -> Option<mpsc::Receiver<Event>> {
        let mut subs = self.subscriptions.lock().await;
        let count = subs.iter().filter(|s| s.event_type == event_type).count();
        if count >= self.max_subscribers_per_type {
            log::warn!("EventBus: subscriber limit reached for {event_type:?}, rejecting new subscription");
            return None;
        }
        let (tx, rx) = mpsc::channel(buffer);
        subs.push(Subscription { event_type, filter, sender: tx, dropped: AtomicU64::new(0) });
        Some(rx)
    }

    /// Builds and publishes an event, delivering synchronously to every
    /// matching subscription; a full buffer past `publishTimeout` is dropped
    /// and counted rather than blocking the publisher further.
    pub async fn publish(
        &self,
        event_type: EventType,
        source: impl Into<String>,
        subject: Option<String>,
        payload: serde_json::Value,
    ) -> Event {
        let event = Event {
            id: self.next_id(),
            event_type,
            source: source.into(),
            subject,
            timestamp_ms: now_ms(),
            trace_id: None,
            payload,
            metadata: None,
        };

        let subs = self.subscriptions.lock().await;
        for sub in subs.iter().filter(|s| s.event_type == event_type) {
            if let Some(filter) = &sub.filter {
                if !filter(&event) {
                    continue;
                }
            }
            match tokio::time::timeout(self.publish_timeout, sub.sender.send(event.clone())).await {
                Ok(Ok(())) => {}
                _ => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("EventBus: dropped event {:?} for a slow or closed subscriber", event.event_type);
                }
            }
        }
        drop(subs);

        for observer in self.observers.read().iter() {
            observer.on_event(&event);
        }

        event
    }

    /// Fire-and-forget publish; does not wait on subscriber delivery at all.
    pub fn publish_async(self: &Arc<Self>, event_type: EventType, source: String, subject: Option<String>, payload: serde_json::Value) {
        let bus = self.clone();
        tokio::spawn(async move {
            bus.publish(event_type, source, subject, payload).await;
        });
    }

    /// One-shot convenience: resolves with the next event of `event_type`.
    pub async fn wait_for(&self, event_type: EventType) -> Option<Event> {
        let mut rx = self.subscribe(event_type, 1, None).await?;
        rx.recv().await
    }

    pub async fn dropped_counts(&self) -> HashMap<String, u64> {
        let subs = self.subscriptions.lock().await;
        subs.iter()
            .enumerate()
            .map(|(i, s)| (format!("{:?}#{i}", s.event_type), s.dropped.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_matching_event() {
        let bus = EventBus::new(10, Duration::from_millis(50));
        let mut rx = bus.subscribe(EventType::CacheHit, 4, None).await.unwrap();
        bus.publish(EventType::CacheHit, "ensemble", None, serde_json::json!({})).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::CacheHit);
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_types() {
        let bus = EventBus::new(10, Duration::from_millis(50));
        let mut rx = bus.subscribe(EventType::CacheHit, 4, None).await.unwrap();
        bus.publish(EventType::CacheMiss, "ensemble", None, serde_json::json!({})).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_events() {
        let bus = EventBus::new(10, Duration::from_millis(50));
        let filter: FilterFn = Arc::new(|e: &Event| e.subject.as_deref() == Some("provider-a"));
        let mut rx = bus.subscribe(EventType::CircuitStateChanged, 4, Some(filter)).await.unwrap();
        bus.publish(EventType::CircuitStateChanged, "runtime", Some("provider-b".into()), serde_json::json!({})).await;
        bus.publish(EventType::CircuitStateChanged, "runtime", Some("provider-a".into()), serde_json::json!({})).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.subject.as_deref(), Some("provider-a"));
    }

    #[tokio::test]
    async fn subscriptions_are_bounded_per_type() {
        let bus = EventBus::new(1, Duration::from_millis(50));
        assert!(bus.subscribe(EventType::CacheHit, 4, None).await.is_some());
        assert!(bus.subscribe(EventType::CacheHit, 4, None).await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drop_does_not_block_publish() {
        let bus = EventBus::new(10, Duration::from_millis(5));
        let _rx = bus.subscribe(EventType::CacheHit, 1, None).await.unwrap();
        bus.publish(EventType::CacheHit, "x", None, serde_json::json!(1)).await;
        // Second publish: buffer already full, receiver never drained -> dropped, not blocked.
        let start = std::time::Instant::now();
        bus.publish(EventType::CacheHit, "x", None, serde_json::json!(2)).await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn sequence_ids_are_monotonically_increasing() {
        let bus = EventBus::new(10, Duration::from_millis(50));
        let a = bus.publish(EventType::CacheHit, "x", None, serde_json::json!({})).await;
        let b = bus.publish(EventType::CacheHit, "x", None, serde_json::json!({})).await;
        assert!(b.id > a.id);
    }

    struct RecordingObserver {
        seen: parking_lot::Mutex<Vec<EventType>>,
    }

    impl EventObserver for RecordingObserver {
        fn on_event(&self, event: &Event) {
            self.seen.lock().push(event.event_type);
        }
    }

    #[tokio::test]
    async fn registered_observer_sees_every_event_type() {
        let bus = EventBus::new(10, Duration::from_millis(50));
        let observer = Arc::new(RecordingObserver { seen: parking_lot::Mutex::new(Vec::new()) });
        bus.register_observer(observer.clone());

        bus.publish(EventType::CacheHit, "x", None, serde_json::json!({})).await;
        bus.publish(EventType::CacheMiss, "x", None, serde_json::json!({})).await;

        assert_eq!(*observer.seen.lock(), vec![EventType::CacheHit, EventType::CacheMiss]);
    }
}
