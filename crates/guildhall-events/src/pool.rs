//! The [`EventPool`]: priority-ordered, batched publish/dispatch.
//!
//! # Ordering
//!
//! Every accepted event receives a monotonically increasing sequence number.
//! [`EventPool::drain_batch`] returns events ordered by priority (highest
//! first), ties broken by sequence (oldest first).
//!
//! # Reentrancy
//!
//! Draining takes the queue lock only long enough to pop the batch. Handlers
//! run afterwards with no pool lock held, so they may publish, subscribe, or
//! unsubscribe freely. Anything they publish lands in the queue behind the
//! drained batch and is delivered by the *next* drain, never by the current
//! one.

use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{HandlerError, InvalidEventError};
use crate::event::{Event, Priority, RawEvent};
use crate::pattern::Pattern;

/// Sequence number assigned to an accepted event.
pub type EventSeq = u64;

/// Token returned by [`EventPool::subscribe`]; pass it to
/// [`EventPool::unsubscribe`] to stop delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// One isolated handler failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// The subscription whose handler failed.
    pub subscription: SubscriptionId,
    /// Name of the event being delivered.
    pub event: String,
    /// The error message, or the panic message for a panicking handler.
    pub error: HandlerError,
    /// Whether the handler panicked rather than returning an error.
    pub panicked: bool,
}

/// Outcome of dispatching a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events dispatched.
    pub events: usize,
    /// Successful handler invocations.
    pub deliveries: usize,
    /// Failed handler invocations.
    pub failures: Vec<HandlerFailure>,
}

/// Heap entry. Ordered so the max-heap pops highest priority, then lowest
/// sequence.
#[derive(Debug)]
struct Queued {
    priority: Priority,
    seq: EventSeq,
    event: Event,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Subscription {
    id: SubscriptionId,
    pattern: Pattern,
    handler: Handler,
}

struct Inner {
    queue: Mutex<BinaryHeap<Queued>>,
    next_seq: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
    next_subscription: AtomicU64,
}

/// Priority-ordered event queue with pattern subscriptions.
///
/// Cloning is cheap and yields a handle to the same pool, which is how
/// handlers get hold of a publisher.
#[derive(Clone)]
pub struct EventPool {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for EventPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventPool")
            .field("pending", &self.pending())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(BinaryHeap::new()),
                next_seq: AtomicU64::new(0),
                subscriptions: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Enqueue an event. Never blocks on dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEventError::ZeroSchemaVersion`] for a schema
    /// version of 0. The event is not enqueued.
    pub fn publish(&self, event: Event) -> Result<EventSeq, InvalidEventError> {
        if event.schema_version == 0 {
            return Err(InvalidEventError::ZeroSchemaVersion);
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(event = %event.name, priority = ?event.priority, seq, "Event published");
        self.inner.queue.lock().push(Queued {
            priority: event.priority,
            seq,
            event,
        });
        Ok(seq)
    }

    /// Decode and enqueue an event from an external collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEventError::Undecodable`] for invalid JSON and the
    /// matching variant for a missing or malformed name or timestamp.
    pub fn publish_json(&self, bytes: &[u8]) -> Result<EventSeq, InvalidEventError> {
        let raw: RawEvent =
            serde_json::from_slice(bytes).map_err(|e| InvalidEventError::Undecodable {
                reason: e.to_string(),
            })?;
        let event = Event::try_from(raw).inspect_err(|e| {
            warn!(error = %e, "Rejected external event");
        })?;
        self.publish(event)
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Register `handler` for every event matching `pattern`.
    ///
    /// Handlers matching the same event run in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEventError::MalformedPattern`] if the pattern does
    /// not parse.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> Result<SubscriptionId, InvalidEventError>
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let pattern = Pattern::parse(pattern)?;
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = id.0, %pattern, "Subscribed");
        self.inner.subscriptions.write().push(Subscription {
            id,
            pattern,
            handler: Arc::new(handler),
        });
        Ok(id)
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    // -----------------------------------------------------------------------
    // Draining and dispatch
    // -----------------------------------------------------------------------

    /// Number of events waiting to be drained.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Atomically remove and return up to `max_items` events in
    /// (priority desc, sequence asc) order.
    pub fn drain_batch(&self, max_items: usize) -> Vec<Event> {
        let mut queue = self.inner.queue.lock();
        let take = max_items.min(queue.len());
        let mut batch = Vec::with_capacity(take);
        while batch.len() < take {
            match queue.pop() {
                Some(queued) => batch.push(queued.event),
                None => break,
            }
        }
        batch
    }

    /// Deliver `events` to their subscribers, in order.
    ///
    /// A failing or panicking handler is logged and recorded; delivery
    /// continues with the next handler and the next event.
    pub fn dispatch(&self, events: &[Event]) -> DispatchReport {
        let mut report = DispatchReport {
            events: events.len(),
            ..DispatchReport::default()
        };

        for event in events {
            // Snapshot the matching handlers so handlers can (un)subscribe
            // without deadlocking; changes apply from the next event on.
            let targets: Vec<(SubscriptionId, Handler)> = self
                .inner
                .subscriptions
                .read()
                .iter()
                .filter(|s| s.pattern.matches(&event.name))
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect();

            for (id, handler) in targets {
                match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                    Ok(Ok(())) => {
                        report.deliveries = report.deliveries.saturating_add(1);
                    }
                    Ok(Err(error)) => {
                        warn!(event = %event.name, subscription = id.0, error = %error, "Event handler failed");
                        report.failures.push(HandlerFailure {
                            subscription: id,
                            event: event.name.to_string(),
                            error,
                            panicked: false,
                        });
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(event = %event.name, subscription = id.0, message, "Event handler panicked");
                        report.failures.push(HandlerFailure {
                            subscription: id,
                            event: event.name.to_string(),
                            error: HandlerError::new(message),
                            panicked: true,
                        });
                    }
                }
            }
        }

        report
    }

    /// Drain one batch and dispatch it. Called once per tick.
    pub fn process_batch(&self, max_items: usize) -> DispatchReport {
        let batch = self.drain_batch(max_items);
        self.dispatch(&batch)
    }
}

/// Best-effort extraction of a panic payload's message.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn event(name: &str, priority: Priority) -> Event {
        Event::new(name, serde_json::Value::Null)
            .unwrap()
            .with_priority(priority)
    }

    #[test]
    fn drain_orders_by_priority_then_fifo() {
        let pool = EventPool::new();
        pool.publish(event("a.b.low1", Priority::Low)).unwrap();
        pool.publish(event("a.b.high1", Priority::High)).unwrap();
        pool.publish(event("a.b.normal", Priority::Normal)).unwrap();
        pool.publish(event("a.b.high2", Priority::High)).unwrap();
        pool.publish(event("a.b.low2", Priority::Low)).unwrap();
        pool.publish(event("a.b.crit", Priority::Critical)).unwrap();

        let names: Vec<String> = pool
            .drain_batch(16)
            .into_iter()
            .map(|e| e.name.to_string())
            .collect();
        assert_eq!(
            names,
            ["a.b.crit", "a.b.high1", "a.b.high2", "a.b.normal", "a.b.low1", "a.b.low2"]
        );
    }

    #[test]
    fn second_drain_is_empty() {
        let pool = EventPool::new();
        for _ in 0..5 {
            pool.publish(event("a.b.c", Priority::Normal)).unwrap();
        }
        assert_eq!(pool.drain_batch(10).len(), 5);
        assert!(pool.drain_batch(10).is_empty());
    }

    #[test]
    fn drain_respects_max_items() {
        let pool = EventPool::new();
        for _ in 0..5 {
            pool.publish(event("a.b.c", Priority::Normal)).unwrap();
        }
        assert_eq!(pool.drain_batch(2).len(), 2);
        assert_eq!(pool.pending(), 3);
    }

    #[test]
    fn scenario_high_priority_guild_event_drains_first() {
        let pool = EventPool::new();
        pool.publish(event("guild.resource.updated", Priority::Low)).unwrap();
        pool.publish(event("guild.member.joined", Priority::High)).unwrap();
        let batch = pool.drain_batch(10);
        assert_eq!(batch[0].name.as_str(), "guild.member.joined");
        assert_eq!(batch[1].name.as_str(), "guild.resource.updated");
    }

    #[test]
    fn zero_schema_version_is_rejected() {
        let pool = EventPool::new();
        let bad = event("a.b.c", Priority::Normal).with_schema_version(0);
        assert_eq!(pool.publish(bad), Err(InvalidEventError::ZeroSchemaVersion));
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn publish_json_rejects_missing_fields() {
        let pool = EventPool::new();
        let no_name = br#"{"timestamp":"2026-01-01T00:00:00Z"}"#;
        assert_eq!(pool.publish_json(no_name), Err(InvalidEventError::MissingName));
        let no_ts = br#"{"name":"guild.member.joined"}"#;
        assert_eq!(pool.publish_json(no_ts), Err(InvalidEventError::MissingTimestamp));
        let ok = br#"{"name":"guild.member.joined","timestamp":"2026-01-01T00:00:00Z","priority":"high"}"#;
        assert!(pool.publish_json(ok).is_ok());
        assert_eq!(pool.pending(), 1);
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let pool = EventPool::new();
        let calls = Arc::new(AtomicUsize::new(0));

        pool.subscribe("a.*", |_| Err(HandlerError::new("boom"))).unwrap();
        pool.subscribe("a.*", |_| panic!("kaboom")).unwrap();
        let counter = Arc::clone(&calls);
        pool.subscribe("a.*", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        pool.publish(event("a.b.one", Priority::Normal)).unwrap();
        pool.publish(event("a.b.two", Priority::Normal)).unwrap();
        let report = pool.process_batch(10);

        assert_eq!(report.events, 2);
        assert_eq!(report.deliveries, 2);
        assert_eq!(report.failures.len(), 4);
        assert_eq!(report.failures.iter().filter(|f| f.panicked).count(), 2);
        assert_eq!(report.failures[1].error.message, "kaboom");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let pool = EventPool::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            pool.subscribe("x.y.z", move |_| {
                order.lock().push(i);
                Ok(())
            })
            .unwrap();
        }
        pool.publish(event("x.y.z", Priority::Normal)).unwrap();
        pool.process_batch(1);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn events_published_by_handlers_wait_for_next_drain() {
        let pool = EventPool::new();
        let publisher = pool.clone();
        pool.subscribe("loop.event.fired", move |_| {
            publisher
                .publish(event("loop.event.fired", Priority::Critical))
                .map(|_| ())
                .map_err(|e| HandlerError::new(e.to_string()))
        })
        .unwrap();

        pool.publish(event("loop.event.fired", Priority::Normal)).unwrap();
        let first = pool.process_batch(100);
        assert_eq!(first.events, 1);
        assert_eq!(pool.pending(), 1);
        let second = pool.process_batch(100);
        assert_eq!(second.events, 1);
        assert_eq!(pool.pending(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let pool = EventPool::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = pool
            .subscribe("*", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        pool.publish(event("a.b.c", Priority::Normal)).unwrap();
        pool.process_batch(10);
        assert!(pool.unsubscribe(id));
        assert!(!pool.unsubscribe(id));
        pool.publish(event("a.b.c", Priority::Normal)).unwrap();
        pool.process_batch(10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
