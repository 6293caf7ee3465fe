//! In-process event bus.
//!
//! Producers call [`EventBus::emit`]; every matching handler runs in turn,
//! each awaited before the next, and its outcome is returned as a
//! [`HandlerResult`]. A failing or panicking handler is recorded and logged
//! but never stops the handlers after it, and never reaches the caller.
//!
//! Dispatch order for one event:
//! 1. durable handlers subscribed to the exact type
//! 2. once-handlers subscribed to the exact type (deregistered as they are picked)
//! 3. handlers subscribed to [`event_types::WILDCARD`]
//!
//! The registry lock is released before any handler runs, so handlers may
//! emit follow-up events on the same bus.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use talekeeper_domain::{event_types, DomainError, EventData, GameEvent};
use tokio::sync::RwLock;

use crate::infrastructure::ports::{ClockPort, RepoError};

/// Errors a handler may report. They end up in [`HandlerResult::error`].
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Something that reacts to events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in results and logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &GameEvent) -> Result<Value, HandlerError>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(GameEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &GameEvent) -> Result<Value, HandlerError> {
        (self.f)(event.clone()).await
    }
}

pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(GameEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Outcome of one handler for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResult {
    pub handler_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct Registration {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct Registry {
    durable: HashMap<String, Vec<Registration>>,
    once: HashMap<String, Vec<Registration>>,
}

impl Registry {
    fn remove(&mut self, event_type: &str, id: HandlerId) -> bool {
        let mut removed = false;
        for table in [&mut self.durable, &mut self.once] {
            if let Some(list) = table.get_mut(event_type) {
                let before = list.len();
                list.retain(|r| r.id != id);
                removed |= list.len() != before;
                if list.is_empty() {
                    table.remove(event_type);
                }
            }
        }
        removed
    }

    /// Handlers to run for `event_type`, in dispatch order. Once-handlers are
    /// taken out of the registry here.
    fn snapshot(&mut self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let mut handlers: Vec<Arc<dyn EventHandler>> = Vec::new();

        if let Some(list) = self.durable.get(event_type) {
            handlers.extend(list.iter().map(|r| r.handler.clone()));
        }
        if let Some(list) = self.once.remove(event_type) {
            handlers.extend(list.into_iter().map(|r| r.handler));
        }
        if event_type != event_types::WILDCARD {
            if let Some(list) = self.durable.get(event_types::WILDCARD) {
                handlers.extend(list.iter().map(|r| r.handler.clone()));
            }
            if let Some(list) = self.once.remove(event_types::WILDCARD) {
                handlers.extend(list.into_iter().map(|r| r.handler));
            }
        }

        handlers
    }

    fn count(&self, event_type: &str) -> usize {
        self.durable.get(event_type).map_or(0, Vec::len)
            + self.once.get(event_type).map_or(0, Vec::len)
    }
}

struct Inner {
    registry: RwLock<Registry>,
    history: RwLock<VecDeque<GameEvent>>,
    history_capacity: usize,
    next_id: AtomicU64,
    clock: Arc<dyn ClockPort>,
}

/// Cheap to clone; clones share handlers and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(clock: Arc<dyn ClockPort>, history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                history: RwLock::new(VecDeque::with_capacity(history_capacity)),
                history_capacity,
                next_id: AtomicU64::new(1),
                clock,
            }),
        }
    }

    /// A handle that does not keep the bus alive. Components registered on
    /// the bus hold this to emit follow-up events without a reference cycle.
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        self.register(event_type, handler, false).await
    }

    /// Like [`subscribe`](Self::subscribe), but the handler runs for at most
    /// one event and is then deregistered.
    pub async fn subscribe_once(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        self.register(event_type, handler, true).await
    }

    async fn register(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) -> Subscription {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            event_type = event_type,
            handler = handler.name(),
            once = once,
            "Handler subscribed"
        );

        let mut registry = self.inner.registry.write().await;
        let table = if once {
            &mut registry.once
        } else {
            &mut registry.durable
        };
        table
            .entry(event_type.to_string())
            .or_default()
            .push(Registration { id, handler });

        Subscription {
            bus: self.clone(),
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Remove a handler. Unknown ids are ignored. Returns whether anything
    /// was removed.
    pub async fn unsubscribe(&self, event_type: &str, id: HandlerId) -> bool {
        self.inner.registry.write().await.remove(event_type, id)
    }

    /// Build an event stamped with the bus clock and dispatch it.
    pub async fn emit(&self, event_type: &str, data: EventData) -> Vec<HandlerResult> {
        let event = GameEvent::new(event_type, data, self.inner.clock.now());
        self.publish(event).await
    }

    /// Dispatch an already built event.
    pub async fn publish(&self, event: GameEvent) -> Vec<HandlerResult> {
        self.record(&event).await;

        let handlers = {
            let mut registry = self.inner.registry.write().await;
            registry.snapshot(&event.event_type)
        };

        if handlers.is_empty() {
            tracing::debug!(event_type = %event.event_type, "No handlers for event");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            results.push(run_handler(handler.as_ref(), &event).await);
        }
        results
    }

    async fn record(&self, event: &GameEvent) {
        let mut history = self.inner.history.write().await;
        history.push_back(event.clone());
        while history.len() > self.inner.history_capacity {
            history.pop_front();
        }
    }

    /// Up to `limit` most recent events, oldest first.
    pub async fn get_event_history(&self, limit: usize) -> Vec<GameEvent> {
        let history = self.inner.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Up to `limit` most recent events of one type, oldest first.
    pub async fn get_events_by_type(&self, event_type: &str, limit: usize) -> Vec<GameEvent> {
        let history = self.inner.history.read().await;
        let mut matching: Vec<GameEvent> = history
            .iter()
            .rev()
            .filter(|e| e.is(event_type))
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.inner.registry.read().await.count(event_type)
    }

    pub async fn clear_history(&self) {
        self.inner.history.write().await.clear();
    }

    pub async fn clear_handlers(&self) {
        *self.inner.registry.write().await = Registry::default();
    }
}

async fn run_handler(handler: &dyn EventHandler, event: &GameEvent) -> HandlerResult {
    let name = handler.name().to_string();
    let outcome = AssertUnwindSafe(handler.handle(event))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

    match outcome {
        Ok(value) => HandlerResult {
            handler_name: name,
            success: true,
            result: Some(value),
            error: None,
        },
        Err(e) => {
            tracing::error!(
                handler = %name,
                event_type = %event.event_type,
                event_id = %event.id,
                error = %e,
                "Event handler failed"
            );
            HandlerResult {
                handler_name: name,
                success: false,
                result: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Non-owning bus handle. Emitting after the bus is gone is a no-op.
#[derive(Clone, Default)]
pub struct WeakEventBus {
    inner: Weak<Inner>,
}

impl WeakEventBus {
    pub async fn emit(&self, event_type: &str, data: EventData) -> Vec<HandlerResult> {
        match self.inner.upgrade() {
            Some(inner) => EventBus { inner }.emit(event_type, data).await,
            None => {
                tracing::debug!(event_type = event_type, "Event bus dropped, event discarded");
                Vec::new()
            }
        }
    }
}

/// Returned by `subscribe`; call [`unsubscribe`](Self::unsubscribe) to
/// remove the handler. Dropping it leaves the handler registered.
pub struct Subscription {
    bus: EventBus,
    event_type: String,
    id: HandlerId,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub async fn unsubscribe(self) -> bool {
        self.bus.unsubscribe(&self.event_type, self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(FixedClock(Utc::now())), 100)
    }

    fn recording(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn EventHandler> {
        handler_fn(name, move |event: GameEvent| {
            let log = log.clone();
            async move {
                log.lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(format!("{name}:{}", event.event_type));
                Ok(json!(name))
            }
        })
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_next() {
        let bus = bus();
        bus.subscribe(
            "location_visited",
            handler_fn("broken", |_event: GameEvent| async {
                Err(HandlerError::InvalidPayload("missing location_id".into()))
            }),
        )
        .await;
        bus.subscribe(
            "location_visited",
            handler_fn("healthy", |_event: GameEvent| async { Ok(json!({ "ok": true })) }),
        )
        .await;

        let results = bus.emit("location_visited", EventData::new()).await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert_eq!(results[0].handler_name, "broken");
        assert!(results[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("missing location_id")));
        assert!(results[1].success);
        assert_eq!(results[1].result, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn panicking_handler_is_recorded() {
        let bus = bus();
        bus.subscribe(
            "item_obtained",
            handler_fn("panics", |_event: GameEvent| async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            }),
        )
        .await;
        bus.subscribe(
            "item_obtained",
            handler_fn("after", |_event: GameEvent| async { Ok(Value::Null) }),
        )
        .await;

        let results = bus.emit("item_obtained", EventData::new()).await;

        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().is_some_and(|e| e.contains("boom")));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn dispatch_order_is_exact_then_once_then_wildcard() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(event_types::WILDCARD, recording("wild", log.clone()))
            .await;
        bus.subscribe_once("npc_interaction", recording("once", log.clone()))
            .await;
        bus.subscribe("npc_interaction", recording("durable", log.clone()))
            .await;

        bus.emit("npc_interaction", EventData::new()).await;
        bus.emit("npc_interaction", EventData::new()).await;

        assert_eq!(
            entries(&log),
            vec![
                "durable:npc_interaction",
                "once:npc_interaction",
                "wild:npc_interaction",
                "durable:npc_interaction",
                "wild:npc_interaction",
            ]
        );
        assert_eq!(bus.handler_count("npc_interaction").await, 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        let subscription = bus
            .subscribe("item_obtained", recording("a", log.clone()))
            .await;
        let id = subscription.id();

        assert!(subscription.unsubscribe().await);
        assert!(!bus.unsubscribe("item_obtained", id).await);

        let results = bus.emit("item_obtained", EventData::new()).await;
        assert!(results.is_empty());
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn history_is_bounded_and_most_recent_last() {
        let bus = EventBus::new(Arc::new(FixedClock(Utc::now())), 3);
        for i in 0..5 {
            let mut data = EventData::new();
            data.insert("n".into(), json!(i));
            let event_type = if i % 2 == 0 { "even" } else { "odd" };
            bus.emit(event_type, data).await;
        }

        let history = bus.get_event_history(10).await;
        let ns: Vec<i64> = history.iter().filter_map(|e| e.data["n"].as_i64()).collect();
        assert_eq!(ns, vec![2, 3, 4]);

        let last_two = bus.get_event_history(2).await;
        assert_eq!(last_two[1].data["n"], json!(4));

        let evens = bus.get_events_by_type("even", 10).await;
        assert_eq!(evens.len(), 2);
        assert_eq!(evens[0].data["n"], json!(2));

        bus.clear_history().await;
        assert!(bus.get_event_history(10).await.is_empty());
    }

    #[tokio::test]
    async fn handlers_can_emit_follow_up_events() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        let weak = bus.downgrade();
        bus.subscribe(
            "quest_completed",
            handler_fn("relay", move |_event: GameEvent| {
                let weak = weak.clone();
                async move {
                    let nested = weak.emit("follow_up", EventData::new()).await;
                    Ok(json!(nested.len()))
                }
            }),
        )
        .await;
        bus.subscribe("follow_up", recording("listener", log.clone()))
            .await;

        let results = bus.emit("quest_completed", EventData::new()).await;

        assert_eq!(results[0].result, Some(json!(1)));
        assert_eq!(entries(&log), vec!["listener:follow_up"]);
        assert_eq!(bus.get_event_history(10).await.len(), 2);
    }

    #[tokio::test]
    async fn clear_handlers_removes_everything() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("a", recording("a", log.clone())).await;
        bus.subscribe_once("a", recording("b", log.clone())).await;
        assert_eq!(bus.handler_count("a").await, 2);

        bus.clear_handlers().await;
        assert_eq!(bus.handler_count("a").await, 0);
        assert!(bus.emit("a", EventData::new()).await.is_empty());
    }
}
