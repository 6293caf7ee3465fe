//! Bus wiring for the progression checkers.
//!
//! Both checkers listen to the same gameplay surface; the quest checker is
//! registered first so it always runs before the companion matcher for a
//! given event.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use talekeeper_domain::events::payload::{get_i64, get_str};
use talekeeper_domain::{event_types, CompanionId, GameEvent};

use crate::infrastructure::event_bus::{EventBus, EventHandler, HandlerError, Subscription};
use crate::infrastructure::ports::RepoError;
use crate::use_cases::companion_triggers::{CompanionTriggerMatcher, TriggerContext};
use crate::use_cases::quest_progress::QuestProgressChecker;

pub const QUEST_PROGRESS_HANDLER: &str = "quest_progress_checker";
pub const COMPANION_TRIGGER_HANDLER: &str = "companion_trigger_matcher";

pub struct QuestProgressHandler {
    checker: Arc<QuestProgressChecker>,
}

impl QuestProgressHandler {
    pub fn new(checker: Arc<QuestProgressChecker>) -> Self {
        Self { checker }
    }
}

#[async_trait]
impl EventHandler for QuestProgressHandler {
    fn name(&self) -> &str {
        QUEST_PROGRESS_HANDLER
    }

    async fn handle(&self, event: &GameEvent) -> Result<Value, HandlerError> {
        let Some(character_id) = event.character_id() else {
            return Ok(skipped("no character_id in payload"));
        };
        let report = self.checker.check_quest_progress(character_id, event).await?;
        to_value(&report)
    }
}

pub struct CompanionTriggerHandler {
    matcher: Arc<CompanionTriggerMatcher>,
}

impl CompanionTriggerHandler {
    pub fn new(matcher: Arc<CompanionTriggerMatcher>) -> Self {
        Self { matcher }
    }
}

#[async_trait]
impl EventHandler for CompanionTriggerHandler {
    fn name(&self) -> &str {
        COMPANION_TRIGGER_HANDLER
    }

    async fn handle(&self, event: &GameEvent) -> Result<Value, HandlerError> {
        let Some(character_id) = event.character_id() else {
            return Ok(skipped("no character_id in payload"));
        };

        let report = if event.is(event_types::COMPANION_LOYALTY_CHANGED) {
            let companion_id: CompanionId = get_str(&event.data, "companion_id")
                .ok_or_else(|| HandlerError::InvalidPayload("missing companion_id".into()))?
                .parse()?;
            let new_loyalty = loyalty(event, "new_loyalty")?
                .ok_or_else(|| HandlerError::InvalidPayload("missing new_loyalty".into()))?;
            let old_loyalty = loyalty(event, "old_loyalty")?;
            self.matcher
                .check_secret_reveals(character_id, companion_id, old_loyalty, new_loyalty)
                .await?
        } else {
            self.matcher
                .check_companion_triggers(character_id, &TriggerContext::from_event(event))
                .await?
        };
        to_value(&report)
    }
}

fn loyalty(event: &GameEvent, key: &str) -> Result<Option<i32>, HandlerError> {
    if !event.data.contains_key(key) {
        return Ok(None);
    }
    get_i64(&event.data, key)
        .and_then(|value| i32::try_from(value).ok())
        .map(Some)
        .ok_or_else(|| HandlerError::InvalidPayload(format!("{key} is not an integer")))
}

fn skipped(reason: &str) -> Value {
    json!({ "skipped": reason })
}

fn to_value<T: Serialize>(report: &T) -> Result<Value, HandlerError> {
    serde_json::to_value(report).map_err(|e| RepoError::serialization(e).into())
}

/// Subscribe both checkers. Returns every subscription so callers can tear
/// the wiring down again.
pub async fn register(
    bus: &EventBus,
    checker: Arc<QuestProgressChecker>,
    matcher: Arc<CompanionTriggerMatcher>,
) -> Vec<Subscription> {
    let quest: Arc<dyn EventHandler> = Arc::new(QuestProgressHandler::new(checker));
    let companion: Arc<dyn EventHandler> = Arc::new(CompanionTriggerHandler::new(matcher));

    let mut subscriptions = Vec::with_capacity(event_types::GAMEPLAY_EVENTS.len() * 2 + 1);
    for event_type in event_types::GAMEPLAY_EVENTS {
        subscriptions.push(bus.subscribe(event_type, quest.clone()).await);
    }
    for event_type in event_types::GAMEPLAY_EVENTS {
        subscriptions.push(bus.subscribe(event_type, companion.clone()).await);
    }
    subscriptions.push(
        bus.subscribe(event_types::COMPANION_LOYALTY_CHANGED, companion)
            .await,
    );

    tracing::info!(count = subscriptions.len(), "Progression handlers registered");
    subscriptions
}
