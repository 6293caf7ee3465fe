//! Companion backstory triggers.
//!
//! Dormant story threads wake when one of their trigger keywords shows up in
//! play. Secrets surface when loyalty climbs past their threshold. Both are
//! one-way: an active thread never goes back to dormant and a revealed
//! secret is never revealed twice.

mod matching;

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use talekeeper_domain::events::object;
use talekeeper_domain::{
    event_types, CharacterId, Companion, CompanionId, NarrativeEventType, NarrativePriority,
    NarrativeQueueItem, SecretId, StoryThreadId, ThreadIntensity,
};
use tracing::instrument;

pub use matching::TriggerContext;

use crate::infrastructure::event_bus::WeakEventBus;
use crate::infrastructure::ports::{ClockPort, CompanionRepo, RepoError};
use crate::use_cases::narrative_queue::NarrativeQueue;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompanionTriggerReport {
    pub threads_activated: Vec<ThreadActivation>,
    pub secrets_revealed: Vec<SecretReveal>,
}

impl CompanionTriggerReport {
    pub fn is_empty(&self) -> bool {
        self.threads_activated.is_empty() && self.secrets_revealed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadActivation {
    pub companion_id: CompanionId,
    pub thread_id: StoryThreadId,
    pub trigger: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretReveal {
    pub companion_id: CompanionId,
    pub secret_id: SecretId,
}

/// Queue priority of a companion reaction.
pub fn reaction_priority(intensity: ThreadIntensity) -> NarrativePriority {
    match intensity {
        ThreadIntensity::High => NarrativePriority::High,
        ThreadIntensity::Medium => NarrativePriority::Normal,
        ThreadIntensity::Low => NarrativePriority::Low,
    }
}

pub struct CompanionTriggerMatcher {
    companions: Arc<dyn CompanionRepo>,
    queue: Arc<NarrativeQueue>,
    events: WeakEventBus,
    clock: Arc<dyn ClockPort>,
}

impl CompanionTriggerMatcher {
    pub fn new(
        companions: Arc<dyn CompanionRepo>,
        queue: Arc<NarrativeQueue>,
        events: WeakEventBus,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            companions,
            queue,
            events,
            clock,
        }
    }

    /// Wake every dormant thread, across the character's active companions,
    /// that has a trigger present in `context`.
    #[instrument(skip(self, context))]
    pub async fn check_companion_triggers(
        &self,
        character_id: CharacterId,
        context: &TriggerContext,
    ) -> Result<CompanionTriggerReport, RepoError> {
        let companions = self.companions.list_active(character_id).await?;
        let mut report = CompanionTriggerReport::default();

        for companion in companions {
            if companion.backstory.is_none() {
                continue;
            }
            let companion_id = companion.id;
            if let Err(e) = self.activate_threads(companion, context, &mut report).await {
                tracing::warn!(
                    companion_id = %companion_id,
                    error = %e,
                    "Companion trigger check failed"
                );
            }
        }

        Ok(report)
    }

    async fn activate_threads(
        &self,
        mut companion: Companion,
        context: &TriggerContext,
        report: &mut CompanionTriggerReport,
    ) -> Result<(), RepoError> {
        let now = self.clock.now();
        let mut activated = Vec::new();

        if let Some(backstory) = companion.backstory.as_mut() {
            for thread in backstory
                .unresolved_threads
                .iter_mut()
                .filter(|t| t.is_dormant())
            {
                let Some(trigger) = context.first_match(&thread.activation_triggers) else {
                    continue;
                };
                let trigger = trigger.to_string();
                if thread.activate(now) {
                    activated.push((thread.clone(), trigger));
                }
            }
        }

        if activated.is_empty() {
            return Ok(());
        }

        // Nothing is queued or emitted for threads that failed to persist.
        self.companions.save(&companion).await?;

        for (thread, trigger) in activated {
            tracing::info!(
                companion_id = %companion.id,
                thread_id = %thread.id,
                trigger = %trigger,
                "Companion story thread activated"
            );

            let title = if thread.title.is_empty() {
                format!("{} is stirred by the past", companion.name)
            } else {
                format!("{}: {}", companion.name, thread.title)
            };
            let item = NarrativeQueueItem::new(
                companion.character_id,
                NarrativeEventType::CompanionReaction,
                reaction_priority(thread.intensity),
                title,
                thread.description.clone(),
                now,
            )
            .with_companion(companion.id)
            .with_thread(thread.id)
            .with_context(object(json!({
                "companion_name": companion.name,
                "thread_type": thread.thread_type,
                "intensity": thread.intensity,
                "trigger": trigger,
            })));
            let item = match &companion.npc_id {
                Some(npc_id) => item.with_npc(npc_id.clone()),
                None => item,
            };
            if let Err(e) = self.queue.add_to_queue(item).await {
                tracing::warn!(
                    thread_id = %thread.id,
                    error = %e,
                    "Failed to queue companion reaction"
                );
            }

            self.events
                .emit(
                    event_types::COMPANION_THREAD_ACTIVATED,
                    object(json!({
                        "character_id": companion.character_id,
                        "companion_id": companion.id,
                        "thread_id": thread.id,
                        "trigger": trigger,
                    })),
                )
                .await;

            report.threads_activated.push(ThreadActivation {
                companion_id: companion.id,
                thread_id: thread.id,
                trigger,
            });
        }

        Ok(())
    }

    /// Reveal every secret whose threshold lies in `(old, new]` and record
    /// `new` as the companion's loyalty. When `old_loyalty` is unknown the
    /// stored loyalty is used.
    #[instrument(skip(self))]
    pub async fn check_secret_reveals(
        &self,
        character_id: CharacterId,
        companion_id: CompanionId,
        old_loyalty: Option<i32>,
        new_loyalty: i32,
    ) -> Result<CompanionTriggerReport, RepoError> {
        let mut companion = self
            .companions
            .get(companion_id)
            .await?
            .ok_or_else(|| RepoError::not_found("Companion", companion_id))?;

        if companion.character_id != character_id {
            return Err(RepoError::constraint(format!(
                "companion {} does not travel with character {}",
                companion_id, character_id
            )));
        }

        let old_loyalty = old_loyalty.unwrap_or(companion.loyalty);
        let now = self.clock.now();
        let mut revealed = Vec::new();

        if let Some(backstory) = companion.backstory.as_mut() {
            for secret in backstory.secrets.iter_mut() {
                if secret.is_crossed_by(old_loyalty, new_loyalty) && secret.reveal(now) {
                    revealed.push(secret.clone());
                }
            }
        }
        companion.loyalty = new_loyalty;
        // A backstory that failed to decode loads empty; only a reveal
        // writes it back.
        if revealed.is_empty() {
            self.companions
                .update_loyalty(companion.id, new_loyalty)
                .await?;
        } else {
            self.companions.save(&companion).await?;
        }

        let mut report = CompanionTriggerReport::default();
        for secret in revealed {
            tracing::info!(
                companion_id = %companion.id,
                secret_id = %secret.id,
                threshold = secret.reveal_loyalty_threshold,
                "Companion secret revealed"
            );

            let item = NarrativeQueueItem::new(
                companion.character_id,
                NarrativeEventType::CompanionSecretRevealed,
                NarrativePriority::High,
                format!("{} opens up", companion.name),
                secret.content.clone(),
                now,
            )
            .with_companion(companion.id)
            .with_context(object(json!({
                "companion_name": companion.name,
                "secret_id": secret.id,
                "loyalty": new_loyalty,
                "threshold": secret.reveal_loyalty_threshold,
            })));
            if let Err(e) = self.queue.add_to_queue(item).await {
                tracing::warn!(secret_id = %secret.id, error = %e, "Failed to queue secret reveal");
            }

            self.events
                .emit(
                    event_types::COMPANION_SECRET_REVEALED,
                    object(json!({
                        "character_id": companion.character_id,
                        "companion_id": companion.id,
                        "secret_id": secret.id,
                    })),
                )
                .await;

            report.secrets_revealed.push(SecretReveal {
                companion_id: companion.id,
                secret_id: secret.id,
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::memory_store::InMemoryStore;
    use crate::infrastructure::ports::MockCompanionRepo;
    use chrono::{DateTime, TimeZone, Utc};
    use talekeeper_domain::{
        CompanionBackstory, CompanionSecret, CompanionStatus, NarrativeItemStatus, StoryThread,
        ThreadStatus,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 21, 0, 0).single().expect("valid")
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        bus: EventBus,
        matcher: CompanionTriggerMatcher,
        queue: Arc<NarrativeQueue>,
    }

    fn harness() -> Harness {
        let clock: Arc<dyn ClockPort> = Arc::new(FixedClock(now()));
        let store = Arc::new(InMemoryStore::new());
        let bus = EventBus::new(clock.clone(), 100);
        let queue = Arc::new(NarrativeQueue::new(store.clone(), clock.clone()));
        let matcher =
            CompanionTriggerMatcher::new(store.clone(), queue.clone(), bus.downgrade(), clock);
        Harness {
            store,
            bus,
            matcher,
            queue,
        }
    }

    fn companion_with(character_id: CharacterId, backstory: CompanionBackstory) -> Companion {
        Companion::new(character_id, "Mira", now()).with_backstory(backstory)
    }

    fn thread(triggers: &[&str], intensity: ThreadIntensity) -> StoryThread {
        StoryThread::new(
            CompanionId::new(),
            "vendetta",
            "The goblins who burned her village are close",
            triggers.iter().map(|t| t.to_string()).collect(),
        )
        .with_title("Ashes of Brindle")
        .with_intensity(intensity)
    }

    fn content(text: &str) -> TriggerContext {
        TriggerContext {
            content: Some(text.to_string()),
            ..TriggerContext::default()
        }
    }

    async fn stored(h: &Harness, id: CompanionId) -> Companion {
        CompanionRepo::get(h.store.as_ref(), id)
            .await
            .expect("get")
            .expect("exists")
    }

    #[tokio::test]
    async fn trigger_matches_case_insensitively() {
        let h = harness();
        let character_id = CharacterId::new();
        let companion = companion_with(
            character_id,
            CompanionBackstory::default()
                .with_thread(thread(&["goblin camp"], ThreadIntensity::High)),
        );
        CompanionRepo::save(h.store.as_ref(), &companion).await.expect("save");

        let report = h
            .matcher
            .check_companion_triggers(character_id, &content("You discover a Goblin Camp"))
            .await
            .expect("check");
        assert_eq!(report.threads_activated.len(), 1);
        assert_eq!(report.threads_activated[0].trigger, "goblin camp");

        let stored = stored(&h, companion.id).await;
        let thread = &stored.backstory.expect("backstory").unresolved_threads[0];
        assert_eq!(thread.status, ThreadStatus::Active);
        assert_eq!(thread.activated_at, Some(now()));

        let items = h.queue.get_pending_items(character_id).await.expect("pending");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].event_type, NarrativeEventType::CompanionReaction);
        assert_eq!(items[0].priority, NarrativePriority::High);
        assert_eq!(items[0].related_companion_id, Some(companion.id));
    }

    #[tokio::test]
    async fn activation_happens_once() {
        let h = harness();
        let character_id = CharacterId::new();
        let companion = companion_with(
            character_id,
            CompanionBackstory::default().with_thread(thread(&["goblin"], ThreadIntensity::Low)),
        );
        CompanionRepo::save(h.store.as_ref(), &companion).await.expect("save");

        let ctx = content("goblin tracks everywhere");
        let first = h.matcher.check_companion_triggers(character_id, &ctx).await.expect("check");
        let second = h.matcher.check_companion_triggers(character_id, &ctx).await.expect("check");
        assert_eq!(first.threads_activated.len(), 1);
        assert!(second.is_empty());
        assert_eq!(h.queue.pending_count(character_id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn empty_trigger_list_never_activates() {
        let h = harness();
        let character_id = CharacterId::new();
        let companion = companion_with(
            character_id,
            CompanionBackstory::default()
                .with_thread(thread(&[], ThreadIntensity::High))
                .with_thread(thread(&["", "   "], ThreadIntensity::High)),
        );
        CompanionRepo::save(h.store.as_ref(), &companion).await.expect("save");

        let report = h
            .matcher
            .check_companion_triggers(
                character_id,
                &content("Anything and everything happens here"),
            )
            .await
            .expect("check");
        assert!(report.is_empty());
        assert_eq!(h.queue.pending_count(character_id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn inactive_companions_are_ignored() {
        let h = harness();
        let character_id = CharacterId::new();
        let mut companion = companion_with(
            character_id,
            CompanionBackstory::default().with_thread(thread(&["goblin"], ThreadIntensity::Medium)),
        );
        companion.status = CompanionStatus::Dismissed;
        CompanionRepo::save(h.store.as_ref(), &companion).await.expect("save");

        let report = h
            .matcher
            .check_companion_triggers(character_id, &content("goblin"))
            .await
            .expect("check");
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn secret_crossing_threshold() {
        let h = harness();
        let character_id = CharacterId::new();
        let companion = companion_with(
            character_id,
            CompanionBackstory::default()
                .with_secret(CompanionSecret::new("She is the lost heir", 50)),
        )
        .with_loyalty(40);
        CompanionRepo::save(h.store.as_ref(), &companion).await.expect("save");

        let low = h
            .matcher
            .check_secret_reveals(character_id, companion.id, Some(10), 20)
            .await
            .expect("check");
        assert!(low.is_empty());

        let crossed = h
            .matcher
            .check_secret_reveals(character_id, companion.id, Some(40), 60)
            .await
            .expect("check");
        assert_eq!(crossed.secrets_revealed.len(), 1);

        let again = h
            .matcher
            .check_secret_reveals(character_id, companion.id, Some(40), 60)
            .await
            .expect("check");
        assert!(again.is_empty());

        let stored = stored(&h, companion.id).await;
        assert_eq!(stored.loyalty, 60);
        let secret = &stored.backstory.expect("backstory").secrets[0];
        assert!(secret.revealed);
        assert_eq!(secret.revealed_at, Some(now()));

        let items = h.queue.get_pending_items(character_id).await.expect("pending");
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].event_type,
            NarrativeEventType::CompanionSecretRevealed
        );
        assert_eq!(items[0].priority, NarrativePriority::High);
        assert_eq!(items[0].status, NarrativeItemStatus::Pending);
        assert_eq!(
            h.bus
                .get_events_by_type(event_types::COMPANION_SECRET_REVEALED, 10)
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn stored_loyalty_used_when_old_value_missing() {
        let h = harness();
        let character_id = CharacterId::new();
        let companion = companion_with(
            character_id,
            CompanionBackstory::default().with_secret(CompanionSecret::new("Fled the order", 50)),
        )
        .with_loyalty(45);
        CompanionRepo::save(h.store.as_ref(), &companion).await.expect("save");

        let report = h
            .matcher
            .check_secret_reveals(character_id, companion.id, None, 55)
            .await
            .expect("check");
        assert_eq!(report.secrets_revealed.len(), 1);
    }

    #[tokio::test]
    async fn secret_reveal_rejects_foreign_companion() {
        let h = harness();
        let companion = companion_with(CharacterId::new(), CompanionBackstory::default());
        CompanionRepo::save(h.store.as_ref(), &companion).await.expect("save");

        let result = h
            .matcher
            .check_secret_reveals(CharacterId::new(), companion.id, Some(0), 100)
            .await;
        assert!(matches!(result, Err(RepoError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn failed_save_queues_nothing() {
        let character_id = CharacterId::new();
        let companion = companion_with(
            character_id,
            CompanionBackstory::default().with_thread(thread(&["bridge"], ThreadIntensity::Medium)),
        );

        let mut repo = MockCompanionRepo::new();
        repo.expect_list_active()
            .returning(move |_| Ok(vec![companion.clone()]));
        repo.expect_save()
            .times(1)
            .returning(|_| Err(RepoError::database("save_companion", "read-only database")));

        let clock: Arc<dyn ClockPort> = Arc::new(FixedClock(now()));
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(NarrativeQueue::new(store, clock.clone()));
        let matcher = CompanionTriggerMatcher::new(
            Arc::new(repo),
            queue.clone(),
            WeakEventBus::default(),
            clock,
        );

        let report = matcher
            .check_companion_triggers(character_id, &content("the bridge collapsed"))
            .await
            .expect("check");
        assert!(report.is_empty());
        assert_eq!(queue.pending_count(character_id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn loyalty_change_without_reveal_keeps_stored_backstory() {
        let character_id = CharacterId::new();
        let companion =
            companion_with(character_id, CompanionBackstory::default()).with_loyalty(50);
        let companion_id = companion.id;

        let mut repo = MockCompanionRepo::new();
        repo.expect_get()
            .returning(move |_| Ok(Some(companion.clone())));
        repo.expect_update_loyalty()
            .withf(move |id, loyalty| *id == companion_id && *loyalty == 55)
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_save().never();

        let clock: Arc<dyn ClockPort> = Arc::new(FixedClock(now()));
        let queue = Arc::new(NarrativeQueue::new(Arc::new(InMemoryStore::new()), clock.clone()));
        let matcher =
            CompanionTriggerMatcher::new(Arc::new(repo), queue, WeakEventBus::default(), clock);

        let report = matcher
            .check_secret_reveals(character_id, companion_id, Some(50), 55)
            .await
            .expect("check");
        assert!(report.is_empty());
    }

    #[test]
    fn intensity_maps_to_priority() {
        assert_eq!(
            reaction_priority(ThreadIntensity::High),
            NarrativePriority::High
        );
        assert_eq!(
            reaction_priority(ThreadIntensity::Medium),
            NarrativePriority::Normal
        );
        assert_eq!(
            reaction_priority(ThreadIntensity::Low),
            NarrativePriority::Low
        );
    }
}
