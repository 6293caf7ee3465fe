//! Quest progression.
//!
//! For each gameplay event, checks the acting character's active quests:
//! requirements of the current stage that the event satisfies are completed,
//! and a stage whose blocking requirements are all complete is cleared. A
//! quest moves at most one stage per event.

mod predicates;

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use talekeeper_domain::events::object;
use talekeeper_domain::{
    event_types, CharacterId, CompletionRecord, GameEvent, NarrativeEventType, NarrativePriority,
    NarrativeQueueItem, Quest, QuestId, QuestRequirement, QuestStatus, RequirementId,
    StageAdvance,
};
use tracing::instrument;

pub use predicates::is_satisfied;

use crate::infrastructure::event_bus::WeakEventBus;
use crate::infrastructure::ports::{ClockPort, QuestRepo, RepoError};
use crate::use_cases::narrative_queue::NarrativeQueue;

/// What one progress check changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestProgressReport {
    pub requirements_completed: Vec<RequirementId>,
    pub stages_advanced: Vec<StageAdvanced>,
    pub quests_completed: Vec<QuestId>,
}

impl QuestProgressReport {
    pub fn is_empty(&self) -> bool {
        self.requirements_completed.is_empty()
            && self.stages_advanced.is_empty()
            && self.quests_completed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageAdvanced {
    pub quest_id: QuestId,
    pub from_stage: u32,
    pub to_stage: u32,
}

pub struct QuestProgressChecker {
    quests: Arc<dyn QuestRepo>,
    queue: Arc<NarrativeQueue>,
    events: WeakEventBus,
    clock: Arc<dyn ClockPort>,
}

impl QuestProgressChecker {
    pub fn new(
        quests: Arc<dyn QuestRepo>,
        queue: Arc<NarrativeQueue>,
        events: WeakEventBus,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            quests,
            queue,
            events,
            clock,
        }
    }

    /// Evaluate `event` against every active quest of `character_id`.
    ///
    /// Only loading the quest list can fail the call; a fault inside one
    /// quest is logged and the remaining quests are still checked.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = %event.id))]
    pub async fn check_quest_progress(
        &self,
        character_id: CharacterId,
        event: &GameEvent,
    ) -> Result<QuestProgressReport, RepoError> {
        let quests = self
            .quests
            .list_by_status(character_id, QuestStatus::Active)
            .await?;

        let mut report = QuestProgressReport::default();
        for quest in quests {
            let quest_id = quest.id;
            if let Err(e) = self.check_quest(quest, event, &mut report).await {
                tracing::warn!(quest_id = %quest_id, error = %e, "Quest progress check failed");
            }
        }

        if !report.is_empty() {
            tracing::info!(
                requirements = report.requirements_completed.len(),
                stages = report.stages_advanced.len(),
                completed = report.quests_completed.len(),
                "Quest progress recorded"
            );
        }
        Ok(report)
    }

    async fn check_quest(
        &self,
        quest: Quest,
        event: &GameEvent,
        report: &mut QuestProgressReport,
    ) -> Result<(), RepoError> {
        if !quest.is_active() {
            return Ok(());
        }

        let mut requirements = self
            .quests
            .list_requirements(quest.id, quest.current_stage)
            .await?;
        let now = self.clock.now();

        for requirement in requirements.iter_mut().filter(|r| !r.is_complete()) {
            if !is_satisfied(requirement.requirement_type, &requirement.params, event) {
                continue;
            }

            let mut updated = requirement.clone();
            updated.complete(CompletionRecord::from_event(event), now);
            match self.quests.save_requirement(&updated).await {
                Ok(()) => {
                    tracing::debug!(
                        quest_id = %quest.id,
                        requirement_id = %updated.id,
                        requirement_type = %updated.requirement_type,
                        "Requirement completed"
                    );
                    report.requirements_completed.push(updated.id);
                    *requirement = updated;
                }
                Err(e) => {
                    tracing::warn!(
                        quest_id = %quest.id,
                        requirement_id = %requirement.id,
                        error = %e,
                        "Failed to persist completed requirement"
                    );
                }
            }
        }

        // Checked on every pass: a stage left cleared by an earlier failed
        // save advances on the next event.
        if stage_cleared(&requirements) {
            self.advance(quest, report).await?;
        }
        Ok(())
    }

    /// Complete a requirement by hand (DM ruling, custom condition), then run
    /// the usual stage check if it belongs to the quest's current stage.
    #[instrument(skip(self, note))]
    pub async fn complete_requirement_manually(
        &self,
        requirement_id: RequirementId,
        note: &str,
    ) -> Result<QuestProgressReport, RepoError> {
        let mut requirement = self
            .quests
            .get_requirement(requirement_id)
            .await?
            .ok_or_else(|| RepoError::not_found("QuestRequirement", requirement_id))?;

        let mut report = QuestProgressReport::default();
        if requirement.is_complete() {
            tracing::debug!("Requirement already complete");
            return Ok(report);
        }

        let quest = self
            .quests
            .get(requirement.quest_id)
            .await?
            .ok_or_else(|| RepoError::not_found("Quest", requirement.quest_id))?;
        if !quest.is_active() {
            return Err(RepoError::constraint(format!(
                "quest {} is {}; its requirements are frozen",
                quest.id, quest.status
            )));
        }

        requirement.complete(CompletionRecord::manual(note), self.clock.now());
        self.quests.save_requirement(&requirement).await?;
        report.requirements_completed.push(requirement.id);

        if requirement.stage_index == quest.current_stage {
            let requirements = self
                .quests
                .list_requirements(quest.id, quest.current_stage)
                .await?;
            if stage_cleared(&requirements) {
                self.advance(quest, &mut report).await?;
            }
        }

        Ok(report)
    }

    async fn advance(
        &self,
        mut quest: Quest,
        report: &mut QuestProgressReport,
    ) -> Result<(), RepoError> {
        let cleared_stage = quest.current_stage().cloned().unwrap_or_default();
        let advance = quest
            .advance_stage(self.clock.now())
            .map_err(RepoError::constraint)?;
        self.quests.save(&quest).await?;

        match advance {
            StageAdvance::Advanced { from, to } => {
                let next_stage = quest.stage(to).cloned().unwrap_or_default();
                tracing::info!(
                    quest_id = %quest.id,
                    from_stage = from,
                    to_stage = to,
                    "Quest stage advanced"
                );

                let item = NarrativeQueueItem::new(
                    quest.character_id,
                    NarrativeEventType::QuestStageAdvanced,
                    NarrativePriority::Normal,
                    format!("Quest progress: {}", quest.title),
                    format!(
                        "\"{}\" is done ({}). Next: \"{}\" - {}",
                        cleared_stage.name,
                        cleared_stage.description,
                        next_stage.name,
                        next_stage.description
                    ),
                    self.clock.now(),
                )
                .with_campaign(quest.campaign_id)
                .with_quest(quest.id)
                .with_context(object(json!({
                    "quest_id": quest.id,
                    "quest_title": quest.title,
                    "from_stage": from,
                    "to_stage": to,
                    "completed_stage": cleared_stage,
                    "next_stage": next_stage,
                })));
                self.enqueue(item).await;

                report.stages_advanced.push(StageAdvanced {
                    quest_id: quest.id,
                    from_stage: from,
                    to_stage: to,
                });

                self.events
                    .emit(
                        event_types::QUEST_STAGE_ADVANCED,
                        object(json!({
                            "character_id": quest.character_id,
                            "quest_id": quest.id,
                            "quest_title": quest.title,
                            "from_stage": from,
                            "to_stage": to,
                        })),
                    )
                    .await;
            }
            StageAdvance::QuestCompleted { final_stage } => {
                tracing::info!(quest_id = %quest.id, "Quest completed");

                let item = NarrativeQueueItem::new(
                    quest.character_id,
                    NarrativeEventType::QuestCompleted,
                    NarrativePriority::High,
                    format!("Quest completed: {}", quest.title),
                    format!(
                        "The final stage \"{}\" is done. {}",
                        cleared_stage.name, cleared_stage.description
                    ),
                    self.clock.now(),
                )
                .with_campaign(quest.campaign_id)
                .with_quest(quest.id)
                .with_context(object(json!({
                    "quest_id": quest.id,
                    "quest_title": quest.title,
                    "final_stage": final_stage,
                    "rewards": quest.rewards,
                })));
                self.enqueue(item).await;

                report.quests_completed.push(quest.id);

                self.events
                    .emit(
                        event_types::QUEST_COMPLETED,
                        object(json!({
                            "character_id": quest.character_id,
                            "quest_id": quest.id,
                            "quest_title": quest.title,
                            "rewards": quest.rewards,
                        })),
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn enqueue(&self, item: NarrativeQueueItem) {
        let quest_id = item.related_quest_id;
        if let Err(e) = self.queue.add_to_queue(item).await {
            tracing::warn!(quest_id = ?quest_id, error = %e, "Failed to queue quest narrative");
        }
    }
}

/// Every non-optional requirement of the stage is complete.
fn stage_cleared(requirements: &[QuestRequirement]) -> bool {
    requirements.iter().all(|r| !r.blocks_stage())
}
