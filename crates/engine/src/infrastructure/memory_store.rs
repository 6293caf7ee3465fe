//! In-memory storage for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use talekeeper_domain::{
    CharacterId, Companion, CompanionId, NarrativeItemId, NarrativeItemStatus, NarrativeQueueItem,
    Quest, QuestId, QuestRequirement, QuestStatus, RequirementId,
};
use tokio::sync::RwLock;

use crate::infrastructure::ports::{CompanionRepo, NarrativeQueueRepo, QuestRepo, RepoError};

#[derive(Default)]
struct Tables {
    quests: HashMap<QuestId, Quest>,
    requirements: HashMap<RequirementId, QuestRequirement>,
    companions: HashMap<CompanionId, Companion>,
    /// Items keyed by id, each tagged with its insertion sequence.
    narrative_queue: HashMap<NarrativeItemId, (u64, NarrativeQueueItem)>,
    next_narrative_seq: u64,
}

/// Implements every repository port over plain maps. Data is lost on drop.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuestRepo for InMemoryStore {
    async fn get(&self, id: QuestId) -> Result<Option<Quest>, RepoError> {
        Ok(self.tables.read().await.quests.get(&id).cloned())
    }

    async fn save(&self, quest: &Quest) -> Result<(), RepoError> {
        self.tables
            .write()
            .await
            .quests
            .insert(quest.id, quest.clone());
        Ok(())
    }

    async fn list_by_status(
        &self,
        character_id: CharacterId,
        status: QuestStatus,
    ) -> Result<Vec<Quest>, RepoError> {
        let tables = self.tables.read().await;
        let mut quests: Vec<Quest> = tables
            .quests
            .values()
            .filter(|q| q.character_id == character_id && q.status == status)
            .cloned()
            .collect();
        quests.sort_by_key(|q| q.created_at);
        Ok(quests)
    }

    async fn get_requirement(
        &self,
        id: RequirementId,
    ) -> Result<Option<QuestRequirement>, RepoError> {
        Ok(self.tables.read().await.requirements.get(&id).cloned())
    }

    async fn save_requirement(&self, requirement: &QuestRequirement) -> Result<(), RepoError> {
        self.tables
            .write()
            .await
            .requirements
            .insert(requirement.id, requirement.clone());
        Ok(())
    }

    async fn list_requirements(
        &self,
        quest_id: QuestId,
        stage_index: u32,
    ) -> Result<Vec<QuestRequirement>, RepoError> {
        let tables = self.tables.read().await;
        let mut requirements: Vec<QuestRequirement> = tables
            .requirements
            .values()
            .filter(|r| r.quest_id == quest_id && r.stage_index == stage_index)
            .cloned()
            .collect();
        requirements.sort_by_key(|r| r.id);
        Ok(requirements)
    }
}

#[async_trait]
impl CompanionRepo for InMemoryStore {
    async fn get(&self, id: CompanionId) -> Result<Option<Companion>, RepoError> {
        Ok(self.tables.read().await.companions.get(&id).cloned())
    }

    async fn save(&self, companion: &Companion) -> Result<(), RepoError> {
        self.tables
            .write()
            .await
            .companions
            .insert(companion.id, companion.clone());
        Ok(())
    }

    async fn update_loyalty(&self, id: CompanionId, loyalty: i32) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        match tables.companions.get_mut(&id) {
            Some(companion) => {
                companion.loyalty = loyalty;
                Ok(())
            }
            None => Err(RepoError::not_found("Companion", id)),
        }
    }

    async fn list_active(&self, character_id: CharacterId) -> Result<Vec<Companion>, RepoError> {
        let tables = self.tables.read().await;
        let mut companions: Vec<Companion> = tables
            .companions
            .values()
            .filter(|c| c.character_id == character_id && c.is_active())
            .cloned()
            .collect();
        companions.sort_by_key(|c| c.recruited_at);
        Ok(companions)
    }
}

#[async_trait]
impl NarrativeQueueRepo for InMemoryStore {
    async fn insert(&self, item: &NarrativeQueueItem) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        if tables.narrative_queue.contains_key(&item.id) {
            return Err(RepoError::constraint(format!(
                "narrative item {} already queued",
                item.id
            )));
        }
        let seq = tables.next_narrative_seq;
        tables.next_narrative_seq += 1;
        tables.narrative_queue.insert(item.id, (seq, item.clone()));
        Ok(())
    }

    async fn get(&self, id: NarrativeItemId) -> Result<Option<NarrativeQueueItem>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.narrative_queue.get(&id).map(|(_, i)| i.clone()))
    }

    async fn list_by_status(
        &self,
        character_id: CharacterId,
        status: NarrativeItemStatus,
    ) -> Result<Vec<NarrativeQueueItem>, RepoError> {
        let tables = self.tables.read().await;
        let mut items: Vec<(u64, NarrativeQueueItem)> = tables
            .narrative_queue
            .values()
            .filter(|(_, i)| i.character_id == character_id)
            .filter(|(_, i)| i.status == status)
            .cloned()
            .collect();
        items.sort_by_key(|(seq, _)| *seq);
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }

    async fn update(&self, item: &NarrativeQueueItem) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        match tables.narrative_queue.get_mut(&item.id) {
            Some((_, existing)) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(RepoError::not_found("NarrativeQueueItem", item.id)),
        }
    }

    async fn expire_pending_before(&self, now: DateTime<Utc>) -> Result<usize, RepoError> {
        let mut tables = self.tables.write().await;
        let mut expired = 0;
        for (_, item) in tables.narrative_queue.values_mut() {
            if item.is_pending() && item.is_expired_at(now) && item.mark_expired().is_ok() {
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn delete_delivered_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepoError> {
        let mut tables = self.tables.write().await;
        let before = tables.narrative_queue.len();
        tables.narrative_queue.retain(|_, (_, item)| {
            !(item.status == NarrativeItemStatus::Delivered
                && item.delivered_at.is_some_and(|at| at < cutoff))
        });
        Ok(before - tables.narrative_queue.len())
    }
}
