//! Repository port traits for storage access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use talekeeper_domain::{
    CharacterId, Companion, CompanionId, NarrativeItemId, NarrativeItemStatus, NarrativeQueueItem,
    Quest, QuestId, QuestRequirement, QuestStatus, RequirementId,
};

use super::error::RepoError;

// =============================================================================
// Quests
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestRepo: Send + Sync {
    async fn get(&self, id: QuestId) -> Result<Option<Quest>, RepoError>;
    /// Insert or replace.
    async fn save(&self, quest: &Quest) -> Result<(), RepoError>;
    async fn list_by_status(
        &self,
        character_id: CharacterId,
        status: QuestStatus,
    ) -> Result<Vec<Quest>, RepoError>;

    // Requirements
    async fn get_requirement(
        &self,
        id: RequirementId,
    ) -> Result<Option<QuestRequirement>, RepoError>;
    /// Insert or replace.
    async fn save_requirement(&self, requirement: &QuestRequirement) -> Result<(), RepoError>;
    async fn list_requirements(
        &self,
        quest_id: QuestId,
        stage_index: u32,
    ) -> Result<Vec<QuestRequirement>, RepoError>;
}

// =============================================================================
// Companions
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompanionRepo: Send + Sync {
    async fn get(&self, id: CompanionId) -> Result<Option<Companion>, RepoError>;
    /// Insert or replace, backstory included.
    async fn save(&self, companion: &Companion) -> Result<(), RepoError>;
    /// Set only the loyalty column. The stored backstory is left as is.
    async fn update_loyalty(&self, id: CompanionId, loyalty: i32) -> Result<(), RepoError>;
    async fn list_active(&self, character_id: CharacterId) -> Result<Vec<Companion>, RepoError>;
}

// =============================================================================
// Narrative Queue
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NarrativeQueueRepo: Send + Sync {
    async fn insert(&self, item: &NarrativeQueueItem) -> Result<(), RepoError>;
    async fn get(&self, id: NarrativeItemId) -> Result<Option<NarrativeQueueItem>, RepoError>;
    /// Items tied on priority and `created_at` come back in insertion
    /// order. Callers sort by priority themselves.
    async fn list_by_status(
        &self,
        character_id: CharacterId,
        status: NarrativeItemStatus,
    ) -> Result<Vec<NarrativeQueueItem>, RepoError>;
    async fn update(&self, item: &NarrativeQueueItem) -> Result<(), RepoError>;
    /// Move every pending item with `expires_at <= now` to expired.
    /// Returns how many changed.
    async fn expire_pending_before(&self, now: DateTime<Utc>) -> Result<usize, RepoError>;
    /// Delete delivered items with `delivered_at < cutoff`. Returns how many
    /// were removed.
    async fn delete_delivered_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepoError>;
}
