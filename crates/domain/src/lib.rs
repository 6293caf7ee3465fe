//! Talekeeper domain types.
//!
//! Quests and their requirements, companions and their backstories, narrative
//! queue items, and the gameplay events that drive them. No I/O lives here.

pub mod common;
pub mod entities;
pub mod error;
pub mod events;
pub mod ids;

pub use entities::{
    Companion, CompanionBackstory, CompanionSecret, CompanionStatus, CompletionRecord,
    CompletionSource, NarrativeEventType, NarrativeItemStatus, NarrativePriority,
    NarrativeQueueItem, Quest, QuestPriority, QuestRequirement, QuestRewards, QuestStage,
    QuestStatus, QuestType, RequirementStatus, RequirementType, StageAdvance, StoryThread,
    ThreadIntensity, ThreadStatus,
};

pub use error::DomainError;
pub use events::{event_types, EventData, GameEvent};

pub use ids::{
    CampaignId, CharacterId, CompanionId, EventId, NarrativeItemId, QuestId, RequirementId,
    SecretId, SessionId, StoryThreadId,
};
