//! NarrativeQueueItem entity - A piece of story waiting to be told
//!
//! Items are produced by the progression engine and consumed by whatever
//! builds the next AI storytelling turn. Status moves one way only:
//! `Pending -> Delivered` or `Pending -> Expired`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventData;
use crate::{
    CampaignId, CharacterId, CompanionId, DomainError, NarrativeItemId, QuestId, SessionId,
    StoryThreadId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeQueueItem {
    pub id: NarrativeItemId,
    pub character_id: CharacterId,
    pub campaign_id: Option<CampaignId>,
    pub event_type: NarrativeEventType,
    pub priority: NarrativePriority,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub context: EventData,
    pub related_quest_id: Option<QuestId>,
    pub related_companion_id: Option<CompanionId>,
    pub related_npc_id: Option<String>,
    pub related_location_id: Option<String>,
    pub related_thread_id: Option<StoryThreadId>,
    pub status: NarrativeItemStatus,
    pub created_at: DateTime<Utc>,
    /// Not deliverable before this instant
    pub deliver_after: Option<DateTime<Utc>>,
    /// Not deliverable from this instant on
    pub expires_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_in_session_id: Option<SessionId>,
}

impl NarrativeQueueItem {
    pub fn new(
        character_id: CharacterId,
        event_type: NarrativeEventType,
        priority: NarrativePriority,
        title: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NarrativeItemId::new(),
            character_id,
            campaign_id: None,
            event_type,
            priority,
            title: title.into(),
            description: description.into(),
            context: EventData::new(),
            related_quest_id: None,
            related_companion_id: None,
            related_npc_id: None,
            related_location_id: None,
            related_thread_id: None,
            status: NarrativeItemStatus::Pending,
            created_at,
            deliver_after: None,
            expires_at: None,
            delivered_at: None,
            delivered_in_session_id: None,
        }
    }

    pub fn with_campaign(mut self, campaign_id: Option<CampaignId>) -> Self {
        self.campaign_id = campaign_id;
        self
    }

    pub fn with_context(mut self, context: EventData) -> Self {
        self.context = context;
        self
    }

    pub fn with_quest(mut self, quest_id: QuestId) -> Self {
        self.related_quest_id = Some(quest_id);
        self
    }

    pub fn with_companion(mut self, companion_id: CompanionId) -> Self {
        self.related_companion_id = Some(companion_id);
        self
    }

    pub fn with_npc(mut self, npc_id: impl Into<String>) -> Self {
        self.related_npc_id = Some(npc_id.into());
        self
    }

    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.related_location_id = Some(location_id.into());
        self
    }

    pub fn with_thread(mut self, thread_id: StoryThreadId) -> Self {
        self.related_thread_id = Some(thread_id);
        self
    }

    pub fn deliver_after(mut self, at: DateTime<Utc>) -> Self {
        self.deliver_after = Some(at);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == NarrativeItemStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Pending, past its `deliver_after`, and not yet expired.
    pub fn is_deliverable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_pending()
            && self.deliver_after.map_or(true, |at| at <= now)
            && !self.is_expired_at(now)
    }

    /// Queue order: priority tier first, then oldest first.
    pub fn delivery_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }

    pub fn mark_delivered(
        &mut self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.is_pending() {
            return Err(DomainError::invalid_state_transition(format!(
                "narrative item {} is {} and cannot be delivered",
                self.id, self.status
            )));
        }
        self.status = NarrativeItemStatus::Delivered;
        self.delivered_at = Some(now);
        self.delivered_in_session_id = Some(session_id);
        Ok(())
    }

    pub fn mark_expired(&mut self) -> Result<(), DomainError> {
        if !self.is_pending() {
            return Err(DomainError::invalid_state_transition(format!(
                "narrative item {} is {} and cannot expire",
                self.id, self.status
            )));
        }
        self.status = NarrativeItemStatus::Expired;
        Ok(())
    }
}

/// Delivery tier. Declaration order is queue order: `Urgent` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativePriority {
    Urgent,
    High,
    Normal,
    Low,
    Flavor,
}

string_enum!(NarrativePriority {
    Urgent => "urgent",
    High => "high",
    Normal => "normal",
    Low => "low",
    Flavor => "flavor",
});

impl NarrativePriority {
    /// Sort key for storage backends (`0` = urgent).
    pub fn rank(&self) -> i64 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
            Self::Flavor => 4,
        }
    }

    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Urgent | Self::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeItemStatus {
    Pending,
    Delivered,
    Expired,
}

string_enum!(NarrativeItemStatus {
    Pending => "pending",
    Delivered => "delivered",
    Expired => "expired",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeEventType {
    QuestStageAdvanced,
    QuestCompleted,
    CompanionReaction,
    CompanionSecretRevealed,
    StoryThreadActivated,
    WorldEvent,
    Custom,
}

string_enum!(NarrativeEventType {
    QuestStageAdvanced => "quest_stage_advanced",
    QuestCompleted => "quest_completed",
    CompanionReaction => "companion_reaction",
    CompanionSecretRevealed => "companion_secret_revealed",
    StoryThreadActivated => "story_thread_activated",
    WorldEvent => "world_event",
    Custom => "custom",
});
