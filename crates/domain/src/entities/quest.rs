//! Quest entity - A multi-stage objective owned by one character
//!
//! Quests progress strictly forward: `current_stage` starts at 0, only ever
//! increments, and stops moving once the quest leaves `Active`. A quest whose
//! last stage is cleared ends with `current_stage == stages.len()`.
//!
//! Stage requirements are stored as separate [`QuestRequirement`] rows keyed
//! by `(quest_id, stage_index)`; the stage list itself only carries the
//! narrative text shown to players and to the AI session.
//!
//! [`QuestRequirement`]: super::QuestRequirement

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CampaignId, CharacterId, DomainError, QuestId};

/// A quest and its progression state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    pub id: QuestId,
    pub character_id: CharacterId,
    pub campaign_id: Option<CampaignId>,
    pub quest_type: QuestType,
    pub title: String,
    pub premise: String,
    pub status: QuestStatus,
    pub priority: QuestPriority,
    /// Index into `stages`; equals `stages.len()` once every stage is cleared
    pub current_stage: u32,
    pub stages: Vec<QuestStage>,
    #[serde(default)]
    pub rewards: QuestRewards,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One step of a quest, addressed by its position in `Quest::stages`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestStage {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl QuestStage {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestRewards {
    #[serde(default)]
    pub experience: u32,
    #[serde(default)]
    pub gold: u32,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// What happened when a stage was cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAdvance {
    /// Moved to the next stage
    Advanced { from: u32, to: u32 },
    /// The cleared stage was the last one; the quest is now completed
    QuestCompleted { final_stage: u32 },
}

impl Quest {
    pub fn new(
        character_id: CharacterId,
        title: impl Into<String>,
        stages: Vec<QuestStage>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QuestId::new(),
            character_id,
            campaign_id: None,
            quest_type: QuestType::Side,
            title: title.into(),
            premise: String::new(),
            status: QuestStatus::Active,
            priority: QuestPriority::Normal,
            current_stage: 0,
            stages,
            rewards: QuestRewards::default(),
            created_at,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: QuestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn with_quest_type(mut self, quest_type: QuestType) -> Self {
        self.quest_type = quest_type;
        self
    }

    pub fn with_premise(mut self, premise: impl Into<String>) -> Self {
        self.premise = premise.into();
        self
    }

    pub fn with_priority(mut self, priority: QuestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rewards(mut self, rewards: QuestRewards) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == QuestStatus::Active
    }

    /// The stage currently being worked on, if any remain.
    pub fn current_stage(&self) -> Option<&QuestStage> {
        self.stages.get(self.current_stage as usize)
    }

    pub fn stage(&self, index: u32) -> Option<&QuestStage> {
        self.stages.get(index as usize)
    }

    /// Clear the current stage.
    ///
    /// Fails if the quest is no longer active or has no stage left to clear;
    /// `current_stage` is untouched in both cases.
    pub fn advance_stage(&mut self, now: DateTime<Utc>) -> Result<StageAdvance, DomainError> {
        if !self.is_active() {
            return Err(DomainError::invalid_state_transition(format!(
                "quest {} is {} and can no longer advance",
                self.id, self.status
            )));
        }
        if self.current_stage().is_none() {
            return Err(DomainError::invalid_state_transition(format!(
                "quest {} has no stage at index {}",
                self.id, self.current_stage
            )));
        }

        let from = self.current_stage;
        self.current_stage += 1;

        if self.current_stage as usize >= self.stages.len() {
            self.status = QuestStatus::Completed;
            self.completed_at = Some(now);
            Ok(StageAdvance::QuestCompleted { final_stage: from })
        } else {
            Ok(StageAdvance::Advanced {
                from,
                to: self.current_stage,
            })
        }
    }

    /// Mark an active quest as failed. Terminal, like completion.
    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::invalid_state_transition(format!(
                "quest {} is already {}",
                self.id, self.status
            )));
        }
        self.status = QuestStatus::Failed;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestType {
    Main,
    Side,
    OneTime,
    Companion,
}

string_enum!(QuestType {
    Main => "main",
    Side => "side",
    OneTime => "one_time",
    Companion => "companion",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Active,
    Completed,
    Failed,
}

string_enum!(QuestStatus {
    Active => "active",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

string_enum!(QuestPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Critical => "critical",
});
