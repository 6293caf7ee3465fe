//! QuestRequirement entity - One condition gating a quest stage
//!
//! Requirements complete exactly once. The completion carries an audit record
//! of what satisfied it (the triggering event, or a manual note) and is never
//! reverted, so replaying an event cannot change `completed_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{EventData, GameEvent};
use crate::{EventId, QuestId, RequirementId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestRequirement {
    pub id: RequirementId,
    pub quest_id: QuestId,
    pub stage_index: u32,
    pub requirement_type: RequirementType,
    #[serde(default)]
    pub description: String,
    /// Type-specific parameters, e.g. `{"location_id": 5}`
    #[serde(default)]
    pub params: EventData,
    pub status: RequirementStatus,
    /// Optional requirements are informational and never gate advancement
    #[serde(default)]
    pub is_optional: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<CompletionRecord>,
}

impl QuestRequirement {
    pub fn new(
        quest_id: QuestId,
        stage_index: u32,
        requirement_type: RequirementType,
        params: EventData,
    ) -> Self {
        Self {
            id: RequirementId::new(),
            quest_id,
            stage_index,
            requirement_type,
            description: String::new(),
            params,
            status: RequirementStatus::Incomplete,
            is_optional: false,
            completed_at: None,
            completed_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == RequirementStatus::Complete
    }

    /// Whether this requirement still blocks its stage.
    pub fn blocks_stage(&self) -> bool {
        !self.is_optional && !self.is_complete()
    }

    /// Mark complete. Returns `false` (and changes nothing) if the
    /// requirement was already complete.
    pub fn complete(&mut self, record: CompletionRecord, now: DateTime<Utc>) -> bool {
        if self.is_complete() {
            return false;
        }
        self.status = RequirementStatus::Complete;
        self.completed_at = Some(now);
        self.completed_by = Some(record);
        true
    }
}

/// Closed set of requirement kinds. Each kind has exactly one predicate in
/// the engine's progression checker; adding a kind is a compile error there
/// until the predicate exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequirementType {
    AdventureCompleted,
    EnemyDefeated,
    StoryThreadResolved,
    IntelGathered,
    LocationDiscovered,
    LocationVisited,
    NpcMet,
    NpcDisposition,
    NpcTrust,
    ItemObtained,
    FactionStanding,
    TimePassed,
    Custom,
}

string_enum!(RequirementType {
    AdventureCompleted => "ADVENTURE_COMPLETED",
    EnemyDefeated => "ENEMY_DEFEATED",
    StoryThreadResolved => "STORY_THREAD_RESOLVED",
    IntelGathered => "INTEL_GATHERED",
    LocationDiscovered => "LOCATION_DISCOVERED",
    LocationVisited => "LOCATION_VISITED",
    NpcMet => "NPC_MET",
    NpcDisposition => "NPC_DISPOSITION",
    NpcTrust => "NPC_TRUST",
    ItemObtained => "ITEM_OBTAINED",
    FactionStanding => "FACTION_STANDING",
    TimePassed => "TIME_PASSED",
    Custom => "CUSTOM",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Incomplete,
    Complete,
}

string_enum!(RequirementStatus {
    Incomplete => "incomplete",
    Complete => "complete",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    Event,
    Manual,
}

/// Audit trail for a completed requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub source: CompletionSource,
    pub event_id: Option<EventId>,
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_data: Option<EventData>,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl CompletionRecord {
    pub fn from_event(event: &GameEvent) -> Self {
        Self {
            source: CompletionSource::Event,
            event_id: Some(event.id),
            event_type: Some(event.event_type.clone()),
            event_data: Some(event.data.clone()),
            event_timestamp: Some(event.timestamp),
            note: None,
        }
    }

    pub fn manual(note: impl Into<String>) -> Self {
        Self {
            source: CompletionSource::Manual,
            event_id: None,
            event_type: None,
            event_data: None,
            event_timestamp: None,
            note: Some(note.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn location_requirement() -> QuestRequirement {
        let params = json!({ "location_id": 5 }).as_object().cloned().unwrap_or_default();
        QuestRequirement::new(QuestId::new(), 0, RequirementType::LocationVisited, params)
    }

    #[test]
    fn completes_exactly_once() {
        let mut requirement = location_requirement();
        let first = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().expect("valid");
        let event = GameEvent::new("location_visited", EventData::new(), first);

        assert!(requirement.complete(CompletionRecord::from_event(&event), first));
        assert!(requirement.is_complete());
        assert_eq!(requirement.completed_at, Some(first));

        let later = first + Duration::hours(2);
        assert!(!requirement.complete(CompletionRecord::manual("again"), later));
        assert_eq!(requirement.completed_at, Some(first));
        assert_eq!(
            requirement.completed_by.as_ref().map(|r| r.source),
            Some(CompletionSource::Event)
        );
    }

    #[test]
    fn optional_requirements_never_block() {
        let requirement = location_requirement().optional();
        assert!(!requirement.is_complete());
        assert!(!requirement.blocks_stage());
        assert!(location_requirement().blocks_stage());
    }

    #[test]
    fn requirement_type_uses_screaming_tags() {
        let json = serde_json::to_string(&RequirementType::NpcDisposition).expect("serialize");
        assert_eq!(json, "\"NPC_DISPOSITION\"");
        assert_eq!(
            "TIME_PASSED".parse::<RequirementType>(),
            Ok(RequirementType::TimePassed)
        );
    }
}
