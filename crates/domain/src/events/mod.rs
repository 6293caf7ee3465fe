//! Gameplay events
//!
//! Events are the only input to the progression engine. Producers (route
//! handlers, the session runner) emit them on the engine's event bus with a
//! free-form JSON payload; the quest checker and companion matcher read the
//! payload through the helpers in [`payload`].
//!
//! Event type identifiers are plain strings shared between producers and
//! consumers. The known ones live in [`event_types`].

pub mod payload;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CharacterId, EventId};

pub use payload::{loose_eq, object, EventData};

/// Process-wide event type identifiers.
pub mod event_types {
    /// Subscribes a handler to every event type.
    pub const WILDCARD: &str = "*";

    // Gameplay signals (emitted by producers)
    pub const ADVENTURE_COMPLETE: &str = "adventure_complete";
    pub const STORY_THREAD_RESOLVED: &str = "story_thread_resolved";
    pub const LOCATION_DISCOVERED: &str = "location_discovered";
    pub const LOCATION_VISITED: &str = "location_visited";
    pub const NPC_INTERACTION: &str = "npc_interaction";
    pub const NPC_DISPOSITION_CHANGED: &str = "npc_disposition_changed";
    pub const ITEM_OBTAINED: &str = "item_obtained";
    pub const FACTION_STANDING_CHANGED: &str = "faction_standing_changed";
    pub const GAME_TIME_ADVANCED: &str = "game_time_advanced";
    pub const COMPANION_LOYALTY_CHANGED: &str = "companion_loyalty_changed";

    // Follow-up signals (emitted by the engine itself)
    pub const QUEST_STAGE_ADVANCED: &str = "quest_stage_advanced";
    pub const QUEST_COMPLETED: &str = "quest_completed";
    pub const COMPANION_THREAD_ACTIVATED: &str = "companion_thread_activated";
    pub const COMPANION_SECRET_REVEALED: &str = "companion_secret_revealed";

    /// Gameplay signals both the quest checker and the companion matcher
    /// react to.
    pub const GAMEPLAY_EVENTS: &[&str] = &[
        ADVENTURE_COMPLETE,
        STORY_THREAD_RESOLVED,
        LOCATION_DISCOVERED,
        LOCATION_VISITED,
        NPC_INTERACTION,
        NPC_DISPOSITION_CHANGED,
        ITEM_OBTAINED,
        FACTION_STANDING_CHANGED,
        GAME_TIME_ADVANCED,
    ];
}

/// An emitted gameplay event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
}

impl GameEvent {
    pub fn new(event_type: impl Into<String>, data: EventData, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            data,
            timestamp,
        }
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// The acting character, read from `data.character_id`.
    pub fn character_id(&self) -> Option<CharacterId> {
        payload::get_str(&self.data, "character_id").and_then(|s| s.parse().ok())
    }
}
