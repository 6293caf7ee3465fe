//! Companion entity - An NPC recruited into a character's party
//!
//! A companion may carry a backstory: unresolved story threads that wait,
//! dormant, for the right moment in play, and secrets that unlock as loyalty
//! grows. Only the engine's companion trigger matcher moves threads out of
//! `Dormant` or flips a secret to revealed; both moves happen at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CharacterId, CompanionId, SecretId, StoryThreadId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    pub id: CompanionId,
    /// The character who recruited this companion
    pub character_id: CharacterId,
    /// Source NPC, when the companion started out as one
    pub npc_id: Option<String>,
    pub name: String,
    pub status: CompanionStatus,
    pub loyalty: i32,
    pub backstory: Option<CompanionBackstory>,
    pub recruited_at: DateTime<Utc>,
}

impl Companion {
    pub fn new(
        character_id: CharacterId,
        name: impl Into<String>,
        recruited_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CompanionId::new(),
            character_id,
            npc_id: None,
            name: name.into(),
            status: CompanionStatus::Active,
            loyalty: 50,
            backstory: None,
            recruited_at,
        }
    }

    pub fn with_loyalty(mut self, loyalty: i32) -> Self {
        self.loyalty = loyalty;
        self
    }

    pub fn with_npc(mut self, npc_id: impl Into<String>) -> Self {
        self.npc_id = Some(npc_id.into());
        self
    }

    pub fn with_backstory(mut self, backstory: CompanionBackstory) -> Self {
        self.backstory = Some(backstory);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == CompanionStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionStatus {
    Active,
    Dismissed,
    Deceased,
}

string_enum!(CompanionStatus {
    Active => "active",
    Dismissed => "dismissed",
    Deceased => "deceased",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanionBackstory {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub unresolved_threads: Vec<StoryThread>,
    #[serde(default)]
    pub secrets: Vec<CompanionSecret>,
}

impl CompanionBackstory {
    pub fn with_thread(mut self, thread: StoryThread) -> Self {
        self.unresolved_threads.push(thread);
        self
    }

    pub fn with_secret(mut self, secret: CompanionSecret) -> Self {
        self.secrets.push(secret);
        self
    }
}

/// A dormant plot hook from a companion's past
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryThread {
    pub id: StoryThreadId,
    pub companion_id: CompanionId,
    #[serde(rename = "type")]
    pub thread_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: ThreadStatus,
    /// Keywords that wake the thread when they show up in play
    #[serde(default)]
    pub activation_triggers: Vec<String>,
    #[serde(default)]
    pub intensity: ThreadIntensity,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

impl StoryThread {
    pub fn new(
        companion_id: CompanionId,
        thread_type: impl Into<String>,
        description: impl Into<String>,
        activation_triggers: Vec<String>,
    ) -> Self {
        Self {
            id: StoryThreadId::new(),
            companion_id,
            thread_type: thread_type.into(),
            title: String::new(),
            description: description.into(),
            status: ThreadStatus::Dormant,
            activation_triggers,
            intensity: ThreadIntensity::Medium,
            activated_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_intensity(mut self, intensity: ThreadIntensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn is_dormant(&self) -> bool {
        self.status == ThreadStatus::Dormant
    }

    /// `Dormant -> Active`. Returns `false` for any other starting status.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_dormant() {
            return false;
        }
        self.status = ThreadStatus::Active;
        self.activated_at = Some(now);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Dormant,
    Active,
    Resolved,
}

string_enum!(ThreadStatus {
    Dormant => "dormant",
    Active => "active",
    Resolved => "resolved",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadIntensity {
    Low,
    #[default]
    Medium,
    High,
}

string_enum!(ThreadIntensity {
    Low => "low",
    Medium => "medium",
    High => "high",
});

/// Something the companion keeps hidden until loyal enough
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionSecret {
    #[serde(default)]
    pub id: SecretId,
    pub content: String,
    pub reveal_loyalty_threshold: i32,
    #[serde(default)]
    pub revealed: bool,
    #[serde(default)]
    pub revealed_at: Option<DateTime<Utc>>,
}

impl CompanionSecret {
    pub fn new(content: impl Into<String>, reveal_loyalty_threshold: i32) -> Self {
        Self {
            id: SecretId::new(),
            content: content.into(),
            reveal_loyalty_threshold,
            revealed: false,
            revealed_at: None,
        }
    }

    /// True when loyalty moving `old -> new` crosses the threshold upward:
    /// `old < threshold <= new`. Already revealed secrets never cross again.
    pub fn is_crossed_by(&self, old_loyalty: i32, new_loyalty: i32) -> bool {
        !self.revealed
            && old_loyalty < self.reveal_loyalty_threshold
            && self.reveal_loyalty_threshold <= new_loyalty
    }

    /// Returns `false` if it was already revealed.
    pub fn reveal(&mut self, now: DateTime<Utc>) -> bool {
        if self.revealed {
            return false;
        }
        self.revealed = true;
        self.revealed_at = Some(now);
        true
    }
}
