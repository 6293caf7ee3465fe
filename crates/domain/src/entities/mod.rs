//! Domain entities
//!
//! Plain data plus the state transitions that keep them valid. Persistence
//! and orchestration live in the engine crate.

/// Text form (`as_str`, `Display`, `FromStr`) for a fieldless enum, used by
/// storage adapters for status and type columns.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::DomainError::parse(format!(
                        "Unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

mod companion;
mod narrative_item;
mod quest;
mod quest_requirement;

pub use companion::{
    Companion, CompanionBackstory, CompanionSecret, CompanionStatus, StoryThread, ThreadIntensity,
    ThreadStatus,
};
pub use narrative_item::{
    NarrativeEventType, NarrativeItemStatus, NarrativePriority, NarrativeQueueItem,
};
pub use quest::{
    Quest, QuestPriority, QuestRewards, QuestStage, QuestStatus, QuestType, StageAdvance,
};
pub use quest_requirement::{
    CompletionRecord, CompletionSource, QuestRequirement, RequirementStatus, RequirementType,
};
