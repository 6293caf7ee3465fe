//! Use cases - narrative progression orchestration.
//!
//! Each module drives one part of the progression loop on top of the
//! repository ports; `subscriptions` wires them onto the event bus.

pub mod companion_triggers;
pub mod narrative_queue;
pub mod quest_progress;
pub mod subscriptions;

pub use companion_triggers::{CompanionTriggerMatcher, CompanionTriggerReport, TriggerContext};
pub use narrative_queue::{AiContextDigest, NarrativeQueue};
pub use quest_progress::{QuestProgressChecker, QuestProgressReport};
