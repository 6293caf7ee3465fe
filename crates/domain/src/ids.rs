use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DomainError;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", stringify!($name), e)))
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

// Ownership
define_id!(CharacterId);
define_id!(CampaignId);

// Quests
define_id!(QuestId);
define_id!(RequirementId);

// Companions
define_id!(CompanionId);
define_id!(StoryThreadId);
define_id!(SecretId);

// Narrative delivery
define_id!(NarrativeItemId);
define_id!(SessionId);

// Event bus
define_id!(EventId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_own_display_output() {
        let id = QuestId::new();
        let parsed: QuestId = id.to_string().parse().expect("valid uuid");
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "not-a-uuid".parse::<CharacterId>().expect_err("garbage");
        assert!(matches!(err, DomainError::InvalidId(_)));
        assert!(err.to_string().contains("CharacterId"));
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let uuid = Uuid::nil();
        let json = serde_json::to_string(&CompanionId::from_uuid(uuid)).expect("serialize");
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
