//! Keyword matching between story-thread triggers and what just happened in
//! play.

use serde::Serialize;
use talekeeper_domain::events::payload::{get_str, get_string_list};
use talekeeper_domain::{EventData, GameEvent};

/// The searchable text of one gameplay moment, split into channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriggerContext {
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub location_name: Option<String>,
    pub location_tags: Vec<String>,
    pub npc_name: Option<String>,
    pub region: Option<String>,
    pub activity_type: Option<String>,
    pub thread_title: Option<String>,
    pub thread_description: Option<String>,
}

impl TriggerContext {
    pub fn from_event(event: &GameEvent) -> Self {
        Self::from_data(&event.data)
    }

    pub fn from_data(data: &EventData) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| get_str(data, key))
                .map(str::to_string)
        };

        Self {
            content: text(&["content", "summary", "narrative"]),
            tags: get_string_list(data, "tags"),
            location_name: text(&["location_name"]),
            location_tags: get_string_list(data, "location_tags"),
            npc_name: text(&["npc_name"]),
            region: text(&["region"]),
            activity_type: text(&["activity_type", "adventure_type"]),
            thread_title: text(&["thread_title"]),
            thread_description: text(&["thread_description"]),
        }
    }

    fn channels(&self) -> impl Iterator<Item = &str> {
        [
            &self.content,
            &self.location_name,
            &self.npc_name,
            &self.region,
            &self.activity_type,
            &self.thread_title,
            &self.thread_description,
        ]
        .into_iter()
        .filter_map(|channel| channel.as_deref())
        .chain(self.tags.iter().map(String::as_str))
        .chain(self.location_tags.iter().map(String::as_str))
    }

    /// Case-insensitive substring match of one trigger against every channel.
    /// Blank triggers never match.
    pub fn matches(&self, trigger: &str) -> bool {
        let needle = trigger.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.channels()
            .any(|channel| channel.to_lowercase().contains(&needle))
    }

    /// The first trigger that matches, if any.
    pub fn first_match<'a>(&self, triggers: &'a [String]) -> Option<&'a str> {
        triggers
            .iter()
            .map(String::as_str)
            .find(|trigger| self.matches(trigger))
    }
}
