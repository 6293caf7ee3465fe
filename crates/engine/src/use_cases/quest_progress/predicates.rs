//! Requirement predicates.
//!
//! One pure function per [`RequirementType`]. A predicate sees only the
//! requirement's params and the event; anything missing or malformed means
//! "not satisfied".

use serde_json::Value;
use talekeeper_domain::events::payload::{
    field_matches, get_bool, get_i64, get_str, get_string_list, loose_eq,
};
use talekeeper_domain::{event_types, EventData, GameEvent, RequirementType};

pub fn is_satisfied(
    requirement_type: RequirementType,
    params: &EventData,
    event: &GameEvent,
) -> bool {
    let data = &event.data;
    match requirement_type {
        RequirementType::AdventureCompleted => adventure_completed(params, event),
        RequirementType::EnemyDefeated => {
            event.is(event_types::ADVENTURE_COMPLETE)
                && get_str(params, "enemy").is_some_and(|enemy| {
                    get_string_list(data, "enemies_defeated")
                        .iter()
                        .any(|defeated| same_name(defeated, enemy))
                })
        }
        RequirementType::StoryThreadResolved => {
            event.is(event_types::STORY_THREAD_RESOLVED)
                && field_matches(params, "thread_id", data, "thread_id")
        }
        RequirementType::IntelGathered => get_str(params, "intel")
            .map(str::trim)
            .filter(|intel| !intel.is_empty())
            .is_some_and(|intel| {
                let intel = intel.to_lowercase();
                get_string_list(data, "intel_gathered")
                    .iter()
                    .any(|gathered| gathered.to_lowercase().contains(&intel))
            }),
        RequirementType::LocationDiscovered => {
            event.is(event_types::LOCATION_DISCOVERED)
                && field_matches(params, "location_id", data, "location_id")
        }
        RequirementType::LocationVisited => {
            (event.is(event_types::LOCATION_VISITED) || event.is(event_types::LOCATION_DISCOVERED))
                && field_matches(params, "location_id", data, "location_id")
        }
        RequirementType::NpcMet => {
            event.is(event_types::NPC_INTERACTION)
                && field_matches(params, "npc_id", data, "npc_id")
        }
        RequirementType::NpcDisposition => {
            event.is(event_types::NPC_DISPOSITION_CHANGED)
                && field_matches(params, "npc_id", data, "npc_id")
                && at_least(params, "min_disposition", data, "new_disposition")
        }
        RequirementType::NpcTrust => {
            (event.is(event_types::NPC_INTERACTION)
                || event.is(event_types::NPC_DISPOSITION_CHANGED))
                && field_matches(params, "npc_id", data, "npc_id")
                && at_least(params, "min_trust", data, "trust")
        }
        RequirementType::ItemObtained => item_obtained(params, event),
        RequirementType::FactionStanding => {
            event.is(event_types::FACTION_STANDING_CHANGED)
                && field_matches(params, "faction_id", data, "faction_id")
                && at_least(params, "min_standing", data, "new_standing")
        }
        RequirementType::TimePassed => time_passed(params, event),
        RequirementType::Custom => custom(params, event),
    }
}

fn adventure_completed(params: &EventData, event: &GameEvent) -> bool {
    if !event.is(event_types::ADVENTURE_COMPLETE) {
        return false;
    }
    if params.contains_key("adventure_id")
        && !field_matches(params, "adventure_id", &event.data, "adventure_id")
    {
        return false;
    }
    if get_bool(params, "success_required").unwrap_or(false) {
        return get_bool(&event.data, "success") == Some(true);
    }
    true
}

fn item_obtained(params: &EventData, event: &GameEvent) -> bool {
    if !event.is(event_types::ITEM_OBTAINED) {
        return false;
    }
    let data = &event.data;

    let same_item = match get_str(params, "item_name") {
        Some(name) => get_str(data, "item_name").is_some_and(|obtained| same_name(obtained, name)),
        None => field_matches(params, "item_id", data, "item_id"),
    };
    if !same_item {
        return false;
    }

    let wanted = get_i64(params, "quantity").unwrap_or(1);
    let obtained = get_i64(data, "quantity").unwrap_or(1);
    obtained >= wanted
}

fn time_passed(params: &EventData, event: &GameEvent) -> bool {
    if !event.is(event_types::GAME_TIME_ADVANCED) {
        return false;
    }
    let data = &event.data;

    let reached_day = get_i64(params, "target_day")
        .zip(get_i64(data, "current_day"))
        .is_some_and(|(target, current)| current >= target);
    let waited_enough = get_i64(params, "days")
        .zip(get_i64(data, "days_advanced"))
        .is_some_and(|(wanted, advanced)| advanced >= wanted);

    reached_day || waited_enough
}

/// `params.event_type` names the event; every `params.match` entry must be
/// present in the payload with a loosely equal value.
fn custom(params: &EventData, event: &GameEvent) -> bool {
    if get_str(params, "event_type") != Some(event.event_type.as_str()) {
        return false;
    }
    match params.get("match") {
        None | Some(Value::Null) => true,
        Some(Value::Object(expected)) => expected.iter().all(|(key, value)| {
            event
                .data
                .get(key)
                .is_some_and(|actual| loose_eq(value, actual))
        }),
        Some(_) => false,
    }
}

/// No threshold in params means any value passes; a threshold with no
/// reading in the payload fails.
fn at_least(params: &EventData, min_key: &str, data: &EventData, value_key: &str) -> bool {
    match get_i64(params, min_key) {
        None => true,
        Some(min) => get_i64(data, value_key).is_some_and(|value| value >= min),
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}
