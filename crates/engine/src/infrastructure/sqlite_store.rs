//! SQLite-backed storage for quests, companions and the narrative queue.
//!
//! Nested records (stage lists, rewards, backstories, requirement params,
//! item context, completion audit) live in JSON text columns. They are
//! decoded once, in the row mappers below, through [`Decoded`]; a corrupt
//! blob loads as an empty structure and logs a warning instead of failing
//! the whole query.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
//! string comparison orders them correctly.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use talekeeper_domain::common::{parse_datetime, Decoded};
use talekeeper_domain::{
    CharacterId, Companion, CompanionBackstory, CompanionId, CompletionRecord, DomainError,
    EventData, NarrativeItemId, NarrativeItemStatus, NarrativeQueueItem, Quest, QuestId,
    QuestRequirement, QuestRewards, QuestStage, QuestStatus, RequirementId,
};

use crate::infrastructure::ports::{CompanionRepo, NarrativeQueueRepo, QuestRepo, RepoError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS quests (
        id TEXT PRIMARY KEY,
        character_id TEXT NOT NULL,
        campaign_id TEXT,
        quest_type TEXT NOT NULL,
        title TEXT NOT NULL,
        premise TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        current_stage INTEGER NOT NULL DEFAULT 0,
        stages TEXT NOT NULL,
        rewards TEXT,
        created_at TEXT NOT NULL,
        completed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quests_character_status ON quests(character_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS quest_requirements (
        id TEXT PRIMARY KEY,
        quest_id TEXT NOT NULL,
        stage_index INTEGER NOT NULL,
        requirement_type TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        params TEXT,
        status TEXT NOT NULL,
        is_optional INTEGER NOT NULL DEFAULT 0,
        completed_at TEXT,
        completed_by TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_requirements_stage
    ON quest_requirements(quest_id, stage_index)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS companions (
        id TEXT PRIMARY KEY,
        character_id TEXT NOT NULL,
        npc_id TEXT,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        loyalty INTEGER NOT NULL DEFAULT 50,
        backstory TEXT,
        recruited_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_companions_character_status
    ON companions(character_id, status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS narrative_queue (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        character_id TEXT NOT NULL,
        campaign_id TEXT,
        event_type TEXT NOT NULL,
        priority TEXT NOT NULL,
        priority_rank INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        context TEXT,
        related_quest_id TEXT,
        related_companion_id TEXT,
        related_npc_id TEXT,
        related_location_id TEXT,
        related_thread_id TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        deliver_after TEXT,
        expires_at TEXT,
        delivered_at TEXT,
        delivered_in_session_id TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_narrative_queue_character_status
    ON narrative_queue(character_id, status)
    "#,
];

/// SQLite implementation of every repository port.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_path: &str) -> Result<Self, RepoError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| RepoError::database("connect", e))?;

        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&pool)
                .await
                .map_err(|e| RepoError::database("create_schema", e))?;
        }

        tracing::info!(path = db_path, "SQLite store ready");
        Ok(Self { pool })
    }
}

// =============================================================================
// Column helpers
// =============================================================================

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_timestamp(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(timestamp)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepoError> {
    serde_json::to_string(value).map_err(RepoError::serialization)
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, RepoError>
where
    T: FromStr<Err = DomainError>,
{
    value
        .parse()
        .map_err(|e: DomainError| RepoError::serialization(format!("{column}: {e}")))
}

fn parse_opt_column<T>(value: Option<String>, column: &str) -> Result<Option<T>, RepoError>
where
    T: FromStr<Err = DomainError>,
{
    value.map(|v| parse_column(&v, column)).transpose()
}

fn parse_time(value: &str, column: &str) -> Result<DateTime<Utc>, RepoError> {
    parse_datetime(value).map_err(|e| RepoError::serialization(format!("{column}: {e}")))
}

fn parse_opt_time(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>, RepoError> {
    value.map(|v| parse_time(&v, column)).transpose()
}

fn non_negative(value: i64, column: &str) -> Result<u32, RepoError> {
    u32::try_from(value).map_err(|_| RepoError::serialization(format!("{column}: {value}")))
}

// =============================================================================
// Row mappers
// =============================================================================

fn quest_from_row(row: &SqliteRow) -> Result<Quest, RepoError> {
    let id: String = row.get("id");
    let stages_json: Option<String> = row.get("stages");
    let rewards_json: Option<String> = row.get("rewards");

    Ok(Quest {
        id: parse_column(&id, "quests.id")?,
        character_id: parse_column(&row.get::<String, _>("character_id"), "quests.character_id")?,
        campaign_id: parse_opt_column(row.get("campaign_id"), "quests.campaign_id")?,
        quest_type: parse_column(&row.get::<String, _>("quest_type"), "quests.quest_type")?,
        title: row.get("title"),
        premise: row.get("premise"),
        status: parse_column(&row.get::<String, _>("status"), "quests.status")?,
        priority: parse_column(&row.get::<String, _>("priority"), "quests.priority")?,
        current_stage: non_negative(row.get("current_stage"), "quests.current_stage")?,
        stages: Decoded::<Vec<QuestStage>>::from_json(stages_json.as_deref())
            .or_empty("quests.stages", &id),
        rewards: match rewards_json {
            Some(json) => {
                Decoded::<QuestRewards>::from_json(Some(&json)).or_empty("quests.rewards", &id)
            }
            None => QuestRewards::default(),
        },
        created_at: parse_time(&row.get::<String, _>("created_at"), "quests.created_at")?,
        completed_at: parse_opt_time(row.get("completed_at"), "quests.completed_at")?,
    })
}

fn requirement_from_row(row: &SqliteRow) -> Result<QuestRequirement, RepoError> {
    let id: String = row.get("id");
    let params_json: Option<String> = row.get("params");
    let completed_by_json: Option<String> = row.get("completed_by");

    Ok(QuestRequirement {
        id: parse_column(&id, "quest_requirements.id")?,
        quest_id: parse_column(
            &row.get::<String, _>("quest_id"),
            "quest_requirements.quest_id",
        )?,
        stage_index: non_negative(row.get("stage_index"), "quest_requirements.stage_index")?,
        requirement_type: parse_column(
            &row.get::<String, _>("requirement_type"),
            "quest_requirements.requirement_type",
        )?,
        description: row.get("description"),
        params: match params_json {
            Some(json) => Decoded::<EventData>::from_json(Some(&json))
                .or_empty("quest_requirements.params", &id),
            None => EventData::new(),
        },
        status: parse_column(&row.get::<String, _>("status"), "quest_requirements.status")?,
        is_optional: row.get::<i64, _>("is_optional") != 0,
        completed_at: parse_opt_time(row.get("completed_at"), "quest_requirements.completed_at")?,
        completed_by: completed_by_json.and_then(|json| {
            Decoded::<Option<CompletionRecord>>::from_json(Some(&json))
                .or_empty("quest_requirements.completed_by", &id)
        }),
    })
}

fn companion_from_row(row: &SqliteRow) -> Result<Companion, RepoError> {
    let id: String = row.get("id");
    let backstory_json: Option<String> = row.get("backstory");

    Ok(Companion {
        id: parse_column(&id, "companions.id")?,
        character_id: parse_column(
            &row.get::<String, _>("character_id"),
            "companions.character_id",
        )?,
        npc_id: row.get("npc_id"),
        name: row.get("name"),
        status: parse_column(&row.get::<String, _>("status"), "companions.status")?,
        loyalty: i32::try_from(row.get::<i64, _>("loyalty"))
            .map_err(|e| RepoError::serialization(format!("companions.loyalty: {e}")))?,
        backstory: backstory_json.map(|json| {
            Decoded::<CompanionBackstory>::from_json(Some(&json))
                .or_empty("companions.backstory", &id)
        }),
        recruited_at: parse_time(
            &row.get::<String, _>("recruited_at"),
            "companions.recruited_at",
        )?,
    })
}

fn narrative_item_from_row(row: &SqliteRow) -> Result<NarrativeQueueItem, RepoError> {
    let id: String = row.get("id");
    let context_json: Option<String> = row.get("context");

    Ok(NarrativeQueueItem {
        id: parse_column(&id, "narrative_queue.id")?,
        character_id: parse_column(
            &row.get::<String, _>("character_id"),
            "narrative_queue.character_id",
        )?,
        campaign_id: parse_opt_column(row.get("campaign_id"), "narrative_queue.campaign_id")?,
        event_type: parse_column(
            &row.get::<String, _>("event_type"),
            "narrative_queue.event_type",
        )?,
        priority: parse_column(
            &row.get::<String, _>("priority"),
            "narrative_queue.priority",
        )?,
        title: row.get("title"),
        description: row.get("description"),
        context: match context_json {
            Some(json) => Decoded::<EventData>::from_json(Some(&json))
                .or_empty("narrative_queue.context", &id),
            None => EventData::new(),
        },
        related_quest_id: parse_opt_column(
            row.get("related_quest_id"),
            "narrative_queue.related_quest_id",
        )?,
        related_companion_id: parse_opt_column(
            row.get("related_companion_id"),
            "narrative_queue.related_companion_id",
        )?,
        related_npc_id: row.get("related_npc_id"),
        related_location_id: row.get("related_location_id"),
        related_thread_id: parse_opt_column(
            row.get("related_thread_id"),
            "narrative_queue.related_thread_id",
        )?,
        status: parse_column(&row.get::<String, _>("status"), "narrative_queue.status")?,
        created_at: parse_time(
            &row.get::<String, _>("created_at"),
            "narrative_queue.created_at",
        )?,
        deliver_after: parse_opt_time(row.get("deliver_after"), "narrative_queue.deliver_after")?,
        expires_at: parse_opt_time(row.get("expires_at"), "narrative_queue.expires_at")?,
        delivered_at: parse_opt_time(row.get("delivered_at"), "narrative_queue.delivered_at")?,
        delivered_in_session_id: parse_opt_column(
            row.get("delivered_in_session_id"),
            "narrative_queue.delivered_in_session_id",
        )?,
    })
}

/// Map rows, skipping (and logging) any row whose scalar columns cannot be
/// read. One bad row never hides the rest.
fn map_rows<T>(
    rows: &[SqliteRow],
    table: &'static str,
    mapper: fn(&SqliteRow) -> Result<T, RepoError>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match mapper(row) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(table = table, error = %e, "Skipping unreadable row");
                None
            }
        })
        .collect()
}

// =============================================================================
// Quests
// =============================================================================

#[async_trait]
impl QuestRepo for SqliteStore {
    async fn get(&self, id: QuestId) -> Result<Option<Quest>, RepoError> {
        let row = sqlx::query("SELECT * FROM quests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("get_quest", e))?;

        row.as_ref().map(quest_from_row).transpose()
    }

    async fn save(&self, quest: &Quest) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO quests (
                id, character_id, campaign_id, quest_type, title, premise, status, priority,
                current_stage, stages, rewards, created_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                campaign_id = excluded.campaign_id,
                quest_type = excluded.quest_type,
                title = excluded.title,
                premise = excluded.premise,
                status = excluded.status,
                priority = excluded.priority,
                current_stage = excluded.current_stage,
                stages = excluded.stages,
                rewards = excluded.rewards,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(quest.id.to_string())
        .bind(quest.character_id.to_string())
        .bind(quest.campaign_id.map(|id| id.to_string()))
        .bind(quest.quest_type.as_str())
        .bind(&quest.title)
        .bind(&quest.premise)
        .bind(quest.status.as_str())
        .bind(quest.priority.as_str())
        .bind(i64::from(quest.current_stage))
        .bind(to_json(&quest.stages)?)
        .bind(to_json(&quest.rewards)?)
        .bind(timestamp(quest.created_at))
        .bind(opt_timestamp(quest.completed_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_quest", e))?;

        Ok(())
    }

    async fn list_by_status(
        &self,
        character_id: CharacterId,
        status: QuestStatus,
    ) -> Result<Vec<Quest>, RepoError> {
        let rows = sqlx::query(
            "SELECT * FROM quests WHERE character_id = ? AND status = ? ORDER BY created_at ASC",
        )
        .bind(character_id.to_string())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_quests_by_status", e))?;

        Ok(map_rows(&rows, "quests", quest_from_row))
    }

    async fn get_requirement(
        &self,
        id: RequirementId,
    ) -> Result<Option<QuestRequirement>, RepoError> {
        let row = sqlx::query("SELECT * FROM quest_requirements WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("get_requirement", e))?;

        row.as_ref().map(requirement_from_row).transpose()
    }

    async fn save_requirement(&self, requirement: &QuestRequirement) -> Result<(), RepoError> {
        let completed_by = requirement
            .completed_by
            .as_ref()
            .map(to_json)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO quest_requirements (
                id, quest_id, stage_index, requirement_type, description, params, status,
                is_optional, completed_at, completed_by
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                requirement_type = excluded.requirement_type,
                description = excluded.description,
                params = excluded.params,
                status = excluded.status,
                is_optional = excluded.is_optional,
                completed_at = excluded.completed_at,
                completed_by = excluded.completed_by
            "#,
        )
        .bind(requirement.id.to_string())
        .bind(requirement.quest_id.to_string())
        .bind(i64::from(requirement.stage_index))
        .bind(requirement.requirement_type.as_str())
        .bind(&requirement.description)
        .bind(to_json(&requirement.params)?)
        .bind(requirement.status.as_str())
        .bind(requirement.is_optional)
        .bind(opt_timestamp(requirement.completed_at))
        .bind(completed_by)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_requirement", e))?;

        Ok(())
    }

    async fn list_requirements(
        &self,
        quest_id: QuestId,
        stage_index: u32,
    ) -> Result<Vec<QuestRequirement>, RepoError> {
        let rows = sqlx::query(
            "SELECT * FROM quest_requirements WHERE quest_id = ? AND stage_index = ? ORDER BY id",
        )
        .bind(quest_id.to_string())
        .bind(i64::from(stage_index))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_requirements", e))?;

        Ok(map_rows(&rows, "quest_requirements", requirement_from_row))
    }
}

// =============================================================================
// Companions
// =============================================================================

#[async_trait]
impl CompanionRepo for SqliteStore {
    async fn get(&self, id: CompanionId) -> Result<Option<Companion>, RepoError> {
        let row = sqlx::query("SELECT * FROM companions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("get_companion", e))?;

        row.as_ref().map(companion_from_row).transpose()
    }

    async fn save(&self, companion: &Companion) -> Result<(), RepoError> {
        let backstory = companion.backstory.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO companions (
                id, character_id, npc_id, name, status, loyalty, backstory, recruited_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                npc_id = excluded.npc_id,
                name = excluded.name,
                status = excluded.status,
                loyalty = excluded.loyalty,
                backstory = excluded.backstory
            "#,
        )
        .bind(companion.id.to_string())
        .bind(companion.character_id.to_string())
        .bind(companion.npc_id.as_deref())
        .bind(&companion.name)
        .bind(companion.status.as_str())
        .bind(i64::from(companion.loyalty))
        .bind(backstory)
        .bind(timestamp(companion.recruited_at))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_companion", e))?;

        Ok(())
    }

    async fn update_loyalty(&self, id: CompanionId, loyalty: i32) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE companions SET loyalty = ? WHERE id = ?")
            .bind(i64::from(loyalty))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::database("update_companion_loyalty", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("Companion", id));
        }
        Ok(())
    }

    async fn list_active(&self, character_id: CharacterId) -> Result<Vec<Companion>, RepoError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM companions
            WHERE character_id = ? AND status = 'active'
            ORDER BY recruited_at ASC
            "#,
        )
        .bind(character_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_active_companions", e))?;

        Ok(map_rows(&rows, "companions", companion_from_row))
    }
}

// =============================================================================
// Narrative Queue
// =============================================================================

#[async_trait]
impl NarrativeQueueRepo for SqliteStore {
    async fn insert(&self, item: &NarrativeQueueItem) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO narrative_queue (
                id, character_id, campaign_id, event_type, priority, priority_rank, title,
                description, context, related_quest_id, related_companion_id, related_npc_id,
                related_location_id, related_thread_id, status, created_at, deliver_after,
                expires_at, delivered_at, delivered_in_session_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.character_id.to_string())
        .bind(item.campaign_id.map(|id| id.to_string()))
        .bind(item.event_type.as_str())
        .bind(item.priority.as_str())
        .bind(item.priority.rank())
        .bind(&item.title)
        .bind(&item.description)
        .bind(to_json(&item.context)?)
        .bind(item.related_quest_id.map(|id| id.to_string()))
        .bind(item.related_companion_id.map(|id| id.to_string()))
        .bind(item.related_npc_id.as_deref())
        .bind(item.related_location_id.as_deref())
        .bind(item.related_thread_id.map(|id| id.to_string()))
        .bind(item.status.as_str())
        .bind(timestamp(item.created_at))
        .bind(opt_timestamp(item.deliver_after))
        .bind(opt_timestamp(item.expires_at))
        .bind(opt_timestamp(item.delivered_at))
        .bind(item.delivered_in_session_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("insert_narrative_item", e))?;

        Ok(())
    }

    async fn get(&self, id: NarrativeItemId) -> Result<Option<NarrativeQueueItem>, RepoError> {
        let row = sqlx::query("SELECT * FROM narrative_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("get_narrative_item", e))?;

        row.as_ref().map(narrative_item_from_row).transpose()
    }

    async fn list_by_status(
        &self,
        character_id: CharacterId,
        status: NarrativeItemStatus,
    ) -> Result<Vec<NarrativeQueueItem>, RepoError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM narrative_queue
            WHERE character_id = ? AND status = ?
            ORDER BY priority_rank ASC, created_at ASC, seq ASC
            "#,
        )
        .bind(character_id.to_string())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_narrative_items", e))?;

        Ok(map_rows(&rows, "narrative_queue", narrative_item_from_row))
    }

    async fn update(&self, item: &NarrativeQueueItem) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE narrative_queue
            SET status = ?, delivered_at = ?, delivered_in_session_id = ?,
                deliver_after = ?, expires_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.status.as_str())
        .bind(opt_timestamp(item.delivered_at))
        .bind(item.delivered_in_session_id.map(|id| id.to_string()))
        .bind(opt_timestamp(item.deliver_after))
        .bind(opt_timestamp(item.expires_at))
        .bind(item.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("update_narrative_item", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::not_found("NarrativeQueueItem", item.id));
        }
        Ok(())
    }

    async fn expire_pending_before(&self, now: DateTime<Utc>) -> Result<usize, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE narrative_queue
            SET status = ?
            WHERE status = ? AND expires_at IS NOT NULL AND expires_at <= ?
            "#,
        )
        .bind(NarrativeItemStatus::Expired.as_str())
        .bind(NarrativeItemStatus::Pending.as_str())
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("expire_narrative_items", e))?;

        Ok(result.rows_affected() as usize)
    }

    async fn delete_delivered_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepoError> {
        let result = sqlx::query(
            r#"
            DELETE FROM narrative_queue
            WHERE status = ? AND delivered_at IS NOT NULL AND delivered_at < ?
            "#,
        )
        .bind(NarrativeItemStatus::Delivered.as_str())
        .bind(timestamp(cutoff))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("cleanup_delivered_items", e))?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::event_bus::WeakEventBus;
    use crate::infrastructure::ports::ClockPort;
    use crate::use_cases::{CompanionTriggerMatcher, NarrativeQueue};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use talekeeper_domain::{
        CompanionSecret, NarrativeEventType, NarrativePriority, RequirementStatus, RequirementType,
        SessionId, StoryThread, ThreadIntensity,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("talekeeper.db");
        let store = SqliteStore::new(path.to_str().expect("utf-8 path"))
            .await
            .expect("open store");
        (store, dir)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).single().expect("valid")
    }

    fn params(value: serde_json::Value) -> EventData {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn quest_and_requirements_round_trip() {
        let (store, _dir) = store().await;
        let character_id = CharacterId::new();
        let quest = Quest::new(
            character_id,
            "The Sunken Bell",
            vec![
                QuestStage::new("Find the bell", "Search the flooded chapel"),
                QuestStage::new("Ring it", "Wake the drowned choir"),
            ],
            at(8),
        );
        QuestRepo::save(&store, &quest).await.expect("save quest");

        let requirement = QuestRequirement::new(
            quest.id,
            0,
            RequirementType::LocationVisited,
            params(json!({ "location_id": 5 })),
        )
        .with_description("Reach the chapel");
        store
            .save_requirement(&requirement)
            .await
            .expect("save requirement");

        let active = QuestRepo::list_by_status(&store, character_id, QuestStatus::Active)
            .await
            .expect("list");
        assert_eq!(active, vec![quest.clone()]);

        let stage_zero = store.list_requirements(quest.id, 0).await.expect("list");
        assert_eq!(stage_zero, vec![requirement.clone()]);
        assert!(store
            .list_requirements(quest.id, 1)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn completed_requirement_keeps_audit_record() {
        let (store, _dir) = store().await;
        let mut requirement = QuestRequirement::new(
            QuestId::new(),
            0,
            RequirementType::Custom,
            params(json!({ "event_type": "ritual_done" })),
        );
        requirement.complete(CompletionRecord::manual("DM ruling"), at(9));
        store
            .save_requirement(&requirement)
            .await
            .expect("save");

        let loaded = store
            .get_requirement(requirement.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(loaded.status, RequirementStatus::Complete);
        assert_eq!(loaded.completed_at, Some(at(9)));
        assert_eq!(
            loaded.completed_by.and_then(|r| r.note),
            Some("DM ruling".to_string())
        );
    }

    #[tokio::test]
    async fn corrupt_json_columns_fall_back_to_empty() {
        let (store, _dir) = store().await;
        let character_id = CharacterId::new();
        let companion = Companion::new(character_id, "Mira", at(7)).with_backstory(
            CompanionBackstory::default().with_secret(CompanionSecret::new("Noble blood", 50)),
        );
        CompanionRepo::save(&store, &companion).await.expect("save");

        sqlx::query("UPDATE companions SET backstory = '{not json' WHERE id = ?")
            .bind(companion.id.to_string())
            .execute(&store.pool)
            .await
            .expect("corrupt backstory");

        let loaded = store.list_active(character_id).await.expect("list");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].backstory, Some(CompanionBackstory::default()));
    }

    #[tokio::test]
    async fn loyalty_change_leaves_corrupt_backstory_in_place() {
        let (store, _dir) = store().await;
        let store = Arc::new(store);
        let character_id = CharacterId::new();
        let companion = Companion::new(character_id, "Mira", at(7))
            .with_loyalty(50)
            .with_backstory(
                CompanionBackstory::default().with_secret(CompanionSecret::new("Noble blood", 80)),
            );
        CompanionRepo::save(store.as_ref(), &companion).await.expect("save");

        let truncated = r#"{"unresolved_threads":[],"secrets":[{"content":"Noble"#;
        sqlx::query("UPDATE companions SET backstory = ? WHERE id = ?")
            .bind(truncated)
            .bind(companion.id.to_string())
            .execute(&store.pool)
            .await
            .expect("truncate backstory");

        let clock: Arc<dyn ClockPort> = Arc::new(FixedClock(at(12)));
        let queue = Arc::new(NarrativeQueue::new(store.clone(), clock.clone()));
        let matcher =
            CompanionTriggerMatcher::new(store.clone(), queue, WeakEventBus::default(), clock);
        let report = matcher
            .check_secret_reveals(character_id, companion.id, Some(50), 55)
            .await
            .expect("check");
        assert!(report.is_empty());

        let row = sqlx::query("SELECT loyalty, backstory FROM companions WHERE id = ?")
            .bind(companion.id.to_string())
            .fetch_one(&store.pool)
            .await
            .expect("row");
        assert_eq!(row.get::<i64, _>("loyalty"), 55);
        assert_eq!(row.get::<String, _>("backstory"), truncated);
    }

    #[tokio::test]
    async fn companion_backstory_persists_thread_state() {
        let (store, _dir) = store().await;
        let character_id = CharacterId::new();
        let companion_id = CompanionId::new();
        let thread = StoryThread::new(
            companion_id,
            "vendetta",
            "The goblin chief took her brother",
            vec!["goblin camp".to_string()],
        )
        .with_intensity(ThreadIntensity::High);
        let mut companion = Companion::new(character_id, "Mira", at(7))
            .with_backstory(CompanionBackstory::default().with_thread(thread));
        companion.id = companion_id;
        CompanionRepo::save(&store, &companion).await.expect("save");

        if let Some(backstory) = companion.backstory.as_mut() {
            backstory.unresolved_threads[0].activate(at(10));
        }
        companion.loyalty = 72;
        CompanionRepo::save(&store, &companion).await.expect("update");

        let loaded = CompanionRepo::get(&store, companion_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(loaded, companion);
    }

    #[tokio::test]
    async fn narrative_queue_expiry_and_cleanup() {
        let (store, _dir) = store().await;
        let character_id = CharacterId::new();
        let item = |priority, hour| {
            NarrativeQueueItem::new(
                character_id,
                NarrativeEventType::WorldEvent,
                priority,
                "Rumor",
                "Smoke rises over the pass",
                at(hour),
            )
        };

        let stale = item(NarrativePriority::Low, 6).expires_at(at(9));
        let fresh = item(NarrativePriority::Urgent, 7);
        let mut delivered = item(NarrativePriority::Normal, 5);
        delivered
            .mark_delivered(SessionId::new(), at(6))
            .expect("deliver");
        for i in [&stale, &fresh, &delivered] {
            store.insert(i).await.expect("insert");
        }

        assert_eq!(
            store.expire_pending_before(at(10)).await.expect("expire"),
            1
        );
        assert_eq!(
            store.expire_pending_before(at(10)).await.expect("expire"),
            0
        );

        let pending =
            NarrativeQueueRepo::list_by_status(&store, character_id, NarrativeItemStatus::Pending)
                .await
                .expect("list");
        assert_eq!(pending, vec![fresh.clone()]);

        let expired = NarrativeQueueRepo::get(&store, stale.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(expired.status, NarrativeItemStatus::Expired);

        let removed = store
            .delete_delivered_before(at(6) + Duration::days(8))
            .await
            .expect("cleanup");
        assert_eq!(removed, 1);
        assert!(NarrativeQueueRepo::get(&store, delivered.id)
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn same_timestamp_items_list_in_insertion_order() {
        let (store, _dir) = store().await;
        let character_id = CharacterId::new();
        let mut inserted = Vec::new();
        for n in 0..20 {
            let item = NarrativeQueueItem::new(
                character_id,
                NarrativeEventType::WorldEvent,
                NarrativePriority::Normal,
                format!("Rumor {n}"),
                "Heard at the inn",
                at(12),
            );
            store.insert(&item).await.expect("insert");
            inserted.push(item.id);
        }

        let listed: Vec<_> =
            NarrativeQueueRepo::list_by_status(&store, character_id, NarrativeItemStatus::Pending)
                .await
                .expect("list")
                .into_iter()
                .map(|i| i.id)
                .collect();
        assert_eq!(listed, inserted);
    }

    #[tokio::test]
    async fn updating_unknown_item_is_not_found() {
        let (store, _dir) = store().await;
        let item = NarrativeQueueItem::new(
            CharacterId::new(),
            NarrativeEventType::Custom,
            NarrativePriority::Flavor,
            "Ghost",
            "Never inserted",
            at(1),
        );
        let err = store.update(&item).await.expect_err("missing row");
        assert!(err.is_not_found());
    }
}
