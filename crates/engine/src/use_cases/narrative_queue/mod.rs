//! Narrative queue - the mailbox between the progression engine and the AI
//! storytelling session.
//!
//! Producers add pending items; the session builder pulls an ordered batch,
//! folds it into its prompt, and marks what it used as delivered. Delivery is
//! cooperative: nothing is marked delivered until the caller says so.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use talekeeper_domain::{
    CharacterId, NarrativeItemId, NarrativeItemStatus, NarrativeQueueItem, SessionId,
};
use tracing::instrument;

use crate::infrastructure::ports::{ClockPort, NarrativeQueueRepo, RepoError};

/// Digest of pending narrative for one AI turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiContextDigest {
    pub summary: String,
    pub items: Vec<NarrativeQueueItem>,
}

pub struct NarrativeQueue {
    repo: Arc<dyn NarrativeQueueRepo>,
    clock: Arc<dyn ClockPort>,
}

impl NarrativeQueue {
    pub fn new(repo: Arc<dyn NarrativeQueueRepo>, clock: Arc<dyn ClockPort>) -> Self {
        Self { repo, clock }
    }

    /// Queue a new item. Only pending items are accepted.
    #[instrument(skip(self, item), fields(item_id = %item.id, character_id = %item.character_id))]
    pub async fn add_to_queue(
        &self,
        item: NarrativeQueueItem,
    ) -> Result<NarrativeItemId, RepoError> {
        if !item.is_pending() {
            return Err(RepoError::constraint(format!(
                "cannot queue narrative item {} with status {}",
                item.id, item.status
            )));
        }
        self.repo.insert(&item).await?;
        tracing::debug!(
            priority = %item.priority,
            event_type = %item.event_type,
            "Narrative item queued"
        );
        Ok(item.id)
    }

    /// Deliverable items in queue order: priority tier, then oldest first.
    /// The sort is stable, so equal timestamps keep insertion order.
    pub async fn get_pending_items(
        &self,
        character_id: CharacterId,
    ) -> Result<Vec<NarrativeQueueItem>, RepoError> {
        let now = self.clock.now();
        let mut items: Vec<NarrativeQueueItem> = self
            .repo
            .list_by_status(character_id, NarrativeItemStatus::Pending)
            .await?
            .into_iter()
            .filter(|item| item.is_deliverable_at(now))
            .collect();
        items.sort_by(|a, b| a.delivery_order(b));
        Ok(items)
    }

    /// Deliverable `urgent` and `high` items, in queue order.
    pub async fn get_urgent_items(
        &self,
        character_id: CharacterId,
    ) -> Result<Vec<NarrativeQueueItem>, RepoError> {
        let mut items = self.get_pending_items(character_id).await?;
        items.retain(|item| item.priority.is_urgent());
        Ok(items)
    }

    /// The first `limit` deliverable items, after sweeping expired ones.
    #[instrument(skip(self))]
    pub async fn get_next_batch(
        &self,
        character_id: CharacterId,
        limit: usize,
    ) -> Result<Vec<NarrativeQueueItem>, RepoError> {
        self.expire_old_items().await?;
        let mut items = self.get_pending_items(character_id).await?;
        items.truncate(limit);
        Ok(items)
    }

    /// `pending -> delivered`. Returns `false`, changing nothing, when the
    /// item is unknown or no longer pending.
    #[instrument(skip(self))]
    pub async fn mark_delivered(
        &self,
        id: NarrativeItemId,
        session_id: SessionId,
    ) -> Result<bool, RepoError> {
        let Some(mut item) = self.repo.get(id).await? else {
            tracing::warn!(item_id = %id, "Cannot deliver unknown narrative item");
            return Ok(false);
        };

        if let Err(e) = item.mark_delivered(session_id, self.clock.now()) {
            tracing::debug!(item_id = %id, reason = %e, "Narrative item left untouched");
            return Ok(false);
        }

        self.repo.update(&item).await?;
        Ok(true)
    }

    /// Deliver several items; returns how many actually moved to delivered.
    pub async fn mark_multiple_delivered(
        &self,
        ids: &[NarrativeItemId],
        session_id: SessionId,
    ) -> Result<usize, RepoError> {
        let mut delivered = 0;
        for id in ids {
            if self.mark_delivered(*id, session_id).await? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Render the next batch as prompt text. `None` when nothing is pending.
    pub async fn format_for_ai_context(
        &self,
        character_id: CharacterId,
        limit: usize,
    ) -> Result<Option<AiContextDigest>, RepoError> {
        let items = self.get_next_batch(character_id, limit).await?;
        if items.is_empty() {
            return Ok(None);
        }

        let mut summary = String::from("Pending story developments to weave into the scene:\n");
        for (index, item) in items.iter().enumerate() {
            summary.push_str(&format!(
                "{}. [{}] {}: {}\n",
                index + 1,
                item.priority.as_str().to_uppercase(),
                item.title,
                item.description
            ));
        }

        Ok(Some(AiContextDigest { summary, items }))
    }

    /// Remove delivered items older than `older_than_days`. A negative or
    /// out-of-range age is a constraint violation and deletes nothing.
    #[instrument(skip(self))]
    pub async fn cleanup_delivered_items(&self, older_than_days: i64) -> Result<usize, RepoError> {
        let cutoff = Duration::try_days(older_than_days)
            .filter(|_| older_than_days >= 0)
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .ok_or_else(|| {
                RepoError::constraint(format!(
                    "cannot clean up items delivered more than {older_than_days} days ago"
                ))
            })?;
        let removed = self.repo.delete_delivered_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "Cleaned up delivered narrative items");
        }
        Ok(removed)
    }

    /// Expire every pending item whose `expires_at` has passed. Safe to call
    /// any number of times.
    pub async fn expire_old_items(&self) -> Result<usize, RepoError> {
        let expired = self.repo.expire_pending_before(self.clock.now()).await?;
        if expired > 0 {
            tracing::debug!(expired, "Expired narrative items");
        }
        Ok(expired)
    }

    pub async fn get_item(
        &self,
        id: NarrativeItemId,
    ) -> Result<Option<NarrativeQueueItem>, RepoError> {
        self.repo.get(id).await
    }

    /// Number of currently deliverable items.
    pub async fn pending_count(&self, character_id: CharacterId) -> Result<usize, RepoError> {
        Ok(self.get_pending_items(character_id).await?.len())
    }
}
