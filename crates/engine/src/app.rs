//! Application state and composition.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::infrastructure::{
    clock::SystemClock,
    config::{EngineConfig, StorageBackend},
    event_bus::{EventBus, Subscription},
    memory_store::InMemoryStore,
    ports::{ClockPort, CompanionRepo, NarrativeQueueRepo, QuestRepo},
    sqlite_store::SqliteStore,
};
use crate::use_cases::{
    subscriptions, CompanionTriggerMatcher, NarrativeQueue, QuestProgressChecker,
};

/// Container for the repository ports. A single store usually backs all
/// three.
#[derive(Clone)]
pub struct Repositories {
    pub quest: Arc<dyn QuestRepo>,
    pub companion: Arc<dyn CompanionRepo>,
    pub narrative_queue: Arc<dyn NarrativeQueueRepo>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: QuestRepo + CompanionRepo + NarrativeQueueRepo + 'static,
    {
        Self {
            quest: store.clone(),
            companion: store.clone(),
            narrative_queue: store,
        }
    }
}

/// Main application state.
///
/// Owns the event bus and the use cases subscribed to it.
pub struct App {
    pub bus: EventBus,
    pub queue: Arc<NarrativeQueue>,
    pub quests: Arc<QuestProgressChecker>,
    pub companions: Arc<CompanionTriggerMatcher>,
    pub subscriptions: Vec<Subscription>,
}

impl App {
    pub async fn new(
        repos: Repositories,
        clock: Arc<dyn ClockPort>,
        config: &EngineConfig,
    ) -> Self {
        let bus = EventBus::new(clock.clone(), config.event_history);
        let queue = Arc::new(NarrativeQueue::new(repos.narrative_queue, clock.clone()));

        let quests = Arc::new(QuestProgressChecker::new(
            repos.quest,
            queue.clone(),
            bus.downgrade(),
            clock.clone(),
        ));
        let companions = Arc::new(CompanionTriggerMatcher::new(
            repos.companion,
            queue.clone(),
            bus.downgrade(),
            clock,
        ));

        let subscriptions = subscriptions::register(&bus, quests.clone(), companions.clone()).await;

        Self {
            bus,
            queue,
            quests,
            companions,
            subscriptions,
        }
    }

    /// Build the storage backend named by `config` and compose the app on
    /// the system clock.
    pub async fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let repos = match config.storage {
            StorageBackend::Sqlite => {
                if let Some(parent) = Path::new(&config.db_path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).with_context(|| {
                            format!("creating database directory {}", parent.display())
                        })?;
                    }
                }
                tracing::info!(path = %config.db_path, "Opening SQLite store");
                let store = SqliteStore::new(&config.db_path)
                    .await
                    .with_context(|| format!("opening database {}", config.db_path))?;
                Repositories::from_store(Arc::new(store))
            }
            StorageBackend::Memory => {
                tracing::info!("Using in-memory store");
                Repositories::from_store(Arc::new(InMemoryStore::new()))
            }
        };

        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());
        Ok(Self::new(repos, clock, config).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talekeeper_domain::event_types;

    #[tokio::test]
    async fn memory_app_registers_handlers() {
        let config = EngineConfig {
            storage: StorageBackend::Memory,
            ..EngineConfig::default()
        };
        let app = App::from_config(&config).await.expect("app");
        assert_eq!(
            app.bus.handler_count(event_types::ADVENTURE_COMPLETE).await,
            2
        );
        assert_eq!(
            app.subscriptions.len(),
            event_types::GAMEPLAY_EVENTS.len() * 2 + 1
        );
    }

    #[tokio::test]
    async fn sqlite_app_creates_database_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("talekeeper.db");
        let config = EngineConfig {
            storage: StorageBackend::Sqlite,
            db_path: db_path.to_string_lossy().into_owned(),
            ..EngineConfig::default()
        };
        let app = App::from_config(&config).await.expect("app");
        assert!(db_path.exists());
        assert_eq!(
            app.bus
                .handler_count(event_types::COMPANION_LOYALTY_CHANGED)
                .await,
            1
        );
    }
}
