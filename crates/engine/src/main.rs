//! Talekeeper Engine - Main entry point.
//!
//! Replays newline-delimited JSON events (`{"type": ..., "data": {...}}`)
//! from a file argument or stdin through the progression engine, then prints
//! the narrator digest for every character seen.

use std::collections::BTreeSet;

use anyhow::Context;
use serde::Deserialize;
use talekeeper_domain::events::payload::get_str;
use talekeeper_domain::{CharacterId, EventData};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use talekeeper_engine::infrastructure::config::EngineConfig;
use talekeeper_engine::App;

#[derive(Debug, Deserialize)]
struct InputEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: EventData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the binary may run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talekeeper_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Talekeeper Engine");

    let config = EngineConfig::from_env()?;
    tracing::info!(
        storage = ?config.storage,
        event_history = config.event_history,
        batch_size = config.batch_size,
        "Configuration loaded"
    );

    let app = App::from_config(&config).await?;

    let characters = match std::env::args().nth(1) {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening event file {path}"))?;
            replay(&app, BufReader::new(file)).await?
        }
        None => replay(&app, BufReader::new(tokio::io::stdin())).await?,
    };

    for character_id in characters {
        match app
            .queue
            .format_for_ai_context(character_id, config.batch_size)
            .await
        {
            Ok(Some(digest)) => println!("== {character_id}\n{}", digest.summary),
            Ok(None) => println!("== {character_id}\n(nothing pending)"),
            Err(e) => {
                tracing::warn!(character_id = %character_id, error = %e, "Failed to build digest")
            }
        }
    }

    let expired = app.queue.expire_old_items().await?;
    let removed = app
        .queue
        .cleanup_delivered_items(config.delivered_retention_days)
        .await?;
    tracing::info!(expired, removed, "Narrative queue maintenance done");

    Ok(())
}

/// Emit every event line on the bus. Returns the characters that appeared.
async fn replay<R>(app: &App, reader: R) -> anyhow::Result<BTreeSet<CharacterId>>
where
    R: AsyncBufRead + Unpin,
{
    let mut characters = BTreeSet::new();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("reading events")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let input: InputEvent = match serde_json::from_str(line) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed event line");
                continue;
            }
        };

        characters.extend(
            get_str(&input.data, "character_id").and_then(|id| id.parse::<CharacterId>().ok()),
        );
        let results = app.bus.emit(&input.event_type, input.data).await;

        for result in &results {
            if result.success {
                tracing::info!(
                    line = line_no,
                    event_type = %input.event_type,
                    handler = %result.handler_name,
                    result = ?result.result,
                    "Handler succeeded"
                );
            } else {
                tracing::warn!(
                    line = line_no,
                    event_type = %input.event_type,
                    handler = %result.handler_name,
                    error = ?result.error,
                    "Handler failed"
                );
            }
        }
    }

    Ok(characters)
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
