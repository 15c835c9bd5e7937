//! Care Planner Demo
//!
//! Mounts the three reward handlers against an in-memory database and
//! ledger, simulates a morning in the plant-care app and prints the
//! notifications a user would see.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p care-planner
//! RUST_LOG=greenleaf=debug cargo run -p care-planner
//! ```
//!
//! Retry, dead-letter and time-zone settings are read from `GREENLEAF_*`
//! environment variables (see `HandlerConfig::from_env`).

#![allow(missing_docs)]

use greenleaf_core::environment::SystemClock;
use greenleaf_core::event_source::EventSource;
use greenleaf_core::query::{RowCounter, UserId};
use greenleaf_core::rows::{CARE_TASKS, GROWTH_MILESTONES, USER_PLANTS};
use greenleaf_ledger::InMemoryLedger;
use greenleaf_runtime::metrics::MetricsExporter;
use greenleaf_runtime::reactions::{
    MilestoneReaction, PlantAdditionReaction, TaskCompletionReaction,
};
use greenleaf_runtime::{EventReactionHandler, HandlerConfig, RewardContext};
use greenleaf_testing::{InMemoryDatabase, StaticIdentity, fixtures};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

const SETTLE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "greenleaf=info,care_planner=info".into()),
        )
        .init();

    tracing::info!("Starting Care Planner Demo");

    // 2. Configuration and metrics
    let config = HandlerConfig::from_env();
    let exporter = MetricsExporter::install()?;

    // 3. Backend, ledger and shared context
    let user = UserId::new("demo-user");
    let db = Arc::new(InMemoryDatabase::new());
    let ledger = InMemoryLedger::new(user.clone());
    let mut notifications = ledger.subscribe_notifications();

    let context = RewardContext::new(
        Arc::new(ledger.clone()),
        Arc::clone(&db) as Arc<dyn RowCounter>,
        Arc::new(StaticIdentity::signed_in(user.as_str())),
        Arc::new(SystemClock),
    )
    .with_config(&config);

    let source = Arc::clone(&db) as Arc<dyn EventSource>;
    let mut milestones =
        EventReactionHandler::new(MilestoneReaction, Arc::clone(&source), context.clone());
    let mut plants =
        EventReactionHandler::new(PlantAdditionReaction, Arc::clone(&source), context.clone());
    let mut tasks = EventReactionHandler::new(TaskCompletionReaction, source, context.clone());

    milestones.mount().await?;
    plants.mount().await?;
    tasks.mount().await?;
    tracing::info!("✓ Handlers mounted");

    // 4. A user fills their collection
    for i in 1..=5 {
        db.insert(USER_PLANTS, fixtures::plant(&format!("plant-{i}")));
    }
    plants.wait_for_completed(5, SETTLE).await?;

    // 5. Ten milestones on the first plant, one of them a bloom
    for i in 1..=10 {
        let (title, kind) = if i == 4 {
            ("First bloom on the monstera", "flowering")
        } else {
            ("New leaf unfurled", "new_leaf")
        };
        db.insert(
            GROWTH_MILESTONES,
            fixtures::milestone(&format!("milestone-{i}"), "plant-1", title, kind),
        );
        // Sequential, so the row count seen by each reaction is deterministic.
        milestones.wait_for_completed(i, SETTLE).await?;
    }

    // 6. An early watering task
    db.insert(CARE_TASKS, fixtures::pending_task("task-1", "plant-1"));
    db.update(
        CARE_TASKS,
        fixtures::completed_task("task-1", "plant-1", "2025-01-01T06:45:00Z"),
    );
    tasks.wait_for_completed(1, SETTLE).await?;

    // 7. A row the reactions cannot read is skipped
    db.insert(USER_PLANTS, serde_json::json!({ "nickname": "Mystery cutting" }));
    plants.wait_for_completed(6, SETTLE).await?;

    // 8. What the user saw
    loop {
        match notifications.try_recv() {
            Ok(note) => println!("  {note}"),
            Err(TryRecvError::Lagged(missed)) => println!("  ... {missed} notifications missed"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    let stats = ledger.stats();
    tracing::info!(
        total_xp = stats.total_xp,
        level = stats.level,
        next_level_at = stats.xp_for_next_level(),
        streak = stats.current_streak_days,
        achievements = ledger.earned().len(),
        "Final stats"
    );

    let dead_letters = context.dead_letters().len();
    if dead_letters > 0 {
        tracing::warn!(dead_letters, "Some rewards could not be recorded");
    }

    if let Some(rendered) = exporter.render() {
        println!("\n{rendered}");
    }

    // 9. Release subscriptions
    milestones.unmount().await;
    plants.unmount().await;
    tasks.unmount().await;
    tracing::info!("✓ Clean shutdown complete");

    Ok(())
}
