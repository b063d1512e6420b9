//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire an in-memory store, live feed, and engine end to end.
//! - Print the batch report and grouped schedule as JSON for quick sanity checks.

use roster_core::db::open_db_in_memory;
use roster_core::{
    init_stderr_logging, sqlite_backend, EngineConfig, Event, EventStatus, LogDispatcher,
    ScheduleRepository, SchedulingEngine, Worker, MERGE_TABLES,
};
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let level = std::env::args()
        .nth(1)
        .unwrap_or_else(|| roster_core::default_log_level().to_string());
    init_stderr_logging(&level)?;

    println!("roster_core ping={}", roster_core::ping());
    println!("roster_core version={}", roster_core::core_version());

    let config = EngineConfig::default();
    let conn = open_db_in_memory()?;
    let (repo, feed) = sqlite_backend(conn, config.feed_capacity)?;
    let repo: Arc<dyn ScheduleRepository> = repo;

    let mut engine = SchedulingEngine::new(
        config,
        Arc::clone(&repo),
        Arc::new(LogDispatcher),
        Some(EventStatus::Confirmed),
    )?;
    engine.start(feed.subscribe_tables(MERGE_TABLES));

    let store = Arc::clone(engine.store());
    let event = Event::new(
        EventStatus::Confirmed,
        roster_core::model::now_epoch_ms(),
        "Harbour Hall",
        "Pier 3",
    );
    let event_id = store.create_event(&event)?;

    let crew = [
        Worker::new("Ana", "server").with_email("ana@example.com"),
        Worker::new("Ben", "bartender").with_contact("+15550100"),
        Worker::new("Cleo", "runner"),
    ];
    let mut worker_ids = Vec::with_capacity(crew.len());
    for worker in &crew {
        worker_ids.push(store.create_worker(worker)?);
    }

    engine.reload_page(1)?;
    let report = engine.assign_batch(event_id, &worker_ids).await?;
    println!("batch={}", serde_json::to_string_pretty(&report)?);

    let again = engine.assign_batch(event_id, &worker_ids[..1]).await?;
    println!("repeat={}", serde_json::to_string(&again.reports)?);

    println!("grouped={}", serde_json::to_string_pretty(&engine.grouped())?);
    if let Some(page) = engine.current_page() {
        println!(
            "page={}/{} total_count={}",
            page.page_number, page.total_pages, page.total_count
        );
    }

    if let Some(stats) = engine.shutdown().await {
        log::info!(
            "event=cli_done module=cli status=ok applied={} duplicates={} dropped={}",
            stats.applied, stats.duplicates, stats.dropped
        );
    }
    Ok(())
}
