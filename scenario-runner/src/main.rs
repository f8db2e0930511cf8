//! Offline scenario replayer. Reads a JSON scenario file describing a job's
//! task list and an ordered sequence of pickup/drop events, then drives
//! `JobMonitor` directly through its `simulate_pickup`/`simulate_drop` entry
//! points — bypassing the clamp-edge detector and distance gates, the same
//! shortcut the original scenario player takes by calling into the job
//! monitor's validation methods directly instead of replaying telemetry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use monitor_worker::config::MonitorConfig;
use monitor_worker::domain::{Item, LocId, Task};
use monitor_worker::geometry::Coord;
use monitor_worker::mem_store::MemStore;
use monitor_worker::monitor::JobMonitor;

#[derive(Debug, Parser)]
#[command(name = "scenario-runner", about = "Replay a job scenario against the monitor's validator")]
struct Args {
    /// Path to the scenario JSON file.
    scenario: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    job_id: i64,
    truck_id: i64,
    tasks: Vec<ScenarioTask>,
    events: Vec<ScenarioEvent>,
}

#[derive(Debug, Deserialize)]
struct ScenarioTask {
    task_id: i64,
    model: String,
    origin: LocId,
    dest: LocId,
}

#[derive(Debug, Deserialize)]
struct ScenarioEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    location: LocId,
    time: DateTime<Utc>,
    #[serde(default)]
    items: Vec<ScenarioItem>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum EventKind {
    Pickup,
    Drop,
}

#[derive(Debug, Deserialize)]
struct ScenarioItem {
    item_id: i64,
    model: String,
    #[serde(default)]
    serial_lock: i32,
    item_origin: LocId,
}

fn scenario_config() -> MonitorConfig {
    MonitorConfig {
        pickup_check_distance_trigger: 0.0,
        pickup_check_distance_window: 0.0,
        pickup_post_seconds: 0.0,
        drop_check_distance: 0.0,
        drop_pre_seconds: 0.0,
        rfid_wait_timeout: 0,
        activate_queries: true,
        database_host: String::new(),
        database_name: String::new(),
        database_user: String::new(),
        database_password: String::new(),
        enable_noe_salvage: false,
        noe_loc: 79,
    }
}

/// A location id maps to a synthetic coordinate along the x axis so trip
/// distance accounting still behaves sensibly without real telemetry.
fn synthetic_coord(loc_id: LocId) -> Coord {
    Coord::new(loc_id as f64 * 10.0, 0.0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "scenario_runner=info".into()),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.scenario)?;
    let scenario: ScenarioFile = serde_json::from_str(&raw)?;

    let store = MemStore::new();
    store.set_job_active(scenario.job_id, true);

    let tasks: Vec<Task> = scenario
        .tasks
        .iter()
        .map(|t| Task::new(t.task_id, t.model.clone(), t.origin, t.dest))
        .collect();
    store.seed_tasks(scenario.job_id, tasks.clone());

    let cfg = scenario_config();
    let start_time = scenario.events.first().map(|e| e.time).unwrap_or_else(Utc::now);
    let mut monitor = JobMonitor::new(scenario.job_id, scenario.truck_id, tasks, start_time);

    for event in &scenario.events {
        for item in &event.items {
            store.seed_item_detection(
                scenario.truck_id,
                Item {
                    item_id: item.item_id,
                    model: item.model.clone(),
                    serial_lock: item.serial_lock,
                    item_origin: item.item_origin,
                    correct_loc_id: None,
                },
                event.time,
            );
        }

        let coord = synthetic_coord(event.location);
        match event.kind {
            EventKind::Pickup => {
                info!(loc = event.location, "replaying pickup event");
                monitor.simulate_pickup(&store, &cfg, event.location, coord, event.time).await?;
            }
            EventKind::Drop => {
                info!(loc = event.location, "replaying drop event");
                monitor.simulate_drop(&store, &cfg, event.location, coord, event.time).await?;
            }
        }
    }

    info!(
        tasks_complete = monitor.tasks().iter().filter(|t| t.complete).count(),
        tasks_total = monitor.tasks().len(),
        job_complete = monitor.is_complete(),
        "scenario replay finished"
    );

    for task in monitor.tasks() {
        println!(
            "task {} ({}): {} item={:?}",
            task.task_id,
            task.model,
            if task.complete { "complete" } else { "open" },
            task.item_id
        );
    }

    Ok(())
}
