use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use monitor_worker::config::{MonitorConfig, WorkerArgs};
use monitor_worker::monitor::{JobMonitor, TickResult};
use monitor_worker::pg_store::PgStore;
use monitor_worker::store::Store;
use monitor_worker::MonitorError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "monitor_worker=info".into()),
        )
        .init();

    let args = WorkerArgs::parse();

    if let Err(e) = run(args).await {
        error!("worker exiting: {e}");
        std::process::exit(1);
    }
}

async fn run(args: WorkerArgs) -> Result<(), MonitorError> {
    let cfg = MonitorConfig::from_env()?;

    let store = PgStore::connect(&cfg.database_url(), !cfg.activate_queries).await?;

    info!(job_id = args.job_id, truck_id = args.truck_id, "job monitor starting");

    let tasks = store.tasks_for_job(args.job_id).await?;
    let start_time = chrono::Utc::now();
    let mut monitor = JobMonitor::new(args.job_id, args.truck_id, tasks, start_time);

    let mut interval = tokio::time::interval(Duration::from_millis(200));
    loop {
        interval.tick().await;

        match monitor.tick(&store, &cfg).await? {
            TickResult::Idle | TickResult::Processed { .. } => {}
            TickResult::JobComplete => {
                info!(job_id = args.job_id, "job monitor finished: job complete");
                break;
            }
            TickResult::JobDeactivated => {
                info!(job_id = args.job_id, "job monitor finished: job deactivated");
                break;
            }
        }
    }

    Ok(())
}
