//! Postgres-backed [`Store`] implementation.
//!
//! Every query is parameterized — the source this crate is grounded on
//! built its SQL by string-interpolating ids directly, which this
//! implementation does not repeat (§9 design note). `dry_run` no-ops every
//! mutating method while still logging the intended effect, matching
//! `activate_queries = false` in the original configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::info;

use crate::domain::{
    Alert, AlertId, AlertType, Carry, Item, ItemId, JobId, LocId, LocSample, LocType, Task, TruckId,
};
use crate::error::StoreError;
use crate::geometry::Coord;
use crate::store::Store;

pub struct PgStore {
    pool: PgPool,
    dry_run: bool,
}

impl PgStore {
    pub async fn connect(database_url: &str, dry_run: bool) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::fatal(format!("failed to connect to store: {e}")))?;
        Ok(Self { pool, dry_run })
    }
}

fn loc_type_from_str(s: &str) -> LocType {
    match s {
        "stow" => LocType::Stow,
        "dock" => LocType::Dock,
        "dockOS" => LocType::DockOutside,
        "aisle" => LocType::Aisle,
        "charging" => LocType::Charging,
        _ => LocType::Other,
    }
}

fn alert_type_to_str(t: AlertType) -> &'static str {
    match t {
        AlertType::ClampsClosedEvent => "clamps_closed_event",
        AlertType::ClampsClosedWarning => "clamps_closed_warning",
        AlertType::DropItems => "drop_items",
        AlertType::DropLocation => "drop_location",
        AlertType::RemainingTasks => "remaining_tasks",
        AlertType::CannotPlace => "cannot_place",
        AlertType::DamagedItem => "damaged_item",
    }
}

fn alert_type_from_str(s: &str) -> Option<AlertType> {
    Some(match s {
        "clamps_closed_event" => AlertType::ClampsClosedEvent,
        "clamps_closed_warning" => AlertType::ClampsClosedWarning,
        "drop_items" => AlertType::DropItems,
        "drop_location" => AlertType::DropLocation,
        "remaining_tasks" => AlertType::RemainingTasks,
        "cannot_place" => AlertType::CannotPlace,
        "damaged_item" => AlertType::DamagedItem,
        _ => return None,
    })
}

struct TaskRow(Task);

impl FromRow<'_, PgRow> for TaskRow {
    fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        let mut task = Task::new(
            row.try_get("task_id")?,
            row.try_get("model")?,
            row.try_get("origin")?,
            row.try_get("dest")?,
        );
        task.complete = row.try_get("complete")?;
        task.item_id = row.try_get("item_id")?;
        task.start_time = row.try_get("start_time")?;
        task.finish_time = row.try_get("finish_time")?;
        task.avg_speed = row.try_get("avg_speed")?;
        Ok(TaskRow(task))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn is_job_active(&self, job_id: JobId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT active FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<bool, _>("active")).unwrap_or(false))
    }

    async fn tasks_for_job(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT task_id, model, origin, dest, complete, item_id, start_time, finish_time, avg_speed \
             FROM tasks WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn location_stream_since(
        &self,
        truck_id: TruckId,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocSample>, StoreError> {
        let rows = sqlx::query(
            "SELECT loc_id, loc_type, x, y, speed, clamp_status, ts FROM loc_data \
             WHERE truck_id = $1 AND ts > $2 ORDER BY ts ASC",
        )
        .bind(truck_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LocSample {
                loc_id: r.get("loc_id"),
                loc_type: loc_type_from_str(r.get::<String, _>("loc_type").as_str()),
                coord: Coord::new(r.get("x"), r.get("y")),
                speed: r.get("speed"),
                clamp_status: r.get::<i32, _>("clamp_status") as u8,
                timestamp: r.get("ts"),
            })
            .collect())
    }

    async fn wait_for_rfid(&self, truck_id: TruckId, target_ts: DateTime<Utc>, timeout_s: u64) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_s);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            let latest = sqlx::query("SELECT latest_rfid_timestamp FROM trucks WHERE truck_id = $1")
                .bind(truck_id)
                .fetch_optional(&self.pool)
                .await
                .ok()
                .flatten()
                .and_then(|r| r.try_get::<DateTime<Utc>, _>("latest_rfid_timestamp").ok());
            if matches!(latest, Some(ts) if ts >= target_ts) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
        }
    }

    async fn items_detected(
        &self,
        truck_id: TruckId,
        t_min: DateTime<Utc>,
        t_max: DateTime<Utc>,
    ) -> Result<Vec<Item>, StoreError> {
        // i.curr_loc_id doubles as "item_origin": the item's current
        // location, i.e. the location this trip is moving it *from*.
        let rows = sqlx::query(
            "SELECT DISTINCT ON (i.item_id) i.item_id, i.model, i.serial_lock, \
             i.curr_loc_id AS item_origin, i.correct_loc_id \
             FROM rfid_detections d JOIN items i ON i.item_id = d.item_id \
             WHERE d.truck_id = $1 AND d.ts BETWEEN $2 AND $3",
        )
        .bind(truck_id)
        .bind(t_min)
        .bind(t_max)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Item {
                item_id: r.get("item_id"),
                model: r.get("model"),
                serial_lock: r.get("serial_lock"),
                item_origin: r.get("item_origin"),
                correct_loc_id: r.get("correct_loc_id"),
            })
            .collect())
    }

    async fn loc_samples_desc(
        &self,
        truck_id: TruckId,
        t_min: DateTime<Utc>,
        t_max: DateTime<Utc>,
    ) -> Result<Vec<LocSample>, StoreError> {
        let rows = sqlx::query(
            "SELECT loc_id, loc_type, x, y, speed, clamp_status, ts FROM loc_data \
             WHERE truck_id = $1 AND ts BETWEEN $2 AND $3 ORDER BY ts DESC",
        )
        .bind(truck_id)
        .bind(t_min)
        .bind(t_max)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LocSample {
                loc_id: r.get("loc_id"),
                loc_type: loc_type_from_str(r.get::<String, _>("loc_type").as_str()),
                coord: Coord::new(r.get("x"), r.get("y")),
                speed: r.get("speed"),
                clamp_status: r.get::<i32, _>("clamp_status") as u8,
                timestamp: r.get("ts"),
            })
            .collect())
    }

    async fn has_active_alerts(&self, job_id: JobId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE job_id = $1 AND active \
             AND alert_type NOT IN ('clamps_closed_event', 'clamps_closed_warning')) AS any_active",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("any_active"))
    }

    async fn loc_has_active_drop_location_alert(&self, job_id: JobId, loc_id: LocId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE job_id = $1 AND loc_id = $2 \
             AND active AND alert_type = 'drop_location') AS any_active",
        )
        .bind(job_id)
        .bind(loc_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("any_active"))
    }

    async fn alerts_matching(&self, job_id: JobId, item: &Item) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(
            "SELECT alert_id, job_id, loc_id, alert_type, item_id, correct_loc_id, active, created_at \
             FROM alerts a JOIN items i ON i.item_id = a.item_id \
             WHERE a.job_id = $1 AND a.active AND a.loc_id = $2 AND i.model = $3",
        )
        .bind(job_id)
        .bind(item.item_origin)
        .bind(&item.model)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(row_to_alert).collect())
    }

    async fn has_cannot_place_alerts(&self, job_id: JobId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE job_id = $1 AND active AND alert_type = 'cannot_place') AS e",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("e"))
    }

    async fn has_damaged_item_alerts(&self, job_id: JobId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE job_id = $1 AND active AND alert_type = 'damaged_item') AS e",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("e"))
    }

    async fn create_alert(
        &self,
        job_id: JobId,
        loc_id: LocId,
        alert_type: AlertType,
        item_id: Option<ItemId>,
        correct_loc_id: Option<LocId>,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.dry_run {
            info!(job_id, loc_id, alert_type = alert_type_to_str(alert_type), ?item_id, "dry-run: create_alert");
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO alerts (job_id, loc_id, alert_type, item_id, correct_loc_id, active, created_at) \
             VALUES ($1, $2, $3, $4, $5, true, $6)",
        )
        .bind(job_id)
        .bind(loc_id)
        .bind(alert_type_to_str(alert_type))
        .bind(item_id)
        .bind(correct_loc_id)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_alert(&self, alert_id: AlertId) -> Result<(), StoreError> {
        if self.dry_run {
            info!(alert_id, "dry-run: cancel_alert");
            return Ok(());
        }
        sqlx::query("UPDATE alerts SET active = false WHERE alert_id = $1")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_alerts_by_type(&self, job_id: JobId, alert_type: AlertType) -> Result<(), StoreError> {
        if self.dry_run {
            info!(job_id, alert_type = alert_type_to_str(alert_type), "dry-run: cancel_alerts_by_type");
            return Ok(());
        }
        sqlx::query("UPDATE alerts SET active = false WHERE job_id = $1 AND alert_type = $2")
            .bind(job_id)
            .bind(alert_type_to_str(alert_type))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_alerts_by_items(&self, job_id: JobId, item_ids: &[ItemId]) -> Result<(), StoreError> {
        if self.dry_run {
            info!(job_id, ?item_ids, "dry-run: cancel_alerts_by_items");
            return Ok(());
        }
        sqlx::query("UPDATE alerts SET active = false WHERE job_id = $1 AND item_id = ANY($2)")
            .bind(job_id)
            .bind(item_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_alerts_by_model_loc(&self, job_id: JobId, model: &str, loc_id: LocId) -> Result<(), StoreError> {
        if self.dry_run {
            info!(job_id, model, loc_id, "dry-run: cancel_alerts_by_model_loc");
            return Ok(());
        }
        sqlx::query(
            "UPDATE alerts a SET active = false FROM items i \
             WHERE a.item_id = i.item_id AND a.job_id = $1 AND i.model = $2 AND a.loc_id = $3",
        )
        .bind(job_id)
        .bind(model)
        .bind(loc_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_remaining_tasks_alert(&self, loc_id: LocId) -> Result<(), StoreError> {
        if self.dry_run {
            info!(loc_id, "dry-run: cancel_remaining_tasks_alert");
            return Ok(());
        }
        sqlx::query("UPDATE alerts SET active = false WHERE loc_id = $1 AND alert_type = 'remaining_tasks'")
            .bind(loc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_item_location(&self, item_id: ItemId, loc_id: LocId) -> Result<(), StoreError> {
        if self.dry_run {
            info!(item_id, loc_id, "dry-run: update_item_location");
            return Ok(());
        }
        sqlx::query("UPDATE items SET curr_loc_id = $1 WHERE item_id = $2")
            .bind(loc_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        if self.dry_run {
            info!(task_id = task.task_id, complete = task.complete, "dry-run: save_task");
            return Ok(());
        }
        sqlx::query(
            "UPDATE tasks SET complete = $1, item_id = $2, start_time = $3, finish_time = $4, avg_speed = $5 \
             WHERE task_id = $6",
        )
        .bind(task.complete)
        .bind(task.item_id)
        .bind(task.start_time)
        .bind(task.finish_time)
        .bind(task.avg_speed)
        .bind(task.task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_job(
        &self,
        job_id: JobId,
        start_time: DateTime<Utc>,
        finish_time: DateTime<Utc>,
        carries: &[Carry],
    ) -> Result<(), StoreError> {
        if self.dry_run {
            info!(job_id, carries = carries.len(), "dry-run: save_job");
            return Ok(());
        }
        sqlx::query("UPDATE jobs SET active = false, start_time = $1, finish_time = $2 WHERE job_id = $3")
            .bind(start_time)
            .bind(finish_time)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        self.save_carries(job_id, carries).await
    }

    async fn save_carries(&self, job_id: JobId, carries: &[Carry]) -> Result<(), StoreError> {
        if self.dry_run {
            info!(job_id, carries = carries.len(), "dry-run: save_carries");
            return Ok(());
        }
        for carry in carries {
            sqlx::query(
                "INSERT INTO carries (job_id, carry_num, origin, dest, item_count, stow_time, dock_time, \
                 total_distance, avg_trip_distance, avg_trip_time) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (job_id, carry_num) DO UPDATE SET \
                 dest = EXCLUDED.dest, item_count = EXCLUDED.item_count, \
                 stow_time = EXCLUDED.stow_time, dock_time = EXCLUDED.dock_time, \
                 total_distance = EXCLUDED.total_distance, \
                 avg_trip_distance = EXCLUDED.avg_trip_distance, avg_trip_time = EXCLUDED.avg_trip_time",
            )
            .bind(job_id)
            .bind(carry.carry_num as i32)
            .bind(carry.origin)
            .bind(carry.dest)
            .bind(carry.item_count as i32)
            .bind(carry.stow_time)
            .bind(carry.dock_time)
            .bind(carry.total_distance)
            .bind(carry.avg_trip_distance)
            .bind(carry.avg_trip_time)
            .execute(&self.pool)
            .await?;

            for trip in &carry.trips {
                sqlx::query(
                    "INSERT INTO carry_trips (job_id, carry_num, origin, dest, start_time, finish_time, \
                     distance, avg_speed, travel_time) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                )
                .bind(job_id)
                .bind(trip.carry_num as i32)
                .bind(trip.origin)
                .bind(trip.dest)
                .bind(trip.start_time)
                .bind(trip.finish_time)
                .bind(trip.distance)
                .bind(trip.avg_speed)
                .bind(trip.travel_time)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

fn row_to_alert(row: PgRow) -> Option<Alert> {
    let alert_type = alert_type_from_str(row.try_get::<String, _>("alert_type").ok()?.as_str())?;
    Some(Alert {
        alert_id: row.try_get("alert_id").ok(),
        job_id: row.try_get("job_id").ok()?,
        loc_id: row.try_get("loc_id").ok()?,
        alert_type,
        item_id: row.try_get("item_id").ok().flatten(),
        correct_loc_id: row.try_get("correct_loc_id").ok().flatten(),
        active: row.try_get("active").ok()?,
        created_at: row.try_get("created_at").ok()?,
    })
}
