//! Pickup/drop validation: classifies sensed items against a job's open
//! tasks, including the "alleged wrong item" swap that avoids forcing the
//! driver to move a specific physical unit when an equivalent one already
//! satisfies the task.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::domain::{AlertType, Item, ItemId, JobId, LocId, Task, TruckId};
use crate::error::StoreError;
use crate::geometry::Coord;
use crate::store::Store;

/// Outcome of pickup validation the monitor must react to (trip/carry
/// lifecycle is the monitor's responsibility, not the validator's).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PickupOutcome {
    pub finalize_trip: bool,
    pub armed_clamp_event_watch: bool,
}

/// Outcome of drop validation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DropOutcome {
    pub items_classified: usize,
    pub correct_count: usize,
    pub finalize_trip: bool,
    pub finalize_carry_item_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Correct,
    Returned,
    Wrong,
}

/// Holds the cross-pickup/drop correlation state the original source keeps
/// on the job monitor itself: which origins/destinations are "correct" per
/// the job's task list, which origins have seen a validated pickup, and
/// which item ids were most recently sensed at pickup and not yet resolved
/// by a drop.
pub struct Validator {
    correct_origins: HashSet<LocId>,
    correct_dests: HashSet<LocId>,
    pickup_history: Vec<LocId>,
    latest_pickup_item_ids: Vec<ItemId>,
    /// Truck speed samples since the last task completion (or job start);
    /// shared across every open task, not kept per-task. Reset whenever a
    /// drop closes at least one task.
    speed_accumulator: Vec<f64>,
    task_completion_times: Vec<DateTime<Utc>>,
    job_start_time: DateTime<Utc>,
}

impl Validator {
    pub fn new(tasks: &[Task], job_start_time: DateTime<Utc>) -> Self {
        let correct_origins = tasks.iter().map(|t| t.origin).collect();
        let correct_dests = tasks.iter().map(|t| t.dest).collect();
        Self {
            correct_origins,
            correct_dests,
            pickup_history: Vec::new(),
            latest_pickup_item_ids: Vec::new(),
            speed_accumulator: Vec::new(),
            task_completion_times: Vec::new(),
            job_start_time,
        }
    }

    pub fn is_correct_origin(&self, loc_id: LocId) -> bool {
        self.correct_origins.contains(&loc_id)
    }

    pub fn is_correct_dest(&self, loc_id: LocId) -> bool {
        self.correct_dests.contains(&loc_id)
    }

    /// Feeds one location sample's speed into the shared task-speed
    /// accumulator. Called for every sample regardless of clamp state.
    pub fn record_speed(&mut self, speed: f64) {
        self.speed_accumulator.push(speed);
    }

    fn task_avg_speed(&self) -> Option<f64> {
        if self.speed_accumulator.is_empty() {
            return None;
        }
        let mean = self.speed_accumulator.iter().sum::<f64>() / self.speed_accumulator.len() as f64;
        Some((mean * 100.0).round() / 100.0)
    }

    fn task_start_time(&self) -> DateTime<Utc> {
        self.task_completion_times.last().copied().unwrap_or(self.job_start_time)
    }

    /// §4.4 pickup validation. `now` is the sample timestamp that tripped the
    /// distance gate (arming happens earlier in the monitor loop).
    #[allow(clippy::too_many_arguments)]
    pub async fn on_pickup(
        &mut self,
        store: &dyn Store,
        cfg: &MonitorConfig,
        job_id: JobId,
        truck_id: TruckId,
        tasks: &[Task],
        pickup_loc: LocId,
        pickup_coord: Coord,
        pickup_time: DateTime<Utc>,
    ) -> Result<PickupOutcome, StoreError> {
        let back_window_start = self
            .find_back_window_start(store, truck_id, pickup_coord, pickup_time, cfg.pickup_check_distance_window)
            .await?;
        let load_query_end = pickup_time + chrono::Duration::milliseconds((cfg.pickup_post_seconds * 1000.0) as i64);

        store.wait_for_rfid(truck_id, load_query_end, cfg.rfid_wait_timeout).await;
        let detected = store.items_detected(truck_id, back_window_start, load_query_end).await?;
        for item in &detected {
            if !self.latest_pickup_item_ids.contains(&item.item_id) {
                self.latest_pickup_item_ids.push(item.item_id);
            }
        }

        let correct_origin = self.is_correct_origin(pickup_loc);
        let open_tasks_remain = tasks.iter().any(|t| !t.complete);

        let mut outcome = PickupOutcome::default();

        if correct_origin {
            store.cancel_alerts_by_type(job_id, AlertType::ClampsClosedWarning).await?;
            self.pickup_history.push(pickup_loc);
            outcome.finalize_trip = true;
        }

        if !self.is_correct_dest(pickup_loc) && open_tasks_remain {
            let alert_type = if correct_origin {
                AlertType::ClampsClosedEvent
            } else {
                AlertType::ClampsClosedWarning
            };
            store.create_alert(job_id, pickup_loc, alert_type, None, None, pickup_time).await?;
            outcome.armed_clamp_event_watch = correct_origin;
        }

        Ok(outcome)
    }

    /// Scans backward from `pickup_time` (bounded to 60s prior) for the
    /// latest sample at least `window` meters from `pickup_coord`; that
    /// sample's timestamp is the start of the RFID back-window. If none is
    /// found, the window starts at `pickup_time - 60s`.
    async fn find_back_window_start(
        &self,
        store: &dyn Store,
        truck_id: TruckId,
        pickup_coord: Coord,
        pickup_time: DateTime<Utc>,
        window: f64,
    ) -> Result<DateTime<Utc>, StoreError> {
        let lower_bound = pickup_time - chrono::Duration::seconds(60);
        let samples = store.loc_samples_desc(truck_id, lower_bound, pickup_time).await?;
        for sample in samples {
            if crate::geometry::distance(sample.coord, pickup_coord) >= window {
                return Ok(sample.timestamp);
            }
        }
        Ok(lower_bound)
    }

    /// §4.4 drop validation. `now` is the sample timestamp that tripped the
    /// distance gate.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_drop(
        &mut self,
        store: &dyn Store,
        cfg: &MonitorConfig,
        job_id: JobId,
        truck_id: TruckId,
        tasks: &mut [Task],
        drop_loc: LocId,
        drop_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DropOutcome, StoreError> {
        let window_start = drop_time - chrono::Duration::milliseconds((cfg.drop_pre_seconds * 1000.0) as i64);
        store.wait_for_rfid(truck_id, now, cfg.rfid_wait_timeout).await;
        let sensed = store.items_detected(truck_id, window_start, now).await?;

        let mut checked = Vec::new();
        for item in sensed {
            let from_this_pickup = self.latest_pickup_item_ids.contains(&item.item_id);
            let from_prior_pickup_history = self.pickup_history.contains(&item.item_origin);
            let suppressed = !self.is_correct_origin(item.item_origin)
                && store.loc_has_active_drop_location_alert(job_id, item.item_origin).await?;
            if from_this_pickup || (from_prior_pickup_history && !suppressed) {
                checked.push(item);
            }
        }

        let salvage_active = cfg.enable_noe_salvage
            && drop_loc == cfg.noe_loc
            && (store.has_cannot_place_alerts(job_id).await? || store.has_damaged_item_alerts(job_id).await?);

        let mut correct_ids = Vec::new();
        let mut returned_ids = Vec::new();
        let mut wrong_items = Vec::new();
        let mut reserved_tasks: HashSet<i64> = HashSet::new();

        for item in &checked {
            let classification = self
                .classify_item(store, job_id, tasks, item, drop_loc, drop_time, salvage_active)
                .await?;
            match classification {
                Classification::Correct => correct_ids.push(item.item_id),
                Classification::Returned => returned_ids.push(item.item_id),
                Classification::Wrong => wrong_items.push(item.clone()),
            }
        }

        let mut resolved_wrong = Vec::new();
        for mut item in wrong_items {
            let reservation = tasks.iter_mut().find(|t| {
                !t.complete
                    && !reserved_tasks.contains(&t.task_id)
                    && t.model == item.model
                    && t.origin == item.item_origin
            });
            match reservation {
                Some(task) => {
                    reserved_tasks.insert(task.task_id);
                    item.correct_loc_id = Some(task.dest);
                }
                None => item.correct_loc_id = Some(item.item_origin),
            }
            resolved_wrong.push(item);
        }

        let any_classified = !correct_ids.is_empty() || !returned_ids.is_empty() || !resolved_wrong.is_empty();
        let at_correct_dest = self.is_correct_dest(drop_loc);

        if !correct_ids.is_empty() && at_correct_dest {
            self.speed_accumulator.clear();
            self.task_completion_times.push(drop_time);
        }

        if !returned_ids.is_empty() {
            store.cancel_alerts_by_items(job_id, &returned_ids).await?;
        }

        if !resolved_wrong.is_empty() {
            let alert_type = if at_correct_dest { AlertType::DropItems } else { AlertType::DropLocation };
            for item in &resolved_wrong {
                store
                    .create_alert(job_id, drop_loc, alert_type, Some(item.item_id), item.correct_loc_id, drop_time)
                    .await?;
            }
        }

        let mut finalize_trip = false;
        if any_classified && at_correct_dest {
            finalize_trip = true;
        }

        let mut finalize_carry_item_count = None;
        if !correct_ids.is_empty() {
            store.cancel_alerts_by_items(job_id, &correct_ids).await?;
            finalize_carry_item_count = Some(correct_ids.len() as u32);
            self.check_remaining_tasks(store, job_id, tasks, drop_loc, drop_time).await?;
        }

        self.latest_pickup_item_ids.clear();

        Ok(DropOutcome {
            items_classified: correct_ids.len() + returned_ids.len() + resolved_wrong.len(),
            correct_count: correct_ids.len(),
            finalize_trip,
            finalize_carry_item_count,
        })
    }

    async fn classify_item(
        &self,
        store: &dyn Store,
        job_id: JobId,
        tasks: &mut [Task],
        item: &Item,
        drop_loc: LocId,
        drop_time: DateTime<Utc>,
        salvage_active: bool,
    ) -> Result<Classification, StoreError> {
        if item.is_fungible() {
            if let Some(task) = tasks
                .iter_mut()
                .find(|t| t.is_open_for(&item.model, item.item_origin) && t.dest == drop_loc)
            {
                task.bind(item.item_id, self.task_start_time(), drop_time, self.task_avg_speed());
                store.save_task(task).await?;
                store.update_item_location(item.item_id, drop_loc).await?;
                return Ok(Classification::Correct);
            }

            if salvage_active {
                if let Some(task) = tasks.iter_mut().find(|t| t.is_open_for(&item.model, item.item_origin)) {
                    task.bind(item.item_id, self.task_start_time(), drop_time, self.task_avg_speed());
                    store.save_task(task).await?;
                    store.update_item_location(item.item_id, drop_loc).await?;
                    return Ok(Classification::Correct);
                }
            }
        }

        if item.item_origin == drop_loc {
            return Ok(Classification::Returned);
        }

        self.alleged_wrong_swap(store, job_id, tasks, item, drop_loc, drop_time).await
    }

    /// §4.4 alleged-wrong swap: reclassifies an item that matches no open
    /// task by checking whether it is interchangeable with the item already
    /// bound to a completed task of the same model.
    async fn alleged_wrong_swap(
        &self,
        store: &dyn Store,
        job_id: JobId,
        tasks: &mut [Task],
        item: &Item,
        drop_loc: LocId,
        drop_time: DateTime<Utc>,
    ) -> Result<Classification, StoreError> {
        if !item.is_fungible() {
            return Ok(Classification::Wrong);
        }

        let prior_idx = tasks
            .iter()
            .position(|t| t.complete && t.item_id == Some(item.item_id) && t.model == item.model);
        let Some(prior_idx) = prior_idx else {
            return Ok(Classification::Wrong);
        };

        let alerts = store.alerts_matching(job_id, item).await?;
        if alerts.is_empty() {
            return Ok(Classification::Wrong);
        }

        let prior_origin = tasks[prior_idx].origin;

        if prior_origin != drop_loc {
            let correction_idx = tasks
                .iter()
                .position(|t| !t.complete && t.model == item.model && t.dest == drop_loc);
            let alert = alerts.iter().find(|a| a.correct_loc_id == Some(drop_loc));

            match (correction_idx, alert) {
                (Some(correction_idx), Some(alert)) => {
                    let swap_item_id = alert.item_id.unwrap_or(item.item_id);
                    tasks[prior_idx].item_id = Some(swap_item_id);
                    store.save_task(&tasks[prior_idx]).await?;

                    tasks[correction_idx].bind(item.item_id, self.task_start_time(), drop_time, self.task_avg_speed());
                    store.save_task(&tasks[correction_idx]).await?;

                    if let Some(alert_id) = alert.alert_id {
                        store.cancel_alert(alert_id).await?;
                    }
                    Ok(Classification::Correct)
                }
                _ => Ok(Classification::Wrong),
            }
        } else {
            let alert = &alerts[0];
            let swap_item_id = alert.item_id.unwrap_or(item.item_id);
            tasks[prior_idx].item_id = Some(swap_item_id);
            store.save_task(&tasks[prior_idx]).await?;
            if let Some(alert_id) = alert.alert_id {
                store.cancel_alert(alert_id).await?;
            }
            Ok(Classification::Returned)
        }
    }

    async fn check_remaining_tasks(
        &self,
        store: &dyn Store,
        job_id: JobId,
        tasks: &[Task],
        drop_loc: LocId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let remaining = tasks.iter().any(|t| !t.complete && t.dest == drop_loc);
        if remaining {
            store.create_alert(job_id, drop_loc, AlertType::RemainingTasks, None, None, now).await?;
        } else {
            store.cancel_remaining_tasks_alert(drop_loc).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;
    use crate::mem_store::MemStore;
    use chrono::TimeZone;

    fn ts(sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap() + chrono::Duration::seconds(sec)
    }

    fn cfg() -> MonitorConfig {
        MonitorConfig {
            pickup_check_distance_trigger: 5.0,
            pickup_check_distance_window: 5.0,
            pickup_post_seconds: 5.0,
            drop_check_distance: 5.0,
            drop_pre_seconds: 5.0,
            rfid_wait_timeout: 1,
            activate_queries: true,
            database_host: String::new(),
            database_name: String::new(),
            database_user: String::new(),
            database_password: String::new(),
            enable_noe_salvage: false,
            noe_loc: 79,
        }
    }

    #[tokio::test]
    async fn happy_path_single_task_closes_on_correct_drop() {
        let store = MemStore::new();
        let item = Item { item_id: 7, model: "A".into(), serial_lock: 0, item_origin: 1, correct_loc_id: None };
        store.seed_item_detection(100, item.clone(), ts(5));

        let mut tasks = vec![Task::new(1, "A".into(), 1, 2)];
        let mut validator = Validator::new(&tasks, ts(0));

        validator
            .on_pickup(&store, &cfg(), 1, 100, &tasks, 1, Coord::new(0.0, 0.0), ts(10))
            .await
            .unwrap();

        // The dock-side reader senses the item again as it crosses the drop
        // gate; the pickup-time detection alone is outside the drop window.
        store.seed_item_detection(100, item, ts(27));
        let outcome = validator
            .on_drop(&store, &cfg(), 1, 100, &mut tasks, 2, ts(30), ts(31))
            .await
            .unwrap();

        assert_eq!(outcome.correct_count, 1);
        assert!(tasks[0].complete);
        assert_eq!(tasks[0].item_id, Some(7));
    }

    #[tokio::test]
    async fn serial_locked_item_never_classified_correct() {
        let store = MemStore::new();
        let item = Item { item_id: 9, model: "A".into(), serial_lock: 1, item_origin: 1, correct_loc_id: None };
        store.seed_item_detection(100, item.clone(), ts(5));

        let mut tasks = vec![Task::new(1, "A".into(), 1, 2)];
        let mut validator = Validator::new(&tasks, ts(0));
        validator
            .on_pickup(&store, &cfg(), 1, 100, &tasks, 1, Coord::new(0.0, 0.0), ts(10))
            .await
            .unwrap();
        store.seed_item_detection(100, item, ts(27));
        let outcome = validator
            .on_drop(&store, &cfg(), 1, 100, &mut tasks, 2, ts(30), ts(31))
            .await
            .unwrap();

        assert_eq!(outcome.correct_count, 0);
        assert!(!tasks[0].complete);
    }

    /// Two open tasks share an origin and model; item 7 satisfies the first
    /// at its drop, leaving item 8 stranded and alleged-wrong there. When
    /// item 7 is later found at item 8's intended destination, the swap
    /// reassigns both tasks' bindings instead of leaving item 7 unresolved.
    #[tokio::test]
    async fn alleged_wrong_item_swap_reassigns_completed_tasks() {
        let store = MemStore::new();
        let mut tasks = vec![Task::new(1, "A".into(), 1, 2), Task::new(2, "A".into(), 1, 5)];
        let mut validator = Validator::new(&tasks, ts(0));

        let item7 = Item { item_id: 7, model: "A".into(), serial_lock: 0, item_origin: 1, correct_loc_id: None };
        let item8 = Item { item_id: 8, model: "A".into(), serial_lock: 0, item_origin: 1, correct_loc_id: None };
        store.seed_item_detection(100, item7.clone(), ts(8));
        store.seed_item_detection(100, item8.clone(), ts(8));
        validator
            .on_pickup(&store, &cfg(), 1, 100, &tasks, 1, Coord::new(0.0, 0.0), ts(10))
            .await
            .unwrap();

        // Both items drop at L2: item 7 satisfies task 1 (dest L2); item 8
        // has nowhere open at L2 and is alleged-wrong against task 2's L5.
        store.seed_item_detection(100, item7.clone(), ts(27));
        store.seed_item_detection(100, item8, ts(27));
        let outcome = validator
            .on_drop(&store, &cfg(), 1, 100, &mut tasks, 2, ts(30), ts(31))
            .await
            .unwrap();
        assert_eq!(outcome.correct_count, 1);
        assert!(tasks[0].complete);
        assert_eq!(tasks[0].item_id, Some(7));
        assert!(!tasks[1].complete);
        assert!(store.has_active_alerts(1).await.unwrap());

        // Item 7 is moved off L2 and re-sensed; a clamp event at L2 (not a
        // task origin) still updates the pickup-sensed set.
        store.seed_item_detection(100, item7.clone(), ts(42));
        validator
            .on_pickup(&store, &cfg(), 1, 100, &tasks, 2, Coord::new(0.0, 0.0), ts(40))
            .await
            .unwrap();

        // Dropped at L5 — the alert's correct_loc_id — item 7 triggers the
        // swap: task 1 is reassigned to item 8, task 2 closes with item 7.
        store.seed_item_detection(100, item7, ts(57));
        let outcome = validator
            .on_drop(&store, &cfg(), 1, 100, &mut tasks, 5, ts(60), ts(61))
            .await
            .unwrap();

        assert_eq!(outcome.correct_count, 1);
        assert!(tasks[0].complete);
        assert_eq!(tasks[0].item_id, Some(8));
        assert!(tasks[1].complete);
        assert_eq!(tasks[1].item_id, Some(7));
        assert!(!store.has_active_alerts(1).await.unwrap());
    }
}
