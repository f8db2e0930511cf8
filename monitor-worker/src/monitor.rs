//! The per-job tick-based monitor state machine.
//!
//! Mirrors the shape of a tick-driven sequencer: each call to [`JobMonitor::tick`]
//! advances the job by one polling interval, processing every newly arrived
//! location sample in order and returning a [`TickResult`] the caller uses to
//! decide whether to keep polling, the job finished, or the job was
//! deactivated out from under the worker.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::clamp;
use crate::config::MonitorConfig;
use crate::domain::{Carry, JobId, LocId, LocSample, Task, Trip, TruckId};
use crate::error::MonitorError;
use crate::geometry::{distance, Coord};
use crate::store::Store;
use crate::validator::Validator;

#[derive(Debug, Clone, Copy)]
struct PickupArm {
    coord: Coord,
    time: DateTime<Utc>,
    loc: LocId,
}

#[derive(Debug, Clone, Copy)]
struct DropArm {
    coord: Coord,
    time: DateTime<Utc>,
    loc: LocId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Job inactive or no new samples — nothing to report this tick.
    Idle,
    /// Processed `samples` new location samples.
    Processed { samples: usize },
    /// Job's open tasks and active alerts both reached zero — analytics
    /// persisted and the worker should exit.
    JobComplete,
    /// `is_job_active` flipped false — the supervisor reassigned this truck.
    /// The worker should release its store handle and exit.
    JobDeactivated,
}

pub struct JobMonitor {
    job_id: JobId,
    truck_id: TruckId,
    tasks: Vec<Task>,
    carries: Vec<Carry>,
    validator: Validator,
    cursor: DateTime<Utc>,
    prev_clamp_status: Option<u8>,
    current_loc: Option<LocId>,
    current_coord: Option<Coord>,
    pickup_armed: Option<PickupArm>,
    drop_armed: Option<DropArm>,
    clamp_event_watch: Option<Coord>,
    job_start_time: DateTime<Utc>,
    complete: bool,
}

impl JobMonitor {
    pub fn new(job_id: JobId, truck_id: TruckId, tasks: Vec<Task>, start_time: DateTime<Utc>) -> Self {
        let validator = Validator::new(&tasks, start_time);
        Self {
            job_id,
            truck_id,
            tasks,
            carries: Vec::new(),
            validator,
            cursor: start_time,
            prev_clamp_status: None,
            current_loc: None,
            current_coord: None,
            pickup_armed: None,
            drop_armed: None,
            clamp_event_watch: None,
            job_start_time: start_time,
            complete: false,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn carries(&self) -> &[Carry] {
        &self.carries
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn open_tasks_remain(&self) -> bool {
        self.tasks.iter().any(|t| !t.complete)
    }

    fn ensure_carry_open(&mut self, loc: LocId) {
        if self.carries.iter().all(|c| c.dest.is_some()) {
            let carry_num = self.carries.len() as u32 + 1;
            let mut carry = Carry::new(carry_num, loc);
            carry.trips.push(Trip::new(carry_num, loc, self.cursor));
            self.carries.push(carry);
        }
    }

    fn open_carry_mut(&mut self) -> &mut Carry {
        self.carries.last_mut().expect("ensure_carry_open called before use")
    }

    fn current_trip_mut(&mut self) -> &mut Trip {
        self.open_carry_mut().trips.last_mut().expect("a carry always has an open trip")
    }

    /// Advances the current tick by processing every sample the store has
    /// produced since the cursor.
    pub async fn tick(&mut self, store: &dyn Store, cfg: &MonitorConfig) -> Result<TickResult, MonitorError> {
        if !store.is_job_active(self.job_id).await? {
            return Ok(TickResult::JobDeactivated);
        }
        if self.complete {
            return Ok(TickResult::JobComplete);
        }

        let samples = store.location_stream_since(self.truck_id, self.cursor).await?;
        if samples.is_empty() {
            return Ok(TickResult::Idle);
        }

        let mut job_completed = false;
        for sample in &samples {
            self.process_sample(store, cfg, sample).await?;
            self.cursor = sample.timestamp;
            if self.complete {
                job_completed = true;
                break;
            }
        }

        if job_completed {
            Ok(TickResult::JobComplete)
        } else {
            Ok(TickResult::Processed { samples: samples.len() })
        }
    }

    async fn process_sample(
        &mut self,
        store: &dyn Store,
        cfg: &MonitorConfig,
        sample: &LocSample,
    ) -> Result<(), MonitorError> {
        self.ensure_carry_open(sample.loc_id);

        match sample.loc_type {
            crate::domain::LocType::Stow => self.open_carry_mut().add_stow_time(0.2),
            crate::domain::LocType::Dock | crate::domain::LocType::DockOutside => {
                self.open_carry_mut().add_dock_time(0.2)
            }
            _ => {}
        }

        self.current_trip_mut().append_sample(sample.coord, sample.speed);
        self.validator.record_speed(sample.speed);

        let edges = clamp::detect_edges(self.prev_clamp_status.unwrap_or(sample.clamp_status), sample.clamp_status);
        self.prev_clamp_status = Some(sample.clamp_status);
        self.current_loc = Some(sample.loc_id);
        self.current_coord = Some(sample.coord);

        if edges.pickup && !sample.loc_type.is_transit() {
            self.pickup_armed = Some(PickupArm { coord: sample.coord, time: sample.timestamp, loc: sample.loc_id });
        }

        if edges.drop && !sample.loc_type.is_transit() && self.drop_armed.is_none() {
            if let Some(arm) = self.pickup_armed.take() {
                self.do_pickup(store, cfg, arm.loc, arm.coord, arm.time).await?;
            }
            self.drop_armed = Some(DropArm { coord: sample.coord, time: sample.timestamp, loc: sample.loc_id });
        }

        if let Some(arm) = self.pickup_armed {
            if distance(sample.coord, arm.coord) > cfg.pickup_check_distance_trigger {
                self.pickup_armed = None;
                self.do_pickup(store, cfg, arm.loc, arm.coord, arm.time).await?;
            }
        }

        if let Some(watch_coord) = self.clamp_event_watch {
            if distance(sample.coord, watch_coord) > cfg.pickup_check_distance_trigger {
                store.cancel_alerts_by_type(self.job_id, crate::domain::AlertType::ClampsClosedEvent).await?;
                self.clamp_event_watch = None;
            }
        }

        if let Some(arm) = self.drop_armed {
            if distance(sample.coord, arm.coord) > cfg.drop_check_distance {
                self.drop_armed = None;
                self.do_drop(store, cfg, arm.loc, arm.time, sample.timestamp).await?;
            }
        }

        Ok(())
    }

    async fn do_pickup(
        &mut self,
        store: &dyn Store,
        cfg: &MonitorConfig,
        loc: LocId,
        coord: Coord,
        time: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let outcome = self
            .validator
            .on_pickup(store, cfg, self.job_id, self.truck_id, &self.tasks, loc, coord, time)
            .await?;

        if outcome.finalize_trip && self.current_trip_mut().origin != loc {
            self.current_trip_mut().finish(loc, time);
            if self.open_tasks_remain() {
                let carry_num = self.open_carry_mut().carry_num;
                self.open_carry_mut().trips.push(Trip::new(carry_num, loc, time));
            }
        }
        if outcome.armed_clamp_event_watch {
            self.clamp_event_watch = Some(coord);
        }
        info!(job_id = self.job_id, loc, "pickup processed");
        Ok(())
    }

    async fn do_drop(
        &mut self,
        store: &dyn Store,
        cfg: &MonitorConfig,
        loc: LocId,
        time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let outcome = self
            .validator
            .on_drop(store, cfg, self.job_id, self.truck_id, &mut self.tasks, loc, time, now)
            .await?;

        if outcome.finalize_trip {
            self.current_trip_mut().finish(loc, time);
            if outcome.finalize_carry_item_count.is_none() && self.open_tasks_remain() {
                let carry_num = self.open_carry_mut().carry_num;
                self.open_carry_mut().trips.push(Trip::new(carry_num, loc, time));
            }
        }

        if let Some(item_count) = outcome.finalize_carry_item_count {
            self.open_carry_mut().finish(loc, item_count);
            let carry_num = self.carries.len() as u32 + 1;
            let mut carry = Carry::new(carry_num, loc);
            carry.trips.push(Trip::new(carry_num, loc, time));
            self.carries.push(carry);
        }

        info!(job_id = self.job_id, loc, classified = outcome.items_classified, "drop processed");

        if outcome.items_classified > 0 {
            self.check_job(store).await?;
        }

        Ok(())
    }

    /// §4.5 `check_job`: a fixed point on zero open tasks and zero active
    /// alerts — persists carries and job completion and stops the monitor.
    async fn check_job(&mut self, store: &dyn Store) -> Result<(), MonitorError> {
        if self.open_tasks_remain() {
            return Ok(());
        }
        if store.has_active_alerts(self.job_id).await? {
            return Ok(());
        }

        let finish_time = self.cursor;
        store.save_job(self.job_id, self.job_start_time, finish_time, &self.carries).await?;
        self.complete = true;
        info!(job_id = self.job_id, "job complete");
        Ok(())
    }

    /// Directly invokes pickup validation, bypassing the clamp-edge and
    /// distance gates — used by the scenario driver (§4.6).
    pub async fn simulate_pickup(
        &mut self,
        store: &dyn Store,
        cfg: &MonitorConfig,
        loc: LocId,
        coord: Coord,
        time: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.ensure_carry_open(loc);
        self.do_pickup(store, cfg, loc, coord, time).await
    }

    /// Directly invokes drop validation, bypassing the clamp-edge and
    /// distance gates — used by the scenario driver (§4.6).
    pub async fn simulate_drop(
        &mut self,
        store: &dyn Store,
        cfg: &MonitorConfig,
        loc: LocId,
        coord: Coord,
        time: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.ensure_carry_open(loc);
        self.current_trip_mut().append_sample(coord, 0.0);
        self.do_drop(store, cfg, loc, time, time).await
    }

    pub fn warn_if_stalled(&self, max_idle: chrono::Duration, now: DateTime<Utc>) {
        if now - self.cursor > max_idle {
            warn!(job_id = self.job_id, truck_id = self.truck_id, "no location samples received recently");
        }
    }
}
