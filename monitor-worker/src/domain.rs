//! Domain model for tasks, trips, carries, items, and alerts.
//!
//! A task is bound to exactly one item once it completes; a carry groups one
//! or more trips between a stow/dock pair; an alert records a validation
//! failure the monitor could not resolve on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{delta_seconds, Coord};

pub type LocId = i64;
pub type ItemId = i64;
pub type TaskId = i64;
pub type JobId = i64;
pub type TruckId = i64;
pub type AlertId = i64;

/// A location sample from the truck's telemetry stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LocSample {
    pub loc_id: LocId,
    pub loc_type: LocType,
    pub coord: Coord,
    pub speed: f64,
    pub clamp_status: u8,
    pub timestamp: DateTime<Utc>,
}

/// Coarse classification of a location, used to decide whether clamp/pickup
/// logic applies there at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocType {
    Stow,
    Dock,
    DockOutside,
    Aisle,
    Charging,
    Other,
}

impl LocType {
    /// Pickup/drop clamp events are ignored at these location types — the
    /// truck is simply passing through, not staging inventory.
    pub fn is_transit(self) -> bool {
        matches!(self, LocType::Aisle | LocType::Charging)
    }
}

/// An inventory item observed via RFID at pickup or drop time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub model: String,
    /// Nonzero means the item is identity-locked: it can only satisfy a task
    /// that names this exact physical unit, never an equivalent one.
    pub serial_lock: i32,
    /// The item's current location as of this detection — i.e. the location
    /// it is moving *from* in whichever pickup/drop is being evaluated. This
    /// is updated every time the item is bound to a completed task, so the
    /// same item can carry a different `item_origin` across successive legs
    /// of a job (see the alleged-wrong-swap worked example).
    pub item_origin: LocId,
    pub correct_loc_id: Option<LocId>,
}

impl Item {
    pub fn is_fungible(&self) -> bool {
        self.serial_lock == 0
    }
}

/// One line item of a job: move a model from an origin to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub model: String,
    pub origin: LocId,
    pub dest: LocId,
    pub complete: bool,
    pub item_id: Option<ItemId>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub avg_speed: Option<f64>,
}

impl Task {
    pub fn new(task_id: TaskId, model: String, origin: LocId, dest: LocId) -> Self {
        Self {
            task_id,
            model,
            origin,
            dest,
            complete: false,
            item_id: None,
            start_time: None,
            finish_time: None,
            avg_speed: None,
        }
    }

    /// True iff the task is a candidate for the given model/origin pair and
    /// not yet bound to an item.
    pub fn is_open_for(&self, model: &str, origin: LocId) -> bool {
        !self.complete && self.model == model && self.origin == origin
    }

    /// Binds this task to `item_id`, marking it complete at `finish_time`.
    /// `start_time` and `avg_speed` come from the validator's shared speed
    /// accumulator, which spans from the previous task's completion (or job
    /// start) up to this one — not a per-task log.
    pub fn bind(&mut self, item_id: ItemId, start_time: DateTime<Utc>, finish_time: DateTime<Utc>, avg_speed: Option<f64>) {
        self.item_id = Some(item_id);
        self.complete = true;
        self.start_time = Some(start_time);
        self.finish_time = Some(finish_time);
        self.avg_speed = avg_speed;
    }
}

/// One leg of travel within a carry, from `origin` to `dest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub carry_num: u32,
    pub origin: LocId,
    pub dest: Option<LocId>,
    pub start_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
    pub distance: f64,
    pub avg_speed: Option<f64>,
    pub travel_time: Option<f64>,
    speeds: Vec<f64>,
    last_coord: Option<Coord>,
}

impl Trip {
    pub fn new(carry_num: u32, origin: LocId, start_time: DateTime<Utc>) -> Self {
        Self {
            carry_num,
            origin,
            dest: None,
            start_time,
            finish_time: None,
            distance: 0.0,
            avg_speed: None,
            travel_time: None,
            speeds: Vec::new(),
            last_coord: None,
        }
    }

    pub fn append_sample(&mut self, coord: Coord, speed: f64) {
        if let Some(prev) = self.last_coord {
            self.distance += crate::geometry::distance(prev, coord);
        }
        self.last_coord = Some(coord);
        self.speeds.push(speed);
    }

    /// Closes the trip at `dest`/`finish_time`, freezing its aggregates.
    pub fn finish(&mut self, dest: LocId, finish_time: DateTime<Utc>) {
        self.dest = Some(dest);
        self.finish_time = Some(finish_time);
        self.travel_time = Some(delta_seconds(self.start_time, finish_time));
        if !self.speeds.is_empty() {
            let mean = self.speeds.iter().sum::<f64>() / self.speeds.len() as f64;
            self.avg_speed = Some((mean * 100.0).round() / 100.0);
        }
    }
}

/// A group of one or more trips carrying items between a stow/dock pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carry {
    pub carry_num: u32,
    pub origin: LocId,
    pub dest: Option<LocId>,
    pub item_count: u32,
    pub stow_time: f64,
    pub dock_time: f64,
    pub trips: Vec<Trip>,
    pub total_distance: f64,
    pub avg_trip_distance: Option<f64>,
    pub avg_trip_time: Option<f64>,
}

impl Carry {
    pub fn new(carry_num: u32, origin: LocId) -> Self {
        Self {
            carry_num,
            origin,
            dest: None,
            item_count: 0,
            stow_time: 0.0,
            dock_time: 0.0,
            trips: Vec::new(),
            total_distance: 0.0,
            avg_trip_distance: None,
            avg_trip_time: None,
        }
    }

    pub fn add_stow_time(&mut self, seconds: f64) {
        self.stow_time += seconds;
    }

    pub fn add_dock_time(&mut self, seconds: f64) {
        self.dock_time += seconds;
    }

    /// Closes the carry at `dest` once at least one correct item has been
    /// dropped there, rolling up its trips' aggregates.
    pub fn finish(&mut self, dest: LocId, item_count: u32) {
        self.dest = Some(dest);
        self.item_count = item_count;
        self.total_distance = self.trips.iter().map(|t| t.distance).sum();
        if !self.trips.is_empty() {
            self.avg_trip_distance = Some(self.total_distance / self.trips.len() as f64);
            let total_time: f64 = self.trips.iter().filter_map(|t| t.travel_time).sum();
            self.avg_trip_time = Some(total_time / self.trips.len() as f64);
        }
    }
}

/// A validation failure or advisory the monitor surfaces for operator action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Option<AlertId>,
    pub job_id: JobId,
    pub loc_id: LocId,
    pub alert_type: AlertType,
    pub item_id: Option<ItemId>,
    pub correct_loc_id: Option<LocId>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ClampsClosedEvent,
    ClampsClosedWarning,
    DropItems,
    DropLocation,
    RemainingTasks,
    CannotPlace,
    DamagedItem,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap() + chrono::Duration::seconds(sec)
    }

    #[test]
    fn task_bind_sets_start_finish_and_avg_speed() {
        let mut t = Task::new(1, "A".into(), 10, 20);
        t.bind(99, ts(5), ts(30), Some(2.11));
        assert!(t.complete);
        assert_eq!(t.item_id, Some(99));
        assert_eq!(t.start_time, Some(ts(5)));
        assert_eq!(t.finish_time, Some(ts(30)));
        assert_eq!(t.avg_speed, Some(2.11));
    }

    #[test]
    fn trip_finish_computes_travel_time_and_distance() {
        let mut trip = Trip::new(1, 10, ts(0));
        trip.append_sample(Coord::new(0.0, 0.0), 1.0);
        trip.append_sample(Coord::new(3.0, 4.0), 2.0);
        trip.finish(20, ts(10));
        assert_eq!(trip.travel_time, Some(10.0));
        assert!((trip.distance - 5.0).abs() < 1e-9);
        assert_eq!(trip.avg_speed, Some(1.5));
    }

    #[test]
    fn carry_finish_rolls_up_trip_aggregates() {
        let mut carry = Carry::new(1, 10);
        let mut t1 = Trip::new(1, 10, ts(0));
        t1.append_sample(Coord::new(0.0, 0.0), 1.0);
        t1.append_sample(Coord::new(3.0, 0.0), 1.0);
        t1.finish(15, ts(10));
        let mut t2 = Trip::new(1, 15, ts(10));
        t2.append_sample(Coord::new(3.0, 0.0), 1.0);
        t2.append_sample(Coord::new(5.0, 0.0), 1.0);
        t2.finish(20, ts(20));
        carry.trips.push(t1);
        carry.trips.push(t2);
        carry.finish(20, 2);
        assert!((carry.total_distance - 5.0).abs() < 1e-9);
        assert_eq!(carry.avg_trip_distance, Some(2.5));
        assert_eq!(carry.avg_trip_time, Some(10.0));
    }
}
