//! The data-access interface the monitor is built against.
//!
//! [`Store`] is the narrow collaborator the monitor and validator depend on;
//! [`crate::pg_store::PgStore`] is the production Postgres-backed
//! implementation and [`crate::mem_store::MemStore`] is the in-memory one
//! used by tests and the scenario runner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Alert, AlertType, Carry, Item, ItemId, JobId, LocId, LocSample, Task, TruckId};
use crate::error::StoreError;

#[async_trait]
pub trait Store: Send + Sync {
    async fn is_job_active(&self, job_id: JobId) -> Result<bool, StoreError>;

    async fn tasks_for_job(&self, job_id: JobId) -> Result<Vec<Task>, StoreError>;

    async fn location_stream_since(
        &self,
        truck_id: TruckId,
        since: DateTime<Utc>,
    ) -> Result<Vec<LocSample>, StoreError>;

    /// Blocks until the device's latest RFID timestamp reaches `target_ts`,
    /// or until `timeout_s` seconds elapse, polling at 1Hz.
    async fn wait_for_rfid(&self, truck_id: TruckId, target_ts: DateTime<Utc>, timeout_s: u64);

    async fn items_detected(
        &self,
        truck_id: TruckId,
        t_min: DateTime<Utc>,
        t_max: DateTime<Utc>,
    ) -> Result<Vec<Item>, StoreError>;

    /// Location samples in `[t_min, t_max]` ordered by timestamp descending,
    /// used for the pickup back-window scan.
    async fn loc_samples_desc(
        &self,
        truck_id: TruckId,
        t_min: DateTime<Utc>,
        t_max: DateTime<Utc>,
    ) -> Result<Vec<LocSample>, StoreError>;

    async fn has_active_alerts(&self, job_id: JobId) -> Result<bool, StoreError>;

    async fn loc_has_active_drop_location_alert(&self, job_id: JobId, loc_id: LocId) -> Result<bool, StoreError>;

    /// Active alerts matching `item`'s model, at `item`'s origin location.
    async fn alerts_matching(&self, job_id: JobId, item: &Item) -> Result<Vec<Alert>, StoreError>;

    /// §10.6: resolves the NOE_loc salvage branch's first guard predicate.
    async fn has_cannot_place_alerts(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// §10.6: resolves the NOE_loc salvage branch's second guard predicate.
    async fn has_damaged_item_alerts(&self, job_id: JobId) -> Result<bool, StoreError>;

    async fn create_alert(
        &self,
        job_id: JobId,
        loc_id: LocId,
        alert_type: AlertType,
        item_id: Option<ItemId>,
        correct_loc_id: Option<LocId>,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn cancel_alert(&self, alert_id: crate::domain::AlertId) -> Result<(), StoreError>;

    async fn cancel_alerts_by_type(&self, job_id: JobId, alert_type: AlertType) -> Result<(), StoreError>;

    async fn cancel_alerts_by_items(&self, job_id: JobId, item_ids: &[ItemId]) -> Result<(), StoreError>;

    async fn cancel_alerts_by_model_loc(&self, job_id: JobId, model: &str, loc_id: LocId) -> Result<(), StoreError>;

    async fn cancel_remaining_tasks_alert(&self, loc_id: LocId) -> Result<(), StoreError>;

    async fn update_item_location(&self, item_id: ItemId, loc_id: LocId) -> Result<(), StoreError>;

    async fn save_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn save_job(
        &self,
        job_id: JobId,
        start_time: DateTime<Utc>,
        finish_time: DateTime<Utc>,
        carries: &[Carry],
    ) -> Result<(), StoreError>;

    async fn save_carries(&self, job_id: JobId, carries: &[Carry]) -> Result<(), StoreError>;
}
