use crate::domain::history::{MeterHistoryRecord, VehicleHistoryRecord};
use crate::domain::result::DomainResult;
use crate::domain::status::{MeterStatus, MeterStatusUpsert, VehicleStatus, VehicleStatusUpsert};
use async_trait::async_trait;

/// Write side of the Cold and Hot stores.
///
/// Everything done through one transaction becomes visible together on
/// `commit`, or not at all. Dropping a transaction without committing rolls it
/// back.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn begin(&self) -> DomainResult<Box<dyn TelemetryTransaction>>;
}

/// One open storage transaction
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryTransaction: Send {
    /// Canonical active vehicle for a meter, as seen by this transaction
    async fn find_active_vehicle_for(&mut self, meter_id: &str) -> DomainResult<Option<String>>;

    /// Canonical active meter for a vehicle, as seen by this transaction
    async fn find_active_meter_for(&mut self, vehicle_id: &str) -> DomainResult<Option<String>>;

    /// Insert-only; fails with `DuplicateHistoryRecord` on an id collision
    async fn append_meter_history(&mut self, record: &MeterHistoryRecord) -> DomainResult<()>;

    /// Insert-only; fails with `DuplicateHistoryRecord` on an id collision
    async fn append_vehicle_history(&mut self, record: &VehicleHistoryRecord) -> DomainResult<()>;

    /// Single conditional write of the meter row, returning the row as stored
    async fn upsert_meter_status(&mut self, upsert: &MeterStatusUpsert) -> DomainResult<MeterStatus>;

    /// Single conditional write of the vehicle row, returning the row as stored
    async fn upsert_vehicle_status(
        &mut self,
        upsert: &VehicleStatusUpsert,
    ) -> DomainResult<VehicleStatus>;

    async fn commit(&mut self) -> DomainResult<()>;

    async fn rollback(&mut self) -> DomainResult<()>;
}
